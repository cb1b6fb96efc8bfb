//! Outbound HTTP: body encoding and the transport the engine fetches through.

mod body;
mod error;
mod transport;

pub use body::{
    ContentType, EncodeError, EncodedBody, FieldValue, FormField, Payload, encode, is_upload,
};
pub use error::FetchError;
pub use transport::{HttpTransport, PreparedRequest, Transport};

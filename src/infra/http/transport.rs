use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use relaycache_types::{Credentials, RequestConfig, RequestMode};
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use super::body::{self, EncodedBody, FieldValue, FormField, Payload};
use super::error::FetchError;
use crate::config::HttpSettings;
use crate::infra::error::InfraError;

/// A request ready for the wire: method normalized, URL parsed, body encoded.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    pub body: Option<EncodedBody>,
    pub credentials: Option<Credentials>,
    pub mode: Option<RequestMode>,
}

impl PreparedRequest {
    pub fn build(method: &str, config: &RequestConfig) -> Result<Self, FetchError> {
        let method = Method::from_bytes(method.trim().to_uppercase().as_bytes())
            .map_err(|err| FetchError::invalid(format!("method `{method}`: {err}")))?;
        let raw_url = config
            .url
            .as_deref()
            .ok_or_else(|| FetchError::invalid("url is required when a method is set"))?;
        let url = Url::parse(raw_url)
            .map_err(|err| FetchError::invalid(format!("url `{raw_url}`: {err}")))?;
        let body = config
            .body
            .as_ref()
            .map(|body| body::encode(body, body::is_upload(body)))
            .transpose()?;

        Ok(Self {
            method,
            url,
            headers: config.headers.clone(),
            body,
            credentials: config.credentials,
            mode: config.mode,
        })
    }

    fn is_multipart(&self) -> bool {
        matches!(
            self.body,
            Some(EncodedBody {
                payload: Payload::Multipart(_),
                ..
            })
        )
    }
}

/// Performs one network round trip and parses the JSON response.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, request: PreparedRequest) -> Result<Value, FetchError>;
}

/// `reqwest`-backed transport.
///
/// Requests with `credentials: include` go through a client with a cookie
/// store; everything else uses a cookie-less client.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    credentialed: Client,
}

impl HttpTransport {
    pub fn new(settings: &HttpSettings) -> Result<Self, InfraError> {
        let client = build_client(settings, false)?;
        let credentialed = build_client(settings, true)?;
        Ok(Self {
            client,
            credentialed,
        })
    }

    fn client_for(&self, credentials: Option<Credentials>) -> &Client {
        match credentials {
            Some(Credentials::Include) => &self.credentialed,
            _ => &self.client,
        }
    }
}

fn build_client(settings: &HttpSettings, cookies: bool) -> Result<Client, InfraError> {
    Client::builder()
        .user_agent(settings.user_agent.as_str())
        .timeout(settings.timeout)
        .connect_timeout(settings.timeout.min(Duration::from_secs(10)))
        .cookie_store(cookies)
        .build()
        .map_err(|err| InfraError::http_client(err.to_string()))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: PreparedRequest) -> Result<Value, FetchError> {
        let multipart = request.is_multipart();
        trace!(mode = ?request.mode, "Request mode is informational only");

        let mut builder = self
            .client_for(request.credentials)
            .request(request.method.clone(), request.url.clone());

        let explicit_content_type = request
            .headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
        if !multipart && !explicit_content_type {
            builder = builder.header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| FetchError::invalid(format!("header `{name}`: {err}")))?;
            if multipart && name == CONTENT_TYPE {
                continue;
            }
            let value = HeaderValue::from_str(value)
                .map_err(|err| FetchError::invalid(format!("header `{name}`: {err}")))?;
            builder = builder.header(name, value);
        }

        builder = match request.body {
            Some(EncodedBody {
                payload: Payload::Json(bytes),
                ..
            }) => builder.body(bytes),
            Some(EncodedBody {
                payload: Payload::Multipart(fields),
                ..
            }) => builder.multipart(form(fields)?),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), url = %request.url, "Non-success response");
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| FetchError::Decode(err.to_string()))
    }
}

fn form(fields: Vec<FormField>) -> Result<Form, FetchError> {
    let mut form = Form::new();
    for FormField { name, value } in fields {
        form = match value {
            FieldValue::Text(text) => form.text(name, text),
            FieldValue::Binary {
                file_name,
                bytes,
                mime,
            } => {
                let part = Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(&mime)
                    .map_err(|err| FetchError::invalid(format!("mime `{mime}`: {err}")))?;
                form.part(name, part)
            }
        };
    }
    Ok(form)
}

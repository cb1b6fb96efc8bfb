use std::fmt;

use relaycache_types::CacheName;

/// Case-normalized cache name. Selects one subject for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&CacheName> for CacheKey {
    fn from(name: &CacheName) -> Self {
        Self(name.to_string().to_lowercase())
    }
}

impl From<&str> for CacheKey {
    fn from(name: &str) -> Self {
        Self(name.to_lowercase())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_differing_only_in_case_share_a_key() {
        let upper = CacheKey::from(&CacheName::from("Users"));
        let lower = CacheKey::from(&CacheName::from("users"));
        assert_eq!(upper, lower);
        assert_eq!(upper.as_str(), "users");
    }

    #[test]
    fn numeric_names_become_decimal_keys() {
        assert_eq!(CacheKey::from(&CacheName::from(12)).as_str(), "12");
    }
}

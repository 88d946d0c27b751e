//! Store key generation.

/// A key that uniquely identifies a caller under one policy namespace.
///
/// The same identifier under two prefixes (for example `rl:auth_login` and
/// `rl:auth_signup`) maps to two independent entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimitKey {
    /// The policy namespace
    pub prefix: String,
    /// The caller identifier, used as an opaque string
    pub identifier: String,
}

impl LimitKey {
    /// Create a new key from a prefix and identifier.
    pub fn new(prefix: &str, identifier: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            identifier: identifier.to_string(),
        }
    }

    /// The flat string form used by the entry stores: `prefix:identifier`.
    pub fn to_store_key(&self) -> String {
        format!("{}:{}", self.prefix, self.identifier)
    }
}

impl std::fmt::Display for LimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.prefix, self.identifier)
    }
}

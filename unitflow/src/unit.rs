//! In-memory representation of one installable unit version.
//!
//! A [`UnitRecord`] is a cached projection of a `units` row; the content
//! store is the source of truth. State transitions are driven entirely by
//! the lifecycle orchestration - the record itself enforces no rules.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::digest::Output;
use sha2::Sha256;
use uuid::Uuid;

/// Opaque identifier for a unit, stable across its persisted lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitId(String);

impl UnitId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an identifier loaded from the store.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed-length SHA-256 digest of a unit's full body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub const LEN: usize = 32;

    /// Build from a raw 32-byte digest, e.g. a `content_hash` column.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering, as used in logs and the CLI.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<Output<Sha256>> for ContentHash {
    fn from(digest: Output<Sha256>) -> Self {
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Point in the lifecycle state machine a unit currently occupies.
///
/// Valid forward order is `Downloading → Installing → Installed →
/// Activating → Activated`; `Redundant` is reachable from any non-terminal
/// state and is itself terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Downloading,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl InstallState {
    /// Column value for the `install_state` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Downloading => "downloading",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        }
    }

    /// Parse a stored column value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "downloading" => Some(Self::Downloading),
            "installing" => Some(Self::Installing),
            "installed" => Some(Self::Installed),
            "activating" => Some(Self::Activating),
            "activated" => Some(Self::Activated),
            "redundant" => Some(Self::Redundant),
            _ => None,
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Redundant)
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, duplicate-preserving header pairs.
///
/// HTTP allows repeated header names; lookups return the first match,
/// case-insensitively. The pairs round-trip through JSON for the `headers`
/// column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pair, preserving order and duplicates.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize for the `headers` column.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a `headers` column value.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One installable unit version.
///
/// Owned by exactly one registration via its scope. Identity is the `id`
/// field; two records with the same id describe the same unit even when
/// loaded separately from the store.
#[derive(Debug, Clone)]
pub struct UnitRecord {
    pub id: UnitId,
    /// Source URL the body was fetched from.
    pub url: String,
    /// Scope of the owning registration.
    pub scope: String,
    /// Response headers captured at fetch time (ETag, Last-Modified, ...).
    pub headers: Headers,
    /// Digest of the full body; `None` only while downloading.
    pub content_hash: Option<ContentHash>,
    pub state: InstallState,
    /// Set once `destroy` has released execution-engine resources.
    destroyed: bool,
}

impl UnitRecord {
    /// Create a fresh record in the `Downloading` state.
    pub fn new(url: impl Into<String>, scope: impl Into<String>, headers: Headers) -> Self {
        Self {
            id: UnitId::new(),
            url: url.into(),
            scope: scope.into(),
            headers,
            content_hash: None,
            state: InstallState::Downloading,
            destroyed: false,
        }
    }

    /// Rehydrate a record loaded from the store.
    pub fn from_parts(
        id: UnitId,
        url: String,
        scope: String,
        headers: Headers,
        content_hash: Option<ContentHash>,
        state: InstallState,
    ) -> Self {
        Self {
            id,
            url,
            scope,
            headers,
            content_hash,
            state,
            destroyed: false,
        }
    }

    /// Whether `other` names the same unit. Comparison is by id, never by
    /// object identity, so records reloaded from the store compare equal.
    pub fn same_identity(&self, other: &UnitRecord) -> bool {
        self.id == other.id
    }

    /// Release any execution-engine resources held by the unit.
    ///
    /// No store interaction; the persisted row is untouched. Idempotent.
    pub fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            tracing::debug!(unit = %self.id, "unit runtime resources released");
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    #[test]
    fn test_headers_first_match_case_insensitive() {
        let mut headers = Headers::new();
        headers.push("ETag", "\"v1\"");
        headers.push("etag", "\"v2\"");
        headers.push("Last-Modified", "Tue, 01 Jan 2030 00:00:00 GMT");

        assert_eq!(headers.get("etag"), Some("\"v1\""));
        assert_eq!(headers.get("ETAG"), Some("\"v1\""));
        assert_eq!(
            headers.get("last-modified"),
            Some("Tue, 01 Jan 2030 00:00:00 GMT")
        );
        assert_eq!(headers.get("content-type"), None);
    }

    #[test]
    fn test_headers_json_round_trip_preserves_duplicates_and_order() {
        let mut headers = Headers::new();
        headers.push("Set-Cookie", "a=1");
        headers.push("Set-Cookie", "b=2");
        headers.push("ETag", "\"x\"");

        let json = headers.to_json().unwrap();
        let back = Headers::from_json(&json).unwrap();
        assert_eq!(back, headers);
        assert_eq!(back.len(), 3);
        let pairs: Vec<_> = back.iter().collect();
        assert_eq!(pairs[0], ("Set-Cookie", "a=1"));
        assert_eq!(pairs[1], ("Set-Cookie", "b=2"));
    }

    #[test]
    fn test_install_state_round_trip() {
        for state in [
            InstallState::Downloading,
            InstallState::Installing,
            InstallState::Installed,
            InstallState::Activating,
            InstallState::Activated,
            InstallState::Redundant,
        ] {
            assert_eq!(InstallState::parse(state.as_str()), Some(state));
        }
        assert_eq!(InstallState::parse("bogus"), None);
        assert!(InstallState::Redundant.is_terminal());
        assert!(!InstallState::Activated.is_terminal());
    }

    #[test]
    fn test_content_hash_hex_and_round_trip() {
        let digest = Sha256::digest(b"hello");
        let hash = ContentHash::from(digest);
        assert_eq!(hash.to_hex().len(), 64);
        assert_eq!(ContentHash::from_bytes(hash.as_bytes()), Some(hash));
        assert_eq!(ContentHash::from_bytes(&[0u8; 4]), None);
    }

    #[test]
    fn test_identity_is_by_id() {
        let a = UnitRecord::new("https://x/u.js", "https://x/", Headers::new());
        let mut b = a.clone();
        b.state = InstallState::Activated;
        assert!(a.same_identity(&b));

        let c = UnitRecord::new("https://x/u.js", "https://x/", Headers::new());
        assert!(!a.same_identity(&c));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut unit = UnitRecord::new("https://x/u.js", "https://x/", Headers::new());
        assert!(!unit.is_destroyed());
        unit.destroy();
        unit.destroy();
        assert!(unit.is_destroyed());
    }
}

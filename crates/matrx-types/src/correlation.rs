//! Correlation ID for request tracking.
//!
//! Client-generated ids are UUID v7 strings, so they are time-ordered and
//! unique. Ids received from the wire are kept verbatim: other producers are
//! free to use any opaque string.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::{Uuid, Version};

/// Correlation ID matching a render reply to its request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new correlation ID (UUID v7)
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wrap an id received from a message property or body.
    pub fn from_wire(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time in milliseconds since the Unix epoch, if this is a
    /// UUID v7.
    pub fn timestamp_ms(&self) -> Option<u64> {
        let uuid = Uuid::parse_str(&self.0).ok()?;
        if uuid.get_version() != Some(Version::SortRand) {
            return None;
        }
        let (secs, nanos) = uuid.get_timestamp()?.to_unix();
        Some(secs * 1_000 + u64::from(nanos / 1_000_000))
    }

    /// Time since a UUID v7 id was generated. Clock skew between producer
    /// and reader clamps to zero.
    pub fn age(&self) -> Option<Duration> {
        let created = self.timestamp_ms()?;
        let now = u64::try_from(Utc::now().timestamp_millis()).ok()?;
        Some(Duration::from_millis(now.saturating_sub(created)))
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: HashSet<CorrelationId> = (0..1000).map(|_| CorrelationId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_generated_id_carries_timestamp() {
        let id = CorrelationId::new();
        let ts = id.timestamp_ms().expect("v7 timestamp");
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        assert!(ts <= now);
        assert!(now - ts < 60_000);
    }

    #[test]
    fn test_generated_id_is_young() {
        let age = CorrelationId::new().age().expect("v7 age");
        assert!(age < std::time::Duration::from_secs(60));
    }

    #[test]
    fn test_wire_id_is_opaque() {
        let id = CorrelationId::from_wire("job-42");
        assert_eq!(id.as_str(), "job-42");
        assert_eq!(id.timestamp_ms(), None);
        assert_eq!(id.age(), None);

        let v4 = CorrelationId::from(Uuid::new_v4());
        assert_eq!(v4.timestamp_ms(), None);
    }

    #[test]
    fn test_serde_transparent() {
        let id = CorrelationId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        let back: CorrelationId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, id);
    }
}

//! Correlation identifier generation.
//!
//! The server tracks requests by opaque identifiers; we keep them roughly
//! time-ordered (millisecond prefix) with a uuid fragment for uniqueness.

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn tagged(prefix: &str) -> String {
    let rand = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", prefix, now_millis(), &rand[..9])
}

/// Identifier for one logical login session.
pub fn session_id() -> String {
    tagged("sess")
}

/// Identifier for one outbound batch of work.
pub fn batch_id() -> String {
    tagged("batch")
}

/// Identifier for one outbound request.
pub fn request_id() -> String {
    tagged("req")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes() {
        assert!(session_id().starts_with("sess_"));
        assert!(batch_id().starts_with("batch_"));
        assert!(request_id().starts_with("req_"));
    }

    #[test]
    fn test_uniqueness() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(request_id()), "request ids must not repeat");
        }
    }
}

//! Id generation for messages, sessions, and connections.
//!
//! Message and session ids are UUID v7 (time-ordered). Connection ids are
//! short random tags that only need to be unique among live connections,
//! so they stay grep-friendly in logs.

use rand::Rng;
use uuid::Uuid;

/// Alphabet for connection ids (lowercase alphanumeric).
const CID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of a connection id.
const CID_LEN: usize = 8;

/// Generate a message id (UUID v7, time-ordered).
pub fn message_id() -> String {
    Uuid::now_v7().to_string()
}

/// Generate a session id (UUID v7, time-ordered).
pub fn session_id() -> String {
    Uuid::now_v7().to_string()
}

/// Generate a short connection id, e.g. `k3x9mf2a`.
pub fn connection_id() -> String {
    let mut rng = rand::rng();
    (0..CID_LEN)
        .map(|_| CID_ALPHABET[rng.random_range(0..CID_ALPHABET.len())] as char)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_is_uuid_v7() {
        let id = message_id();
        let parsed = Uuid::parse_str(&id).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn session_id_is_uuid_v7() {
        let id = session_id();
        let parsed = Uuid::parse_str(&id).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(message_id(), message_id());
        assert_ne!(session_id(), session_id());
        assert_ne!(connection_id(), connection_id());
    }

    #[test]
    fn connection_id_shape() {
        let cid = connection_id();
        assert_eq!(cid.len(), CID_LEN);
        assert!(
            cid.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()),
            "unexpected character in {cid}"
        );
    }

    #[test]
    fn connection_ids_spread_over_alphabet() {
        // 64 ids * 8 chars gives every alphabet bucket a fair chance;
        // all-identical output would mean a broken generator.
        let ids: Vec<String> = (0..64).map(|_| connection_id()).collect();
        let distinct: std::collections::HashSet<&String> = ids.iter().collect();
        assert!(distinct.len() > 60);
    }
}

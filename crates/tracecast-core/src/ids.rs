//! ID generation.
//!
//! All generated IDs are UUID v7 (time-ordered) with a short type prefix so
//! that log lines make the entity obvious at a glance.

use uuid::Uuid;

fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

/// New investigation ID (`inv_<uuid>`).
#[must_use]
pub fn new_investigation_id() -> String {
    format!("inv_{}", new_v7())
}

/// New message ID (`msg_<uuid>`).
#[must_use]
pub fn new_message_id() -> String {
    format!("msg_{}", new_v7())
}

/// New subscriber ID (`sub_<uuid>`).
#[must_use]
pub fn new_subscriber_id() -> String {
    format!("sub_{}", new_v7())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes() {
        assert!(new_investigation_id().starts_with("inv_"));
        assert!(new_message_id().starts_with("msg_"));
        assert!(new_subscriber_id().starts_with("sub_"));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_message_id(), new_message_id());
    }

    #[test]
    fn ids_are_time_ordered() {
        let a = new_subscriber_id();
        let b = new_subscriber_id();
        assert!(a < b);
    }
}

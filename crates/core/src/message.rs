//! The message value (C2).

use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::strip_stream_prefix;

/// An immutable `{stream, msg_uid, data}` triple.
///
/// Equality is by `msg_uid` only (§3): two `Message`s with the same UID are
/// the same message even if `data` differs due to a lossy re-encode.
#[derive(Debug, Clone)]
pub struct Message {
    stream: String,
    msg_uid: Uuid,
    data: serde_json::Map<String, JsonValue>,
}

impl Message {
    /// Construct a message, stripping any `telstar:stream:` wire prefix from
    /// `stream` so the logical name is always stored (§3).
    pub fn new(
        stream: impl Into<String>,
        msg_uid: Uuid,
        data: serde_json::Map<String, JsonValue>,
    ) -> Self {
        let stream = stream.into();
        let stream = strip_stream_prefix(&stream).to_string();
        Self {
            stream,
            msg_uid,
            data,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn msg_uid(&self) -> Uuid {
        self.msg_uid
    }

    pub fn data(&self) -> &serde_json::Map<String, JsonValue> {
        &self.data
    }

    pub fn into_data(self) -> serde_json::Map<String, JsonValue> {
        self.data
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.msg_uid == other.msg_uid
    }
}

impl Eq for Message {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_the_wire_prefix_on_construction() {
        let uid = Uuid::new_v4();
        let data = serde_json::Map::new();
        let msg = Message::new("telstar:stream:orders", uid, data);
        assert_eq!(msg.stream(), "orders");
    }

    #[test]
    fn equality_is_by_msg_uid_only() {
        let uid = Uuid::new_v4();
        let mut data_a = serde_json::Map::new();
        data_a.insert("a".into(), json!(1));
        let mut data_b = serde_json::Map::new();
        data_b.insert("a".into(), json!(2));

        let a = Message::new("orders", uid, data_a);
        let b = Message::new("orders", uid, data_b);
        assert_eq!(a, b);

        let c = Message::new("orders", Uuid::new_v4(), serde_json::Map::new());
        assert_ne!(a, c);
    }
}

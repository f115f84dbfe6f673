//! The administrative view (C8): read-only enumeration of streams,
//! groups, consumers, and pending entries, plus group/consumer deletion
//! and single-entry inspection. See spec §4.7.
//!
//! This is a thin typed wrapper over [`telstar_infra::StreamServer`]; it
//! owns no state of its own and talks to the same server the producer and
//! consumer runtimes do.

mod error;
mod view;

pub use error::AdminError;
pub use view::{AdminConsumer, AdminGroup, AdminPendingMessage, AdminStream, AdminView};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use telstar_infra::FakeStreamServer;
    use uuid::Uuid;

    use super::*;

    fn seeded_server() -> FakeStreamServer {
        let server = FakeStreamServer::new();
        server.xgroup_create("orders", "billing", "0").unwrap();
        server
            .xadd_pipeline(
                &[
                    ("orders".to_string(), Uuid::new_v4(), serde_json::json!({"n": 1})),
                    ("orders".to_string(), Uuid::new_v4(), serde_json::json!({"n": 2})),
                ],
                Duration::ZERO,
            )
            .unwrap();
        server
    }

    #[test]
    fn get_streams_finds_the_seeded_stream() {
        let server = seeded_server();
        let admin = AdminView::new(server);

        let streams = admin.get_streams("").unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].name(), "orders");
        assert_eq!(streams[0].len().unwrap(), 2);
    }

    #[test]
    fn pending_messages_are_empty_until_a_group_read_happens() {
        let server = seeded_server();
        let admin = AdminView::new(server.clone());
        let stream = admin.stream("orders");
        let group = stream.group("billing").unwrap().unwrap();

        assert_eq!(group.pending_count(), 0);
        assert!(group.get_pending_messages().unwrap().is_empty());

        server
            .xreadgroup_new(&["orders".to_string()], "billing", "cg:billing:c1", 0)
            .unwrap();

        let group = stream.group("billing").unwrap().unwrap();
        assert_eq!(group.pending_count(), 2);
        let pending = group.get_pending_messages().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].consumer(), "cg:billing:c1");
    }

    #[test]
    fn admin_message_read_and_remove_round_trip() {
        let server = seeded_server();
        server
            .xreadgroup_new(&["orders".to_string()], "billing", "cg:billing:c1", 0)
            .unwrap();

        let admin = AdminView::new(server.clone());
        let group = admin.stream("orders").group("billing").unwrap().unwrap();
        let pending = group.get_pending_messages().unwrap();
        let first = &pending[0];

        let message = first.read().unwrap();
        assert_eq!(message.stream(), "orders");

        first.remove().unwrap();
        let remaining = group.get_pending_messages().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(server.xlen("orders").unwrap(), 1);
    }

    #[test]
    fn get_seen_messages_counts_acked_entries() {
        let server = seeded_server();
        server
            .xreadgroup_new(&["orders".to_string()], "billing", "cg:billing:c1", 0)
            .unwrap();

        let admin = AdminView::new(server.clone());
        let group = admin.stream("orders").group("billing").unwrap().unwrap();
        assert_eq!(group.get_seen_messages().unwrap(), 0);

        let pending = group.get_pending_messages().unwrap();
        let msg_uid = pending[0].read().unwrap().msg_uid();
        server
            .ack_transaction(
                &telstar_core::seen_key("orders", "billing", msg_uid),
                &telstar_core::checkpoint_key("orders", "billing", pending[0].consumer()),
                "orders",
                "billing",
                pending[0].message_id(),
                3600,
            )
            .unwrap();

        let group = admin.stream("orders").group("billing").unwrap().unwrap();
        assert_eq!(group.get_seen_messages().unwrap(), 1);
    }

    #[test]
    fn group_and_consumer_delete_remove_server_side_state() {
        let server = seeded_server();
        server
            .xreadgroup_new(&["orders".to_string()], "billing", "cg:billing:c1", 0)
            .unwrap();

        let admin = AdminView::new(server.clone());
        let group = admin.stream("orders").group("billing").unwrap().unwrap();
        let consumers = group.get_consumers().unwrap();
        assert_eq!(consumers.len(), 1);
        assert_eq!(consumers[0].pending_count(), 2);

        consumers[0].delete().unwrap();
        let group = admin.stream("orders").group("billing").unwrap().unwrap();
        assert!(group.get_consumers().unwrap().is_empty());

        group.delete().unwrap();
        assert!(admin.stream("orders").group("billing").unwrap().is_none());
    }
}

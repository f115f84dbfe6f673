//! Callback shapes, the consumer identity passed to them, and the "done"
//! thunks a callback uses to acknowledge its work (§4.4.d, §4.4.g).

use serde_json::Value as JsonValue;
use telstar_core::{checkpoint_key, seen_key, Message, StreamId};
use telstar_infra::StreamServer;
use uuid::Uuid;

use crate::error::{CallbackError, ConsumeError};

/// Identifies the consumer a callback is running as, so application code
/// can log or branch on it without reaching into the runtime.
#[derive(Debug, Clone)]
pub struct ConsumerIdentity {
    pub group: String,
    pub name: String,
}

/// The two explicit callback shapes, rather than runtime introspection of
/// a parameter's type annotation (§9 REDESIGN FLAGS). `OnMessage` receives
/// the full [`Message`]; `OnData` receives only its payload, picked by
/// whichever the application registers the stream with.
///
/// Holds an `Arc`, not a `Box`, so the same registration can be attached
/// to more than one logical stream (the application facade binds one
/// function to a list of streams, §4.8).
#[derive(Clone)]
pub enum Callback {
    OnMessage(
        std::sync::Arc<dyn Fn(&ConsumerIdentity, &Message, Ack<'_>) -> Result<(), CallbackError> + Send + Sync>,
    ),
    OnData(
        std::sync::Arc<
            dyn Fn(&ConsumerIdentity, &serde_json::Map<String, JsonValue>, Ack<'_>) -> Result<(), CallbackError>
                + Send
                + Sync,
        >,
    ),
}

impl Callback {
    pub fn on_message<F>(f: F) -> Self
    where
        F: Fn(&ConsumerIdentity, &Message, Ack<'_>) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        Callback::OnMessage(std::sync::Arc::new(f))
    }

    pub fn on_data<F>(f: F) -> Self
    where
        F: Fn(&ConsumerIdentity, &serde_json::Map<String, JsonValue>, Ack<'_>) -> Result<(), CallbackError>
            + Send
            + Sync
            + 'static,
    {
        Callback::OnData(std::sync::Arc::new(f))
    }

    pub(crate) fn invoke(
        &self,
        identity: &ConsumerIdentity,
        message: &Message,
        ack: Ack<'_>,
    ) -> Result<(), CallbackError> {
        match self {
            Callback::OnMessage(f) => f(identity, message, ack),
            Callback::OnData(f) => f(identity, message.data(), ack),
        }
    }
}

/// The "done" thunk of §4.4.d: a callback calls `.done()` exactly when its
/// side effects are durably committed. Executes the full ack transaction
/// of §4.4.f (`WATCH`/`MULTI`/`SET seen`/`SET checkpoint`/`XACK`/`EXEC`).
pub struct Ack<'a> {
    server: &'a dyn StreamServer,
    logical_stream: String,
    group: String,
    consumer_name: String,
    id: StreamId,
    msg_uid: Uuid,
}

impl<'a> Ack<'a> {
    pub(crate) fn new(
        server: &'a dyn StreamServer,
        logical_stream: String,
        group: String,
        consumer_name: String,
        id: StreamId,
        msg_uid: Uuid,
    ) -> Self {
        Self {
            server,
            logical_stream,
            group,
            consumer_name,
            id,
            msg_uid,
        }
    }

    /// Run the ack transaction. `Ok(true)` if it committed; `Ok(false)` if
    /// another consumer won the race on the seen key (§7 item 5) — the
    /// message stays pending and will be claimed later, which is the
    /// intended semantics, not a caller error.
    pub fn done(self) -> Result<bool, ConsumeError> {
        let seen = seen_key(&self.logical_stream, &self.group, self.msg_uid);
        let checkpoint = checkpoint_key(&self.logical_stream, &self.group, &self.consumer_name);
        let committed = self.server.ack_transaction(
            &seen,
            &checkpoint,
            &self.logical_stream,
            &self.group,
            self.id,
            telstar_core::SEEN_KEY_TTL_SECONDS,
        )?;
        Ok(committed)
    }
}

/// The bare-ack thunk of §4.4.g: an error handler's escape hatch to accept
/// a poison message without recording a seen key — no dedup protection,
/// just `XACK`.
pub struct BareAck<'a> {
    server: &'a dyn StreamServer,
    logical_stream: String,
    group: String,
    consumer_name: String,
    id: StreamId,
}

impl<'a> BareAck<'a> {
    pub(crate) fn new(
        server: &'a dyn StreamServer,
        logical_stream: String,
        group: String,
        consumer_name: String,
        id: StreamId,
    ) -> Self {
        Self {
            server,
            logical_stream,
            group,
            consumer_name,
            id,
        }
    }

    pub fn ack(self) -> Result<(), ConsumeError> {
        let checkpoint = checkpoint_key(&self.logical_stream, &self.group, &self.consumer_name);
        self.server
            .bare_ack(&checkpoint, &self.logical_stream, &self.group, self.id)?;
        Ok(())
    }
}

/// An error handler, registered against a [`crate::error::CallbackErrorKind`]
/// (§4.4.g, §9 REDESIGN FLAGS: a discriminated union matched explicitly,
/// not an exception-MRO walk). Returning `Err` re-propagates out of the
/// dispatch loop exactly as an unhandled callback error would.
pub type ErrorHandler =
    Box<dyn Fn(&CallbackError, BareAck<'_>) -> Result<(), ConsumeError> + Send + Sync>;

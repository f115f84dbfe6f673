//! Wraps a registered [`Callback`] with the `strict`/`ack_invalid`
//! validation matrix of §4.8.

use std::sync::Arc;

use telstar_consumer::{Ack, Callback, CallbackError};

use crate::schema::PayloadSchema;

/// Apply schema validation ahead of `callback`, per the table in §4.8:
///
/// | strict | ack_invalid | effect |
/// |---|---|---|
/// | true  | false | log, re-raise the validation error |
/// | true  | true  | log, ack, then re-raise |
/// | false | true  | log, ack, swallow |
/// | false | false | log, don't ack, swallow (redelivered) |
pub fn validated(
    callback: Callback,
    schema: Arc<dyn PayloadSchema>,
    strict: bool,
    ack_invalid: bool,
) -> Callback {
    match callback {
        Callback::OnMessage(inner) => {
            let schema = schema.clone();
            Callback::OnMessage(Arc::new(move |identity, message, ack| {
                gate(schema.as_ref(), strict, ack_invalid, message.data(), ack, |ack| {
                    inner(identity, message, ack)
                })
            }))
        }
        Callback::OnData(inner) => {
            let schema = schema.clone();
            Callback::OnData(Arc::new(move |identity, data, ack| {
                gate(schema.as_ref(), strict, ack_invalid, data, ack, |ack| {
                    inner(identity, data, ack)
                })
            }))
        }
    }
}

fn gate<'a>(
    schema: &dyn PayloadSchema,
    strict: bool,
    ack_invalid: bool,
    data: &serde_json::Map<String, serde_json::Value>,
    ack: Ack<'a>,
    inner: impl FnOnce(Ack<'a>) -> Result<(), CallbackError>,
) -> Result<(), CallbackError> {
    match schema.validate(data) {
        Ok(()) => inner(ack),
        Err(err) => {
            tracing::warn!(error = %err, "payload validation failed");
            match (strict, ack_invalid) {
                (true, false) => Err(CallbackError::Validation(err.0)),
                (true, true) => {
                    // Best-effort: an ack-race loss here just means the
                    // message is claimed and re-validated later (§7 item 5);
                    // the validation error still propagates either way.
                    let _ = ack.done();
                    Err(CallbackError::Validation(err.0))
                }
                (false, true) => {
                    let _ = ack.done();
                    Ok(())
                }
                (false, false) => Ok(()),
            }
        }
    }
}

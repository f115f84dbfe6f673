//! The multi-stream consumer group runtime (C5), the one-shot group
//! consumer (C6), and the group supervisor (C7). See spec §4.4-§4.6.

mod callback;
mod error;
mod multi_stream;
mod once;
mod supervisor;

pub use callback::{Ack, BareAck, Callback, ConsumerIdentity, ErrorHandler};
pub use error::{CallbackError, CallbackErrorKind, ConsumeError};
pub use multi_stream::{
    MultiStreamConsumer, MultiStreamConsumerBuilder, DEFAULT_BLOCK_MS, DEFAULT_CLAIM_AFTER_MS,
};
pub use once::{OnceConsumer, ONCE_CONSUMER_NAME};
pub use supervisor::GroupSupervisor;

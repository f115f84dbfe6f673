//! The application facade (C9): binds user callbacks and error handlers
//! to `(group, stream)` pairs, and performs payload validation ahead of
//! user code. See spec §4.8.
//!
//! Uses an explicit builder rather than decorator-style registration
//! (§9 REDESIGN FLAGS): [`AppBuilder`] accumulates
//! registrations and `.build()` produces the immutable
//! `Vec<MultiStreamConsumer<S>>` a [`telstar_consumer::GroupSupervisor`]
//! runs.

mod builder;
mod schema;
mod validated;

pub use builder::AppBuilder;
pub use schema::{DeserializeAndValidate, PayloadSchema, ValidationError};
pub use validated::validated;

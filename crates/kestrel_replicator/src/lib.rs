//! Replica request routing for KestrelDB.
//!
//! - `messages`: tagged request/response wire types with optional clock
//!   timestamps
//! - `messaging`: the transport boundary (trait + in-process implementation)
//! - `invoker`: `ReplicaInvoker` — sends requests to a named replica and,
//!   on "replica not yet available", awaits readiness through one shared
//!   probe per target before retrying

pub mod invoker;
pub mod messages;
pub mod messaging;

pub use invoker::ReplicaInvoker;
pub use messages::{ReplicaErrorCode, ReplicaRequest, ReplicaResponse};
pub use messaging::{ChannelMessaging, Messaging, ReplicaHandler, TransportError};

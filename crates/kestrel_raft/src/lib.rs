//! Replication group lifecycle for KestrelDB.
//!
//! - `RaftGroupCoordinator`: creates, tracks, and tears down replication
//!   groups; stop-guarded against concurrent shutdown
//! - `GroupRuntime`: the consensus engine boundary, with an openraft-backed
//!   in-process implementation (`RaftGroupRuntime`)
//! - `GroupService`: per-group client handle; `GroupServiceFactory` lets
//!   callers substitute specialized wrappers

pub mod coordinator;
pub mod network;
pub mod runtime;
pub mod service;
pub mod store;
pub mod types;

pub use coordinator::RaftGroupCoordinator;
pub use runtime::{
    GroupEventsListener, GroupOptions, GroupRuntime, NoopEventsListener, RaftGroupRuntime,
    StateMachineListener,
};
pub use service::{DefaultServiceFactory, GroupService, GroupServiceFactory};
pub use types::{GroupRequest, GroupResponse, TypeConfig};

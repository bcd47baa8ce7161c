//! Revision-linearized watch pipeline for KestrelDB metadata.
//!
//! Every committed metadata revision is processed by each registered watch in
//! parallel, but notifications for a single watch are linearized, and no
//! watch hears about revision R+1 until every watch (and the downstream
//! callback chain) has finished revision R.
//!
//! - `entry`: entry/event model and the point-in-time `EntryReader` boundary
//! - `watch`: watch capabilities and listener traits
//! - `processor`: the actor-based `WatchProcessor`
//! - `storage`: in-memory revisioned storage and the replicated-log feed

pub mod entry;
pub mod processor;
pub mod storage;
pub mod watch;

pub use entry::{Entry, EntryEvent, EntryReader, WatchEvent};
pub use processor::WatchProcessor;
pub use storage::{decode_meta_command, encode_meta_command, MetaCommand, MetaStorageListener, RevisionedStorage};
pub use watch::{RevisionCallback, RevisionUpdateListener, Watch, WatchListener};

//! Scheduling and dispatch core of the forum task relay.
//!
//! The monitor side wires [`ForumHub`] -> [`ForumMonitor`] ->
//! [`TaskManager`] -> [`Dispatcher`]; the worker side wires
//! [`WorkerRouter`] -> [`adapter::ProcessingAdapter`] -> [`StatusSink`] and
//! [`ReplyManager`]. Both binaries share [`config`] and [`logging`].

pub mod adapter;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod forum;
pub mod logging;
pub mod manager;
pub mod monitor;
pub mod registry;
pub mod reply;
pub mod router;
pub mod sink;
pub mod store;


pub use adapter::{AdapterSet, HttpAdapter, ProcessingAdapter};
pub use classifier::Classifier;
pub use config::{RelayConfig, RetryBackoff};
pub use dispatcher::{Dispatcher, SweepReport};
pub use error::RelayError;
pub use forum::{ForumClient, ForumError, ForumHub, HttpForumClient};
pub use manager::TaskManager;
pub use monitor::{CycleReport, ForumMonitor};
pub use registry::WorkerRegistry;
pub use reply::ReplyManager;
pub use router::{RouterConfig, WorkerRouter};
pub use sink::{MonitorClient, StatusSink};
pub use store::{SqliteTaskStore, TaskStore};

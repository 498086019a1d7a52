//! Shared data model of the forum task relay.
//!
//! Everything that crosses a process boundary (monitor API, worker API,
//! persisted task JSON) is defined here so both binaries agree on it.

pub mod forum;
pub mod payload;
pub mod task;
pub mod wire;

pub use forum::{ForumPost, ForumReply, LoginRequest};
pub use payload::{
    ImagePayload, Payload, PayloadError, TaskPayload, TtsPayload, VideoPayload, VoiceClonePayload,
};
pub use task::{
    DEFAULT_MAX_RETRIES, Task, TaskPriority, TaskSource, TaskStats, TaskStatus, TaskType, meta,
};
pub use wire::{
    ProcessingResult, ReceiveTaskResponse, RepliedAck, StatusReport, WorkerDescriptor, WorkerStatus,
};

pub mod activity;
pub mod candidates;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod job;
pub mod limiter;
pub mod memory;
pub mod metrics;
pub mod preset;
pub mod retention;
pub mod selector;
pub mod store;
pub mod tools;

pub use activity::{ActivityEntry, ActivityRecorder, Severity};
pub use config::PressConfig;
pub use error::{JobError, StoreError, ToolError};
pub use events::{BroadcastSink, EventSink, LogSink, NoopSink, PressEvent};
pub use executor::JobExecutor;
pub use job::{Candidate, FileKind, JobMode, JobRequest, JobResponse, JobResult, JobState};
pub use limiter::ConcurrencyLimiter;
pub use metrics::{MetricsRecord, MetricsStore, ProcessedFile};
pub use preset::{EncodeParams, PresetResolver, SpeedPreset};
pub use retention::{RetentionPolicy, RetentionSweeper};
pub use store::JsonStore;

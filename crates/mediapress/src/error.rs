use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single external tool or codec invocation.
///
/// These never abort a job on their own: the strategy that hit one simply
/// produces no candidate.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("{tool} exited with code {code:?}: {stderr}")]
    Exit {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{tool} timed out after {secs}s and was killed")]
    Timeout { tool: String, secs: u64 },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("pass not supported by this encoder: {0}")]
    UnsupportedPass(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors surfaced to the caller of `JobExecutor::execute`
#[derive(Debug, Error)]
pub enum JobError {
    /// The kind/format combination is not handled; the job never entered Encoding
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Nothing deliverable was produced, or an internal fault occurred
    #[error("processing failed: {0}")]
    Processing(String),
}

/// Errors from the persisted-object store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to (de)serialize {key}: {source}")]
    Serde {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The limiter was closed while a task waited for admission
#[derive(Debug, Error)]
#[error("concurrency limiter is closed")]
pub struct LimiterClosed;

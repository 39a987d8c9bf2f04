use std::path::PathBuf;
use thiserror::Error;

/// A naming template that cannot produce archive names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("naming template {template:?} is missing a {placeholder} placeholder")]
    MissingPlaceholder {
        template: String,
        placeholder: &'static str,
    },
    #[error("naming template {template:?} has more than one {placeholder} placeholder")]
    DuplicatePlaceholder {
        template: String,
        placeholder: &'static str,
    },
    #[error("naming template {template:?} has unsupported directive '%{directive}'")]
    UnsupportedDirective { template: String, directive: String },
}

/// Failure of a single archive job.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to archive {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot derive an archive name from {}", .0.display())]
    InvalidSource(PathBuf),
    #[error("archive worker did not finish: {0}")]
    Worker(String),
}

/// First failure of a batch, together with every archive name reserved
/// before dispatch stopped. `reserved` is in dispatch order.
#[derive(Debug, Error)]
#[error("archive batch failed after reserving {} name(s): {source}", .reserved.len())]
pub struct BatchError {
    pub reserved: Vec<String>,
    #[source]
    pub source: ArchiveError,
}

/// A schedule string that cannot be turned into an expression.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid cron expression {expression:?}: {reason}")]
    Cron { expression: String, reason: String },
    #[error("invalid interval {0:?}, expected e.g. \"30s\", \"15m\" or \"6h\"")]
    Interval(String),
    #[error("unknown time zone {0:?}")]
    TimeZone(String),
}

/// Reasons the periodic scheduler stopped, other than cancellation.
#[derive(Debug, Error)]
pub enum ScheduleError<E> {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("schedule has no further fire instants")]
    Exhausted,
    #[error("scheduled callback failed: {0}")]
    Callback(E),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to store object {key:?}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid object key {0:?}")]
    InvalidKey(String),
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("failed to list directories in {}: {source}", .path.display())]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Archive(#[from] BatchError),
    #[error("failed to open archive {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to remove local archive {}: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("backup worker panicked")]
    WorkerPanicked,
}

pub mod archive;
pub mod backup;
pub mod error;
pub mod job;
pub mod listing;
pub mod schedule;
pub mod storage;

pub use archive::{default_concurrency, Archiver, BatchArchiver, TarGzArchiver};
pub use backup::{Backup, BackupReport};
pub use error::{
    ArchiveError, BackupError, BatchError, ParseError, ScheduleError, StorageError, TemplateError,
};
pub use job::{ArchiveJob, NamingTemplate};
pub use listing::list_dirs;
pub use schedule::{
    parse_schedule, parse_schedule_in, parse_timezone, run_schedule, run_with_expression,
    upcoming, Clock, CronExpression, Expression, IntervalExpression, ScheduleConfig, SystemClock,
};
pub use storage::{DirectoryStore, ObjectStore};

pub const DEFAULT_NAME_TEMPLATE: &str = "backup-%s-%d";
pub const DEFAULT_SCHEDULE: &str = "0 0 * * *";

// Production paths (follow FHS - Filesystem Hierarchy Standard)
pub const DEFAULT_CONFIG_PATH: &str = "/etc/foldup/config.yaml";
pub const DEFAULT_BUCKET_PATH: &str = "/var/lib/foldup/bucket";

// Bucket used by the CLI when no --bucket is given
pub const USER_BUCKET_PATH: &str = "foldup-bucket";

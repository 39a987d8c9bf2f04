//! Bounded-concurrency directory archiving.
//!
//! A batch turns every source directory into one `.tar.gz` file. At most
//! `concurrency` archives are written at once; each worker holds an owned
//! semaphore permit for exactly as long as it runs. The first failure stops
//! further dispatch, but workers already running are always drained before
//! the batch returns.

use crate::error::{ArchiveError, BatchError};
use crate::job::{base_name, ArchiveJob, NamingTemplate};
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Turns one source directory into one archive file.
///
/// Implementations run on the blocking thread pool and may be called from
/// several threads at once.
pub trait Archiver: Send + Sync + 'static {
    fn archive(&self, source: &Path, destination: &Path) -> Result<(), ArchiveError>;
}

/// Writes a gzip-compressed tarball whose single root entry is named after
/// the source directory. `level` is a gzip level from 0 (store) to 9 (best);
/// `None` uses flate2's default.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarGzArchiver {
    pub level: Option<u32>,
}

impl TarGzArchiver {
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Some(level.min(9)),
        }
    }

    fn write(&self, source: &Path, destination: &Path) -> io::Result<()> {
        if !fs::metadata(source)?.is_dir() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a directory"));
        }
        let root = base_name(source)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let compression = self.level.map(Compression::new).unwrap_or_default();
        let encoder = GzEncoder::new(File::create(destination)?, compression);
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);
        builder.append_dir_all(&root, source)?;

        let file = builder.into_inner()?.finish()?;
        file.sync_all()
    }
}

impl Archiver for TarGzArchiver {
    fn archive(&self, source: &Path, destination: &Path) -> Result<(), ArchiveError> {
        self.write(source, destination).map_err(|e| {
            // Never leave a truncated archive behind.
            let _ = fs::remove_file(destination);
            ArchiveError::Io {
                path: source.to_path_buf(),
                source: e,
            }
        })
    }
}

/// Logical CPU count, never less than one.
pub fn default_concurrency() -> usize {
    num_cpus::get().max(1)
}

/// First-error-wins cell shared by the workers of one batch. Recording never
/// blocks, so any number of failing workers can finish.
#[derive(Default)]
struct FirstError(Mutex<Option<ArchiveError>>);

impl FirstError {
    fn record(&self, error: ArchiveError) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    fn is_set(&self) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn take(&self) -> Option<ArchiveError> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[derive(Clone)]
pub struct BatchArchiver {
    concurrency: usize,
    output_dir: PathBuf,
    archiver: Arc<dyn Archiver>,
}

impl std::fmt::Debug for BatchArchiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchArchiver")
            .field("concurrency", &self.concurrency)
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

impl Default for BatchArchiver {
    fn default() -> Self {
        Self::new(".")
    }
}

impl BatchArchiver {
    /// Archiver writing `.tar.gz` files into `output_dir`, running one job
    /// per logical CPU.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            concurrency: default_concurrency(),
            output_dir: output_dir.into(),
            archiver: Arc::new(TarGzArchiver::default()),
        }
    }

    /// Caps the number of archives written at once. Zero is treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Writes archives at the given gzip level, clamped to 9.
    pub fn with_compression(self, level: u32) -> Self {
        self.with_archiver(TarGzArchiver::with_level(level))
    }

    pub fn with_archiver(mut self, archiver: impl Archiver) -> Self {
        self.archiver = Arc::new(archiver);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Archives every directory in `paths`, stamping all names with the
    /// current Unix time. See [`BatchArchiver::archive_directories_at`].
    pub async fn archive_directories<P: AsRef<Path>>(
        &self,
        paths: &[P],
        template: &NamingTemplate,
    ) -> Result<Vec<String>, BatchError> {
        self.archive_directories_at(paths, template, Utc::now().timestamp())
            .await
    }

    /// Archives every directory in `paths` with names built from `template`
    /// and the shared batch `timestamp`.
    ///
    /// On success the archive names are returned sorted. On failure the
    /// error carries the names reserved so far, in dispatch order; a name is
    /// reserved before its job is dispatched, so it may belong to a job that
    /// never ran.
    pub async fn archive_directories_at<P: AsRef<Path>>(
        &self,
        paths: &[P],
        template: &NamingTemplate,
        timestamp: i64,
    ) -> Result<Vec<String>, BatchError> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let first_error = Arc::new(FirstError::default());
        let mut workers = JoinSet::new();
        let mut archives = Vec::with_capacity(paths.len());

        for path in paths {
            let job = match ArchiveJob::new(path.as_ref(), template, timestamp) {
                Ok(job) => job,
                Err(e) => {
                    first_error.record(e);
                    break;
                }
            };
            archives.push(job.destination.clone());

            if first_error.is_set() {
                break;
            }
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            // A worker may have failed while we waited for the permit.
            if first_error.is_set() {
                break;
            }

            let archiver = Arc::clone(&self.archiver);
            let first_error = Arc::clone(&first_error);
            let destination = self.output_dir.join(&job.destination);
            workers.spawn_blocking(move || {
                let _permit = permit;
                if let Err(e) = archiver.archive(&job.source, &destination) {
                    first_error.record(e);
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                first_error.record(ArchiveError::Worker(e.to_string()));
            }
        }

        if let Some(source) = first_error.take() {
            return Err(BatchError {
                reserved: archives,
                source,
            });
        }

        archives.sort();
        Ok(archives)
    }
}

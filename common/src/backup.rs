use crate::archive::BatchArchiver;
use crate::error::BackupError;
use crate::job::NamingTemplate;
use crate::listing::list_dirs;
use crate::storage::ObjectStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupReport {
    pub timestamp: i64,
    pub source_dir: PathBuf,
    /// Object keys, in upload order.
    pub uploaded: Vec<String>,
    pub kept_local: bool,
}

/// One backup run: archive every sub-directory of `source_dir`, upload each
/// archive under its file name, then delete the local copy.
#[derive(Clone)]
pub struct Backup {
    source_dir: PathBuf,
    template: NamingTemplate,
    archiver: BatchArchiver,
    store: Arc<dyn ObjectStore>,
    keep_local: bool,
    include_hidden: bool,
}

impl Backup {
    pub fn new(
        source_dir: impl Into<PathBuf>,
        archiver: BatchArchiver,
        store: impl ObjectStore + 'static,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            template: NamingTemplate::default(),
            archiver,
            store: Arc::new(store),
            keep_local: false,
            include_hidden: false,
        }
    }

    pub fn with_template(mut self, template: NamingTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn keep_local(mut self, keep: bool) -> Self {
        self.keep_local = keep;
        self
    }

    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    pub async fn run(&self) -> Result<BackupReport, BackupError> {
        self.run_at(Utc::now().timestamp()).await
    }

    pub async fn run_at(&self, timestamp: i64) -> Result<BackupReport, BackupError> {
        let dirs = list_dirs(&self.source_dir, self.include_hidden).map_err(|source| {
            BackupError::List {
                path: self.source_dir.clone(),
                source,
            }
        })?;

        let archives = self
            .archiver
            .archive_directories_at(&dirs, &self.template, timestamp)
            .await?;

        let mut uploaded = Vec::with_capacity(archives.len());
        for name in archives {
            let path = self.archiver.output_dir().join(&name);
            let store = Arc::clone(&self.store);
            let keep_local = self.keep_local;
            let key = name.clone();

            tokio::task::spawn_blocking(move || upload(store.as_ref(), &key, path, keep_local))
                .await
                .map_err(|_| BackupError::WorkerPanicked)??;
            uploaded.push(name);
        }

        Ok(BackupReport {
            timestamp,
            source_dir: self.source_dir.clone(),
            uploaded,
            kept_local: self.keep_local,
        })
    }
}

fn upload(
    store: &dyn ObjectStore,
    key: &str,
    path: PathBuf,
    keep_local: bool,
) -> Result<(), BackupError> {
    let mut file = File::open(&path).map_err(|source| BackupError::Open {
        path: path.clone(),
        source,
    })?;
    store.store(key, &mut file)?;
    drop(file);

    if !keep_local {
        fs::remove_file(&path).map_err(|source| BackupError::Cleanup { path, source })?;
    }
    Ok(())
}

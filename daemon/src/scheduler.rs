use crate::config::Config;
use anyhow::{Context, Result};
use chrono::Utc;
use common::{
    parse_schedule_in, parse_timezone, run_with_expression, upcoming, Backup, BackupError,
    BackupReport, BatchArchiver, DirectoryStore, ScheduleConfig, SystemClock,
};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct Scheduler {
    expression: String,
    schedule: ScheduleConfig,
    backup: Backup,
}

impl Scheduler {
    pub fn from_config(config: &Config) -> Result<Self> {
        let timezone = parse_timezone(&config.schedule.timezone)?;
        let schedule = parse_schedule_in(&config.schedule.expression, timezone)
            .context("Invalid schedule")?;

        let mut archiver = BatchArchiver::new(&config.backup.output_dir)
            .with_concurrency(config.backup.concurrency);
        if let Some(level) = config.backup.compression {
            archiver = archiver.with_compression(level);
        }
        let store = DirectoryStore::new(&config.storage.bucket_dir);
        let backup = Backup::new(&config.backup.source_dir, archiver, store)
            .with_template(config.backup.name_template.clone())
            .keep_local(config.backup.keep_local)
            .include_hidden(config.backup.include_hidden);

        Ok(Self {
            expression: config.schedule.expression.clone(),
            schedule,
            backup,
        })
    }

    pub async fn run_once(&self) -> Result<BackupReport, BackupError> {
        log::info!("Starting backup");
        let started = Instant::now();

        match self.backup.run().await {
            Ok(report) => {
                for key in &report.uploaded {
                    log::info!("Stored '{}'", key);
                }
                log::info!(
                    "Backup finished: {} archive(s) in {:.1}s",
                    report.uploaded.len(),
                    started.elapsed().as_secs_f64()
                );
                Ok(report)
            }
            Err(e) => {
                log::error!("Backup failed: {}", e);
                Err(e)
            }
        }
    }

    /// Runs backups on the schedule until `cancel` fires or a backup fails.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        match upcoming(&self.schedule, Utc::now(), 1).first() {
            Some(next) => log::info!("Schedule '{}', next backup at {}", self.expression, next),
            None => log::warn!("Schedule '{}' never fires", self.expression),
        }

        run_with_expression(&self.schedule, &SystemClock, cancel, || async {
            self.run_once().await.map(|_| ())
        })
            .await
            .context("Backup schedule stopped")?;

        log::info!("Schedule cancelled");
        Ok(())
    }
}

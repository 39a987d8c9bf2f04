use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use common::{
    parse_schedule_in, parse_timezone, upcoming, Backup, BatchArchiver, DirectoryStore,
    NamingTemplate,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive every sub-directory of DIRNAME and upload the archives
    Backup {
        /// The directory to archive folders from
        dirname: PathBuf,
        /// Archive name template with one %s (folder name) and one %d (timestamp)
        #[arg(short, long, default_value = common::DEFAULT_NAME_TEMPLATE)]
        template: NamingTemplate,
        /// Where archives are written before upload
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
        /// Bucket directory archives are uploaded to
        #[arg(short, long, default_value = common::USER_BUCKET_PATH)]
        bucket: PathBuf,
        /// Archives written at once (defaults to the CPU count)
        #[arg(short, long)]
        concurrency: Option<usize>,
        /// gzip level, 0 (store) to 9 (best)
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..=9))]
        compression: Option<u32>,
        /// Keep local archives after upload
        #[arg(long)]
        keep_local: bool,
        /// Include dot-directories
        #[arg(long)]
        include_hidden: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Archive the given directories without uploading
    Archive {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(short, long, default_value = common::DEFAULT_NAME_TEMPLATE)]
        template: NamingTemplate,
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
        #[arg(short, long)]
        concurrency: Option<usize>,
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..=9))]
        compression: Option<u32>,
    },
    /// Show when a schedule fires next
    Next {
        /// Cron expression or "every <n>s|m|h"
        expression: String,
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
        #[arg(long, default_value = "UTC")]
        timezone: String,
    },
}

fn archiver(
    output_dir: PathBuf,
    concurrency: Option<usize>,
    compression: Option<u32>,
) -> BatchArchiver {
    let mut archiver = BatchArchiver::new(output_dir);
    if let Some(n) = concurrency {
        archiver = archiver.with_concurrency(n);
    }
    if let Some(level) = compression {
        archiver = archiver.with_compression(level);
    }
    archiver
}

fn next_table(
    expression: &str,
    timezone: &str,
    from: DateTime<Utc>,
    count: usize,
) -> anyhow::Result<Table> {
    let tz = parse_timezone(timezone)?;
    let schedule = parse_schedule_in(expression, tz)?;

    let mut table = Table::new();
    table.set_header(vec!["#", "UTC", timezone]);
    for (i, at) in upcoming(&schedule, from, count).iter().enumerate() {
        table.add_row(vec![
            (i + 1).to_string(),
            at.format("%Y-%m-%d %H:%M:%S").to_string(),
            at.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z").to_string(),
        ]);
    }
    Ok(table)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Backup {
            dirname,
            template,
            output_dir,
            bucket,
            concurrency,
            compression,
            keep_local,
            include_hidden,
            json,
        } => {
            let backup = Backup::new(
                &dirname,
                archiver(output_dir, concurrency, compression),
                DirectoryStore::new(&bucket),
            )
            .with_template(template)
            .keep_local(keep_local)
            .include_hidden(include_hidden);

            log::info!("Backing up folders in {}", dirname.display());
            let report = backup
                .run()
                .await
                .with_context(|| format!("Backup of {} failed", dirname.display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for key in &report.uploaded {
                    println!("Stored '{}' in {}", key, bucket.display());
                }
            }
        },
        Commands::Archive { paths, template, output_dir, concurrency, compression } => {
            let result = archiver(output_dir, concurrency, compression)
                .archive_directories(&paths, &template)
                .await;

            match result {
                Ok(names) => {
                    for name in names {
                        println!("{}", name);
                    }
                },
                Err(e) => {
                    for name in &e.reserved {
                        eprintln!("reserved: {}", name);
                    }
                    return Err(e.into());
                },
            }
        },
        Commands::Next { expression, count, timezone } => {
            println!("{}", next_table(&expression, &timezone, Utc::now(), count)?);
        },
    }

    Ok(())
}

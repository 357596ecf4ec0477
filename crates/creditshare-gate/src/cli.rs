use crate::config::ShareConfig;
use crate::service::FileShare;
use crate::upload::UploadRequest;
use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use creditshare_meta::{FileFilter, FileId, SortBy, UserId};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Parser, Debug)]
#[command(name = "creditshare")]
#[command(about = "Credit-metered file sharing", long_about = None)]
pub struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(short, long, env = "CREDITSHARE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding metadata and blobs
    #[arg(short, long, env = "CREDITSHARE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, env = "CREDITSHARE_DOWNLOAD_COST")]
    pub download_cost: Option<u64>,

    #[arg(long, env = "CREDITSHARE_CREDIT_REWARD")]
    pub credit_reward: Option<u64>,

    #[arg(long, env = "CREDITSHARE_INITIAL_CREDITS")]
    pub initial_credits: Option<u64>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    User {
        #[command(subcommand)]
        cmd: UserCmd,
    },
    Upload {
        #[arg(short, long)]
        user: UserId,
        path: PathBuf,
        /// Display name; defaults to the file name
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
    },
    Download {
        #[arg(short, long)]
        user: UserId,
        file: FileId,
        /// Output path; stdout when omitted
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    List {
        #[arg(long = "type")]
        file_type: Option<String>,
        #[arg(long)]
        min_size: Option<u64>,
        #[arg(long)]
        max_size: Option<u64>,
        #[arg(long, default_value = "newest")]
        sort: SortBy,
    },
    Report {
        #[arg(short, long)]
        user: UserId,
        file: FileId,
        issue_type: String,
        #[arg(default_value = "")]
        description: String,
    },
    Like {
        #[arg(short, long)]
        user: UserId,
        file: FileId,
    },
    Balance {
        user: UserId,
    },
    History {
        user: UserId,
    },
    /// Checkpoint the metadata log
    Compact,
}

#[derive(Subcommand, Debug, Clone)]
pub enum UserCmd {
    Add {
        email: String,
        /// Use this identifier instead of a fresh one
        #[arg(long)]
        id: Option<UserId>,
    },
    Show {
        id: UserId,
    },
}

impl Cli {
    /// Resolves the configuration: file values, then flag and env overrides.
    pub fn load_config(&self) -> Result<ShareConfig> {
        let mut config = match &self.config {
            Some(path) => ShareConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ShareConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir = Some(dir.clone());
        }
        if let Some(cost) = self.download_cost {
            config.download_cost = cost;
        }
        if let Some(reward) = self.credit_reward {
            config.credit_reward = reward;
        }
        if let Some(credits) = self.initial_credits {
            config.initial_credits = credits;
        }
        config.validate()?;
        Ok(config)
    }

    pub async fn run(self) -> Result<()> {
        let config = self.load_config()?;
        if config.data_dir.is_none() {
            tracing::warn!("no data directory configured, state will not outlive this command");
        }
        let share = FileShare::open(config).await?;

        match self.command {
            Command::User { cmd } => user(&share, cmd).await,
            Command::Upload {
                user,
                path,
                name,
                content_type,
                description,
            } => {
                let data = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                let name = match name {
                    Some(name) => name,
                    None => display_name(&path),
                };
                let req = UploadRequest {
                    content_type: content_type.unwrap_or_else(|| guess_content_type(&path).to_string()),
                    name,
                    description,
                };
                let record = share.upload(user, req, Bytes::from(data)).await?;
                print_json(&record)
            }
            Command::Download { user, file, out } => download(&share, user, file, out).await,
            Command::List {
                file_type,
                min_size,
                max_size,
                sort,
            } => {
                let filter = FileFilter {
                    file_type,
                    min_size,
                    max_size,
                    sort_by: sort,
                };
                for listing in share.list_files(&filter)? {
                    println!(
                        "{}\t{}\t{}\t{}\t{} downloads\t{} likes\t{}",
                        listing.file.id,
                        listing.file.name,
                        listing.file.content_type,
                        listing.file.size,
                        listing.file.downloads,
                        listing.file.likes,
                        listing.owner_display,
                    );
                }
                Ok(())
            }
            Command::Report {
                user,
                file,
                issue_type,
                description,
            } => {
                let report = share
                    .report_issue(user, file, &issue_type, &description)
                    .await?;
                print_json(&report)
            }
            Command::Like { user, file } => {
                let likes = share.like_file(user, file).await?;
                println!("{} likes", likes);
                Ok(())
            }
            Command::Balance { user } => {
                println!("{}", share.balance(user)?);
                Ok(())
            }
            Command::History { user } => {
                for txn in share.history(user)? {
                    println!(
                        "{}\t{}\t{:+}\t{}",
                        txn.seq, txn.kind, txn.amount, txn.description
                    );
                }
                Ok(())
            }
            Command::Compact => {
                let pruned = share.compact()?;
                println!("compacted, {} idle locks pruned", pruned);
                Ok(())
            }
        }
    }
}

async fn user(share: &FileShare, cmd: UserCmd) -> Result<()> {
    match cmd {
        UserCmd::Add { email, id } => {
            let user = share
                .ensure_user(id.unwrap_or_else(UserId::new), &email)
                .await?;
            print_json(&user)
        }
        UserCmd::Show { id } => print_json(&share.get_user(id)?),
    }
}

async fn download(share: &FileShare, user: UserId, file: FileId, out: Option<PathBuf>) -> Result<()> {
    let mut dl = share.request_download(user, file).await?;
    if dl.charged() {
        tracing::info!(file = %file, cost = share.config().download_cost, "charged for download");
    }

    let mut sink: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match &out {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };
    let mut total = 0u64;
    while let Some(chunk) = dl.body.next().await {
        let chunk = chunk.context("download interrupted; retrying is free")?;
        sink.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }
    sink.flush().await?;
    tracing::debug!(file = %file, bytes = total, "download written");
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Content type from the file extension.
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    match ext.as_str() {
        "txt" | "md" => "text/plain",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => crate::upload::DEFAULT_CONTENT_TYPE,
    }
}

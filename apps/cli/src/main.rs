mod config;
mod session;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use fileshare_transfer::{
    Credentials, DownloadItem, FileSource, RunOutcome, TransferItem, TransferKey, TransferKind,
    UploadItem,
};
use tracing_subscriber::EnvFilter;

use crate::config::{ClientConfig, config_path};
use crate::session::{Session, describe, render_tree};

#[derive(Debug, Parser)]
#[command(name = "fileshare", version, about = "Resumable downloads and uploads for fileshare servers")]
struct Cli {
    /// Configuration file (defaults to the platform config directory).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Overrides `server_url` from the configuration.
    #[arg(long, global = true, value_name = "URL")]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the files behind a share.
    Browse(BrowseArgs),
    /// Download a shared file.
    Download(DownloadArgs),
    /// Upload a local file into a share.
    Upload(UploadArgs),
    /// Continue a paused or failed transfer.
    Resume(ResumeArgs),
    /// Show the transfer history.
    List,
    /// Remove one transfer from the history.
    Remove(KeyArgs),
    /// Remove a whole history.
    Clear(ClearArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Download,
    Upload,
}

impl From<Kind> for TransferKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Download => TransferKind::Download,
            Kind::Upload => TransferKind::Upload,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct CredentialArgs {
    #[arg(long)]
    secret_key: String,
    /// Password-derived ciphertext for the share.
    #[arg(long)]
    ciphertext: String,
}

impl From<CredentialArgs> for Credentials {
    fn from(args: CredentialArgs) -> Self {
        Credentials {
            secret_key: args.secret_key,
            ciphertext: args.ciphertext,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct BrowseArgs {
    /// Share UUID.
    uuid: String,
    /// Needed for password-protected shares.
    #[arg(long, requires = "ciphertext")]
    secret_key: Option<String>,
    #[arg(long, requires = "secret_key")]
    ciphertext: Option<String>,
}

impl BrowseArgs {
    fn credentials(&self) -> Option<Credentials> {
        Some(Credentials {
            secret_key: self.secret_key.clone()?,
            ciphertext: self.ciphertext.clone()?,
        })
    }
}

#[derive(Debug, Clone, Args)]
struct DownloadArgs {
    /// Share UUID.
    uuid: String,
    /// File size in bytes (asked from the server when omitted).
    #[arg(long)]
    size: Option<u64>,
    /// Name of the saved file (taken from the share listing when omitted).
    #[arg(long)]
    name: Option<String>,
    #[command(flatten)]
    credentials: CredentialArgs,
}

#[derive(Debug, Clone, Args)]
struct UploadArgs {
    file: PathBuf,
    /// Share UUID to upload into.
    #[arg(long)]
    share: String,
    /// Directory on the share.
    #[arg(long, default_value = "/")]
    target: String,
    /// Remote file name (defaults to the local one).
    #[arg(long)]
    name: Option<String>,
    #[command(flatten)]
    credentials: CredentialArgs,
}

#[derive(Debug, Clone, Args)]
struct KeyArgs {
    kind: Kind,
    /// Share UUID for downloads, file id for uploads.
    id: String,
}

impl KeyArgs {
    fn key(&self) -> TransferKey {
        match self.kind {
            Kind::Download => TransferKey::Download(self.id.clone()),
            Kind::Upload => TransferKey::Upload(self.id.clone()),
        }
    }
}

#[derive(Debug, Clone, Args)]
struct ResumeArgs {
    #[command(flatten)]
    key: KeyArgs,
    /// Local file to re-attach to an upload.
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ClearArgs {
    kind: Kind,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let path = match cli.config {
        Some(path) => path,
        None => config_path()?,
    };
    let mut config = ClientConfig::load_from(&path)?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    let config_dir = path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut session = Session::open(config, &config_dir)?;

    match cli.command {
        Command::Browse(args) => {
            let entry = session
                .client
                .list_share(&args.uuid, args.credentials().as_ref())
                .await
                .with_context(|| format!("failed to list share {}", args.uuid))?;
            for line in render_tree(&entry) {
                println!("{line}");
            }
            Ok(())
        }
        Command::Download(args) => download(&mut session, args).await,
        Command::Upload(args) => upload(&mut session, args).await,
        Command::Resume(args) => resume(&mut session, args).await,
        Command::List => {
            for item in session.driver.store().list() {
                println!("{}", describe(&item));
            }
            Ok(())
        }
        Command::Remove(args) => {
            let key = args.key();
            session
                .driver
                .remove(&key)
                .await
                .with_context(|| format!("failed to remove {key}"))?;
            println!("{key}: removed");
            Ok(())
        }
        Command::Clear(args) => {
            let cleared = session.driver.clear(args.kind.into());
            println!("{cleared} {} transfers cleared", TransferKind::from(args.kind));
            Ok(())
        }
    }
}

async fn download(session: &mut Session, args: DownloadArgs) -> anyhow::Result<()> {
    let credentials: Credentials = args.credentials.into();
    let size = match args.size {
        Some(size) => size,
        None => session
            .client
            .file_size(&args.uuid)
            .await
            .with_context(|| format!("failed to get the size of {}", args.uuid))?,
    };
    let name = match args.name {
        Some(name) => name,
        None => {
            let entry = session
                .client
                .list_share(&args.uuid, Some(&credentials))
                .await
                .with_context(|| format!("failed to look up the name of {}", args.uuid))?;
            if entry.is_dir {
                bail!("{} is a directory, browse it and download its files", args.uuid);
            }
            entry.file_name
        }
    };

    let item = DownloadItem::new(
        args.uuid,
        name,
        size,
        session.config.chunk_size,
        credentials,
    )?;
    let key = TransferItem::Download(item.clone()).key();
    let run = session.driver.spawn_start(TransferItem::Download(item));
    report(&key, session.drive(run).await?)
}

async fn upload(session: &mut Session, args: UploadArgs) -> anyhow::Result<()> {
    let source = FileSource::open(&args.file)
        .with_context(|| format!("failed to open {}", args.file.display()))?;
    let file_name = match args.name {
        Some(name) => name,
        None => args
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("upload path has no file name")?,
    };

    let file_id = uuid::Uuid::new_v4().to_string();
    let item = UploadItem::new(
        file_id.clone(),
        args.share,
        file_name,
        args.target,
        session.config.chunk_size,
        args.credentials.into(),
        Arc::new(source),
    )?;
    println!("upload id: {file_id}");

    let key = TransferKey::Upload(file_id);
    let run = session.driver.spawn_start(TransferItem::Upload(item));
    report(&key, session.drive(run).await?)
}

async fn resume(session: &mut Session, args: ResumeArgs) -> anyhow::Result<()> {
    let key = args.key.key();
    if let Some(path) = &args.file {
        if key.kind() != TransferKind::Upload {
            bail!("--file only applies to uploads");
        }
        let source = FileSource::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        session.driver.attach_source(&key, Arc::new(source))?;
    }

    let run = session.driver.spawn_resume(key.clone());
    report(&key, session.drive(run).await?)
}

fn report(key: &TransferKey, outcome: RunOutcome) -> anyhow::Result<()> {
    match outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Paused | RunOutcome::ShuttingDown => {
            println!(
                "{key}: paused, continue with `fileshare resume {} {}`",
                key.kind(),
                key.id()
            );
            Ok(())
        }
        RunOutcome::AlreadyMerged => {
            println!("{key}: already completed");
            Ok(())
        }
        RunOutcome::AlreadyRunning => bail!("{key} is already running"),
        RunOutcome::Missing => bail!("{key} not found"),
        RunOutcome::Failed(error) => bail!("{key} failed: {error}"),
    }
}

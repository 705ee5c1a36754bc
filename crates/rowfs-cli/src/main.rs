//! rowfs: browse and edit SQL rows as files.
//!
//! Usage:
//!   rowfs mounts
//!   rowfs ls /feedback/byname
//!   rowfs cat /feedback/byname/Doe_Jane
//!   echo bye | rowfs put /feedback/byname/Doe_Jane
//!   rowfs --config ./shop.toml tree /feedback
//!
//! Set `RUST_LOG=debug` to see every statement the filesystem runs.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use rowfs_kernel::{Config, MountTable, VfsOps};

/// SQL rows exposed as files.
#[derive(Parser, Debug)]
#[command(name = "rowfs")]
#[command(about = "Browse and edit SQL table rows as files")]
struct Args {
    /// Config file (defaults to ~/.config/rowfs/rowfs.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: PathBuf,
    },
    /// Show file attributes
    Stat {
        path: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a file's content
    Cat { path: PathBuf },
    /// Replace a file's content with stdin
    Put { path: PathBuf },
    /// Print a directory tree
    Tree {
        #[arg(default_value = "/")]
        path: PathBuf,
    },
    /// List mount points
    Mounts,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `cat` output stays clean
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => Config::default_path().context("no config directory on this platform")?,
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let table = config.build().await.context("building mounts")?;

    match args.command {
        Command::Ls { path } => ls(&table, &path).await,
        Command::Stat { path, json } => stat(&table, &path, json).await,
        Command::Cat { path } => cat(&table, &path).await,
        Command::Put { path } => put(&table, &path).await,
        Command::Tree { path } => tree(&table, &path).await,
        Command::Mounts => mounts(&table).await,
    }
}

async fn ls(table: &MountTable, path: &Path) -> Result<()> {
    let entries = table
        .readdir(path)
        .await
        .with_context(|| format!("ls {}", path.display()))?;
    for entry in entries {
        let suffix = if entry.kind.is_dir() { "/" } else { "" };
        println!("{}{}", entry.name, suffix);
    }
    Ok(())
}

async fn stat(table: &MountTable, path: &Path, json: bool) -> Result<()> {
    let attr = table
        .getattr(path)
        .await
        .with_context(|| format!("stat {}", path.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&attr)?);
    } else {
        let kind = if attr.is_dir() { "directory" } else { "file" };
        println!("  Path: {}", path.display());
        println!("  Type: {kind}");
        println!("  Size: {}", attr.size);
        println!("  Mode: {:o}", attr.perm);
        println!(" Links: {}", attr.nlink);
    }
    Ok(())
}

async fn cat(table: &MountTable, path: &Path) -> Result<()> {
    let data = table
        .read_all(path)
        .await
        .with_context(|| format!("cat {}", path.display()))?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&data)?;
    stdout.flush()?;
    Ok(())
}

async fn put(table: &MountTable, path: &Path) -> Result<()> {
    let mut data = Vec::new();
    std::io::stdin()
        .read_to_end(&mut data)
        .context("reading stdin")?;
    table
        .write_all(path, &data)
        .await
        .with_context(|| format!("put {}", path.display()))?;
    tracing::info!(path = %path.display(), bytes = data.len(), "row updated");
    Ok(())
}

async fn tree(table: &MountTable, root: &Path) -> Result<()> {
    println!("{}", root.display());
    // Explicit stack of (path, name, depth); children are pushed in reverse
    // so they pop in name order.
    let mut stack = Vec::new();
    push_children(table, root, 0, &mut stack).await?;
    while let Some((path, name, depth)) = stack.pop() {
        let indent = "    ".repeat(depth);
        let attr = table.getattr(&path).await?;
        if attr.is_dir() {
            println!("{indent}{name}/");
            push_children(table, &path, depth + 1, &mut stack).await?;
        } else {
            println!("{indent}{name} ({} bytes)", attr.size);
        }
    }
    Ok(())
}

async fn push_children(
    table: &MountTable,
    dir: &Path,
    depth: usize,
    stack: &mut Vec<(PathBuf, String, usize)>,
) -> Result<()> {
    let entries = table
        .readdir(dir)
        .await
        .with_context(|| format!("tree {}", dir.display()))?;
    stack.extend(
        entries
            .into_iter()
            .rev()
            .map(|e| (dir.join(&e.name), e.name, depth)),
    );
    Ok(())
}

async fn mounts(table: &MountTable) -> Result<()> {
    for mount in table.list_mounts().await {
        let mode = if mount.read_only { "ro" } else { "rw" };
        println!("{} ({mode})", mount.path);
    }
    Ok(())
}

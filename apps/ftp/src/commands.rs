//! Subcommand execution.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use skyftp_link::{Connector, TcpConnector};
use skyftp_protocol::EntryKind;
use skyftp_protocol::constants::PATH_LENGTH;
use skyftp_sim::{RemoteNode, serve_tcp};
use skyftp_transfer::{
    Direction, FtpClient, ProgressCallback, ProgressReport, TransferError, TransferRequest,
    TransferSummary, remove_map,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::Command;
use crate::config::Config;

/// Shortest path the node accepts for a transfer or a rename.
const MIN_PATH_LENGTH: usize = 3;

/// How results are presented.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    /// Print transfer summaries as JSON.
    pub json: bool,
    /// Draw a progress bar on stderr.
    pub progress: bool,
}

/// Runs one subcommand against the configured node.
pub async fn run(command: Command, config: Config, json: bool) -> anyhow::Result<()> {
    if let Command::Serve { root, listen } = command {
        let addr = listen.unwrap_or_else(|| config.host.clone());
        return serve(root, &addr, config.mtu).await;
    }

    let connector = TcpConnector::new(config.host.clone()).with_mtu(config.mtu);
    let client = FtpClient::new(connector, config.client_config());
    let output = Output {
        json,
        progress: !json,
    };
    execute(&client, command, &config, output, &mut std::io::stdout()).await
}

/// Executes a client subcommand, writing results to `out`.
pub async fn execute<C: Connector, W: Write>(
    client: &FtpClient<C>,
    command: Command,
    config: &Config,
    output: Output,
    out: &mut W,
) -> anyhow::Result<()> {
    match command {
        Command::Upload { local, remote } => {
            check_local(&local, None)?;
            check_path("remote path", &remote, MIN_PATH_LENGTH)?;
            let req = TransferRequest::file(local, remote, config.backend, config.chunk_size);
            let req = &req;
            let summary = with_retries(config.retries, move || {
                client.upload(req, progress_bar(output))
            })
            .await?;
            print_summary(out, &summary, output)?;
        }
        Command::Download {
            remote,
            local,
            restart,
        } => {
            check_path("remote path", &remote, 1)?;
            let local = match local {
                Some(local) => local,
                None => default_local_path(&remote)?,
            };
            if restart {
                discard_partial(&local)?;
            }
            let req = TransferRequest::file(local, remote, config.backend, config.chunk_size);
            let req = &req;
            let summary = with_retries(config.retries, move || {
                client.download(req, progress_bar(output))
            })
            .await?;
            print_summary(out, &summary, output)?;
        }
        Command::UploadMem { local, addr } => {
            check_local(&local, Some(PATH_LENGTH))?;
            let req = TransferRequest::memory(local, addr, 0, config.chunk_size);
            let req = &req;
            let summary = with_retries(config.retries, move || {
                client.upload(req, progress_bar(output))
            })
            .await?;
            print_summary(out, &summary, output)?;
        }
        Command::DownloadMem {
            addr,
            size,
            local,
            restart,
        } => {
            check_local(&local, Some(PATH_LENGTH))?;
            if restart {
                discard_partial(&local)?;
            }
            let req = TransferRequest::memory(local, addr, size, config.chunk_size);
            let req = &req;
            let summary = with_retries(config.retries, move || {
                client.download(req, progress_bar(output))
            })
            .await?;
            print_summary(out, &summary, output)?;
        }
        Command::Ls { path } => {
            check_path("path", &path, 1)?;
            let entries = client.list(&path, config.backend).await?;
            for entry in &entries {
                let suffix = if entry.kind == EntryKind::Directory {
                    "/"
                } else {
                    ""
                };
                writeln!(out, "{:>6} {}{}", format_size(entry.size), entry.path, suffix)?;
            }
        }
        Command::Rm { path } => {
            check_path("path", &path, 1)?;
            client.remove(&path, config.backend).await?;
        }
        Command::Mv { from, to } => {
            check_path("source path", &from, MIN_PATH_LENGTH)?;
            check_path("destination path", &to, MIN_PATH_LENGTH)?;
            client.move_file(&from, &to, config.backend).await?;
        }
        Command::Cp { from, to } => {
            check_path("source path", &from, MIN_PATH_LENGTH)?;
            check_path("destination path", &to, MIN_PATH_LENGTH)?;
            client.copy_file(&from, &to, config.backend).await?;
        }
        Command::Mkfs { path, force } => {
            check_path("path", &path, 1)?;
            client.mkfs(&path, config.backend, force).await?;
            writeln!(out, "formatted {path}")?;
        }
        Command::Zip { src, dest } => {
            check_path("source path", &src, MIN_PATH_LENGTH)?;
            check_path("destination path", &dest, MIN_PATH_LENGTH)?;
            let reply = client.zip(&src, &dest, config.backend).await?;
            writeln!(
                out,
                "{src} -> {dest}: {} bytes compressed, {} bytes decompressed",
                reply.compressed, reply.decompressed
            )?;
        }
        Command::Unzip { src, dest } => {
            check_path("source path", &src, MIN_PATH_LENGTH)?;
            check_path("destination path", &dest, MIN_PATH_LENGTH)?;
            let reply = client.unzip(&src, &dest, config.backend).await?;
            writeln!(
                out,
                "{src} -> {dest}: {} bytes compressed, {} bytes decompressed",
                reply.compressed, reply.decompressed
            )?;
        }
        Command::Serve { .. } => bail!("serve runs a node and does not connect to one"),
    }
    Ok(())
}

/// Runs `attempt` until it succeeds, fails for good, or `retries` resumes
/// have been spent.
///
/// Every attempt reopens the session; the chunk maps on either side make
/// it pick up where the previous one stopped.
async fn with_retries<F, Fut>(
    retries: u32,
    mut attempt: F,
) -> Result<TransferSummary, TransferError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<TransferSummary, TransferError>>,
{
    let mut resumed = 0;
    loop {
        match attempt().await {
            Ok(summary) => return Ok(summary),
            Err(e) if e.is_resumable() && resumed < retries => {
                resumed += 1;
                warn!(attempt = resumed, retries, error = %e, "transfer interrupted, resuming");
            }
            Err(e) => return Err(e),
        }
    }
}

fn progress_bar(output: Output) -> Option<ProgressCallback> {
    if !output.progress {
        return None;
    }
    Some(Box::new(|report: &ProgressReport| {
        eprint!("\r{}", report.render());
        if report.final_chunk {
            eprintln!();
        }
    }))
}

fn print_summary<W: Write>(
    out: &mut W,
    summary: &TransferSummary,
    output: Output,
) -> anyhow::Result<()> {
    if output.json {
        writeln!(out, "{}", serde_json::to_string(summary)?)?;
        return Ok(());
    }

    let (verb, arrow) = match summary.direction {
        Direction::Upload => ("uploaded", "->"),
        Direction::Download => ("downloaded", "<-"),
    };
    writeln!(
        out,
        "{verb} {} {arrow} {}: {} bytes in {} chunks, crc32 {:#010x}",
        summary.local_path.display(),
        summary.remote,
        summary.file_size,
        summary.chunk_count,
        summary.crc32
    )?;
    if summary.resumed_chunks > 0 || summary.rounds > 1 {
        writeln!(
            out,
            "resumed with {} chunks already present, {} rounds",
            summary.resumed_chunks, summary.rounds
        )?;
    }
    Ok(())
}

/// Serves a simulated node until interrupted.
async fn serve(root: PathBuf, addr: &str, mtu: usize) -> anyhow::Result<()> {
    std::fs::create_dir_all(&root)
        .with_context(|| format!("creating node root {}", root.display()))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    serve_tcp(RemoteNode::new(root), listener, mtu, cancel).await?;
    Ok(())
}

fn check_path(what: &str, path: &str, min: usize) -> anyhow::Result<()> {
    if path.len() < min {
        bail!("{what} {path:?} is too short (at least {min} bytes)");
    }
    if path.len() >= PATH_LENGTH {
        bail!(
            "{what} {path:?} is too long (at most {} bytes)",
            PATH_LENGTH - 1
        );
    }
    Ok(())
}

fn check_local(path: &Path, max: Option<usize>) -> anyhow::Result<()> {
    let len = path.as_os_str().len();
    if len < MIN_PATH_LENGTH {
        bail!("local path {} is too short", path.display());
    }
    if max.is_some_and(|max| len >= max) {
        bail!("local path {} is too long", path.display());
    }
    Ok(())
}

/// Local file name for a download when none is given: the remote base name.
fn default_local_path(remote: &str) -> anyhow::Result<PathBuf> {
    Path::new(remote)
        .file_name()
        .map(PathBuf::from)
        .with_context(|| format!("cannot derive a local file name from {remote:?}"))
}

/// Removes a partial download and its chunk map.
fn discard_partial(local: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(local) {
        Ok(()) => info!(path = %local.display(), "partial download removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("removing {}", local.display())),
    }
    remove_map(local)?;
    Ok(())
}

/// Human readable size: `512`, `1.5K`, `3.0M`, `1.0G`.
pub fn format_size(bytes: u32) -> String {
    const UNITS: [&str; 3] = ["K", "M", "G"];
    if bytes < 1024 {
        return bytes.to_string();
    }
    let mut value = f64::from(bytes);
    let mut unit = "";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.1}{unit}")
}

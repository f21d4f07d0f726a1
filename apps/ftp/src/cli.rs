//! Command line definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use skyftp_protocol::Backend;

#[derive(Debug, Parser)]
#[command(name = "skyftp")]
#[command(version, long_about = None)]
#[command(about = "Resumable file transfer to a remote node over a narrow link")]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand. Unset values come from the
/// configuration file.
#[derive(Debug, Default, Args)]
pub struct GlobalArgs {
    /// Remote node address (host:port)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Chunk size in bytes
    #[arg(short, long, global = true, value_name = "BYTES")]
    pub chunk_size: Option<u16>,

    /// Storage backend (mem, fat, vfs, file or a number)
    #[arg(short, long, global = true)]
    pub backend: Option<Backend>,

    /// Timeout for each request in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    pub timeout: Option<u64>,

    /// How many times an interrupted transfer is resumed
    #[arg(long, global = true)]
    pub retries: Option<u32>,

    /// Largest frame the link carries, in bytes
    #[arg(long, global = true, value_name = "BYTES")]
    pub mtu: Option<usize>,

    /// Configuration file to use instead of the default one
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print transfer summaries as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload a local file
    Upload {
        /// File to send
        local: PathBuf,
        /// Destination path on the node
        remote: String,
    },
    /// Download a remote file, resuming a previous attempt if one exists
    Download {
        /// File on the node
        remote: String,
        /// Destination file (defaults to the remote file name)
        local: Option<PathBuf>,
        /// Discard any partial download and start over
        #[arg(long)]
        restart: bool,
    },
    /// Upload a local file into remote memory
    UploadMem {
        /// File to send
        local: PathBuf,
        /// Start address (hex)
        #[arg(value_parser = parse_hex)]
        addr: u32,
    },
    /// Download a range of remote memory
    DownloadMem {
        /// Start address (hex)
        #[arg(value_parser = parse_hex)]
        addr: u32,
        /// Number of bytes
        size: u32,
        /// Destination file
        local: PathBuf,
        /// Discard any partial download and start over
        #[arg(long)]
        restart: bool,
    },
    /// List a remote directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Remove a remote file
    Rm { path: String },
    /// Move a remote file
    Mv { from: String, to: String },
    /// Copy a remote file
    Cp { from: String, to: String },
    /// Format a remote filesystem
    Mkfs {
        path: String,
        /// Format even if the volume is mounted (1/yes/true or 0/no/false)
        #[arg(value_parser = parse_force, default_value = "0", action = clap::ArgAction::Set)]
        force: bool,
    },
    /// Compress a remote file
    Zip { src: String, dest: String },
    /// Decompress a remote file
    Unzip { src: String, dest: String },
    /// Run a simulated node over TCP
    Serve {
        /// Directory holding the node's files
        root: PathBuf,
        /// Address to listen on (defaults to the configured host)
        #[arg(short, long)]
        listen: Option<String>,
    },
}

/// Parses an address written in hex, with or without a `0x` prefix.
pub fn parse_hex(s: &str) -> Result<u32, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex address {s:?}: {e}"))
}

pub fn parse_force(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" => Ok(true),
        "0" | "no" | "false" => Ok(false),
        _ => Err(format!("invalid force flag {s:?}: use 1/yes/true or 0/no/false")),
    }
}

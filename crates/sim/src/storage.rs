//! Storage behind the simulated node: a directory standing in for the
//! remote filesystems, and a flat byte array standing in for raw memory.

use std::io;
use std::path::{Component, Path, PathBuf};

use skyftp_protocol::Status;
use skyftp_transfer::TransferError;

use crate::SimError;

/// Maps remote paths into a local directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a remote path below the root.
    ///
    /// Remote paths are absolute on the node (`/flash/a.bin`); the leading
    /// separators are dropped. `..` and platform prefixes are rejected so a
    /// request can never reach outside the root. An empty path or `/` is the
    /// root itself.
    pub fn resolve(&self, remote: &str) -> Result<PathBuf, SimError> {
        let relative = remote.trim_start_matches('/');
        let mut resolved = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(SimError::InvalidPath(format!(
                        "parent directory traversal not allowed: {remote}"
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(SimError::InvalidPath(format!(
                        "path prefix not allowed: {remote}"
                    )));
                }
            }
        }
        Ok(resolved)
    }

    /// Resolves a path that must name something below the root.
    pub fn resolve_entry(&self, remote: &str) -> Result<PathBuf, SimError> {
        let resolved = self.resolve(remote)?;
        if resolved == self.root {
            return Err(SimError::InvalidPath(format!("no file name in {remote:?}")));
        }
        Ok(resolved)
    }

    /// Removes everything below `dir`, keeping `dir` itself.
    pub fn clear(&self, dir: &Path) -> io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

/// A window of simulated memory starting at `base`.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    base: u32,
    bytes: Vec<u8>,
}

impl MemoryRegion {
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            bytes: vec![0; size],
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn offset(&self, addr: u32, len: usize) -> Result<usize, SimError> {
        let range = addr
            .checked_sub(self.base)
            .and_then(|start| Some((start as usize, (start as usize).checked_add(len)?)));
        match range {
            Some((start, end)) if end <= self.bytes.len() => Ok(start),
            _ => Err(SimError::OutOfRange { addr, len }),
        }
    }

    pub fn read(&self, addr: u32, len: usize) -> Result<&[u8], SimError> {
        let start = self.offset(addr, len)?;
        Ok(&self.bytes[start..start + len])
    }

    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), SimError> {
        let start = self.offset(addr, data.len())?;
        self.bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// Reply status for a failed storage operation.
pub fn status_for(err: &SimError) -> Status {
    match err {
        SimError::Io(e) => io_status(e),
        SimError::InvalidPath(_) | SimError::OutOfRange { .. } => Status::InvalidArgument,
        SimError::UnsupportedBackend(_) => Status::NotSupported,
        SimError::Protocol(_) => Status::Protocol,
        SimError::Transfer(TransferError::Io(e)) => io_status(e),
        SimError::Transfer(TransferError::InvalidArgument(_)) => Status::InvalidArgument,
        SimError::Transfer(TransferError::FileTooLarge(_)) => Status::FileTooLarge,
        SimError::Transfer(_) | SimError::Link(_) => Status::Io,
    }
}

fn io_status(err: &io::Error) -> Status {
    match err.kind() {
        io::ErrorKind::NotFound => Status::NotFound,
        io::ErrorKind::AlreadyExists => Status::AlreadyExists,
        io::ErrorKind::InvalidInput => Status::InvalidArgument,
        io::ErrorKind::StorageFull => Status::NoSpace,
        io::ErrorKind::FileTooLarge => Status::FileTooLarge,
        io::ErrorKind::ResourceBusy => Status::Busy,
        _ => Status::Io,
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Reply status reported by the remote node (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    Protocol = 1,
    NotFound = 2,
    InvalidArgument = 3,
    NoSpace = 4,
    Io = 5,
    FileTooLarge = 6,
    AlreadyExists = 7,
    NotSupported = 8,
    Busy = 9,
}

impl Status {
    /// Parses a wire status byte. Returns `None` for codes outside the set.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Status::Ok,
            1 => Status::Protocol,
            2 => Status::NotFound,
            3 => Status::InvalidArgument,
            4 => Status::NoSpace,
            5 => Status::Io,
            6 => Status::FileTooLarge,
            7 => Status::AlreadyExists,
            8 => Status::NotSupported,
            9 => Status::Busy,
            _ => return None,
        })
    }

    /// Wire status byte.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// Human-readable description, as printed to operators.
    pub fn description(self) -> &'static str {
        match self {
            Status::Ok => "no error",
            Status::Protocol => "protocol error",
            Status::NotFound => "no such file or directory",
            Status::InvalidArgument => "invalid argument",
            Status::NoSpace => "no space left on device",
            Status::Io => "I/O error",
            Status::FileTooLarge => "file too large",
            Status::AlreadyExists => "file exists",
            Status::NotSupported => "operation not supported",
            Status::Busy => "device or resource busy",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Opaque selector of the remote storage implementation.
///
/// The remote node decides what each value means; the well-known values are
/// provided as associated constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Backend(pub u8);

impl Backend {
    /// Raw memory address range.
    pub const MEMORY: Backend = Backend(0);
    /// Flash filesystem.
    pub const FAT: Backend = Backend(1);
    /// Virtual filesystem.
    pub const VFS: Backend = Backend(2);
    /// Plain file backend (default for path based transfers).
    pub const FILE: Backend = Backend(3);

    /// Well-known name, if any.
    pub fn name(self) -> Option<&'static str> {
        match self.0 {
            0 => Some("mem"),
            1 => Some("fat"),
            2 => Some("vfs"),
            3 => Some("file"),
            _ => None,
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Backend::FILE
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    /// Accepts a well-known name (`mem`, `fat`, `vfs`, `file`) or a number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mem" | "memory" => Ok(Backend::MEMORY),
            "fat" => Ok(Backend::FAT),
            "vfs" => Ok(Backend::VFS),
            "file" => Ok(Backend::FILE),
            other => other
                .parse::<u8>()
                .map(Backend)
                .map_err(|_| format!("unknown backend: {s}")),
        }
    }
}

/// A contiguous range of missing chunks: `count` chunks starting at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRun {
    pub start: u32,
    pub count: u32,
}

impl StatusRun {
    pub fn new(start: u32, count: u32) -> Self {
        Self { start, count }
    }

    /// One past the last chunk index of the run.
    pub fn end(&self) -> u64 {
        self.start as u64 + self.count as u64
    }

    /// Chunk indices covered by the run, in order.
    pub fn indices(&self) -> std::ops::Range<u32> {
        self.start..self.start.saturating_add(self.count)
    }
}

/// Type of a directory listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EntryKind {
    File = 0,
    Directory = 1,
}

impl EntryKind {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(EntryKind::File),
            1 => Some(EntryKind::Directory),
            _ => None,
        }
    }
}

/// Compression direction of a zip request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ZipAction {
    Zip = 0,
    Unzip = 1,
}

impl ZipAction {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ZipAction::Zip),
            1 => Some(ZipAction::Unzip),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_roundtrip() {
        for code in 0..=9u8 {
            let status = Status::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert_eq!(Status::from_code(10), None);
    }

    #[test]
    fn status_descriptions() {
        assert!(Status::Ok.is_ok());
        assert!(!Status::Busy.is_ok());
        assert_eq!(Status::NotFound.to_string(), "no such file or directory");
        assert_eq!(Status::NoSpace.to_string(), "no space left on device");
    }

    #[test]
    fn backend_parse_names_and_numbers() {
        assert_eq!("file".parse::<Backend>().unwrap(), Backend::FILE);
        assert_eq!("MEM".parse::<Backend>().unwrap(), Backend::MEMORY);
        assert_eq!("7".parse::<Backend>().unwrap(), Backend(7));
        assert!("floppy".parse::<Backend>().is_err());
    }

    #[test]
    fn backend_display() {
        assert_eq!(Backend::VFS.to_string(), "vfs");
        assert_eq!(Backend(42).to_string(), "42");
        assert_eq!(Backend::default(), Backend::FILE);
    }

    #[test]
    fn status_run_indices() {
        let run = StatusRun::new(15, 4);
        assert_eq!(run.end(), 19);
        assert_eq!(run.indices().collect::<Vec<_>>(), vec![15, 16, 17, 18]);
    }
}

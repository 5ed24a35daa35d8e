use std::path::PathBuf;

use thiserror::Error;

/// Failure of one import unit. Any variant means nothing from the capture was
/// written.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{source_file}: cannot decode capture: {reason}")]
    Encoding { source_file: String, reason: String },
    #[error("{source_file}: no device name in options, prompt or file name")]
    UnresolvedDevice { source_file: String },
    #[error("{source_file}: store rejected {record}: {source}")]
    Integrity {
        source_file: String,
        record: String,
        source: rusqlite::Error,
    },
    #[error(transparent)]
    Store(#[from] rusqlite::Error),
}

impl ImportError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "read_error",
            Self::Encoding { .. } => "encoding_error",
            Self::UnresolvedDevice { .. } => "device_unresolved",
            Self::Integrity { .. } => "integrity_violation",
            Self::Store(_) => "sqlite_error",
        }
    }
}

#[derive(Debug, Error)]
pub enum TopoError {
    #[error("unknown device `{0}`")]
    UnknownDevice(String),
    #[error("no link {src_device}:{src_interface} -> {dst_device}:{dst_interface}")]
    UnknownLink {
        src_device: String,
        src_interface: String,
        dst_device: String,
        dst_interface: String,
    },
    #[error("unknown interface `{interface}` on `{device}`")]
    UnknownInterface { device: String, interface: String },
    #[error(transparent)]
    Store(#[from] rusqlite::Error),
}

impl TopoError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownDevice(_) => "device_not_found",
            Self::UnknownLink { .. } => "link_not_found",
            Self::UnknownInterface { .. } => "interface_not_found",
            Self::Store(_) => "sqlite_error",
        }
    }
}

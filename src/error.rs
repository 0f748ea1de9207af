use std::path::PathBuf;
use std::time::Duration;

/// Structural problems with the scan input; fatal before any dial starts.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("invalid CIDR {item:?}: {source}")]
    InvalidCidr {
        item: String,
        #[source]
        source: ipnet::AddrParseError,
    },
    #[error("failed to read input file {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid port list: {0}")]
    Ports(String),
    #[error("no input targets given")]
    Empty,
}

/// Failure to obtain a leaf certificate from one target. Never leaves the worker.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("tls handshake failed: {0}")]
    Handshake(#[source] native_tls::Error),
    #[error("no certificate presented")]
    NoCertificate,
    #[error("unparseable certificate: {0}")]
    Certificate(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create database file {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store writer stopped unexpectedly: {0}")]
    Writer(String),
}

/// A result could not be handed to its sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to write result: {0}")]
    Output(#[from] std::io::Error),
    #[error("result consumer has stopped")]
    Closed,
}

/// Errors that stop a whole scan.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to build TLS connector: {0}")]
    Tls(#[from] native_tls::Error),
}

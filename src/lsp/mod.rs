// src/lsp/mod.rs - Language Server Protocol connection management

pub mod connection;
pub mod pool;
pub mod transport;

pub use connection::{Connection, ConnectionManager, ConnectionState};
pub use pool::{LaunchedServer, ServerLauncher, ServerPool, StdioLauncher};
pub use transport::{ServerEvent, Transport, Wire, WireError};

#[derive(thiserror::Error, Debug)]
pub enum LspError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("wire error: {0}")]
    Wire(#[from] transport::WireError),
    #[error("request {0} timed out")]
    Timeout(String),
    #[error("server error {code}: {message}")]
    ServerError { code: i32, message: String },
    #[error("connection reset")]
    ConnectionReset,
    #[error("no server configured for language {0}")]
    NoServer(String),
    #[error("connection is not ready")]
    NotReady,
    #[error("no connection for document {0}")]
    UnknownDocument(lsp_types::Url),
}

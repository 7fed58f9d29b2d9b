// src/lsp/pool.rs - Reference-counted language server registry

use super::transport::{ServerEvent, Transport, Wire, WireError};
use super::LspError;
use crate::config::ServerSpec;
use lsp_server::Message;
use lsp_types::notification::{Exit, Initialized, Notification as _};
use lsp_types::request::{Initialize, Request as _, Shutdown};
use lsp_types::{ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, TraceValue};
use std::collections::HashMap;
use std::io::BufReader;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// A freshly launched server: its outgoing wire, the incoming message
/// stream, and the child process handle when the launcher spawned one.
pub struct LaunchedServer {
    pub wire: Arc<dyn Wire>,
    pub incoming: mpsc::UnboundedReceiver<Message>,
    pub child: Option<Child>,
}

/// Seam for starting server processes. Production uses [`StdioLauncher`];
/// tests plug in an in-memory server.
pub trait ServerLauncher: Send + Sync {
    fn launch(&self, spec: &ServerSpec) -> Result<LaunchedServer, LspError>;
}

/// Launches the configured command with piped stdio and runs framing
/// threads speaking the LSP base protocol over stdin/stdout.
pub struct StdioLauncher;

struct StdioWire {
    tx: std::sync::mpsc::Sender<Message>,
}

impl Wire for StdioWire {
    fn send(&self, msg: Message) -> Result<(), WireError> {
        self.tx.send(msg).map_err(|_| WireError::Closed)
    }
}

impl ServerLauncher for StdioLauncher {
    fn launch(&self, spec: &ServerSpec) -> Result<LaunchedServer, LspError> {
        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            LspError::Io(std::io::Error::other("server stdin not piped"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            LspError::Io(std::io::Error::other("server stdout not piped"))
        })?;

        let (out_tx, out_rx) = std::sync::mpsc::channel::<Message>();
        std::thread::spawn(move || {
            while let Ok(msg) = out_rx.recv() {
                if msg.write(&mut stdin).is_err() {
                    break;
                }
            }
        });

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                match Message::read(&mut reader) {
                    Ok(Some(msg)) => {
                        if in_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        log::warn!("server stdout framing error: {}", err);
                        break;
                    }
                }
            }
        });

        Ok(LaunchedServer {
            wire: Arc::new(StdioWire { tx: out_tx }),
            incoming: in_rx,
            child: Some(child),
        })
    }
}

struct PooledServer {
    transport: Arc<Transport>,
    refcount: usize,
    child: Option<Child>,
}

/// Process-wide registry of language servers, one per language, shared
/// by every open document of that language. Only the pool starts and
/// stops server processes; connections borrow transports through
/// acquire/release and the last release shuts the server down.
///
/// The pool is an explicit value passed into the connection manager,
/// never ambient state.
pub struct ServerPool {
    launcher: Box<dyn ServerLauncher>,
    events: mpsc::UnboundedSender<ServerEvent>,
    request_timeout: Duration,
    servers: tokio::sync::Mutex<HashMap<String, PooledServer>>,
}

impl ServerPool {
    pub fn new(
        launcher: Box<dyn ServerLauncher>,
        events: mpsc::UnboundedSender<ServerEvent>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            launcher,
            events,
            request_timeout,
            servers: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Borrow the server for `language`, launching and initializing it
    /// on first use.
    pub async fn acquire(
        &self,
        language: &str,
        spec: &ServerSpec,
    ) -> Result<Arc<Transport>, LspError> {
        let mut servers = self.servers.lock().await;
        if let Some(server) = servers.get_mut(language) {
            server.refcount += 1;
            return Ok(server.transport.clone());
        }

        log::debug!("launching language server for {}: {}", language, spec.command);
        let LaunchedServer {
            wire,
            incoming,
            mut child,
        } = self.launcher.launch(spec)?;
        let transport = Arc::new(Transport::new(
            wire,
            incoming,
            self.events.clone(),
            self.request_timeout,
        ));
        if let Err(err) = initialize_server(&transport).await {
            // The child is the pool's to stop, even when setup fails.
            transport.close();
            if let Some(child) = child.as_mut() {
                let _ = child.kill();
                let _ = child.wait();
            }
            return Err(err);
        }
        servers.insert(
            language.to_string(),
            PooledServer {
                transport: transport.clone(),
                refcount: 1,
                child,
            },
        );
        Ok(transport)
    }

    /// Return a borrowed server; the last release shuts it down.
    pub async fn release(&self, language: &str) {
        let mut servers = self.servers.lock().await;
        let done = match servers.get_mut(language) {
            Some(server) => {
                server.refcount = server.refcount.saturating_sub(1);
                server.refcount == 0
            }
            None => false,
        };
        if !done {
            return;
        }
        let mut server = servers.remove(language).unwrap();
        drop(servers);

        log::debug!("shutting down language server for {}", language);
        // Polite shutdown first; errors only mean the server already went
        // away.
        if transport_shutdown(&server.transport).await.is_err() {
            log::trace!("{} server did not answer shutdown", language);
        }
        server.transport.close();
        if let Some(child) = server.child.as_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    pub async fn active_count(&self) -> usize {
        self.servers.lock().await.len()
    }

    pub async fn refcount(&self, language: &str) -> usize {
        self.servers
            .lock()
            .await
            .get(language)
            .map(|s| s.refcount)
            .unwrap_or(0)
    }

    pub async fn shutdown_all(&self) {
        let languages: Vec<String> = self.servers.lock().await.keys().cloned().collect();
        for language in languages {
            let mut servers = self.servers.lock().await;
            if let Some(server) = servers.get_mut(&language) {
                server.refcount = 1;
            }
            drop(servers);
            self.release(&language).await;
        }
    }
}

async fn initialize_server(transport: &Transport) -> Result<InitializeResult, LspError> {
    #[allow(deprecated)]
    let params = InitializeParams {
        process_id: Some(std::process::id()),
        root_path: None,
        root_uri: None,
        initialization_options: None,
        capabilities: ClientCapabilities::default(),
        trace: Some(TraceValue::Off),
        workspace_folders: None,
        client_info: Some(ClientInfo {
            name: "cellbridge".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        locale: None,
        work_done_progress_params: Default::default(),
    };

    let value = transport
        .request(Initialize::METHOD, serde_json::to_value(params)?)
        .await?;
    let result: InitializeResult = serde_json::from_value(value)?;
    transport.notify(Initialized::METHOD, serde_json::json!({}))?;
    Ok(result)
}

async fn transport_shutdown(transport: &Transport) -> Result<(), LspError> {
    transport
        .request(Shutdown::METHOD, serde_json::Value::Null)
        .await?;
    transport.notify(Exit::METHOD, serde_json::Value::Null)?;
    Ok(())
}

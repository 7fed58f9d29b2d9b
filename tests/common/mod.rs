// Common test utilities: in-memory language server and host document mocks

use async_trait::async_trait;
use cellbridge::adapter::DocumentHost;
use cellbridge::config::{BridgeConfig, ServerSpec};
use cellbridge::lsp::{LaunchedServer, LspError, ServerLauncher, Wire, WireError};
use cellbridge::vdoc::{CellMagicExtractor, CellSnapshot, VirtualDocumentBuilder};
use lsp_server::{Message, Response};
use lsp_types::InitializeResult;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// How the mock server answers requests. Anything unlisted gets a
/// `null` result (initialize gets a default InitializeResult).
#[derive(Debug, Default, Clone)]
pub struct MockBehavior {
    /// Methods whose requests are silently swallowed.
    pub withhold: Vec<String>,
    /// Method -> canned result.
    pub results: HashMap<String, serde_json::Value>,
    /// Method -> error reply.
    pub errors: HashMap<String, (i32, String)>,
}

/// One launched mock server: everything the client sent (as JSON) plus
/// a sender for pushing server-initiated messages.
pub struct MockServerHandle {
    sent: Arc<Mutex<Vec<serde_json::Value>>>,
    pub push: mpsc::UnboundedSender<Message>,
}

impl MockServerHandle {
    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.sent.lock().unwrap().clone()
    }

    /// The `method` field of every sent request/notification, in order.
    pub fn methods(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|m| m.get("method").and_then(|v| v.as_str()).map(String::from))
            .collect()
    }

    pub fn messages_for(&self, method: &str) -> Vec<serde_json::Value> {
        self.sent()
            .into_iter()
            .filter(|m| m.get("method").and_then(|v| v.as_str()) == Some(method))
            .collect()
    }

    pub fn publish_diagnostics(&self, params: lsp_types::PublishDiagnosticsParams) {
        let notification = lsp_server::Notification::new(
            "textDocument/publishDiagnostics".to_string(),
            serde_json::to_value(params).unwrap(),
        );
        self.push.send(Message::Notification(notification)).unwrap();
    }
}

struct MockWire {
    tx: mpsc::UnboundedSender<Message>,
    sent: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl Wire for MockWire {
    fn send(&self, msg: Message) -> Result<(), WireError> {
        // Record before forwarding: by the time a client call returns,
        // its traffic is visible to assertions.
        self.sent.lock().unwrap().push(serde_json::to_value(&msg).unwrap());
        self.tx.send(msg).map_err(|_| WireError::Closed)
    }
}

/// Launches in-memory servers; every launch is recorded so tests can
/// inspect the traffic of each server separately.
pub struct MockLauncher {
    behavior: MockBehavior,
    pub handles: Arc<Mutex<Vec<Arc<MockServerHandle>>>>,
}

impl MockLauncher {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn handle(&self, index: usize) -> Arc<MockServerHandle> {
        self.handles.lock().unwrap()[index].clone()
    }

    pub fn launch_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }
}

impl ServerLauncher for MockLauncher {
    fn launch(&self, _spec: &ServerSpec) -> Result<LaunchedServer, LspError> {
        let (wire_tx, mut wire_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Message>();
        let sent = Arc::new(Mutex::new(Vec::new()));

        let behavior = self.behavior.clone();
        let reply_tx = in_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = wire_rx.recv().await {
                if let Message::Request(req) = msg {
                    if behavior.withhold.iter().any(|m| m == &req.method) {
                        continue;
                    }
                    let response = if let Some((code, message)) = behavior.errors.get(&req.method)
                    {
                        Response::new_err(req.id, *code, message.clone())
                    } else if let Some(result) = behavior.results.get(&req.method) {
                        Response::new_ok(req.id, result.clone())
                    } else if req.method == "initialize" {
                        Response::new_ok(
                            req.id,
                            serde_json::to_value(InitializeResult::default()).unwrap(),
                        )
                    } else {
                        Response::new_ok(req.id, serde_json::Value::Null)
                    };
                    if reply_tx.send(Message::Response(response)).is_err() {
                        break;
                    }
                }
            }
        });

        let handle = Arc::new(MockServerHandle {
            sent: sent.clone(),
            push: in_tx,
        });
        self.handles.lock().unwrap().push(handle);
        Ok(LaunchedServer {
            wire: Arc::new(MockWire { tx: wire_tx, sent }),
            incoming: in_rx,
            child: None,
        })
    }
}

/// Launcher newtype handed to the pool; tests keep the inner `Arc` to
/// inspect per-server handles after the pool takes ownership.
pub struct SharedLauncher(pub Arc<MockLauncher>);

impl ServerLauncher for SharedLauncher {
    fn launch(&self, spec: &ServerSpec) -> Result<LaunchedServer, LspError> {
        self.0.launch(spec)
    }
}

/// A scriptable host document.
pub struct MockHost {
    ready: AtomicBool,
    language: Mutex<Option<String>>,
    cells: Mutex<Vec<CellSnapshot>>,
}

impl MockHost {
    pub fn new(language: &str, cells: Vec<CellSnapshot>) -> Self {
        Self {
            ready: AtomicBool::new(true),
            language: Mutex::new(Some(language.to_string())),
            cells: Mutex::new(cells),
        }
    }

    pub fn not_ready(language: &str) -> Self {
        let host = Self::new(language, Vec::new());
        host.ready.store(false, Ordering::SeqCst);
        host
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_language(&self, language: &str) {
        *self.language.lock().unwrap() = Some(language.to_string());
    }

    pub fn clear_language(&self) {
        *self.language.lock().unwrap() = None;
    }

    pub fn set_cells(&self, cells: Vec<CellSnapshot>) {
        *self.cells.lock().unwrap() = cells;
    }

    pub fn set_cell_text(&self, index: usize, text: &str) {
        let mut cells = self.cells.lock().unwrap();
        cells[index].text = text.to_string();
    }
}

#[async_trait]
impl DocumentHost for MockHost {
    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn cells(&self) -> Vec<CellSnapshot> {
        self.cells.lock().unwrap().clone()
    }

    fn language(&self) -> Option<String> {
        self.language.lock().unwrap().clone()
    }
}

pub fn cell(index: usize, language: &str, text: &str) -> CellSnapshot {
    CellSnapshot {
        index,
        language: language.to_string(),
        text: text.to_string(),
    }
}

/// Servers for python and sql, an sql cell magic, and synthetic-path
/// extensions for both languages.
pub fn test_config() -> BridgeConfig {
    toml::from_str(
        r#"
[servers.python]
command = "mock-python-server"

[servers.sql]
command = "mock-sql-server"

[magics]
sql = "sql"

[extensions]
python = "py"
sql = "sql"
"#,
    )
    .unwrap()
}

pub fn test_builder(config: &BridgeConfig) -> VirtualDocumentBuilder {
    VirtualDocumentBuilder::new(".virtual_documents")
        .with_extractor(Box::new(CellMagicExtractor::new(config.magics.clone())))
        .with_extensions(config.extensions.clone())
}

// src/lsp/connection.rs - Per-document connection lifecycle and typed requests

use super::pool::ServerPool;
use super::transport::Transport;
use super::LspError;
use crate::config::BridgeConfig;
use crate::vdoc::{DocumentEdit, VirtualDocument};
use lsp_server::RequestId;
use lsp_types::notification::{
    DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument, DidSaveTextDocument,
    Notification as _,
};
use lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, Position, TextDocumentContentChangeEvent, TextDocumentIdentifier,
    TextDocumentItem, Url, VersionedTextDocumentIdentifier,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
}

#[derive(Debug)]
struct PendingUpdate {
    version: i32,
    changes: Vec<TextDocumentContentChangeEvent>,
}

/// One live connection per (language, virtual-document uri).
///
/// Cheap to clone; clones share state so a request can be awaited while
/// another task edits or tears the connection down. Updates are stashed
/// and debounced: consecutive incremental edits merge into one
/// didChange, a full-text replace supersedes everything stashed before
/// it, and any request flushes the stash first so the server never
/// answers against stale state.
#[derive(Clone)]
pub struct Connection {
    language: String,
    uri: Url,
    transport: Arc<Transport>,
    state: Arc<Mutex<ConnectionState>>,
    in_flight: Arc<Mutex<HashSet<RequestId>>>,
    pending_update: Arc<tokio::sync::Mutex<Option<PendingUpdate>>>,
    debounce: Duration,
}

impl Connection {
    fn new(language: &str, uri: Url, transport: Arc<Transport>, debounce: Duration) -> Self {
        Self {
            language: language.to_string(),
            uri,
            transport,
            state: Arc::new(Mutex::new(ConnectionState::Connecting)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            pending_update: Arc::new(tokio::sync::Mutex::new(None)),
            debounce,
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    async fn open(&self, version: i32, text: String) -> Result<(), LspError> {
        let params = DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: self.uri.clone(),
                language_id: self.language.clone(),
                version,
                text,
            },
        };
        self.transport
            .notify(DidOpenTextDocument::METHOD, serde_json::to_value(params)?)?;
        self.set_state(ConnectionState::Ready);
        Ok(())
    }

    /// Stash an incremental edit. Edits accumulate in order and go out
    /// as one didChange once the debounce window closes (or a request
    /// forces a flush).
    pub async fn update_incremental(&self, edit: DocumentEdit) -> Result<(), LspError> {
        if self.state() != ConnectionState::Ready {
            return Err(LspError::NotReady);
        }
        let change = TextDocumentContentChangeEvent {
            range: Some(edit.range),
            range_length: None,
            text: edit.text,
        };
        let mut pending = self.pending_update.lock().await;
        match pending.as_mut() {
            Some(update) => {
                update.version = edit.version;
                update.changes.push(change);
            }
            None => {
                *pending = Some(PendingUpdate {
                    version: edit.version,
                    changes: vec![change],
                });
                self.schedule_flush();
            }
        }
        Ok(())
    }

    /// Stash a full-text replace, superseding anything stashed before
    /// it. Used after structural rebuilds where no incremental diff
    /// represents the change.
    pub async fn update_full(&self, version: i32, text: String) -> Result<(), LspError> {
        if self.state() != ConnectionState::Ready {
            return Err(LspError::NotReady);
        }
        let mut pending = self.pending_update.lock().await;
        let was_empty = pending.is_none();
        *pending = Some(PendingUpdate {
            version,
            changes: vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text,
            }],
        });
        if was_empty {
            self.schedule_flush();
        }
        Ok(())
    }

    fn schedule_flush(&self) {
        let conn = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(conn.debounce).await;
            if let Err(err) = conn.flush().await {
                log::debug!("debounced flush for {} failed: {}", conn.uri, err);
            }
        });
    }

    /// Send the stashed update now. A no-op when nothing is stashed or
    /// the connection is no longer ready. The stash lock is held across
    /// the send, so a close racing this flush either sees the stash
    /// already drained or flips the state before the take.
    pub async fn flush(&self) -> Result<(), LspError> {
        let mut pending = self.pending_update.lock().await;
        if self.state() != ConnectionState::Ready {
            pending.take();
            return Ok(());
        }
        let update = match pending.take() {
            Some(update) => update,
            None => return Ok(()),
        };
        let params = DidChangeTextDocumentParams {
            text_document: VersionedTextDocumentIdentifier {
                uri: self.uri.clone(),
                version: update.version,
            },
            content_changes: update.changes,
        };
        self.transport
            .notify(DidChangeTextDocument::METHOD, serde_json::to_value(params)?)
    }

    pub async fn did_save(&self, text: Option<String>) -> Result<(), LspError> {
        if self.state() != ConnectionState::Ready {
            return Err(LspError::NotReady);
        }
        self.flush().await?;
        let params = DidSaveTextDocumentParams {
            text_document: TextDocumentIdentifier {
                uri: self.uri.clone(),
            },
            text,
        };
        self.transport
            .notify(DidSaveTextDocument::METHOD, serde_json::to_value(params)?)
    }

    /// Issue a typed request. Flushes any stashed update first so the
    /// response reflects the state the caller queried against.
    pub async fn request<R>(&self, params: R::Params) -> Result<R::Result, LspError>
    where
        R: lsp_types::request::Request,
        R::Params: serde::Serialize,
        R::Result: serde::de::DeserializeOwned,
    {
        if self.state() != ConnectionState::Ready {
            return Err(LspError::NotReady);
        }
        self.flush().await?;

        let (id, rx) = self
            .transport
            .send_request(R::METHOD, serde_json::to_value(params)?)?;
        self.in_flight.lock().unwrap().insert(id.clone());
        let result = self.transport.wait(R::METHOD, id.clone(), rx).await;
        self.in_flight.lock().unwrap().remove(&id);
        serde_json::from_value(result?).map_err(Into::into)
    }

    pub async fn completion(
        &self,
        position: Position,
    ) -> Result<Option<lsp_types::CompletionResponse>, LspError> {
        self.request::<lsp_types::request::Completion>(lsp_types::CompletionParams {
            text_document_position: self.position_params(position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
            context: None,
        })
        .await
    }

    pub async fn hover(&self, position: Position) -> Result<Option<lsp_types::Hover>, LspError> {
        self.request::<lsp_types::request::HoverRequest>(lsp_types::HoverParams {
            text_document_position_params: self.position_params(position),
            work_done_progress_params: Default::default(),
        })
        .await
    }

    pub async fn rename(
        &self,
        position: Position,
        new_name: String,
    ) -> Result<Option<lsp_types::WorkspaceEdit>, LspError> {
        self.request::<lsp_types::request::Rename>(lsp_types::RenameParams {
            text_document_position: self.position_params(position),
            new_name,
            work_done_progress_params: Default::default(),
        })
        .await
    }

    pub async fn goto_definition(
        &self,
        position: Position,
    ) -> Result<Option<lsp_types::GotoDefinitionResponse>, LspError> {
        self.request::<lsp_types::request::GotoDefinition>(lsp_types::GotoDefinitionParams {
            text_document_position_params: self.position_params(position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        })
        .await
    }

    pub async fn references(
        &self,
        position: Position,
        include_declaration: bool,
    ) -> Result<Option<Vec<lsp_types::Location>>, LspError> {
        self.request::<lsp_types::request::References>(lsp_types::ReferenceParams {
            text_document_position: self.position_params(position),
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
            context: lsp_types::ReferenceContext {
                include_declaration,
            },
        })
        .await
    }

    pub async fn document_highlight(
        &self,
        position: Position,
    ) -> Result<Option<Vec<lsp_types::DocumentHighlight>>, LspError> {
        self.request::<lsp_types::request::DocumentHighlightRequest>(
            lsp_types::DocumentHighlightParams {
                text_document_position_params: self.position_params(position),
                work_done_progress_params: Default::default(),
                partial_result_params: Default::default(),
            },
        )
        .await
    }

    pub async fn signature_help(
        &self,
        position: Position,
    ) -> Result<Option<lsp_types::SignatureHelp>, LspError> {
        self.request::<lsp_types::request::SignatureHelpRequest>(lsp_types::SignatureHelpParams {
            text_document_position_params: self.position_params(position),
            work_done_progress_params: Default::default(),
            context: None,
        })
        .await
    }

    fn position_params(&self, position: Position) -> lsp_types::TextDocumentPositionParams {
        lsp_types::TextDocumentPositionParams {
            text_document: TextDocumentIdentifier {
                uri: self.uri.clone(),
            },
            position,
        }
    }

    /// Reject everything in flight with `ConnectionReset` and drop the
    /// stashed update. No protocol traffic is issued. The state flip
    /// happens under the stash lock, so any flush in progress completes
    /// first and later flushes see `Disconnected`.
    async fn abort(&self) {
        {
            let mut pending = self.pending_update.lock().await;
            self.set_state(ConnectionState::Disconnected);
            pending.take();
        }
        let ids: Vec<RequestId> = self.in_flight.lock().unwrap().drain().collect();
        for id in ids {
            self.transport.cancel(&id);
        }
    }

    /// Close the document: silence the stash and pending work first,
    /// then notify the server, so no didChange can land after didClose.
    async fn close(&self) -> Result<(), LspError> {
        if self.state() == ConnectionState::Disconnected {
            return Ok(());
        }
        self.abort().await;
        let params = DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier {
                uri: self.uri.clone(),
            },
        };
        self.transport
            .notify(DidCloseTextDocument::METHOD, serde_json::to_value(params)?)
    }
}

/// Owns the connections of one document context, at most one per
/// virtual-document uri, and resolves languages to pooled servers.
pub struct ConnectionManager {
    pool: Arc<ServerPool>,
    config: Arc<BridgeConfig>,
    debounce: Duration,
    connections: HashMap<Url, Connection>,
}

impl ConnectionManager {
    pub fn new(pool: Arc<ServerPool>, config: Arc<BridgeConfig>) -> Self {
        Self {
            pool,
            config,
            debounce: Duration::from_millis(150),
            connections: HashMap::new(),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Open a connection for the virtual document, starting or reusing
    /// the pooled server for its language. Opening an already-open
    /// document is a no-op.
    pub async fn open(&mut self, doc: &VirtualDocument) -> Result<(), LspError> {
        if self.connections.contains_key(doc.uri()) {
            return Ok(());
        }
        let spec = self
            .config
            .server_for(doc.language())
            .cloned()
            .ok_or_else(|| LspError::NoServer(doc.language().to_string()))?;
        let transport = self.pool.acquire(doc.language(), &spec).await?;
        let conn = Connection::new(doc.language(), doc.uri().clone(), transport, self.debounce);
        if let Err(err) = conn.open(doc.version(), doc.text()).await {
            self.pool.release(doc.language()).await;
            return Err(err);
        }
        log::debug!("opened {} ({})", doc.uri(), doc.language());
        self.connections.insert(doc.uri().clone(), conn);
        Ok(())
    }

    pub fn connection(&self, uri: &Url) -> Result<Connection, LspError> {
        self.connections
            .get(uri)
            .cloned()
            .ok_or_else(|| LspError::UnknownDocument(uri.clone()))
    }

    pub fn is_open(&self, uri: &Url) -> bool {
        self.connections.contains_key(uri)
    }

    pub fn open_uris(&self) -> Vec<Url> {
        self.connections.keys().cloned().collect()
    }

    pub async fn update(&self, uri: &Url, edit: DocumentEdit) -> Result<(), LspError> {
        self.connection(uri)?.update_incremental(edit).await
    }

    pub async fn replace(&self, uri: &Url, version: i32, text: String) -> Result<(), LspError> {
        self.connection(uri)?.update_full(version, text).await
    }

    /// Close one document, releasing its server reference.
    pub async fn close(&mut self, uri: &Url) -> Result<(), LspError> {
        let conn = self
            .connections
            .remove(uri)
            .ok_or_else(|| LspError::UnknownDocument(uri.clone()))?;
        let result = conn.close().await;
        self.pool.release(conn.language()).await;
        result
    }

    /// Kernel/language change: tear down the superseded connection
    /// (its in-flight requests fail with `ConnectionReset`) and replay
    /// `open` with the latest snapshot against the new language server.
    pub async fn switch_language(
        &mut self,
        old_uri: &Url,
        new_doc: &VirtualDocument,
    ) -> Result<(), LspError> {
        if let Some(conn) = self.connections.remove(old_uri) {
            log::debug!(
                "language switch: {} ({} -> {})",
                old_uri,
                conn.language(),
                new_doc.language()
            );
            conn.abort().await;
            self.pool.release(conn.language()).await;
        }
        self.open(new_doc).await
    }

    pub async fn close_all(&mut self) {
        let uris: Vec<Url> = self.connections.keys().cloned().collect();
        for uri in uris {
            if let Err(err) = self.close(&uri).await {
                log::debug!("close of {} failed: {}", uri, err);
            }
        }
    }
}

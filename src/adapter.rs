// src/adapter.rs - Glue between the host editor and the LSP bridge

use crate::config::BridgeConfig;
use crate::diagnostics::{DiagnosticStore, SourceDiagnostic};
use crate::lsp::{ConnectionManager, LspError, ServerEvent};
use crate::vdoc::{
    CellSnapshot, SourceRegion, VdocError, VirtualDocument, VirtualDocumentBuilder,
};
use async_trait::async_trait;
use lsp_types::Url;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(thiserror::Error, Debug)]
pub enum AdapterError {
    #[error("host document not ready within {0:?}")]
    ReadinessTimeout(Duration),
    #[error("host reports no language")]
    LanguageUnknown,
    #[error(transparent)]
    Vdoc(#[from] VdocError),
    #[error(transparent)]
    Lsp(#[from] LspError),
}

/// What the bridge needs from the host editor: a readiness predicate
/// and the current document content. The bridge never owns editing; it
/// only observes.
#[async_trait]
pub trait DocumentHost: Send + Sync {
    /// True once the editor is attached and the kernel/language is
    /// known. Polled by the readiness gate.
    async fn is_ready(&self) -> bool;
    fn cells(&self) -> Vec<CellSnapshot>;
    fn language(&self) -> Option<String>;
}

/// Change signals pushed by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// In-place edit of one cell's text.
    CellEdited { cell: usize, text: String },
    /// Cell added, removed, or reordered; forces a full rebuild.
    StructureChanged,
    /// Kernel/language switch.
    LanguageChanged,
    Saved,
    Closed,
}

/// Observes host edits, keeps virtual documents current, forwards
/// updates to the connection manager, and translates protocol positions
/// back into cell coordinates.
pub struct Adapter {
    doc_id: String,
    host: Arc<dyn DocumentHost>,
    builder: VirtualDocumentBuilder,
    manager: ConnectionManager,
    config: Arc<BridgeConfig>,
    diagnostics: Arc<DiagnosticStore>,
    host_language: String,
    regions: Vec<SourceRegion>,
    documents: HashMap<String, VirtualDocument>,
    torn_down: bool,
}

impl Adapter {
    /// Poll the host's readiness predicate until it holds or the
    /// deadline passes. The deadline is mandatory; an unbounded wait is
    /// a hang, not a retry policy.
    pub async fn wait_ready(
        host: &dyn DocumentHost,
        poll: Duration,
        deadline: Duration,
    ) -> Result<(), AdapterError> {
        let start = Instant::now();
        loop {
            if host.is_ready().await {
                return Ok(());
            }
            if start.elapsed() >= deadline {
                return Err(AdapterError::ReadinessTimeout(deadline));
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Gate on readiness, build the initial virtual documents, and open
    /// connections for every language that has a configured server.
    #[allow(clippy::too_many_arguments)]
    pub async fn connect(
        doc_id: &str,
        host: Arc<dyn DocumentHost>,
        builder: VirtualDocumentBuilder,
        manager: ConnectionManager,
        config: Arc<BridgeConfig>,
        diagnostics: Arc<DiagnosticStore>,
        poll: Duration,
        deadline: Duration,
    ) -> Result<Self, AdapterError> {
        Self::wait_ready(host.as_ref(), poll, deadline).await?;
        let host_language = host.language().ok_or(AdapterError::LanguageUnknown)?;

        let mut adapter = Self {
            doc_id: doc_id.to_string(),
            host,
            builder,
            manager,
            config,
            diagnostics,
            host_language,
            regions: Vec::new(),
            documents: HashMap::new(),
            torn_down: false,
        };
        adapter.rebuild_documents();
        adapter.sync_connections(None).await?;
        Ok(adapter)
    }

    pub fn document(&self, language: &str) -> Option<&VirtualDocument> {
        self.documents.get(language)
    }

    pub fn regions(&self) -> &[SourceRegion] {
        &self.regions
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Diagnostics for one language's virtual document, translated to
    /// cell coordinates through its current map.
    pub fn diagnostics(&self, language: &str) -> Vec<SourceDiagnostic> {
        match self.documents.get(language) {
            Some(doc) => self.diagnostics.translated(doc.uri(), doc.map()),
            None => Vec::new(),
        }
    }

    /// Route one server push; diagnostics land in the store and are
    /// translated lazily on read.
    pub fn handle_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::Diagnostics(params) => {
                self.diagnostics.publish(params.uri, params.diagnostics);
            }
            ServerEvent::Notification { method, .. } => {
                log::trace!("unhandled server notification {}", method);
            }
        }
    }

    /// Consume host events until the document closes, the channel hangs
    /// up, or a handler fails. All three exits tear the bridge down;
    /// connections never outlive the event loop.
    pub async fn run(
        &mut self,
        mut events: mpsc::UnboundedReceiver<HostEvent>,
    ) -> Result<(), AdapterError> {
        while let Some(event) = events.recv().await {
            let closing = event == HostEvent::Closed;
            if let Err(err) = self.handle_event(event).await {
                self.teardown().await;
                return Err(err);
            }
            if closing {
                break;
            }
        }
        self.teardown().await;
        Ok(())
    }

    pub async fn handle_event(&mut self, event: HostEvent) -> Result<(), AdapterError> {
        if self.torn_down {
            return Ok(());
        }
        match event {
            HostEvent::CellEdited { cell, text } => self.on_cell_edited(cell, text).await,
            HostEvent::StructureChanged => {
                self.rebuild_documents();
                self.sync_connections(None).await
            }
            HostEvent::LanguageChanged => self.on_language_changed().await,
            HostEvent::Saved => self.on_saved().await,
            HostEvent::Closed => {
                self.teardown().await;
                Ok(())
            }
        }
    }

    /// Unsubscribe and reject outstanding work. Calling twice is a
    /// no-op.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.manager.close_all().await;
        self.diagnostics.clear_all();
        log::debug!("adapter for {} torn down", self.doc_id);
    }

    async fn on_cell_edited(&mut self, cell: usize, text: String) -> Result<(), AdapterError> {
        let language = self
            .regions
            .iter()
            .find(|r| r.cell_index == cell && r.start_line == 0)
            .map(|r| r.language.clone())
            .unwrap_or_else(|| self.host_language.clone());
        let new_regions = self.builder.split_cells(&[CellSnapshot {
            index: cell,
            language,
            text,
        }]);
        let old: Vec<SourceRegion> = self
            .regions
            .iter()
            .filter(|r| r.cell_index == cell)
            .cloned()
            .collect();

        if !same_shape(&old, &new_regions) {
            // Region boundaries moved; only a rebuild keeps the maps
            // consistent.
            self.rebuild_documents();
            return self.sync_connections(None).await;
        }

        for (old_region, new_region) in old.iter().zip(new_regions.iter()) {
            if old_region.text == new_region.text {
                continue;
            }
            if let Some(doc) = self.documents.get_mut(&old_region.language) {
                let edit = doc.apply_region_edit(old_region.id, &new_region.text)?;
                if self.manager.is_open(doc.uri()) {
                    self.manager.update(doc.uri(), edit).await?;
                }
            }
            if let Some(slot) = self
                .regions
                .iter_mut()
                .find(|r| r.id == old_region.id)
            {
                slot.text = new_region.text.clone();
            }
        }
        Ok(())
    }

    async fn on_language_changed(&mut self) -> Result<(), AdapterError> {
        let new_language = self.host.language().ok_or(AdapterError::LanguageUnknown)?;
        if new_language == self.host_language {
            return Ok(());
        }
        let old_language = std::mem::replace(&mut self.host_language, new_language.clone());
        let old_uri = self.documents.get(&old_language).map(|d| d.uri().clone());

        self.rebuild_documents();

        let mut switched = None;
        if let (Some(old_uri), Some(new_doc)) = (old_uri, self.documents.get(&new_language)) {
            if self.config.server_for(&new_language).is_some() {
                self.manager.switch_language(&old_uri, new_doc).await?;
                switched = Some(new_doc.uri().clone());
            } else if self.manager.is_open(&old_uri) {
                self.manager.close(&old_uri).await?;
            }
        }
        self.sync_connections(switched.as_ref()).await
    }

    async fn on_saved(&mut self) -> Result<(), AdapterError> {
        for doc in self.documents.values() {
            if self.manager.is_open(doc.uri()) {
                self.manager
                    .connection(doc.uri())?
                    .did_save(Some(doc.text()))
                    .await?;
            }
        }
        Ok(())
    }

    /// Recompute regions and virtual documents from the host's current
    /// cells. The swap is all-or-nothing: if any build fails, the
    /// previous generation of regions and documents stays in place, so
    /// region ids and maps never straddle two generations and a partial
    /// map is never published.
    fn rebuild_documents(&mut self) {
        let regions = self.builder.split_cells(&self.host.cells());

        let mut languages = VirtualDocumentBuilder::languages(&regions);
        languages.insert(self.host_language.clone());

        let mut next = HashMap::new();
        for language in &languages {
            // Foreign languages without a server do not get a virtual
            // document; their text stays addressable through the host
            // document's regions.
            if language != &self.host_language && self.config.server_for(language).is_none() {
                continue;
            }
            let version = self
                .documents
                .get(language)
                .map(|d| d.version() + 1)
                .unwrap_or(1);
            match self.builder.build(&self.doc_id, language, &regions, version) {
                Ok(doc) => {
                    next.insert(language.clone(), doc);
                }
                Err(err) => {
                    log::warn!(
                        "rebuild of {} virtual document failed, keeping previous generation: {}",
                        language,
                        err
                    );
                    return;
                }
            }
        }
        self.regions = regions;
        self.documents = next;
    }

    /// Reconcile connections with the current document set: close
    /// vanished documents, open new ones, and push a full-text replace
    /// to the rest. `skip` marks a connection that was just replayed and
    /// needs no further traffic.
    async fn sync_connections(&mut self, skip: Option<&Url>) -> Result<(), AdapterError> {
        let current: Vec<Url> = self.documents.values().map(|d| d.uri().clone()).collect();
        for uri in self.manager.open_uris() {
            if !current.contains(&uri) {
                self.manager.close(&uri).await?;
            }
        }
        for doc in self.documents.values() {
            if Some(doc.uri()) == skip {
                continue;
            }
            if self.config.server_for(doc.language()).is_none() {
                continue;
            }
            if self.manager.is_open(doc.uri()) {
                self.manager
                    .replace(doc.uri(), doc.version(), doc.text())
                    .await?;
            } else {
                self.manager.open(doc).await?;
            }
        }
        Ok(())
    }
}

/// Two region lists have the same shape when languages and in-cell
/// offsets line up; only then can an edit be replayed incrementally.
fn same_shape(old: &[SourceRegion], new: &[SourceRegion]) -> bool {
    old.len() == new.len()
        && old
            .iter()
            .zip(new.iter())
            .all(|(a, b)| a.language == b.language && a.start_line == b.start_line)
}

// src/diagnostics.rs - Diagnostics keyed by virtual document, queried in source coordinates

use crate::vdoc::{PositionMap, SourcePosition};
use lsp_types::{Diagnostic, Url};
use std::collections::HashMap;
use std::sync::Mutex;

/// A diagnostic translated back into host-editor coordinates.
#[derive(Debug, Clone)]
pub struct SourceDiagnostic {
    pub cell: usize,
    pub start: SourcePosition,
    pub end: SourcePosition,
    pub diagnostic: Diagnostic,
}

/// Latest published diagnostics per virtual document uri.
///
/// Stored in virtual coordinates as the server sent them; translation
/// through a [`PositionMap`] happens on read, so a rebuilt map never
/// leaves stale translated positions behind. Diagnostics that land on
/// padding lines are dropped at translation time.
#[derive(Debug, Default)]
pub struct DiagnosticStore {
    diagnostics: Mutex<HashMap<Url, Vec<Diagnostic>>>,
}

impl DiagnosticStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the diagnostics for one virtual document (the protocol
    /// semantics of publishDiagnostics).
    pub fn publish(&self, uri: Url, diagnostics: Vec<Diagnostic>) {
        self.diagnostics.lock().unwrap().insert(uri, diagnostics);
    }

    pub fn get(&self, uri: &Url) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear(&self, uri: &Url) {
        self.diagnostics.lock().unwrap().remove(uri);
    }

    pub fn clear_all(&self) {
        self.diagnostics.lock().unwrap().clear();
    }

    pub fn document_count(&self) -> usize {
        self.diagnostics.lock().unwrap().len()
    }

    /// Diagnostics for one virtual document, translated to source
    /// coordinates through the document's current map.
    pub fn translated(&self, uri: &Url, map: &PositionMap) -> Vec<SourceDiagnostic> {
        self.get(uri)
            .into_iter()
            .filter_map(|diagnostic| {
                let (start, end) = map.range_to_source(diagnostic.range)?;
                Some(SourceDiagnostic {
                    cell: start.cell,
                    start,
                    end,
                    diagnostic,
                })
            })
            .collect()
    }

    /// Translated diagnostics whose range starts on `line` of `cell`.
    pub fn at_cell_line(
        &self,
        uri: &Url,
        map: &PositionMap,
        cell: usize,
        line: u32,
    ) -> Vec<SourceDiagnostic> {
        self.translated(uri, map)
            .into_iter()
            .filter(|d| d.cell == cell && d.start.line == line)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vdoc::{CellSnapshot, VirtualDocumentBuilder};
    use lsp_types::{DiagnosticSeverity, Position, Range};

    fn diag(start_line: u32, start_ch: u32, end_line: u32, end_ch: u32, msg: &str) -> Diagnostic {
        Diagnostic {
            range: Range {
                start: Position {
                    line: start_line,
                    character: start_ch,
                },
                end: Position {
                    line: end_line,
                    character: end_ch,
                },
            },
            severity: Some(DiagnosticSeverity::ERROR),
            message: msg.to_string(),
            ..Default::default()
        }
    }

    fn uri() -> Url {
        Url::parse("file:///.virtual_documents/nb/python.py").unwrap()
    }

    #[test]
    fn test_publish_replaces() {
        let store = DiagnosticStore::new();
        store.publish(uri(), vec![diag(0, 0, 0, 3, "first")]);
        store.publish(uri(), vec![diag(1, 0, 1, 3, "second")]);
        let diags = store.get(&uri());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "second");
    }

    #[test]
    fn test_clear() {
        let store = DiagnosticStore::new();
        store.publish(uri(), vec![diag(0, 0, 0, 3, "gone")]);
        store.clear(&uri());
        assert!(store.get(&uri()).is_empty());
        assert_eq!(store.document_count(), 0);
    }

    #[test]
    fn test_translated_to_cells() {
        let builder = VirtualDocumentBuilder::new(".virtual_documents");
        let cells = vec![
            CellSnapshot {
                index: 0,
                language: "python".to_string(),
                text: "a = 1\n".to_string(),
            },
            CellSnapshot {
                index: 1,
                language: "python".to_string(),
                text: "b = undefined\n".to_string(),
            },
        ];
        let regions = builder.split_cells(&cells);
        let doc = builder.build("nb", "python", &regions, 1).unwrap();

        let store = DiagnosticStore::new();
        // Virtual layout: line 0 = cell 0, line 1 = padding, line 2 = cell 1.
        store.publish(
            doc.uri().clone(),
            vec![diag(2, 4, 2, 13, "undefined name"), diag(1, 0, 1, 1, "padding")],
        );

        let translated = store.translated(doc.uri(), doc.map());
        // The padding diagnostic has no source and is dropped.
        assert_eq!(translated.len(), 1);
        assert_eq!(translated[0].cell, 1);
        assert_eq!(translated[0].start.line, 0);
        assert_eq!(translated[0].start.character, 4);

        let at_line = store.at_cell_line(doc.uri(), doc.map(), 1, 0);
        assert_eq!(at_line.len(), 1);
        assert!(store.at_cell_line(doc.uri(), doc.map(), 0, 0).is_empty());
    }
}

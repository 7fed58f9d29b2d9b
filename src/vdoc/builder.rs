// src/vdoc/builder.rs - Virtual document assembly from source regions

use super::extractor::{Extraction, Extractor};
use super::map::{EntrySource, MapEntry, PositionMap};
use super::region::{CellSnapshot, RegionId, SourceRegion};
use super::VdocError;
use crate::cache::FragmentCache;
use lsp_types::{Position, Range, Url};
use ropey::Rope;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// An incremental change produced by editing one region in place,
/// ready to forward as a protocol content change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEdit {
    /// Replaced span in pre-change virtual coordinates (whole lines).
    pub range: Range,
    pub text: String,
    pub version: i32,
}

/// The concatenation of all source regions sharing one language, with
/// a synthetic path, a version counter, and a position map.
#[derive(Debug, Clone)]
pub struct VirtualDocument {
    uri: Url,
    language: String,
    version: i32,
    text: Rope,
    map: PositionMap,
}

impl VirtualDocument {
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn map(&self) -> &PositionMap {
        &self.map
    }

    pub fn text(&self) -> String {
        self.text.to_string()
    }

    /// Replace one region's lines in place and shift the map entries
    /// after it by the line delta. Structural changes (region added,
    /// removed, or reordered) need a full rebuild instead.
    pub fn apply_region_edit(
        &mut self,
        region: RegionId,
        new_text: &str,
    ) -> Result<DocumentEdit, VdocError> {
        let entry = self
            .map
            .entry_for_region(region)
            .copied()
            .ok_or(VdocError::UnknownRegion(region))?;
        let start = entry.virtual_start;
        let old_count = entry.line_count;

        let normalized = normalize(new_text);
        let new_count = count_lines(&normalized);

        let start_char = self.text.line_to_char(start as usize);
        let end_char = self.text.line_to_char((start + old_count) as usize);
        self.text.remove(start_char..end_char);
        self.text.insert(start_char, &normalized);

        self.map
            .resize_region(region, new_count)
            .ok_or(VdocError::UnknownRegion(region))?;
        debug_assert!(self.map.is_consistent());
        self.version += 1;

        Ok(DocumentEdit {
            range: Range {
                start: Position {
                    line: start,
                    character: 0,
                },
                end: Position {
                    line: start + old_count,
                    character: 0,
                },
            },
            text: normalized,
            version: self.version,
        })
    }
}

/// Builds virtual documents from cells: runs extractors to split out
/// foreign blocks, then concatenates the regions of one language with
/// padding lines in between.
pub struct VirtualDocumentBuilder {
    root: String,
    extractors: Vec<Box<dyn Extractor>>,
    /// language id -> file extension for synthetic paths.
    extensions: HashMap<String, String>,
    extraction_cache: FragmentCache<String, Extraction>,
    next_region: AtomicU64,
}

impl VirtualDocumentBuilder {
    /// `root` is the synthetic-path prefix, e.g. `.virtual_documents`.
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_matches('/').to_string(),
            extractors: Vec::new(),
            extensions: HashMap::new(),
            extraction_cache: FragmentCache::new(256),
            next_region: AtomicU64::new(1),
        }
    }

    pub fn with_extractor(mut self, extractor: Box<dyn Extractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    pub fn with_extensions(mut self, extensions: HashMap<String, String>) -> Self {
        self.extensions = extensions;
        self
    }

    fn alloc_region(&self) -> RegionId {
        RegionId(self.next_region.fetch_add(1, Ordering::Relaxed))
    }

    /// Run extractors over a cell. The first extractor reporting foreign
    /// blocks wins; an ambiguous extraction falls back to host-language
    /// text for this cell only.
    fn extract(&self, text: &str) -> Extraction {
        if let Some(cached) = self.extraction_cache.get(&text.to_string()) {
            return cached;
        }
        let mut result = Extraction::Host;
        for extractor in &self.extractors {
            match extractor.extract(text) {
                Ok(Extraction::Host) => continue,
                Ok(foreign) => {
                    result = foreign;
                    break;
                }
                Err(err) => {
                    log::debug!(
                        "extractor {} ambiguous, keeping cell as host text: {}",
                        extractor.name(),
                        err
                    );
                    result = Extraction::Host;
                    break;
                }
            }
        }
        self.extraction_cache.put(text.to_string(), result.clone());
        result
    }

    /// Split cells into an ordered region list. Regions are recomputed
    /// wholesale; ids are fresh on every call.
    pub fn split_cells(&self, cells: &[CellSnapshot]) -> Vec<SourceRegion> {
        let mut regions = Vec::new();
        for cell in cells {
            match self.extract(&cell.text) {
                Extraction::Host => {
                    regions.push(SourceRegion {
                        id: self.alloc_region(),
                        language: cell.language.clone(),
                        text: cell.text.clone(),
                        cell_index: cell.index,
                        start_line: 0,
                    });
                }
                Extraction::Foreign(blocks) => {
                    let lines: Vec<&str> = cell.text.lines().collect();
                    let mut cursor = 0u32;
                    for block in blocks {
                        if block.start_line > cursor {
                            regions.push(SourceRegion {
                                id: self.alloc_region(),
                                language: cell.language.clone(),
                                text: join_lines(&lines, cursor, block.start_line),
                                cell_index: cell.index,
                                start_line: cursor,
                            });
                        }
                        let block_lines = count_lines(&block.text);
                        regions.push(SourceRegion {
                            id: self.alloc_region(),
                            language: block.language.clone(),
                            text: block.text,
                            cell_index: cell.index,
                            start_line: block.start_line,
                        });
                        cursor = block.start_line + block_lines;
                    }
                    if (cursor as usize) < lines.len() {
                        regions.push(SourceRegion {
                            id: self.alloc_region(),
                            language: cell.language.clone(),
                            text: join_lines(&lines, cursor, lines.len() as u32),
                            cell_index: cell.index,
                            start_line: cursor,
                        });
                    }
                }
            }
        }
        regions
    }

    /// Languages present in a region list, in deterministic order.
    pub fn languages(regions: &[SourceRegion]) -> BTreeSet<String> {
        regions.iter().map(|r| r.language.clone()).collect()
    }

    /// Assemble the virtual document for one language. Regions of other
    /// languages are excluded; consecutive included regions are
    /// separated by one padding line mapped to no source.
    pub fn build(
        &self,
        doc_id: &str,
        language: &str,
        regions: &[SourceRegion],
        version: i32,
    ) -> Result<VirtualDocument, VdocError> {
        let mut text = String::new();
        let mut entries = Vec::new();
        let mut virtual_start = 0u32;
        let mut first = true;

        for region in regions.iter().filter(|r| r.language == language) {
            if !first {
                // Padding keeps blocks separated so the server never
                // glues two fragments into one statement.
                text.push('\n');
                entries.push(MapEntry {
                    virtual_start,
                    line_count: 1,
                    source: None,
                });
                virtual_start += 1;
            }
            first = false;

            let normalized = normalize(&region.text);
            let line_count = count_lines(&normalized);
            text.push_str(&normalized);
            entries.push(MapEntry {
                virtual_start,
                line_count,
                source: Some(EntrySource {
                    region: region.id,
                    cell: region.cell_index,
                    start_line: region.start_line,
                }),
            });
            virtual_start += line_count;
        }

        let uri = self.synthetic_uri(doc_id, language)?;
        let map = PositionMap::new(entries);
        debug_assert!(map.is_consistent());
        log::trace!(
            "built virtual document {} v{} ({} lines)",
            uri,
            version,
            map.total_lines()
        );
        Ok(VirtualDocument {
            uri,
            language: language.to_string(),
            version,
            text: Rope::from_str(&text),
            map,
        })
    }

    fn synthetic_uri(&self, doc_id: &str, language: &str) -> Result<Url, VdocError> {
        let ext = self
            .extensions
            .get(language)
            .map(|s| s.as_str())
            .unwrap_or("txt");
        let raw = format!("file:///{}/{}/{}.{}", self.root, doc_id, language, ext);
        Url::parse(&raw).map_err(|_| VdocError::InvalidUri(raw))
    }
}

fn normalize(text: &str) -> String {
    if text.is_empty() || text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{}\n", text)
    }
}

fn count_lines(text: &str) -> u32 {
    if text.is_empty() {
        0
    } else {
        text.lines().count() as u32
    }
}

fn join_lines(lines: &[&str], start: u32, end: u32) -> String {
    lines[start as usize..end as usize]
        .iter()
        .map(|l| format!("{}\n", l))
        .collect()
}

// src/vdoc/map.rs - Bidirectional translation between virtual and source coordinates

use super::region::RegionId;
use lsp_types::Position;
use std::collections::HashMap;

/// Where a run of virtual lines came from. `None` marks padding lines
/// inserted between regions; they have no source counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySource {
    pub region: RegionId,
    pub cell: usize,
    /// Line offset of the region inside its owning cell.
    pub start_line: u32,
}

/// One PositionMap entry: `line_count` virtual lines starting at
/// `virtual_start`, backed by `source` (or padding when `None`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry {
    pub virtual_start: u32,
    pub line_count: u32,
    pub source: Option<EntrySource>,
}

impl MapEntry {
    fn contains(&self, virtual_line: u32) -> bool {
        virtual_line >= self.virtual_start && virtual_line < self.virtual_start + self.line_count
    }
}

/// A position expressed in host-editor coordinates: a cell index plus a
/// line within that cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    pub region: RegionId,
    pub cell: usize,
    /// Line within the owning cell (region offset already applied).
    pub line: u32,
    pub character: u32,
}

/// Ordered sequence of (virtual range -> source range) entries.
///
/// Invariants: entries are sorted by `virtual_start`, non-overlapping,
/// and cover `[0, total_lines)` without gaps. Zero-length entries are
/// kept so empty regions stay addressable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionMap {
    entries: Vec<MapEntry>,
    by_region: HashMap<RegionId, usize>,
    total_lines: u32,
}

impl PositionMap {
    pub fn new(entries: Vec<MapEntry>) -> Self {
        let mut by_region = HashMap::new();
        let mut total_lines = 0;
        for (idx, entry) in entries.iter().enumerate() {
            if let Some(src) = entry.source {
                by_region.insert(src.region, idx);
            }
            total_lines = entry.virtual_start + entry.line_count;
        }
        Self {
            entries,
            by_region,
            total_lines,
        }
    }

    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    pub fn total_lines(&self) -> u32 {
        self.total_lines
    }

    pub fn entry_for_region(&self, region: RegionId) -> Option<&MapEntry> {
        self.by_region.get(&region).map(|&idx| &self.entries[idx])
    }

    /// Translate a virtual-document position into source coordinates.
    /// Returns `None` for padding lines and positions past the end.
    pub fn to_source(&self, pos: Position) -> Option<SourcePosition> {
        let idx = self
            .entries
            .partition_point(|e| e.virtual_start <= pos.line);
        // partition_point lands past every entry starting at or before the
        // line; zero-length entries share a start with their successor, so
        // scan back for the one that actually contains it.
        let entry = self.entries[..idx]
            .iter()
            .rev()
            .find(|e| e.contains(pos.line))?;
        let src = entry.source?;
        Some(SourcePosition {
            region: src.region,
            cell: src.cell,
            line: src.start_line + (pos.line - entry.virtual_start),
            character: pos.character,
        })
    }

    /// Translate source coordinates back into the virtual document.
    /// Returns `None` when the region is unknown or the line falls
    /// outside the region's span.
    pub fn to_virtual(&self, pos: &SourcePosition) -> Option<Position> {
        let entry = self.entry_for_region(pos.region)?;
        let src = entry.source?;
        let local = pos.line.checked_sub(src.start_line)?;
        if local >= entry.line_count {
            return None;
        }
        Some(Position {
            line: entry.virtual_start + local,
            character: pos.character,
        })
    }

    /// Translate a protocol range; both ends must resolve to the same
    /// region. An end that falls on the line just past the region maps
    /// to the region's last line with `character == u32::MAX`, meaning
    /// end-of-line; callers clamp to the actual line length.
    pub fn range_to_source(
        &self,
        range: lsp_types::Range,
    ) -> Option<(SourcePosition, SourcePosition)> {
        let start = self.to_source(range.start)?;
        // An exclusive range end can sit on the first line past the region
        // (character 0); pull it back onto the region's last line so both
        // ends resolve to the same cell.
        let end = self.to_source(range.end).or_else(|| {
            if range.end.character == 0 && range.end.line > 0 {
                self.to_source(Position {
                    line: range.end.line - 1,
                    character: u32::MAX,
                })
            } else {
                None
            }
        })?;
        if start.region != end.region {
            return None;
        }
        Some((start, end))
    }

    /// Shift every entry after `region` by `line_delta` and resize the
    /// region's own entry. Used by incremental edits; the map stays
    /// gap-free because the region's entry grows or shrinks by the same
    /// delta its successors shift.
    pub(crate) fn resize_region(&mut self, region: RegionId, new_line_count: u32) -> Option<i64> {
        let idx = *self.by_region.get(&region)?;
        let old = self.entries[idx].line_count;
        let delta = new_line_count as i64 - old as i64;
        self.entries[idx].line_count = new_line_count;
        for entry in &mut self.entries[idx + 1..] {
            entry.virtual_start = (entry.virtual_start as i64 + delta) as u32;
        }
        self.total_lines = (self.total_lines as i64 + delta) as u32;
        Some(delta)
    }

    /// Check the sorted / non-overlapping / gap-free invariants.
    pub fn is_consistent(&self) -> bool {
        let mut expected_start = 0;
        for entry in &self.entries {
            if entry.virtual_start != expected_start {
                return false;
            }
            expected_start += entry.line_count;
        }
        expected_start == self.total_lines
    }
}

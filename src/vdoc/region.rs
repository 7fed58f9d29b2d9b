// src/vdoc/region.rs - Source regions: contiguous single-language spans of real document text

/// Stable identifier for a source region within one generation of the
/// region list. Regions are replaced wholesale on every edit, so ids are
/// only meaningful against the PositionMap built from the same generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub u64);

/// A cell of the host document as reported by the host editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellSnapshot {
    pub index: usize,
    pub language: String,
    pub text: String,
}

/// A contiguous span of original text in one language.
///
/// `start_line` is the line offset of the span inside its owning cell:
/// zero for a whole-cell region, greater for a foreign block extracted
/// from the middle of a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRegion {
    pub id: RegionId,
    pub language: String,
    pub text: String,
    pub cell_index: usize,
    pub start_line: u32,
}

impl SourceRegion {
    /// Number of lines this region contributes to a virtual document.
    /// Empty regions contribute zero lines but still get a map entry.
    pub fn line_count(&self) -> u32 {
        if self.text.is_empty() {
            0
        } else {
            self.text.lines().count() as u32
        }
    }
}

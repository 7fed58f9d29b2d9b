// src/vdoc/mod.rs - Virtual document assembly and position mapping

pub mod builder;
pub mod extractor;
pub mod map;
pub mod region;

pub use builder::{DocumentEdit, VirtualDocument, VirtualDocumentBuilder};
pub use extractor::{CellMagicExtractor, ExtractedBlock, Extraction, Extractor, FenceExtractor};
pub use map::{MapEntry, PositionMap, SourcePosition};
pub use region::{CellSnapshot, RegionId, SourceRegion};

#[derive(thiserror::Error, Debug)]
pub enum VdocError {
    #[error("ambiguous extraction: {0}")]
    ExtractionAmbiguous(String),
    #[error("unknown region {0:?}")]
    UnknownRegion(region::RegionId),
    #[error("region boundary changed, full rebuild required")]
    BoundaryChanged,
    #[error("invalid synthetic uri: {0}")]
    InvalidUri(String),
}

// lib.rs - Library root for the cellbridge virtual-document LSP bridge

pub mod adapter;
pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod lsp;
pub mod vdoc;

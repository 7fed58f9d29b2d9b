// src/vdoc/extractor.rs - Foreign-code extraction from host-language cells

use super::VdocError;
use regex::Regex;
use std::collections::HashMap;

/// A foreign block recognized inside a host-language cell.
/// `start_line` is the block's first line within the cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedBlock {
    pub language: String,
    pub text: String,
    pub start_line: u32,
}

/// Outcome of running an extractor over one cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Nothing foreign found; the whole cell is host-language text.
    Host,
    /// The cell splits into foreign blocks; host-language lines outside
    /// the blocks (if any) stay with the host document.
    Foreign(Vec<ExtractedBlock>),
}

/// Recognizes foreign code embedded in a host-language cell.
///
/// Extractors are pure text scanners; an `ExtractionAmbiguous` error is
/// recovered by the builder, which falls back to treating the cell as
/// host-language text rather than failing the whole document.
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, text: &str) -> Result<Extraction, VdocError>;
}

/// Extracts cell-magic blocks: a first line of the form `%%name` marks
/// the rest of the cell as foreign code in the language `name` maps to.
pub struct CellMagicExtractor {
    magic_re: Regex,
    languages: HashMap<String, String>,
}

impl CellMagicExtractor {
    /// `languages` maps magic names (e.g. "sql") to language ids.
    /// Unmapped magics are left alone; the host sees the cell verbatim.
    pub fn new(languages: HashMap<String, String>) -> Self {
        Self {
            // Cell magics allow arguments after the name; only the name
            // selects the language.
            magic_re: Regex::new(r"^%%(\w+)(?:\s.*)?$").unwrap(),
            languages,
        }
    }
}

impl Extractor for CellMagicExtractor {
    fn name(&self) -> &str {
        "cell-magic"
    }

    fn extract(&self, text: &str) -> Result<Extraction, VdocError> {
        let mut lines = text.lines();
        let first = match lines.next() {
            Some(line) => line,
            None => return Ok(Extraction::Host),
        };
        let captures = match self.magic_re.captures(first) {
            Some(c) => c,
            None => return Ok(Extraction::Host),
        };
        let magic = &captures[1];
        let language = match self.languages.get(magic) {
            Some(lang) => lang.clone(),
            None => {
                log::trace!("cell magic %%{} has no language mapping", magic);
                return Ok(Extraction::Host);
            }
        };
        let body: String = lines.map(|l| format!("{}\n", l)).collect();
        Ok(Extraction::Foreign(vec![ExtractedBlock {
            language,
            text: body,
            start_line: 1,
        }]))
    }
}

/// Extracts fenced code blocks (```` ```lang ````) from markdown-style
/// cells. An unclosed or nested fence makes the cell ambiguous.
pub struct FenceExtractor {
    fence_re: Regex,
}

impl Default for FenceExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FenceExtractor {
    pub fn new() -> Self {
        Self {
            fence_re: Regex::new(r"^```\s*([A-Za-z0-9_+.-]*)\s*$").unwrap(),
        }
    }
}

impl Extractor for FenceExtractor {
    fn name(&self) -> &str {
        "fence"
    }

    fn extract(&self, text: &str) -> Result<Extraction, VdocError> {
        let mut blocks = Vec::new();
        let mut open: Option<(String, u32, Vec<&str>)> = None;
        for (line_no, line) in text.lines().enumerate() {
            match self.fence_re.captures(line) {
                Some(captures) => {
                    let info = captures[1].to_string();
                    match open.take() {
                        None => {
                            if info.is_empty() {
                                // An anonymous fence carries no language;
                                // nothing to extract, but it still must
                                // close before another one opens.
                                open = Some((String::new(), line_no as u32 + 1, Vec::new()));
                            } else {
                                open = Some((info, line_no as u32 + 1, Vec::new()));
                            }
                        }
                        Some((language, start_line, body)) => {
                            if !info.is_empty() {
                                // ```lang while a fence is already open
                                // reads as a nested fence.
                                return Err(VdocError::ExtractionAmbiguous(format!(
                                    "nested fence at line {}",
                                    line_no
                                )));
                            }
                            if !language.is_empty() {
                                let text: String =
                                    body.iter().map(|l| format!("{}\n", l)).collect();
                                blocks.push(ExtractedBlock {
                                    language,
                                    text,
                                    start_line,
                                });
                            }
                        }
                    }
                }
                None => {
                    if let Some((_, _, body)) = open.as_mut() {
                        body.push(line);
                    }
                }
            }
        }
        if open.is_some() {
            return Err(VdocError::ExtractionAmbiguous(
                "unclosed fence".to_string(),
            ));
        }
        if blocks.is_empty() {
            Ok(Extraction::Host)
        } else {
            Ok(Extraction::Foreign(blocks))
        }
    }
}

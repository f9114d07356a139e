//! Locates the header row of a report that may carry a metadata preamble.

/// Number of leading lines searched for a header row.
pub const HEADER_SCAN_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLocation {
    /// 1-based line number of the header row.
    pub line: usize,
    /// Byte offset of the header row within the text.
    pub offset: usize,
}

/// Finds the first line within `window` lines that contains every signature
/// token as a case-insensitive substring.
pub fn locate_header(text: &str, signature: &[String], window: usize) -> Option<HeaderLocation> {
    if signature.is_empty() {
        return None;
    }
    let mut offset = 0;
    for (idx, raw_line) in text.split_inclusive('\n').take(window).enumerate() {
        let lowered = raw_line.to_lowercase();
        if signature
            .iter()
            .all(|token| lowered.contains(token.to_lowercase().as_str()))
        {
            return Some(HeaderLocation {
                line: idx + 1,
                offset,
            });
        }
        offset += raw_line.len();
    }
    None
}

//! Splits decoded report text into rows of raw cells.
//!
//! Comma-delimited text goes through the `csv` crate with doubled-quote and
//! backslash escapes enabled, so quoted cells may contain delimiters, quotes
//! and line breaks. Tab-delimited text is a plain split on `\t` with no
//! quoting. Blank lines are skipped in both modes.

use std::fmt;

use crate::schema::Delimiter;

/// One physical record as it appeared in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based line number in the source file where the record starts.
    pub line: usize,
    pub cells: Vec<String>,
}

impl RawRow {
    fn is_blank(&self) -> bool {
        self.cells.iter().all(|cell| cell.trim().is_empty())
    }

    /// Cell count with trailing empty cells ignored.
    pub fn significant_len(&self) -> usize {
        self.cells
            .iter()
            .rposition(|cell| !cell.is_empty())
            .map_or(0, |idx| idx + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    /// Index of the offending record; 0 is the header.
    pub record: usize,
    pub line: usize,
    pub message: String,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for DecodeError {}

/// Decodes `body`, whose first line sits at 1-based `first_line` in the file.
/// The first returned row is the header.
pub fn decode(
    body: &str,
    delimiter: Delimiter,
    first_line: usize,
) -> Result<Vec<RawRow>, DecodeError> {
    match delimiter {
        Delimiter::Tab => Ok(decode_tabbed(body, first_line)),
        Delimiter::Comma => decode_quoted(body, first_line),
    }
}

fn decode_tabbed(body: &str, first_line: usize) -> Vec<RawRow> {
    body.lines()
        .enumerate()
        .map(|(idx, line)| RawRow {
            line: first_line + idx,
            cells: line.split('\t').map(str::to_string).collect(),
        })
        .filter(|row| !row.is_blank())
        .collect()
}

fn decode_quoted(body: &str, first_line: usize) -> Result<Vec<RawRow>, DecodeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b',')
        .double_quote(true)
        .escape(Some(b'\\'))
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.map_err(|err| DecodeError {
            record: rows.len(),
            line: err
                .position()
                .map_or(first_line + idx, |pos| first_line + pos.line() as usize - 1),
            message: err.to_string(),
        })?;
        let line = record
            .position()
            .map_or(first_line + idx, |pos| first_line + pos.line() as usize - 1);
        let row = RawRow {
            line,
            cells: record.iter().map(str::to_string).collect(),
        };
        if !row.is_blank() {
            rows.push(row);
        }
    }

    if let Some(open_line) = unterminated_quote_line(body) {
        let line = first_line + open_line - 1;
        let record = rows.iter().rposition(|row| row.line <= line).unwrap_or(0);
        return Err(DecodeError {
            record,
            line,
            message: "unterminated quoted field".to_string(),
        });
    }

    Ok(rows)
}

/// Returns the 1-based line of a quote that is opened but never closed.
/// Quotes only open at the start of a field, matching the reader.
fn unterminated_quote_line(body: &str) -> Option<usize> {
    let mut chars = body.chars().peekable();
    let mut line = 1;
    let mut open_line = 0;
    let mut in_quotes = false;
    let mut at_field_start = true;

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '\\' => {
                    if chars.next() == Some('\n') {
                        line += 1;
                    }
                }
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                    } else {
                        in_quotes = false;
                    }
                }
                '\n' => line += 1,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if at_field_start => {
                in_quotes = true;
                open_line = line;
                at_field_start = false;
            }
            ',' => at_field_start = true,
            '\n' => {
                line += 1;
                at_field_start = true;
            }
            '\r' => {}
            _ => at_field_start = false,
        }
    }

    in_quotes.then_some(open_line)
}

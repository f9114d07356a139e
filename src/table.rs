//! Plain-text table rendering for previews and schema listings.

use std::fmt::Write as _;

use itertools::Itertools;

use crate::record::CanonicalRecord;

const COLUMN_GAP: &str = "  ";
const MAX_CELL_WIDTH: usize = 40;

/// Renders an aligned table with a dashed rule under the header.
pub fn render_table<S: AsRef<str>>(headers: &[S], rows: &[Vec<String>]) -> String {
    let headers = headers.iter().map(|h| clean_cell(h.as_ref())).collect::<Vec<_>>();
    let rows = rows
        .iter()
        .map(|row| row.iter().map(|cell| clean_cell(cell)).collect::<Vec<_>>())
        .collect::<Vec<_>>();

    let widths = (0..headers.len())
        .map(|idx| {
            rows.iter()
                .filter_map(|row| row.get(idx))
                .chain(std::iter::once(&headers[idx]))
                .map(|cell| visible_width(cell))
                .max()
                .unwrap_or(0)
                .max(3)
        })
        .collect::<Vec<_>>();

    let mut output = String::new();
    let _ = writeln!(output, "{}", join_padded(&headers, &widths));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", join_padded(&rule, &widths));
    for row in &rows {
        let _ = writeln!(output, "{}", join_padded(row, &widths));
    }
    output
}

/// Renders up to `limit` records, one column per canonical key.
pub fn render_records(records: &[CanonicalRecord], limit: usize) -> String {
    let shown = &records[..limit.min(records.len())];
    let columns = shown
        .iter()
        .flat_map(|record| record.keys())
        .unique()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let rows = shown
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|key| record.get(key).map(|v| v.as_display()).unwrap_or_default())
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    render_table(&columns, &rows)
}

pub fn print_records(records: &[CanonicalRecord], limit: usize) {
    print!("{}", render_records(records, limit));
}

fn join_padded(cells: &[String], widths: &[usize]) -> String {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| {
            let padding = width.saturating_sub(visible_width(cell));
            format!("{cell}{}", " ".repeat(padding))
        })
        .join(COLUMN_GAP);
    line.trim_end().to_string()
}

/// Character count excluding ANSI colour sequences.
fn visible_width(value: &str) -> usize {
    let mut width = 0;
    let mut in_escape = false;
    for ch in value.chars() {
        match (in_escape, ch) {
            (false, '\u{1b}') => in_escape = true,
            (true, 'm') => in_escape = false,
            (true, _) => {}
            (false, _) => width += 1,
        }
    }
    width
}

/// Flattens control whitespace and truncates long values with an ellipsis.
fn clean_cell(value: &str) -> String {
    let flat = value
        .chars()
        .map(|ch| if matches!(ch, '\n' | '\r' | '\t') { ' ' } else { ch })
        .collect::<String>();
    if flat.chars().count() > MAX_CELL_WIDTH {
        let mut truncated = flat.chars().take(MAX_CELL_WIDTH - 1).collect::<String>();
        truncated.push('…');
        truncated
    } else {
        flat
    }
}

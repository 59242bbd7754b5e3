use crate::model::Record;
use anyhow::Context;
use serde_json::Value;
use std::path::Path;

/// Reads a CSV upload into one `Record` per data row, keyed by header.
pub fn load_table(path: &Path) -> anyhow::Result<Vec<Record>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    let text = String::from_utf8_lossy(&bytes);
    let rows = parse_table(&text);
    tracing::debug!(path = %path.display(), rows = rows.len(), "loaded table");
    Ok(rows)
}

/// First non-empty record is the header. Cells stay strings; the allocator
/// does its own conversion.
pub fn parse_table(text: &str) -> Vec<Record> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = split_records(text)
        .into_iter()
        .filter(|l| !l.trim().is_empty());
    let Some(header_line) = lines.next() else {
        return Vec::new();
    };
    let header = parse_csv_record(header_line)
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();

    let mut out = Vec::new();
    for line in lines {
        let fields = parse_csv_record(line);
        let mut rec = Record::new();
        for (col, cell) in header.iter().zip(fields) {
            if col.is_empty() {
                continue;
            }
            rec.insert(col.clone(), Value::String(cell.trim().to_string()));
        }
        out.push(rec);
    }
    out
}

/// Splits on line breaks outside quoted cells, so a quoted cell may span lines.
fn split_records(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, b) in text.bytes().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'\n' if !in_quotes => {
                out.push(text[start..i].strip_suffix('\r').unwrap_or(&text[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

pub fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                buf.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => out.push(std::mem::take(&mut buf)),
            _ => buf.push(ch),
        }
    }
    out.push(buf);
    out
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

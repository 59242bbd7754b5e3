use crate::error::AllocError;
use crate::model::{Assignment, OUTPUT_COLUMNS};
use crate::tabular::csv_quote;
use anyhow::Context;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const DEFAULT_OUTPUT_STEM: &str = "hall_allocation_with_benches";
const SHEET_NAME: &str = "Allocation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        ext.parse().ok()
    }

    pub fn default_file_name(self) -> String {
        format!("{}.{}", DEFAULT_OUTPUT_STEM, self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = AllocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            other => Err(AllocError::InvalidParam {
                field: "format",
                message: format!("expected csv or xlsx, got {other:?}"),
            }),
        }
    }
}

pub fn write_allocation(
    path: &Path,
    format: ExportFormat,
    rows: &[Assignment],
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    match format {
        ExportFormat::Csv => std::fs::write(path, render_csv(rows))
            .with_context(|| format!("failed to write {}", path.to_string_lossy()))?,
        ExportFormat::Xlsx => write_xlsx(path, rows)?,
    }
    tracing::info!(path = %path.display(), format = format.extension(), rows = rows.len(), "allocation exported");
    Ok(())
}

pub fn render_csv(rows: &[Assignment]) -> String {
    let mut csv = OUTPUT_COLUMNS.join(",");
    csv.push('\n');
    for row in rows {
        let cells = row.cells();
        let line = cells.iter().map(|c| csv_quote(c)).collect::<Vec<_>>().join(",");
        csv.push_str(&line);
        csv.push('\n');
    }
    csv
}

/// Single-sheet workbook with inline strings. Bench numbers are numeric cells.
pub fn write_xlsx(path: &Path, rows: &[Assignment]) -> anyhow::Result<()> {
    let out_file = File::create(path)
        .with_context(|| format!("failed to create output file {}", path.to_string_lossy()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let parts: [(&str, String); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", ROOT_RELS.to_string()),
        ("xl/workbook.xml", workbook_xml()),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.to_string()),
        ("xl/worksheets/sheet1.xml", sheet_xml(rows)),
    ];
    for (name, body) in parts {
        zip.start_file(name, opts)
            .with_context(|| format!("failed to start {name} entry"))?;
        zip.write_all(body.as_bytes())
            .with_context(|| format!("failed to write {name} entry"))?;
    }
    zip.finish().context("failed to finalize workbook")?;
    Ok(())
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

fn workbook_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        SHEET_NAME
    )
}

fn sheet_xml(rows: &[Assignment]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    push_row(&mut xml, 1, OUTPUT_COLUMNS.iter().map(|h| Cell::Text(*h)));
    for (i, row) in rows.iter().enumerate() {
        let bench = row.bench_number.to_string();
        let cells = [
            Cell::Text(&row.classroom_id),
            Cell::Number(&bench),
            Cell::Text(&row.reg_no),
            Cell::Text(&row.student_name),
            Cell::Text(&row.subject),
            Cell::Text(&row.year_of_study),
            Cell::Text(&row.teacher_name),
        ];
        push_row(&mut xml, i + 2, cells.into_iter());
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

enum Cell<'a> {
    Text(&'a str),
    Number(&'a str),
}

fn push_row<'a>(xml: &mut String, row_no: usize, cells: impl Iterator<Item = Cell<'a>>) {
    xml.push_str(&format!(r#"<row r="{row_no}">"#));
    for (col, cell) in cells.enumerate() {
        let r = format!("{}{}", column_letter(col), row_no);
        match cell {
            Cell::Text(s) => xml.push_str(&format!(
                r#"<c r="{r}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                xml_escape(s)
            )),
            Cell::Number(n) => xml.push_str(&format!(r#"<c r="{r}"><v>{n}</v></c>"#)),
        }
    }
    xml.push_str("</row>");
}

// Only seven columns are ever written.
fn column_letter(col: usize) -> char {
    (b'A' + col as u8) as char
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if (c as u32) < 0x20 && c != '\t' && c != '\n' && c != '\r' => {}
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(reg: &str, name: &str) -> Assignment {
        Assignment {
            classroom_id: "C1".into(),
            bench_number: 1,
            reg_no: reg.into(),
            student_name: name.into(),
            subject: "Math".into(),
            year_of_study: "2".into(),
            teacher_name: "Tom".into(),
        }
    }

    #[test]
    fn csv_has_fixed_header_order() {
        let csv = render_csv(&[row("R1", "Smith, Alice")]);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("Classroom,Bench Number,Reg No,Student Name,Subject,Year of Study,Teacher Name")
        );
        assert_eq!(lines.next(), Some("C1,1,R1,\"Smith, Alice\",Math,2,Tom"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn exported_csv_reads_back_with_multiline_cells() {
        let rows = [row("R1", "Alice\nSmith"), row("R2", "Bob \"B\", Jr.")];
        let table = crate::tabular::parse_table(&render_csv(&rows));
        assert_eq!(table.len(), 2);
        assert_eq!(table[0]["Student Name"], "Alice\nSmith");
        assert_eq!(table[0]["Teacher Name"], "Tom");
        assert_eq!(table[1]["Student Name"], "Bob \"B\", Jr.");
        assert_eq!(table[1]["Reg No"], "R2");
    }

    #[test]
    fn format_parsing_and_inference() {
        assert_eq!("CSV".parse::<ExportFormat>().ok(), Some(ExportFormat::Csv));
        assert_eq!("xlsx".parse::<ExportFormat>().ok(), Some(ExportFormat::Xlsx));
        assert!("pdf".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::from_path(Path::new("out/a.xlsx")), Some(ExportFormat::Xlsx));
        assert_eq!(ExportFormat::from_path(Path::new("noext")), None);
        assert_eq!(ExportFormat::Csv.default_file_name(), "hall_allocation_with_benches.csv");
    }

    #[test]
    fn sheet_escapes_text_and_keeps_bench_numeric() {
        let xml = sheet_xml(&[row("R<1>", "O'Neil & Co")]);
        assert!(xml.contains(r#"<c r="B2"><v>1</v></c>"#));
        assert!(xml.contains("R&lt;1&gt;"));
        assert!(xml.contains("O&apos;Neil &amp; Co"));
        assert!(xml.contains(r#"<row r="1">"#));
        assert!(xml.contains(r#"<c r="G1" t="inlineStr">"#));
    }
}

//! In-memory `.xlsx` builder for tests.

use std::io::{Cursor, Write};

use quick_xml::escape::escape;
use regex::Regex;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::types::ColumnLayout;

const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

#[derive(Debug, Clone)]
pub enum FixtureCell {
    Text(String),
    Number(f64),
    /// Shared string with formatted runs: `(text, struck)`.
    Rich(Vec<(String, bool)>),
    /// Shared string whose cell style has a struck font.
    StruckText(String),
    /// Inline string with formatted runs.
    Inline(Vec<(String, bool)>),
}

/// One row of the project list, filled positionally from column C.
#[derive(Debug, Clone, Default)]
pub struct MatterRowFixture {
    pub project_name: Option<String>,
    pub client_name: Option<String>,
    pub matter_number: Option<String>,
    pub attorney_in_charge: Option<String>,
    pub internal_code: Option<String>,
    pub fee_amount: Option<f64>,
    pub milestones: Vec<(String, bool)>,
    pub billing_to_date_usd: Option<f64>,
    pub collected_to_date_usd: Option<f64>,
    pub ar_usd: Option<f64>,
    pub finance_remarks: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorkbookFixture {
    sheet_name: String,
    cells: Vec<(u32, u32, FixtureCell)>,
    prefixed: bool,
}

impl Default for WorkbookFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkbookFixture {
    pub fn new() -> Self {
        WorkbookFixture {
            sheet_name: "Transactions".to_string(),
            cells: Vec::new(),
            prefixed: false,
        }
    }

    pub fn sheet_name(mut self, name: &str) -> Self {
        self.sheet_name = name.to_string();
        self
    }

    /// Place a cell at a 1-based row and 0-based column.
    pub fn cell(mut self, row: u32, col: u32, cell: FixtureCell) -> Self {
        self.cells.push((row, col, cell));
        self
    }

    /// Write every spreadsheetml part with an `x:` namespace prefix.
    pub fn prefixed(mut self) -> Self {
        self.prefixed = true;
        self
    }

    /// Fill a project-list row in the default layout.
    pub fn matter_row(mut self, row: u32, fields: MatterRowFixture) -> Self {
        let cols = ColumnLayout::starting_at(crate::types::DEFAULT_FIRST_COLUMN);
        let texts = [
            (cols.project_name, fields.project_name),
            (cols.client_name, fields.client_name),
            (cols.matter_number, fields.matter_number),
            (cols.attorney_in_charge, fields.attorney_in_charge),
            (cols.internal_code, fields.internal_code),
            (cols.finance_remarks, fields.finance_remarks),
        ];
        for (col, value) in texts {
            if let Some(v) = value {
                self.cells.push((row, col, FixtureCell::Text(v)));
            }
        }
        let numbers = [
            (cols.fee_amount, fields.fee_amount),
            (cols.billing_to_date_usd, fields.billing_to_date_usd),
            (cols.collected_to_date_usd, fields.collected_to_date_usd),
            (cols.ar_usd, fields.ar_usd),
        ];
        for (col, value) in numbers {
            if let Some(v) = value {
                self.cells.push((row, col, FixtureCell::Number(v)));
            }
        }
        if !fields.milestones.is_empty() {
            self.cells
                .push((row, cols.milestones, FixtureCell::Rich(fields.milestones)));
        }
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut shared: Vec<String> = Vec::new();
        let mut cells = self.cells.clone();
        cells.sort_by_key(|(row, col, _)| (*row, *col));

        let mut sheet_rows = String::new();
        let mut open_row: Option<u32> = None;
        for (row, col, cell) in &cells {
            if open_row != Some(*row) {
                if open_row.is_some() {
                    sheet_rows.push_str("</row>");
                }
                sheet_rows.push_str(&format!(r#"<row r="{}">"#, row));
                open_row = Some(*row);
            }
            let r = format!("{}{}", column_letters(*col), row);
            let xml = match cell {
                FixtureCell::Text(text) => {
                    shared.push(format!(r#"<si><t xml:space="preserve">{}</t></si>"#, escape(text)));
                    format!(r#"<c r="{}" t="s"><v>{}</v></c>"#, r, shared.len() - 1)
                }
                FixtureCell::StruckText(text) => {
                    shared.push(format!(r#"<si><t xml:space="preserve">{}</t></si>"#, escape(text)));
                    format!(r#"<c r="{}" s="1" t="s"><v>{}</v></c>"#, r, shared.len() - 1)
                }
                FixtureCell::Number(n) => format!(r#"<c r="{}"><v>{}</v></c>"#, r, n),
                FixtureCell::Rich(runs) => {
                    shared.push(format!("<si>{}</si>", rich_runs(runs)));
                    format!(r#"<c r="{}" t="s"><v>{}</v></c>"#, r, shared.len() - 1)
                }
                FixtureCell::Inline(runs) => {
                    format!(r#"<c r="{}" t="inlineStr"><is>{}</is></c>"#, r, rich_runs(runs))
                }
            };
            sheet_rows.push_str(&xml);
        }
        if open_row.is_some() {
            sheet_rows.push_str("</row>");
        }

        let sheet = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="{MAIN_NS}" xmlns:r="{REL_NS}"><sheetData>{sheet_rows}</sheetData></worksheet>"#
        );
        let shared_xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="{MAIN_NS}" count="{n}" uniqueCount="{n}">{body}</sst>"#,
            n = shared.len(),
            body = shared.concat()
        );
        let workbook = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="{MAIN_NS}" xmlns:r="{REL_NS}"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
            escape(&self.sheet_name)
        );
        let styles = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="{MAIN_NS}"><fonts count="2"><font><sz val="11"/><name val="Calibri"/></font><font><strike/><sz val="11"/><name val="Calibri"/></font></fonts><fills count="1"><fill><patternFill patternType="none"/></fill></fills><borders count="1"><border/></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/></cellXfs></styleSheet>"#
        );

        let ml = |xml: String| {
            if self.prefixed {
                prefix_spreadsheetml(&xml)
            } else {
                xml
            }
        };

        let parts: Vec<(&str, String)> = vec![
            ("[Content_Types].xml", CONTENT_TYPES.to_string()),
            ("_rels/.rels", ROOT_RELS.to_string()),
            ("xl/workbook.xml", ml(workbook)),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.to_string()),
            ("xl/styles.xml", ml(styles)),
            ("xl/sharedStrings.xml", ml(shared_xml)),
            ("xl/worksheets/sheet1.xml", ml(sheet)),
        ];

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in parts {
            zip.start_file(name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }
}

fn rich_runs(runs: &[(String, bool)]) -> String {
    runs.iter()
        .map(|(text, struck)| {
            let rpr = if *struck {
                r#"<rPr><strike/><sz val="11"/></rPr>"#
            } else {
                r#"<rPr><sz val="11"/></rPr>"#
            };
            format!(r#"<r>{}<t xml:space="preserve">{}</t></r>"#, rpr, escape(text))
        })
        .collect()
}

/// Rewrite an unprefixed spreadsheetml part the way some exporters write it.
pub fn prefix_spreadsheetml(xml: &str) -> String {
    let tags = Regex::new(r"<(/?)([A-Za-z])").unwrap();
    tags.replace_all(xml, "<${1}x:${2}")
        .replace(&format!(r#"xmlns="{}""#, MAIN_NS), &format!(r#"xmlns:x="{}""#, MAIN_NS))
}

/// `0 -> A`, `25 -> Z`, `26 -> AA`.
pub fn column_letters(col: u32) -> String {
    let mut n = col + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        letters.push((b'A' + rem) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/><Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/></Relationships>"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(8), "I");
        assert_eq!(column_letters(26), "AA");
    }
}

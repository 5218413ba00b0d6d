//! Worksheet access for the project list.
//!
//! Cell values come from calamine. Calamine flattens rich text, so the
//! columns whose formatting matters (the milestone column) are re-read from
//! the package XML with quick-xml: shared strings keep their runs, inline
//! strings are read from the sheet, and cell-level font strike comes from
//! `styles.xml` through the cell's `s` (cellXfs) index.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::OnceLock;

use calamine::{Data, Range, Reader, Xlsx};
use chrono::NaiveDate;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;
use regex::{Captures, Regex};
use zip::result::ZipError;
use zip::ZipArchive;

use super::milestones::StyledRun;
use crate::error::SyncError;

/// One worksheet: values for every cell, formatted runs for selected columns.
pub struct SheetGrid {
    pub sheet_name: String,
    values: Range<Data>,
    rich: HashMap<(u32, u32), Vec<StyledRun>>,
}

impl SheetGrid {
    /// Value at a 0-based absolute `(row, col)`.
    pub fn value(&self, row: u32, col: u32) -> Option<&Data> {
        self.values.get_value((row, col))
    }

    /// Trimmed display text of a cell, `None` when blank.
    pub fn text(&self, row: u32, col: u32) -> Option<String> {
        let text = match self.value(row, col)? {
            Data::Empty | Data::Error(_) => return None,
            Data::String(s) => s.trim().to_string(),
            Data::Float(f) => format_number(*f),
            Data::Int(n) => n.to_string(),
            Data::Bool(b) => b.to_string(),
            Data::DateTime(dt) => match excel_serial_date(dt.as_f64()) {
                Some(d) => d.format("%Y-%m-%d").to_string(),
                None => format_number(dt.as_f64()),
            },
            Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Formatted runs of a cell. Columns not read for formatting yield the
    /// plain text as a single unstruck run.
    pub fn runs(&self, row: u32, col: u32) -> Vec<StyledRun> {
        if let Some(runs) = self.rich.get(&(row, col)) {
            return runs.clone();
        }
        match self.value(row, col) {
            Some(Data::String(s)) if !s.is_empty() => vec![StyledRun::new(s.clone(), false)],
            _ => match self.text(row, col) {
                Some(t) => vec![StyledRun::new(t, false)],
                None => Vec::new(),
            },
        }
    }

    /// Last 0-based row holding any value.
    pub fn last_row(&self) -> Option<u32> {
        self.values.end().map(|(row, _)| row)
    }
}

/// Integral floats print without a fractional part (matter numbers are
/// sometimes typed as numbers).
pub(crate) fn format_number(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

/// Date part of an Excel 1900-system serial.
pub(crate) fn excel_serial_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    // Day 0 is 1899-12-30 once the phantom 1900-02-29 is accounted for.
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(chrono::Duration::days(serial.trunc() as i64))
}

/// Open the worksheet named `preferred`, or the first sheet when it is absent,
/// reading formatted runs for `rich_columns`.
pub fn open_sheet(
    bytes: &[u8],
    preferred: Option<&str>,
    rich_columns: &[u32],
) -> Result<SheetGrid, SyncError> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))?;
    let names = workbook.sheet_names();
    let sheet_name = match preferred {
        Some(want) if names.iter().any(|n| n == want) => want.to_string(),
        _ => {
            let first = names
                .first()
                .cloned()
                .ok_or_else(|| SyncError::SheetNotFound("workbook has no worksheets".into()))?;
            if let Some(want) = preferred {
                log::warn!("Sheet '{}' not found, reading '{}' instead", want, first);
            }
            first
        }
    };
    let values = workbook.worksheet_range(&sheet_name)?;

    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let rich = read_rich_cells(&mut archive, &sheet_name, rich_columns)?;

    Ok(SheetGrid {
        sheet_name,
        values,
        rich,
    })
}

// =============================================================================
// Package XML
// =============================================================================

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

/// A run as stored: `strike` is `None` when the run has no explicit setting.
#[derive(Debug, Clone, Default, PartialEq)]
struct RawRun {
    text: String,
    strike: Option<bool>,
}

/// Font strike flags and the cellXfs -> font mapping.
#[derive(Debug, Default)]
struct StyleTable {
    font_struck: Vec<bool>,
    xf_font: Vec<usize>,
}

impl StyleTable {
    fn xf_struck(&self, xf: usize) -> bool {
        self.xf_font
            .get(xf)
            .and_then(|font| self.font_struck.get(*font))
            .copied()
            .unwrap_or(false)
    }
}

fn read_part(archive: &mut Archive<'_>, path: &str) -> Result<Option<String>, SyncError> {
    let mut file = match archive.by_name(path) {
        Ok(f) => f,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    Ok(Some(buf))
}

fn read_rich_cells(
    archive: &mut Archive<'_>,
    sheet_name: &str,
    rich_columns: &[u32],
) -> Result<HashMap<(u32, u32), Vec<StyledRun>>, SyncError> {
    if rich_columns.is_empty() {
        return Ok(HashMap::new());
    }
    let styles = match read_part(archive, "xl/styles.xml")? {
        Some(xml) => parse_styles(&xml)?,
        None => StyleTable::default(),
    };
    let shared = match read_part(archive, "xl/sharedStrings.xml")? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };
    let sheet_path = resolve_sheet_path(archive, sheet_name)?;
    let sheet_xml = read_part(archive, &sheet_path)?
        .ok_or_else(|| SyncError::SheetNotFound(format!("{} ({})", sheet_name, sheet_path)))?;
    parse_sheet_cells(&sheet_xml, &sheet_path, rich_columns, &styles, &shared)
}

/// Map a sheet's display name to its part path via workbook.xml and its rels.
fn resolve_sheet_path(archive: &mut Archive<'_>, sheet_name: &str) -> Result<String, SyncError> {
    let workbook_xml = read_part(archive, "xl/workbook.xml")?
        .ok_or_else(|| SyncError::xml("xl/workbook.xml", "missing part"))?;
    let rel_id = parse_sheet_rel_id(&workbook_xml, sheet_name)?
        .ok_or_else(|| SyncError::SheetNotFound(sheet_name.to_string()))?;
    let rels_xml = read_part(archive, "xl/_rels/workbook.xml.rels")?
        .ok_or_else(|| SyncError::xml("xl/_rels/workbook.xml.rels", "missing part"))?;
    let target = parse_rel_target(&rels_xml, &rel_id)?
        .ok_or_else(|| SyncError::SheetNotFound(format!("{} ({})", sheet_name, rel_id)))?;
    Ok(match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    })
}

fn attr_value(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// `<strike/>` and `<strike val="1"/>` are on; `val="0"`/`"false"` is off.
fn strike_flag(e: &BytesStart<'_>) -> bool {
    !matches!(attr_value(e, b"val").as_deref(), Some("0") | Some("false"))
}

fn parse_sheet_rel_id(xml: &str, sheet_name: &str) -> Result<Option<String>, SyncError> {
    let mut reader = XmlReader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e) | Event::Empty(ref e)) if e.local_name().as_ref() == b"sheet" => {
                if attr_value(e, b"name").as_deref() == Some(sheet_name) {
                    return Ok(attr_value(e, b"id"));
                }
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(SyncError::xml("xl/workbook.xml", e)),
            _ => {}
        }
    }
}

fn parse_rel_target(xml: &str, rel_id: &str) -> Result<Option<String>, SyncError> {
    let mut reader = XmlReader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e) | Event::Empty(ref e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if attr_value(e, b"Id").as_deref() == Some(rel_id) {
                    return Ok(attr_value(e, b"Target"));
                }
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(SyncError::xml("xl/_rels/workbook.xml.rels", e)),
            _ => {}
        }
    }
}

fn parse_styles(xml: &str) -> Result<StyleTable, SyncError> {
    let mut reader = XmlReader::from_str(xml);
    let mut table = StyleTable::default();
    let mut in_fonts = false;
    let mut in_cell_xfs = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"fonts" => in_fonts = true,
                b"cellXfs" => in_cell_xfs = true,
                b"font" if in_fonts => table.font_struck.push(false),
                b"xf" if in_cell_xfs => table.xf_font.push(font_id(e)),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"font" if in_fonts => table.font_struck.push(false),
                b"strike" if in_fonts => {
                    if let Some(last) = table.font_struck.last_mut() {
                        *last = strike_flag(e);
                    }
                }
                b"xf" if in_cell_xfs => table.xf_font.push(font_id(e)),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"fonts" => in_fonts = false,
                b"cellXfs" => in_cell_xfs = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(SyncError::xml("xl/styles.xml", e)),
            _ => {}
        }
    }
    Ok(table)
}

fn font_id(e: &BytesStart<'_>) -> usize {
    attr_value(e, b"fontId")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn ooxml_escape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_x([0-9A-Fa-f]{4})_").unwrap())
}

/// Decode the `_xHHHH_` escapes Excel writes for control characters in
/// string text (`_x000D_` is a carriage return, `_x005F_` a literal `_`).
/// Escapes that do not name a valid char are kept verbatim.
pub(crate) fn decode_ooxml_escapes(s: &str) -> Cow<'_, str> {
    if !s.contains("_x") {
        return Cow::Borrowed(s);
    }
    ooxml_escape_re().replace_all(s, |caps: &Captures<'_>| {
        u32::from_str_radix(&caps[1], 16)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    })
}

/// Collects the runs of one `<si>` or `<is>` element.
#[derive(Default)]
struct RunCollector {
    runs: Vec<RawRun>,
    in_run: bool,
    in_text: bool,
    in_phonetic: bool,
    strike: Option<bool>,
    text: String,
}

impl RunCollector {
    fn start(&mut self, e: &BytesStart<'_>) {
        match e.local_name().as_ref() {
            b"r" => {
                self.in_run = true;
                self.strike = None;
                self.text.clear();
            }
            b"rPh" => self.in_phonetic = true,
            b"t" if !self.in_phonetic => self.in_text = true,
            _ => {}
        }
    }

    fn empty(&mut self, e: &BytesStart<'_>) {
        if self.in_run && e.local_name().as_ref() == b"strike" {
            self.strike = Some(strike_flag(e));
        }
    }

    fn text(&mut self, s: &str) {
        if self.in_text {
            self.text.push_str(&decode_ooxml_escapes(s));
        }
    }

    fn end(&mut self, local: &[u8]) {
        match local {
            b"t" if self.in_text => {
                self.in_text = false;
                if !self.in_run {
                    self.runs.push(RawRun {
                        text: std::mem::take(&mut self.text),
                        strike: None,
                    });
                }
            }
            b"r" => {
                self.in_run = false;
                self.runs.push(RawRun {
                    text: std::mem::take(&mut self.text),
                    strike: self.strike.take(),
                });
            }
            b"rPh" => self.in_phonetic = false,
            _ => {}
        }
    }

    fn finish(self) -> Vec<RawRun> {
        self.runs
    }
}

fn parse_shared_strings(xml: &str) -> Result<Vec<Vec<RawRun>>, SyncError> {
    let mut reader = XmlReader::from_str(xml);
    let mut strings = Vec::new();
    let mut current: Option<RunCollector> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if e.local_name().as_ref() == b"si" {
                    current = Some(RunCollector::default());
                } else if let Some(c) = current.as_mut() {
                    c.start(e);
                }
            }
            Ok(Event::Empty(ref e)) => {
                if e.local_name().as_ref() == b"si" {
                    strings.push(Vec::new());
                } else if let Some(c) = current.as_mut() {
                    c.empty(e);
                }
            }
            Ok(Event::Text(ref t)) => {
                if let Some(c) = current.as_mut() {
                    let s = t
                        .unescape()
                        .map_err(|e| SyncError::xml("xl/sharedStrings.xml", e))?;
                    c.text(&s);
                }
            }
            Ok(Event::End(ref e)) => {
                if e.local_name().as_ref() == b"si" {
                    if let Some(c) = current.take() {
                        strings.push(c.finish());
                    }
                } else if let Some(c) = current.as_mut() {
                    c.end(e.local_name().as_ref());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SyncError::xml("xl/sharedStrings.xml", e)),
            _ => {}
        }
    }
    Ok(strings)
}

/// Parse an `A1`-style reference into 0-based `(row, col)`.
pub(crate) fn parse_cell_ref(cell_ref: &str) -> Option<(u32, u32)> {
    let split = cell_ref.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = cell_ref.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let col = letters
        .chars()
        .try_fold(0u32, |acc, c| {
            acc.checked_mul(26)?
                .checked_add(c.to_ascii_uppercase() as u32 - 'A' as u32 + 1)
        })?
        .checked_sub(1)?;
    let row = digits.parse::<u32>().ok()?.checked_sub(1)?;
    Some((row, col))
}

/// A cell of a formatted column while its children are being read.
struct CellCapture {
    pos: (u32, u32),
    cell_type: Option<String>,
    struck: bool,
    value: String,
    in_value: bool,
    inline: Option<RunCollector>,
}

impl CellCapture {
    fn resolve(self, shared: &[Vec<RawRun>]) -> Vec<StyledRun> {
        let raw: Vec<RawRun> = match self.cell_type.as_deref() {
            Some("s") => self
                .value
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| shared.get(i))
                .cloned()
                .unwrap_or_default(),
            Some("inlineStr") => self.inline.map(RunCollector::finish).unwrap_or_default(),
            _ if self.value.is_empty() => Vec::new(),
            _ => vec![RawRun {
                text: decode_ooxml_escapes(&self.value).into_owned(),
                strike: None,
            }],
        };
        let cell_struck = self.struck;
        raw.into_iter()
            .filter(|r| !r.text.is_empty())
            .map(|r| StyledRun {
                struck: r.strike.unwrap_or(cell_struck),
                text: r.text,
            })
            .collect()
    }
}

fn parse_sheet_cells(
    xml: &str,
    part: &str,
    columns: &[u32],
    styles: &StyleTable,
    shared: &[Vec<RawRun>],
) -> Result<HashMap<(u32, u32), Vec<StyledRun>>, SyncError> {
    let mut reader = XmlReader::from_str(xml);
    let mut cells = HashMap::new();
    let mut current: Option<CellCapture> = None;
    // Fallback positions for cells written without an `r` attribute.
    let mut row_idx: u32 = 0;
    let mut next_col: u32 = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"row" => {
                    row_idx = attr_value(e, b"r")
                        .and_then(|r| r.parse::<u32>().ok())
                        .and_then(|r| r.checked_sub(1))
                        .unwrap_or(row_idx);
                    next_col = 0;
                }
                b"c" => {
                    let pos = attr_value(e, b"r")
                        .and_then(|r| parse_cell_ref(&r))
                        .unwrap_or((row_idx, next_col));
                    next_col = pos.1 + 1;
                    if columns.contains(&pos.1) {
                        current = Some(CellCapture {
                            pos,
                            cell_type: attr_value(e, b"t"),
                            struck: attr_value(e, b"s")
                                .and_then(|s| s.parse::<usize>().ok())
                                .map(|xf| styles.xf_struck(xf))
                                .unwrap_or(false),
                            value: String::new(),
                            in_value: false,
                            inline: None,
                        });
                    }
                }
                b"v" => {
                    if let Some(c) = current.as_mut() {
                        c.in_value = true;
                    }
                }
                b"is" => {
                    if let Some(c) = current.as_mut() {
                        c.inline = Some(RunCollector::default());
                    }
                }
                _ => {
                    if let Some(inline) = current.as_mut().and_then(|c| c.inline.as_mut()) {
                        inline.start(e);
                    }
                }
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"row" => {
                    row_idx += 1;
                }
                b"c" => {
                    next_col = attr_value(e, b"r")
                        .and_then(|r| parse_cell_ref(&r))
                        .map(|(_, col)| col + 1)
                        .unwrap_or(next_col + 1);
                }
                _ => {
                    if let Some(inline) = current.as_mut().and_then(|c| c.inline.as_mut()) {
                        inline.empty(e);
                    }
                }
            },
            Ok(Event::Text(ref t)) => {
                if let Some(c) = current.as_mut() {
                    let s = t.unescape().map_err(|e| SyncError::xml(part, e))?;
                    if c.in_value {
                        c.value.push_str(&s);
                    } else if let Some(inline) = c.inline.as_mut() {
                        inline.text(&s);
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"c" => {
                    if let Some(c) = current.take() {
                        let pos = c.pos;
                        let runs = c.resolve(shared);
                        if !runs.is_empty() {
                            cells.insert(pos, runs);
                        }
                    }
                }
                b"row" => {
                    row_idx += 1;
                }
                b"v" => {
                    if let Some(c) = current.as_mut() {
                        c.in_value = false;
                    }
                }
                local => {
                    if let Some(inline) = current.as_mut().and_then(|c| c.inline.as_mut()) {
                        inline.end(local);
                    }
                }
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(SyncError::xml(part, e)),
            _ => {}
        }
    }
    Ok(cells)
}

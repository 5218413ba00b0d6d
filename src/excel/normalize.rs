//! Namespace-prefix normalization of the `.xlsx` container.
//!
//! Some exporters write spreadsheetml with a bound prefix
//! (`<x:worksheet xmlns:x="...spreadsheetml/2006/main">`). The workbook
//! reader expects default-namespace elements, so every `.xml`/`.rels` part
//! bound to that namespace through a prefix is rewritten: the prefix is
//! stripped from tag names and the declaration becomes the default
//! namespace. Other entries are copied raw.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::SyncError;

pub const SPREADSHEETML_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";

fn prefix_decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"xmlns:([A-Za-z_][\w.\-]*)\s*=\s*["']http://schemas\.openxmlformats\.org/spreadsheetml/2006/main["']"#,
        )
        .unwrap()
    })
}

fn default_decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"\sxmlns\s*=\s*["']http://schemas\.openxmlformats\.org/spreadsheetml/2006/main["']"#,
        )
        .unwrap()
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^<>]+>").unwrap())
}

/// Rewrite a prefixed container. Returns the input untouched when no part
/// needs it.
pub fn normalize_workbook(bytes: &[u8]) -> Result<Cow<'_, [u8]>, SyncError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let mut rewritten: HashMap<usize, String> = HashMap::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = file.name().to_string();
        if !(name.ends_with(".xml") || name.ends_with(".rels")) {
            continue;
        }
        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;
        let Ok(text) = String::from_utf8(raw) else {
            log::debug!("Skipping non-UTF-8 part {}", name);
            continue;
        };
        if let Some(normalized) = normalize_part(&text) {
            log::debug!("Stripped spreadsheetml prefix from {}", name);
            rewritten.insert(i, normalized);
        }
    }

    if rewritten.is_empty() {
        return Ok(Cow::Borrowed(bytes));
    }
    log::info!("Normalizing {} prefixed workbook part(s)", rewritten.len());

    let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(bytes.len())));
    for i in 0..archive.len() {
        match rewritten.remove(&i) {
            Some(text) => {
                let file = archive.by_index_raw(i)?;
                let name = file.name().to_string();
                let options =
                    SimpleFileOptions::default().compression_method(file.compression());
                drop(file);
                writer.start_file(name, options)?;
                writer.write_all(text.as_bytes())?;
            }
            None => {
                let file = archive.by_index_raw(i)?;
                writer.raw_copy_file(file)?;
            }
        }
    }
    Ok(Cow::Owned(writer.finish()?.into_inner()))
}

/// Strip the spreadsheetml prefix from one part. `None` when unprefixed.
pub fn normalize_part(xml: &str) -> Option<String> {
    let prefixes: Vec<String> = prefix_decl_re()
        .captures_iter(xml)
        .map(|c| c[1].to_string())
        .collect();
    if prefixes.is_empty() {
        return None;
    }

    let strip: Vec<Regex> = prefixes
        .iter()
        .filter_map(|p| Regex::new(&format!(r"(^</?|\s){}:", regex::escape(p))).ok())
        .collect();

    let out = tag_re().replace_all(xml, |caps: &Captures<'_>| {
        let tag = &caps[0];
        if tag.starts_with("<?") || tag.starts_with("<!") {
            return tag.to_string();
        }
        let mut tag = strip
            .iter()
            .fold(tag.to_string(), |t, re| re.replace_all(&t, "${1}").into_owned());

        if prefix_decl_re().is_match(&tag) {
            // One default declaration per element; drop the rest.
            let mut has_default = default_decl_re().is_match(&tag);
            tag = prefix_decl_re()
                .replace_all(&tag, |_: &Captures<'_>| {
                    if has_default {
                        String::new()
                    } else {
                        has_default = true;
                        format!(r#"xmlns="{}""#, SPREADSHEETML_NS)
                    }
                })
                .into_owned();
            tag = tag.replace("  ", " ").replace(" >", ">").replace(" />", "/>");
        }
        tag
    });
    Some(out.into_owned())
}

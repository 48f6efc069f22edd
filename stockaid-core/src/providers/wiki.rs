//! Best-effort parser for MediaWiki table source.
//!
//! Index membership pages are fetched in edit mode; the raw wikitext lives in
//! `textarea#wpTextbox1`. Rows are separated by `|-`, header cells by `!!` and
//! data cells by `||` (or one cell per line). Link and template markup is
//! unwrapped to its display text.

use scraper::{Html, Selector};

use crate::error::ApiError;

/// A parsed wiki table: header names and string rows (padded to header width).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl WikiTable {
    /// Index of the first column whose (case-insensitive) name is one of `names`.
    pub fn find_column(&self, names: &[&str]) -> Option<usize> {
        self.columns.iter().position(|c| {
            let c = c.trim();
            names.iter().any(|n| c.eq_ignore_ascii_case(n))
        })
    }
}

/// Pull the wikitext out of an edit page.
pub fn extract_source(html: &str) -> Result<String, ApiError> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("textarea#wpTextbox1")
        .map_err(|e| ApiError::DataFormat(format!("bad selector: {e}")))?;
    document
        .select(&selector)
        .next()
        .map(|node| node.text().collect::<String>())
        .ok_or_else(|| ApiError::DataFormat("edit page has no wpTextbox1 textarea".into()))
}

/// Parse the first `wikitable` in `source`.
pub fn parse_table(source: &str) -> Result<WikiTable, ApiError> {
    let start = source.find("wikitable").unwrap_or(0);
    let body = &source[start..];
    let body = &body[..body.find("\n|}").unwrap_or(body.len())];

    let mut segments = body.split("\n|-").skip(1);
    let header = segments
        .next()
        .ok_or_else(|| ApiError::DataFormat("wiki table has no rows".into()))?;

    let columns: Vec<String> = row_cells(header);
    if columns.is_empty() {
        return Err(ApiError::DataFormat("wiki table has no header".into()));
    }

    let rows = segments
        .map(row_cells)
        .filter(|cells| !cells.is_empty())
        .map(|mut cells| {
            cells.resize(columns.len(), String::new());
            cells
        })
        .collect();

    Ok(WikiTable { columns, rows })
}

/// Split one row segment into cleaned cells.
fn row_cells(segment: &str) -> Vec<String> {
    let mut cells: Vec<String> = Vec::new();
    // The first line is the remainder of the `|-` marker (row attributes).
    for line in segment.lines().skip(1) {
        let line = line.trim_end();
        let (marker, rest) = match line.chars().next() {
            Some('!') => ("!!", &line[1..]),
            Some('|') => ("||", &line[1..]),
            _ => {
                // Continuation of the previous cell.
                if let Some(last) = cells.last_mut() {
                    last.push(' ');
                    last.push_str(line.trim());
                }
                continue;
            }
        };
        for raw in split_top_level(rest, marker) {
            cells.push(raw.to_string());
        }
        // Header cells in data rows (`! scope="row" | ...`) may also use `||`.
        if marker == "!!" {
            let last = cells.pop().unwrap_or_default();
            cells.extend(split_top_level(&last, "||").into_iter().map(str::to_string));
        }
    }
    cells.iter().map(|c| clean_cell(c)).collect()
}

/// Split on `delim` outside of `[[...]]` and `{{...}}`.
fn split_top_level<'a>(s: &'a str, delim: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut last = 0;
    let mut i = 0;
    let bytes = s.as_bytes();
    while i < bytes.len() {
        let rest = &s[i..];
        if rest.starts_with("[[") || rest.starts_with("{{") {
            depth += 1;
            i += 2;
        } else if rest.starts_with("]]") || rest.starts_with("}}") {
            depth = (depth - 1).max(0);
            i += 2;
        } else if depth == 0 && rest.starts_with(delim) {
            parts.push(&s[last..i]);
            i += delim.len();
            last = i;
        } else {
            i += rest.chars().next().map_or(1, char::len_utf8);
        }
    }
    parts.push(&s[last..]);
    parts
}

/// Strip attributes, references and markup from a cell.
fn clean_cell(raw: &str) -> String {
    let mut cell = raw.to_string();

    // `attr="x" | content`: keep the content.
    let pieces = split_top_level(&cell, "|");
    if pieces.len() > 1 {
        cell = pieces[pieces.len() - 1].to_string();
    }

    if let Some(pos) = cell.find("<ref") {
        cell.truncate(pos);
    }
    let cell = strip_tags(&cell);
    let cell = unwrap_links(&cell);
    let cell = unwrap_templates(&cell);
    let cell = unwrap_external_links(&cell);
    cell.replace("'''", "")
        .replace("''", "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// `[[target|text]]` -> `text`, `[[target]]` -> `target`.
fn unwrap_links(s: &str) -> String {
    replace_delimited(s, "[[", "]]", |inner| {
        inner.rsplit('|').next().unwrap_or(inner).to_string()
    })
}

/// `{{name|arg}}` -> `arg`, `{{name}}` -> `name`.
fn unwrap_templates(s: &str) -> String {
    replace_delimited(s, "{{", "}}", |inner| match inner.split_once('|') {
        Some((_, args)) => args.split('|').next().unwrap_or(args).to_string(),
        None => inner.to_string(),
    })
}

/// `[url text]` -> `text`, `[url]` -> `url`.
fn unwrap_external_links(s: &str) -> String {
    replace_delimited(s, "[", "]", |inner| match inner.split_once(' ') {
        Some((_, text)) => text.to_string(),
        None => inner.to_string(),
    })
}

fn replace_delimited(s: &str, open: &str, close: &str, f: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find(open) {
        let after = &rest[start + open.len()..];
        match after.find(close) {
            Some(end) => {
                out.push_str(&rest[..start]);
                out.push_str(&f(&after[..end]));
                rest = &after[end + close.len()..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

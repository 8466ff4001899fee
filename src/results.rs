//! Search hits: lenient decoding, path resolution and file grouping.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, trace};

/// Delimiter of composite identifiers (`owner/repo::path::suffix`).
const IDENTIFIER_DELIMITER: &str = "::";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultKind {
    Symbol,
    Chunk,
    File,
    Folder,
    /// Anything the backend adds later; echoed back unchanged.
    Other(String),
}

impl ResultKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Symbol" => Self::Symbol,
            "Chunk" => Self::Chunk,
            "File" => Self::File,
            "Folder" => Self::Folder,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Symbol => "Symbol",
            Self::Chunk => "Chunk",
            Self::File => "File",
            Self::Folder => "Folder",
            Self::Other(s) => s,
        }
    }
}

/// Inclusive, source-native line numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatchRecord {
    pub kind: Option<ResultKind>,
    pub location_path: Option<String>,
    pub identifier: Option<String>,
    pub line_range: Option<LineRange>,
    pub content: Option<String>,
    pub snippet: Option<String>,
    /// Carried through untouched; never used for ordering.
    pub score: Option<f64>,
}

impl MatchRecord {
    pub fn is_folder(&self) -> bool {
        self.kind == Some(ResultKind::Folder)
    }

    /// Text to inline for this record: `content` wins over `snippet`.
    pub fn text(&self) -> Option<&str> {
        self.content
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.snippet.as_deref().filter(|s| !s.is_empty()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

// Every field decodes on its own: an off-type value clears that field and
// never costs the whole record.

#[derive(Deserialize)]
struct RawResult {
    #[serde(default, deserialize_with = "lenient")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    identifier: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    location: Option<RawLocation>,
    #[serde(default, deserialize_with = "lenient")]
    content: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    snippet: Option<String>,
    #[serde(default, deserialize_with = "lenient_score")]
    score: Option<f64>,
}

#[derive(Deserialize)]
struct RawLocation {
    #[serde(default, deserialize_with = "lenient")]
    path: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    range: Option<RawRange>,
}

#[derive(Deserialize)]
struct RawRange {
    #[serde(default, deserialize_with = "lenient")]
    start: Option<RawPosition>,
    #[serde(default, deserialize_with = "lenient")]
    end: Option<RawPosition>,
}

#[derive(Deserialize)]
struct RawPosition {
    #[serde(default, deserialize_with = "lenient_line")]
    line: Option<i64>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Numbers, or numeric strings such as `"0.9"`.
fn lenient_score<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Integers, or floats with no fractional part (`10.0`).
fn lenient_line<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
            .map(|f| f as i64)
    }))
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

impl From<RawResult> for MatchRecord {
    fn from(raw: RawResult) -> Self {
        let (location_path, range) = match raw.location {
            Some(loc) => (non_empty(loc.path), loc.range),
            None => (None, None),
        };
        // Only a complete start/end pair counts as a range.
        let line_range = range.and_then(|r| {
            let start = r.start?.line?;
            let end = r.end?.line?;
            Some(LineRange { start, end })
        });
        Self {
            kind: non_empty(raw.kind).map(|k| ResultKind::parse(&k)),
            location_path,
            identifier: non_empty(raw.identifier),
            line_range,
            content: raw.content,
            snippet: raw.snippet,
            score: raw.score,
        }
    }
}

/// Extracts the `results` array of a search response.
///
/// A body that is not an object, or has no `results` array, yields nothing.
/// Elements that are not objects are skipped one by one.
pub fn parse_results(body: &Value) -> Vec<MatchRecord> {
    let Some(items) = body.get("results").and_then(Value::as_array) else {
        debug!("search response carries no results array");
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| match RawResult::deserialize(item) {
            Ok(raw) => Some(MatchRecord::from(raw)),
            Err(e) => {
                trace!(index = idx, error = %e, "skipping undecodable search result");
                None
            }
        })
        .collect()
}

/// Canonical file path of a record.
///
/// `location.path` is returned verbatim when present. Otherwise the second
/// `::` segment of the identifier is used, provided it is non-empty.
pub fn resolve_path(record: &MatchRecord) -> Option<&str> {
    if let Some(path) = record.location_path.as_deref() {
        return Some(path);
    }
    record
        .identifier
        .as_deref()?
        .split(IDENTIFIER_DELIMITER)
        .nth(1)
        .filter(|segment| !segment.is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// Grouping
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FileGroup {
    pub path: String,
    /// Arrival order.
    pub records: Vec<MatchRecord>,
}

impl FileGroup {
    /// Min start / max end over every record that carries a range.
    pub fn line_span(&self) -> Option<LineRange> {
        self.records
            .iter()
            .filter_map(|r| r.line_range)
            .reduce(|acc, r| LineRange {
                start: acc.start.min(r.start),
                end: acc.end.max(r.end),
            })
    }
}

/// Records grouped by resolved path, files in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileGroups {
    groups: Vec<FileGroup>,
    index: HashMap<String, usize>,
}

impl FileGroups {
    pub fn group<I>(records: I) -> Self
    where
        I: IntoIterator<Item = MatchRecord>,
    {
        let mut out = Self::default();
        let mut dropped = 0usize;
        for record in records {
            if record.is_folder() {
                continue;
            }
            let Some(path) = resolve_path(&record).map(str::to_owned) else {
                dropped += 1;
                continue;
            };
            out.insert(path, record);
        }
        if dropped > 0 {
            trace!(dropped, "search results without a resolvable path");
        }
        out
    }

    /// Parses and groups a raw search response in one go.
    pub fn from_response(body: &Value) -> Self {
        Self::group(parse_results(body))
    }

    fn insert(&mut self, path: String, record: MatchRecord) {
        match self.index.get(&path) {
            Some(&i) => self.groups[i].records.push(record),
            None => {
                self.index.insert(path.clone(), self.groups.len());
                self.groups.push(FileGroup {
                    path,
                    records: vec![record],
                });
            }
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileGroup> {
        self.groups.iter()
    }

    pub fn get(&self, path: &str) -> Option<&FileGroup> {
        self.index.get(path).map(|&i| &self.groups[i])
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl<'a> IntoIterator for &'a FileGroups {
    type Item = &'a FileGroup;
    type IntoIter = std::slice::Iter<'a, FileGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paths(groups: &FileGroups) -> Vec<&str> {
        groups.iter().map(|g| g.path.as_str()).collect()
    }

    #[test]
    fn location_path_wins_over_identifier() {
        let records = parse_results(&json!({"results": [{
            "kind": "Symbol",
            "identifier": "owner/repo::other/z.py::f",
            "location": {"path": "x/y.py"}
        }]}));
        assert_eq!(resolve_path(&records[0]), Some("x/y.py"));
    }

    #[test]
    fn identifier_fallback_uses_second_segment() {
        let rec = |id: &str| MatchRecord {
            identifier: Some(id.to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_path(&rec("owner/repo::src/a.rs::chunk1")), Some("src/a.rs"));
        assert_eq!(resolve_path(&rec("owner/repo::src/a.rs")), Some("src/a.rs"));
        assert_eq!(resolve_path(&rec("owner/repo")), None);
        assert_eq!(resolve_path(&rec("owner/repo::")), None);
        assert_eq!(resolve_path(&MatchRecord::default()), None);
    }

    #[test]
    fn empty_location_path_falls_back_to_identifier() {
        let records = parse_results(&json!({"results": [{
            "identifier": "o/r::lib.rs::x",
            "location": {"path": ""}
        }]}));
        assert_eq!(resolve_path(&records[0]), Some("lib.rs"));
    }

    #[test]
    fn range_needs_both_ends() {
        let records = parse_results(&json!({"results": [
            {"location": {"path": "a", "range": {"start": {"line": 3}, "end": {"line": 9}}}},
            {"location": {"path": "a", "range": {"start": {"line": 3}}}},
            {"location": {"path": "a", "range": {"start": {"line": null}, "end": {"line": 4}}}}
        ]}));
        assert_eq!(records[0].line_range, Some(LineRange { start: 3, end: 9 }));
        assert_eq!(records[1].line_range, None);
        assert_eq!(records[2].line_range, None);
    }

    #[test]
    fn non_object_or_missing_results_is_empty() {
        assert!(parse_results(&json!([1, 2])).is_empty());
        assert!(parse_results(&json!({"items": []})).is_empty());
        assert!(parse_results(&json!({"results": "nope"})).is_empty());
    }

    #[test]
    fn non_object_elements_are_skipped() {
        let records = parse_results(&json!({"results": [
            42,
            "text",
            {"location": {"path": "ok.rs"}, "score": 0.5}
        ]}));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].score, Some(0.5));
    }

    #[test]
    fn off_type_fields_clear_only_that_field() {
        let groups = FileGroups::from_response(&json!({"results": [
            {"kind": "Symbol", "location": {"path": "a.py"}, "score": "0.9"},
            {"kind": "Symbol", "location": {"path": "b.py", "range": {"start": {"line": 10.0}, "end": {"line": 12.0}}}},
            {"kind": "Symbol", "location": {"path": "c.py"}, "score": {"nested": true}},
            {"kind": 7, "location": {"path": "d.py", "range": {"start": {"line": 1.5}, "end": {"line": 2}}}},
            {"identifier": "o/r::e.py::x", "location": "not-an-object", "content": ["x"]}
        ]}));
        assert_eq!(paths(&groups), vec!["a.py", "b.py", "c.py", "d.py", "e.py"]);

        let a = &groups.get("a.py").unwrap().records[0];
        assert_eq!(a.score, Some(0.9));
        let b = &groups.get("b.py").unwrap().records[0];
        assert_eq!(b.line_range, Some(LineRange { start: 10, end: 12 }));
        assert_eq!(groups.get("c.py").unwrap().records[0].score, None);
        let d = &groups.get("d.py").unwrap().records[0];
        assert_eq!(d.kind, None);
        assert_eq!(d.line_range, None);
        let e = &groups.get("e.py").unwrap().records[0];
        assert_eq!(e.content, None);
    }

    #[test]
    fn grouping_keeps_first_seen_order_and_drops_folders() {
        let groups = FileGroups::from_response(&json!({"results": [
            {"kind": "Symbol", "location": {"path": "b.py"}, "score": 0.1},
            {"kind": "Folder", "location": {"path": "src/"}},
            {"kind": "Chunk", "location": {"path": "a.py"}, "score": 0.99},
            {"kind": "File", "identifier": "o/r::b.py"},
            {"kind": "Chunk"},
            {"kind": "Symbol", "location": {"path": "c.py"}}
        ]}));
        assert_eq!(paths(&groups), vec!["b.py", "a.py", "c.py"]);
        let b = groups.get("b.py").unwrap();
        assert_eq!(
            b.records.iter().map(|r| r.kind.clone().unwrap()).collect::<Vec<_>>(),
            vec![ResultKind::Symbol, ResultKind::File]
        );
        assert!(groups.iter().all(|g| g.records.iter().all(|r| !r.is_folder())));
    }

    #[test]
    fn unknown_kinds_survive() {
        let records = parse_results(&json!({"results": [{"kind": "Module", "location": {"path": "m"}}]}));
        assert_eq!(records[0].kind.as_ref().map(ResultKind::as_str), Some("Module"));
    }

    #[test]
    fn content_is_preferred_over_snippet() {
        let rec = MatchRecord {
            content: Some("A".into()),
            snippet: Some("B".into()),
            ..Default::default()
        };
        assert_eq!(rec.text(), Some("A"));
        let snippet_only = MatchRecord {
            content: Some(String::new()),
            snippet: Some("B".into()),
            ..Default::default()
        };
        assert_eq!(snippet_only.text(), Some("B"));
    }

    #[test]
    fn line_span_covers_all_ranged_records() {
        let groups = FileGroups::from_response(&json!({"results": [
            {"location": {"path": "u.py", "range": {"start": {"line": 25}, "end": {"line": 35}}}},
            {"location": {"path": "u.py"}},
            {"location": {"path": "u.py", "range": {"start": {"line": 10}, "end": {"line": 20}}}}
        ]}));
        let span = groups.get("u.py").unwrap().line_span();
        assert_eq!(span, Some(LineRange { start: 10, end: 35 }));
    }
}

use anyhow::Result;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

use crate::results::{FileGroup, FileGroups, LineRange, MatchRecord};

/// Canonical document for "nothing to show", in both modes.
pub const EMPTY_RESULTS: &str = "<results></results>";

/// Indent in front of every body line, before the optional `N|` prefix.
const BODY_INDENT: &str = "   ";

type XmlWriter = Writer<Cursor<Vec<u8>>>;

/// Renders grouped search hits.
///
/// Without content every record becomes one self-closing `search_result`.
/// With content every file that has text becomes one element whose body is
/// the newline-joined texts of its records.
pub fn build_search_results_xml(groups: &FileGroups, include_content: bool) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Start(BytesStart::new("results")))?;

    let mut written = 0usize;
    for group in groups {
        if include_content {
            if write_content_element(&mut writer, group)? {
                written += 1;
            }
        } else {
            for record in &group.records {
                write_reference_element(&mut writer, &group.path, record)?;
                written += 1;
            }
        }
    }

    if written == 0 {
        return Ok(EMPTY_RESULTS.to_string());
    }
    writer.write_event(Event::Text(BytesText::from_escaped("\n")))?;
    writer.write_event(Event::End(BytesEnd::new("results")))?;

    let bytes = writer.into_inner().into_inner();
    Ok(String::from_utf8(bytes)?)
}

fn search_result_start<'a>(path: &'a str, range: Option<LineRange>) -> BytesStart<'a> {
    let mut el = BytesStart::new("search_result");
    el.push_attribute(("path", path));
    if let Some(r) = range {
        el.push_attribute(("startLine", r.start.to_string().as_str()));
        el.push_attribute(("endLine", r.end.to_string().as_str()));
    }
    el
}

fn write_reference_element(writer: &mut XmlWriter, path: &str, record: &MatchRecord) -> Result<()> {
    let mut el = search_result_start(path, record.line_range);
    if let Some(kind) = &record.kind {
        el.push_attribute(("kind", kind.as_str()));
    }
    writer.write_event(Event::Text(BytesText::from_escaped("\n  ")))?;
    writer.write_event(Event::Empty(el))?;
    Ok(())
}

/// Writes one element for `group`, or nothing when none of its records has text.
fn write_content_element(writer: &mut XmlWriter, group: &FileGroup) -> Result<bool> {
    let contributing: Vec<_> = group
        .records
        .iter()
        .filter_map(|r| r.text().map(|t| (r, t)))
        .collect();
    if contributing.is_empty() {
        return Ok(false);
    }

    let first_line = contributing
        .iter()
        .find_map(|(r, _)| r.line_range.map(|lr| lr.start));
    let body = contributing
        .iter()
        .map(|(_, t)| *t)
        .collect::<Vec<_>>()
        .join("\n");

    writer.write_event(Event::Text(BytesText::from_escaped("\n  ")))?;
    writer.write_event(Event::Start(search_result_start(&group.path, group.line_span())))?;
    writer.write_event(Event::Text(BytesText::from_escaped("\n")))?;
    writer.write_event(Event::Text(BytesText::new(&format_body(&body, first_line))))?;
    writer.write_event(Event::Text(BytesText::from_escaped("\n  ")))?;
    writer.write_event(Event::End(BytesEnd::new("search_result")))?;
    Ok(true)
}

/// Prefixes each line of `body`, numbered from `first_line` when known.
/// Numbers saturate instead of wrapping for absurd start lines.
fn format_body(body: &str, first_line: Option<i64>) -> String {
    let lines = body.split('\n');
    match first_line {
        Some(start) => lines
            .enumerate()
            .map(|(i, line)| {
                let n = start.saturating_add(i64::try_from(i).unwrap_or(i64::MAX));
                format!("{BODY_INDENT}{n}|{line}")
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => lines
            .map(|line| format!("{BODY_INDENT}{line}"))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Repository overviews
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoOverview {
    pub name: String,
    pub overview: String,
}

pub fn build_repo_overview_xml(overviews: &[RepoOverview]) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer.write_event(Event::Start(BytesStart::new("repository_overviews")))?;

    for repo in overviews {
        let mut repo_el = BytesStart::new("repository");
        repo_el.push_attribute(("name", repo.name.as_str()));
        writer.write_event(Event::Start(repo_el))?;

        writer.write_event(Event::Start(BytesStart::new("overview")))?;
        writer.write_event(Event::Text(BytesText::new(repo.overview.as_str())))?;
        writer.write_event(Event::End(BytesEnd::new("overview")))?;

        writer.write_event(Event::End(BytesEnd::new("repository")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("repository_overviews")))?;

    let bytes = writer.into_inner().into_inner();
    Ok(String::from_utf8(bytes)?)
}

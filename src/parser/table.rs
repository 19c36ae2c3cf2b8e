use std::sync::LazyLock;

use scraper::{ElementRef, Html, Node, Selector};

use crate::model::{is_missing, ActivityRecord};

static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table tr").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Organization,
    Title,
    Description,
    StartDate,
    EndDate,
    Time,
    Venue,
    Implementation,
}

/// Left-cell labels of the request form, normalized (lowercase, no colon).
const LABELS: &[(&str, Field)] = &[
    ("organization", Field::Organization),
    ("name of organization", Field::Organization),
    ("requesting organization", Field::Organization),
    ("title", Field::Title),
    ("activity title", Field::Title),
    ("title of activity", Field::Title),
    ("description", Field::Description),
    ("activity description", Field::Description),
    ("start date", Field::StartDate),
    ("date start", Field::StartDate),
    ("end date", Field::EndDate),
    ("date end", Field::EndDate),
    ("time", Field::Time),
    ("venue", Field::Venue),
    ("implementation", Field::Implementation),
    ("type of implementation", Field::Implementation),
    ("mode of implementation", Field::Implementation),
];

pub fn match_label(label: &str) -> Option<Field> {
    let norm = normalize_label(label);
    LABELS.iter().find(|(l, _)| *l == norm).map(|(_, f)| *f)
}

pub fn normalize_label(label: &str) -> String {
    collapse_ws(label)
        .trim_end_matches(':')
        .trim()
        .to_lowercase()
}

pub fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Direct `td`/`th` children of a row; nested tables are not descended into.
pub fn row_cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| matches!(c.value().name(), "td" | "th"))
        .collect()
}

pub fn cell_text(cell: ElementRef<'_>) -> String {
    collapse_ws(&cell_lines(cell).join(" "))
}

const BLOCK_TAGS: &[&str] = &["p", "div", "li", "ul", "ol", "tr", "table"];

/// Text of a cell split into lines at `<br>` and block-element boundaries.
/// Empty lines are dropped.
pub fn cell_lines(cell: ElementRef<'_>) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    walk_lines(cell, &mut lines, &mut current);
    flush_line(&mut lines, &mut current);
    lines
}

fn walk_lines(el: ElementRef<'_>, lines: &mut Vec<String>, current: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => current.push_str(text),
            Node::Element(e) if e.name() == "br" => flush_line(lines, current),
            Node::Element(e) => {
                let block = BLOCK_TAGS.contains(&e.name());
                if block {
                    flush_line(lines, current);
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    walk_lines(child_el, lines, current);
                }
                if block {
                    flush_line(lines, current);
                }
            }
            _ => {}
        }
    }
}

fn flush_line(lines: &mut Vec<String>, current: &mut String) {
    let line = collapse_ws(current);
    if !line.is_empty() {
        lines.push(line);
    }
    current.clear();
}

/// Extract the labeled request table from an email body.
///
/// Never fails: unknown labels are ignored and fields without a matching
/// row keep the [`crate::model::NOT_FOUND`] sentinel.
pub fn extract(html: &str) -> ActivityRecord {
    let doc = Html::parse_document(html);
    extract_from(&doc, html)
}

pub fn extract_from(doc: &Html, raw_html: &str) -> ActivityRecord {
    let mut record = ActivityRecord::empty(raw_html);

    for row in doc.select(&ROW_SEL) {
        let cells = row_cells(row);
        if cells.len() < 2 {
            continue;
        }
        let Some(field) = match_label(&cell_text(cells[0])) else {
            continue;
        };
        let value = cell_text(cells[1]);
        if value.is_empty() {
            continue;
        }
        let slot = field_mut(&mut record, field);
        if is_missing(slot) {
            *slot = value;
        }
    }

    record
}

fn field_mut(record: &mut ActivityRecord, field: Field) -> &mut String {
    match field {
        Field::Organization => &mut record.organization,
        Field::Title => &mut record.title,
        Field::Description => &mut record.description,
        Field::StartDate => &mut record.start_date_raw,
        Field::EndDate => &mut record.end_date_raw,
        Field::Time => &mut record.time,
        Field::Venue => &mut record.venue,
        Field::Implementation => &mut record.implementation_type,
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NOT_FOUND;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    #[test]
    fn full_request_form() {
        let r = extract(&fixture("request_full"));
        assert_eq!(r.organization, "Computer Science Society");
        assert_eq!(r.title, "Hackathon 2025");
        assert_eq!(r.start_date_raw, "July 15, 2025");
        assert_eq!(r.end_date_raw, "September 2, 2025");
        assert_eq!(r.venue, "Engineering Hall, Room 301");
        assert_eq!(r.implementation_type, "Face-to-face");
        assert_eq!(r.time, "8:00 AM - 5:00 PM");
        assert!(r.description.starts_with("A 48-hour coding"));
    }

    #[test]
    fn labels_tolerate_colon_and_case() {
        let html = "<table><tr><td> NAME OF ORGANIZATION: </td><td><b>Chess</b> Club</td></tr></table>";
        let r = extract(html);
        assert_eq!(r.organization, "Chess Club");
    }

    #[test]
    fn missing_labels_keep_sentinel() {
        let html = "<table><tr><td>Title</td><td>Only a title</td></tr></table>";
        let r = extract(html);
        assert_eq!(r.title, "Only a title");
        assert_eq!(r.organization, NOT_FOUND);
        assert_eq!(r.start_date_raw, NOT_FOUND);
    }

    #[test]
    fn malformed_markup_keeps_parsed_rows() {
        let html = "<table><tr><td>Organization<td>Debate Society</tr><tr><td>Venue</td><td>Gym";
        let r = extract(html);
        assert_eq!(r.organization, "Debate Society");
        assert_eq!(r.venue, "Gym");
    }

    #[test]
    fn single_cell_rows_are_ignored() {
        let html = "<table><tr><td>Organization</td></tr></table>";
        assert_eq!(extract(html).organization, NOT_FOUND);
    }

    #[test]
    fn not_html_at_all() {
        let r = extract("plain text body, no table");
        assert_eq!(r.organization, NOT_FOUND);
        assert_eq!(r.raw_html, "plain text body, no table");
    }
}

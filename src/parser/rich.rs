use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use super::table::{self, cell_lines, cell_text, normalize_label, row_cells};
use crate::model::ActivityRecord;

static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table tr").unwrap());
static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static ENUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\d{1,3}[.)]|[A-Za-z][.)]|[-•*–])\s+").unwrap());
static FLOW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(\d{1,2}:\d{2}(?:\s*[ap]\.?m\.?)?)\s*(?:-|–|—|to)\s*(\d{1,2}:\d{2}(?:\s*[ap]\.?m\.?)?)\s*[:|,-]?\s*(.*)$",
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Approval {
    pub role: String,
    pub name: String,
    pub decision: String,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowItem {
    pub time: String,
    pub activity: String,
    pub assignee: String,
}

/// The request table plus the list-shaped sections of the form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RichRecord {
    pub record: ActivityRecord,
    pub participants: Vec<String>,
    pub objectives: Vec<String>,
    pub attachments: Vec<Attachment>,
    pub approvals: Vec<Approval>,
    pub program_flow: Vec<FlowItem>,
}

enum ListField {
    Participants,
    Objectives,
    Attachments,
    ProgramFlow,
}

fn match_list_label(label: &str) -> Option<ListField> {
    match normalize_label(label).as_str() {
        "participants" | "target participants" | "list of participants" => {
            Some(ListField::Participants)
        }
        "objectives" | "objective" | "activity objectives" => Some(ListField::Objectives),
        "attachments" | "supporting documents" | "links" => Some(ListField::Attachments),
        "program flow" | "program of activities" | "programme" => Some(ListField::ProgramFlow),
        _ => None,
    }
}

pub fn extract_rich(html: &str) -> RichRecord {
    let doc = Html::parse_document(html);
    let record = table::extract_from(&doc, html);

    let mut participants = Vec::new();
    let mut objectives = Vec::new();
    let mut attachments = Vec::new();
    let mut approvals = Vec::new();
    let mut flow_lines: Vec<String> = Vec::new();
    let mut in_approvals = false;

    for row in doc.select(&ROW_SEL) {
        let cells = row_cells(row);

        if cells.len() == 1 {
            in_approvals = cell_text(cells[0]).to_lowercase().contains("approval history");
            continue;
        }

        if in_approvals && cells.len() >= 3 {
            if let Some(a) = approval_row(&cells) {
                approvals.push(a);
            }
            continue;
        }

        if cells.len() < 2 {
            continue;
        }
        match match_list_label(&cell_text(cells[0])) {
            Some(ListField::Participants) => participants = list_lines(cells[1]),
            Some(ListField::Objectives) => objectives = list_lines(cells[1]),
            Some(ListField::Attachments) => attachments = anchors(cells[1]),
            Some(ListField::ProgramFlow) => flow_lines = cell_lines(cells[1]),
            None => {}
        }
    }

    let program_flow = flow_lines
        .iter()
        .map(|l| parse_flow_line(l, &participants))
        .collect();

    RichRecord {
        record,
        participants,
        objectives,
        attachments,
        approvals,
        program_flow,
    }
}

fn approval_row(cells: &[ElementRef<'_>]) -> Option<Approval> {
    let texts: Vec<String> = cells.iter().map(|c| cell_text(*c)).collect();
    let first = texts[0].to_lowercase();
    if first == "role" || first == "office" || first == "approver" || first.is_empty() {
        return None;
    }
    Some(Approval {
        role: texts[0].clone(),
        name: texts[1].clone(),
        decision: texts[2].clone(),
        date: texts.get(3).cloned().unwrap_or_default(),
    })
}

/// Cell lines with enumerator prefixes (`1.`, `a)`, `-`, `•`) removed.
pub fn list_lines(cell: ElementRef<'_>) -> Vec<String> {
    cell_lines(cell)
        .iter()
        .map(|l| strip_enumerator(l))
        .filter(|l| !l.is_empty())
        .collect()
}

pub fn strip_enumerator(line: &str) -> String {
    ENUM_RE.replace(line, "").trim().to_string()
}

fn anchors(cell: ElementRef<'_>) -> Vec<Attachment> {
    cell.select(&ANCHOR_SEL)
        .filter_map(|a| {
            let url = a.value().attr("href")?.trim().to_string();
            if url.is_empty() {
                return None;
            }
            let label = table::collapse_ws(&a.text().collect::<String>());
            Some(Attachment {
                label: if label.is_empty() { url.clone() } else { label },
                url,
            })
        })
        .collect()
}

/// Split a program-flow line into time range, activity and assignee.
///
/// The assignee is the longest participant name the remainder ends with.
/// Lines without a leading time range pass through as a bare activity.
pub fn parse_flow_line(line: &str, participants: &[String]) -> FlowItem {
    let Some(caps) = FLOW_RE.captures(line.trim()) else {
        return FlowItem {
            time: String::new(),
            activity: line.trim().to_string(),
            assignee: String::new(),
        };
    };

    let time = format!("{}–{}", caps[1].trim(), caps[2].trim());
    let rest = caps[3].trim();

    let assignee = participants
        .iter()
        .filter(|p| !p.is_empty() && p.len() < rest.len())
        .filter(|p| {
            let cut = rest.len() - p.len();
            rest.is_char_boundary(cut) && rest[cut..].eq_ignore_ascii_case(p)
        })
        .max_by_key(|p| p.len());

    match assignee {
        Some(name) => {
            let cut = rest.len() - name.len();
            let activity = rest[..cut]
                .trim_end_matches(|c: char| c.is_whitespace() || "-–|,:(".contains(c))
                .to_string();
            FlowItem {
                time,
                activity,
                assignee: rest[cut..].to_string(),
            }
        }
        None => FlowItem {
            time,
            activity: rest.to_string(),
            assignee: String::new(),
        },
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Vec<String> {
        vec!["Ana Reyes".into(), "Jose Rizal Cruz".into(), "Rizal Cruz".into()]
    }

    #[test]
    fn rich_fixture() {
        let html = std::fs::read_to_string("tests/fixtures/request_full.html").unwrap();
        let r = extract_rich(&html);
        assert_eq!(r.record.organization, "Computer Science Society");
        assert_eq!(r.participants, vec!["Maria Santos", "Jose Rizal Cruz", "Ana Reyes"]);
        assert_eq!(
            r.objectives,
            vec!["Promote collaborative problem solving", "Showcase student projects"]
        );
        assert_eq!(r.attachments.len(), 2);
        assert_eq!(r.attachments[1].label, "Budget Plan");
        assert_eq!(r.approvals.len(), 2);
        assert_eq!(r.approvals[1].role, "Dean");
        assert_eq!(r.approvals[1].date, "July 2, 2025");
        assert_eq!(r.program_flow.len(), 4);
        assert_eq!(r.program_flow[0].assignee, "Ana Reyes");
        assert_eq!(r.program_flow[2].activity, "Lunch break");
        assert_eq!(r.program_flow[2].time, "");
        assert_eq!(r.program_flow[3].time, "13:00–17:00");
    }

    #[test]
    fn flow_prefers_longest_suffix() {
        let item = parse_flow_line("09:00 – 12:00 Opening keynote Jose Rizal Cruz", &people());
        assert_eq!(item.time, "09:00–12:00");
        assert_eq!(item.activity, "Opening keynote");
        assert_eq!(item.assignee, "Jose Rizal Cruz");
    }

    #[test]
    fn flow_without_known_assignee() {
        let item = parse_flow_line("8:00 AM - 9:00 AM Registration", &people());
        assert_eq!(item.time, "8:00 AM–9:00 AM");
        assert_eq!(item.activity, "Registration");
        assert!(item.assignee.is_empty());
    }

    #[test]
    fn flow_line_without_time_passes_through() {
        let item = parse_flow_line("  Closing remarks  ", &people());
        assert_eq!(item.activity, "Closing remarks");
        assert!(item.time.is_empty());
        assert!(item.assignee.is_empty());
    }

    #[test]
    fn enumerators_are_stripped() {
        assert_eq!(strip_enumerator("1. First"), "First");
        assert_eq!(strip_enumerator("b) Second"), "Second");
        assert_eq!(strip_enumerator("• Third"), "Third");
        assert_eq!(strip_enumerator("2025 budget"), "2025 budget");
    }
}

//! Pure parsers over captured command output.
//!
//! Every parser is a function from a slice of lines to typed rows plus the
//! rows it had to skip. Nothing here touches the filesystem or the store.

pub mod aggregation;
pub mod description;
pub mod neighbor;
pub mod segment;
pub mod stp;

use std::collections::BTreeMap;

use serde::Serialize;

pub use aggregation::{GroupRow, MemberRow};
pub use description::DescriptionRow;
pub use neighbor::NeighborRow;
pub use segment::{CommandKind, Section, Segmenter};
pub use stp::StpRow;

/// A row the grammar rejected. Skipped, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedRow {
    pub kind: CommandKind,
    /// One-based line number within the capture.
    pub line: usize,
    pub reason: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutput<T> {
    pub records: Vec<T>,
    pub malformed: Vec<MalformedRow>,
}

impl<T> Default for ParseOutput<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            malformed: Vec::new(),
        }
    }
}

impl<T> ParseOutput<T> {
    fn skip(&mut self, kind: CommandKind, line: usize, reason: &'static str, text: &str) {
        self.malformed.push(MalformedRow {
            kind,
            line,
            reason,
            text: text.trim_end().to_string(),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureRecord {
    Neighbor(NeighborRow),
    Aggregation(GroupRow),
    Interface(DescriptionRow),
    SpanningTree(StpRow),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedCapture {
    pub hostname: Option<String>,
    pub sections: BTreeMap<CommandKind, usize>,
    pub records: Vec<CaptureRecord>,
    pub malformed: Vec<MalformedRow>,
}

/// Segments a decoded capture and runs the owning parser over each section.
pub fn parse_capture(text: &str) -> ParsedCapture {
    let cleaned = text.lines().map(clean_line).collect::<Vec<_>>();
    let lines = cleaned.iter().map(String::as_str).collect::<Vec<_>>();

    let mut parsed = ParsedCapture {
        hostname: segment::capture_hostname(&lines),
        ..ParsedCapture::default()
    };
    for section in Segmenter::new(&lines) {
        *parsed.sections.entry(section.kind).or_default() += 1;
        let first_line = section.lines.start + 1;
        let (records, malformed) = parse_section(section.kind, &lines[section.lines], first_line);
        tracing::debug!(
            kind = section.kind.as_str(),
            first_line,
            records = records.len(),
            malformed = malformed.len(),
            "parsed section"
        );
        parsed.records.extend(records);
        parsed.malformed.extend(malformed);
    }
    parsed
}

pub fn parse_section(
    kind: CommandKind,
    lines: &[&str],
    first_line: usize,
) -> (Vec<CaptureRecord>, Vec<MalformedRow>) {
    match kind {
        CommandKind::Neighbor => {
            let out = neighbor::parse(lines, first_line);
            (wrap(out.records, CaptureRecord::Neighbor), out.malformed)
        }
        CommandKind::Aggregation => {
            let out = aggregation::parse(lines, first_line);
            (wrap(out.records, CaptureRecord::Aggregation), out.malformed)
        }
        CommandKind::InterfaceDescription => {
            let out = description::parse(lines, first_line);
            (wrap(out.records, CaptureRecord::Interface), out.malformed)
        }
        CommandKind::SpanningTree => {
            let out = stp::parse(lines, first_line);
            (wrap(out.records, CaptureRecord::SpanningTree), out.malformed)
        }
    }
}

fn wrap<T>(rows: Vec<T>, variant: fn(T) -> CaptureRecord) -> Vec<CaptureRecord> {
    rows.into_iter().map(variant).collect()
}

/// Drops terminal noise left by paged output: ANSI escape sequences and the
/// `---- More ----` marker.
fn clean_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\u{1b}' {
            if chars.peek() == Some(&'[') {
                chars.next();
                for next in chars.by_ref() {
                    if next.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
            continue;
        }
        out.push(ch);
    }
    if let Some(idx) = out.find("---- More ----") {
        out.replace_range(idx..idx + "---- More ----".len(), "");
    }
    out
}

/// Whitespace-delimited tokens with their byte offsets.
pub(crate) fn tokens(line: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (idx, ch) in line.char_indices() {
        match (ch.is_whitespace(), start) {
            (true, Some(begin)) => {
                out.push((begin, &line[begin..idx]));
                start = None;
            }
            (false, None) => start = Some(idx),
            _ => {}
        }
    }
    if let Some(begin) = start {
        out.push((begin, &line[begin..]));
    }
    out
}

/// `----`, `====` and similar rules between a header and its rows.
pub(crate) fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|ch| matches!(ch, '-' | '=' | '_' | '*'))
}

#[cfg(test)]
mod tests {
    use super::{CaptureRecord, CommandKind, clean_line, parse_capture, tokens};

    #[test]
    fn tokenizes_with_offsets() {
        assert_eq!(
            tokens("  GE1/0/1   Switch A  "),
            vec![(2, "GE1/0/1"), (12, "Switch"), (19, "A")]
        );
        assert!(tokens("   ").is_empty());
    }

    #[test]
    fn strips_pager_artifacts() {
        let raw = format!("  ---- More ----\u{1b}[42D{}GE1/0/3  up", " ".repeat(42));
        let cleaned = clean_line(&raw);
        assert!(!cleaned.contains("More"));
        assert!(!cleaned.contains('\u{1b}'));
        assert_eq!(cleaned.trim(), "GE1/0/3  up");
    }

    #[test]
    fn parses_a_full_capture() {
        let text = "\
<TestDevice>display lldp neighbor brief
Local Intf     Exptime(s)  Neighbor Dev            Neighbor Intf
GE1/0/1        120         Switch-A                GE0/0/1
GE1/0/2        115         Switch-B                GE0/0/1

<TestDevice>display eth-trunk
Eth-Trunk1's state information is:
WorkingMode: LACP
Operate status: up     Number Of Up Port In Trunk: 2
--------------------------------------------------------------------------------
PortName                      Status      Weight
GigabitEthernet1/0/10         Up          1
GigabitEthernet1/0/11         Up          1

<TestDevice>display interface description
Interface                       PHY   Protocol  Description
GigabitEthernet1/0/1            up    up        To-Switch-A
Eth-Trunk1                      up    up        Uplink

<TestDevice>display stp brief
 MSTID  Port                        Role  STP State     Protection
   0    GigabitEthernet1/0/1        DESI  FORWARDING      NONE
";
        let parsed = parse_capture(text);
        assert_eq!(parsed.hostname.as_deref(), Some("TestDevice"));
        assert_eq!(parsed.sections.len(), 4);
        assert_eq!(parsed.sections[&CommandKind::Neighbor], 1);
        assert!(parsed.malformed.is_empty(), "{:?}", parsed.malformed);

        let count = |pred: fn(&CaptureRecord) -> bool| parsed.records.iter().filter(|r| pred(r)).count();
        assert_eq!(count(|r| matches!(r, CaptureRecord::Neighbor(_))), 2);
        assert_eq!(count(|r| matches!(r, CaptureRecord::Aggregation(_))), 1);
        assert_eq!(count(|r| matches!(r, CaptureRecord::Interface(_))), 2);
        assert_eq!(count(|r| matches!(r, CaptureRecord::SpanningTree(_))), 1);
    }
}

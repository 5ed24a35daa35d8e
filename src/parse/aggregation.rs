//! `display eth-trunk` output, in both layouts seen in the field.
//!
//! Brief: one unindented header row per group, members indented below it.
//!
//! ```text
//! Eth-Trunk6   NORMAL   1   1000M(a)  1000M(a)  up
//!   Port Status
//!   GE1/6/0/19    Product: GigabitEthernet     Status: up
//! ```
//!
//! Verbose: a `'s state information is:` banner, `key: value` attributes and
//! a `PortName Status Weight` member table.

use serde::Serialize;

use crate::model::{AggregationMode, PortStatus};
use crate::normalize::{is_aggregate_interface, looks_like_interface, normalize};
use crate::parse::{CommandKind, ParseOutput, is_separator, tokens};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRow {
    pub name: String,
    pub mode: Option<AggregationMode>,
    pub oper_status: Option<PortStatus>,
    pub members: Vec<MemberRow>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberRow {
    pub interface: String,
    pub status: Option<PortStatus>,
    pub line: usize,
}

const MODE_LABELS: &[&str] = &["workingmode:", "working mode:"];
const STATUS_LABELS: &[&str] = &["operate status:", "operating status:"];

pub fn is_group_header(line: &str) -> bool {
    group_header(line).is_some()
}

fn group_header(raw: &str) -> Option<GroupRow> {
    if raw.starts_with(char::is_whitespace) {
        return None;
    }
    let trimmed = raw.trim();
    if let Some(idx) = trimmed.find("'s state information") {
        let name = normalize(&trimmed[..idx]);
        return is_aggregate_interface(&name).then(|| GroupRow {
            name,
            mode: None,
            oper_status: None,
            members: Vec::new(),
            line: 0,
        });
    }

    let toks = tokens(trimmed);
    if toks.len() < 3 {
        return None;
    }
    let name = normalize(toks[0].1);
    if !is_aggregate_interface(&name) || PortStatus::parse(toks[1].1).is_some() {
        return None;
    }
    let status = PortStatus::parse(toks[toks.len() - 1].1)?;
    Some(GroupRow {
        name,
        mode: Some(AggregationMode::parse(toks[1].1)),
        oper_status: Some(status),
        members: Vec::new(),
        line: 0,
    })
}

fn attribute<'a>(line: &'a str, labels: &[&str]) -> Option<&'a str> {
    let lower = line.to_ascii_lowercase();
    labels.iter().find_map(|label| {
        let idx = lower.find(label)?;
        line[idx + label.len()..].split_whitespace().next()
    })
}

fn is_member_header(lower: &str) -> bool {
    lower.starts_with("portname")
        || lower.starts_with("actorportname")
        || lower.contains("port status")
}

fn member_status(rest: &[(usize, &str)]) -> Option<PortStatus> {
    if let Some(idx) = rest
        .iter()
        .position(|(_, tok)| tok.eq_ignore_ascii_case("status:"))
    {
        return rest.get(idx + 1).and_then(|(_, tok)| PortStatus::parse(tok));
    }
    rest.iter().find_map(|(_, tok)| PortStatus::parse(tok))
}

/// Which part of a group's output the cursor is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Attributes,
    Members,
    /// LACP partner details repeat member names; nothing here is a member.
    Partner,
}

pub fn parse(lines: &[&str], first_line: usize) -> ParseOutput<GroupRow> {
    let mut out = ParseOutput::default();
    let mut current: Option<GroupRow> = None;
    let mut block = Block::Attributes;

    for (offset, raw) in lines.iter().enumerate() {
        let line = first_line + offset;
        let trimmed = raw.trim();
        if trimmed.is_empty() || is_separator(trimmed) {
            continue;
        }

        if let Some(mut header) = group_header(raw) {
            header.line = line;
            out.records.extend(current.replace(header));
            block = Block::Attributes;
            continue;
        }

        let toks = tokens(trimmed);
        let Some(group) = current.as_mut() else {
            if looks_like_interface(toks[0].1) && toks.len() > 1 {
                out.skip(CommandKind::Aggregation, line, "member row outside any group", raw);
            }
            continue;
        };

        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("partner") {
            block = Block::Partner;
        }
        if block == Block::Partner {
            continue;
        }
        if let Some(mode) = attribute(trimmed, MODE_LABELS) {
            group.mode = Some(AggregationMode::parse(mode));
            continue;
        }
        if let Some(status) = attribute(trimmed, STATUS_LABELS) {
            group.oper_status = PortStatus::parse(status);
            continue;
        }
        if is_member_header(&lower) {
            block = Block::Members;
            continue;
        }

        let in_members = block == Block::Members;
        if !in_members && !raw.starts_with(char::is_whitespace) {
            continue;
        }
        let first = toks[0].1;
        if !looks_like_interface(first) {
            if in_members {
                out.skip(CommandKind::Aggregation, line, "member row without an interface", raw);
            }
            continue;
        }
        let interface = normalize(first);
        if is_aggregate_interface(&interface) {
            out.skip(CommandKind::Aggregation, line, "group listed as its own member", raw);
            continue;
        }
        group.members.push(MemberRow {
            interface,
            status: member_status(&toks[1..]),
            line,
        });
    }

    out.records.extend(current);
    out
}

#[cfg(test)]
mod tests {
    use super::{is_group_header, parse};
    use crate::model::{AggregationMode, PortStatus};

    fn rows(text: &str) -> Vec<&str> {
        text.lines().collect()
    }

    #[test]
    fn parses_brief_layout_with_indented_members() {
        let lines = rows(
            "Eth-Trunk6   NORMAL   1   1000M(a)  1000M(a)  up
  Port Status
  GE1/6/0/19    Product: GigabitEthernet     Status: up
  GE1/6/0/20    Product: GigabitEthernet     Status: down

Eth-Trunk10  LACP     1   10G(a)    10G(a)    up
  Port Status
  XGE1/0/1      Product: XGigabitEthernet    Status: up
",
        );
        let out = parse(&lines, 1);
        assert!(out.malformed.is_empty(), "{:?}", out.malformed);
        assert_eq!(out.records.len(), 2);

        let trunk6 = &out.records[0];
        assert_eq!(trunk6.name, "Eth-Trunk6");
        assert_eq!(trunk6.mode, Some(AggregationMode::Static));
        assert_eq!(trunk6.oper_status, Some(PortStatus::Up));
        let members = trunk6
            .members
            .iter()
            .map(|m| (m.interface.as_str(), m.status))
            .collect::<Vec<_>>();
        assert_eq!(
            members,
            vec![
                ("GigabitEthernet1/6/0/19", Some(PortStatus::Up)),
                ("GigabitEthernet1/6/0/20", Some(PortStatus::Down)),
            ]
        );
        assert_eq!(out.records[1].mode, Some(AggregationMode::Negotiated));
        assert_eq!(out.records[1].members[0].interface, "XGigabitEthernet1/0/1");
        assert_eq!(out.records[1].members[0].line, 8);
    }

    #[test]
    fn parses_verbose_layout_and_stops_at_partner_block() {
        let lines = rows(
            "Eth-Trunk1's state information is:
WorkingMode: LACP
Operate status: up     Number Of Up Port In Trunk: 2
--------------------------------------------------------------------------------
PortName                      Status      Weight
GigabitEthernet1/0/10         Up          1
GigabitEthernet1/0/11         Down        1
Partner:
--------------------------------------------------------------------------------
ActorPortName          SysPri   SystemID        PortPri PortNo PortKey
GigabitEthernet1/0/10  32768    00e0-fc12-3456  32768   1      2865
Eth-Trunk2's state information is:
WorkingMode: NORMAL
Operate status: down
",
        );
        let out = parse(&lines, 1);
        assert_eq!(out.records.len(), 2);
        let trunk1 = &out.records[0];
        assert_eq!(trunk1.mode, Some(AggregationMode::Negotiated));
        assert_eq!(trunk1.oper_status, Some(PortStatus::Up));
        assert_eq!(trunk1.members.len(), 2);
        assert_eq!(trunk1.members[1].status, Some(PortStatus::Down));
        let trunk2 = &out.records[1];
        assert_eq!(trunk2.name, "Eth-Trunk2");
        assert!(trunk2.members.is_empty());
        assert_eq!(trunk2.oper_status, Some(PortStatus::Down));
    }

    #[test]
    fn group_headers_are_not_confused_with_description_rows() {
        assert!(is_group_header("Eth-Trunk6   NORMAL   1   1000M(a)  1000M(a)  up"));
        assert!(is_group_header("Eth-Trunk1's state information is:"));
        assert!(!is_group_header("Eth-Trunk1                      up    up        Uplink"));
        assert!(!is_group_header("Eth-Trunk1                      up    up"));
        assert!(!is_group_header("  Eth-Trunk6   NORMAL   1   up"));
    }

    #[test]
    fn malformed_member_rows_are_reported() {
        let lines = rows(
            "Eth-Trunk3   NORMAL   1   1000M(a)  1000M(a)  up
  Port Status
  ???? garbage
  GE1/0/3       Product: GigabitEthernet     Status: up
",
        );
        let out = parse(&lines, 20);
        assert_eq!(out.records[0].members.len(), 1);
        assert_eq!(out.malformed.len(), 1);
        assert_eq!(out.malformed[0].line, 22);
    }
}

use serde::Serialize;

use crate::model::PortStatus;
use crate::normalize::{looks_like_interface, normalize};
use crate::parse::{CommandKind, ParseOutput, is_separator, tokens};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DescriptionRow {
    pub interface: String,
    pub admin_status: PortStatus,
    pub oper_status: PortStatus,
    /// Everything after the status columns, verbatim apart from trimming.
    pub description: Option<String>,
    pub line: usize,
}

/// `Interface  PHY  Protocol  Description`.
pub fn is_header(line: &str) -> bool {
    let toks = tokens(line);
    let has = |label: &str| toks.iter().any(|(_, tok)| tok.eq_ignore_ascii_case(label));
    let leading = toks
        .first()
        .is_some_and(|(_, tok)| tok.eq_ignore_ascii_case("Interface"));
    leading && (has("PHY") || has("Protocol")) && has("Description")
}

pub fn parse(lines: &[&str], first_line: usize) -> ParseOutput<DescriptionRow> {
    let mut out = ParseOutput::default();
    let mut header_seen = false;
    for (offset, raw) in lines.iter().enumerate() {
        let line = first_line + offset;
        if raw.trim().is_empty() || is_separator(raw) {
            continue;
        }
        if is_header(raw) {
            header_seen = true;
            continue;
        }
        if !header_seen {
            continue;
        }
        match parse_row(raw) {
            Ok(mut row) => {
                row.line = line;
                out.records.push(row);
            }
            Err(reason) => {
                tracing::warn!(line, reason, "skipping interface description row");
                out.skip(CommandKind::InterfaceDescription, line, reason, raw);
            }
        }
    }
    out
}

fn parse_row(raw: &str) -> Result<DescriptionRow, &'static str> {
    let toks = tokens(raw);
    if toks.len() < 3 {
        return Err("expected interface, PHY and protocol columns");
    }
    if !looks_like_interface(toks[0].1) {
        return Err("first column is not an interface name");
    }
    let admin_status = PortStatus::parse(toks[1].1).ok_or("unrecognized PHY status")?;
    let oper_status = PortStatus::parse(toks[2].1).ok_or("unrecognized protocol status")?;
    let (start, text) = toks[2];
    let rest = raw[start + text.len()..].trim();
    Ok(DescriptionRow {
        interface: normalize(toks[0].1),
        admin_status,
        oper_status,
        description: (!rest.is_empty()).then(|| rest.to_string()),
        line: 0,
    })
}

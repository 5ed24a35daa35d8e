use serde::Serialize;

use crate::model::StpState;
use crate::normalize::{looks_like_interface, normalize};
use crate::parse::{CommandKind, ParseOutput, is_separator, tokens};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StpRow {
    /// MSTP instance; plain STP/RSTP output has no column and reads as 0.
    pub instance: u16,
    pub interface: String,
    pub role: String,
    pub state: StpState,
    pub line: usize,
}

/// `MSTID  Port  Role  STP State  Protection` and its shorter variants. The
/// port label leads the row, after an optional instance label.
pub fn is_header(line: &str) -> bool {
    let toks = tokens(line);
    let has = |label: &str| toks.iter().any(|(_, tok)| tok.eq_ignore_ascii_case(label));
    let leading_port = match toks.as_slice() {
        [(_, first), ..] if first.eq_ignore_ascii_case("Port") => true,
        [(_, first), (_, second), ..] => {
            matches!(first.to_ascii_uppercase().as_str(), "MSTID" | "MST" | "INSTANCE")
                && second.eq_ignore_ascii_case("Port")
        }
        _ => false,
    };
    leading_port && (has("Role") || has("State"))
}

pub fn parse(lines: &[&str], first_line: usize) -> ParseOutput<StpRow> {
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
            Err(reason) => out.skip(CommandKind::SpanningTree, line, reason, raw),
        }
    }
    out
}

fn parse_row(raw: &str) -> Result<StpRow, &'static str> {
    let toks = tokens(raw);
    let mut cols = toks.iter().map(|(_, tok)| *tok).peekable();
    let instance = match cols.peek() {
        Some(first) if first.chars().all(|ch| ch.is_ascii_digit()) => {
            let value = first.parse::<u16>().map_err(|_| "instance id out of range")?;
            cols.next();
            value
        }
        _ => 0,
    };
    let (Some(interface), Some(role), Some(state)) = (cols.next(), cols.next(), cols.next())
    else {
        return Err("expected port, role and state columns");
    };
    if !looks_like_interface(interface) {
        return Err("port column is not an interface name");
    }
    Ok(StpRow {
        instance,
        interface: normalize(interface),
        role: role.to_ascii_uppercase(),
        state: StpState::parse(state),
        line: 0,
    })
}

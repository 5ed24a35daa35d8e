//! `display lldp neighbor brief` style tables.
//!
//! Neighbor device names may contain spaces, so rows are read from both ends:
//! the first token is the local interface, the last data token is the neighbor
//! interface, and whatever sits between is the device name.

use serde::Serialize;

use crate::normalize::{looks_like_interface, normalize};
use crate::parse::{CommandKind, ParseOutput, is_separator, tokens};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborRow {
    pub local_interface: String,
    pub neighbor_device: String,
    pub neighbor_interface: Option<String>,
    pub holdtime: Option<u32>,
    pub line: usize,
}

/// Where the hold-time column sits, read off the header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holdtime {
    Absent,
    AfterLocal,
    Last,
}

const HOLDTIME_LABELS: &[&str] = &["exptime", "holdtime", "hold-time", "hold time", "expire"];

pub fn is_header(line: &str) -> bool {
    line.trim_start().to_ascii_lowercase().starts_with("local int")
}

fn holdtime_column(header: &str) -> Holdtime {
    let lower = header.to_ascii_lowercase();
    let Some(hold) = HOLDTIME_LABELS
        .iter()
        .filter_map(|label| lower.find(label))
        .min()
    else {
        return Holdtime::Absent;
    };
    match lower.find("neighbor").or_else(|| lower.find("system name")) {
        Some(neighbor) if hold < neighbor => Holdtime::AfterLocal,
        _ => Holdtime::Last,
    }
}

pub fn parse(lines: &[&str], first_line: usize) -> ParseOutput<NeighborRow> {
    let mut out = ParseOutput::default();
    let mut layout = None;
    for (offset, raw) in lines.iter().enumerate() {
        let line = first_line + offset;
        if raw.trim().is_empty() || is_separator(raw) {
            continue;
        }
        if is_header(raw) {
            layout = Some(holdtime_column(raw));
            continue;
        }
        let Some(column) = layout else {
            continue;
        };
        match parse_row(raw, column) {
            Ok(mut row) => {
                row.line = line;
                out.records.push(row);
            }
            Err(reason) => {
                tracing::warn!(line, reason, "skipping neighbor row");
                out.skip(CommandKind::Neighbor, line, reason, raw);
            }
        }
    }
    out
}

fn parse_row(raw: &str, column: Holdtime) -> Result<NeighborRow, &'static str> {
    let toks = tokens(raw);
    if toks.len() < 2 {
        return Err("expected local and neighbor interface columns");
    }
    let (_, local) = toks[0];
    if !looks_like_interface(local) {
        return Err("first column is not an interface name");
    }
    let last = toks.len() - 1;
    let end_of = |idx: usize| toks[idx].0 + toks[idx].1.len();

    // (hold-time token, neighbor interface token, device span start, device span end)
    // A blank hold-time cell shifts the row left, so the header column only
    // counts when its token looks like a hold time.
    let (holdtime, remote_idx, device_from, device_to) = match column {
        Holdtime::AfterLocal if toks.len() < 3 => {
            return Err("expected neighbor device and interface columns");
        }
        Holdtime::AfterLocal if is_holdtime_cell(toks[1].1) => {
            (Some(toks[1].1), last, end_of(1), toks[last].0)
        }
        Holdtime::Last if toks.len() >= 4 && is_holdtime_cell(toks[last].1) => {
            (Some(toks[last].1), last - 1, end_of(0), toks[last - 1].0)
        }
        Holdtime::Last if toks.len() < 3 => {
            return Err("expected neighbor device and interface columns");
        }
        _ => (None, last, end_of(0), toks[last].0),
    };

    let remote = toks[remote_idx].1;
    let neighbor_interface = if remote.chars().all(|ch| ch == '-') {
        None
    } else {
        Some(normalize(remote))
    };

    Ok(NeighborRow {
        local_interface: normalize(local),
        neighbor_device: raw[device_from..device_to].trim().to_string(),
        neighbor_interface,
        holdtime: holdtime.and_then(|value| value.parse::<u32>().ok()),
        line: 0,
    })
}

fn is_holdtime_cell(token: &str) -> bool {
    token.parse::<u32>().is_ok()
        || token.eq_ignore_ascii_case("n/a")
        || token.chars().all(|ch| ch == '-')
}

//! Splits a decoded capture into command-output sections.
//!
//! Two kinds of anchors open a section: a device prompt carrying a recognized
//! command (`<Core>display lldp neighbor brief`) and a table header that one of
//! the parsers claims. A section runs until the next anchor or end of input.
//! Lines outside any section are ignored.

use std::ops::Range;

use serde::Serialize;

use crate::parse::{aggregation, description, neighbor, stp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Neighbor,
    Aggregation,
    InterfaceDescription,
    SpanningTree,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Neighbor => "neighbor",
            Self::Aggregation => "aggregation",
            Self::InterfaceDescription => "interface_description",
            Self::SpanningTree => "spanning_tree",
        }
    }

    /// Aggregation output repeats its group header once per group; every
    /// other table has exactly one header per section.
    fn repeats_header(self) -> bool {
        matches!(self, Self::Aggregation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub kind: CommandKind,
    /// Zero-based, end-exclusive line indices into the capture.
    pub lines: Range<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Prompt(Option<CommandKind>),
    Header(CommandKind),
}

/// Lazy section iterator. Cloning restarts from the clone point, so callers
/// can walk a capture more than once without re-reading it.
#[derive(Debug, Clone)]
pub struct Segmenter<'a> {
    lines: &'a [&'a str],
    pos: usize,
}

impl<'a> Segmenter<'a> {
    pub fn new(lines: &'a [&'a str]) -> Self {
        Self { lines, pos: 0 }
    }
}

struct Open {
    kind: CommandKind,
    start: usize,
    header_seen: bool,
}

impl Iterator for Segmenter<'_> {
    type Item = Section;

    fn next(&mut self) -> Option<Section> {
        let mut open: Option<Open> = None;
        while self.pos < self.lines.len() {
            let idx = self.pos;
            match anchor_for(self.lines[idx]) {
                Some(Anchor::Prompt(kind)) => {
                    if let Some(section) = open.take() {
                        if idx > section.start {
                            return Some(Section {
                                kind: section.kind,
                                lines: section.start..idx,
                            });
                        }
                    }
                    open = kind.map(|kind| Open {
                        kind,
                        start: idx + 1,
                        header_seen: false,
                    });
                }
                Some(Anchor::Header(kind)) => match open.as_mut() {
                    Some(section)
                        if section.kind == kind
                            && (!section.header_seen || kind.repeats_header()) =>
                    {
                        section.header_seen = true;
                    }
                    Some(section) => {
                        return Some(Section {
                            kind: section.kind,
                            lines: section.start..idx,
                        });
                    }
                    None => {
                        open = Some(Open {
                            kind,
                            start: idx,
                            header_seen: true,
                        });
                    }
                },
                None => {}
            }
            self.pos += 1;
        }

        open.filter(|section| section.start < self.lines.len())
            .map(|section| Section {
                kind: section.kind,
                lines: section.start..self.lines.len(),
            })
    }
}

fn anchor_for(line: &str) -> Option<Anchor> {
    if let Some(prompt) = parse_prompt(line) {
        return Some(Anchor::Prompt(command_kind(prompt.command)));
    }
    if neighbor::is_header(line) {
        Some(Anchor::Header(CommandKind::Neighbor))
    } else if description::is_header(line) {
        Some(Anchor::Header(CommandKind::InterfaceDescription))
    } else if stp::is_header(line) {
        Some(Anchor::Header(CommandKind::SpanningTree))
    } else if aggregation::is_group_header(line) {
        Some(Anchor::Header(CommandKind::Aggregation))
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prompt<'a> {
    pub hostname: &'a str,
    pub command: &'a str,
    /// `<host>` user view as opposed to `[host]` system view.
    pub user_view: bool,
}

pub fn parse_prompt(line: &str) -> Option<Prompt<'_>> {
    let trimmed = line.trim_start();
    let (close, user_view) = match trimmed.chars().next()? {
        '<' => ('>', true),
        '[' => (']', false),
        _ => return None,
    };
    let body = &trimmed[1..];
    let end = body.find(close)?;
    let hostname = body[..end].trim_start_matches(['~', '*']);
    if hostname.is_empty()
        || hostname
            .chars()
            .any(|ch| ch.is_whitespace() || matches!(ch, '<' | '>' | '[' | ']'))
    {
        return None;
    }
    Some(Prompt {
        hostname,
        command: body[end + close.len_utf8()..].trim(),
        user_view,
    })
}

/// Maps the command typed after a prompt to the parser that owns its output.
pub fn command_kind(command: &str) -> Option<CommandKind> {
    let lower = command.to_ascii_lowercase();
    let mut words = lower.split_whitespace();
    let verb = words.next()?;
    if !matches!(verb, "display" | "disp" | "dis" | "show") {
        return None;
    }
    let rest = words.collect::<Vec<_>>().join(" ");
    if rest.contains("lldp nei") || rest.contains("cdp nei") {
        Some(CommandKind::Neighbor)
    } else if rest.contains("description") {
        Some(CommandKind::InterfaceDescription)
    } else if rest.starts_with("stp") || rest.contains("spanning-tree") {
        Some(CommandKind::SpanningTree)
    } else if rest.contains("eth-trunk")
        || rest.contains("link-aggregation")
        || rest.contains("etherchannel")
    {
        Some(CommandKind::Aggregation)
    } else {
        None
    }
}

/// Sysname of the device the capture was taken on, preferring user-view
/// prompts since system-view prompts may carry a sub-view suffix.
pub fn capture_hostname(lines: &[&str]) -> Option<String> {
    let mut fallback = None;
    for line in lines {
        let Some(prompt) = parse_prompt(line) else {
            continue;
        };
        if prompt.user_view {
            return Some(prompt.hostname.to_string());
        }
        if fallback.is_none() {
            fallback = Some(prompt.hostname.to_string());
        }
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::{CommandKind, Segmenter, capture_hostname, command_kind, parse_prompt};

    const MIXED: &str = "\
<Core>display lldp neighbor brief
Local Intf     Exptime(s)  Neighbor Dev      Neighbor Intf
GE1/0/1        120         Switch-A          GE0/0/1

<Core>display clock
2024-01-02 10:00:00
<Core>display eth-trunk
Eth-Trunk1's state information is:
WorkingMode: LACP
PortName                      Status      Weight
GigabitEthernet1/0/10         Up          1
Eth-Trunk2's state information is:
WorkingMode: NORMAL
Interface                       PHY   Protocol  Description
GigabitEthernet1/0/1            up    up        To-Switch-A
 MSTID  Port                        Role  STP State     Protection
   0    GigabitEthernet1/0/1        DESI  FORWARDING      NONE
";

    fn split(text: &str) -> Vec<&str> {
        text.lines().collect()
    }

    #[test]
    fn splits_by_prompts_and_headers() {
        let lines = split(MIXED);
        let sections = Segmenter::new(&lines).collect::<Vec<_>>();
        let kinds = sections.iter().map(|s| s.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                CommandKind::Neighbor,
                CommandKind::Aggregation,
                CommandKind::InterfaceDescription,
                CommandKind::SpanningTree,
            ]
        );
        assert_eq!(sections[0].lines, 1..4);
        assert_eq!(lines[sections[1].lines.start], "Eth-Trunk1's state information is:");
        assert_eq!(sections[1].lines.end, 13);
        assert_eq!(sections[3].lines, 15..17);
    }

    #[test]
    fn ignores_unanchored_content() {
        let lines = split("banner\nsome text\n<Core>display version\nVRP 8.1\n");
        assert_eq!(Segmenter::new(&lines).count(), 0);
    }

    #[test]
    fn header_without_prompt_opens_section() {
        let lines = split(
            "noise\nLocal Intf  Neighbor Dev  Neighbor Intf  Exptime(s)\nGE1/0/1  A  GE0/0/1  99\n",
        );
        let sections = Segmenter::new(&lines).collect::<Vec<_>>();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].lines, 1..3);
    }

    #[test]
    fn clone_restarts_independently() {
        let lines = split(MIXED);
        let mut first = Segmenter::new(&lines);
        let snapshot = first.clone();
        let _ = first.next();
        assert_eq!(first.count(), 3);
        assert_eq!(snapshot.count(), 4);
    }

    #[test]
    fn recognizes_prompts_and_commands() {
        let prompt = parse_prompt("[~Core_CSS]display stp brief").expect("prompt");
        assert_eq!(prompt.hostname, "Core_CSS");
        assert_eq!(command_kind(prompt.command), Some(CommandKind::SpanningTree));
        assert_eq!(
            command_kind("dis lldp neighbor brief"),
            Some(CommandKind::Neighbor)
        );
        assert_eq!(
            command_kind("display interface description"),
            Some(CommandKind::InterfaceDescription)
        );
        assert_eq!(command_kind("display eth-trunk"), Some(CommandKind::Aggregation));
        assert_eq!(command_kind("display version"), None);
        assert!(parse_prompt("GigabitEthernet1/0/1 up up").is_none());
    }

    #[test]
    fn hostname_prefers_user_view() {
        let lines = split("[Core-GigabitEthernet1/0/1]quit\n<Core>display lldp neighbor brief\n");
        assert_eq!(capture_hostname(&lines).as_deref(), Some("Core"));
        assert_eq!(capture_hostname(&split("no prompt here")), None);
    }
}

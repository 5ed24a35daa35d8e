//! Interface-name canonicalization.
//!
//! Captures spell the same port many ways (`GE1/0/1`, ` ge1/0/1 `,
//! `GigabitEthernet 1/0/1`). Everything persisted goes through [`normalize`].

use std::cmp::Ordering;

/// Long forms first so a short alias never shadows a longer spelling.
const PREFIXES: &[(&str, &str)] = &[
    ("xgigabitethernet", "XGigabitEthernet"),
    ("tengigabitethernet", "TenGigabitEthernet"),
    ("gigabitethernet", "GigabitEthernet"),
    ("eth-trunk", "Eth-Trunk"),
    ("xge", "XGigabitEthernet"),
    ("ge", "GigabitEthernet"),
    ("te", "TenGigabitEthernet"),
];

const AGGREGATE_PREFIX: &str = "Eth-Trunk";

pub fn normalize(raw: &str) -> String {
    let compact: String = raw
        .split_whitespace()
        .collect::<String>()
        .replace('\\', "/");

    for (alias, canonical) in PREFIXES {
        let Some(rest) = strip_prefix_ignore_case(&compact, alias) else {
            continue;
        };
        if rest.starts_with(|ch: char| ch.is_ascii_digit()) {
            return format!("{canonical}{rest}");
        }
    }
    compact
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        value.get(prefix.len()..)
    } else {
        None
    }
}

/// True for a normalized aggregation-group name such as `Eth-Trunk6`.
pub fn is_aggregate_interface(name: &str) -> bool {
    name.strip_prefix(AGGREGATE_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit()))
}

/// Cheap shape check used by the parsers before accepting a row: a port name
/// starts with a letter and carries a slot/port number somewhere.
pub fn looks_like_interface(token: &str) -> bool {
    token.starts_with(|ch: char| ch.is_ascii_alphabetic())
        && token.chars().any(|ch| ch.is_ascii_digit())
}

/// Orders interface names the way operators read them: `GE1/0/2` before `GE1/0/10`.
pub fn interface_order(a: &str, b: &str) -> Ordering {
    let mut left = chunks(a);
    let mut right = chunks(b);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(ln), Ok(rn)) => ln.cmp(&rn),
                    _ => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn chunks(value: &str) -> impl Iterator<Item = &str> {
    let mut rest = value;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let digit = first.is_ascii_digit();
        let end = rest
            .char_indices()
            .find(|(_, ch)| ch.is_ascii_digit() != digit)
            .map_or(rest.len(), |(idx, _)| idx);
        let (head, tail) = rest.split_at(end);
        rest = tail;
        Some(head)
    })
}

#[cfg(test)]
mod tests {
    use super::{interface_order, is_aggregate_interface, looks_like_interface, normalize};
    use std::cmp::Ordering;

    #[test]
    fn expands_short_aliases_and_trims() {
        assert_eq!(normalize(" ge1/0/1 "), "GigabitEthernet1/0/1");
        assert_eq!(normalize("GE1/6/0/19"), "GigabitEthernet1/6/0/19");
        assert_eq!(normalize("XGE0/0/1"), "XGigabitEthernet0/0/1");
        assert_eq!(normalize("Te1/0/3"), "TenGigabitEthernet1/0/3");
        assert_eq!(normalize("GE 1/0/ 1"), "GigabitEthernet1/0/1");
        assert_eq!(normalize("GE1\\0\\1"), "GigabitEthernet1/0/1");
    }

    #[test]
    fn canonicalizes_long_form_case() {
        assert_eq!(normalize("gigabitethernet1/0/1"), "GigabitEthernet1/0/1");
        assert_eq!(normalize("ETH-TRUNK6"), "Eth-Trunk6");
        assert_eq!(normalize("Eth-Trunk 6"), "Eth-Trunk6");
        assert_eq!(normalize("Eth-Trunk6"), "Eth-Trunk6");
    }

    #[test]
    fn unknown_prefixes_pass_through() {
        assert_eq!(normalize("Vlanif100"), "Vlanif100");
        assert_eq!(normalize("MEth0/0/0"), "MEth0/0/0");
        assert_eq!(normalize("gei-0/1/0/1"), "gei-0/1/0/1");
        assert_eq!(normalize("Ten"), "Ten");
        assert_eq!(normalize("-"), "-");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn is_idempotent_over_mixed_inputs() {
        let inputs = [
            " ge1/0/1 ",
            "XGE0/0/1",
            "te1/0/3",
            "eth-trunk 12",
            "GigabitEthernet1/0/1",
            "40GE1/0/1",
            "gE",
            "ünïcödé 1",
            "\\\\",
            "xgigabitethernet0/0/9",
        ];
        for raw in inputs {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn recognizes_aggregate_and_interface_shapes() {
        assert!(is_aggregate_interface("Eth-Trunk6"));
        assert!(!is_aggregate_interface("Eth-Trunk"));
        assert!(!is_aggregate_interface("GigabitEthernet1/0/1"));
        assert!(looks_like_interface("GigabitEthernet1/0/1"));
        assert!(!looks_like_interface("Total"));
        assert!(!looks_like_interface("10"));
    }

    #[test]
    fn orders_port_numbers_numerically() {
        assert_eq!(
            interface_order("GigabitEthernet1/0/2", "GigabitEthernet1/0/10"),
            Ordering::Less
        );
        assert_eq!(
            interface_order("GigabitEthernet1/1/1", "GigabitEthernet1/0/9"),
            Ordering::Greater
        );
        assert_eq!(interface_order("Eth-Trunk1", "Eth-Trunk1"), Ordering::Equal);
    }
}

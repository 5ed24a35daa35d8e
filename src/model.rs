use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortStatus {
    Up,
    Down,
    /// `*down`: shut down by configuration.
    AdminDown,
    /// `^down`: held in standby.
    Standby,
}

impl PortStatus {
    /// Accepts the spellings found in status columns: `up`, `Up`, `*down`,
    /// `^down`, `up(s)`.
    pub fn parse(raw: &str) -> Option<Self> {
        let base = raw.split('(').next().unwrap_or(raw).trim();
        let lower = base.to_ascii_lowercase();
        match lower.as_str() {
            "up" | "selected" => Some(Self::Up),
            "down" | "unselect" | "unselected" => Some(Self::Down),
            "*down" => Some(Self::AdminDown),
            "^down" => Some(Self::Standby),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::AdminDown => "admin_down",
            Self::Standby => "standby",
        }
    }

    pub fn decode(raw: &str) -> Option<Self> {
        match raw {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "admin_down" => Some(Self::AdminDown),
            "standby" => Some(Self::Standby),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    Static,
    Negotiated,
    Other(String),
}

impl AggregationMode {
    pub fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        match upper.as_str() {
            "NORMAL" | "STATIC" | "MANUAL" => Self::Static,
            "LACP" | "LACP-STATIC" | "LACP-DYNAMIC" | "DYNAMIC" | "STATIC-LACP" => {
                Self::Negotiated
            }
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn encode(&self) -> &str {
        match self {
            Self::Static => "static",
            Self::Negotiated => "negotiated",
            Self::Other(raw) => raw,
        }
    }

    pub fn decode(raw: &str) -> Self {
        match raw {
            "static" => Self::Static,
            "negotiated" => Self::Negotiated,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StpState {
    Forwarding,
    Discarding,
    Blocking,
    Learning,
    Listening,
    Disabled,
    Other(String),
}

impl StpState {
    pub fn parse(raw: &str) -> Self {
        let lower = raw.trim().to_ascii_lowercase();
        match lower.as_str() {
            "forwarding" | "fwd" => Self::Forwarding,
            "discarding" | "disc" => Self::Discarding,
            "blocking" | "blocked" | "blk" => Self::Blocking,
            "learning" | "lrn" => Self::Learning,
            "listening" | "lis" => Self::Listening,
            "disabled" | "dis" => Self::Disabled,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Discarding | Self::Blocking)
    }

    pub fn encode(&self) -> &str {
        match self {
            Self::Forwarding => "forwarding",
            Self::Discarding => "discarding",
            Self::Blocking => "blocking",
            Self::Learning => "learning",
            Self::Listening => "listening",
            Self::Disabled => "disabled",
            Self::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Physical,
    Aggregated,
}

impl LinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Physical => "physical",
            Self::Aggregated => "aggregated",
        }
    }

    pub fn decode(raw: &str) -> Option<Self> {
        match raw {
            "physical" => Some(Self::Physical),
            "aggregated" => Some(Self::Aggregated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Trusted,
    Suspect,
    Ignore,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trusted => "trusted",
            Self::Suspect => "suspect",
            Self::Ignore => "ignore",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "trusted" => Some(Self::Trusted),
            "suspect" => Some(Self::Suspect),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }
}

/// Who last set a link's confidence. Detection only acts on `Default` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceSource {
    Default,
    Detector,
    Manual,
}

impl ConfidenceSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Detector => "detector",
            Self::Manual => "manual",
        }
    }

    pub fn decode(raw: &str) -> Self {
        match raw {
            "detector" => Self::Detector,
            "manual" => Self::Manual,
            _ => Self::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warning" | "warn" => Some(Self::Warning),
            "info" => Some(Self::Info),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    SuspectLoop,
    SuspectMixedLink,
    TrunkInconsistent,
    UnstableNeighbor,
    StpBlocked,
}

impl AnomalyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuspectLoop => "suspect_loop",
            Self::SuspectMixedLink => "suspect_mixed_link",
            Self::TrunkInconsistent => "trunk_inconsistent",
            Self::UnstableNeighbor => "unstable_neighbor",
            Self::StpBlocked => "stp_blocked",
        }
    }

    pub fn decode(raw: &str) -> Option<Self> {
        match raw {
            "suspect_loop" => Some(Self::SuspectLoop),
            "suspect_mixed_link" => Some(Self::SuspectMixedLink),
            "trunk_inconsistent" => Some(Self::TrunkInconsistent),
            "unstable_neighbor" => Some(Self::UnstableNeighbor),
            "stp_blocked" => Some(Self::StpBlocked),
            _ => None,
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub name: String,
    pub mgmt_address: Option<String>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub site: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub device: String,
    pub name: String,
    pub description: Option<String>,
    pub admin_status: Option<PortStatus>,
    pub oper_status: Option<PortStatus>,
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationMember {
    pub interface: String,
    pub status: Option<PortStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationGroup {
    pub device: String,
    pub name: String,
    pub mode: Option<AggregationMode>,
    pub oper_status: Option<PortStatus>,
    pub members: Vec<AggregationMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborObservation {
    pub device: String,
    pub local_interface: String,
    pub neighbor_device: String,
    pub neighbor_interface: Option<String>,
    pub holdtime: Option<u32>,
    pub source_file: String,
    pub collected_at: DateTime<Utc>,
}

/// One retained capture of a neighbor key, kept for the history-based rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborSample {
    pub local_interface: String,
    pub neighbor_device: String,
    pub holdtime: Option<u32>,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StpPort {
    pub device: String,
    pub instance: u16,
    pub interface: String,
    pub role: String,
    pub state: StpState,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub src_device: String,
    pub src_interface: String,
    pub dst_device: String,
    pub dst_interface: String,
    pub kind: LinkKind,
    pub confidence: Confidence,
    pub confidence_source: ConfidenceSource,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub device: String,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub detail: AnomalyDetail,
    pub detected_at: DateTime<Utc>,
}

/// Evidence carried by an anomaly. Stored as JSON and decoded by kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnomalyDetail {
    Loop(LoopDetail),
    MixedLink(MixedLinkDetail),
    Trunk(TrunkDetail),
    Unstable(UnstableDetail),
    StpBlocked(StpBlockedDetail),
}

impl AnomalyDetail {
    pub fn decode(kind: AnomalyKind, raw: &str) -> serde_json::Result<Self> {
        Ok(match kind {
            AnomalyKind::SuspectLoop => Self::Loop(serde_json::from_str(raw)?),
            AnomalyKind::SuspectMixedLink => Self::MixedLink(serde_json::from_str(raw)?),
            AnomalyKind::TrunkInconsistent => Self::Trunk(serde_json::from_str(raw)?),
            AnomalyKind::UnstableNeighbor => Self::Unstable(serde_json::from_str(raw)?),
            AnomalyKind::StpBlocked => Self::StpBlocked(serde_json::from_str(raw)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopDetail {
    pub interface: String,
    pub neighbors: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixedLinkDetail {
    pub interface: String,
    pub placeholder_samples: usize,
    pub total_samples: usize,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrunkDetail {
    pub group: String,
    pub members: BTreeMap<String, Vec<String>>,
    pub neighbors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnstableDetail {
    pub interface: String,
    pub neighbor: String,
    pub holdtimes: Vec<u32>,
    pub rule: String,
    pub measure: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StpBlockedDetail {
    pub ports: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportRecord {
    pub device_name: String,
    pub source_file: String,
    pub content_hash: String,
    pub imported_at: DateTime<Utc>,
    pub import_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSummary {
    pub name: String,
    pub mgmt_address: Option<String>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub site: Option<String>,
    pub interface_count: usize,
    pub neighbor_count: usize,
    pub link_count: usize,
    pub anomaly_count: usize,
    pub last_imported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceDetail {
    pub device: Device,
    pub interfaces: Vec<Interface>,
    pub groups: Vec<AggregationGroup>,
    pub neighbors: Vec<NeighborObservation>,
    pub stp_ports: Vec<StpPort>,
    pub links: Vec<Link>,
    pub anomalies: Vec<Anomaly>,
    pub imports: Vec<ImportRecord>,
}

/// A neighbor name that says "something is there but it did not identify
/// itself": empty, `-`, or only dashes and underscores.
pub fn is_placeholder_neighbor(name: &str) -> bool {
    let trimmed = name.trim();
    trimmed.chars().all(|ch| ch == '-' || ch == '_')
}

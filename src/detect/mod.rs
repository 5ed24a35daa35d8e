//! Rule-based anomaly detection over stored device state.
//!
//! Each run reads one device's current view, evaluates every rule as a pure
//! function of that view, and swaps the device's stored anomaly set in the
//! same write transaction.

pub mod stats;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::TopoError;
use crate::model::{
    Anomaly, AnomalyDetail, AnomalyKind, LoopDetail, MixedLinkDetail, NeighborObservation,
    NeighborSample, Severity, StpBlockedDetail, StpPort, TrunkDetail, UnstableDetail,
    is_placeholder_neighbor,
};
use crate::store::Store;
use crate::topology::{GroupResolution, refresh_links_on};

use stats::TimeSeries;

#[derive(Debug, Error, PartialEq)]
pub enum DetectError {
    #[error("insufficient samples: need {needed}, have {have}")]
    InsufficientSamples { needed: usize, have: usize },
    #[error("samples average to zero")]
    ZeroMean,
}

/// Trigger for `unstable_neighbor`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnstableRule {
    /// Coefficient of variation of the retained hold times above `threshold`.
    Variation { threshold: f64 },
    /// Any retained hold time below `min_holdtime_secs`.
    AbsoluteFloor { min_holdtime_secs: u32 },
}

impl UnstableRule {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Variation { .. } => "variation",
            Self::AbsoluteFloor { .. } => "absolute",
        }
    }
}

impl Default for UnstableRule {
    fn default() -> Self {
        Self::Variation { threshold: 0.3 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectConfig {
    pub unstable: UnstableRule,
    /// Share of placeholder samples above which an interface is mixed.
    pub mixed_link_ratio: f64,
    /// Move links behind warning anomalies from `trusted` to `suspect`.
    pub flag_links: bool,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            unstable: UnstableRule::default(),
            mixed_link_ratio: 0.5,
            flag_links: true,
        }
    }
}

/// Everything the rules look at for one device.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    pub current: Vec<NeighborObservation>,
    pub samples: Vec<NeighborSample>,
    pub groups: Vec<GroupResolution>,
    pub stp_ports: Vec<StpPort>,
}

/// A rule hit before it is stamped with device and time.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub detail: AnomalyDetail,
    /// Local interfaces whose links the finding casts doubt on.
    pub interfaces: Vec<String>,
}

/// Runs detection for one device, or for every known device when `device`
/// is `None`, and returns the fresh anomaly sets.
pub fn detect_anomalies(
    store: &Store,
    device: Option<&str>,
    config: &DetectConfig,
) -> Result<Vec<Anomaly>, TopoError> {
    let now = Utc::now();
    let devices = match device {
        Some(name) => vec![name.to_string()],
        None => store.device_names()?,
    };
    let mut out = Vec::new();
    for name in &devices {
        out.extend(detect_device_at(store, name, config, now)?);
    }
    Ok(out)
}

pub fn detect_device_at(
    store: &Store,
    device: &str,
    config: &DetectConfig,
    now: DateTime<Utc>,
) -> Result<Vec<Anomaly>, TopoError> {
    let tx = store.begin_immediate()?;
    let device_id = Store::device_id_on(&tx, device)?
        .ok_or_else(|| TopoError::UnknownDevice(device.to_string()))?;

    let groups = refresh_links_on(&tx, device, device_id, now)?;
    let state = DeviceState {
        current: Store::current_neighbors_on(&tx, device_id, device)?,
        samples: Store::neighbor_samples_on(&tx, device_id)?,
        groups,
        stp_ports: Store::stp_ports_on(&tx, device_id, device)?,
    };
    let findings = evaluate(&state, config);

    let mut doubted = BTreeSet::new();
    let mut anomalies = Vec::with_capacity(findings.len());
    for finding in findings {
        if finding.severity == Severity::Warning {
            tracing::warn!(device, kind = finding.kind.as_str(), "anomaly detected");
            doubted.extend(finding.interfaces);
        }
        anomalies.push(Anomaly {
            device: device.to_string(),
            kind: finding.kind,
            severity: finding.severity,
            detail: finding.detail,
            detected_at: now,
        });
    }
    Store::replace_anomalies_on(&tx, device_id, &anomalies)?;

    let doubted = if config.flag_links {
        doubted.into_iter().collect::<Vec<_>>()
    } else {
        Vec::new()
    };
    let flagged = Store::flag_suspect_on(&tx, device, &doubted, now)?;
    tx.commit()?;

    tracing::info!(
        device,
        anomalies = anomalies.len(),
        flagged_links = flagged,
        "detection finished"
    );
    Ok(anomalies)
}

/// Evaluates every rule. Output order depends only on `state`.
pub fn evaluate(state: &DeviceState, config: &DetectConfig) -> Vec<Finding> {
    let mut findings = suspect_loops(&state.current);
    findings.extend(mixed_links(&state.samples, config.mixed_link_ratio));
    findings.extend(inconsistent_trunks(&state.groups));
    findings.extend(unstable_neighbors(&state.samples, config.unstable));
    findings.extend(blocked_ports(&state.stp_ports));
    findings
}

fn suspect_loops(current: &[NeighborObservation]) -> Vec<Finding> {
    let mut by_interface: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for observation in current {
        if is_placeholder_neighbor(&observation.neighbor_device) {
            continue;
        }
        by_interface
            .entry(observation.local_interface.as_str())
            .or_default()
            .insert(observation.neighbor_device.as_str());
    }
    by_interface
        .into_iter()
        .filter(|(_, neighbors)| neighbors.len() > 1)
        .map(|(interface, neighbors)| Finding {
            kind: AnomalyKind::SuspectLoop,
            severity: Severity::Warning,
            detail: AnomalyDetail::Loop(LoopDetail {
                interface: interface.to_string(),
                count: neighbors.len(),
                neighbors: neighbors.into_iter().map(str::to_string).collect(),
            }),
            interfaces: vec![interface.to_string()],
        })
        .collect()
}

fn mixed_links(samples: &[NeighborSample], ratio: f64) -> Vec<Finding> {
    // (placeholder samples, all samples) per local interface
    let mut tally: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for sample in samples {
        let entry = tally.entry(sample.local_interface.as_str()).or_default();
        if is_placeholder_neighbor(&sample.neighbor_device) {
            entry.0 += 1;
        }
        entry.1 += 1;
    }
    tally
        .into_iter()
        .filter_map(|(interface, (placeholders, total))| {
            let share = placeholders as f64 / total as f64;
            (share > ratio).then(|| Finding {
                kind: AnomalyKind::SuspectMixedLink,
                severity: Severity::Warning,
                detail: AnomalyDetail::MixedLink(MixedLinkDetail {
                    interface: interface.to_string(),
                    placeholder_samples: placeholders,
                    total_samples: total,
                    ratio: share,
                }),
                interfaces: vec![interface.to_string()],
            })
        })
        .collect()
}

fn inconsistent_trunks(groups: &[GroupResolution]) -> Vec<Finding> {
    groups
        .iter()
        .filter(|group| group.is_inconsistent())
        .map(|group| {
            let mut interfaces = group.members.keys().cloned().collect::<Vec<_>>();
            interfaces.push(group.group.clone());
            Finding {
                kind: AnomalyKind::TrunkInconsistent,
                severity: Severity::Warning,
                detail: AnomalyDetail::Trunk(TrunkDetail {
                    group: group.group.clone(),
                    members: group.members.clone(),
                    neighbors: group.neighbors.clone(),
                }),
                interfaces,
            }
        })
        .collect()
}

fn unstable_neighbors(samples: &[NeighborSample], rule: UnstableRule) -> Vec<Finding> {
    let mut holdtimes: BTreeMap<(&str, &str), Vec<u32>> = BTreeMap::new();
    for sample in samples {
        if is_placeholder_neighbor(&sample.neighbor_device) {
            continue;
        }
        if let Some(holdtime) = sample.holdtime {
            holdtimes
                .entry((sample.local_interface.as_str(), sample.neighbor_device.as_str()))
                .or_default()
                .push(holdtime);
        }
    }

    let mut findings = Vec::new();
    for ((interface, neighbor), values) in holdtimes {
        if values.len() < 2 {
            continue;
        }
        let series = TimeSeries::from_holdtimes(&values);
        let verdict = match rule {
            UnstableRule::Variation { threshold } => {
                let Ok(cv) = series.coefficient_of_variation() else {
                    continue;
                };
                match cv {
                    cv if cv > threshold * 2.0 => Some((Severity::Warning, cv, threshold)),
                    cv if cv > threshold => Some((Severity::Info, cv, threshold)),
                    _ => None,
                }
            }
            UnstableRule::AbsoluteFloor { min_holdtime_secs } => {
                let below = values.iter().filter(|&&v| v < min_holdtime_secs).count();
                let floor = f64::from(min_holdtime_secs);
                let lowest = series.min().unwrap_or(floor);
                match below {
                    0 => None,
                    n if n == values.len() => Some((Severity::Warning, lowest, floor)),
                    _ => Some((Severity::Info, lowest, floor)),
                }
            }
        };
        let Some((severity, measure, threshold)) = verdict else {
            continue;
        };
        findings.push(Finding {
            kind: AnomalyKind::UnstableNeighbor,
            severity,
            detail: AnomalyDetail::Unstable(UnstableDetail {
                interface: interface.to_string(),
                neighbor: neighbor.to_string(),
                holdtimes: values,
                rule: rule.name().to_string(),
                measure,
                threshold,
            }),
            interfaces: vec![interface.to_string()],
        });
    }
    findings
}

fn blocked_ports(ports: &[StpPort]) -> Vec<Finding> {
    let blocked = ports
        .iter()
        .filter(|port| port.state.is_blocking())
        .map(|port| port.interface.clone())
        .collect::<BTreeSet<_>>();
    if blocked.is_empty() {
        return Vec::new();
    }
    vec![Finding {
        kind: AnomalyKind::StpBlocked,
        severity: Severity::Info,
        detail: AnomalyDetail::StpBlocked(StpBlockedDetail {
            count: blocked.len(),
            ports: blocked.into_iter().collect(),
        }),
        interfaces: Vec::new(),
    }]
}

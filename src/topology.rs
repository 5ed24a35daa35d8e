//! Single-hop topology around one device.
//!
//! Links are derived from the current neighbor view and the aggregation
//! groups, persisted so human confidence verdicts survive rebuilds, and then
//! filtered for the caller. Rendering is someone else's job.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;

use crate::error::TopoError;
use crate::model::{
    AggregationGroup, Confidence, Link, LinkKind, NeighborObservation, is_placeholder_neighbor,
};
use crate::normalize::{is_aggregate_interface, normalize};
use crate::store::Store;

/// Placeholder written when a neighbor did not report its port.
const UNKNOWN_PORT: &str = "-";

/// A link as the builder derives it, before stored confidence is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedLink {
    pub src_interface: String,
    pub dst_device: String,
    pub dst_interface: String,
    pub kind: LinkKind,
}

/// How one aggregation group's members resolved against the neighbor view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupResolution {
    pub group: String,
    /// Observed members only, each with its distinct named neighbors.
    pub members: BTreeMap<String, Vec<String>>,
    pub neighbors: Vec<String>,
    pub folded: bool,
}

impl GroupResolution {
    pub fn is_inconsistent(&self) -> bool {
        self.neighbors.len() > 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub name: String,
    pub center: bool,
    /// A capture of this device has been imported.
    pub imported: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Graph {
    pub center: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Link>,
    /// Physical links dropped by the `max_physical_links` cap.
    pub truncated_physical: usize,
    pub groups: Vec<GroupResolution>,
}

/// Turns the current neighbor view into links. A group whose observed
/// members all point at one neighbor folds into a single aggregated link;
/// otherwise every member keeps its own physical link.
pub fn derive_links(
    current: &[NeighborObservation],
    groups: &[AggregationGroup],
) -> (Vec<DerivedLink>, Vec<GroupResolution>) {
    let mut by_interface: HashMap<&str, Vec<&NeighborObservation>> = HashMap::new();
    for observation in current {
        if is_placeholder_neighbor(&observation.neighbor_device) {
            continue;
        }
        by_interface
            .entry(observation.local_interface.as_str())
            .or_default()
            .push(observation);
    }

    let mut links = Vec::new();
    let mut resolutions = Vec::with_capacity(groups.len());
    let mut folded_members = BTreeSet::new();

    for group in groups {
        let mut members = BTreeMap::new();
        let mut neighbors = BTreeSet::new();
        let mut remote_ports: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for member in &group.members {
            let Some(observations) = by_interface.get(member.interface.as_str()) else {
                continue;
            };
            let mut seen = BTreeSet::new();
            for observation in observations {
                seen.insert(observation.neighbor_device.clone());
                neighbors.insert(observation.neighbor_device.clone());
                if let Some(port) = observation.neighbor_interface.as_deref() {
                    remote_ports
                        .entry(observation.neighbor_device.as_str())
                        .or_default()
                        .insert(port);
                }
            }
            members.insert(member.interface.clone(), seen.into_iter().collect());
        }

        let folded = neighbors.len() == 1;
        if let (true, Some(neighbor)) = (folded, neighbors.first()) {
            let ports = remote_ports
                .get(neighbor.as_str())
                .map(|ports| ports.iter().copied().collect::<Vec<_>>().join(","))
                .filter(|joined| !joined.is_empty())
                .unwrap_or_else(|| UNKNOWN_PORT.to_string());
            links.push(DerivedLink {
                src_interface: group.name.clone(),
                dst_device: neighbor.clone(),
                dst_interface: ports,
                kind: LinkKind::Aggregated,
            });
            folded_members.extend(members.keys().cloned());
        }
        resolutions.push(GroupResolution {
            group: group.name.clone(),
            members,
            neighbors: neighbors.into_iter().collect(),
            folded,
        });
    }

    for observation in current {
        if is_placeholder_neighbor(&observation.neighbor_device)
            || folded_members.contains(&observation.local_interface)
        {
            continue;
        }
        let kind = if is_aggregate_interface(&observation.local_interface) {
            LinkKind::Aggregated
        } else {
            LinkKind::Physical
        };
        links.push(DerivedLink {
            src_interface: observation.local_interface.clone(),
            dst_device: observation.neighbor_device.clone(),
            dst_interface: observation
                .neighbor_interface
                .clone()
                .unwrap_or_else(|| UNKNOWN_PORT.to_string()),
            kind,
        });
    }
    (links, resolutions)
}

/// Re-derives the links of one device from stored state and persists them.
pub(crate) fn refresh_links_on(
    conn: &Connection,
    device: &str,
    device_id: i64,
    now: DateTime<Utc>,
) -> rusqlite::Result<Vec<GroupResolution>> {
    let current = Store::current_neighbors_on(conn, device_id, device)?;
    let groups = Store::aggregation_groups_on(conn, device_id, device)?;
    let (derived, resolutions) = derive_links(&current, &groups);
    Store::sync_links_on(conn, device, &derived, now)?;
    Ok(resolutions)
}

pub fn build_topology(
    store: &Store,
    device: &str,
    max_physical_links: usize,
) -> Result<Graph, TopoError> {
    let tx = store.begin_immediate()?;
    let device_id = Store::device_id_on(&tx, device)?
        .ok_or_else(|| TopoError::UnknownDevice(device.to_string()))?;
    let groups = refresh_links_on(&tx, device, device_id, Utc::now())?;
    let stored = Store::links_on(&tx, device, true)?;

    let (aggregated, physical): (Vec<_>, Vec<_>) = stored
        .into_iter()
        .filter(|link| link.confidence != Confidence::Ignore)
        .partition(|link| link.kind == LinkKind::Aggregated);
    let truncated_physical = physical.len().saturating_sub(max_physical_links);
    let mut edges = aggregated;
    edges.extend(physical.into_iter().take(max_physical_links));

    let mut nodes = vec![Node {
        name: device.to_string(),
        center: true,
        imported: Store::was_imported_on(&tx, device)?,
    }];
    let far_ends = edges
        .iter()
        .map(|link| link.dst_device.as_str())
        .filter(|name| *name != device)
        .collect::<BTreeSet<_>>();
    for name in far_ends {
        nodes.push(Node {
            name: name.to_string(),
            center: false,
            imported: Store::was_imported_on(&tx, name)?,
        });
    }
    tx.commit()?;

    if truncated_physical > 0 {
        tracing::info!(device, truncated_physical, max_physical_links, "physical links truncated");
    }
    Ok(Graph {
        center: device.to_string(),
        nodes,
        edges,
        truncated_physical,
        groups,
    })
}

/// Records a human verdict on one link. Later imports and detection runs
/// never overwrite it.
pub fn mark_link_confidence(
    store: &Store,
    device: &str,
    src_interface: &str,
    dst_device: &str,
    dst_interface: &str,
    confidence: Confidence,
    notes: Option<&str>,
) -> Result<Link, TopoError> {
    let src_interface = normalize(src_interface);
    let dst_interface = dst_interface
        .split(',')
        .map(normalize)
        .collect::<Vec<_>>()
        .join(",");
    let now = Utc::now();

    let tx = store.begin_immediate()?;
    let device_id = Store::device_id_on(&tx, device)?
        .ok_or_else(|| TopoError::UnknownDevice(device.to_string()))?;
    refresh_links_on(&tx, device, device_id, now)?;
    let changed = Store::mark_link_on(
        &tx,
        device,
        &src_interface,
        dst_device,
        &dst_interface,
        confidence,
        notes,
        now,
    )?;
    let unknown = || TopoError::UnknownLink {
        src_device: device.to_string(),
        src_interface: src_interface.clone(),
        dst_device: dst_device.to_string(),
        dst_interface: dst_interface.clone(),
    };
    if changed == 0 {
        return Err(unknown());
    }
    let link = Store::links_on(&tx, device, false)?
        .into_iter()
        .find(|link| {
            link.src_interface == src_interface
                && link.dst_device == dst_device
                && link.dst_interface == dst_interface
        });
    tx.commit()?;

    tracing::info!(
        device,
        src_interface = %src_interface,
        dst_device,
        confidence = confidence.as_str(),
        "link confidence set"
    );
    match link {
        Some(link) => Ok(link),
        None => store
            .links(dst_device)?
            .into_iter()
            .find(|link| link.src_interface == dst_interface && link.dst_device == device)
            .ok_or_else(unknown),
    }
}

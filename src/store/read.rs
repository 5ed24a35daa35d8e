use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use crate::error::TopoError;
use crate::model::{
    AggregationGroup, AggregationMember, AggregationMode, Anomaly, AnomalyDetail, AnomalyKind,
    Device, DeviceDetail, DeviceSummary, ImportRecord, Interface, NeighborObservation,
    NeighborSample, PortStatus, Severity, StpPort, StpState,
};
use crate::normalize::interface_order;
use crate::store::{Store, decode_time};

/// Row totals per table. Used to prove a skipped import changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RecordCounts {
    pub devices: usize,
    pub interfaces: usize,
    pub aggregation_groups: usize,
    pub aggregation_members: usize,
    pub neighbor_observations: usize,
    pub neighbor_samples: usize,
    pub stp_ports: usize,
    pub links: usize,
    pub anomalies: usize,
    pub imports: usize,
}

impl Store {
    pub fn has_import(&self, content_hash: &str) -> rusqlite::Result<bool> {
        Self::has_import_on(&self.conn, content_hash)
    }

    pub fn import_record(&self, content_hash: &str) -> rusqlite::Result<Option<ImportRecord>> {
        self.conn
            .query_row(
                "SELECT device_name, source_file, content_hash, imported_at, import_count
                 FROM imports WHERE content_hash = ?1",
                params![content_hash],
                import_from_row,
            )
            .optional()
    }

    /// Newest first.
    pub fn import_history(&self, limit: Option<usize>) -> rusqlite::Result<Vec<ImportRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT device_name, source_file, content_hash, imported_at, import_count
             FROM imports
             ORDER BY imported_at DESC, id DESC
             LIMIT ?1",
        )?;
        let limit = limit.map(|value| value as i64).unwrap_or(-1);
        let rows = stmt.query_map(params![limit], import_from_row)?;
        rows.collect()
    }

    /// True once at least one capture of `device` has been imported, as
    /// opposed to a device only seen from its neighbors.
    pub(crate) fn was_imported_on(conn: &Connection, device: &str) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT 1 FROM imports WHERE device_name = ?1 LIMIT 1",
            params![device],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
    }

    pub fn device_names(&self) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM devices ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    }

    pub fn device(&self, name: &str) -> rusqlite::Result<Option<Device>> {
        self.conn
            .query_row(
                "SELECT name, mgmt_address, vendor, model, site FROM devices WHERE name = ?1",
                params![name],
                device_from_row,
            )
            .optional()
    }

    pub fn list_devices(&self) -> rusqlite::Result<Vec<DeviceSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT d.name, d.mgmt_address, d.vendor, d.model, d.site,
                    (SELECT COUNT(*) FROM interfaces i WHERE i.device_id = d.id),
                    (SELECT COUNT(*) FROM neighbor_observations o WHERE o.device_id = d.id),
                    (SELECT COUNT(*) FROM links l WHERE l.src_device = d.name AND l.active = 1),
                    (SELECT COUNT(*) FROM anomalies a WHERE a.device_id = d.id),
                    (SELECT MAX(imported_at) FROM imports m WHERE m.device_name = d.name)
             FROM devices d
             ORDER BY d.name",
        )?;
        let rows = stmt.query_map([], |row| {
            let last: Option<String> = row.get(9)?;
            Ok(DeviceSummary {
                name: row.get(0)?,
                mgmt_address: row.get(1)?,
                vendor: row.get(2)?,
                model: row.get(3)?,
                site: row.get(4)?,
                interface_count: row.get(5)?,
                neighbor_count: row.get(6)?,
                link_count: row.get(7)?,
                anomaly_count: row.get(8)?,
                last_imported_at: last.map(|raw| decode_time(9, &raw)).transpose()?,
            })
        })?;
        rows.collect()
    }

    pub fn device_detail(&self, name: &str) -> Result<DeviceDetail, TopoError> {
        let conn = &self.conn;
        let Some(device) = self.device(name)? else {
            return Err(TopoError::UnknownDevice(name.to_string()));
        };
        let device_id = Self::device_id_on(conn, name)?
            .ok_or_else(|| TopoError::UnknownDevice(name.to_string()))?;

        let mut imports = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT device_name, source_file, content_hash, imported_at, import_count
                 FROM imports WHERE device_name = ?1
                 ORDER BY imported_at DESC, id DESC",
            )?;
            for record in stmt.query_map(params![name], import_from_row)? {
                imports.push(record?);
            }
        }

        Ok(DeviceDetail {
            interfaces: Self::interfaces_on(conn, device_id, name)?,
            groups: Self::aggregation_groups_on(conn, device_id, name)?,
            neighbors: Self::current_neighbors_on(conn, device_id, name)?,
            stp_ports: Self::stp_ports_on(conn, device_id, name)?,
            links: Self::links_on(conn, name, true)?,
            anomalies: Self::anomalies_on(conn, Some(name), None)?,
            imports,
            device,
        })
    }

    pub fn interfaces(&self, device: &str) -> Result<Vec<Interface>, TopoError> {
        let device_id = Self::device_id_on(&self.conn, device)?
            .ok_or_else(|| TopoError::UnknownDevice(device.to_string()))?;
        Ok(Self::interfaces_on(&self.conn, device_id, device)?)
    }

    pub(crate) fn interfaces_on(
        conn: &Connection,
        device_id: i64,
        device: &str,
    ) -> rusqlite::Result<Vec<Interface>> {
        let mut stmt = conn.prepare(
            "SELECT i.name, i.description, i.admin_status, i.oper_status, g.name
             FROM interfaces i
             LEFT JOIN aggregation_members m ON m.interface_id = i.id
             LEFT JOIN aggregation_groups g ON g.id = m.group_id
             WHERE i.device_id = ?1",
        )?;
        let mut out = stmt
            .query_map(params![device_id], |row| {
                Ok(Interface {
                    device: device.to_string(),
                    name: row.get(0)?,
                    description: row.get(1)?,
                    admin_status: status_at(row, 2)?,
                    oper_status: status_at(row, 3)?,
                    group: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        out.sort_by(|a, b| interface_order(&a.name, &b.name));
        Ok(out)
    }

    /// Groups with members in captured order.
    pub(crate) fn aggregation_groups_on(
        conn: &Connection,
        device_id: i64,
        device: &str,
    ) -> rusqlite::Result<Vec<AggregationGroup>> {
        let mut groups_stmt = conn.prepare(
            "SELECT id, name, mode, oper_status FROM aggregation_groups WHERE device_id = ?1",
        )?;
        let mut members_stmt = conn.prepare(
            "SELECT i.name, m.status
             FROM aggregation_members m
             JOIN interfaces i ON i.id = m.interface_id
             WHERE m.group_id = ?1
             ORDER BY m.position",
        )?;

        let rows = groups_stmt
            .query_map(params![device_id], |row| {
                let mode: Option<String> = row.get(2)?;
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    mode.as_deref().map(AggregationMode::decode),
                    status_at(row, 3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (group_id, name, mode, oper_status) in rows {
            let members = members_stmt
                .query_map(params![group_id], |row| {
                    Ok(AggregationMember {
                        interface: row.get(0)?,
                        status: status_at(row, 1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            out.push(AggregationGroup {
                device: device.to_string(),
                name,
                mode,
                oper_status,
                members,
            });
        }
        out.sort_by(|a, b| interface_order(&a.name, &b.name));
        Ok(out)
    }

    /// Per local interface, the observations that carry that interface's
    /// latest `collected_at`.
    pub(crate) fn current_neighbors_on(
        conn: &Connection,
        device_id: i64,
        device: &str,
    ) -> rusqlite::Result<Vec<NeighborObservation>> {
        let mut stmt = conn.prepare(
            "SELECT o.local_interface, o.neighbor_device, o.neighbor_interface,
                    o.holdtime, o.source_file, o.collected_at
             FROM neighbor_observations o
             WHERE o.device_id = ?1
               AND o.collected_at = (
                 SELECT MAX(latest.collected_at)
                 FROM neighbor_observations latest
                 WHERE latest.device_id = o.device_id
                   AND latest.local_interface = o.local_interface
               )",
        )?;
        let mut out = stmt
            .query_map(params![device_id], |row| {
                let collected: String = row.get(5)?;
                Ok(NeighborObservation {
                    device: device.to_string(),
                    local_interface: row.get(0)?,
                    neighbor_device: row.get(1)?,
                    neighbor_interface: row.get(2)?,
                    holdtime: row.get(3)?,
                    source_file: row.get(4)?,
                    collected_at: decode_time(5, &collected)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        out.sort_by(|a, b| {
            interface_order(&a.local_interface, &b.local_interface)
                .then_with(|| a.neighbor_device.cmp(&b.neighbor_device))
        });
        Ok(out)
    }

    /// Retained history, oldest first within each key.
    pub(crate) fn neighbor_samples_on(
        conn: &Connection,
        device_id: i64,
    ) -> rusqlite::Result<Vec<NeighborSample>> {
        let mut stmt = conn.prepare(
            "SELECT o.local_interface, o.neighbor_device, s.holdtime, s.collected_at
             FROM neighbor_samples s
             JOIN neighbor_observations o ON o.id = s.observation_id
             WHERE o.device_id = ?1
             ORDER BY o.local_interface, o.neighbor_device, s.collected_at, s.id",
        )?;
        let rows = stmt.query_map(params![device_id], |row| {
            let collected: String = row.get(3)?;
            Ok(NeighborSample {
                local_interface: row.get(0)?,
                neighbor_device: row.get(1)?,
                holdtime: row.get(2)?,
                collected_at: decode_time(3, &collected)?,
            })
        })?;
        rows.collect()
    }

    pub(crate) fn stp_ports_on(
        conn: &Connection,
        device_id: i64,
        device: &str,
    ) -> rusqlite::Result<Vec<StpPort>> {
        let mut stmt = conn.prepare(
            "SELECT instance, interface, role, state, collected_at
             FROM stp_ports WHERE device_id = ?1
             ORDER BY instance",
        )?;
        let mut out = stmt
            .query_map(params![device_id], |row| {
                let state: String = row.get(3)?;
                let collected: String = row.get(4)?;
                Ok(StpPort {
                    device: device.to_string(),
                    instance: row.get(0)?,
                    interface: row.get(1)?,
                    role: row.get(2)?,
                    state: StpState::parse(&state),
                    collected_at: decode_time(4, &collected)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        out.sort_by(|a, b| {
            a.instance
                .cmp(&b.instance)
                .then_with(|| interface_order(&a.interface, &b.interface))
        });
        Ok(out)
    }

    /// Stored anomalies, optionally narrowed to one device and one severity.
    pub fn anomalies(
        &self,
        device: Option<&str>,
        severity: Option<Severity>,
    ) -> rusqlite::Result<Vec<Anomaly>> {
        Self::anomalies_on(&self.conn, device, severity)
    }

    pub(crate) fn anomalies_on(
        conn: &Connection,
        device: Option<&str>,
        severity: Option<Severity>,
    ) -> rusqlite::Result<Vec<Anomaly>> {
        let mut stmt = conn.prepare(
            "SELECT d.name, a.kind, a.severity, a.detail_json, a.detected_at
             FROM anomalies a
             JOIN devices d ON d.id = a.device_id
             WHERE (?1 IS NULL OR d.name = ?1)
               AND (?2 IS NULL OR a.severity = ?2)
             ORDER BY d.name, a.id",
        )?;
        let rows = stmt.query_map(params![device, severity.map(Severity::as_str)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (device, kind, severity, detail, detected_at) = row?;
            let (Some(kind), Some(severity)) = (AnomalyKind::decode(&kind), Severity::parse(&severity))
            else {
                tracing::warn!(device = %device, kind = %kind, "skipping stored anomaly with unknown kind");
                continue;
            };
            let detail = match AnomalyDetail::decode(kind, &detail) {
                Ok(detail) => detail,
                Err(err) => {
                    tracing::warn!(
                        device = %device,
                        kind = kind.as_str(),
                        error = %err,
                        "skipping unreadable anomaly detail"
                    );
                    continue;
                }
            };
            out.push(Anomaly {
                device,
                kind,
                severity,
                detail,
                detected_at: decode_time(4, &detected_at)?,
            });
        }
        Ok(out)
    }

    pub fn record_counts(&self) -> rusqlite::Result<RecordCounts> {
        let count = |table: &str| -> rusqlite::Result<usize> {
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        };
        Ok(RecordCounts {
            devices: count("devices")?,
            interfaces: count("interfaces")?,
            aggregation_groups: count("aggregation_groups")?,
            aggregation_members: count("aggregation_members")?,
            neighbor_observations: count("neighbor_observations")?,
            neighbor_samples: count("neighbor_samples")?,
            stp_ports: count("stp_ports")?,
            links: count("links")?,
            anomalies: count("anomalies")?,
            imports: count("imports")?,
        })
    }
}

fn import_from_row(row: &Row<'_>) -> rusqlite::Result<ImportRecord> {
    let imported_at: String = row.get(3)?;
    Ok(ImportRecord {
        device_name: row.get(0)?,
        source_file: row.get(1)?,
        content_hash: row.get(2)?,
        imported_at: decode_time(3, &imported_at)?,
        import_count: row.get(4)?,
    })
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        name: row.get(0)?,
        mgmt_address: row.get(1)?,
        vendor: row.get(2)?,
        model: row.get(3)?,
        site: row.get(4)?,
    })
}

fn status_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<PortStatus>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.as_deref().and_then(PortStatus::decode))
}

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::TopoError;
use crate::model::{ImportRecord, PortStatus, is_placeholder_neighbor};
use crate::normalize::normalize;
use crate::parse::{GroupRow, NeighborRow, StpRow};
use crate::store::{Store, encode_time};

/// Interface fields a capture supplies. `None` leaves the stored value alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceUpdate<'a> {
    pub admin_status: Option<PortStatus>,
    pub oper_status: Option<PortStatus>,
    pub description: Option<&'a str>,
    /// Replace an already-set description instead of only filling a blank one.
    pub refresh_description: bool,
}

impl Store {
    pub(crate) fn upsert_device_on(
        conn: &Connection,
        name: &str,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<i64> {
        conn.execute(
            "INSERT INTO devices (name, created_at) VALUES (?1, ?2)
             ON CONFLICT(name) DO NOTHING",
            params![name, encode_time(now)],
        )?;
        conn.query_row(
            "SELECT id FROM devices WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
    }

    pub(crate) fn upsert_interface_on(
        conn: &Connection,
        device_id: i64,
        name: &str,
        update: InterfaceUpdate<'_>,
    ) -> rusqlite::Result<i64> {
        conn.execute(
            "INSERT INTO interfaces (device_id, name, description, admin_status, oper_status)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(device_id, name) DO UPDATE SET
                admin_status = COALESCE(excluded.admin_status, interfaces.admin_status),
                oper_status = COALESCE(excluded.oper_status, interfaces.oper_status),
                description = CASE
                    WHEN ?6 THEN COALESCE(excluded.description, interfaces.description)
                    ELSE COALESCE(interfaces.description, excluded.description)
                END",
            params![
                device_id,
                name,
                update.description,
                update.admin_status.map(PortStatus::as_str),
                update.oper_status.map(PortStatus::as_str),
                update.refresh_description,
            ],
        )?;
        conn.query_row(
            "SELECT id FROM interfaces WHERE device_id = ?1 AND name = ?2",
            params![device_id, name],
            |row| row.get(0),
        )
    }

    /// Upserts the group and replaces its member list with the captured one.
    /// A member that used to sit in another group moves.
    pub(crate) fn upsert_group_on(
        conn: &Connection,
        device_id: i64,
        group: &GroupRow,
    ) -> rusqlite::Result<i64> {
        Self::upsert_interface_on(
            conn,
            device_id,
            &group.name,
            InterfaceUpdate {
                oper_status: group.oper_status,
                ..InterfaceUpdate::default()
            },
        )?;
        conn.execute(
            "INSERT INTO aggregation_groups (device_id, name, mode, oper_status)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(device_id, name) DO UPDATE SET
                mode = COALESCE(excluded.mode, aggregation_groups.mode),
                oper_status = COALESCE(excluded.oper_status, aggregation_groups.oper_status)",
            params![
                device_id,
                group.name,
                group.mode.as_ref().map(|mode| mode.encode()),
                group.oper_status.map(PortStatus::as_str),
            ],
        )?;
        let group_id: i64 = conn.query_row(
            "SELECT id FROM aggregation_groups WHERE device_id = ?1 AND name = ?2",
            params![device_id, group.name],
            |row| row.get(0),
        )?;

        conn.execute(
            "DELETE FROM aggregation_members WHERE group_id = ?1",
            params![group_id],
        )?;
        for (position, member) in group.members.iter().enumerate() {
            let interface_id = Self::upsert_interface_on(
                conn,
                device_id,
                &member.interface,
                InterfaceUpdate::default(),
            )?;
            conn.execute(
                "INSERT INTO aggregation_members (group_id, interface_id, position, status)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(interface_id) DO UPDATE SET
                    group_id = excluded.group_id,
                    position = excluded.position,
                    status = excluded.status",
                params![
                    group_id,
                    interface_id,
                    position as i64,
                    member.status.map(PortStatus::as_str),
                ],
            )?;
        }
        Ok(group_id)
    }

    /// Records one neighbor row: refreshes the current observation when this
    /// capture is at least as new, appends a history sample, and trims history
    /// to `retention` samples per key.
    pub(crate) fn upsert_observation_on(
        conn: &Connection,
        device_id: i64,
        row: &NeighborRow,
        source_file: &str,
        collected_at: DateTime<Utc>,
        retention: usize,
    ) -> rusqlite::Result<i64> {
        Self::upsert_interface_on(
            conn,
            device_id,
            &row.local_interface,
            InterfaceUpdate::default(),
        )?;
        if !is_placeholder_neighbor(&row.neighbor_device) {
            Self::upsert_device_on(conn, &row.neighbor_device, collected_at)?;
        }

        let collected = encode_time(collected_at);
        conn.execute(
            "INSERT INTO neighbor_observations (
                device_id, local_interface, neighbor_device, neighbor_interface,
                holdtime, source_file, collected_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(device_id, local_interface, neighbor_device) DO UPDATE SET
                neighbor_interface = COALESCE(excluded.neighbor_interface, neighbor_observations.neighbor_interface),
                holdtime = COALESCE(excluded.holdtime, neighbor_observations.holdtime),
                source_file = excluded.source_file,
                collected_at = excluded.collected_at
             WHERE excluded.collected_at >= neighbor_observations.collected_at",
            params![
                device_id,
                row.local_interface,
                row.neighbor_device,
                row.neighbor_interface,
                row.holdtime,
                source_file,
                collected,
            ],
        )?;
        let observation_id: i64 = conn.query_row(
            "SELECT id FROM neighbor_observations
             WHERE device_id = ?1 AND local_interface = ?2 AND neighbor_device = ?3",
            params![device_id, row.local_interface, row.neighbor_device],
            |row| row.get(0),
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO neighbor_samples (
                observation_id, neighbor_interface, holdtime, source_file, collected_at
             ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                observation_id,
                row.neighbor_interface,
                row.holdtime,
                source_file,
                collected,
            ],
        )?;
        conn.execute(
            "DELETE FROM neighbor_samples
             WHERE observation_id = ?1
               AND id NOT IN (
                 SELECT id FROM neighbor_samples
                 WHERE observation_id = ?1
                 ORDER BY collected_at DESC, id DESC
                 LIMIT ?2
               )",
            params![observation_id, retention.max(2) as i64],
        )?;
        Ok(observation_id)
    }

    pub(crate) fn upsert_stp_port_on(
        conn: &Connection,
        device_id: i64,
        row: &StpRow,
        collected_at: DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        Self::upsert_interface_on(conn, device_id, &row.interface, InterfaceUpdate::default())?;
        conn.execute(
            "INSERT INTO stp_ports (device_id, instance, interface, role, state, collected_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(device_id, instance, interface) DO UPDATE SET
                role = excluded.role,
                state = excluded.state,
                collected_at = excluded.collected_at
             WHERE excluded.collected_at >= stp_ports.collected_at",
            params![
                device_id,
                row.instance,
                row.interface,
                row.role,
                row.state.encode(),
                encode_time(collected_at),
            ],
        )?;
        Ok(())
    }

    pub(crate) fn has_import_on(conn: &Connection, content_hash: &str) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT 1 FROM imports WHERE content_hash = ?1",
            params![content_hash],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
    }

    /// A forced re-import refreshes the existing audit row and bumps its count.
    pub(crate) fn record_import_on(
        conn: &Connection,
        record: &ImportRecord,
    ) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO imports (device_name, source_file, content_hash, imported_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(content_hash) DO UPDATE SET
                device_name = excluded.device_name,
                source_file = excluded.source_file,
                imported_at = excluded.imported_at,
                import_count = imports.import_count + 1",
            params![
                record.device_name,
                record.source_file,
                record.content_hash,
                encode_time(record.imported_at),
            ],
        )?;
        Ok(())
    }

    /// Human edit of an interface description. Imports keep this text unless
    /// they run with description refresh on.
    pub fn set_interface_description(
        &self,
        device: &str,
        interface: &str,
        description: Option<&str>,
    ) -> Result<(), TopoError> {
        let device_id = Self::device_id_on(&self.conn, device)?
            .ok_or_else(|| TopoError::UnknownDevice(device.to_string()))?;
        let interface = normalize(interface);
        let text = description.map(str::trim).filter(|text| !text.is_empty());
        let changed = self.conn.execute(
            "UPDATE interfaces SET description = ?3 WHERE device_id = ?1 AND name = ?2",
            params![device_id, interface, text],
        )?;
        if changed == 0 {
            return Err(TopoError::UnknownInterface {
                device: device.to_string(),
                interface,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::InterfaceUpdate;
    use crate::model::{ImportRecord, PortStatus};
    use crate::parse::{GroupRow, MemberRow, NeighborRow};
    use crate::store::Store;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 12, 28, hour, 0, 0).unwrap()
    }

    fn neighbor(local: &str, device: &str, holdtime: u32) -> NeighborRow {
        NeighborRow {
            local_interface: local.to_string(),
            neighbor_device: device.to_string(),
            neighbor_interface: Some("GigabitEthernet0/0/1".to_string()),
            holdtime: Some(holdtime),
            line: 1,
        }
    }

    #[test]
    fn parser_description_fills_but_never_overwrites() {
        let store = Store::open_in_memory().expect("store");
        let conn = store.conn();
        let device = Store::upsert_device_on(conn, "Core", at(9)).expect("device");
        let first = InterfaceUpdate {
            admin_status: Some(PortStatus::Up),
            oper_status: Some(PortStatus::Up),
            description: Some("uplink"),
            refresh_description: false,
        };
        Store::upsert_interface_on(conn, device, "GigabitEthernet1/0/1", first).expect("first");
        store
            .set_interface_description("Core", "ge1/0/1", Some("Link to Building-A 3F"))
            .expect("human edit");

        let later = InterfaceUpdate {
            oper_status: Some(PortStatus::Down),
            description: Some("uplink v2"),
            ..InterfaceUpdate::default()
        };
        Store::upsert_interface_on(conn, device, "GigabitEthernet1/0/1", later).expect("later");

        let interfaces = store.interfaces("Core").expect("interfaces");
        assert_eq!(interfaces.len(), 1);
        assert_eq!(
            interfaces[0].description.as_deref(),
            Some("Link to Building-A 3F")
        );
        assert_eq!(interfaces[0].admin_status, Some(PortStatus::Up));
        assert_eq!(interfaces[0].oper_status, Some(PortStatus::Down));

        let refresh = InterfaceUpdate {
            description: Some("uplink v3"),
            refresh_description: true,
            ..InterfaceUpdate::default()
        };
        Store::upsert_interface_on(conn, device, "GigabitEthernet1/0/1", refresh).expect("refresh");
        let interfaces = store.interfaces("Core").expect("interfaces");
        assert_eq!(interfaces[0].description.as_deref(), Some("uplink v3"));
    }

    #[test]
    fn describing_unknown_interface_fails() {
        let store = Store::open_in_memory().expect("store");
        Store::upsert_device_on(store.conn(), "Core", at(9)).expect("device");
        let err = store
            .set_interface_description("Core", "GE9/9/9", Some("x"))
            .expect_err("unknown interface");
        assert_eq!(err.code(), "interface_not_found");
        let err = store
            .set_interface_description("Nope", "GE1/0/1", Some("x"))
            .expect_err("unknown device");
        assert_eq!(err.code(), "device_not_found");
    }

    #[test]
    fn older_capture_does_not_replace_current_observation() {
        let store = Store::open_in_memory().expect("store");
        let conn = store.conn();
        let device = Store::upsert_device_on(conn, "Core", at(9)).expect("device");
        let row = neighbor("GigabitEthernet1/0/1", "Switch-A", 120);
        Store::upsert_observation_on(conn, device, &row, "new.log", at(14), 16).expect("new");
        let old = neighbor("GigabitEthernet1/0/1", "Switch-A", 90);
        Store::upsert_observation_on(conn, device, &old, "old.log", at(9), 16).expect("old");

        let current = Store::current_neighbors_on(conn, device, "Core").expect("current");
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].holdtime, Some(120));
        assert_eq!(current[0].source_file, "new.log");

        let samples = Store::neighbor_samples_on(conn, device).expect("samples");
        assert_eq!(
            samples.iter().map(|s| s.holdtime).collect::<Vec<_>>(),
            vec![Some(90), Some(120)]
        );
        assert!(store.device("Switch-A").expect("lookup").is_some());
    }

    #[test]
    fn sample_history_is_pruned_to_retention() {
        let store = Store::open_in_memory().expect("store");
        let conn = store.conn();
        let device = Store::upsert_device_on(conn, "Core", at(0)).expect("device");
        for hour in 0..6 {
            let row = neighbor("GigabitEthernet1/0/1", "Switch-A", 100 + hour);
            Store::upsert_observation_on(conn, device, &row, "cap.log", at(hour), 3)
                .expect("observation");
        }
        let samples = Store::neighbor_samples_on(conn, device).expect("samples");
        assert_eq!(
            samples.iter().map(|s| s.holdtime).collect::<Vec<_>>(),
            vec![Some(103), Some(104), Some(105)]
        );
    }

    #[test]
    fn placeholder_neighbors_do_not_become_devices() {
        let store = Store::open_in_memory().expect("store");
        let conn = store.conn();
        let device = Store::upsert_device_on(conn, "Core", at(9)).expect("device");
        let row = neighbor("GigabitEthernet1/0/5", "-", 90);
        Store::upsert_observation_on(conn, device, &row, "cap.log", at(9), 16).expect("row");
        assert_eq!(store.device_names().expect("names"), vec!["Core".to_string()]);
    }

    #[test]
    fn member_moves_between_groups() {
        let store = Store::open_in_memory().expect("store");
        let conn = store.conn();
        let device = Store::upsert_device_on(conn, "Core", at(9)).expect("device");
        let member = |name: &str| MemberRow {
            interface: name.to_string(),
            status: Some(PortStatus::Up),
            line: 1,
        };
        let group = |name: &str, members: Vec<MemberRow>| GroupRow {
            name: name.to_string(),
            mode: None,
            oper_status: Some(PortStatus::Up),
            members,
            line: 1,
        };
        Store::upsert_group_on(
            conn,
            device,
            &group("Eth-Trunk1", vec![member("GigabitEthernet1/0/1"), member("GigabitEthernet1/0/2")]),
        )
        .expect("trunk1");
        Store::upsert_group_on(conn, device, &group("Eth-Trunk2", vec![member("GigabitEthernet1/0/2")]))
            .expect("trunk2");

        let groups = Store::aggregation_groups_on(conn, device, "Core").expect("groups");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].members.len(), 1);
        assert_eq!(groups[1].members[0].interface, "GigabitEthernet1/0/2");
    }

    #[test]
    fn forced_import_bumps_the_audit_count() {
        let store = Store::open_in_memory().expect("store");
        let mut record = ImportRecord {
            device_name: "Core".to_string(),
            source_file: "a.log".to_string(),
            content_hash: "abc".to_string(),
            imported_at: at(9),
            import_count: 1,
        };
        Store::record_import_on(store.conn(), &record).expect("first");
        record.imported_at = at(10);
        Store::record_import_on(store.conn(), &record).expect("second");

        let stored = store.import_record("abc").expect("read").expect("present");
        assert_eq!(stored.import_count, 2);
        assert_eq!(stored.imported_at, at(10));
        assert_eq!(store.import_history(None).expect("history").len(), 1);
    }
}

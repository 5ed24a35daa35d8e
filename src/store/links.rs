use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use crate::model::{Anomaly, Confidence, ConfidenceSource, Link, LinkKind};
use crate::normalize::interface_order;
use crate::store::{Store, encode_time};
use crate::topology::DerivedLink;

impl Store {
    /// Makes the stored links of `device` match `derived`. Rows that are no
    /// longer derived stay for audit but go inactive; confidence is never
    /// touched here.
    pub(crate) fn sync_links_on(
        conn: &Connection,
        device: &str,
        derived: &[DerivedLink],
        now: DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        let updated_at = encode_time(now);
        conn.execute(
            "UPDATE links SET active = 0 WHERE src_device = ?1",
            params![device],
        )?;
        let mut stmt = conn.prepare_cached(
            "INSERT INTO links (
                src_device, src_interface, dst_device, dst_interface, kind, active, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
             ON CONFLICT(src_device, src_interface, dst_device, dst_interface) DO UPDATE SET
                kind = excluded.kind,
                active = 1,
                updated_at = excluded.updated_at",
        )?;
        for link in derived {
            stmt.execute(params![
                device,
                link.src_interface,
                link.dst_device,
                link.dst_interface,
                link.kind.as_str(),
                updated_at,
            ])?;
        }
        Ok(())
    }

    pub fn links(&self, device: &str) -> rusqlite::Result<Vec<Link>> {
        Self::links_on(&self.conn, device, true)
    }

    /// Aggregated links first, then physical links in interface order.
    pub(crate) fn links_on(
        conn: &Connection,
        device: &str,
        active_only: bool,
    ) -> rusqlite::Result<Vec<Link>> {
        let mut stmt = conn.prepare(
            "SELECT src_device, src_interface, dst_device, dst_interface, kind,
                    confidence, confidence_source, notes
             FROM links
             WHERE src_device = ?1 AND (?2 = 0 OR active = 1)",
        )?;
        let mut out = stmt
            .query_map(params![device, active_only], link_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        out.sort_by(|a, b| {
            b.kind
                .cmp(&a.kind)
                .then_with(|| interface_order(&a.src_interface, &b.src_interface))
                .then_with(|| a.dst_device.cmp(&b.dst_device))
        });
        Ok(out)
    }

    /// Sets a human verdict on a link, in both directions when the far side
    /// recorded the same adjacency. Returns the number of rows changed.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn mark_link_on(
        conn: &Connection,
        device: &str,
        src_interface: &str,
        dst_device: &str,
        dst_interface: &str,
        confidence: Confidence,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE links SET
                confidence = ?5,
                confidence_source = 'manual',
                notes = COALESCE(?6, notes),
                updated_at = ?7
             WHERE (src_device = ?1 AND src_interface = ?2 AND dst_device = ?3 AND dst_interface = ?4)
                OR (src_device = ?3 AND src_interface = ?4 AND dst_device = ?1 AND dst_interface = ?2)",
            params![
                device,
                src_interface,
                dst_device,
                dst_interface,
                confidence.as_str(),
                notes,
                encode_time(now),
            ],
        )
    }

    /// Detector verdicts: links on `interfaces` go `trusted -> suspect`. A
    /// flag stays until someone marks the link; manual links are left alone.
    pub(crate) fn flag_suspect_on(
        conn: &Connection,
        device: &str,
        interfaces: &[String],
        now: DateTime<Utc>,
    ) -> rusqlite::Result<usize> {
        let updated_at = encode_time(now);
        let mut stmt = conn.prepare_cached(
            "UPDATE links SET confidence = 'suspect', confidence_source = 'detector', updated_at = ?3
             WHERE src_device = ?1 AND src_interface = ?2
               AND confidence = 'trusted' AND confidence_source = 'default'",
        )?;
        let mut flagged = 0;
        for interface in interfaces {
            flagged += stmt.execute(params![device, interface, updated_at])?;
        }
        Ok(flagged)
    }

    /// Swaps the stored anomaly set of one device.
    pub(crate) fn replace_anomalies_on(
        conn: &Connection,
        device_id: i64,
        anomalies: &[Anomaly],
    ) -> rusqlite::Result<()> {
        conn.execute(
            "DELETE FROM anomalies WHERE device_id = ?1",
            params![device_id],
        )?;
        let mut stmt = conn.prepare_cached(
            "INSERT INTO anomalies (device_id, kind, severity, detail_json, detected_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for anomaly in anomalies {
            let detail = serde_json::to_string(&anomaly.detail)
                .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
            stmt.execute(params![
                device_id,
                anomaly.kind.as_str(),
                anomaly.severity.as_str(),
                detail,
                encode_time(anomaly.detected_at),
            ])?;
        }
        Ok(())
    }
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<Link> {
    let kind: String = row.get(4)?;
    let confidence: String = row.get(5)?;
    let source: String = row.get(6)?;
    Ok(Link {
        src_device: row.get(0)?,
        src_interface: row.get(1)?,
        dst_device: row.get(2)?,
        dst_interface: row.get(3)?,
        kind: LinkKind::decode(&kind).unwrap_or(LinkKind::Physical),
        confidence: Confidence::parse(&confidence).unwrap_or(Confidence::Trusted),
        confidence_source: ConfidenceSource::decode(&source),
        notes: row.get(7)?,
    })
}

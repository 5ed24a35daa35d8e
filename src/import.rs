//! One capture file in, one atomic store update out.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;

use crate::capture::{decode_capture, device_from_file_name, fingerprint, timestamp_from_file_name};
use crate::error::ImportError;
use crate::model::ImportRecord;
use crate::parse::{CaptureRecord, CommandKind, MalformedRow, ParsedCapture, parse_capture};
use crate::store::{InterfaceUpdate, Store, encode_time, is_constraint_violation};

pub const DEFAULT_SAMPLE_RETENTION: usize = 16;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Overrides the device name read from the prompt or file name.
    pub device: Option<String>,
    /// Re-apply a capture whose fingerprint is already recorded.
    pub force: bool,
    /// Overrides the collection time read from the file name.
    pub collected_at: Option<DateTime<Utc>>,
    pub refresh_descriptions: bool,
    pub sample_retention: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            device: None,
            force: false,
            collected_at: None,
            refresh_descriptions: false,
            sample_retention: DEFAULT_SAMPLE_RETENTION,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    pub sections: usize,
    pub neighbors: usize,
    pub groups: usize,
    pub members: usize,
    pub interfaces: usize,
    pub stp_ports: usize,
    pub blocked_ports: usize,
    pub malformed_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    pub device: String,
    pub source_file: String,
    pub content_hash: String,
    pub collected_at: Option<DateTime<Utc>>,
    pub counts: ImportCounts,
    /// The fingerprint was already imported and nothing was written.
    pub skipped: bool,
    pub malformed: Vec<MalformedRow>,
}

pub fn import_log_file(
    store: &Store,
    path: &Path,
    opts: &ImportOptions,
) -> Result<ImportResult, ImportError> {
    let bytes = fs::read(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    import_capture(store, path, &bytes, opts)
}

/// Imports capture bytes that were read from `path`. The path only feeds
/// the audit record and file-name inference.
pub fn import_capture(
    store: &Store,
    path: &Path,
    bytes: &[u8],
    opts: &ImportOptions,
) -> Result<ImportResult, ImportError> {
    let source_file = path.display().to_string();
    let content_hash = fingerprint(bytes);

    if !opts.force {
        if let Some(prior) = store.import_record(&content_hash)? {
            tracing::warn!(
                source_file = %source_file,
                content_hash = %content_hash,
                device = %prior.device_name,
                "capture already imported; skipping"
            );
            return Ok(skipped(prior.device_name, source_file, content_hash));
        }
    }

    let text = decode_capture(bytes).map_err(|err| ImportError::Encoding {
        source_file: source_file.clone(),
        reason: err.to_string(),
    })?;
    let parsed = parse_capture(&text);

    let device = opts
        .device
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| parsed.hostname.clone())
        .or_else(|| device_from_file_name(path))
        .ok_or_else(|| ImportError::UnresolvedDevice {
            source_file: source_file.clone(),
        })?;
    let collected_at = opts
        .collected_at
        .or_else(|| timestamp_from_file_name(path))
        .unwrap_or_else(Utc::now);

    let tx = store.begin_immediate()?;
    if !opts.force && Store::has_import_on(&tx, &content_hash)? {
        tracing::warn!(
            source_file = %source_file,
            content_hash = %content_hash,
            "capture imported concurrently; skipping"
        );
        return Ok(skipped(device, source_file, content_hash));
    }
    let unit = ImportUnit {
        conn: &tx,
        device: &device,
        source_file: &source_file,
        collected_at,
        opts,
    };
    let counts = unit.apply(&parsed)?;
    let record = ImportRecord {
        device_name: device.clone(),
        source_file: source_file.clone(),
        content_hash: content_hash.clone(),
        imported_at: Utc::now(),
        import_count: 1,
    };
    unit.guard(Store::record_import_on(&tx, &record), || {
        format!("import record {content_hash}")
    })?;
    tx.commit()?;

    tracing::info!(
        device = %device,
        source_file = %source_file,
        content_hash = %content_hash,
        neighbors = counts.neighbors,
        groups = counts.groups,
        interfaces = counts.interfaces,
        malformed = counts.malformed_rows,
        "capture imported"
    );
    Ok(ImportResult {
        device,
        source_file,
        content_hash,
        collected_at: Some(collected_at),
        counts,
        skipped: false,
        malformed: parsed.malformed,
    })
}

fn skipped(device: String, source_file: String, content_hash: String) -> ImportResult {
    ImportResult {
        device,
        source_file,
        content_hash,
        collected_at: None,
        counts: ImportCounts::default(),
        skipped: true,
        malformed: Vec::new(),
    }
}

/// Writes of one capture inside its transaction.
struct ImportUnit<'a> {
    conn: &'a Connection,
    device: &'a str,
    source_file: &'a str,
    collected_at: DateTime<Utc>,
    opts: &'a ImportOptions,
}

impl ImportUnit<'_> {
    fn apply(&self, parsed: &ParsedCapture) -> Result<ImportCounts, ImportError> {
        let mut counts = ImportCounts {
            sections: parsed.sections.values().sum(),
            malformed_rows: parsed.malformed.len(),
            ..ImportCounts::default()
        };
        let device_id = self.guard(
            Store::upsert_device_on(self.conn, self.device, self.collected_at),
            || format!("device {}", self.device),
        )?;

        if parsed.sections.contains_key(&CommandKind::SpanningTree) {
            self.guard(
                self.conn.execute(
                    "DELETE FROM stp_ports WHERE device_id = ?1 AND collected_at < ?2",
                    rusqlite::params![device_id, encode_time(self.collected_at)],
                ),
                || format!("stale spanning-tree ports of {}", self.device),
            )?;
        }

        for record in &parsed.records {
            match record {
                CaptureRecord::Interface(row) => {
                    let update = InterfaceUpdate {
                        admin_status: Some(row.admin_status),
                        oper_status: Some(row.oper_status),
                        description: row.description.as_deref(),
                        refresh_description: self.opts.refresh_descriptions,
                    };
                    self.guard(
                        Store::upsert_interface_on(self.conn, device_id, &row.interface, update),
                        || format!("interface {} (line {})", row.interface, row.line),
                    )?;
                    counts.interfaces += 1;
                }
                CaptureRecord::Aggregation(group) => {
                    self.guard(Store::upsert_group_on(self.conn, device_id, group), || {
                        format!("aggregation group {} (line {})", group.name, group.line)
                    })?;
                    counts.groups += 1;
                    counts.members += group.members.len();
                }
                CaptureRecord::Neighbor(row) => {
                    self.guard(
                        Store::upsert_observation_on(
                            self.conn,
                            device_id,
                            row,
                            self.source_file,
                            self.collected_at,
                            self.opts.sample_retention,
                        ),
                        || {
                            format!(
                                "neighbor {} -> {} (line {})",
                                row.local_interface, row.neighbor_device, row.line
                            )
                        },
                    )?;
                    counts.neighbors += 1;
                }
                CaptureRecord::SpanningTree(row) => {
                    self.guard(
                        Store::upsert_stp_port_on(self.conn, device_id, row, self.collected_at),
                        || format!("stp port {} (line {})", row.interface, row.line),
                    )?;
                    counts.stp_ports += 1;
                    if row.state.is_blocking() {
                        counts.blocked_ports += 1;
                    }
                }
            }
        }
        Ok(counts)
    }

    /// Constraint failures name the record that tripped them.
    fn guard<T>(
        &self,
        result: rusqlite::Result<T>,
        record: impl FnOnce() -> String,
    ) -> Result<T, ImportError> {
        result.map_err(|source| {
            if is_constraint_violation(&source) {
                ImportError::Integrity {
                    source_file: self.source_file.to_string(),
                    record: record(),
                    source,
                }
            } else {
                ImportError::Store(source)
            }
        })
    }
}

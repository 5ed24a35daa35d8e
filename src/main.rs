use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use glob::glob;
use serde_json::{Value, json};
use switchmap::archive::CaptureArchive;
use switchmap::capture::decode_capture;
use switchmap::config::{
    EffectiveConfig, SourceSpec, default_global_config_yaml, default_repo_config_yaml,
    expand_tilde, load_effective_config,
};
use switchmap::import::{ImportOptions, ImportResult, import_capture};
use switchmap::model::{Confidence, Severity};
use switchmap::{ImportError, Store, TopoError, build_topology, detect_anomalies, mark_link_confidence};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

const STATE_DIR: &str = ".switchmap";
const STORE_FILE: &str = "switchmap.sqlite";
const CAPTURES_DIR: &str = "captures";

#[derive(Debug)]
struct CliError {
    code: &'static str,
    message: String,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn io(code: &'static str, err: io::Error) -> Self {
        Self::new(code, err.to_string())
    }
}

impl From<rusqlite::Error> for CliError {
    fn from(value: rusqlite::Error) -> Self {
        Self::new("sqlite_error", value.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::new("json_error", value.to_string())
    }
}

impl From<TopoError> for CliError {
    fn from(value: TopoError) -> Self {
        Self::new(value.code(), value.to_string())
    }
}

impl From<ImportError> for CliError {
    fn from(value: ImportError) -> Self {
        Self::new(value.code(), value.to_string())
    }
}

#[derive(Parser, Debug)]
#[command(name = "switchmap")]
#[command(about = "Turns switch CLI captures into a device inventory, topology and anomaly list")]
struct Cli {
    /// Use the store under ~/.switchmap instead of ./.switchmap.
    #[arg(long, global = true)]
    global: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Init,
    /// Import capture files, directories or glob patterns.
    Import(ImportArgs),
    /// Import every capture matched by the configured sources.
    Ingest(IngestArgs),
    Devices,
    Device(DeviceArgs),
    Anomalies(AnomaliesArgs),
    Topology(TopologyArgs),
    /// Set a human confidence verdict on a link.
    Mark(MarkArgs),
    /// Set the description of an interface.
    Describe(DescribeArgs),
    History(HistoryArgs),
    ShowCapture(ShowCaptureArgs),
}

#[derive(Args, Debug)]
struct ImportArgs {
    #[arg(required = true)]
    paths: Vec<String>,
    #[arg(long)]
    device: Option<String>,
    #[arg(long)]
    force: bool,
    /// Run anomaly detection for every device that received new data.
    #[arg(long)]
    detect: bool,
}

#[derive(Args, Debug)]
struct IngestArgs {
    #[arg(long)]
    force: bool,
    #[arg(long)]
    detect: bool,
}

#[derive(Args, Debug)]
struct DeviceArgs {
    name: String,
}

#[derive(Args, Debug)]
struct AnomaliesArgs {
    #[arg(long)]
    device: Option<String>,
    #[arg(long)]
    severity: Option<String>,
    /// Print the stored anomaly set instead of re-running detection.
    #[arg(long)]
    stored: bool,
}

#[derive(Args, Debug)]
struct TopologyArgs {
    device: String,
    #[arg(long)]
    max_links: Option<usize>,
}

#[derive(Args, Debug)]
struct MarkArgs {
    device: String,
    src_interface: String,
    dst_device: String,
    dst_interface: String,
    confidence: String,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Args, Debug)]
struct DescribeArgs {
    device: String,
    interface: String,
    /// New description; an empty string clears it.
    text: String,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args, Debug)]
struct ShowCaptureArgs {
    content_hash: String,
    #[arg(long)]
    raw: bool,
}

#[derive(Debug, Clone)]
struct RepoPaths {
    root: PathBuf,
    store: PathBuf,
    captures: PathBuf,
    repo_config: PathBuf,
    user_config: PathBuf,
    mode: StorageMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageMode {
    RepoLocal,
    Global,
}

#[derive(Debug, Clone)]
struct ImportCandidate {
    path: PathBuf,
    device: Option<String>,
}

#[derive(Debug, Default)]
struct BatchSummary {
    scanned_inputs: usize,
    imported: usize,
    skipped_duplicates: usize,
    malformed_rows: usize,
    results: Vec<ImportResult>,
    failures: Vec<Value>,
}

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let payload = json!({
                "error": {
                    "code": err.code,
                    "message": err.message,
                }
            });
            eprintln!("{payload}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SWITCHMAP_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().map_err(|err| CliError::io("cwd_error", err))?;
    let paths = repo_paths(&cwd, cli.global)?;
    match cli.command {
        Command::Init => cmd_init(&paths),
        Command::Import(args) => cmd_import(&cwd, &paths, args),
        Command::Ingest(args) => cmd_ingest(&cwd, &paths, args),
        Command::Devices => cmd_devices(&paths),
        Command::Device(args) => cmd_device(&paths, args),
        Command::Anomalies(args) => cmd_anomalies(&cwd, &paths, args),
        Command::Topology(args) => cmd_topology(&cwd, &paths, args),
        Command::Mark(args) => cmd_mark(&paths, args),
        Command::Describe(args) => cmd_describe(&paths, args),
        Command::History(args) => cmd_history(&paths, args),
        Command::ShowCapture(args) => cmd_show_capture(&paths, args),
    }
}

fn cmd_init(paths: &RepoPaths) -> Result<(), CliError> {
    fs::create_dir_all(&paths.captures).map_err(|err| CliError::io("mkdir_error", err))?;
    let _ = Store::open(&paths.store)?;
    write_default_config(paths)?;

    print_json(&json!({
        "status": "ok",
        "switchmap_dir": paths.root,
        "store": paths.store,
        "captures": paths.captures,
        "mode": match paths.mode {
            StorageMode::RepoLocal => "repo",
            StorageMode::Global => "global",
        },
    }))
}

fn cmd_import(cwd: &Path, paths: &RepoPaths, args: ImportArgs) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let home = home_dir()?;
    let config = load_config(cwd, paths)?;
    let sources = args
        .paths
        .iter()
        .map(|path| SourceSpec {
            path: path.clone(),
            device: args.device.clone(),
        })
        .collect::<Vec<_>>();
    let candidates = resolve_source_files(cwd, &home, &sources, &config.exclude)?;
    if candidates.is_empty() {
        return Err(CliError::new(
            "no_inputs",
            "no capture files matched the given paths",
        ));
    }
    run_batch(paths, &config, candidates, args.force, args.detect)
}

fn cmd_ingest(cwd: &Path, paths: &RepoPaths, args: IngestArgs) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let home = home_dir()?;
    let config = load_config(cwd, paths)?;
    if config.sources.is_empty() {
        return Err(CliError::new(
            "missing_sources",
            "no capture sources configured; add sources in .switchmap/config.yml or ~/.switchmap/config.yml",
        ));
    }
    let candidates = resolve_source_files(cwd, &home, &config.sources, &config.exclude)?;
    run_batch(paths, &config, candidates, args.force, args.detect)
}

/// Imports each candidate as its own unit. A failing file is reported and
/// the batch moves on.
fn run_batch(
    paths: &RepoPaths,
    config: &EffectiveConfig,
    candidates: Vec<ImportCandidate>,
    force: bool,
    detect: bool,
) -> Result<(), CliError> {
    let store = Store::open(&paths.store)?;
    let archive = CaptureArchive::new(&paths.captures);
    let mut summary = BatchSummary::default();
    let mut touched = BTreeSet::new();

    for candidate in candidates {
        summary.scanned_inputs += 1;
        let bytes = match fs::read(&candidate.path) {
            Ok(bytes) => bytes,
            Err(err) => {
                summary.failures.push(json!({
                    "path": candidate.path,
                    "code": "read_error",
                    "error": err.to_string(),
                }));
                continue;
            }
        };
        let opts = ImportOptions {
            device: candidate.device.clone(),
            force,
            ..config.import_options()
        };
        let result = match import_capture(&store, &candidate.path, &bytes, &opts) {
            Ok(result) => result,
            Err(err) => {
                summary.failures.push(json!({
                    "path": candidate.path,
                    "code": err.code(),
                    "error": err.to_string(),
                }));
                continue;
            }
        };
        if result.skipped {
            summary.skipped_duplicates += 1;
        } else {
            summary.imported += 1;
            summary.malformed_rows += result.counts.malformed_rows;
            touched.insert(result.device.clone());
        }
        if let Err(err) = archive.store(&result.content_hash, &bytes) {
            summary.failures.push(json!({
                "path": candidate.path,
                "code": "archive_error",
                "error": err.to_string(),
            }));
        }
        summary.results.push(result);
    }

    let mut anomalies = Vec::new();
    if detect {
        for device in &touched {
            match detect_anomalies(&store, Some(device.as_str()), &config.detection) {
                Ok(found) => anomalies.extend(found),
                Err(err) => summary.failures.push(json!({
                    "device": device,
                    "code": err.code(),
                    "error": err.to_string(),
                })),
            }
        }
    }

    print_json(&json!({
        "status": if summary.failures.is_empty() { "ok" } else { "partial" },
        "scanned_inputs": summary.scanned_inputs,
        "imported": summary.imported,
        "skipped_duplicates": summary.skipped_duplicates,
        "malformed_rows": summary.malformed_rows,
        "results": summary.results,
        "anomalies": if detect { Some(anomalies) } else { None },
        "failure_count": summary.failures.len(),
        "failures": summary.failures,
    }))
}

fn cmd_devices(paths: &RepoPaths) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let store = Store::open(&paths.store)?;
    print_json(&json!({ "devices": store.list_devices()? }))
}

fn cmd_device(paths: &RepoPaths, args: DeviceArgs) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let store = Store::open(&paths.store)?;
    let detail = store.device_detail(&args.name)?;
    print_json(&serde_json::to_value(detail)?)
}

fn cmd_anomalies(cwd: &Path, paths: &RepoPaths, args: AnomaliesArgs) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let severity = args
        .severity
        .as_deref()
        .map(|raw| {
            Severity::parse(raw).ok_or_else(|| {
                CliError::new(
                    "invalid_severity",
                    format!("unknown severity `{raw}` (expected error, warning or info)"),
                )
            })
        })
        .transpose()?;
    let store = Store::open(&paths.store)?;

    let anomalies = if args.stored {
        store.anomalies(args.device.as_deref(), severity)?
    } else {
        let config = load_config(cwd, paths)?;
        detect_anomalies(&store, args.device.as_deref(), &config.detection)?
            .into_iter()
            .filter(|anomaly| severity.is_none_or(|wanted| anomaly.severity == wanted))
            .collect()
    };
    print_json(&json!({
        "count": anomalies.len(),
        "anomalies": anomalies,
    }))
}

fn cmd_topology(cwd: &Path, paths: &RepoPaths, args: TopologyArgs) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let config = load_config(cwd, paths)?;
    let store = Store::open(&paths.store)?;
    let max_links = args.max_links.unwrap_or(config.max_physical_links);
    let graph = build_topology(&store, &args.device, max_links)?;
    print_json(&serde_json::to_value(graph)?)
}

fn cmd_mark(paths: &RepoPaths, args: MarkArgs) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let confidence = Confidence::parse(&args.confidence).ok_or_else(|| {
        CliError::new(
            "invalid_confidence",
            format!(
                "unknown confidence `{}` (expected trusted, suspect or ignore)",
                args.confidence
            ),
        )
    })?;
    let store = Store::open(&paths.store)?;
    let link = mark_link_confidence(
        &store,
        &args.device,
        &args.src_interface,
        &args.dst_device,
        &args.dst_interface,
        confidence,
        args.notes.as_deref(),
    )?;
    print_json(&json!({ "status": "ok", "link": link }))
}

fn cmd_describe(paths: &RepoPaths, args: DescribeArgs) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let store = Store::open(&paths.store)?;
    store.set_interface_description(&args.device, &args.interface, Some(&args.text))?;
    let interface = store
        .interfaces(&args.device)?
        .into_iter()
        .find(|interface| interface.name == switchmap::normalize(&args.interface));
    print_json(&json!({ "status": "ok", "interface": interface }))
}

fn cmd_history(paths: &RepoPaths, args: HistoryArgs) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let store = Store::open(&paths.store)?;
    print_json(&json!({ "imports": store.import_history(args.limit)? }))
}

fn cmd_show_capture(paths: &RepoPaths, args: ShowCaptureArgs) -> Result<(), CliError> {
    require_initialized_paths(paths)?;
    let archive = CaptureArchive::new(&paths.captures);
    let path = archive
        .path_for(&args.content_hash)
        .map_err(|err| CliError::io("invalid_hash", err))?;
    if !archive.contains(&args.content_hash) {
        return Err(CliError::new(
            "capture_not_found",
            format!("capture `{}` not found", args.content_hash),
        ));
    }
    let bytes = archive
        .load(&args.content_hash)
        .map_err(|err| CliError::io("decompress_error", err))?;
    if args.raw {
        let mut stdout = io::stdout().lock();
        stdout
            .write_all(&bytes)
            .and_then(|()| stdout.flush())
            .map_err(|err| CliError::io("write_error", err))?;
        return Ok(());
    }

    let store = Store::open(&paths.store)?;
    let text = decode_capture(&bytes).map_err(|err| CliError::new("encoding_error", err.to_string()))?;
    print_json(&json!({
        "content_hash": args.content_hash,
        "path": path,
        "bytes": bytes.len(),
        "import": store.import_record(&args.content_hash)?,
        "text": text,
    }))
}

fn load_config(cwd: &Path, paths: &RepoPaths) -> Result<EffectiveConfig, CliError> {
    load_effective_config(cwd, Some(&paths.repo_config), Some(&paths.user_config))
        .map_err(|err| CliError::new("config_error", err.to_string()))
}

fn resolve_source_files(
    cwd: &Path,
    home: &Path,
    sources: &[SourceSpec],
    exclude_patterns: &[String],
) -> Result<Vec<ImportCandidate>, CliError> {
    let mut out = Vec::new();
    let excludes = compile_excludes(cwd, home, exclude_patterns)?;

    for source in sources {
        let raw_path = source.path.trim();
        if raw_path.is_empty() {
            continue;
        }
        let expanded = expand_tilde(raw_path, home);
        let expanded = if expanded.is_absolute() {
            expanded
        } else {
            cwd.join(expanded)
        };
        let source_files = if looks_like_glob(raw_path) {
            glob_paths(&expanded)?
        } else if expanded.is_dir() {
            WalkDir::new(&expanded)
                .into_iter()
                .filter_map(Result::ok)
                .map(|entry| entry.path().to_path_buf())
                .filter(|path| path.is_file())
                .collect::<Vec<_>>()
        } else if expanded.is_file() {
            vec![expanded]
        } else {
            Vec::new()
        };

        for path in source_files {
            if is_excluded(&path, &excludes) {
                continue;
            }
            out.push(ImportCandidate {
                path,
                device: source.device.clone(),
            });
        }
    }

    out.sort_by(|a, b| a.path.cmp(&b.path));
    out.dedup_by(|a, b| a.path == b.path);
    Ok(out)
}

fn looks_like_glob(path: &str) -> bool {
    ['*', '?', '[', ']', '{', '}']
        .iter()
        .any(|ch| path.contains(*ch))
}

fn glob_paths(pattern: &Path) -> Result<Vec<PathBuf>, CliError> {
    let pattern_str = pattern.to_string_lossy();
    let mut out = Vec::new();
    let entries = glob(&pattern_str)
        .map_err(|err| CliError::new("glob_error", format!("{} ({pattern_str})", err.msg)))?;
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => out.push(path),
            Ok(_) => {}
            Err(err) => {
                return Err(CliError::new("glob_error", err.to_string()));
            }
        }
    }
    Ok(out)
}

fn compile_excludes(
    cwd: &Path,
    home: &Path,
    patterns: &[String],
) -> Result<Vec<glob::Pattern>, CliError> {
    let mut compiled = Vec::new();
    for pattern in patterns {
        let raw = pattern.trim();
        if raw.is_empty() {
            continue;
        }
        let expanded = expand_tilde(raw, home);
        let normalized = if expanded.is_absolute() {
            expanded.to_string_lossy().to_string()
        } else {
            cwd.join(expanded).to_string_lossy().to_string()
        };
        let compiled_pattern = glob::Pattern::new(&normalized)
            .map_err(|err| CliError::new("exclude_glob_error", err.to_string()))?;
        compiled.push(compiled_pattern);
    }
    Ok(compiled)
}

fn is_excluded(path: &Path, excludes: &[glob::Pattern]) -> bool {
    excludes.iter().any(|pattern| pattern.matches_path(path))
}

fn repo_paths(cwd: &Path, global: bool) -> Result<RepoPaths, CliError> {
    let home = home_dir()?;
    let (root, mode) = if global {
        (home.join(STATE_DIR), StorageMode::Global)
    } else {
        (cwd.join(STATE_DIR), StorageMode::RepoLocal)
    };

    Ok(RepoPaths {
        store: root.join(STORE_FILE),
        captures: root.join(CAPTURES_DIR),
        repo_config: cwd.join(STATE_DIR).join("config.yml"),
        user_config: home.join(STATE_DIR).join("config.yml"),
        root,
        mode,
    })
}

fn require_initialized_paths(paths: &RepoPaths) -> Result<(), CliError> {
    if !paths.root.exists() || !paths.store.exists() || !paths.captures.exists() {
        return Err(CliError::new(
            "not_initialized",
            "switchmap is not initialized here; run `switchmap init`",
        ));
    }
    Ok(())
}

fn write_default_config(paths: &RepoPaths) -> Result<(), CliError> {
    let config_path = match paths.mode {
        StorageMode::RepoLocal => &paths.repo_config,
        StorageMode::Global => &paths.user_config,
    };
    if config_path.exists() {
        return Ok(());
    }
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|err| CliError::io("mkdir_error", err))?;
    }
    let default = match paths.mode {
        StorageMode::RepoLocal => default_repo_config_yaml(),
        StorageMode::Global => default_global_config_yaml(),
    };
    fs::write(config_path, default).map_err(|err| CliError::io("write_error", err))
}

fn home_dir() -> Result<PathBuf, CliError> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| CliError::new("home_error", "HOME environment variable is not set"))
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string(value)?;
    println!("{rendered}");
    Ok(())
}

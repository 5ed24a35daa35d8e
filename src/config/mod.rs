use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::detect::{DetectConfig, UnstableRule};
use crate::import::{DEFAULT_SAMPLE_RETENTION, ImportOptions};

pub const PROJECT_CONFIG_FILE: &str = ".switchmap.project.yml";
pub const DEFAULT_MAX_PHYSICAL_LINKS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub path: String,
    /// Device name for every capture under `path`, overriding prompt and
    /// file-name inference.
    pub device: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSettings {
    pub sample_retention: usize,
    pub refresh_descriptions: bool,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            sample_retention: DEFAULT_SAMPLE_RETENTION,
            refresh_descriptions: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub sources: Vec<SourceSpec>,
    pub exclude: Vec<String>,
    pub import: ImportSettings,
    pub max_physical_links: usize,
    pub detection: DetectConfig,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            exclude: Vec::new(),
            import: ImportSettings::default(),
            max_physical_links: DEFAULT_MAX_PHYSICAL_LINKS,
            detection: DetectConfig::default(),
        }
    }
}

impl EffectiveConfig {
    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            refresh_descriptions: self.import.refresh_descriptions,
            sample_retention: self.import.sample_retention,
            ..ImportOptions::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    sources: Option<Vec<RawSourceSpec>>,
    #[serde(default)]
    exclude: Option<Vec<String>>,
    #[serde(default)]
    import: Option<RawImport>,
    #[serde(default)]
    topology: Option<RawTopology>,
    #[serde(default)]
    detection: Option<RawDetection>,
}

#[derive(Debug, Deserialize)]
struct RawSourceSpec {
    path: String,
    #[serde(default)]
    device: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawImport {
    sample_retention: Option<usize>,
    refresh_descriptions: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTopology {
    max_physical_links: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDetection {
    mixed_link_ratio: Option<f64>,
    flag_links: Option<bool>,
    unstable_neighbor: Option<RawUnstable>,
}

#[derive(Debug, Default, Deserialize)]
struct RawUnstable {
    rule: Option<String>,
    threshold: Option<f64>,
    min_holdtime_secs: Option<u32>,
}

pub fn load_effective_config(
    cwd: &Path,
    repo_config: Option<&Path>,
    user_config: Option<&Path>,
) -> Result<EffectiveConfig, ConfigError> {
    let mut merged = EffectiveConfig::default();
    // Rule parameters are merged separately so a later layer can change the
    // rule name without repeating its numbers.
    let mut unstable = RawUnstable::default();

    if let Some(path) = user_config.filter(|path| path.exists()) {
        merge_layer(&mut merged, &mut unstable, load_config_layer(path)?);
    }
    if let Some(path) = find_nearest_project_config(cwd) {
        merge_layer(&mut merged, &mut unstable, load_config_layer(&path)?);
    }
    if let Some(path) = repo_config.filter(|path| path.exists()) {
        merge_layer(&mut merged, &mut unstable, load_config_layer(path)?);
    }

    merged.detection.unstable = resolve_unstable(&unstable)?;
    validate(&merged)?;
    Ok(merged)
}

pub fn find_nearest_project_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

fn merge_layer(merged: &mut EffectiveConfig, unstable: &mut RawUnstable, layer: RawConfig) {
    let sources = layer
        .sources
        .unwrap_or_default()
        .into_iter()
        .map(|raw| SourceSpec {
            path: raw.path,
            device: raw.device.filter(|name| !name.trim().is_empty()),
        })
        .collect();
    merge_sources_dedup(&mut merged.sources, sources);
    if let Some(exclude) = layer.exclude {
        merged.exclude = exclude;
    }
    if let Some(import) = layer.import {
        if let Some(value) = import.sample_retention {
            merged.import.sample_retention = value;
        }
        if let Some(value) = import.refresh_descriptions {
            merged.import.refresh_descriptions = value;
        }
    }
    if let Some(value) = layer.topology.and_then(|topology| topology.max_physical_links) {
        merged.max_physical_links = value;
    }
    if let Some(detection) = layer.detection {
        if let Some(value) = detection.mixed_link_ratio {
            merged.detection.mixed_link_ratio = value;
        }
        if let Some(value) = detection.flag_links {
            merged.detection.flag_links = value;
        }
        if let Some(layer) = detection.unstable_neighbor {
            unstable.rule = layer.rule.or(unstable.rule.take());
            unstable.threshold = layer.threshold.or(unstable.threshold);
            unstable.min_holdtime_secs = layer.min_holdtime_secs.or(unstable.min_holdtime_secs);
        }
    }
}

fn merge_sources_dedup(existing: &mut Vec<SourceSpec>, incoming: Vec<SourceSpec>) {
    let mut indices = existing
        .iter()
        .enumerate()
        .map(|(idx, source)| (source.path.clone(), idx))
        .collect::<HashMap<_, _>>();

    for source in incoming {
        if let Some(idx) = indices.get(&source.path).copied() {
            existing[idx] = source;
        } else {
            indices.insert(source.path.clone(), existing.len());
            existing.push(source);
        }
    }
}

fn resolve_unstable(raw: &RawUnstable) -> Result<UnstableRule, ConfigError> {
    let rule = raw.rule.as_deref().map(str::trim).unwrap_or("variation");
    match rule.to_ascii_lowercase().as_str() {
        "variation" => Ok(UnstableRule::Variation {
            threshold: raw.threshold.unwrap_or(0.3),
        }),
        "absolute" => Ok(UnstableRule::AbsoluteFloor {
            min_holdtime_secs: raw.min_holdtime_secs.unwrap_or(60),
        }),
        _ => Err(ConfigError::Invalid(format!(
            "unknown unstable_neighbor rule `{rule}` (expected variation or absolute)"
        ))),
    }
}

fn validate(config: &EffectiveConfig) -> Result<(), ConfigError> {
    if config.import.sample_retention < 2 {
        return Err(ConfigError::Invalid(
            "import.sample_retention must be at least 2".to_string(),
        ));
    }
    let ratio = config.detection.mixed_link_ratio;
    if !(0.0..1.0).contains(&ratio) {
        return Err(ConfigError::Invalid(format!(
            "detection.mixed_link_ratio must be in [0, 1), got {ratio}"
        )));
    }
    if let UnstableRule::Variation { threshold } = config.detection.unstable {
        if threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "detection.unstable_neighbor.threshold must be positive, got {threshold}"
            )));
        }
    }
    Ok(())
}

fn load_config_layer(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_layer(&content)
}

fn parse_config_layer(content: &str) -> Result<RawConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(RawConfig::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

pub fn load_config_file(path: &Path) -> Result<EffectiveConfig, ConfigError> {
    let mut merged = EffectiveConfig::default();
    let mut unstable = RawUnstable::default();
    merge_layer(&mut merged, &mut unstable, load_config_layer(path)?);
    merged.detection.unstable = resolve_unstable(&unstable)?;
    validate(&merged)?;
    Ok(merged)
}

pub fn default_repo_config_yaml() -> String {
    r#"sources:
  - path: captures/**/*.log
exclude: []
import:
  sample_retention: 16
  refresh_descriptions: false
topology:
  max_physical_links: 50
detection:
  mixed_link_ratio: 0.5
  flag_links: true
  unstable_neighbor:
    rule: variation
    threshold: 0.3
    min_holdtime_secs: 60
"#
    .to_string()
}

pub fn default_global_config_yaml() -> String {
    r#"sources: []
exclude: []
"#
    .to_string()
}

pub fn expand_tilde(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::{
        EffectiveConfig, default_repo_config_yaml, expand_tilde, load_config_file,
        load_effective_config,
    };
    use crate::detect::UnstableRule;
    use std::path::Path;

    #[test]
    fn parses_full_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            r#"sources:
  - path: captures/**/*.log
  - path: ./core/Core_CSS_*.log
    device: Core_CSS
exclude:
  - "**/scratch-*"
import:
  sample_retention: 8
topology:
  max_physical_links: 20
detection:
  flag_links: false
  unstable_neighbor:
    rule: absolute
    min_holdtime_secs: 45
"#,
        )
        .expect("write config");

        let parsed = load_config_file(&path).expect("parse config");
        assert_eq!(parsed.sources.len(), 2);
        assert_eq!(parsed.sources[0].device, None);
        assert_eq!(parsed.sources[1].device.as_deref(), Some("Core_CSS"));
        assert_eq!(parsed.exclude, vec!["**/scratch-*".to_string()]);
        assert_eq!(parsed.import.sample_retention, 8);
        assert!(!parsed.import.refresh_descriptions);
        assert_eq!(parsed.max_physical_links, 20);
        assert!(!parsed.detection.flag_links);
        assert_eq!(parsed.detection.mixed_link_ratio, 0.5);
        assert_eq!(
            parsed.detection.unstable,
            UnstableRule::AbsoluteFloor {
                min_holdtime_secs: 45
            }
        );
    }

    #[test]
    fn default_config_round_trips_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yml");
        std::fs::write(&path, default_repo_config_yaml()).expect("write config");
        let parsed = load_config_file(&path).expect("parse config");
        assert_eq!(parsed.sources.len(), 1);
        assert_eq!(
            EffectiveConfig {
                sources: Vec::new(),
                ..parsed
            },
            EffectiveConfig::default()
        );
    }

    #[test]
    fn rejects_bad_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yml");
        for bad in [
            "import:\n  sample_retention: 1\n",
            "detection:\n  unstable_neighbor:\n    rule: vibes\n",
            "detection:\n  mixed_link_ratio: 1.5\n",
            "unknown_key: true\n",
        ] {
            std::fs::write(&path, bad).expect("write config");
            assert!(load_config_file(&path).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn expands_tilde_paths() {
        let expanded = expand_tilde("~/captures", Path::new("/home/tester"));
        assert_eq!(expanded, Path::new("/home/tester/captures"));
    }

    #[test]
    fn merges_user_project_and_repo_layers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let repo = root.join("workspace/site-a");
        std::fs::create_dir_all(repo.join(".switchmap")).expect("repo config dir");
        std::fs::create_dir_all(root.join("home/.switchmap")).expect("home config dir");

        let user_cfg = root.join("home/.switchmap/config.yml");
        std::fs::write(
            &user_cfg,
            r#"sources:
  - path: /shared/global/*.log
  - path: /shared/dup/*.log
    device: FromUser
exclude:
  - "user-*"
detection:
  unstable_neighbor:
    threshold: 0.5
"#,
        )
        .expect("write user config");

        std::fs::write(
            root.join("workspace/.switchmap.project.yml"),
            r#"sources:
  - path: /shared/project/*.log
  - path: /shared/dup/*.log
    device: FromProject
topology:
  max_physical_links: 10
"#,
        )
        .expect("write project config");

        let repo_cfg = repo.join(".switchmap/config.yml");
        std::fs::write(
            &repo_cfg,
            r#"sources:
  - path: /shared/repo/*.log
  - path: /shared/dup/*.log
    device: FromRepo
exclude:
  - "repo-*"
"#,
        )
        .expect("write repo config");

        let merged =
            load_effective_config(&repo, Some(&repo_cfg), Some(&user_cfg)).expect("merge config");
        assert_eq!(merged.sources.len(), 4);
        assert_eq!(merged.sources[0].path, "/shared/global/*.log");
        assert_eq!(merged.sources[1].path, "/shared/dup/*.log");
        assert_eq!(merged.sources[1].device.as_deref(), Some("FromRepo"));
        assert_eq!(merged.sources[2].path, "/shared/project/*.log");
        assert_eq!(merged.sources[3].path, "/shared/repo/*.log");
        assert_eq!(merged.exclude, vec!["repo-*".to_string()]);
        assert_eq!(merged.max_physical_links, 10);
        assert_eq!(
            merged.detection.unstable,
            UnstableRule::Variation { threshold: 0.5 }
        );
    }

    #[test]
    fn uses_nearest_project_config_when_walking_parents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let repo = root.join("workspace/site-a");
        std::fs::create_dir_all(&repo).expect("repo dir");

        std::fs::write(
            root.join(".switchmap.project.yml"),
            "sources:\n  - path: /shared/root-project/*.log\n",
        )
        .expect("write root project config");
        std::fs::write(
            root.join("workspace/.switchmap.project.yml"),
            "sources:\n  - path: /shared/nearest-project/*.log\n",
        )
        .expect("write nearest project config");

        let merged = load_effective_config(&repo, None, None).expect("merge with nearest");
        assert_eq!(merged.sources.len(), 1);
        assert_eq!(merged.sources[0].path, "/shared/nearest-project/*.log");
    }
}

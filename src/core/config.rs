//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{LobbyError, Result};

/// Upper bound for any pixel dimension in `[layout]`.
pub const MAX_LAYOUT_PX: u32 = 1 << 16;

/// Full drive_lobby configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub remotes: RemotesConfig,
    pub layout: LayoutConfig,
    pub summary: SummaryConfig,
    pub debounce: DebounceConfig,
    pub paths: PathsConfig,
}

/// How remotes are discovered and probed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemotesConfig {
    /// rclone executable (name on PATH or absolute path).
    pub rclone_bin: PathBuf,
    /// Kill a probe that runs longer than this. 0 disables the timeout.
    pub probe_timeout_secs: u64,
    /// Start a new refresh cycle this often. 0 means manual refresh only.
    pub auto_refresh_secs: u64,
}

/// Pixel geometry for tiles and the summary panel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayoutConfig {
    pub tile_width: u32,
    pub tile_height: u32,
    pub x_pad: u32,
    pub y_pad: u32,
    pub summary_height: u32,
    /// Fraction of the container width left empty on each side of the summary.
    pub summary_margin_ratio: f64,
    pub summary_min_width: u32,
    /// Fraction of the summary width used by its usage bar.
    pub summary_bar_ratio: f64,
    /// Tile bar width is `tile_width - tile_bar_inset`.
    pub tile_bar_inset: u32,
}

/// Aggregate summary knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SummaryConfig {
    /// Nominal capacity counted per discovered drive, in GiB.
    pub nominal_gib_per_drive: f64,
}

/// Resize coalescing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DebounceConfig {
    pub resize_quiet_ms: u64,
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// JSONL record of presentation events; written only when requested.
    pub event_log: PathBuf,
}

impl Default for RemotesConfig {
    fn default() -> Self {
        Self {
            rclone_bin: PathBuf::from("rclone"),
            probe_timeout_secs: 0,
            auto_refresh_secs: 0,
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            tile_width: 260,
            tile_height: 200,
            x_pad: 20,
            y_pad: 20,
            summary_height: 220,
            summary_margin_ratio: 0.1,
            summary_min_width: 500,
            summary_bar_ratio: 0.9,
            tile_bar_inset: 20,
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            nominal_gib_per_drive: 15.0,
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            resize_quiet_ms: 80,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        Self {
            config_file: home_dir.join(".config/drive-lobby/config.toml"),
            event_log: home_dir.join(".local/state/drive-lobby/events.jsonl"),
        }
    }
}

impl RemotesConfig {
    /// Probe timeout, if one is configured.
    #[must_use]
    pub fn probe_timeout(&self) -> Option<Duration> {
        (self.probe_timeout_secs > 0).then(|| Duration::from_secs(self.probe_timeout_secs))
    }

    /// Auto-refresh period, if one is configured.
    #[must_use]
    pub fn auto_refresh(&self) -> Option<Duration> {
        (self.auto_refresh_secs > 0).then(|| Duration::from_secs(self.auto_refresh_secs))
    }
}

impl DebounceConfig {
    #[must_use]
    pub fn resize_quiet(&self) -> Duration {
        Duration::from_millis(self.resize_quiet_ms)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| LobbyError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(LobbyError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(|name| env::var(name).ok())?;
        cfg.validate()?;
        log::debug!(
            "loaded config from {}",
            cfg.paths.config_file.display()
        );
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for diagnostics.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut var = |name: &str| lookup(name).filter(|raw| !raw.trim().is_empty());

        if let Some(raw) = var("DLB_RCLONE_BIN") {
            self.remotes.rclone_bin = PathBuf::from(raw);
        }
        if let Some(raw) = var("DLB_PROBE_TIMEOUT_SECS") {
            self.remotes.probe_timeout_secs = parse_env("DLB_PROBE_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = var("DLB_AUTO_REFRESH_SECS") {
            self.remotes.auto_refresh_secs = parse_env("DLB_AUTO_REFRESH_SECS", &raw)?;
        }
        if let Some(raw) = var("DLB_LAYOUT_TILE_WIDTH") {
            self.layout.tile_width = parse_env("DLB_LAYOUT_TILE_WIDTH", &raw)?;
        }
        if let Some(raw) = var("DLB_LAYOUT_TILE_HEIGHT") {
            self.layout.tile_height = parse_env("DLB_LAYOUT_TILE_HEIGHT", &raw)?;
        }
        if let Some(raw) = var("DLB_LAYOUT_X_PAD") {
            self.layout.x_pad = parse_env("DLB_LAYOUT_X_PAD", &raw)?;
        }
        if let Some(raw) = var("DLB_LAYOUT_Y_PAD") {
            self.layout.y_pad = parse_env("DLB_LAYOUT_Y_PAD", &raw)?;
        }
        if let Some(raw) = var("DLB_SUMMARY_NOMINAL_GIB_PER_DRIVE") {
            self.summary.nominal_gib_per_drive =
                parse_env("DLB_SUMMARY_NOMINAL_GIB_PER_DRIVE", &raw)?;
        }
        if let Some(raw) = var("DLB_DEBOUNCE_RESIZE_QUIET_MS") {
            self.debounce.resize_quiet_ms = parse_env("DLB_DEBOUNCE_RESIZE_QUIET_MS", &raw)?;
        }
        if let Some(raw) = var("DLB_EVENT_LOG") {
            self.paths.event_log = PathBuf::from(raw);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.remotes.rclone_bin.as_os_str().is_empty() {
            return Err(LobbyError::InvalidConfig {
                details: "remotes.rclone_bin must not be empty".to_string(),
            });
        }

        let layout = &self.layout;
        for (name, val) in [
            ("tile_width", layout.tile_width),
            ("tile_height", layout.tile_height),
            ("summary_height", layout.summary_height),
        ] {
            if val == 0 {
                return Err(LobbyError::InvalidConfig {
                    details: format!("layout.{name} must be > 0"),
                });
            }
        }

        for (name, val) in [
            ("tile_width", layout.tile_width),
            ("tile_height", layout.tile_height),
            ("x_pad", layout.x_pad),
            ("y_pad", layout.y_pad),
            ("summary_height", layout.summary_height),
            ("summary_min_width", layout.summary_min_width),
        ] {
            if val > MAX_LAYOUT_PX {
                return Err(LobbyError::InvalidConfig {
                    details: format!("layout.{name} must be <= {MAX_LAYOUT_PX}, got {val}"),
                });
            }
        }

        if layout.tile_bar_inset >= layout.tile_width {
            return Err(LobbyError::InvalidConfig {
                details: format!(
                    "layout.tile_bar_inset ({}) must be < layout.tile_width ({})",
                    layout.tile_bar_inset, layout.tile_width
                ),
            });
        }

        if !(0.0..0.5).contains(&layout.summary_margin_ratio) {
            return Err(LobbyError::InvalidConfig {
                details: format!(
                    "layout.summary_margin_ratio must be in [0, 0.5), got {}",
                    layout.summary_margin_ratio
                ),
            });
        }

        if !(layout.summary_bar_ratio > 0.0 && layout.summary_bar_ratio <= 1.0) {
            return Err(LobbyError::InvalidConfig {
                details: format!(
                    "layout.summary_bar_ratio must be in (0, 1], got {}",
                    layout.summary_bar_ratio
                ),
            });
        }

        let nominal = self.summary.nominal_gib_per_drive;
        if !nominal.is_finite() || nominal < 0.0 {
            return Err(LobbyError::InvalidConfig {
                details: format!("summary.nominal_gib_per_drive must be >= 0, got {nominal}"),
            });
        }

        Ok(())
    }
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| LobbyError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

#[cfg(test)]
mod tests {
    use super::{Config, LobbyError};
    use std::collections::HashMap;
    use std::io::Write;
    use std::path::Path;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_reference_geometry() {
        let cfg = Config::default();
        assert_eq!(cfg.layout.tile_width, 260);
        assert_eq!(cfg.layout.tile_height, 200);
        assert_eq!(cfg.layout.x_pad, 20);
        assert_eq!(cfg.layout.summary_height, 220);
        assert_eq!(cfg.debounce.resize_quiet_ms, 80);
        assert!((cfg.summary.nominal_gib_per_drive - 15.0).abs() < f64::EPSILON);
        assert!(cfg.remotes.probe_timeout().is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let env = vars(&[
            ("DLB_RCLONE_BIN", "/opt/rclone"),
            ("DLB_PROBE_TIMEOUT_SECS", "12"),
            ("DLB_LAYOUT_TILE_WIDTH", "300"),
            ("DLB_SUMMARY_NOMINAL_GIB_PER_DRIVE", "2048"),
            ("DLB_AUTO_REFRESH_SECS", "  "),
        ]);
        let mut cfg = Config::default();
        cfg.apply_env_overrides_from(|name| env.get(name).cloned())
            .expect("overrides");

        assert_eq!(cfg.remotes.rclone_bin, Path::new("/opt/rclone"));
        assert_eq!(cfg.remotes.probe_timeout_secs, 12);
        assert_eq!(cfg.layout.tile_width, 300);
        assert!((cfg.summary.nominal_gib_per_drive - 2048.0).abs() < f64::EPSILON);
        // Blank values are ignored.
        assert_eq!(cfg.remotes.auto_refresh_secs, 0);
    }

    #[test]
    fn env_override_parse_failure_is_reported() {
        let env = vars(&[("DLB_LAYOUT_X_PAD", "wide")]);
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_overrides_from(|name| env.get(name).cloned())
            .unwrap_err();
        assert!(matches!(err, LobbyError::ConfigParse { context: "env", .. }));
        assert!(err.to_string().contains("DLB_LAYOUT_X_PAD"));
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/dlb/config.toml")));
        assert!(matches!(result, Err(LobbyError::MissingConfig { .. })));
    }

    #[test]
    fn load_reads_partial_toml_and_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "[layout]\ntile_width = 300\n\n[summary]\nnominal_gib_per_drive = 100.0"
        )
        .expect("write");

        let cfg = Config::load(Some(file.path())).expect("load");
        assert_eq!(cfg.layout.tile_width, 300);
        assert_eq!(cfg.layout.tile_height, 200);
        assert!((cfg.summary.nominal_gib_per_drive - 100.0).abs() < f64::EPSILON);
        assert_eq!(cfg.paths.config_file, file.path());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[layout\ntile_width = ").expect("write");
        let err = Config::load(Some(file.path())).unwrap_err();
        assert_eq!(err.code(), "DLB-1003");
    }

    #[test]
    fn bar_inset_wider_than_tile_rejected() {
        let mut cfg = Config::default();
        cfg.layout.tile_bar_inset = 260;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("tile_bar_inset"));
    }

    #[test]
    fn zero_tile_width_rejected() {
        let mut cfg = Config::default();
        cfg.layout.tile_width = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn oversized_geometry_is_rejected_on_load() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[layout]\ntile_width = 4294967295").expect("write");
        let err = Config::load(Some(file.path())).unwrap_err();
        assert_eq!(err.code(), "DLB-1001");
        assert!(err.to_string().contains("layout.tile_width"));

        let mut cfg = Config::default();
        cfg.layout.y_pad = super::MAX_LAYOUT_PX + 1;
        assert!(cfg.validate().is_err());
        cfg.layout.y_pad = super::MAX_LAYOUT_PX;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn negative_nominal_capacity_rejected() {
        let mut cfg = Config::default();
        cfg.summary.nominal_gib_per_drive = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn stable_hash_deterministic() {
        let cfg = Config::default();
        let h1 = cfg.stable_hash().expect("hash");
        let h2 = cfg.stable_hash().expect("hash");
        assert_eq!(h1, h2);
        let mut other = cfg;
        other.layout.tile_width += 1;
        assert_ne!(h1, other.stable_hash().expect("hash"));
    }
}

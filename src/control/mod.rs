// Control flags polled at the start of every cycle
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::TraderError;
use crate::models::{ControlSignals, MAX_SAMPLING_INTERVAL_MINUTES};

/// Environment override prefix, e.g. `MEANREV__TRADER__TRADE=pause`
pub const ENV_PREFIX: &str = "MEANREV";

/// Produces a fresh `ControlSignals` snapshot on demand
pub trait ControlSource: Send + Sync {
    fn snapshot(&self) -> Result<ControlSignals, TraderError>;
}

#[derive(Debug, Deserialize)]
struct ControlFile {
    trader: TraderSection,
    scraper: ScraperSection,
}

#[derive(Debug, Deserialize)]
struct TraderSection {
    trade: String,
    trader_script: String,
    #[serde(default)]
    total_invested: f64,
}

#[derive(Debug, Deserialize)]
struct ScraperSection {
    scraper_frequency: u64,
}

impl TryFrom<ControlFile> for ControlSignals {
    type Error = TraderError;

    fn try_from(file: ControlFile) -> Result<Self, Self::Error> {
        let frequency = file.scraper.scraper_frequency;
        if frequency == 0 || frequency > MAX_SAMPLING_INTERVAL_MINUTES {
            return Err(TraderError::ConfigUnavailable(format!(
                "scraper_frequency must be between 1 and {} minutes, got {}",
                MAX_SAMPLING_INTERVAL_MINUTES, frequency
            )));
        }

        Ok(ControlSignals {
            trade_enabled: is_run(&file.trader.trade),
            script_running: is_run(&file.trader.trader_script),
            total_invested: file.trader.total_invested,
            sampling_interval_minutes: file.scraper.scraper_frequency,
        })
    }
}

fn is_run(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("run")
}

/// TOML control file, re-read on every snapshot
///
/// ```toml
/// [trader]
/// trade = "run"
/// trader_script = "run"
/// total_invested = 1000.0
///
/// [scraper]
/// scraper_frequency = 10
/// ```
#[derive(Debug, Clone)]
pub struct FileControlSource {
    path: PathBuf,
    env_overrides: bool,
}

impl FileControlSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            env_overrides: true,
        }
    }

    /// Ignore `MEANREV__*` environment overrides
    pub fn without_env_overrides(mut self) -> Self {
        self.env_overrides = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ControlSource for FileControlSource {
    fn snapshot(&self) -> Result<ControlSignals, TraderError> {
        let mut builder = Config::builder()
            .add_source(File::from(self.path.as_path()).format(FileFormat::Toml));

        if self.env_overrides {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let file: ControlFile = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| {
                TraderError::ConfigUnavailable(format!("{}: {}", self.path.display(), e))
            })?;

        ControlSignals::try_from(file)
    }
}

/// In-process control source that tests and embedders can flip at runtime
#[derive(Debug, Clone)]
pub struct StaticControlSource {
    signals: Arc<Mutex<Option<ControlSignals>>>,
}

impl StaticControlSource {
    pub fn new(signals: ControlSignals) -> Self {
        Self {
            signals: Arc::new(Mutex::new(Some(signals))),
        }
    }

    pub fn set(&self, signals: ControlSignals) {
        if let Ok(mut guard) = self.signals.lock() {
            *guard = Some(signals);
        }
    }

    /// Apply a change to the current snapshot
    pub fn update(&self, change: impl FnOnce(&mut ControlSignals)) {
        if let Ok(mut guard) = self.signals.lock() {
            if let Some(signals) = guard.as_mut() {
                change(signals);
            }
        }
    }

    /// Make snapshots fail until `set` is called again
    pub fn set_unavailable(&self) {
        if let Ok(mut guard) = self.signals.lock() {
            *guard = None;
        }
    }
}

impl ControlSource for StaticControlSource {
    fn snapshot(&self) -> Result<ControlSignals, TraderError> {
        self.signals
            .lock()
            .map_err(|_| TraderError::ConfigUnavailable("control lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| TraderError::ConfigUnavailable("control source unavailable".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_control(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("coinbase_parameters.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_reads_control_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_control(
            dir.path(),
            r#"
[trader]
trade = "run"
trader_script = "run"
total_invested = 1000.0

[scraper]
scraper_frequency = 10
"#,
        );

        let signals = FileControlSource::new(path)
            .without_env_overrides()
            .snapshot()
            .unwrap();

        assert_eq!(
            signals,
            ControlSignals {
                trade_enabled: true,
                script_running: true,
                total_invested: 1000.0,
                sampling_interval_minutes: 10,
            }
        );
    }

    #[test]
    fn test_pause_and_stop_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_control(
            dir.path(),
            r#"
[trader]
trade = "pause"
trader_script = "stop"
total_invested = 50

[scraper]
scraper_frequency = 5
"#,
        );

        let signals = FileControlSource::new(path)
            .without_env_overrides()
            .snapshot()
            .unwrap();
        assert!(!signals.trade_enabled);
        assert!(!signals.script_running);
        assert_eq!(signals.sampling_interval_minutes, 5);
    }

    #[test]
    fn test_changes_are_seen_on_next_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let body = |trade: &str| {
            format!(
                "[trader]\ntrade = \"{}\"\ntrader_script = \"run\"\n\n[scraper]\nscraper_frequency = 10\n",
                trade
            )
        };
        let path = write_control(dir.path(), &body("run"));
        let source = FileControlSource::new(&path).without_env_overrides();

        assert!(source.snapshot().unwrap().trade_enabled);
        std::fs::write(&path, body("pause")).unwrap();
        assert!(!source.snapshot().unwrap().trade_enabled);
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileControlSource::new(dir.path().join("nope.toml"))
            .without_env_overrides()
            .snapshot()
            .unwrap_err();
        assert!(matches!(err, TraderError::ConfigUnavailable(_)));
    }

    #[test]
    fn test_zero_frequency_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_control(
            dir.path(),
            "[trader]\ntrade = \"run\"\ntrader_script = \"run\"\n\n[scraper]\nscraper_frequency = 0\n",
        );
        let err = FileControlSource::new(path)
            .without_env_overrides()
            .snapshot()
            .unwrap_err();
        assert!(err.to_string().contains("scraper_frequency"));
    }

    #[test]
    fn test_oversized_frequency_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_control(
            dir.path(),
            "[trader]\ntrade = \"run\"\ntrader_script = \"run\"\n\n[scraper]\nscraper_frequency = 100000\n",
        );
        let err = FileControlSource::new(path)
            .without_env_overrides()
            .snapshot()
            .unwrap_err();
        assert!(err.to_string().contains("between 1 and 1440"));

        let path = write_control(
            dir.path(),
            "[trader]\ntrade = \"run\"\ntrader_script = \"run\"\n\n[scraper]\nscraper_frequency = 1440\n",
        );
        let signals = FileControlSource::new(path)
            .without_env_overrides()
            .snapshot()
            .unwrap();
        assert_eq!(signals.sampling_interval_minutes, MAX_SAMPLING_INTERVAL_MINUTES);
    }

    #[test]
    fn test_static_source() {
        let source = StaticControlSource::new(ControlSignals::default());
        source.update(|s| s.trade_enabled = false);
        assert!(!source.snapshot().unwrap().trade_enabled);

        source.set_unavailable();
        assert!(source.snapshot().is_err());
    }
}

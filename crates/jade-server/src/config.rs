//! Runtime configuration, deserialised from `jade.toml` and `JADE__*`
//! environment overrides.

use std::path::{Path, PathBuf};

use jade_ami::ManagerConfig;
use jade_core::{dialogue::ScriptSettings, scoring::ScoringConfig};
use jade_engine::{AlertSettings, Policy, SyncSettings};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
  pub host: String,
  pub port: u16,
}

impl Default for HttpConfig {
  fn default() -> Self { Self { host: "127.0.0.1".into(), port: 8080 } }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub http:       HttpConfig,
  /// The engine's own database: calls, history and the mirrors.
  pub store_path: PathBuf,
  pub manager:    ManagerConfig,
  pub policy:     Policy,
  pub sync:       SyncSettings,
  pub scoring:    ScoringConfig,
  pub alerts:     AlertSettings,
  pub dialogue:   ScriptSettings,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      http:       HttpConfig::default(),
      store_path: PathBuf::from("~/.local/share/jade/jade.db"),
      manager:    ManagerConfig::default(),
      policy:     Policy::default(),
      sync:       SyncSettings::default(),
      scoring:    ScoringConfig::default(),
      alerts:     AlertSettings::default(),
      dialogue:   ScriptSettings::default(),
    }
  }
}

impl ServerConfig {
  /// Layer the optional file under environment overrides.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("JADE").separator("__"))
      .build()?;
    Ok(settings.try_deserialize()?)
  }

  pub fn validate(&self) -> anyhow::Result<()> {
    self.policy.validate().map_err(|e| anyhow::anyhow!("policy: {e}"))?;
    self.scoring.validate().map_err(|e| anyhow::anyhow!("scoring: {e}"))?;
    if self.sync.interval_minutes == 0 {
      anyhow::bail!("sync: interval_minutes must be at least 1");
    }
    Ok(())
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  let home = s.strip_prefix("~/").zip(std::env::var("HOME").ok());
  match home {
    Some((rest, home)) => PathBuf::from(home).join(rest),
    None => path.to_path_buf(),
  }
}

#[cfg(test)]
mod tests {
  use config::{Config, File, FileFormat};
  use jade_core::scoring::Urgency;

  use super::*;

  fn parse(toml: &str) -> ServerConfig {
    Config::builder()
      .add_source(File::from_str(toml, FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap()
  }

  #[test]
  fn empty_file_uses_defaults() {
    let cfg = parse("");
    assert_eq!(cfg.http.port, 8080);
    assert_eq!(cfg.policy.max_attempts, 3);
    assert_eq!(cfg.manager.port, 5038);
    cfg.validate().unwrap();
  }

  #[test]
  fn sections_override_defaults() {
    let cfg = parse(
      r#"
        store_path = "/var/lib/jade/jade.db"

        [http]
        port = 9000

        [policy]
        max_attempts = 5
        retry_backoff_minutes = 60

        [alerts]
        urgency_threshold = "critical"

        [scoring.thresholds]
        medium = 10.0
        high = 30.0
        critical = 60.0

        [dialogue]
        hospital_name = "Saint Jude"
      "#,
    );
    assert_eq!(cfg.http.port, 9000);
    assert_eq!(cfg.http.host, "127.0.0.1");
    assert_eq!(cfg.store_path, PathBuf::from("/var/lib/jade/jade.db"));
    assert_eq!(cfg.policy.max_attempts, 5);
    assert_eq!(cfg.policy.dispatch_workers, 2);
    assert_eq!(cfg.alerts.urgency_threshold, Urgency::Critical);
    assert_eq!(cfg.scoring.thresholds.high, 30.0);
    assert_eq!(cfg.dialogue.hospital_name, "Saint Jude");
    cfg.validate().unwrap();
  }

  #[test]
  fn rejects_unusable_settings() {
    assert!(parse("[policy]\nmax_attempts = 0").validate().is_err());
    assert!(
      parse("[scoring.thresholds]\nmedium = 50.0\nhigh = 40.0\ncritical = 70.0")
        .validate()
        .is_err()
    );
    assert!(parse("[sync]\ninterval_minutes = 0").validate().is_err());
  }

  #[test]
  fn tilde_expands_to_home() {
    let Ok(home) = std::env::var("HOME") else { return };
    assert_eq!(expand_tilde(Path::new("~/jade.db")), PathBuf::from(home).join("jade.db"));
    assert_eq!(expand_tilde(Path::new("/tmp/jade.db")), PathBuf::from("/tmp/jade.db"));
  }
}

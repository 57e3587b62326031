//! Fixed constants and per-runner configuration.
//!
//! Everything here used to be implicit in the run recipe; it is injected into
//! the orchestrator at construction so concurrent runners can differ (tests,
//! staging daemons) without process-wide state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dependency-manifest and process-declaration filenames that are injected at
/// build time. Everything else in a scraper repository is application code
/// and is injected into the run-time layer instead.
pub const CONFIG_FILENAMES: &[&str] = &[
    "Procfile",
    "Gemfile",
    "Gemfile.lock",
    "requirements.txt",
    "runtime.txt",
    "composer.json",
    "composer.lock",
    "app.psgi",
    "cpanfile",
];

/// Whether `name` belongs to the build-time configuration layer.
pub fn is_config_file(name: &str) -> bool {
    CONFIG_FILENAMES.contains(&name)
}

/// 2000-01-01T00:00:00Z. Staged build contexts get this mtime so identical
/// content produces identical layer hashes across rebuilds.
const LAYER_EPOCH_SECS: i64 = 946_684_800;

/// The fixed instant applied by [`crate::archive::normalize_mtimes`] to every
/// staged build context.
pub fn layer_epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(LAYER_EPOCH_SECS, 0).unwrap_or_default()
}

/// Configuration for a [`crate::pipeline::DockerRunner`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Socket the container runtime listens on.
    pub docker_host: String,
    /// Request timeout for runtime API calls, in seconds. Builds and attached
    /// runs may legitimately take hours while dependencies download.
    pub api_timeout_secs: u64,
    /// Shared base build image every scraper is layered on.
    pub base_image: String,
    /// Absolute path inside every built image where scraper files live.
    pub app_root: String,
    /// Command that launches the scraper inside the container.
    pub start_command: String,
    /// Filename (under the app root) the timing wrapper writes to.
    pub time_output_file: String,
    /// Relative CPU weight. Modest so many containers timeshare one host.
    pub cpu_shares: i64,
    /// Hard memory ceiling in bytes. Sized for roughly ten containers per GB.
    pub memory_bytes: i64,
    /// Account the container process starts as.
    pub run_user: String,
    /// Account that owns the application layer (`user:group`).
    pub scraper_account: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            docker_host: "unix:///var/run/docker.sock".to_string(),
            api_timeout_secs: 4 * 60 * 60,
            base_image: "openaustralia/buildstep".to_string(),
            app_root: "/app".to_string(),
            start_command: "/start scraper".to_string(),
            time_output_file: "time.output".to_string(),
            cpu_shares: 307,
            memory_bytes: 100 * 1024 * 1024,
            run_user: "root".to_string(),
            scraper_account: "scraper:scraper".to_string(),
        }
    }
}

impl RunnerConfig {
    /// Rebases a caller-relative path onto the application root.
    pub fn absolute_app_path(&self, relative: &str) -> String {
        format!(
            "{}/{}",
            self.app_root.trim_end_matches('/'),
            relative.trim_start_matches('/')
        )
    }

    /// Absolute in-container path of the timing wrapper's output file.
    pub fn time_file_path(&self) -> String {
        self.absolute_app_path(&self.time_output_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_filenames_cover_manifests_only() {
        assert!(is_config_file("Gemfile"));
        assert!(is_config_file("requirements.txt"));
        assert!(is_config_file("Procfile"));
        assert!(!is_config_file("scraper.rb"));
        assert!(!is_config_file("data.sqlite"));
        // Case matters, same as the filesystem.
        assert!(!is_config_file("gemfile"));
    }

    #[test]
    fn default_limits() {
        let config = RunnerConfig::default();
        assert_eq!(config.cpu_shares, 307);
        assert_eq!(config.memory_bytes, 100 * 1024 * 1024);
        assert_eq!(config.app_root, "/app");
        assert_eq!(config.api_timeout_secs, 14_400);
    }

    #[test]
    fn absolute_app_path_joins_cleanly() {
        let config = RunnerConfig::default();
        assert_eq!(config.absolute_app_path("output.db"), "/app/output.db");
        assert_eq!(config.absolute_app_path("/output.db"), "/app/output.db");
        assert_eq!(config.time_file_path(), "/app/time.output");
    }

    #[test]
    fn layer_epoch_is_fixed() {
        let epoch = layer_epoch();
        assert_eq!(epoch.timestamp(), 946_684_800);
        assert_eq!(epoch.to_rfc3339(), "2000-01-01T00:00:00+00:00");
    }
}

//! The fixed five-stage build-and-run recipe.
//!
//! base image → inject configuration → compile → inject application code →
//! run. The orchestrator owns the runtime connection and the fixed
//! configuration; everything per-run arrives in [`RunOptions`] and leaves in
//! a [`RunResult`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{is_config_file, RunnerConfig};
use crate::error::RunnerError;
use crate::events::{RunEvents, StreamKind};
use crate::execution::{ContainerRunner, DockerClient, ImageBuilder};
use crate::fscopy;
use crate::timing::{self, TimingMetrics};

/// Status reported when the compile stage could not produce an image.
/// Deliberately outside the 0-255 range a scraper process can exit with, so
/// it can never be confused with a real exit code.
pub const STATUS_BUILD_FAILED: i64 = 999;

/// Everything a single run produces.
#[derive(Debug, Default)]
pub struct RunResult {
    /// Scraper exit status, or [`STATUS_BUILD_FAILED`].
    pub status_code: i64,
    /// Captured output files, keyed by path relative to the application
    /// root.
    pub files: HashMap<String, Vec<u8>>,
    /// Resource usage of the run. Absent when the timing file was never
    /// produced, e.g. because the compile stage failed.
    pub timing: Option<TimingMetrics>,
}

impl RunResult {
    fn build_failed() -> Self {
        RunResult {
            status_code: STATUS_BUILD_FAILED,
            files: HashMap::new(),
            timing: None,
        }
    }
}

/// Per-run inputs supplied by the caller.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Scraper repository to build and run.
    pub repo_path: PathBuf,
    /// Environment passed to the scraper process.
    pub env: HashMap<String, String>,
    /// Unique container name; a duplicate among concurrent runs is rejected,
    /// never merged.
    pub container_name: String,
    /// Opaque bookkeeping labels attached to the container.
    pub labels: HashMap<String, String>,
    /// Paths relative to the application root to retrieve after the run.
    pub capture_paths: Vec<String>,
}

/// Orchestrates the build-and-run pipeline against one runtime connection.
pub struct DockerRunner {
    client: DockerClient,
    config: RunnerConfig,
}

impl DockerRunner {
    pub fn new(config: RunnerConfig) -> Result<Self, RunnerError> {
        let client = DockerClient::connect(&config)?;
        Ok(Self { client, config })
    }

    /// Uses an existing connection, e.g. one shared across concurrent runs.
    pub fn with_client(client: DockerClient, config: RunnerConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Refreshes the shared base build image, forwarding pull progress to
    /// the internal-out stream.
    pub async fn pull_base_image(&self, events: &mut RunEvents) -> Result<(), RunnerError> {
        let mut sink = |line: &str| events.log(StreamKind::InternalOut, line);
        self.client
            .pull_image(&self.config.base_image, &mut sink)
            .await
    }

    /// Builds the scraper repository into a runnable image and executes it.
    ///
    /// Infrastructure trouble surfaces as an error (check
    /// [`RunnerError::is_retryable`] for requeue intent); a failing user
    /// build is an ordinary [`RunResult`] carrying [`STATUS_BUILD_FAILED`]
    /// with empty files and absent timing.
    pub async fn compile_and_run(
        &self,
        options: &RunOptions,
        events: &mut RunEvents,
    ) -> Result<RunResult, RunnerError> {
        let builder = ImageBuilder::new(&self.client, &self.config);

        let mut pull_sink = |line: &str| events.log(StreamKind::InternalOut, line);
        let base = self
            .client
            .get_or_pull_image(&self.config.base_image, &mut pull_sink)
            .await?;

        // Build-time layer: dependency manifests only.
        let staged = tempfile::Builder::new().prefix("scraperbox").tempdir()?;
        fscopy::copy_filtered(&options.repo_path, staged.path(), is_config_file)?;
        events
            .log(
                StreamKind::InternalOut,
                "Injecting configuration and compiling...\n",
            )
            .map_err(RunnerError::Aborted)?;
        let configured = builder.inject_files(&base, staged.path()).await?;
        drop(staged);

        let mut compile_sink = |line: &str| events.log(StreamKind::InternalOut, line);
        let Some(compiled) = builder.compile(&configured, &mut compile_sink).await? else {
            debug!("compile stage produced no image, reporting build failure");
            return Ok(RunResult::build_failed());
        };

        // Run-time layer: everything else, owned by the scraper account.
        let staged = tempfile::Builder::new().prefix("scraperbox").tempdir()?;
        fscopy::copy_filtered(&options.repo_path, staged.path(), |name| {
            !is_config_file(name)
        })?;
        events
            .log(StreamKind::InternalOut, "Injecting scraper and running...\n")
            .map_err(RunnerError::Aborted)?;
        let runnable = builder
            .inject_files_with_ownership(&compiled, staged.path())
            .await?;
        drop(staged);

        let time_file = self.config.time_file_path();
        let command = timing::wrap(&self.config.start_command, &time_file);
        let mut capture: Vec<String> = options
            .capture_paths
            .iter()
            .map(|path| self.config.absolute_app_path(path))
            .collect();
        capture.push(time_file.clone());

        let runner = ContainerRunner::new(&self.client, &self.config);
        let output = runner
            .run(
                &runnable,
                &command,
                &options.env,
                &options.container_name,
                &options.labels,
                &capture,
                events,
            )
            .await?;

        // A concurrent run may still reference the layer; deleting is
        // advisory cleanup, not part of the run's contract.
        self.client.remove_image_quietly(&runnable).await;

        Ok(assemble_result(
            output.exit_code,
            output.files,
            &time_file,
            &self.config.app_root,
        ))
    }
}

/// Consumes the timing file out of the captured data and rebases the
/// remaining paths onto the application root.
fn assemble_result(
    status_code: i64,
    mut files: HashMap<String, Vec<u8>>,
    time_file: &str,
    app_root: &str,
) -> RunResult {
    let timing = files
        .remove(time_file)
        .and_then(|raw| TimingMetrics::parse(&String::from_utf8_lossy(&raw)));

    let files = files
        .into_iter()
        .map(|(path, content)| {
            let key = Path::new(&path)
                .strip_prefix(app_root)
                .map(|relative| relative.to_string_lossy().into_owned())
                .unwrap_or(path);
            (key, content)
        })
        .collect();

    RunResult {
        status_code,
        files,
        timing,
    }
}

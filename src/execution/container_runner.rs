//! Resource-capped container execution with streamed log delivery.
//!
//! A run is: create (fixed limits, caller labels), start, report the
//! assigned address, relay the combined output stream as discrete line
//! events, wait for a definite stop, extract requested files, remove the
//! container. Any failure mid-run kills the container before surfacing;
//! partial runs are never left behind.

use std::collections::HashMap;

use bollard::container::{Config, LogOutput};
use bollard::models::HostConfig;
use futures::StreamExt;
use tracing::warn;

use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::events::{LineSplitter, RunEvents, StreamKind};
use crate::execution::docker_client::{DockerClient, Image};
use crate::execution::extract;

/// Exit status and extracted files of a finished container.
#[derive(Debug)]
pub struct RunOutput {
    pub exit_code: i64,
    /// Captured files keyed by the requested (absolute) path.
    pub files: HashMap<String, Vec<u8>>,
}

pub struct ContainerRunner<'a> {
    client: &'a DockerClient,
    config: &'a RunnerConfig,
}

impl<'a> ContainerRunner<'a> {
    pub fn new(client: &'a DockerClient, config: &'a RunnerConfig) -> Self {
        Self { client, config }
    }

    /// Creates, starts and follows a container to completion.
    ///
    /// Create-time infrastructure trouble (unreachable daemon, vanished
    /// image) is announced on the internal-error stream with a requeue
    /// notice before the error is returned; a name collision is surfaced
    /// directly.
    pub async fn run(
        &self,
        image: &Image,
        command: &str,
        env: &HashMap<String, String>,
        name: &str,
        labels: &HashMap<String, String>,
        capture_paths: &[String],
        events: &mut RunEvents,
    ) -> Result<RunOutput, RunnerError> {
        let spec = container_spec(self.config, image, command, env, labels);
        let id = match self.client.create_container(name, spec).await {
            Ok(id) => id,
            Err(e) => {
                if e.is_retryable() {
                    events.log_quietly(
                        StreamKind::InternalErr,
                        &format!("scraperbox internal error: {e}\n"),
                    );
                    events.log_quietly(StreamKind::InternalErr, "Requeueing...\n");
                }
                return Err(e);
            }
        };

        if let Err(e) = self.follow(&id, events).await {
            events.log_quietly(
                StreamKind::InternalErr,
                &format!("scraperbox internal error: {e}\n"),
            );
            events.log_quietly(
                StreamKind::InternalErr,
                "Stopping current container and requeueing\n",
            );
            if let Err(kill_error) = self.client.kill_container(&id).await {
                warn!("failed to kill container {id}: {kill_error}");
            }
            return Err(e);
        }

        let result = self.finish(&id, capture_paths).await;
        if let Err(remove_error) = self.client.remove_container(&id).await {
            warn!("failed to remove container {id}: {remove_error}");
        }
        result
    }

    /// Starts the container, reports its address, then relays the combined
    /// output stream as line events until the stream ends.
    async fn follow(&self, id: &str, events: &mut RunEvents) -> Result<(), RunnerError> {
        self.client.start_container(id).await?;
        if let Some(address) = self.client.container_ip(id).await? {
            events.ip_address(&address).map_err(RunnerError::Aborted)?;
        }

        let mut output = self.client.attach_container(id).await?;
        let mut stdout_lines = LineSplitter::new();
        let mut stderr_lines = LineSplitter::new();
        while let Some(chunk) = output.next().await {
            let (kind, message, splitter) = match chunk? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    (StreamKind::Stdout, message, &mut stdout_lines)
                }
                LogOutput::StdErr { message } => {
                    (StreamKind::Stderr, message, &mut stderr_lines)
                }
                LogOutput::StdIn { .. } => continue,
            };
            // Scraper output is assumed UTF-8; invalid sequences are
            // replaced rather than failing the run.
            let text = String::from_utf8_lossy(&message);
            for line in splitter.feed(&text) {
                events.log(kind, &line).map_err(RunnerError::Aborted)?;
            }
        }
        for (kind, splitter) in [
            (StreamKind::Stdout, stdout_lines),
            (StreamKind::Stderr, stderr_lines),
        ] {
            if let Some(rest) = splitter.finish() {
                events.log(kind, &rest).map_err(RunnerError::Aborted)?;
            }
        }
        Ok(())
    }

    async fn finish(
        &self,
        id: &str,
        capture_paths: &[String],
    ) -> Result<RunOutput, RunnerError> {
        // Wait until the container has definitely stopped; extracting from a
        // still-terminating container is unreliable.
        let exit_code = self.client.wait_container(id).await?;
        let files = extract::extract_files(self.client, id, capture_paths).await?;
        Ok(RunOutput { exit_code, files })
    }
}

/// Builds the container spec: the command wrapped in an interactive login
/// shell, fixed resource caps, env as sorted KEY=VALUE pairs, the caller's
/// labels attached verbatim.
fn container_spec(
    config: &RunnerConfig,
    image: &Image,
    command: &str,
    env: &HashMap<String, String>,
    labels: &HashMap<String, String>,
) -> Config<String> {
    let mut env_pairs: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
    env_pairs.sort();
    Config {
        cmd: Some(vec![
            "/bin/bash".to_string(),
            "-l".to_string(),
            "-c".to_string(),
            command.to_string(),
        ]),
        user: Some(config.run_user.clone()),
        image: Some(image.id().to_string()),
        env: Some(env_pairs),
        labels: Some(labels.clone()),
        host_config: Some(HostConfig {
            cpu_shares: Some(config.cpu_shares),
            memory: Some(config.memory_bytes),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> Config<String> {
        let config = RunnerConfig::default();
        let env = HashMap::from([
            ("SCRAPER_API_URL".to_string(), "http://example.org".to_string()),
            ("A_FIRST".to_string(), "1".to_string()),
        ]);
        let labels = HashMap::from([("run_id".to_string(), "42".to_string())]);
        container_spec(
            &config,
            &Image::new("sha256:layer-c"),
            "/usr/bin/time -v -o /app/time.output /start scraper",
            &env,
            &labels,
        )
    }

    #[test]
    fn command_runs_under_a_login_shell() {
        let spec = sample_spec();
        assert_eq!(
            spec.cmd.unwrap(),
            vec![
                "/bin/bash",
                "-l",
                "-c",
                "/usr/bin/time -v -o /app/time.output /start scraper"
            ]
        );
        assert_eq!(spec.user.unwrap(), "root");
        assert_eq!(spec.image.unwrap(), "sha256:layer-c");
    }

    #[test]
    fn env_pairs_are_sorted_key_value_strings() {
        let spec = sample_spec();
        assert_eq!(
            spec.env.unwrap(),
            vec!["A_FIRST=1", "SCRAPER_API_URL=http://example.org"]
        );
    }

    #[test]
    fn labels_pass_through_verbatim() {
        let spec = sample_spec();
        assert_eq!(spec.labels.unwrap()["run_id"], "42");
    }

    #[test]
    fn resource_caps_are_fixed() {
        let spec = sample_spec();
        let host = spec.host_config.unwrap();
        assert_eq!(host.cpu_shares, Some(307));
        assert_eq!(host.memory, Some(100 * 1024 * 1024));
    }
}

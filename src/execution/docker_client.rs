//! Thin wrapper over the container runtime control API, using the bollard
//! crate.
//!
//! Every method maps one daemon operation and translates its failure modes
//! into the pipeline's error taxonomy at the call site that knows what they
//! mean: a 404 at container create is a missing image (retryable), a 409 is
//! a name collision (rejected), a transport failure means requeue.

use std::pin::Pin;

use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, DownloadFromContainerOptions,
    InspectContainerOptions, KillContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{BuildImageOptions, CreateImageOptions, RemoveImageOptions};
use bollard::models::BuildInfoAux;
use bollard::Docker;
use futures::{Stream, StreamExt};
use tracing::debug;
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::execution::OutputSink;

/// An immutable, content-addressed build artifact, identified by the opaque
/// id the runtime assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    id: String,
}

impl Image {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Combined stdout/stderr stream of an attached container.
pub type AttachedOutput =
    Pin<Box<dyn Stream<Item = Result<LogOutput, BollardError>> + Send>>;

/// Connection to the container runtime. May be shared across concurrent
/// runs; isolation comes from unique container and image names, not from
/// the connection.
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Connects to the runtime socket with an hours-scale request timeout so
    /// long builds and attached runs are not cut off mid-stream.
    pub fn connect(config: &RunnerConfig) -> Result<Self, RunnerError> {
        let docker = Docker::connect_with_socket(
            &config.docker_host,
            config.api_timeout_secs,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| RunnerError::ConnectionFailed(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Wraps an existing bollard connection.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Returns the locally cached image, pulling it first if absent.
    pub async fn get_or_pull_image(
        &self,
        name: &str,
        on_progress: OutputSink<'_>,
    ) -> Result<Image, RunnerError> {
        if let Ok(inspect) = self.docker.inspect_image(name).await {
            return Ok(Image::new(inspect.id.unwrap_or_else(|| name.to_string())));
        }
        self.pull_image(name, on_progress).await?;
        let inspect = self.docker.inspect_image(name).await?;
        Ok(Image::new(inspect.id.unwrap_or_else(|| name.to_string())))
    }

    /// Pulls `name` from its registry, forwarding textual progress.
    pub async fn pull_image(
        &self,
        name: &str,
        on_progress: OutputSink<'_>,
    ) -> Result<(), RunnerError> {
        let (image, tag) = match name.split_once(':') {
            Some((image, tag)) => (image, tag),
            None => (name, "latest"),
        };
        let options = CreateImageOptions {
            from_image: image,
            tag,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(message) = stream.next().await {
            let info = message.map_err(|e| RunnerError::ConnectionFailed(e.to_string()))?;
            if let Some(status) = info.status {
                let line = match info.progress {
                    Some(progress) => format!("{status} {progress}\n"),
                    None => format!("{status}\n"),
                };
                on_progress(&line).map_err(RunnerError::Aborted)?;
            }
        }
        Ok(())
    }

    /// Builds an image from an in-memory tar context and returns it. Build
    /// progress lines are forwarded verbatim to `on_output`; filtering is the
    /// caller's concern.
    pub async fn build_image(
        &self,
        context_tar: Vec<u8>,
        on_output: OutputSink<'_>,
    ) -> Result<Image, RunnerError> {
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: format!("scraperbox-layer:{}", Uuid::new_v4().simple()),
            rm: true,
            ..Default::default()
        };
        let mut image_id = None;
        let mut stream = self.docker.build_image(options, None, Some(context_tar.into()));
        while let Some(message) = stream.next().await {
            let info = message.map_err(|e| RunnerError::BuildFailed(e.to_string()))?;
            if let Some(error) = info.error {
                return Err(RunnerError::BuildFailed(error));
            }
            if let Some(BuildInfoAux::Default(id)) = info.aux {
                if let Some(id) = id.id {
                    image_id = Some(id);
                }
            }
            if let Some(text) = info.stream {
                // Classic-builder daemons report the id in-band only.
                if let Some(rest) = text.strip_prefix("Successfully built ") {
                    image_id = Some(rest.trim().to_string());
                }
                on_output(&text).map_err(RunnerError::Aborted)?;
            }
        }
        image_id
            .map(Image::new)
            .ok_or_else(|| RunnerError::BuildFailed("build finished without an image id".to_string()))
    }

    /// Best-effort image delete. A concurrent reference produces a conflict,
    /// which is logged and swallowed; deletion is advisory cleanup.
    pub async fn remove_image_quietly(&self, image: &Image) {
        let options = RemoveImageOptions {
            noprune: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_image(image.id(), Some(options), None).await {
            debug!("ignoring image delete failure for {}: {e}", image.id());
        }
    }

    /// Creates a named container and returns its id.
    pub async fn create_container(
        &self,
        name: &str,
        spec: Config<String>,
    ) -> Result<String, RunnerError> {
        let image = spec.image.clone().unwrap_or_default();
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        self.docker
            .create_container(Some(options), spec)
            .await
            .map(|response| response.id)
            .map_err(|e| classify_create_error(e, name, &image))
    }

    pub async fn start_container(&self, id: &str) -> Result<(), RunnerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    /// The address the runtime assigned to a running container, if any.
    pub async fn container_ip(&self, id: &str) -> Result<Option<String>, RunnerError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        Ok(inspect
            .network_settings
            .and_then(|settings| settings.ip_address)
            .filter(|address| !address.is_empty()))
    }

    /// Attaches to the combined stdout/stderr stream, replaying output
    /// emitted before the attach was established.
    pub async fn attach_container(&self, id: &str) -> Result<AttachedOutput, RunnerError> {
        let options = AttachContainerOptions::<String> {
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            ..Default::default()
        };
        let results = self.docker.attach_container(id, Some(options)).await?;
        Ok(results.output)
    }

    /// Waits until the container is fully stopped and returns its exit code.
    pub async fn wait_container(&self, id: &str) -> Result<i64, RunnerError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => {
                // An empty wait stream means the container already stopped.
                let inspect = self
                    .docker
                    .inspect_container(id, None::<InspectContainerOptions>)
                    .await?;
                Ok(inspect.state.and_then(|state| state.exit_code).unwrap_or(-1))
            }
        }
    }

    /// Force-kills a running container. Used on abort paths.
    pub async fn kill_container(&self, id: &str) -> Result<(), RunnerError> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await?;
        Ok(())
    }

    /// Removes a container and its anonymous volumes, forcing if needed.
    pub async fn remove_container(&self, id: &str) -> Result<(), RunnerError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }

    /// Copies a single path out of a container as a tar blob. Returns `None`
    /// when the path does not exist inside the container.
    pub async fn copy_from_container(
        &self,
        id: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, RunnerError> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };
        let mut stream = self.docker.download_from_container(id, Some(options));
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(data) => bytes.extend_from_slice(&data),
                Err(BollardError::DockerResponseServerError {
                    status_code: 404, ..
                }) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Some(bytes))
    }
}

/// Create-time failures carry distinct intents: a missing image and an
/// unreachable daemon both mean "requeue the whole run later", while a name
/// collision means the caller raced itself and must not be retried blindly.
fn classify_create_error(error: BollardError, name: &str, image: &str) -> RunnerError {
    match error {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => RunnerError::ImageNotFound(image.to_string()),
        BollardError::DockerResponseServerError {
            status_code: 409, ..
        } => RunnerError::NameConflict(name.to_string()),
        e @ BollardError::DockerResponseServerError { .. } => RunnerError::Api(e),
        e => RunnerError::ConnectionFailed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status_code: u16) -> BollardError {
        BollardError::DockerResponseServerError {
            status_code,
            message: "from daemon".to_string(),
        }
    }

    #[test]
    fn image_exposes_its_id() {
        let image = Image::new("sha256:abcdef");
        assert_eq!(image.id(), "sha256:abcdef");
        assert_eq!(image, Image::new("sha256:abcdef".to_string()));
    }

    #[test]
    fn missing_image_at_create_is_retryable() {
        let error = classify_create_error(server_error(404), "scraper-1", "sha256:gone");
        assert!(matches!(&error, RunnerError::ImageNotFound(image) if image == "sha256:gone"));
        assert!(error.is_retryable());
    }

    #[test]
    fn duplicate_name_is_rejected_not_retried() {
        let error = classify_create_error(server_error(409), "scraper-1", "sha256:abc");
        assert!(matches!(&error, RunnerError::NameConflict(name) if name == "scraper-1"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn other_daemon_errors_pass_through() {
        let error = classify_create_error(server_error(500), "scraper-1", "sha256:abc");
        assert!(matches!(error, RunnerError::Api(_)));
    }
}

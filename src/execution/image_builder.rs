//! Multi-stage image building: staged contexts, file injection, compile.
//!
//! Every build stage assembles a fresh staging directory, writes a build
//! recipe on top of it, pins all mtimes to a fixed instant for layer-cache
//! stability, and hands the tarred context to the runtime. Staging
//! directories are private to the call and removed on every exit path.

use std::path::Path;

use regex::Regex;
use tracing::debug;

use crate::archive;
use crate::config::{layer_epoch, RunnerConfig};
use crate::error::RunnerError;
use crate::execution::docker_client::{DockerClient, Image};
use crate::execution::OutputSink;
use crate::fscopy;

/// The runtime's own build progress banners, which are noise from the
/// caller's point of view; only meaningful output (package manager chatter,
/// compiler errors) reaches the log sink.
const NOISE_PATTERN: &str =
    r"^(Step \d+(/\d+)? :| ---> |Removing intermediate container |Successfully built |Successfully tagged )";

pub struct ImageBuilder<'a> {
    client: &'a DockerClient,
    config: &'a RunnerConfig,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(client: &'a DockerClient, config: &'a RunnerConfig) -> Self {
        Self { client, config }
    }

    /// Stages `context_dir` together with a generated build recipe and
    /// produces a new image layered on `image`. `context_dir` itself is left
    /// untouched.
    pub async fn build_from_commands(
        &self,
        image: &Image,
        commands: &[&str],
        context_dir: &Path,
        on_output: OutputSink<'_>,
    ) -> Result<Image, RunnerError> {
        let staging = tempfile::Builder::new().prefix("scraperbox").tempdir()?;
        fscopy::copy_dir_contents(context_dir, staging.path())?;
        std::fs::write(
            staging.path().join("Dockerfile"),
            dockerfile_from_commands(image, commands),
        )?;
        archive::normalize_mtimes(staging.path(), layer_epoch())?;
        let context = archive::create_tar(staging.path())?;
        self.client.build_image(context, on_output).await
    }

    /// Adds everything in `source_dir` at the application root of `image`.
    pub async fn inject_files(
        &self,
        image: &Image,
        source_dir: &Path,
    ) -> Result<Image, RunnerError> {
        let staging = tempfile::Builder::new().prefix("scraperbox").tempdir()?;
        let app_dir = staging.path().join("app");
        std::fs::create_dir(&app_dir)?;
        fscopy::copy_dir_contents(source_dir, &app_dir)?;
        let add = format!("ADD app {}", self.config.app_root);
        // Short-running; the build chatter would only confuse the caller.
        let mut discard = |_: &str| anyhow::Ok(());
        self.build_from_commands(image, &[add.as_str()], staging.path(), &mut discard)
            .await
    }

    /// As [`Self::inject_files`], then hands the application root to the
    /// unprivileged scraper account. Used for the application-code layer
    /// only; configuration-stage tooling may still need elevated access.
    pub async fn inject_files_with_ownership(
        &self,
        image: &Image,
        source_dir: &Path,
    ) -> Result<Image, RunnerError> {
        let staging = tempfile::Builder::new().prefix("scraperbox").tempdir()?;
        let app_dir = staging.path().join("app");
        std::fs::create_dir(&app_dir)?;
        fscopy::copy_dir_contents(source_dir, &app_dir)?;
        let add = format!("ADD app {}", self.config.app_root);
        let chown = format!(
            "RUN chown -R {} {}",
            self.config.scraper_account, self.config.app_root
        );
        let mut discard = |_: &str| anyhow::Ok(());
        self.build_from_commands(image, &[add.as_str(), chown.as_str()], staging.path(), &mut discard)
            .await
    }

    /// Runs the build step on top of `image`. Returns `Ok(None)` when the
    /// build itself fails, an expected outcome of user-controlled build
    /// scripts rather than an infrastructure fault.
    pub async fn compile(
        &self,
        image: &Image,
        on_output: OutputSink<'_>,
    ) -> Result<Option<Image>, RunnerError> {
        let staging = tempfile::Builder::new().prefix("scraperbox").tempdir()?;
        let noise = Regex::new(NOISE_PATTERN).ok();
        let mut filtered = |line: &str| {
            if noise.as_ref().is_some_and(|re| re.is_match(line)) {
                return anyhow::Ok(());
            }
            on_output(line)
        };
        let commands = ["ENV CURL_TIMEOUT 180", "RUN /build/builder"];
        match self
            .build_from_commands(image, &commands, staging.path(), &mut filtered)
            .await
        {
            Ok(compiled) => Ok(Some(compiled)),
            Err(RunnerError::BuildFailed(reason)) => {
                debug!("compile step failed: {reason}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Build recipe: first line references the parent image, then one line per
/// command, verbatim.
fn dockerfile_from_commands(image: &Image, commands: &[&str]) -> String {
    let mut recipe = format!("FROM {}\n", image.id());
    for command in commands {
        recipe.push_str(command);
        recipe.push('\n');
    }
    recipe
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipe_from_a_single_command() {
        let recipe = dockerfile_from_commands(&Image::new("sha256:base"), &["ADD app /app"]);
        assert_eq!(recipe, "FROM sha256:base\nADD app /app\n");
    }

    #[test]
    fn recipe_from_multiple_commands() {
        let recipe = dockerfile_from_commands(
            &Image::new("sha256:base"),
            &["ENV CURL_TIMEOUT 180", "RUN /build/builder"],
        );
        assert_eq!(
            recipe,
            "FROM sha256:base\nENV CURL_TIMEOUT 180\nRUN /build/builder\n"
        );
    }

    #[test]
    fn noise_pattern_hides_daemon_banners() {
        let noise = Regex::new(NOISE_PATTERN).unwrap();
        assert!(noise.is_match("Step 1/4 : FROM sha256:base"));
        assert!(noise.is_match("Step 3 : RUN /build/builder"));
        assert!(noise.is_match(" ---> a1b2c3d4"));
        assert!(noise.is_match("Removing intermediate container deadbeef"));
        assert!(noise.is_match("Successfully built a1b2c3d4"));
        assert!(noise.is_match("Successfully tagged scraperbox-layer:abc"));
    }

    #[test]
    fn noise_pattern_keeps_build_output() {
        let noise = Regex::new(NOISE_PATTERN).unwrap();
        assert!(!noise.is_match("Installing rack 1.5.2"));
        assert!(!noise.is_match("Collecting requests==2.31.0"));
        assert!(!noise.is_match("       remote: Counting objects"));
        assert!(!noise.is_match("error: no start command declared"));
    }
}

//! Container runtime execution layer.
//!
//! Drives an external Docker-compatible daemon through its control API:
//! image builds from staged contexts, resource-capped container runs with
//! streamed log delivery, and result-file extraction. All bollard calls live
//! in [`docker_client`]; the other modules speak in terms of images,
//! containers and byte blobs.

pub mod container_runner;
pub mod docker_client;
pub mod extract;
pub mod image_builder;

pub use container_runner::{ContainerRunner, RunOutput};
pub use docker_client::{DockerClient, Image};
pub use image_builder::ImageBuilder;

/// Sink for textual build/pull progress. Returning an error aborts the
/// surrounding operation.
pub type OutputSink<'a> = &'a mut (dyn FnMut(&str) -> anyhow::Result<()> + Send);

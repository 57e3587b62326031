//! Retrieves result files from a stopped container.

use std::collections::HashMap;
use std::path::Path;

use crate::archive;
use crate::error::RunnerError;
use crate::execution::docker_client::DockerClient;

/// Copies each requested path out of the container's filesystem. Paths that
/// do not exist inside the container are omitted from the result rather than
/// treated as errors; binary content comes back unmodified.
pub async fn extract_files(
    client: &DockerClient,
    container_id: &str,
    paths: &[String],
) -> Result<HashMap<String, Vec<u8>>, RunnerError> {
    let mut files = HashMap::new();
    for path in paths {
        let Some(blob) = client.copy_from_container(container_id, path).await? else {
            continue;
        };
        let name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path.as_str());
        if let Some(content) = archive::file_from_tar(&blob, name)? {
            files.insert(path.clone(), content);
        }
    }
    Ok(files)
}

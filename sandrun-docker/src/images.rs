//! Images.

use std::collections::HashMap;

use bollard::image::CreateImageOptions;
use bollard::image::ListImagesOptions;
use tokio_stream::StreamExt as _;
use tracing::Level;
use tracing::debug;
use tracing::enabled;
use tracing::trace;

use crate::Docker;
use crate::Error;
use crate::Result;

/// Splits an image reference into its name and tag, defaulting the tag to
/// `latest`.
fn split_reference(reference: &str) -> (&str, &str) {
    match reference.rsplit_once(':') {
        // A `:` inside a registry port is not a tag separator.
        Some((name, tag)) if !tag.contains('/') => (name, tag),
        _ => (reference, "latest"),
    }
}

/// Ensures that an image exists in the Docker daemon.
///
/// It does this by:
///
/// * Confirming that the image already exists there, or
/// * Pulling the image from the remote repository.
pub(crate) async fn ensure_image(docker: &Docker, reference: &str) -> Result<()> {
    let (name, tag) = split_reference(reference);
    debug!("ensuring image: `{name}:{tag}`");

    let mut filters = HashMap::new();
    filters.insert(String::from("reference"), vec![format!("{name}:{tag}")]);

    debug!("checking if image exists locally: `{name}:{tag}`");
    let results = docker
        .inner()
        .list_images(Some(ListImagesOptions {
            filters,
            ..Default::default()
        }))
        .await
        .map_err(Error::Docker)?;

    if !results.is_empty() {
        debug!("image exists locally");

        if enabled!(Level::TRACE) {
            trace!(
                "image SHA = {}",
                results.first().unwrap().id.trim_start_matches("sha256:")
            );
        }

        return Ok(());
    }

    debug!("image does NOT exist locally; attempting to pull from remote");
    let mut stream = docker.inner().create_image(
        Some(CreateImageOptions {
            from_image: name,
            tag,
            ..Default::default()
        }),
        None,
        None,
    );

    while let Some(result) = stream.next().await {
        let update = result.map_err(|source| Error::ImagePull {
            image: format!("{name}:{tag}"),
            source,
        })?;

        if enabled!(Level::TRACE) {
            trace!(
                "pull update: {}",
                [
                    update.id.map(|id| format!("id: {id}")),
                    update.error.map(|err| format!("error: {err}")),
                    update.status.map(|status| format!("status: {status}")),
                    update.progress.map(|progress| format!("progress: {progress}")),
                ]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join("; ")
            )
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_split_into_name_and_tag() {
        assert_eq!(split_reference("python:3.11-slim"), ("python", "3.11-slim"));
        assert_eq!(split_reference("ubuntu"), ("ubuntu", "latest"));
        assert_eq!(
            split_reference("registry:5000/team/image"),
            ("registry:5000/team/image", "latest")
        );
        assert_eq!(
            split_reference("registry:5000/team/image:v2"),
            ("registry:5000/team/image", "v2")
        );
    }
}

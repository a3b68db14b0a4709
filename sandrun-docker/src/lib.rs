//! A Docker sandbox driver that uses [`bollard`].
//!
//! Each submission executes in a freshly created, resource-capped container.
//! This crate is a thin adapter over the Docker API: image pulls, container
//! creation with caps, tar upload, start, combined output streaming, exit-code
//! wait, stop, removal, and an orphan sweep keyed on the sandbox name prefix.

use std::collections::HashMap;

use bollard::container::ListContainersOptions;
use bollard::container::RemoveContainerOptions;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

pub mod container;
pub mod images;

pub use crate::container::Container;
use crate::images::ensure_image;

/// A global error within this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// An error from [`bollard`].
    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),
    /// An image could not be pulled from the remote registry.
    #[error("failed to pull image `{image}`: {source}")]
    ImagePull {
        /// The image reference that failed to pull.
        image: String,
        /// The underlying Docker error.
        source: bollard::errors::Error,
    },
    /// A required value was missing for a builder field.
    #[error("missing required builder field `{0}`")]
    MissingBuilderField(&'static str),
    /// An error from a message.
    #[error("{0}")]
    Message(String),
}

/// A [`Result`](std::result::Result) with an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Builds the deterministic name for a sandbox container.
pub fn sandbox_name(prefix: &str, language: &str, execution_id: &str) -> String {
    format!("{prefix}_{language}_{execution_id}")
}

/// A Docker client.
#[derive(Clone, Debug)]
pub struct Docker(bollard::Docker);

impl Docker {
    /// Creates a new [`Docker`] with the specified [client](bollard::Docker).
    pub fn new(client: bollard::Docker) -> Self {
        Self(client)
    }

    /// Attempts to create a new [`Docker`] with the default socket connection.
    pub fn with_socket_defaults() -> Result<Self> {
        let client = bollard::Docker::connect_with_socket_defaults().map_err(Error::Docker)?;
        Ok(Self::new(client))
    }

    /// Attempts to create a new [`Docker`] with the default HTTP connection.
    pub fn with_http_defaults() -> Result<Self> {
        let client = bollard::Docker::connect_with_http_defaults().map_err(Error::Docker)?;
        Ok(Self::new(client))
    }

    /// Attempts to create a new [`Docker`] with the default connection details.
    pub fn with_defaults() -> Result<Self> {
        let client = bollard::Docker::connect_with_defaults().map_err(Error::Docker)?;
        Ok(Self::new(client))
    }

    /// Gets a reference to the inner [`bollard::Docker`].
    pub fn inner(&self) -> &bollard::Docker {
        &self.0
    }

    /// Pings the Docker daemon.
    pub async fn ping(&self) -> Result<()> {
        self.0.ping().await.map_err(Error::Docker)?;
        Ok(())
    }

    //----------------------------------------------------------------------------------
    // Images
    //----------------------------------------------------------------------------------

    /// Ensures that an image exists in the Docker daemon.
    ///
    /// If the image does not specify a tag, a default tag of `latest` will be
    /// used.
    ///
    /// It does this by:
    ///
    /// * Confirming that the image already exists there, or
    /// * Pulling the image from the remote repository.
    pub async fn ensure_image(&self, image: impl AsRef<str>) -> Result<()> {
        ensure_image(self, image.as_ref()).await
    }

    //----------------------------------------------------------------------------------
    // Containers
    //----------------------------------------------------------------------------------

    /// Creates a container builder.
    ///
    /// This is the typical way you will create containers.
    pub fn container_builder(&self) -> container::Builder {
        container::Builder::new(self.0.clone())
    }

    /// Creates a container handle from a known name.
    ///
    /// You should typically use [`Self::container_builder()`] unless you
    /// receive the container name externally.
    pub fn container_from_name(&self, name: impl Into<String>) -> Container {
        Container::new(self.0.clone(), name.into())
    }

    /// Removes every container whose name starts with the given prefix.
    ///
    /// Used at startup to reap sandboxes orphaned by a previous process
    /// crash. Individual removal failures are logged and skipped, so the
    /// sweep is idempotent across successive startups.
    pub async fn sweep_orphans(&self, prefix: &str) -> Result<usize> {
        debug!("sweeping orphaned containers with prefix `{prefix}`");

        let mut filters = HashMap::new();
        filters.insert(String::from("name"), vec![prefix.to_string()]);

        let containers = self
            .0
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(Error::Docker)?;

        let mut removed = 0;

        for summary in containers {
            let name = summary
                .names
                .as_deref()
                .and_then(|names| names.first())
                .map(|name| name.trim_start_matches('/').to_string());

            // The name filter is a substring match; enforce the prefix here.
            let name = match name {
                Some(name) if name.starts_with(prefix) => name,
                _ => continue,
            };

            match self
                .0
                .remove_container(
                    &name,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                Ok(()) => {
                    debug!("removed orphaned container `{name}`");
                    removed += 1;
                }
                Err(e) => warn!("failed to remove orphaned container `{name}`: {e}"),
            }
        }

        if removed > 0 {
            debug!("removed {removed} orphaned containers");
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_names_are_deterministic() {
        assert_eq!(
            sandbox_name("sandrun", "python", "exec_0123456789ab"),
            "sandrun_python_exec_0123456789ab"
        );
    }
}

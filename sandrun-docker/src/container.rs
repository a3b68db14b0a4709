//! Containers.

mod builder;

use std::io::Cursor;

use bollard::Docker;
use bollard::container::LogOutput;
use bollard::container::LogsOptions;
use bollard::container::RemoveContainerOptions;
use bollard::container::StartContainerOptions;
use bollard::container::StopContainerOptions;
use bollard::container::UploadToContainerOptions;
use bollard::container::WaitContainerOptions;
pub use builder::Builder;
use bytes::Bytes;
use futures::Stream;
use futures::StreamExt as _;
use tracing::Level;
use tracing::debug;
use tracing::enabled;
use tracing::trace;
use tracing::warn;

use crate::Error;
use crate::Result;

/// The default capacity of bytes for a TAR being built.
///
/// It's unlikely that any workspace we send will be less than this number of
/// bytes, so this is arbitrarily selected to avoid the first few
/// allocations.
const DEFAULT_TAR_CAPACITY: usize = 0xFFFF;

/// Builds an in-memory tar archive from a set of `(name, contents)` pairs.
pub fn archive_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Vec<u8> {
    let mut tar = tar::Builder::new(Vec::with_capacity(DEFAULT_TAR_CAPACITY));

    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);

        // SAFETY: this is manually crafted to always unwrap.
        tar.append_data(&mut header, name, Cursor::new(contents))
            .unwrap();
    }

    // SAFETY: this is manually crafted to always unwrap.
    tar.into_inner().unwrap()
}

/// Whether a Docker API error means the container is already stopped or gone.
fn already_terminated(error: &bollard::errors::Error) -> bool {
    matches!(
        error,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304 | 404 | 409,
            ..
        }
    )
}

/// A sandbox container.
#[derive(Clone, Debug)]
pub struct Container {
    /// A reference to the [`Docker`] client that owns this container.
    client: Docker,

    /// The name of the container.
    name: String,
}

impl Container {
    /// Gets a new creator for a [`Container`].
    pub fn builder(client: Docker) -> Builder {
        Builder::new(client)
    }

    /// Creates a new [`Container`] if you already know the name of a
    /// container.
    ///
    /// You should typically use [`Self::builder()`] unless you receive the
    /// container name externally.
    pub fn new(client: Docker, name: String) -> Self {
        Self { client, name }
    }

    /// Gets the name of the container.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Uploads a tar archive into the container, overlaying it at `dest`.
    pub async fn upload_archive(&self, dest: &str, archive: Vec<u8>) -> Result<()> {
        self.client
            .upload_to_container(
                &self.name,
                Some(UploadToContainerOptions {
                    path: dest,
                    ..Default::default()
                }),
                archive.into(),
            )
            .await
            .map_err(Error::Docker)
    }

    /// Starts the container.
    pub async fn start(&self) -> Result<()> {
        self.client
            .start_container(&self.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(Error::Docker)
    }

    /// Streams the container's combined standard output and standard error.
    ///
    /// Chunks are yielded as the runtime emits them; the stream terminates
    /// when the container exits or is forcibly removed.
    pub fn output_stream(&self) -> impl Stream<Item = Result<Bytes>> {
        self.client
            .logs(
                &self.name,
                Some(LogsOptions::<String> {
                    follow: true,
                    stdout: true,
                    stderr: true,
                    ..Default::default()
                }),
            )
            .map(|result| match result {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                    Ok(message)
                }
                Ok(other) => {
                    trace!("unhandled log message: {other:?}");
                    Ok(Bytes::new())
                }
                Err(e) => Err(Error::Docker(e)),
            })
    }

    /// Waits for the container to exit and returns its exit code.
    ///
    /// The wait API reports nonzero exits as errors; those are expected here
    /// (user programs fail all the time), so the stream is drained tolerantly
    /// and the exit code is read back from an inspect.
    pub async fn wait_exit_code(&self) -> Result<i64> {
        let mut wait_stream = self
            .client
            .wait_container(&self.name, None::<WaitContainerOptions<String>>);

        while let Some(result) = wait_stream.next().await {
            match result {
                Ok(response) => {
                    if enabled!(Level::TRACE) {
                        trace!("{response:?}");
                    }
                }
                Err(bollard::errors::Error::DockerContainerWaitError { error, code }) => {
                    trace!("container exited nonzero (code {code}): {error}");
                }
                Err(e) => return Err(Error::Docker(e)),
            }
        }

        let inspect = self
            .client
            .inspect_container(&self.name, None)
            .await
            .map_err(Error::Docker)?;

        Ok(inspect
            .state
            .and_then(|state| state.exit_code)
            .unwrap_or(-1))
    }

    /// Stops the container: SIGTERM, then SIGKILL after `grace` seconds.
    ///
    /// Already-terminated containers are not an error; the condition is
    /// logged and swallowed.
    pub async fn stop(&self, grace: i64) -> Result<()> {
        debug!("stopping container: `{}`", self.name);

        match self
            .client
            .stop_container(&self.name, Some(StopContainerOptions { t: grace }))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if already_terminated(&e) => {
                trace!("container `{}` already stopped: {e}", self.name);
                Ok(())
            }
            Err(e) => {
                warn!("failed to stop container `{}`: {e}", self.name);
                Err(Error::Docker(e))
            }
        }
    }

    /// Removes the container with force.
    ///
    /// Removal of an already-removed container is not an error.
    pub async fn force_remove(&self) -> Result<()> {
        debug!("force removing container: `{}`", self.name);

        match self
            .client
            .remove_container(
                &self.name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if already_terminated(&e) => {
                trace!("container `{}` already removed: {e}", self.name);
                Ok(())
            }
            Err(e) => {
                warn!("failed to remove container `{}`: {e}", self.name);
                Err(Error::Docker(e))
            }
        }
    }
}

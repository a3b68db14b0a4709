//! Builders for containers.

use bollard::Docker;
use bollard::container::Config;
use bollard::container::CreateContainerOptions;
use bollard::secret::HostConfig;
use indexmap::IndexMap;
use tracing::warn;

use crate::Container;
use crate::Error;
use crate::Result;

/// A builder for a [`Container`].
pub struct Builder {
    /// A reference to the [`Docker`] client that will be used to create this
    /// container.
    client: Docker,

    /// The image (e.g., `python:3.11-slim`).
    image: Option<String>,

    /// The full command to run.
    command: Vec<String>,

    /// Environment variables.
    env: IndexMap<String, String>,

    /// The working directory.
    work_dir: Option<String>,

    /// The memory cap, in bytes.
    memory: Option<i64>,

    /// The CFS quota.
    cpu_quota: Option<i64>,

    /// The CFS period.
    cpu_period: Option<i64>,

    /// Whether the container gets network access.
    network_enabled: bool,
}

impl Builder {
    /// Creates a new [`Builder`].
    pub fn new(client: Docker) -> Self {
        Self {
            client,
            image: Default::default(),
            command: Default::default(),
            env: Default::default(),
            work_dir: Default::default(),
            memory: Default::default(),
            cpu_quota: Default::default(),
            cpu_period: Default::default(),
            network_enabled: false,
        }
    }

    /// Adds an image name.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Sets the full command to run.
    pub fn command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Sets an environment variable.
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Sets multiple environment variables.
    pub fn envs(
        mut self,
        variables: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.env
            .extend(variables.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the working directory.
    pub fn work_dir(mut self, work_dir: impl Into<String>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    /// Sets the memory cap, in bytes.
    pub fn memory(mut self, bytes: i64) -> Self {
        self.memory = Some(bytes);
        self
    }

    /// Sets the CFS quota.
    pub fn cpu_quota(mut self, quota: i64) -> Self {
        self.cpu_quota = Some(quota);
        self
    }

    /// Sets the CFS period.
    pub fn cpu_period(mut self, period: i64) -> Self {
        self.cpu_period = Some(period);
        self
    }

    /// Enables network access for the container.
    ///
    /// Sandboxes run with networking disabled unless the engine opts in.
    pub fn network_enabled(mut self, enabled: bool) -> Self {
        self.network_enabled = enabled;
        self
    }

    /// Consumes `self` and attempts to create a Docker container.
    ///
    /// Note that the creation of a container does not start the container.
    /// The container is created detached, with combined output capture, and
    /// is never auto-removed: teardown is the engine's responsibility.
    pub async fn try_create(self, name: impl AsRef<str>) -> Result<Container> {
        let image = self
            .image
            .ok_or_else(|| Error::MissingBuilderField("image"))?;

        if self.command.is_empty() {
            return Err(Error::MissingBuilderField("command"));
        }

        let response = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_ref(),
                    ..Default::default()
                }),
                Config {
                    // NOTE: even though the following fields are optional, I
                    // want _this_ struct to require the explicit designation
                    // one way or the other and not rely on the default.
                    cmd: Some(self.command),
                    image: Some(image),
                    // Override the entrypoint to the default Docker entrypoint as we're providing
                    // the full command
                    entrypoint: Some(vec![String::new()]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    network_disabled: Some(!self.network_enabled),
                    // END NOTE
                    working_dir: self.work_dir,
                    host_config: Some(HostConfig {
                        memory: self.memory,
                        cpu_quota: self.cpu_quota,
                        cpu_period: self.cpu_period,
                        ..Default::default()
                    }),
                    env: Some(self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
                    ..Default::default()
                },
            )
            .await
            .map_err(Error::Docker)?;

        for warning in &response.warnings {
            warn!("{warning}");
        }

        Ok(Container::new(self.client, name.as_ref().to_string()))
    }
}

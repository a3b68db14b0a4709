//! Definition of the events emitted over a sandrun execution stream.
//!
//! Every execution produces an ordered sequence of [`Event`]s that is relayed
//! to the client as JSON frames. An execution terminates with exactly one
//! terminal event: a `complete` on any outcome that reached the sandbox, or an
//! `error` when setup failed before anything could run.

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// The closed set of event types sent over the stream.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A human-readable progress message.
    Status,
    /// A line of combined standard output/standard error from the sandbox.
    Stdout,
    /// Package installation is about to begin.
    InstallStart,
    /// Package installation finished successfully and the program is starting.
    InstallComplete,
    /// Package installation failed; the program was not run.
    InstallError,
    /// A missing dependency was detected in the program's output.
    Dependency,
    /// Rendered HTML content for the sandbox-less preview language.
    HtmlPreview,
    /// The execution could not proceed.
    Error,
    /// The execution reached a terminal outcome.
    Complete,
}

/// An event emitted on the server-to-client stream.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Event {
    /// The type of the event.
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// The textual payload of the event.
    pub content: String,

    /// When the event was produced (UTC).
    pub timestamp: DateTime<Utc>,

    /// The packages about to be installed (`install_start` only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<String>>,

    /// The package manager that owns the missing package (`dependency` only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,

    /// The name of the missing package (`dependency` only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,

    /// A ready-to-run installation command (`dependency` only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_command: Option<String>,
}

impl Event {
    /// Creates an event of the given kind with no optional fields.
    fn new(kind: EventKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            timestamp: Utc::now(),
            packages: None,
            package_manager: None,
            package_name: None,
            install_command: None,
        }
    }

    /// Creates a `status` event.
    pub fn status(content: impl Into<String>) -> Self {
        Self::new(EventKind::Status, content)
    }

    /// Creates a `stdout` event for one line of sandbox output.
    pub fn stdout(line: impl Into<String>) -> Self {
        Self::new(EventKind::Stdout, line)
    }

    /// Creates an `install_start` event announcing the packages to install.
    pub fn install_start(packages: Vec<String>) -> Self {
        let mut event = Self::new(
            EventKind::InstallStart,
            format!("Installing packages: {}", packages.join(", ")),
        );
        event.packages = Some(packages);
        event
    }

    /// Creates an `install_complete` event carrying the sentinel line.
    pub fn install_complete(line: impl Into<String>) -> Self {
        Self::new(EventKind::InstallComplete, line)
    }

    /// Creates an `install_error` event carrying the sentinel line.
    pub fn install_error(line: impl Into<String>) -> Self {
        Self::new(EventKind::InstallError, line)
    }

    /// Creates a `dependency` event suggesting how to install a missing
    /// package.
    pub fn dependency(
        package_manager: impl Into<String>,
        package_name: impl Into<String>,
        install_command: impl Into<String>,
    ) -> Self {
        let package_manager = package_manager.into();
        let package_name = package_name.into();

        let mut event = Self::new(
            EventKind::Dependency,
            format!("Missing dependency detected: {package_name}"),
        );
        event.package_manager = Some(package_manager);
        event.package_name = Some(package_name);
        event.install_command = Some(install_command.into());
        event
    }

    /// Creates an `html_preview` event carrying the raw markup.
    pub fn html_preview(markup: impl Into<String>) -> Self {
        Self::new(EventKind::HtmlPreview, markup)
    }

    /// Creates an `error` event.
    pub fn error(content: impl Into<String>) -> Self {
        Self::new(EventKind::Error, content)
    }

    /// Creates a `complete` event.
    pub fn complete(content: impl Into<String>) -> Self {
        Self::new(EventKind::Complete, content)
    }

    /// Whether this event ends the stream.
    ///
    /// `error` is terminal only when it is the last thing the engine has to
    /// say (setup failures); the engine signals that by closing the channel,
    /// so consumers should treat channel close, not this flag alone, as the
    /// end of the stream. The flag exists for logging and assertions.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Complete | EventKind::Error)
    }

    /// Renders the timestamp in the ISO-8601 `Z`-suffixed form used on the
    /// wire.
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&EventKind::InstallComplete).unwrap();
        assert_eq!(json, "\"install_complete\"");

        let json = serde_json::to_string(&EventKind::HtmlPreview).unwrap();
        assert_eq!(json, "\"html_preview\"");
    }

    #[test]
    fn optional_fields_are_omitted() {
        let value = serde_json::to_value(Event::stdout("hello\n")).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object["type"], "stdout");
        assert_eq!(object["content"], "hello\n");
        assert!(object.contains_key("timestamp"));
        assert!(!object.contains_key("packages"));
        assert!(!object.contains_key("package_manager"));
    }

    #[test]
    fn dependency_carries_install_fields() {
        let event = Event::dependency("pip", "numpy", "pip install --no-cache-dir numpy");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "dependency");
        assert_eq!(value["package_manager"], "pip");
        assert_eq!(value["package_name"], "numpy");
        assert_eq!(value["install_command"], "pip install --no-cache-dir numpy");
    }

    #[test]
    fn install_start_lists_packages() {
        let event = Event::install_start(vec!["numpy".into(), "pandas".into()]);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["packages"], serde_json::json!(["numpy", "pandas"]));
        assert_eq!(value["content"], "Installing packages: numpy, pandas");
    }

    #[test]
    fn terminal_events() {
        assert!(Event::complete("done").is_terminal());
        assert!(Event::error("boom").is_terminal());
        assert!(!Event::status("running").is_terminal());
    }

    #[test]
    fn timestamps_are_utc_zulu() {
        let event = Event::status("x");
        assert!(event.timestamp_rfc3339().ends_with('Z'));
    }
}

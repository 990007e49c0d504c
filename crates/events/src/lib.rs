#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Event system for async communication in kiln
//!
//! All user-visible output of the build driver flows through events on a
//! tokio channel - the driver itself never prints or logs directly. The
//! consumer (CLI, log collector) decides rendering.

use kiln_types::{PackageId, Stage, Version};
use serde::{Deserialize, Serialize};

/// Type alias for event sender
pub type EventSender = tokio::sync::mpsc::UnboundedSender<Event>;

/// Type alias for event receiver
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<Event>;

/// Create a new event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Core event enum for all build-driver output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The driver accepted a plan and is starting up
    BuildStarting {
        packages: usize,
        jobs: usize,
    },

    /// A package's task began executing
    PackageStarting {
        name: String,
        version: Version,
    },

    /// A stage began for a package
    StageStarted {
        package: String,
        stage: Stage,
    },

    /// A stage finished for a package
    StageCompleted {
        package: String,
        stage: Stage,
        success: bool,
    },

    /// A stage was skipped (constraints, ledger, or missing inputs)
    StageSkipped {
        package: String,
        stage: Stage,
        reason: String,
    },

    /// An external command is about to run
    CommandStarted {
        package: String,
        command: String,
    },

    /// A package's library became available to its dependents
    LibraryRegistered {
        name: String,
        version: Version,
    },

    /// A package's task failed
    PackageFailed {
        name: String,
        version: Version,
        error: String,
    },

    /// A non-fatal observation surfaced in the final report
    Warning {
        message: String,
    },

    /// The whole run finished
    BuildCompleted {
        succeeded: usize,
        failed: usize,
        warnings: usize,
    },
}

/// Convenience sink wrapper: sending never fails even with no consumer
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<EventSender>,
}

impl EventSink {
    /// A sink that forwards to the given channel
    #[must_use]
    pub fn new(sender: EventSender) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// A sink that discards everything
    #[must_use]
    pub fn discard() -> Self {
        Self { sender: None }
    }

    /// Emit an event, ignoring a closed or absent channel
    pub fn emit(&self, event: Event) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}

impl Event {
    /// Event announcing that a package's task began
    #[must_use]
    pub fn package_starting(id: &PackageId) -> Self {
        Event::PackageStarting {
            name: id.name.clone(),
            version: id.version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let event = Event::StageStarted {
            package: "text".to_string(),
            stage: Stage::Build,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"stage_started\""));
    }

    #[test]
    fn discard_sink_accepts_events() {
        let sink = EventSink::discard();
        sink.emit(Event::Warning {
            message: "nothing listens".to_string(),
        });
    }

    #[tokio::test]
    async fn channel_round_trip() {
        let (tx, mut rx) = channel();
        let sink = EventSink::new(tx);
        sink.emit(Event::BuildStarting {
            packages: 2,
            jobs: 4,
        });
        match rx.recv().await {
            Some(Event::BuildStarting { packages, jobs }) => {
                assert_eq!((packages, jobs), (2, 4));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

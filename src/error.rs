//! Error types used by the channel, the supervisor and its waiters.
//!
//! - [`CodecError`]: a body that is not a valid `*[<tag>]*<payload>` envelope.
//! - [`ChannelError`]: failures of the loopback server/client endpoints.
//! - [`SupervisorError`]: rejected triggers and a disposed supervisor.
//! - [`WaitError`]: outcome of a cancelled or orphaned [`when_state_is`](crate::ProcessSupervisor::when_state_is).
//! - [`LaunchError`]: missing or malformed startup parameters.
//! - [`HostError`]: failures while registering a child with the host manager.
//!
//! Every enum provides `as_label` (stable snake_case label for logs/metrics).

use std::io;

use thiserror::Error;

use crate::core::{State, Trigger};

/// # Errors produced while framing or parsing an envelope.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Body does not start with `*[` or the closing `]*` is absent.
    #[error("envelope marker not found")]
    MissingMarker,

    /// Marker pair present but nothing between them.
    #[error("empty event type")]
    EmptyTag,

    /// Tag contains a bracket and would break marker extraction.
    #[error("invalid event type {0:?}: brackets are not allowed")]
    InvalidTag(String),

    /// Tag bytes are not valid UTF-8.
    #[error("event type is not valid utf-8")]
    NotUtf8,
}

impl CodecError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CodecError::MissingMarker => "codec_missing_marker",
            CodecError::EmptyTag => "codec_empty_tag",
            CodecError::InvalidTag(_) => "codec_invalid_tag",
            CodecError::NotUtf8 => "codec_not_utf8",
        }
    }
}

/// # Errors produced by the channel endpoints.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The loopback listener could not be bound.
    #[error("failed to bind loopback listener: {0}")]
    Bind(#[source] io::Error),

    /// The partner could not be reached or the round trip failed.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The partner answered with a non-success status.
    #[error("partner rejected message with status {status}: {body}")]
    Rejected {
        /// HTTP status returned by the partner.
        status: u16,
        /// Acknowledgement body returned with it.
        body: String,
    },

    /// The message could not be framed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The payload could not be serialized.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The endpoint was disposed.
    #[error("channel endpoint closed")]
    Closed,
}

impl ChannelError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ChannelError::Bind(_) => "channel_bind",
            ChannelError::Transport(_) => "channel_transport",
            ChannelError::Rejected { .. } => "channel_rejected",
            ChannelError::Codec(_) => "channel_codec",
            ChannelError::Serialize(_) => "channel_serialize",
            ChannelError::Closed => "channel_closed",
        }
    }
}

/// # Errors produced by the process supervisor.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum SupervisorError {
    /// The trigger is not permitted from the current state.
    #[error("trigger {trigger:?} is not permitted in state {state:?}")]
    InvalidTransition {
        /// State at the time the trigger was consumed.
        state: State,
        /// Rejected trigger.
        trigger: Trigger,
    },

    /// The supervisor was disposed and its trigger queue is closed.
    #[error("trigger queue closed")]
    QueueClosed,
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::InvalidTransition { .. } => "supervisor_invalid_transition",
            SupervisorError::QueueClosed => "supervisor_queue_closed",
        }
    }
}

/// # Outcome of a state wait that did not observe its target.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The caller's cancellation token fired first.
    #[error("wait cancelled")]
    Canceled,

    /// The supervisor was dropped before the target state was reached.
    #[error("supervisor closed")]
    Closed,
}

impl WaitError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WaitError::Canceled => "wait_canceled",
            WaitError::Closed => "wait_closed",
        }
    }
}

/// # Errors produced while reading startup parameters.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// A required `Key==Value` token is absent.
    #[error("missing launch parameter {0}")]
    Missing(&'static str),

    /// The value of a known key is not a valid number.
    #[error("invalid value {value:?} for launch parameter {key}")]
    Invalid {
        /// Parameter name.
        key: &'static str,
        /// Raw value as found on the command line.
        value: String,
    },
}

impl LaunchError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            LaunchError::Missing(_) => "launch_missing",
            LaunchError::Invalid { .. } => "launch_invalid",
        }
    }
}

/// # Errors produced by the host manager.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum HostError {
    /// Channel endpoint could not be created.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Probing for a free port failed at the OS level.
    #[error("failed to probe a free port: {0}")]
    PortProbe(#[source] io::Error),

    /// Every probed port collided with an existing partner.
    #[error("no collision-free port after {attempts} attempts")]
    PortsExhausted {
        /// Number of probes made.
        attempts: usize,
    },

    /// A supervisor with this name is already registered.
    #[error("a process named {0:?} is already registered")]
    Duplicate(String),
}

impl HostError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            HostError::Channel(e) => e.as_label(),
            HostError::PortProbe(_) => "host_port_probe",
            HostError::PortsExhausted { .. } => "host_ports_exhausted",
            HostError::Duplicate(_) => "host_duplicate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(CodecError::EmptyTag.as_label(), "codec_empty_tag");
        assert_eq!(ChannelError::Closed.as_label(), "channel_closed");
        assert_eq!(
            SupervisorError::QueueClosed.as_label(),
            "supervisor_queue_closed"
        );
        assert_eq!(WaitError::Canceled.as_label(), "wait_canceled");
        assert_eq!(
            HostError::Channel(ChannelError::Closed).as_label(),
            "channel_closed"
        );
        assert_eq!(LaunchError::Missing("ChildPort").as_label(), "launch_missing");
    }

    #[test]
    fn invalid_transition_message_names_state_and_trigger() {
        let err = SupervisorError::InvalidTransition {
            state: State::NotStarted,
            trigger: Trigger::Stop,
        };
        assert_eq!(
            err.to_string(),
            "trigger Stop is not permitted in state NotStarted"
        );
    }
}

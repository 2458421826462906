//! # Envelope codec.
//!
//! Frames and parses the wire body `*[<EventType>]*<payload>`.
//!
//! ```text
//! *[SceneData]*{"episode":3}
//! ^^         ^^
//!  open marker  close marker   payload = everything after the close marker
//! ```
//!
//! ## Rules
//! - The tag is non-empty UTF-8 and never contains `[` or `]`, so the first
//!   `]*` after the opening marker always terminates it.
//! - The payload is opaque; it may itself contain marker characters.

use std::borrow::Cow;
use std::fmt;

use hyper::body::Bytes;

use crate::error::CodecError;

const OPEN: &[u8] = b"*[";
const CLOSE: &[u8] = b"]*";

/// Event-type tag carried by an [`Envelope`].
///
/// Well-known tags are exposed as associated constants; any other bracket-free
/// string can be used through [`EventType::new`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventType(Cow<'static, str>);

impl EventType {
    /// Default tag for untyped traffic.
    pub const NONE: EventType = EventType(Cow::Borrowed("None"));
    /// Reserved tag of the cooperative shutdown signal.
    pub const EXIT: EventType = EventType(Cow::Borrowed("Exit"));
    /// Scene run parameters.
    pub const SCENE_DATA: EventType = EventType(Cow::Borrowed("SceneData"));
    /// Scene start notification.
    pub const SCENE_START: EventType = EventType(Cow::Borrowed("SceneStart"));
    /// Training/episode data.
    pub const TRAINING_DATA: EventType = EventType(Cow::Borrowed("TrainingData"));
    /// Scene reset request.
    pub const RESET_SCENE: EventType = EventType(Cow::Borrowed("ResetScene"));

    /// Creates a tag, rejecting empty or bracketed names.
    pub fn new(tag: impl Into<Cow<'static, str>>) -> Result<Self, CodecError> {
        let tag = tag.into();
        validate(&tag)?;
        Ok(Self(tag))
    }

    /// Returns the tag text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Default for EventType {
    fn default() -> Self {
        EventType::NONE
    }
}

fn validate(tag: &str) -> Result<(), CodecError> {
    if tag.is_empty() {
        return Err(CodecError::EmptyTag);
    }
    if tag.contains(['[', ']']) {
        return Err(CodecError::InvalidTag(tag.to_string()));
    }
    Ok(())
}

/// One framed unit of exchange: a tag plus opaque payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Event-type tag.
    pub event_type: EventType,
    /// Opaque payload.
    pub payload: Bytes,
}

impl Envelope {
    /// Creates an envelope.
    pub fn new(event_type: EventType, payload: impl Into<Bytes>) -> Self {
        Self {
            event_type,
            payload: payload.into(),
        }
    }

    /// Payload interpreted as UTF-8 (lossy).
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Frames `payload` under `event_type`.
pub fn encode(event_type: &EventType, payload: &[u8]) -> Bytes {
    let tag = event_type.as_str().as_bytes();
    let mut out = Vec::with_capacity(OPEN.len() + tag.len() + CLOSE.len() + payload.len());
    out.extend_from_slice(OPEN);
    out.extend_from_slice(tag);
    out.extend_from_slice(CLOSE);
    out.extend_from_slice(payload);
    Bytes::from(out)
}

/// Parses a wire body into an [`Envelope`].
pub fn decode(body: Bytes) -> Result<Envelope, CodecError> {
    let rest = body.strip_prefix(OPEN).ok_or(CodecError::MissingMarker)?;
    let end = rest
        .windows(CLOSE.len())
        .position(|w| w == CLOSE)
        .ok_or(CodecError::MissingMarker)?;

    let tag = std::str::from_utf8(&rest[..end]).map_err(|_| CodecError::NotUtf8)?;
    validate(tag)?;
    let event_type = EventType(Cow::Owned(tag.to_string()));

    let start = OPEN.len() + end + CLOSE.len();
    Ok(Envelope {
        event_type,
        payload: body.slice(start..),
    })
}

//! Identifiers used throughout the coordination core.
//!
//! These mirror the lightweight newtype-over-`String`/`usize` style the
//! teacher's generated CDP types use for protocol ids (`FrameId`, `LoaderId`,
//! ...), minus the wire (de)serialization concerns since those belong to the
//! `PageDelegate` transport, not this core.

use std::borrow::Cow;
use std::fmt;

/// Identifies one navigable frame. May be reassigned for the main frame
/// across a cross-process navigation (spec §3, §4.5 `frameAttached`).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct FrameId(pub Cow<'static, str>);

impl FrameId {
    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<String> for FrameId {
    fn from(s: String) -> Self {
        Self(Cow::Owned(s))
    }
}

impl From<&'static str> for FrameId {
    fn from(s: &'static str) -> Self {
        Self(Cow::Borrowed(s))
    }
}

/// Opaque id minted by the browser when a new top-level document load
/// begins (spec §3 "Document identity"). Same-document navigations never
/// mint one.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct DocumentId(pub Cow<'static, str>);

impl DocumentId {
    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(Cow::Owned(s))
    }
}

impl From<&'static str> for DocumentId {
    fn from(s: &'static str) -> Self {
        Self(Cow::Borrowed(s))
    }
}

/// Identifies an in-flight network request.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct RequestId(pub Cow<'static, str>);

impl RequestId {
    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The two JavaScript worlds a frame exposes (spec glossary "World").
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum World {
    Main,
    Utility,
}

impl World {
    pub const ALL: [World; 2] = [World::Main, World::Utility];
}

impl fmt::Display for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            World::Main => f.write_str("main"),
            World::Utility => f.write_str("utility"),
        }
    }
}

/// Monotonic id for a [`RerunnableTask`](crate::frame::rerunnable::RerunnableTask),
/// used only for `tracing` correlation.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct TaskId(pub u64);

//! Runtime knobs for the relay and client sessions.
//!
//! Both structs have defaults matching the CLI defaults, so tests can build
//! them with `..Default::default()` and only override what they exercise.

use crate::history::Retention;
use crate::session::Urgency;

/// Upper bound on concurrently tracked connections.
pub const DEFAULT_MAX_PARTICIPANTS: usize = 32;
/// How many history entries a full redraw shows.
pub const DEFAULT_DISPLAY_WINDOW: usize = 200;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub max_participants: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_participants: DEFAULT_MAX_PARTICIPANTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Session key shown in the prompt.
    pub key: String,
    pub retention: Retention,
    pub urgency: Urgency,
    pub display_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            retention: Retention::Unbounded,
            urgency: Urgency::All,
            display_window: DEFAULT_DISPLAY_WINDOW,
        }
    }
}

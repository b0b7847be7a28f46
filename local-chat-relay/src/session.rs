//! State shared by the two halves of a client session.
//!
//! Everything the input and network tasks both touch lives in one
//! [`Session`]: the mutex-guarded [`SessionState`] (history plus display
//! flags), the join phase, and the shutdown signal. The join phase and the
//! shutdown flag are `watch` channels so either task can wait on a
//! transition instead of polling for it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::config::SessionConfig;
use crate::history::{History, Origin};
use crate::message::{AuthorId, Frame, FrameKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPhase {
    Pending,
    Joined,
    Rejected,
}

/// When the terminal should be alerted about an incoming frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Urgency {
    /// Every frame.
    #[default]
    All,
    /// Chat messages from other participants.
    MsgOnly,
    /// Never.
    None,
}

impl Urgency {
    pub fn next(self) -> Self {
        match self {
            Urgency::All => Urgency::MsgOnly,
            Urgency::MsgOnly => Urgency::None,
            Urgency::None => Urgency::All,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Urgency::All => "all",
            Urgency::MsgOnly => "messages only",
            Urgency::None => "none",
        }
    }
}

/// One-way flag telling every task of a session to finish.
#[derive(Debug, Clone)]
pub struct Shutdown {
    flag: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    pub fn trigger(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once [`Shutdown::trigger`] has been called, immediately if it
    /// already was.
    pub async fn wait(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct SessionState {
    pub history: History,
    own_id: AuthorId,
    key: String,
    pending: u32,
    suppressed: bool,
    urgency: Urgency,
    display_window: usize,
}

impl SessionState {
    fn new(config: &SessionConfig) -> Self {
        Self {
            history: History::new(config.retention),
            own_id: 0,
            key: config.key.clone(),
            pending: 0,
            suppressed: false,
            urgency: config.urgency,
            display_window: config.display_window,
        }
    }

    pub fn own_id(&self) -> AuthorId {
        self.own_id
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    pub fn urgency(&self) -> Urgency {
        self.urgency
    }

    pub fn display_window(&self) -> usize {
        self.display_window
    }

    pub fn prompt(&self) -> String {
        let suppressed = if self.suppressed { "!" } else { "" };
        if self.pending > 0 {
            format!("*({}){}{}> ", self.pending, suppressed, self.key)
        } else {
            format!("{}{}> ", suppressed, self.key)
        }
    }

    /// Applies a frame forwarded by the relay and reports whether the
    /// terminal should be alerted.
    pub fn apply_inbound(&mut self, frame: Frame) -> bool {
        let from_other = frame.author_id != self.own_id;
        let alert = match self.urgency {
            Urgency::All => true,
            Urgency::MsgOnly => frame.kind == FrameKind::Normal && from_other,
            Urgency::None => false,
        };

        match frame.kind {
            FrameKind::Normal | FrameKind::Join | FrameKind::Quit => self.record(frame, from_other),
            FrameKind::ClearHistory => {
                self.history.clear();
                self.pending = 0;
                self.record(frame, from_other);
            }
            FrameKind::Redact => {
                if self.history.redact(frame.author_id) && from_other && self.pending > 0 {
                    self.pending -= 1;
                }
            }
            FrameKind::Mark => self.insert_divider(frame),
            FrameKind::JoinRejected => return false,
        }

        alert
    }

    fn record(&mut self, frame: Frame, from_other: bool) {
        if self.suppressed && from_other {
            self.pending += 1;
        }
        let origin = Origin::classify(&frame, self.own_id);
        self.history.append(frame, origin);
    }

    fn insert_divider(&mut self, frame: Frame) {
        self.history.remove_marks();
        self.history.append(frame, Origin::Notice);
    }

    /// Flips suppressed display and returns the new setting.
    ///
    /// Turning it on replaces any divider with a fresh one so the operator
    /// can see where they stopped reading; turning it off forgets the count.
    pub fn toggle_suppressed(&mut self) -> bool {
        self.suppressed = !self.suppressed;
        if self.suppressed {
            self.insert_mark();
        } else {
            self.pending = 0;
        }
        self.suppressed
    }

    pub fn insert_mark(&mut self) {
        self.insert_divider(Frame::mark(self.own_id));
    }

    pub fn clear_local(&mut self) {
        self.history.clear();
        self.pending = 0;
    }

    /// Called before sending chat text.
    pub fn prepare_chat(&mut self) {
        if !self.suppressed {
            self.history.remove_marks();
        }
    }

    pub fn cycle_urgency(&mut self) -> Urgency {
        self.urgency = self.urgency.next();
        self.urgency
    }
}

#[derive(Debug)]
pub struct Session {
    state: Mutex<SessionState>,
    phase: watch::Sender<JoinPhase>,
    shutdown: Shutdown,
}

impl Session {
    pub fn new(config: &SessionConfig) -> Self {
        let (phase, _) = watch::channel(JoinPhase::Pending);
        Self {
            state: Mutex::new(SessionState::new(config)),
            phase,
            shutdown: Shutdown::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        // Every mutation completes within one call, so a poisoned guard
        // still holds consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn phase(&self) -> JoinPhase {
        *self.phase.borrow()
    }

    pub fn set_phase(&self, phase: JoinPhase) {
        self.phase.send_replace(phase);
    }

    /// Records the identity the relay assigned, then marks the session joined.
    pub fn complete_join(&self, author_id: AuthorId) {
        self.lock().own_id = author_id;
        self.set_phase(JoinPhase::Joined);
    }

    /// Waits until the join phase leaves `Pending`.
    ///
    /// Returns `None` if the session shuts down first.
    pub async fn wait_for_verdict(&self) -> Option<JoinPhase> {
        let mut phase = self.phase.subscribe();
        tokio::select! {
            verdict = phase.wait_for(|phase| *phase != JoinPhase::Pending) => {
                verdict.ok().map(|phase| *phase)
            }
            _ = self.shutdown.wait() => None,
        }
    }
}

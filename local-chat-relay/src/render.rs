//! Terminal output for a client session.
//!
//! The session engine only talks to the [`Renderer`] trait. [`AnsiRenderer`]
//! redraws as much of the window as fits the terminal on every change;
//! [`PlainRenderer`] prints each entry exactly once and suits pipes, logs
//! and tests.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Datelike, Local, TimeZone};
use crossterm::{
    cursor::{MoveTo, MoveToColumn},
    queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{self, Clear, ClearType},
};
use tracing::debug;

use crate::history::{Entry, Origin};
use crate::message::FrameKind;
use crate::session::SessionState;

const BELL: &str = "\x07";

/// Display collaborator driven by the session engine.
///
/// `refresh` is called with the session lock held, so implementations see a
/// consistent history and must not block for long.
pub trait Renderer: Send + Sync + 'static {
    fn refresh(&self, state: &SessionState);

    /// Forget whatever is on screen before the next refresh.
    fn reset(&self) {}

    fn notice(&self, text: &str);

    fn alert(&self);
}

/// Formats one history entry without colour, e.g. `12:01:33 alice: hi`.
pub fn format_entry(entry: &Entry, now: DateTime<Local>) -> String {
    let mut line = timestamp(entry.frame.time, now);
    match entry.frame.kind {
        FrameKind::Normal => {
            let _ = write!(line, "{}: {}", entry.frame.nickname, entry.frame.body);
        }
        _ => line.push_str(&entry.frame.body),
    }
    line
}

fn timestamp(time: i64, now: DateTime<Local>) -> String {
    let Some(at) = Local.timestamp_opt(time, 0).single() else {
        return String::new();
    };
    if at.year() == now.year() && at.ordinal() == now.ordinal() {
        at.format("%T ").to_string()
    } else {
        at.format("%a %T ").to_string()
    }
}

/// Full-screen redraw through crossterm commands.
#[derive(Debug)]
pub struct AnsiRenderer<W = io::Stdout> {
    out: Mutex<W>,
}

impl AnsiRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> AnsiRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn draw(&self, commands: impl FnOnce(&mut W) -> io::Result<()>) {
        let mut guard = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let out = &mut *guard;
        if let Err(err) = commands(out).and_then(|()| out.flush()) {
            debug!(error = %err, "failed to write to terminal");
        }
    }
}

/// How many entries fit above the prompt line.
fn visible_rows(display_window: usize) -> usize {
    match terminal::size() {
        Ok((_, rows)) => display_window.min(usize::from(rows).saturating_sub(1).max(1)),
        Err(_) => display_window,
    }
}

impl<W: Write + Send + 'static> Renderer for AnsiRenderer<W> {
    fn refresh(&self, state: &SessionState) {
        self.draw(|out| {
            queue!(out, Clear(ClearType::All), MoveTo(0, 0))?;
            if !state.is_suppressed() {
                let now = Local::now();
                for entry in state.history.window(visible_rows(state.display_window())) {
                    match entry.origin {
                        Origin::Own => queue!(out, SetForegroundColor(Color::Cyan))?,
                        Origin::Other => queue!(out, SetForegroundColor(Color::Yellow))?,
                        Origin::Notice => {}
                    }
                    queue!(out, Print(format_entry(entry, now)), ResetColor, Print("\r\n"))?;
                }
            }
            queue!(out, Print(state.prompt()))
        });
    }

    fn reset(&self) {
        self.draw(|out| {
            queue!(
                out,
                Clear(ClearType::Purge),
                Clear(ClearType::All),
                MoveTo(0, 0)
            )
        });
    }

    fn notice(&self, text: &str) {
        self.draw(|out| {
            queue!(
                out,
                MoveToColumn(0),
                Clear(ClearType::CurrentLine),
                Print(text),
                Print("\r\n")
            )
        });
    }

    fn alert(&self) {
        self.draw(|out| queue!(out, Print(BELL)));
    }
}

/// Append-only output: each entry is printed the first time a refresh sees
/// it. Redactions and clears are not reflected after the fact.
#[derive(Debug)]
pub struct PlainRenderer<W = io::Stdout> {
    inner: Mutex<PlainInner<W>>,
}

#[derive(Debug)]
struct PlainInner<W> {
    out: W,
    printed: u64,
}

impl PlainRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> PlainRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            inner: Mutex::new(PlainInner { out, printed: 0 }),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .out
    }

    fn with_out(&self, write: impl FnOnce(&mut PlainInner<W>) -> io::Result<()>) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let inner = &mut *guard;
        if let Err(err) = write(&mut *inner).and_then(|()| inner.out.flush()) {
            debug!(error = %err, "failed to write output");
        }
    }
}

impl<W: Write + Send + 'static> Renderer for PlainRenderer<W> {
    fn refresh(&self, state: &SessionState) {
        if state.is_suppressed() {
            return;
        }
        self.with_out(|inner| {
            let now = Local::now();
            for entry in state.history.window(state.display_window()) {
                if entry.seq > inner.printed {
                    writeln!(inner.out, "{}", format_entry(entry, now))?;
                    inner.printed = entry.seq;
                }
            }
            Ok(())
        });
    }

    fn notice(&self, text: &str) {
        self.with_out(|inner| writeln!(inner.out, "{text}"));
    }

    fn alert(&self) {}
}

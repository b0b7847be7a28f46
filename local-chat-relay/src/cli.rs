use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_DISPLAY_WINDOW, DEFAULT_MAX_PARTICIPANTS, RelayConfig, SessionConfig};
use crate::history::Retention;
use crate::session::Urgency;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a new session: run a relay and join it.
    Start(StartArgs),
    /// Join an existing session by its key.
    Join(JoinArgs),
    /// Run only the relay for a new session.
    Relay(RelayArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StartArgs {
    #[command(flatten)]
    pub relay: RelayArgs,

    #[command(flatten)]
    pub session: SessionArgs,
}

#[derive(Args, Debug, Clone)]
pub struct JoinArgs {
    /// Six character session key printed by `start` or `relay`.
    pub key: String,

    /// Directory holding session rendezvous directories.
    #[arg(long, env = "CHAT_RELAY_RUNTIME_DIR", default_value_os_t = std::env::temp_dir())]
    pub runtime_dir: PathBuf,

    #[command(flatten)]
    pub session: SessionArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// Directory holding session rendezvous directories.
    #[arg(long, env = "CHAT_RELAY_RUNTIME_DIR", default_value_os_t = std::env::temp_dir())]
    pub runtime_dir: PathBuf,

    /// Most connections the relay tracks at once.
    #[arg(long, env = "CHAT_RELAY_MAX_PARTICIPANTS", default_value_t = DEFAULT_MAX_PARTICIPANTS)]
    pub max_participants: usize,
}

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Keep only the ten most recent history entries.
    #[arg(long)]
    pub transient: bool,

    /// Which incoming frames ring the terminal bell.
    #[arg(long, value_enum, default_value_t = Urgency::All)]
    pub urgency: Urgency,

    /// How many history entries a redraw shows.
    #[arg(long, default_value_t = DEFAULT_DISPLAY_WINDOW)]
    pub display_window: usize,

    /// Print each entry once instead of redrawing the screen.
    #[arg(long)]
    pub plain: bool,
}

impl RelayArgs {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            max_participants: self.max_participants,
        }
    }
}

impl SessionArgs {
    pub fn session_config(&self, key: &str) -> SessionConfig {
        SessionConfig {
            key: key.to_string(),
            retention: if self.transient {
                Retention::Transient
            } else {
                Retention::Unbounded
            },
            urgency: self.urgency,
            display_window: self.display_window,
        }
    }
}

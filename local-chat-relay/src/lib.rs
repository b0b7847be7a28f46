//! Terminal chat for a few people on one machine.
//!
//! One process runs a relay on a Unix socket inside a private rendezvous
//! directory; every participant runs a client session against it and
//! exchanges fixed-size binary frames. The modules:
//!
//! - [`message`] defines the frame layout and exact-size stream helpers.
//! - [`relay`] accepts connections, enforces unique nicknames, and fans
//!   frames out with relay-assigned attribution.
//! - [`client`] drives one participant: nickname handshake, operator input,
//!   and inbound frames, coordinated through a [`session::Session`].
//! - [`history`] keeps each session's ordered message store.
//! - [`command`] parses operator lines; [`render`] draws the session.
//! - [`rendezvous`] creates and finds session directories by key.
//! - [`cli`] and [`config`] hold the command line and runtime knobs.
//!
//! Integration tests drive the relay and the session engine through this
//! crate directly.

pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod history;
pub mod message;
pub mod relay;
pub mod render;
pub mod rendezvous;
pub mod session;

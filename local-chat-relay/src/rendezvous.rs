//! Where a session's relay socket lives.
//!
//! A session is a private directory `<base>/comms.<KEY>` holding the relay
//! socket. The six character key is all a second participant needs to find
//! it. Only the process that created the directory removes it.

use std::fs::DirBuilder;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use nanoid::nanoid;
use tracing::{debug, warn};

use crate::error::RendezvousError;

pub const KEY_LEN: usize = 6;
pub const SOCKET_FILENAME: &str = "relay.sock";

const DIR_PREFIX: &str = "comms.";
const CREATE_ATTEMPTS: usize = 16;
const KEY_ALPHABET: [char; 62] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
    'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'A', 'B',
    'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U',
    'V', 'W', 'X', 'Y', 'Z',
];

#[derive(Debug)]
pub struct Rendezvous {
    key: String,
    dir: PathBuf,
    owned: bool,
}

impl Rendezvous {
    /// Creates a new session directory under `base` with a fresh key.
    pub fn create(base: &Path) -> Result<Self, RendezvousError> {
        for _ in 0..CREATE_ATTEMPTS {
            let key = nanoid!(KEY_LEN, &KEY_ALPHABET);
            let dir = session_dir(base, &key);
            match DirBuilder::new().mode(0o700).create(&dir) {
                Ok(()) => {
                    debug!(dir = %dir.display(), "created session directory");
                    return Ok(Self {
                        key,
                        dir,
                        owned: true,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(io::Error::new(io::ErrorKind::AlreadyExists, "no free session key").into())
    }

    /// Points at a session somebody else created.
    pub fn existing(base: &Path, key: &str) -> Result<Self, RendezvousError> {
        validate_key(key)?;
        let dir = session_dir(base, key);
        if !dir.is_dir() {
            return Err(RendezvousError::UnknownSession(key.to_string()));
        }
        Ok(Self {
            key: key.to_string(),
            dir,
            owned: false,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn socket_path(&self) -> PathBuf {
        self.dir.join(SOCKET_FILENAME)
    }

    /// Removes the socket and the directory if this process created them.
    pub fn teardown(self) -> Result<(), RendezvousError> {
        if !self.owned {
            return Ok(());
        }
        match std::fs::remove_file(self.socket_path()) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(error = %err, "failed to remove relay socket"),
        }
        std::fs::remove_dir(&self.dir)?;
        debug!(dir = %self.dir.display(), "removed session directory");
        Ok(())
    }
}

pub fn validate_key(key: &str) -> Result<(), RendezvousError> {
    if key.len() == KEY_LEN && key.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(RendezvousError::InvalidKey(key.to_string()))
    }
}

fn session_dir(base: &Path, key: &str) -> PathBuf {
    base.join(format!("{DIR_PREFIX}{key}"))
}

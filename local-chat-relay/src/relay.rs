//! The relay: accepts local connections and fans frames out to every joined
//! participant.
//!
//! One task owns the slot table, so nickname checks and broadcasts never
//! race. Each accepted socket gets a small reader task that performs the
//! exact-size frame read and forwards the result over a channel; all
//! decisions and all writes happen back on the owning task.

use std::{future::Future, path::Path};

use anyhow::Result;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{UnixListener, UnixStream, unix::OwnedWriteHalf},
    select,
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::message::{AuthorId, Frame, FrameKind, WireError, read_message, write_message};

const EVENT_QUEUE: usize = 128;

pub struct Relay {
    listener: UnixListener,
    config: RelayConfig,
}

impl Relay {
    pub fn new(listener: UnixListener, config: RelayConfig) -> Self {
        Self { listener, config }
    }

    /// Binds a fresh listener at `path`. Must be called inside a runtime.
    pub fn bind(path: &Path, config: RelayConfig) -> std::io::Result<Self> {
        Ok(Self::new(UnixListener::bind(path)?, config))
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay { listener, config } = self;
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE);
        let mut table = RelayTable::new(config.max_participants);
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => admit_stream(&mut table, stream, &events_tx),
                    Err(err) => warn!(error = ?err, "failed to accept connection"),
                },
                Some(first) = events_rx.recv() => {
                    let mut batch = vec![first];
                    while let Ok(event) = events_rx.try_recv() {
                        batch.push(event);
                    }
                    table.process(batch).await;
                }
            }
        }

        table.close_all();
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn admit_stream(
    table: &mut RelayTable<OwnedWriteHalf>,
    stream: UnixStream,
    events: &mpsc::Sender<ConnectionEvent>,
) {
    let (reader, writer) = stream.into_split();
    let Some(id) = table.admit(writer) else {
        warn!(
            max = table.max_participants,
            "relay is full, dropping new connection"
        );
        return;
    };
    debug!(id, "connection accepted");
    let handle = tokio::spawn(read_connection(id, reader, events.clone()));
    table.attach_reader(id, handle);
}

/// Reads whole frames from one connection until it fails.
async fn read_connection<R>(id: AuthorId, mut reader: R, events: mpsc::Sender<ConnectionEvent>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let event = match read_message(&mut reader).await {
            Ok(frame) => ConnectionEvent::Frame { id, frame },
            Err(WireError::UnknownKind(kind)) => ConnectionEvent::Malformed { id, kind },
            Err(err) => {
                debug!(id, error = %err, "connection closed");
                let _ = events.send(ConnectionEvent::Closed { id }).await;
                return;
            }
        };
        if events.send(event).await.is_err() {
            return;
        }
    }
}

#[derive(Debug)]
enum ConnectionEvent {
    Frame { id: AuthorId, frame: Frame },
    Malformed { id: AuthorId, kind: u32 },
    Closed { id: AuthorId },
}

impl ConnectionEvent {
    fn id(&self) -> AuthorId {
        match self {
            ConnectionEvent::Frame { id, .. }
            | ConnectionEvent::Malformed { id, .. }
            | ConnectionEvent::Closed { id } => *id,
        }
    }
}

struct Slot<W> {
    id: AuthorId,
    nickname: String,
    writer: W,
    reader: Option<JoinHandle<()>>,
}

impl<W> Slot<W> {
    fn is_named(&self) -> bool {
        !self.nickname.is_empty()
    }
}

/// Live connections in slot order. Removal swaps the last slot into the
/// vacated one, so order among survivors is not preserved.
struct RelayTable<W> {
    slots: Vec<Slot<W>>,
    next_id: AuthorId,
    max_participants: usize,
}

impl<W> RelayTable<W>
where
    W: AsyncWrite + Unpin,
{
    fn new(max_participants: usize) -> Self {
        Self {
            slots: Vec::new(),
            next_id: 1,
            max_participants,
        }
    }

    fn admit(&mut self, writer: W) -> Option<AuthorId> {
        if self.slots.len() >= self.max_participants {
            return None;
        }
        let id = self.allocate_id();
        self.slots.push(Slot {
            id,
            nickname: String::new(),
            writer,
            reader: None,
        });
        Some(id)
    }

    /// Next id not held by a live connection. Wraps past `AuthorId::MAX`
    /// back to 1; 0 is never handed out.
    fn allocate_id(&mut self) -> AuthorId {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.checked_add(1).unwrap_or(1);
            if self.slot_index(id).is_none() {
                return id;
            }
        }
    }

    fn attach_reader(&mut self, id: AuthorId, handle: JoinHandle<()>) {
        match self.slot_index(id) {
            Some(index) => self.slots[index].reader = Some(handle),
            None => handle.abort(),
        }
    }

    fn slot_index(&self, id: AuthorId) -> Option<usize> {
        self.slots.iter().position(|slot| slot.id == id)
    }

    fn nickname_taken(&self, nickname: &str) -> bool {
        self.slots.iter().any(|slot| slot.nickname == nickname)
    }

    /// Handles everything that became ready in one wake-up, in slot order,
    /// then drops the connections that asked to leave or failed.
    async fn process(&mut self, mut batch: Vec<ConnectionEvent>) {
        batch.sort_by_key(|event| self.slot_index(event.id()).unwrap_or(usize::MAX));

        let mut doomed = Vec::new();
        for event in batch {
            let id = event.id();
            if doomed.contains(&id) {
                continue;
            }
            let Some(index) = self.slot_index(id) else {
                debug!(id, "event for a connection that is already gone");
                continue;
            };

            match event {
                ConnectionEvent::Frame { frame, .. } => self.route(index, frame, &mut doomed).await,
                ConnectionEvent::Malformed { kind, .. } => {
                    warn!(id, kind, "received unknown frame kind, ignoring");
                }
                ConnectionEvent::Closed { .. } => doomed.push(id),
            }
        }

        for id in doomed {
            self.remove(id);
        }
    }

    async fn route(&mut self, index: usize, mut frame: Frame, doomed: &mut Vec<AuthorId>) {
        let id = self.slots[index].id;
        let named = self.slots[index].is_named();
        let mut leaving = false;

        match frame.kind {
            FrameKind::Join => {
                if named {
                    debug!(id, "ignoring join on a connection that already has a nickname");
                    return;
                }
                if frame.nickname.is_empty() || self.nickname_taken(&frame.nickname) {
                    info!(id, nickname = %frame.nickname, "nickname taken, rejecting join");
                    frame.kind = FrameKind::JoinRejected;
                    self.send_to(index, &frame).await;
                    return;
                }
                let slot = &mut self.slots[index];
                slot.nickname = frame.nickname.clone();
                frame.body = format!("{} joined the chat!", slot.nickname);
                info!(id, nickname = %slot.nickname, "participant joined");
            }
            kind if !named => {
                debug!(id, ?kind, "ignoring frame from a connection without a nickname");
                return;
            }
            FrameKind::Quit => {
                let nickname = &self.slots[index].nickname;
                frame.body = format!("{nickname} left the chat!");
                info!(id, %nickname, "participant left");
                leaving = true;
            }
            FrameKind::ClearHistory => {
                frame.body = format!("{} cleared history!", self.slots[index].nickname);
            }
            FrameKind::Normal | FrameKind::Redact | FrameKind::Mark => {}
            FrameKind::JoinRejected => {
                debug!(id, "ignoring join rejection sent by a client");
                return;
            }
        }

        // Attribution always comes from the relay's own record.
        let slot = &self.slots[index];
        frame.nickname = slot.nickname.clone();
        frame.author_id = slot.id;

        self.broadcast(&frame, doomed).await;
        if leaving {
            doomed.push(id);
        }
    }

    async fn send_to(&mut self, index: usize, frame: &Frame) {
        let slot = &mut self.slots[index];
        if let Err(err) = write_message(&mut slot.writer, frame).await {
            warn!(id = slot.id, error = %err, "failed to deliver frame");
        }
    }

    /// Writes `frame` to every named connection, including its sender.
    async fn broadcast(&mut self, frame: &Frame, doomed: &[AuthorId]) {
        let targets = self
            .slots
            .iter_mut()
            .filter(|slot| slot.is_named() && !doomed.contains(&slot.id));
        for slot in targets {
            if let Err(err) = write_message(&mut slot.writer, frame).await {
                warn!(id = slot.id, error = %err, "failed to deliver frame");
            }
        }
    }

    fn remove(&mut self, id: AuthorId) {
        let Some(index) = self.slot_index(id) else {
            return;
        };
        let mut slot = self.slots.swap_remove(index);
        if let Some(reader) = slot.reader.take() {
            reader.abort();
        }
        if slot.is_named() {
            info!(id, nickname = %slot.nickname, "connection removed");
        } else {
            debug!(id, "connection removed");
        }
    }

    fn close_all(&mut self) {
        for slot in self.slots.drain(..) {
            if let Some(reader) = slot.reader {
                reader.abort();
            }
        }
    }
}

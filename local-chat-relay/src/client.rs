use std::{
    future::Future,
    io::{self, BufRead, Write},
    path::Path,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use crossterm::{
    cursor::MoveToColumn,
    queue,
    style::Print,
    terminal::{Clear, ClearType},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::UnixStream,
    select,
    sync::mpsc,
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::{
    command::{HELP_TEXT, OperatorCommand},
    message::{Frame, FrameKind, read_message, write_message},
    render::Renderer,
    session::{JoinPhase, Session, Shutdown},
};

pub const CONNECT_ATTEMPTS: usize = 10;
const CONNECT_DELAY: Duration = Duration::from_millis(100);
const NICK_PROMPT: &str = "enter nick: ";

/// Where operator lines come from.
pub trait LineSource: Send + 'static {
    /// Shows `prompt` and waits for the next line, without its line ending.
    /// `Ok(None)` means input is exhausted.
    fn next_line(&mut self, prompt: &str)
    -> impl Future<Output = io::Result<Option<String>>> + Send;

    /// Forget any recall history kept for line editing.
    fn clear_recall(&mut self) {}
}

/// Lines from stdin, read on a dedicated thread.
///
/// A blocking stdin read cannot be cancelled, so it runs outside the runtime
/// and hands lines over a channel. Dropping the receiver abandons the read.
/// Lines are read cooked, so there is no recall history and
/// [`LineSource::clear_recall`] keeps its no-op default.
#[derive(Debug)]
pub struct StdinLines {
    lines: mpsc::Receiver<io::Result<String>>,
    echo_prompt: bool,
}

impl StdinLines {
    pub fn spawn(echo_prompt: bool) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel(16);
        std::thread::Builder::new()
            .name("stdin-lines".into())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self {
            lines: rx,
            echo_prompt,
        })
    }
}

impl LineSource for StdinLines {
    async fn next_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        if self.echo_prompt {
            let mut stdout = io::stdout().lock();
            queue!(
                stdout,
                MoveToColumn(0),
                Clear(ClearType::CurrentLine),
                Print(prompt)
            )?;
            stdout.flush()?;
        }
        self.lines.recv().await.transpose()
    }
}

/// Connects to the relay socket, retrying briefly while it comes up.
pub async fn connect(path: &Path) -> Result<UnixStream> {
    let mut attempt = 1;
    loop {
        match UnixStream::connect(path).await {
            Ok(stream) => {
                info!(path = %path.display(), "connected to relay");
                return Ok(stream);
            }
            Err(err) if attempt < CONNECT_ATTEMPTS => {
                debug!(attempt, error = %err, "relay not reachable yet");
                attempt += 1;
                sleep(CONNECT_DELAY).await;
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to connect to {}", path.display()));
            }
        }
    }
}

/// Runs one participant's session over `stream` until either side ends it.
///
/// Hands the line source back so the caller can keep reading input.
pub async fn run_session<L, D>(
    stream: UnixStream,
    session: Arc<Session>,
    lines: L,
    renderer: Arc<D>,
) -> Result<L>
where
    L: LineSource,
    D: Renderer,
{
    let (reader, writer) = stream.into_split();
    let inbound = tokio::spawn(run_inbound(
        Arc::clone(&session),
        reader,
        Arc::clone(&renderer),
    ));
    let outbound = tokio::spawn(run_outbound(Arc::clone(&session), lines, writer, renderer));

    session.shutdown().wait().await;

    inbound.await.context("network task failed")?;
    let (lines, outcome) = outbound.await.context("input task failed")?;
    outcome.map(|()| lines)
}

async fn run_outbound<L, W, D>(
    session: Arc<Session>,
    mut lines: L,
    mut writer: W,
    renderer: Arc<D>,
) -> (L, Result<()>)
where
    L: LineSource,
    W: AsyncWrite + Unpin,
    D: Renderer,
{
    let outcome = drive_outbound(&session, &mut lines, &mut writer, renderer.as_ref()).await;
    session.shutdown().trigger();
    (lines, outcome)
}

async fn drive_outbound<L, W, D>(
    session: &Session,
    lines: &mut L,
    writer: &mut W,
    renderer: &D,
) -> Result<()>
where
    L: LineSource,
    W: AsyncWrite + Unpin,
    D: Renderer,
{
    if !negotiate_nickname(session, lines, writer, renderer).await? {
        return Ok(());
    }

    redraw(session, renderer);
    chat_loop(session, lines, writer, renderer).await?;

    if let Err(err) = write_message(writer, &Frame::new(FrameKind::Quit)).await {
        debug!(error = %err, "could not announce departure");
    }
    Ok(())
}

/// Prompts for nicknames until the relay accepts one.
///
/// Returns `false` if input ran out or the session ended first.
async fn negotiate_nickname<L, W, D>(
    session: &Session,
    lines: &mut L,
    writer: &mut W,
    renderer: &D,
) -> Result<bool>
where
    L: LineSource,
    W: AsyncWrite + Unpin,
    D: Renderer,
{
    loop {
        session.set_phase(JoinPhase::Pending);

        let Some(line) = next_line(lines, NICK_PROMPT, session.shutdown()).await? else {
            return Ok(false);
        };
        let nickname = line.trim();
        if nickname.is_empty() {
            continue;
        }

        write_message(writer, &Frame::join(nickname))
            .await
            .context("failed to send join request")?;

        match session.wait_for_verdict().await {
            Some(JoinPhase::Joined) => return Ok(true),
            Some(_) => renderer.notice("nick taken! try again"),
            None => return Ok(false),
        }
    }
}

async fn chat_loop<L, W, D>(
    session: &Session,
    lines: &mut L,
    writer: &mut W,
    renderer: &D,
) -> Result<()>
where
    L: LineSource,
    W: AsyncWrite + Unpin,
    D: Renderer,
{
    loop {
        let prompt = session.lock().prompt();
        let Some(line) = next_line(lines, &prompt, session.shutdown()).await? else {
            return Ok(());
        };

        let outgoing = match OperatorCommand::parse(&line) {
            OperatorCommand::Quit => return Ok(()),
            OperatorCommand::Refresh => {
                redraw(session, renderer);
                None
            }
            OperatorCommand::ToggleSuppressed => {
                session.lock().toggle_suppressed();
                redraw(session, renderer);
                None
            }
            OperatorCommand::ClearHistory => {
                session.lock().clear_local();
                lines.clear_recall();
                redraw(session, renderer);
                Some(Frame::new(FrameKind::ClearHistory))
            }
            OperatorCommand::Redact => Some(Frame::new(FrameKind::Redact)),
            OperatorCommand::Mark => {
                let mut state = session.lock();
                state.insert_mark();
                renderer.refresh(&state);
                None
            }
            OperatorCommand::CycleUrgency => {
                let urgency = session.lock().cycle_urgency();
                renderer.notice(&format!("alerts: {}", urgency.label()));
                None
            }
            OperatorCommand::Help => {
                renderer.notice(HELP_TEXT);
                None
            }
            OperatorCommand::Chat(text) => {
                let mut state = session.lock();
                state.prepare_chat();
                renderer.refresh(&state);
                Some(Frame::chat(&text))
            }
        };

        if let Some(frame) = outgoing {
            if let Err(err) = write_message(writer, &frame).await {
                warn!(error = %err, kind = ?frame.kind, "failed to send frame to relay");
            }
        }
    }
}

async fn next_line<L: LineSource>(
    lines: &mut L,
    prompt: &str,
    shutdown: &Shutdown,
) -> Result<Option<String>> {
    select! {
        line = lines.next_line(prompt) => line.context("failed to read input"),
        _ = shutdown.wait() => Ok(None),
    }
}

fn redraw<D: Renderer>(session: &Session, renderer: &D) {
    let state = session.lock();
    renderer.reset();
    renderer.refresh(&state);
}

async fn run_inbound<R, D>(session: Arc<Session>, mut reader: R, renderer: Arc<D>)
where
    R: AsyncRead + Unpin,
    D: Renderer,
{
    let shutdown = session.shutdown().clone();
    loop {
        let received = select! {
            _ = shutdown.wait() => break,
            received = read_message(&mut reader) => received,
        };

        let frame = match received {
            Ok(frame) => frame,
            Err(err) if !err.is_transport() => {
                debug!(error = %err, "discarding malformed frame");
                continue;
            }
            Err(err) => {
                info!(error = %err, "relay connection closed");
                renderer.notice("*** relay closed the connection");
                break;
            }
        };

        if session.phase() != JoinPhase::Joined {
            match frame.kind {
                FrameKind::Join => session.complete_join(frame.author_id),
                FrameKind::JoinRejected => {
                    session.set_phase(JoinPhase::Rejected);
                    continue;
                }
                _ => continue,
            }
        }

        let alert = {
            let mut state = session.lock();
            let alert = state.apply_inbound(frame);
            renderer.refresh(&state);
            alert
        };
        if alert {
            renderer.alert();
        }
    }
    shutdown.trigger();
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::time::timeout;

    use super::*;
    use crate::config::SessionConfig;
    use crate::message::{FRAME_SIZE, WireError};
    use crate::render::PlainRenderer;

    struct Script {
        lines: VecDeque<&'static str>,
        recall_cleared: usize,
    }

    impl Script {
        fn new<const N: usize>(lines: [&'static str; N]) -> Self {
            Self {
                lines: VecDeque::from(lines),
                recall_cleared: 0,
            }
        }
    }

    impl LineSource for Script {
        async fn next_line(&mut self, _prompt: &str) -> io::Result<Option<String>> {
            Ok(self.lines.pop_front().map(str::to_string))
        }

        fn clear_recall(&mut self) {
            self.recall_cleared += 1;
        }
    }

    fn quiet_renderer() -> Arc<PlainRenderer<Vec<u8>>> {
        Arc::new(PlainRenderer::new(Vec::new()))
    }

    async fn recv(relay: &mut DuplexStream) -> Frame {
        timeout(Duration::from_secs(1), read_message(relay))
            .await
            .expect("frame in time")
            .expect("valid frame")
    }

    #[tokio::test]
    async fn inbound_ignores_traffic_until_joined() {
        let session = Arc::new(Session::new(&SessionConfig::default()));
        let (mut relay, client) = tokio::io::duplex(FRAME_SIZE * 4);
        let task = tokio::spawn(run_inbound(Arc::clone(&session), client, quiet_renderer()));

        write_message(&mut relay, &Frame::chat("too early")).await.expect("write");
        write_message(
            &mut relay,
            &Frame {
                author_id: 5,
                body: "me joined the chat!".into(),
                ..Frame::join("me")
            },
        )
        .await
        .expect("write");
        drop(relay);

        timeout(Duration::from_secs(1), task)
            .await
            .expect("task ends on hangup")
            .expect("task ok");

        assert_eq!(session.phase(), JoinPhase::Joined);
        assert!(session.shutdown().is_triggered());
        let state = session.lock();
        assert_eq!(state.own_id(), 5);
        let bodies: Vec<_> = state.history.iter().map(|e| e.frame.body.as_str()).collect();
        assert_eq!(bodies, ["me joined the chat!"]);
    }

    #[tokio::test]
    async fn inbound_stops_on_a_frame_cut_short() {
        let session = Arc::new(Session::new(&SessionConfig::default()));
        let (mut relay, client) = tokio::io::duplex(FRAME_SIZE * 4);
        let task = tokio::spawn(run_inbound(Arc::clone(&session), client, quiet_renderer()));

        write_message(
            &mut relay,
            &Frame {
                author_id: 5,
                body: "me joined the chat!".into(),
                ..Frame::join("me")
            },
        )
        .await
        .expect("write");
        write_message(
            &mut relay,
            &Frame {
                author_id: 2,
                nickname: "bob".into(),
                ..Frame::chat("hi")
            },
        )
        .await
        .expect("write");
        let cut = Frame {
            author_id: 2,
            nickname: "bob".into(),
            ..Frame::chat("never arrives")
        }
        .encode();
        relay.write_all(&cut[..1000]).await.expect("write prefix");
        drop(relay);

        timeout(Duration::from_secs(1), task)
            .await
            .expect("task ends on the short read")
            .expect("task ok");

        assert!(session.shutdown().is_triggered());
        let state = session.lock();
        let bodies: Vec<_> = state.history.iter().map(|e| e.frame.body.as_str()).collect();
        assert_eq!(bodies, ["me joined the chat!", "hi"]);
    }

    #[tokio::test]
    async fn clearing_history_also_clears_input_recall() {
        let session = Arc::new(Session::new(&SessionConfig::default()));
        let (mut relay, client) = tokio::io::duplex(FRAME_SIZE * 8);
        let task = tokio::spawn(run_outbound(
            Arc::clone(&session),
            Script::new(["me", "C", "q"]),
            client,
            quiet_renderer(),
        ));

        assert_eq!(recv(&mut relay).await.kind, FrameKind::Join);
        session.complete_join(1);
        assert_eq!(recv(&mut relay).await.kind, FrameKind::ClearHistory);
        assert_eq!(recv(&mut relay).await.kind, FrameKind::Quit);

        let (script, outcome) = task.await.expect("task");
        outcome.expect("outbound ok");
        assert_eq!(script.recall_cleared, 1);
    }

    #[tokio::test]
    async fn outbound_retries_after_rejection_then_quits() {
        let session = Arc::new(Session::new(&SessionConfig::default()));
        let (mut relay, client) = tokio::io::duplex(FRAME_SIZE * 8);
        let script = Script::new(["", "taken", "fresh", "hello", "q"]);
        let task = tokio::spawn(run_outbound(
            Arc::clone(&session),
            script,
            client,
            quiet_renderer(),
        ));

        let first = recv(&mut relay).await;
        assert_eq!((first.kind, first.nickname.as_str()), (FrameKind::Join, "taken"));
        session.set_phase(JoinPhase::Rejected);

        let second = recv(&mut relay).await;
        assert_eq!((second.kind, second.nickname.as_str()), (FrameKind::Join, "fresh"));
        session.complete_join(3);

        let chat = recv(&mut relay).await;
        assert_eq!((chat.kind, chat.body.as_str()), (FrameKind::Normal, "hello"));
        assert_eq!(recv(&mut relay).await.kind, FrameKind::Quit);

        let (_, outcome) = task.await.expect("task");
        outcome.expect("outbound ok");
        assert!(session.shutdown().is_triggered());
    }

    #[tokio::test]
    async fn exhausted_input_before_joining_sends_nothing() {
        let session = Arc::new(Session::new(&SessionConfig::default()));
        let (mut relay, client) = tokio::io::duplex(FRAME_SIZE * 2);
        let (_, outcome) = run_outbound(
            Arc::clone(&session),
            Script::new([]),
            client,
            quiet_renderer(),
        )
        .await;

        outcome.expect("outbound ok");
        assert!(session.shutdown().is_triggered());
        assert!(matches!(
            read_message(&mut relay).await,
            Err(WireError::ShortRead { got: 0 })
        ));
    }
}

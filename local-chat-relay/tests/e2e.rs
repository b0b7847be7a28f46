use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("local_chat_relay");
    let runtime = tempfile::tempdir()?;

    let (mut relay_child, mut relay_stdout) = spawn_relay(&binary, runtime.path()).await?;
    let key = read_session_key(&mut relay_stdout).await?;

    let mut alice = spawn_join(&binary, runtime.path(), &key, "alice").await?;
    let alice_joined = alice.read_entry("waiting for alice join").await?;
    assert_eq!(alice_joined, "alice joined the chat!");

    let mut bob = spawn_join(&binary, runtime.path(), &key, "bob").await?;
    let bob_joined = bob.read_entry("waiting for bob join").await?;
    assert_eq!(bob_joined, "bob joined the chat!");
    let alice_sees_bob = alice.read_entry("waiting for alice to see bob").await?;
    assert_eq!(alice_sees_bob, "bob joined the chat!");

    alice.send_line("Hello from Alice").await?;
    let alice_echo = alice.read_entry("waiting for alice echo").await?;
    assert_eq!(alice_echo, "alice: Hello from Alice");
    let bob_hears_alice = bob.read_entry("waiting for bob to hear alice").await?;
    assert_eq!(bob_hears_alice, "alice: Hello from Alice");

    bob.send_line("q").await?;
    let bob_leaves = alice.read_entry("waiting for alice to see bob leave").await?;
    assert_eq!(bob_leaves, "bob left the chat!");
    ensure_success(&mut bob.child, "bob").await?;

    alice.send_line("q").await?;
    ensure_success(&mut alice.child, "alice").await?;

    let _ = relay_child.kill().await;
    let _ = relay_child.wait().await;
    Ok(())
}

#[tokio::test]
async fn start_hosts_a_session_and_cleans_up() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("local_chat_relay");
    let runtime = tempfile::tempdir()?;

    let mut host = spawn_client(&binary, ["start"], runtime.path(), "host").await?;
    let key = read_session_key(&mut host.stdout).await?;
    let joined = host.read_entry("waiting for host join").await?;
    assert_eq!(joined, "host joined the chat!");

    assert_eq!(session_dirs(runtime.path())?, [format!("comms.{key}")]);

    host.send_line("q").await?;
    // The host may or may not see its own departure before the session ends.
    loop {
        let line = read_line_expect(&mut host.stdout, "waiting for relay banner").await?;
        if line == "relay is still running... [enter] to stop" {
            break;
        }
        assert!(line.ends_with("host left the chat!"), "unexpected line: {line}");
    }
    host.send_line("").await?;
    ensure_success(&mut host.child, "host").await?;

    assert!(session_dirs(runtime.path())?.is_empty());
    Ok(())
}

#[tokio::test]
async fn join_rejects_an_unknown_key() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("local_chat_relay");
    let runtime = tempfile::tempdir()?;

    let output = Command::new(&binary)
        .args(["join", "zzzzzz", "--plain", "--runtime-dir"])
        .arg(runtime.path())
        .stdin(Stdio::null())
        .output()
        .await?;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no session found"), "stderr: {stderr}");
    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Reads one history line and strips its timestamp.
    async fn read_entry(&mut self, description: &str) -> Result<String> {
        let line = read_line_expect(&mut self.stdout, description).await?;
        let (_, entry) = line
            .split_once(' ')
            .ok_or_else(|| anyhow!("{description}: no timestamp in '{line}'"))?;
        Ok(entry.to_string())
    }
}

async fn spawn_relay(binary: &Path, runtime: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("relay")
        .arg("--runtime-dir")
        .arg(runtime)
        .env("RUST_LOG_STYLE", "never")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn relay")?;
    let stdout = child
        .stdout
        .take()
        .context("relay stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_session_key(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let line = read_line_expect(reader, "waiting for session key").await?;
    let key = line
        .strip_prefix("session key: ")
        .ok_or_else(|| anyhow!("unexpected relay banner: {line}"))?;
    Ok(key.to_string())
}

async fn spawn_join(
    binary: &Path,
    runtime: &Path,
    key: &str,
    nickname: &str,
) -> Result<ClientProcess> {
    spawn_client(binary, ["join", key], runtime, nickname).await
}

async fn spawn_client<const N: usize>(
    binary: &Path,
    args: [&str; N],
    runtime: &Path,
    nickname: &str,
) -> Result<ClientProcess> {
    let mut cmd = Command::new(binary);
    cmd.args(args)
        .arg("--plain")
        .arg("--runtime-dir")
        .arg(runtime)
        .env("RUST_LOG", "warn")
        .env("RUST_LOG_STYLE", "never")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn client {nickname}"))?;

    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    let mut process = ClientProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    };
    process.send_line(nickname).await?;
    Ok(process)
}

fn session_dirs(runtime: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(runtime)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if name.starts_with("comms.") {
            names.push(name);
        }
    }
    Ok(names)
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = timeout(READ_TIMEOUT, child.wait())
        .await
        .with_context(|| format!("{name} did not exit"))?
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}

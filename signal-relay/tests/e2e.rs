use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_relay_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("signal_relay");

    let (mut server_child, mut server_stdout) = spawn_server(&binary).await?;
    let addr = read_server_addr(&mut server_stdout).await?;

    // Keep draining server logs so the pipe never fills.
    let server_log_task = tokio::spawn(async move {
        drain_stdout(server_stdout).await;
    });

    let mut alice = spawn_client(&binary, &addr).await?;
    let mut bob = spawn_client(&binary, &addr).await?;

    // Plain text lines go out as broadcasts; the sender gets no echo.
    alice
        .send_line("hello from alice")
        .await
        .context("alice send line")?;
    let heard = read_json_expect(&mut bob.stdout, "waiting for bob to hear alice").await?;
    assert_eq!(heard["event"], "broadcast");
    assert_eq!(heard["sender"], alice.identity.as_str());
    assert_eq!(heard["payload"], "hello from alice");

    // JSON lines are sent as typed, so directed signaling works from the terminal.
    bob.send_line(&format!(
        r#"{{"type":"offer","recipient":"{}","payload":{{"sdp":"v=0"}}}}"#,
        alice.identity
    ))
    .await
    .context("bob send offer")?;
    let offer = read_json_expect(&mut alice.stdout, "waiting for alice to get the offer").await?;
    assert_eq!(offer["event"], "offer");
    assert_eq!(offer["sender"], bob.identity.as_str());
    assert_eq!(offer["payload"]["sdp"], "v=0");

    alice.send_line("/quit").await.context("alice send quit")?;
    bob.send_line("/quit").await.context("bob send quit")?;
    ensure_success(&mut alice.child, "alice client").await?;
    ensure_success(&mut bob.child, "bob client").await?;

    // The server keeps running after clients leave; stop it manually.
    let _ = server_child.kill().await;
    let _ = server_child.wait().await;
    let _ = server_log_task.await;

    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    identity: String,
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
}

async fn spawn_server(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("--log-format")
        .arg("text")
        .arg("serve")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "info")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stdout = child
        .stdout
        .take()
        .context("server stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_server_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    loop {
        let line = read_line(reader)
            .await?
            .context("server did not emit listening address")?;
        let trimmed = line.trim();
        if !trimmed.contains("relay listening on") {
            continue;
        }
        let addr = trimmed
            .split_whitespace()
            .last()
            .context("unexpected server banner format")?;
        if !addr.contains(':') {
            return Err(anyhow!("server banner missing socket: {trimmed}"));
        }
        return Ok(addr.to_string());
    }
}

async fn spawn_client(binary: &Path, addr: &str) -> Result<ClientProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg("--url")
        .arg(format!("ws://{addr}/ws"))
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn client")?;

    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;
    let mut stdout = BufReader::new(stdout);

    let greeting = read_json_expect(&mut stdout, "waiting for greeting").await?;
    if greeting["event"] != "me" {
        return Err(anyhow!("expected greeting, got {greeting}"));
    }
    let identity = greeting["sender"]
        .as_str()
        .context("greeting without sender")?
        .to_string();

    Ok(ClientProcess {
        child,
        stdin,
        stdout,
        identity,
    })
}

async fn read_json_expect(reader: &mut BufReader<ChildStdout>, description: &str) -> Result<Value> {
    let line = read_line_expect(reader, description).await?;
    serde_json::from_str(&line).with_context(|| format!("{description}: not JSON: '{line}'"))
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
    let bytes_io = match timeout(READ_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    if bytes_io? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while let Ok(bytes) = reader.read_line(&mut buffer).await {
        if bytes == 0 {
            break;
        }
        buffer.clear();
    }
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

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::{
    io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::TcpStream,
    select,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{info, warn};

use crate::cli::ClientArgs;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn run(args: ClientArgs) -> Result<()> {
    let mut socket = establish_connection(&args).await?;

    let mut input = BufReader::new(tokio::io::stdin()).lines();

    run_client_loop(&mut socket, &mut input).await?;
    shutdown_connection(&mut socket).await;

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<Socket> {
    let (socket, _response) = connect_async(args.url.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", args.url))?;

    info!("connected to {}", args.url);
    Ok(socket)
}

async fn run_client_loop<R>(socket: &mut Socket, input: &mut Lines<R>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        select! {
            frame = socket.next() => {
                if !handle_server_frame(frame).await? {
                    break;
                }
            }
            // `next_line` keeps a partly typed line buffered when a frame wins the race.
            line = input.next_line() => {
                if !handle_stdin_input(line, socket).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_frame(
    frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
) -> Result<bool> {
    match frame {
        Some(Ok(Message::Text(text))) => {
            write_stdout(&text).await?;
            Ok(true)
        }
        Some(Ok(Message::Binary(data))) => {
            write_stdout(&String::from_utf8_lossy(&data)).await?;
            Ok(true)
        }
        Some(Ok(Message::Close(_))) | None => Ok(false),
        Some(Ok(_)) => Ok(true),
        Some(Err(err)) => Err(err).context("connection to relay failed"),
    }
}

async fn handle_stdin_input(line: io::Result<Option<String>>, socket: &mut Socket) -> Result<bool> {
    let Some(line) = line? else {
        return Ok(false);
    };

    let line = line.trim_end();
    if line.is_empty() {
        return Ok(true);
    }

    if line.eq_ignore_ascii_case("/quit") {
        return Ok(false);
    }

    socket
        .send(Message::Text(outgoing_frame(line)))
        .await
        .context("failed to send message")?;
    Ok(true)
}

/// JSON lines go out as typed; anything else is broadcast as a string payload.
fn outgoing_frame(line: &str) -> String {
    if line.starts_with('{') {
        line.to_string()
    } else {
        json!({ "type": "broadcast", "payload": line }).to_string()
    }
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(socket: &mut Socket) {
    if let Err(error) = socket.close(None).await {
        warn!(?error, "failed to close relay connection cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_become_broadcasts() {
        let frame: serde_json::Value =
            serde_json::from_str(&outgoing_frame("hello there")).expect("json");
        assert_eq!(frame, json!({ "type": "broadcast", "payload": "hello there" }));
        assert_eq!(
            outgoing_frame(r#"{"type":"me"}"#),
            r#"{"type":"me"}"#.to_string()
        );
    }

    #[tokio::test]
    async fn partial_input_survives_a_competing_frame() {
        let (mut typing, terminal) = tokio::io::duplex(64);
        let mut input = BufReader::new(terminal).lines();

        typing.write_all(b"hel").await.expect("write");
        // A frame arriving first cancels the pending read mid-line.
        select! {
            line = input.next_line() => panic!("line finished early: {line:?}"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
        }

        typing.write_all(b"lo\n").await.expect("write");
        let line = input.next_line().await.expect("read");
        assert_eq!(line.as_deref(), Some("hello"));
    }
}

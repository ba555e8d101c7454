//! One WebSocket connection: registration, read loop, writer loop, teardown.

use std::{sync::Arc, time::Duration};

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    select,
    task::JoinHandle,
    time::{MissedTickBehavior, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    connection::{ConnectionHandle, Outbox, SharedHandle, outbound_channel},
    identity::Identity,
    message::{CommandKind, Reply},
    relay::Relay,
};

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Drives one accepted WebSocket until either side goes away.
pub async fn run(socket: WebSocket, relay: Arc<Relay>, ping_interval: Duration) {
    let identity = Identity::generate();
    let (handle, outbox) = outbound_channel(relay.queue_capacity());
    let handle: SharedHandle = Arc::new(handle);
    // Queued before registration so it always precedes relayed traffic.
    greet(&relay, &identity, handle.as_ref());

    if let Err(err) = relay
        .hub()
        .register(identity.clone(), Arc::clone(&handle))
        .await
    {
        warn!(%identity, error = %err, "failed to register connection");
        return;
    }

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, outbox, ping_interval, identity.clone()));

    select! {
        _ = read_loop(stream, &relay, &identity) => {}
        _ = &mut writer => debug!(%identity, "writer finished before reader"),
    }

    teardown(&relay, &identity).await;
    if !writer.is_finished() {
        finish_writer(writer, &identity).await;
    }
}

fn greet(relay: &Relay, identity: &Identity, handle: &dyn ConnectionHandle) {
    let label = relay.dispatcher().vocabulary().label(CommandKind::Me);
    match Reply::new(label, identity.clone()).encode() {
        Ok(greeting) => {
            if let Err(err) = handle.enqueue(greeting) {
                debug!(%identity, error = %err, "failed to queue greeting");
            }
        }
        Err(err) => warn!(%identity, error = %err, "failed to encode greeting"),
    }
}

async fn read_loop(mut stream: SplitStream<WebSocket>, relay: &Relay, identity: &Identity) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => relay.dispatcher().handle(identity, text.as_bytes()).await,
            Ok(Message::Binary(data)) => relay.dispatcher().handle(identity, &data).await,
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(err) => {
                debug!(%identity, error = %err, "read failed");
                break;
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbox: Outbox,
    ping_interval: Duration,
    identity: Identity,
) {
    let mut ping = tokio::time::interval(ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ping.tick().await;

    loop {
        select! {
            next = outbox.recv() => {
                let Some(bytes) = next else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                if let Err(err) = sink.send(into_frame(bytes)).await {
                    debug!(%identity, error = %err, "write failed");
                    break;
                }
            }
            _ = ping.tick() => {
                if let Err(err) = sink.send(Message::Ping(Vec::new())).await {
                    debug!(%identity, error = %err, "ping failed");
                    break;
                }
            }
        }
    }
}

fn into_frame(bytes: Bytes) -> Message {
    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => Message::Text(text),
        Err(err) => Message::Binary(err.into_bytes()),
    }
}

async fn teardown(relay: &Relay, identity: &Identity) {
    match relay.disconnect(identity).await {
        Ok(true) => info!(%identity, "connection closed"),
        Ok(false) => debug!(%identity, "connection was already unregistered"),
        Err(err) => warn!(%identity, error = %err, "failed to unregister connection"),
    }
}

async fn finish_writer(mut writer: JoinHandle<()>, identity: &Identity) {
    // Unregistering closed the queue, so the writer drains and exits on its own
    // unless the peer stopped reading.
    match timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(%identity, error = %err, "writer task failed"),
        Err(_) => {
            debug!(%identity, "writer did not drain in time");
            writer.abort();
        }
    }
}

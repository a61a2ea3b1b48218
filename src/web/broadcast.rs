//! WebSocket broadcaster: streams the ring buffer tail to each client.
//!
//! Every client has its own task and its own cursor, starting at the write
//! position at connect time, so a new client only sees lines logged after it
//! joined. The task wakes on a poll tick to flush new bytes, on a heartbeat
//! tick to send a Ping, and on inbound frames. A client that sends nothing
//! (not even a Pong) for `read_timeout` is dropped, as is one whose socket
//! does not accept a frame within `write_timeout`.
use std::time::Duration;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{Sink, SinkExt, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::AppState;
use crate::ring::{RingReader, Slice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub poll_interval: Duration,
    pub ping_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            ping_interval: Duration::from_secs(54),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl StreamConfig {
    /// Set the heartbeat and idle timeout. The heartbeat is pulled down to
    /// nine tenths of the timeout if it would not fire before it.
    pub fn with_heartbeat(mut self, ping_interval: Duration, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout.max(Duration::from_millis(10));
        self.ping_interval = if ping_interval.is_zero() || ping_interval >= self.read_timeout {
            self.read_timeout * 9 / 10
        } else {
            ping_interval
        };
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("websocket read failed: {0}")]
    Read(axum::Error),
    #[error("websocket write failed: {0}")]
    Write(axum::Error),
    #[error("websocket write timed out")]
    WriteTimeout,
    #[error("no frame from client within {0:?}")]
    Idle(Duration),
}

/// A client's position in the log.
#[derive(Debug, Clone)]
pub struct Tail {
    reader: RingReader,
    cursor: u64,
}

impl Tail {
    /// Start at the current end of the log.
    pub fn new(reader: RingReader) -> Self {
        let (written, _) = reader.snapshot();
        Self {
            reader,
            cursor: written,
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Bytes logged since the cursor, or `None` if there are none.
    ///
    /// A client that fell out of the retention window resumes at the first
    /// whole line after the oldest retained byte, so it never receives a
    /// partial line or a split character.
    pub fn pending(&self) -> Option<Slice> {
        let mut slice = self.reader.read_from(self.cursor);
        if slice.start > self.cursor {
            let skip = slice
                .bytes
                .iter()
                .position(|&b| b == b'\n')
                .map_or(slice.bytes.len(), |newline| newline + 1);
            slice.bytes.drain(..skip);
            slice.start += skip as u64;
        }
        (!slice.is_empty()).then_some(slice)
    }

    /// Mark `slice` as delivered.
    pub fn advance(&mut self, slice: &Slice) {
        self.cursor = slice.end();
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        debug!("ws: client connected");
        match stream_log(socket, state.ring, state.stream).await {
            Ok(()) => debug!("ws: client closed"),
            Err(e) => info!(error = %e, "ws: client dropped"),
        }
    })
}

async fn send_frame<S>(tx: &mut S, frame: Message, limit: Duration) -> Result<(), StreamError>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match tokio::time::timeout(limit, tx.send(frame)).await {
        Ok(result) => result.map_err(StreamError::Write),
        Err(_) => Err(StreamError::WriteTimeout),
    }
}

async fn stream_log(
    socket: WebSocket,
    reader: RingReader,
    config: StreamConfig,
) -> Result<(), StreamError> {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut tail = Tail::new(reader);

    let mut poll = tokio::time::interval(config.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut heartbeat =
        tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = poll.tick() => {
                if let Some(slice) = tail.pending() {
                    let text = String::from_utf8_lossy(&slice.bytes).into_owned();
                    send_frame(&mut ws_tx, Message::Text(text.into()), config.write_timeout).await?;
                    tail.advance(&slice);
                }
            }
            _ = heartbeat.tick() => {
                send_frame(&mut ws_tx, Message::Ping(Bytes::new()), config.write_timeout).await?;
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(e)) => return Err(StreamError::Read(e)),
            },
            _ = tokio::time::sleep_until(last_seen + config.read_timeout) => {
                return Err(StreamError::Idle(config.read_timeout));
            }
        }
    }
}

//! Routes decoded messages from the read loop to their consumers.
use std::future::Future;
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, warn};

use crate::bot::Responder;
use crate::fics::message::{ChannelTell, Message};
use crate::ring::RingWriter;
use crate::store::Store;

/// Timestamp format of broadcast log lines.
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// Consumer of decoded messages. May return a command to send back to the
/// server.
pub trait MessageSink {
    fn dispatch(&mut self, message: Message) -> impl Future<Output = Option<String>> + Send;
}

/// Channel tells go to the store and the broadcast ring; private tells go
/// to the responder.
pub struct Dispatcher<St> {
    store: Arc<St>,
    ring: RingWriter,
    responder: Responder,
}

impl<St: Store> Dispatcher<St> {
    pub fn new(store: Arc<St>, ring: RingWriter, responder: Responder) -> Self {
        Self {
            store,
            ring,
            responder,
        }
    }

    async fn log(&mut self, tell: ChannelTell) {
        match self.store.put(&tell).await {
            Ok(id) => debug!(%id, channel = tell.channel, "sink: stored"),
            Err(e) => warn!(error = %e, tell = %tell, "sink: store put failed"),
        }
        let line = tell.log_line(Local::now().format(TIME_FORMAT));
        self.ring.write(line.as_bytes());
    }
}

impl<St: Store> MessageSink for Dispatcher<St> {
    async fn dispatch(&mut self, message: Message) -> Option<String> {
        match message {
            Message::ChannelTell(tell) => {
                self.log(tell).await;
                None
            }
            Message::PrivateTell(tell) => self.responder.respond(&tell, &*self.store).await,
        }
    }
}

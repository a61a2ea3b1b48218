//! Transport connection: a framed byte stream with read and write deadlines.
use std::time::Duration;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::codec::Framed;

use super::codec::{CodecError, PromptCodec};
use super::sanitize::sanitize;

/// Bound on a single outbound command.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(20);

/// Combined async read+write trait for the underlying stream.
///
/// `TcpStream` in production, `tokio::io::DuplexStream` in tests.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("timed out waiting for {0:?}")]
    ReadTimeout(Vec<String>),
    #[error("timed out sending command")]
    WriteTimeout,
    #[error("connection closed by remote")]
    Closed,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl ConnectionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ReadTimeout(_) | Self::WriteTimeout)
    }
}

/// A connection to the chess server.
pub struct Connection<S> {
    framed: Framed<S, PromptCodec>,
}

impl<S: Transport> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, PromptCodec::default()),
        }
    }

    /// Send one newline-terminated command.
    pub async fn send(&mut self, command: &str) -> Result<(), ConnectionError> {
        match tokio::time::timeout(WRITE_TIMEOUT, self.framed.send(command.to_owned())).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }

    /// Read until any of `delimiters` appears or `deadline` passes, and
    /// return the sanitized output.
    pub async fn read_until(
        &mut self,
        delimiters: &[&str],
        deadline: Instant,
    ) -> Result<Vec<u8>, ConnectionError> {
        let raw = self.read_raw_until(delimiters, deadline).await?;
        Ok(sanitize(&raw))
    }

    async fn read_raw_until(
        &mut self,
        delimiters: &[&str],
        deadline: Instant,
    ) -> Result<BytesMut, ConnectionError> {
        self.framed.codec_mut().set_delimiters(delimiters);
        match tokio::time::timeout_at(deadline, self.framed.next()).await {
            Ok(Some(frame)) => Ok(frame?),
            Ok(None) => Err(ConnectionError::Closed),
            Err(_) => Err(ConnectionError::ReadTimeout(
                delimiters.iter().map(|d| (*d).to_owned()).collect(),
            )),
        }
    }

    pub async fn send_and_read_until(
        &mut self,
        command: &str,
        delimiters: &[&str],
        deadline: Instant,
    ) -> Result<Vec<u8>, ConnectionError> {
        self.send(command).await?;
        self.read_until(delimiters, deadline).await
    }

    /// Flush and shut down the write side, then drop the stream.
    pub async fn shutdown(self) {
        let mut stream = self.framed.into_inner();
        let _ = tokio::time::timeout(WRITE_TIMEOUT, stream.shutdown()).await;
    }
}

//! Length-prefixed CBOR framing shared by all connections.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Largest frame either side accepts.
pub(crate) const MAX_FRAME_LENGTH: usize = 4 * 1024 * 1024;

pub(crate) type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

pub(crate) fn framed(stream: TcpStream) -> FramedStream {
    let codec = LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec();

    Framed::new(stream, codec)
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    let mut encoded = Vec::new();
    ciborium::ser::into_writer(value, &mut encoded)?;
    Ok(Bytes::from(encoded))
}

pub(crate) fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T> {
    Ok(ciborium::de::from_reader(frame)?)
}

pub(crate) async fn send<T: Serialize + Sync>(framed: &mut FramedStream, value: &T) -> Result<()> {
    framed
        .send(encode(value)?)
        .await
        .map_err(|e| Error::Io("failed to write frame", e))
}

/// Reads the next message, or `None` once the peer closed the connection.
pub(crate) async fn recv<T: DeserializeOwned>(framed: &mut FramedStream) -> Result<Option<T>> {
    match framed.next().await {
        None => Ok(None),
        Some(Ok(frame)) => decode(&frame).map(Some),
        Some(Err(e)) => Err(Error::Io("failed to read frame", e)),
    }
}

/// Marks a connection as unusable if a request/response exchange is dropped
/// before the response was read.
pub(crate) struct ExchangeGuard<'a> {
    armed: bool,
    broken: &'a CancellationToken,
}

impl<'a> ExchangeGuard<'a> {
    pub(crate) const fn new(broken: &'a CancellationToken) -> Self {
        Self {
            armed: true,
            broken,
        }
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.broken.cancel();
        }
    }
}

/// Whether `error` leaves the stream out of step with its responses.
pub(crate) const fn breaks_stream(error: &Error) -> bool {
    matches!(
        error,
        Error::Timeout(_) | Error::Io(..) | Error::Codec(_) | Error::ConnectionClosing
    )
}

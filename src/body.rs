//! Request and response bodies.
//!
//! A body is empty, a buffer already in memory, or a stream of chunks. Streams
//! are passed through untouched in both directions; nothing is buffered
//! unless a handler asks for it ([`Body::into_bytes`]).

use std::fmt;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;

use crate::error::BoxError;

/// A boxed stream of body chunks.
pub type BodyStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// The body type handed to hyper.
pub(crate) type HttpBody = UnsyncBoxBody<Bytes, BoxError>;

/// An HTTP message body.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Full(Bytes),
    Stream(BodyStream),
}

impl Body {
    /// Wraps any `Send` stream of chunks.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::Stream(stream.map_err(Into::into).boxed())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Full(bytes) => bytes.is_empty(),
            Self::Stream(_) => false,
        }
    }

    /// Byte length when known without reading the stream.
    pub fn len_hint(&self) -> Option<usize> {
        match self {
            Self::Empty => Some(0),
            Self::Full(bytes) => Some(bytes.len()),
            Self::Stream(_) => None,
        }
    }

    /// Collects the whole body into memory.
    pub async fn into_bytes(self) -> Result<Bytes, BoxError> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Full(bytes) => Ok(bytes),
            Self::Stream(stream) => {
                let buf = stream
                    .try_fold(BytesMut::new(), |mut buf, chunk| async move {
                        buf.extend_from_slice(&chunk);
                        Ok(buf)
                    })
                    .await?;
                Ok(buf.freeze())
            }
        }
    }

    /// Turns the body into a chunk stream, whatever its shape.
    pub fn into_stream(self) -> BodyStream {
        match self {
            Self::Empty => stream::empty().boxed(),
            Self::Full(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            Self::Stream(stream) => stream,
        }
    }

    pub(crate) fn into_http_body(self) -> HttpBody {
        match self {
            Self::Empty => Empty::<Bytes>::new()
                .map_err(|never| match never {})
                .boxed_unsync(),
            Self::Full(bytes) => Full::new(bytes)
                .map_err(|never| match never {})
                .boxed_unsync(),
            Self::Stream(stream) => StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync(),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Body::Empty"),
            Self::Full(bytes) => f.debug_tuple("Body::Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

/// Adapts an inbound hyper body without buffering it.
impl From<hyper::body::Incoming> for Body {
    fn from(incoming: hyper::body::Incoming) -> Self {
        Self::from_stream(incoming.into_data_stream())
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self { Self::Full(bytes) }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self { Self::Full(bytes.into()) }
}

impl From<String> for Body {
    fn from(text: String) -> Self { Self::Full(text.into()) }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self { Self::Full(Bytes::from_static(text.as_bytes())) }
}

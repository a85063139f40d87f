//! HTTP over the bridge.
//!
//! One request is one operation. [`HttpClient::request`] resolves as soon as
//! the status line and headers arrive; the body follows lazily through
//! [`Body`], so large responses are never buffered unless the caller asks.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use privbridge::session::{HttpClient, HttpRequest};
//! use privbridge::Connection;
//!
//! # async fn run() -> privbridge::error::Result<()> {
//! let client = HttpClient::new(Connection::connect_default().await?);
//!
//! // Buffered
//! let text = client.get("https://example.com").await?.text().await?;
//!
//! // Streaming
//! let response = client
//!     .request(HttpRequest::get("https://example.com/large").header("Accept", "*/*"))
//!     .await?;
//! let mut body = response.into_body();
//! while let Some(chunk) = body.next().await {
//!     println!("{} bytes", chunk?.len());
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{FusedStream, Stream, StreamExt};

use super::await_head;
use crate::connection::Connection;
use crate::error::{BridgeError, OperationError, Result};
use crate::operation::{new_origin, Event};
use crate::protocol::{Headers, Message, Payload};
use crate::stream::ReplyStream;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    /// Method name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            other => Err(format!("unsupported HTTP method: {}", other)),
        }
    }
}

/// An HTTP request to be performed by the privileged peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl HttpRequest {
    /// Create a request with no headers and an empty body.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Shorthand for a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    /// Shorthand for a POST request.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replace all headers.
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Build the wire message for this request under `origin`.
    pub fn into_message(self, origin: impl Into<String>) -> Message {
        Message::new(
            origin,
            Payload::HttpRequest {
                url: self.url,
                method: self.method.as_str().to_string(),
                headers: self.headers,
                body: self.body,
            },
        )
    }
}

/// HTTP client multiplexed over a bridge [`Connection`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    connection: Connection,
}

impl HttpClient {
    /// Create a client on top of `connection`.
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Perform a request and wait for the status line and headers.
    ///
    /// # Errors
    ///
    /// Returns the operation's terminal error if it fails before headers,
    /// e.g. `Peer` when the peer could not reach the host.
    pub async fn request(&self, request: HttpRequest) -> Result<Response> {
        let origin = new_origin();
        tracing::debug!(%origin, method = %request.method, url = %request.url, "http request");

        let mut replies = self.connection.open_stream(request.into_message(origin))?;
        let (status, headers) = await_head(&mut replies).await?;

        Ok(Response {
            status,
            headers,
            body: Body {
                replies,
                _connection: self.connection.clone(),
            },
        })
    }

    /// Perform a GET request.
    pub async fn get(&self, url: impl Into<String>) -> Result<Response> {
        self.request(HttpRequest::get(url)).await
    }

    /// Underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

/// Response head plus a lazily streamed body.
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: Headers,
    body: Body,
}

impl Response {
    /// Status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Look up a header by name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Take the body stream.
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Read the whole body.
    pub async fn bytes(self) -> Result<Bytes> {
        self.body.bytes().await
    }

    /// Read the whole body as text, replacing invalid UTF-8.
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Lazily produced response body.
///
/// Yields chunks in arrival order and ends when the response completes.
/// Dropping it early abandons the request. The body keeps the connection
/// open, so it can still be read after the client is gone.
#[derive(Debug)]
pub struct Body {
    replies: ReplyStream,
    _connection: Connection,
}

impl Body {
    /// Collect every remaining chunk.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for Body {
    type Item = std::result::Result<Bytes, BridgeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = match ready!(self.replies.poll_next_unpin(cx)) {
            Some(Ok(Event::Body(bytes))) => Ok(bytes),
            Some(Ok(other)) => {
                let violation = OperationError::ProtocolViolation(format!(
                    "unexpected {} in HTTP body",
                    other.name()
                ));
                Err(violation.into())
            }
            Some(Err(error)) => Err(error.into()),
            None => return Poll::Ready(None),
        };
        Poll::Ready(Some(item))
    }
}

impl FusedStream for Body {
    fn is_terminated(&self) -> bool {
        self.replies.is_terminated()
    }
}

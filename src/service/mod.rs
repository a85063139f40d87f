//! Service module - callback-shaped entry points for push consumers.
//!
//! Provides:
//! - [`BridgeService`] - requests and WebSockets identified by caller-visible ids
//! - [`HttpCallback`] / [`WebSocketCallback`] - what those consumers implement
//!
//! Sessions hand out streams; the service instead pushes every event into a
//! callback, which suits consumers that live behind another process boundary
//! and may vanish at any time.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use privbridge::operation::CallbackError;
//! use privbridge::protocol::Headers;
//! use privbridge::service::{BridgeService, HttpCallback};
//! use privbridge::session::HttpRequest;
//! use privbridge::Connection;
//!
//! struct Print;
//!
//! impl HttpCallback for Print {
//!     fn on_headers(&mut self, id: &str, status: u16, _: &Headers) -> Result<(), CallbackError> {
//!         println!("{id}: {status}");
//!         Ok(())
//!     }
//!     fn on_data(&mut self, _: &str, data: Bytes) -> Result<(), CallbackError> {
//!         println!("{} bytes", data.len());
//!         Ok(())
//!     }
//!     fn on_complete(&mut self, id: &str) -> Result<(), CallbackError> {
//!         println!("{id}: done");
//!         Ok(())
//!     }
//!     fn on_error(&mut self, id: &str, message: &str, code: i32) -> Result<(), CallbackError> {
//!         println!("{id}: {message} ({code})");
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> privbridge::error::Result<()> {
//! let service = BridgeService::new(Connection::connect_default().await?);
//! service.make_http_request("req-1", HttpRequest::get("https://example.com"), Print)?;
//! # Ok(())
//! # }
//! ```

mod callbacks;

pub use callbacks::{HttpCallback, WebSocketCallback, LOCAL_ERROR_CODE};

use bytes::Bytes;

use crate::connection::Connection;
use crate::error::{BridgeError, Result};
use crate::operation::{new_origin, CallbackError};
use crate::protocol::{Headers, Message, MessageKind, Payload};
use crate::session::HttpRequest;
use callbacks::{HttpAdapter, WebSocketAdapter};

/// Callback-driven front end over a [`Connection`].
#[derive(Debug, Clone)]
pub struct BridgeService {
    connection: Connection,
}

impl BridgeService {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// `Ok` while the connection is up.
    pub fn ping(&self) -> Result<()> {
        if self.connection.is_connected() {
            Ok(())
        } else {
            Err(BridgeError::NotConnected)
        }
    }

    /// Start an HTTP request whose progress is pushed into `callback`.
    ///
    /// When the connection is down the callback's `on_error` is told so
    /// before `NotConnected` is returned.
    pub fn make_http_request<C>(
        &self,
        id: impl Into<String>,
        request: HttpRequest,
        mut callback: C,
    ) -> Result<()>
    where
        C: HttpCallback,
    {
        let id = id.into();
        if let Err(e) = self.ping() {
            report_not_connected(&id, |message, code| callback.on_error(&id, message, code));
            return Err(e);
        }

        tracing::debug!(%id, method = %request.method, url = %request.url, "service http request");
        let message = request.into_message(id.clone());
        self.connection
            .start_operation(message, HttpAdapter::new(id, callback))?;
        Ok(())
    }

    /// Open a WebSocket whose lifecycle is pushed into `callback`.
    ///
    /// Returns the id used by [`send_websocket_message`](Self::send_websocket_message)
    /// and [`close_websocket`](Self::close_websocket).
    pub fn connect_websocket<C>(
        &self,
        url: impl Into<String>,
        headers: Headers,
        mut callback: C,
    ) -> Result<String>
    where
        C: WebSocketCallback,
    {
        let id = new_origin();
        if let Err(e) = self.ping() {
            report_not_connected(&id, |message, code| callback.on_error(&id, message, code));
            return Err(e);
        }

        let url = url.into();
        tracing::debug!(%id, %url, "service websocket open");
        let message = Message::new(id.clone(), Payload::WebSocketOpen { url, headers });
        self.connection.start_operation(
            message,
            WebSocketAdapter::new(id.clone(), callback),
        )?;
        Ok(id)
    }

    /// Send a frame on an open WebSocket.
    pub fn send_websocket_message(
        &self,
        id: &str,
        kind: MessageKind,
        data: impl Into<Bytes>,
    ) -> Result<()> {
        if !self.connection.registry().contains(id) {
            return Err(BridgeError::UnknownOperation(id.to_string()));
        }
        let data = data.into();
        self.connection
            .send(Message::new(id, Payload::WebSocketSend { kind, data }))
    }

    /// Close an open WebSocket and retire its id.
    pub fn close_websocket(&self, id: &str, code: u16, reason: impl Into<String>) -> Result<()> {
        if !self.connection.registry().contains(id) {
            return Err(BridgeError::UnknownOperation(id.to_string()));
        }
        let reason = reason.into();
        let result = self
            .connection
            .send(Message::new(id, Payload::WebSocketClose { code, reason }));
        self.connection.registry().complete(id);
        result
    }
}

fn report_not_connected<F>(id: &str, on_error: F)
where
    F: FnOnce(&str, i32) -> std::result::Result<(), CallbackError>,
{
    let message = BridgeError::NotConnected.to_string();
    if let Err(e) = on_error(&message, LOCAL_ERROR_CODE) {
        tracing::debug!(%id, error = %e, "not-connected report not delivered");
    }
}

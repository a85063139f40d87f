//! # privbridge
//!
//! Client side of a privileged bridge: a sandboxed process hands HTTP and
//! WebSocket work to a privileged peer over one local TCP connection.
//!
//! ## Architecture
//!
//! - **Wire**: `u32` little-endian length prefix + MessagePack [`Message`](protocol::Message)
//! - **Multiplexing**: every logical operation carries an origin id; one writer
//!   task drains an outbound FIFO, one reader task routes replies by origin
//! - **Consumers**: ordered [`ReplyStream`]s, typed sessions ([`HttpClient`],
//!   [`WebSocketClient`]) or push callbacks ([`BridgeService`])
//!
//! ## Example
//!
//! ```no_run
//! use privbridge::{Connection, HttpClient};
//!
//! #[tokio::main]
//! async fn main() -> privbridge::error::Result<()> {
//!     let connection = Connection::connect_default().await?;
//!     let client = HttpClient::new(connection.clone());
//!
//!     let response = client.get("https://example.com").await?;
//!     println!("{} {:?}", response.status(), response.header("content-type"));
//!     println!("{}", response.text().await?);
//!
//!     connection.disconnect();
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod operation;
pub mod protocol;
pub mod service;
pub mod session;
pub mod stream;
pub mod writer;

pub use config::{ConnectionConfig, DEFAULT_ADDRESS};
pub use connection::{Connection, ConnectionBuilder, ConnectionState};
pub use error::{BridgeError, OperationError};
pub use service::BridgeService;
pub use session::{HttpClient, WebSocketClient};
pub use stream::ReplyStream;

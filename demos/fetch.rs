//! Fetch - stream an HTTP response through the bridge.
//!
//! This example demonstrates:
//! - Connecting to the privileged peer
//! - Waiting for the response head, then streaming the body chunk by chunk
//!
//! ```sh
//! cargo run --example echo_peer &
//! RUST_LOG=privbridge=debug cargo run --example fetch -- https://example.com
//! ```

use futures::StreamExt;
use privbridge::session::HttpRequest;
use privbridge::{Connection, HttpClient, DEFAULT_ADDRESS};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| "https://example.com".to_string());
    let addr = args.next().unwrap_or_else(|| DEFAULT_ADDRESS.to_string());

    let connection = Connection::connect(addr.as_str()).await?;
    let client = HttpClient::new(connection.clone());

    let response = client
        .request(HttpRequest::get(url).header("Accept", "*/*"))
        .await?;
    println!("status: {}", response.status());
    for (name, value) in response.headers() {
        println!("{}: {}", name, value);
    }

    let mut body = response.into_body();
    let mut total = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        total += chunk.len();
        print!("{}", String::from_utf8_lossy(&chunk));
    }
    println!("\n({} bytes)", total);

    connection.disconnect();
    Ok(())
}

//! # Simulated Server Example
//!
//! Serves the job API with every job simulated, so clients can be exercised
//! without an nnU-Net install.
//!
//! ## Usage
//!
//! ```sh
//! cargo run --example simulated_server --features server
//! ```

use segflow::prelude::*;
use std::env;
use std::net::SocketAddr;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    // Never touches nnUNetv2_predict, see `SegflowServerConfig::executor` for the real tool.
    let config = SegflowServerConfig {
        simulate_all: true,
        ..Default::default()
    };

    let app = SegflowServer::new(config).build();

    let port = env::var("PORT").unwrap_or_else(|_| "8000".to_string());
    let addr = format!("0.0.0.0:{port}");
    println!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}

//! Upload API server demo
//!
//! Reads configuration from `.env` / the environment and serves the upload API until
//! Ctrl+C.
//!
//! After starting, you can:
//! - View Swagger UI at http://localhost:5000/api/docs
//! - Upload a feed via POST http://localhost:5000/upload
//!
//! ```bash
//! cargo run --example upload_server
//! ```

use feedmatch::{Config, Pipeline};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing (optional)
    // Uncomment if you add tracing-subscriber to your dependencies:
    // tracing_subscriber::fmt::init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let address = config.server.bind_address;

    let pipeline = Arc::new(Pipeline::new(config)?);
    let shutdown = CancellationToken::new();
    tokio::spawn(feedmatch::shutdown_on_signal(shutdown.clone()));

    println!("Starting feedmatch upload server");
    println!("Swagger UI: http://{address}/api/docs");
    println!();
    println!("Example command:");
    println!("  curl -F file=@feed.xml http://{address}/upload");
    println!();

    feedmatch::api::start_api_server(pipeline, shutdown).await?;
    Ok(())
}

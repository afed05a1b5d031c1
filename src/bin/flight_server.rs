//! Arrow Flight gRPC Server
//!
//! Runs the flight gateway over the no-op backend. Useful for wiring checks
//! and client development; real deployments embed the library with their own
//! `FlightBackend` / `WriteBackend`.
//!
//! # Usage
//!
//! ```bash
//! # Start on localhost:9090, handshake secret "foobar"
//! flight-server
//!
//! # Custom bind and secret
//! FLIGHT_HOST=0.0.0.0 FLIGHT_PORT=9191 FLIGHT_AUTH_TOKEN=s3cret flight-server
//!
//! # Verbose
//! RUST_LOG=flight_gateway=debug flight-server
//! ```

use tracing::info;
use tracing_subscriber::EnvFilter;

use flight_gateway::{serve, Handler, NoopBackend, ServerConfig, VERSION};

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env();
    let binding = format!("{}:{}", config.host, config.port);

    println!("╔═══════════════════════════════════════════════════════════════╗");
    println!("║         Flight Gateway v{:<38}║", VERSION);
    println!("╠═══════════════════════════════════════════════════════════════╣");
    println!("║  Protocol:    Arrow Flight (gRPC)                             ║");
    println!("║  Binding:     {:>45}  ║", binding);
    println!("║  Ticket TTL:  {:>44}s  ║", config.ticket_ttl.as_secs());
    println!("╠═══════════════════════════════════════════════════════════════╣");
    println!("║  Endpoints:                                                   ║");
    println!("║  • Handshake  → Session token                                 ║");
    println!("║  • GetInfo    → Schema + ticket                               ║");
    println!("║  • DoGet      → Stream table batches                          ║");
    println!("║  • DoPut      → Ingest batches                                ║");
    println!("║  • DoAction   → MigrateTable / DeleteRecord / DeleteStale     ║");
    println!("╚═══════════════════════════════════════════════════════════════╝");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutting down");
    };

    serve(config, Handler::new(NoopBackend, NoopBackend), shutdown).await?;

    Ok(())
}

//! Storage proxy: brokers vfolder operations between a cluster manager and
//! compute clients over pluggable backing filesystems.

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod path;
pub mod scandir;
pub mod stream;
pub mod token;
pub mod upload;
pub mod volume;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::http::Context;
use crate::volume::VolumeRouter;

/// Builds the router and both listeners, then serves until either plane's
/// listener errors. Startup failures (bad config, unbindable address) are
/// returned to the caller rather than panicking; the caller (the binary's
/// `main`) decides the process exit code.
pub async fn run(config: Config) -> std::io::Result<()> {
    let volumes = VolumeRouter::from_config(&config.volume)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let manager_addr = config.api.manager.service_addr.clone();
    let client_addr = config.api.client.service_addr.clone();
    let ctx = Arc::new(Context::new(&config, volumes));

    let manager_listener = TcpListener::bind(&manager_addr).await?;
    let client_listener = TcpListener::bind(&client_addr).await?;

    tracing::info!(addr = %manager_addr, "manager plane listening");
    tracing::info!(addr = %client_addr, "client plane listening");

    let manager_router = http::manager::router(ctx.clone());
    let client_router = http::client::router(ctx);

    let manager_server = axum::serve(manager_listener, manager_router);
    let client_server = axum::serve(client_listener, client_router);

    tokio::try_join!(
        async { manager_server.await },
        async { client_server.await },
    )?;
    Ok(())
}

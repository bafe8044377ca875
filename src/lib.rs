#![deny(clippy::all)]
#![forbid(unsafe_code)]

pub mod authentication;
pub mod cipher_stream;
pub mod config;
pub mod events;
pub mod mojang;
pub mod protocol;
pub mod proxy;
mod rate_limiter;
pub mod server;
pub mod session;

use crate::config::Config;
use crate::events::{EventBus, NoopEventBus};
use crate::mojang::{Api, Mojang};
use crate::proxy::Proxy;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Initializes the client-facing listener and everything a [`session::Session`] needs, then
/// serves connections until shutdown.
///
/// This binds the socket the client-facing state machine accepts connections on, builds the
/// process-wide [`Proxy`] façade (ban store, skin cache, session registry) and the collaborators
/// every session shares (the Mojang session-server client, the event bus), and hands all of it to
/// [`server::serve`].
///
/// # Errors
///
/// Will return an appropriate error if the socket cannot be bound to the supplied address.
pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(addr = %config.address, "binding socket address");
    let listener = TcpListener::bind(&config.address).await?;

    let config = Arc::new(config);
    let proxy = Arc::new(Proxy::new(config.clone()));
    let event_bus: Arc<dyn EventBus> = Arc::new(NoopEventBus);
    let mojang: Arc<dyn Mojang> = Arc::new(Api::default());

    server::serve(config, listener, proxy, event_bus, mojang).await?;

    info!("passage stopped successfully");
    Ok(())
}

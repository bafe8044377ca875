//! The listener loop: accepts client connections, applies the per-remote-address rate limiter,
//! and spawns one [`crate::session::handle`] task per accepted socket (§5's ingress reader is the
//! first of that session's four tasks; this loop is what spawns it).

use crate::config::Config;
use crate::events::EventBus;
use crate::mojang::Mojang;
use crate::proxy::Proxy;
use crate::rate_limiter::RateLimiter;
use crate::session;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, warn};

pub async fn serve(
    config: Arc<Config>,
    listener: TcpListener,
    proxy: Arc<Proxy>,
    event_bus: Arc<dyn EventBus>,
    mojang: Arc<dyn Mojang>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rate_limiter: RateLimiter<IpAddr> =
        RateLimiter::new(config.rate_limiter.window(), config.rate_limiter.burst);

    loop {
        let (stream, addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => return Ok(()),
        };

        if !rate_limiter.enqueue(&addr.ip()) {
            debug!(addr = %addr, "rate limited client");
            continue;
        }

        let config = config.clone();
        let proxy = proxy.clone();
        let event_bus = event_bus.clone();
        let mojang = mojang.clone();

        tokio::spawn(async move {
            if let Err(err) = session::handle(stream, addr, config, proxy, event_bus, mojang).await
            {
                warn!(cause = %err, addr = %addr, "failure communicating with a client");
            }
            debug!(addr = %addr, "closed connection with a client");
        });
    }
}

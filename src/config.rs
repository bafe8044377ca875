//! Runtime configuration (§6, §10.2): layered the way the proxy's own config has always been
//! built — compiled-in defaults, optionally overridden by a config file, optionally overridden
//! again by environment variables — using the `config` crate rather than hand-rolling precedence.

use crate::protocol::packet_ids::PROTOCOL_MAX;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Default bind address: all interfaces, the vanilla default port.
pub const DEFAULT_ADDRESS: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
    25565,
);

/// Rate-limiter settings: at most `burst` new connections per `window` per remote address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub window_secs: u64,
    pub burst: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            window_secs: 10,
            burst: 3,
        }
    }
}

impl RateLimiterConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// The local server this proxy hands freshly-authenticated clients off to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    pub address: SocketAddr,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 25566)),
        }
    }
}

/// Everything a [`crate::session::Session`] and the listener need to know, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// The address the client-facing listener binds to.
    pub address: SocketAddr,
    /// How long an accepted socket may sit in HANDSHAKE/STATUS/LOGIN before it is dropped.
    pub handshake_timeout_secs: u64,
    /// How long a PLAY/LOBBY session may go without an acknowledged keepalive (§4.4).
    pub keepalive_timeout_secs: u64,
    /// `Proxy.online-mode` — enables session-server authentication (§4.3).
    pub online_mode: bool,
    /// `Proxy.spigot-mode` — alters the upstream handshake host field (§4.6).
    pub spigot_mode: bool,
    /// The prefix a chat message must start with to be treated as a command (§4.5).
    pub command_prefix: String,
    /// Usernames never included in the STATUS `players.sample` (§6).
    pub hidden_ops: Vec<String>,
    /// Compression threshold applied to the client connection once login completes (§4.1).
    pub compression_threshold: i32,
    /// Highest protocol version this proxy declares support for (§4.2).
    pub protocol_max: i32,
    /// The locally-advertised server name shown in STATUS.
    pub version_name: String,
    /// The locally-advertised message of the day.
    pub motd: String,
    /// The locally-advertised player cap.
    pub max_players: i32,
    pub rate_limiter: RateLimiterConfig,
    pub upstream: UpstreamConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            handshake_timeout_secs: 30,
            keepalive_timeout_secs: 25,
            online_mode: true,
            spigot_mode: false,
            command_prefix: "/".to_string(),
            hidden_ops: Vec::new(),
            compression_threshold: 256,
            protocol_max: PROTOCOL_MAX,
            version_name: "Passage 1.9".to_string(),
            motd: "A Passage Server".to_string(),
            max_players: 20,
            rate_limiter: RateLimiterConfig::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

/// Errors reading or validating the layered configuration.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to read configuration: {0}")]
    Read(#[from] config::ConfigError),
}

impl Config {
    /// Loads defaults, then `config/default.{toml,yaml,json}` if present, then environment
    /// variables prefixed `PASSAGE_` with `_` as the level separator (e.g.
    /// `PASSAGE_RATE_LIMITER_BURST`).
    pub fn read() -> Result<Self, Error> {
        let defaults = Self::default();

        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&defaults)?)
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(
                config::Environment::with_prefix("PASSAGE")
                    .separator("_")
                    .try_parsing(true),
            );

        Ok(builder.build()?.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_the_config_crate() {
        let defaults = Config::default();
        let built = config::Config::try_from(&defaults)
            .unwrap()
            .try_deserialize::<Config>()
            .unwrap();
        assert_eq!(built, defaults);
    }

    #[test]
    fn rate_limiter_window_converts_seconds() {
        let config = RateLimiterConfig {
            window_secs: 5,
            burst: 1,
        };
        assert_eq!(config.window(), Duration::from_secs(5));
    }
}

//! Process-wide collaborators (§6): the active-session registry, the skin cache, the ban store
//! and the locally-advertised `JavaServer` identity, all gathered behind one façade that each
//! [`crate::session::Session`] holds a cloned `Arc` to.

use crate::config::Config;
use crate::mojang::ProfileProperty;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use uuid::Uuid;

/// What the registry remembers about one connected client, enough to resolve a SPECTATE target
/// without giving callers access to the full Session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub username: String,
    pub offline_uuid: Uuid,
    pub online_uuid: Option<Uuid>,
}

/// Tracks every session currently past LOGIN, keyed by whichever uuid identifies them on the
/// upstream server (the offline uuid, since that is what local servers see regardless of
/// online-mode).
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
}

impl SessionRegistry {
    pub async fn register(&self, handle: SessionHandle) {
        self.sessions
            .write()
            .await
            .insert(handle.offline_uuid, handle);
    }

    pub async fn unregister(&self, offline_uuid: &Uuid) {
        self.sessions.write().await.remove(offline_uuid);
    }

    /// Snapshots every currently registered session, for the STATUS player sample (§4.5).
    pub async fn list(&self) -> Vec<SessionHandle> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Resolves a client-claimed spectate target to the offline uuid the local server knows it
    /// by, per §4.5's SPECTATE rule.
    pub async fn resolve(&self, target: &Uuid) -> Option<Uuid> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .find(|handle| handle.offline_uuid == *target || handle.online_uuid == Some(*target))
            .map(|handle| handle.offline_uuid)
    }
}

/// Caches the `textures` profile property per online uuid, populated once Mojang authentication
/// succeeds (§4.3 step 5).
#[derive(Debug, Default)]
pub struct SkinCache {
    textures: RwLock<HashMap<Uuid, Vec<ProfileProperty>>>,
}

impl SkinCache {
    pub async fn store(&self, online_uuid: Uuid, properties: Vec<ProfileProperty>) {
        self.textures.write().await.insert(online_uuid, properties);
    }

    pub async fn get(&self, online_uuid: &Uuid) -> Option<Vec<ProfileProperty>> {
        self.textures.read().await.get(online_uuid).cloned()
    }
}

#[derive(Debug, Clone, Copy)]
struct BanEntry {
    expires_at: Option<SystemTime>,
}

impl BanEntry {
    fn is_active(&self) -> bool {
        match self.expires_at {
            Some(expiry) => SystemTime::now() < expiry,
            None => true,
        }
    }
}

/// IP and UUID ban lists with optional expiry, consulted once per LOGIN attempt (§4.5).
#[derive(Debug, Default)]
pub struct BanStore {
    ip_bans: RwLock<HashMap<IpAddr, BanEntry>>,
    uuid_bans: RwLock<HashMap<Uuid, BanEntry>>,
}

impl BanStore {
    pub async fn ban_ip(&self, ip: IpAddr, duration: Option<Duration>) {
        let expires_at = duration.map(|d| SystemTime::now() + d);
        self.ip_bans.write().await.insert(ip, BanEntry { expires_at });
    }

    pub async fn ban_uuid(&self, uuid: Uuid, duration: Option<Duration>) {
        let expires_at = duration.map(|d| SystemTime::now() + d);
        self.uuid_bans
            .write()
            .await
            .insert(uuid, BanEntry { expires_at });
    }

    pub async fn is_ip_banned(&self, ip: &IpAddr) -> bool {
        self.ip_bans
            .read()
            .await
            .get(ip)
            .is_some_and(BanEntry::is_active)
    }

    pub async fn is_uuid_banned(&self, uuid: &Uuid) -> bool {
        self.uuid_bans
            .read()
            .await
            .get(uuid)
            .is_some_and(BanEntry::is_active)
    }
}

/// The locally-advertised server identity shown to clients during STATUS and reported in the
/// upstream handshake's declared protocol (§6).
#[derive(Debug, Clone)]
pub struct JavaServer {
    pub protocol_version: i32,
    pub version_name: String,
    pub motd: String,
    pub max_players: i32,
    pub server_icon: Option<String>,
}

impl JavaServer {
    pub fn from_config(config: &Config) -> Self {
        Self {
            protocol_version: config.protocol_max,
            version_name: config.version_name.clone(),
            motd: config.motd.clone(),
            max_players: config.max_players,
            server_icon: None,
        }
    }
}

/// The process-wide façade handed to every [`crate::session::Session`]: ban lookups, skin cache,
/// the session registry and the locally-advertised server identity, plus the config every
/// component was built from.
#[derive(Debug)]
pub struct Proxy {
    pub config: Arc<Config>,
    pub sessions: SessionRegistry,
    pub skins: SkinCache,
    pub bans: BanStore,
    pub java_server: JavaServer,
}

impl Proxy {
    pub fn new(config: Arc<Config>) -> Self {
        let java_server = JavaServer::from_config(&config);
        Self {
            config,
            sessions: SessionRegistry::default(),
            skins: SkinCache::default(),
            bans: BanStore::default(),
            java_server,
        }
    }

    /// Usernames never included in the STATUS `players.sample` (§6).
    pub fn is_hidden_op(&self, username: &str) -> bool {
        self.config
            .hidden_ops
            .iter()
            .any(|hidden| hidden.eq_ignore_ascii_case(username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn session_registry_resolves_by_either_uuid() {
        let registry = SessionRegistry::default();
        let offline = Uuid::new_v4();
        let online = Uuid::new_v4();
        registry
            .register(SessionHandle {
                username: "Notch".to_string(),
                offline_uuid: offline,
                online_uuid: Some(online),
            })
            .await;

        assert_eq!(registry.resolve(&online).await, Some(offline));
        assert_eq!(registry.resolve(&offline).await, Some(offline));
    }

    #[tokio::test]
    async fn ban_store_expiry_lapses() {
        let bans = BanStore::default();
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        bans.ban_ip(ip, Some(Duration::from_secs(0))).await;
        // a zero-duration ban is already expired relative to `now`
        assert!(!bans.is_ip_banned(&ip).await);
    }

    #[tokio::test]
    async fn ban_store_permanent_ban_stays_active() {
        let bans = BanStore::default();
        let uuid = Uuid::new_v4();
        bans.ban_uuid(uuid, None).await;
        assert!(bans.is_uuid_banned(&uuid).await);
    }

    #[tokio::test]
    async fn hidden_ops_match_is_case_insensitive() {
        let mut config = Config::default();
        config.hidden_ops.push("Admin".to_string());
        let proxy = Proxy::new(Arc::new(config));
        assert!(proxy.is_hidden_op("admin"));
        assert!(!proxy.is_hidden_op("Notch"));
    }
}

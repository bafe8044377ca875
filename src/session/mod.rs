//! Session state (C4) and the top-level driver that takes one accepted TCP connection through
//! HANDSHAKE, STATUS or LOGIN and, on a successful login, into the four-task PLAY/LOBBY
//! concurrency model described in §5.

pub mod egress;
pub mod keepalive;
pub mod login;
pub mod play;
pub mod transfer;

use crate::authentication::{self, Aes128Cfb8Dec, Aes128Cfb8Enc, VerifyToken};
use crate::cipher_stream::CipherStream;
use crate::events::EventBus;
use crate::mojang::{Mojang, ProfileProperty};
use crate::protocol::packets::play::ClientSettings;
use crate::protocol::packets::Handshake;
use crate::protocol::{self, Position};
use crate::proxy::Proxy;
use egress::EgressMsg;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

/// Errors that can end a session. Every variant maps to one of the kinds documented in §7; the
/// ingress loop is the only place that decides, from one of these, whether to abort or continue.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] protocol::Error),
    #[error(transparent)]
    Crypto(#[from] authentication::Error),
    #[error(transparent)]
    Mojang(#[from] crate::mojang::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("client disconnected")]
    Eof,
    #[error("verify tokens are not the same")]
    VerifyTokenMismatch,
    #[error("client's username did not match Mojang's record")]
    UsernameMismatch,
    #[error("login denied by a plugin")]
    PluginDenied,
    #[error("client is banned")]
    Banned,
    #[error("client closed due to lack of keepalive response")]
    KeepaliveTimeout,
    #[error("unexpected packet id {0:#04x} in state {1}")]
    UnexpectedPacket(i32, &'static str),
}

pub type ClientReader = CipherStream<OwnedReadHalf, Aes128Cfb8Enc, Aes128Cfb8Dec>;
pub type ClientWriter = CipherStream<OwnedWriteHalf, Aes128Cfb8Enc, Aes128Cfb8Dec>;

/// `state` from §3, plus the `LOBBY` detour used for hub-to-local handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Handshake,
    Status,
    Login,
    Play,
    Lobby,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Handshake => "handshake",
            State::Status => "status",
            State::Login => "login",
            State::Play => "play",
            State::Lobby => "lobby",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub username: String,
    pub online_uuid: Option<Uuid>,
    pub offline_uuid: Uuid,
    pub skin_properties: Vec<ProfileProperty>,
}

#[derive(Debug, Default)]
pub struct Crypto {
    pub verify_token: VerifyToken,
    pub server_id: String,
    pub shared_secret: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct Address {
    pub remote_ip: IpAddr,
    pub remote_port: u16,
    pub advertised_host: String,
    pub advertised_port: u16,
}

/// `game` from §3: gamemode, position, look and the bits needed to interpret PLAYER_DIGGING and
/// PLAYER_BLOCK_PLACEMENT.
#[derive(Debug, Clone, Default)]
pub struct GameState {
    pub gamemode: i32,
    pub dimension: i32,
    pub position: (f64, f64, f64),
    pub head: (f32, f32),
    pub held_slot: i16,
    pub last_place_coords: Option<Position>,
}

/// Inventory slots live in `[0, 46)` regardless of protocol version (§3); older clients simply
/// never address the 46th slot.
pub const INVENTORY_SIZE: usize = 46;

/// The subset of Session state genuinely touched by more than one task: the keepalive ticker
/// writes `last_sent`/`outstanding_id` and reads `state`/`is_local`; the ingress reader writes
/// `state`/`is_local` and reads/clears `outstanding_id` on a matching reply. Mutation is
/// serialised through one mutex per §5 rather than an actor, since both writers touch disjoint
/// sub-fields and contention is a single per-second tick.
#[derive(Debug)]
pub struct Shared {
    pub state: State,
    pub is_local: bool,
    pub keepalive_outstanding_id: Option<i64>,
    pub keepalive_last_sent: Instant,
    pub keepalive_last_response: Instant,
    pub abort: bool,
}

impl Shared {
    fn new(now: Instant) -> Self {
        Self {
            state: State::Handshake,
            is_local: true,
            keepalive_outstanding_id: None,
            keepalive_last_sent: now,
            keepalive_last_response: now,
            abort: false,
        }
    }
}

/// A per-session handle to the shared fields plus the cooperative shutdown signal every task
/// observes at its next suspension point (§5).
#[derive(Clone)]
pub struct SharedHandle {
    pub inner: Arc<Mutex<Shared>>,
    pub shutdown: Arc<Notify>,
}

impl SharedHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Shared::new(Instant::now()))),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub async fn set_state(&self, state: State) {
        self.inner.lock().await.state = state;
    }

    pub async fn abort(&self) {
        self.inner.lock().await.abort = true;
        self.shutdown.notify_waiters();
    }

    pub async fn is_aborted(&self) -> bool {
        self.inner.lock().await.abort
    }
}

/// The per-client session record (C4). Fields only ever touched by the ingress task live here
/// directly; fields shared with the keepalive ticker live behind [`SharedHandle`].
pub struct Session {
    pub config: Arc<crate::config::Config>,
    pub proxy: Arc<Proxy>,
    pub event_bus: Arc<dyn EventBus>,
    pub mojang: Arc<dyn Mojang>,

    pub shared: SharedHandle,
    pub egress: mpsc::UnboundedSender<EgressMsg>,

    pub protocol_client: i32,
    pub identity: Identity,
    pub crypto: Crypto,
    pub address: Address,
    pub game: GameState,
    pub inventory: Vec<Option<crate::protocol::packets::Slot>>,
    pub cursor_item: Option<crate::protocol::packets::Slot>,
    pub client_settings: Option<ClientSettings>,
    pub settings_forwarded: bool,
    pub compression_enabled: bool,

    pub upstream: Option<transfer::UpstreamHandle>,
}

impl Session {
    fn new(
        config: Arc<crate::config::Config>,
        proxy: Arc<Proxy>,
        event_bus: Arc<dyn EventBus>,
        mojang: Arc<dyn Mojang>,
        egress: mpsc::UnboundedSender<EgressMsg>,
        shared: SharedHandle,
        remote: SocketAddr,
    ) -> Self {
        Self {
            config,
            proxy,
            event_bus,
            mojang,
            shared,
            egress,
            protocol_client: 0,
            identity: Identity::default(),
            crypto: Crypto::default(),
            address: Address {
                remote_ip: remote.ip(),
                remote_port: remote.port(),
                advertised_host: String::new(),
                advertised_port: 0,
            },
            game: GameState::default(),
            inventory: vec![None; INVENTORY_SIZE],
            cursor_item: None,
            client_settings: None,
            settings_forwarded: true,
            compression_enabled: false,
            upstream: None,
        }
    }

    /// Sends one client-bound frame through the egress pump (§4.1, §5).
    pub fn send(&self, packet_id: i32, body: Vec<u8>) {
        let _ = self.egress.send(EgressMsg::Frame { id: packet_id, body });
    }

    /// Emits the single user-visible failure surface (§7): a DISCONNECT in PLAY/LOBBY, or a
    /// legacy 0x00 JSON otherwise, then asks the egress pump to drain and close.
    pub async fn disconnect(&self, reason: &str) {
        let payload = crate::events::Player::chat_payload(reason);
        let reason_json = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());

        let state = self.shared.inner.lock().await.state;
        let mut body = Vec::new();
        let packet_id = match state {
            State::Play | State::Lobby => {
                let disconnect = crate::protocol::packets::play::Disconnect { reason_json };
                let _ = disconnect.encode(&mut body).await;
                crate::protocol::packet_ids::play_packet_id(
                    crate::protocol::packet_ids::PlayPacket::Disconnect,
                    self.protocol_client,
                    crate::protocol::packet_ids::Direction::ClientBound,
                )
                .unwrap_or(0x00)
            }
            _ => {
                let disconnect = crate::protocol::packets::login::Disconnect { reason_json };
                let _ = disconnect.encode(&mut body).await;
                0x00
            }
        };

        self.send(packet_id, body);
        let _ = self.egress.send(EgressMsg::Shutdown);
        self.shared.abort().await;
    }
}

/// Top-level entry point: takes one accepted TCP connection through its entire lifecycle.
/// Spawned once per connection by the listener in [`crate::server`].
pub async fn handle(
    stream: TcpStream,
    remote: SocketAddr,
    config: Arc<crate::config::Config>,
    proxy: Arc<Proxy>,
    event_bus: Arc<dyn EventBus>,
    mojang: Arc<dyn Mojang>,
) -> Result<(), Error> {
    stream.set_nodelay(true).ok();
    let (read_half, write_half) = stream.into_split();

    let mut reader: ClientReader = CipherStream::new(read_half, None, None);
    let writer: ClientWriter = CipherStream::new(write_half, None, None);

    let (egress_tx, egress_rx) = mpsc::unbounded_channel();
    tokio::spawn(egress::run(writer, egress_rx));

    let shared = SharedHandle::new();
    let mut session = Session::new(
        config.clone(),
        proxy.clone(),
        event_bus,
        mojang,
        egress_tx,
        shared,
        remote,
    );

    loop {
        let (packet_id, mut body) =
            match protocol::read_frame(&mut reader, session.compression_enabled).await {
                Ok(frame) => frame,
                Err(protocol::Error::Io(_)) | Err(protocol::Error::Eof) => return Ok(()),
                Err(e) => return Err(e.into()),
            };

        if packet_id != 0x00 {
            return Err(Error::UnexpectedPacket(packet_id, "handshake"));
        }

        let handshake = Handshake::decode(&mut body).await?;
        session.protocol_client = handshake.protocol_version;
        session.address.advertised_host = handshake.server_address;
        session.address.advertised_port = handshake.server_port;

        match handshake.next_state {
            1 => {
                session.shared.set_state(State::Status).await;
                run_status(&mut reader, &mut session).await?;
                session.shared.set_state(State::Handshake).await;
            }
            2 => {
                session.shared.set_state(State::Login).await;
                match login::run(&mut reader, &mut session).await {
                    Ok(()) => {
                        play::drive(reader, session).await?;
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
            other => return Err(Error::UnexpectedPacket(other, "handshake")),
        }
    }
}

async fn run_status(reader: &mut ClientReader, session: &mut Session) -> Result<(), Error> {
    use crate::protocol::packets::status::{
        StatusPlayerSample, StatusPlayers, StatusResponse, StatusVersion,
    };
    use crate::protocol::AsyncWriteExtMc;

    loop {
        let (packet_id, mut body) =
            protocol::read_frame(reader, session.compression_enabled).await?;

        match packet_id {
            0x00 => {
                let sample: Vec<StatusPlayerSample> = session
                    .proxy
                    .sessions
                    .list()
                    .await
                    .into_iter()
                    .filter(|handle| !session.proxy.is_hidden_op(&handle.username))
                    .take(5)
                    .map(|handle| StatusPlayerSample {
                        name: handle.username,
                        id: handle.offline_uuid.as_hyphenated().to_string(),
                    })
                    .collect();
                let online = session.proxy.sessions.list().await.len() as i32;

                let response = StatusResponse {
                    version: StatusVersion {
                        name: session.proxy.java_server.version_name.clone(),
                        protocol: session.proxy.java_server.protocol_version,
                    },
                    players: StatusPlayers {
                        max: session.proxy.java_server.max_players,
                        online,
                        sample,
                    },
                    description: serde_json::json!({ "text": session.proxy.java_server.motd }),
                    favicon: session.proxy.java_server.server_icon.clone(),
                };

                let mut out = Vec::new();
                out.write_json(&response).await?;
                session.send(0x00, out);
            }
            0x01 => {
                let payload = body.drain(..8.min(body.len())).collect::<Vec<_>>();
                let mut out = Vec::new();
                out.extend_from_slice(&payload);
                session.send(0x01, out);
                return Ok(());
            }
            other => return Err(Error::UnexpectedPacket(other, "status")),
        }
    }
}

/// §4.6's spigot-mode hostname, embedding the client's ip and offline uuid for the backend to
/// read back out of the handshake it otherwise ignores.
pub fn spigot_host(client_ip: IpAddr, offline_uuid: Uuid) -> String {
    format!(
        "localhost\u{0}{}\u{0}{}",
        client_ip,
        offline_uuid.simple()
    )
}


//! Transfer controller (C9): opens a new upstream, replays the login handshake against it, and
//! either installs it as the session's first upstream or hot-swaps it in for the current one
//! without disconnecting the client (§4.6).

use super::egress::EgressMsg;
use super::{Error, Session, State};
use crate::protocol::packets::Handshake;
use crate::protocol::{AsyncWriteExtMc, packet_ids};
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tracing::debug;

/// One client-bound frame read off the upstream socket, forwarded verbatim to the client's
/// egress pump. The sibling `ServerConnection` this spec references would interpret these
/// itself; this proxy only needs the plumbing to get the bytes across (§1's collaborator note).
pub enum UpstreamMsg {
    Frame { id: i32, body: Vec<u8> },
}

/// An owning handle to the current upstream connection: the write half used to forward
/// server-bound frames, plus the join handle of the task pumping the read half into the egress
/// channel. Dropping it (or calling [`UpstreamHandle::close`]) tears the upstream socket down
/// without touching the client connection (§4.6 mode (ii)/(iii) step 2).
pub struct UpstreamHandle {
    write_half: OwnedWriteHalf,
    pump: tokio::task::JoinHandle<()>,
    pub compression_enabled: bool,
}

impl UpstreamHandle {
    pub async fn send_frame(&mut self, packet_id: i32, body: &[u8]) -> Result<(), Error> {
        crate::protocol::write_frame(
            &mut self.write_half,
            packet_id,
            body,
            self.compression_enabled.then_some(256),
        )
        .await
        .map_err(Error::Protocol)
    }

    pub async fn close(self) {
        self.pump.abort();
        let mut write_half = self.write_half;
        let _ = write_half.shutdown().await;
    }
}

/// Pumps client-bound frames from `upstream` straight into the session's egress channel (§5's
/// "upstream handler" task), until the socket closes or the session aborts.
async fn pump_upstream(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    egress: mpsc::UnboundedSender<EgressMsg>,
    shutdown: std::sync::Arc<tokio::sync::Notify>,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => return,
            frame = crate::protocol::read_frame(&mut read_half, false) => {
                match frame {
                    Ok((id, body)) => {
                        if egress.send(EgressMsg::Frame { id, body }).is_err() {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            }
        }
    }
}

/// Sends the server-bound handshake (`0x00`) and `LoginStart` every successful connect replays
/// against the fresh upstream (§4.6).
async fn send_login_handshake(
    stream: &mut TcpStream,
    session: &Session,
    host: &str,
    port: u16,
) -> Result<(), Error> {
    let handshake = Handshake {
        protocol_version: session.protocol_client,
        server_address: host.to_string(),
        server_port: port,
        next_state: 2,
    };
    let mut body = Vec::new();
    handshake.encode(&mut body).await.map_err(Error::Protocol)?;
    crate::protocol::write_frame(stream, 0x00, &body, None)
        .await
        .map_err(Error::Protocol)?;

    let mut body = Vec::new();
    body.write_string(&session.identity.username)
        .await
        .map_err(Error::Protocol)?;
    crate::protocol::write_frame(stream, 0x00, &body, None)
        .await
        .map_err(Error::Protocol)?;

    Ok(())
}

/// Computes the upstream handshake's host field: `"localhost"` unless spigot-mode is enabled, in
/// which case it is the `"localhost\0<ip>\0<uuid>"` triple the backend's Spigot plugin parses
/// back out (§4.6).
fn upstream_host(session: &Session) -> String {
    if session.config.spigot_mode {
        super::spigot_host(session.address.remote_ip, session.identity.offline_uuid)
    } else {
        "localhost".to_string()
    }
}

/// Dials `address`, completes the upstream login handshake, and spawns its read-pump task.
async fn dial(address: SocketAddr, session: &Session, host: &str) -> Result<UpstreamHandle, Error> {
    let mut stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true).ok();

    send_login_handshake(&mut stream, session, host, address.port()).await?;

    let (read_half, write_half) = stream.into_split();
    let pump = tokio::spawn(pump_upstream(
        read_half,
        session.egress.clone(),
        session.shared.shutdown.clone(),
    ));

    Ok(UpstreamHandle {
        write_half,
        pump,
        compression_enabled: false,
    })
}

/// Implements all three modes of §4.6's `connect_to_server`: first connect, reconnect to the
/// same local server, and hot-swap to a different upstream while the client stays attached.
///
/// `is_local` records, on success, whether `address` is this proxy's co-located server or a
/// remote hub — it becomes the session's `is_local` flag (§3), gating the keepalive ticker and
/// the CHAT_MESSAGE "/hub"/"/lobby" rule (§4.5). This proxy's own config only ever names one
/// local upstream (no target-selector collaborator is in scope, §1); callers that only ever pass
/// that address always pass `true`. The parameter exists so a remote hot-swap (mode iii to a
/// server that isn't the local one) is representable at all, even though nothing in this crate
/// currently dials one.
pub async fn connect_to_server(
    session: &mut Session,
    address: SocketAddr,
    is_local: bool,
) -> Result<(), Error> {
    let host = upstream_host(session);

    match dial(address, session, &host).await {
        Ok(handle) => {
            if let Some(old) = session.upstream.take() {
                old.close().await;
            }
            session.upstream = Some(handle);
            session.shared.inner.lock().await.is_local = is_local;
            Ok(())
        }
        Err(err) => {
            debug!(cause = %err, addr = %address, "could not connect to upstream server");

            let message = "Could not connect to that server!";
            let payload = serde_json::json!({ "text": message, "color": "red", "bold": true });
            let reason_json = serde_json::to_string(&payload).unwrap_or_default();
            let state = session.shared.inner.lock().await.state;
            if state == State::Play {
                // A chat message, not a DISCONNECT: §4.6 mode (iii) preserves the client
                // session across a failed hot-swap, it only notifies the player.
                let chat = crate::protocol::packets::play::ClientChatMessage { json: reason_json };
                let mut body = Vec::new();
                chat.encode(&mut body, session.protocol_client)
                    .await
                    .map_err(Error::Protocol)?;
                let packet_id = packet_ids::play_packet_id(
                    packet_ids::PlayPacket::ChatMessage,
                    session.protocol_client,
                    packet_ids::Direction::ClientBound,
                )
                .unwrap_or(0x02);
                session.send(packet_id, body);
            } else {
                let disconnect = crate::protocol::packets::login::Disconnect { reason_json };
                let mut body = Vec::new();
                disconnect.encode(&mut body).await.map_err(Error::Protocol)?;
                session.send(0x00, body);
            }

            session.address.advertised_host.clear();
            session.address.advertised_port = 0;
            Ok(())
        }
    }
}

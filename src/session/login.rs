//! LOGIN state handling (part of C5): username capture, then either the offline shortcut
//! straight to `LoginSuccess`, or the full online-mode path — encryption handshake and
//! session-server authentication (C3), ban checks, the `player.preLogin` hook and compression
//! negotiation — before `LoginSuccess` (§4.3, §4.5).

use super::egress::EgressMsg;
use super::{ClientReader, Crypto, Error, Session};
use crate::authentication::{self, ENCODED_PUB, KEY_PAIR};
use crate::events::Player;
use crate::mojang;
use crate::protocol::packets::login::{
    Disconnect, EncryptionRequest, EncryptionResponse, LoginStart, LoginSuccess, SetCompression,
};
use crate::protocol::{self, packet_ids, AsyncWriteExtMc};
use serde_json::Map;
use tracing::{debug, warn};
use uuid::Uuid;

/// Sends the single user-visible LOGIN-phase failure surface (a legacy `0x00` JSON) and returns
/// the error that should unwind the ingress loop.
async fn fail(session: &Session, reason: &str, err: Error) -> Error {
    session.disconnect(reason).await;
    err
}

/// Drives one connection through LOGIN: `LoginStart`, then either the offline shortcut or the
/// full online-mode path. §4.3: offline mode "moves directly from LOGIN/0x00 to a synthesised
/// LoginSuccess... and the upstream handshake is initiated", bypassing bans, `preLogin` and
/// compression entirely, exactly as the original's `pkid==0x00` handler does for the
/// non-online-mode branch — those three steps only ever ran inside its online-mode-only
/// `pkid==0x01` (EncryptionResponse) handler. Returns once the client has been told it is logged
/// in; [`super::play::drive`] takes it from there.
pub async fn run(reader: &mut ClientReader, session: &mut Session) -> Result<(), Error> {
    let (packet_id, mut body) =
        protocol::read_frame(reader, session.compression_enabled).await?;
    if packet_id != 0x00 {
        return Err(Error::UnexpectedPacket(packet_id, "login"));
    }

    let login_start = LoginStart::decode(&mut body).await?;
    session.identity.username = login_start.name.clone();
    session.identity.offline_uuid = authentication::offline_uuid(&login_start.name);

    if session.config.online_mode {
        authenticate_online(reader, session).await?;

        let remote_ip = session.address.remote_ip;
        if session.proxy.bans.is_ip_banned(&remote_ip).await {
            return Err(fail(session, "You are banned from this server.", Error::Banned).await);
        }

        let check_uuid = session
            .identity
            .online_uuid
            .unwrap_or(session.identity.offline_uuid);
        if session.proxy.bans.is_uuid_banned(&check_uuid).await {
            return Err(fail(session, "You are banned from this server.", Error::Banned).await);
        }

        let player = Player::new(session.identity.username.clone(), check_uuid, 0);
        let outcome = session
            .event_bus
            .fire("player.preLogin", &player, Map::new())
            .await;
        if outcome.is_denied() {
            return Err(fail(
                session,
                "Login denied by a Plugin.",
                Error::PluginDenied,
            )
            .await);
        }

        if session.protocol_client > protocol::COMPRESSION_MIN_PROTOCOL {
            let mut body = Vec::new();
            SetCompression {
                threshold: protocol::COMPRESSION_THRESHOLD,
            }
            .encode(&mut body)
            .await?;
            session.send(0x03, body);
            let _ = session
                .egress
                .send(EgressMsg::SetCompression(Some(protocol::COMPRESSION_THRESHOLD)));
            session.compression_enabled = true;
        }
    }

    let login_uuid = session
        .identity
        .online_uuid
        .unwrap_or(session.identity.offline_uuid);
    let mut body = Vec::new();
    LoginSuccess {
        uuid: login_uuid,
        username: session.identity.username.clone(),
    }
    .encode(&mut body)
    .await?;
    session.send(0x02, body);

    session
        .proxy
        .sessions
        .register(crate::proxy::SessionHandle {
            username: session.identity.username.clone(),
            offline_uuid: session.identity.offline_uuid,
            online_uuid: session.identity.online_uuid,
        })
        .await;

    Ok(())
}

/// The encryption-handshake + session-server round trip of §4.3, steps 1-5.
async fn authenticate_online(reader: &mut ClientReader, session: &mut Session) -> Result<(), Error> {
    let verify_token = authentication::generate_verify_token()?;
    let server_id = authentication::generate_server_id();
    session.crypto = Crypto {
        verify_token,
        server_id: server_id.clone(),
        shared_secret: None,
    };

    let mut body = Vec::new();
    EncryptionRequest {
        server_id: server_id.clone(),
        public_key: ENCODED_PUB.clone(),
        verify_token: verify_token.to_vec(),
    }
    .encode(&mut body)
    .await?;
    session.send(0x01, body);

    let (packet_id, mut body) =
        protocol::read_frame(reader, session.compression_enabled).await?;
    if packet_id != 0x01 {
        return Err(Error::UnexpectedPacket(packet_id, "login"));
    }
    let response = EncryptionResponse::decode(&mut body).await?;

    let shared_secret = authentication::decrypt(&KEY_PAIR.0, &response.shared_secret)?;
    let decrypted_verify_token = authentication::decrypt(&KEY_PAIR.0, &response.verify_token)?;
    if authentication::verify_token(verify_token, &decrypted_verify_token).is_err() {
        return Err(fail(
            session,
            "Verify tokens are not the same",
            Error::VerifyTokenMismatch,
        )
        .await);
    }

    let (encryptor, decryptor) = authentication::create_ciphers(&shared_secret)?;
    reader.set_encryption(None, Some(decryptor));
    let _ = session
        .egress
        .send(EgressMsg::SetCipher(Box::new(encryptor)));
    session.crypto.shared_secret = Some(shared_secret.clone());

    match session
        .mojang
        .authenticate(
            &session.identity.username,
            &shared_secret,
            &server_id,
            &ENCODED_PUB,
        )
        .await
    {
        Ok(profile) => {
            if profile.name != session.identity.username {
                return Err(fail(
                    session,
                    "Client's username did not match Mojang's record",
                    Error::UsernameMismatch,
                )
                .await);
            }

            session.identity.online_uuid = Some(profile.id);
            session.identity.skin_properties = profile.properties.clone();
            session.proxy.skins.store(profile.id, profile.properties).await;
            Ok(())
        }
        Err(mojang::Error::UsernameMismatch) => Err(fail(
            session,
            "Client's username did not match Mojang's record",
            Error::UsernameMismatch,
        )
        .await),
        Err(mojang::Error::RefusedStatus(status)) => {
            warn!(%status, "session server refused authentication");
            Err(fail(
                session,
                &format!("Proxy Client Session Error (HTTP Status Code {})", status.as_u16()),
                Error::Mojang(mojang::Error::RefusedStatus(status)),
            )
            .await)
        }
        Err(err) => {
            debug!(cause = %err, "session server round trip failed");
            Err(fail(session, "Proxy Client Session Error", Error::Mojang(err)).await)
        }
    }
}

/// Resolves the `SpectateUuid` target against the session registry, used by the PLAY-state
/// SPECTATE handler, kept here since it shares the UUID/identity concerns of login.
pub async fn resolve_spectate_target(session: &Session, target: &Uuid) -> Option<Uuid> {
    session.proxy.sessions.resolve(target).await
}

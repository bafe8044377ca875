//! PLAY/LOBBY state handling (part of C5, C7, C8): the main packet dispatch loop that drives a
//! logged-in client for the rest of its connection (§4.5), plus the inventory mirror (§3) and
//! plugin event hooks (C8) that loop routes through on the way to forwarding packets upstream.

use super::egress::EgressMsg;
use super::{ClientReader, Error, Session, State};
use crate::events::{EventOutcome, Player};
use crate::protocol::packet_ids::{self, PlayPacket};
use crate::protocol::packets::Slot;
use crate::protocol::packets::play::{
    ChatMessage, ClickWindow, ClientSettings, HeldItemChange, KeepAlive, PlayerBlockPlacement,
    PlayerDigging, PlayerLook, PlayerPosLook, PlayerPosition, PlayerUpdateSign, Spectate, UseItem,
};
use crate::protocol::{self, Position};
use serde_json::{Map, Value};
use std::io::Cursor;
use tokio::time::Instant;
use tracing::debug;

use super::{keepalive, login, transfer};

/// The PLAY packets this session actually interprets; everything else is forwarded upstream
/// untouched once classified as unrecognised (§4.5 "all other PLAY packets").
const INTERPRETED: &[PlayPacket] = &[
    PlayPacket::ChatMessage,
    PlayPacket::KeepAlive,
    PlayPacket::PlayerPosition,
    PlayPacket::PlayerPosLook,
    PlayPacket::PlayerLook,
    PlayPacket::TeleportConfirm,
    PlayPacket::PlayerDigging,
    PlayPacket::PlayerBlockPlacement,
    PlayPacket::UseItem,
    PlayPacket::HeldItemChange,
    PlayPacket::PlayerUpdateSign,
    PlayPacket::ClientSettings,
    PlayPacket::ClickWindow,
    PlayPacket::Spectate,
];

fn classify(packet_id: i32, protocol: i32) -> Option<PlayPacket> {
    INTERPRETED.iter().copied().find(|p| {
        packet_ids::play_packet_id(*p, protocol, packet_ids::Direction::ServerBound)
            == Some(packet_id)
    })
}

/// Forwards a frame to the current upstream verbatim; a no-op while reconnecting (§4.5, Open
/// Question (a): gated on an upstream simply being attached).
async fn forward_raw(session: &mut Session, packet_id: i32, body: &[u8]) {
    if let Some(upstream) = session.upstream.as_mut() {
        let _ = upstream.send_frame(packet_id, body).await;
    }
}

fn player_snapshot(session: &Session) -> Player {
    let held = session
        .inventory
        .get(session.game.held_slot.max(0) as usize)
        .cloned()
        .flatten();
    Player::new(
        session.identity.username.clone(),
        session
            .identity
            .online_uuid
            .unwrap_or(session.identity.offline_uuid),
        session.game.gamemode,
    )
    .with_held_item(held)
}

/// Drives the session for the rest of its life: transitions to PLAY, opens the first upstream,
/// spawns the keepalive ticker, then runs the ingress loop until the client disconnects or the
/// session is aborted (§5's ingress reader + keepalive ticker + upstream handler tasks; the
/// egress pump was already spawned by [`super::handle`]).
pub async fn drive(mut reader: ClientReader, mut session: Session) -> Result<(), Error> {
    session.shared.set_state(State::Play).await;
    {
        let mut guard = session.shared.inner.lock().await;
        let now = Instant::now();
        guard.keepalive_last_sent = now;
        guard.keepalive_last_response = now;
    }

    let upstream_addr = session.config.upstream.address;
    if let Err(err) = transfer::connect_to_server(&mut session, upstream_addr, true).await {
        session.shared.abort().await;
        return Err(err);
    }

    let keepalive_handle = tokio::spawn(keepalive::run(
        session.shared.clone(),
        session.egress.clone(),
        session.protocol_client,
    ));

    let result = run_loop(&mut reader, &mut session).await;

    session.shared.abort().await;
    keepalive_handle.abort();
    if let Some(upstream) = session.upstream.take() {
        upstream.close().await;
    }
    let _ = session.egress.send(EgressMsg::Shutdown);
    session
        .proxy
        .sessions
        .unregister(&session.identity.offline_uuid)
        .await;

    result
}

async fn run_loop(reader: &mut ClientReader, session: &mut Session) -> Result<(), Error> {
    loop {
        let frame = tokio::select! {
            _ = session.shared.shutdown.notified() => return Ok(()),
            frame = protocol::read_frame(reader, session.compression_enabled) => frame,
        };

        let (packet_id, body) = match frame {
            Ok(frame) => frame,
            Err(protocol::Error::Io(_)) | Err(protocol::Error::Eof) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let state = session.shared.inner.lock().await.state;
        let outcome = match state {
            State::Play => handle_play_packet(packet_id, body, session).await,
            State::Lobby => handle_lobby_packet(packet_id, body, session).await,
            _ => Ok(()),
        };

        // §4.5: a malformed packet is dropped, the session stays up.
        if let Err(err) = outcome {
            debug!(cause = %err, packet_id, "dropping malformed play-state packet");
        }
    }
}

async fn handle_play_packet(packet_id: i32, body: Vec<u8>, session: &mut Session) -> Result<(), Error> {
    match classify(packet_id, session.protocol_client) {
        Some(PlayPacket::ChatMessage) => handle_chat_message(body, session).await,
        Some(PlayPacket::KeepAlive) => handle_keep_alive(body, session).await,
        Some(PlayPacket::PlayerPosition) => handle_player_position(packet_id, body, session).await,
        Some(PlayPacket::PlayerPosLook) => handle_player_poslook(packet_id, body, session).await,
        Some(PlayPacket::PlayerLook) => handle_player_look(packet_id, body, session).await,
        Some(PlayPacket::TeleportConfirm) => {
            forward_raw(session, packet_id, &body).await;
            Ok(())
        }
        Some(PlayPacket::PlayerDigging) => handle_player_digging(packet_id, body, session).await,
        Some(PlayPacket::PlayerBlockPlacement) => {
            handle_player_block_placement(packet_id, body, session).await
        }
        Some(PlayPacket::UseItem) => handle_use_item(packet_id, body, session).await,
        Some(PlayPacket::HeldItemChange) => handle_held_item_change(packet_id, body, session).await,
        Some(PlayPacket::PlayerUpdateSign) => handle_player_update_sign(body, session).await,
        Some(PlayPacket::ClientSettings) => handle_client_settings(body, session).await,
        Some(PlayPacket::ClickWindow) => handle_click_window(packet_id, body, session).await,
        Some(PlayPacket::Spectate) => handle_spectate(body, session).await,
        _ => {
            forward_raw(session, packet_id, &body).await;
            Ok(())
        }
    }
}

/// LOBBY only understands KEEP_ALIVE (so the ticker keeps the client alive while it waits) and a
/// CLICK_WINDOW "ready" signal that hands the client off to the local server (§4.5's LOBBY note;
/// there is no upstream vanilla-protocol LOBBY state, so this is the proxy's own hand-off
/// mechanism and carries no further packet vocabulary).
async fn handle_lobby_packet(packet_id: i32, body: Vec<u8>, session: &mut Session) -> Result<(), Error> {
    let protocol = session.protocol_client;

    if Some(packet_id)
        == packet_ids::play_packet_id(PlayPacket::KeepAlive, protocol, packet_ids::Direction::ServerBound)
    {
        return handle_keep_alive(body, session).await;
    }

    if Some(packet_id)
        == packet_ids::play_packet_id(PlayPacket::ClickWindow, protocol, packet_ids::Direction::ServerBound)
    {
        let filler_id = packet_ids::play_packet_id(
            PlayPacket::ChangeGameState,
            protocol,
            packet_ids::Direction::ClientBound,
        )
        .unwrap_or(0x2b);
        session.send(filler_id, vec![0, 0, 0, 0, 0]);
        session.send(filler_id, vec![0, 0, 0, 0, 0]);

        let upstream_addr = session.config.upstream.address;
        transfer::connect_to_server(session, upstream_addr, true).await?;
        session.shared.set_state(State::Play).await;
    }

    Ok(())
}

async fn handle_chat_message(body: Vec<u8>, session: &mut Session) -> Result<(), Error> {
    let mut cursor = Cursor::new(body);
    let chat = ChatMessage::decode(&mut cursor).await?;
    let message = chat.message;

    let is_local = session.shared.inner.lock().await.is_local;
    if !is_local && (message == "/lobby" || message == "/hub") {
        let upstream_addr = session.config.upstream.address;
        transfer::connect_to_server(session, upstream_addr, true).await?;
        return Ok(());
    }

    let player = player_snapshot(session);
    let mut payload = Map::new();
    payload.insert("message".to_string(), Value::String(message.clone()));
    let outcome = session
        .event_bus
        .fire("player.rawMessage", &player, payload)
        .await;

    let message = match outcome {
        EventOutcome::Deny => return Ok(()),
        EventOutcome::Replace(replacement) => replacement,
        EventOutcome::Patch(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(message),
        EventOutcome::Allow => message,
    };

    let prefix = session.config.command_prefix.clone();
    let mut forwarded = message.clone();
    if !prefix.is_empty() && message.starts_with(prefix.as_str()) {
        let rest = &message[prefix.len()..];
        let mut parts = rest.splitn(2, ' ');
        let command = parts.next().unwrap_or("").to_string();
        let args: Vec<String> = parts
            .next()
            .unwrap_or("")
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let mut payload = Map::new();
        payload.insert("command".to_string(), Value::String(command));
        payload.insert(
            "args".to_string(),
            Value::Array(args.into_iter().map(Value::String).collect()),
        );
        let outcome = session
            .event_bus
            .fire("player.runCommand", &player, payload)
            .await;
        if !matches!(outcome, EventOutcome::Deny) {
            return Ok(());
        }
    } else if prefix != "/" && message.starts_with('/') {
        forwarded = message[1..].to_string();
    }

    let mut out = Vec::new();
    ChatMessage { message: forwarded }.encode(&mut out).await?;
    let packet_id = packet_ids::play_packet_id(
        PlayPacket::ChatMessage,
        session.protocol_client,
        packet_ids::Direction::ServerBound,
    )
    .unwrap_or(0x01);
    if let Some(upstream) = session.upstream.as_mut() {
        let _ = upstream.send_frame(packet_id, &out).await;
    }

    Ok(())
}

/// Matches the client's reply to the outstanding id and, if a CLIENT_SETTINGS change is still
/// waiting, forwards it now (§4.4's deferred-forward boundary).
async fn handle_keep_alive(body: Vec<u8>, session: &mut Session) -> Result<(), Error> {
    let mut cursor = Cursor::new(body);
    let ka = KeepAlive::decode(&mut cursor, session.protocol_client).await?;

    let settings_pending = {
        let mut guard = session.shared.inner.lock().await;
        if guard.keepalive_outstanding_id == Some(ka.id) {
            guard.keepalive_last_response = Instant::now();
        }
        !session.settings_forwarded
    };

    if settings_pending {
        match session.client_settings.clone() {
            Some(settings) => {
                let mut out = Vec::new();
                if settings
                    .encode(&mut out, session.protocol_client)
                    .await
                    .is_ok()
                {
                    let packet_id = packet_ids::play_packet_id(
                        PlayPacket::ClientSettings,
                        session.protocol_client,
                        packet_ids::Direction::ServerBound,
                    )
                    .unwrap_or(0x04);
                    if let Some(upstream) = session.upstream.as_mut() {
                        if upstream.send_frame(packet_id, &out).await.is_ok() {
                            session.settings_forwarded = true;
                        }
                    }
                }
            }
            None => session.settings_forwarded = true,
        }
    }

    Ok(())
}

async fn handle_player_position(packet_id: i32, body: Vec<u8>, session: &mut Session) -> Result<(), Error> {
    let mut cursor = Cursor::new(body.clone());
    let pos = PlayerPosition::decode(&mut cursor, session.protocol_client).await?;
    session.game.position = (pos.x, pos.y, pos.z);
    forward_raw(session, packet_id, &body).await;
    Ok(())
}

async fn handle_player_poslook(packet_id: i32, body: Vec<u8>, session: &mut Session) -> Result<(), Error> {
    let mut cursor = Cursor::new(body.clone());
    let pos = PlayerPosLook::decode(&mut cursor, session.protocol_client).await?;
    session.game.position = (pos.x, pos.y, pos.z);
    session.game.head = (pos.yaw, pos.pitch);
    forward_raw(session, packet_id, &body).await;
    Ok(())
}

async fn handle_player_look(packet_id: i32, body: Vec<u8>, session: &mut Session) -> Result<(), Error> {
    let mut cursor = Cursor::new(body.clone());
    let look = PlayerLook::decode(&mut cursor).await?;
    session.game.head = (look.yaw, look.pitch);
    forward_raw(session, packet_id, &body).await;
    Ok(())
}

/// Interprets the digging status/face combination into the `player.dig`/`player.interact` hooks
/// of §4.5 while preserving every numeric discriminator verbatim on the wire (DESIGN.md's Open
/// Question (c)).
async fn handle_player_digging(packet_id: i32, body: Vec<u8>, session: &mut Session) -> Result<(), Error> {
    let protocol = session.protocol_client;
    let mut cursor = Cursor::new(body.clone());
    let digging = PlayerDigging::decode(&mut cursor, protocol).await?;
    interpret_player_digging(packet_id, &body, digging, session).await
}

async fn interpret_player_digging(
    packet_id: i32,
    body: &[u8],
    digging: PlayerDigging,
    session: &mut Session,
) -> Result<(), Error> {
    let gamemode = session.game.gamemode;
    let player = player_snapshot(session);

    if digging.status == 5 {
        if digging.face == -1 && digging.position != Position::default() {
            let mut payload = Map::new();
            payload.insert(
                "action".to_string(),
                Value::String("finish_using".to_string()),
            );
            let outcome = session
                .event_bus
                .fire("player.interact", &player, payload)
                .await;
            if matches!(outcome, EventOutcome::Deny) {
                return Ok(());
            }
        }
        forward_raw(session, packet_id, body).await;
        return Ok(());
    }

    let action = match digging.status {
        2 => "end_break",
        0 if gamemode != 1 => "begin_break",
        0 => "end_break",
        _ => {
            forward_raw(session, packet_id, body).await;
            return Ok(());
        }
    };

    let mut payload = Map::new();
    payload.insert("action".to_string(), Value::String(action.to_string()));
    let outcome = session.event_bus.fire("player.dig", &player, payload).await;
    if matches!(outcome, EventOutcome::Deny) {
        return Ok(());
    }

    forward_raw(session, packet_id, body).await;
    Ok(())
}

async fn handle_player_block_placement(
    packet_id: i32,
    body: Vec<u8>,
    session: &mut Session,
) -> Result<(), Error> {
    let protocol = session.protocol_client;
    let mut cursor = Cursor::new(body.clone());
    let placement = PlayerBlockPlacement::decode(&mut cursor, protocol).await?;
    let placement_pos = placement.placement_position();

    let held = match &placement.held_item {
        Some(slot) => slot.clone(),
        None => session
            .inventory
            .get(session.game.held_slot.max(0) as usize)
            .cloned()
            .flatten()
            .unwrap_or(Slot::Empty),
    };

    let player = player_snapshot(session);

    let outcome = if !held.is_present() {
        let mut payload = Map::new();
        payload.insert("action".to_string(), Value::String("useitem".to_string()));
        session.event_bus.fire("player.interact", &player, payload).await
    } else {
        session.game.last_place_coords = Some(placement_pos);
        let mut payload = Map::new();
        payload.insert(
            "position".to_string(),
            serde_json::json!({ "x": placement_pos.x, "y": placement_pos.y, "z": placement_pos.z }),
        );
        payload.insert(
            "clickposition".to_string(),
            serde_json::json!({ "x": placement.position.x, "y": placement.position.y, "z": placement.position.z }),
        );
        if let Some(hand) = placement.hand {
            payload.insert("hand".to_string(), Value::from(hand));
        }
        session.event_bus.fire("player.place", &player, payload).await
    };

    if matches!(outcome, EventOutcome::Deny) {
        return Ok(());
    }

    forward_raw(session, packet_id, &body).await;
    Ok(())
}

async fn handle_use_item(packet_id: i32, body: Vec<u8>, session: &mut Session) -> Result<(), Error> {
    let mut cursor = Cursor::new(body.clone());
    let _use_item = UseItem::decode(&mut cursor).await?;

    let position = session.game.last_place_coords.unwrap_or_default();
    let player = player_snapshot(session);
    let mut payload = Map::new();
    payload.insert("action".to_string(), Value::String("useitem".to_string()));
    payload.insert(
        "position".to_string(),
        serde_json::json!({ "x": position.x, "y": position.y, "z": position.z }),
    );
    let outcome = session
        .event_bus
        .fire("player.interact", &player, payload)
        .await;
    if matches!(outcome, EventOutcome::Deny) {
        return Ok(());
    }

    forward_raw(session, packet_id, &body).await;
    Ok(())
}

async fn handle_held_item_change(packet_id: i32, body: Vec<u8>, session: &mut Session) -> Result<(), Error> {
    let mut cursor = Cursor::new(body.clone());
    let change = HeldItemChange::decode(&mut cursor).await?;

    if (0..=8).contains(&change.slot) {
        session.game.held_slot = change.slot;
        forward_raw(session, packet_id, &body).await;
    }

    Ok(())
}

async fn handle_player_update_sign(body: Vec<u8>, session: &mut Session) -> Result<(), Error> {
    let protocol = session.protocol_client;
    let mut cursor = Cursor::new(body);
    let sign = PlayerUpdateSign::decode(&mut cursor, protocol).await?;

    let player = player_snapshot(session);
    let mut payload = Map::new();
    for (i, line) in sign.lines.iter().enumerate() {
        payload.insert(format!("line{i}"), Value::String(line.clone()));
    }
    let outcome = session
        .event_bus
        .fire("player.createsign", &player, payload)
        .await;
    if matches!(outcome, EventOutcome::Deny) {
        return Ok(());
    }

    let mut lines = sign.lines.clone();
    if let EventOutcome::Patch(map) = &outcome {
        for (i, line) in lines.iter_mut().enumerate() {
            if let Some(Value::String(s)) = map.get(&format!("line{i}")) {
                *line = s.clone();
            }
        }
    }

    let mut out = Vec::new();
    PlayerUpdateSign {
        position: sign.position,
        lines,
    }
    .encode(&mut out, protocol)
    .await?;
    let packet_id = packet_ids::play_packet_id(
        PlayPacket::PlayerUpdateSign,
        protocol,
        packet_ids::Direction::ServerBound,
    )
    .unwrap_or(0x12);
    if let Some(upstream) = session.upstream.as_mut() {
        let _ = upstream.send_frame(packet_id, &out).await;
    }

    Ok(())
}

/// Stores the decoded settings and marks them unforwarded; the actual upstream send happens at
/// the next keepalive boundary (§4.4), which is also what makes two identical CLIENT_SETTINGS in
/// a row collapse into a single upstream forward.
async fn handle_client_settings(body: Vec<u8>, session: &mut Session) -> Result<(), Error> {
    let protocol = session.protocol_client;
    let mut cursor = Cursor::new(body);
    let settings = ClientSettings::decode(&mut cursor, protocol).await?;
    session.client_settings = Some(settings);
    session.settings_forwarded = false;
    Ok(())
}

/// Applies the wid=0/button∈{0,1} tri-state inventory mirror rule (§3, DESIGN.md's Open Question
/// (b)) and forwards the raw packet regardless of how the click landed.
async fn handle_click_window(packet_id: i32, body: Vec<u8>, session: &mut Session) -> Result<(), Error> {
    let protocol = session.protocol_client;
    let mut cursor = Cursor::new(body.clone());
    let click = ClickWindow::decode(&mut cursor, protocol).await?;

    let player = player_snapshot(session);
    let mut payload = Map::new();
    payload.insert("window_id".to_string(), Value::from(click.window_id));
    payload.insert("slot".to_string(), Value::from(click.slot));
    payload.insert("button".to_string(), Value::from(click.button));
    let outcome = session
        .event_bus
        .fire("player.slotClick", &player, payload)
        .await;
    if matches!(outcome, EventOutcome::Deny) {
        return Ok(());
    }

    apply_click_window_mirror(&click, &mut session.inventory, &mut session.cursor_item);

    forward_raw(session, packet_id, &body).await;
    Ok(())
}

/// Applies the tri-state inventory mirror rule of §3/§4.5 directly to the mirrored inventory and
/// cursor slot, independent of `Session` so the rule can be exercised without a full session
/// fixture.
fn apply_click_window_mirror(
    click: &ClickWindow,
    inventory: &mut [Option<Slot>],
    cursor_item: &mut Option<Slot>,
) {
    if click.window_id != 0 || !matches!(click.button, 0 | 1) || click.slot < 0 {
        return;
    }
    let index = click.slot as usize;
    if index >= inventory.len() {
        return;
    }

    let prev = inventory[index].clone();
    let clicked = click.clicked_item.clone();
    match (&prev, clicked.is_present()) {
        (None, false) => inventory[index] = None,
        (None, true) => {
            inventory[index] = None;
            *cursor_item = Some(clicked);
        }
        (Some(_), false) => {
            inventory[index] = prev;
            *cursor_item = None;
        }
        (Some(_), true) => {
            inventory[index] = prev;
            *cursor_item = Some(clicked);
        }
    }
}

async fn handle_spectate(body: Vec<u8>, session: &mut Session) -> Result<(), Error> {
    let mut cursor = Cursor::new(body);
    let spectate = Spectate::decode(&mut cursor).await?;

    if let Some(resolved) = login::resolve_spectate_target(session, &spectate.target).await {
        let mut out = Vec::new();
        Spectate { target: resolved }.encode(&mut out).await?;
        let packet_id = packet_ids::play_packet_id(
            PlayPacket::Spectate,
            session.protocol_client,
            packet_ids::Direction::ServerBound,
        )
        .unwrap_or(0x18);
        if let Some(upstream) = session.upstream.as_mut() {
            let _ = upstream.send_frame(packet_id, &out).await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(id: i16) -> Slot {
        Slot::Present {
            item_id: id,
            count: 1,
            damage: 0,
        }
    }

    #[test]
    fn classify_finds_chat_message_pre_and_post_1_9() {
        assert_eq!(classify(0x01, 47), Some(PlayPacket::ChatMessage));
        assert_eq!(classify(0x01, 107), Some(PlayPacket::ChatMessage));
    }

    #[test]
    fn classify_returns_none_for_unrecognised_ids() {
        assert_eq!(classify(0x7f, 47), None);
    }

    #[test]
    fn click_window_mirror_empty_to_present_fills_cursor_not_slot() {
        let mut inventory = vec![None; super::super::INVENTORY_SIZE];
        let mut cursor_item = None;
        let click = ClickWindow {
            window_id: 0,
            slot: 3,
            button: 0,
            action_number: 1,
            mode: 0,
            clicked_item: slot(5),
        };

        apply_click_window_mirror(&click, &mut inventory, &mut cursor_item);

        assert_eq!(inventory[3], None);
        assert_eq!(cursor_item, Some(slot(5)));
    }

    #[test]
    fn click_window_mirror_present_to_empty_keeps_slot_clears_cursor() {
        let mut inventory = vec![None; super::super::INVENTORY_SIZE];
        inventory[3] = Some(slot(5));
        let mut cursor_item = Some(slot(9));
        let click = ClickWindow {
            window_id: 0,
            slot: 3,
            button: 1,
            action_number: 1,
            mode: 0,
            clicked_item: Slot::Empty,
        };

        apply_click_window_mirror(&click, &mut inventory, &mut cursor_item);

        assert_eq!(inventory[3], Some(slot(5)));
        assert_eq!(cursor_item, None);
    }

    #[test]
    fn click_window_mirror_ignores_other_windows_and_buttons() {
        let mut inventory = vec![None; super::super::INVENTORY_SIZE];
        inventory[3] = Some(slot(1));
        let mut cursor_item = None;
        let click = ClickWindow {
            window_id: 1,
            slot: 3,
            button: 0,
            action_number: 1,
            mode: 0,
            clicked_item: slot(5),
        };

        apply_click_window_mirror(&click, &mut inventory, &mut cursor_item);

        assert_eq!(inventory[3], Some(slot(1)));
        assert_eq!(cursor_item, None);
    }
}

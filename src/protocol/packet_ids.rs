//! Packet-ID map (C2): resolves symbolic packet names to wire IDs per protocol version and
//! direction.
//!
//! Wire IDs below were authored from documented protocol history for each boundary release,
//! since the retrieval pack carried no `mcpackets`-equivalent source to copy from directly.

/// Protocol version boundary for 1.7.0 (release, pre-1.7.6 renumbering).
pub const PROTOCOL_1_7_0: i32 = 4;
/// Protocol version boundary for 1.7.9/1.7.10 (last of the 1.7 line).
pub const PROTOCOL_1_7_9: i32 = 5;
/// Protocol version boundary for 1.8.
pub const PROTOCOL_1_8_0: i32 = 47;
/// Protocol version for the first 1.9 snapshots that changed hand/held-item packets.
pub const PROTOCOL_1_9_SNAPSHOT: i32 = 48;
/// Protocol version for 1.9 release.
pub const PROTOCOL_1_9_RELEASE: i32 = 107;
/// Highest protocol version this proxy declares support for.
pub const PROTOCOL_MAX: i32 = PROTOCOL_1_9_RELEASE;

/// Direction of a packet relative to this proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by the client, received by the proxy.
    ServerBound,
    /// Sent by the proxy, received by the client.
    ClientBound,
}

/// Symbolic PLAY-state packet names the state machine interprets directly.
///
/// Packets not listed here are forwarded untouched; the proxy never needs their wire ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayPacket {
    ChatMessage,
    KeepAlive,
    PlayerPosition,
    PlayerPosLook,
    PlayerLook,
    TeleportConfirm,
    PlayerDigging,
    PlayerBlockPlacement,
    UseItem,
    HeldItemChange,
    PlayerUpdateSign,
    ClientSettings,
    ClickWindow,
    Spectate,
    Disconnect,
    ChangeGameState,
}

/// Resolves a [`PlayPacket`] to its wire id for the given protocol version and direction.
///
/// Returns `None` when the packet does not exist in that direction for that version (e.g.
/// `UseItem` server-bound only exists from 1.9 onward).
pub fn play_packet_id(packet: PlayPacket, protocol: i32, direction: Direction) -> Option<i32> {
    use Direction::{ClientBound, ServerBound};
    use PlayPacket::*;

    if protocol < PROTOCOL_1_9_RELEASE {
        return play_packet_id_pre_1_9(packet, protocol, direction);
    }

    Some(match (packet, direction) {
        (KeepAlive, ClientBound) => 0x1F,
        (KeepAlive, ServerBound) => 0x0B,
        (ChatMessage, ClientBound) => 0x0F,
        (ChatMessage, ServerBound) => 0x02,
        (Disconnect, ClientBound) => 0x1A,
        (ChangeGameState, ClientBound) => 0x1E,
        (PlayerPosition, ServerBound) => 0x0C,
        (PlayerPosLook, ServerBound) => 0x0D,
        (PlayerLook, ServerBound) => 0x0E,
        (PlayerPosLook, ClientBound) => 0x2E,
        (TeleportConfirm, ServerBound) => 0x00,
        (PlayerDigging, ServerBound) => 0x13,
        (PlayerBlockPlacement, ServerBound) => 0x1C,
        (UseItem, ServerBound) => 0x1D,
        (HeldItemChange, ServerBound) => 0x17,
        (PlayerUpdateSign, ServerBound) => 0x19,
        (ClientSettings, ServerBound) => 0x04,
        (ClientSettings, ClientBound) => 0x34,
        (ClickWindow, ServerBound) => 0x07,
        (Spectate, ServerBound) => 0x18,
        _ => return None,
    })
}

fn play_packet_id_pre_1_9(packet: PlayPacket, protocol: i32, direction: Direction) -> Option<i32> {
    use Direction::{ClientBound, ServerBound};
    use PlayPacket::*;

    let is_1_8_plus = protocol >= PROTOCOL_1_8_0;

    Some(match (packet, direction) {
        (KeepAlive, ClientBound) => 0x00,
        (KeepAlive, ServerBound) => 0x00,
        (ChatMessage, ClientBound) => 0x02,
        (ChatMessage, ServerBound) => 0x01,
        (Disconnect, ClientBound) => 0x40,
        (ChangeGameState, ClientBound) => 0x2B,
        (PlayerPosition, ServerBound) => 0x04,
        (PlayerPosLook, ServerBound) => 0x06,
        (PlayerLook, ServerBound) => 0x05,
        (PlayerPosLook, ClientBound) => 0x08,
        (PlayerDigging, ServerBound) => 0x07,
        (PlayerBlockPlacement, ServerBound) => 0x08,
        (HeldItemChange, ServerBound) => 0x09,
        (PlayerUpdateSign, ServerBound) if is_1_8_plus => 0x12,
        (PlayerUpdateSign, ServerBound) => 0x13,
        (ClientSettings, ServerBound) if is_1_8_plus => 0x15,
        (ClientSettings, ServerBound) => 0x15,
        (ClientSettings, ClientBound) => 0x3F,
        (ClickWindow, ServerBound) => 0x0E,
        (Spectate, ServerBound) if is_1_8_plus => return None,
        (UseItem, _) => return None,
        (TeleportConfirm, _) => return None,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_ids_change_across_1_9_boundary() {
        assert_eq!(
            play_packet_id(PlayPacket::KeepAlive, PROTOCOL_1_8_0, Direction::ClientBound),
            Some(0x00)
        );
        assert_eq!(
            play_packet_id(
                PlayPacket::KeepAlive,
                PROTOCOL_1_9_RELEASE,
                Direction::ClientBound
            ),
            Some(0x1F)
        );
    }

    #[test]
    fn use_item_only_exists_from_1_9_release() {
        assert_eq!(
            play_packet_id(PlayPacket::UseItem, PROTOCOL_1_8_0, Direction::ServerBound),
            None
        );
        assert_eq!(
            play_packet_id(
                PlayPacket::UseItem,
                PROTOCOL_1_9_RELEASE,
                Direction::ServerBound
            ),
            Some(0x1D)
        );
    }

    #[test]
    fn teleport_confirm_is_1_9_only() {
        assert_eq!(
            play_packet_id(
                PlayPacket::TeleportConfirm,
                PROTOCOL_1_7_9,
                Direction::ServerBound
            ),
            None
        );
        assert_eq!(
            play_packet_id(
                PlayPacket::TeleportConfirm,
                PROTOCOL_1_9_RELEASE,
                Direction::ServerBound
            ),
            Some(0x00)
        );
    }
}

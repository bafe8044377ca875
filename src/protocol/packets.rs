//! Packet definitions for the supported protocol range (1.7–1.9). Each packet implements its
//! own `decode`/`encode` pair against the typed field traits in [`super`]; there is no shared
//! `Packet` trait because decode and encode are never needed symmetrically for a single struct
//! in this proxy (the state machine forwards most packets as opaque bytes and only decodes the
//! ones listed in the state machine).

use super::{nbt, AsyncReadExtMc, AsyncWriteExtMc, Error, Position};
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// Client-bound `0x00` handshake packet, parsed once per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: i32,
}

impl Handshake {
    pub async fn decode<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, Error> {
        Ok(Self {
            protocol_version: reader.read_varint().await?,
            server_address: reader.read_string().await?,
            server_port: reader.read_ushort().await?,
            next_state: reader.read_varint().await?,
        })
    }

    pub async fn encode<W: AsyncWrite + Unpin + Send>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_varint(self.protocol_version).await?;
        writer.write_string(&self.server_address).await?;
        writer.write_ushort(self.server_port).await?;
        writer.write_varint(self.next_state).await
    }
}

/// An inventory slot: absent, or a present item stack with opaque (forwarded, not inspected)
/// NBT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Empty,
    Present {
        item_id: i16,
        count: i8,
        damage: i16,
    },
}

impl Slot {
    pub fn is_present(&self) -> bool {
        matches!(self, Slot::Present { .. })
    }

    pub async fn decode<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, Error> {
        let item_id = reader.read_short().await?;
        if item_id == -1 {
            return Ok(Slot::Empty);
        }

        let count = reader.read_byte().await?;
        let damage = reader.read_short().await?;
        let tag_id = reader.read_ubyte().await?;
        nbt::skip_tag(reader, tag_id).await?;

        Ok(Slot::Present {
            item_id,
            count,
            damage,
        })
    }

    pub async fn encode<W: AsyncWrite + Unpin + Send>(&self, writer: &mut W) -> Result<(), Error> {
        match self {
            Slot::Empty => writer.write_short(-1).await,
            Slot::Present {
                item_id,
                count,
                damage,
            } => {
                writer.write_short(*item_id).await?;
                writer.write_byte(*count).await?;
                writer.write_short(*damage).await?;
                writer.write_ubyte(0).await
            }
        }
    }
}

pub mod status {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StatusVersion {
        pub name: String,
        pub protocol: i32,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StatusPlayerSample {
        pub name: String,
        pub id: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StatusPlayers {
        pub max: i32,
        pub online: i32,
        pub sample: Vec<StatusPlayerSample>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StatusResponse {
        pub version: StatusVersion,
        pub players: StatusPlayers,
        pub description: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub favicon: Option<String>,
    }
}

pub mod login {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct LoginStart {
        pub name: String,
    }

    impl LoginStart {
        pub async fn decode<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, Error> {
            Ok(Self {
                name: reader.read_string().await?,
            })
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct EncryptionRequest {
        pub server_id: String,
        pub public_key: Vec<u8>,
        pub verify_token: Vec<u8>,
    }

    impl EncryptionRequest {
        pub async fn encode<W: AsyncWrite + Unpin + Send>(
            &self,
            writer: &mut W,
        ) -> Result<(), Error> {
            writer.write_string(&self.server_id).await?;
            writer.write_byte_array(&self.public_key).await?;
            writer.write_byte_array(&self.verify_token).await
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct EncryptionResponse {
        pub shared_secret: Vec<u8>,
        pub verify_token: Vec<u8>,
    }

    impl EncryptionResponse {
        pub async fn decode<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, Error> {
            Ok(Self {
                shared_secret: reader.read_byte_array().await?,
                verify_token: reader.read_byte_array().await?,
            })
        }
    }

    /// Wire format unchanged across the whole 1.7–1.9 range: dashed UUID string, then username.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct LoginSuccess {
        pub uuid: Uuid,
        pub username: String,
    }

    impl LoginSuccess {
        pub async fn encode<W: AsyncWrite + Unpin + Send>(
            &self,
            writer: &mut W,
        ) -> Result<(), Error> {
            writer
                .write_string(&self.uuid.as_hyphenated().to_string())
                .await?;
            writer.write_string(&self.username).await
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SetCompression {
        pub threshold: i32,
    }

    impl SetCompression {
        pub async fn encode<W: AsyncWrite + Unpin + Send>(
            &self,
            writer: &mut W,
        ) -> Result<(), Error> {
            writer.write_varint(self.threshold).await
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Disconnect {
        pub reason_json: String,
    }

    impl Disconnect {
        pub async fn encode<W: AsyncWrite + Unpin + Send>(
            &self,
            writer: &mut W,
        ) -> Result<(), Error> {
            writer.write_string(&self.reason_json).await
        }
    }
}

pub mod play {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ChatMessage {
        pub message: String,
    }

    impl ChatMessage {
        pub async fn decode<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, Error> {
            Ok(Self {
                message: reader.read_string().await?,
            })
        }

        pub async fn encode<W: AsyncWrite + Unpin + Send>(
            &self,
            writer: &mut W,
        ) -> Result<(), Error> {
            writer.write_string(&self.message).await
        }
    }

    /// A client-bound chat message: a JSON chat component, plus (≥1.8) a position byte (0 =
    /// chat box). Distinct from [`ChatMessage`], which only carries the raw string used
    /// server-bound (§4.5's transfer-failure chat and the future `player.rawMessage` replies
    /// a plugin might push directly to the client both go through this struct).
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ClientChatMessage {
        pub json: String,
    }

    impl ClientChatMessage {
        pub async fn encode<W: AsyncWrite + Unpin + Send>(
            &self,
            writer: &mut W,
            protocol: i32,
        ) -> Result<(), Error> {
            writer.write_string(&self.json).await?;
            if protocol >= super::super::packet_ids::PROTOCOL_1_8_0 {
                writer.write_byte(0).await?;
            }
            Ok(())
        }
    }

    /// Holds the keepalive id as an `i64` regardless of wire width; ≥1.8 encodes it as a
    /// `VarInt`, ≤1.7 as a signed 32-bit int.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeepAlive {
        pub id: i64,
    }

    impl KeepAlive {
        pub async fn decode<R: AsyncRead + Unpin + Send>(
            reader: &mut R,
            protocol: i32,
        ) -> Result<Self, Error> {
            let id = if protocol >= super::super::packet_ids::PROTOCOL_1_8_0 {
                reader.read_varint().await? as i64
            } else {
                reader.read_int().await? as i64
            };
            Ok(Self { id })
        }

        pub async fn encode<W: AsyncWrite + Unpin + Send>(
            &self,
            writer: &mut W,
            protocol: i32,
        ) -> Result<(), Error> {
            if protocol >= super::super::packet_ids::PROTOCOL_1_8_0 {
                writer.write_varint(self.id as i32).await
            } else {
                writer.write_int(self.id as i32).await
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct PlayerPosition {
        pub x: f64,
        pub y: f64,
        pub z: f64,
        pub on_ground: bool,
    }

    impl PlayerPosition {
        pub async fn decode<R: AsyncRead + Unpin + Send>(
            reader: &mut R,
            protocol: i32,
        ) -> Result<Self, Error> {
            let x = reader.read_double().await?;
            let y = reader.read_double().await?;
            if protocol < super::super::packet_ids::PROTOCOL_1_8_0 {
                reader.read_double().await?; // yhead, unused
            }
            let z = reader.read_double().await?;
            let on_ground = reader.read_bool().await?;
            Ok(Self { x, y, z, on_ground })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct PlayerLook {
        pub yaw: f32,
        pub pitch: f32,
        pub on_ground: bool,
    }

    impl PlayerLook {
        pub async fn decode<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, Error> {
            Ok(Self {
                yaw: reader.read_float().await?,
                pitch: reader.read_float().await?,
                on_ground: reader.read_bool().await?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct PlayerPosLook {
        pub x: f64,
        pub y: f64,
        pub z: f64,
        pub yaw: f32,
        pub pitch: f32,
        pub on_ground: bool,
    }

    impl PlayerPosLook {
        pub async fn decode<R: AsyncRead + Unpin + Send>(
            reader: &mut R,
            protocol: i32,
        ) -> Result<Self, Error> {
            let x = reader.read_double().await?;
            let y = reader.read_double().await?;
            if protocol < super::super::packet_ids::PROTOCOL_1_8_0 {
                reader.read_double().await?; // yhead, unused
            }
            let z = reader.read_double().await?;
            let yaw = reader.read_float().await?;
            let pitch = reader.read_float().await?;
            let on_ground = reader.read_bool().await?;
            Ok(Self {
                x,
                y,
                z,
                yaw,
                pitch,
                on_ground,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TeleportConfirm {
        pub teleport_id: i32,
    }

    impl TeleportConfirm {
        pub async fn decode<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, Error> {
            Ok(Self {
                teleport_id: reader.read_varint().await?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PlayerDigging {
        pub status: i32,
        pub position: Position,
        pub face: i8,
    }

    impl PlayerDigging {
        pub async fn decode<R: AsyncRead + Unpin + Send>(
            reader: &mut R,
            protocol: i32,
        ) -> Result<Self, Error> {
            let status = reader.read_byte().await? as i32;
            let position = if protocol >= super::super::packet_ids::PROTOCOL_1_8_0 {
                reader.read_position_packed().await?
            } else {
                reader.read_position_legacy().await?
            };
            let face = reader.read_byte().await?;
            Ok(Self {
                status,
                position,
                face,
            })
        }
    }

    /// Fields that vary by era: ≤1.7 carries the held item inline, ≥1.9 release adds `hand`.
    #[derive(Debug, Clone, PartialEq)]
    pub struct PlayerBlockPlacement {
        pub position: Position,
        pub face: i8,
        pub held_item: Option<Slot>,
        pub hand: Option<i32>,
        pub cursor_x: i8,
        pub cursor_y: i8,
        pub cursor_z: i8,
    }

    impl PlayerBlockPlacement {
        pub async fn decode<R: AsyncRead + Unpin + Send>(
            reader: &mut R,
            protocol: i32,
        ) -> Result<Self, Error> {
            use super::super::packet_ids::{PROTOCOL_1_8_0, PROTOCOL_1_9_RELEASE};

            if protocol >= PROTOCOL_1_9_RELEASE {
                let position = reader.read_position_packed().await?;
                let face = reader.read_varint().await? as i8;
                let hand = reader.read_varint().await?;
                let cursor_x = (reader.read_float().await? * 16.0) as i8;
                let cursor_y = (reader.read_float().await? * 16.0) as i8;
                let cursor_z = (reader.read_float().await? * 16.0) as i8;
                return Ok(Self {
                    position,
                    face,
                    held_item: None,
                    hand: Some(hand),
                    cursor_x,
                    cursor_y,
                    cursor_z,
                });
            }

            if protocol >= PROTOCOL_1_8_0 {
                let position = reader.read_position_packed().await?;
                let face = reader.read_byte().await?;
                let cursor_x = reader.read_byte().await?;
                let cursor_y = reader.read_byte().await?;
                let cursor_z = reader.read_byte().await?;
                return Ok(Self {
                    position,
                    face,
                    held_item: None,
                    hand: None,
                    cursor_x,
                    cursor_y,
                    cursor_z,
                });
            }

            let position = reader.read_position_legacy().await?;
            let face = reader.read_byte().await?;
            let held_item = Some(Slot::decode(reader).await?);
            let cursor_x = reader.read_byte().await?;
            let cursor_y = reader.read_byte().await?;
            let cursor_z = reader.read_byte().await?;
            Ok(Self {
                position,
                face,
                held_item,
                hand: None,
                cursor_x,
                cursor_y,
                cursor_z,
            })
        }

        /// Offsets `position` one block along `face` (0=-Y,1=+Y,2=-Z,3=+Z,4=-X,5=+X).
        pub fn placement_position(&self) -> Position {
            let mut position = self.position;
            match self.face {
                0 => position.y -= 1,
                1 => position.y += 1,
                2 => position.z -= 1,
                3 => position.z += 1,
                4 => position.x -= 1,
                5 => position.x += 1,
                _ => {}
            }
            position
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UseItem {
        pub hand: i32,
    }

    impl UseItem {
        pub async fn decode<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, Error> {
            Ok(Self {
                hand: reader.read_varint().await?,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeldItemChange {
        pub slot: i16,
    }

    impl HeldItemChange {
        pub async fn decode<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, Error> {
            Ok(Self {
                slot: reader.read_short().await?,
            })
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct PlayerUpdateSign {
        pub position: Position,
        pub lines: [String; 4],
    }

    impl PlayerUpdateSign {
        pub async fn decode<R: AsyncRead + Unpin + Send>(
            reader: &mut R,
            protocol: i32,
        ) -> Result<Self, Error> {
            let position = if protocol >= super::super::packet_ids::PROTOCOL_1_8_0 {
                reader.read_position_packed().await?
            } else {
                reader.read_position_legacy().await?
            };
            let lines = [
                reader.read_string().await?,
                reader.read_string().await?,
                reader.read_string().await?,
                reader.read_string().await?,
            ];
            Ok(Self { position, lines })
        }

        pub async fn encode<W: AsyncWrite + Unpin + Send>(
            &self,
            writer: &mut W,
            protocol: i32,
        ) -> Result<(), Error> {
            if protocol >= super::super::packet_ids::PROTOCOL_1_8_0 {
                writer.write_position_packed(&self.position).await?;
            } else {
                writer.write_position_legacy(&self.position).await?;
            }
            for line in &self.lines {
                writer.write_string(line).await?;
            }
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct ClientSettings {
        pub locale: String,
        pub view_distance: i8,
        pub chat_mode: i32,
        pub chat_colors: bool,
        pub displayed_skin_parts: u8,
        pub main_hand: Option<i32>,
    }

    impl ClientSettings {
        pub async fn decode<R: AsyncRead + Unpin + Send>(
            reader: &mut R,
            protocol: i32,
        ) -> Result<Self, Error> {
            use super::super::packet_ids::{PROTOCOL_1_8_0, PROTOCOL_1_9_RELEASE};

            let locale = reader.read_string().await?;
            let view_distance = reader.read_byte().await?;
            let chat_mode = if protocol >= PROTOCOL_1_8_0 {
                reader.read_byte().await? as i32
            } else {
                reader.read_bool().await? as i32
            };
            let chat_colors = reader.read_bool().await?;
            let displayed_skin_parts = reader.read_ubyte().await?;
            let main_hand = if protocol >= PROTOCOL_1_9_RELEASE {
                Some(reader.read_varint().await?)
            } else {
                None
            };

            Ok(Self {
                locale,
                view_distance,
                chat_mode,
                chat_colors,
                displayed_skin_parts,
                main_hand,
            })
        }

        pub async fn encode<W: AsyncWrite + Unpin + Send>(
            &self,
            writer: &mut W,
            protocol: i32,
        ) -> Result<(), Error> {
            use super::super::packet_ids::{PROTOCOL_1_8_0, PROTOCOL_1_9_RELEASE};

            writer.write_string(&self.locale).await?;
            writer.write_byte(self.view_distance).await?;
            if protocol >= PROTOCOL_1_8_0 {
                writer.write_byte(self.chat_mode as i8).await?;
            } else {
                writer.write_bool(self.chat_mode != 0).await?;
            }
            writer.write_bool(self.chat_colors).await?;
            writer.write_ubyte(self.displayed_skin_parts).await?;
            if protocol >= PROTOCOL_1_9_RELEASE {
                writer.write_varint(self.main_hand.unwrap_or(1)).await?;
            }
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct ClickWindow {
        pub window_id: i8,
        pub slot: i16,
        pub button: i8,
        pub action_number: i16,
        pub mode: i32,
        pub clicked_item: Slot,
    }

    impl ClickWindow {
        pub async fn decode<R: AsyncRead + Unpin + Send>(
            reader: &mut R,
            protocol: i32,
        ) -> Result<Self, Error> {
            let window_id = reader.read_byte().await?;
            let slot = reader.read_short().await?;
            let button = reader.read_byte().await?;
            let action_number = reader.read_short().await?;
            let mode = if protocol >= super::super::packet_ids::PROTOCOL_1_8_0 {
                reader.read_varint().await?
            } else {
                reader.read_byte().await? as i32
            };
            let clicked_item = Slot::decode(reader).await?;
            Ok(Self {
                window_id,
                slot,
                button,
                action_number,
                mode,
                clicked_item,
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Spectate {
        pub target: Uuid,
    }

    impl Spectate {
        pub async fn decode<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<Self, Error> {
            Ok(Self {
                target: reader.read_uuid().await?,
            })
        }

        pub async fn encode<W: AsyncWrite + Unpin + Send>(
            &self,
            writer: &mut W,
        ) -> Result<(), Error> {
            writer.write_uuid(&self.target).await
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Disconnect {
        pub reason_json: String,
    }

    impl Disconnect {
        pub async fn encode<W: AsyncWrite + Unpin + Send>(
            &self,
            writer: &mut W,
        ) -> Result<(), Error> {
            writer.write_string(&self.reason_json).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn handshake_round_trip() {
        let handshake = Handshake {
            protocol_version: super::super::packet_ids::PROTOCOL_1_8_0,
            server_address: "play.example.com".to_string(),
            server_port: 25565,
            next_state: 2,
        };

        let mut buffer = Vec::new();
        handshake.encode(&mut buffer).await.unwrap();

        let mut cursor = Cursor::new(buffer);
        assert_eq!(Handshake::decode(&mut cursor).await.unwrap(), handshake);
    }

    #[tokio::test]
    async fn slot_empty_round_trip() {
        let mut buffer = Vec::new();
        Slot::Empty.encode(&mut buffer).await.unwrap();

        let mut cursor = Cursor::new(buffer);
        assert_eq!(Slot::decode(&mut cursor).await.unwrap(), Slot::Empty);
    }

    #[tokio::test]
    async fn slot_present_round_trip_without_nbt() {
        let slot = Slot::Present {
            item_id: 1,
            count: 3,
            damage: 0,
        };

        let mut buffer = Vec::new();
        slot.encode(&mut buffer).await.unwrap();

        let mut cursor = Cursor::new(buffer);
        assert_eq!(Slot::decode(&mut cursor).await.unwrap(), slot);
    }

    #[tokio::test]
    async fn player_block_placement_offsets_by_face() {
        let mut buffer = Vec::new();
        buffer
            .write_position_packed(&Position { x: 0, y: 64, z: 0 })
            .await
            .unwrap();
        buffer.write_byte(1).await.unwrap(); // face = +Y
        buffer.write_byte(0).await.unwrap();
        buffer.write_byte(0).await.unwrap();
        buffer.write_byte(0).await.unwrap();

        let mut cursor = Cursor::new(buffer);
        let placement = play::PlayerBlockPlacement::decode(
            &mut cursor,
            super::super::packet_ids::PROTOCOL_1_8_0,
        )
        .await
        .unwrap();

        assert_eq!(placement.placement_position(), Position { x: 0, y: 65, z: 0 });
    }

    #[tokio::test]
    async fn keepalive_uses_varint_on_1_8_and_int_before() {
        let mut modern = Vec::new();
        play::KeepAlive { id: 300 }
            .encode(&mut modern, super::super::packet_ids::PROTOCOL_1_8_0)
            .await
            .unwrap();
        assert_eq!(modern.len(), 2); // 300 needs two varint bytes

        let mut legacy = Vec::new();
        play::KeepAlive { id: 300 }
            .encode(&mut legacy, super::super::packet_ids::PROTOCOL_1_7_9)
            .await
            .unwrap();
        assert_eq!(legacy.len(), 4); // fixed-width int
    }
}

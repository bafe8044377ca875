//! Frame codec (C1): VarInt length-prefixed framing, optional zlib compression and the typed
//! field encodings shared by every packet in [`packets`].

pub mod nbt;
pub mod packet_ids;
pub mod packets;

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Cursor, Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// The maximum accepted (post length-prefix) packet size, mirroring vanilla's own limit.
pub const MAX_PACKET_LENGTH: i32 = 2 * 1024 * 1024;

/// The smallest protocol version for which the client-facing compression threshold applies.
pub const COMPRESSION_MIN_PROTOCOL: i32 = 27;

/// The compression threshold applied to the client connection once login completes.
pub const COMPRESSION_THRESHOLD: i32 = 256;

/// Errors produced while framing or decoding packets.
///
/// Scoped to this module's concerns, following the teacher's practice of one [`thiserror`] enum
/// per layer rather than a single crate-wide error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The underlying transport failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The client disconnected cleanly while a frame was expected.
    #[error("client disconnected")]
    Eof,
    /// A VarInt exceeded the maximum of 5 bytes.
    #[error("invalid varint")]
    InvalidVarInt,
    /// A packet's declared length was zero, negative or past [`MAX_PACKET_LENGTH`].
    #[error("illegal packet length")]
    IllegalPacketLength,
    /// A string or byte array declared a length we refuse to allocate.
    #[error("illegal encoding")]
    InvalidEncoding,
    /// A string's bytes were not valid UTF-8.
    #[error("invalid utf-8 in string field: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    /// A JSON field failed to (de)serialize.
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// A fixed-size field (verify token, UUID) had the wrong number of bytes.
    #[error("array conversion failed")]
    ArrayConversionFailed,
    /// A packet id had no handler in the current session state.
    #[error("unexpected packet id {0:#04x} in state {1}")]
    UnexpectedPacket(i32, &'static str),
}

/// Reads a single Minecraft-protocol VarInt (7 data bits + continuation bit per byte, LSB first).
pub async fn read_varint<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<i32, Error> {
    let mut value: i32 = 0;
    let mut position = 0u32;

    loop {
        let byte = reader.read_u8().await.map_err(|_| Error::Eof)?;
        value |= ((byte & 0x7F) as i32) << position;

        if byte & 0x80 == 0 {
            break;
        }

        position += 7;
        if position >= 32 {
            return Err(Error::InvalidVarInt);
        }
    }

    Ok(value)
}

/// Writes a VarInt using the standard encoding.
pub async fn write_varint<W: AsyncWrite + Unpin + Send>(
    writer: &mut W,
    mut value: i32,
) -> Result<(), Error> {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value = ((value as u32) >> 7) as i32;

        if value != 0 {
            byte |= 0x80;
        }

        writer.write_u8(byte).await?;

        if value == 0 {
            break;
        }
    }

    Ok(())
}

/// A block position, normalized to `x: i32, y: i32 (12-bit signed range), z: i32` regardless of
/// which wire encoding (packed long vs legacy int/short/int) produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Typed field reads, blanket-implemented over any byte source.
///
/// Packets are parsed by first reading the whole (decrypted, decompressed) body into memory and
/// wrapping it in a [`std::io::Cursor`] — `tokio` implements [`AsyncRead`] for `Cursor<Vec<u8>>`,
/// so the same field methods used while framing double as the packet body parser.
pub trait AsyncReadExtMc: AsyncRead + Unpin + Send {
    fn read_varint(&mut self) -> impl Future<Output = Result<i32, Error>> + Send;
    fn read_varlong(&mut self) -> impl Future<Output = Result<i64, Error>> + Send;
    fn read_bool(&mut self) -> impl Future<Output = Result<bool, Error>> + Send;
    fn read_byte(&mut self) -> impl Future<Output = Result<i8, Error>> + Send;
    fn read_ubyte(&mut self) -> impl Future<Output = Result<u8, Error>> + Send;
    fn read_short(&mut self) -> impl Future<Output = Result<i16, Error>> + Send;
    fn read_ushort(&mut self) -> impl Future<Output = Result<u16, Error>> + Send;
    fn read_int(&mut self) -> impl Future<Output = Result<i32, Error>> + Send;
    fn read_long(&mut self) -> impl Future<Output = Result<i64, Error>> + Send;
    fn read_float(&mut self) -> impl Future<Output = Result<f32, Error>> + Send;
    fn read_double(&mut self) -> impl Future<Output = Result<f64, Error>> + Send;
    fn read_string(&mut self) -> impl Future<Output = Result<String, Error>> + Send;
    fn read_json<T: serde::de::DeserializeOwned>(
        &mut self,
    ) -> impl Future<Output = Result<T, Error>> + Send;
    fn read_byte_array(&mut self) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;
    fn read_byte_array_short(&mut self) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;
    fn read_uuid(&mut self) -> impl Future<Output = Result<Uuid, Error>> + Send;
    fn read_position_packed(&mut self) -> impl Future<Output = Result<Position, Error>> + Send;
    fn read_position_legacy(&mut self) -> impl Future<Output = Result<Position, Error>> + Send;
    fn read_to_end_vec(&mut self) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;
}

impl<R: AsyncRead + Unpin + Send> AsyncReadExtMc for R {
    async fn read_varint(&mut self) -> Result<i32, Error> {
        read_varint(self).await
    }

    async fn read_varlong(&mut self) -> Result<i64, Error> {
        let mut value: i64 = 0;
        let mut position = 0u32;

        loop {
            let byte = self.read_u8().await.map_err(|_| Error::Eof)?;
            value |= ((byte & 0x7F) as i64) << position;

            if byte & 0x80 == 0 {
                break;
            }

            position += 7;
            if position >= 64 {
                return Err(Error::InvalidVarInt);
            }
        }

        Ok(value)
    }

    async fn read_bool(&mut self) -> Result<bool, Error> {
        Ok(self.read_u8().await.map_err(|_| Error::Eof)? != 0)
    }

    async fn read_byte(&mut self) -> Result<i8, Error> {
        Ok(self.read_i8().await.map_err(|_| Error::Eof)?)
    }

    async fn read_ubyte(&mut self) -> Result<u8, Error> {
        Ok(self.read_u8().await.map_err(|_| Error::Eof)?)
    }

    async fn read_short(&mut self) -> Result<i16, Error> {
        Ok(self.read_i16().await.map_err(|_| Error::Eof)?)
    }

    async fn read_ushort(&mut self) -> Result<u16, Error> {
        Ok(self.read_u16().await.map_err(|_| Error::Eof)?)
    }

    async fn read_int(&mut self) -> Result<i32, Error> {
        Ok(self.read_i32().await.map_err(|_| Error::Eof)?)
    }

    async fn read_long(&mut self) -> Result<i64, Error> {
        Ok(self.read_i64().await.map_err(|_| Error::Eof)?)
    }

    async fn read_float(&mut self) -> Result<f32, Error> {
        Ok(self.read_f32().await.map_err(|_| Error::Eof)?)
    }

    async fn read_double(&mut self) -> Result<f64, Error> {
        Ok(self.read_f64().await.map_err(|_| Error::Eof)?)
    }

    async fn read_string(&mut self) -> Result<String, Error> {
        let bytes = self.read_byte_array().await?;
        Ok(String::from_utf8(bytes)?)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T, Error> {
        let raw = self.read_string().await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn read_byte_array(&mut self) -> Result<Vec<u8>, Error> {
        let length = self.read_varint().await?;
        if !(0..=MAX_PACKET_LENGTH).contains(&length) {
            return Err(Error::InvalidEncoding);
        }

        let mut buffer = vec![0u8; length as usize];
        self.read_exact(&mut buffer).await.map_err(|_| Error::Eof)?;
        Ok(buffer)
    }

    async fn read_byte_array_short(&mut self) -> Result<Vec<u8>, Error> {
        let length = self.read_short().await?;
        if length < 0 {
            return Err(Error::InvalidEncoding);
        }

        let mut buffer = vec![0u8; length as usize];
        self.read_exact(&mut buffer).await.map_err(|_| Error::Eof)?;
        Ok(buffer)
    }

    async fn read_uuid(&mut self) -> Result<Uuid, Error> {
        let most = self.read_long().await? as u64;
        let least = self.read_long().await? as u64;
        Ok(Uuid::from_u64_pair(most, least))
    }

    async fn read_position_packed(&mut self) -> Result<Position, Error> {
        let raw = self.read_long().await?;
        let mut x = (raw >> 38) as i32;
        let mut y = (raw & 0xFFF) as i32;
        let mut z = (raw << 26 >> 38) as i32;

        if x >= 1 << 25 {
            x -= 1 << 26;
        }
        if y >= 1 << 11 {
            y -= 1 << 12;
        }
        if z >= 1 << 25 {
            z -= 1 << 26;
        }

        Ok(Position { x, y, z })
    }

    async fn read_position_legacy(&mut self) -> Result<Position, Error> {
        let x = self.read_int().await?;
        let y = self.read_short().await? as i32;
        let z = self.read_int().await?;
        Ok(Position { x, y, z })
    }

    async fn read_to_end_vec(&mut self) -> Result<Vec<u8>, Error> {
        let mut buffer = Vec::new();
        self.read_to_end(&mut buffer).await?;
        Ok(buffer)
    }
}

/// Typed field writes, blanket-implemented over any byte sink.
pub trait AsyncWriteExtMc: AsyncWrite + Unpin + Send {
    fn write_varint(&mut self, value: i32) -> impl Future<Output = Result<(), Error>> + Send;
    fn write_varlong(&mut self, value: i64) -> impl Future<Output = Result<(), Error>> + Send;
    fn write_bool(&mut self, value: bool) -> impl Future<Output = Result<(), Error>> + Send;
    fn write_byte(&mut self, value: i8) -> impl Future<Output = Result<(), Error>> + Send;
    fn write_ubyte(&mut self, value: u8) -> impl Future<Output = Result<(), Error>> + Send;
    fn write_short(&mut self, value: i16) -> impl Future<Output = Result<(), Error>> + Send;
    fn write_ushort(&mut self, value: u16) -> impl Future<Output = Result<(), Error>> + Send;
    fn write_int(&mut self, value: i32) -> impl Future<Output = Result<(), Error>> + Send;
    fn write_long(&mut self, value: i64) -> impl Future<Output = Result<(), Error>> + Send;
    fn write_float(&mut self, value: f32) -> impl Future<Output = Result<(), Error>> + Send;
    fn write_double(&mut self, value: f64) -> impl Future<Output = Result<(), Error>> + Send;
    fn write_string(&mut self, value: &str) -> impl Future<Output = Result<(), Error>> + Send;
    fn write_json<T: serde::Serialize + Sync>(
        &mut self,
        value: &T,
    ) -> impl Future<Output = Result<(), Error>> + Send;
    fn write_byte_array(&mut self, value: &[u8]) -> impl Future<Output = Result<(), Error>> + Send;
    fn write_byte_array_short(
        &mut self,
        value: &[u8],
    ) -> impl Future<Output = Result<(), Error>> + Send;
    fn write_uuid(&mut self, value: &Uuid) -> impl Future<Output = Result<(), Error>> + Send;
    fn write_position_packed(
        &mut self,
        value: &Position,
    ) -> impl Future<Output = Result<(), Error>> + Send;
    fn write_position_legacy(
        &mut self,
        value: &Position,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}

impl<W: AsyncWrite + Unpin + Send> AsyncWriteExtMc for W {
    async fn write_varint(&mut self, value: i32) -> Result<(), Error> {
        write_varint(self, value).await
    }

    async fn write_varlong(&mut self, mut value: i64) -> Result<(), Error> {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value = ((value as u64) >> 7) as i64;

            if value != 0 {
                byte |= 0x80;
            }

            self.write_u8(byte).await?;

            if value == 0 {
                break;
            }
        }

        Ok(())
    }

    async fn write_bool(&mut self, value: bool) -> Result<(), Error> {
        Ok(self.write_u8(value as u8).await?)
    }

    async fn write_byte(&mut self, value: i8) -> Result<(), Error> {
        Ok(self.write_i8(value).await?)
    }

    async fn write_ubyte(&mut self, value: u8) -> Result<(), Error> {
        Ok(self.write_u8(value).await?)
    }

    async fn write_short(&mut self, value: i16) -> Result<(), Error> {
        Ok(self.write_i16(value).await?)
    }

    async fn write_ushort(&mut self, value: u16) -> Result<(), Error> {
        Ok(self.write_u16(value).await?)
    }

    async fn write_int(&mut self, value: i32) -> Result<(), Error> {
        Ok(self.write_i32(value).await?)
    }

    async fn write_long(&mut self, value: i64) -> Result<(), Error> {
        Ok(self.write_i64(value).await?)
    }

    async fn write_float(&mut self, value: f32) -> Result<(), Error> {
        Ok(self.write_f32(value).await?)
    }

    async fn write_double(&mut self, value: f64) -> Result<(), Error> {
        Ok(self.write_f64(value).await?)
    }

    async fn write_string(&mut self, value: &str) -> Result<(), Error> {
        self.write_byte_array(value.as_bytes()).await
    }

    async fn write_json<T: serde::Serialize + Sync>(&mut self, value: &T) -> Result<(), Error> {
        let raw = serde_json::to_string(value)?;
        self.write_string(&raw).await
    }

    async fn write_byte_array(&mut self, value: &[u8]) -> Result<(), Error> {
        self.write_varint(value.len() as i32).await?;
        self.write_all(value).await?;
        Ok(())
    }

    async fn write_byte_array_short(&mut self, value: &[u8]) -> Result<(), Error> {
        self.write_short(value.len() as i16).await?;
        self.write_all(value).await?;
        Ok(())
    }

    async fn write_uuid(&mut self, value: &Uuid) -> Result<(), Error> {
        let (most, least) = value.as_u64_pair();
        self.write_long(most as i64).await?;
        self.write_long(least as i64).await?;
        Ok(())
    }

    async fn write_position_packed(&mut self, value: &Position) -> Result<(), Error> {
        let packed = ((value.x as i64 & 0x3FF_FFFF) << 38)
            | ((value.z as i64 & 0x3FF_FFFF) << 12)
            | (value.y as i64 & 0xFFF);
        self.write_long(packed).await
    }

    async fn write_position_legacy(&mut self, value: &Position) -> Result<(), Error> {
        self.write_int(value.x).await?;
        self.write_short(value.y as i16).await?;
        self.write_int(value.z).await?;
        Ok(())
    }
}

/// Strips the bytes already consumed from the front of a cursor, returning the remainder.
fn remaining(cursor: Cursor<Vec<u8>>) -> Vec<u8> {
    let position = cursor.position() as usize;
    let mut inner = cursor.into_inner();
    inner.drain(..position.min(inner.len()));
    inner
}

/// Reads one full frame (`VarInt length | …`) off the wire, undoing compression if active, and
/// returns the packet id plus its still-encoded body.
///
/// The stream passed in is expected to already apply decryption transparently (see
/// [`crate::cipher_stream`]) so this function only ever sees plaintext bytes.
pub async fn read_frame<R: AsyncRead + Unpin + Send>(
    reader: &mut R,
    compression_enabled: bool,
) -> Result<(i32, Vec<u8>), Error> {
    let packet_length = reader.read_varint().await?;
    if packet_length <= 0 || packet_length > MAX_PACKET_LENGTH {
        return Err(Error::IllegalPacketLength);
    }

    let mut raw = vec![0u8; packet_length as usize];
    reader.read_exact(&mut raw).await.map_err(|_| Error::Eof)?;

    let mut cursor = Cursor::new(raw);

    let body = if compression_enabled {
        let data_length = cursor.read_varint().await?;
        if data_length == 0 {
            remaining(cursor)
        } else {
            let compressed = remaining(cursor);
            let mut decoder = ZlibDecoder::new(compressed.as_slice());
            let mut decompressed = Vec::with_capacity(data_length as usize);
            decoder.read_to_end(&mut decompressed)?;
            decompressed
        }
    } else {
        remaining(cursor)
    };

    let mut body_cursor = Cursor::new(body);
    let packet_id = body_cursor.read_varint().await?;
    let body = remaining(body_cursor);

    Ok((packet_id, body))
}

/// Encodes and writes one full frame, applying compression when the body (id included) meets
/// the negotiated threshold.
pub async fn write_frame<W: AsyncWrite + Unpin + Send>(
    writer: &mut W,
    packet_id: i32,
    body: &[u8],
    compression_threshold: Option<i32>,
) -> Result<(), Error> {
    let mut payload = Vec::with_capacity(body.len() + 5);
    payload.write_varint(packet_id).await?;
    payload.extend_from_slice(body);

    let framed = match compression_threshold {
        Some(threshold) if payload.len() as i32 >= threshold => {
            let mut framed = Vec::new();
            framed.write_varint(payload.len() as i32).await?;

            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&payload)?;
            framed.extend_from_slice(&encoder.finish()?);
            framed
        }
        Some(_) => {
            let mut framed = Vec::new();
            framed.write_varint(0).await?;
            framed.extend_from_slice(&payload);
            framed
        }
        None => payload,
    };

    writer.write_varint(framed.len() as i32).await?;
    writer.write_all(&framed).await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn varint_round_trip() {
        for value in [0, 1, -1, 127, 128, 255, 25565, i32::MAX, i32::MIN] {
            let mut buffer = Vec::new();
            buffer.write_varint(value).await.unwrap();
            let mut cursor = Cursor::new(buffer);
            assert_eq!(cursor.read_varint().await.unwrap(), value);
        }
    }

    #[tokio::test]
    async fn string_round_trip() {
        let mut buffer = Vec::new();
        buffer.write_string("localhost").await.unwrap();
        let mut cursor = Cursor::new(buffer);
        assert_eq!(cursor.read_string().await.unwrap(), "localhost");
    }

    #[tokio::test]
    async fn position_packed_round_trip() {
        let position = Position {
            x: -12345,
            y: 65,
            z: 6789,
        };
        let mut buffer = Vec::new();
        buffer.write_position_packed(&position).await.unwrap();
        let mut cursor = Cursor::new(buffer);
        assert_eq!(cursor.read_position_packed().await.unwrap(), position);
    }

    #[tokio::test]
    async fn position_legacy_round_trip() {
        let position = Position {
            x: 100,
            y: -5,
            z: -200,
        };
        let mut buffer = Vec::new();
        buffer.write_position_legacy(&position).await.unwrap();
        let mut cursor = Cursor::new(buffer);
        assert_eq!(cursor.read_position_legacy().await.unwrap(), position);
    }

    #[tokio::test]
    async fn frame_round_trip_uncompressed() {
        let mut buffer = Vec::new();
        let mut body = Vec::new();
        body.write_string("hello").await.unwrap();

        write_frame(&mut buffer, 0x01, &body, None).await.unwrap();

        let mut cursor = Cursor::new(buffer);
        let (id, decoded_body) = read_frame(&mut cursor, false).await.unwrap();
        assert_eq!(id, 0x01);

        let mut body_cursor = Cursor::new(decoded_body);
        assert_eq!(body_cursor.read_string().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn frame_round_trip_compressed_above_threshold() {
        let mut buffer = Vec::new();
        let body = vec![7u8; 1024];

        write_frame(&mut buffer, 0x02, &body, Some(256))
            .await
            .unwrap();

        let mut cursor = Cursor::new(buffer);
        let (id, decoded_body) = read_frame(&mut cursor, true).await.unwrap();
        assert_eq!(id, 0x02);
        assert_eq!(decoded_body, body);
    }

    #[tokio::test]
    async fn frame_round_trip_below_threshold_stays_uncompressed() {
        let mut buffer = Vec::new();
        let body = vec![1u8, 2, 3];

        write_frame(&mut buffer, 0x03, &body, Some(256))
            .await
            .unwrap();

        let mut cursor = Cursor::new(buffer);
        let (id, decoded_body) = read_frame(&mut cursor, true).await.unwrap();
        assert_eq!(id, 0x03);
        assert_eq!(decoded_body, body);
    }
}

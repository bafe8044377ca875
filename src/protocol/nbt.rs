//! Minimal NBT support.
//!
//! This proxy never inspects item NBT content — it only needs to know where a tag ends so that
//! [`super::packets::Slot`] framing stays byte-accurate while being forwarded untouched. `skip_tag`
//! walks the tag structure recursively and discards the bytes; it never allocates the payload.

use super::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

const END: u8 = 0;
const BYTE: u8 = 1;
const SHORT: u8 = 2;
const INT: u8 = 3;
const LONG: u8 = 4;
const FLOAT: u8 = 5;
const DOUBLE: u8 = 6;
const BYTE_ARRAY: u8 = 7;
const STRING: u8 = 8;
const LIST: u8 = 9;
const COMPOUND: u8 = 10;
const INT_ARRAY: u8 = 11;

async fn skip_name<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<(), Error> {
    let length = reader.read_u16().await.map_err(|_| Error::Eof)?;
    let mut buffer = vec![0u8; length as usize];
    reader.read_exact(&mut buffer).await.map_err(|_| Error::Eof)?;
    Ok(())
}

/// Reads and discards a single NBT payload of the given `tag_id`, not including its name.
async fn skip_payload<R: AsyncRead + Unpin + Send>(reader: &mut R, tag_id: u8) -> Result<(), Error> {
    match tag_id {
        END => {}
        BYTE => {
            reader.read_u8().await.map_err(|_| Error::Eof)?;
        }
        SHORT => {
            reader.read_u16().await.map_err(|_| Error::Eof)?;
        }
        INT | FLOAT => {
            reader.read_u32().await.map_err(|_| Error::Eof)?;
        }
        LONG | DOUBLE => {
            reader.read_u64().await.map_err(|_| Error::Eof)?;
        }
        BYTE_ARRAY => {
            let length = reader.read_u32().await.map_err(|_| Error::Eof)? as usize;
            let mut buffer = vec![0u8; length];
            reader.read_exact(&mut buffer).await.map_err(|_| Error::Eof)?;
        }
        STRING => {
            skip_name(reader).await?;
        }
        LIST => {
            let element_id = reader.read_u8().await.map_err(|_| Error::Eof)?;
            let length = reader.read_u32().await.map_err(|_| Error::Eof)?;
            for _ in 0..length {
                Box::pin(skip_payload(reader, element_id)).await?;
            }
        }
        COMPOUND => loop {
            let child_id = reader.read_u8().await.map_err(|_| Error::Eof)?;
            if child_id == END {
                break;
            }
            skip_name(reader).await?;
            Box::pin(skip_payload(reader, child_id)).await?;
        },
        INT_ARRAY => {
            let length = reader.read_u32().await.map_err(|_| Error::Eof)? as usize;
            let mut buffer = vec![0u8; length * 4];
            reader.read_exact(&mut buffer).await.map_err(|_| Error::Eof)?;
        }
        _ => return Err(Error::InvalidEncoding),
    }

    Ok(())
}

/// Reads and discards one complete named tag (tag id, name, payload) starting right after the
/// slot's "has NBT" marker byte has already been consumed by the caller.
pub async fn skip_tag<R: AsyncRead + Unpin + Send>(reader: &mut R, root_id: u8) -> Result<(), Error> {
    if root_id == END {
        return Ok(());
    }

    skip_name(reader).await?;
    skip_payload(reader, root_id).await
}

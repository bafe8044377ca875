//! Egress pump (C7): the sole writer to the client socket. Every other task reaches the wire only
//! by sending an [`EgressMsg`]; the channel's FIFO ordering gives the "frames sent by a single
//! task arrive in submission order" guarantee from §5 for free, and also lets enabling the cipher
//! and sending the frame that follows it race-free (§9's "scoped cipher installation").

use super::ClientWriter;
use crate::authentication::{Aes128Cfb8Dec, Aes128Cfb8Enc};
use crate::protocol::write_frame;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::Duration;

/// One unit of work for the egress pump.
pub enum EgressMsg {
    /// Encode and write one client-bound frame.
    Frame { id: i32, body: Vec<u8> },
    /// Install the send cipher, effective starting with the next message (§4.1, §4.3 step 3).
    SetCipher(Box<Aes128Cfb8Enc>),
    /// Enable or disable compression framing (§4.1).
    SetCompression(Option<i32>),
    /// Flush what's buffered, then close the socket (§7's disconnect draining).
    Shutdown,
}

/// Drains `rx` into `writer` until the channel closes or a [`EgressMsg::Shutdown`] is processed.
pub async fn run(mut writer: ClientWriter, mut rx: mpsc::UnboundedReceiver<EgressMsg>) {
    let mut compression_threshold: Option<i32> = None;

    while let Some(msg) = rx.recv().await {
        match msg {
            EgressMsg::Frame { id, body } => {
                if write_frame(&mut writer, id, &body, compression_threshold)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            EgressMsg::SetCipher(encryptor) => {
                let decryptor: Option<Aes128Cfb8Dec> = None;
                writer.set_encryption(Some(*encryptor), decryptor);
            }
            EgressMsg::SetCompression(threshold) => {
                compression_threshold = threshold;
            }
            EgressMsg::Shutdown => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
}

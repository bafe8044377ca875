//! Keepalive ticker (C6): while `state ∈ {PLAY, LOBBY}` and `is_local`, periodically emits
//! KEEP_ALIVE, enforces the 25-second idle timeout, and flushes a deferred CLIENT_SETTINGS
//! forward at the keepalive boundary (§4.4).

use super::egress::EgressMsg;
use super::{SharedHandle, State};
use crate::protocol::packet_ids::{self, PlayPacket};
use crate::protocol::packets::play::KeepAlive;
use crate::protocol::AsyncWriteExtMc;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, Instant};
use tracing::debug;

/// How often the ticker wakes to check timers (§4.4: "every second").
const TICK: Duration = Duration::from_secs(1);
/// Resend a KEEP_ALIVE once this long has passed since the last one.
const SEND_INTERVAL: Duration = Duration::from_secs(5);
/// Disconnect once this long has passed without a matching response.
const IDLE_TIMEOUT: Duration = Duration::from_secs(25);

/// Runs until `shared.shutdown` fires or the session leaves `{PLAY, LOBBY}`/`is_local` for good
/// (the driver in [`super::play`] only spawns this while those hold, and aborts it on LOBBY
/// hand-off away from the local server).
pub async fn run(
    shared: SharedHandle,
    egress: mpsc::UnboundedSender<EgressMsg>,
    protocol: i32,
) {
    let mut ticker = interval(TICK);

    loop {
        tokio::select! {
            _ = shared.shutdown.notified() => return,
            _ = ticker.tick() => {}
        }

        let mut guard = shared.inner.lock().await;
        if guard.abort || !matches!(guard.state, State::Play | State::Lobby) || !guard.is_local {
            return;
        }

        let now = Instant::now();

        if now.duration_since(guard.keepalive_last_sent) > SEND_INTERVAL {
            let id: i64 = rand::rng().random::<i32>() as i64;
            guard.keepalive_outstanding_id = Some(id);
            guard.keepalive_last_sent = now;
            drop(guard);

            let mut body = Vec::new();
            if KeepAlive { id }.encode(&mut body, protocol).await.is_err() {
                continue;
            }
            let packet_id = packet_ids::play_packet_id(
                PlayPacket::KeepAlive,
                protocol,
                packet_ids::Direction::ClientBound,
            )
            .unwrap_or(0x00);
            let _ = egress.send(EgressMsg::Frame { id: packet_id, body });
            continue;
        }

        if now.duration_since(guard.keepalive_last_response) > IDLE_TIMEOUT {
            guard.state = super::State::Handshake;
            drop(guard);
            debug!("client closed due to lack of keepalive response");

            let payload = serde_json::json!({ "text": "Client closed due to lack of keepalive response." });
            let reason_json = serde_json::to_string(&payload).unwrap_or_default();
            let mut body = Vec::new();
            if crate::protocol::packets::play::Disconnect { reason_json }
                .encode(&mut body)
                .await
                .is_ok()
            {
                let packet_id = packet_ids::play_packet_id(
                    PlayPacket::Disconnect,
                    protocol,
                    packet_ids::Direction::ClientBound,
                )
                .unwrap_or(0x00);
                let _ = egress.send(EgressMsg::Frame { id: packet_id, body });
                let _ = egress.send(EgressMsg::Shutdown);
            }

            shared.abort().await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[tokio::test(start_paused = true)]
    async fn ticker_sends_keep_alive_after_five_seconds() {
        let shared = SharedHandle::new();
        shared.set_state(State::Play).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared_clone = shared.clone();
        let handle = tokio::spawn(async move { run(shared_clone, tx, 47).await });

        tokio::time::advance(Duration::from_secs(6)).await;
        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(msg, EgressMsg::Frame { .. }));

        shared.abort().await;
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_times_out_after_twenty_five_seconds_without_response() {
        let shared = SharedHandle::new();
        shared.set_state(State::Play).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let shared_clone = shared.clone();
        let handle = tokio::spawn(async move { run(shared_clone, tx, 47).await });

        tokio::time::advance(Duration::from_secs(30)).await;
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        assert!(shared.is_aborted().await);
    }

    #[tokio::test]
    async fn ticker_does_not_run_for_remote_upstream() {
        let shared = SharedHandle::new();
        shared.set_state(State::Play).await;
        shared.inner.lock().await.is_local = false;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared_clone = shared.clone();
        tokio::spawn(async move { run(shared_clone, tx, 47).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        let _ = Arc::new(Notify::new());
    }
}

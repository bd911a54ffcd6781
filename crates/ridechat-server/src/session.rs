//! Per-connection lifecycle.
//!
//! A session moves through Joined, Reading and Closing. On join it
//! registers the connection and replays history as one array frame; while
//! reading, inbound frames go through the ingest pipeline and a separate
//! writer task drains the outbox filled by the dispatcher. Closing always
//! unregisters, whichever way the session ends.

use crate::metrics::ConnectionMetricsGuard;
use crate::state::AppState;
use ridechat_core::metrics;
use ridechat_core::{
    ConnectionId, ConnectionRegistry, Delivery, Identity, IngestContext, IngestError,
    Registration, RoomId,
};
use ridechat_protocol::{codec, Sequence};
use ridechat_transport::{MessageSink, MessageStream};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed the connection.
    ClientClosed,
    /// Reading from the transport failed.
    Transport,
    /// An inbound frame was oversized or not a valid message.
    Decode,
    /// The history frame could not be delivered.
    HistoryFailed,
}

/// Removes the connection from the registry when dropped.
struct RegistrationGuard {
    registry: Arc<ConnectionRegistry>,
    connection_id: ConnectionId,
}

impl RegistrationGuard {
    fn register(
        registry: &Arc<ConnectionRegistry>,
        connection_id: ConnectionId,
        registration: Registration,
    ) -> Self {
        registry.register(connection_id.clone(), registration);
        metrics::set_active_rooms(registry.stats().room_count);
        Self {
            registry: Arc::clone(registry),
            connection_id,
        }
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.connection_id);
        metrics::set_active_rooms(self.registry.stats().room_count);
    }
}

/// Run one connection from join to close.
pub async fn run_session<S, R>(
    state: Arc<AppState>,
    room: RoomId,
    identity: Option<Identity>,
    mut sink: S,
    mut stream: R,
) -> CloseReason
where
    S: MessageSink + 'static,
    R: MessageStream,
{
    let _metrics_guard = ConnectionMetricsGuard::new();
    let connection_id = ConnectionId::generate();
    let remote = stream
        .remote_addr()
        .unwrap_or_else(|| "unknown".to_string());

    info!(
        connection = %connection_id,
        room = %room,
        user = identity.as_ref().map_or("anonymous", |i| i.user_id.as_str()),
        remote = %remote,
        "Connection joined"
    );

    // Register before reading history so nothing published in between is missed.
    let (outbox, inbox) = mpsc::channel(state.config.limits.outbox_capacity.max(1));
    let registration = RegistrationGuard::register(
        &state.registry,
        connection_id.clone(),
        Registration {
            room: room.clone(),
            identity: identity.clone(),
            outbox,
        },
    );

    let history = state.history.load(&room).await;
    let last_seq = history.last().and_then(|m| m.seq.clone());
    let delivered = match codec::encode_history(&history) {
        Ok(frame) => {
            let len = frame.len();
            let sent = sink.send(frame).await;
            if sent.is_ok() {
                metrics::record_message(len, "outbound");
            }
            sent.map_err(|e| e.to_string())
        }
        Err(e) => Err(e.to_string()),
    };
    if let Err(e) = delivered {
        warn!(connection = %connection_id, error = %e, "Failed to send history");
        drop(registration);
        let _ = sink.close().await;
        return CloseReason::HistoryFailed;
    }
    debug!(connection = %connection_id, count = history.len(), "History sent");

    let (stop_tx, stop_rx) = oneshot::channel();
    let writer = tokio::spawn(write_loop(
        sink,
        inbox,
        stop_rx,
        last_seq,
        connection_id.clone(),
    ));

    let ctx = IngestContext::new(connection_id.clone(), room).with_identity(identity);
    let reason = read_loop(&state, &ctx, &mut stream).await;

    // Closing
    drop(registration);
    let _ = stop_tx.send(());
    if let Err(e) = writer.await {
        warn!(connection = %connection_id, error = %e, "Writer task failed");
    }

    info!(connection = %connection_id, reason = ?reason, "Connection closed");
    reason
}

async fn read_loop<R: MessageStream>(
    state: &AppState,
    ctx: &IngestContext,
    stream: &mut R,
) -> CloseReason {
    let max_size = state.config.limits.max_message_size;

    loop {
        let payload = match stream.recv().await {
            Ok(Some(payload)) => payload,
            Ok(None) => return CloseReason::ClientClosed,
            Err(e) => {
                debug!(connection = %ctx.connection_id, error = %e, "Transport error");
                metrics::record_error("transport");
                return CloseReason::Transport;
            }
        };
        metrics::record_message(payload.len(), "inbound");

        let inbound = match codec::decode_inbound(&payload, max_size) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(connection = %ctx.connection_id, error = %e, "Malformed frame, closing");
                metrics::record_error("decode");
                return CloseReason::Decode;
            }
        };

        match state.ingest.ingest(ctx, inbound).await {
            Ok(message) => {
                trace!(connection = %ctx.connection_id, seq = ?message.seq, "Ingested");
            }
            Err(e @ (IngestError::EmptyContent | IngestError::ContentTooLong { .. })) => {
                debug!(connection = %ctx.connection_id, error = %e, "Rejected message");
            }
            Err(e) => {
                warn!(connection = %ctx.connection_id, error = %e, "Failed to ingest message");
            }
        }
    }
}

async fn write_loop<S: MessageSink>(
    mut sink: S,
    mut inbox: mpsc::Receiver<Arc<Delivery>>,
    mut stop: oneshot::Receiver<()>,
    history_tail: Option<Sequence>,
    connection_id: ConnectionId,
) {
    loop {
        let delivery = tokio::select! {
            biased;
            _ = &mut stop => break,
            delivery = inbox.recv() => match delivery {
                Some(delivery) => delivery,
                None => break,
            },
        };

        // Already part of the history batch.
        if let (Some(tail), Some(seq)) = (&history_tail, &delivery.message.seq) {
            if seq <= tail {
                trace!(connection = %connection_id, seq = %seq, "Skipping replayed message");
                continue;
            }
        }

        if let Err(e) = sink.send(delivery.frame.clone()).await {
            debug!(connection = %connection_id, error = %e, "Send failed, stopping writer");
            break;
        }
    }

    let _ = sink.close().await;
}

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use catalog_api::{OpContext, ResourceType};
use catalog_engine::{ApplyOutcome, Reconciler};

use crate::consumer::EventConsumer;
use crate::decode::EventDecoder;
use crate::error::IngestError;
use crate::event::{EventKind, InboundMessage, ResourceEvent};

#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Upper bound on one poll.
    pub poll_timeout: Duration,
    /// Deadline of one reconciliation.
    pub apply_timeout: Duration,
    /// Pause after a failed poll.
    pub poll_backoff: Duration,
    /// Types whose `PARSED` events are written. Removals are always applied.
    pub parsed_types: HashSet<ResourceType>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            apply_timeout: Duration::from_secs(10),
            poll_backoff: Duration::from_secs(1),
            parsed_types: ResourceType::ALL.into_iter().collect(),
        }
    }
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub received: u64,
    pub applied: u64,
    pub skipped: u64,
    /// Unbound topics and kinds this service does not act on.
    pub ignored: u64,
    pub decode_errors: u64,
    pub apply_errors: u64,
}

// ═══════════════════════════════════════════════════════════════
//  Ingest task: consumer → decoder → reconciler
// ═══════════════════════════════════════════════════════════════

/// Run the ingestion loop until `token` is cancelled or the consumer closes.
///
/// Shutdown is observed between polls: the message in hand is dispatched
/// and acknowledged first, then the consumer is closed.
pub fn spawn_ingest_loop(
    mut consumer: Box<dyn EventConsumer>,
    decoder: Arc<dyn EventDecoder>,
    reconciler: Reconciler,
    settings: IngestSettings,
    token: CancellationToken,
) -> JoinHandle<IngestStats> {
    tokio::spawn(async move {
        let mut stats = IngestStats::default();
        tracing::info!("ingestion started");

        while !token.is_cancelled() {
            let message = match consumer.poll(settings.poll_timeout).await {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(IngestError::Closed) => {
                    tracing::info!("consumer closed, stopping ingestion");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "poll failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(settings.poll_backoff) => {}
                        _ = token.cancelled() => {}
                    }
                    continue;
                }
            };

            stats.received += 1;
            dispatch(&message, decoder.as_ref(), &reconciler, &settings, &mut stats).await;

            if let Err(e) = consumer.ack(&message).await {
                tracing::warn!(topic = %message.topic, error = %e, "ack failed");
            }
        }

        if let Err(e) = consumer.close().await {
            tracing::warn!(error = %e, "consumer close failed");
        }
        tracing::info!(
            received = stats.received,
            applied = stats.applied,
            skipped = stats.skipped,
            ignored = stats.ignored,
            decode_errors = stats.decode_errors,
            apply_errors = stats.apply_errors,
            "ingestion stopped"
        );
        stats
    })
}

async fn dispatch(
    message: &InboundMessage,
    decoder: &dyn EventDecoder,
    reconciler: &Reconciler,
    settings: &IngestSettings,
    stats: &mut IngestStats,
) {
    let event = match decoder.decode(message) {
        Ok(Some(event)) => event,
        Ok(None) => {
            tracing::debug!(topic = %message.topic, "no binding for topic, skipping");
            stats.ignored += 1;
            return;
        }
        Err(e) => {
            tracing::warn!(topic = %message.topic, key = ?message.key, error = %e, "undecodable event, skipping");
            stats.decode_errors += 1;
            return;
        }
    };

    // Own deadline, no shutdown token: an apply in progress is finished.
    let ctx = OpContext::new().with_timeout(settings.apply_timeout);
    let ResourceEvent { kind, resource_type, resource_id, timestamp, payload } = event;

    let result = match (kind, payload) {
        (EventKind::Removed, _) => {
            reconciler.apply_tombstone(&ctx, resource_type, &resource_id, timestamp).await
        }
        (EventKind::Parsed, Some(payload)) if settings.parsed_types.contains(&resource_type) => {
            reconciler.apply_write(&ctx, resource_type, &resource_id, payload, timestamp).await
        }
        _ => {
            tracing::debug!(%resource_type, id = %resource_id, ?kind, "event kind not handled here");
            stats.ignored += 1;
            return;
        }
    };

    match result {
        Ok(ApplyOutcome::Applied) => stats.applied += 1,
        Ok(ApplyOutcome::Skipped) => stats.skipped += 1,
        Err(e) => {
            tracing::error!(
                topic = %message.topic,
                %resource_type,
                id = %resource_id,
                ts = timestamp,
                ?kind,
                error = %e,
                "failed to apply event"
            );
            stats.apply_errors += 1;
        }
    }
}

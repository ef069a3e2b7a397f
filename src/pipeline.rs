use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use tracing::{instrument, warn};

use crate::codec::CodecError;
use crate::error::InteractionError;
use crate::hw::{DeviceSession, NotificationSink};
use crate::protocol::EndpointId;

/// Default queue capacity; sized to never apply backpressure at the
/// station's notification duty cycle.
pub const DEFAULT_PIPELINE_CAPACITY: usize = 4_096;

/// One queued notification value with its capture timestamp.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Capture<T> {
    /// Unix milliseconds assigned when the value was enqueued.
    pub captured_at_ms: i64,
    pub value: T,
}

/// Bridges hardware-notification callbacks into a bounded ordered queue.
///
/// The producer side runs inside the BLE dispatch context and must never
/// block: `push` takes a short mutex section and, when the queue is full,
/// discards the oldest entry and counts the loss instead of waiting. The
/// consumer drains on its own schedule; per-subscription FIFO order is
/// preserved.
#[derive(Debug)]
pub struct NotificationPipeline<T> {
    shared: Arc<PipelineShared<T>>,
}

#[derive(Debug)]
struct PipelineShared<T> {
    queue: Mutex<VecDeque<Capture<T>>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> Clone for NotificationPipeline<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> NotificationPipeline<T> {
    /// Creates a pipeline holding at most `capacity` queued captures.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(PipelineShared {
                queue: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
                capacity: capacity.max(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueues one value, timestamping it at arrival.
    ///
    /// Never fails and never blocks the producer: a full queue drops its
    /// oldest capture and increments the drop counter.
    pub fn push(&self, value: T) {
        let capture = Capture {
            captured_at_ms: now_unix_ms(),
            value,
        };

        let mut queue = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if queue.len() >= self.shared.capacity {
            queue.pop_front();
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(capture);
    }

    /// Removes and returns all queued captures in arrival order.
    ///
    /// Non-blocking; an empty queue yields an empty vector.
    #[must_use]
    pub fn drain(&self) -> Vec<Capture<T>> {
        let mut queue = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        queue.drain(..).collect()
    }

    /// Number of captures currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Returns whether the queue is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of captures discarded due to overflow since creation.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

fn now_unix_ms() -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000)
        .unwrap_or(i64::MAX)
}

/// An armed notification subscription feeding one pipeline.
#[derive(Debug)]
pub struct MonitorHandle<T> {
    endpoint: EndpointId,
    pipeline: NotificationPipeline<T>,
}

impl<T> MonitorHandle<T> {
    /// The endpoint this monitor is subscribed to.
    #[must_use]
    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    /// Drains all captures received so far, in arrival order.
    #[must_use]
    pub fn drain(&self) -> Vec<Capture<T>> {
        self.pipeline.drain()
    }

    /// Captures discarded due to queue overflow.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.pipeline.dropped()
    }

    /// Cancels the subscription; later notifications no longer enqueue.
    ///
    /// # Errors
    ///
    /// Returns an error when the session rejects the unsubscribe.
    pub async fn disarm(self, session: &mut DeviceSession) -> Result<(), InteractionError> {
        session.unsubscribe(self.endpoint).await
    }
}

/// Arms a monitoring subscription on `endpoint`.
///
/// Each notification payload is decoded by `decode`; `Ok(None)` values are
/// ignored silently and decode failures are logged and skipped without
/// tearing down the subscription.
///
/// # Errors
///
/// Returns an error when the session cannot establish the subscription.
#[instrument(skip(session, decode), level = "debug", fields(%endpoint, capacity))]
pub async fn arm<T, D>(
    session: &mut DeviceSession,
    endpoint: EndpointId,
    capacity: usize,
    decode: D,
) -> Result<MonitorHandle<T>, InteractionError>
where
    T: Send + 'static,
    D: Fn(&[u8]) -> Result<Option<T>, CodecError> + Send + 'static,
{
    let pipeline = NotificationPipeline::new(capacity);
    let producer = pipeline.clone();
    let sink: NotificationSink = Box::new(move |payload: Vec<u8>| match decode(&payload) {
        Ok(Some(value)) => producer.push(value),
        Ok(None) => {}
        Err(error) => {
            warn!(%endpoint, %error, "skipping undecodable notification payload");
        }
    });

    session.subscribe(endpoint, sink).await?;
    Ok(MonitorHandle { endpoint, pipeline })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn drain_preserves_arrival_order() {
        let pipeline = NotificationPipeline::new(8);
        pipeline.push(1u8);
        pipeline.push(2);
        pipeline.push(3);

        let values: Vec<u8> = pipeline
            .drain()
            .into_iter()
            .map(|capture| capture.value)
            .collect();
        assert_eq!(vec![1, 2, 3], values);
    }

    #[test]
    fn drain_on_empty_queue_returns_nothing() {
        let pipeline: NotificationPipeline<u8> = NotificationPipeline::new(8);
        assert!(pipeline.drain().is_empty());
        assert!(pipeline.is_empty());
    }

    #[test]
    fn overflow_drops_oldest_and_counts_losses() {
        let pipeline = NotificationPipeline::new(2);
        pipeline.push(1u8);
        pipeline.push(2);
        pipeline.push(3);

        let values: Vec<u8> = pipeline
            .drain()
            .into_iter()
            .map(|capture| capture.value)
            .collect();
        assert_eq!(vec![2, 3], values);
        assert_eq!(1, pipeline.dropped());
    }

    #[test]
    fn drain_resets_length_but_not_drop_counter() {
        let pipeline = NotificationPipeline::new(1);
        pipeline.push(1u8);
        pipeline.push(2);
        assert_eq!(1, pipeline.len());

        let _ = pipeline.drain();
        assert_eq!(0, pipeline.len());
        assert_eq!(1, pipeline.dropped());
    }

    #[test]
    fn captures_carry_monotonic_timestamps() {
        let pipeline = NotificationPipeline::new(4);
        pipeline.push(1u8);
        pipeline.push(2);

        let captures = pipeline.drain();
        assert!(captures[0].captured_at_ms <= captures[1].captured_at_ms);
        assert!(captures[0].captured_at_ms > 0);
    }
}

//! Per-contact burst coalescing.
//!
//! Fragments for a contact accumulate in a [`PendingRegistry`]. The first
//! fragment of a quiet contact schedules a flush task; later fragments only
//! append. The flush sleeps a fixed quiet period (not reset by new arrivals),
//! takes the whole buffer, and hands the space-joined text to a
//! [`BurstHandler`].
//!
//! Each flush task owns its key's live slot through a [`LiveSlot`] guard.
//! The guard releases the slot on every exit: normal completion, handler
//! error, panic, or abort.

use crate::ContactKey;
use crate::config::DebounceConfig;
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Receives one coalesced burst per flush.
#[async_trait]
pub trait BurstHandler: Send + Sync {
    async fn handle_burst(&self, key: &ContactKey, input: String) -> Result<()>;
}

struct LiveTask {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct PendingBurst {
    fragments: Vec<String>,
    task: Option<LiveTask>,
}

impl PendingBurst {
    fn has_live_task(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    fn is_owned_by(&self, generation: u64) -> bool {
        self.task
            .as_ref()
            .is_some_and(|task| task.generation == generation)
    }
}

/// Buffered fragments and live flush tasks, keyed by contact.
#[derive(Default)]
pub struct PendingRegistry {
    bursts: Mutex<HashMap<ContactKey, PendingBurst>>,
    next_generation: AtomicU64,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragments buffered for a key and not yet taken by a flush.
    pub fn pending_fragments(&self, key: &ContactKey) -> Vec<String> {
        self.bursts
            .lock()
            .get(key)
            .map(|burst| burst.fragments.clone())
            .unwrap_or_default()
    }

    pub fn has_live_task(&self, key: &ContactKey) -> bool {
        self.bursts
            .lock()
            .get(key)
            .is_some_and(PendingBurst::has_live_task)
    }

    pub fn live_task_count(&self) -> usize {
        self.bursts
            .lock()
            .values()
            .filter(|burst| burst.has_live_task())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.bursts.lock().is_empty()
    }

    fn take_fragments(&self, key: &ContactKey) -> Vec<String> {
        self.bursts
            .lock()
            .get_mut(key)
            .map(|burst| std::mem::take(&mut burst.fragments))
            .unwrap_or_default()
    }
}

/// Ownership of a key's live slot, held by its flush task.
struct LiveSlot {
    registry: Arc<PendingRegistry>,
    key: ContactKey,
    generation: u64,
    released: bool,
}

impl Drop for LiveSlot {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Abnormal exit: drop the slot and whatever was buffered with it.
        let mut bursts = self.registry.bursts.lock();
        if bursts
            .get(&self.key)
            .is_some_and(|burst| burst.is_owned_by(self.generation))
        {
            bursts.remove(&self.key);
        }
    }
}

/// Coalesces bursts per contact and runs at most one flush task per key.
#[derive(Clone)]
pub struct Debouncer {
    registry: Arc<PendingRegistry>,
    handler: Arc<dyn BurstHandler>,
    quiet_period: Duration,
}

impl Debouncer {
    pub fn new(handler: Arc<dyn BurstHandler>, config: DebounceConfig) -> Self {
        Self::with_registry(Arc::new(PendingRegistry::new()), handler, config)
    }

    pub fn with_registry(
        registry: Arc<PendingRegistry>,
        handler: Arc<dyn BurstHandler>,
        config: DebounceConfig,
    ) -> Self {
        Self {
            registry,
            handler,
            quiet_period: config.quiet_period(),
        }
    }

    pub fn registry(&self) -> &Arc<PendingRegistry> {
        &self.registry
    }

    /// Buffer a fragment. Returns true when this call scheduled a new flush,
    /// false when an already live flush will pick the fragment up.
    pub fn enqueue(&self, key: ContactKey, fragment: impl Into<String>) -> bool {
        let mut bursts = self.registry.bursts.lock();
        let burst = bursts.entry(key.clone()).or_default();
        burst.fragments.push(fragment.into());

        if burst.has_live_task() {
            tracing::debug!(phone = %key.phone, instance = %key.instance, "fragment buffered");
            return false;
        }

        burst.task = Some(self.spawn_flush(key));
        true
    }

    /// Abort a key's flush task and discard its buffer. Returns true if
    /// anything was pending.
    pub fn cancel(&self, key: &ContactKey) -> bool {
        let removed = self.registry.bursts.lock().remove(key);
        let Some(burst) = removed else {
            return false;
        };
        if let Some(task) = burst.task {
            task.handle.abort();
        }
        tracing::info!(phone = %key.phone, instance = %key.instance, "pending burst cancelled");
        true
    }

    /// Abort every flush task and discard all buffers.
    pub fn shutdown(&self) {
        let drained: Vec<PendingBurst> = self
            .registry
            .bursts
            .lock()
            .drain()
            .map(|(_, burst)| burst)
            .collect();
        for task in drained.into_iter().filter_map(|burst| burst.task) {
            task.handle.abort();
        }
    }

    /// Must be called with the registry lock held, so the new task cannot
    /// observe the slot before it is recorded.
    fn spawn_flush(&self, key: ContactKey) -> LiveTask {
        let generation = self.registry.next_generation.fetch_add(1, Ordering::Relaxed);
        let slot = LiveSlot {
            registry: self.registry.clone(),
            key,
            generation,
            released: false,
        };
        let debouncer = self.clone();
        let handle = tokio::spawn(async move { debouncer.flush(slot).await });
        LiveTask { generation, handle }
    }

    async fn flush(self, slot: LiveSlot) {
        tokio::time::sleep(self.quiet_period).await;

        let fragments = self.registry.take_fragments(&slot.key);
        if !fragments.is_empty() {
            let key = &slot.key;
            tracing::debug!(
                phone = %key.phone,
                instance = %key.instance,
                fragments = fragments.len(),
                "flushing burst"
            );
            if let Err(error) = self.handler.handle_burst(key, fragments.join(" ")).await {
                tracing::error!(%error, phone = %key.phone, instance = %key.instance, "turn failed");
            }
        }

        self.release(slot);
    }

    /// Normal completion: free the slot, or hand it to a fresh flush when
    /// fragments arrived while the turn was running.
    fn release(&self, mut slot: LiveSlot) {
        slot.released = true;

        let mut bursts = self.registry.bursts.lock();
        let leftover = match bursts.get(&slot.key) {
            Some(burst) if burst.is_owned_by(slot.generation) => !burst.fragments.is_empty(),
            _ => return,
        };

        if !leftover {
            bursts.remove(&slot.key);
            return;
        }

        let task = self.spawn_flush(slot.key.clone());
        if let Some(burst) = bursts.get_mut(&slot.key) {
            burst.task = Some(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<(ContactKey, String, Instant)>>,
        turn_duration: Duration,
        fail: bool,
    }

    impl RecordingHandler {
        fn inputs(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(_, input, _)| input.clone()).collect()
        }
    }

    #[async_trait]
    impl BurstHandler for RecordingHandler {
        async fn handle_burst(&self, key: &ContactKey, input: String) -> Result<()> {
            self.calls.lock().push((key.clone(), input, Instant::now()));
            tokio::time::sleep(self.turn_duration).await;
            if self.fail {
                return Err(Error::Other(anyhow::anyhow!("assistant unavailable")));
            }
            Ok(())
        }
    }

    fn debouncer(handler: Arc<RecordingHandler>) -> Debouncer {
        Debouncer::new(handler, DebounceConfig::default())
    }

    fn key() -> ContactKey {
        ContactKey::new("5511999999999", "loja")
    }

    async fn sleep_secs(secs: f64) {
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn fragments_within_quiet_period_are_joined_in_order() {
        let handler = Arc::new(RecordingHandler::default());
        let debouncer = debouncer(handler.clone());

        assert!(debouncer.enqueue(key(), "Oi"));
        sleep_secs(2.0).await;
        assert!(!debouncer.enqueue(key(), "preciso de ajuda"));
        sleep_secs(10.0).await;

        assert_eq!(handler.inputs(), vec!["Oi preciso de ajuda"]);
        assert!(debouncer.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_enqueues_share_one_task() {
        let handler = Arc::new(RecordingHandler::default());
        let debouncer = debouncer(handler.clone());

        let scheduled: Vec<bool> = (0..10)
            .map(|index| debouncer.enqueue(key(), format!("m{index}")))
            .collect();

        assert_eq!(scheduled.iter().filter(|scheduled| **scheduled).count(), 1);
        assert_eq!(debouncer.registry().live_task_count(), 1);

        sleep_secs(6.0).await;
        assert_eq!(handler.inputs(), vec!["m0 m1 m2 m3 m4 m5 m6 m7 m8 m9"]);
        assert_eq!(debouncer.registry().live_task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_period_is_not_reset_by_new_fragments() {
        let handler = Arc::new(RecordingHandler::default());
        let debouncer = debouncer(handler.clone());
        let start = Instant::now();

        debouncer.enqueue(key(), "primeira");
        sleep_secs(4.9).await;
        debouncer.enqueue(key(), "segunda");
        sleep_secs(1.0).await;

        let calls = handler.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "primeira segunda");
        let fired_after = calls[0].2 - start;
        assert!(fired_after >= Duration::from_secs(5) && fired_after < Duration::from_millis(5100));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let handler = Arc::new(RecordingHandler::default());
        let debouncer = debouncer(handler.clone());
        let other = ContactKey::new("5511888888888", "loja");

        assert!(debouncer.enqueue(key(), "a"));
        assert!(debouncer.enqueue(other.clone(), "b"));
        assert_eq!(debouncer.registry().live_task_count(), 2);
        sleep_secs(6.0).await;

        let mut calls: Vec<(String, String)> = handler
            .calls
            .lock()
            .iter()
            .map(|(key, input, _)| (key.phone.clone(), input.clone()))
            .collect();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                ("5511888888888".to_string(), "b".to_string()),
                ("5511999999999".to_string(), "a".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_buffer_and_task() {
        let handler = Arc::new(RecordingHandler::default());
        let debouncer = debouncer(handler.clone());

        debouncer.enqueue(key(), "Oi");
        assert!(debouncer.cancel(&key()));
        sleep_secs(10.0).await;

        assert!(handler.inputs().is_empty());
        assert!(debouncer.registry().is_empty());
        assert!(!debouncer.cancel(&key()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_turn_releases_slot() {
        let handler = Arc::new(RecordingHandler {
            turn_duration: Duration::from_secs(30),
            ..Default::default()
        });
        let debouncer = debouncer(handler.clone());

        debouncer.enqueue(key(), "Oi");
        sleep_secs(6.0).await;
        assert_eq!(handler.inputs().len(), 1);
        assert!(debouncer.registry().has_live_task(&key()));

        debouncer.cancel(&key());
        sleep_secs(1.0).await;

        assert!(debouncer.registry().is_empty());
        assert!(debouncer.enqueue(key(), "de novo"));
    }

    #[tokio::test(start_paused = true)]
    async fn handler_error_is_contained_and_slot_released() {
        let handler = Arc::new(RecordingHandler {
            fail: true,
            ..Default::default()
        });
        let debouncer = debouncer(handler.clone());

        debouncer.enqueue(key(), "um");
        sleep_secs(6.0).await;
        assert!(debouncer.registry().is_empty());

        assert!(debouncer.enqueue(key(), "dois"));
        sleep_secs(6.0).await;
        assert_eq!(handler.inputs(), vec!["um", "dois"]);
    }

    #[tokio::test(start_paused = true)]
    async fn fragments_arriving_mid_turn_get_their_own_flush() {
        let handler = Arc::new(RecordingHandler {
            turn_duration: Duration::from_secs(3),
            ..Default::default()
        });
        let debouncer = debouncer(handler.clone());

        debouncer.enqueue(key(), "a");
        sleep_secs(6.0).await;
        // The first turn runs from t=5 to t=8.
        assert!(!debouncer.enqueue(key(), "b"));
        sleep_secs(2.5).await;
        assert_eq!(debouncer.registry().live_task_count(), 1);
        assert_eq!(debouncer.registry().pending_fragments(&key()), vec!["b"]);

        sleep_secs(10.0).await;
        assert_eq!(handler.inputs(), vec!["a", "b"]);
        assert!(debouncer.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_everything() {
        let handler = Arc::new(RecordingHandler::default());
        let debouncer = debouncer(handler.clone());

        debouncer.enqueue(key(), "a");
        debouncer.enqueue(ContactKey::new("5511888888888", "loja"), "b");
        debouncer.shutdown();
        sleep_secs(10.0).await;

        assert!(handler.inputs().is_empty());
        assert!(debouncer.registry().is_empty());
    }
}

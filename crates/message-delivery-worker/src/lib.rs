//! Poll-deliver-confirm loop for outbound messages.
//!
//! The worker periodically fetches pending items from a [`MessageSource`],
//! delivers each over a [`TextSender`], and confirms the terminal outcome
//! back to the source. Every fetched item is confirmed exactly once, even on
//! failure: an unconfirmed item would be re-surfaced by the queue API
//! indefinitely.
//!
//! Both capabilities are injected as trait objects so tests substitute
//! in-memory fakes.

pub mod address;

pub use address::AddressError;

use async_trait::async_trait;
use ops_notifier::{AlertCategory, Notifier};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default delivery-loop poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Default settling pause between consecutive sends.
pub const DEFAULT_SETTLE_PAUSE: Duration = Duration::from_secs(1);

/// One unit of outbound message work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryItem {
    /// Source-assigned identifier, the sole key for confirmation.
    pub id: String,
    /// Raw destination digits as handed out by the queue API.
    pub destination: String,
    /// Message body.
    pub body: String,
}

/// Terminal outcome reported back to the queue API for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Completado,
    Error,
}

impl DeliveryOutcome {
    /// The exact wire string the queue API expects.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Completado => "COMPLETADO",
            DeliveryOutcome::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where pending work comes from and where outcomes are reported.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Fetch the pending items. Must not fail outward; connectivity trouble
    /// maps to an empty list.
    async fn fetch_pending(&self) -> Vec<DeliveryItem>;

    /// Report the terminal outcome for one item. Returns whether the source
    /// accepted the confirmation.
    async fn confirm(&self, id: &str, outcome: DeliveryOutcome, error_text: Option<&str>) -> bool;
}

/// Send capability plus the connectivity state the loop gates on.
#[async_trait]
pub trait TextSender: Send + Sync {
    /// Whether the underlying session is currently connected.
    fn is_connected(&self) -> bool;

    /// Send a text to a normalized address. The error string is forwarded
    /// upstream as the confirmation failure reason.
    async fn send_text(&self, address: &str, body: &str) -> Result<(), String>;
}

/// Delivery loop configuration.
#[derive(Debug, Clone)]
pub struct DeliveryWorkerConfig {
    /// How often a cycle is attempted.
    pub poll_interval: Duration,
    /// Pause between consecutive sends within one cycle.
    pub settle_pause: Duration,
}

impl Default for DeliveryWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            settle_pause: DEFAULT_SETTLE_PAUSE,
        }
    }
}

/// What one cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    /// Items taken through send-and-confirm.
    pub processed: usize,
    /// Items confirmed COMPLETADO.
    pub delivered: usize,
    /// Items confirmed ERROR.
    pub failed: usize,
    /// Whether the cycle broke off early because connectivity dropped.
    pub stopped_early: bool,
}

/// The periodic poll-deliver-confirm worker.
pub struct DeliveryWorker {
    config: DeliveryWorkerConfig,
    source: Arc<dyn MessageSource>,
    sender: Arc<dyn TextSender>,
    notifier: Arc<Notifier>,
    cycle_running: Arc<AtomicBool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl DeliveryWorker {
    /// Create a worker from its injected capabilities.
    pub fn new(
        config: DeliveryWorkerConfig,
        source: Arc<dyn MessageSource>,
        sender: Arc<dyn TextSender>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            config,
            source,
            sender,
            notifier,
            cycle_running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Spawn the loop task.
    ///
    /// A tick is skipped when the previous cycle is still running or the
    /// sender is not connected. The notifier's periodic summary is attempted
    /// after every tick either way.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn start(&self) {
        let mut guard = self.task.lock().expect("lock poisoned");
        assert!(guard.is_none(), "DeliveryWorker already started");

        let config = self.config.clone();
        let source = self.source.clone();
        let sender = self.sender.clone();
        let notifier = self.notifier.clone();
        let cycle_running = self.cycle_running.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                if !sender.is_connected() {
                    debug!("Skipping delivery cycle (not connected)");
                } else if cycle_running.swap(true, Ordering::SeqCst) {
                    debug!("Skipping delivery cycle (previous cycle still running)");
                } else {
                    let stats = run_cycle(
                        source.as_ref(),
                        sender.as_ref(),
                        notifier.as_ref(),
                        config.settle_pause,
                    )
                    .await;
                    cycle_running.store(false, Ordering::SeqCst);

                    if stats.processed > 0 {
                        info!(
                            delivered = stats.delivered,
                            failed = stats.failed,
                            stopped_early = stats.stopped_early,
                            "Delivery cycle finished"
                        );
                    }
                }

                notifier.summary(sender.is_connected()).await;
            }
        });

        *guard = Some(handle);
    }

    /// Halt the loop task. Idempotent; used at shutdown.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().expect("lock poisoned").take() {
            handle.abort();
        }
    }
}

/// Run one poll-deliver-confirm cycle.
///
/// Items are processed in fetch order. Connectivity is rechecked before each
/// send; a mid-cycle drop defers the remaining items to a later cycle
/// without confirming them. Every attempted item is confirmed exactly once.
pub async fn run_cycle(
    source: &dyn MessageSource,
    sender: &dyn TextSender,
    notifier: &Notifier,
    settle_pause: Duration,
) -> CycleStats {
    let items = source.fetch_pending().await;
    let total = items.len();
    let mut stats = CycleStats::default();

    if total > 0 {
        info!(pending = total, "Processing pending messages");
    }

    for (index, item) in items.iter().enumerate() {
        // Connectivity can drop between items.
        if !sender.is_connected() {
            warn!(
                remaining = total - index,
                "Connection lost mid-cycle, deferring remaining items"
            );
            stats.stopped_early = true;
            break;
        }

        stats.processed += 1;
        match deliver_item(item, sender).await {
            Ok(()) => {
                source
                    .confirm(&item.id, DeliveryOutcome::Completado, None)
                    .await;
                notifier.record_sent();
                stats.delivered += 1;
                debug!(id = %item.id, "Message delivered and confirmed");
            }
            Err(reason) => {
                warn!(id = %item.id, reason = %reason, "Message delivery failed");
                // Confirm ERROR too: an unconfirmed item would be re-surfaced
                // by the queue API forever.
                source
                    .confirm(&item.id, DeliveryOutcome::Error, Some(&reason))
                    .await;
                notifier.record_failed();
                notifier
                    .alert(
                        &format!("Fallo al enviar mensaje {}: {}", item.id, reason),
                        AlertCategory::Warning,
                    )
                    .await;
                stats.failed += 1;
            }
        }

        if index + 1 < total {
            sleep(settle_pause).await;
        }
    }

    stats
}

async fn deliver_item(item: &DeliveryItem, sender: &dyn TextSender) -> Result<(), String> {
    let address = address::normalize(&item.destination).map_err(|e| e.to_string())?;
    sender.send_text(&address, &item.body).await
}

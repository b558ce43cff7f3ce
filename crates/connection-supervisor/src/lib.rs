//! Session state machine and reconnection policy for the chat transport.
//!
//! The supervisor owns the chat-network session: it drives the
//! Disconnected → Connecting → Connected lifecycle, recovers from closures
//! with capped exponential backoff, and treats a logged-out signal or
//! exhausted attempts as fatal. Everyone else reads connectivity through a
//! `watch` channel; only the supervisor writes it.

mod error;

pub use error::{SupervisorError, SupervisorResult};

use async_trait::async_trait;
use chat_transport::{ChatTransport, SendReceipt, TransportEvent};
use message_delivery_worker::TextSender;
use ops_notifier::{AlertCategory, Notifier};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

/// Default base delay for reconnection backoff.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(2_000);

/// Default cap on the reconnection backoff delay.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_millis(60_000);

/// Default cap on consecutive reconnection attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default deadline for one message send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the transport event channel.
const EVENT_QUEUE_CAPACITY: usize = 32;

/// Session connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal: credentials invalid or attempts exhausted. The process
    /// exits; a human has to intervene.
    Fatal,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supervisor configuration.
///
/// # Backoff Calculation
///
/// Reconnect delay follows `base * 2^(attempt - 1)` capped at `backoff_cap`.
/// For the defaults (base=2s, cap=60s):
///
/// | Attempt | Delay |
/// |---------|-------|
/// | 1       | 2s    |
/// | 2       | 4s    |
/// | 3       | 8s    |
/// | 4       | 16s   |
/// | 5       | 32s   |
/// | 6+      | 60s (capped) |
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Base duration for exponential backoff between reconnect attempts.
    pub backoff_base: Duration,
    /// Maximum duration for backoff (caps exponential growth).
    pub backoff_cap: Duration,
    /// Consecutive failed attempts tolerated before the session is fatal.
    pub max_attempts: u32,
    /// Deadline for one message send. A send exceeding it is treated as
    /// evidence of a dead connection.
    pub send_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Computes the backoff delay for a given attempt number.
///
/// `delay = base * 2^(attempt - 1)`, capped at `cap`. Attempt 0 yields zero.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis() as u64;
    let cap_ms = cap.as_millis() as u64;
    let multiplier = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(multiplier).min(cap_ms);

    Duration::from_millis(delay_ms)
}

/// Session bookkeeping guarded by one lock: the state and the
/// reconnect-attempt counter. The counter only moves while reconnecting and
/// is reset exactly on entering Connected.
struct SessionInner {
    state: SessionState,
    attempts: u32,
}

/// Shared context cloned into the supervisor's background tasks.
#[derive(Clone)]
struct SupervisorCtx {
    config: SupervisorConfig,
    transport: Arc<dyn ChatTransport>,
    notifier: Arc<Notifier>,
    inner: Arc<Mutex<SessionInner>>,
    state_tx: Arc<watch::Sender<SessionState>>,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl SupervisorCtx {
    fn state(&self) -> SessionState {
        self.inner.lock().expect("lock poisoned").state
    }

    fn publish(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    async fn enter_connected(&self) {
        {
            let mut inner = self.inner.lock().expect("lock poisoned");
            if inner.state == SessionState::Connected {
                return;
            }
            inner.state = SessionState::Connected;
            inner.attempts = 0;
        }
        self.publish(SessionState::Connected);
        info!("Chat session connected");
        self.notifier
            .alert("Sesión de chat conectada", AlertCategory::Success)
            .await;
    }

    /// Enter Reconnecting and kick off the recovery loop.
    ///
    /// Idempotent: re-entry while already Reconnecting (a send timeout
    /// racing the transport's own close signal) is absorbed without a second
    /// attempt increment or duplicate alert. Returns whether a transition
    /// happened.
    async fn enter_reconnecting(&self, detail: &str) -> bool {
        {
            let mut inner = self.inner.lock().expect("lock poisoned");
            if matches!(
                inner.state,
                SessionState::Reconnecting | SessionState::Fatal
            ) {
                debug!(detail, "Already recovering, ignoring transition");
                return false;
            }
            inner.state = SessionState::Reconnecting;
        }
        self.publish(SessionState::Reconnecting);
        warn!(detail, "Chat session lost, scheduling reconnection");
        self.notifier
            .alert(
                &format!("Conexión de chat perdida: {}. Reintentando...", detail),
                AlertCategory::Warning,
            )
            .await;

        let ctx = self.clone();
        tokio::spawn(async move {
            ctx.reconnect_loop().await;
        });
        true
    }

    async fn reconnect_loop(&self) {
        loop {
            let attempt = {
                let mut inner = self.inner.lock().expect("lock poisoned");
                if inner.state != SessionState::Reconnecting {
                    return;
                }
                if inner.attempts >= self.config.max_attempts {
                    None
                } else {
                    inner.attempts += 1;
                    Some(inner.attempts)
                }
            };

            let Some(attempt) = attempt else {
                self.enter_fatal("se agotaron los intentos de reconexión")
                    .await;
                return;
            };

            let delay = backoff_delay(attempt, self.config.backoff_base, self.config.backoff_cap);
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );
            sleep(delay).await;

            {
                let mut inner = self.inner.lock().expect("lock poisoned");
                if inner.state != SessionState::Reconnecting {
                    return;
                }
                inner.state = SessionState::Connecting;
            }
            self.publish(SessionState::Connecting);

            match self.transport.connect(self.events_tx.clone()).await {
                // The transport's Open (or Closed) event decides what
                // happens next.
                Ok(()) => return,
                Err(e) => {
                    warn!(error = %e, attempt, "Reconnect attempt failed");
                    let mut inner = self.inner.lock().expect("lock poisoned");
                    if inner.state != SessionState::Connecting {
                        return;
                    }
                    inner.state = SessionState::Reconnecting;
                    drop(inner);
                    self.publish(SessionState::Reconnecting);
                }
            }
        }
    }

    async fn enter_fatal(&self, detail: &str) {
        {
            let mut inner = self.inner.lock().expect("lock poisoned");
            if inner.state == SessionState::Fatal {
                return;
            }
            inner.state = SessionState::Fatal;
        }
        self.publish(SessionState::Fatal);
        error!(detail, "Chat session is fatal, operator intervention required");
        self.notifier
            .alert(
                &format!(
                    "Sesión de chat en estado fatal: {}. Se requiere intervención manual.",
                    detail
                ),
                AlertCategory::Critical,
            )
            .await;
    }
}

/// Owns the chat-network session and its recovery policy.
pub struct ConnectionSupervisor {
    ctx: SupervisorCtx,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    dispatch_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    /// Create a supervisor over the given transport.
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        notifier: Arc<Notifier>,
        config: SupervisorConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        Self {
            ctx: SupervisorCtx {
                config,
                transport,
                notifier,
                inner: Arc::new(Mutex::new(SessionInner {
                    state: SessionState::Disconnected,
                    attempts: 0,
                })),
                state_tx: Arc::new(state_tx),
                events_tx,
            },
            events_rx: Mutex::new(Some(events_rx)),
            dispatch_task: Mutex::new(None),
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.ctx.state()
    }

    /// Subscribe to session state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.ctx.state_tx.subscribe()
    }

    /// Current consecutive reconnect-attempt count.
    pub fn reconnect_attempts(&self) -> u32 {
        self.ctx.inner.lock().expect("lock poisoned").attempts
    }

    /// Establish the chat session.
    ///
    /// Returns an error when the initial connect fails; recovery is already
    /// scheduled in that case, the caller decides whether to wait or exit.
    pub async fn initialize(&self) -> SupervisorResult<()> {
        {
            let mut inner = self.ctx.inner.lock().expect("lock poisoned");
            if inner.state != SessionState::Disconnected {
                debug!(state = %inner.state, "Already initializing or connected");
                return Ok(());
            }
            inner.state = SessionState::Connecting;
        }
        self.ctx.publish(SessionState::Connecting);
        self.spawn_dispatcher();

        info!("Establishing chat session");
        match self.ctx.transport.connect(self.ctx.events_tx.clone()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Initial connect failed, scheduling recovery");
                self.ctx
                    .enter_reconnecting(&format!("fallo de conexión inicial: {}", e))
                    .await;
                Err(SupervisorError::Transport(e))
            }
        }
    }

    fn spawn_dispatcher(&self) {
        let Some(mut events) = self.events_rx.lock().expect("lock poisoned").take() else {
            return;
        };

        let ctx = self.ctx.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Open => ctx.enter_connected().await,
                    TransportEvent::Closed { reason } if reason.is_logged_out() => {
                        ctx.enter_fatal("sesión cerrada por el servidor (logged-out)")
                            .await;
                    }
                    TransportEvent::Closed { reason } => {
                        ctx.enter_reconnecting(&reason.to_string()).await;
                    }
                    TransportEvent::CredentialsUpdate => {
                        debug!("Transport rotated session credentials");
                    }
                }
            }
        });

        *self.dispatch_task.lock().expect("lock poisoned") = Some(handle);
    }

    /// Send a text over the connected session.
    ///
    /// Fails with [`SupervisorError::TransportUnavailable`] unless the state
    /// is Connected. A send exceeding the configured deadline returns
    /// [`SupervisorError::DeliveryTimeout`] and forces the session into
    /// Reconnecting: a hung send is evidence of a dead connection, and
    /// waiting for the transport's own close signal would stall the loop.
    pub async fn send_text(&self, address: &str, body: &str) -> SupervisorResult<SendReceipt> {
        if self.state() != SessionState::Connected {
            return Err(SupervisorError::TransportUnavailable);
        }

        match timeout(
            self.ctx.config.send_timeout,
            self.ctx.transport.send_text(address, body),
        )
        .await
        {
            Err(_) => {
                warn!(address, "Send timed out, treating session as dead");
                self.note_send_timeout().await;
                Err(SupervisorError::DeliveryTimeout)
            }
            Ok(Err(e)) => Err(SupervisorError::Transport(e)),
            Ok(Ok(receipt)) => Ok(receipt),
        }
    }

    /// Force the session into Reconnecting after a send deadline expired.
    ///
    /// Idempotent with respect to a later transport-originated close for the
    /// same dead session. Returns whether a transition happened.
    pub async fn note_send_timeout(&self) -> bool {
        self.ctx
            .enter_reconnecting("el envío superó el tiempo límite")
            .await
    }

    /// Release the session. Idempotent.
    pub async fn cleanup(&self) {
        self.ctx.transport.disconnect().await;
        if let Some(handle) = self.dispatch_task.lock().expect("lock poisoned").take() {
            handle.abort();
        }
        {
            let mut inner = self.ctx.inner.lock().expect("lock poisoned");
            inner.state = SessionState::Disconnected;
            inner.attempts = 0;
        }
        self.ctx.publish(SessionState::Disconnected);
        info!("Chat session released");
    }
}

#[async_trait]
impl TextSender for ConnectionSupervisor {
    fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    async fn send_text(&self, address: &str, body: &str) -> Result<(), String> {
        ConnectionSupervisor::send_text(self, address, body)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

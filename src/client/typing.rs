//! Typing presence: outgoing debounce and incoming roster expiry
//!
//! The outgoing half emits `typing:start` on the first keystroke and
//! exactly one `typing:stop` when the idle timer fires or a message is
//! sent. The incoming half tracks who is flagged typing and expires
//! stale flags locally, since the server applies no timeout of its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Idle window after the last keystroke before `typing:stop` is emitted
pub const TYPING_DEBOUNCE: Duration = Duration::from_secs(3);

/// How long a peer's typing flag survives without a stop signal
///
/// The fallback for peers that disconnect without signaling stop.
pub const TYPING_TTL: Duration = Duration::from_secs(10);

/// Outgoing typing signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

/// Debounced emitter for the local user's typing signals
///
/// Signals are queued on a channel; the connection owner forwards them
/// as datagrams.
pub struct TypingNotifier {
    signal_tx: mpsc::UnboundedSender<TypingSignal>,
    active: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
    debounce: Duration,
}

impl TypingNotifier {
    pub fn new(signal_tx: mpsc::UnboundedSender<TypingSignal>) -> Self {
        Self {
            signal_tx,
            active: Arc::new(AtomicBool::new(false)),
            timer: None,
            debounce: TYPING_DEBOUNCE,
        }
    }

    /// Override the debounce window
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Whether a start has been emitted without a matching stop
    pub fn is_typing(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Call on every input change; arms or resets the idle timer
    pub fn keystroke(&mut self) {
        if !self.active.swap(true, Ordering::SeqCst) {
            let _ = self.signal_tx.send(TypingSignal::Start);
        }

        if let Some(timer) = self.timer.take() {
            timer.abort();
        }

        let active = Arc::clone(&self.active);
        let signal_tx = self.signal_tx.clone();
        let debounce = self.debounce;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if active.swap(false, Ordering::SeqCst) {
                let _ = signal_tx.send(TypingSignal::Stop);
            }
        }));
    }

    /// Call when a message is sent; emits the stop immediately
    pub fn message_sent(&mut self) {
        self.finish();
    }

    /// Disarm the timer, emitting the pending stop if one is owed
    pub fn finish(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if self.active.swap(false, Ordering::SeqCst) {
            let _ = self.signal_tx.send(TypingSignal::Stop);
        }
    }
}

impl Drop for TypingNotifier {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Who is currently flagged typing in a channel, by username
#[derive(Debug)]
pub struct TypingRoster {
    typists: HashMap<String, Instant>,
    ttl: Duration,
}

impl TypingRoster {
    pub fn new() -> Self {
        Self {
            typists: HashMap::new(),
            ttl: TYPING_TTL,
        }
    }

    /// Override the expiry window
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Flag a peer as typing, refreshing its deadline
    pub fn apply_start(&mut self, username: impl Into<String>) {
        self.typists
            .insert(username.into(), Instant::now() + self.ttl);
    }

    /// Clear a peer's flag; returns whether it was set
    pub fn apply_stop(&mut self, username: &str) -> bool {
        self.typists.remove(username).is_some()
    }

    /// Drop flags whose deadline passed; returns whether anything changed
    ///
    /// This is what clears a peer that disconnected between start and
    /// stop.
    pub fn sweep(&mut self) -> bool {
        let now = Instant::now();
        let before = self.typists.len();
        self.typists.retain(|_, deadline| *deadline > now);
        self.typists.len() != before
    }

    /// Usernames currently flagged, alphabetical
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.typists.keys().cloned().collect();
        names.sort();
        names
    }

    /// Render the indicator; the verb is derived purely from cardinality
    pub fn indicator_line(&self) -> Option<String> {
        let names = self.names();
        match names.len() {
            0 => None,
            1 => Some(format!("{} is typing...", names[0])),
            _ => Some(format!("{} are typing...", names.join(", "))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.typists.is_empty()
    }

    pub fn len(&self) -> usize {
        self.typists.len()
    }
}

impl Default for TypingRoster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, sleep};

    fn drain(rx: &mut mpsc::UnboundedReceiver<TypingSignal>) -> Vec<TypingSignal> {
        let mut signals = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            signals.push(signal);
        }
        signals
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_keystroke_emits_one_start() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut notifier = TypingNotifier::new(tx);

        notifier.keystroke();
        notifier.keystroke();
        notifier.keystroke();

        assert_eq!(drain(&mut rx), vec![TypingSignal::Start]);
        assert!(notifier.is_typing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timer_emits_exactly_one_stop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut notifier = TypingNotifier::new(tx);

        notifier.keystroke();
        drain(&mut rx);

        // Let the armed timer fire
        advance(TYPING_DEBOUNCE + Duration::from_millis(1)).await;
        sleep(Duration::from_millis(1)).await;

        assert_eq!(drain(&mut rx), vec![TypingSignal::Stop]);
        assert!(!notifier.is_typing());

        // Nothing further fires
        advance(TYPING_DEBOUNCE * 2).await;
        sleep(Duration::from_millis(1)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keystrokes_reset_the_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut notifier = TypingNotifier::new(tx);

        notifier.keystroke();

        // Keep typing just inside the window; no stop may fire
        for _ in 0..3 {
            advance(TYPING_DEBOUNCE - Duration::from_millis(100)).await;
            sleep(Duration::from_millis(1)).await;
            notifier.keystroke();
        }
        assert_eq!(drain(&mut rx), vec![TypingSignal::Start]);

        advance(TYPING_DEBOUNCE + Duration::from_millis(1)).await;
        sleep(Duration::from_millis(1)).await;
        assert_eq!(drain(&mut rx), vec![TypingSignal::Stop]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_send_emits_stop_and_disarms_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut notifier = TypingNotifier::new(tx);

        notifier.keystroke();
        drain(&mut rx);

        notifier.message_sent();
        assert_eq!(drain(&mut rx), vec![TypingSignal::Stop]);

        // The aborted timer must not double-emit
        advance(TYPING_DEBOUNCE * 2).await;
        sleep(Duration::from_millis(1)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_roster_tracks_start_and_stop() {
        let mut roster = TypingRoster::new();

        roster.apply_start("bob");
        assert_eq!(roster.names(), vec!["bob"]);

        assert!(roster.apply_stop("bob"));
        assert!(roster.is_empty());
        assert!(!roster.apply_stop("bob"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_flag_expires_without_a_stop() {
        // A peer that disconnects mid-typing never sends stop; the local
        // timeout heuristic clears the indicator anyway.
        let mut roster = TypingRoster::new();
        roster.apply_start("ghost");

        assert!(!roster.sweep());
        assert_eq!(roster.len(), 1);

        advance(TYPING_TTL + Duration::from_millis(1)).await;
        assert!(roster.sweep());
        assert!(roster.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_indicator_verb_follows_cardinality() {
        let mut roster = TypingRoster::new();
        assert_eq!(roster.indicator_line(), None);

        roster.apply_start("bob");
        assert_eq!(roster.indicator_line().unwrap(), "bob is typing...");

        roster.apply_start("alice");
        assert_eq!(
            roster.indicator_line().unwrap(),
            "alice, bob are typing..."
        );
    }
}

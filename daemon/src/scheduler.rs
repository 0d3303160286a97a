use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::process_monitor::ProcessLister;
use crate::publisher::Publisher;
use crate::resolver::{resolve, RandomPicker};
use crate::snapshot::{normalize, ProcessSnapshot};
use crate::status::{ResolvedStatus, StatusCandidate, StatusConfig};

/// Number of poll intervals a published status stays valid for.
pub const EXPIRY_INTERVALS: u32 = 3;

/// `now + EXPIRY_INTERVALS * poll_interval`.
pub fn expiry_watermark(now: DateTime<Utc>, poll_interval: Duration) -> DateTime<Utc> {
    let margin = TimeDelta::from_std(poll_interval.saturating_mul(EXPIRY_INTERVALS))
        .unwrap_or(TimeDelta::MAX);
    now.checked_add_signed(margin)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// True once shutdown was requested or the sender is gone.
fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    match shutdown.has_changed() {
        Ok(changed) => changed || *shutdown.borrow(),
        Err(_) => true,
    }
}

/// Drives the poll → resolve → publish → sleep cycle.
///
/// Cycles run one after another on a single task. Once shutdown is requested
/// no further cycle starts and a cycle still listing processes is dropped
/// before it publishes; a publish already under way is allowed to finish. The
/// cleared status is then published from the same task, so it is always the
/// last publish. [`Scheduler::run`] consumes the scheduler, which makes the clearing
/// publish happen exactly once.
pub struct Scheduler<P, R> {
    config: StatusConfig,
    lister: Arc<dyn ProcessLister>,
    publisher: P,
    picker: R,
    clock: fn() -> DateTime<Utc>,
}

impl<P, R> Scheduler<P, R>
where
    P: Publisher,
    R: RandomPicker + Send,
{
    pub fn new(config: StatusConfig, lister: Arc<dyn ProcessLister>, publisher: P, picker: R) -> Self {
        Self {
            config,
            lister,
            publisher,
            picker,
            clock: Utc::now,
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs cycles until `shutdown` changes (or its sender is dropped), then
    /// publishes the cleared status.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.config.poll_interval.as_secs(),
            groups = self.config.groups.len(),
            "scheduler started"
        );

        loop {
            if stop_requested(&shutdown) {
                break;
            }
            let status = self.next_status().await;
            // A signal that arrived while listing abandons the cycle before it publishes.
            if stop_requested(&shutdown) {
                break;
            }
            if let Some(status) = status {
                self.publish_status(&status).await;
            }

            let stop = tokio::select! {
                biased;
                _ = shutdown.changed() => true,
                _ = tokio::time::sleep(self.config.poll_interval) => false,
            };
            if stop {
                break;
            }
        }

        self.shutdown().await;
    }

    /// One poll → resolve → publish pass. Returns the status handed to the
    /// publisher, or `None` if resolution failed and nothing was published.
    #[cfg(test)]
    pub async fn run_cycle(&mut self) -> Option<ResolvedStatus> {
        let status = self.next_status().await?;
        self.publish_status(&status).await;
        Some(status)
    }

    /// Lists processes and resolves the status to publish with its expiry.
    async fn next_status(&mut self) -> Option<ResolvedStatus> {
        let snapshot = self.snapshot().await;
        let now = (self.clock)();
        let expires_at = expiry_watermark(now, self.config.poll_interval);

        match resolve(&snapshot, &self.config, &mut self.picker) {
            Ok(candidate) => {
                tracing::debug!(
                    running = snapshot.len(),
                    text = %candidate.text,
                    emoji = %candidate.emoji,
                    %expires_at,
                    "resolved status"
                );
                Some(ResolvedStatus::new(candidate, expires_at))
            }
            Err(e) => {
                tracing::error!("status resolution failed: {e}");
                None
            }
        }
    }

    async fn publish_status(&self, status: &ResolvedStatus) {
        if let Err(e) = self
            .publisher
            .publish(&status.text, &status.emoji, status.expires_at)
            .await
        {
            tracing::warn!("publish failed, retrying next cycle: {e}");
        }
    }

    /// Runs the lister on a blocking thread. A failing lister yields an empty snapshot.
    async fn snapshot(&self) -> ProcessSnapshot {
        let lister = Arc::clone(&self.lister);
        let format = lister.format();
        match tokio::task::spawn_blocking(move || lister.list_processes()).await {
            Ok(Ok(raw)) => {
                let snapshot = normalize(&raw, format);
                if snapshot.is_empty() {
                    tracing::warn!(
                        "process listing yielded no names; check listing.platform and listing.header_lines"
                    );
                }
                snapshot
            }
            Ok(Err(e)) => {
                tracing::warn!("process listing failed: {e:#}");
                ProcessSnapshot::default()
            }
            Err(e) => {
                tracing::warn!("process listing task failed: {e}");
                ProcessSnapshot::default()
            }
        }
    }

    async fn shutdown(self) {
        let cleared = ResolvedStatus::new(&StatusCandidate::cleared(), (self.clock)());
        match self
            .publisher
            .publish(&cleared.text, &cleared.emoji, cleared.expires_at)
            .await
        {
            Ok(()) => tracing::info!("status cleared"),
            Err(e) => tracing::warn!("failed to clear status on shutdown: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::PublishError;
    use crate::snapshot::{ListingFormat, Platform};
    use crate::status::AppGroup;
    use anyhow::{anyhow, Result};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    // ── fakes ─────────────────────────────────────────────────────────────────

    struct FakeLister(Option<&'static str>);

    impl ProcessLister for FakeLister {
        fn list_processes(&self) -> Result<String> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| anyhow!("ps not found"))
        }

        fn format(&self) -> ListingFormat {
            ListingFormat::for_platform(Platform::Posix)
        }
    }

    #[derive(Clone, Default)]
    struct RecordingPublisher {
        calls: Arc<Mutex<Vec<ResolvedStatus>>>,
        fail: bool,
        /// Set by a test right before it requests shutdown.
        signalled: Arc<AtomicBool>,
        /// Regular (non-clearing) publishes seen after `signalled` was set.
        late_regular: Arc<AtomicUsize>,
    }

    impl RecordingPublisher {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<ResolvedStatus> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Publisher for RecordingPublisher {
        async fn publish(
            &self,
            text: &str,
            emoji: &str,
            expires_at: DateTime<Utc>,
        ) -> Result<(), PublishError> {
            if !text.is_empty() && self.signalled.load(Ordering::SeqCst) {
                self.late_regular.fetch_add(1, Ordering::SeqCst);
            }
            self.calls.lock().unwrap().push(ResolvedStatus {
                text: text.to_string(),
                emoji: emoji.to_string(),
                expires_at,
            });
            if self.fail {
                Err(PublishError::RequestFailed("connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct FirstPicker;

    impl RandomPicker for FirstPicker {
        fn pick_index(&mut self, _n: usize) -> usize {
            0
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn config() -> StatusConfig {
        StatusConfig {
            poll_interval: Duration::from_secs(5),
            fallback: StatusCandidate::new("idle", "💤"),
            groups: vec![AppGroup::new(
                ["code"],
                vec![StatusCandidate::new("Coding", "👨‍💻")],
                1,
            )],
        }
    }

    const CODE_RUNNING: &str = "  PID TTY          TIME CMD\n  990 pts/0    00:00:00 code\n";

    fn scheduler(
        listing: Option<&'static str>,
        publisher: RecordingPublisher,
    ) -> Scheduler<RecordingPublisher, FirstPicker> {
        Scheduler::new(config(), Arc::new(FakeLister(listing)), publisher, FirstPicker)
            .with_clock(fixed_now)
    }

    // ── expiry_watermark ──────────────────────────────────────────────────────

    #[test]
    fn expiry_is_three_intervals_ahead() {
        let now = fixed_now();
        assert_eq!(
            expiry_watermark(now, Duration::from_secs(5)),
            now + TimeDelta::seconds(15)
        );
        assert_eq!(
            expiry_watermark(now, Duration::from_secs(60)),
            now + TimeDelta::seconds(180)
        );
    }

    #[test]
    fn expiry_saturates_instead_of_overflowing() {
        let expiry = expiry_watermark(fixed_now(), Duration::from_secs(u64::MAX));
        assert_eq!(expiry, DateTime::<Utc>::MAX_UTC);
    }

    // ── run_cycle ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn cycle_publishes_active_group_with_expiry() {
        let publisher = RecordingPublisher::default();
        let mut s = scheduler(Some(CODE_RUNNING), publisher.clone());

        let status = s.run_cycle().await.unwrap();

        assert_eq!(status.text, "Coding");
        assert_eq!(status.emoji, "👨‍💻");
        assert_eq!(status.expires_at, fixed_now() + TimeDelta::seconds(15));
        assert_eq!(publisher.calls(), vec![status]);
    }

    #[tokio::test]
    async fn cycle_with_nothing_running_publishes_fallback() {
        let publisher = RecordingPublisher::default();
        let mut s = scheduler(Some("  PID TTY TIME CMD\n    1 ? 00:00:01 systemd\n"), publisher.clone());

        let status = s.run_cycle().await.unwrap();
        assert_eq!((status.text.as_str(), status.emoji.as_str()), ("idle", "💤"));
    }

    #[tokio::test]
    async fn lister_failure_degrades_to_fallback() {
        let publisher = RecordingPublisher::default();
        let mut s = scheduler(None, publisher.clone());

        let status = s.run_cycle().await.unwrap();
        assert_eq!(status.text, "idle");
        assert_eq!(publisher.calls().len(), 1);
    }

    #[tokio::test]
    async fn publish_failure_does_not_stop_cycles() {
        let publisher = RecordingPublisher::failing();
        let mut s = scheduler(Some(CODE_RUNNING), publisher.clone());

        assert!(s.run_cycle().await.is_some());
        assert!(s.run_cycle().await.is_some());
        assert_eq!(publisher.calls().len(), 2);
    }

    #[tokio::test]
    async fn resolve_error_skips_publish() {
        let publisher = RecordingPublisher::default();
        let mut cfg = config();
        cfg.groups = vec![AppGroup::new(["code"], Vec::new(), 0)];
        let mut s = Scheduler::new(cfg, Arc::new(FakeLister(Some(CODE_RUNNING))), publisher.clone(), FirstPicker);

        assert!(s.run_cycle().await.is_none());
        assert!(publisher.calls().is_empty());
    }

    // ── run / shutdown ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn shutdown_before_start_only_clears() {
        let publisher = RecordingPublisher::default();
        let s = scheduler(Some(CODE_RUNNING), publisher.clone());
        let (tx, rx) = watch::channel(true);

        s.run(rx).await;
        drop(tx);

        let calls = publisher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].text, "");
        assert_eq!(calls[0].emoji, "");
        assert_eq!(calls[0].expires_at, fixed_now());
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_until_shutdown_then_clears_once() {
        let publisher = RecordingPublisher::default();
        let s = scheduler(Some(CODE_RUNNING), publisher.clone());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(s.run(rx));
        tokio::time::sleep(Duration::from_secs(12)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let calls = publisher.calls();
        let (last, regular) = calls.split_last().unwrap();
        assert!(regular.len() >= 2);
        assert!(regular.iter().all(|c| c.text == "Coding"));
        assert_eq!(last.text, "");
        assert_eq!(calls.iter().filter(|c| c.text.is_empty()).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_shutdown_sender_stops_the_loop() {
        let publisher = RecordingPublisher::default();
        let s = scheduler(Some(CODE_RUNNING), publisher.clone());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(s.run(rx));
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(tx);
        handle.await.unwrap();

        let calls = publisher.calls();
        assert_eq!(calls.last().map(|c| c.text.as_str()), Some(""));
    }

    #[tokio::test]
    async fn shutdown_publish_failure_is_not_fatal() {
        let publisher = RecordingPublisher::failing();
        let s = scheduler(Some(CODE_RUNNING), publisher.clone());
        let (_tx, rx) = watch::channel(true);

        s.run(rx).await;
        assert_eq!(publisher.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn signal_on_sleep_boundary_starts_no_further_cycle() {
        for _ in 0..50 {
            let publisher = RecordingPublisher::default();
            let s = scheduler(Some(CODE_RUNNING), publisher.clone());
            let (tx, rx) = watch::channel(false);

            let handle = tokio::spawn(s.run(rx));
            // Wake up at the same instant the scheduler's sleep elapses.
            tokio::time::sleep(Duration::from_secs(5)).await;
            publisher.signalled.store(true, Ordering::SeqCst);
            tx.send(true).unwrap();
            handle.await.unwrap();

            assert_eq!(publisher.late_regular.load(Ordering::SeqCst), 0);
            assert_eq!(publisher.calls().last().map(|c| c.text.as_str()), Some(""));
        }
    }

    #[tokio::test]
    async fn sender_dropped_before_start_only_clears() {
        let publisher = RecordingPublisher::default();
        let s = scheduler(Some(CODE_RUNNING), publisher.clone());
        let (tx, rx) = watch::channel(false);
        drop(tx);

        s.run(rx).await;

        let calls = publisher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].text, "");
    }
}

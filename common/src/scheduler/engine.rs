// Scheduler engine: periodic due-post detection and publishing

use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::errors::PublishError;
use crate::identity::IdentityProvider;
use crate::lock::PublishLockManager;
use crate::models::{PostStatus, ScheduledPost};
use crate::notify::FailureNotifier;
use crate::publisher::PublishWorkflow;
use crate::record_log::RecordLog;
use crate::record_store::RecordStore;
use crate::status::StatusUpdater;
use crate::telemetry;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Outcome counts for one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub candidates: usize,
    pub published: usize,
    pub already_published: usize,
    /// Lock contention; retried next tick
    pub deferred: usize,
    /// Marked `failed` in the log
    pub failed: usize,
    /// Content went live but the status revision did not
    pub status_update_failed: usize,
    /// No longer eligible when re-read
    pub skipped: usize,
    pub reconciled: usize,
}

impl TickReport {
    /// Candidates that reached the publish workflow
    pub fn attempted(&self) -> usize {
        self.published
            + self.already_published
            + self.deferred
            + self.failed
            + self.status_update_failed
    }
}

/// Scheduler trait for the polling loop
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run ticks until stopped; the first tick runs immediately
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Signal the loop to exit after the in-flight tick
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Run a single pass over due posts
    async fn tick(&self) -> TickReport;
}

fn chrono_duration(duration: std::time::Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::weeks(52))
}

/// True when `post` should be published by `owner` at `now`
pub fn is_eligible(
    post: &ScheduledPost,
    owner: &str,
    now: DateTime<Utc>,
    grace: ChronoDuration,
) -> bool {
    if post.owner != owner || !post.is_awaiting_publish() {
        return false;
    }
    match post.scheduled_instant() {
        Some(at) => at <= now && at >= now - grace,
        None => false,
    }
}

/// Posts due within the trailing grace window, in snapshot order
pub fn select_candidates(
    posts: &[ScheduledPost],
    owner: &str,
    now: DateTime<Utc>,
    grace: ChronoDuration,
) -> Vec<ScheduledPost> {
    posts
        .iter()
        .filter(|post| is_eligible(post, owner, now, grace))
        .cloned()
        .collect()
}

/// Main scheduler engine implementation
///
/// Every piece of cross-tick state lives in the injected store, lock manager
/// and log, so several engines can share the same storage.
pub struct SchedulerEngine {
    config: SchedulerConfig,
    store: Arc<RecordStore>,
    locks: Arc<PublishLockManager>,
    workflow: Arc<PublishWorkflow>,
    status: Arc<StatusUpdater>,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn FailureNotifier>,
    clock: Arc<dyn Clock>,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl SchedulerEngine {
    pub fn new(
        config: SchedulerConfig,
        log: Arc<dyn RecordLog>,
        locks: Arc<PublishLockManager>,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn FailureNotifier>,
    ) -> Self {
        Self::with_clock(config, log, locks, identity, notifier, Arc::new(SystemClock))
    }

    /// The clock should be the one `locks` was built with
    pub fn with_clock(
        config: SchedulerConfig,
        log: Arc<dyn RecordLog>,
        locks: Arc<PublishLockManager>,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn FailureNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(RecordStore::new(Arc::clone(&log)));
        let workflow = Arc::new(PublishWorkflow::new(
            Arc::clone(&locks),
            Arc::clone(&store),
            Arc::clone(&log),
            Arc::clone(&identity),
        ));
        let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel(1);

        Self {
            config,
            store,
            locks,
            workflow,
            status: Arc::new(StatusUpdater::new(log)),
            identity,
            notifier,
            clock,
            shutdown_tx,
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn locks(&self) -> &Arc<PublishLockManager> {
        &self.locks
    }

    pub fn workflow(&self) -> &Arc<PublishWorkflow> {
        &self.workflow
    }

    pub fn status_updater(&self) -> &Arc<StatusUpdater> {
        &self.status
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Repair posts whose content is live but whose status revision is missing
    async fn reconcile(&self, owner: &str, now: DateTime<Utc>) -> usize {
        let settle = chrono_duration(self.config.lock_timeout());
        let mut repaired = 0;

        for post in self.store.snapshot() {
            if post.owner != owner || !post.is_awaiting_publish() {
                continue;
            }
            if !post.scheduled_instant().is_some_and(|at| at <= now) {
                continue;
            }
            let Some(entry) = self.locks.published_entry(&post.id, owner).await else {
                continue;
            };
            if now - entry.recorded_at < settle {
                debug!(post_id = %post.id, "Published-cache entry still settling");
                continue;
            }

            match self.workflow.reconcile(&post).await {
                Ok(Some(_)) => {
                    repaired += 1;
                    telemetry::record_post_reconciled();
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(post_id = %post.id, error = %e, "Reconciliation deferred");
                }
            }
        }

        repaired
    }

    /// Route a workflow failure into the report, the log and the notifier
    async fn handle_failure(
        &self,
        post: &ScheduledPost,
        error: PublishError,
        report: &mut TickReport,
    ) {
        match &error {
            PublishError::AlreadyPublished { content_id } => {
                debug!(post_id = %post.id, content_id = ?content_id, "Post already published");
                report.already_published += 1;
            }
            PublishError::StatusUpdatePublishFailed { content_id, reason } => {
                error!(
                    post_id = %post.id,
                    content_id = %content_id,
                    reason = %reason,
                    "Content published but status revision failed"
                );
                telemetry::record_post_failed(error.kind());
                report.status_update_failed += 1;
            }
            e if e.is_transient() => {
                info!(post_id = %post.id, reason = e.kind(), "Publish deferred to next tick");
                telemetry::record_post_deferred(e.kind());
                report.deferred += 1;
            }
            e if e.marks_failed() => {
                error!(post_id = %post.id, error = %e, "Scheduled post failed");
                telemetry::record_post_failed(e.kind());
                report.failed += 1;

                let target = self.store.cached(&post.id).unwrap_or_else(|| post.clone());
                if target.status == PostStatus::Scheduled {
                    match self.status.mark_failed(&target).await {
                        Ok(record) => self.store.observe(&record),
                        Err(update_error) => {
                            error!(
                                post_id = %post.id,
                                error = %update_error,
                                "Failed to publish failed status revision"
                            );
                        }
                    }
                }
                self.notifier.post_failed(post, e).await;
            }
            e => {
                warn!(post_id = %post.id, error = %e, "Unhandled publish outcome");
            }
        }
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            session = %self.locks.session(),
            "Starting scheduler engine"
        );

        let mut poll_interval = interval(self.config.poll_interval());
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    let report = self.tick().await;
                    if report.attempted() > 0 || report.reconciled > 0 {
                        info!(?report, "Scheduler tick finished");
                    } else {
                        debug!("No scheduled posts due");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        info!("Scheduler engine stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Stopping scheduler engine");
        // No receiver means the loop already exited
        let _ = self.shutdown_tx.send(());
        Ok(())
    }

    #[instrument(skip(self), fields(session = %self.locks.session()))]
    async fn tick(&self) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();

        let Some(owner) = self.identity.owner() else {
            warn!("No signed-in owner, skipping tick");
            self.notifier.authentication_required().await;
            return report;
        };

        if let Err(e) = self.store.refresh(Some(&owner)).await {
            warn!(error = %e, "Scheduled-post refresh failed, using previous snapshot");
        }

        self.locks.cleanup().await;

        let now = self.clock.now();
        let grace = chrono_duration(self.config.grace_window());

        report.reconciled = self.reconcile(&owner, now).await;

        let candidates = select_candidates(&self.store.snapshot(), &owner, now, grace);
        report.candidates = candidates.len();
        telemetry::update_due_posts(candidates.len());

        for candidate in &candidates {
            let current = match self.store.cached(&candidate.id) {
                Some(current) if is_eligible(&current, &owner, now, grace) => current,
                _ => {
                    debug!(post_id = %candidate.id, "Candidate no longer eligible");
                    report.skipped += 1;
                    continue;
                }
            };

            match self.workflow.publish(&current).await {
                Ok(published) => {
                    info!(
                        post_id = %current.id,
                        content_id = %published.content_id,
                        "Scheduled post published"
                    );
                    telemetry::record_post_published(current.post_kind);
                    report.published += 1;
                }
                Err(PublishError::AuthenticationRequired) => {
                    warn!("Owner signed out mid-tick, stopping");
                    self.notifier.authentication_required().await;
                    break;
                }
                Err(e) => self.handle_failure(&current, e, &mut report).await,
            }
        }

        if report.candidates > 0 || report.reconciled > 0 {
            if let Err(e) = self.store.refresh(Some(&owner)).await {
                warn!(error = %e, "Post-tick refresh failed");
            }
            self.store
                .schedule_refresh(Some(owner), self.config.refresh_delay());
        }

        telemetry::record_tick_duration(started.elapsed().as_secs_f64());
        report
    }
}

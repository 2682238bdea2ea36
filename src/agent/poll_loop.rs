//! # Poll Loop
//!
//! The sync agent's tick algorithm (§4.3). A simple blocking loop with a
//! timer is sufficient here (§9 "Coroutine-shaped agent loop") — no
//! event-loop abstraction is needed because exactly one tick runs at a
//! time and every suspension point is already an `.await`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::AgentConfig;
use crate::crd::{
    DesignerSessionPolicy, FileChangeCounts, GatewayStatusEntry, MetadataDocument,
    ResolvedProfile, SyncState,
};
use crate::git;
use crate::sync::{SyncEngine, SyncReport, TemplateContext};

use super::gateway_client::GatewayClient;
use super::metadata_reader::{MetadataReadError, MetadataReader};
use super::metrics;
use super::status_publisher::StatusPublisher;

/// Fixed backoff schedule for transient git fetch/clone failures (§4.3
/// step 3), distinct from the controller's Fibonacci schedule because the
/// contract here names an exact sequence rather than a growth rule.
const GIT_BACKOFF_SCHEDULE: [Duration; 4] = [
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(120),
    Duration::from_secs(300),
];

const DESIGNER_WAIT_BUDGET: Duration = Duration::from_secs(5 * 60);

/// How stale the last observed metadata document may be before the
/// liveness probe reports unhealthy: `2 * syncPeriod` (§4.3
/// "Observability").
const LIVENESS_STALENESS_FACTOR: u32 = 2;

/// Bound on how far back `commit_history` remembers applied commits.
const COMMIT_HISTORY_CAP: usize = 50;

pub struct PollLoop {
    config: AgentConfig,
    metadata_reader: MetadataReader,
    status_publisher: StatusPublisher,
    gateway_client: GatewayClient,
    sync_engine: SyncEngine,
    gateway_key: String,
    namespace: String,

    last_synced_commit: Option<String>,
    git_backoff_index: usize,
    designer_wait_started: Option<Instant>,

    /// Commits this gateway has applied, oldest first, capped at
    /// `COMMIT_HISTORY_CAP`. Used to recognize a published commit that has
    /// already been applied earlier, as opposed to one that is genuinely
    /// new (§9 "rollback").
    commit_history: Vec<String>,
    /// The metadata document's `generation` as of the last applied commit.
    last_seen_generation: Option<i64>,

    is_ready: Arc<AtomicBool>,
    is_alive: Arc<AtomicBool>,
    last_metadata_observed: Option<Instant>,
}

impl PollLoop {
    #[must_use]
    pub fn new(
        config: AgentConfig,
        client: kube::Client,
        is_ready: Arc<AtomicBool>,
        is_alive: Arc<AtomicBool>,
    ) -> anyhow::Result<Self> {
        let gateway_key = config
            .gateway_name
            .clone()
            .unwrap_or_else(|| config.pod_name.clone());
        let gateway_client =
            GatewayClient::new(config.gateway_base_url.clone(), config.gateway_api_token.clone())?;
        let sync_engine = SyncEngine::new(config.live_root.clone());
        let metadata_reader =
            MetadataReader::new(client.clone(), &config.pod_namespace, &config.metadata_configmap);
        let status_publisher = StatusPublisher::new(
            client,
            &config.pod_namespace,
            &config.status_configmap,
            &gateway_key,
        );

        Ok(Self {
            namespace: config.pod_namespace.clone(),
            gateway_key,
            config,
            metadata_reader,
            status_publisher,
            gateway_client,
            sync_engine,
            last_synced_commit: None,
            git_backoff_index: 0,
            designer_wait_started: None,
            commit_history: Vec::new(),
            last_seen_generation: None,
            is_ready,
            is_alive,
            last_metadata_observed: None,
        })
    }

    /// Recovers in-memory state (last synced commit) from this gateway's
    /// previously published status entry, so a restart does not re-sync a
    /// commit it has already applied.
    pub async fn recover(&mut self) {
        match self.status_publisher.read_own_entry().await {
            Ok(Some(entry)) if entry.sync_state == SyncState::Synced => {
                self.last_synced_commit = entry.synced_commit;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to recover prior status entry, starting fresh"),
        }
    }

    /// Runs the tick loop until `shutdown_rx` reports `true`. Does not
    /// start a new tick once shutdown is requested; the in-flight-sync
    /// deadline (§4.3 "Shutdown") is enforced by the caller wrapping this
    /// future in a timeout after flipping the sender.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut sync_period = Duration::from_secs(30);
        let mut ticker = interval(sync_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("shutdown requested, no further ticks will start");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let outcome = self.run_one_tick().await;
                    if let Some(new_period) = outcome {
                        if new_period != sync_period {
                            sync_period = new_period;
                            ticker = interval(sync_period);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        }
                    }
                }
            }
        }
    }

    /// Runs exactly one tick. Returns the profile's configured sync period
    /// when known, so the caller can re-arm the ticker to match it.
    async fn run_one_tick(&mut self) -> Option<Duration> {
        let tick_start = Instant::now();

        if let Ok(()) = self.gateway_client.health().await {
            self.is_ready.store(true, Ordering::Relaxed);
        }

        let metadata = match self.metadata_reader.read().await {
            Ok(doc) => {
                self.last_metadata_observed = Some(Instant::now());
                self.update_liveness(None);
                doc
            }
            Err(MetadataReadError::Missing(_)) => {
                error!("metadata document unavailable");
                metrics::increment_skipped("metadata_unavailable");
                self.publish_error("MetadataUnavailable", "metadata document not found")
                    .await;
                return None;
            }
            Err(MetadataReadError::Malformed(_, e)) => {
                error!(error = %e, "metadata document malformed");
                metrics::increment_skipped("metadata_unavailable");
                self.publish_error("MetadataUnavailable", &format!("malformed metadata: {e}"))
                    .await;
                return None;
            }
            Err(e) => {
                error!(error = %e, "could not read metadata document");
                metrics::increment_skipped("metadata_unavailable");
                self.publish_error("MetadataUnavailable", &e.to_string())
                    .await;
                return None;
            }
        };

        let sync_period = Duration::from_secs(u64::from(
            metadata
                .profiles
                .get(&self.config.profile_name)
                .map_or(30, |p| p.sync_period_seconds.clamp(5, 3600)),
        ));

        let Some(profile) = metadata.profiles.get(&self.config.profile_name).cloned() else {
            warn!(profile = %self.config.profile_name, "profile not present in metadata document");
            metrics::increment_skipped("profile_error");
            self.publish_skip("profile_error", &metadata).await;
            return Some(sync_period);
        };

        if profile.paused {
            info!(profile = %self.config.profile_name, "profile paused, skipping tick");
            metrics::increment_skipped("paused");
            self.publish_skip("paused", &metadata).await;
            return Some(sync_period);
        }

        match self.evaluate_designer_sessions(&profile).await {
            DesignerOutcome::Proceed => {}
            DesignerOutcome::Skip => {
                metrics::increment_skipped("designer_blocked");
                self.publish_skip("designer_blocked", &metadata).await;
                return Some(sync_period);
            }
            DesignerOutcome::Abort => {
                metrics::increment_sync_errors("designer_blocked");
                self.publish_error("DesignerBlocked", "designer session policy is fail")
                    .await;
                return Some(sync_period);
            }
        }

        if self.last_synced_commit.as_deref() == Some(metadata.commit.as_str()) {
            info!(commit = %metadata.commit, "commit unchanged since last sync, skipping");
            metrics::increment_skipped("commit_unchanged");
            self.publish_skip("commit_unchanged", &metadata).await;
            return Some(sync_period);
        }

        if self.is_suspected_rollback(&metadata) {
            warn!(
                commit = %metadata.commit,
                generation = metadata.generation,
                "published commit was already applied earlier and the record's generation \
                 has not changed, refusing to follow it back (§9 rollback guard)"
            );
            metrics::increment_skipped("rollback_refused");
            self.publish_skip("rollback_refused", &metadata).await;
            return Some(sync_period);
        }

        let effective_commit = match self.resolve_effective_commit(&metadata).await {
            Ok(commit) => commit,
            Err(()) => return Some(sync_period),
        };

        let fetch_start = Instant::now();
        if let Err(()) = self.fetch_or_clone(&metadata.repo_url, &effective_commit).await {
            return Some(sync_period);
        }
        metrics::observe_git_fetch_duration(fetch_start.elapsed().as_secs_f64());
        self.git_backoff_index = 0;

        let ctx = TemplateContext {
            gateway_name: self.gateway_key.clone(),
            cr_name: self.config.cr_name.clone(),
            namespace: self.namespace.clone(),
            labels: self.config.labels.clone(),
            r#ref: metadata.r#ref.clone(),
            commit: effective_commit.clone(),
            vars: profile.variables.clone(),
        };

        let mut exclude_patterns = metadata.exclude_patterns.clone();
        exclude_patterns.extend(profile.exclude_patterns.clone());

        let report = match self
            .sync_engine
            .sync(
                &self.config.clone_root,
                &profile.mappings,
                &exclude_patterns,
                &ctx,
                profile.dry_run,
            )
            .await
        {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "sync engine failed");
                metrics::increment_sync_errors("sync_consistency");
                self.publish_error("SyncFailed", &e.to_string()).await;
                return Some(sync_period);
            }
        };

        metrics::increment_files_changed("added", report.added);
        metrics::increment_files_changed("modified", report.modified);
        metrics::increment_files_changed("deleted", report.deleted);

        let mut designer_sessions_blocked = false;
        if !profile.dry_run {
            let scan_start = Instant::now();
            if let Err(e) = self.gateway_client.scan().await {
                warn!(error = %e, "gateway scan failed");
                metrics::increment_sync_errors("scan");
                self.publish_error("ScanFailed", &e.to_string()).await;
                return Some(sync_period);
            }
            metrics::observe_scan_duration(scan_start.elapsed().as_secs_f64());
        } else {
            designer_sessions_blocked = self.designer_wait_started.is_some();
        }

        self.last_synced_commit = Some(effective_commit.clone());
        self.commit_history.push(effective_commit.clone());
        if self.commit_history.len() > COMMIT_HISTORY_CAP {
            self.commit_history.remove(0);
        }
        self.last_seen_generation = Some(metadata.generation);
        metrics::set_last_success_now();
        metrics::observe_sync_duration(tick_start.elapsed().as_secs_f64());

        self.publish_synced(
            &metadata,
            &profile,
            &effective_commit,
            &report,
            designer_sessions_blocked,
            tick_start.elapsed(),
        )
        .await;

        Some(sync_period)
    }

    async fn resolve_effective_commit(&self, metadata: &MetadataDocument) -> Result<String, ()> {
        let Some(r#ref) = &self.config.ref_override else {
            return Ok(metadata.commit.clone());
        };
        match git::resolve(&metadata.repo_url, r#ref).await {
            Ok(resolved) => {
                if resolved.commit_id != metadata.commit {
                    warn!(
                        published = %metadata.commit,
                        overridden = %resolved.commit_id,
                        "syncing ref-override commit, diverging from published metadata (advisory RefSkew)"
                    );
                }
                Ok(resolved.commit_id)
            }
            Err(e) => {
                error!(error = %e, "failed to resolve ref-override");
                metrics::increment_sync_errors("ref_override");
                Err(())
            }
        }
    }

    async fn fetch_or_clone(&mut self, repo_url: &str, commit: &str) -> Result<(), ()> {
        match git::ensure_checked_out(repo_url, commit, &self.config.clone_root).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => {
                let delay = GIT_BACKOFF_SCHEDULE
                    [self.git_backoff_index.min(GIT_BACKOFF_SCHEDULE.len() - 1)];
                self.git_backoff_index =
                    (self.git_backoff_index + 1).min(GIT_BACKOFF_SCHEDULE.len() - 1);
                warn!(error = %e, delay = ?delay, "transient git failure, backing off");
                metrics::increment_sync_errors("git_transient");
                self.publish_error("GitFetchFailed", &e.to_string()).await;
                tokio::time::sleep(delay).await;
                Err(())
            }
            Err(e) => {
                error!(error = %e, "permanent git failure");
                metrics::increment_sync_errors("git_permanent");
                self.publish_error("GitFetchFailed", &e.to_string()).await;
                Err(())
            }
        }
    }

    async fn evaluate_designer_sessions(&mut self, profile: &ResolvedProfile) -> DesignerOutcome {
        let sessions = match self.gateway_client.active_designer_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "designer session probe failed, proceeding as if empty");
                return DesignerOutcome::Proceed;
            }
        };

        if sessions.is_empty() {
            self.designer_wait_started = None;
            return DesignerOutcome::Proceed;
        }

        match profile.designer_session_policy {
            DesignerSessionPolicy::Proceed => {
                info!(count = sessions.len(), "designer sessions active, proceeding per policy");
                DesignerOutcome::Proceed
            }
            DesignerSessionPolicy::Fail => DesignerOutcome::Abort,
            DesignerSessionPolicy::Wait => {
                let started = *self.designer_wait_started.get_or_insert_with(Instant::now);
                if started.elapsed() >= DESIGNER_WAIT_BUDGET {
                    warn!("designer-session wait budget exhausted, re-evaluating from scratch this tick");
                    self.designer_wait_started = None;
                    DesignerOutcome::Proceed
                } else {
                    DesignerOutcome::Skip
                }
            }
        }
    }

    /// §9 rollback guard: a commit that reappears earlier in this gateway's
    /// applied history, under a generation this agent has already seen, did
    /// not arrive because an operator changed the spec - the most likely
    /// cause is the upstream branch being force-pushed backward. Refuse it;
    /// a genuine intentional rollback bumps the record's generation (e.g.
    /// editing `gitSource.ref`), which clears this guard.
    fn is_suspected_rollback(&self, metadata: &MetadataDocument) -> bool {
        let seen_before = self.commit_history.iter().any(|c| c == &metadata.commit);
        let generation_unchanged = self.last_seen_generation == Some(metadata.generation);
        seen_before && generation_unchanged
    }

    fn update_liveness(&self, override_healthy: Option<bool>) {
        let healthy = override_healthy.unwrap_or_else(|| {
            self.last_metadata_observed.is_some_and(|t| {
                t.elapsed()
                    < Duration::from_secs(30) * LIVENESS_STALENESS_FACTOR
            })
        });
        self.is_alive.store(healthy, Ordering::Relaxed);
    }

    async fn publish_skip(&self, reason: &str, metadata: &MetadataDocument) {
        let entry = GatewayStatusEntry {
            sync_state: SyncState::Pending,
            synced_commit: self.last_synced_commit.clone(),
            synced_ref: Some(metadata.r#ref.clone()),
            last_sync_instant: Some(chrono::Utc::now().to_rfc3339()),
            last_sync_duration_ms: None,
            agent_version: self.config.agent_version.clone(),
            last_scan_result: Some(format!("skipped:{reason}")),
            files_changed: FileChangeCounts::default(),
            projects_synced: Vec::new(),
            error_message: None,
            profile_name: self.config.profile_name.clone(),
            dry_run_diff: None,
            designer_sessions_blocked: reason == "designer_blocked",
        };
        if let Err(e) = self.status_publisher.publish(entry).await {
            error!(error = %e, "failed to publish skipped-tick status");
        }
    }

    async fn publish_error(&self, reason: &str, message: &str) {
        let entry = GatewayStatusEntry {
            sync_state: SyncState::Error,
            synced_commit: self.last_synced_commit.clone(),
            synced_ref: None,
            last_sync_instant: Some(chrono::Utc::now().to_rfc3339()),
            last_sync_duration_ms: None,
            agent_version: self.config.agent_version.clone(),
            last_scan_result: Some(reason.to_string()),
            files_changed: FileChangeCounts::default(),
            projects_synced: Vec::new(),
            error_message: Some(message.to_string()),
            profile_name: self.config.profile_name.clone(),
            dry_run_diff: None,
            designer_sessions_blocked: false,
        };
        if let Err(e) = self.status_publisher.publish(entry).await {
            error!(error = %e, "failed to publish error status");
        }
    }

    async fn publish_synced(
        &self,
        metadata: &MetadataDocument,
        profile: &ResolvedProfile,
        commit: &str,
        report: &SyncReport,
        designer_sessions_blocked: bool,
        tick_duration: Duration,
    ) {
        let counts = FileChangeCounts {
            added: report.added,
            modified: report.modified,
            deleted: report.deleted,
        };
        let entry = GatewayStatusEntry {
            sync_state: SyncState::Synced,
            synced_commit: Some(commit.to_string()),
            synced_ref: Some(metadata.r#ref.clone()),
            last_sync_instant: Some(chrono::Utc::now().to_rfc3339()),
            last_sync_duration_ms: Some(tick_duration.as_millis() as u64),
            agent_version: self.config.agent_version.clone(),
            last_scan_result: Some(if profile.dry_run { "dry_run".to_string() } else { "ok".to_string() }),
            files_changed: if profile.dry_run { FileChangeCounts::default() } else { counts.clone() },
            projects_synced: report.affected_projects.clone(),
            error_message: None,
            profile_name: self.config.profile_name.clone(),
            dry_run_diff: profile.dry_run.then(|| counts.clone()),
            designer_sessions_blocked,
        };
        if let Err(e) = self.status_publisher.publish(entry).await {
            error!(error = %e, "failed to publish synced status");
        }
    }
}

enum DesignerOutcome {
    Proceed,
    Skip,
    Abort,
}

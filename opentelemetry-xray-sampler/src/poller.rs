use crate::client::SamplingClient;
use crate::rule_cache::{RuleCache, TargetUpdate, DEFAULT_TARGETS_POLLING_INTERVAL};
use opentelemetry::{otel_debug, otel_warn};
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;

const RULES_POLLING_JITTER: Duration = Duration::from_secs(5);
const TARGETS_POLLING_JITTER: Duration = Duration::from_millis(100);

/// Releases a single-flight flag when the poll finishes, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn try_begin(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// State shared by the rules and targets pollers of one sampler.
pub(crate) struct PollerContext {
    cache: Arc<RuleCache>,
    client: Arc<dyn SamplingClient>,
    client_id: String,
    rules_in_flight: AtomicBool,
    targets_in_flight: AtomicBool,
}

impl fmt::Debug for PollerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollerContext")
            .field("client", &self.client)
            .field("client_id", &self.client_id)
            .finish()
    }
}

impl PollerContext {
    pub(crate) fn new(
        cache: Arc<RuleCache>,
        client: Arc<dyn SamplingClient>,
        client_id: String,
    ) -> Self {
        PollerContext {
            cache,
            client,
            client_id,
            rules_in_flight: AtomicBool::new(false),
            targets_in_flight: AtomicBool::new(false),
        }
    }

    /// Fetches the rules and merges them into the cache. Returns `false` if
    /// another rules fetch was already running.
    pub(crate) async fn refresh_rules(&self) -> bool {
        let Some(_in_flight) = InFlight::try_begin(&self.rules_in_flight) else {
            otel_debug!(name: "XrayRemoteSampler.RulesPoller.Skipped");
            return false;
        };

        match self.client.get_sampling_rules().await {
            Ok(rules) => {
                otel_debug!(
                    name: "XrayRemoteSampler.RulesPoller.Updated",
                    rules = rules.len()
                );
                self.cache.update_rules(rules);
            }
            Err(err) => {
                otel_warn!(
                    name: "XrayRemoteSampler.RulesPoller.FetchFailed",
                    error = format!("{err}")
                );
            }
        }
        true
    }

    /// Reports statistics, applies the returned targets and, if the service
    /// modified its rules since our last fetch, refreshes them right away.
    ///
    /// Returns `None` if the round trip failed or another targets poll was
    /// already running.
    pub(crate) async fn refresh_targets(&self) -> Option<TargetUpdate> {
        let Some(_in_flight) = InFlight::try_begin(&self.targets_in_flight) else {
            otel_debug!(name: "XrayRemoteSampler.TargetsPoller.Skipped");
            return None;
        };

        let documents = self.cache.statistics_documents(&self.client_id);
        let response = match self.client.get_sampling_targets(documents).await {
            Ok(response) => response,
            Err(err) => {
                otel_warn!(
                    name: "XrayRemoteSampler.TargetsPoller.FetchFailed",
                    error = format!("{err}")
                );
                return None;
            }
        };

        let targets: HashMap<_, _> = response
            .targets
            .into_iter()
            .map(|target| (target.rule_name.clone(), target))
            .collect();
        let update = self
            .cache
            .update_targets(&targets, response.last_rule_modification);

        if update.refresh_rules {
            otel_debug!(name: "XrayRemoteSampler.TargetsPoller.RulesOutdated");
            self.refresh_rules().await;
        }
        Some(update)
    }
}

fn jitter(max: Duration) -> Duration {
    Duration::from_millis(rand::rng().random_range(0..=max.as_millis() as u64))
}

/// Starts both pollers on `handle`. They stop once `shutdown` closes.
pub(crate) fn spawn_pollers(
    handle: &Handle,
    context: Arc<PollerContext>,
    rules_polling_interval: Duration,
    shutdown: watch::Receiver<()>,
) {
    handle.spawn(poll_rules(
        context.clone(),
        rules_polling_interval,
        shutdown.clone(),
    ));
    handle.spawn(poll_targets(context, shutdown));
}

async fn poll_rules(
    context: Arc<PollerContext>,
    interval: Duration,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        context.refresh_rules().await;
        tokio::select! {
            _ = tokio::time::sleep(interval + jitter(RULES_POLLING_JITTER)) => {}
            _ = shutdown.changed() => break,
        }
    }
    otel_debug!(name: "XrayRemoteSampler.RulesPoller.Stopped");
}

async fn poll_targets(context: Arc<PollerContext>, mut shutdown: watch::Receiver<()>) {
    let mut interval = DEFAULT_TARGETS_POLLING_INTERVAL;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval + jitter(TARGETS_POLLING_JITTER)) => {}
            _ = shutdown.changed() => break,
        }
        if let Some(update) = context.refresh_targets().await {
            interval = update.next_polling_interval;
        }
    }
    otel_debug!(name: "XrayRemoteSampler.TargetsPoller.Stopped");
}

use crate::clock::Clock;
use crate::remote::{SamplingRule, SamplingStatisticsDocument, SamplingTarget};
use crate::rule_applier::{ResourceFields, SamplingRuleApplier, SpanFields};
use opentelemetry::{otel_debug, KeyValue};
use opentelemetry_sdk::Resource;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Rules not refreshed for this long are no longer trusted.
pub(crate) const RULE_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
/// Targets polling interval used until the service suggests another one.
pub(crate) const DEFAULT_TARGETS_POLLING_INTERVAL: Duration = Duration::from_secs(10);

/// One published set of appliers, ordered by (priority, rule name).
#[derive(Debug, Default)]
struct Generation {
    appliers: Vec<Arc<SamplingRuleApplier>>,
    last_updated_millis: u64,
}

/// Outcome of applying a batch of targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TargetUpdate {
    /// The service changed rules after our last rules fetch.
    pub(crate) refresh_rules: bool,
    pub(crate) next_polling_interval: Duration,
}

/// Local copy of the sampling rules.
///
/// Readers clone the current generation and scan it without holding the
/// lock. Updates derive the next generation while holding the write lock, so
/// a rules refresh and a targets update never overwrite each other.
#[derive(Debug)]
pub(crate) struct RuleCache {
    generation: RwLock<Arc<Generation>>,
    resource: ResourceFields,
    clock: Arc<dyn Clock>,
}

impl RuleCache {
    pub(crate) fn new(resource: &Resource, clock: Arc<dyn Clock>) -> Self {
        RuleCache {
            generation: RwLock::new(Arc::new(Generation::default())),
            resource: ResourceFields::new(resource),
            clock,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Arc<Generation>> {
        match self.generation.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arc<Generation>> {
        match self.generation.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn current(&self) -> Arc<Generation> {
        self.read().clone()
    }

    pub(crate) fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    pub(crate) fn is_expired(&self) -> bool {
        let last_updated = self.current().last_updated_millis;
        self.now_millis() > last_updated.saturating_add(RULE_CACHE_TTL.as_millis() as u64)
    }

    /// First applier, in (priority, rule name) order, whose rule matches the
    /// span, or the `Default` rule when nothing else does.
    pub(crate) fn matched_rule(&self, attributes: &[KeyValue]) -> Option<Arc<SamplingRuleApplier>> {
        let span = SpanFields::new(attributes);
        self.current()
            .appliers
            .iter()
            .find(|applier| applier.matches(&span, &self.resource) || applier.is_default())
            .cloned()
    }

    /// Replaces the rule set. Appliers of rules that did not change are kept
    /// along with their quota and statistics.
    pub(crate) fn update_rules(&self, rules: Vec<SamplingRule>) {
        let mut generation = self.write();
        let mut seen = HashSet::new();
        let mut appliers = Vec::with_capacity(rules.len());

        for rule in rules {
            if !seen.insert(rule.rule_name.clone()) {
                otel_debug!(
                    name: "XrayRemoteSampler.DuplicateSamplingRule",
                    rule_name = rule.rule_name.as_str()
                );
                continue;
            }
            let applier = generation
                .appliers
                .iter()
                .find(|applier| applier.rule() == &rule)
                .cloned()
                .unwrap_or_else(|| Arc::new(SamplingRuleApplier::new(rule)));
            appliers.push(applier);
        }
        appliers.sort_by(|a, b| {
            (a.rule().priority, &a.rule().rule_name).cmp(&(b.rule().priority, &b.rule().rule_name))
        });

        *generation = Arc::new(Generation {
            appliers,
            last_updated_millis: self.now_millis(),
        });
    }

    /// Snapshots and resets the statistics of every rule.
    pub(crate) fn statistics_documents(&self, client_id: &str) -> Vec<SamplingStatisticsDocument> {
        let timestamp = self.now_millis() / 1000;
        self.current()
            .appliers
            .iter()
            .map(|applier| {
                let statistics = applier.snapshot_statistics();
                SamplingStatisticsDocument {
                    rule_name: applier.rule().rule_name.clone(),
                    client_id: client_id.to_string(),
                    request_count: statistics.request_count,
                    sampled_count: statistics.sampled_count,
                    borrow_count: statistics.borrow_count,
                    timestamp,
                }
            })
            .collect()
    }

    /// Applies targets to the rules they name and reports whether the rule
    /// set itself is stale.
    pub(crate) fn update_targets(
        &self,
        targets: &HashMap<String, SamplingTarget>,
        last_rule_modification: f64,
    ) -> TargetUpdate {
        let mut generation = self.write();

        let appliers = generation
            .appliers
            .iter()
            .map(|applier| match targets.get(&applier.rule().rule_name) {
                Some(target) => {
                    let updated = applier.with_target(target);
                    otel_debug!(
                        name: "XrayRemoteSampler.TargetApplied",
                        rule_name = target.rule_name.as_str(),
                        fixed_rate = target.fixed_rate,
                        reservoir_quota = updated.reservoir_quota().unwrap_or_default()
                    );
                    Arc::new(updated)
                }
                None => applier.clone(),
            })
            .collect();

        let refresh_rules =
            last_rule_modification * 1000.0 > generation.last_updated_millis as f64;
        *generation = Arc::new(Generation {
            appliers,
            last_updated_millis: generation.last_updated_millis,
        });

        let next_polling_interval = targets
            .values()
            .filter_map(|target| target.interval)
            .filter(|interval| *interval > 0)
            .min()
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TARGETS_POLLING_INTERVAL);

        TargetUpdate {
            refresh_rules,
            next_polling_interval,
        }
    }
}

use crate::matcher::{attribute_match, string_value, wildcard_match};
use crate::rate_limit::parent_trace_state;
use crate::remote::{SamplingRule, SamplingTarget, DEFAULT_RULE_NAME};
use crate::reservoir::{Reservoir, ReservoirDecision};
use crate::statistics::{Statistics, StatisticsSnapshot};
use opentelemetry::trace::{SamplingDecision, SamplingResult, SpanKind, TraceId};
use opentelemetry::{Context, Key, KeyValue};
use opentelemetry_sdk::trace::{Sampler, ShouldSample};
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::attribute::{
    HTTP_REQUEST_METHOD, SERVER_ADDRESS, URL_FULL, URL_PATH,
};
use opentelemetry_semantic_conventions::resource::SERVICE_NAME;
use std::sync::Arc;

// Keys outside the stable semantic conventions, or replaced by them but
// still emitted by older instrumentations.
const CLOUD_PLATFORM: &str = "cloud.platform";
const CLOUD_RESOURCE_ID: &str = "cloud.resource_id";
const AWS_ECS_CONTAINER_ARN: &str = "aws.ecs.container.arn";
const AWS_LAMBDA_INVOKED_ARN: &str = "aws.lambda.invoked_arn";
const LEGACY_HTTP_METHOD: &str = "http.method";
const LEGACY_HTTP_HOST: &str = "http.host";
const LEGACY_HTTP_TARGET: &str = "http.target";
const LEGACY_HTTP_URL: &str = "http.url";

/// Rule fields derived from the resource, computed once per cache.
#[derive(Clone, Debug, Default)]
pub(crate) struct ResourceFields {
    service_name: Option<String>,
    service_type: Option<&'static str>,
    resource_arn: Option<String>,
}

impl ResourceFields {
    pub(crate) fn new(resource: &Resource) -> Self {
        let get = |key: &'static str| {
            resource
                .get(&Key::from_static_str(key))
                .and_then(|value| string_value(&value).map(str::to_owned))
        };
        let platform = get(CLOUD_PLATFORM);
        let service_type = platform.as_deref().and_then(xray_origin);
        let resource_arn = match platform.as_deref() {
            Some("aws_ecs") => get(AWS_ECS_CONTAINER_ARN),
            Some("aws_lambda") => get(CLOUD_RESOURCE_ID),
            _ => None,
        };

        ResourceFields {
            service_name: get(SERVICE_NAME),
            service_type,
            resource_arn,
        }
    }
}

// X-Ray names the platform a segment originates from differently than the
// `cloud.platform` resource attribute does.
fn xray_origin(cloud_platform: &str) -> Option<&'static str> {
    match cloud_platform {
        "aws_ec2" => Some("AWS::EC2::Instance"),
        "aws_ecs" => Some("AWS::ECS::Container"),
        "aws_eks" => Some("AWS::EKS::Container"),
        "aws_elastic_beanstalk" => Some("AWS::ElasticBeanstalk::Environment"),
        "aws_lambda" => Some("AWS::Lambda::Function"),
        _ => None,
    }
}

fn attribute<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .and_then(|kv| string_value(&kv.value))
}

/// Rule fields derived from the span, computed once per sampling decision.
#[derive(Debug)]
pub(crate) struct SpanFields<'a> {
    attributes: &'a [KeyValue],
    http_method: Option<&'a str>,
    host: Option<&'a str>,
    url_path: Option<String>,
    invoked_arn: Option<&'a str>,
}

impl<'a> SpanFields<'a> {
    pub(crate) fn new(attributes: &'a [KeyValue]) -> Self {
        let get = |key: &str| attribute(attributes, key);
        SpanFields {
            attributes,
            http_method: get(HTTP_REQUEST_METHOD).or_else(|| get(LEGACY_HTTP_METHOD)),
            host: get(SERVER_ADDRESS).or_else(|| get(LEGACY_HTTP_HOST)),
            url_path: url_path(attributes),
            invoked_arn: get(AWS_LAMBDA_INVOKED_ARN),
        }
    }
}

fn url_path(attributes: &[KeyValue]) -> Option<String> {
    let path =
        attribute(attributes, URL_PATH).or_else(|| attribute(attributes, LEGACY_HTTP_TARGET));
    if let Some(path) = path {
        return Some(path.to_owned());
    }
    attribute(attributes, URL_FULL)
        .or_else(|| attribute(attributes, LEGACY_HTTP_URL))
        .and_then(|full| url::Url::parse(full).ok())
        .map(|url| url.path().to_owned())
}

/// A sampling rule bound to its reservoir, fixed-rate sampler and counters.
///
/// Appliers are immutable once published in the cache: applying a target
/// produces a new applier sharing the statistics of the old one.
#[derive(Debug)]
pub(crate) struct SamplingRuleApplier {
    rule: SamplingRule,
    reservoir: Reservoir,
    fixed_rate: Sampler,
    statistics: Arc<Statistics>,
}

impl SamplingRuleApplier {
    pub(crate) fn new(rule: SamplingRule) -> Self {
        SamplingRuleApplier {
            reservoir: Reservoir::for_rule(rule.reservoir_size),
            fixed_rate: Sampler::TraceIdRatioBased(rule.fixed_rate),
            statistics: Arc::new(Statistics::default()),
            rule,
        }
    }

    pub(crate) fn rule(&self) -> &SamplingRule {
        &self.rule
    }

    pub(crate) fn is_default(&self) -> bool {
        self.rule.rule_name == DEFAULT_RULE_NAME
    }

    pub(crate) fn matches(&self, span: &SpanFields<'_>, resource: &ResourceFields) -> bool {
        let resource_arn = resource.resource_arn.as_deref().or(span.invoked_arn);

        attribute_match(span.attributes, &self.rule.attributes)
            && wildcard_match(&self.rule.resource_arn, resource_arn)
            && wildcard_match(&self.rule.service_name, resource.service_name.as_deref())
            && wildcard_match(&self.rule.service_type, resource.service_type)
            && wildcard_match(&self.rule.host, span.host)
            && wildcard_match(&self.rule.http_method, span.http_method)
            && wildcard_match(&self.rule.url_path, span.url_path.as_deref())
    }

    pub(crate) fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        now_millis: u64,
    ) -> SamplingResult {
        let reservoir = self.reservoir.take(now_millis);
        let result = match reservoir {
            ReservoirDecision::Borrow | ReservoirDecision::Take => SamplingResult {
                decision: SamplingDecision::RecordAndSample,
                attributes: Vec::new(),
                trace_state: parent_trace_state(parent_context),
            },
            ReservoirDecision::NoTake => self.fixed_rate.should_sample(
                parent_context,
                trace_id,
                "",
                &SpanKind::Internal,
                &[],
                &[],
            ),
        };

        self.statistics.record(
            result.decision != SamplingDecision::Drop,
            reservoir == ReservoirDecision::Borrow,
        );
        result
    }

    /// Same rule and statistics, with the reservoir and fixed rate assigned
    /// by `target`.
    pub(crate) fn with_target(&self, target: &SamplingTarget) -> Self {
        let expires_at_millis = target
            .reservoir_quota_ttl
            .map(|ttl_secs| (ttl_secs * 1000.0) as u64);
        SamplingRuleApplier {
            rule: self.rule.clone(),
            reservoir: Reservoir::with_quota(target.reservoir_quota, expires_at_millis),
            fixed_rate: Sampler::TraceIdRatioBased(target.fixed_rate),
            statistics: self.statistics.clone(),
        }
    }

    pub(crate) fn reservoir_quota(&self) -> Option<u32> {
        self.reservoir.quota()
    }

    pub(crate) fn snapshot_statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) const NOW: u64 = 1_700_000_000_000;

    pub(crate) fn rule(name: &str, priority: i64) -> SamplingRule {
        SamplingRule {
            rule_name: name.to_string(),
            priority,
            resource_arn: "*".into(),
            service_name: "*".into(),
            service_type: "*".into(),
            host: "*".into(),
            http_method: "*".into(),
            url_path: "*".into(),
            reservoir_size: 0,
            fixed_rate: 0.0,
            attributes: HashMap::new(),
            version: 1,
        }
    }

    fn resource(pairs: &[(&'static str, &'static str)]) -> ResourceFields {
        ResourceFields::new(
            &Resource::builder_empty()
                .with_attributes(pairs.iter().map(|(k, v)| KeyValue::new(*k, *v)))
                .build(),
        )
    }

    fn rule_matches(
        applier: &SamplingRuleApplier,
        attributes: &[KeyValue],
        resource: &ResourceFields,
    ) -> bool {
        applier.matches(&SpanFields::new(attributes), resource)
    }

    fn decide(applier: &SamplingRuleApplier, now: u64) -> SamplingDecision {
        applier
            .should_sample(None, TraceId::from(u128::from(u64::MAX)), now)
            .decision
    }

    #[test]
    fn matches_http_fields_with_current_and_legacy_keys() {
        let applier = SamplingRuleApplier::new(SamplingRule {
            host: "*.example.com".into(),
            http_method: "GET".into(),
            url_path: "/api/*".into(),
            ..rule("http", 1)
        });
        let fields = ResourceFields::default();

        let current = [
            KeyValue::new("server.address", "www.example.com"),
            KeyValue::new("http.request.method", "get"),
            KeyValue::new("url.path", "/api/users"),
        ];
        assert!(rule_matches(&applier, &current, &fields));

        let legacy = [
            KeyValue::new("http.host", "www.example.com"),
            KeyValue::new("http.method", "GET"),
            KeyValue::new("http.url", "https://www.example.com/api/orders?id=1"),
        ];
        assert!(rule_matches(&applier, &legacy, &fields));

        let wrong_method = [
            KeyValue::new("server.address", "www.example.com"),
            KeyValue::new("http.request.method", "POST"),
            KeyValue::new("url.path", "/api/users"),
        ];
        assert!(!rule_matches(&applier, &wrong_method, &fields));

        // absent fields only match `*`
        assert!(!rule_matches(&applier, &[], &fields));
    }

    #[test]
    fn span_fields_prefer_current_keys() {
        let attributes = [
            KeyValue::new("http.method", "POST"),
            KeyValue::new("http.request.method", "GET"),
            KeyValue::new("http.host", "legacy.example.com"),
            KeyValue::new("server.address", "www.example.com"),
            KeyValue::new("http.target", "/legacy"),
            KeyValue::new("url.path", "/current"),
            KeyValue::new("aws.lambda.invoked_arn", "arn:aws:lambda:us-east-1:1:function:f"),
        ];
        let span = SpanFields::new(&attributes);

        assert_eq!(span.http_method, Some("GET"));
        assert_eq!(span.host, Some("www.example.com"));
        assert_eq!(span.url_path.as_deref(), Some("/current"));
        assert_eq!(span.invoked_arn, Some("arn:aws:lambda:us-east-1:1:function:f"));

        let full_url = [KeyValue::new("url.full", "https://www.example.com/api/users?id=1")];
        assert_eq!(SpanFields::new(&full_url).url_path.as_deref(), Some("/api/users"));

        let unparsable = [KeyValue::new("url.full", "not a url")];
        assert_eq!(SpanFields::new(&unparsable).url_path, None);
    }

    #[test]
    fn matches_resource_fields() {
        let applier = SamplingRuleApplier::new(SamplingRule {
            service_name: "checkout".into(),
            service_type: "AWS::ECS::Container".into(),
            resource_arn: "arn:aws:ecs:*".into(),
            ..rule("ecs", 1)
        });

        let ecs = resource(&[
            ("service.name", "Checkout"),
            ("cloud.platform", "aws_ecs"),
            ("aws.ecs.container.arn", "arn:aws:ecs:us-west-2:123456789012:container/1"),
        ]);
        assert!(rule_matches(&applier, &[], &ecs));

        let ec2 = resource(&[("service.name", "checkout"), ("cloud.platform", "aws_ec2")]);
        assert!(!rule_matches(&applier, &[], &ec2));
    }

    #[test]
    fn lambda_arn_comes_from_resource_or_span() {
        let applier = SamplingRuleApplier::new(SamplingRule {
            resource_arn: "arn:aws:lambda:*:function:orders".into(),
            ..rule("lambda", 1)
        });
        let arn = "arn:aws:lambda:us-east-1:123456789012:function:orders";

        let lambda = resource(&[("cloud.platform", "aws_lambda"), ("cloud.resource_id", arn)]);
        assert!(rule_matches(&applier, &[], &lambda));

        let invoked = [KeyValue::new("aws.lambda.invoked_arn", arn)];
        assert!(rule_matches(&applier, &invoked, &ResourceFields::default()));
    }

    #[test]
    fn span_attributes_must_satisfy_rule_attributes() {
        let applier = SamplingRuleApplier::new(SamplingRule {
            attributes: HashMap::from([("abc".to_string(), "1234".to_string())]),
            ..rule("attrs", 1)
        });
        let fields = ResourceFields::default();

        assert!(rule_matches(&applier, &[KeyValue::new("abc", "1234")], &fields));
        assert!(!rule_matches(&applier, &[KeyValue::new("abc", "4321")], &fields));
        assert!(!rule_matches(&applier, &[KeyValue::new("xyz", "1234")], &fields));
    }

    #[test]
    fn borrows_before_a_target_and_counts_it() {
        let applier = SamplingRuleApplier::new(SamplingRule {
            reservoir_size: 5,
            ..rule("borrow", 1)
        });

        assert_eq!(decide(&applier, NOW), SamplingDecision::RecordAndSample);
        assert_eq!(decide(&applier, NOW), SamplingDecision::Drop);
        assert_eq!(decide(&applier, NOW + 1_000), SamplingDecision::RecordAndSample);

        assert_eq!(
            applier.snapshot_statistics(),
            StatisticsSnapshot {
                request_count: 3,
                sampled_count: 2,
                borrow_count: 2,
            }
        );
        assert_eq!(applier.snapshot_statistics(), StatisticsSnapshot::default());
    }

    #[test]
    fn fixed_rate_decides_once_the_reservoir_is_empty() {
        let applier = SamplingRuleApplier::new(SamplingRule {
            fixed_rate: 1.0,
            ..rule("always", 1)
        });
        assert_eq!(decide(&applier, NOW), SamplingDecision::RecordAndSample);
        assert_eq!(
            applier.snapshot_statistics(),
            StatisticsSnapshot {
                request_count: 1,
                sampled_count: 1,
                borrow_count: 0,
            }
        );
    }

    #[test]
    fn target_replaces_quota_and_rate_but_keeps_statistics() {
        let applier = SamplingRuleApplier::new(SamplingRule {
            reservoir_size: 5,
            ..rule("target", 1)
        });
        decide(&applier, NOW);

        let targeted = applier.with_target(&SamplingTarget {
            rule_name: "target".into(),
            fixed_rate: 0.0,
            reservoir_quota: Some(3),
            reservoir_quota_ttl: Some((NOW / 1000 + 10) as f64),
            interval: None,
        });
        assert_eq!(targeted.rule(), applier.rule());
        assert_eq!(targeted.reservoir_quota(), Some(3));

        let sampled = (0..10)
            .filter(|_| decide(&targeted, NOW) == SamplingDecision::RecordAndSample)
            .count();
        assert_eq!(sampled, 3);

        // the original applier is untouched and both share the counters
        assert_eq!(applier.reservoir_quota(), None);
        assert_eq!(
            applier.snapshot_statistics(),
            StatisticsSnapshot {
                request_count: 11,
                sampled_count: 4,
                borrow_count: 1,
            }
        );
    }

    #[test]
    fn expired_target_quota_falls_back_to_fixed_rate() {
        let applier = SamplingRuleApplier::new(rule("expired", 1)).with_target(&SamplingTarget {
            rule_name: "expired".into(),
            fixed_rate: 0.0,
            reservoir_quota: Some(100),
            reservoir_quota_ttl: Some((NOW / 1000) as f64),
            interval: None,
        });
        assert_eq!(decide(&applier, NOW), SamplingDecision::Drop);
    }
}

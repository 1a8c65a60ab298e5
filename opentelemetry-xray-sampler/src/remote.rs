//! Records of the X-Ray sampling API and their wire format.
//!
//! Payloads are decoded leniently, one record at a time, and converted into
//! strict records. A malformed record is dropped without affecting the rest
//! of the batch. A rules response without its record list is not a rules
//! response at all and fails to decode.

use opentelemetry::otel_debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of the catch-all rule every X-Ray sampling configuration carries.
pub(crate) const DEFAULT_RULE_NAME: &str = "Default";

/// The only rule format version this sampler understands.
const SUPPORTED_RULE_VERSION: i64 = 1;

/// A sampling rule as defined in the sampling service.
///
/// Rules are compared structurally: a rule fetched again with identical
/// content is considered unchanged and keeps its live state.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingRule {
    /// Unique name of the rule.
    pub rule_name: String,
    /// Evaluation order, lower values are evaluated first.
    pub priority: i64,
    /// Pattern for the ARN of the AWS resource running the service.
    pub resource_arn: String,
    /// Pattern for the service name.
    pub service_name: String,
    /// Pattern for the service type (`AWS::EC2::Instance`, ...).
    pub service_type: String,
    /// Pattern for the host name of the request.
    pub host: String,
    /// Pattern for the HTTP method of the request.
    pub http_method: String,
    /// Pattern for the URL path of the request.
    pub url_path: String,
    /// Samples per second requested for this rule across all clients.
    pub reservoir_size: i64,
    /// Fraction of requests sampled once the reservoir is exhausted.
    pub fixed_rate: f64,
    /// Span attribute patterns, all of which must match.
    pub attributes: HashMap<String, String>,
    /// Rule format version.
    pub version: i64,
}

/// A quota assignment computed by the sampling service for one rule.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingTarget {
    /// Rule the target applies to.
    pub rule_name: String,
    /// Fixed rate to use from now on.
    pub fixed_rate: f64,
    /// Samples per second this client may take from the reservoir.
    pub reservoir_quota: Option<u32>,
    /// Expiry of the reservoir quota, in seconds since the epoch.
    pub reservoir_quota_ttl: Option<f64>,
    /// Seconds until the service wants the next statistics report.
    pub interval: Option<u64>,
}

/// Targets returned for one statistics report.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SamplingTargetsResponse {
    /// Targets for the rules the service recomputed.
    pub targets: Vec<SamplingTarget>,
    /// Time of the last rule change in the service, in seconds since the
    /// epoch.
    pub last_rule_modification: f64,
}

/// Statistics reported for one rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SamplingStatisticsDocument {
    /// Rule the counters belong to.
    pub rule_name: String,
    /// Identifier of the reporting sampler.
    #[serde(rename = "ClientID")]
    pub client_id: String,
    /// Decisions made with the rule since the previous report.
    pub request_count: u64,
    /// Decisions that sampled.
    pub sampled_count: u64,
    /// Samples borrowed before a quota was assigned.
    pub borrow_count: u64,
    /// Report time, in whole seconds since the epoch.
    pub timestamp: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct GetSamplingRulesRequest {
    pub(crate) next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct GetSamplingRulesResponse {
    // Required: an empty rule set must be sent as an empty list.
    sampling_rule_records: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SamplingRuleRecord {
    sampling_rule: Option<RawSamplingRule>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawSamplingRule {
    rule_name: Option<String>,
    priority: Option<i64>,
    fixed_rate: Option<f64>,
    reservoir_size: Option<i64>,
    service_name: Option<String>,
    service_type: Option<String>,
    host: Option<String>,
    #[serde(rename = "HTTPMethod")]
    http_method: Option<String>,
    #[serde(rename = "URLPath")]
    url_path: Option<String>,
    #[serde(rename = "ResourceARN")]
    resource_arn: Option<String>,
    version: Option<i64>,
    attributes: Option<HashMap<String, String>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct GetSamplingTargetsRequest<'a> {
    pub(crate) sampling_statistics_documents: &'a [SamplingStatisticsDocument],
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct GetSamplingTargetsResponse {
    #[serde(default)]
    sampling_target_documents: Vec<serde_json::Value>,
    last_rule_modification: Option<f64>,
    unprocessed_statistics: Option<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawSamplingTarget {
    rule_name: Option<String>,
    fixed_rate: Option<f64>,
    reservoir_quota: Option<u32>,
    #[serde(rename = "ReservoirQuotaTTL")]
    reservoir_quota_ttl: Option<f64>,
    interval: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UnprocessedStatistics {
    rule_name: Option<String>,
    error_code: Option<String>,
    message: Option<String>,
}

impl TryFrom<RawSamplingRule> for SamplingRule {
    type Error = &'static str;

    fn try_from(raw: RawSamplingRule) -> Result<Self, Self::Error> {
        let rule_name = raw
            .rule_name
            .filter(|name| !name.is_empty())
            .ok_or("missing RuleName")?;
        let version = raw.version.ok_or("missing Version")?;
        if version != SUPPORTED_RULE_VERSION {
            return Err("unsupported rule Version");
        }
        Ok(SamplingRule {
            rule_name,
            priority: raw.priority.ok_or("missing Priority")?,
            resource_arn: raw.resource_arn.ok_or("missing ResourceARN")?,
            service_name: raw.service_name.ok_or("missing ServiceName")?,
            service_type: raw.service_type.ok_or("missing ServiceType")?,
            host: raw.host.ok_or("missing Host")?,
            http_method: raw.http_method.ok_or("missing HTTPMethod")?,
            url_path: raw.url_path.ok_or("missing URLPath")?,
            reservoir_size: raw.reservoir_size.ok_or("missing ReservoirSize")?,
            fixed_rate: raw.fixed_rate.ok_or("missing FixedRate")?,
            attributes: raw.attributes.unwrap_or_default(),
            version,
        })
    }
}

impl TryFrom<RawSamplingTarget> for SamplingTarget {
    type Error = &'static str;

    fn try_from(raw: RawSamplingTarget) -> Result<Self, Self::Error> {
        Ok(SamplingTarget {
            rule_name: raw
                .rule_name
                .filter(|name| !name.is_empty())
                .ok_or("missing RuleName")?,
            fixed_rate: raw.fixed_rate.ok_or("missing FixedRate")?,
            reservoir_quota: raw.reservoir_quota,
            reservoir_quota_ttl: raw.reservoir_quota_ttl,
            interval: raw.interval,
        })
    }
}

impl GetSamplingRulesResponse {
    pub(crate) fn into_rules(self) -> Vec<SamplingRule> {
        self.sampling_rule_records
            .into_iter()
            .filter_map(|record| {
                let parsed = serde_json::from_value::<SamplingRuleRecord>(record)
                    .map_err(|_| "undecodable record")
                    .and_then(|record| record.sampling_rule.ok_or("missing SamplingRule"))
                    .and_then(SamplingRule::try_from);
                match parsed {
                    Ok(rule) => Some(rule),
                    Err(reason) => {
                        otel_debug!(
                            name: "XrayRemoteSampler.SkippedSamplingRule",
                            reason = reason
                        );
                        None
                    }
                }
            })
            .collect()
    }
}

impl GetSamplingTargetsResponse {
    pub(crate) fn into_response(self) -> SamplingTargetsResponse {
        for entry in self.unprocessed_statistics.into_iter().flatten() {
            match serde_json::from_value::<UnprocessedStatistics>(entry) {
                Ok(unprocessed) => {
                    otel_debug!(
                        name: "XrayRemoteSampler.UnprocessedStatistics",
                        rule_name = unprocessed.rule_name.as_deref().unwrap_or_default(),
                        error_code = unprocessed.error_code.as_deref().unwrap_or_default(),
                        message = unprocessed.message.as_deref().unwrap_or_default()
                    );
                }
                Err(_) => {
                    otel_debug!(
                        name: "XrayRemoteSampler.SkippedUnprocessedStatistics",
                        reason = "undecodable entry"
                    );
                }
            }
        }

        let targets = self
            .sampling_target_documents
            .into_iter()
            .filter_map(|document| {
                let parsed = serde_json::from_value::<RawSamplingTarget>(document)
                    .map_err(|_| "undecodable target")
                    .and_then(SamplingTarget::try_from);
                match parsed {
                    Ok(target) => Some(target),
                    Err(reason) => {
                        otel_debug!(
                            name: "XrayRemoteSampler.SkippedSamplingTarget",
                            reason = reason
                        );
                        None
                    }
                }
            })
            .collect();

        SamplingTargetsResponse {
            targets,
            last_rule_modification: self.last_rule_modification.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule_json(name: &str) -> serde_json::Value {
        json!({
            "RuleName": name,
            "Priority": 1,
            "FixedRate": 0.05,
            "ReservoirSize": 1,
            "ServiceName": "*",
            "ServiceType": "*",
            "Host": "*",
            "HTTPMethod": "GET",
            "URLPath": "/api/*",
            "ResourceARN": "*",
            "Version": 1,
            "Attributes": { "abc": "1234" }
        })
    }

    #[test]
    fn decodes_rule_records() {
        let body = json!({
            "SamplingRuleRecords": [
                { "CreatedAt": 1.67e9, "ModifiedAt": 1.67e9, "SamplingRule": rule_json("test") }
            ],
            "NextToken": null
        });
        let response: GetSamplingRulesResponse = serde_json::from_value(body).unwrap();
        let rules = response.into_rules();

        assert_eq!(rules.len(), 1);
        let rule = &rules[0];
        assert_eq!(rule.rule_name, "test");
        assert_eq!(rule.priority, 1);
        assert_eq!(rule.http_method, "GET");
        assert_eq!(rule.url_path, "/api/*");
        assert_eq!(rule.fixed_rate, 0.05);
        assert_eq!(rule.attributes.get("abc").map(String::as_str), Some("1234"));
    }

    #[test]
    fn malformed_rule_records_are_skipped() {
        let mut unnamed = rule_json("x");
        unnamed.as_object_mut().unwrap().remove("RuleName");
        let mut wrong_version = rule_json("v2");
        wrong_version["Version"] = json!(2);
        let mut wrong_type = rule_json("typed");
        wrong_type["Priority"] = json!("high");

        let body = json!({
            "SamplingRuleRecords": [
                { "SamplingRule": unnamed },
                { "SamplingRule": wrong_version },
                { "SamplingRule": wrong_type },
                { "CreatedAt": 0 },
                { "SamplingRule": rule_json("") },
                { "SamplingRule": rule_json("kept") }
            ]
        });
        let response: GetSamplingRulesResponse = serde_json::from_value(body).unwrap();
        let names: Vec<_> = response
            .into_rules()
            .into_iter()
            .map(|rule| rule.rule_name)
            .collect();

        assert_eq!(names, vec!["kept".to_string()]);
    }

    #[test]
    fn rules_without_attributes_get_an_empty_map() {
        let mut rule = rule_json("plain");
        rule.as_object_mut().unwrap().remove("Attributes");
        let body = json!({ "SamplingRuleRecords": [{ "SamplingRule": rule }] });
        let response: GetSamplingRulesResponse = serde_json::from_value(body).unwrap();

        assert!(response.into_rules()[0].attributes.is_empty());
    }

    #[test]
    fn decodes_targets_and_skips_malformed_ones() {
        let body = json!({
            "SamplingTargetDocuments": [
                {
                    "RuleName": "test",
                    "FixedRate": 0.1,
                    "ReservoirQuota": 30,
                    "ReservoirQuotaTTL": 1.7e9,
                    "Interval": 5
                },
                { "FixedRate": 0.2 },
                { "RuleName": "no-rate" },
                { "RuleName": "minimal", "FixedRate": 0.0 }
            ],
            "LastRuleModification": 1.6e9,
            "UnprocessedStatistics": [
                { "RuleName": "other", "ErrorCode": "400", "Message": "unknown rule" }
            ]
        });
        let response: GetSamplingTargetsResponse = serde_json::from_value(body).unwrap();
        let response = response.into_response();

        assert_eq!(response.last_rule_modification, 1.6e9);
        assert_eq!(
            response.targets,
            vec![
                SamplingTarget {
                    rule_name: "test".into(),
                    fixed_rate: 0.1,
                    reservoir_quota: Some(30),
                    reservoir_quota_ttl: Some(1.7e9),
                    interval: Some(5),
                },
                SamplingTarget {
                    rule_name: "minimal".into(),
                    fixed_rate: 0.0,
                    reservoir_quota: None,
                    reservoir_quota_ttl: None,
                    interval: None,
                },
            ]
        );
    }

    #[test]
    fn rules_response_without_records_is_rejected() {
        for body in [
            json!({ "Message": "Rate exceeded" }),
            json!({ "SamplingRuleRecords": null }),
        ] {
            assert!(serde_json::from_value::<GetSamplingRulesResponse>(body).is_err());
        }
    }

    #[test]
    fn empty_rules_response_decodes_to_no_rules() {
        let body = json!({ "SamplingRuleRecords": [] });
        let response: GetSamplingRulesResponse = serde_json::from_value(body).unwrap();
        assert!(response.into_rules().is_empty());
    }

    #[test]
    fn unexpected_unprocessed_statistics_keep_the_targets() {
        let body = json!({
            "SamplingTargetDocuments": [{ "RuleName": "test", "FixedRate": 0.1 }],
            "LastRuleModification": 1.6e9,
            "UnprocessedStatistics": [
                { "RuleName": "other", "ErrorCode": 400 },
                "throttled",
                { "RuleName": "again", "ErrorCode": "429" }
            ]
        });
        let response: GetSamplingTargetsResponse = serde_json::from_value(body).unwrap();
        let response = response.into_response();

        assert_eq!(response.last_rule_modification, 1.6e9);
        assert_eq!(response.targets.len(), 1);
        assert_eq!(response.targets[0].rule_name, "test");
    }

    #[test]
    fn encodes_statistics_documents() {
        let documents = [SamplingStatisticsDocument {
            rule_name: "test".into(),
            client_id: "0123456789abcdef01234567".into(),
            request_count: 10,
            sampled_count: 3,
            borrow_count: 1,
            timestamp: 1_700_000_000,
        }];
        let body = serde_json::to_value(GetSamplingTargetsRequest {
            sampling_statistics_documents: &documents,
        })
        .unwrap();

        assert_eq!(
            body,
            json!({
                "SamplingStatisticsDocuments": [{
                    "RuleName": "test",
                    "ClientID": "0123456789abcdef01234567",
                    "RequestCount": 10,
                    "SampledCount": 3,
                    "BorrowCount": 1,
                    "Timestamp": 1_700_000_000
                }]
            })
        );
    }

    #[test]
    fn encodes_rules_request() {
        let body = serde_json::to_value(GetSamplingRulesRequest { next_token: None }).unwrap();
        assert_eq!(body, json!({ "NextToken": null }));
    }
}

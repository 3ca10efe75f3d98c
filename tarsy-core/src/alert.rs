//! The progressively-enriched alert record and per-stage results.
//!
//! `AlertProcessingData` is exclusively owned by one in-flight alert task;
//! fields are only ever added, never removed, and no other component holds a
//! mutable reference.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::chain::IterationStrategy;

/// Token accounting for one LLM round-trip, when the provider reports it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One recorded MCP tool invocation inside a stage, as carried forward to
/// later stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolCallRecord {
    pub tool_name: String,
    pub arguments: Value,
    pub result: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageResultStatus {
    Success,
    Error,
}

/// What one stage produced. Intentionally open: later stages must tolerate
/// absent fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub status: StageResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub mcp_results: HashMap<String, Vec<McpToolCallRecord>>,
    pub strategy: IterationStrategy,
    pub ts_us: i64,
    pub duration_ms: i64,
}

impl StageResult {
    pub fn success(
        analysis: Option<String>,
        mcp_results: HashMap<String, Vec<McpToolCallRecord>>,
        strategy: IterationStrategy,
        ts_us: i64,
        duration_ms: i64,
    ) -> Self {
        Self {
            status: StageResultStatus::Success,
            analysis,
            error: None,
            mcp_results,
            strategy,
            ts_us,
            duration_ms,
        }
    }

    pub fn failure(
        error: impl Into<String>,
        strategy: IterationStrategy,
        ts_us: i64,
        duration_ms: i64,
    ) -> Self {
        Self {
            status: StageResultStatus::Error,
            analysis: None,
            error: Some(error.into()),
            mcp_results: HashMap::new(),
            strategy,
            ts_us,
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StageResultStatus::Success
    }
}

/// Alert payload as it accumulates through a chain. Mutated monotonically by
/// the orchestrator task and discarded after session finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertProcessingData {
    pub alert_type: String,
    pub alert_data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runbook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runbook_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage_name: Option<String>,
    /// Stage outputs keyed by stage name, in chain order.
    #[serde(default)]
    stage_outputs: Vec<(String, StageResult)>,
}

impl AlertProcessingData {
    pub fn new(alert_type: impl Into<String>, alert_data: Map<String, Value>) -> Self {
        Self {
            alert_type: alert_type.into(),
            alert_data,
            runbook_url: None,
            runbook_content: None,
            chain_id: None,
            current_stage_name: None,
            stage_outputs: Vec::new(),
        }
    }

    /// Severity from the payload, falling back to `warning`. A helper with a
    /// default, not a schema.
    pub fn get_severity(&self) -> &str {
        self.alert_data
            .get("severity")
            .and_then(Value::as_str)
            .unwrap_or("warning")
    }

    /// Environment from the payload, falling back to `production`.
    pub fn get_environment(&self) -> &str {
        self.alert_data
            .get("environment")
            .and_then(Value::as_str)
            .unwrap_or("production")
    }

    /// Runbook URL: the explicit field first, then a `runbook` key in the
    /// payload.
    pub fn get_runbook_url(&self) -> Option<&str> {
        self.runbook_url
            .as_deref()
            .or_else(|| self.alert_data.get("runbook").and_then(Value::as_str))
    }

    pub fn record_stage_output(&mut self, stage_name: impl Into<String>, result: StageResult) {
        self.stage_outputs.push((stage_name.into(), result));
    }

    pub fn stage_outputs(&self) -> &[(String, StageResult)] {
        &self.stage_outputs
    }

    /// Merged MCP output of all prior stages, keyed by server id. Defensive:
    /// stages without `mcp_results` simply contribute nothing.
    pub fn get_all_mcp_results(&self) -> HashMap<String, Vec<McpToolCallRecord>> {
        let mut merged: HashMap<String, Vec<McpToolCallRecord>> = HashMap::new();
        for (_, result) in &self.stage_outputs {
            for (server, calls) in &result.mcp_results {
                merged
                    .entry(server.clone())
                    .or_default()
                    .extend(calls.iter().cloned());
            }
        }
        merged
    }

    /// The most recent successful stage analysis, walking stage outputs in
    /// reverse order.
    pub fn latest_analysis(&self) -> Option<&str> {
        self.stage_outputs
            .iter()
            .rev()
            .filter(|(_, r)| r.is_success())
            .find_map(|(_, r)| r.analysis.as_deref())
    }
}

/// Deterministic key identifying one alert's content, used to suppress
/// concurrent duplicates. Excludes any `timestamp` key so re-fired alerts
/// collapse onto the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub alert_type: String,
    pub content_hash: String,
}

impl AlertKey {
    pub fn from_alert(alert: &AlertProcessingData) -> Self {
        let mut hasher = Fnv1a::new();
        hash_canonical(
            &Value::Object(
                alert
                    .alert_data
                    .iter()
                    .filter(|(k, _)| k.as_str() != "timestamp")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            &mut hasher,
        );
        Self {
            alert_type: alert.alert_type.clone(),
            content_hash: format!("{:012x}", hasher.finish() & 0xffff_ffff_ffff),
        }
    }
}

impl std::fmt::Display for AlertKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.alert_type, self.content_hash)
    }
}

struct Fnv1a(u64);

impl Fnv1a {
    fn new() -> Self {
        Self(0xcbf2_9ce4_8422_2325)
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

/// Feed a JSON value into the hasher with object keys in sorted order, so the
/// hash is independent of payload key insertion order.
fn hash_canonical(value: &Value, hasher: &mut Fnv1a) {
    match value {
        Value::Null => hasher.write(b"null"),
        Value::Bool(b) => hasher.write(if *b { b"true" } else { b"false" }),
        Value::Number(n) => hasher.write(n.to_string().as_bytes()),
        Value::String(s) => {
            hasher.write(b"\"");
            hasher.write(s.as_bytes());
            hasher.write(b"\"");
        }
        Value::Array(items) => {
            hasher.write(b"[");
            for item in items {
                hash_canonical(item, hasher);
                hasher.write(b",");
            }
            hasher.write(b"]");
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.write(b"{");
            for key in keys {
                hasher.write(key.as_bytes());
                hasher.write(b":");
                hash_canonical(&map[key.as_str()], hasher);
                hasher.write(b",");
            }
            hasher.write(b"}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn stage_success(server: &str, analysis: Option<&str>) -> StageResult {
        let mut mcp_results = HashMap::new();
        mcp_results.insert(
            server.to_string(),
            vec![McpToolCallRecord {
                tool_name: "list_pods".into(),
                arguments: json!({"namespace": "foo"}),
                result: json!(["p1", "p2"]),
            }],
        );
        StageResult::success(
            analysis.map(String::from),
            mcp_results,
            IterationStrategy::React,
            1,
            10,
        )
    }

    #[test]
    fn helper_accessors_carry_fallback_defaults() {
        let alert = AlertProcessingData::new("kubernetes", payload(&[]));
        assert_eq!(alert.get_severity(), "warning");
        assert_eq!(alert.get_environment(), "production");
        assert!(alert.get_runbook_url().is_none());

        let alert = AlertProcessingData::new(
            "kubernetes",
            payload(&[
                ("severity", json!("critical")),
                ("environment", json!("staging")),
                ("runbook", json!("https://example.com/rb.md")),
            ]),
        );
        assert_eq!(alert.get_severity(), "critical");
        assert_eq!(alert.get_environment(), "staging");
        assert_eq!(alert.get_runbook_url(), Some("https://example.com/rb.md"));
    }

    #[test]
    fn mcp_results_merge_across_stages_defensively() {
        let mut alert = AlertProcessingData::new("kubernetes", payload(&[]));
        alert.record_stage_output("collect", stage_success("k8s", None));
        // A failed stage with no mcp_results contributes nothing.
        alert.record_stage_output(
            "enrich",
            StageResult::failure("boom", IterationStrategy::React, 2, 5),
        );
        alert.record_stage_output("collect-more", stage_success("k8s", None));

        let merged = alert.get_all_mcp_results();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged["k8s"].len(), 2);
    }

    #[test]
    fn latest_analysis_walks_in_reverse_and_skips_failures() {
        let mut alert = AlertProcessingData::new("kubernetes", payload(&[]));
        alert.record_stage_output("first", stage_success("k8s", Some("early")));
        alert.record_stage_output("second", stage_success("k8s", Some("late")));
        alert.record_stage_output(
            "third",
            StageResult::failure("boom", IterationStrategy::React, 3, 5),
        );
        assert_eq!(alert.latest_analysis(), Some("late"));

        let empty = AlertProcessingData::new("kubernetes", payload(&[]));
        assert!(empty.latest_analysis().is_none());
    }

    #[test]
    fn alert_key_ignores_timestamp_and_key_order() {
        let a = AlertProcessingData::new(
            "kubernetes",
            payload(&[
                ("namespace", json!("foo")),
                ("cluster", json!("prod-1")),
                ("timestamp", json!(1111)),
            ]),
        );
        let b = AlertProcessingData::new(
            "kubernetes",
            payload(&[
                ("cluster", json!("prod-1")),
                ("namespace", json!("foo")),
                ("timestamp", json!(2222)),
            ]),
        );
        assert_eq!(AlertKey::from_alert(&a), AlertKey::from_alert(&b));

        let c = AlertProcessingData::new(
            "kubernetes",
            payload(&[("namespace", json!("bar")), ("cluster", json!("prod-1"))]),
        );
        assert_ne!(AlertKey::from_alert(&a), AlertKey::from_alert(&c));

        let rendered = AlertKey::from_alert(&a).to_string();
        assert!(rendered.starts_with("kubernetes_"));
        assert_eq!(rendered.len(), "kubernetes_".len() + 12);
    }

    #[test]
    fn stage_result_serde_tolerates_missing_optional_fields() {
        let decoded: StageResult = serde_json::from_str(
            r#"{"status":"success","strategy":"react","ts_us":1,"duration_ms":2}"#,
        )
        .expect("deserialize");
        assert!(decoded.is_success());
        assert!(decoded.analysis.is_none());
        assert!(decoded.mcp_results.is_empty());
    }
}

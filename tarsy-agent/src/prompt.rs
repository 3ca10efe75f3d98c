//! Prompt assembly: alert context, runbook, prior-stage data, tool catalog,
//! and strategy-specific format instructions.

use tarsy_core::alert::AlertProcessingData;
use tarsy_core::chain::IterationStrategy;

use crate::catalog::ToolCatalog;

/// Everything a controller needs to build prompts for one stage.
pub struct StageContext<'a> {
    pub processing: &'a AlertProcessingData,
    pub catalog: &'a ToolCatalog,
    pub custom_instructions: Option<&'a str>,
    /// `(server_id, instructions)` for the agent's assigned servers.
    pub server_instructions: &'a [(String, String)],
}

pub fn system_message(ctx: &StageContext<'_>) -> String {
    let mut out = String::from(
        "You are an expert SRE investigating an operational alert. Work from \
         evidence: inspect live state with the available tools before drawing \
         conclusions, and cite what you observed.",
    );
    if let Some(instructions) = ctx.custom_instructions {
        out.push_str("\n\n");
        out.push_str(instructions);
    }
    for (server_id, instructions) in ctx.server_instructions {
        out.push_str(&format!("\n\nGuidance for tools on '{server_id}':\n"));
        out.push_str(instructions);
    }
    out
}

fn alert_section(processing: &AlertProcessingData) -> String {
    let payload = serde_json::to_string_pretty(&processing.alert_data)
        .unwrap_or_else(|_| "{}".to_string());
    format!(
        "## Alert\n\
         Type: {}\n\
         Severity: {}\n\
         Environment: {}\n\
         Payload:\n```json\n{}\n```\n",
        processing.alert_type,
        processing.get_severity(),
        processing.get_environment(),
        payload,
    )
}

fn runbook_section(processing: &AlertProcessingData) -> String {
    match processing.runbook_content.as_deref() {
        Some(content) if !content.is_empty() => {
            format!("## Runbook\n```markdown\n{content}\n```\n")
        }
        _ => String::new(),
    }
}

fn prior_data_section(processing: &AlertProcessingData) -> String {
    let merged = processing.get_all_mcp_results();
    if merged.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Data collected by earlier stages\n");
    let mut servers: Vec<&String> = merged.keys().collect();
    servers.sort();
    for server in servers {
        out.push_str(&format!("### {server}\n"));
        for call in &merged[server] {
            out.push_str(&format!(
                "- {}({}) -> {}\n",
                call.tool_name, call.arguments, call.result
            ));
        }
    }
    out
}

fn tools_section(catalog: &ToolCatalog) -> String {
    if catalog.is_empty() {
        return String::new();
    }
    format!("## Available tools\n{}", catalog.render())
}

fn react_format_instructions(strategy: IterationStrategy) -> String {
    let mut out = String::from(
        "## Response format\n\
         Respond using exactly this structure:\n\
         Thought: your reasoning about what to inspect next\n\
         Action: server.tool (one of the available tools, fully qualified)\n\
         Action Input: a JSON object with the tool arguments\n\
         Wait for the Observation before continuing. Repeat \
         Thought/Action/Action Input until you have enough evidence.\n",
    );
    match strategy {
        IterationStrategy::ReactTools => {
            out.push_str(
                "This stage only collects data. When you have gathered \
                 everything relevant, respond with a single line:\nDONE\n\
                 Do not produce an analysis.\n",
            );
        }
        IterationStrategy::ReactToolsPartial => {
            out.push_str(
                "When you have gathered enough, finish with:\n\
                 Final Answer: a concise analysis of the data collected in \
                 this stage only\n",
            );
        }
        _ => {
            out.push_str(
                "When you have enough evidence, finish with:\n\
                 Final Answer: your complete analysis of the alert\n",
            );
        }
    }
    out
}

fn regular_format_instructions() -> String {
    String::from(
        "## Response format\n\
         Respond with a single JSON object, nothing else. To call a tool:\n\
         {\"action\": \"call_tool\", \"server\": \"<server id>\", \
         \"tool\": \"<tool name>\", \"arguments\": { ... }}\n\
         When finished, return your analysis:\n\
         {\"action\": \"final_analysis\", \"analysis\": \"...\"}\n",
    )
}

/// User prompt for a ReAct-family iteration, with the running transcript of
/// prior actions and observations appended.
pub fn react_stage_prompt(
    strategy: IterationStrategy,
    ctx: &StageContext<'_>,
    transcript: &[String],
) -> String {
    let mut out = alert_section(ctx.processing);
    out.push_str(&runbook_section(ctx.processing));
    out.push_str(&prior_data_section(ctx.processing));
    out.push_str(&tools_section(ctx.catalog));
    out.push_str(&react_format_instructions(strategy));
    if !transcript.is_empty() {
        out.push_str("\n## Investigation so far\n");
        out.push_str(&transcript.join("\n"));
        out.push_str("\n\nContinue from the last observation.\n");
    }
    out
}

/// User prompt for the plain JSON-action strategy.
pub fn regular_stage_prompt(ctx: &StageContext<'_>, transcript: &[String]) -> String {
    let mut out = alert_section(ctx.processing);
    out.push_str(&runbook_section(ctx.processing));
    out.push_str(&prior_data_section(ctx.processing));
    out.push_str(&tools_section(ctx.catalog));
    out.push_str(&regular_format_instructions());
    if !transcript.is_empty() {
        out.push_str("\n## Actions taken so far\n");
        out.push_str(&transcript.join("\n"));
        out.push('\n');
    }
    out
}

/// User prompt for the tool-free comprehensive synthesis stage.
pub fn final_analysis_prompt(ctx: &StageContext<'_>) -> String {
    let mut out = alert_section(ctx.processing);
    out.push_str(&runbook_section(ctx.processing));
    out.push_str(&prior_data_section(ctx.processing));
    out.push_str(
        "## Task\n\
         No further data collection is possible. Synthesize a comprehensive \
         final analysis of this alert from everything above: the likely root \
         cause, the evidence supporting it, and recommended next steps.\n",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use tarsy_core::alert::{McpToolCallRecord, StageResult};

    fn processing() -> AlertProcessingData {
        let mut data = AlertProcessingData::new(
            "kubernetes",
            [("namespace".to_string(), json!("foo"))].into_iter().collect(),
        );
        data.runbook_content = Some("1. check finalizers".into());
        data
    }

    fn empty_ctx<'a>(
        processing: &'a AlertProcessingData,
        catalog: &'a ToolCatalog,
    ) -> StageContext<'a> {
        StageContext {
            processing,
            catalog,
            custom_instructions: Some("Prefer namespaced queries."),
            server_instructions: &[],
        }
    }

    #[test]
    fn stage_prompt_contains_alert_runbook_and_format() {
        let processing = processing();
        let catalog = ToolCatalog::empty();
        let prompt = react_stage_prompt(
            IterationStrategy::React,
            &empty_ctx(&processing, &catalog),
            &[],
        );
        assert!(prompt.contains("## Alert"));
        assert!(prompt.contains("\"namespace\": \"foo\""));
        assert!(prompt.contains("check finalizers"));
        assert!(prompt.contains("Final Answer:"));
    }

    #[test]
    fn data_collection_prompt_demands_done() {
        let processing = processing();
        let catalog = ToolCatalog::empty();
        let prompt = react_stage_prompt(
            IterationStrategy::ReactTools,
            &empty_ctx(&processing, &catalog),
            &[],
        );
        assert!(prompt.contains("DONE"));
        assert!(prompt.contains("Do not produce an analysis"));
    }

    #[test]
    fn final_analysis_prompt_carries_prior_stage_data() {
        let mut processing = processing();
        let mut mcp_results = HashMap::new();
        mcp_results.insert(
            "k8s".to_string(),
            vec![McpToolCallRecord {
                tool_name: "list_pods".into(),
                arguments: json!({"namespace": "foo"}),
                result: json!(["p1", "p2"]),
            }],
        );
        processing.record_stage_output(
            "collect",
            StageResult::success(None, mcp_results, IterationStrategy::ReactTools, 1, 10),
        );

        let catalog = ToolCatalog::empty();
        let prompt = final_analysis_prompt(&empty_ctx(&processing, &catalog));
        assert!(prompt.contains("Data collected by earlier stages"));
        assert!(prompt.contains("list_pods"));
        assert!(prompt.contains("No further data collection"));
    }

    #[test]
    fn system_message_weaves_custom_and_server_instructions() {
        let processing = processing();
        let catalog = ToolCatalog::empty();
        let server_instructions = vec![("k8s".to_string(), "Careful with large clusters.".to_string())];
        let ctx = StageContext {
            processing: &processing,
            catalog: &catalog,
            custom_instructions: Some("Prefer namespaced queries."),
            server_instructions: &server_instructions,
        };
        let system = system_message(&ctx);
        assert!(system.contains("Prefer namespaced queries."));
        assert!(system.contains("Guidance for tools on 'k8s'"));
        assert!(system.contains("Careful with large clusters."));
    }
}

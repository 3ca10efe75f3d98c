//! Parser for ReAct-formatted LLM responses.
//!
//! Grammar: lines prefixed `Thought:`, `Action:`, `Action Input:`,
//! `Observation:`, `Final Answer:`. `Action` names a tool as
//! `server.tool`; `Action Input` must parse as a JSON object (possibly
//! spanning multiple lines). A bare `DONE` line terminates data-collection
//! stages. When a response contains both an `Action` and a `Final Answer`,
//! the final answer wins only if no action follows it.

use serde_json::Value;

const PREFIXES: &[&str] = &[
    "Thought:",
    "Action:",
    "Action Input:",
    "Observation:",
    "Final Answer:",
];

#[derive(Debug, Clone, PartialEq)]
pub enum ReactAction {
    ToolCall {
        thought: Option<String>,
        server: String,
        tool: String,
        arguments: Value,
    },
    FinalAnswer(String),
    Done,
    Unparseable {
        reason: String,
    },
}

fn is_section_start(line: &str) -> bool {
    PREFIXES.iter().any(|p| line.starts_with(p))
}

pub fn parse_react_response(text: &str) -> ReactAction {
    let lines: Vec<&str> = text.lines().collect();

    let action_indexes: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.starts_with("Action:"))
        .map(|(i, _)| i)
        .collect();
    let final_answer_index = lines.iter().position(|l| l.starts_with("Final Answer:"));

    // Final answer wins only when no subsequent action follows it.
    if let Some(fa) = final_answer_index {
        let action_after = action_indexes.iter().any(|&a| a > fa);
        if !action_after {
            return ReactAction::FinalAnswer(collect_final_answer(&lines, fa));
        }
    }

    if let Some(&action_index) = action_indexes.first() {
        return parse_tool_call(&lines, action_index);
    }

    if lines.iter().any(|l| l.trim() == "DONE") {
        return ReactAction::Done;
    }

    ReactAction::Unparseable {
        reason: "no Action, Final Answer, or DONE found".into(),
    }
}

fn collect_final_answer(lines: &[&str], start: usize) -> String {
    let mut collected: Vec<&str> = Vec::new();
    let first = lines[start]["Final Answer:".len()..].trim();
    if !first.is_empty() {
        collected.push(first);
    }
    for line in &lines[start + 1..] {
        if is_section_start(line) {
            break;
        }
        collected.push(line);
    }
    while collected.last().is_some_and(|l| l.trim().is_empty()) {
        collected.pop();
    }
    collected.join("\n").trim().to_string()
}

fn parse_tool_call(lines: &[&str], action_index: usize) -> ReactAction {
    let action_value = lines[action_index]["Action:".len()..].trim();
    let Some((server, tool)) = action_value.split_once('.') else {
        return ReactAction::Unparseable {
            reason: format!("action '{action_value}' is not of the form server.tool"),
        };
    };
    if server.is_empty() || tool.is_empty() {
        return ReactAction::Unparseable {
            reason: format!("action '{action_value}' is not of the form server.tool"),
        };
    }

    let Some(input_index) = lines[action_index + 1..]
        .iter()
        .position(|l| l.starts_with("Action Input:"))
        .map(|offset| action_index + 1 + offset)
    else {
        return ReactAction::Unparseable {
            reason: "action has no Action Input".into(),
        };
    };

    // Action Input may span multiple lines, up to the next ReAct section.
    let mut input = lines[input_index]["Action Input:".len()..].to_string();
    for line in &lines[input_index + 1..] {
        if is_section_start(line) {
            break;
        }
        input.push('\n');
        input.push_str(line);
    }

    let arguments = match serde_json::from_str::<Value>(input.trim()) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => {
            return ReactAction::Unparseable {
                reason: "Action Input is not a JSON object".into(),
            };
        }
        Err(err) => {
            return ReactAction::Unparseable {
                reason: format!("Action Input is not parsable JSON: {err}"),
            };
        }
    };

    let thought = lines[..action_index]
        .iter()
        .rev()
        .find(|l| l.starts_with("Thought:"))
        .map(|l| l["Thought:".len()..].trim().to_string());

    ReactAction::ToolCall {
        thought,
        server: server.trim().to_string(),
        tool: tool.trim().to_string(),
        arguments,
    }
}

/// Strip a leading `Final Answer:` marker from a tool-free synthesis
/// response; the whole text is the analysis either way.
pub fn extract_analysis_text(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if let Some(fa) = lines.iter().position(|l| l.starts_with("Final Answer:")) {
        collect_final_answer(&lines, fa)
    } else {
        text.trim().to_string()
    }
}

//! Batch NDJSON wire-format scenarios (spec.md §8 scenarios 5-6).

use analysis_engine::engine::batch::{parse_batch_results, serialize_batch_requests, BatchStatus};
use analysis_engine::engine::client::{PromptRequest, WireMessage};

fn prompt(custom_id: &str, model: &str) -> PromptRequest {
    PromptRequest {
        model: Some(model.to_string()),
        messages: vec![WireMessage {
            role: "user".to_string(),
            content: "Summarize AAPL.".to_string(),
            tool_call_id: None,
        }],
        custom_id: Some(custom_id.to_string()),
        ..Default::default()
    }
}

#[test]
fn batch_lifecycle_results_split_successes_and_failures() {
    let results_file = [
        r#"{"custom_id":"q1","response":{"body":{"choices":[{"message":{"content":"α"}}]}}}"#,
        r#"{"custom_id":"q2","error":{"message":"bad"}}"#,
    ]
    .join("\n");

    let result = parse_batch_results(&results_file).unwrap();

    assert_eq!(result.successes, 1);
    assert_eq!(result.failures, 1);
    assert_eq!(result.content.get("q1").unwrap(), "\u{03b1}");
    assert_eq!(result.errors.get("q2").unwrap(), "bad");
}

#[test]
fn reasoning_model_batch_request_drops_tools_and_temperature() {
    let mut request = prompt("q1", "gpt-5-mini");
    request.temperature = Some(0.9);
    request.tools = vec![analysis_engine::engine::tool::ToolDef::function(
        "get_quote",
        "quote lookup",
        serde_json::json!({"type": "object"}),
    )];

    let ndjson = serialize_batch_requests(&[request]).unwrap();
    let line: serde_json::Value = serde_json::from_str(&ndjson).unwrap();

    assert_eq!(line["url"], "/v1/responses");
    assert!(line["body"]["input"].is_array());
    assert!(line["body"].get("messages").is_none());
    assert!(line["body"].get("temperature").is_none());
    assert!(line["body"].get("tools").is_none());
}

#[test]
fn standard_model_batch_request_keeps_tools_and_temperature() {
    let mut request = prompt("q1", "gpt-4o");
    request.temperature = Some(0.2);
    request.tools = vec![analysis_engine::engine::tool::ToolDef::function(
        "get_quote",
        "quote lookup",
        serde_json::json!({"type": "object"}),
    )];

    let ndjson = serialize_batch_requests(&[request]).unwrap();
    let line: serde_json::Value = serde_json::from_str(&ndjson).unwrap();

    assert_eq!(line["url"], "/v1/chat/completions");
    assert!(line["body"]["messages"].is_array());
    assert_eq!(line["body"]["temperature"], 0.2);
    assert!(line["body"]["tools"].is_array());
}

#[test]
fn batch_status_terminal_states_do_not_admit_further_transitions() {
    for status in [
        BatchStatus::Completed,
        BatchStatus::Failed,
        BatchStatus::Expired,
        BatchStatus::Cancelled,
    ] {
        assert!(status.is_terminal());
    }
    for status in [BatchStatus::Submitted, BatchStatus::Validating, BatchStatus::InProgress, BatchStatus::Finalizing] {
        assert!(!status.is_terminal());
    }
}

//! End-to-end workflow tests over scripted model/tool/store doubles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use deepcurrent::messages::{Message, ToolCall};
use deepcurrent_agentcore::memory::InMemoryMemoryStore;
use deepcurrent_status::{InMemoryStatusStore, StatusStore};
use deepcurrent_research::config::{ResearchConfig, ResearchDepth, ResearchType};
use deepcurrent_research::test_support::{FnChatModel, StaticTool, StaticToolPlane, TestHarness};
use deepcurrent_research::workflow::{run_research, ResearchRequest, StreamRecord};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};

fn transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(Message::as_text)
        .collect::<Vec<_>>()
        .join("\n")
}

fn dimension_of(text: &str) -> String {
    text.lines()
        .find_map(|line| line.strip_prefix("DIMENSION: "))
        .unwrap_or("Unknown")
        .trim()
        .to_string()
}

fn aspect_names(dimension: &str) -> [String; 2] {
    [
        format!("{dimension} Fundamentals"),
        format!("{dimension} Practice"),
    ]
}

fn aspects_json(dimension: &str) -> Value {
    let [a, b] = aspect_names(dimension);
    json!({
        "aspects": [
            {
                "name": a,
                "reasoning": "Foundational coverage.",
                "key_questions": ["What are the basics?", "Why does it matter?"]
            },
            {
                "name": b,
                "reasoning": "Practical coverage.",
                "key_questions": ["How is it applied?"]
            }
        ]
    })
}

fn planning_json(dimensions: &[&str]) -> Value {
    let mut aspects = serde_json::Map::new();
    for dim in dimensions {
        let [a, b] = aspect_names(dim);
        aspects.insert(
            (*dim).to_string(),
            json!([
                {"name": a, "reasoning": "r", "key_questions": ["q"], "completed": false},
                {"name": b, "reasoning": "r", "key_questions": ["q"], "completed": false}
            ]),
        );
    }
    json!({ "dimensions": dimensions, "aspects_by_dimension": aspects })
}

struct ScriptOptions {
    /// Research responses this long (words), to exercise event truncation.
    research_words: usize,
    /// Planning responses are garbage (scenario: retry then fallback).
    planning_garbage: bool,
    /// After this many research calls, flip the session to `cancelling`.
    cancel_after_research_calls: Option<usize>,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            research_words: 120,
            planning_garbage: false,
            cancel_after_research_calls: None,
        }
    }
}

/// The scripted model covering every stage of a quick 2×2 run.
fn scripted_model(
    options: ScriptOptions,
    status_slot: Arc<Mutex<Option<(Arc<InMemoryStatusStore>, String)>>>,
) -> Arc<FnChatModel> {
    let research_calls = Arc::new(AtomicUsize::new(0));
    let planning_calls = Arc::new(AtomicUsize::new(0));

    FnChatModel::new(move |messages| {
        let text = transcript(messages);

        if text.contains("gathering quick background context") {
            return Message::ai("Background: the topic is well documented.");
        }
        if text.contains("analyzing a complex topic") {
            return Message::ai(
                json!({"dimensions": ["Core Concepts", "Ecosystem"]}).to_string(),
            );
        }
        if text.contains("analyzing a dimension of a research topic") {
            let dimension = dimension_of(&text);
            return Message::ai(aspects_json(&dimension).to_string());
        }
        if text.contains("research quality control specialist") {
            planning_calls.fetch_add(1, Ordering::SeqCst);
            if options.planning_garbage {
                return Message::ai("I would rather write prose than emit structured output.");
            }
            return Message::ai(planning_json(&["Core Concepts", "Ecosystem"]).to_string());
        }
        if text.contains("specializing in information gathering") {
            let call = research_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(threshold) = options.cancel_after_research_calls {
                if call == threshold {
                    if let Some((store, session)) = status_slot.lock().as_ref() {
                        store.set_field(session, "status", json!("cancelling"));
                    }
                }
            }
            let body = "finding ".repeat(options.research_words);
            return Message::ai(format!(
                "## Overview\n\n{body}[https://example.com/src-{call}]\n\n## Key Insights\n\n- solid\n"
            ));
        }
        if text.contains("expert academic writer") {
            return Message::ai(
                "# Section\n\n## Introduction\n\nSynthesis [https://example.com/src-1]\n\n## Key Findings and Implications\n\nIntegrated findings.\n\n## References\n\n- [https://example.com/src-1]\n".to_string(),
            );
        }
        if text.contains("editor finalizing a research report") {
            if messages.iter().any(Message::is_tool_result) {
                return Message::ai("Editing complete.");
            }
            return Message::Ai {
                content: deepcurrent::messages::MessageContent::text("Filling placeholders."),
                tool_calls: vec![ToolCall {
                    id: "edit-1".to_string(),
                    name: "write_summary_and_conclusion".to_string(),
                    args: json!({
                        "summary_content": "This report summarizes the findings.",
                        "conclusion_content": "The evidence supports the conclusions above."
                    }),
                }],
            };
        }
        Message::ai("ok")
    })
}

fn quick_request(session_id: &str) -> ResearchRequest {
    ResearchRequest {
        topic: "Python async programming basics".to_string(),
        research_config: ResearchConfig::new(
            ResearchType::BasicWeb,
            ResearchDepth::Quick,
            "nova_pro",
        ),
        session_id: session_id.to_string(),
        user_id: "user-test".to_string(),
    }
}

fn basic_web_plane() -> Arc<StaticToolPlane> {
    StaticToolPlane::new(vec![
        StaticTool::new("ddg_search", r#"{"results": [{"title": "t", "snippet": "s"}]}"#),
        StaticTool::new("ddg_news", r#"{"results": []}"#),
        StaticTool::new("wikipedia_search", r#"{"results": []}"#),
    ])
}

fn event_types(store: &InMemoryMemoryStore) -> Vec<String> {
    store
        .stored()
        .iter()
        .map(|r| r.metadata["event_type"].clone())
        .collect()
}

async fn collect_records(
    ctx: Arc<deepcurrent_research::context::ResearchContext>,
    request: ResearchRequest,
) -> Vec<StreamRecord> {
    let stream = run_research(ctx, request);
    futures::pin_mut!(stream);
    let mut records = Vec::new();
    while let Some(record) = stream.next().await {
        records.push(record);
    }
    records
}

#[tokio::test]
async fn quick_run_produces_the_full_artifact_chain() {
    let status_slot = Arc::new(Mutex::new(None));
    let model = scripted_model(ScriptOptions::default(), Arc::clone(&status_slot));
    let harness = TestHarness::new("sess-quick", model, basic_web_plane());

    let records = collect_records(Arc::clone(&harness.ctx), quick_request("sess-quick")).await;

    let Some(StreamRecord::Complete { result, .. }) = records.last() else {
        panic!("expected terminal complete record, got {:?}", records.last());
    };

    assert_eq!(result["dimensions"].as_array().unwrap().len(), 2);
    for dim in ["Core Concepts", "Ecosystem"] {
        assert_eq!(
            result["aspects_by_dimension"][dim].as_array().unwrap().len(),
            2
        );
    }
    assert_eq!(result["research_by_aspect"].as_object().unwrap().len(), 4);
    let docs = result["dimension_documents"].as_object().unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs.values().all(|v| v.is_string()));
    assert!(result["report_file"].as_str().unwrap().ends_with(".docx"));
    assert!(result["report_pdf_file"].as_str().unwrap().ends_with(".pdf"));

    // Terminal status is completed.
    let status = harness.status_store.get("sess-quick").await.unwrap().unwrap();
    assert_eq!(status["status"], "completed");
    assert_eq!(status["dimension_count"], 2);
    assert_eq!(status["total_aspects"], 4);
    // Published research carries metadata only.
    let research_meta = status["research_by_aspect"].as_object().unwrap();
    assert_eq!(research_meta.len(), 4);
    assert!(research_meta.values().all(|v| v.get("content").is_none()));

    // Event trail in order.
    let events = event_types(&harness.memory_store);
    assert_eq!(events[0], "research_start");
    assert_eq!(events[1], "dimensions_identified");
    assert_eq!(
        events[2..6]
            .iter()
            .filter(|e| *e == "aspect_research_complete")
            .count(),
        4
    );
    assert_eq!(
        events[6..8]
            .iter()
            .filter(|e| *e == "dimension_document_complete")
            .count(),
        2
    );
    assert_eq!(events.last().map(String::as_str), Some("research_complete"));

    // The editor filled both placeholders in the draft.
    let draft_dir = harness.ctx.workspace.final_dir();
    let draft = std::fs::read_dir(&draft_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .find(|e| e.file_name().to_string_lossy().starts_with("draft_"))
        .expect("draft file exists");
    let draft_content = std::fs::read_to_string(draft.path()).unwrap();
    assert!(draft_content.contains("This report summarizes the findings."));
    assert!(!draft_content.contains("[EXECUTIVE_SUMMARY_TO_BE_GENERATED]"));
    // Deduplicated references from both dimension documents.
    assert_eq!(draft_content.matches("## References").count(), 1);
}

#[tokio::test]
async fn cancellation_mid_research_short_circuits_the_workflow() {
    let status_slot = Arc::new(Mutex::new(None));
    let model = scripted_model(
        ScriptOptions {
            cancel_after_research_calls: Some(2),
            ..ScriptOptions::default()
        },
        Arc::clone(&status_slot),
    );
    let harness = TestHarness::new("sess-cancel", model, basic_web_plane());
    *status_slot.lock() = Some((Arc::clone(&harness.status_store), "sess-cancel".to_string()));

    let records = collect_records(Arc::clone(&harness.ctx), quick_request("sess-cancel")).await;

    // Exactly one terminal record, and it is `cancelled`.
    assert!(matches!(records.last(), Some(StreamRecord::Cancelled { .. })));
    assert_eq!(
        records
            .iter()
            .filter(|r| matches!(r, StreamRecord::Cancelled { .. }))
            .count(),
        1
    );
    assert!(!records
        .iter()
        .any(|r| matches!(r, StreamRecord::Complete { .. })));

    let status = harness
        .status_store
        .get("sess-cancel")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status["status"], "cancelled");
    assert!(status.get("completed_at").is_some());

    // No terminal research_complete event, and once the status flipped to
    // cancelling no further aspect events were emitted: at least one of
    // the four workers delivered a silent placeholder instead.
    let events = event_types(&harness.memory_store);
    assert!(!events.iter().any(|e| e == "research_complete"));
    let aspect_events = events
        .iter()
        .filter(|e| *e == "aspect_research_complete")
        .count();
    assert!(aspect_events >= 1);
    assert!(aspect_events < 4, "cancelled workers must not emit events");
}

#[tokio::test]
async fn planning_retries_once_then_falls_back_to_original_aspects() {
    let status_slot = Arc::new(Mutex::new(None));
    let model = scripted_model(
        ScriptOptions {
            planning_garbage: true,
            ..ScriptOptions::default()
        },
        Arc::clone(&status_slot),
    );
    let harness = TestHarness::new("sess-fallback", model, basic_web_plane());

    let records = collect_records(Arc::clone(&harness.ctx), quick_request("sess-fallback")).await;

    let Some(StreamRecord::Complete { result, .. }) = records.last() else {
        panic!("workflow must complete on planning fallback");
    };

    // The fallback keeps the aspect-analysis structure unchanged.
    for dim in ["Core Concepts", "Ecosystem"] {
        let aspects = result["aspects_by_dimension"][dim].as_array().unwrap();
        let names: Vec<&str> = aspects.iter().map(|a| a["name"].as_str().unwrap()).collect();
        let [a, b] = aspect_names(dim);
        assert_eq!(names, vec![a.as_str(), b.as_str()]);
    }

    // One structured error entry referencing the planning node.
    let status = harness
        .status_store
        .get("sess-fallback")
        .await
        .unwrap()
        .unwrap();
    let errors = status["errors"].as_array().unwrap();
    assert!(errors.iter().any(|e| e["node"] == "research_planning"));
    assert_eq!(status["status"], "completed");
}

#[tokio::test]
async fn oversize_research_content_is_truncated_in_events_only() {
    let status_slot = Arc::new(Mutex::new(None));
    // ~150 KB of content per aspect.
    let model = scripted_model(
        ScriptOptions {
            research_words: 19_000,
            ..ScriptOptions::default()
        },
        Arc::clone(&status_slot),
    );
    let harness = TestHarness::new("sess-oversize", model, basic_web_plane());

    let records = collect_records(Arc::clone(&harness.ctx), quick_request("sess-oversize")).await;
    let Some(StreamRecord::Complete { result, .. }) = records.last() else {
        panic!("workflow must complete");
    };

    // In-memory state keeps the full content for downstream synthesis.
    let research = result["research_by_aspect"].as_object().unwrap();
    assert!(research
        .values()
        .all(|r| r["word_count"].as_u64().unwrap() > 19_000 - 10));

    // Every emitted aspect event fits the store limit and notes the size.
    let aspect_events: Vec<_> = harness
        .memory_store
        .stored()
        .into_iter()
        .filter(|r| r.metadata["event_type"] == "aspect_research_complete")
        .collect();
    assert_eq!(aspect_events.len(), 4);
    for event in aspect_events {
        assert!(event.blob.len() <= deepcurrent_agentcore::memory::MAX_EVENT_PAYLOAD_BYTES);
        let blob: Value = serde_json::from_str(&event.blob).unwrap();
        let content = blob["research_content"]["content"].as_str().unwrap();
        assert!(content.starts_with("[Content truncated - "));
        assert!(content.contains("KB]"));
    }
}

#[tokio::test]
async fn missing_required_tool_fails_at_initialization() {
    let status_slot = Arc::new(Mutex::new(None));
    let model = scripted_model(ScriptOptions::default(), status_slot);
    // Financial research requires stock_analysis; the plane has everything
    // else.
    let plane = StaticToolPlane::new(vec![
        StaticTool::new("stock_quote", "{}"),
        StaticTool::new("stock_history", "{}"),
        StaticTool::new("financial_news", "{}"),
        StaticTool::new("ddg_news", "{}"),
    ]);
    let harness = TestHarness::new("sess-toolless", model, plane);

    let mut request = quick_request("sess-toolless");
    request.research_config.research_type = ResearchType::Financial;

    let records = collect_records(Arc::clone(&harness.ctx), request).await;

    let Some(StreamRecord::Error { error, .. }) = records.last() else {
        panic!("expected terminal error record");
    };
    assert!(error.contains("stock_analysis"));
    assert!(error.contains("financial"));

    let status = harness
        .status_store
        .get("sess-toolless")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status["status"], "failed");
    // Nothing ran beyond initialization.
    assert!(status.get("dimensions").is_none());
    let events = event_types(&harness.memory_store);
    assert!(!events.iter().any(|e| e == "dimensions_identified"));
}

//! A bounded tool-calling reasoning loop (ReAct style).
//!
//! The driver sends the accumulated conversation to a [`ChatModel`] with a
//! declared toolset; tool-use responses are dispatched by name and their
//! results appended as tool turns until the model returns a terminal
//! completion, the iteration cap is reached, or cancellation is observed.
//!
//! A [`MessageHook`] is a pure transformation over the accumulated message
//! list applied before every model call. The driver keeps the canonical
//! history untouched and sends the rewritten view, so hooks can annotate
//! cache points or compact stale tool results without losing fidelity.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cancellation::CancellationProbe;
use crate::error::{Error, Result};
use crate::language_models::{ChatModel, ToolChoice};
use crate::messages::{ContentPart, Message, MessageContent, ToolCall};
use crate::tools::{definitions, Tool, ToolInput};

/// Floor for the hard safety ceiling on driver steps.
const HARD_CEILING_FLOOR: usize = 100;

/// Why the driver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model returned a terminal (non-tool) completion.
    Complete,
    /// The iteration cap was reached before a terminal completion.
    IterationLimit,
}

/// One tool invocation from the run, for diagnostics.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    /// Tool name the model requested.
    pub name: String,
    /// Arguments the model supplied.
    pub args: Value,
    /// Text of the result handed back to the model.
    pub result: String,
    /// True when the result was an error surfaced as text.
    pub is_error: bool,
}

/// Result of a driver run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// The final textual message from the model.
    pub final_text: String,
    /// Every tool call made during the run, in order.
    pub transcript: Vec<ToolCallRecord>,
    /// Model calls performed.
    pub iterations: usize,
    /// Why the run ended.
    pub stop: StopReason,
}

/// A pure rewrite of the message list applied before each model call.
pub trait MessageHook: std::marker::Send + Sync {
    /// Produce the view of `messages` the model should see.
    fn rewrite(&self, messages: Vec<Message>) -> Vec<Message>;
}

/// Marks the most recent non-tool message with a cache-point hint so
/// compatible providers reuse prefix state. Providers without caching
/// ignore the hint.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachePointHook;

impl MessageHook for CachePointHook {
    fn rewrite(&self, mut messages: Vec<Message>) -> Vec<Message> {
        if let Some(msg) = messages.iter_mut().rev().find(|m| !m.is_tool_result()) {
            if !msg.content().has_cache_point() {
                msg.content_mut().push(ContentPart::CachePoint);
            }
        }
        messages
    }
}

/// Replaces tool-result content older than the last `keep_last` results
/// with a short placeholder, preserving the tool-call/tool-result linkage.
#[derive(Debug, Clone, Copy)]
pub struct CompactToolResultsHook {
    /// How many trailing tool results keep their full content.
    pub keep_last: usize,
}

impl Default for CompactToolResultsHook {
    fn default() -> Self {
        Self { keep_last: 1 }
    }
}

impl MessageHook for CompactToolResultsHook {
    fn rewrite(&self, mut messages: Vec<Message>) -> Vec<Message> {
        let tool_positions: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_tool_result())
            .map(|(i, _)| i)
            .collect();
        if tool_positions.len() <= self.keep_last {
            return messages;
        }
        let compact_until = tool_positions.len() - self.keep_last;
        for &idx in &tool_positions[..compact_until] {
            if let Message::Tool {
                content,
                tool_call_id,
                tool_name,
            } = &mut messages[idx]
            {
                *content = MessageContent::text(format!(
                    "[tool result elided: {tool_name} ({tool_call_id})]"
                ));
            }
        }
        messages
    }
}

/// Chains hooks left to right.
pub struct ComposedHook(pub Vec<Arc<dyn MessageHook>>);

impl MessageHook for ComposedHook {
    fn rewrite(&self, messages: Vec<Message>) -> Vec<Message> {
        self.0
            .iter()
            .fold(messages, |msgs, hook| hook.rewrite(msgs))
    }
}

/// The tool-calling reasoning loop.
pub struct AgentDriver {
    model: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn Tool>>,
    max_iterations: usize,
    hook: Option<Arc<dyn MessageHook>>,
    probe: Option<Arc<dyn CancellationProbe>>,
}

impl AgentDriver {
    /// Build a driver over a model with a default iteration cap of 25.
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            tools: Vec::new(),
            max_iterations: 25,
            hook: None,
            probe: None,
        }
    }

    /// Declare the toolset.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    /// Set the iteration cap (model calls) from the depth profile or a
    /// per-invocation override.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Install a pre-model hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn MessageHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Install the cancellation probe consulted before each model call and
    /// after each tool return.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn CancellationProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// The hard safety ceiling: total appended messages never exceed this,
    /// whatever the per-iteration tool fan-out looks like.
    fn hard_ceiling(&self) -> usize {
        HARD_CEILING_FLOOR.max(self.max_iterations * 2)
    }

    async fn observe_cancellation(&self) -> Result<()> {
        match &self.probe {
            Some(probe) => probe.check().await,
            None => Ok(()),
        }
    }

    /// Run the loop from a system prompt and an initial user prompt.
    pub async fn run(&self, system_prompt: &str, user_prompt: &str) -> Result<AgentOutcome> {
        let mut messages = vec![Message::system(system_prompt), Message::human(user_prompt)];
        let mut transcript: Vec<ToolCallRecord> = Vec::new();
        let definitions = definitions(&self.tools);
        let tools_arg = (!definitions.is_empty()).then_some(definitions.as_slice());
        let hard_ceiling = self.hard_ceiling();

        let mut iterations = 0usize;
        let mut last_text = String::new();

        loop {
            if iterations >= self.max_iterations {
                info!(
                    iterations,
                    cap = self.max_iterations,
                    "iteration cap reached"
                );
                return Ok(AgentOutcome {
                    final_text: last_text,
                    transcript,
                    iterations,
                    stop: StopReason::IterationLimit,
                });
            }
            self.observe_cancellation().await?;

            let view = match &self.hook {
                Some(hook) => hook.rewrite(messages.clone()),
                None => messages.clone(),
            };
            let result = self
                .model
                .generate(&view, tools_arg, Some(&ToolChoice::Auto))
                .await?;
            iterations += 1;

            let (content, tool_calls) = match result.message {
                Message::Ai {
                    content,
                    tool_calls,
                } => (content, tool_calls),
                other => {
                    return Err(Error::model(format!(
                        "provider returned a non-assistant message: {}",
                        other.role()
                    )))
                }
            };
            let text = content.as_text();
            if !text.is_empty() {
                last_text = text;
            }

            if tool_calls.is_empty() {
                debug!(iterations, "terminal completion");
                return Ok(AgentOutcome {
                    final_text: last_text,
                    transcript,
                    iterations,
                    stop: StopReason::Complete,
                });
            }

            messages.push(Message::Ai {
                content,
                tool_calls: tool_calls.clone(),
            });

            for call in tool_calls {
                let (result_content, is_error) = self.dispatch(&call).await;
                transcript.push(ToolCallRecord {
                    name: call.name.clone(),
                    args: call.args.clone(),
                    result: result_content.as_text(),
                    is_error,
                });
                messages.push(Message::Tool {
                    content: result_content,
                    tool_call_id: call.id,
                    tool_name: call.name,
                });
                self.observe_cancellation().await?;
            }

            if messages.len() > hard_ceiling {
                warn!(
                    messages = messages.len(),
                    hard_ceiling, "hard message ceiling reached"
                );
                return Ok(AgentOutcome {
                    final_text: last_text,
                    transcript,
                    iterations,
                    stop: StopReason::IterationLimit,
                });
            }
        }
    }

    /// Invoke one tool call. Failures come back as tool-result text so the
    /// model can decide whether to try another tool.
    async fn dispatch(&self, call: &ToolCall) -> (MessageContent, bool) {
        let Some(tool) = self.tools.iter().find(|t| t.name() == call.name) else {
            warn!(tool = %call.name, "model requested unknown tool");
            return (
                MessageContent::text(format!("Error: unknown tool `{}`", call.name)),
                true,
            );
        };
        match tool
            .call(ToolInput::Structured(call.args.clone()))
            .await
        {
            Ok(content) => (content, false),
            Err(e) if e.is_cancelled() => (MessageContent::text("Error: cancelled"), true),
            Err(e) => {
                debug!(tool = %call.name, error = %e, "tool invocation failed");
                (MessageContent::text(format!("Error: {e}")), true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language_models::{ChatResult, ChunkStream};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// A model that plays back scripted responses.
    struct Scripted {
        responses: Mutex<Vec<Message>>,
        seen_views: Mutex<Vec<Vec<Message>>>,
    }

    impl Scripted {
        fn new(mut responses: Vec<Message>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                seen_views: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        async fn generate(
            &self,
            messages: &[Message],
            _tools: Option<&[crate::tools::ToolDefinition]>,
            _tool_choice: Option<&ToolChoice>,
        ) -> Result<ChatResult> {
            self.seen_views.lock().unwrap().push(messages.to_vec());
            let message = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Message::ai("done"));
            Ok(ChatResult {
                message,
                usage: None,
            })
        }

        async fn stream(&self, _messages: &[Message]) -> Result<ChunkStream> {
            Err(Error::model("not streamable"))
        }

        fn model_id(&self) -> &str {
            "scripted"
        }
    }

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercases text"
        }
        fn args_schema(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn call(&self, input: ToolInput) -> Result<MessageContent> {
            Ok(MessageContent::text(
                input.str_field("text").unwrap_or_default().to_uppercase(),
            ))
        }
    }

    fn ai_with_call(name: &str, args: Value) -> Message {
        Message::Ai {
            content: MessageContent::text("calling a tool"),
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: name.to_string(),
                args,
            }],
        }
    }

    #[tokio::test]
    async fn terminal_completion_ends_the_loop() {
        let model = Arc::new(Scripted::new(vec![Message::ai("final answer")]));
        let driver = AgentDriver::new(model);
        let outcome = driver.run("system", "question").await.unwrap();
        assert_eq!(outcome.final_text, "final answer");
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.stop, StopReason::Complete);
        assert!(outcome.transcript.is_empty());
    }

    #[tokio::test]
    async fn tool_calls_are_dispatched_and_fed_back() {
        let model = Arc::new(Scripted::new(vec![
            ai_with_call("upper", serde_json::json!({"text": "hi"})),
            Message::ai("it said HI"),
        ]));
        let driver = AgentDriver::new(Arc::clone(&model) as Arc<dyn ChatModel>)
            .with_tools(vec![Arc::new(Upper)]);
        let outcome = driver.run("system", "question").await.unwrap();

        assert_eq!(outcome.final_text, "it said HI");
        assert_eq!(outcome.transcript.len(), 1);
        assert_eq!(outcome.transcript[0].result, "HI");
        assert!(!outcome.transcript[0].is_error);

        // Second model call saw the tool result turn.
        let views = model.seen_views.lock().unwrap();
        let last_view = views.last().unwrap();
        assert!(last_view.iter().any(|m| m.is_tool_result()));
    }

    #[tokio::test]
    async fn unknown_tool_surfaces_as_error_text() {
        let model = Arc::new(Scripted::new(vec![
            ai_with_call("nope", serde_json::json!({})),
            Message::ai("ok"),
        ]));
        let driver = AgentDriver::new(model);
        let outcome = driver.run("system", "question").await.unwrap();
        assert!(outcome.transcript[0].is_error);
        assert!(outcome.transcript[0].result.contains("unknown tool"));
    }

    #[tokio::test]
    async fn iteration_cap_stops_the_loop() {
        let responses: Vec<Message> = (0..10)
            .map(|_| ai_with_call("upper", serde_json::json!({"text": "x"})))
            .collect();
        let model = Arc::new(Scripted::new(responses));
        let driver = AgentDriver::new(model)
            .with_tools(vec![Arc::new(Upper)])
            .with_max_iterations(3);
        let outcome = driver.run("system", "question").await.unwrap();
        assert_eq!(outcome.stop, StopReason::IterationLimit);
        assert_eq!(outcome.iterations, 3);
    }

    struct FlagProbe(AtomicBool);

    #[async_trait]
    impl CancellationProbe for FlagProbe {
        async fn is_cancelled(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn cancellation_raises_distinguished_signal() {
        let model = Arc::new(Scripted::new(vec![Message::ai("never seen")]));
        let probe = Arc::new(FlagProbe(AtomicBool::new(true)));
        let driver = AgentDriver::new(model).with_probe(probe);
        let err = driver.run("system", "question").await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn cache_point_hook_marks_latest_non_tool_message() {
        let messages = vec![
            Message::system("sys"),
            Message::human("q"),
            Message::ai("a"),
            Message::tool("result", "call_1", "upper"),
        ];
        let rewritten = CachePointHook.rewrite(messages);
        assert!(rewritten[2].content().has_cache_point());
        assert!(!rewritten[3].content().has_cache_point());
    }

    #[test]
    fn compaction_keeps_last_n_tool_results() {
        let messages = vec![
            Message::system("sys"),
            Message::tool("big result 1", "c1", "upper"),
            Message::ai("thinking"),
            Message::tool("big result 2", "c2", "upper"),
            Message::tool("big result 3", "c3", "upper"),
        ];
        let rewritten = CompactToolResultsHook { keep_last: 1 }.rewrite(messages);
        assert!(rewritten[1].as_text().contains("elided"));
        assert!(rewritten[1].as_text().contains("c1"));
        assert!(rewritten[3].as_text().contains("elided"));
        assert_eq!(rewritten[4].as_text(), "big result 3");
        // Linkage preserved.
        match &rewritten[1] {
            Message::Tool { tool_call_id, .. } => assert_eq!(tool_call_id, "c1"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn hook_rewrites_view_but_not_history() {
        let model = Arc::new(Scripted::new(vec![
            ai_with_call("upper", serde_json::json!({"text": "a"})),
            ai_with_call("upper", serde_json::json!({"text": "b"})),
            Message::ai("done"),
        ]));
        let driver = AgentDriver::new(Arc::clone(&model) as Arc<dyn ChatModel>)
            .with_tools(vec![Arc::new(Upper)])
            .with_hook(Arc::new(CompactToolResultsHook { keep_last: 1 }));
        driver.run("system", "question").await.unwrap();

        let views = model.seen_views.lock().unwrap();
        // Third call: first tool result compacted, second intact.
        let third = &views[2];
        let tool_texts: Vec<String> = third
            .iter()
            .filter(|m| m.is_tool_result())
            .map(Message::as_text)
            .collect();
        assert_eq!(tool_texts.len(), 2);
        assert!(tool_texts[0].contains("elided"));
        assert_eq!(tool_texts[1], "B");
    }
}

//! Bedrock Converse API bindings for the core [`ChatModel`] trait.

use std::collections::HashMap;

use async_stream::stream;
use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_bedrockruntime::{
    types::{
        CachePointBlock, CachePointType, ContentBlock as BedrockContentBlock, ConversationRole,
        ConverseStreamOutput as BedrockStreamEvent, DocumentBlock, DocumentFormat, DocumentSource,
        ImageBlock, ImageFormat, ImageSource, InferenceConfiguration, Message as BedrockMessage,
        SystemContentBlock, Tool as BedrockTool, ToolChoice as BedrockToolChoice,
        ToolConfiguration, ToolInputSchema, ToolResultBlock, ToolResultContentBlock,
        ToolResultStatus, ToolSpecification, ToolUseBlock,
    },
    Client as BedrockClient,
};
use aws_smithy_types::{Blob, Document};
use deepcurrent::{
    error::{Error, Result},
    language_models::{ChatChunk, ChatModel, ChatResult, ChunkStream, ToolChoice, UsageMetadata},
    messages::{ContentPart, Message, ToolCall},
    tools::ToolDefinition,
};
use tracing::debug;

/// Provider payload ceiling for document input (4.5 MB).
pub const MAX_DOCUMENT_BYTES: usize = 4_500_000;

/// AWS Bedrock chat model.
///
/// Uses the standard AWS SDK authentication chain (environment variables,
/// shared credentials file, instance/task role).
#[derive(Clone)]
pub struct ChatBedrock {
    client: BedrockClient,
    model_id: String,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    stop_sequences: Option<Vec<String>>,
}

impl ChatBedrock {
    /// Create a client for the given region.
    pub async fn new(region: impl Into<String>) -> Result<Self> {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.into()))
            .load()
            .await;
        Ok(Self::from_client(BedrockClient::new(&config)))
    }

    /// Wrap an already-configured SDK client.
    pub fn from_client(client: BedrockClient) -> Self {
        Self {
            client,
            model_id: crate::registry::FALLBACK_MODEL_ID.to_string(),
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop_sequences: None,
        }
    }

    /// Set the model id.
    #[must_use]
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Set temperature (0.0 to 1.0).
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set `top_p` (nucleus sampling).
    #[must_use]
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Set `max_tokens`.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set stop sequences.
    #[must_use]
    pub fn with_stop_sequences(mut self, stop_sequences: Vec<String>) -> Self {
        self.stop_sequences = Some(stop_sequences);
        self
    }

    fn inference_config(&self) -> Option<InferenceConfiguration> {
        if self.temperature.is_none()
            && self.top_p.is_none()
            && self.max_tokens.is_none()
            && self.stop_sequences.is_none()
        {
            return None;
        }
        let mut builder = InferenceConfiguration::builder();
        if let Some(temp) = self.temperature {
            builder = builder.temperature(temp);
        }
        if let Some(top_p) = self.top_p {
            builder = builder.top_p(top_p);
        }
        if let Some(max_tokens) = self.max_tokens {
            builder = builder.max_tokens(max_tokens as i32);
        }
        if let Some(stop) = &self.stop_sequences {
            builder = builder.set_stop_sequences(Some(stop.clone()));
        }
        Some(builder.build())
    }

    fn convert_parts(parts: &[ContentPart]) -> Result<Vec<BedrockContentBlock>> {
        let mut blocks = Vec::new();
        for part in parts {
            match part {
                ContentPart::Text { text } => {
                    if !text.is_empty() {
                        blocks.push(BedrockContentBlock::Text(text.clone()));
                    }
                }
                ContentPart::Image { media_type, data } => {
                    let format = match media_type.as_str() {
                        "image/jpeg" => ImageFormat::Jpeg,
                        "image/gif" => ImageFormat::Gif,
                        "image/webp" => ImageFormat::Webp,
                        _ => ImageFormat::Png,
                    };
                    blocks.push(BedrockContentBlock::Image(
                        ImageBlock::builder()
                            .format(format)
                            .source(ImageSource::Bytes(Blob::new(data.clone())))
                            .build()
                            .map_err(|e| Error::model(e.to_string()))?,
                    ));
                }
                ContentPart::Document { name, data } => {
                    if data.len() > MAX_DOCUMENT_BYTES {
                        return Err(Error::model(format!(
                            "document `{name}` exceeds the {MAX_DOCUMENT_BYTES}-byte payload ceiling"
                        )));
                    }
                    blocks.push(BedrockContentBlock::Document(
                        DocumentBlock::builder()
                            .format(DocumentFormat::Pdf)
                            .name(name)
                            .source(DocumentSource::Bytes(Blob::new(data.clone())))
                            .build()
                            .map_err(|e| Error::model(e.to_string()))?,
                    ));
                }
                ContentPart::CachePoint => {
                    blocks.push(BedrockContentBlock::CachePoint(
                        CachePointBlock::builder()
                            .r#type(CachePointType::Default)
                            .build()
                            .map_err(|e| Error::model(e.to_string()))?,
                    ));
                }
            }
        }
        Ok(blocks)
    }

    /// Convert core messages into Converse messages plus system blocks.
    fn convert_messages(
        &self,
        messages: &[Message],
    ) -> Result<(Vec<BedrockMessage>, Option<Vec<SystemContentBlock>>)> {
        let mut system_blocks = Vec::new();
        let mut conversation = Vec::new();

        for message in messages {
            match message {
                Message::System { content } => {
                    for part in &content.parts {
                        match part {
                            ContentPart::Text { text } => {
                                system_blocks.push(SystemContentBlock::Text(text.clone()));
                            }
                            ContentPart::CachePoint => {
                                system_blocks.push(SystemContentBlock::CachePoint(
                                    CachePointBlock::builder()
                                        .r#type(CachePointType::Default)
                                        .build()
                                        .map_err(|e| Error::model(e.to_string()))?,
                                ));
                            }
                            other => {
                                debug!(part = ?other, "skipping unsupported system content part");
                            }
                        }
                    }
                }
                Message::Human { content } => {
                    let blocks = Self::convert_parts(&content.parts)?;
                    let mut builder = BedrockMessage::builder().role(ConversationRole::User);
                    for block in blocks {
                        builder = builder.content(block);
                    }
                    conversation.push(builder.build().map_err(|e| Error::model(e.to_string()))?);
                }
                Message::Ai {
                    content,
                    tool_calls,
                } => {
                    let mut blocks = Self::convert_parts(&content.parts)?;
                    for call in tool_calls {
                        blocks.push(BedrockContentBlock::ToolUse(
                            ToolUseBlock::builder()
                                .tool_use_id(&call.id)
                                .name(&call.name)
                                .input(json_to_document(&call.args)?)
                                .build()
                                .map_err(|e| Error::model(e.to_string()))?,
                        ));
                    }
                    if blocks.is_empty() {
                        blocks.push(BedrockContentBlock::Text(String::new()));
                    }
                    let mut builder = BedrockMessage::builder().role(ConversationRole::Assistant);
                    for block in blocks {
                        builder = builder.content(block);
                    }
                    conversation.push(builder.build().map_err(|e| Error::model(e.to_string()))?);
                }
                Message::Tool {
                    content,
                    tool_call_id,
                    ..
                } => {
                    let mut result_blocks = Vec::new();
                    for part in &content.parts {
                        match part {
                            ContentPart::Text { text } => {
                                result_blocks.push(ToolResultContentBlock::Text(text.clone()));
                            }
                            ContentPart::Image { media_type, data } => {
                                let format = match media_type.as_str() {
                                    "image/jpeg" => ImageFormat::Jpeg,
                                    "image/gif" => ImageFormat::Gif,
                                    "image/webp" => ImageFormat::Webp,
                                    _ => ImageFormat::Png,
                                };
                                result_blocks.push(ToolResultContentBlock::Image(
                                    ImageBlock::builder()
                                        .format(format)
                                        .source(ImageSource::Bytes(Blob::new(data.clone())))
                                        .build()
                                        .map_err(|e| Error::model(e.to_string()))?,
                                ));
                            }
                            other => {
                                debug!(part = ?other, "skipping unsupported tool-result part");
                            }
                        }
                    }
                    let tool_result = ToolResultBlock::builder()
                        .tool_use_id(tool_call_id)
                        .set_content(Some(result_blocks))
                        .status(ToolResultStatus::Success)
                        .build()
                        .map_err(|e| Error::model(e.to_string()))?;
                    let mut builder = BedrockMessage::builder()
                        .role(ConversationRole::User)
                        .content(BedrockContentBlock::ToolResult(tool_result));
                    if content.has_cache_point() {
                        builder = builder.content(BedrockContentBlock::CachePoint(
                            CachePointBlock::builder()
                                .r#type(CachePointType::Default)
                                .build()
                                .map_err(|e| Error::model(e.to_string()))?,
                        ));
                    }
                    conversation.push(builder.build().map_err(|e| Error::model(e.to_string()))?);
                }
            }
        }

        let system = (!system_blocks.is_empty()).then_some(system_blocks);
        Ok((conversation, system))
    }

    fn convert_tools(
        tools: Option<&[ToolDefinition]>,
        tool_choice: Option<&ToolChoice>,
    ) -> Result<Option<ToolConfiguration>> {
        let Some(tools) = tools else {
            return Ok(None);
        };
        if tools.is_empty() {
            return Ok(None);
        }

        let mut bedrock_tools = Vec::with_capacity(tools.len());
        for def in tools {
            let spec = ToolSpecification::builder()
                .name(&def.name)
                .description(&def.description)
                .input_schema(ToolInputSchema::Json(json_to_document(&def.parameters)?))
                .build()
                .map_err(|e| Error::model(e.to_string()))?;
            bedrock_tools.push(BedrockTool::ToolSpec(spec));
        }

        let mut builder = ToolConfiguration::builder().set_tools(Some(bedrock_tools));
        if let Some(choice) = tool_choice {
            let bedrock_choice = match choice {
                ToolChoice::Auto => BedrockToolChoice::Auto(
                    aws_sdk_bedrockruntime::types::AutoToolChoice::builder().build(),
                ),
                ToolChoice::Any => BedrockToolChoice::Any(
                    aws_sdk_bedrockruntime::types::AnyToolChoice::builder().build(),
                ),
                ToolChoice::Tool(name) => BedrockToolChoice::Tool(
                    aws_sdk_bedrockruntime::types::SpecificToolChoice::builder()
                        .name(name)
                        .build()
                        .map_err(|e| Error::model(e.to_string()))?,
                ),
            };
            builder = builder.tool_choice(bedrock_choice);
        }
        Ok(Some(builder.build().map_err(|e| Error::model(e.to_string()))?))
    }
}

#[async_trait]
impl ChatModel for ChatBedrock {
    async fn generate(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        tool_choice: Option<&ToolChoice>,
    ) -> Result<ChatResult> {
        let (bedrock_messages, system) = self.convert_messages(messages)?;
        let tool_config = Self::convert_tools(tools, tool_choice)?;

        let mut request = self
            .client
            .converse()
            .model_id(&self.model_id)
            .set_messages(Some(bedrock_messages))
            .set_system(system);
        if let Some(config) = self.inference_config() {
            request = request.inference_config(config);
        }
        if let Some(config) = tool_config {
            request = request.tool_config(config);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::model(format!("Bedrock API error: {e}")))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        if let Some(aws_sdk_bedrockruntime::types::ConverseOutput::Message(message)) =
            response.output
        {
            for block in message.content {
                match block {
                    BedrockContentBlock::Text(t) => text.push_str(&t),
                    BedrockContentBlock::ToolUse(tool_use) => {
                        tool_calls.push(ToolCall {
                            id: tool_use.tool_use_id,
                            name: tool_use.name,
                            args: document_to_json(tool_use.input)?,
                        });
                    }
                    other => {
                        debug!(block = ?other, "ignoring unhandled Bedrock content block");
                    }
                }
            }
        }

        let usage = response.usage.map(|u| UsageMetadata {
            input_tokens: u.input_tokens.max(0) as u32,
            output_tokens: u.output_tokens.max(0) as u32,
        });

        Ok(ChatResult {
            message: Message::Ai {
                content: deepcurrent::messages::MessageContent::text(text),
                tool_calls,
            },
            usage,
        })
    }

    async fn stream(&self, messages: &[Message]) -> Result<ChunkStream> {
        let (bedrock_messages, system) = self.convert_messages(messages)?;

        let mut request = self
            .client
            .converse_stream()
            .model_id(&self.model_id)
            .set_messages(Some(bedrock_messages))
            .set_system(system);
        if let Some(config) = self.inference_config() {
            request = request.inference_config(config);
        }

        let output = request
            .send()
            .await
            .map_err(|e| Error::model(format!("Bedrock streaming error: {e}")))?;
        let mut event_stream = output.stream;

        let chunk_stream = stream! {
            loop {
                match event_stream.recv().await {
                    Ok(Some(event)) => match event {
                        BedrockStreamEvent::ContentBlockDelta(block_delta) => {
                            if let Some(
                                aws_sdk_bedrockruntime::types::ContentBlockDelta::Text(text),
                            ) = block_delta.delta
                            {
                                yield Ok(ChatChunk { delta: text });
                            }
                        }
                        BedrockStreamEvent::MessageStop(_) => break,
                        _ => {}
                    },
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(Error::model(format!("Bedrock stream error: {e}")));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(chunk_stream))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Convert `serde_json::Value` into an AWS smithy `Document`.
fn json_to_document(value: &serde_json::Value) -> Result<Document> {
    match value {
        serde_json::Value::Null => Ok(Document::Null),
        serde_json::Value::Bool(b) => Ok(Document::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i >= 0 {
                    Ok(Document::Number(aws_smithy_types::Number::PosInt(i as u64)))
                } else {
                    Ok(Document::Number(aws_smithy_types::Number::NegInt(i)))
                }
            } else if let Some(f) = n.as_f64() {
                Ok(Document::Number(aws_smithy_types::Number::Float(f)))
            } else {
                Err(Error::model("invalid JSON number"))
            }
        }
        serde_json::Value::String(s) => Ok(Document::String(s.clone())),
        serde_json::Value::Array(arr) => {
            let docs: Result<Vec<_>> = arr.iter().map(json_to_document).collect();
            Ok(Document::Array(docs?))
        }
        serde_json::Value::Object(obj) => {
            let map: Result<HashMap<_, _>> = obj
                .iter()
                .map(|(k, v)| json_to_document(v).map(|d| (k.clone(), d)))
                .collect();
            Ok(Document::Object(map?))
        }
    }
}

/// Convert an AWS smithy `Document` into `serde_json::Value`.
fn document_to_json(doc: Document) -> Result<serde_json::Value> {
    match doc {
        Document::Null => Ok(serde_json::Value::Null),
        Document::Bool(b) => Ok(serde_json::Value::Bool(b)),
        Document::Number(n) => match n {
            aws_smithy_types::Number::PosInt(i) => Ok(serde_json::json!(i)),
            aws_smithy_types::Number::NegInt(i) => Ok(serde_json::json!(i)),
            aws_smithy_types::Number::Float(f) => Ok(serde_json::json!(f)),
        },
        Document::String(s) => Ok(serde_json::Value::String(s)),
        Document::Array(arr) => {
            let values: Result<Vec<_>> = arr.into_iter().map(document_to_json).collect();
            Ok(serde_json::Value::Array(values?))
        }
        Document::Object(obj) => {
            let map: Result<serde_json::Map<_, _>> = obj
                .into_iter()
                .map(|(k, v)| document_to_json(v).map(|j| (k, j)))
                .collect();
            Ok(serde_json::Value::Object(map?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_document_roundtrip() {
        let value = serde_json::json!({
            "query": "rust async",
            "max_results": 5,
            "nested": { "flag": true, "score": 0.5 },
            "list": [1, -2, "three", null]
        });
        let doc = json_to_document(&value).unwrap();
        let back = document_to_json(doc).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn oversized_document_is_rejected() {
        let parts = vec![ContentPart::Document {
            name: "big".to_string(),
            data: vec![0u8; MAX_DOCUMENT_BYTES + 1],
        }];
        let err = ChatBedrock::convert_parts(&parts).unwrap_err();
        assert!(err.to_string().contains("payload ceiling"));
    }

    #[test]
    fn tool_definitions_become_tool_config() {
        let defs = vec![ToolDefinition {
            name: "search".to_string(),
            description: "Search the web".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
        }];
        let config = ChatBedrock::convert_tools(Some(&defs), Some(&ToolChoice::Auto))
            .unwrap()
            .unwrap();
        assert_eq!(config.tools().len(), 1);
    }
}

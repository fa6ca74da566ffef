//! AWS Bedrock provider for deepcurrent.
//!
//! [`ChatBedrock`] drives the Converse/ConverseStream API: tool use,
//! opaque-document input (PDF summarization) and cache-point hints are all
//! expressed through the core message model. [`registry`] resolves the
//! opaque short model names the rest of the system uses.
//!
//! # Example
//!
//! ```rust,no_run
//! use deepcurrent::{ChatModel, Message};
//! use deepcurrent_bedrock::ChatBedrock;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let model = ChatBedrock::new("us-west-2")
//!     .await?
//!     .with_model("us.amazon.nova-pro-v1:0")
//!     .with_max_tokens(4096);
//!
//! let messages = vec![Message::human("Summarize the Converse API in a sentence.")];
//! let result = model.generate(&messages, None, None).await?;
//! println!("{}", result.message.as_text());
//! # Ok(())
//! # }
//! ```

mod chat_models;
pub mod registry;

pub use chat_models::ChatBedrock;
pub use registry::{ModelEntry, ModelRegistry, ModelUsage};

//! These models represent the objects passed around by the agent
//!
//! There are several different related formats we need to interact with:
//! - openai chat completion messages/tools, sent from the agent to the LLM
//! - openai responses input items, sent from the agent to the LLM
//! - anthropic messages/tools, sent from the agent to the LLM
//! - gemini contents/parts, sent from the agent to the LLM
//! - persisted conversation history, replayed into the agent on restart
//!
//! These all overlap to varying degrees. We always immediately convert those data models
//! into the internal structs using to/from helpers. Because of the need for compatibility,
//! the internal models are not an exactly match to any of these formats. Anything a
//! provider needs that the internal model cannot express travels in `ProviderMeta`.
pub mod content;
pub mod message;
pub mod tool;

//! Conversation controller for the Agent Development Kit playground.
//!
//! - `Playground` turn loop over an injected `ChatModel`
//! - streamed answers (`ResponseShape::Streaming`) or a code-interpreter
//!   round-trip followed by a streamed synthesis (`ResponseShape::ToolAugmented`)
//! - append-only conversation log with a display-only progress marker
//! - suggestion tree navigation
//! - Gemini adapter via `GoogleModel`

pub mod conversation;
pub mod error;
pub mod llm;
pub mod playground;
pub mod suggestions;
pub mod tools;

pub use conversation::{ConversationEntry, ConversationLog, EntryId, EntryKind, RenderedEntry};
pub use error::{PlaygroundError, ProviderError, SchemaError, ToolError};
pub use llm::{
    ChatModel, DEFAULT_GOOGLE_MODEL, GoogleModel, GoogleModelConfig, ModelCompletion,
    ModelMessage, ModelToolCall, ModelToolChoice, ModelToolDefinition, ModelUsage, TextStream,
};
pub use playground::{
    DEFAULT_SYSTEM_INSTRUCTION, IgnoreReason, Playground, PlaygroundBuilder, PlaygroundConfig,
    PlaygroundSnapshot, ResponseShape, Submission, SubmitOutcome, TurnState,
};
pub use suggestions::{NavigatorState, Suggestion, SuggestionNavigator};
pub use tools::ToolSpec;
pub use tools::code_interpreter::{CodeExecutor, ModelCodeInterpreter};

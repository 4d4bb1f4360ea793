//! The playground's single tool. Execution is delegated back to the model,
//! which is asked to behave as a plain interpreter.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use crate::error::{SchemaError, ToolError};
use crate::llm::{ChatModel, ModelMessage, ModelToolCall, ModelToolChoice};
use crate::tools::ToolSpec;

pub const CODE_INTERPRETER_TOOL: &str = "code_interpreter";

/// Result text recorded when the interpreter call fails.
pub const TOOL_FAILURE_OUTPUT: &str = "Error: Failed to execute code.";

pub const INTERPRETER_INSTRUCTION: &str = "You are a code interpreter. Execute the given code and return only the raw standard output. Do not add any explanation, commentary, or markdown formatting.";

pub fn code_interpreter_spec() -> Result<ToolSpec, SchemaError> {
    ToolSpec::new(
        CODE_INTERPRETER_TOOL,
        "Executes Python code and returns the standard output.",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "code": {
                "type": "string",
                "description": "The Python code to execute."
            }
        },
        "required": ["code"]
    }))
}

/// Returns the code of the first call that targets `spec` with a valid,
/// non-empty `code` argument. Every other call is ignored.
pub fn first_code_request<'a>(
    spec: &ToolSpec,
    tool_calls: &'a [ModelToolCall],
) -> Option<(&'a ModelToolCall, String)> {
    tool_calls
        .iter()
        .filter(|call| call.name == spec.name())
        .find_map(|call| {
            if let Err(err) = spec.validate_arguments(&call.arguments) {
                tracing::debug!(error = %err, "ignoring malformed code_interpreter call");
                return None;
            }
            let code = call.arguments.get("code")?.as_str()?;
            (!code.trim().is_empty()).then(|| (call, code.to_string()))
        })
}

#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, code: &str) -> Result<String, ToolError>;
}

/// Runs code by asking the model to act as an interpreter.
pub struct ModelCodeInterpreter {
    model: Arc<dyn ChatModel>,
}

impl ModelCodeInterpreter {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl CodeExecutor for ModelCodeInterpreter {
    async fn execute(&self, code: &str) -> Result<String, ToolError> {
        let messages = [
            ModelMessage::System(INTERPRETER_INSTRUCTION.to_string()),
            ModelMessage::User(code.to_string()),
        ];

        let completion = self
            .model
            .invoke(&messages, &[], ModelToolChoice::None)
            .await?;

        let Some(output) = completion.text else {
            return Err(ToolError::Execution(
                "interpreter returned no output".to_string(),
            ));
        };

        Ok(strip_code_fences(&output))
    }
}

/// Removes a Markdown fence wrapped around the whole output, if any.
pub fn strip_code_fences(output: &str) -> String {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)\A\s*```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)\r?\n?```\s*\z")
            .expect("fence pattern is valid")
    });

    match fence.captures(output).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str().to_string(),
        None => output.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::error::ProviderError;
    use crate::llm::{ModelCompletion, ModelToolDefinition, TextStream};

    struct EchoModel {
        reply: Mutex<Option<Result<ModelCompletion, ProviderError>>>,
        seen: Mutex<Vec<ModelMessage>>,
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn invoke(
            &self,
            messages: &[ModelMessage],
            tools: &[ModelToolDefinition],
            _tool_choice: ModelToolChoice,
        ) -> Result<ModelCompletion, ProviderError> {
            assert!(tools.is_empty());
            self.seen
                .lock()
                .expect("lock poisoned")
                .extend_from_slice(messages);
            self.reply
                .lock()
                .expect("lock poisoned")
                .take()
                .unwrap_or_else(|| Err(ProviderError::Response("no reply".to_string())))
        }

        async fn stream(&self, _messages: &[ModelMessage]) -> Result<TextStream, ProviderError> {
            Err(ProviderError::Request("not streamed".to_string()))
        }
    }

    fn call(name: &str, arguments: serde_json::Value) -> ModelToolCall {
        ModelToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn first_code_request_skips_other_tools_and_bad_arguments() {
        let spec = code_interpreter_spec().expect("valid schema");
        let calls = vec![
            call("web_search", json!({"q": "rust"})),
            call(CODE_INTERPRETER_TOOL, json!({"code": 5})),
            call(CODE_INTERPRETER_TOOL, json!({"code": "print(1+1)"})),
            call(CODE_INTERPRETER_TOOL, json!({"code": "print(2)"})),
        ];

        let (picked, code) = first_code_request(&spec, &calls).expect("one call honored");
        assert_eq!(code, "print(1+1)");
        assert_eq!(picked.arguments["code"], "print(1+1)");
    }

    #[test]
    fn first_code_request_rejects_blank_code() {
        let spec = code_interpreter_spec().expect("valid schema");
        let calls = vec![call(CODE_INTERPRETER_TOOL, json!({"code": "  "}))];
        assert!(first_code_request(&spec, &calls).is_none());
    }

    #[test]
    fn strip_code_fences_unwraps_single_block() {
        assert_eq!(strip_code_fences("```\n2\n```"), "2");
        assert_eq!(strip_code_fences("```text\n[1, 4]\n```\n"), "[1, 4]");
        assert_eq!(strip_code_fences("  3.872983346207417\n"), "3.872983346207417");
        assert_eq!(strip_code_fences("a ``` b"), "a ``` b");
    }

    #[tokio::test]
    async fn interpreter_sends_code_as_whole_prompt() {
        let model = Arc::new(EchoModel {
            reply: Mutex::new(Some(Ok(ModelCompletion {
                text: Some("```\n2\n```".to_string()),
                ..ModelCompletion::default()
            }))),
            seen: Mutex::new(Vec::new()),
        });
        let interpreter = ModelCodeInterpreter::new(model.clone());

        let output = interpreter.execute("print(1+1)").await.expect("executes");
        assert_eq!(output, "2");

        let seen = model.seen.lock().expect("lock poisoned").clone();
        assert_eq!(
            seen,
            vec![
                ModelMessage::System(INTERPRETER_INSTRUCTION.to_string()),
                ModelMessage::User("print(1+1)".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn interpreter_propagates_provider_failure() {
        let model = Arc::new(EchoModel {
            reply: Mutex::new(Some(Err(ProviderError::Request("quota".to_string())))),
            seen: Mutex::new(Vec::new()),
        });
        let interpreter = ModelCodeInterpreter::new(model);

        let err = interpreter.execute("print(1)").await.expect_err("fails");
        assert!(matches!(err, ToolError::Provider(ProviderError::Request(_))));
    }
}

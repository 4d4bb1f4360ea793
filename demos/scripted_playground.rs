use std::collections::VecDeque;
use std::error::Error;
use std::sync::Mutex;

use adk_playground::{
    ChatModel, EntryKind, ModelCompletion, ModelMessage, ModelToolCall, ModelToolChoice,
    ModelToolDefinition, Playground, ProviderError, ResponseShape, TextStream,
};
use async_trait::async_trait;
use futures_util::stream;
use serde_json::json;

/// Replays canned completions and streams so the playground runs offline.
#[derive(Default)]
struct ScriptedModel {
    completions: Mutex<VecDeque<ModelCompletion>>,
    answers: Mutex<VecDeque<Vec<&'static str>>>,
}

impl ScriptedModel {
    fn new(completions: Vec<ModelCompletion>, answers: Vec<Vec<&'static str>>) -> Self {
        Self {
            completions: Mutex::new(VecDeque::from(completions)),
            answers: Mutex::new(VecDeque::from(answers)),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn invoke(
        &self,
        _messages: &[ModelMessage],
        _tools: &[ModelToolDefinition],
        _tool_choice: ModelToolChoice,
    ) -> Result<ModelCompletion, ProviderError> {
        let mut guard = self.completions.lock().expect("lock poisoned");
        guard.pop_front().ok_or_else(|| {
            ProviderError::Response("scripted model exhausted completions".to_string())
        })
    }

    async fn stream(&self, _messages: &[ModelMessage]) -> Result<TextStream, ProviderError> {
        let mut guard = self.answers.lock().expect("lock poisoned");
        let chunks = guard.pop_front().ok_or_else(|| {
            ProviderError::Response("scripted model exhausted streams".to_string())
        })?;
        let chunks = chunks
            .into_iter()
            .map(|chunk| Ok::<_, ProviderError>(chunk.to_string()))
            .collect::<Vec<_>>();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

fn print_log(playground: &Playground) {
    for entry in playground.entries() {
        let tag = match entry.kind {
            EntryKind::User => "user",
            EntryKind::Agent => "agent",
            EntryKind::Thought => "thought",
            EntryKind::ToolCall => "tool_call",
            EntryKind::ToolResult => "tool_result",
            EntryKind::Error => "error",
        };
        println!("[{}] {tag}: {}", entry.id, entry.text);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let model = ScriptedModel::new(
        vec![
            ModelCompletion {
                tool_calls: vec![ModelToolCall {
                    id: "call_1".to_string(),
                    name: "code_interpreter".to_string(),
                    arguments: json!({"code": "print(sorted([8, 4, 1, 9, 5]))"}),
                }],
                ..ModelCompletion::default()
            },
            ModelCompletion {
                text: Some("```\n[1, 4, 5, 8, 9]\n```".to_string()),
                ..ModelCompletion::default()
            },
        ],
        vec![vec!["The sorted list is ", "[1, 4, 5, 8, 9]", "."]],
    );

    let playground = Playground::builder()
        .model(model)
        .shape(ResponseShape::ToolAugmented)
        .build()?;

    let outcome = playground.choose("python_sort").await;
    println!("tool-augmented turn: {outcome:?}");
    print_log(&playground);

    let streaming = Playground::builder()
        .model(ScriptedModel::new(
            Vec::new(),
            vec![vec!["The ADK splits ", "agents, tools ", "and orchestration."]],
        ))
        .shape(ResponseShape::Streaming)
        .build()?;

    streaming.set_input("Explain the ADK architecture in simple terms.");
    let outcome = streaming.send().await;
    println!("streaming turn: {outcome:?}");
    print_log(&streaming);
    for suggestion in streaming.displayed_suggestions() {
        println!("  next: {} ({})", suggestion.label, suggestion.key);
    }

    Ok(())
}

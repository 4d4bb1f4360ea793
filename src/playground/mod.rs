use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::conversation::{
    ConversationEntry, ConversationLog, EntryKind, PROGRESS_MARKER, RenderedEntry,
};
use crate::error::{PlaygroundError, ProviderError};
use crate::llm::{ChatModel, ModelMessage, ModelToolCall, ModelToolChoice};
use crate::suggestions::{
    Suggestion, SuggestionNavigator, code_interpreter_suggestions, guided_tour_suggestions,
};
use crate::tools::ToolSpec;
use crate::tools::code_interpreter::{
    CODE_INTERPRETER_TOOL, CodeExecutor, ModelCodeInterpreter, TOOL_FAILURE_OUTPUT,
    code_interpreter_spec, first_code_request,
};

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are the primary System Orchestrator for the \"Advanced Agent Development Kit\" (ADK). Your core function is to receive user requests, break them down into a logical, step-by-step execution plan, and then provide a final, comprehensive response. Your output MUST be structured, clear, and demonstrate advanced reasoning. Always start by acknowledging the user's goal, then present your plan, and finally, execute the plan to deliver the result. You do not have access to live tools in this playground, so simulate their execution in your response.";

/// Note recorded before the code-interpreter round-trip.
pub const TOOL_THOUGHT: &str =
    "The user's request requires running code. I will use the Code Interpreter tool.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    /// One streamed answer, no tools.
    Streaming,
    /// Decide, run the code interpreter, then stream a synthesized answer.
    ToolAugmented,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    #[default]
    Idle,
    AwaitingInitial,
    AwaitingTool,
    AwaitingFinal,
    Done,
    Failed,
    Cancelled,
}

impl TurnState {
    pub fn is_loading(self) -> bool {
        matches!(
            self,
            TurnState::AwaitingInitial | TurnState::AwaitingTool | TurnState::AwaitingFinal
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submission {
    /// Send whatever is in the input buffer.
    Typed,
    /// Send the prompt of the suggestion with this key.
    Suggestion(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    Busy,
    EmptyMessage,
    UnknownSuggestion,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Ignored(IgnoreReason),
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct PlaygroundConfig {
    pub system_instruction: String,
    pub shape: ResponseShape,
    pub progress_marker: String,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            shape: ResponseShape::ToolAugmented,
            progress_marker: PROGRESS_MARKER.to_string(),
        }
    }
}

/// Everything a front end needs to redraw the playground.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PlaygroundSnapshot {
    pub entries: Vec<RenderedEntry>,
    pub suggestions: Vec<Suggestion>,
    pub state: TurnState,
    pub is_loading: bool,
    pub input: String,
}

#[derive(Default)]
pub struct PlaygroundBuilder {
    model: Option<Arc<dyn ChatModel>>,
    executor: Option<Arc<dyn CodeExecutor>>,
    suggestions: Option<Vec<Suggestion>>,
    config: PlaygroundConfig,
}

impl PlaygroundBuilder {
    pub fn model<M>(self, model: M) -> Self
    where
        M: ChatModel + 'static,
    {
        self.shared_model(Arc::new(model))
    }

    pub fn shared_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Overrides the default executor, which asks the model to interpret the code.
    pub fn code_executor<E>(mut self, executor: E) -> Self
    where
        E: CodeExecutor + 'static,
    {
        self.executor = Some(Arc::new(executor));
        self
    }

    pub fn suggestions(mut self, suggestions: Vec<Suggestion>) -> Self {
        self.suggestions = Some(suggestions);
        self
    }

    pub fn config(mut self, config: PlaygroundConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_instruction(mut self, system_instruction: impl Into<String>) -> Self {
        self.config.system_instruction = system_instruction.into();
        self
    }

    pub fn shape(mut self, shape: ResponseShape) -> Self {
        self.config.shape = shape;
        self
    }

    pub fn build(self) -> Result<Playground, PlaygroundError> {
        let Some(model) = self.model else {
            return Err(PlaygroundError::Config(
                "playground model must be configured via PlaygroundBuilder::model(...)"
                    .to_string(),
            ));
        };

        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(ModelCodeInterpreter::new(model.clone())));

        let suggestions = self.suggestions.unwrap_or_else(|| match self.config.shape {
            ResponseShape::Streaming => guided_tour_suggestions(),
            ResponseShape::ToolAugmented => code_interpreter_suggestions(),
        });
        let navigator = SuggestionNavigator::new(suggestions)?;

        let session = Session {
            log: ConversationLog::with_marker(self.config.progress_marker.clone()),
            navigator,
            input: String::new(),
            turn: TurnState::Idle,
            cancel: None,
            config: self.config,
        };
        let (updates, _) = watch::channel(session.snapshot());

        Ok(Playground {
            inner: Arc::new(Inner {
                model,
                executor,
                code_tool: code_interpreter_spec()?,
                session: Mutex::new(session),
                updates,
            }),
        })
    }
}

/// Conversation controller behind the playground chat.
///
/// Cloning yields another handle to the same conversation. State is only
/// locked between awaits, so a second `submit` issued while a turn is running
/// sees the busy flag and returns immediately.
#[derive(Clone)]
pub struct Playground {
    inner: Arc<Inner>,
}

struct Inner {
    model: Arc<dyn ChatModel>,
    executor: Arc<dyn CodeExecutor>,
    code_tool: ToolSpec,
    session: Mutex<Session>,
    updates: watch::Sender<PlaygroundSnapshot>,
}

struct Session {
    log: ConversationLog,
    navigator: SuggestionNavigator,
    input: String,
    turn: TurnState,
    cancel: Option<CancellationToken>,
    config: PlaygroundConfig,
}

impl Session {
    fn snapshot(&self) -> PlaygroundSnapshot {
        PlaygroundSnapshot {
            entries: self.log.render(),
            suggestions: self.navigator.displayed().to_vec(),
            state: self.turn,
            is_loading: self.turn.is_loading(),
            input: self.input.clone(),
        }
    }

    /// Brings `snapshot` up to date, re-rendering only entries from the first
    /// one that was still in flight.
    fn refresh(&self, snapshot: &mut PlaygroundSnapshot) {
        let settled = snapshot
            .entries
            .iter()
            .take_while(|entry| !entry.in_flight)
            .count()
            .min(self.log.len());
        snapshot.entries.truncate(settled);
        snapshot.entries.extend(self.log.render_from(settled));

        snapshot.suggestions.clear();
        snapshot
            .suggestions
            .extend_from_slice(self.navigator.displayed());
        snapshot.state = self.turn;
        snapshot.is_loading = self.turn.is_loading();
        snapshot.input.clone_from(&self.input);
    }
}

struct Turn {
    prompt: String,
    system_instruction: String,
    shape: ResponseShape,
    cancel: CancellationToken,
}

enum Interrupt {
    Cancelled,
    Failed(ProviderError),
}

impl From<ProviderError> for Interrupt {
    fn from(err: ProviderError) -> Self {
        Interrupt::Failed(err)
    }
}

impl Playground {
    pub fn builder() -> PlaygroundBuilder {
        PlaygroundBuilder::default()
    }

    /// Receivers must not call back into the playground while holding a
    /// borrow of the current value.
    pub fn subscribe(&self) -> watch::Receiver<PlaygroundSnapshot> {
        self.inner.updates.subscribe()
    }

    pub fn snapshot(&self) -> PlaygroundSnapshot {
        self.lock().snapshot()
    }

    pub fn state(&self) -> TurnState {
        self.lock().turn
    }

    pub fn is_loading(&self) -> bool {
        self.state().is_loading()
    }

    pub fn entries(&self) -> Vec<ConversationEntry> {
        self.lock().log.entries().to_vec()
    }

    pub fn input(&self) -> String {
        self.lock().input.clone()
    }

    pub fn set_input(&self, text: impl Into<String>) {
        let text = text.into();
        self.update(|session| session.input = text);
    }

    pub fn displayed_suggestions(&self) -> Vec<Suggestion> {
        self.lock().navigator.displayed().to_vec()
    }

    pub fn shape(&self) -> ResponseShape {
        self.lock().config.shape
    }

    pub fn system_instruction(&self) -> String {
        self.lock().config.system_instruction.clone()
    }

    /// Applies to turns started after the call.
    pub fn set_system_instruction(&self, instruction: impl Into<String>) {
        let instruction = instruction.into();
        self.update(|session| session.config.system_instruction = instruction);
    }

    /// Stops the running turn at its next suspension point. Returns `false`
    /// when nothing is running.
    pub fn cancel(&self) -> bool {
        match &self.lock().cancel {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn send(&self) -> SubmitOutcome {
        self.submit(Submission::Typed).await
    }

    pub async fn choose(&self, key: impl Into<String>) -> SubmitOutcome {
        self.submit(Submission::Suggestion(key.into())).await
    }

    /// Runs one turn to completion, failure or cancellation.
    ///
    /// Model errors never escape: they end up as a single `error` entry.
    pub async fn submit(&self, submission: Submission) -> SubmitOutcome {
        let turn = match self.begin_turn(submission) {
            Ok(turn) => turn,
            Err(reason) => {
                tracing::debug!(?reason, "submission ignored");
                return SubmitOutcome::Ignored(reason);
            }
        };

        tracing::info!(shape = ?turn.shape, "playground turn started");
        let mut guard = TurnGuard {
            playground: self,
            armed: true,
        };

        let result = match turn.shape {
            ResponseShape::Streaming => self.run_streaming(&turn).await,
            ResponseShape::ToolAugmented => self.run_tool_augmented(&turn).await,
        };

        guard.armed = false;
        self.finish_turn(result)
    }

    fn begin_turn(&self, submission: Submission) -> Result<Turn, IgnoreReason> {
        let mut session = self.lock();
        if session.turn.is_loading() {
            return Err(IgnoreReason::Busy);
        }

        let (prompt, selected) = match &submission {
            Submission::Typed => (session.input.clone(), None),
            Submission::Suggestion(key) => {
                let Some(node) = session.navigator.find(key) else {
                    return Err(IgnoreReason::UnknownSuggestion);
                };
                (node.prompt.clone(), Some(key.as_str()))
            }
        };

        if prompt.trim().is_empty() {
            return Err(IgnoreReason::EmptyMessage);
        }

        session.log.append(EntryKind::User, prompt.clone());
        match selected {
            Some(key) => session.navigator.select(key),
            None => {
                session.navigator.reset();
                session.input.clear();
            }
        }

        let shape = session.config.shape;
        session.turn = match shape {
            ResponseShape::Streaming => TurnState::AwaitingFinal,
            ResponseShape::ToolAugmented => TurnState::AwaitingInitial,
        };
        let cancel = CancellationToken::new();
        session.cancel = Some(cancel.clone());

        let turn = Turn {
            prompt,
            system_instruction: session.config.system_instruction.clone(),
            shape,
            cancel,
        };
        self.publish(&session);
        Ok(turn)
    }

    async fn run_streaming(&self, turn: &Turn) -> Result<(), Interrupt> {
        let messages = [
            ModelMessage::System(turn.system_instruction.clone()),
            ModelMessage::User(turn.prompt.clone()),
        ];
        self.stream_answer(&messages, &turn.cancel).await
    }

    async fn run_tool_augmented(&self, turn: &Turn) -> Result<(), Interrupt> {
        let messages = [
            ModelMessage::System(turn.system_instruction.clone()),
            ModelMessage::User(turn.prompt.clone()),
        ];
        let tools = [self.inner.code_tool.definition()];

        let completion = cancellable(
            &turn.cancel,
            self.inner
                .model
                .invoke(&messages, &tools, ModelToolChoice::Auto),
        )
        .await?;

        let request = first_code_request(&self.inner.code_tool, &completion.tool_calls)
            .map(|(call, code)| (call.clone(), code));
        let Some((call, code)) = request else {
            let text = completion.text.unwrap_or_default();
            self.update(|session| session.log.append(EntryKind::Agent, text));
            return Ok(());
        };

        tracing::debug!(ignored = completion.tool_calls.len() - 1, "code_interpreter requested");
        self.update(|session| {
            session.log.append(EntryKind::Thought, TOOL_THOUGHT);
            session.log.append(EntryKind::ToolCall, code.clone());
            session.turn = TurnState::AwaitingTool;
        });

        let output = tokio::select! {
            biased;
            _ = turn.cancel.cancelled() => return Err(Interrupt::Cancelled),
            result = self.inner.executor.execute(&code) => result.unwrap_or_else(|err| {
                tracing::warn!(error = %err, "code interpreter failed; using fallback output");
                TOOL_FAILURE_OUTPUT.to_string()
            }),
        };

        self.update(|session| {
            session.log.append(EntryKind::ToolResult, output.clone());
            session.turn = TurnState::AwaitingFinal;
        });

        let history = [
            ModelMessage::System(turn.system_instruction.clone()),
            ModelMessage::User(turn.prompt.clone()),
            assistant_turn(completion.text, call),
            ModelMessage::ToolResult {
                tool_name: CODE_INTERPRETER_TOOL.to_string(),
                content: output,
            },
        ];
        self.stream_answer(&history, &turn.cancel).await
    }

    /// Streams into a fresh `agent` entry, finalizing it when the stream closes.
    async fn stream_answer(
        &self,
        messages: &[ModelMessage],
        cancel: &CancellationToken,
    ) -> Result<(), Interrupt> {
        let entry = self.update(|session| session.log.begin_stream());
        let mut stream = cancellable(cancel, self.inner.model.stream(messages)).await?;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Interrupt::Cancelled),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    tracing::trace!(%entry, bytes = chunk.len(), "chunk");
                    self.update(|session| session.log.append_chunk(entry, &chunk));
                }
                Some(Err(err)) => return Err(Interrupt::Failed(err)),
                None => break,
            }
        }

        self.update(|session| session.log.finalize());
        Ok(())
    }

    fn finish_turn(&self, result: Result<(), Interrupt>) -> SubmitOutcome {
        let outcome = self.update(|session| {
            session.cancel = None;
            match result {
                Ok(()) => {
                    session.log.finalize();
                    session.turn = TurnState::Done;
                    SubmitOutcome::Completed
                }
                Err(Interrupt::Cancelled) => {
                    session.log.finalize();
                    session.turn = TurnState::Cancelled;
                    SubmitOutcome::Cancelled
                }
                Err(Interrupt::Failed(err)) => {
                    tracing::warn!(error = %err, "playground turn failed");
                    session.log.fail_in_flight(err.user_message());
                    session.turn = TurnState::Failed;
                    SubmitOutcome::Failed
                }
            }
        });

        tracing::info!(?outcome, "playground turn finished");
        outcome
    }

    fn update<T>(&self, apply: impl FnOnce(&mut Session) -> T) -> T {
        let mut session = self.lock();
        let value = apply(&mut session);
        self.publish(&session);
        value
    }

    fn publish(&self, session: &Session) {
        self.inner
            .updates
            .send_modify(|snapshot| session.refresh(snapshot));
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the busy flag if a turn future is dropped before it finishes.
struct TurnGuard<'a> {
    playground: &'a Playground,
    armed: bool,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("turn dropped mid-flight");
            self.playground.update(|session| {
                session.cancel = None;
                session.log.finalize();
                session.turn = TurnState::Cancelled;
            });
        }
    }
}

async fn cancellable<T, F>(cancel: &CancellationToken, future: F) -> Result<T, Interrupt>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        result = future => result.map_err(Interrupt::from),
    }
}

fn assistant_turn(text: Option<String>, call: ModelToolCall) -> ModelMessage {
    ModelMessage::Assistant {
        content: text,
        tool_calls: vec![call],
    }
}

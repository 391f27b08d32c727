//! Agentic Tool Loop
//!
//! Core loop: prompt → model → if tool calls, dispatch them in order → feed
//! results back → repeat until the model answers with text only or the
//! round cap is hit.
//!
//! Exactly one model call or tool call is outstanding at a time. Every tool
//! request in an assistant message is answered by one tool-result message,
//! in request order, before the model is called again.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::AgentContext;
use crate::dispatcher::ToolDispatcher;
use crate::provider::{CompletionOptions, LlmProvider, TokenUsage};
use crate::system_prompt::{system_message, DEFAULT_SYSTEM_PROMPT};
use crate::types::{Message, ToolCallRequest};

/// Default round cap.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

// ---------------------------------------------------------------------------
// Configuration and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    /// Maximum model rounds per user turn (default 10).
    pub max_iterations: usize,
    pub options: CompletionOptions,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            options: CompletionOptions::default(),
        }
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered without requesting tools.
    Completed,
    /// The round cap was reached while the model still wanted tools.
    MaxIterations,
    /// Cancelled between rounds.
    Cancelled,
}

/// Progress notifications for status lines.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    RoundStarted { round: usize },
    AssistantText(String),
    ToolStarted { id: String, name: String, arguments: serde_json::Value },
    ToolFinished { id: String, name: String, is_error: bool },
}

pub type EventCallback = Arc<dyn Fn(&LoopEvent) + Send + Sync>;

#[derive(Debug)]
pub struct AgentLoopResult {
    pub outcome: TurnOutcome,
    /// Final answer text, only for `Completed`.
    pub text: Option<String>,
    /// Messages generated during the loop (assistant + tool results).
    pub new_messages: Vec<Message>,
    /// Model rounds performed.
    pub rounds: usize,
    /// Token usage accumulated across rounds.
    pub usage: TokenUsage,
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// Run the tool loop over an already-assembled transcript.
///
/// Model failures are returned as `Err`; tool failures never are, they are
/// fed back to the model as failed results.
pub async fn run_agent_loop(
    provider: &dyn LlmProvider,
    dispatcher: &ToolDispatcher,
    messages: &[Message],
    config: &AgentLoopConfig,
    ctx: &AgentContext,
    cancel: &CancellationToken,
    on_event: Option<&EventCallback>,
) -> Result<AgentLoopResult> {
    let mut transcript: Vec<Message> = messages.to_vec();
    let mut new_messages: Vec<Message> = Vec::new();
    let mut usage = TokenUsage::default();
    let mut rounds = 0;

    let emit = |event: LoopEvent| {
        if let Some(cb) = on_event {
            cb(&event);
        }
    };

    loop {
        if cancel.is_cancelled() {
            info!(rounds, "agent loop cancelled");
            return Ok(AgentLoopResult {
                outcome: TurnOutcome::Cancelled,
                text: None,
                new_messages,
                rounds,
                usage,
            });
        }

        if rounds >= config.max_iterations {
            warn!(rounds, max = config.max_iterations, "agent loop hit iteration limit");
            return Ok(AgentLoopResult {
                outcome: TurnOutcome::MaxIterations,
                text: None,
                new_messages,
                rounds,
                usage,
            });
        }

        rounds += 1;
        emit(LoopEvent::RoundStarted { round: rounds });

        let tools = dispatcher.registry().read().await.descriptors();
        info!(
            round = rounds,
            tool_count = tools.len(),
            message_count = transcript.len(),
            "calling model provider"
        );
        let response = provider
            .complete(&transcript, &tools, &config.options)
            .await
            .with_context(|| format!("model request failed in round {}", rounds))?;
        usage.add(&response.usage);

        if response.tool_calls.is_empty() {
            debug!(round = rounds, stop_reason = ?response.stop_reason, "model answered without tools");
            let msg = Message::assistant(response.content.clone());
            transcript.push(msg.clone());
            new_messages.push(msg);
            if !response.content.is_empty() {
                emit(LoopEvent::AssistantText(response.content.clone()));
            }
            return Ok(AgentLoopResult {
                outcome: TurnOutcome::Completed,
                text: Some(response.content),
                new_messages,
                rounds,
                usage,
            });
        }

        if !response.content.is_empty() {
            let msg = Message::assistant(response.content.clone());
            transcript.push(msg.clone());
            new_messages.push(msg);
            emit(LoopEvent::AssistantText(response.content.clone()));
        }

        info!(
            round = rounds,
            tool_call_count = response.tool_calls.len(),
            "model requested tools"
        );

        // Providers may send null for "no arguments".
        let calls: Vec<ToolCallRequest> = response
            .tool_calls
            .into_iter()
            .map(|call| ToolCallRequest {
                arguments: if call.arguments.is_null() {
                    serde_json::json!({})
                } else {
                    call.arguments
                },
                ..call
            })
            .collect();

        let msg = Message::tool_calls(calls.clone());
        transcript.push(msg.clone());
        new_messages.push(msg);

        for call in &calls {
            emit(LoopEvent::ToolStarted {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            });

            let result = dispatcher.execute(call, ctx).await;

            emit(LoopEvent::ToolFinished {
                id: call.id.clone(),
                name: call.name.clone(),
                is_error: result.is_error,
            });

            let msg = Message::tool_result(result);
            transcript.push(msg.clone());
            new_messages.push(msg);
        }
    }
}

// ---------------------------------------------------------------------------
// Agent (history owner)
// ---------------------------------------------------------------------------

/// Holds the persisted conversation and runs one loop per user turn.
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    dispatcher: Arc<ToolDispatcher>,
    config: AgentLoopConfig,
    system_template: String,
    history: Vec<Message>,
    on_event: Option<EventCallback>,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        dispatcher: Arc<ToolDispatcher>,
        config: AgentLoopConfig,
    ) -> Self {
        Self {
            provider,
            dispatcher,
            config,
            system_template: DEFAULT_SYSTEM_PROMPT.to_string(),
            history: Vec::new(),
            on_event: None,
        }
    }

    pub fn with_system_prompt(mut self, template: impl Into<String>) -> Self {
        self.system_template = template.into();
        self
    }

    /// Seed with previously persisted history. System messages are dropped;
    /// a fresh one is rendered every turn.
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history
            .into_iter()
            .filter(|m| m.role != crate::types::Role::System)
            .collect();
        self
    }

    pub fn on_event(mut self, cb: EventCallback) -> Self {
        self.on_event = Some(cb);
        self
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Run one user turn.
    ///
    /// On success the turn's messages (minus the system prompt) are appended
    /// to history, whatever the outcome. On a model failure history is left
    /// exactly as it was.
    pub async fn run_turn(
        &mut self,
        user_input: &str,
        ctx: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<AgentLoopResult> {
        let tool_names: Vec<String> = self
            .dispatcher
            .registry()
            .read()
            .await
            .descriptors()
            .into_iter()
            .map(|d| d.name)
            .collect();

        let user = Message::user(user_input);
        let mut transcript = Vec::with_capacity(self.history.len() + 2);
        transcript.push(system_message(&self.system_template, ctx, &tool_names));
        transcript.extend(self.history.iter().cloned());
        transcript.push(user.clone());

        let result = run_agent_loop(
            self.provider.as_ref(),
            &self.dispatcher,
            &transcript,
            &self.config,
            ctx,
            cancel,
            self.on_event.as_ref(),
        )
        .await?;

        self.history.push(user);
        self.history.extend(result.new_messages.iter().cloned());
        debug!(
            history_len = self.history.len(),
            outcome = ?result.outcome,
            "turn folded into history"
        );
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

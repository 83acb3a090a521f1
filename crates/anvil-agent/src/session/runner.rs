use super::*;
use crate::truncation::clip_text;
use crate::{
    ChangeBuffer, EventKind, Observation, ParsedReply, PendingChange, PromptKind,
    PromptVariables, ToolCall, ToolContext, TurnRole, actions_preview, clean_message,
    failed_block, history_block, observations_block, parse_reply, render_tool_catalog,
};
use anvil_llm::{ChatMessage, ChatRequest};
use std::fmt::Write as _;
use tracing::debug;

const MALFORMED_REPLY_CHARS: usize = 4_000;

/// Mutable state of one run. Turns are appended straight to the session;
/// `turn_start` marks where this run's turns begin.
struct RunContext<'s> {
    session: &'s mut Session,
    run_id: String,
    message: String,
    turn_start: usize,
    history_block: String,
    changes: ChangeBuffer,
    applied: Vec<PendingChange>,
    auto_apply: bool,
    cancel: Option<CancelHandle>,
    steps: usize,
    model_calls: usize,
    answer: Option<String>,
}

impl RunContext<'_> {
    fn run_turns(&self) -> &[Turn] {
        &self.session.turns[self.turn_start..]
    }

    fn push(&mut self, turn: Turn) {
        self.session.turns.push(turn);
    }

    fn cancel_requested(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelHandle::is_cancelled)
    }

    fn next_call_id(&self) -> String {
        let issued = self
            .run_turns()
            .iter()
            .filter(|turn| turn.tool_call.is_some())
            .count();
        format!("call-{}", issued + 1)
    }

    fn event(&self, kind: EventKind) -> SessionEvent {
        SessionEvent::new(kind, self.session.id.clone(), self.run_id.clone())
    }
}

impl Agent {
    /// Runs the tool loop for one user message. Always returns a result;
    /// backend and configuration failures end the run with `fatal_error`.
    pub async fn run(
        &self,
        session: &mut Session,
        message: &str,
        options: RunOptions,
    ) -> AgentRunResult {
        let history_block = history_block(
            &session.turns,
            self.config.history_limit,
            self.config.history_entry_chars,
        );
        let mut run = RunContext {
            turn_start: session.turns.len(),
            session,
            run_id: Uuid::new_v4().to_string(),
            message: message.to_string(),
            history_block,
            changes: ChangeBuffer::new(),
            applied: Vec::new(),
            auto_apply: options.auto_apply.unwrap_or(self.config.auto_apply),
            cancel: options.cancel,
            steps: 0,
            model_calls: 0,
            answer: None,
        };
        self.emit(
            run.event(EventKind::RunStart)
                .with("model", run.session.model_id.clone())
                .with("max_steps", self.config.max_steps)
                .with("auto_apply", run.auto_apply),
        );

        let mut state = LoopState::Idle;
        loop {
            if state.is_cancellable() && run.cancel_requested() {
                debug!(run_id = %run.run_id, state = state.as_str(), "cancel requested");
                state = LoopState::Done(StopReason::Cancelled);
            }
            match state {
                LoopState::Done(reason) => return self.finish(run, reason, None),
                LoopState::Failed(failure) => {
                    return self.finish(run, StopReason::FatalError, Some(failure));
                }
                _ => {}
            }
            let next = self.advance(&mut run, &state).await;
            debug_assert!(
                state.can_transition_to(&next),
                "invalid loop transition {state} -> {next}"
            );
            debug!(run_id = %run.run_id, from = state.as_str(), to = next.as_str(), "loop transition");
            state = next;
        }
    }

    async fn advance(&self, run: &mut RunContext<'_>, state: &LoopState) -> LoopState {
        match state {
            LoopState::Idle => self.start(run),
            LoopState::Prompting => match self.build_messages(run) {
                Ok(messages) => LoopState::AwaitingModel {
                    request: build_request(run, messages),
                    repair_of: None,
                },
                Err(error) => LoopState::Failed(RunFailure::from_agent(&error)),
            },
            LoopState::AwaitingModel { request, repair_of } => {
                self.call_model(run, request, repair_of.clone()).await
            }
            LoopState::Parsing { reply, repair_of } => {
                self.parse(run, reply, repair_of.as_deref())
            }
            LoopState::Repairing { malformed, reason } => {
                match self.build_repair_messages(run, malformed, reason) {
                    Ok(messages) => LoopState::AwaitingModel {
                        request: build_request(run, messages),
                        repair_of: Some(malformed.clone()),
                    },
                    Err(error) => LoopState::Failed(RunFailure::from_agent(&error)),
                }
            }
            LoopState::Executing { call } => self.execute(run, call),
            LoopState::Done(_) | LoopState::Failed(_) => state.clone(),
        }
    }

    fn start(&self, run: &mut RunContext<'_>) -> LoopState {
        if run.message.trim().is_empty() {
            return LoopState::Failed(RunFailure::new("invalid_input", "user message is empty"));
        }
        if run.session.model_id.trim().is_empty() {
            return LoopState::Failed(RunFailure::new(
                "configuration",
                "session has no model id",
            ));
        }
        let message = run.message.clone();
        run.push(Turn::user(message.clone()));
        self.emit(run.event(EventKind::UserInput).with("message", message));
        LoopState::Prompting
    }

    /// System prompt followed by this run's transcript. Earlier runs reach the
    /// model only through `history_block`.
    fn build_messages(&self, run: &RunContext<'_>) -> Result<Vec<ChatMessage>, AgentError> {
        let system = PromptVariables {
            tool_catalog: render_tool_catalog(&self.registry.definitions()),
            ..PromptVariables::default()
        };
        let mut messages = vec![ChatMessage::system(
            self.prompts.render(PromptKind::System, &system)?,
        )];

        for turn in run.run_turns() {
            match turn.role {
                TurnRole::User => {
                    let variables = PromptVariables {
                        history_block: run.history_block.clone(),
                        user_message: turn.content.clone(),
                        clean_message: clean_message(&turn.content),
                        ..PromptVariables::default()
                    };
                    messages.push(ChatMessage::user(
                        self.prompts.render(PromptKind::Task, &variables)?,
                    ));
                }
                TurnRole::Assistant => messages.push(ChatMessage::assistant(assistant_text(turn))),
                TurnRole::Tool => {
                    let Some(observation) = &turn.observation else {
                        continue;
                    };
                    let variables = PromptVariables {
                        user_message: run.message.clone(),
                        clean_message: clean_message(&run.message),
                        observations_block: observations_block(&[observation], &self.config, None),
                        ..PromptVariables::default()
                    };
                    messages.push(ChatMessage::user(
                        self.prompts.render(PromptKind::Observation, &variables)?,
                    ));
                }
                TurnRole::Note => {}
            }
        }
        Ok(messages)
    }

    /// A self-contained re-prompt: the malformed reply, the task, and what the
    /// run has done so far.
    fn build_repair_messages(
        &self,
        run: &RunContext<'_>,
        malformed: &str,
        reason: &str,
    ) -> Result<Vec<ChatMessage>, AgentError> {
        let turns = run.run_turns();
        let calls: Vec<&ToolCall> = turns.iter().filter_map(|turn| turn.tool_call.as_ref()).collect();
        let observations: Vec<&Observation> = turns
            .iter()
            .filter_map(|turn| turn.observation.as_ref())
            .collect();
        let failed: Vec<&Observation> = observations
            .iter()
            .copied()
            .filter(|observation| observation.is_error())
            .collect();

        let variables = PromptVariables {
            history_block: run.history_block.clone(),
            user_message: run.message.clone(),
            clean_message: clean_message(&run.message),
            actions_preview: actions_preview(&calls),
            failed_block: failed_block(&failed),
            observations_block: observations_block(
                &observations,
                &self.config,
                Some(self.config.repair_observation_budget),
            ),
            malformed_reply: clip_text(malformed.trim(), MALFORMED_REPLY_CHARS),
            parse_error: reason.to_string(),
            tool_catalog: render_tool_catalog(&self.registry.definitions()),
        };
        Ok(vec![
            ChatMessage::system(self.prompts.render(PromptKind::System, &variables)?),
            ChatMessage::user(self.prompts.render(PromptKind::Repair, &variables)?),
        ])
    }

    async fn call_model(
        &self,
        run: &mut RunContext<'_>,
        request: &ChatRequest,
        repair_of: Option<String>,
    ) -> LoopState {
        run.model_calls += 1;
        self.emit(
            run.event(EventKind::ModelRequest)
                .with("backend", self.backend.name())
                .with("messages", request.messages.len())
                .with("repair", repair_of.is_some()),
        );

        let send = self.backend.send(request.clone());
        let outcome = match run.cancel.clone() {
            // A reply that is already available is kept; the cancel is then
            // caught before its tool call executes.
            Some(cancel) => tokio::select! {
                biased;
                outcome = send => Some(outcome),
                _ = cancel.cancelled() => None,
            },
            None => Some(send.await),
        };

        match outcome {
            None => LoopState::Done(StopReason::Cancelled),
            Some(Ok(reply)) => {
                self.emit(
                    run.event(EventKind::ModelReply)
                        .with("chars", reply.text.chars().count()),
                );
                LoopState::Parsing {
                    reply: reply.text,
                    repair_of,
                }
            }
            Some(Err(error)) => LoopState::Failed(RunFailure::from_chat(&error)),
        }
    }

    fn parse(&self, run: &mut RunContext<'_>, reply: &str, repair_of: Option<&str>) -> LoopState {
        match parse_reply(reply) {
            ParsedReply::ToolCall {
                name,
                arguments,
                display_text,
            } => {
                let call = ToolCall::new(run.next_call_id(), name, arguments);
                run.push(Turn::assistant(display_text, Some(call.clone())));
                LoopState::Executing { call }
            }
            ParsedReply::FinalAnswer { text } => {
                run.push(Turn::assistant(text.clone(), None));
                run.answer = Some(text);
                LoopState::Done(StopReason::Answered)
            }
            ParsedReply::Malformed { reason } => match repair_of {
                None => {
                    run.push(Turn::note(format!(
                        "Could not parse tool call ({reason}); asking the model to repair its reply."
                    )));
                    self.emit(run.event(EventKind::ParseRepair).with("reason", reason.clone()));
                    LoopState::Repairing {
                        malformed: reply.to_string(),
                        reason,
                    }
                }
                Some(original) => {
                    let answer = original.trim().to_string();
                    run.push(Turn::assistant(answer.clone(), None));
                    run.push(Turn::note(format!(
                        "Parse failure: the repaired reply was also unusable ({reason}); the original reply was kept as the answer."
                    )));
                    self.emit(
                        run.event(EventKind::Warning)
                            .with("message", "parse failure after repair")
                            .with("reason", reason),
                    );
                    run.answer = Some(answer);
                    LoopState::Done(StopReason::Answered)
                }
            },
        }
    }

    fn execute(&self, run: &mut RunContext<'_>, call: &ToolCall) -> LoopState {
        if run.steps >= self.config.max_steps {
            return self.step_limit(run);
        }

        self.emit(
            run.event(EventKind::ToolCallStart)
                .with("tool", call.name.clone())
                .with("call_id", call.id.clone())
                .with("arguments", call.arguments.clone()),
        );
        let staged_before = run.changes.len();
        let applied_before = run.applied.len();
        let observation = {
            let mut context = ToolContext {
                guard: &self.guard,
                changes: &mut run.changes,
                applied: &mut run.applied,
                auto_apply: run.auto_apply,
            };
            self.registry.dispatch(call, &mut context)
        };

        let mut end = run
            .event(EventKind::ToolCallEnd)
            .with("tool", call.name.clone())
            .with("call_id", call.id.clone())
            .with("is_error", observation.is_error());
        if let Some(kind) = observation.error_kind() {
            end = end.with("error_kind", kind.as_str());
        }
        self.emit(end);
        for change in &run.changes.changes()[staged_before..] {
            self.emit(change_event(run, EventKind::ChangeStaged, change));
        }
        for change in &run.applied[applied_before..] {
            self.emit(change_event(run, EventKind::ChangeApplied, change));
        }

        run.push(Turn::tool(observation));
        run.steps += 1;
        if run.steps >= self.config.max_steps {
            return self.step_limit(run);
        }
        LoopState::Prompting
    }

    fn step_limit(&self, run: &mut RunContext<'_>) -> LoopState {
        self.emit(
            run.event(EventKind::StepLimit)
                .with("steps", run.steps)
                .with("max_steps", self.config.max_steps),
        );
        run.push(Turn::note(format!(
            "Step limit of {} reached.",
            self.config.max_steps
        )));
        LoopState::Done(StopReason::StepLimit)
    }

    fn finish(
        &self,
        mut run: RunContext<'_>,
        stopped_reason: StopReason,
        failure: Option<RunFailure>,
    ) -> AgentRunResult {
        let answer = match (stopped_reason, &failure) {
            (StopReason::Answered, _) => run.answer.take().unwrap_or_default(),
            (StopReason::StepLimit, _) => step_limit_answer(&run.changes, &run.applied),
            (StopReason::Cancelled, _) => {
                run.push(Turn::note(format!(
                    "Run cancelled after {} steps.",
                    run.steps
                )));
                self.emit(run.event(EventKind::Cancelled).with("steps", run.steps));
                CANCELLED_ANSWER.to_string()
            }
            (StopReason::FatalError, failure) => {
                let (kind, message) = failure
                    .as_ref()
                    .map(|failure| (failure.kind.clone(), failure.message.clone()))
                    .unwrap_or_else(|| ("unknown".to_string(), "run failed".to_string()));
                run.push(Turn::note(format!("Run failed ({kind}): {message}")));
                self.emit(
                    run.event(EventKind::Error)
                        .with("kind", kind)
                        .with("message", message.clone()),
                );
                message
            }
        };

        self.emit(
            run.event(EventKind::RunEnd)
                .with("stopped_reason", stopped_reason.as_str())
                .with("steps", run.steps)
                .with("model_calls", run.model_calls)
                .with("pending_changes", run.changes.len())
                .with("applied_changes", run.applied.len()),
        );

        AgentRunResult {
            turns: run.run_turns().to_vec(),
            run_id: run.run_id,
            answer,
            changes: run.changes,
            applied: run.applied,
            stopped_reason,
            failure,
            steps: run.steps,
            model_calls: run.model_calls,
        }
    }
}

fn build_request(run: &RunContext<'_>, messages: Vec<ChatMessage>) -> ChatRequest {
    ChatRequest::new(run.session.model_id.clone(), messages)
        .with_chat_id(run.session.chat_id.clone())
}

/// Assistant turns that called a tool are replayed with the call block the
/// model originally produced.
fn assistant_text(turn: &Turn) -> String {
    let Some(call) = &turn.tool_call else {
        return turn.content.clone();
    };
    let block = format!("```json\n{}\n```", call.to_wire());
    let prose = turn.content.trim();
    if prose.is_empty() {
        block
    } else {
        format!("{prose}\n\n{block}")
    }
}

fn change_event(run: &RunContext<'_>, kind: EventKind, change: &PendingChange) -> SessionEvent {
    run.event(kind)
        .with("path", change.path.clone())
        .with("change_kind", change.kind.as_str())
        .with("change_id", change.id.clone())
}

fn step_limit_answer(changes: &ChangeBuffer, applied: &[PendingChange]) -> String {
    let mut answer = STEP_LIMIT_ANSWER.to_string();
    if !changes.is_empty() {
        let _ = write!(answer, "\n\nPending changes:\n{}", changes.summary().trim_end());
    }
    if !applied.is_empty() {
        answer.push_str("\n\nApplied changes:");
        for change in applied {
            let _ = write!(answer, "\n- {} {}", change.kind.as_str(), change.path);
        }
    }
    answer
}

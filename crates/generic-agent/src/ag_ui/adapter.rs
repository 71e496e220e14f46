//! Runs an [`Agent`] on behalf of an AG-UI client.
//!
//! One request is one run: the session named by `threadId` is loaded (or
//! recreated once it has idled past the timeout), the client's state and new
//! messages are folded in, and the agent's output is translated into AG-UI
//! events. Everything the agent produced is persisted before `RUN_FINISHED`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::events::Event;
use super::types::{
    build_context_addendum, Message as AgUiMessage, RequestError, Role as AgUiRole, RunAgentInput,
};
use crate::agents::{Agent, AgentError, AgentEvent, ReplyContext};
use crate::identity::{default_extractor, UserIdExtractor};
use crate::message::{Message, MessageContent, Role};
use crate::session::{now_millis, Session, SessionError, SessionKey, SessionService};

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct AgUiAdapter {
    agent: Agent,
    app_name: String,
    user_id_extractor: UserIdExtractor,
    sessions: Arc<dyn SessionService>,
    session_timeout: Duration,
}

impl AgUiAdapter {
    pub fn new<S: Into<String>>(agent: Agent, app_name: S, sessions: Arc<dyn SessionService>) -> Self {
        Self {
            agent,
            app_name: app_name.into(),
            user_id_extractor: default_extractor(),
            sessions,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }

    pub fn with_user_id_extractor(mut self, extractor: UserIdExtractor) -> Self {
        self.user_id_extractor = extractor;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn sessions(&self) -> &Arc<dyn SessionService> {
        &self.sessions
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    pub fn user_id(&self, input: &RunAgentInput) -> String {
        (self.user_id_extractor)(input)
    }

    /// Delete every session idle for longer than the timeout.
    pub async fn prune_expired_sessions(&self) -> Result<usize, AgentError> {
        let cutoff = now_millis() - self.timeout_millis();
        Ok(self.sessions.prune_expired(cutoff).await?)
    }

    fn timeout_millis(&self) -> i64 {
        i64::try_from(self.session_timeout.as_millis()).unwrap_or(i64::MAX)
    }

    /// Validates the request up front so the caller can answer 400 instead of
    /// opening a stream. The returned stream always ends with `RUN_FINISHED`
    /// or `RUN_ERROR`.
    pub fn run(
        &self,
        input: RunAgentInput,
        cancel_token: CancellationToken,
    ) -> Result<impl Stream<Item = Event> + Send + 'static, RequestError> {
        input.validate()?;
        let adapter = self.clone();
        let user_id = self.user_id(&input);
        info!(
            thread_id = %input.thread_id,
            run_id = %input.run_id,
            user_id = %user_id,
            "starting AG-UI run"
        );

        Ok(async_stream::stream! {
            yield Event::run_started(&input.thread_id, &input.run_id, input.parent_run_id.clone());

            let session = match adapter.prepare_session(&input, &user_id).await {
                Ok(session) => session,
                Err(e) => {
                    error!(error = %e, "failed to prepare session");
                    yield Event::run_error(e.to_string(), Some("SESSION_ERROR".to_string()));
                    return;
                }
            };
            yield Event::state_snapshot(Value::Object(session.state.clone()));

            let key = session.key();
            let context = ReplyContext {
                state: session.state.clone(),
                frontend_tools: input.tools.iter().map(|t| t.to_agent_tool()).collect(),
                instruction_addendum: instruction_addendum(&input),
            };

            let mut produced: Vec<Message> = Vec::new();
            let mut failure: Option<AgentError> = None;
            let mut replies = adapter.agent.reply(&session.messages, context, Some(cancel_token.clone()));
            while let Some(next) = replies.next().await {
                match next {
                    Ok(AgentEvent::Message(message)) => {
                        for event in message_events(&message) {
                            yield event;
                        }
                        produced.push(message);
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            if !produced.is_empty() {
                if let Err(e) = adapter.sessions.append_messages(&key, &produced, &[]).await {
                    error!(session = %key, error = %e, "failed to persist run output");
                    if failure.is_none() {
                        failure = Some(e.into());
                    }
                }
            }

            if cancel_token.is_cancelled() {
                debug!(session = %key, "run cancelled by client");
            }

            match failure {
                Some(e) => {
                    error!(session = %key, error = %e, "AG-UI run failed");
                    yield Event::run_error(e.to_string(), Some(error_code(&e).to_string()));
                }
                None => yield Event::run_finished(&input.thread_id, &input.run_id),
            }
        })
    }

    async fn prepare_session(&self, input: &RunAgentInput, user_id: &str) -> Result<Session, AgentError> {
        let key = SessionKey::new(&self.app_name, user_id, &input.thread_id);

        let existing = match self.sessions.get_session(&key).await? {
            Some(session) if session.is_expired(now_millis(), self.timeout_millis()) => {
                info!(session = %key, "session expired, starting over");
                self.sessions.delete_session(&key).await?;
                None
            }
            other => other,
        };
        let mut session = match existing {
            Some(session) => session,
            None => self.create_or_join(&key).await?,
        };

        if let Some(state) = input.state_object() {
            session.state = self.sessions.update_state(&key, state.clone()).await?;
        }

        let (fresh, ids) = unseen_messages(input, &session);
        if !fresh.is_empty() {
            self.sessions.append_messages(&key, &fresh, &ids).await?;
            session.messages.extend(fresh);
            session.processed_message_ids.extend(ids);
        }
        Ok(session)
    }

    /// Create the session, or load it when a concurrent run on the same
    /// thread created it first.
    async fn create_or_join(&self, key: &SessionKey) -> Result<Session, AgentError> {
        let created = self
            .sessions
            .create_session(&key.app_name, &key.user_id, Some(key.session_id.clone()), Map::new())
            .await;
        match created {
            Ok(session) => Ok(session),
            Err(SessionError::AlreadyExists(_)) => {
                debug!(session = %key, "session created by a concurrent run");
                self.sessions
                    .get_session(key)
                    .await?
                    .ok_or_else(|| SessionError::NotFound(key.to_string()).into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn error_code(error: &AgentError) -> &'static str {
    match error {
        AgentError::Provider(_) => "PROVIDER_ERROR",
        AgentError::Session(_) => "SESSION_ERROR",
    }
}

fn instruction_addendum(input: &RunAgentInput) -> Option<String> {
    let mut addendum = String::new();
    for instruction in input.system_instructions() {
        addendum.push_str("\n\n");
        addendum.push_str(instruction);
    }
    if let Some(context) = build_context_addendum(input) {
        addendum.push_str(&context);
    }
    (!addendum.is_empty()).then_some(addendum)
}

/// Client messages the session has not absorbed yet, plus the ids to mark.
///
/// User text and tool results are kept; consecutive tool results collapse
/// into one message. System and developer messages only shape this run's
/// instruction, and assistant messages are already in history.
fn unseen_messages(input: &RunAgentInput, session: &Session) -> (Vec<Message>, Vec<String>) {
    let tool_names: HashMap<&str, &str> = session
        .messages
        .iter()
        .flat_map(|m| m.tool_requests())
        .map(|r| (r.id.as_str(), r.tool_call.name.as_str()))
        .collect();

    let mut fresh: Vec<Message> = Vec::new();
    let mut ids = Vec::new();
    for message in &input.messages {
        if let Some(id) = &message.id {
            if session.processed_message_ids.contains(id) {
                continue;
            }
        }
        let converted = match message.role {
            AgUiRole::User if !message.content.is_empty() => {
                Some(Message::user().with_text(&message.content))
            }
            AgUiRole::Tool => tool_result(message, &tool_names),
            _ => None,
        };
        let Some(converted) = converted else {
            continue;
        };
        if let Some(id) = &message.id {
            ids.push(id.clone());
        }
        if message.role == AgUiRole::Tool {
            if let Some(last) = fresh.last_mut().filter(|last| is_tool_results(last)) {
                last.content.extend(converted.content);
                continue;
            }
        }
        fresh.push(converted);
    }
    (fresh, ids)
}

fn tool_result(message: &AgUiMessage, tool_names: &HashMap<&str, &str>) -> Option<Message> {
    let call_id = message.tool_call_id.as_deref()?;
    let Some(name) = tool_names.get(call_id) else {
        warn!(tool_call_id = %call_id, "tool result for unknown call, dropping");
        return None;
    };
    let result = serde_json::from_str(&message.content)
        .unwrap_or_else(|_| Value::String(message.content.clone()));
    Some(Message::user().with_tool_response(call_id, *name, result))
}

fn is_tool_results(message: &Message) -> bool {
    message.role == Role::User
        && !message.content.is_empty()
        && message.content.iter().all(|c| c.as_tool_response().is_some())
}

/// AG-UI events describing one message the agent produced.
fn message_events(message: &Message) -> Vec<Event> {
    let mut events = Vec::new();
    match message.role {
        Role::Assistant => {
            let message_id = Uuid::new_v4().to_string();
            let text = message.as_concat_text();
            if !text.is_empty() {
                events.push(Event::text_message_start(&message_id));
                events.push(Event::text_message_content(&message_id, text));
                events.push(Event::text_message_end(&message_id));
            }
            for request in message.tool_requests() {
                events.push(Event::tool_call_start(
                    &request.id,
                    &request.tool_call.name,
                    Some(message_id.clone()),
                ));
                events.push(Event::tool_call_args(
                    &request.id,
                    request.tool_call.arguments.to_string(),
                ));
                events.push(Event::tool_call_end(&request.id));
            }
        }
        Role::User => {
            for content in &message.content {
                if let MessageContent::ToolResponse(response) = content {
                    events.push(Event::tool_call_result(
                        Uuid::new_v4().to_string(),
                        &response.id,
                        response.result.to_string(),
                    ));
                }
            }
        }
    }
    events
}

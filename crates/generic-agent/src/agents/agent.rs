use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use super::descriptor::AgentDescriptor;
use crate::message::{Message, MessageContent, ToolRequest};
use crate::prompt_template::render_instruction;
use crate::providers::base::Provider;
use crate::providers::errors::ProviderError;
use crate::session::SessionError;
use crate::tool::{Tool, ToolError};

pub const DEFAULT_MAX_TURNS: u32 = 25;

const MAX_TURNS_MESSAGE: &str =
    "I've reached the maximum number of actions I can do without user input. Would you like me to continue?";

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Clone, Debug)]
pub enum AgentEvent {
    Message(Message),
}

/// Per-run inputs that come from the client rather than the agent's own
/// configuration.
#[derive(Debug, Clone, Default)]
pub struct ReplyContext {
    /// Session state the instruction is rendered against.
    pub state: Map<String, Value>,
    /// Tools the client executes itself.
    pub frontend_tools: Vec<Tool>,
    /// Appended to the rendered instruction.
    pub instruction_addendum: Option<String>,
}

/// Drives one agent against a provider.
#[derive(Clone)]
pub struct Agent {
    descriptor: Arc<AgentDescriptor>,
    provider: Arc<dyn Provider>,
    max_turns: u32,
}

impl Agent {
    pub fn new(descriptor: Arc<AgentDescriptor>, provider: Arc<dyn Provider>) -> Self {
        Self {
            descriptor,
            provider,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn descriptor(&self) -> &Arc<AgentDescriptor> {
        &self.descriptor
    }

    fn system_prompt(&self, context: &ReplyContext) -> String {
        let mut prompt = render_instruction(&self.descriptor.instruction, &context.state);
        if let Some(addendum) = &context.instruction_addendum {
            prompt.push_str(addendum);
        }
        prompt
    }

    /// Backend tools first; a frontend tool shadowed by a backend one is dropped.
    fn tools_for(&self, context: &ReplyContext) -> Vec<Tool> {
        let mut tools = self.descriptor.tool_declarations();
        let backend: HashSet<String> = tools.iter().map(|t| t.name.clone()).collect();
        for tool in &context.frontend_tools {
            if backend.contains(&tool.name) {
                warn!(tool = %tool.name, "frontend tool shadowed by backend tool");
                continue;
            }
            tools.push(tool.clone());
        }
        tools
    }

    async fn dispatch_tool_call(&self, request: &ToolRequest) -> MessageContent {
        let name = &request.tool_call.name;
        let outcome = match self.descriptor.find_tool(name) {
            Some(handler) => handler.call(request.tool_call.arguments.clone()).await,
            None => Err(ToolError::NotFound(name.clone())),
        };
        match outcome {
            Ok(result) => MessageContent::tool_response(&request.id, name, result),
            Err(e) => {
                warn!(tool = %name, error = %e, "tool call failed");
                MessageContent::tool_error(&request.id, name, e.to_string())
            }
        }
    }

    /// Run the conversation forward until the model stops calling backend
    /// tools. Every produced message (assistant replies and tool responses)
    /// is yielded in order; the caller owns persistence.
    pub fn reply(
        &self,
        messages: &[Message],
        context: ReplyContext,
        cancel_token: Option<CancellationToken>,
    ) -> BoxStream<'static, Result<AgentEvent, AgentError>> {
        let agent = self.clone();
        let mut messages = messages.to_vec();
        // The stream outlives this call, so the span is attached to every
        // await and event inside it rather than entered here.
        let span = info_span!("agent_reply", agent = %self.descriptor.name);

        if let Some(text) = messages
            .last()
            .and_then(|msg| msg.content.first())
            .and_then(MessageContent::as_text)
        {
            debug!(parent: &span, user_message = %text);
        }

        Box::pin(async_stream::try_stream! {
            let tools = span.in_scope(|| agent.tools_for(&context));
            let frontend: HashSet<&str> = context
                .frontend_tools
                .iter()
                .map(|t| t.name.as_str())
                .collect();
            let mut turns_taken = 0u32;

            loop {
                if cancel_token.as_ref().is_some_and(|t| t.is_cancelled()) {
                    debug!(parent: &span, "reply cancelled");
                    break;
                }

                turns_taken += 1;
                if turns_taken > agent.max_turns {
                    yield AgentEvent::Message(Message::assistant().with_text(MAX_TURNS_MESSAGE));
                    break;
                }

                let system = agent.system_prompt(&context);
                let (response, usage) = agent
                    .provider
                    .complete(&system, &messages, &tools)
                    .instrument(span.clone())
                    .await?;
                debug!(
                    parent: &span,
                    model = %usage.model,
                    input_tokens = ?usage.usage.input_tokens,
                    output_tokens = ?usage.usage.output_tokens,
                    "provider usage"
                );

                let requests: Vec<ToolRequest> = response.tool_requests().cloned().collect();
                messages.push(response.clone());
                yield AgentEvent::Message(response);

                if requests.is_empty() {
                    break;
                }

                let mut handed_to_client = false;
                let mut tool_responses = Message::user();
                for request in &requests {
                    if frontend.contains(request.tool_call.name.as_str()) {
                        handed_to_client = true;
                        continue;
                    }
                    let response = agent
                        .dispatch_tool_call(request)
                        .instrument(span.clone())
                        .await;
                    tool_responses = tool_responses.with_content(response);
                }

                if !tool_responses.is_empty() {
                    messages.push(tool_responses.clone());
                    yield AgentEvent::Message(tool_responses);
                }

                if handed_to_client {
                    break;
                }
            }
        })
    }
}

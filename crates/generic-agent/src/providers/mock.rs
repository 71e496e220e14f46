//! A scripted provider for tests and offline runs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::base::{Provider, ProviderUsage, Usage};
use super::errors::ProviderError;
use crate::message::Message;
use crate::tool::Tool;

/// What the provider was asked on one `complete` call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
}

/// Replays queued replies in order. Once the script runs out every further
/// call fails with [`ProviderError::ExecutionError`].
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    replies: Arc<Mutex<VecDeque<Result<Message, String>>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ScriptedProvider {
    pub fn new<I: IntoIterator<Item = Message>>(replies: I) -> Self {
        let provider = Self::default();
        for reply in replies {
            provider.push_reply(reply);
        }
        provider
    }

    pub fn push_reply(&self, message: Message) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Ok(message));
        }
    }

    pub fn push_error<S: Into<String>>(&self, error: S) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Err(error.into()));
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, ProviderUsage), ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                system: system.to_string(),
                messages: messages.to_vec(),
                tools: tools.to_vec(),
            });
        }

        let next = self
            .replies
            .lock()
            .map_err(|_| ProviderError::ExecutionError("script lock poisoned".to_string()))?
            .pop_front();

        match next {
            Some(Ok(message)) => Ok((
                message,
                ProviderUsage::new("scripted".to_string(), Usage::default()),
            )),
            Some(Err(error)) => Err(ProviderError::ServerError(error)),
            None => Err(ProviderError::ExecutionError(
                "scripted provider has no replies left".to_string(),
            )),
        }
    }
}

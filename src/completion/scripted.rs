//! Canned completion service
//!
//! Replays queued replies chunk by chunk. Used by tests and by the
//! `--offline` chat mode.

use super::{CompletionRequest, CompletionService};
use crate::error::{LampstandError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone)]
enum Script {
    Reply(Vec<String>),
    Fail(String),
}

/// Completion service that replays scripted replies in order
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    queue: Mutex<VecDeque<Script>>,
    fallback: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    /// An empty script; `complete` fails until something is queued
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every request without a queued reply with `text`
    pub fn echoing(text: impl Into<String>) -> Self {
        Self {
            fallback: Some(text.into()),
            ..Self::default()
        }
    }

    /// Queue a reply delivered as the given chunks
    pub fn push_reply<I, S>(&self, chunks: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(Script::Reply(chunks.into_iter().map(Into::into).collect()))
    }

    /// Queue a failure
    pub fn push_failure(&self, message: impl Into<String>) -> &Self {
        self.push(Script::Fail(message.into()))
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn push(&self, script: Script) -> &Self {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(script);
        }
        self
    }

    fn next_script(&self) -> Option<Script> {
        self.queue.lock().ok().and_then(|mut q| q.pop_front())
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(
        &self,
        request: &CompletionRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let chunks = match self.next_script() {
            Some(Script::Reply(chunks)) => chunks,
            Some(Script::Fail(message)) => {
                return Err(LampstandError::CompletionFailed(message).into())
            }
            None => match &self.fallback {
                Some(text) => vec![text.clone()],
                None => {
                    return Err(LampstandError::CompletionFailed(
                        "no scripted reply queued".to_string(),
                    )
                    .into())
                }
            },
        };

        let mut full = String::new();
        for chunk in chunks {
            tokio::task::yield_now().await;
            on_chunk(&chunk);
            full.push_str(&chunk);
        }
        Ok(full)
    }
}

//! Scripted provider for tests
//!
//! Each agent follows a script picked by matching its first user message.
//! The step to play is the number of assistant turns already in the history,
//! so one provider can serve many agents concurrently without shared cursors.

use crate::ai::{AiResponse, ChatMessage, ChatOptions, ChatProvider, MessageRole};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) enum Action {
    Reply(AiResponse),
    Fail(String),
    Panic,
}

#[derive(Debug, Clone)]
pub(crate) struct Step {
    pub delay: Duration,
    pub action: Action,
}

impl Step {
    pub fn reply(response: AiResponse) -> Self {
        Step {
            delay: Duration::ZERO,
            action: Action::Reply(response),
        }
    }

    pub fn fail(message: &str) -> Self {
        Step {
            delay: Duration::ZERO,
            action: Action::Fail(message.to_string()),
        }
    }

    pub fn panic() -> Self {
        Step {
            delay: Duration::ZERO,
            action: Action::Panic,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// One provider call as seen by the mock
#[derive(Debug, Clone)]
pub(crate) struct CallEvent {
    pub key: String,
    pub model: Option<String>,
    pub tools: Vec<String>,
}

pub(crate) struct ScriptedProvider {
    scripts: Vec<(String, Vec<Step>)>,
    fallback: Vec<Step>,
    events: Mutex<Vec<CallEvent>>,
}

impl ScriptedProvider {
    /// Every agent plays the same script
    pub fn single(steps: Vec<Step>) -> Self {
        ScriptedProvider {
            scripts: Vec::new(),
            fallback: steps,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Agents whose task contains `key` play the matching script; others answer "done"
    pub fn by_task(scripts: Vec<(&str, Vec<Step>)>) -> Self {
        ScriptedProvider {
            scripts: scripts
                .into_iter()
                .map(|(k, s)| (k.to_string(), s))
                .collect(),
            fallback: vec![Step::reply(AiResponse::text("done"))],
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<CallEvent> {
        self.events.lock().clone()
    }

    pub fn call_count(&self, key: &str) -> usize {
        self.events.lock().iter().filter(|e| e.key == key).count()
    }

    fn script_for(&self, messages: &[ChatMessage]) -> (String, &[Step]) {
        let task = messages
            .iter()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        for (key, steps) in &self.scripts {
            if task.contains(key.as_str()) {
                return (key.clone(), steps);
            }
        }
        (task.to_string(), &self.fallback)
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<AiResponse, String> {
        let (key, steps) = self.script_for(messages);
        let turn = messages
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .count();
        let step = steps
            .get(turn)
            .cloned()
            .unwrap_or_else(|| Step::fail("script exhausted"));

        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        self.events.lock().push(CallEvent {
            key,
            model: options.model.clone(),
            tools: options.tools.iter().map(|t| t.name.clone()).collect(),
        });

        match step.action {
            Action::Reply(response) => Ok(response),
            Action::Fail(message) => Err(message),
            Action::Panic => panic!("scripted provider panic"),
        }
    }
}

//! In-memory remote authority for tests and demos.
//!
//! [`ScriptedRemote`] answers from per-entity scripts, falls back to a
//! default answer, and records every request it receives.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::remote::{RemoteAuthority, RemoteRequest, RemoteResponse};

type Answer = Result<RemoteResponse, RemoteError>;

struct Script {
    queued: HashMap<String, VecDeque<Answer>>,
    fallback: Answer,
    calls: Vec<RemoteRequest>,
    delay: Option<Duration>,
    probe: Result<(), RemoteError>,
    probe_delay: Option<Duration>,
    probes: usize,
}

pub struct ScriptedRemote {
    script: Mutex<Script>,
}

impl Default for ScriptedRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRemote {
    /// Answers `200` to everything
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                queued: HashMap::new(),
                fallback: Ok(RemoteResponse::new(200)),
                calls: Vec::new(),
                delay: None,
                probe: Ok(()),
                probe_delay: None,
                probes: 0,
            }),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an answer for the next call about `entity_id`
    pub fn push(&self, entity_id: &str, answer: Answer) {
        self.script()
            .queued
            .entry(entity_id.to_string())
            .or_default()
            .push_back(answer);
    }

    pub fn push_status(&self, entity_id: &str, status: u16) {
        self.push(entity_id, Ok(RemoteResponse::new(status)));
    }

    /// Answer used once an entity's script runs out
    pub fn set_fallback(&self, answer: Answer) {
        self.script().fallback = answer;
    }

    /// Hold every `send` for `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        self.script().delay = Some(delay);
    }

    pub fn set_probe(&self, result: Result<(), RemoteError>) {
        self.script().probe = result;
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        self.script().probe_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<RemoteRequest> {
        self.script().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.script().calls.len()
    }

    /// Calls made about one entity
    pub fn calls_for(&self, entity_id: &str) -> usize {
        self.script()
            .calls
            .iter()
            .filter(|call| call.entity_id == entity_id)
            .count()
    }

    pub fn probe_count(&self) -> usize {
        self.script().probes
    }
}

#[async_trait]
impl RemoteAuthority for ScriptedRemote {
    async fn send(&self, request: RemoteRequest) -> Answer {
        let (answer, delay) = {
            let mut script = self.script();
            let scripted = script
                .queued
                .get_mut(&request.entity_id)
                .and_then(VecDeque::pop_front);
            let answer = scripted.unwrap_or_else(|| script.fallback.clone());
            script.calls.push(request);
            (answer, script.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        answer
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        let (result, delay) = {
            let mut script = self.script();
            script.probes += 1;
            (script.probe.clone(), script.probe_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

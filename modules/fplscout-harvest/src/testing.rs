//! Test doubles for driving the acquisition machinery without network or
//! real time. Compiled for unit tests and behind the `test-support`
//! feature for integration tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use fplscout_common::error::FetchError;

use crate::endpoints::EndpointKind;
use crate::runner::Sleeper;
use crate::transport::Transport;

/// Transport that replays a scripted sequence of results.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<String, FetchError>>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<String, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(
        &self,
        _url: &str,
        _endpoint: &EndpointKind,
        _user_agent: &str,
    ) -> Result<String, FetchError> {
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Transient("script exhausted".into())))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Sleeper that records requested delays instead of waiting.
#[derive(Default)]
pub struct RecordingSleeper {
    pub slept: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().expect("sleep lock").push(duration);
    }
}

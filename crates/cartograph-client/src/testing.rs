//! In-memory [`Exchange`] double shared by the unit tests

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use cartograph_protocol::{Method, Response};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::transport::Exchange;

/// Replays scripted responses in order and records every request
#[derive(Default)]
pub struct ScriptedExchange {
    replies: Mutex<VecDeque<Result<Response>>>,
    calls: Mutex<Vec<(Method, Value)>>,
}

impl ScriptedExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, response: Response) -> Self {
        self.replies.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn fail(self, error: Error) -> Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn calls(&self) -> Vec<(Method, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Exchange for ScriptedExchange {
    async fn exchange(&self, method: Method, params: Value) -> Result<Response> {
        self.calls.lock().unwrap().push((method, params));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::protocol(format!("no scripted reply for {method}"))))
    }
}

//! Request descriptor consumed by the evaluation context.
//!
//! POST values are `serde_json::Value` because multi-select inputs arrive as
//! arrays; URL params are always strings.

use serde_json::Value;
use std::collections::HashMap;

/// HTTP method, reduced to what the state machine distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn is_post(&self) -> bool {
        matches!(self, Method::Post)
    }
}

/// One inbound request, as seen by the core
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Parsed request body
    pub post: HashMap<String, Value>,
    /// URL route parameters
    pub params: HashMap<String, String>,
    /// Token surfaced through the global bag for the renderer
    pub csrf_token: Option<String>,
}

impl Request {
    pub fn get() -> Self {
        Self {
            method: Method::Get,
            post: HashMap::new(),
            params: HashMap::new(),
            csrf_token: None,
        }
    }

    pub fn post() -> Self {
        Self {
            method: Method::Post,
            ..Self::get()
        }
    }

    /// Add a body field (builder style)
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.post.insert(key.into(), value.into());
        self
    }

    /// Add a route parameter (builder style)
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }
}

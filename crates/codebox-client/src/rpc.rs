// ABOUTME: HTTP request layer against the codebox base address
// ABOUTME: Raw JSON requests plus RPC calls that unwrap the {ok, data, error} envelope

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::{resolve_url, ConnectionManager};
use crate::error::{CodeboxError, Result};

/// HTTP verb of a raw request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Get,
    Post,
    Put,
    Delete,
}

impl RequestMode {
    fn method(self) -> Method {
        match self {
            RequestMode::Get => Method::GET,
            RequestMode::Post => Method::POST,
            RequestMode::Put => Method::PUT,
            RequestMode::Delete => Method::DELETE,
        }
    }

    /// GET and DELETE carry their arguments in the query string.
    fn uses_query(self) -> bool {
        matches!(self, RequestMode::Get | RequestMode::Delete)
    }
}

/// Per-request overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Response body of every RPC endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcEnvelope {
    pub ok: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: Value,
}

impl RpcEnvelope {
    pub fn into_result(self) -> Result<Value> {
        if self.ok {
            Ok(self.data)
        } else {
            Err(CodeboxError::Rpc(self.error))
        }
    }
}

/// Issues requests relative to the base address held by a [`ConnectionManager`].
///
/// The base address is read once per call, so reconfiguring never affects a
/// request already in flight.
pub struct RpcClient {
    http: Client,
    connection: Arc<ConnectionManager>,
}

impl RpcClient {
    pub fn new(connection: Arc<ConnectionManager>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CodeboxError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { http, connection })
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Send a request and return the response body as JSON, without
    /// envelope unwrapping. An empty body yields `null`.
    pub async fn request(
        &self,
        mode: RequestMode,
        path: &str,
        args: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value> {
        let base_address = self
            .connection
            .base_address()
            .ok_or(CodeboxError::NotConfigured)?;
        let url = resolve_url(self.connection.origin(), &base_address, path)?;

        tracing::debug!(mode = ?mode, %url, "codebox request");

        let mut builder = self.http.request(mode.method(), url.clone());
        builder = attach_args(builder, mode, args)?;
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        for (name, value) in &options.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(%url, error = %e, "codebox request failed");
            CodeboxError::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%url, status = status.as_u16(), "codebox request rejected");
            return Err(CodeboxError::Transport(format!("HTTP {status} from {url}")));
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body)
            .map_err(|e| CodeboxError::Transport(format!("invalid JSON from {url}: {e}")))
    }

    /// Call an RPC endpoint: resolves with `data` when `ok`, fails with
    /// [`CodeboxError::Rpc`] carrying `error` otherwise.
    pub async fn call(&self, method: &str, args: Option<Value>, options: RequestOptions) -> Result<Value> {
        let body = self
            .request(RequestMode::Post, method, Some(args.unwrap_or_else(empty_object)), options)
            .await?;

        let envelope: RpcEnvelope = serde_json::from_value(body)
            .map_err(|e| CodeboxError::Transport(format!("malformed RPC envelope from {method}: {e}")))?;

        let result = envelope.into_result();
        if let Err(CodeboxError::Rpc(error)) = &result {
            tracing::debug!(method, %error, "rpc reported failure");
        }
        result
    }
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

fn attach_args(builder: RequestBuilder, mode: RequestMode, args: Option<Value>) -> Result<RequestBuilder> {
    let Some(args) = args else {
        return Ok(builder);
    };

    if !mode.uses_query() {
        return Ok(builder.json(&args));
    }

    match args {
        Value::Null => Ok(builder),
        Value::Object(map) => {
            let pairs: Vec<(String, String)> = map
                .into_iter()
                .map(|(key, value)| (key, query_value(value)))
                .collect();
            Ok(builder.query(&pairs))
        }
        other => Err(CodeboxError::InvalidArgs(format!(
            "{mode:?} arguments must be an object, got {other}"
        ))),
    }
}

/// Strings go into the query as-is, anything else as its JSON text.
fn query_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

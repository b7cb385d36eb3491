use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use strum::Display;
use tracing::trace;

use super::OverlayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum HttpMethod {
	Post,
	Delete,
}

/// A REST call to a tunnel agent or a packet reflector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
	pub method: HttpMethod,
	pub uri: String,
	pub body: Option<Value>,
}

impl AgentRequest {
	#[must_use]
	pub fn post(uri: String, body: Value) -> Self {
		Self {
			method: HttpMethod::Post,
			uri,
			body: Some(body),
		}
	}

	#[must_use]
	pub const fn delete(uri: String) -> Self {
		Self {
			method: HttpMethod::Delete,
			uri,
			body: None,
		}
	}
}

/// Sends agent requests and yields the HTTP status code of the response.
#[async_trait]
pub trait AgentClient: Send + Sync {
	async fn send(&self, request: AgentRequest) -> Result<u16, OverlayError>;
}

pub struct HttpAgentClient {
	client: reqwest::Client,
}

impl HttpAgentClient {
	pub fn new(timeout: Duration) -> Result<Self, OverlayError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(OverlayError::Http)?;

		Ok(Self { client })
	}
}

#[async_trait]
impl AgentClient for HttpAgentClient {
	async fn send(&self, request: AgentRequest) -> Result<u16, OverlayError> {
		trace!(method = %request.method, uri = %request.uri, "Sending agent request");

		let builder = match request.method {
			HttpMethod::Post => self.client.post(&request.uri),
			HttpMethod::Delete => self.client.delete(&request.uri),
		};

		let builder = match &request.body {
			Some(body) => builder.json(body),
			None => builder,
		};

		let response = builder.send().await.map_err(OverlayError::Http)?;

		Ok(response.status().as_u16())
	}
}

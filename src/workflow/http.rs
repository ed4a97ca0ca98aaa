use std::time::Duration;

use anyhow::{anyhow, Context as AnyhowContext, Result};

use super::HttpMethod;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Serialized JSON body; only sent for POST, PUT and PATCH.
    pub body: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport used by `api-call` steps. Non-2xx responses are returned as
/// responses; only transport failures are errors.
pub trait HttpClient: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

impl<F> HttpClient for F
where
    F: Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync,
{
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        (self)(request)
    }
}

pub struct UreqHttpClient {
    agent: ureq::Agent,
}

impl Default for UreqHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UreqHttpClient {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
        }
    }
}

impl HttpClient for UreqHttpClient {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let call = self
            .agent
            .request(request.method.as_str(), &request.url)
            .timeout(request.timeout)
            .set("Content-Type", "application/json")
            .set("Accept", "application/json");
        let outcome = match &request.body {
            Some(body) if request.method.carries_body() => call.send_string(body),
            _ => call.call(),
        };
        let response = match outcome {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => {
                return Err(anyhow!(
                    "{} {} failed: {err}",
                    request.method.as_str(),
                    request.url
                ))
            }
        };
        let status = response.status();
        let status_text = response.status_text().to_string();
        let body = response
            .into_string()
            .with_context(|| format!("unable to read response body from {}", request.url))?;
        Ok(HttpResponse {
            status,
            status_text,
            body,
        })
    }
}

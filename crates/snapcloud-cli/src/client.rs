// HTTP client for the project store API
//
// Wraps a ureq agent with the caller headers the server expects and turns
// non-2xx responses into readable errors.

use std::io::Read;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use url::Url;

const USER_HEADER: &str = "x-snapcloud-user";
const ROLE_HEADER: &str = "x-snapcloud-role";

/// Client for one server, acting as one caller.
pub struct ApiClient {
    base: Url,
    user: Option<String>,
    role: Option<String>,
    agent: ureq::Agent,
}

impl ApiClient {
    pub fn new(server: &str, user: Option<String>, role: Option<String>) -> Result<Self> {
        let base = Url::parse(server).with_context(|| format!("Invalid server URL '{}'", server))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("Server URL '{}' cannot have a path", server));
        }

        Ok(Self {
            base,
            user,
            role,
            agent: ureq::AgentBuilder::new().build(),
        })
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// URL of `/api/v1/projects/{owner}/{name}[/{action}]`. Owner and name are
    /// percent-encoded as single path segments.
    pub fn project_url(
        &self,
        owner: &str,
        name: &str,
        action: Option<&str>,
        query: &[(&str, String)],
    ) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("Server URL cannot have a path"))?;
            segments
                .pop_if_empty()
                .extend(["api", "v1", "projects", owner, name]);
            if let Some(action) = action {
                segments.push(action);
            }
        }

        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    pub fn get_json(&self, url: &Url) -> Result<Value> {
        let response = self.send(self.request("GET", url), None)?;
        read_json(response)
    }

    pub fn get_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self.send(self.request("GET", url), None)?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .context("Failed to read response body")?;
        Ok(bytes)
    }

    pub fn post_json(&self, url: &Url, body: Option<Value>) -> Result<Value> {
        let response = self.send(self.request("POST", url), Some(body.unwrap_or(Value::Null)))?;
        read_json(response)
    }

    pub fn delete(&self, url: &Url) -> Result<()> {
        self.send(self.request("DELETE", url), None)?;
        Ok(())
    }

    fn request(&self, method: &str, url: &Url) -> ureq::Request {
        let mut request = self.agent.request_url(method, url);
        if let Some(user) = &self.user {
            request = request.set(USER_HEADER, user);
        }
        if let Some(role) = &self.role {
            request = request.set(ROLE_HEADER, role);
        }
        request
    }

    fn send(&self, request: ureq::Request, body: Option<Value>) -> Result<ureq::Response> {
        let url = request.url().to_string();
        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };

        match result {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(code, response)) => {
                let message = response.into_string().unwrap_or_default();
                Err(anyhow!(status_message(code, &message)))
            }
            Err(ureq::Error::Transport(e)) => Err(anyhow!("Request to {} failed: {}", url, e)),
        }
    }
}

fn read_json(response: ureq::Response) -> Result<Value> {
    if response.status() == 204 {
        return Ok(Value::Null);
    }
    response
        .into_json()
        .context("Server returned invalid JSON")
}

/// Human-readable error for a failed request.
pub fn status_message(code: u16, body: &str) -> String {
    let body = body.trim();
    let kind = match code {
        400 => "Invalid request",
        403 => "Not allowed",
        404 => "Not found",
        409 => "Conflict",
        500..=599 => "Server error",
        _ => "Request failed",
    };

    if body.is_empty() {
        format!("{} (HTTP {})", kind, code)
    } else {
        format!("{} (HTTP {}): {}", kind, code, body)
    }
}

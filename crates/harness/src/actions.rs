//! Scenario step execution against a connector

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

use routeprobe_common::{Request, Response};

use crate::connector::Connector;
use crate::error::{HarnessError, HarnessResult};
use crate::spec::ScenarioStep;

/// Result of executing a scenario step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Short name for a step, used in reports
pub fn step_name(step: &ScenarioStep) -> String {
    match step {
        ScenarioStep::AmOnPage { url } => format!("am_on_page:{}", url),
        ScenarioStep::SendRequest { method, url, .. } => format!("send_request:{} {}", method, url),
        ScenarioStep::HaveHttpHeader { name, .. } => format!("have_http_header:{}", name),
        ScenarioStep::SetCookie { name, .. } => format!("set_cookie:{}", name),
        ScenarioStep::FollowRedirect => "follow_redirect".to_string(),
        ScenarioStep::SeeResponseCodeIs { code } => format!("see_response_code_is:{}", code),
        ScenarioStep::See { text } => format!("see:{}", text),
        ScenarioStep::DontSee { text } => format!("dont_see:{}", text),
        ScenarioStep::SeeHeader { name, .. } => format!("see_header:{}", name),
        ScenarioStep::SeeCookie { name, .. } => format!("see_cookie:{}", name),
        ScenarioStep::DontSeeCookie { name } => format!("dont_see_cookie:{}", name),
        ScenarioStep::SeeCurrentUrlEquals { url } => format!("see_current_url_equals:{}", url),
        ScenarioStep::Log { message } => {
            format!("log:{}", message.chars().take(30).collect::<String>())
        }
    }
}

fn current_response(client: &Connector) -> HarnessResult<&Response> {
    client
        .current_response()
        .ok_or_else(|| HarnessError::Precondition("No request has been made yet".to_string()))
}

fn check(condition: bool, message: impl FnOnce() -> String) -> HarnessResult<()> {
    if condition {
        Ok(())
    } else {
        Err(HarnessError::AssertionFailed(message()))
    }
}

fn perform(client: &mut Connector, step: &ScenarioStep) -> HarnessResult<()> {
    match step {
        ScenarioStep::AmOnPage { url } => {
            client.get(url)?;
        }
        ScenarioStep::SendRequest {
            method,
            url,
            headers,
            body,
        } => {
            let mut request = Request::from_parts(method, url)?;
            for (name, value) in headers {
                request.insert_header(name, value)?;
            }
            if let Some(body) = body {
                request = request.with_body(body.clone());
            }
            client.dispatch(request)?;
        }
        ScenarioStep::HaveHttpHeader { name, value } => {
            client.have_http_header(name, value)?;
        }
        ScenarioStep::SetCookie { name, value } => {
            client.set_cookie(name.clone(), value.clone());
        }
        ScenarioStep::FollowRedirect => {
            client.follow_redirect()?;
        }
        ScenarioStep::SeeResponseCodeIs { code } => {
            let actual = current_response(client)?.status().as_u16();
            check(actual == *code, || {
                format!("expected response code {}, got {}", code, actual)
            })?;
        }
        ScenarioStep::See { text } => {
            let body = current_response(client)?.body().text();
            check(body.contains(text.as_str()), || {
                format!("'{}' not found in response body", text)
            })?;
        }
        ScenarioStep::DontSee { text } => {
            let body = current_response(client)?.body().text();
            check(!body.contains(text.as_str()), || {
                format!("'{}' unexpectedly found in response body", text)
            })?;
        }
        ScenarioStep::SeeHeader { name, value } => {
            let actual = current_response(client)?.header(name);
            match value {
                Some(expected) => check(actual == Some(expected.as_str()), || {
                    format!("expected header {} = '{}', got {:?}", name, expected, actual)
                })?,
                None => check(actual.is_some(), || format!("header {} not present", name))?,
            }
        }
        ScenarioStep::SeeCookie { name, value } => {
            let actual = client.cookie(name);
            match value {
                Some(expected) => check(actual == Some(expected.as_str()), || {
                    format!("expected cookie {} = '{}', got {:?}", name, expected, actual)
                })?,
                None => check(actual.is_some(), || format!("cookie {} not set", name))?,
            }
        }
        ScenarioStep::DontSeeCookie { name } => {
            check(client.cookie(name).is_none(), || {
                format!("cookie {} unexpectedly set", name)
            })?;
        }
        ScenarioStep::SeeCurrentUrlEquals { url } => {
            let actual = client.current_url();
            check(actual.as_deref() == Some(url.as_str()), || {
                format!("expected current url '{}', got {:?}", url, actual)
            })?;
        }
        ScenarioStep::Log { message } => {
            info!("[TEST LOG] {}", message);
        }
    }

    Ok(())
}

/// Execute a single step; failures are reported in the result
pub fn execute_step(client: &mut Connector, step: &ScenarioStep) -> StepResult {
    let start = Instant::now();
    let step_name = step_name(step);
    debug!("Executing step: {}", step_name);

    let result = perform(client, step);
    let duration_ms = start.elapsed().as_millis() as u64;

    StepResult {
        success: result.is_ok(),
        step_name,
        duration_ms,
        error: result.err().map(|e| e.to_string()),
    }
}

/// Execute steps in order, stopping at the first failure
pub fn execute_steps(client: &mut Connector, steps: &[ScenarioStep]) -> Vec<StepResult> {
    let mut results = Vec::with_capacity(steps.len());

    for step in steps {
        let result = execute_step(client, step);
        let success = result.success;
        results.push(result);

        if !success {
            break;
        }
    }

    results
}

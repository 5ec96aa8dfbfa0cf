use anyhow::{anyhow, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use ureq::{Agent, AgentBuilder, Response};

use crate::survey_config::{SubmitMode, SurveyConfig};

const TIMEOUT_SECS: u64 = 10;

#[derive(Debug, PartialEq)]
pub enum SubmitOutcome {
    /// A no-cors submission went out, but we can't see what came back.
    Opaque,

    /// The parsed response body, if there was one.
    Body(Option<Value>),
}

pub struct SurveyClient {
    agent: Agent,
}

impl SurveyClient {
    pub fn new() -> Self {
        Self {
            agent: AgentBuilder::new()
                .timeout(Duration::from_secs(TIMEOUT_SECS))
                .build(),
        }
    }

    /// Fetch and parse JSON, bypassing any caches along the way.
    pub fn load_json<T: DeserializeOwned, U: AsRef<str>>(&self, url: U) -> Result<T> {
        let url = url.as_ref();
        println!("Loading {url}...");
        let response = match self
            .agent
            .get(url)
            .set("Cache-Control", "no-store")
            .set("Pragma", "no-cache")
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => {
                return Err(anyhow!("Failed to load {url}: {status}"));
            }
            Err(err) => return Err(anyhow!("Failed to load {url}: {err}")),
        };
        let response_body = response.into_string()?;
        match serde_json::from_str(&response_body) {
            Ok(value) => Ok(value),
            Err(err) => Err(anyhow!("Failed to parse {url}: {err}")),
        }
    }

    pub fn post_json<T: Serialize, U: AsRef<str>>(
        &self,
        url: U,
        payload: &T,
        mode: SubmitMode,
    ) -> Result<SubmitOutcome> {
        let url = url.as_ref();
        let body = serde_json::to_string(payload)?;
        match mode {
            SubmitMode::NoCors => {
                // Only "simple" content types are allowed here, so the JSON
                // goes out as plain text.
                match self
                    .agent
                    .post(url)
                    .set("Content-Type", "text/plain;charset=UTF-8")
                    .send_string(&body)
                {
                    Ok(_) | Err(ureq::Error::Status(_, _)) => Ok(SubmitOutcome::Opaque),
                    Err(err) => Err(anyhow!("Submit failed: {err}")),
                }
            }
            SubmitMode::Cors => {
                let response = match self
                    .agent
                    .post(url)
                    .set("Content-Type", "application/json")
                    .send_string(&body)
                {
                    Ok(response) => response,
                    Err(ureq::Error::Status(_, response)) => response,
                    Err(err) => return Err(anyhow!("Submit failed: {err}")),
                };
                let (status, text) = read_status_and_text(response)?;
                Ok(SubmitOutcome::Body(interpret_submit_response(status, &text)?))
            }
        }
    }

    pub fn submit<T: Serialize>(&self, config: &SurveyConfig, payload: &T) -> Result<SubmitOutcome> {
        self.post_json(&config.submit_url, payload, config.submit_mode)
    }
}

fn read_status_and_text(response: Response) -> Result<(u16, String)> {
    let status = response.status();
    Ok((status, response.into_string()?))
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Make sense of a readable submission response. Bodies that aren't JSON are
/// wrapped up so callers still get something to look at.
fn interpret_submit_response(status: u16, text: &str) -> Result<Option<Value>> {
    if !is_success(status) {
        return Err(anyhow!("Submit failed: {status} {text}"));
    }
    if text.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str(text) {
        Ok(value) => Ok(Some(value)),
        Err(_) => Ok(Some(json!({ "ok": true, "raw": text }))),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::{TcpListener, TcpStream},
        thread::{self, JoinHandle},
    };

    use serde_json::json;

    use crate::survey_config::SubmitMode;

    use super::{interpret_submit_response, SubmitOutcome, SurveyClient};

    /// Reads one HTTP request, headers and body, off the stream.
    fn read_request(stream: &mut TcpStream) -> String {
        let mut data = vec![];
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        if name.eq_ignore_ascii_case("content-length") {
                            value.trim().parse::<usize>().ok()
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0);
                if data.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).into_owned()
    }

    /// Serve a single canned response on localhost. The handle yields the
    /// raw request that came in.
    fn serve_once(status_line: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/exec", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            stream.write_all(response.as_bytes()).unwrap();
            request
        });
        (url, handle)
    }

    /// A URL nothing is listening on.
    fn closed_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/exec")
    }

    #[test]
    fn test_load_json_bypasses_cache() {
        let (url, server) = serve_once("200 OK", r#"{"block_id": 3}"#);
        let value: serde_json::Value = SurveyClient::new().load_json(&url).unwrap();
        assert_eq!(value, json!({"block_id": 3}));
        let request = server.join().unwrap().to_lowercase();
        assert!(request.starts_with("get /exec "));
        assert!(request.contains("cache-control: no-store"));
    }

    #[test]
    fn test_load_json_reports_status() {
        let (url, server) = serve_once("404 Not Found", "{}");
        let err = SurveyClient::new()
            .load_json::<serde_json::Value, _>(&url)
            .unwrap_err();
        assert_eq!(err.to_string(), format!("Failed to load {url}: 404"));
        server.join().unwrap();
    }

    #[test]
    fn test_load_json_fails_without_server() {
        let url = closed_url();
        let err = SurveyClient::new()
            .load_json::<serde_json::Value, _>(&url)
            .unwrap_err();
        assert!(err.to_string().starts_with(&format!("Failed to load {url}: ")));
    }

    #[test]
    fn test_no_cors_post_is_opaque_even_on_error_status() {
        let (url, server) = serve_once("500 Internal Server Error", r#"{"ok": false}"#);
        let outcome = SurveyClient::new()
            .post_json(&url, &json!({"pid": "abc"}), SubmitMode::NoCors)
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Opaque);
        let request = server.join().unwrap();
        let lower = request.to_lowercase();
        assert!(lower.starts_with("post /exec "));
        assert!(lower.contains("content-type: text/plain"));
        assert!(!lower.contains("application/json"));
        assert!(request.ends_with(r#"{"pid":"abc"}"#));
    }

    #[test]
    fn test_cors_post_sends_json_and_parses_reply() {
        let (url, server) = serve_once("200 OK", r#"{"ok": true, "row": 7}"#);
        let outcome = SurveyClient::new()
            .post_json(&url, &json!({"pid": "abc"}), SubmitMode::Cors)
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Body(Some(json!({"ok": true, "row": 7}))));
        let request = server.join().unwrap();
        assert!(request.to_lowercase().contains("content-type: application/json"));
        assert!(request.ends_with(r#"{"pid":"abc"}"#));
    }

    #[test]
    fn test_cors_post_fails_on_error_status() {
        let (url, server) = serve_once("500 Internal Server Error", "oops");
        let err = SurveyClient::new()
            .post_json(&url, &json!({}), SubmitMode::Cors)
            .unwrap_err();
        assert_eq!(err.to_string(), "Submit failed: 500 oops");
        server.join().unwrap();
    }

    #[test]
    fn test_post_fails_without_server_in_both_modes() {
        for mode in [SubmitMode::Cors, SubmitMode::NoCors] {
            let err = SurveyClient::new()
                .post_json(closed_url(), &json!({}), mode)
                .unwrap_err();
            assert!(err.to_string().starts_with("Submit failed: "));
        }
    }

    #[test]
    fn test_interpret_submit_response_parses_json() {
        assert_eq!(
            interpret_submit_response(200, r#"{"ok": true, "id": 5}"#).unwrap(),
            Some(json!({"ok": true, "id": 5}))
        );
    }

    #[test]
    fn test_interpret_submit_response_handles_empty_body() {
        assert_eq!(interpret_submit_response(204, "").unwrap(), None);
    }

    #[test]
    fn test_interpret_submit_response_wraps_raw_text() {
        assert_eq!(
            interpret_submit_response(200, "thanks!").unwrap(),
            Some(json!({"ok": true, "raw": "thanks!"}))
        );
    }

    #[test]
    fn test_interpret_submit_response_fails_on_bad_status() {
        let err = interpret_submit_response(500, "oops").unwrap_err();
        assert_eq!(err.to_string(), "Submit failed: 500 oops");
    }
}

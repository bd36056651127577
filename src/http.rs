use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, FROM, HeaderMap, HeaderValue};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::HttpSettings;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("response contained no data")]
    Empty,
}

#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    /// Non-200 replies count as failures, same as transport errors.
    pub fn into_json(self) -> Result<Value, FetchError> {
        if self.status != 200 {
            return Err(FetchError::Status(self.status));
        }
        serde_json::from_str(&self.body)
            .map_err(|err| FetchError::Malformed(format!("invalid json: {err}")))
    }
}

pub trait HttpTransport {
    fn get(&self, url: &Url) -> Result<HttpReply, FetchError>;
    fn post_json(&self, url: &Url, body: &Value) -> Result<HttpReply, FetchError>;
}

pub trait Pause {
    fn pause(&self, delay: Duration);
}

pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, delay: Duration) {
        if !delay.is_zero() {
            sleep(delay);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    /// Delay grows linearly with the number of the attempt that just failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    pub fn run<T>(
        &self,
        pause: &dyn Pause,
        operation: &str,
        mut attempt_once: impl FnMut() -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        let mut last_error = FetchError::Empty;

        for attempt in 1..=self.max_attempts {
            match attempt_once() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "attempt failed"
                    );
                    last_error = err;
                }
            }

            if attempt < self.max_attempts {
                let delay = self.delay_after(attempt);
                debug!(operation, delay_ms = delay.as_millis() as u64, "waiting before retry");
                pause.pause(delay);
            }
        }

        Err(last_error)
    }
}

/// Shared blocking session; one connection pool serves every request of a run.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(from) = &settings.from {
            let value = HeaderValue::from_str(from)
                .with_context(|| format!("invalid From header value: {from}"))?;
            headers.insert(FROM, value);
        }

        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &Url) -> Result<HttpReply, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        read_reply(response)
    }

    fn post_json(&self, url: &Url, body: &Value) -> Result<HttpReply, FetchError> {
        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        read_reply(response)
    }
}

fn read_reply(response: reqwest::blocking::Response) -> Result<HttpReply, FetchError> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .map_err(|err| FetchError::Transport(format!("failed to read body: {err}")))?;
    Ok(HttpReply { status, body })
}

#[cfg(test)]
pub mod testing {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::time::Duration;

    use reqwest::Url;
    use serde_json::Value;

    use super::{FetchError, HttpReply, HttpTransport, Pause};

    #[derive(Debug, Clone)]
    pub struct RecordedRequest {
        pub method: &'static str,
        pub url: String,
        pub body: Option<Value>,
    }

    /// Replays queued replies in order; once the queue is empty every call gets `fallback`.
    pub struct ScriptedTransport {
        replies: RefCell<VecDeque<Result<HttpReply, FetchError>>>,
        fallback: HttpReply,
        pub requests: RefCell<Vec<RecordedRequest>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self {
                replies: RefCell::new(VecDeque::new()),
                fallback: HttpReply {
                    status: 503,
                    body: String::new(),
                },
                requests: RefCell::new(Vec::new()),
            }
        }

        pub fn with_fallback(mut self, status: u16, body: &str) -> Self {
            self.fallback = HttpReply {
                status,
                body: body.to_string(),
            };
            self
        }

        pub fn reply(self, status: u16, body: &str) -> Self {
            self.replies.borrow_mut().push_back(Ok(HttpReply {
                status,
                body: body.to_string(),
            }));
            self
        }

        pub fn fail(self, reason: &str) -> Self {
            self.replies
                .borrow_mut()
                .push_back(Err(FetchError::Transport(reason.to_string())));
            self
        }

        pub fn call_count(&self) -> usize {
            self.requests.borrow().len()
        }

        fn next_reply(&self) -> Result<HttpReply, FetchError> {
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn get(&self, url: &Url) -> Result<HttpReply, FetchError> {
            self.requests.borrow_mut().push(RecordedRequest {
                method: "GET",
                url: url.to_string(),
                body: None,
            });
            self.next_reply()
        }

        fn post_json(&self, url: &Url, body: &Value) -> Result<HttpReply, FetchError> {
            self.requests.borrow_mut().push(RecordedRequest {
                method: "POST",
                url: url.to_string(),
                body: Some(body.clone()),
            });
            self.next_reply()
        }
    }

    #[derive(Default)]
    pub struct RecordingPause {
        pub delays: RefCell<Vec<Duration>>,
    }

    impl Pause for RecordingPause {
        fn pause(&self, delay: Duration) {
            self.delays.borrow_mut().push(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::RecordingPause;
    use super::{FetchError, HttpReply, RetryPolicy};

    #[test]
    fn retry_stops_at_first_success() {
        let policy = RetryPolicy::new(3, 100);
        let pause = RecordingPause::default();
        let mut calls = 0;

        let result = policy.run(&pause, "test", || {
            calls += 1;
            if calls < 2 {
                Err(FetchError::Status(502))
            } else {
                Ok(calls)
            }
        });

        assert_eq!(result.expect("second attempt succeeds"), 2);
        assert_eq!(*pause.delays.borrow(), vec![Duration::from_millis(100)]);
    }

    #[test]
    fn retry_exhausts_budget_with_linear_backoff_and_no_trailing_wait() {
        let policy = RetryPolicy::new(3, 1_000);
        let pause = RecordingPause::default();
        let mut calls = 0;

        let result: Result<(), FetchError> = policy.run(&pause, "test", || {
            calls += 1;
            Err(FetchError::Status(500))
        });

        assert!(matches!(result, Err(FetchError::Status(500))));
        assert_eq!(calls, 3);
        assert_eq!(
            *pause.delays.borrow(),
            vec![Duration::from_millis(1_000), Duration::from_millis(2_000)]
        );
    }

    #[test]
    fn zero_attempt_budget_still_tries_once() {
        let policy = RetryPolicy::new(0, 10);
        let pause = RecordingPause::default();
        let mut calls = 0;
        let _ = policy.run(&pause, "test", || -> Result<(), FetchError> {
            calls += 1;
            Err(FetchError::Empty)
        });
        assert_eq!(calls, 1);
        assert!(pause.delays.borrow().is_empty());
    }

    #[test]
    fn non_200_reply_is_a_status_failure() {
        let reply = HttpReply {
            status: 503,
            body: "{}".to_string(),
        };
        assert!(matches!(reply.into_json(), Err(FetchError::Status(503))));

        let reply = HttpReply {
            status: 200,
            body: "<html>".to_string(),
        };
        assert!(matches!(reply.into_json(), Err(FetchError::Malformed(_))));
    }
}

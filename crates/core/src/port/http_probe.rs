// HTTP Probe Port (healthcheck gate)

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
}

/// Issue a GET and report the status code
#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn get_status(&self, url: &str, timeout: Duration) -> Result<u16, ProbeError>;
}

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays a sequence of probe results; the last one repeats
    pub struct MockHttpProbe {
        results: Arc<Mutex<VecDeque<Result<u16, ProbeError>>>>,
        call_count: Arc<Mutex<usize>>,
    }

    impl MockHttpProbe {
        pub fn new(results: Vec<Result<u16, ProbeError>>) -> Self {
            Self {
                results: Arc::new(Mutex::new(results.into())),
                call_count: Arc::new(Mutex::new(0)),
            }
        }

        pub fn always(status: u16) -> Self {
            Self::new(vec![Ok(status)])
        }

        pub fn unreachable() -> Self {
            Self::new(vec![Err(ProbeError::Request {
                url: "mock".to_string(),
                message: "connection refused".to_string(),
            })])
        }

        pub fn call_count(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl HttpProbe for MockHttpProbe {
        async fn get_status(&self, _url: &str, _timeout: Duration) -> Result<u16, ProbeError> {
            *self.call_count.lock().unwrap() += 1;
            let mut results = self.results.lock().unwrap();
            if results.len() > 1 {
                results.pop_front().unwrap()
            } else {
                results.front().cloned().unwrap_or(Ok(200))
            }
        }
    }
}

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::from_str;

use crate::error::RagError;

/// Blocking JSON client bound to one upstream service and one timeout.
#[derive(Clone, Debug)]
pub struct JsonClient {
    client: Client,
    service: &'static str,
}

impl JsonClient {
    pub fn new(service: &'static str, timeout: Duration) -> Result<Self, RagError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Config(format!("{} client: {}", service, e)))?;
        Ok(Self { client, service })
    }

    pub fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, RagError> {
        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .map_err(|e| self.classify(url, e))?;
        self.decode("POST", url, resp)
    }

    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, RagError> {
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| self.classify(url, e))?;
        self.decode("GET", url, resp)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        method: &str,
        url: &str,
        resp: Response,
    ) -> Result<T, RagError> {
        let status = resp.status();
        let text = resp.text().map_err(|e| self.classify(url, e))?;
        if !status.is_success() {
            return Err(RagError::unavailable(
                self.service,
                format!("{} {} failed: {} {}", method, url, status, text),
            ));
        }
        from_str::<T>(&text).map_err(|e| {
            RagError::unavailable(
                self.service,
                format!("{} {} decode failed: {} | {}", method, url, e, text),
            )
        })
    }

    fn classify(&self, url: &str, err: reqwest::Error) -> RagError {
        if err.is_timeout() {
            RagError::UpstreamTimeout {
                service: self.service.to_string(),
                message: format!("{}: {}", url, err),
            }
        } else {
            RagError::unavailable(self.service, format!("{}: {}", url, err))
        }
    }
}

pub mod gesundheitskarte;
pub mod kvwl;

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::model::Fragment;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; care_scraper/0.1)";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("could not connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let url = url.to_string();
        if err.is_timeout() {
            FetchError::Timeout { url }
        } else if err.is_connect() {
            FetchError::Connect { url, source: err }
        } else {
            FetchError::Request { url, source: err }
        }
    }
}

/// A provider of canonical fragments for one source namespace.
///
/// `next_fragment` is pulled until it yields `None`. Any error aborts the
/// run; adapters do not retry.
#[async_trait]
pub trait SourceAdapter: Send {
    fn source(&self) -> &str;

    async fn next_fragment(&mut self) -> Result<Option<Fragment>, FetchError>;
}

/// Fixed pause between successive requests of one adapter.
#[derive(Debug)]
pub struct Throttle {
    delay: Duration,
    started: bool,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Throttle {
            delay,
            started: false,
        }
    }

    /// Sleep before every request except the first.
    pub async fn wait(&mut self) {
        if self.started && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.started = true;
    }
}

/// Accept a number, a numeric string, or null.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    })
}

/// Accept a string, a number or a bool as text; anything else is absent.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to create HTTP client")
}

pub(crate) async fn post_json<B, T>(
    client: &reqwest::Client,
    url: &str,
    body: &B,
) -> Result<T, FetchError>
where
    B: Serialize + ?Sized + Sync,
    T: DeserializeOwned,
{
    debug!("POST {}", url);
    let response = client
        .post(url)
        .header(reqwest::header::ACCEPT, "application/json, text/plain, */*")
        .json(body)
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest(url, e))?;
    let text = read_body(url, response).await?;
    serde_json::from_str(&text).map_err(|source| FetchError::Decode {
        url: url.to_string(),
        source,
    })
}

pub(crate) async fn get_text(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    debug!("GET {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest(url, e))?;
    read_body(url, response).await
}

async fn read_body(url: &str, response: reqwest::Response) -> Result<String, FetchError> {
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status,
        });
    }
    response
        .text()
        .await
        .map_err(|e| FetchError::from_reqwest(url, e))
}

//! PURGE requests over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, header};

use crate::application::dispatch::{PurgeResponse, PurgeTransport, PurgeTransportError};

use super::error::InfraError;

#[derive(Clone, Debug)]
pub struct ReqwestPurgeTransport {
    client: Client,
    method: Method,
}

impl ReqwestPurgeTransport {
    pub fn new(timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()?;
        let method = Method::from_bytes(b"PURGE")
            .map_err(|err| InfraError::configuration(err.to_string()))?;

        Ok(Self { client, method })
    }

    pub fn user_agent() -> &'static str {
        concat!("sluice/", env!("CARGO_PKG_VERSION"))
    }
}

#[async_trait]
impl PurgeTransport for ReqwestPurgeTransport {
    async fn send_purge(
        &self,
        url: &str,
        host_name: &str,
    ) -> Result<PurgeResponse, PurgeTransportError> {
        let response = self
            .client
            .request(self.method.clone(), url)
            .header(header::HOST, host_name)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        Ok(PurgeResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
        })
    }
}

fn classify(err: reqwest::Error) -> PurgeTransportError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        PurgeTransportError::Transport(err.to_string())
    } else {
        PurgeTransportError::Other(err.to_string())
    }
}

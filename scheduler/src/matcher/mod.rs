//! Matcher RPC client. Wire types are generated by
//! `build.rs` from `proto/matcher.proto`; this module adds the endpoint/deadline
//! configuration and shapes the allocation request around it.

pub mod proto {
    tonic::include_proto!("fluxnetes.matcher");
}

use proto::matcher_service_client::MatcherServiceClient;
use proto::{CancelRequest, CancelResponse, MatchRequest, MatchResponse};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// `not-found` sentinel for `Cancel` — a non-zero error matching this value
/// is treated as success by the core, same as error == 0.
pub const CANCEL_ERROR_NOT_FOUND: i32 = 1;

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    pub endpoint: String,
    pub request_timeout: Duration,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            // Default local loopback, port 4242.
            endpoint: "http://127.0.0.1:4242".to_string(),
            request_timeout: Duration::from_secs(200),
        }
    }
}

/// Thin wrapper over the generated gRPC client. Cloning is cheap (the inner
/// `tonic` channel is backed by a connection pool).
#[derive(Clone)]
pub struct MatcherClient {
    inner: MatcherServiceClient<Channel>,
}

impl MatcherClient {
    pub async fn connect(config: &MatcherConfig) -> anyhow::Result<Self> {
        let channel = Endpoint::from_shared(config.endpoint.clone())?
            .timeout(config.request_timeout)
            .connect()
            .await?;
        Ok(Self {
            inner: MatcherServiceClient::new(channel),
        })
    }

    pub async fn match_group(&self, request: MatchRequest) -> anyhow::Result<MatchResponse> {
        let mut client = self.inner.clone();
        Ok(client
            .r#match(tonic::Request::new(request))
            .await?
            .into_inner())
    }

    pub async fn cancel(&self, flux_id: u64) -> anyhow::Result<CancelResponse> {
        let mut client = self.inner.clone();
        Ok(client
            .cancel(tonic::Request::new(CancelRequest { flux_id }))
            .await?
            .into_inner())
    }
}

/// `Cancel` outcomes the core treats as "already gone, nothing to do".
/// Cleanup errors against absent resources are swallowed rather than retried.
pub fn cancel_is_success(response: &CancelResponse) -> bool {
    response.error == 0 || response.error == CANCEL_ERROR_NOT_FOUND
}

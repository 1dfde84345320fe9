//! Delivery of queued mutations to the server.

use futures_util::future::BoxFuture;
use relief_types::QueuedMutation;
use reqwest::StatusCode;
use thiserror::Error;

/// Header carrying the mutation id so the server can drop duplicates.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Why a mutation could not be replayed.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("replay transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server rejected replay with status {status}")]
    Rejected { status: StatusCode },
}

impl ReplayError {
    /// Whether retrying can never succeed. Client errors other than timeout
    /// and rate limiting are permanent.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Transport(_) => false,
            Self::Rejected { status } => {
                status.is_client_error()
                    && *status != StatusCode::REQUEST_TIMEOUT
                    && *status != StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

/// Re-issues one queued mutation against the server.
pub trait MutationReplayer: Send + Sync {
    fn replay<'a>(&'a self, mutation: &'a QueuedMutation) -> BoxFuture<'a, Result<(), ReplayError>>;
}

/// Treats every mutation as delivered without contacting the server.
///
/// Used when no replay endpoint is configured; draining then simply clears
/// the queue in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcknowledgeReplayer;

impl MutationReplayer for AcknowledgeReplayer {
    fn replay<'a>(&'a self, mutation: &'a QueuedMutation) -> BoxFuture<'a, Result<(), ReplayError>> {
        Box::pin(async move {
            tracing::debug!(id = %mutation.id, endpoint = %mutation.endpoint, "acknowledged queued mutation");
            Ok(())
        })
    }
}

/// POSTs each mutation's input to `<base_url>/api/<endpoint>`.
#[derive(Debug, Clone)]
pub struct HttpReplayer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReplayer {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn url_for(&self, endpoint: &str) -> String {
        format!("{}/api/{}", self.base_url, endpoint)
    }
}

impl MutationReplayer for HttpReplayer {
    fn replay<'a>(&'a self, mutation: &'a QueuedMutation) -> BoxFuture<'a, Result<(), ReplayError>> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.url_for(&mutation.endpoint))
                .header(IDEMPOTENCY_KEY_HEADER, &mutation.id)
                .json(&mutation.input)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(ReplayError::Rejected { status });
            }
            tracing::debug!(id = %mutation.id, endpoint = %mutation.endpoint, %status, "replayed queued mutation");
            Ok(())
        })
    }
}

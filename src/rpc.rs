use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log};
use alloy_primitives::B256;
use anyhow::Result;
use regex::Regex;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120); // 2 minutes timeout per request
const MAX_RESULTS_ERROR: &str = "exceeds max results";

/// JSON-RPC client over one or more endpoints. Failing endpoints are
/// rotated out round-robin; every request is retried with backoff.
#[derive(Clone)]
pub struct RpcClient {
    providers: Vec<DynProvider>,
    urls: Vec<String>,
    current_provider: Arc<AtomicUsize>,
    max_retries: usize,
}

impl RpcClient {
    pub fn new(rpc_urls: &[String]) -> Result<Self> {
        if rpc_urls.is_empty() {
            return Err(anyhow::anyhow!("At least one RPC URL must be provided"));
        }

        let mut providers = Vec::new();
        for url in rpc_urls {
            let parsed_url = url
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", url))?;
            providers.push(ProviderBuilder::new().connect_http(parsed_url).erased());
        }

        Ok(RpcClient {
            providers,
            urls: rpc_urls.to_vec(),
            current_provider: Arc::new(AtomicUsize::new(0)),
            max_retries: 5,
        })
    }

    fn get_provider(&self) -> DynProvider {
        let index = self.current_provider.load(Ordering::Relaxed) % self.providers.len();
        self.providers[index].clone()
    }

    pub fn get_current_url(&self) -> &str {
        let index = self.current_provider.load(Ordering::Relaxed) % self.urls.len();
        &self.urls[index]
    }

    pub fn rotate_provider(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);

        if self.providers.len() > 1 {
            debug!("Rotating to RPC provider #{}", next);
        }
    }

    fn get_retry_strategy(&self) -> impl Iterator<Item = Duration> + use<> {
        ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries)
    }

    fn handle_error(&self, error_str: String) -> anyhow::Error {
        if error_str.contains(MAX_RESULTS_ERROR) {
            // The caller narrows the range; the endpoint itself is fine.
            debug!("Provider capped the result size: {}", error_str);
        } else {
            warn!(
                "RPC error on {}: {}, rotating provider",
                self.get_current_url(),
                error_str
            );
            self.rotate_provider();
        }
        anyhow::anyhow!(error_str)
    }

    fn handle_timeout(&self) -> anyhow::Error {
        warn!(
            "Request timeout after {} seconds on {}, rotating provider",
            REQUEST_TIMEOUT.as_secs(),
            self.get_current_url()
        );
        self.rotate_provider();
        anyhow::anyhow!(
            "Request timeout after {} seconds",
            REQUEST_TIMEOUT.as_secs()
        )
    }

    /// Runs `call` against the current provider with timeout, rotation and
    /// retries. Result-size errors are returned immediately.
    async fn request<T, E, F, Fut>(&self, call: F) -> Result<T>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        RetryIf::spawn(
            self.get_retry_strategy(),
            || {
                let future = call(self.get_provider());
                async move {
                    match timeout(REQUEST_TIMEOUT, future).await {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(e)) => Err(self.handle_error(e.to_string())),
                        Err(_) => Err(self.handle_timeout()),
                    }
                }
            },
            |e: &anyhow::Error| !is_max_results_error(e),
        )
        .await
    }

    pub async fn get_latest_block(&self) -> Result<u64> {
        self.request(|provider| async move { provider.get_block_number().await })
            .await
    }

    /// Hash of the canonical block at `block_number`, if the node has it.
    pub async fn get_block_hash(&self, block_number: u64) -> Result<Option<B256>> {
        self.request(|provider| async move {
            provider
                .get_block_by_number(BlockNumberOrTag::Number(block_number))
                .await
                .map(|block| block.map(|block| block.header.hash))
        })
        .await
    }

    async fn get_logs_range(&self, from_block: u64, to_block: u64, topic0: B256) -> Result<Vec<Log>> {
        let filter = Filter::new()
            .event_signature(topic0)
            .from_block(from_block)
            .to_block(to_block);

        self.request(|provider| {
            let filter = filter.clone();
            async move { provider.get_logs(&filter).await }
        })
        .await
    }

    /// Every log with `topic0` in `[from_block, to_block]`, across all
    /// contracts, in chain order. Splits the range when the provider caps
    /// the result size.
    pub async fn get_logs(&self, from_block: u64, to_block: u64, topic0: B256) -> Result<Vec<Log>> {
        let mut all_logs = Vec::new();
        // Popped from the back, so the lower half is always fetched first.
        let mut pending = vec![(from_block, to_block)];

        while let Some((from, to)) = pending.pop() {
            match self.get_logs_range(from, to, topic0).await {
                Ok(logs) => all_logs.extend(logs),
                Err(e) if is_max_results_error(&e) => {
                    let Some(split_at) = split_point(from, to, &e.to_string()) else {
                        return Err(e);
                    };
                    info!(
                        "Hit max results limit for blocks {}-{}, splitting at block {}",
                        from, to, split_at
                    );
                    pending.push((split_at + 1, to));
                    pending.push((from, split_at));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(all_logs)
    }
}

fn is_max_results_error(error: &anyhow::Error) -> bool {
    error.to_string().contains(MAX_RESULTS_ERROR)
}

fn parse_max_results_error(error_str: &str) -> Option<(u64, u64)> {
    let re = Regex::new(r"retry with the range (\d+)-(\d+)").ok()?;
    let captures = re.captures(error_str)?;

    let from = captures.get(1)?.as_str().parse().ok()?;
    let to = captures.get(2)?.as_str().parse().ok()?;

    Some((from, to))
}

/// Last block of the lower half when `[from, to]` has to be split. Uses the
/// provider's suggestion when it is usable, otherwise halves the range.
/// `None` for a single block, which cannot be split further.
fn split_point(from: u64, to: u64, error_str: &str) -> Option<u64> {
    if from >= to {
        return None;
    }
    let suggested = parse_max_results_error(error_str)
        .map(|(_, suggested_to)| suggested_to)
        .filter(|&suggested_to| suggested_to >= from && suggested_to < to);
    Some(suggested.unwrap_or(from + (to - from) / 2))
}

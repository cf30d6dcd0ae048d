//! Redundant endpoints per logical network, with liveness-probed failover.

use super::retry::{execute_with_retry, RetryConfig, RetryOutcome};
use crate::errors::{CofferError, Result};
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::Duration,
};
use tracing::{debug, info, warn};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Cheap "is this endpoint serving" check, e.g. fetching the current block height.
pub trait LivenessProbe: Send + Sync {
    fn probe(&self, endpoint: &str) -> impl Future<Output = eyre::Result<()>> + Send;
}

/// Ordered endpoints for one network plus the last-known-good cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPool {
    endpoints: Vec<String>,
    cursor: Option<usize>,
    available: bool,
}

impl ProviderPool {
    fn new(endpoints: Vec<String>) -> Self {
        let available = !endpoints.is_empty();
        Self {
            endpoints,
            cursor: None,
            available,
        }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn current(&self) -> Option<&str> {
        self.cursor
            .and_then(|i| self.endpoints.get(i))
            .map(String::as_str)
    }

    pub const fn is_available(&self) -> bool {
        self.available
    }

    /// Candidate indices in probe order, starting at `start` and wrapping once.
    fn rotation(&self, start: usize) -> Vec<usize> {
        let n = self.endpoints.len();
        (0..n).map(|k| (start + k) % n).collect()
    }
}

pub struct ProviderRegistry<P> {
    probe: P,
    probe_timeout: Duration,
    pools: RwLock<HashMap<String, Arc<Mutex<ProviderPool>>>>,
}

impl<P> std::fmt::Debug for ProviderRegistry<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("probe_timeout", &self.probe_timeout)
            .finish_non_exhaustive()
    }
}

impl<P: LivenessProbe> ProviderRegistry<P> {
    pub fn new(probe: P) -> Self {
        Self::with_probe_timeout(probe, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_probe_timeout(probe: P, probe_timeout: Duration) -> Self {
        Self {
            probe,
            probe_timeout,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the endpoints for `network`. Blank entries are dropped.
    pub fn register_network(&self, network: &str, endpoints: Vec<String>) {
        let endpoints: Vec<String> = endpoints
            .into_iter()
            .map(|e| e.trim().to_owned())
            .filter(|e| !e.is_empty())
            .collect();
        info!(network, endpoints = endpoints.len(), "network registered");
        self.pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(network.to_owned(), Arc::new(Mutex::new(ProviderPool::new(endpoints))));
    }

    fn pool(&self, network: &str) -> Result<Arc<Mutex<ProviderPool>>> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(network)
            .map(Arc::clone)
            .ok_or_else(|| CofferError::UnknownNetwork(network.to_owned()))
    }

    fn snapshot(&self, network: &str) -> Result<(Arc<Mutex<ProviderPool>>, ProviderPool)> {
        let pool = self.pool(network)?;
        let copy = pool.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Ok((pool, copy))
    }

    pub fn is_network_available(&self, network: &str) -> Result<bool> {
        Ok(self.snapshot(network)?.1.available)
    }

    /// Last endpoint that passed a probe, if any.
    pub fn current_provider(&self, network: &str) -> Result<Option<String>> {
        Ok(self.snapshot(network)?.1.current().map(str::to_owned))
    }

    /// Mark the network available again and forget the cursor.
    pub fn reset_network_status(&self, network: &str) -> Result<()> {
        let pool = self.pool(network)?;
        let mut guard = pool.lock().unwrap_or_else(PoisonError::into_inner);
        guard.available = !guard.endpoints.is_empty();
        guard.cursor = None;
        info!(network, "network status reset");
        Ok(())
    }

    async fn probe_one(&self, network: &str, endpoint: &str) -> bool {
        match tokio::time::timeout(self.probe_timeout, self.probe.probe(endpoint)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(network, endpoint, error = %format!("{e:#}"), "probe failed");
                false
            }
            Err(_elapsed) => {
                let timeout_ms = u64::try_from(self.probe_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(network, endpoint, timeout_ms, "probe timed out");
                false
            }
        }
    }

    /// Probe candidates in `order`; the first responsive one becomes the cursor.
    async fn select(
        &self,
        network: &str,
        pool: &Mutex<ProviderPool>,
        snapshot: &ProviderPool,
        order: Vec<usize>,
    ) -> Result<String> {
        for i in order {
            let Some(endpoint) = snapshot.endpoints.get(i) else {
                continue;
            };
            if self.probe_one(network, endpoint).await {
                let mut guard = pool.lock().unwrap_or_else(PoisonError::into_inner);
                // The pool may have been re-registered while probing.
                if guard.endpoints.get(i) == Some(endpoint) {
                    guard.cursor = Some(i);
                    guard.available = true;
                }
                debug!(network, endpoint = %endpoint, "provider selected");
                return Ok(endpoint.clone());
            }
        }
        let mut guard = pool.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.endpoints == snapshot.endpoints {
            guard.available = false;
        }
        warn!(network, "no responsive provider");
        Err(CofferError::NetworkUnavailable(network.to_owned()))
    }

    /// Round-robin from the last-known-good endpoint until one answers its probe.
    pub async fn get_next_provider(&self, network: &str) -> Result<String> {
        let (pool, snapshot) = self.snapshot(network)?;
        let order = snapshot.rotation(snapshot.cursor.unwrap_or(0));
        self.select(network, &pool, &snapshot, order).await
    }

    /// Like [`Self::get_next_provider`], but starting after `failed` and never returning it.
    async fn next_after(&self, network: &str, failed: &str) -> Result<String> {
        let (pool, snapshot) = self.snapshot(network)?;
        let start = snapshot
            .endpoints
            .iter()
            .position(|e| e == failed)
            .map_or(0, |i| i + 1);
        let order: Vec<usize> = snapshot
            .rotation(start)
            .into_iter()
            .filter(|i| snapshot.endpoints.get(*i).map(String::as_str) != Some(failed))
            .collect();
        self.select(network, &pool, &snapshot, order).await
    }

    /// Retry `op` against one endpoint; on retryable exhaustion move to the next
    /// responsive endpoint. Each endpoint gets at most one retry run.
    pub async fn execute_with_failover<T, F, Fut>(
        &self,
        network: &str,
        cfg: &RetryConfig,
        mut op: F,
    ) -> Result<RetryOutcome<T>>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = eyre::Result<T>>,
    {
        let total = self.snapshot(network)?.1.endpoints.len();
        let mut endpoint = self.get_next_provider(network).await?;
        let mut attempts = 0_u32;
        let mut history = Vec::new();
        let mut elapsed = Duration::ZERO;

        for run in 1..=total {
            let ep = endpoint.clone();
            let mut outcome = execute_with_retry(|| op(ep.clone()), cfg).await;
            attempts = attempts.saturating_add(outcome.attempts);
            elapsed = elapsed.saturating_add(outcome.duration);
            history.append(&mut outcome.history);

            let retryable = outcome.error.as_ref().is_some_and(|e| e.kind.is_retryable());
            let finish = |mut outcome: RetryOutcome<T>, history: Vec<_>| {
                outcome.attempts = attempts;
                outcome.duration = elapsed;
                outcome.history = history;
                outcome.endpoint = Some(ep.clone());
                outcome
            };
            if outcome.success || !retryable || run == total {
                return Ok(finish(outcome, history));
            }

            warn!(network, endpoint = %ep, "endpoint exhausted; failing over");
            match self.next_after(network, &ep).await {
                Ok(next) => endpoint = next,
                Err(_unavailable) => return Ok(finish(outcome, history)),
            }
        }
        Err(CofferError::NetworkUnavailable(network.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Mutex as StdMutex};

    /// Probe that answers only for endpoints in `up`, recording every call.
    #[derive(Default)]
    struct ScriptedProbe {
        up: StdMutex<HashSet<String>>,
        calls: StdMutex<Vec<String>>,
    }

    impl ScriptedProbe {
        fn with_up(up: &[&str]) -> Self {
            let probe = Self::default();
            probe.set_up(up);
            probe
        }

        fn set_up(&self, up: &[&str]) {
            let mut g = self.up.lock().unwrap_or_else(PoisonError::into_inner);
            g.clear();
            g.extend(up.iter().map(|s| (*s).to_owned()));
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }
    }

    impl LivenessProbe for ScriptedProbe {
        fn probe(&self, endpoint: &str) -> impl Future<Output = eyre::Result<()>> + Send {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(endpoint.to_owned());
            let ok = self
                .up
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(endpoint);
            async move {
                if ok {
                    Ok(())
                } else {
                    eyre::bail!("connection refused")
                }
            }
        }
    }

    struct HangingProbe;

    impl LivenessProbe for HangingProbe {
        fn probe(&self, _endpoint: &str) -> impl Future<Output = eyre::Result<()>> + Send {
            async {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(())
            }
        }
    }

    fn endpoints(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://rpc{i}.example")).collect()
    }

    fn quick() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(10),
            jitter_percent: 0,
            ..RetryConfig::default()
        }
    }

    #[tokio::test]
    async fn fails_over_to_nth_provider_and_sticks() -> eyre::Result<()> {
        let reg = ProviderRegistry::new(ScriptedProbe::with_up(&["https://rpc2.example"]));
        reg.register_network("ethereum", endpoints(3));

        assert_eq!(reg.get_next_provider("ethereum").await?, "https://rpc2.example");
        assert_eq!(
            reg.current_provider("ethereum")?.as_deref(),
            Some("https://rpc2.example")
        );
        // The next call starts from the cursor, so only rpc2 is probed.
        assert_eq!(reg.get_next_provider("ethereum").await?, "https://rpc2.example");
        assert_eq!(
            reg.probe.calls(),
            vec![
                "https://rpc0.example",
                "https://rpc1.example",
                "https://rpc2.example",
                "https://rpc2.example",
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn all_down_marks_network_unavailable() -> eyre::Result<()> {
        let reg = ProviderRegistry::new(ScriptedProbe::with_up(&[]));
        reg.register_network("solana", endpoints(2));
        assert!(reg.is_network_available("solana")?);
        assert_eq!(
            reg.get_next_provider("solana").await,
            Err(CofferError::NetworkUnavailable("solana".to_owned()))
        );
        assert!(!reg.is_network_available("solana")?);

        // A later successful probe restores availability.
        reg.probe.set_up(&["https://rpc1.example"]);
        assert_eq!(reg.get_next_provider("solana").await?, "https://rpc1.example");
        assert!(reg.is_network_available("solana")?);

        reg.reset_network_status("solana")?;
        assert_eq!(reg.current_provider("solana")?, None);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_network_is_an_error() {
        let reg = ProviderRegistry::new(ScriptedProbe::default());
        assert_eq!(
            reg.get_next_provider("aptos").await,
            Err(CofferError::UnknownNetwork("aptos".to_owned()))
        );
        assert!(reg.is_network_available("aptos").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_is_bounded_by_timeout() {
        let reg = ProviderRegistry::with_probe_timeout(HangingProbe, Duration::from_millis(250));
        reg.register_network("bitcoin", endpoints(2));
        let started = tokio::time::Instant::now();
        assert_eq!(
            reg.get_next_provider("bitcoin").await,
            Err(CofferError::NetworkUnavailable("bitcoin".to_owned()))
        );
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn execute_with_failover_moves_past_a_dead_endpoint() -> eyre::Result<()> {
        let reg = ProviderRegistry::new(ScriptedProbe::with_up(&[
            "https://rpc0.example",
            "https://rpc1.example",
        ]));
        reg.register_network("polygon", endpoints(2));

        let outcome = reg
            .execute_with_failover("polygon", &quick(), |ep| async move {
                if ep == "https://rpc0.example" {
                    eyre::bail!("503 service unavailable")
                }
                Ok(ep.len())
            })
            .await?;
        assert!(outcome.success);
        assert_eq!(outcome.endpoint.as_deref(), Some("https://rpc1.example"));
        assert_eq!(outcome.attempts, 3, "two on rpc0, one on rpc1");
        assert_eq!(outcome.history.len(), 2);
        assert_eq!(
            reg.current_provider("polygon")?.as_deref(),
            Some("https://rpc1.example")
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_do_not_fail_over() -> eyre::Result<()> {
        let reg = ProviderRegistry::new(ScriptedProbe::with_up(&[
            "https://rpc0.example",
            "https://rpc1.example",
        ]));
        reg.register_network("ethereum", endpoints(2));
        let outcome: RetryOutcome<()> = reg
            .execute_with_failover("ethereum", &quick(), |_ep| async {
                eyre::bail!("execution reverted")
            })
            .await?;
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.endpoint.as_deref(), Some("https://rpc0.example"));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn every_endpoint_gets_one_run() -> eyre::Result<()> {
        let reg = ProviderRegistry::new(ScriptedProbe::with_up(&[
            "https://rpc0.example",
            "https://rpc1.example",
            "https://rpc2.example",
        ]));
        reg.register_network("ethereum", endpoints(3));
        let outcome: RetryOutcome<()> = reg
            .execute_with_failover("ethereum", &quick(), |_ep| async {
                eyre::bail!("429 too many requests")
            })
            .await?;
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 6);
        assert_eq!(outcome.endpoint.as_deref(), Some("https://rpc2.example"));
        Ok(())
    }
}

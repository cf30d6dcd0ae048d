//! Timeout, retry-with-backoff and multi-provider failover for outbound chain RPC.

pub mod failover;
pub mod probe;
pub mod retry;

pub use failover::{LivenessProbe, ProviderPool, ProviderRegistry, DEFAULT_PROBE_TIMEOUT};
pub use probe::{JsonRpcProbe, DEFAULT_PROBE_METHOD};
pub use retry::{
    backoff_delay, classify, execute_with_retry, AttemptRecord, NetworkError, NetworkErrorKind,
    RetryConfig, RetryOutcome, RetryableOperation, RpcFault,
};

//! Port traits the core consumes but never implements (spec §6: "Executor
//! interface (consumed)" and "Credential refresh interface (consumed)").
//!
//! Uses native async fn in traits (Rust 2024 edition, no `async_trait` macro),
//! matching the repository-trait convention elsewhere in this codebase.

use std::future::Future;
use std::pin::Pin;

use crate::classify::RawFailure;
use serde_json::Value;

/// A platform-specific executor. `operation` is the opaque "target:op"
/// string from `ActionRequest::action`; `params` is handed through
/// untouched. The core never inspects the returned value except to store it
/// for idempotency/stale-cache and to look up an id for undo.
pub trait Executor: Send + Sync {
    fn execute(
        &self,
        operation: &str,
        params: &Value,
    ) -> impl Future<Output = Result<Value, RawFailure>> + Send;
}

/// A per-platform credential refresh hook, registered at startup and invoked
/// by the retry engine at most once per call when a policy allows it
/// (spec §4.2 step 5).
pub trait CredentialRefresh: Send + Sync {
    fn refresh(&self) -> impl Future<Output = Result<String, RawFailure>> + Send;
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `Executor` and `CredentialRefresh` use native async-fn-in-traits, which
/// the compiler will not turn into a `dyn`-safe vtable. These adapters box
/// the returned future so a heterogeneous set of executors can live behind
/// one registry; every `Executor`/`CredentialRefresh` gets one for free.
pub trait DynExecutor: Send + Sync {
    fn execute<'a>(&'a self, operation: &'a str, params: &'a Value) -> BoxFuture<'a, Result<Value, RawFailure>>;
}

impl<T: Executor> DynExecutor for T {
    fn execute<'a>(&'a self, operation: &'a str, params: &'a Value) -> BoxFuture<'a, Result<Value, RawFailure>> {
        Box::pin(Executor::execute(self, operation, params))
    }
}

pub trait DynCredentialRefresh: Send + Sync {
    fn refresh<'a>(&'a self) -> BoxFuture<'a, Result<String, RawFailure>>;
}

impl<T: CredentialRefresh> DynCredentialRefresh for T {
    fn refresh<'a>(&'a self) -> BoxFuture<'a, Result<String, RawFailure>> {
        Box::pin(CredentialRefresh::refresh(self))
    }
}

use async_trait::async_trait;
use serde_json::Value;

pub use crate::resilience::BackendError;

/// The external query executor.
///
/// Takes query text plus variables and returns the result data. Any transport
/// satisfying this shape can sit behind the executor; queries are opaque here.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn execute(&self, query: &str, variables: &Value) -> Result<Value, BackendError>;
}

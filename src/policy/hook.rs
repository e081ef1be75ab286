//! Pluggable access hook, per spec.md §4.3 step 4 and §9's re-entrancy
//! note: implementers must not call back into the same `ProtectedFs`
//! instance from inside a hook.

use async_trait::async_trait;

use super::Operation;

#[derive(Debug, Clone)]
pub struct AccessContext {
    pub operation: Operation,
    pub path: String,
    pub workspace_id: Option<String>,
    pub workload_id: Option<String>,
    pub trust_class: Option<String>,
    pub data: Option<serde_json::Value>,
}

#[async_trait]
pub trait AccessHook: Send + Sync {
    async fn check(&self, ctx: &AccessContext) -> bool;
}

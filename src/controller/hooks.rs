//! `before:<identifier>` / `after:<identifier>` listeners, keyed by the exact action identifier.

use super::context::RequestContext;
use crate::error::{AppError, ConfigError};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookPhase {
    Before,
    After,
}

pub struct HookCall {
    pub ctx: Arc<RequestContext>,
    pub identifier: String,
    /// Positional handler arguments.
    pub args: Vec<Value>,
    /// Current result; None for before hooks.
    pub result: Option<Value>,
}

/// A listener. Returning `Some` from an after hook replaces the action result.
pub trait HookHandler: Send + Sync {
    fn call(&self, call: HookCall) -> BoxFuture<'static, Result<Option<Value>, AppError>>;
}

impl<F, Fut> HookHandler for F
where
    F: Fn(HookCall) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Value>, AppError>> + Send + 'static,
{
    fn call(&self, call: HookCall) -> BoxFuture<'static, Result<Option<Value>, AppError>> {
        Box::pin((self)(call))
    }
}

/// Box a closure as a hook listener.
pub fn hook<F, Fut>(f: F) -> Arc<dyn HookHandler>
where
    F: Fn(HookCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>, AppError>> + Send + 'static,
{
    Arc::new(f)
}

/// Split "before:collection:get" into the phase and the action identifier.
pub fn parse_event(event: &str) -> Result<(HookPhase, &str), ConfigError> {
    let (phase, identifier) = event
        .split_once(':')
        .ok_or_else(|| ConfigError::InvalidHookEvent(event.to_string()))?;
    let phase = match phase {
        "before" => HookPhase::Before,
        "after" => HookPhase::After,
        _ => return Err(ConfigError::InvalidHookEvent(event.to_string())),
    };
    match identifier.split_once(':') {
        Some((group, name)) if !group.is_empty() && !name.is_empty() => Ok((phase, identifier)),
        _ => Err(ConfigError::InvalidHookEvent(event.to_string())),
    }
}

#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<(HookPhase, String), Vec<Arc<dyn HookHandler>>>>,
}

impl HookRegistry {
    pub fn on(&self, event: &str, handler: Arc<dyn HookHandler>) -> Result<(), ConfigError> {
        let (phase, identifier) = parse_event(event)?;
        let mut hooks = self
            .hooks
            .write()
            .map_err(|_| ConfigError::Validation("hook registry lock poisoned".into()))?;
        hooks.entry((phase, identifier.to_string())).or_default().push(handler);
        Ok(())
    }

    /// Identifiers that have at least one listener.
    pub fn identifiers(&self) -> Vec<String> {
        self.hooks
            .read()
            .map(|h| h.keys().map(|(_, id)| id.clone()).collect())
            .unwrap_or_default()
    }

    fn listeners(&self, phase: HookPhase, identifier: &str) -> Vec<Arc<dyn HookHandler>> {
        self.hooks
            .read()
            .ok()
            .and_then(|h| h.get(&(phase, identifier.to_string())).cloned())
            .unwrap_or_default()
    }

    /// Run every before listener in order; the first error aborts the request.
    pub async fn run_before(&self, identifier: &str, ctx: &Arc<RequestContext>, args: &[Value]) -> Result<(), AppError> {
        for hook in self.listeners(HookPhase::Before, identifier) {
            hook.call(HookCall {
                ctx: ctx.clone(),
                identifier: identifier.to_string(),
                args: args.to_vec(),
                result: None,
            })
            .await?;
        }
        Ok(())
    }

    /// Run after listeners in registration order, each seeing the previous one's result.
    pub async fn run_after(
        &self,
        identifier: &str,
        ctx: &Arc<RequestContext>,
        args: &[Value],
        result: Value,
    ) -> Result<Value, AppError> {
        let mut result = result;
        for hook in self.listeners(HookPhase::After, identifier) {
            let replaced = hook
                .call(HookCall {
                    ctx: ctx.clone(),
                    identifier: identifier.to_string(),
                    args: args.to_vec(),
                    result: Some(result.clone()),
                })
                .await?;
            if let Some(next) = replaced {
                result = next;
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Verb;
    use serde_json::json;

    #[test]
    fn event_names() {
        assert_eq!(parse_event("before:collection:get").unwrap(), (HookPhase::Before, "collection:get"));
        assert_eq!(parse_event("after:member:patch").unwrap().0, HookPhase::After);
        assert!(parse_event("during:collection:get").is_err());
        assert!(parse_event("before:get").is_err());
    }

    #[tokio::test]
    async fn after_hooks_chain_replacements() {
        let hooks = HookRegistry::default();
        hooks
            .on(
                "after:collection:get",
                hook(|call| async move {
                    let n = call.result.and_then(|v| v.as_i64()).unwrap_or(0);
                    Ok(Some(json!(n + 1)))
                }),
            )
            .unwrap();
        hooks
            .on("after:collection:get", hook(|_call| async move { Ok(None) }))
            .unwrap();
        hooks
            .on(
                "after:collection:get",
                hook(|call| async move {
                    let n = call.result.and_then(|v| v.as_i64()).unwrap_or(0);
                    Ok(Some(json!(n * 10)))
                }),
            )
            .unwrap();
        let ctx = Arc::new(RequestContext::new(Verb::Get));
        let out = hooks.run_after("collection:get", &ctx, &[], json!(1)).await.unwrap();
        assert_eq!(out, json!(20));
    }

    #[tokio::test]
    async fn before_hook_errors_propagate() {
        let hooks = HookRegistry::default();
        hooks
            .on(
                "before:member:delete",
                hook(|_call| async move { Err(AppError::BadRequest("locked".into())) }),
            )
            .unwrap();
        let ctx = Arc::new(RequestContext::new(Verb::Delete));
        assert!(hooks.run_before("member:delete", &ctx, &[]).await.is_err());
        assert!(hooks.run_before("member:get", &ctx, &[]).await.is_ok());
    }
}

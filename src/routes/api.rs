//! Route dispatcher: one transaction per transacted action, the action lifecycle, then rendering.

use crate::controller::{CompiledAction, CurrentUser, RequestContext, Verb};
use crate::error::AppError;
use crate::extractors::AuthUser;
use crate::response::render;
use crate::validation::ValidationIssue;
use axum::{
    body::Bytes,
    extract::{Path, Query},
    response::{IntoResponse, Response},
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Raw request parts an action runs against.
#[derive(Debug, Default)]
pub struct ActionRequest {
    pub user: Option<CurrentUser>,
    pub path_params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Bytes,
}

/// Axum handler for one compiled action.
pub(crate) fn handler(
    action: Arc<CompiledAction>,
) -> impl FnOnce(AuthUser, Option<Path<HashMap<String, String>>>, Query<HashMap<String, String>>, Bytes) -> futures::future::BoxFuture<'static, Response>
       + Clone
       + Send
       + 'static {
    move |AuthUser(user): AuthUser,
          path: Option<Path<HashMap<String, String>>>,
          Query(query): Query<HashMap<String, String>>,
          body: Bytes| {
        let request = ActionRequest {
            user,
            path_params: path.map(|Path(p)| p).unwrap_or_default(),
            query,
            body,
        };
        Box::pin(dispatch(action, request))
    }
}

pub async fn dispatch(action: Arc<CompiledAction>, request: ActionRequest) -> Response {
    let started = Instant::now();
    let result = run(&action, request).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(response) => {
            tracing::debug!(action = %action.identifier, status = %response.status(), elapsed_ms, "handled");
            response
        }
        Err(e) => {
            tracing::debug!(action = %action.identifier, error = %e, elapsed_ms, "failed");
            e.into_response()
        }
    }
}

async fn run(action: &Arc<CompiledAction>, request: ActionRequest) -> Result<Response, AppError> {
    let body = parse_body(action.verb, &request.body)?;
    let transaction = if action.transacted {
        Some(action.controller().repository().begin().await?)
    } else {
        None
    };
    let ctx = Arc::new(
        RequestContext::new(action.verb)
            .with_path_params(request.path_params)
            .with_query(request.query)
            .with_body(body)
            .with_user(request.user)
            .with_transaction(transaction.clone()),
    );
    let result = action.run(ctx.clone()).await;
    match (result, transaction) {
        (Ok(value), Some(tx)) => {
            tx.commit().await?;
            Ok(render(&ctx, value))
        }
        (Ok(value), None) => Ok(render(&ctx, value)),
        (Err(e), Some(tx)) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(action = %action.identifier, error = %rollback, "rollback failed");
            }
            Err(e)
        }
        (Err(e), None) => Err(e),
    }
}

/// Empty bodies are `null`. Unparseable JSON only matters to verbs that read the body.
fn parse_body(verb: Verb, raw: &Bytes) -> Result<Value, AppError> {
    if raw.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Value::Null);
    }
    match serde_json::from_slice(raw) {
        Ok(value) => Ok(value),
        Err(_) if !verb.reads_body() => Ok(Value::Null),
        Err(e) => Err(AppError::parameters(
            json!({ "body": String::from_utf8_lossy(raw) }),
            vec![ValidationIssue::new("body", format!("is not valid JSON: {}", e))],
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_null() {
        assert_eq!(parse_body(Verb::Post, &Bytes::from_static(b"  \n")).unwrap(), Value::Null);
    }

    #[test]
    fn invalid_json_fails_only_for_body_verbs() {
        let raw = Bytes::from_static(b"{nope");
        assert!(matches!(
            parse_body(Verb::Patch, &raw),
            Err(AppError::ParameterValidation { .. })
        ));
        assert_eq!(parse_body(Verb::Get, &raw).unwrap(), Value::Null);
    }
}

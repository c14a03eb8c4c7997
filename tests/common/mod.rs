#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use dito_server::extractors::{header_auth, USER_ID_HEADER, USER_ROLES_HEADER};
use dito_server::{AppConfig, Application, ApplicationBuilder, MemoryRepository};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

pub fn config() -> AppConfig {
    serde_json::from_value(json!({
        "models": [
            {
                "name": "User",
                "table": "users",
                "properties": {
                    "id": { "type": "integer" },
                    "name": { "type": "string", "required": true }
                }
            },
            {
                "name": "Widget",
                "table": "widgets",
                "owner": "ownerId",
                "properties": {
                    "id": { "type": "integer" },
                    "name": { "type": "string", "required": true, "max_length": 20 },
                    "ownerId": { "type": "integer" },
                    "published": { "type": "boolean", "nullable": false, "default": false }
                },
                "relations": {
                    "parts": { "relation": "has_many", "model": "Part", "from": "id", "to": "widgetId" },
                    "owner": { "relation": "belongs_to", "model": "User", "from": "ownerId", "to": "id" }
                },
                "scopes": {
                    "published": { "where": { "published": true } }
                }
            },
            {
                "name": "Part",
                "table": "parts",
                "properties": {
                    "id": { "type": "integer" },
                    "label": { "type": "string", "required": true },
                    "widgetId": { "type": "integer" }
                }
            }
        ],
        "controllers": [
            {
                "name": "users",
                "model": "User",
                "collection": { "allow": ["*"], "authorize": "admin" },
                "member": { "allow": ["get", "patch"], "authorize": ["$self", "admin"] }
            },
            {
                "name": "widgets",
                "model": "Widget",
                "collection": {
                    "allow": ["*"],
                    "allow_scope": ["published"],
                    "allow_filter": ["name", "published"]
                },
                "member": {
                    "allow": ["*"],
                    "authorize": { "patch": ["$owner", "admin"], "delete": "admin" }
                },
                "relations": {
                    "parts": {
                        "collection": { "allow": ["*"] },
                        "member": { "allow": ["*"] }
                    }
                }
            }
        ]
    }))
    .expect("test config")
}

pub fn seeded() -> Arc<MemoryRepository> {
    let repo = Arc::new(MemoryRepository::new());
    repo.seed(
        "users",
        vec![json!({ "id": 5, "name": "ada" }), json!({ "id": 6, "name": "bob" })],
    );
    repo.seed(
        "widgets",
        vec![
            json!({ "id": 1, "name": "crank", "ownerId": 5, "published": true }),
            json!({ "id": 2, "name": "gear", "ownerId": 6, "published": false }),
            json!({ "id": 7, "name": "sprocket", "ownerId": 5, "published": true }),
        ],
    );
    repo.seed(
        "parts",
        vec![
            json!({ "id": 1, "label": "a", "widgetId": 1 }),
            json!({ "id": 2, "label": "b", "widgetId": 1 }),
            json!({ "id": 3, "label": "other", "widgetId": 2 }),
        ],
    );
    repo
}

pub fn builder(repo: &Arc<MemoryRepository>) -> ApplicationBuilder {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    ApplicationBuilder::from_config(&config(), repo.clone()).expect("builder")
}

pub fn router(app: &Application) -> Router {
    app.router().layer(axum::middleware::from_fn(header_auth))
}

/// `user` is `(id, comma separated roles)`.
pub async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    user: Option<(&str, &str)>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some((id, roles)) = user {
        req = req.header(USER_ID_HEADER, id).header(USER_ROLES_HEADER, roles);
    }
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let res = router.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

pub fn operations(repo: &MemoryRepository) -> Vec<String> {
    repo.statements()
        .into_iter()
        .map(|s| {
            if s.table.is_empty() {
                s.operation.to_string()
            } else {
                format!("{} {}", s.operation, s.table)
            }
        })
        .collect()
}

pub const ADMIN: Option<(&str, &str)> = Some(("1", "admin"));

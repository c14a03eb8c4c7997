//! Example consumer: a separate Rust project that uses dito-server as a dependency.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Without DATABASE_URL the in-memory repository is used.

use dito_server::controller::ActionResult;
use dito_server::{
    header_auth, load_from_path, ActionCall, ActionSpec, AppSettings, ApplicationBuilder, Authorize, ConfigLayer,
    HookCall, MemoryRepository, ParamSpec, ParamType, PgRepository, Repository,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Publish a widget the caller may edit; answers the refreshed row.
async fn publish(call: ActionCall) -> ActionResult {
    let widget = call.arg(0).cloned().unwrap_or(Value::Null);
    let Some(id) = widget.get("id").cloned() else {
        return Ok(Value::Null);
    };
    call.execute(move |query, ex| async move {
        let mut data = serde_json::Map::new();
        data.insert("published".into(), Value::Bool(true));
        let rows = ex.update(&query.find_by_id(&[id]), data).await?;
        Ok(rows.into_iter().next().unwrap_or(Value::Null))
    })
    .await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dito_server=info")),
        )
        .init();

    let settings = AppSettings::from_env()?;
    let mut config = load_from_path(&settings.config_path).await?;
    if let Some(normalize) = settings.normalize_db_names {
        config.normalize_db_names = normalize;
    }

    let repository: Arc<dyn Repository> = match &settings.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await?;
            Arc::new(PgRepository::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory repository");
            Arc::new(MemoryRepository::new())
        }
    };

    let app = ApplicationBuilder::from_config(&config, repository)?
        .api_prefix(&settings.api_prefix)
        .body_limit(settings.body_limit)
        .configure("widgets", |widgets| {
            widgets
                .member(
                    ConfigLayer::new().action(
                        ActionSpec::new("publish", publish)
                            .verb(dito_server::Verb::Post)
                            .param(ParamSpec::member())
                            .authorize(Authorize::roles(["$owner", "editor"]))
                            .transacted(true),
                    ),
                )
                .collection(
                    ConfigLayer::new().action(
                        ActionSpec::new("search", |call: ActionCall| async move {
                            let term = call.param("q").and_then(Value::as_str).unwrap_or_default().to_string();
                            let rows = call
                                .execute(move |query, ex| async move {
                                    let query = query.where_op(
                                        "name",
                                        dito_server::query::FilterOp::Like,
                                        json!(format!("%{}%", term)),
                                    );
                                    ex.select(&query).await
                                })
                                .await?;
                            Ok(Value::Array(rows))
                        })
                        .param(ParamSpec::new("q", ParamType::String).required()),
                    ),
                )
                .on("after:member:publish", |call: HookCall| async move {
                    tracing::info!(widget = ?call.result.as_ref().and_then(|w| w.get("id")), "widget published");
                    Ok(None)
                })
        })
        .build()?;

    for route in app.routes() {
        tracing::debug!(identifier = %route.identifier, verb = %route.verb, path = %route.path, "route");
    }

    let router = app.router().layer(axum::middleware::from_fn(header_auth));
    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("Example consumer listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}

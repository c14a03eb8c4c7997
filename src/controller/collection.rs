//! Default actions of model and relation controllers. They are core actions: a group only
//! exposes the ones its allow list names.

use super::action::ActionCall;
use super::action_spec::{ActionResult, ActionSpec, ParamSpec};
use super::layers::ConfigLayer;
use super::relation;
use crate::config::ModelDef;
use crate::error::AppError;
use crate::query::{Executor, Query};
use crate::validation::{ParamType, ValidationIssue};
use axum::http::StatusCode;
use serde_json::{json, Map, Value};

/// Inserts are checked against the full model schema, except where rows may be referenced
/// by id alone.
fn write_type(model: &ModelDef, relate: bool) -> ParamType {
    if relate {
        ParamType::model_partial(&model.name)
    } else {
        ParamType::model(&model.name)
    }
}

pub(crate) fn collection_layer(model: &ModelDef, relate: bool) -> ConfigLayer {
    ConfigLayer::new()
        .action(ActionSpec::new("get", collection_get).core())
        .action(
            ActionSpec::new("post", collection_post)
                .param(ParamSpec::root(write_type(model, relate)).required())
                .core(),
        )
        .action(
            ActionSpec::new("put", collection_put)
                .param(ParamSpec::root(write_type(model, relate)).required())
                .core(),
        )
        .action(
            ActionSpec::new("patch", collection_patch)
                .param(ParamSpec::root(ParamType::model_partial(&model.name)).required())
                .core(),
        )
        .action(ActionSpec::new("delete", collection_delete).core())
}

pub(crate) fn member_layer(model: &ModelDef) -> ConfigLayer {
    ConfigLayer::new()
        .action(ActionSpec::new("get", member_get).param(ParamSpec::member()).core())
        .action(
            ActionSpec::new("put", member_put)
                .param(ParamSpec::member())
                .param(ParamSpec::root(ParamType::model(&model.name)).required())
                .core(),
        )
        .action(
            ActionSpec::new("patch", member_patch)
                .param(ParamSpec::member())
                .param(ParamSpec::root(ParamType::model_partial(&model.name)).required())
                .core(),
        )
        .action(ActionSpec::new("delete", member_delete).param(ParamSpec::member()).core())
}

/// Rows of an object or array payload, and whether it was an array.
fn payload_rows(payload: Option<&Value>) -> Result<(Vec<Map<String, Value>>, bool), AppError> {
    match payload {
        Some(Value::Object(row)) => Ok((vec![row.clone()], false)),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_object()
                    .cloned()
                    .ok_or_else(|| AppError::BadRequest("expected an array of objects".into()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|rows| (rows, true)),
        _ => Err(AppError::BadRequest("expected an object or an array of objects".into())),
    }
}

fn shape(rows: Vec<Value>, many: bool) -> Value {
    if many {
        Value::Array(rows)
    } else {
        rows.into_iter().next().unwrap_or(Value::Null)
    }
}

async fn collection_get(call: ActionCall) -> ActionResult {
    let request = call.request_query()?;
    let one = call.controller().is_one_to_one();
    call.execute(move |query, ex| async move {
        let query = request.apply(query);
        if one {
            return Ok(ex.first(&query).await?.unwrap_or(Value::Null));
        }
        let rows = ex.select(&query).await?;
        match request.range {
            Some(_) => {
                let total = ex.count(&query).await?;
                Ok(json!({ "results": rows, "total": total }))
            }
            None => Ok(Value::Array(rows)),
        }
    })
    .await
}

async fn collection_post(call: ActionCall) -> ActionResult {
    let (rows, many) = payload_rows(call.arg(0))?;
    let controller = call.controller().clone();
    let written = call
        .execute(move |query, ex| async move {
            let mut written = Vec::with_capacity(rows.len());
            for row in rows {
                let inserted = if controller.is_relation() {
                    relation::insert_related(&ex, &query, row, controller.relate).await?
                } else {
                    ex.insert_graph(query.model.clone(), row, controller.relate).await?
                };
                written.push(inserted);
            }
            Ok(written)
        })
        .await?;
    call.ctx.set_status(StatusCode::CREATED);
    Ok(shape(written, many))
}

async fn collection_put(call: ActionCall) -> ActionResult {
    update_collection(call, true).await
}

async fn collection_patch(call: ActionCall) -> ActionResult {
    update_collection(call, false).await
}

async fn update_collection(call: ActionCall, replace: bool) -> ActionResult {
    let (rows, many) = payload_rows(call.arg(0))?;
    let controller = call.controller().clone();
    let one = controller.is_one_to_one();
    let written = call
        .execute(move |query, ex| async move {
            if replace && controller.is_relation() {
                relation::replace_related(&ex, &query, rows, controller.relate).await
            } else {
                update_each(&ex, &query, rows).await
            }
        })
        .await?;
    Ok(shape(written, many && !one))
}

/// Update every row by the id it carries; rows outside `query` are not found.
pub(crate) async fn update_each(ex: &Executor, query: &Query, rows: Vec<Map<String, Value>>) -> Result<Vec<Value>, AppError> {
    let model = query.model.clone();
    let mut written = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        let Some(id) = model.id_of(&Value::Object(row.clone())) else {
            return Err(AppError::parameters(
                Value::Object(row),
                vec![ValidationIssue::new(i.to_string(), "id is required for updates")],
            ));
        };
        let updated = ex
            .update(&query.clone().find_by_id(&id), row)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("{} {}", model.name, ModelDef::id_key(&id))))?;
        written.push(updated);
    }
    Ok(written)
}

async fn collection_delete(call: ActionCall) -> ActionResult {
    let request = call.request_query()?;
    let controller = call.controller().clone();
    let count = call
        .execute(move |query, ex| async move {
            let query = request.apply_filters(query);
            if controller.is_relation() && controller.relate {
                ex.unrelate(&query).await
            } else {
                ex.delete(&query).await
            }
        })
        .await?;
    Ok(json!({ "count": count }))
}

async fn member_get(call: ActionCall) -> ActionResult {
    Ok(call.arg(0).cloned().unwrap_or(Value::Null))
}

async fn member_put(call: ActionCall) -> ActionResult {
    update_member(call).await
}

async fn member_patch(call: ActionCall) -> ActionResult {
    update_member(call).await
}

async fn update_member(call: ActionCall) -> ActionResult {
    let model = call
        .controller()
        .model()
        .cloned()
        .ok_or_else(|| AppError::Internal("member action without a model".into()))?;
    let member = call.arg(0).cloned().unwrap_or(Value::Null);
    let id = model
        .id_of(&member)
        .ok_or_else(|| AppError::Internal(format!("{} member has no id", model.name)))?;
    let Some(Value::Object(data)) = call.arg(1).cloned() else {
        return Err(AppError::BadRequest("expected an object".into()));
    };
    let by_id = Query::new(model.clone()).find_by_id(&id).ignore_scopes();
    call.executor()
        .update(&by_id, data)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(format!("{} {}", model.name, ModelDef::id_key(&id))))
}

async fn member_delete(call: ActionCall) -> ActionResult {
    let controller = call.controller().clone();
    let model = controller
        .model()
        .cloned()
        .ok_or_else(|| AppError::Internal("member action without a model".into()))?;
    let member = call.arg(0).cloned().unwrap_or(Value::Null);
    let id = model
        .id_of(&member)
        .ok_or_else(|| AppError::Internal(format!("{} member has no id", model.name)))?;
    let count = call
        .execute(move |query, ex| async move {
            let query = query.find_by_id(&id);
            if controller.is_relation() && controller.relate {
                ex.unrelate(&query).await
            } else {
                ex.delete(&query).await
            }
        })
        .await?;
    Ok(json!({ "count": count }))
}

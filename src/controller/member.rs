//! Member resolution: the id from the route path and the single row it addresses.

use super::action::{request_input, CompiledAction};
use super::action_spec::ParamSpec;
use super::base::Controller;
use super::context::RequestContext;
use crate::config::ModelDef;
use crate::error::AppError;
use crate::validation::ValidationIssue;
use serde_json::Value;

/// Path parameter carrying the owner id on relation routes and the member id elsewhere.
pub const ID_PARAM: &str = "id";
/// Path parameter carrying the related row's id on relation member routes.
pub const RELATED_ID_PARAM: &str = "related_id";

pub(crate) fn id_param(controller: &Controller) -> &'static str {
    if controller.is_relation() {
        RELATED_ID_PARAM
    } else {
        ID_PARAM
    }
}

/// Parse the member id from the path and record it on the context.
pub(crate) fn parse_member_id(action: &CompiledAction, ctx: &RequestContext) -> Result<Vec<Value>, AppError> {
    if let Some(id) = ctx.member_id() {
        return Ok(id.to_vec());
    }
    let model = action
        .controller
        .model()
        .ok_or_else(|| AppError::Internal(format!("{}: member action without a model", action.identifier)))?;
    let key = id_param(&action.controller);
    let Some(raw) = ctx.path_params.get(key) else {
        return Err(AppError::parameters(
            request_input(ctx),
            vec![ValidationIssue::new(key, "is required")],
        ));
    };
    let id = model
        .parse_id(raw)
        .map_err(|issue| AppError::parameters(request_input(ctx), vec![issue]))?;
    ctx.set_member_id(id.clone());
    Ok(id)
}

/// Fetch the addressed row. `param` may narrow the query (`modify`) or lock the row
/// (`for_update`, which needs the request's transaction).
pub async fn get_member(
    action: &CompiledAction,
    ctx: &RequestContext,
    param: Option<&ParamSpec>,
) -> Result<Value, AppError> {
    let for_update = param.map(|p| p.for_update).unwrap_or(false);
    if for_update && ctx.transaction.is_none() {
        return Err(AppError::Internal(format!(
            "{}: for_update requires a transacted action",
            action.identifier
        )));
    }
    let modify = param.and_then(|p| p.modify.clone());
    if !for_update && modify.is_none() {
        if let Some(member) = ctx.member() {
            return Ok(member);
        }
    }

    let id = parse_member_id(action, ctx)?;
    let controller = &action.controller;
    let model = controller
        .model()
        .ok_or_else(|| AppError::Internal(format!("{}: member action without a model", action.identifier)))?;
    let request = action.request_query(ctx)?;
    let mut query = request.apply_filters(controller.base_query(ctx, &action.options).await?.find_by_id(&id));
    if let Some(modify) = modify {
        query = modify(query);
    }
    if for_update {
        query = query.for_update();
    }
    let member = controller
        .executor(ctx.transaction.clone())
        .first(&query)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} {}", model.name, ModelDef::id_key(&id))))?;
    tracing::debug!(action = %action.identifier, id = %ModelDef::id_key(&id), "member resolved");
    ctx.set_member(member.clone());
    Ok(member)
}

//! A compiled action: one spec bound to its controller, route and authorization rule, created
//! once at setup and shared by every request to that route.
//!
//! Lifecycle per request: validate parameters, collect arguments (resolving the member for
//! member actions), authorize, run before hooks, call the handler, run after hooks, validate
//! the result. The first failing step ends the request.

use super::action_spec::{ActionResult, ActionSpec, ParamSource, ParamSpec, Verb};
use super::authorize::{self, Authorize, MemberLookup};
use super::base::Controller;
use super::context::RequestContext;
use super::layers::GroupOptions;
use super::member;
use crate::config::ModelDef;
use crate::error::{AppError, ConfigError};
use crate::query::{Executor, Query, RequestQuery};
use crate::validation::{coerce, compile, join_path, CompiledSchema, ModelMode, ParamType, ValidationIssue};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;

/// Action group; part of every action identifier (`collection:get`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Group {
    Actions,
    Collection,
    Member,
}

impl Group {
    pub fn as_str(&self) -> &'static str {
        match self {
            Group::Actions => "actions",
            Group::Collection => "collection",
            Group::Member => "member",
        }
    }
}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape check for a declared parameter or return value.
struct ValueCheck {
    schema: CompiledSchema,
    model: Option<(Arc<ModelDef>, ModelMode)>,
}

impl ValueCheck {
    fn new(label: &str, ty: &ParamType, controller: &Controller) -> Result<Self, ConfigError> {
        let model = match ty {
            ParamType::Model { name, mode } => {
                let model = controller
                    .models()
                    .model(name)
                    .cloned()
                    .ok_or_else(|| ConfigError::MissingReference {
                        kind: "model",
                        id: name.clone(),
                    })?;
                Some((model, *mode))
            }
            _ => None,
        };
        Ok(ValueCheck {
            schema: compile(label, ty.schema())?,
            model,
        })
    }

    fn validate(&self, value: &Value, prefix: &str) -> Result<(), Vec<ValidationIssue>> {
        self.schema.validate_at(value, prefix)?;
        let Some((model, mode)) = &self.model else { return Ok(()) };
        let schema = model.schema_for(*mode);
        match value {
            Value::Array(items) => {
                let mut issues = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    if let Err(e) = schema.validate_at(item, &join_path(prefix, &i.to_string())) {
                        issues.extend(e);
                    }
                }
                if issues.is_empty() {
                    Ok(())
                } else {
                    Err(issues)
                }
            }
            other => schema.validate_at(other, prefix),
        }
    }
}

struct CompiledParam {
    spec: ParamSpec,
    source: ParamSource,
    check: Option<ValueCheck>,
}

pub struct CompiledAction {
    /// `<group>:<name>`, the key for hooks and log output.
    pub identifier: String,
    pub group: Group,
    pub name: String,
    pub verb: Verb,
    pub path: String,
    pub transacted: bool,
    pub authorization: Authorize,
    pub options: GroupOptions,
    pub(crate) spec: Arc<ActionSpec>,
    pub(crate) controller: Arc<Controller>,
    params: Vec<CompiledParam>,
    returns: Option<ValueCheck>,
}

impl std::fmt::Debug for CompiledAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledAction")
            .field("identifier", &self.identifier)
            .field("verb", &self.verb)
            .field("path", &self.path)
            .field("transacted", &self.transacted)
            .field("authorization", &self.authorization)
            .finish()
    }
}

/// Raw request input attached to parameter errors.
pub(crate) fn request_input(ctx: &RequestContext) -> Value {
    json!({
        "query": ctx.query,
        "body": ctx.body,
        "params": ctx.path_params,
    })
}

fn string_map(map: &std::collections::HashMap<String, String>) -> Value {
    Value::Object(map.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect())
}

impl CompiledAction {
    pub(crate) fn compile(
        controller: &Arc<Controller>,
        group: Group,
        spec: ActionSpec,
        authorization: Authorize,
        mut options: GroupOptions,
        path: String,
        transacted: bool,
    ) -> Result<Self, ConfigError> {
        let identifier = format!("{}:{}", group, spec.name);
        if let Some(scope) = &spec.scope {
            options.scope = scope.clone();
        }
        let mut params = Vec::with_capacity(spec.parameters.len());
        for p in &spec.parameters {
            if p.is_member && group != Group::Member {
                return Err(ConfigError::Validation(format!(
                    "{}: member parameters are only available to member actions",
                    identifier
                )));
            }
            let source = p
                .from
                .unwrap_or(if spec.verb.reads_body() { ParamSource::Body } else { ParamSource::Query });
            let check = if p.is_member {
                None
            } else {
                Some(ValueCheck::new(&format!("{} {}", identifier, p.label()), &p.param_type, controller)?)
            };
            params.push(CompiledParam {
                spec: p.clone(),
                source,
                check,
            });
        }
        let returns = match &spec.returns {
            Some(r) => Some(ValueCheck::new(&format!("{} result", identifier), &r.param_type, controller)?),
            None => None,
        };
        Ok(CompiledAction {
            identifier,
            group,
            name: spec.name.clone(),
            verb: spec.verb,
            path,
            transacted,
            authorization,
            options,
            spec: Arc::new(spec),
            controller: controller.clone(),
            params,
            returns,
        })
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    /// Names of declared query parameters; the default actions leave these keys alone.
    pub fn query_param_names(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter(|p| p.source == ParamSource::Query)
            .filter_map(|p| p.spec.name.as_deref())
            .collect()
    }

    /// Parse `scope`, `filter`, `order`, `range`, `limit` and `offset` from the query string.
    pub fn request_query(&self, ctx: &RequestContext) -> Result<RequestQuery, AppError> {
        let model = self
            .controller
            .model()
            .ok_or_else(|| AppError::Internal(format!("{}: controller has no model", self.identifier)))?;
        RequestQuery::parse(
            model,
            &ctx.query,
            &self.query_param_names(),
            self.options.allow_scope.as_deref(),
            self.options.allow_filter.as_deref(),
        )
        .map_err(|errors| AppError::parameters(request_input(ctx), errors))
    }

    pub async fn run(self: &Arc<Self>, ctx: Arc<RequestContext>) -> ActionResult {
        tracing::debug!(action = %self.identifier, "received");
        let (values, params) = self.validate_parameters(&ctx)?;
        let args = self.collect_arguments(&ctx, values).await?;
        self.authorize(&ctx).await?;
        tracing::debug!(action = %self.identifier, "authorized");

        let hooks = self.controller.hooks();
        hooks.run_before(&self.identifier, &ctx, &args).await?;
        let call = ActionCall {
            action: self.clone(),
            ctx: ctx.clone(),
            args: args.clone(),
            params,
            spec: self.spec.clone(),
        };
        let result = self.spec.handler.call(call).await?;
        let result = hooks.run_after(&self.identifier, &ctx, &args, result).await?;
        self.validate_result(result)
    }

    fn raw_value(&self, ctx: &RequestContext, param: &CompiledParam) -> (Option<Value>, bool) {
        let value = match (&param.spec.name, param.source) {
            (Some(name), ParamSource::Query) => return (ctx.query.get(name).map(|v| Value::String(v.clone())), true),
            (Some(name), ParamSource::Path) => {
                return (ctx.path_params.get(name).map(|v| Value::String(v.clone())), true)
            }
            (Some(name), ParamSource::Body) => ctx.body.get(name).cloned(),
            (None, ParamSource::Query) => Some(string_map(&ctx.query)),
            (None, ParamSource::Path) => Some(string_map(&ctx.path_params)),
            (None, ParamSource::Body) => Some(ctx.body.clone()),
        };
        (value, false)
    }

    /// Coerce and check every non-member parameter. Issues are collected across parameters;
    /// nothing reaches the handler unless all of them pass.
    fn validate_parameters(&self, ctx: &RequestContext) -> Result<(Vec<Value>, Map<String, Value>), AppError> {
        let mut issues = Vec::new();
        let mut values = Vec::with_capacity(self.params.len());
        let mut params = Map::new();
        for param in &self.params {
            let Some(check) = &param.check else {
                values.push(Value::Null);
                continue;
            };
            let label = param.spec.label();
            let (raw, from_strings) = self.raw_value(ctx, param);
            let value = match raw.filter(|v| !v.is_null()) {
                None => {
                    if param.spec.required {
                        issues.push(ValidationIssue::new(label, "is required"));
                    }
                    Value::Null
                }
                Some(raw) => match coerce(raw, &param.spec.param_type, from_strings) {
                    Ok(v) => {
                        if let Err(e) = check.validate(&v, label) {
                            issues.extend(e);
                        }
                        v
                    }
                    Err(message) => {
                        issues.push(ValidationIssue::new(label, message));
                        Value::Null
                    }
                },
            };
            if let Some(name) = &param.spec.name {
                params.insert(name.clone(), value.clone());
            }
            values.push(value);
        }
        if !issues.is_empty() {
            tracing::debug!(action = %self.identifier, issues = issues.len(), "parameter validation failed");
            return Err(AppError::parameters(request_input(ctx), issues));
        }
        Ok((values, params))
    }

    async fn collect_arguments(&self, ctx: &Arc<RequestContext>, values: Vec<Value>) -> Result<Vec<Value>, AppError> {
        if self.group == Group::Member {
            member::parse_member_id(self, ctx)?;
        }
        let mut args = Vec::with_capacity(values.len());
        for (param, value) in self.params.iter().zip(values) {
            if param.spec.is_member {
                args.push(member::get_member(self, ctx, Some(&param.spec)).await?);
            } else {
                args.push(value);
            }
        }
        Ok(args)
    }

    async fn authorize(self: &Arc<Self>, ctx: &Arc<RequestContext>) -> Result<(), AppError> {
        let lookup = LazyMember {
            action: self.clone(),
            ctx: ctx.clone(),
        };
        let model = self.controller.model().map(Arc::as_ref);
        if authorize::check(&self.authorization, ctx, ctx.member(), model, &lookup).await? {
            return Ok(());
        }
        tracing::debug!(action = %self.identifier, anonymous = ctx.user.is_none(), "authorization denied");
        match ctx.user {
            None => Err(AppError::Unauthorized),
            Some(_) => Err(AppError::Forbidden),
        }
    }

    fn validate_result(&self, result: Value) -> ActionResult {
        let Some(returns) = &self.spec.returns else { return Ok(result) };
        if let Some(check) = &self.returns {
            if !result.is_null() {
                check
                    .validate(&result, "")
                    .map_err(|errors| AppError::ResultValidation { errors })?;
            }
        }
        Ok(match &returns.name {
            Some(name) => {
                let mut wrapped = Map::new();
                wrapped.insert(name.clone(), result);
                Value::Object(wrapped)
            }
            None => result,
        })
    }
}

/// Resolves the member only when an authorization token asks for it.
struct LazyMember {
    action: Arc<CompiledAction>,
    ctx: Arc<RequestContext>,
}

#[async_trait]
impl MemberLookup for LazyMember {
    async fn member(&self) -> Result<Option<Value>, AppError> {
        if self.action.group != Group::Member {
            return Ok(None);
        }
        member::get_member(&self.action, &self.ctx, None).await.map(Some)
    }
}

/// What a handler receives: the action, the request, positional arguments and the coerced
/// named parameters.
#[derive(Clone)]
pub struct ActionCall {
    pub action: Arc<CompiledAction>,
    pub ctx: Arc<RequestContext>,
    pub args: Vec<Value>,
    pub params: Map<String, Value>,
    spec: Arc<ActionSpec>,
}

impl ActionCall {
    pub fn controller(&self) -> &Arc<Controller> {
        &self.action.controller
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn options(&self) -> &GroupOptions {
        &self.action.options
    }

    pub fn executor(&self) -> Executor {
        self.controller().executor(self.ctx.transaction.clone())
    }

    /// Base query of the controller with the group's scopes applied.
    pub async fn query(&self) -> Result<Query, AppError> {
        self.controller().base_query(&self.ctx, &self.action.options).await
    }

    /// Run `f` with the base query and an executor bound to the request's transaction.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(Query, Executor) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.controller().execute(&self.ctx, &self.action.options, f).await
    }

    /// The addressed row of a member action.
    pub async fn member(&self) -> Result<Value, AppError> {
        member::get_member(&self.action, &self.ctx, None).await
    }

    pub fn request_query(&self) -> Result<RequestQuery, AppError> {
        self.action.request_query(&self.ctx)
    }

    /// Invoke the implementation this action overrides.
    pub async fn call_inherited(&self) -> ActionResult {
        let inherited = self.spec.inherited.clone().ok_or_else(|| {
            AppError::Internal(format!("{} has no inherited implementation", self.action.identifier))
        })?;
        let mut call = self.clone();
        call.spec = inherited.clone();
        inherited.handler.call(call).await
    }
}

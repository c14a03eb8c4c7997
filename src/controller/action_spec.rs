//! Declarative description of one endpoint. Nothing here runs by itself; [`super::CompiledAction`]
//! turns a spec plus its resolved authorization into a routable unit.

use super::action::ActionCall;
use super::authorize::Authorize;
use crate::error::AppError;
use crate::query::Query;
use crate::validation::ParamType;
use axum::routing::MethodFilter;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Verb {
    pub const ALL: [Verb; 5] = [Verb::Get, Verb::Post, Verb::Put, Verb::Patch, Verb::Delete];

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_lowercase().as_str() {
            "get" => Verb::Get,
            "post" => Verb::Post,
            "put" => Verb::Put,
            "patch" => Verb::Patch,
            "delete" => Verb::Delete,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::Post => "post",
            Verb::Put => "put",
            Verb::Patch => "patch",
            Verb::Delete => "delete",
        }
    }

    /// Verbs whose parameters come from the body unless declared otherwise.
    pub fn reads_body(&self) -> bool {
        matches!(self, Verb::Post | Verb::Put | Verb::Patch)
    }

    pub fn method_filter(&self) -> MethodFilter {
        match self {
            Verb::Get => MethodFilter::GET,
            Verb::Post => MethodFilter::POST,
            Verb::Put => MethodFilter::PUT,
            Verb::Patch => MethodFilter::PATCH,
            Verb::Delete => MethodFilter::DELETE,
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type ActionResult = Result<Value, AppError>;

/// Action implementation. Any `Fn(ActionCall) -> impl Future<Output = ActionResult>` qualifies.
pub trait ActionHandler: Send + Sync {
    fn call(&self, call: ActionCall) -> BoxFuture<'static, ActionResult>;
}

impl<F, Fut> ActionHandler for F
where
    F: Fn(ActionCall) -> Fut + Send + Sync,
    Fut: Future<Output = ActionResult> + Send + 'static,
{
    fn call(&self, call: ActionCall) -> BoxFuture<'static, ActionResult> {
        Box::pin((self)(call))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamSource {
    Query,
    Body,
    Path,
}

pub type QueryModifier = Arc<dyn Fn(Query) -> Query + Send + Sync>;

#[derive(Clone)]
pub struct ParamSpec {
    /// None binds the whole payload (body, query map or path map).
    pub name: Option<String>,
    pub param_type: ParamType,
    pub from: Option<ParamSource>,
    /// Resolved through the member lookup instead of the request data.
    pub is_member: bool,
    pub required: bool,
    pub modify: Option<QueryModifier>,
    pub for_update: bool,
}

impl std::fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamSpec")
            .field("name", &self.name)
            .field("param_type", &self.param_type)
            .field("from", &self.from)
            .field("is_member", &self.is_member)
            .field("required", &self.required)
            .field("for_update", &self.for_update)
            .finish()
    }
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        ParamSpec {
            name: Some(name.into()),
            param_type,
            from: None,
            is_member: false,
            required: false,
            modify: None,
            for_update: false,
        }
    }

    pub fn root(param_type: ParamType) -> Self {
        ParamSpec {
            name: None,
            ..ParamSpec::new("", param_type)
        }
    }

    /// The addressed row of a member action.
    pub fn member() -> Self {
        ParamSpec {
            name: None,
            is_member: true,
            ..ParamSpec::new("", ParamType::Object)
        }
    }

    pub fn from(mut self, source: ParamSource) -> Self {
        self.from = Some(source);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn modify(mut self, f: impl Fn(Query) -> Query + Send + Sync + 'static) -> Self {
        self.modify = Some(Arc::new(f));
        self
    }

    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }

    /// Label used in validation issues.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// Declared return value. A named return wraps the result as `{ name: result }`.
#[derive(Clone, Debug)]
pub struct ReturnSpec {
    pub name: Option<String>,
    pub param_type: ParamType,
}

impl ReturnSpec {
    pub fn new(param_type: ParamType) -> Self {
        ReturnSpec { name: None, param_type }
    }

    pub fn named(name: impl Into<String>, param_type: ParamType) -> Self {
        ReturnSpec {
            name: Some(name.into()),
            param_type,
        }
    }
}

#[derive(Clone)]
pub struct ActionSpec {
    pub name: String,
    pub verb: Verb,
    /// Path below the group root; None derives it from the name.
    pub path: Option<String>,
    pub handler: Arc<dyn ActionHandler>,
    pub authorize: Option<Authorize>,
    pub transacted: Option<bool>,
    pub scope: Option<Vec<String>>,
    pub parameters: Vec<ParamSpec>,
    pub returns: Option<ReturnSpec>,
    /// Contributed by the framework's default handlers.
    pub is_core: bool,
    /// Spec this one overrides in an earlier configuration layer.
    pub inherited: Option<Arc<ActionSpec>>,
}

impl std::fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSpec")
            .field("name", &self.name)
            .field("verb", &self.verb)
            .field("path", &self.path)
            .field("transacted", &self.transacted)
            .field("parameters", &self.parameters)
            .field("returns", &self.returns)
            .field("is_core", &self.is_core)
            .field("inherited", &self.inherited.is_some())
            .finish()
    }
}

impl ActionSpec {
    /// Verb defaults to the name when it is one (`get`, `post`, ...), else `get`.
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ActionCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        let name = name.into();
        ActionSpec {
            verb: Verb::from_name(&name).unwrap_or(Verb::Get),
            name,
            path: None,
            handler: Arc::new(handler),
            authorize: None,
            transacted: None,
            scope: None,
            parameters: Vec::new(),
            returns: None,
            is_core: false,
            inherited: None,
        }
    }

    pub fn verb(mut self, verb: Verb) -> Self {
        self.verb = verb;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn authorize(mut self, rule: Authorize) -> Self {
        self.authorize = Some(rule);
        self
    }

    pub fn transacted(mut self, transacted: bool) -> Self {
        self.transacted = Some(transacted);
        self
    }

    pub fn scope(mut self, scopes: Vec<String>) -> Self {
        self.scope = Some(scopes);
        self
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn returns(mut self, returns: ReturnSpec) -> Self {
        self.returns = Some(returns);
        self
    }

    pub(crate) fn core(mut self) -> Self {
        self.is_core = true;
        self
    }

    /// Route segment below the group root; empty for verb-named actions.
    pub fn route_segment(&self) -> String {
        match &self.path {
            Some(p) => p.trim_matches('/').to_string(),
            None if Verb::from_name(&self.name).is_some() => String::new(),
            None => to_kebab_case(&self.name),
        }
    }
}

/// "recentWidgets" -> "recent-widgets"
pub fn to_kebab_case(name: &str) -> String {
    crate::case::to_snake_case(name).replace('_', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_call: ActionCall) -> ActionResult {
        Ok(Value::Null)
    }

    #[test]
    fn verbs_and_segments_derive_from_names() {
        let get = ActionSpec::new("get", noop);
        assert_eq!(get.verb, Verb::Get);
        assert_eq!(get.route_segment(), "");
        let post = ActionSpec::new("post", noop);
        assert_eq!(post.verb, Verb::Post);
        let custom = ActionSpec::new("recentWidgets", noop);
        assert_eq!(custom.verb, Verb::Get);
        assert_eq!(custom.route_segment(), "recent-widgets");
        let explicit = ActionSpec::new("publish", noop).verb(Verb::Post).path("/do-publish/");
        assert_eq!(explicit.route_segment(), "do-publish");
    }

    #[test]
    fn member_param_is_flagged() {
        let p = ParamSpec::member();
        assert!(p.is_member);
        assert!(p.name.is_none());
        assert_eq!(ParamSpec::new("q", ParamType::String).required().label(), "q");
    }
}

//! Authorization rules and their resolution into a yes/no decision per request.
//!
//! A rule is a constant, a role name, a list of role names and special tokens, or an async
//! function that returns another rule. `$self` matches the addressed member's id against the
//! user's id; `$owner` asks the model's owner property. Lists pass when any entry passes.

use super::context::RequestContext;
use crate::config::{scalar_key, ModelDef};
use crate::error::{AppError, ConfigError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

pub const SELF_TOKEN: &str = "$self";
pub const OWNER_TOKEN: &str = "$owner";

/// Arguments handed to a custom authorization function.
#[derive(Clone)]
pub struct AuthorizeCall {
    pub ctx: Arc<RequestContext>,
    /// The member, when the action already resolved it.
    pub member: Option<Value>,
}

pub type AuthorizeFn = Arc<dyn Fn(AuthorizeCall) -> BoxFuture<'static, Result<Authorize, AppError>> + Send + Sync>;

#[derive(Clone)]
pub enum Authorize {
    Allow(bool),
    Role(String),
    Any(Vec<String>),
    Custom(AuthorizeFn),
}

impl std::fmt::Debug for Authorize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Authorize::Allow(b) => write!(f, "Allow({})", b),
            Authorize::Role(r) => write!(f, "Role({:?})", r),
            Authorize::Any(rs) => write!(f, "Any({:?})", rs),
            Authorize::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl PartialEq for Authorize {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Authorize::Allow(a), Authorize::Allow(b)) => a == b,
            (Authorize::Role(a), Authorize::Role(b)) => a == b,
            (Authorize::Any(a), Authorize::Any(b)) => a == b,
            (Authorize::Custom(a), Authorize::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Authorize {
    fn from(b: bool) -> Self {
        Authorize::Allow(b)
    }
}

impl From<&str> for Authorize {
    fn from(role: &str) -> Self {
        Authorize::Role(role.to_string())
    }
}

impl Authorize {
    pub fn roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Authorize::Any(roles.into_iter().map(Into::into).collect())
    }

    pub fn custom<F, Fut>(f: F) -> Self
    where
        F: Fn(AuthorizeCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Authorize, AppError>> + Send + 'static,
    {
        Authorize::Custom(Arc::new(move |call| f(call).boxed()))
    }

    /// Parse a bare rule from JSON: `true`, `"role"` or `["role", "$self"]`.
    pub fn from_json(value: &Value) -> Result<Self, ConfigError> {
        match value {
            Value::Bool(b) => Ok(Authorize::Allow(*b)),
            Value::String(s) => Ok(Authorize::Role(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| ConfigError::Validation(format!("authorize entries must be strings, got {}", v)))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Authorize::Any),
            other => Err(ConfigError::Validation(format!("invalid authorize rule: {}", other))),
        }
    }

    fn candidates(&self) -> Option<Vec<&str>> {
        match self {
            Authorize::Role(r) => Some(vec![r.as_str()]),
            Authorize::Any(rs) => Some(rs.iter().map(String::as_str).collect()),
            _ => None,
        }
    }
}

/// Lazily resolves the addressed member for `$self` / `$owner` checks.
#[async_trait]
pub trait MemberLookup: Send + Sync {
    async fn member(&self) -> Result<Option<Value>, AppError>;
}

/// For actions that never address a member.
pub struct NoMember;

#[async_trait]
impl MemberLookup for NoMember {
    async fn member(&self) -> Result<Option<Value>, AppError> {
        Ok(None)
    }
}

/// Resolve `rule` for the request. Anonymous requests fail every role check without erroring.
pub fn check<'a>(
    rule: &'a Authorize,
    ctx: &'a Arc<RequestContext>,
    member: Option<Value>,
    model: Option<&'a ModelDef>,
    lookup: &'a dyn MemberLookup,
) -> BoxFuture<'a, Result<bool, AppError>> {
    async move {
        if let Authorize::Allow(b) = rule {
            return Ok(*b);
        }
        if let Authorize::Custom(f) = rule {
            let next = f(AuthorizeCall {
                ctx: ctx.clone(),
                member: member.clone(),
            })
            .await?;
            return check(&next, ctx, member, model, lookup).await;
        }
        let Some(user) = &ctx.user else { return Ok(false) };
        let mut member = member;
        for candidate in rule.candidates().unwrap_or_default() {
            let passed = match candidate {
                SELF_TOKEN | OWNER_TOKEN => {
                    if member.is_none() {
                        member = lookup.member().await?;
                    }
                    match (&member, model) {
                        (Some(m), Some(model)) if candidate == SELF_TOKEN => is_self(model, m, &user.id),
                        (Some(m), Some(model)) => is_owner(model, m, &user.id),
                        _ => false,
                    }
                }
                role => user.has_role(role),
            };
            if passed {
                return Ok(true);
            }
        }
        Ok(false)
    }
    .boxed()
}

fn is_self(model: &ModelDef, member: &Value, user_id: &Value) -> bool {
    model
        .id_of(member)
        .map(|id| ModelDef::id_key(&id) == scalar_key(user_id))
        .unwrap_or(false)
}

fn is_owner(model: &ModelDef, member: &Value, user_id: &Value) -> bool {
    let Some(prop) = &model.owner_property else {
        tracing::warn!(model = %model.name, "$owner rule on a model without an owner property");
        return false;
    };
    member
        .get(prop)
        .filter(|v| !v.is_null())
        .map(|v| scalar_key(v) == scalar_key(user_id))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, AppConfig};
    use crate::controller::{CurrentUser, Verb};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn user_model() -> Arc<ModelDef> {
        let config: AppConfig = serde_json::from_value(json!({
            "models": [{
                "name": "Note",
                "owner": "authorId",
                "properties": { "id": { "type": "integer" }, "authorId": { "type": "integer" } }
            }]
        }))
        .unwrap();
        resolve(&config).unwrap().model("Note").unwrap().clone()
    }

    fn ctx(user: Option<CurrentUser>) -> Arc<RequestContext> {
        Arc::new(RequestContext::new(Verb::Get).with_user(user))
    }

    struct Counting(AtomicUsize, Value);

    #[async_trait]
    impl MemberLookup for Counting {
        async fn member(&self) -> Result<Option<Value>, AppError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Some(self.1.clone()))
        }
    }

    #[tokio::test]
    async fn self_matches_member_id_and_anonymous_fails_quietly() {
        let model = user_model();
        let rule = Authorize::Role(SELF_TOKEN.into());
        let member = Some(json!({ "id": 7, "authorId": 1 }));
        let me = ctx(Some(CurrentUser::new(json!(7), vec![])));
        assert!(check(&rule, &me, member.clone(), Some(&model), &NoMember).await.unwrap());
        let other = ctx(Some(CurrentUser::new(json!(8), vec![])));
        assert!(!check(&rule, &other, member.clone(), Some(&model), &NoMember).await.unwrap());
        let anonymous = ctx(None);
        assert!(!check(&rule, &anonymous, member, Some(&model), &NoMember).await.unwrap());
    }

    #[tokio::test]
    async fn owner_resolves_member_lazily_once() {
        let model = user_model();
        let lookup = Counting(AtomicUsize::new(0), json!({ "id": 3, "authorId": 5 }));
        let rule = Authorize::roles(["$owner", "$self"]);
        let user = ctx(Some(CurrentUser::new(json!("5"), vec![])));
        assert!(check(&rule, &user, None, Some(&model), &lookup).await.unwrap());
        assert_eq!(lookup.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn roles_are_ored_and_custom_rules_recurse() {
        let editor = ctx(Some(CurrentUser::new(json!(1), vec!["editor".into()])));
        let rule = Authorize::roles(["admin", "editor"]);
        assert!(check(&rule, &editor, None, None, &NoMember).await.unwrap());
        assert!(!check(&Authorize::from("admin"), &editor, None, None, &NoMember).await.unwrap());

        let custom = Authorize::custom(|call: AuthorizeCall| async move {
            Ok(if call.ctx.user.is_some() { Authorize::from("editor") } else { Authorize::Allow(false) })
        });
        assert!(check(&custom, &editor, None, None, &NoMember).await.unwrap());
    }

    #[test]
    fn json_rules() {
        assert_eq!(Authorize::from_json(&json!(false)).unwrap(), Authorize::Allow(false));
        assert_eq!(Authorize::from_json(&json!(["a", "$self"])).unwrap(), Authorize::roles(["a", "$self"]));
        assert!(Authorize::from_json(&json!(3)).is_err());
    }
}

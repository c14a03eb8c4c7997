//! Controllers and the action lifecycle: merged action groups, parameter validation,
//! member resolution, authorization, hooks and the default model/relation actions.

pub mod action;
pub mod action_spec;
pub mod authorize;
pub mod base;
mod collection;
pub mod context;
pub mod hooks;
pub mod layers;
pub mod member;
mod relation;

pub use action::{ActionCall, CompiledAction, Group};
pub use action_spec::{
    to_kebab_case, ActionHandler, ActionResult, ActionSpec, ParamSource, ParamSpec, QueryModifier, ReturnSpec, Verb,
};
pub use authorize::{Authorize, AuthorizeCall, AuthorizeFn, OWNER_TOKEN, SELF_TOKEN};
pub use base::{Controller, ControllerBuilder, ControllerKind, RelationBuilder};
pub use context::{CurrentUser, RequestContext};
pub use hooks::{hook, HookCall, HookHandler, HookPhase, HookRegistry};
pub use layers::{merge, ConfigLayer, GroupOptions, ResolvedActionSet, ALLOW_ALL};
pub use member::{get_member, ID_PARAM, RELATED_ID_PARAM};

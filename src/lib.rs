//! Dito server: declarative controllers and actions over configured models, compiled into an
//! axum router with parameter validation, member resolution, authorization and hooks.

pub mod app;
pub mod case;
pub mod config;
pub mod controller;
pub mod error;
pub mod extractors;
pub mod query;
pub mod response;
pub mod routes;
pub mod sql;
pub mod state;
pub mod validation;

pub use app::{Application, ApplicationBuilder, RouteInfo};
pub use config::{load_from_path, resolve, AppConfig, AppSettings, ModelDef, ModelRegistry};
pub use controller::{
    ActionCall, ActionSpec, Authorize, ConfigLayer, Controller, ControllerBuilder, CurrentUser, HookCall, ParamSpec,
    RelationBuilder, RequestContext, ReturnSpec, Verb,
};
pub use error::{AppError, ConfigError};
pub use extractors::{header_auth, AuthUser};
pub use query::{Executor, MemoryRepository, PgRepository, Query, Repository};
pub use routes::common_routes;
pub use state::AppState;
pub use validation::ParamType;

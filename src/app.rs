//! Application: controllers compiled once into routes, served through one axum `Router`.

use crate::config::settings::{DEFAULT_API_PREFIX, DEFAULT_BODY_LIMIT};
use crate::config::{resolve, AppConfig, ModelRegistry};
use crate::controller::{CompiledAction, Controller, ControllerBuilder, Verb};
use crate::error::ConfigError;
use crate::query::Repository;
use crate::routes::{api, common_routes};
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::routing::MethodRouter;
use axum::Router;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    pub identifier: String,
    pub controller: String,
    pub verb: Verb,
    pub path: String,
    pub transacted: bool,
}

pub struct ApplicationBuilder {
    models: Arc<ModelRegistry>,
    repository: Arc<dyn Repository>,
    prefix: String,
    body_limit: usize,
    controllers: Vec<ControllerBuilder>,
    errors: Vec<ConfigError>,
}

impl ApplicationBuilder {
    /// Resolve models and controllers from a JSON application config.
    pub fn from_config(config: &AppConfig, repository: Arc<dyn Repository>) -> Result<Self, ConfigError> {
        let models = Arc::new(resolve(config)?);
        let mut builder = Application::builder(models, repository);
        for controller in &config.controllers {
            builder = builder.controller(ControllerBuilder::from_config(controller)?);
        }
        Ok(builder)
    }

    pub fn api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    pub fn controller(mut self, controller: ControllerBuilder) -> Self {
        self.controllers.push(controller);
        self
    }

    /// Add layers, relations or hooks to an already declared controller (e.g. one from JSON).
    pub fn configure(mut self, name: &str, f: impl FnOnce(ControllerBuilder) -> ControllerBuilder) -> Self {
        match self.controllers.iter().position(|c| c.name() == name) {
            Some(i) => {
                let existing = self.controllers.remove(i);
                self.controllers.insert(i, f(existing));
            }
            None => self.errors.push(ConfigError::MissingReference {
                kind: "controller",
                id: name.to_string(),
            }),
        }
        self
    }

    /// Build every controller and compile its actions. Two actions answering the same verb
    /// and path are refused.
    pub fn build(mut self) -> Result<Application, ConfigError> {
        if !self.errors.is_empty() {
            return Err(self.errors.remove(0));
        }
        let mut names = HashSet::new();
        let mut controllers = Vec::with_capacity(self.controllers.len());
        let mut actions = Vec::new();
        let mut seen = HashSet::new();
        for builder in self.controllers {
            if !names.insert(builder.name().to_string()) {
                return Err(ConfigError::Validation(format!("duplicate controller name '{}'", builder.name())));
            }
            let controller = builder.build(&self.prefix, self.models.clone(), self.repository.clone())?;
            for action in controller.compile()? {
                if !seen.insert((action.verb, action.path.clone())) {
                    return Err(ConfigError::DuplicateRoute {
                        verb: action.verb.to_string(),
                        path: action.path.clone(),
                    });
                }
                actions.push(action);
            }
            controllers.push(controller);
        }
        tracing::info!(controllers = controllers.len(), routes = actions.len(), "application compiled");
        Ok(Application {
            controllers,
            actions,
            models: self.models,
            repository: self.repository,
            body_limit: self.body_limit,
        })
    }
}

pub struct Application {
    controllers: Vec<Arc<Controller>>,
    actions: Vec<Arc<CompiledAction>>,
    models: Arc<ModelRegistry>,
    repository: Arc<dyn Repository>,
    body_limit: usize,
}

impl Application {
    pub fn builder(models: Arc<ModelRegistry>, repository: Arc<dyn Repository>) -> ApplicationBuilder {
        ApplicationBuilder {
            models,
            repository,
            prefix: DEFAULT_API_PREFIX.to_string(),
            body_limit: DEFAULT_BODY_LIMIT,
            controllers: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn routes(&self) -> Vec<RouteInfo> {
        self.actions
            .iter()
            .map(|a| RouteInfo {
                identifier: a.identifier.clone(),
                controller: a.controller().name.clone(),
                verb: a.verb,
                path: a.path.clone(),
                transacted: a.transacted,
            })
            .collect()
    }

    pub fn actions(&self) -> &[Arc<CompiledAction>] {
        &self.actions
    }

    /// Top-level controller by name; relation controllers are reached via [`Controller::relation`].
    pub fn controller(&self, name: &str) -> Option<&Arc<Controller>> {
        self.controllers.iter().find(|c| c.name == name)
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }

    pub fn state(&self) -> AppState {
        AppState {
            repository: self.repository.clone(),
            models: self.models.clone(),
        }
    }

    /// Every compiled action plus `/health`, `/ready` and `/version`, behind the body limit.
    pub fn router(&self) -> Router {
        let mut paths: BTreeMap<String, MethodRouter> = BTreeMap::new();
        for action in &self.actions {
            let route = paths.remove(&action.path).unwrap_or_else(MethodRouter::new);
            paths.insert(
                action.path.clone(),
                route.on(action.verb.method_filter(), api::handler(action.clone())),
            );
        }
        let mut router = Router::new();
        for (path, route) in paths {
            router = router.route(&path, route);
        }
        router
            .merge(common_routes(self.state()))
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(self.body_limit))
    }
}

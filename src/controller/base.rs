//! Controllers own a URL, their merged action groups and their hooks. Model controllers add the
//! default collection/member actions and one relation controller per configured relation.

use super::action::{request_input, CompiledAction, Group};
use super::action_spec::{ActionSpec, Verb};
use super::authorize::Authorize;
use super::collection;
use super::context::RequestContext;
use super::hooks::{hook, HookCall, HookHandler, HookRegistry};
use super::layers::{merge, ConfigLayer, GroupOptions, ResolvedActionSet};
use super::member::{ID_PARAM, RELATED_ID_PARAM};
use crate::config::{ControllerConfig, ModelDef, ModelRegistry, RelationControllerConfig, RelationDef};
use crate::error::{AppError, ConfigError};
use crate::query::{Executor, Query, RelationAnchor, Repository, Transaction};
use crate::validation::ValidationIssue;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

pub enum ControllerKind {
    /// Only custom `actions`.
    Plain,
    Model { model: Arc<ModelDef> },
    /// Rooted at one row of `owner`, addressing the rows `relation` points at.
    Relation {
        owner: Arc<ModelDef>,
        relation: Arc<RelationDef>,
        related: Arc<ModelDef>,
    },
}

pub struct Controller {
    pub name: String,
    pub namespace: Option<String>,
    /// Absolute route prefix, e.g. `/api/widgets` or `/api/widgets/:id/tags`.
    pub url: String,
    pub kind: ControllerKind,
    /// Writes may reference existing rows by id; relation deletes unrelate.
    pub relate: bool,
    pub transacted: Option<bool>,
    pub assets: bool,
    hooks: HookRegistry,
    repository: Arc<dyn Repository>,
    models: Arc<ModelRegistry>,
    groups: Vec<(Group, ResolvedActionSet)>,
    relations: Vec<Arc<Controller>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("relate", &self.relate)
            .field("transacted", &self.transacted)
            .field("relations", &self.relations.len())
            .finish()
    }
}

impl Controller {
    /// Model whose rows the controller's queries return.
    pub fn model(&self) -> Option<&Arc<ModelDef>> {
        match &self.kind {
            ControllerKind::Plain => None,
            ControllerKind::Model { model } => Some(model),
            ControllerKind::Relation { related, .. } => Some(related),
        }
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.kind, ControllerKind::Relation { .. })
    }

    pub fn relation_def(&self) -> Option<&Arc<RelationDef>> {
        match &self.kind {
            ControllerKind::Relation { relation, .. } => Some(relation),
            _ => None,
        }
    }

    pub fn is_one_to_one(&self) -> bool {
        self.relation_def().map(|r| r.is_one_to_one()).unwrap_or(false)
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn relation(&self, name: &str) -> Option<&Arc<Controller>> {
        let qualified = format!("{}.{}", self.name, name);
        self.relations.iter().find(|c| c.name == qualified)
    }

    pub fn relations(&self) -> &[Arc<Controller>] {
        &self.relations
    }

    pub fn group(&self, group: Group) -> Option<&ResolvedActionSet> {
        self.groups.iter().find(|(g, _)| *g == group).map(|(_, set)| set)
    }

    /// Register a `before:<identifier>` or `after:<identifier>` listener.
    pub fn on<F, Fut>(&self, event: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(HookCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, AppError>> + Send + 'static,
    {
        self.hooks.on(event, hook(f))
    }

    pub fn executor(&self, transaction: Option<Transaction>) -> Executor {
        Executor::new(self.repository.clone(), self.models.clone(), transaction)
    }

    /// The query every default action starts from. Relation controllers first resolve the
    /// owning row (id and relation key only, scopes ignored) and root the query at it.
    pub async fn base_query(&self, ctx: &RequestContext, options: &GroupOptions) -> Result<Query, AppError> {
        let mut query = match &self.kind {
            ControllerKind::Plain => {
                return Err(AppError::Internal(format!("controller {} has no model", self.name)));
            }
            ControllerKind::Model { model } => Query::new(model.clone()),
            ControllerKind::Relation {
                owner,
                relation,
                related,
            } => {
                let anchor = self.resolve_owner(ctx, owner, relation).await?;
                Query::related(anchor, related.clone())
            }
        };
        for scope in &options.scope {
            query = query.with_scope(scope.clone());
        }
        Ok(query)
    }

    async fn resolve_owner(
        &self,
        ctx: &RequestContext,
        owner: &Arc<ModelDef>,
        relation: &Arc<RelationDef>,
    ) -> Result<RelationAnchor, AppError> {
        let Some(raw) = ctx.path_params.get(ID_PARAM) else {
            return Err(AppError::parameters(
                request_input(ctx),
                vec![ValidationIssue::new(ID_PARAM, "is required")],
            ));
        };
        let id = owner
            .parse_id(raw)
            .map_err(|issue| AppError::parameters(request_input(ctx), vec![issue]))?;
        let mut columns = owner.id_properties.clone();
        if !columns.contains(&relation.owner_key) {
            columns.push(relation.owner_key.clone());
        }
        let query = Query::new(owner.clone()).find_by_id(&id).ignore_scopes().select(columns);
        let row = self
            .executor(ctx.transaction.clone())
            .first(&query)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", owner.name, ModelDef::id_key(&id))))?;
        let Value::Object(row) = row else {
            return Err(AppError::Internal(format!("{} row is not an object", owner.name)));
        };
        tracing::debug!(controller = %self.name, owner = %owner.name, id = %ModelDef::id_key(&id), "owner resolved");
        Ok(RelationAnchor {
            relation: relation.clone(),
            owner_model: owner.clone(),
            owner: row,
        })
    }

    /// Run `f` with the base query and an executor bound to the request's transaction.
    pub async fn execute<F, Fut, T>(&self, ctx: &RequestContext, options: &GroupOptions, f: F) -> Result<T, AppError>
    where
        F: FnOnce(Query, Executor) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let query = self.base_query(ctx, options).await?;
        f(query, self.executor(ctx.transaction.clone())).await
    }

    fn writes_graphs(&self) -> bool {
        self.relate || self.is_relation()
    }

    /// Explicit action setting, then the controller's, then: non-get default actions of
    /// controllers that write graphs or assets.
    fn is_transacted(&self, spec: &ActionSpec) -> bool {
        let core = spec.is_core || spec.inherited.as_ref().map(|s| s.is_core).unwrap_or(false);
        spec.transacted
            .or(self.transacted)
            .unwrap_or(core && spec.verb != Verb::Get && (self.writes_graphs() || self.assets))
    }

    fn action_path(&self, group: Group, spec: &ActionSpec) -> String {
        let mut path = self.url.clone();
        if group == Group::Member {
            path.push_str("/:");
            path.push_str(if self.is_relation() { RELATED_ID_PARAM } else { ID_PARAM });
        }
        let segment = spec.route_segment();
        if !segment.is_empty() {
            path.push('/');
            path.push_str(&segment);
        }
        path
    }

    /// Compile every allowed action of this controller and its relation controllers.
    pub fn compile(self: &Arc<Self>) -> Result<Vec<Arc<CompiledAction>>, ConfigError> {
        let mut compiled = Vec::new();
        for (group, set) in &self.groups {
            for (name, spec) in &set.actions {
                let authorization = set.authorize.get(name).cloned().unwrap_or(Authorize::Allow(true));
                let action = CompiledAction::compile(
                    self,
                    *group,
                    spec.clone(),
                    authorization,
                    set.options.clone(),
                    self.action_path(*group, spec),
                    self.is_transacted(spec),
                )?;
                tracing::info!(
                    action = %action.identifier,
                    controller = %self.name,
                    verb = %action.verb,
                    path = %action.path,
                    transacted = action.transacted,
                    "route"
                );
                compiled.push(Arc::new(action));
            }
        }
        let known: HashSet<&str> = compiled.iter().map(|a| a.identifier.as_str()).collect();
        for identifier in self.hooks.identifiers() {
            if !known.contains(identifier.as_str()) {
                tracing::warn!(controller = %self.name, hook = %identifier, "hook registered for an unknown action");
            }
        }
        for child in &self.relations {
            compiled.extend(child.compile()?);
        }
        Ok(compiled)
    }
}

/// Relation controller declaration inside a model controller.
#[derive(Default)]
pub struct RelationBuilder {
    path: Option<String>,
    relate: bool,
    transacted: Option<bool>,
    collection: Vec<ConfigLayer>,
    member: Vec<ConfigLayer>,
    hooks: Vec<(String, Arc<dyn HookHandler>)>,
}

impl RelationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RelationControllerConfig) -> Result<Self, ConfigError> {
        let mut b = RelationBuilder {
            path: config.path.clone(),
            relate: config.relate,
            transacted: config.transacted,
            ..RelationBuilder::default()
        };
        if let Some(group) = &config.collection {
            b.collection.push(ConfigLayer::from_group(group)?);
        }
        if let Some(group) = &config.member {
            b.member.push(ConfigLayer::from_group(group)?);
        }
        Ok(b)
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn relate(mut self, relate: bool) -> Self {
        self.relate = relate;
        self
    }

    pub fn transacted(mut self, transacted: bool) -> Self {
        self.transacted = Some(transacted);
        self
    }

    pub fn collection(mut self, layer: ConfigLayer) -> Self {
        self.collection.push(layer);
        self
    }

    pub fn member(mut self, layer: ConfigLayer) -> Self {
        self.member.push(layer);
        self
    }

    pub fn on<F, Fut>(mut self, event: &str, f: F) -> Self
    where
        F: Fn(HookCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, AppError>> + Send + 'static,
    {
        self.hooks.push((event.to_string(), hook(f)));
        self
    }
}

pub struct ControllerBuilder {
    name: String,
    model: Option<String>,
    namespace: Option<String>,
    path: Option<String>,
    relate: bool,
    transacted: Option<bool>,
    assets: bool,
    actions: Vec<ConfigLayer>,
    collection: Vec<ConfigLayer>,
    member: Vec<ConfigLayer>,
    relations: Vec<(String, RelationBuilder)>,
    hooks: Vec<(String, Arc<dyn HookHandler>)>,
}

impl ControllerBuilder {
    /// Controller with custom actions only.
    pub fn plain(name: impl Into<String>) -> Self {
        ControllerBuilder {
            name: name.into(),
            model: None,
            namespace: None,
            path: None,
            relate: false,
            transacted: None,
            assets: false,
            actions: Vec::new(),
            collection: Vec::new(),
            member: Vec::new(),
            relations: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Controller over `model`, carrying the default collection and member actions.
    pub fn model(name: impl Into<String>, model: impl Into<String>) -> Self {
        ControllerBuilder {
            model: Some(model.into()),
            ..Self::plain(name)
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Result<Self, ConfigError> {
        let mut b = match &config.model {
            Some(model) => Self::model(&config.name, model),
            None => Self::plain(&config.name),
        };
        b.namespace = config.namespace.clone();
        b.path = config.path.clone();
        b.relate = config.relate;
        b.transacted = config.transacted;
        b.assets = config.assets;
        if let Some(group) = &config.actions {
            b.actions.push(ConfigLayer::from_group(group)?);
        }
        if let Some(group) = &config.collection {
            b.collection.push(ConfigLayer::from_group(group)?);
        }
        if let Some(group) = &config.member {
            b.member.push(ConfigLayer::from_group(group)?);
        }
        for (name, relation) in &config.relations {
            b.relations.push((name.clone(), RelationBuilder::from_config(relation)?));
        }
        Ok(b)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn relate(mut self, relate: bool) -> Self {
        self.relate = relate;
        self
    }

    pub fn transacted(mut self, transacted: bool) -> Self {
        self.transacted = Some(transacted);
        self
    }

    pub fn assets(mut self, assets: bool) -> Self {
        self.assets = assets;
        self
    }

    pub fn actions(mut self, layer: ConfigLayer) -> Self {
        self.actions.push(layer);
        self
    }

    pub fn collection(mut self, layer: ConfigLayer) -> Self {
        self.collection.push(layer);
        self
    }

    pub fn member(mut self, layer: ConfigLayer) -> Self {
        self.member.push(layer);
        self
    }

    /// Expose `relation` of the bound model below `<url>/:id/`. Declaring it again adds layers.
    pub fn relation(mut self, name: impl Into<String>, relation: RelationBuilder) -> Self {
        let name = name.into();
        match self.relations.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => {
                existing.collection.extend(relation.collection);
                existing.member.extend(relation.member);
                existing.hooks.extend(relation.hooks);
                if relation.path.is_some() {
                    existing.path = relation.path;
                }
                if relation.transacted.is_some() {
                    existing.transacted = relation.transacted;
                }
                existing.relate |= relation.relate;
            }
            None => self.relations.push((name, relation)),
        }
        self
    }

    pub fn on<F, Fut>(mut self, event: &str, f: F) -> Self
    where
        F: Fn(HookCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, AppError>> + Send + 'static,
    {
        self.hooks.push((event.to_string(), hook(f)));
        self
    }

    /// Resolve models, merge every group and attach relation controllers.
    pub fn build(
        self,
        prefix: &str,
        models: Arc<ModelRegistry>,
        repository: Arc<dyn Repository>,
    ) -> Result<Arc<Controller>, ConfigError> {
        let mut url = prefix.trim_end_matches('/').to_string();
        if let Some(ns) = &self.namespace {
            url.push('/');
            url.push_str(ns.trim_matches('/'));
        }
        url.push('/');
        url.push_str(self.path.as_deref().unwrap_or(&self.name).trim_matches('/'));

        let model = match &self.model {
            Some(name) => Some(models.model(name).cloned().ok_or_else(|| ConfigError::MissingReference {
                kind: "model",
                id: name.clone(),
            })?),
            None => None,
        };

        let mut groups = Vec::new();
        if !self.actions.is_empty() {
            groups.push((Group::Actions, merge(&self.actions)));
        }
        let kind = match &model {
            Some(model) => {
                groups.extend(default_groups(model, self.relate, &self.collection, &self.member));
                ControllerKind::Model { model: model.clone() }
            }
            None => {
                if !self.collection.is_empty() || !self.member.is_empty() || !self.relations.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "controller {}: collection, member and relations require a model",
                        self.name
                    )));
                }
                ControllerKind::Plain
            }
        };

        let mut relations = Vec::with_capacity(self.relations.len());
        for (rel_name, rb) in self.relations {
            let owner = model.clone().ok_or_else(|| {
                ConfigError::Validation(format!("controller {}: relations require a model", self.name))
            })?;
            let relation = owner.relation(&rel_name).cloned().ok_or_else(|| ConfigError::MissingReference {
                kind: "relation",
                id: format!("{}.{}", owner.name, rel_name),
            })?;
            let related = models
                .model(&relation.related_model)
                .cloned()
                .ok_or_else(|| ConfigError::MissingReference {
                    kind: "model",
                    id: relation.related_model.clone(),
                })?;
            let child_url = format!(
                "{}/:{}/{}",
                url,
                ID_PARAM,
                rb.path.as_deref().unwrap_or(&rel_name).trim_matches('/')
            );
            let child = Controller {
                name: format!("{}.{}", self.name, rel_name),
                namespace: self.namespace.clone(),
                url: child_url,
                groups: default_groups(&related, rb.relate, &rb.collection, &rb.member),
                kind: ControllerKind::Relation {
                    owner,
                    relation,
                    related,
                },
                relate: rb.relate,
                transacted: rb.transacted,
                assets: false,
                hooks: HookRegistry::default(),
                repository: repository.clone(),
                models: models.clone(),
                relations: Vec::new(),
            };
            for (event, handler) in rb.hooks {
                child.hooks.on(&event, handler)?;
            }
            relations.push(Arc::new(child));
        }

        let controller = Controller {
            name: self.name,
            namespace: self.namespace,
            url,
            kind,
            relate: self.relate,
            transacted: self.transacted,
            assets: self.assets,
            hooks: HookRegistry::default(),
            repository,
            models,
            groups,
            relations,
        };
        for (event, handler) in self.hooks {
            controller.hooks.on(&event, handler)?;
        }
        Ok(Arc::new(controller))
    }
}

fn default_groups(
    model: &ModelDef,
    relate: bool,
    collection: &[ConfigLayer],
    member: &[ConfigLayer],
) -> Vec<(Group, ResolvedActionSet)> {
    let mut collection_layers = vec![collection::collection_layer(model, relate)];
    collection_layers.extend(collection.iter().cloned());
    let mut member_layers = vec![collection::member_layer(model)];
    member_layers.extend(member.iter().cloned());
    vec![
        (Group::Collection, merge(&collection_layers)),
        (Group::Member, merge(&member_layers)),
    ]
}

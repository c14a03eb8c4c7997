//! Per-request context handed through the action lifecycle.

use super::action_spec::Verb;
use crate::error::AppError;
use crate::query::Transaction;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// The authenticated caller, populated upstream (see [`crate::extractors::user`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: Value,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl CurrentUser {
    pub fn new(id: Value, roles: Vec<String>) -> Self {
        CurrentUser { id, roles }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(Debug)]
pub struct RequestContext {
    pub verb: Verb,
    pub path_params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Value,
    pub user: Option<CurrentUser>,
    pub transaction: Option<Transaction>,
    member_id: OnceLock<Vec<Value>>,
    member: Mutex<Option<Value>>,
    status: Mutex<Option<StatusCode>>,
    headers: Mutex<HeaderMap>,
}

impl RequestContext {
    pub fn new(verb: Verb) -> Self {
        RequestContext {
            verb,
            path_params: HashMap::new(),
            query: HashMap::new(),
            body: Value::Null,
            user: None,
            transaction: None,
            member_id: OnceLock::new(),
            member: Mutex::new(None),
            status: Mutex::new(None),
            headers: Mutex::new(HeaderMap::new()),
        }
    }

    pub fn with_path_params(mut self, params: HashMap<String, String>) -> Self {
        self.path_params = params;
        self
    }

    pub fn with_query(mut self, query: HashMap<String, String>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_user(mut self, user: Option<CurrentUser>) -> Self {
        self.user = user;
        self
    }

    pub fn with_transaction(mut self, transaction: Option<Transaction>) -> Self {
        self.transaction = transaction;
        self
    }

    /// Parsed id of the addressed member (member actions only).
    pub fn member_id(&self) -> Option<&[Value]> {
        self.member_id.get().map(Vec::as_slice)
    }

    pub(crate) fn set_member_id(&self, id: Vec<Value>) {
        let _ = self.member_id.set(id);
    }

    /// The member row if an earlier lifecycle step already fetched it.
    pub fn member(&self) -> Option<Value> {
        self.member.lock().ok().and_then(|m| m.clone())
    }

    pub(crate) fn set_member(&self, member: Value) {
        if let Ok(mut m) = self.member.lock() {
            *m = Some(member);
        }
    }

    pub fn set_status(&self, status: StatusCode) {
        if let Ok(mut s) = self.status.lock() {
            *s = Some(status);
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status.lock().ok().and_then(|s| *s)
    }

    pub fn set_header(&self, name: &str, value: &str) -> Result<(), AppError> {
        let name = HeaderName::try_from(name).map_err(AppError::wrap)?;
        let value = HeaderValue::try_from(value).map_err(AppError::wrap)?;
        if let Ok(mut h) = self.headers.lock() {
            h.insert(name, value);
        }
        Ok(())
    }

    pub fn headers(&self) -> HeaderMap {
        self.headers.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_overrides_are_recorded() {
        let ctx = RequestContext::new(Verb::Post);
        ctx.set_status(StatusCode::CREATED);
        ctx.set_header("x-total-count", "3").unwrap();
        assert_eq!(ctx.status(), Some(StatusCode::CREATED));
        assert_eq!(ctx.headers()["x-total-count"], "3");
        assert!(ctx.set_header("bad header", "x").is_err());
    }

    #[test]
    fn member_id_is_set_once() {
        let ctx = RequestContext::new(Verb::Get);
        ctx.set_member_id(vec![json!(1)]);
        ctx.set_member_id(vec![json!(2)]);
        assert_eq!(ctx.member_id(), Some(&[json!(1)][..]));
    }

    #[test]
    fn roles() {
        let user = CurrentUser::new(json!(1), vec!["admin".into()]);
        assert!(user.has_role("admin"));
        assert!(!user.has_role("editor"));
    }
}

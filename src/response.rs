//! Rendering of action results. Errors render through [`crate::error::AppError`]'s `IntoResponse`.

use crate::controller::RequestContext;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

/// `null` answers 204 unless the handler chose a status; anything else is JSON, 200 by default.
pub fn render(ctx: &RequestContext, value: Value) -> Response {
    let headers = ctx.headers();
    if value.is_null() {
        return (ctx.status().unwrap_or(StatusCode::NO_CONTENT), headers).into_response();
    }
    (ctx.status().unwrap_or(StatusCode::OK), headers, Json(value)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Verb;
    use serde_json::json;

    #[test]
    fn null_is_no_content() {
        let ctx = RequestContext::new(Verb::Get);
        assert_eq!(render(&ctx, Value::Null).status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn handler_status_and_headers_are_kept() {
        let ctx = RequestContext::new(Verb::Post);
        ctx.set_status(StatusCode::CREATED);
        ctx.set_header("x-total", "3").unwrap();
        let res = render(&ctx, json!({ "id": 1 }));
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.headers().get("x-total").unwrap(), "3");
    }
}

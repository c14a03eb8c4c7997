mod common;

use axum::http::{Method, StatusCode};
use common::{builder, operations, router, seeded, send};
use dito_server::{AppError, HookCall, RelationBuilder, Verb};
use serde_json::{json, Value};

fn labels(repo: &dito_server::MemoryRepository) -> Vec<(i64, String, Value)> {
    repo.rows("parts")
        .iter()
        .map(|p| (p["id"].as_i64().unwrap(), p["label"].as_str().unwrap().to_string(), p["widgetId"].clone()))
        .collect()
}

#[tokio::test]
async fn relation_routes_are_nested_below_the_owner() {
    let repo = seeded();
    let app = builder(&repo).build().unwrap();
    let routes = app.routes();
    let find = |identifier: &str, path: &str| {
        routes
            .iter()
            .find(|r| r.identifier == identifier && r.path == path)
            .cloned()
            .unwrap_or_else(|| panic!("missing {} {}", identifier, path))
    };
    let put = find("collection:put", "/api/widgets/:id/parts");
    assert_eq!(put.verb, Verb::Put);
    assert!(put.transacted);
    assert_eq!(put.controller, "widgets.parts");
    assert!(!find("collection:get", "/api/widgets/:id/parts").transacted);
    find("member:get", "/api/widgets/:id/parts/:related_id");
    assert!(!find("member:patch", "/api/widgets/:id").transacted);
    assert!(routes.iter().all(|r| !(r.controller == "users" && r.identifier == "member:delete")));
}

#[tokio::test]
async fn relation_reads_stay_within_the_owner() {
    let repo = seeded();
    let app = builder(&repo).build().unwrap();
    let router = router(&app);

    let (status, body) = send(&router, Method::GET, "/api/widgets/1/parts?order=id", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = body.as_array().unwrap().iter().map(|p| p["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![1, 2]);

    let (status, _) = send(&router, Method::GET, "/api/widgets/1/parts/3", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = send(&router, Method::GET, "/api/widgets/2/parts/3", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["label"], "other");
}

#[tokio::test]
async fn missing_owner_is_not_found_after_one_lookup() {
    let repo = seeded();
    let app = builder(&repo).build().unwrap();
    let (status, body) = send(&router(&app), Method::GET, "/api/widgets/99/parts", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
    assert_eq!(operations(&repo), vec!["select widgets".to_string()]);
}

#[tokio::test]
async fn put_replaces_related_rows() {
    let repo = seeded();
    let app = builder(&repo).build().unwrap();
    let (status, body) = send(
        &router(&app),
        Method::PUT,
        "/api/widgets/1/parts",
        Some(json!([{ "id": 2, "label": "B" }, { "label": "c" }])),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["label"], "B");
    assert_eq!(body[1]["id"], 4);

    assert_eq!(
        labels(&repo),
        vec![
            (2, "B".to_string(), json!(1)),
            (3, "other".to_string(), json!(2)),
            (4, "c".to_string(), json!(1)),
        ]
    );
    assert_eq!(
        operations(&repo),
        vec![
            "begin",
            "select widgets",
            "select parts",
            "delete parts",
            "update parts",
            "insert parts",
            "commit",
        ]
    );
}

#[tokio::test]
async fn relate_put_detaches_instead_of_deleting() {
    let repo = seeded();
    let app = builder(&repo)
        .configure("widgets", |c| c.relation("parts", RelationBuilder::new().relate(true)))
        .build()
        .unwrap();
    let (status, _) = send(
        &router(&app),
        Method::PUT,
        "/api/widgets/1/parts",
        Some(json!([{ "id": 3 }])),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        labels(&repo),
        vec![
            (1, "a".to_string(), Value::Null),
            (2, "b".to_string(), Value::Null),
            (3, "other".to_string(), json!(1)),
        ]
    );
}

#[tokio::test]
async fn post_through_relation_sets_the_foreign_key() {
    let repo = seeded();
    let app = builder(&repo).build().unwrap();
    let (status, body) = send(
        &router(&app),
        Method::POST,
        "/api/widgets/2/parts",
        Some(json!({ "label": "bolt" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["widgetId"], 2);
    assert_eq!(repo.rows("parts").len(), 4);
}

#[tokio::test]
async fn failed_relation_write_rolls_back() {
    let repo = seeded();
    let app = builder(&repo)
        .configure("widgets", |c| {
            c.relation(
                "parts",
                RelationBuilder::new().on("after:collection:post", |_call: HookCall| async {
                    Err(AppError::BadRequest("rejected".into()))
                }),
            )
        })
        .build()
        .unwrap();
    let (status, _) = send(
        &router(&app),
        Method::POST,
        "/api/widgets/1/parts",
        Some(json!({ "label": "doomed" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(repo.rows("parts").len(), 3);
    assert_eq!(operations(&repo).last().map(String::as_str), Some("rollback"));
}

#[tokio::test]
async fn relation_delete_counts_removed_rows() {
    let repo = seeded();
    let app = builder(&repo).build().unwrap();
    let (status, body) = send(&router(&app), Method::DELETE, "/api/widgets/1/parts", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "count": 2 }));
    assert_eq!(labels(&repo), vec![(3, "other".to_string(), json!(2))]);
}

#[tokio::test]
async fn relate_post_connects_referenced_rows_and_inserts_new_ones() {
    let repo = seeded();
    let app = builder(&repo).configure("widgets", |c| c.relate(true)).build().unwrap();
    let (status, body) = send(
        &router(&app),
        Method::POST,
        "/api/widgets",
        Some(json!({ "name": "new", "owner": { "id": 6 }, "parts": [{ "id": 3 }, { "label": "n" }] })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], 8);
    assert_eq!(body["ownerId"], 6);
    assert_eq!(body["owner"], json!({ "id": 6, "name": "bob" }));
    assert_eq!(body["parts"][0]["label"], "other");
    assert_eq!(body["parts"][1]["id"], 4);
    assert_eq!(
        labels(&repo),
        vec![
            (1, "a".to_string(), json!(1)),
            (2, "b".to_string(), json!(1)),
            (3, "other".to_string(), json!(8)),
            (4, "n".to_string(), json!(8)),
        ]
    );
    assert_eq!(operations(&repo).last().map(String::as_str), Some("commit"));
}

#[tokio::test]
async fn relate_post_with_unknown_reference_rolls_back() {
    let repo = seeded();
    let app = builder(&repo).configure("widgets", |c| c.relate(true)).build().unwrap();
    let (status, body) = send(
        &router(&app),
        Method::POST,
        "/api/widgets",
        Some(json!({ "name": "new", "parts": [{ "label": "n" }, { "id": 99 }] })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
    assert_eq!(repo.rows("widgets").len(), 3);
    assert_eq!(repo.rows("parts").len(), 3);
    assert_eq!(operations(&repo).last().map(String::as_str), Some("rollback"));
}

//! Integration tests for best-effort multi-statement execution.

mod common;

use common::{post_json, spawn_app, ADMIN_ID};
use serde_json::json;

#[tokio::test]
async fn failed_statement_does_not_stop_the_batch() {
    let app = spawn_app(
        "UPDATE tr_leaves SET status = 'approved' WHERE id = 7;\n\
         SELECT id FROM missing_table WHERE id = 1;\n\
         DELETE FROM tr_leaves WHERE status = 'cancelled';",
    );

    let (_, body) = post_json(
        &app.router,
        "/api/query",
        json!({ "question": "approve, check, clean up", "user_id": ADMIN_ID }),
    )
    .await;

    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "1 of 3 statements failed");
    assert_eq!(body["operation"], "multi_write");
    assert_eq!(body["query_count"], 3);
    assert_eq!(body["successful_queries"], 2);
    assert_eq!(body["failed_queries"], 1);
    assert_eq!(body["explanation"], "Executed 3 SQL statements");

    let results = body["query_results"].as_array().unwrap();
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[0]["rows_affected"], 3);
    assert_eq!(results[1]["success"], false);
    assert!(results[1]["error"].as_str().unwrap().contains("missing_table"));
    assert_eq!(results[2]["success"], true);
    assert_eq!(results[2]["rows_affected"], 4);

    assert_eq!(app.executed().len(), 3);
}

#[tokio::test]
async fn all_reads_are_labelled_multi_read() {
    let app = spawn_app("SELECT id FROM leave_types; SELECT id FROM departments");

    let (_, body) = post_json(
        &app.router,
        "/api/query",
        json!({ "question": "types and departments", "user_id": ADMIN_ID }),
    )
    .await;

    assert_eq!(body["success"], true);
    assert_eq!(body["operation"], "multi_read");
    assert_eq!(body["total_row_count"], 4);
    assert_eq!(body["sql"], "SELECT id FROM leave_types;\nSELECT id FROM departments;");
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn generate_only_batch_joins_statements() {
    let app = spawn_app("SELECT 1; SELECT 2");

    let (_, body) = post_json(
        &app.router,
        "/api/generate-sql",
        json!({ "question": "two numbers", "user_id": ADMIN_ID }),
    )
    .await;

    assert_eq!(body["success"], true);
    assert_eq!(body["sql"], "SELECT 1;\nSELECT 2;");
    assert_eq!(body["metadata"]["statement_count"], 2);
    assert!(app.executed().is_empty());
}

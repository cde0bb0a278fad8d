//! Integration tests for identity-aware validation.

mod common;

use common::{post_json, spawn_app, ADMIN_ID, EMPLOYEE_ID, HR_ID, MANAGER_ID, OUTSIDER_ID};
use serde_json::{json, Value};

async fn generate(response: &str, user_id: Option<&str>) -> Value {
    let app = spawn_app(response);
    let mut body = json!({ "question": "test question" });
    if let Some(user_id) = user_id {
        body["user_id"] = json!(user_id);
    }
    let (_, body) = post_json(&app.router, "/api/generate-sql", body).await;
    body
}

fn validation_errors(body: &Value) -> Vec<String> {
    body["metadata"]["validation_errors"]
        .as_array()
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| e.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn system_identity_cannot_use_the_user_placeholder() {
    let body = generate("SELECT * FROM tr_leaves WHERE employee_id = $CURRENT_USER_ID", None).await;

    assert_eq!(body["success"], false);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Security validation failed"));
    assert!(validation_errors(&body)
        .iter()
        .any(|e| e.contains("no user identity is available")));
    assert_eq!(body["metadata"]["role_level"], 0);
}

#[tokio::test]
async fn unknown_principal_gets_baseline_level() {
    let body = generate("SELECT id FROM leave_types", Some(OUTSIDER_ID)).await;

    assert_eq!(body["success"], true);
    assert_eq!(body["metadata"]["role_level"], 1);
}

#[tokio::test]
async fn drop_is_rejected_even_for_admins() {
    let app = spawn_app("DROP TABLE employees");

    let (_, body) = post_json(
        &app.router,
        "/api/query",
        json!({ "question": "remove employees", "user_id": ADMIN_ID }),
    )
    .await;

    assert_eq!(body["success"], false);
    assert!(validation_errors(&body).contains(&"Dangerous operation 'DROP' not allowed".to_string()));
    assert!(app.executed().is_empty());
}

#[tokio::test]
async fn salary_requires_hr_level() {
    let sql = "SELECT first_name, last_name, salary FROM employees WHERE status = 'active'";

    let employee = generate(sql, Some(EMPLOYEE_ID)).await;
    assert_eq!(employee["success"], false);
    assert!(validation_errors(&employee)
        .iter()
        .any(|e| e.starts_with("Insufficient privileges") && e.contains("salary")));

    let hr = generate(sql, Some(HR_ID)).await;
    assert_eq!(hr["success"], true);
    assert_eq!(hr["metadata"]["role_level"], 4);
}

#[tokio::test]
async fn managers_may_filter_on_direct_reports_only() {
    let sql = format!("SELECT * FROM tr_leaves WHERE employee_id = '{}'", EMPLOYEE_ID);
    let manager = generate(&sql, Some(MANAGER_ID)).await;
    assert_eq!(manager["success"], true);

    let sql = format!("SELECT * FROM tr_leaves WHERE employee_id = '{}'", MANAGER_ID);
    let employee = generate(&sql, Some(EMPLOYEE_ID)).await;
    assert_eq!(employee["success"], false);
}

#[tokio::test]
async fn unbounded_delete_needs_an_administrator() {
    let sql = "DELETE FROM tr_leaves";

    let hr = generate(sql, Some(HR_ID)).await;
    assert_eq!(hr["success"], false);

    let admin = generate(sql, Some(ADMIN_ID)).await;
    assert_eq!(admin["success"], true);
}

#[tokio::test]
async fn one_bad_statement_rejects_the_whole_batch() {
    let app = spawn_app(
        "SELECT id FROM leave_types; SELECT salary FROM employees WHERE status = 'active'",
    );

    let (_, body) = post_json(
        &app.router,
        "/api/query",
        json!({ "question": "types and pay", "user_id": EMPLOYEE_ID }),
    )
    .await;

    assert_eq!(body["success"], false);
    assert!(validation_errors(&body)
        .iter()
        .any(|e| e.starts_with("Statement 2: ")));
    assert!(app.executed().is_empty());
}

#[tokio::test]
async fn wildcard_on_employees_is_a_warning_not_an_error() {
    let body = generate("SELECT * FROM employees", Some(ADMIN_ID)).await;

    assert_eq!(body["success"], true);
    assert!(!body["metadata"]["warnings"].as_array().unwrap().is_empty());
}

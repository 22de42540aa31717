use std::env;
use std::str::FromStr;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use dealer_financing_api::application_view::shape_application;
use dealer_financing_api::db::Database;
use dealer_financing_api::errors::AppError;
use dealer_financing_api::financing_storage::FinancingStorage;
use dealer_financing_api::models::ApplicationStatus;
use dealer_financing_api::validation::validate_submission;
use serde_json::json;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use url::Url;

/// Storage tests against a migrated Postgres.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
async fn storage() -> anyhow::Result<(Database, FinancingStorage)> {
    let db_url = env::var("TEST_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    let storage = FinancingStorage::new(db.pool.clone());
    Ok((db, storage))
}

/// Unique per run so repeated runs never collide on the email dedup key.
fn unique_email(tag: &str) -> String {
    format!(
        "{}.{}@financing-tests.example.com",
        tag,
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

fn submission_body(email: &str) -> serde_json::Value {
    json!({
        "loanAmount": 24000,
        "termMonths": 60,
        "interestRate": 7.5,
        "monthlyPayment": 481.0,
        "firstName": "Casey",
        "lastName": "Nguyen",
        "email": email,
        "phone": "5553334444",
        "grossMonthlyIncome": 5000,
        "consentCreditCheck": true,
        "agreeTerms": true,
        "extraData": { "vehicleMake": "Kia", "vehicleModel": "Sportage" }
    })
}

#[tokio::test]
#[ignore]
async fn repeat_submitter_reuses_customer() -> anyhow::Result<()> {
    let (db, storage) = storage().await?;
    let email = unique_email("repeat");

    let first = validate_submission(&submission_body(&email)).unwrap();
    let mut second_body = submission_body(&email.to_uppercase());
    second_body["firstName"] = json!("Someone");
    let second = validate_submission(&second_body).unwrap();

    let a = storage.submit(&first).await?;
    let b = storage.submit(&second).await?;

    assert!(a.customer_created);
    assert!(!b.customer_created);
    assert_eq!(a.customer_id, b.customer_id);
    assert_ne!(a.application_id, b.application_id);

    // Existing customer data is never overwritten by a later submission
    let name: String = sqlx::query_scalar("SELECT name FROM customers WHERE id = $1")
        .bind(&a.customer_id)
        .fetch_one(&db.pool)
        .await?;
    assert_eq!(name, "Casey Nguyen");

    let provenance: String = sqlx::query_scalar("SELECT provenance FROM customers WHERE id = $1")
        .bind(&a.customer_id)
        .fetch_one(&db.pool)
        .await?;
    assert_eq!(provenance, "GUEST_LEAD");

    // Each detail row keeps what its own submission said
    let first_detail = storage
        .load_admin_record(a.application_id)
        .await?
        .and_then(|record| record.detail)
        .expect("first detail");
    let second_detail = storage
        .load_admin_record(b.application_id)
        .await?
        .and_then(|record| record.detail)
        .expect("second detail");
    assert_eq!(first_detail.first_name, "Casey");
    assert_eq!(second_detail.first_name, "Someone");
    assert_eq!(second_detail.email, email);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn submitted_application_shapes_for_admin() -> anyhow::Result<()> {
    let (_db, storage) = storage().await?;
    let email = unique_email("shape");
    let stored = storage
        .submit(&validate_submission(&submission_body(&email)).unwrap())
        .await?;

    let record = storage
        .load_admin_record(stored.application_id)
        .await?
        .expect("record exists");
    let base = Url::parse("https://dealer.example.com/uploads/financing/")?;
    let view = shape_application(record, &base, Utc::now());

    assert_eq!(view.id, stored.application_id);
    assert_eq!(view.applicant_name, "Casey Nguyen");
    assert_eq!(
        view.details.as_ref().map(|d| d.first_name.as_str()),
        Some("Casey")
    );
    let car = view.car.expect("vehicle from hint");
    assert!(car.is_virtual);
    assert_eq!(car.make, "Kia");
    assert_eq!(car.model, "Sportage");
    // no price hinted, so the loan amount stands in
    assert_eq!(car.price, 24000.0);
    assert!(view.customer.map_or(false, |c| c.is_guest_lead));

    let body = serde_json::to_value(&view.details)?;
    assert_eq!(body["firstName"], "Casey");
    Ok(())
}

#[tokio::test]
#[ignore]
async fn detail_table_without_vehicle_hint_is_model_not_ready() -> anyhow::Result<()> {
    let (db, _storage) = storage().await?;
    let db_url = env::var("TEST_DATABASE_URL")?;
    let schema = format!(
        "financing_scratch_{}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    );

    // Same tables as public, minus the vehicle_hint column
    for statement in [
        format!("CREATE SCHEMA {schema}"),
        format!("CREATE TABLE {schema}.customers (LIKE public.customers INCLUDING ALL)"),
        format!(
            "CREATE TABLE {schema}.financing_applications (LIKE public.financing_applications INCLUDING ALL)"
        ),
        format!(
            "CREATE TABLE {schema}.financing_application_details (LIKE public.financing_application_details INCLUDING ALL)"
        ),
        format!("ALTER TABLE {schema}.financing_application_details DROP COLUMN vehicle_hint"),
    ] {
        sqlx::query(&statement).execute(&db.pool).await?;
    }

    let options = PgConnectOptions::from_str(&db_url)?.options([("search_path", schema.as_str())]);
    let scratch_pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    let scratch = FinancingStorage::new(scratch_pool.clone());

    let email = unique_email("unmigrated");
    let result = scratch
        .submit(&validate_submission(&submission_body(&email)).unwrap())
        .await;
    let leftover_customers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customers")
        .fetch_one(&scratch_pool)
        .await?;

    scratch_pool.close().await;
    sqlx::query(&format!("DROP SCHEMA {schema} CASCADE"))
        .execute(&db.pool)
        .await?;

    let err = result.expect_err("detail insert must fail");
    assert!(matches!(err, AppError::ModelNotReady(_)), "{err}");
    // the transaction rolled the customer back with the failed detail
    assert_eq!(leftover_customers, 0);

    let response = err.into_response();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body: serde_json::Value = serde_json::from_slice(&bytes)?;
    assert_eq!(body["code"], "MODEL_NOT_READY");
    Ok(())
}

#[tokio::test]
#[ignore]
async fn submission_writes_pending_application_with_detail() -> anyhow::Result<()> {
    let (_db, storage) = storage().await?;
    let email = unique_email("detail");
    let stored = storage
        .submit(&validate_submission(&submission_body(&email)).unwrap())
        .await?;

    let record = storage
        .load_admin_record(stored.application_id)
        .await?
        .expect("record exists");

    assert_eq!(record.application.status, ApplicationStatus::Pending);
    assert!(record.application.approval_date.is_none());
    assert_eq!(record.application.annual_income, Some(60000.0));
    let detail = record.detail.expect("detail row");
    assert!(detail.consent_credit_check && detail.agree_terms);
    assert_eq!(
        detail.vehicle_hint().and_then(|h| h.make.as_deref()),
        Some("Kia")
    );
    Ok(())
}

#[tokio::test]
#[ignore]
async fn missing_consent_stores_nothing() -> anyhow::Result<()> {
    let (db, _storage) = storage().await?;
    let email = unique_email("consent");
    let mut body = submission_body(&email);
    body["agreeTerms"] = json!(false);

    let issues = validate_submission(&body).unwrap_err();
    assert!(issues.iter().any(|i| i.path == "agreeTerms"));

    let customers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customers WHERE lower(email) = $1")
        .bind(email.to_lowercase())
        .fetch_one(&db.pool)
        .await?;
    assert_eq!(customers, 0);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn decision_is_recorded_once() -> anyhow::Result<()> {
    let (db, storage) = storage().await?;
    let email = unique_email("decide");
    let stored = storage
        .submit(&validate_submission(&submission_body(&email)).unwrap())
        .await?;

    let approved = storage
        .decide(stored.application_id, ApplicationStatus::Approved)
        .await?;
    assert_eq!(approved.status, ApplicationStatus::Approved);
    let stamped = approved.approval_date.expect("approval date set");

    let again = storage
        .decide(stored.application_id, ApplicationStatus::Rejected)
        .await;
    assert!(matches!(again, Err(AppError::Conflict(_))));

    let current = storage
        .find_application(stored.application_id)
        .await?
        .expect("still exists");
    assert_eq!(current.status, ApplicationStatus::Approved);
    assert_eq!(current.approval_date, Some(stamped));

    // The table itself refuses a pending row with a decision timestamp
    let violation = sqlx::query(
        "UPDATE financing_applications SET status = 'PENDING' WHERE id = $1",
    )
    .bind(stored.application_id)
    .execute(&db.pool)
    .await;
    assert!(violation.is_err());
    Ok(())
}

#[tokio::test]
#[ignore]
async fn delete_removes_application_and_children() -> anyhow::Result<()> {
    let (db, storage) = storage().await?;
    let email = unique_email("delete");
    let stored = storage
        .submit(&validate_submission(&submission_body(&email)).unwrap())
        .await?;

    assert!(storage.delete_application(stored.application_id).await?);
    assert!(!storage.delete_application(stored.application_id).await?);

    let details: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM financing_application_details WHERE application_id = $1",
    )
    .bind(stored.application_id)
    .fetch_one(&db.pool)
    .await?;
    assert_eq!(details, 0);
    assert!(storage
        .load_admin_record(stored.application_id)
        .await?
        .is_none());
    Ok(())
}

#[tokio::test]
#[ignore]
async fn decide_unknown_application_is_not_found() -> anyhow::Result<()> {
    let (_db, storage) = storage().await?;
    let result = storage.decide(i32::MAX, ApplicationStatus::Approved).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    Ok(())
}

use crate::analytics::ApplicationSnapshot;
use crate::application_view::AdminApplicationRecord;
use crate::customer_resolver::resolve_customer;
use crate::errors::{AppError, ResultExt, StorageFailure};
use crate::models::{
    ApplicationStatus, ApplicationSummary, Customer, FinancingApplication,
    FinancingApplicationDetail, FinancingDocument, SaleWithCar,
};
use crate::validation::ValidatedSubmission;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

/// Result of a stored public submission.
#[derive(Debug, Clone)]
pub struct SubmittedApplication {
    pub application_id: i32,
    pub customer_id: String,
    pub customer_created: bool,
}

/// Database storage for financing applications and their questionnaires.
#[derive(Clone)]
pub struct FinancingStorage {
    pool: PgPool,
}

impl FinancingStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stores a validated submission: resolve customer, create the application, create
    /// its detail row. All three run in one transaction, so either every row exists
    /// or none does.
    pub async fn submit(
        &self,
        submission: &ValidatedSubmission,
    ) -> Result<SubmittedApplication, AppError> {
        let submitted_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        // Step 1: Find or create the customer
        let customer = resolve_customer(&mut tx, submission, submitted_at)
            .await
            .context("resolving customer for financing submission")?;

        // Step 2: Core loan record, always PENDING
        let application_id = insert_application(&mut tx, &customer.id, submission, submitted_at)
            .await
            .context("creating financing application")?;

        // Step 3: Questionnaire
        insert_detail(&mut tx, application_id, submission)
            .await
            .map_err(|e| match StorageFailure::classify(&e) {
                StorageFailure::ModelNotReady => AppError::ModelNotReady(format!(
                    "financing_application_details is not migrated: {}",
                    e
                )),
                _ => AppError::DatabaseError(e),
            })?;

        tx.commit()
            .await
            .context("committing financing submission")?;

        tracing::info!(
            application_id,
            customer_id = %customer.id,
            customer_created = customer.created,
            "Financing application submitted"
        );

        Ok(SubmittedApplication {
            application_id,
            customer_id: customer.id,
            customer_created: customer.created,
        })
    }

    pub async fn find_application(
        &self,
        id: i32,
    ) -> Result<Option<FinancingApplication>, AppError> {
        let application = sqlx::query_as::<_, FinancingApplication>(
            "SELECT * FROM financing_applications WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(application)
    }

    /// Loads an application with every relation the admin view needs.
    /// The reads are independent; they do not share a snapshot.
    pub async fn load_admin_record(
        &self,
        id: i32,
    ) -> Result<Option<AdminApplicationRecord>, AppError> {
        let Some(application) = self.find_application(id).await? else {
            return Ok(None);
        };

        let customer =
            sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1")
                .bind(&application.customer_id)
                .fetch_optional(&self.pool)
                .await
                .context("loading applicant customer")?;

        // Null for rows written outside the transactional submit path
        let detail = sqlx::query_as::<_, FinancingApplicationDetail>(
            "SELECT * FROM financing_application_details WHERE application_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("loading application detail")?;

        let sale = sqlx::query_as::<_, SaleWithCar>(
            r#"
            SELECT s.id AS sale_id, s.sale_price, s.sale_date,
                   c.id AS car_id, c.make, c.model, c.year, c.price AS car_price, c.images
            FROM sales s
            JOIN cars c ON c.id = s.car_id
            WHERE s.financing_application_id = $1
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("loading linked sale")?;

        let documents = sqlx::query_as::<_, FinancingDocument>(
            "SELECT * FROM financing_documents WHERE application_id = $1 ORDER BY uploaded_at ASC, id ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .context("loading application documents")?;

        Ok(Some(AdminApplicationRecord {
            application,
            customer,
            detail,
            sale,
            documents,
        }))
    }

    /// Hard delete: documents and detail first, then the application.
    /// Returns false when the application no longer exists.
    pub async fn delete_application(&self, id: i32) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let documents = sqlx::query("DELETE FROM financing_documents WHERE application_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("deleting application documents")?;

        sqlx::query("DELETE FROM financing_application_details WHERE application_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("deleting application detail")?;

        // A completed sale outlives its financing record
        sqlx::query(
            "UPDATE sales SET financing_application_id = NULL WHERE financing_application_id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("unlinking sale")?;

        let deleted = sqlx::query("DELETE FROM financing_applications WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("deleting financing application")?;

        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        tracing::info!(
            application_id = id,
            documents_removed = documents.rows_affected(),
            "Financing application deleted"
        );
        Ok(true)
    }

    /// Moves a PENDING application to a terminal status and stamps `approval_date`.
    /// The timestamp is written by the same statement that checks the current status,
    /// so it is set exactly once.
    pub async fn decide(
        &self,
        id: i32,
        decision: ApplicationStatus,
    ) -> Result<FinancingApplication, AppError> {
        if !decision.is_terminal() {
            return Err(AppError::BadRequest(
                "Status must be APPROVED or REJECTED".to_string(),
            ));
        }

        let updated = sqlx::query_as::<_, FinancingApplication>(
            r#"
            UPDATE financing_applications
            SET status = $2, approval_date = now()
            WHERE id = $1 AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(decision.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("recording financing decision")?;

        match updated {
            Some(application) => {
                tracing::info!(
                    application_id = id,
                    status = %application.status,
                    "Financing application decided"
                );
                Ok(application)
            }
            None => match self.find_application(id).await? {
                Some(existing) => Err(AppError::Conflict(format!(
                    "Financing application {} is already {}",
                    id, existing.status
                ))),
                None => Err(AppError::NotFound(format!(
                    "Financing application {} not found",
                    id
                ))),
            },
        }
    }

    /// Newest first, with the applicant name taken from the detail row when present.
    pub async fn list_applications(
        &self,
        status: Option<ApplicationStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ApplicationSummary>, i64), AppError> {
        let status = status.map(ApplicationStatus::as_str);

        let items = sqlx::query_as::<_, ApplicationSummary>(
            r#"
            SELECT fa.id, fa.status, fa.loan_amount, fa.term_months,
                   fa.application_date, fa.approval_date, fa.customer_id,
                   COALESCE(
                       NULLIF(TRIM(CONCAT_WS(' ', d.first_name, d.last_name)), ''),
                       c.name
                   ) AS applicant_name
            FROM financing_applications fa
            JOIN customers c ON c.id = fa.customer_id
            LEFT JOIN financing_application_details d ON d.application_id = fa.id
            WHERE ($1::text IS NULL OR fa.status = $1)
            ORDER BY fa.application_date DESC, fa.id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("listing financing applications")?;

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM financing_applications WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .context("counting financing applications")?;

        Ok((items, total))
    }

    /// Applications submitted from `since` up to `until`, with the customer's birth date.
    pub async fn analytics_snapshots(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ApplicationSnapshot>, AppError> {
        let rows = sqlx::query_as::<_, ApplicationSnapshot>(
            r#"
            SELECT fa.loan_amount, fa.status, fa.application_date, fa.approval_date,
                   c.date_of_birth
            FROM financing_applications fa
            LEFT JOIN customers c ON c.id = fa.customer_id
            WHERE fa.application_date >= $1 AND fa.application_date <= $2
            "#,
        )
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .context("loading analytics window")?;

        Ok(rows)
    }
}

async fn insert_application(
    conn: &mut PgConnection,
    customer_id: &str,
    submission: &ValidatedSubmission,
    submitted_at: DateTime<Utc>,
) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO financing_applications (
            customer_id, loan_amount, interest_rate, term_months, monthly_payment,
            status, application_date, approval_date, credit_score, annual_income
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, $8, $9)
        RETURNING id
        "#,
    )
    .bind(customer_id)
    .bind(submission.loan_amount)
    .bind(submission.interest_rate)
    .bind(submission.term_months)
    .bind(submission.monthly_payment)
    .bind(ApplicationStatus::Pending.as_str())
    .bind(submitted_at)
    .bind(submission.credit_score)
    .bind(submission.derived_annual_income())
    .fetch_one(&mut *conn)
    .await
}

async fn insert_detail(
    conn: &mut PgConnection,
    application_id: i32,
    submission: &ValidatedSubmission,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO financing_application_details (
            application_id, first_name, last_name, email, phone, date_of_birth, id_number,
            address, city, state, zip_code,
            housing_status, monthly_housing_payment,
            employment_status, employer_name, job_title, years_employed,
            gross_monthly_income, other_income, other_income_source,
            credit_score_range, down_payment, preferred_contact_method,
            has_trade_in, trade_in_details,
            co_applicant_name, co_applicant_income, co_applicant_relationship,
            consent_credit_check, agree_terms, vehicle_hint
        )
        VALUES (
            $1, $2, $3, $4, $5, $6, $7,
            $8, $9, $10, $11,
            $12, $13,
            $14, $15, $16, $17,
            $18, $19, $20,
            $21, $22, $23,
            $24, $25,
            $26, $27, $28,
            $29, $30, $31
        )
        "#,
    )
    .bind(application_id)
    .bind(&submission.first_name)
    .bind(&submission.last_name)
    .bind(&submission.email)
    .bind(&submission.phone)
    .bind(submission.date_of_birth)
    .bind(&submission.id_number)
    .bind(&submission.address)
    .bind(&submission.city)
    .bind(&submission.state)
    .bind(&submission.zip_code)
    .bind(&submission.housing_status)
    .bind(submission.monthly_housing_payment)
    .bind(&submission.employment_status)
    .bind(&submission.employer_name)
    .bind(&submission.job_title)
    .bind(submission.years_employed)
    .bind(submission.gross_monthly_income)
    .bind(submission.other_income)
    .bind(&submission.other_income_source)
    .bind(&submission.credit_score_range)
    .bind(submission.down_payment)
    .bind(&submission.preferred_contact_method)
    .bind(submission.has_trade_in)
    .bind(&submission.trade_in_details)
    .bind(&submission.co_applicant_name)
    .bind(submission.co_applicant_income)
    .bind(&submission.co_applicant_relationship)
    .bind(submission.consent_credit_check)
    .bind(submission.agree_terms)
    .bind(submission.vehicle_hint.clone().map(Json))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

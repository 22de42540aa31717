use crate::models::CustomerProvenance;
use crate::validation::ValidatedSubmission;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgConnection;

const EMAIL_SUFFIX_MAX_LEN: usize = 40;
/// 64 bits of SHA-256.
const EMAIL_DIGEST_HEX_LEN: usize = 16;

/// Outcome of find-or-create by email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCustomer {
    pub id: String,
    /// True when this submission created the row.
    pub created: bool,
}

/// Finds the oldest customer sharing the submission's email, or creates a guest lead.
///
/// An existing customer is never updated: a repeat applicant's new phone or address
/// only lands in the new detail row. There is no unique constraint on email, so two
/// concurrent first submissions can each create a row.
pub async fn resolve_customer(
    conn: &mut PgConnection,
    submission: &ValidatedSubmission,
    submitted_at: DateTime<Utc>,
) -> Result<ResolvedCustomer, sqlx::Error> {
    let existing = sqlx::query_scalar::<_, String>(
        "SELECT id FROM customers WHERE lower(email) = $1 ORDER BY created_at ASC LIMIT 1",
    )
    .bind(&submission.email)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(id) = existing {
        tracing::debug!("Reusing customer {} for financing submission", id);
        return Ok(ResolvedCustomer { id, created: false });
    }

    let id = guest_customer_id(&submission.email, submitted_at);

    sqlx::query(
        r#"
        INSERT INTO customers (
            id, name, email, phone, address, city, state, zip_code,
            date_of_birth, provenance, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(&id)
    .bind(submission.full_name())
    .bind(&submission.email)
    .bind(&submission.phone)
    .bind(&submission.address)
    .bind(&submission.city)
    .bind(&submission.state)
    .bind(&submission.zip_code)
    .bind(submission.date_of_birth)
    .bind(CustomerProvenance::GuestLead.as_str())
    .bind(submitted_at)
    .execute(&mut *conn)
    .await?;

    tracing::info!("Created guest lead customer {}", id);
    Ok(ResolvedCustomer { id, created: true })
}

/// Identifier for a new guest lead: submission time in milliseconds, a readable
/// sanitized email suffix, and a digest of the full normalized email. Distinct emails
/// never share an id, even within the same millisecond.
pub fn guest_customer_id(email: &str, submitted_at: DateTime<Utc>) -> String {
    format!(
        "cust_{}_{}_{}",
        submitted_at.timestamp_millis(),
        sanitize_email(email),
        email_digest(email)
    )
}

fn email_digest(email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.trim().to_lowercase().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..EMAIL_DIGEST_HEX_LEN].to_string()
}

fn sanitize_email(email: &str) -> String {
    let mut sanitized = String::with_capacity(email.len());
    let mut last_was_separator = false;

    for c in email.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            sanitized.push(c);
            last_was_separator = false;
        } else if !last_was_separator {
            sanitized.push('_');
            last_was_separator = true;
        }
        if sanitized.len() >= EMAIL_SUFFIX_MAX_LEN {
            break;
        }
    }

    sanitized.trim_matches('_').to_string()
}

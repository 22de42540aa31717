use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

// ============ Enumerations ============

/// Lifecycle of a financing application. Only PENDING may transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "PENDING",
            ApplicationStatus::Approved => "APPROVED",
            ApplicationStatus::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ApplicationStatus::Pending)
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ApplicationStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "PENDING" => Ok(ApplicationStatus::Pending),
            "APPROVED" => Ok(ApplicationStatus::Approved),
            "REJECTED" => Ok(ApplicationStatus::Rejected),
            other => Err(format!("unknown financing status '{}'", other)),
        }
    }
}

/// Where a customer row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomerProvenance {
    /// Created through an authenticated account or by staff.
    Registered,
    /// Created implicitly from an anonymous public submission.
    GuestLead,
}

impl CustomerProvenance {
    pub fn as_str(self) -> &'static str {
        match self {
            CustomerProvenance::Registered => "REGISTERED",
            CustomerProvenance::GuestLead => "GUEST_LEAD",
        }
    }
}

impl TryFrom<String> for CustomerProvenance {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "REGISTERED" => Ok(CustomerProvenance::Registered),
            "GUEST_LEAD" => Ok(CustomerProvenance::GuestLead),
            other => Err(format!("unknown customer provenance '{}'", other)),
        }
    }
}

// ============ Database Models ============

/// A person who applied for financing, possibly created implicitly.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    /// Natural dedup key for anonymous flows (stored lowercased).
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    /// Required for age-group analytics; customers without it are left out of that histogram.
    pub date_of_birth: Option<NaiveDate>,
    #[sqlx(try_from = "String")]
    pub provenance: CustomerProvenance,
    pub created_at: DateTime<Utc>,
}

/// The loan request itself.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancingApplication {
    pub id: i32,
    pub customer_id: String,
    pub loan_amount: f64,
    /// Percent, e.g. 6.9.
    pub interest_rate: f64,
    pub term_months: i32,
    pub monthly_payment: f64,
    #[sqlx(try_from = "String")]
    pub status: ApplicationStatus,
    pub application_date: DateTime<Utc>,
    /// Null while PENDING; written once on the terminal decision.
    pub approval_date: Option<DateTime<Utc>>,
    pub credit_score: Option<i32>,
    pub annual_income: Option<f64>,
}

/// Vehicle the applicant was looking at when no car or sale is linked yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleHint {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub cash_price: Option<f64>,
    pub vehicle_price: Option<f64>,
    pub price: Option<f64>,
    pub image_url: Option<String>,
}

impl VehicleHint {
    pub fn is_empty(&self) -> bool {
        *self == VehicleHint::default()
    }
}

/// Extended applicant questionnaire, 1:1 with [`FinancingApplication`].
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancingApplicationDetail {
    pub application_id: i32,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub date_of_birth: Option<NaiveDate>,
    pub id_number: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub housing_status: Option<String>,
    pub monthly_housing_payment: Option<f64>,
    pub employment_status: Option<String>,
    pub employer_name: Option<String>,
    pub job_title: Option<String>,
    pub years_employed: Option<f64>,
    pub gross_monthly_income: Option<f64>,
    pub other_income: Option<f64>,
    pub other_income_source: Option<String>,
    pub credit_score_range: Option<String>,
    pub down_payment: Option<f64>,
    pub preferred_contact_method: Option<String>,
    pub has_trade_in: bool,
    pub trade_in_details: Option<String>,
    pub co_applicant_name: Option<String>,
    pub co_applicant_income: Option<f64>,
    pub co_applicant_relationship: Option<String>,
    pub consent_credit_check: bool,
    pub agree_terms: bool,
    pub vehicle_hint: Option<sqlx::types::Json<VehicleHint>>,
    pub created_at: DateTime<Utc>,
}

impl FinancingApplicationDetail {
    pub fn vehicle_hint(&self) -> Option<&VehicleHint> {
        self.vehicle_hint.as_ref().map(|hint| &hint.0)
    }
}

/// Sale linked to an application, joined with its car.
#[derive(Debug, Clone, FromRow)]
pub struct SaleWithCar {
    pub sale_id: i32,
    pub sale_price: f64,
    pub sale_date: DateTime<Utc>,
    pub car_id: i32,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub car_price: f64,
    pub images: Vec<String>,
}

/// Uploaded document metadata. The file itself lives in the blob store.
#[derive(Debug, Clone, FromRow)]
pub struct FinancingDocument {
    pub id: i32,
    pub application_id: i32,
    pub document_type: String,
    pub file_name: String,
    pub file_url: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// One row of the admin application list.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSummary {
    pub id: i32,
    #[sqlx(try_from = "String")]
    pub status: ApplicationStatus,
    pub loan_amount: f64,
    pub term_months: i32,
    pub application_date: DateTime<Utc>,
    pub approval_date: Option<DateTime<Utc>>,
    pub customer_id: String,
    pub applicant_name: String,
}

// ============ API Request/Response Models ============

/// Response for an accepted public submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub id: i32,
    pub status: ApplicationStatus,
}

/// Body of `PATCH /api/admin/financing/:id/status`.
#[derive(Debug, Deserialize)]
pub struct StatusDecisionRequest {
    pub status: String,
}

/// Query parameters for the admin application list.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationListQuery {
    pub status: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationListResponse {
    pub items: Vec<ApplicationSummary>,
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
}

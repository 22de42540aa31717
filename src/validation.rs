//! Schema validation for public financing submissions.
//!
//! Every check runs before any storage call. A submission either yields a fully
//! typed [`ValidatedSubmission`] or the complete list of field-level issues.

use crate::models::VehicleHint;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

pub const MIN_LOAN_AMOUNT: f64 = 1000.0;
pub const MIN_TERM_MONTHS: i64 = 12;
pub const MAX_INTEREST_RATE: f64 = 40.0;
pub const MIN_PHONE_LENGTH: usize = 10;

/// A single rejected field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Dotted path of the offending field, e.g. `extraData.vehicleYear`.
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A submission that passed every check, with optional fields defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSubmission {
    pub loan_amount: f64,
    pub term_months: i32,
    pub interest_rate: f64,
    pub monthly_payment: f64,
    pub first_name: String,
    pub last_name: String,
    /// Trimmed and lowercased.
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
    pub annual_income: Option<f64>,
    pub credit_score: Option<i32>,
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
    pub vehicle_hint: Option<VehicleHint>,
}

impl ValidatedSubmission {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Explicit annual income wins; otherwise twelve months of gross monthly income.
    pub fn derived_annual_income(&self) -> Option<f64> {
        self.annual_income
            .or_else(|| self.gross_monthly_income.map(|monthly| monthly * 12.0))
    }
}

/// Validates an arbitrary JSON body against the submission schema.
pub fn validate_submission(body: &Value) -> Result<ValidatedSubmission, Vec<ValidationIssue>> {
    let Some(object) = body.as_object() else {
        return Err(vec![ValidationIssue::new("", "Expected a JSON object")]);
    };

    let mut fields = FieldReader::new(object, "");

    let loan_amount = fields.required_number("loanAmount", Some(MIN_LOAN_AMOUNT), None);
    let term_months = fields.required_integer("termMonths", MIN_TERM_MONTHS);
    let interest_rate = fields.number("interestRate", Some(0.0), Some(MAX_INTEREST_RATE));
    let monthly_payment = fields.number("monthlyPayment", Some(0.0), None);

    let first_name = fields.required_string("firstName", 1);
    let last_name = fields.required_string("lastName", 1);
    let email = fields.required_email("email");
    let phone = fields.required_string("phone", MIN_PHONE_LENGTH);
    let date_of_birth = fields.past_date("dateOfBirth");

    let id_number = fields.string("idNumber");
    let address = fields.string("address");
    let city = fields.string("city");
    let state = fields.string("state");
    let zip_code = fields.string("zipCode");

    let housing_status = fields.string("housingStatus");
    let monthly_housing_payment = fields.number("monthlyHousingPayment", Some(0.0), None);
    let employment_status = fields.string("employmentStatus");
    let employer_name = fields.string("employerName");
    let job_title = fields.string("jobTitle");
    let years_employed = fields.number("yearsEmployed", Some(0.0), None);

    let gross_monthly_income = fields.number("grossMonthlyIncome", Some(0.0), None);
    let other_income = fields.number("otherIncome", Some(0.0), None);
    let other_income_source = fields.string("otherIncomeSource");
    let annual_income = fields.number("annualIncome", Some(0.0), None);
    let credit_score = fields.integer("creditScore", 0, 1000);
    let credit_score_range = fields.string("creditScoreRange");
    let down_payment = fields.number("downPayment", Some(0.0), None);
    let preferred_contact_method = fields.string("preferredContactMethod");

    let has_trade_in = fields.boolean("hasTradeIn").unwrap_or(false);
    let trade_in_details = fields.string("tradeInDetails");

    let co_applicant_name = fields.string("coApplicantName");
    let co_applicant_income = fields.number("coApplicantIncome", Some(0.0), None);
    let co_applicant_relationship = fields.string("coApplicantRelationship");

    let consent_credit_check = fields.required_true("consentCreditCheck");
    let agree_terms = fields.required_true("agreeTerms");

    let vehicle_hint = fields.vehicle_hint("extraData");

    if !fields.issues.is_empty() {
        return Err(fields.issues);
    }

    // Every required reader pushed an issue when it returned None.
    match (
        loan_amount,
        term_months,
        first_name,
        last_name,
        email,
        phone,
    ) {
        (
            Some(loan_amount),
            Some(term_months),
            Some(first_name),
            Some(last_name),
            Some(email),
            Some(phone),
        ) => Ok(ValidatedSubmission {
            loan_amount,
            term_months,
            interest_rate: interest_rate.unwrap_or(0.0),
            monthly_payment: monthly_payment.unwrap_or(0.0),
            first_name,
            last_name,
            email,
            phone,
            date_of_birth,
            id_number,
            address,
            city,
            state,
            zip_code,
            housing_status,
            monthly_housing_payment,
            employment_status,
            employer_name,
            job_title,
            years_employed,
            gross_monthly_income,
            other_income,
            other_income_source,
            annual_income,
            credit_score,
            credit_score_range,
            down_payment,
            preferred_contact_method,
            has_trade_in,
            trade_in_details,
            co_applicant_name,
            co_applicant_income,
            co_applicant_relationship,
            consent_credit_check,
            agree_terms,
            vehicle_hint,
        }),
        _ => Err(vec![ValidationIssue::new("", "Incomplete submission")]),
    }
}

/// Validate email address format (simplified RFC 5322).
pub fn is_valid_email(email: &str) -> bool {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();

    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    let email_regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
        )
        .expect("email regex is valid")
    });

    email_regex.is_match(email)
}

/// Reads typed fields out of a JSON object, collecting issues instead of failing fast.
struct FieldReader<'a> {
    object: &'a Map<String, Value>,
    prefix: &'a str,
    issues: Vec<ValidationIssue>,
}

impl<'a> FieldReader<'a> {
    fn new(object: &'a Map<String, Value>, prefix: &'a str) -> Self {
        Self {
            object,
            prefix,
            issues: Vec::new(),
        }
    }

    fn path(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.prefix, key)
        }
    }

    fn issue(&mut self, key: &str, message: impl Into<String>) {
        let path = self.path(key);
        self.issues.push(ValidationIssue::new(path, message));
    }

    /// Null, absent, and blank strings all count as "not provided".
    fn present(&self, key: &str) -> Option<&'a Value> {
        match self.object.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(value) => Some(value),
        }
    }

    fn string(&mut self, key: &str) -> Option<String> {
        match self.present(key)? {
            Value::String(s) => Some(s.trim().to_string()),
            _ => {
                self.issue(key, "Expected a string");
                None
            }
        }
    }

    fn required_string(&mut self, key: &str, min_len: usize) -> Option<String> {
        if self.present(key).is_none() {
            self.issue(key, "Required");
            return None;
        }
        let value = self.string(key)?;
        if value.chars().count() < min_len {
            self.issue(
                key,
                format!("Must contain at least {} character(s)", min_len),
            );
            return None;
        }
        Some(value)
    }

    fn required_email(&mut self, key: &str) -> Option<String> {
        let email = self.required_string(key, 1)?.to_lowercase();
        if !is_valid_email(&email) {
            self.issue(key, "Invalid email");
            return None;
        }
        Some(email)
    }

    /// Accepts JSON numbers and numeric strings, as form posts often send both.
    fn number(&mut self, key: &str, min: Option<f64>, max: Option<f64>) -> Option<f64> {
        let parsed = match self.present(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        let Some(value) = parsed.filter(|v| v.is_finite()) else {
            self.issue(key, "Expected a number");
            return None;
        };
        if let Some(min) = min {
            if value < min {
                self.issue(key, format!("Must be greater than or equal to {}", min));
                return None;
            }
        }
        if let Some(max) = max {
            if value > max {
                self.issue(key, format!("Must be less than or equal to {}", max));
                return None;
            }
        }
        Some(value)
    }

    fn required_number(&mut self, key: &str, min: Option<f64>, max: Option<f64>) -> Option<f64> {
        if self.present(key).is_none() {
            self.issue(key, "Required");
            return None;
        }
        self.number(key, min, max)
    }

    fn integer(&mut self, key: &str, min: i64, max: i64) -> Option<i32> {
        let value = self.number(key, None, None)?;
        if value.fract() != 0.0 {
            self.issue(key, "Expected a whole number");
            return None;
        }
        if value < min as f64 || value > max as f64 {
            self.issue(key, format!("Must be between {} and {}", min, max));
            return None;
        }
        Some(value as i32)
    }

    fn required_integer(&mut self, key: &str, min: i64) -> Option<i32> {
        if self.present(key).is_none() {
            self.issue(key, "Required");
            return None;
        }
        self.integer(key, min, i32::MAX as i64)
    }

    fn boolean(&mut self, key: &str) -> Option<bool> {
        match self.present(key)? {
            Value::Bool(b) => Some(*b),
            _ => {
                self.issue(key, "Expected a boolean");
                None
            }
        }
    }

    /// Consent flags must be the literal `true`.
    fn required_true(&mut self, key: &str) -> bool {
        match self.object.get(key) {
            Some(Value::Bool(true)) => true,
            Some(Value::Bool(false)) => {
                self.issue(key, "Must be accepted");
                false
            }
            None | Some(Value::Null) => {
                self.issue(key, "Required");
                false
            }
            Some(_) => {
                self.issue(key, "Expected a boolean");
                false
            }
        }
    }

    /// `YYYY-MM-DD` or an RFC 3339 timestamp; must not lie in the future.
    fn past_date(&mut self, key: &str) -> Option<NaiveDate> {
        let raw = self.string(key)?;
        let parsed = NaiveDate::parse_from_str(&raw, "%Y-%m-%d").ok().or_else(|| {
            DateTime::parse_from_rfc3339(&raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc).date_naive())
        });
        let Some(date) = parsed else {
            self.issue(key, "Expected a date (YYYY-MM-DD)");
            return None;
        };
        if date > Utc::now().date_naive() {
            self.issue(key, "Date cannot be in the future");
            return None;
        }
        Some(date)
    }

    fn vehicle_hint(&mut self, key: &str) -> Option<VehicleHint> {
        let object = match self.present(key)? {
            Value::Object(object) => object,
            _ => {
                self.issue(key, "Expected an object");
                return None;
            }
        };

        let path = self.path(key);
        let mut nested = FieldReader::new(object, &path);
        let hint = VehicleHint {
            make: nested.string("vehicleMake"),
            model: nested.string("vehicleModel"),
            year: nested.integer("vehicleYear", 1886, 2100),
            cash_price: nested.number("cashPrice", Some(0.0), None),
            vehicle_price: nested.number("vehiclePrice", Some(0.0), None),
            price: nested.number("price", Some(0.0), None),
            image_url: nested.string("vehicleImage"),
        };
        let nested_issues = std::mem::take(&mut nested.issues);
        self.issues.extend(nested_issues);

        if hint.is_empty() {
            None
        } else {
            Some(hint)
        }
    }
}

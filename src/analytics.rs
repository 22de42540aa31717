//! Rolling six-month rollups over financing applications.
//!
//! The aggregation itself is a pure function over [`ApplicationSnapshot`] rows so the
//! bucket rules can be exercised without a database.

use crate::errors::AppError;
use crate::financing_storage::FinancingStorage;
use crate::models::ApplicationStatus;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Number of calendar months in the window, current month included.
pub const WINDOW_MONTHS: i32 = 6;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// The fields of one application that analytics needs.
#[derive(Debug, Clone, FromRow)]
pub struct ApplicationSnapshot {
    pub loan_amount: f64,
    #[sqlx(try_from = "String")]
    pub status: ApplicationStatus,
    pub application_date: DateTime<Utc>,
    pub approval_date: Option<DateTime<Utc>>,
    /// Birth date of the applicant's customer record, if known.
    pub date_of_birth: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyBucket {
    /// `YYYY-MM`
    pub month: String,
    /// e.g. `May 2026`
    pub label: String,
    pub applications: u32,
    pub approved: u32,
    pub rejected: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBucket {
    pub range: String,
    pub count: u32,
    /// Integer share of the histogram's population.
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRatePoint {
    pub month: String,
    pub label: String,
    pub rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub total_applications: u32,
    pub approved_applications: u32,
    pub rejected_applications: u32,
    pub pending_applications: u32,
    pub approval_rate: u32,
    pub average_loan_amount: i64,
    pub average_processing_days: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancingAnalytics {
    pub monthly: Vec<MonthlyBucket>,
    pub by_loan_range: Vec<HistogramBucket>,
    pub by_age_group: Vec<HistogramBucket>,
    pub approval_rate_timeline: Vec<ApprovalRatePoint>,
    pub summary: AnalyticsSummary,
}

/// Loan-amount ranges: lower bound inclusive, upper bound exclusive.
const LOAN_RANGES: [(&str, f64, f64); 4] = [
    ("Under 50K", f64::NEG_INFINITY, 50_000.0),
    ("50K-100K", 50_000.0, 100_000.0),
    ("100K-200K", 100_000.0, 200_000.0),
    ("200K+", 200_000.0, f64::INFINITY),
];

/// Age bands: lower bound inclusive, upper bound exclusive.
const AGE_GROUPS: [(&str, i32, i32); 4] = [
    ("Under 26", i32::MIN, 26),
    ("26-35", 26, 36),
    ("36-45", 36, 46),
    ("46+", 46, i32::MAX),
];

/// First instant of the month `WINDOW_MONTHS - 1` months before `now`'s month.
pub fn window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month0) = shift_month(now.year(), now.month0(), -(WINDOW_MONTHS - 1));
    first_instant_of_month(year, month0)
}

/// Loads the window ending at `now` and aggregates it.
pub async fn load_analytics(
    storage: &FinancingStorage,
    now: DateTime<Utc>,
) -> Result<FinancingAnalytics, AppError> {
    let since = window_start(now);
    let snapshots = storage.analytics_snapshots(since, now).await?;
    tracing::debug!(
        "Aggregating {} financing applications since {}",
        snapshots.len(),
        since
    );
    Ok(compute_analytics(&snapshots, now))
}

/// Aggregates applications submitted inside the window ending at `now`.
/// Rows outside the window are ignored.
pub fn compute_analytics(snapshots: &[ApplicationSnapshot], now: DateTime<Utc>) -> FinancingAnalytics {
    let start = window_start(now);
    let today = now.date_naive();

    // Pre-seed every month so empty months still appear
    let mut monthly: Vec<MonthlyBucket> = (0..WINDOW_MONTHS)
        .map(|offset| {
            let (year, month0) = shift_month(start.year(), start.month0(), offset);
            let first = first_instant_of_month(year, month0);
            MonthlyBucket {
                month: first.format("%Y-%m").to_string(),
                label: first.format("%b %Y").to_string(),
                applications: 0,
                approved: 0,
                rejected: 0,
            }
        })
        .collect();

    let mut loan_counts = [0u32; LOAN_RANGES.len()];
    let mut age_counts = [0u32; AGE_GROUPS.len()];
    let mut total = 0u32;
    let mut approved = 0u32;
    let mut rejected = 0u32;
    let mut pending = 0u32;
    let mut loan_sum = 0.0f64;
    let mut processing_days_sum = 0.0f64;
    let mut processed = 0u32;

    for snapshot in snapshots
        .iter()
        .filter(|s| s.application_date >= start && s.application_date <= now)
    {
        total += 1;
        loan_sum += snapshot.loan_amount;

        let month_index = months_between(start, snapshot.application_date);
        let bucket = usize::try_from(month_index)
            .ok()
            .and_then(|index| monthly.get_mut(index));

        match snapshot.status {
            ApplicationStatus::Pending => pending += 1,
            ApplicationStatus::Approved => approved += 1,
            ApplicationStatus::Rejected => rejected += 1,
        }

        if let Some(bucket) = bucket {
            bucket.applications += 1;
            match snapshot.status {
                ApplicationStatus::Approved => bucket.approved += 1,
                ApplicationStatus::Rejected => bucket.rejected += 1,
                ApplicationStatus::Pending => {}
            }
        }

        if let Some(index) = LOAN_RANGES
            .iter()
            .position(|(_, low, high)| snapshot.loan_amount >= *low && snapshot.loan_amount < *high)
        {
            loan_counts[index] += 1;
        }

        if let Some(dob) = snapshot.date_of_birth {
            let age = age_on(dob, today);
            if let Some(index) = AGE_GROUPS
                .iter()
                .position(|(_, low, high)| age >= *low && age < *high)
            {
                age_counts[index] += 1;
            }
        }

        if let Some(days) = processing_days(snapshot) {
            processing_days_sum += days;
            processed += 1;
        }
    }

    let age_population: u32 = age_counts.iter().sum();

    let by_loan_range = LOAN_RANGES
        .iter()
        .zip(loan_counts)
        .map(|((label, _, _), count)| HistogramBucket {
            range: label.to_string(),
            count,
            percentage: percent(count, total),
        })
        .collect();

    let by_age_group = AGE_GROUPS
        .iter()
        .zip(age_counts)
        .map(|((label, _, _), count)| HistogramBucket {
            range: label.to_string(),
            count,
            percentage: percent(count, age_population),
        })
        .collect();

    let approval_rate_timeline = monthly
        .iter()
        .map(|bucket| ApprovalRatePoint {
            month: bucket.month.clone(),
            label: bucket.label.clone(),
            rate: percent(bucket.approved, bucket.applications),
        })
        .collect();

    let summary = AnalyticsSummary {
        total_applications: total,
        approved_applications: approved,
        rejected_applications: rejected,
        pending_applications: pending,
        approval_rate: percent(approved, total),
        average_loan_amount: if total == 0 {
            0
        } else {
            (loan_sum / f64::from(total)).round() as i64
        },
        average_processing_days: if processed == 0 {
            0.0
        } else {
            round_one_decimal(processing_days_sum / f64::from(processed))
        },
    };

    FinancingAnalytics {
        monthly,
        by_loan_range,
        by_age_group,
        approval_rate_timeline,
        summary,
    }
}

/// Whole years between `dob` and `today`, minus one if this year's birthday is still ahead.
pub fn age_on(dob: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    age
}

/// Days from submission to decision. Pending rows, and decided rows missing a
/// decision timestamp, have no duration.
pub fn processing_days(snapshot: &ApplicationSnapshot) -> Option<f64> {
    if !snapshot.status.is_terminal() {
        return None;
    }
    let decided_at = snapshot.approval_date?;
    let millis = (decided_at - snapshot.application_date).num_milliseconds();
    Some((millis as f64 / MILLIS_PER_DAY).max(0.0))
}

fn percent(part: u32, whole: u32) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((f64::from(part) * 100.0) / f64::from(whole)).round() as u32
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn shift_month(year: i32, month0: u32, delta: i32) -> (i32, u32) {
    let absolute = year * 12 + month0 as i32 + delta;
    (absolute.div_euclid(12), absolute.rem_euclid(12) as u32)
}

fn months_between(start: DateTime<Utc>, at: DateTime<Utc>) -> i32 {
    (at.year() - start.year()) * 12 + at.month0() as i32 - start.month0() as i32
}

fn first_instant_of_month(year: i32, month0: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month0 + 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap()
    }

    #[test]
    fn window_starts_five_months_back() {
        assert_eq!(window_start(at(2026, 10, 19)), Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap());
        assert_eq!(window_start(at(2026, 2, 3)), Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn age_respects_birthday() {
        let dob = NaiveDate::from_ymd_opt(2000, 10, 20).unwrap();
        assert_eq!(age_on(dob, NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()), 25);
        assert_eq!(age_on(dob, NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()), 26);
    }

    #[test]
    fn pending_has_no_processing_time() {
        let snapshot = ApplicationSnapshot {
            loan_amount: 10_000.0,
            status: ApplicationStatus::Pending,
            application_date: at(2026, 10, 1),
            approval_date: None,
            date_of_birth: None,
        };
        assert_eq!(processing_days(&snapshot), None);
    }

    #[test]
    fn processing_time_is_fractional_days() {
        let submitted = at(2026, 10, 1);
        let snapshot = ApplicationSnapshot {
            loan_amount: 10_000.0,
            status: ApplicationStatus::Approved,
            application_date: submitted,
            approval_date: Some(submitted + Duration::hours(36)),
            date_of_birth: None,
        };
        assert_eq!(processing_days(&snapshot), Some(1.5));
    }

    #[test]
    fn percent_rounds_and_guards_zero() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(5, 5), 100);
    }

    #[test]
    fn empty_window_is_all_zero() {
        let analytics = compute_analytics(&[], at(2026, 10, 19));
        assert_eq!(analytics.monthly.len(), 6);
        assert_eq!(analytics.monthly[0].month, "2026-05");
        assert_eq!(analytics.monthly[5].label, "Oct 2026");
        assert!(analytics.approval_rate_timeline.iter().all(|p| p.rate == 0));
        assert_eq!(analytics.summary.average_loan_amount, 0);
        assert_eq!(analytics.summary.average_processing_days, 0.0);
    }
}

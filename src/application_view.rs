use crate::models::{
    ApplicationStatus, Customer, CustomerProvenance, FinancingApplication,
    FinancingApplicationDetail, FinancingDocument, SaleWithCar, VehicleHint,
};
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use url::Url;

/// Everything loaded for one application before shaping.
#[derive(Debug, Clone)]
pub struct AdminApplicationRecord {
    pub application: FinancingApplication,
    pub customer: Option<Customer>,
    pub detail: Option<FinancingApplicationDetail>,
    pub sale: Option<SaleWithCar>,
    pub documents: Vec<FinancingDocument>,
}

/// Denormalized application view for the back office.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminApplicationView {
    pub id: i32,
    pub loan_amount: f64,
    pub interest_rate: f64,
    pub term_months: i32,
    pub monthly_payment: f64,
    pub status: ApplicationStatus,
    pub application_date: DateTime<Utc>,
    pub approval_date: Option<DateTime<Utc>>,
    pub credit_score: Option<i32>,
    pub annual_income: Option<f64>,
    pub customer: Option<CustomerSummary>,
    pub applicant_name: String,
    pub applicant_email: Option<String>,
    pub applicant_phone: Option<String>,
    pub details: Option<FinancingApplicationDetail>,
    pub car: Option<VehicleView>,
    pub sale: Option<SaleView>,
    pub documents: Vec<DocumentView>,
    pub completeness: Completeness,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerSummary {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub is_guest_lead: bool,
}

/// Vehicle shown next to the application. `is_virtual` marks one synthesized from
/// the applicant's vehicle hint rather than a linked car.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleView {
    pub id: Option<i32>,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub price: f64,
    pub image_url: Option<String>,
    pub is_virtual: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleView {
    pub id: i32,
    pub sale_price: f64,
    pub sale_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub id: i32,
    pub document_type: String,
    pub file_name: String,
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Data-quality signal for the admin UI. Not used for any decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completeness {
    pub filled: u32,
    pub total: u32,
    pub percentage: u32,
    pub missing: Vec<&'static str>,
}

/// Shapes a loaded record into the admin view.
pub fn shape_application(
    record: AdminApplicationRecord,
    document_base: &Url,
    now: DateTime<Utc>,
) -> AdminApplicationView {
    let AdminApplicationRecord {
        application,
        customer,
        detail,
        sale,
        documents,
    } = record;

    let detail_ref = detail.as_ref();
    let customer_ref = customer.as_ref();

    // Each field falls back independently: detail first, then customer
    let applicant_name = detail_ref
        .map(|d| format!("{} {}", d.first_name.trim(), d.last_name.trim()))
        .and_then(non_blank)
        .or_else(|| customer_ref.map(|c| c.name.clone()).and_then(non_blank))
        .unwrap_or_default();
    let applicant_email = detail_ref
        .map(|d| d.email.clone())
        .and_then(non_blank)
        .or_else(|| customer_ref.map(|c| c.email.clone()).and_then(non_blank));
    let applicant_phone = detail_ref
        .map(|d| d.phone.clone())
        .and_then(non_blank)
        .or_else(|| customer_ref.and_then(|c| c.phone.clone()).and_then(non_blank));

    let car = match &sale {
        Some(linked) => Some(linked_vehicle(linked)),
        None => detail_ref
            .and_then(FinancingApplicationDetail::vehicle_hint)
            .and_then(|hint| virtual_vehicle(hint, application.loan_amount, now)),
    };

    let completeness = completeness(
        &application,
        detail_ref,
        customer_ref,
        &applicant_name,
        applicant_email.is_some() || applicant_phone.is_some(),
    );

    let documents = documents
        .into_iter()
        .map(|doc| DocumentView {
            url: document_url(&doc, document_base),
            id: doc.id,
            document_type: doc.document_type,
            file_name: doc.file_name,
            uploaded_at: doc.uploaded_at,
        })
        .collect();

    AdminApplicationView {
        id: application.id,
        loan_amount: application.loan_amount,
        interest_rate: application.interest_rate,
        term_months: application.term_months,
        monthly_payment: application.monthly_payment,
        status: application.status,
        application_date: application.application_date,
        approval_date: application.approval_date,
        credit_score: application.credit_score,
        annual_income: application.annual_income,
        customer: customer.map(|c| CustomerSummary {
            is_guest_lead: c.provenance == CustomerProvenance::GuestLead,
            id: c.id,
            name: c.name,
            email: c.email,
            phone: c.phone,
        }),
        applicant_name,
        applicant_email,
        applicant_phone,
        car,
        sale: sale.map(|s| SaleView {
            id: s.sale_id,
            sale_price: s.sale_price,
            sale_date: s.sale_date,
        }),
        details: detail,
        documents,
        completeness,
    }
}

fn linked_vehicle(sale: &SaleWithCar) -> VehicleView {
    VehicleView {
        id: Some(sale.car_id),
        make: sale.make.clone(),
        model: sale.model.clone(),
        year: sale.year,
        price: sale.car_price,
        image_url: sale.images.first().cloned(),
        is_virtual: false,
    }
}

/// Display-only vehicle built from a hint that names at least a make or a model.
/// Price: cash price, vehicle price, generic price, then the loan amount.
/// Year: the hinted year, else the current year.
pub fn virtual_vehicle(hint: &VehicleHint, loan_amount: f64, now: DateTime<Utc>) -> Option<VehicleView> {
    let make = hint.make.clone().and_then(non_blank);
    let model = hint.model.clone().and_then(non_blank);
    if make.is_none() && model.is_none() {
        return None;
    }

    let price = hint
        .cash_price
        .or(hint.vehicle_price)
        .or(hint.price)
        .unwrap_or(loan_amount);

    Some(VehicleView {
        id: None,
        make: make.unwrap_or_default(),
        model: model.unwrap_or_default(),
        year: hint.year.unwrap_or_else(|| now.year()),
        price,
        image_url: hint.image_url.clone().and_then(non_blank),
        is_virtual: true,
    })
}

/// Stored absolute URL when there is one, else `<base><file name>`.
///
/// The file name becomes a single percent-encoded path segment under the base, so
/// `#`, `?` and separators cannot escape it. `.` and `..` are never used as segments.
pub fn document_url(doc: &FinancingDocument, base: &Url) -> String {
    if let Some(stored) = doc.file_url.as_deref() {
        if let Ok(url) = Url::parse(stored) {
            if matches!(url.scheme(), "http" | "https") {
                return url.to_string();
            }
        }
    }

    let whole = doc.file_name.trim();
    let last = whole.rsplit(['/', '\\']).next().unwrap_or(whole);
    let segment = [last, whole]
        .into_iter()
        .find(|name| is_usable_segment(name))
        .map(str::to_string)
        .unwrap_or_else(|| format!("document-{}", doc.id));

    let mut url = base.clone();
    match url.path_segments_mut() {
        Ok(mut segments) => {
            segments.pop_if_empty().push(&segment);
        }
        Err(()) => return format!("{}{}", base, segment),
    }
    url.to_string()
}

fn is_usable_segment(name: &str) -> bool {
    !matches!(name, "" | "." | "..")
}

fn completeness(
    application: &FinancingApplication,
    detail: Option<&FinancingApplicationDetail>,
    customer: Option<&Customer>,
    applicant_name: &str,
    has_contact: bool,
) -> Completeness {
    let has = |value: Option<&String>| value.is_some_and(|v| !v.trim().is_empty());

    let address = has(detail.and_then(|d| d.address.as_ref()))
        || has(customer.and_then(|c| c.address.as_ref()));
    let income = detail.is_some_and(|d| d.gross_monthly_income.is_some())
        || application.annual_income.is_some();

    let checklist: [(&'static str, bool); 7] = [
        ("name", !applicant_name.trim().is_empty()),
        ("contact", has_contact),
        ("address", address),
        ("housing", has(detail.and_then(|d| d.housing_status.as_ref()))),
        (
            "employment",
            has(detail.and_then(|d| d.employment_status.as_ref())),
        ),
        ("income", income),
        (
            "coApplicant",
            has(detail.and_then(|d| d.co_applicant_name.as_ref())),
        ),
    ];

    let total = checklist.len() as u32;
    let filled = checklist.iter().filter(|(_, ok)| *ok).count() as u32;
    let missing = checklist
        .iter()
        .filter(|(_, ok)| !*ok)
        .map(|(name, _)| *name)
        .collect();

    Completeness {
        filled,
        total,
        percentage: ((f64::from(filled) * 100.0) / f64::from(total)).round() as u32,
        missing,
    }
}

fn non_blank(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> Url {
        Url::parse("https://files.example.com/financing/").unwrap()
    }

    fn document(file_name: &str, file_url: Option<&str>) -> FinancingDocument {
        FinancingDocument {
            id: 1,
            application_id: 9,
            document_type: "PAY_STUB".to_string(),
            file_name: file_name.to_string(),
            file_url: file_url.map(str::to_string),
            uploaded_at: Utc.with_ymd_and_hms(2026, 9, 1, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn absolute_document_url_kept() {
        let doc = document("stub.pdf", Some("https://blob.example.net/abc/stub.pdf"));
        assert_eq!(document_url(&doc, &base()), "https://blob.example.net/abc/stub.pdf");
    }

    #[test]
    fn relative_document_url_falls_back_to_file_name() {
        let doc = document("pay stub.pdf", Some("uploads/pay stub.pdf"));
        assert_eq!(
            document_url(&doc, &base()),
            "https://files.example.com/financing/pay%20stub.pdf"
        );
        let doc = document("../../etc/passwd", None);
        assert_eq!(
            document_url(&doc, &base()),
            "https://files.example.com/financing/passwd"
        );
    }

    #[test]
    fn file_name_delimiters_are_encoded() {
        let doc = document("invoice#3.pdf", None);
        let url = Url::parse(&document_url(&doc, &base())).unwrap();
        assert_eq!(url.path(), "/financing/invoice%233.pdf");
        assert_eq!(url.fragment(), None);

        let doc = document("scan?v=2.pdf", None);
        let url = Url::parse(&document_url(&doc, &base())).unwrap();
        assert_eq!(url.path(), "/financing/scan%3Fv=2.pdf");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn dot_segments_stay_under_base() {
        let doc = document("uploads/..", None);
        let url = document_url(&doc, &base());
        assert_eq!(url, "https://files.example.com/financing/uploads%2F..");

        let doc = document("..", None);
        assert_eq!(
            document_url(&doc, &base()),
            "https://files.example.com/financing/document-1"
        );
    }

    #[test]
    fn virtual_vehicle_price_chain() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap();
        let mut hint = VehicleHint {
            make: Some("Honda".into()),
            model: Some("Civic".into()),
            price: Some(24_000.0),
            vehicle_price: Some(25_000.0),
            ..VehicleHint::default()
        };
        assert_eq!(virtual_vehicle(&hint, 20_000.0, now).unwrap().price, 25_000.0);

        hint.cash_price = Some(23_500.0);
        assert_eq!(virtual_vehicle(&hint, 20_000.0, now).unwrap().price, 23_500.0);

        hint.cash_price = None;
        hint.vehicle_price = None;
        hint.price = None;
        let vehicle = virtual_vehicle(&hint, 20_000.0, now).unwrap();
        assert_eq!(vehicle.price, 20_000.0);
        assert_eq!(vehicle.year, 2026);
        assert!(vehicle.is_virtual);
    }

    #[test]
    fn hint_without_make_or_model_is_not_a_vehicle() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap();
        let hint = VehicleHint {
            price: Some(30_000.0),
            year: Some(2024),
            ..VehicleHint::default()
        };
        assert!(virtual_vehicle(&hint, 20_000.0, now).is_none());
    }
}

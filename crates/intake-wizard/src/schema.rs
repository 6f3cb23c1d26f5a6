//! Step schemas: which fields each page of the application collects and the
//! rule each field must satisfy before the applicant may move past it.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate};
use intake_types::models::DocumentKind;
use serde::{Deserialize, Serialize};
use validator::ValidateEmail;

use crate::draft::Draft;

/// Draft key written by the server once the application fee is settled.
pub const PAYMENT_STATUS_KEY: &str = "paymentStatus";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// At least this many characters.
    MinLen(usize),
    Email,
    OneOf(&'static [&'static str]),
    /// A calendar date, `YYYY-MM-DD` or an RFC 3339 timestamp.
    Date,
    Equals(&'static str),
}

impl Rule {
    pub fn check(&self, value: &str) -> bool {
        match self {
            Self::MinLen(min) => value.chars().count() >= *min,
            Self::Email => value.validate_email(),
            Self::OneOf(options) => options.contains(&value),
            Self::Date => {
                NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
                    || DateTime::parse_from_rfc3339(value).is_ok()
            }
            Self::Equals(expected) => value == *expected,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    pub field: String,
    pub rule: Rule,
    pub message: &'static str,
    /// Applicant-editable. Non-editable keys are only ever set by the server.
    pub editable: bool,
}

impl FieldRule {
    fn input(field: &str, rule: Rule, message: &'static str) -> Self {
        Self {
            field: field.to_string(),
            rule,
            message,
            editable: true,
        }
    }

    fn system(field: String, rule: Rule, message: &'static str) -> Self {
        Self {
            field,
            rule,
            message,
            editable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub number: u8,
    pub name: &'static str,
    pub fields: Vec<FieldRule>,
}

impl Step {
    /// Check this step's slice of the draft. An empty result means the step
    /// is complete.
    pub fn validate(&self, draft: &Draft) -> Vec<FieldError> {
        self.fields
            .iter()
            .filter(|rule| !rule.rule.check(draft.get(&rule.field).unwrap_or("")))
            .map(|rule| FieldError {
                field: rule.field.clone(),
                message: rule.message.to_string(),
            })
            .collect()
    }

    pub fn is_valid(&self, draft: &Draft) -> bool {
        self.validate(draft).is_empty()
    }

    /// Steps without fields (review) only complete by being advanced through,
    /// never by inspecting a stored draft.
    pub fn is_derivable(&self) -> bool {
        !self.fields.is_empty()
    }
}

const YES_NO: &[&str] = &["yes", "no"];

static STEPS: LazyLock<Vec<Step>> = LazyLock::new(build_steps);

/// All wizard steps, numbered from 1.
pub fn steps() -> &'static [Step] {
    &STEPS
}

pub fn total_steps() -> u8 {
    // Fixed at nine pages; never exceeds u8.
    steps().len() as u8
}

pub fn step(number: u8) -> Option<&'static Step> {
    steps().get(usize::from(number).checked_sub(1)?)
}

/// Find the rule for a field across every step.
pub fn field_rule(field: &str) -> Option<&'static FieldRule> {
    steps()
        .iter()
        .flat_map(|step| step.fields.iter())
        .find(|rule| rule.field == field)
}

fn build_steps() -> Vec<Step> {
    use Rule::*;

    let documents = DocumentKind::REQUIRED
        .into_iter()
        .map(|kind| FieldRule::system(kind.draft_key(), MinLen(1), document_message(kind)))
        .collect();

    vec![
        Step {
            number: 1,
            name: "Personal Details",
            fields: vec![
                FieldRule::input("firstName", MinLen(2), "First name is required"),
                FieldRule::input("lastName", MinLen(2), "Last name is required"),
                FieldRule::input("email", Email, "Please enter a valid email address"),
                FieldRule::input("phone", MinLen(10), "Please enter a valid phone number"),
            ],
        },
        Step {
            number: 2,
            name: "Company Information",
            fields: vec![
                FieldRule::input("companyName", MinLen(2), "Company name is required"),
                FieldRule::input("registrationNumber", MinLen(1), "Registration number is required"),
                FieldRule::input("officialAddress", MinLen(5), "Address is required"),
                FieldRule::input("contactPerson", MinLen(2), "Contact person is required"),
                FieldRule::input("contactEmail", Email, "Please enter a valid email address"),
            ],
        },
        Step {
            number: 3,
            name: "Company Background",
            fields: vec![
                FieldRule::input("foundingYear", MinLen(4), "Please provide a valid year"),
                FieldRule::input("officeLocations", MinLen(1), "Please provide office locations"),
                FieldRule::input("industry", MinLen(1), "Please select an industry"),
                FieldRule::input("employees", MinLen(1), "Please select a range"),
            ],
        },
        Step {
            number: 4,
            name: "Funding Background",
            fields: vec![
                FieldRule::input("foreignMarkets", OneOf(YES_NO), "Please select an option"),
                FieldRule::input("previousFinancing", OneOf(YES_NO), "Please select an option"),
            ],
        },
        Step {
            number: 5,
            name: "Company Markets",
            fields: vec![
                FieldRule::input(
                    "businessModel",
                    MinLen(10),
                    "Please provide a description of your business model",
                ),
                FieldRule::input(
                    "competitiveAdvantage",
                    MinLen(10),
                    "Please describe your competitive advantage",
                ),
                FieldRule::input("competitors", MinLen(3), "Please list your major competitors"),
            ],
        },
        Step {
            number: 6,
            name: "Final Details",
            fields: vec![
                FieldRule::input("shovelReady", OneOf(YES_NO), "Please select an option"),
                FieldRule::input("financingAmount", MinLen(1), "Financing amount is required"),
                FieldRule::input("interestRate", MinLen(1), "Interest rate is required"),
                FieldRule::input("loanTerm", MinLen(1), "Loan term is required"),
                FieldRule::input("date", Date, "Please select a date"),
            ],
        },
        Step {
            number: 7,
            name: "Document Upload",
            fields: documents,
        },
        Step {
            number: 8,
            name: "Payment",
            fields: vec![FieldRule::system(
                PAYMENT_STATUS_KEY.to_string(),
                Equals("completed"),
                "Application fee payment is required",
            )],
        },
        Step {
            number: 9,
            name: "Review",
            fields: vec![],
        },
    ]
}

fn document_message(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::ProjectSummary => "Project Summary is required",
        DocumentKind::AuditedAccounts => "Audited Accounts are required",
        DocumentKind::ManagementAccounts => "2 Year Management Accounts are required",
        DocumentKind::CashFlowProjection => "5 Year Cash Flow Projection is required",
        DocumentKind::CertificateOfIncorporation => "Certificate of Incorporation is required",
        DocumentKind::PinCertificate => "PIN Certificate is required",
        DocumentKind::Cr12 => "CR12 is required",
        DocumentKind::TaxCompliance => "Tax Compliance certificate is required",
        DocumentKind::OperatingLicenses => "Operating Licenses are required",
        DocumentKind::DirectorId => "Director ID is required",
        DocumentKind::DirectorPin => "Director PIN is required",
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Returned when a stored or submitted string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// -- Roles --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Reviewer,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Reviewer => "reviewer",
            Self::Admin => "admin",
        }
    }

    /// Landing page the front end should open after login.
    pub fn home_path(self) -> &'static str {
        match self {
            Self::Admin => "/admin",
            Self::Reviewer => "/reviewer",
            Self::Client => "/dashboard",
        }
    }

    pub fn is_staff(self) -> bool {
        matches!(self, Self::Reviewer | Self::Admin)
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Self::Client),
            "reviewer" => Ok(Self::Reviewer),
            "admin" => Ok(Self::Admin),
            other => Err(UnknownVariant::new("role", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- Applications --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    Submitted,
    UnderReview,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub const ALL: [Self; 5] = [
        Self::Draft,
        Self::Submitted,
        Self::UnderReview,
        Self::Approved,
        Self::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    /// Draft moves forward only through submission; staff then walk it to a
    /// decision. Nothing leaves a terminal state.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Submitted)
                | (Self::Submitted, Self::UnderReview)
                | (Self::UnderReview, Self::Approved)
                | (Self::UnderReview, Self::Rejected)
        )
    }
}

impl FromStr for ApplicationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("application status", s))
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- Documents --

/// The fixed list of documents every application must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocumentKind {
    ProjectSummary,
    AuditedAccounts,
    ManagementAccounts,
    CashFlowProjection,
    CertificateOfIncorporation,
    PinCertificate,
    Cr12,
    TaxCompliance,
    OperatingLicenses,
    DirectorId,
    DirectorPin,
}

impl DocumentKind {
    pub const REQUIRED: [Self; 11] = [
        Self::ProjectSummary,
        Self::AuditedAccounts,
        Self::ManagementAccounts,
        Self::CashFlowProjection,
        Self::CertificateOfIncorporation,
        Self::PinCertificate,
        Self::Cr12,
        Self::TaxCompliance,
        Self::OperatingLicenses,
        Self::DirectorId,
        Self::DirectorPin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProjectSummary => "projectSummary",
            Self::AuditedAccounts => "auditedAccounts",
            Self::ManagementAccounts => "managementAccounts",
            Self::CashFlowProjection => "cashFlowProjection",
            Self::CertificateOfIncorporation => "certificateOfIncorporation",
            Self::PinCertificate => "pinCertificate",
            Self::Cr12 => "cr12",
            Self::TaxCompliance => "taxCompliance",
            Self::OperatingLicenses => "operatingLicenses",
            Self::DirectorId => "directorId",
            Self::DirectorPin => "directorPin",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::ProjectSummary => "Project Summary",
            Self::AuditedAccounts => "Audited Accounts",
            Self::ManagementAccounts => "2 Year Management Accounts",
            Self::CashFlowProjection => "5 Year Cash Flow Projection",
            Self::CertificateOfIncorporation => "Certificate of Incorporation",
            Self::PinCertificate => "PIN Certificate",
            Self::Cr12 => "CR12",
            Self::TaxCompliance => "Tax Compliance",
            Self::OperatingLicenses => "Operating Licenses",
            Self::DirectorId => "Director ID",
            Self::DirectorPin => "Director PIN",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::ProjectSummary => "A complete overview of the project",
            Self::AuditedAccounts => "Most recent audited financial statements",
            Self::ManagementAccounts => "Last 2 years of management financial reports",
            Self::CashFlowProjection => "Forecasted cash flow for the next 5 years",
            Self::CertificateOfIncorporation => "Legal document confirming company registration",
            Self::PinCertificate => "Official tax identification document",
            Self::Cr12 => "Current list of company directors and shareholders",
            Self::TaxCompliance => "Proof of tax compliance from revenue authority",
            Self::OperatingLicenses => "Industry-specific permits and licenses",
            Self::DirectorId => "Identity documents for all directors",
            Self::DirectorPin => "Personal tax identification for all directors",
        }
    }

    /// Draft key the server sets once a document of this kind is uploaded.
    pub fn draft_key(self) -> String {
        format!("document.{}", self.as_str())
    }
}

impl FromStr for DocumentKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::REQUIRED
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("document kind", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Approved,
    Rejected,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(UnknownVariant::new("document status", other)),
        }
    }
}

// -- Payments --

/// Application fee charged through the gateway, in whole USD.
pub const APPLICATION_FEE_USD: u32 = 300;
pub const APPLICATION_FEE_CURRENCY: &str = "USD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Map the gateway's free-text status description. Only the two final
    /// outcomes are recognised; everything else is still in flight.
    pub fn from_gateway(description: &str) -> Self {
        if description.eq_ignore_ascii_case("COMPLETED") {
            Self::Completed
        } else if description.eq_ignore_ascii_case("FAILED") {
            Self::Failed
        } else {
            Self::Pending
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownVariant::new("payment status", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions() {
        use ApplicationStatus::*;
        assert!(Draft.can_transition_to(Submitted));
        assert!(Submitted.can_transition_to(UnderReview));
        assert!(UnderReview.can_transition_to(Approved));
        assert!(UnderReview.can_transition_to(Rejected));

        assert!(!Draft.can_transition_to(Approved));
        assert!(!Submitted.can_transition_to(Rejected));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(UnderReview));
    }

    #[test]
    fn gateway_status_mapping() {
        assert_eq!(PaymentStatus::from_gateway("COMPLETED"), PaymentStatus::Completed);
        assert_eq!(PaymentStatus::from_gateway("Failed"), PaymentStatus::Failed);
        assert_eq!(PaymentStatus::from_gateway("INVALID"), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::from_gateway(""), PaymentStatus::Pending);
    }

    #[test]
    fn document_kind_parses_its_own_id() {
        for kind in DocumentKind::REQUIRED {
            assert_eq!(kind.as_str().parse::<DocumentKind>(), Ok(kind));
        }
        assert!("businessPlan".parse::<DocumentKind>().is_err());
    }

    #[test]
    fn role_home_paths() {
        assert_eq!(Role::Admin.home_path(), "/admin");
        assert_eq!(Role::Reviewer.home_path(), "/reviewer");
        assert_eq!(Role::Client.home_path(), "/dashboard");
        assert_eq!("auditor".parse::<Role>().unwrap_err().kind, "role");
    }
}

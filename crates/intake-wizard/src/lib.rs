//! Multi-step application wizard: step schemas, the draft record, and the
//! controller that moves an applicant through the steps.

pub mod draft;
pub mod schema;
pub mod store;
pub mod wizard;

pub use draft::{Draft, SavedDraft};
pub use schema::{FieldError, PAYMENT_STATUS_KEY};
pub use store::{DraftStore, FileDraftStore, draft_key};
pub use wizard::{Advanced, Wizard, WizardError};

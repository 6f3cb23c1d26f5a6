use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::draft::{Draft, SavedDraft};
use crate::schema::{self, FieldError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WizardError {
    #[error("step {step} has invalid fields")]
    Validation { step: u8, errors: Vec<FieldError> },

    #[error("step {0} has not been completed yet")]
    StepNotReachable(u8),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("field {0} cannot be edited")]
    ReservedField(String),
}

/// Result of a successful `advance`. `from == to` on the last step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advanced {
    pub from: u8,
    pub to: u8,
}

/// Step-indexed controller over the application draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wizard {
    step: u8,
    draft: Draft,
    completed: BTreeSet<u8>,
}

impl Default for Wizard {
    fn default() -> Self {
        Self::new()
    }
}

impl Wizard {
    pub fn new() -> Self {
        Self {
            step: 1,
            draft: Draft::default(),
            completed: BTreeSet::new(),
        }
    }

    /// Rebuild a wizard from a stored draft. Every step is re-validated to
    /// recover the completed set; the stored pointer is only honoured when
    /// all steps before it are complete.
    pub fn restore(saved: SavedDraft) -> Self {
        let draft = saved.values;
        let completed: BTreeSet<u8> = schema::steps()
            .iter()
            .filter(|step| step.is_derivable() && step.is_valid(&draft))
            .map(|step| step.number)
            .collect();

        let last = schema::total_steps();
        let first_incomplete = (1..=last)
            .find(|n| !completed.contains(n))
            .unwrap_or(last);
        let step = saved.step.clamp(1, last).min(first_incomplete);

        debug!(step, completed = ?completed, "Wizard restored");
        Self {
            step,
            draft,
            completed,
        }
    }

    pub fn snapshot(&self) -> SavedDraft {
        SavedDraft {
            step: self.step,
            values: self.draft.clone(),
        }
    }

    pub fn current_step(&self) -> u8 {
        self.step
    }

    pub fn step_name(&self) -> &'static str {
        schema::step(self.step).map(|s| s.name).unwrap_or_default()
    }

    pub fn completed_steps(&self) -> &BTreeSet<u8> {
        &self.completed
    }

    pub fn is_complete(&self, step: u8) -> bool {
        self.completed.contains(&step)
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    /// Percentage of the steps before review that are complete.
    pub fn progress_percent(&self) -> u8 {
        let fillable = schema::total_steps() - 1;
        let done = self.completed.iter().filter(|&&n| n <= fillable).count();
        // done <= fillable <= 8, so the result fits in u8
        (done * 100 / usize::from(fillable)) as u8
    }

    /// Merge applicant input into the draft. Nothing is validated here; the
    /// whole patch is rejected if any key is unknown or server-owned.
    pub fn update(&mut self, patch: BTreeMap<String, String>) -> Result<(), WizardError> {
        for field in patch.keys() {
            match schema::field_rule(field) {
                None => return Err(WizardError::UnknownField(field.clone())),
                Some(rule) if !rule.editable => {
                    return Err(WizardError::ReservedField(field.clone()));
                }
                Some(_) => {}
            }
        }
        for (field, value) in patch {
            self.draft.set(field, value);
        }
        Ok(())
    }

    /// Set a server-owned field (uploaded documents, payment outcome). Steps
    /// that become valid are marked complete so they can be jumped to.
    pub fn set_system_field(&mut self, field: &str, value: &str) {
        self.draft.set(field, value);
        for step in schema::steps() {
            if step.is_derivable() && step.is_valid(&self.draft) {
                self.completed.insert(step.number);
            }
        }
    }

    /// Validate the current step. On success the step is marked complete and
    /// the pointer moves forward by one, stopping at the last step.
    pub fn advance(&mut self) -> Result<Advanced, WizardError> {
        let Some(step) = schema::step(self.step) else {
            return Err(WizardError::StepNotReachable(self.step));
        };

        let errors = step.validate(&self.draft);
        if !errors.is_empty() {
            return Err(WizardError::Validation {
                step: self.step,
                errors,
            });
        }

        let from = self.step;
        self.completed.insert(from);
        if self.step < schema::total_steps() {
            self.step += 1;
        }
        Ok(Advanced { from, to: self.step })
    }

    pub fn retreat(&mut self) -> u8 {
        if self.step > 1 {
            self.step -= 1;
        }
        self.step
    }

    /// Move to a step already completed. Staying put is always allowed.
    pub fn jump_to(&mut self, step: u8) -> Result<(), WizardError> {
        if step != self.step && !self.completed.contains(&step) {
            return Err(WizardError::StepNotReachable(step));
        }
        self.step = step;
        Ok(())
    }

    /// Every field error across the steps before review, for final submission.
    pub fn validate_all(&self) -> Vec<FieldError> {
        schema::steps()
            .iter()
            .flat_map(|step| step.validate(&self.draft))
            .collect()
    }
}

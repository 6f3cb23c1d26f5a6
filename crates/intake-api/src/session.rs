use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use anyhow::bail;
use tracing::{debug, warn};
use uuid::Uuid;

use intake_types::api::WizardStateResponse;
use intake_types::models::ApplicationStatus;
use intake_wizard::{Wizard, draft_key, schema};

use crate::convert;
use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, AppStateInner, run_blocking};

/// One applicant's wizard as held between requests.
#[derive(Debug, Clone)]
pub struct WizardSession {
    /// None until the first autosave creates the application row.
    pub application_id: Option<Uuid>,
    pub status: ApplicationStatus,
    pub wizard: Wizard,
    /// Set when the last write to the application row failed.
    pub dirty: bool,
}

impl WizardSession {
    pub fn fresh() -> Self {
        Self {
            application_id: None,
            status: ApplicationStatus::Draft,
            wizard: Wizard::new(),
            dirty: false,
        }
    }

    /// Only drafts accept edits, uploads, and payments.
    pub fn ensure_editable(&self) -> ApiResult<()> {
        if self.status == ApplicationStatus::Draft {
            Ok(())
        } else {
            Err(ApiError::Conflict(format!(
                "Application is {} and can no longer be changed",
                self.status
            )))
        }
    }

    pub fn to_response(&self) -> WizardStateResponse {
        WizardStateResponse {
            application_id: self.application_id,
            status: self.status,
            step: self.wizard.current_step(),
            step_name: self.wizard.step_name().to_string(),
            total_steps: schema::total_steps(),
            completed_steps: self.wizard.completed_steps().iter().copied().collect(),
            draft: self.wizard.draft().values().clone(),
            saved: !self.dirty,
        }
    }
}

/// In-memory wizard sessions keyed by user id. Entries are evicted when the
/// application is submitted or changed outside the session (payment
/// callbacks), and rebuilt from storage on the next request.
#[derive(Default)]
pub struct SessionCache {
    inner: Mutex<HashMap<Uuid, WizardSession>>,
}

impl SessionCache {
    pub fn get(&self, user_id: Uuid) -> Option<WizardSession> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .cloned()
    }

    pub fn put(&self, user_id: Uuid, session: WizardSession) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id, session);
    }

    pub fn evict(&self, user_id: Uuid) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id);
    }
}

/// The applicant's current session: cached, else the latest open
/// application row, else the local draft mirror, else a fresh wizard.
pub async fn load(state: &AppState, user_id: Uuid) -> ApiResult<WizardSession> {
    if let Some(session) = state.sessions.get(user_id) {
        return Ok(session);
    }
    let session = run_blocking(state, move |s| restore(s, user_id)).await?;
    state.sessions.put(user_id, session.clone());
    Ok(session)
}

fn restore(state: &AppStateInner, user_id: Uuid) -> anyhow::Result<WizardSession> {
    let uid = user_id.to_string();

    if let Some(row) = state.db.latest_application_for_user(&uid)? {
        let status: ApplicationStatus = row.status.parse()?;
        // Decided applications are history; the applicant starts over
        if !status.is_terminal() {
            debug!("Restoring application {} for {}", row.id, uid);
            return Ok(WizardSession {
                application_id: Some(convert::parse_id(&row.id)?),
                status,
                wizard: Wizard::restore(convert::saved_draft(&row)?),
                dirty: false,
            });
        }
    }

    match state.drafts.load(&draft_key(&uid)) {
        Ok(Some(saved)) => {
            debug!("Restoring local draft for {}", uid);
            Ok(WizardSession {
                wizard: Wizard::restore(saved),
                ..WizardSession::fresh()
            })
        }
        Ok(None) => Ok(WizardSession::fresh()),
        Err(e) => {
            warn!("Could not read local draft for {}: {:#}", uid, e);
            Ok(WizardSession::fresh())
        }
    }
}

/// Write the whole draft to the local mirror and the application row, then
/// cache the session. A failed row write is logged and leaves the session
/// dirty; it is retried by the next persisting call.
pub async fn persist(state: &AppState, user_id: Uuid, mut session: WizardSession) -> WizardSession {
    let snapshot = session.wizard.snapshot();
    let application_id = session.application_id;

    let result = run_blocking(state, move |s| {
        let uid = user_id.to_string();
        if let Err(e) = s.drafts.save(&draft_key(&uid), &snapshot) {
            warn!("Could not write local draft for {}: {:#}", uid, e);
        }

        let draft = serde_json::to_string(&snapshot.values)?;
        match application_id {
            Some(id) => {
                if !s.db.save_draft(&id.to_string(), snapshot.step, &draft)? {
                    bail!("application {id} is no longer a draft");
                }
                Ok(id)
            }
            None => {
                let id = Uuid::new_v4();
                s.db.create_application(&id.to_string(), &uid, snapshot.step, &draft)?;
                debug!("Created application {} for {}", id, uid);
                Ok(id)
            }
        }
    })
    .await;

    match result {
        Ok(id) => {
            session.application_id = Some(id);
            session.dirty = false;
        }
        Err(e) => {
            warn!("Could not save application draft for {}: {:#}", user_id, e);
            session.dirty = true;
        }
    }

    state.sessions.put(user_id, session.clone());
    session
}

/// Persist if the row does not exist yet or the last write failed, and
/// return its id. Used before anything that references the row.
pub async fn ensure_persisted(
    state: &AppState,
    user_id: Uuid,
    session: WizardSession,
) -> ApiResult<(WizardSession, Uuid)> {
    let session = match session.application_id {
        Some(_) if !session.dirty => session,
        _ => persist(state, user_id, session).await,
    };
    match (session.application_id, session.dirty) {
        (Some(id), false) => Ok((session, id)),
        _ => Err(ApiError::Internal(anyhow::anyhow!(
            "application for {user_id} could not be saved"
        ))),
    }
}

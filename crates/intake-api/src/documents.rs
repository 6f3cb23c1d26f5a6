use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use tracing::{error, info};
use uuid::Uuid;

use intake_db::models::NewDocument;
use intake_types::api::{
    Claims, DocumentListResponse, DocumentResponse, RequiredDocument, UpdateDocumentStatusRequest,
};
use intake_types::models::{DocumentKind, Role};

use crate::convert;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{require_client, require_staff};
use crate::session::{self, ensure_persisted, persist};
use crate::state::{AppState, blocking};
use crate::storage::checksum;

/// 20 MB upload limit per document.
pub const MAX_DOCUMENT_SIZE: usize = 20 * 1024 * 1024;

/// Optional header carrying the original file name of an upload.
pub const FILE_NAME_HEADER: &str = "x-file-name";

/// POST /applications/current/documents/{kind}. The body is the raw file.
/// The document id is written into the draft under `document.<kind>`.
pub async fn upload(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    bytes: Bytes,
) -> ApiResult<impl IntoResponse> {
    require_client(&claims)?;
    let kind: DocumentKind = kind
        .parse()
        .map_err(|e: intake_types::models::UnknownVariant| ApiError::BadRequest(e.to_string()))?;

    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Uploaded file is empty".into()));
    }
    if bytes.len() > MAX_DOCUMENT_SIZE {
        return Err(ApiError::PayloadTooLarge(MAX_DOCUMENT_SIZE / (1024 * 1024)));
    }

    let session = session::load(&state, claims.sub).await?;
    session.ensure_editable()?;
    let (mut session, application_id) = ensure_persisted(&state, claims.sub, session).await?;

    let file_name = header_str(&headers, FILE_NAME_HEADER)
        .map(sanitize_file_name)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| kind.as_str().to_string());
    let content_type = header_str(&headers, header::CONTENT_TYPE.as_str())
        .unwrap_or("application/octet-stream")
        .to_string();

    let document_id = Uuid::new_v4();
    let sha256 = checksum(&bytes);
    let size = bytes.len() as i64;

    state.storage.write(document_id, &bytes).await?;

    let recorded = {
        let (file_name, content_type, sha256) = (file_name.clone(), content_type, sha256);
        blocking(&state, move |s| {
            let id = document_id.to_string();
            s.db.insert_document(&NewDocument {
                id: &id,
                application_id: &application_id.to_string(),
                kind: kind.as_str(),
                file_name: &file_name,
                content_type: &content_type,
                size,
                sha256: &sha256,
            })?;
            s.db.get_document(&id)?
                .ok_or_else(|| anyhow::anyhow!("document {id} vanished after insert"))
        })
        .await
    };
    let row = match recorded {
        Ok(row) => row,
        Err(e) => {
            error!("Could not record document {}, removing stored bytes", document_id);
            if let Err(e) = state.storage.remove(document_id).await {
                error!("Could not remove orphaned document {}: {:#}", document_id, e);
            }
            return Err(e);
        }
    };

    session
        .wizard
        .set_system_field(&kind.draft_key(), &document_id.to_string());
    persist(&state, claims.sub, session).await;

    info!(
        "Stored {} for application {} ({} bytes)",
        kind.as_str(),
        application_id,
        size
    );
    Ok((StatusCode::CREATED, Json(convert::document(row)?)))
}

/// GET /applications/current/documents. Uploaded documents plus the
/// required list with an `uploaded` flag for each kind.
pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<DocumentListResponse>> {
    require_client(&claims)?;
    let session = session::load(&state, claims.sub).await?;

    let rows = match session.application_id {
        Some(id) => {
            let id = id.to_string();
            blocking(&state, move |s| s.db.list_documents(&id)).await?
        }
        None => Vec::new(),
    };
    let documents: Vec<DocumentResponse> = rows
        .into_iter()
        .map(convert::document)
        .collect::<anyhow::Result<_>>()?;

    let required = DocumentKind::REQUIRED
        .into_iter()
        .map(|kind| RequiredDocument {
            kind,
            name: kind.display_name().to_string(),
            description: kind.description().to_string(),
            uploaded: session.wizard.draft().get(&kind.draft_key()).is_some(),
        })
        .collect();

    Ok(Json(DocumentListResponse {
        documents,
        required,
    }))
}

/// GET /documents/{id}. The owning applicant and staff may download.
pub async fn download(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(document_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let id = document_id.to_string();
    let (document, application) = blocking(&state, move |s| {
        let Some(document) = s.db.get_document(&id)? else {
            return Ok(None);
        };
        let application = s.db.get_application(&document.application_id)?;
        Ok(Some((document, application)))
    })
    .await?
    .ok_or(ApiError::NotFound("Document"))?;

    let owner = application.map(|a| a.user_id);
    if claims.role == Role::Client && owner.as_deref() != Some(claims.sub.to_string().as_str()) {
        return Err(ApiError::NotFound("Document"));
    }

    let bytes = state.storage.read(document_id).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        sanitize_file_name(&document.file_name)
    );
    Ok((
        [
            (header::CONTENT_TYPE, document.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

/// PUT /documents/{id}/status (reviewer or admin)
pub async fn set_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(document_id): Path<Uuid>,
    Json(req): Json<UpdateDocumentStatusRequest>,
) -> ApiResult<Json<DocumentResponse>> {
    require_staff(&claims)?;

    let id = document_id.to_string();
    let row = blocking(&state, move |s| {
        if !s.db.set_document_status(&id, req.status.as_str())? {
            return Ok(None);
        }
        s.db.get_document(&id)
    })
    .await?
    .ok_or(ApiError::NotFound("Document"))?;

    info!("{} marked document {} {}", claims.sub, document_id, req.status.as_str());
    Ok(Json(convert::document(row)?))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Keep only the final path component and drop characters that would break
/// a Content-Disposition header.
fn sanitize_file_name(raw: &str) -> String {
    raw.rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control() && *c != '"')
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_reduced_to_their_last_component() {
        assert_eq!(sanitize_file_name("C:\\Users\\amina\\cr12.pdf"), "cr12.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("tax \"final\".pdf"), "tax final.pdf");
        assert_eq!(sanitize_file_name("dir/"), "");
    }
}

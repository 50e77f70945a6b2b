//! Request handlers, one per user action.
//!
//! The UI layer (or the CLI) calls exactly one handler per interaction;
//! each handler gates on the session, runs its store and storage calls,
//! and annotates failures with the operation name. No handler keeps
//! state between calls.

use sqlx::PgPool;

use crate::auth::{self, Session};
use crate::export::export_xlsx;
use crate::model::{InspectionRecord, User};
use crate::records::{self, RecordDraft, RecordFilter, RecordPatch};
use crate::storage::{StorageClient, UploadFile};
use crate::users::{self, NewUser};
use crate::{AppError, AppResult};

pub async fn login(pool: &PgPool, username: &str, password: &str) -> AppResult<Session> {
    auth::authenticate(pool, username, password).await
}

pub async fn records_list(pool: &PgPool, filter: &RecordFilter) -> AppResult<Vec<InspectionRecord>> {
    records::list(pool, filter).await
}

pub async fn records_get(pool: &PgPool, id: i64) -> AppResult<Option<InspectionRecord>> {
    records::get(pool, id).await
}

/// Create a record, uploading any attached photos first. When an upload
/// fails mid-batch the record is still created with the URIs that
/// succeeded, and the returned error names the failed file and the new
/// record; partial batches are committed, not discarded.
pub async fn records_create(
    pool: &PgPool,
    session: &Session,
    mut draft: RecordDraft,
    files: Vec<UploadFile>,
    storage: Option<&StorageClient>,
) -> AppResult<InspectionRecord> {
    let upload_failure = match upload_batch(storage, &files).await? {
        Ok(uris) => {
            draft.photo_references.extend(uris);
            None
        }
        Err((uris, err)) => {
            draft.photo_references.extend(uris);
            Some(err)
        }
    };

    let record = records::create(pool, session, &draft).await?;

    match upload_failure {
        None => Ok(record),
        Some(err) => Err(err.with_context("record_id", record.id.to_string())),
    }
}

/// Update a record (admin only). Newly uploaded photo URIs are appended
/// to the stored ones; on a mid-batch upload failure the partial batch
/// is still merged onto the record before the error is surfaced.
pub async fn records_update(
    pool: &PgPool,
    session: &Session,
    id: i64,
    mut patch: RecordPatch,
    files: Vec<UploadFile>,
    storage: Option<&StorageClient>,
) -> AppResult<()> {
    let upload_failure = match upload_batch(storage, &files).await? {
        Ok(uris) => {
            patch.new_photo_references.extend(uris);
            None
        }
        Err((uris, err)) => {
            patch.new_photo_references.extend(uris);
            Some(err)
        }
    };

    records::update(pool, session, id, &patch).await?;

    match upload_failure {
        None => Ok(()),
        Some(err) => Err(err.with_context("record_id", id.to_string())),
    }
}

pub async fn records_delete(pool: &PgPool, session: &Session, id: i64) -> AppResult<()> {
    records::delete(pool, session, id).await
}

/// Export the filtered record set as XLSX bytes. Listing requires only
/// an authenticated caller, same as `records_list`.
pub async fn records_export(pool: &PgPool, filter: &RecordFilter) -> AppResult<Vec<u8>> {
    let rows = records::list(pool, filter)
        .await
        .map_err(|err| err.with_context("operation", "records_export"))?;
    export_xlsx(&rows)
}

pub async fn users_add(pool: &PgPool, session: &Session, user: &NewUser) -> AppResult<()> {
    users::create_user(pool, session, user).await
}

pub async fn users_remove(pool: &PgPool, session: &Session, username: &str) -> AppResult<()> {
    users::delete_user(pool, session, username).await
}

pub async fn users_list(pool: &PgPool, session: &Session) -> AppResult<Vec<User>> {
    users::list_users(pool, session).await
}

/// Run a batch through the storage client. The outer error aborts the
/// whole operation (nothing to attach); the inner `Err` is a mid-batch
/// failure carrying the URIs that made it, which the caller still
/// commits to the record before surfacing the error.
#[allow(clippy::type_complexity)]
async fn upload_batch(
    storage: Option<&StorageClient>,
    files: &[UploadFile],
) -> AppResult<Result<Vec<String>, (Vec<String>, AppError)>> {
    if files.is_empty() {
        return Ok(Ok(Vec::new()));
    }
    let Some(client) = storage else {
        return Err(AppError::new(
            "STORAGE/NOT_CONFIGURED",
            "Photo uploads require a [storage] configuration",
        ));
    };

    if let Err(err) = client.ensure_bucket().await {
        return Err(err);
    }
    Ok(match client.upload(files).await {
        Ok(uris) => Ok(uris),
        Err(batch) => {
            let uploaded = batch.uploaded.clone();
            Err((uploaded, AppError::from(batch)))
        }
    })
}

//! The record store: filtered listing and the CRUD lifecycle for
//! inspection records.
//!
//! Every operation runs in its own transaction; nothing spans a
//! read-then-write across calls, so concurrent sessions race under
//! last-write-wins semantics.

use chrono::{Days, NaiveDate, Utc};
use futures::FutureExt;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::auth::Session;
use crate::db::run_in_tx;
use crate::storage::merge_photo_references;
use crate::model::{
    date_sort_key, encode_recorded_at, join_photo_references, join_tags, split_photo_references,
    validate_defect_locations, InspectionRecord, SubGroup, VehicleType,
};
use crate::{AppError, AppResult};

pub const VALIDATION_CHASSIS_REQUIRED: &str = "VALIDATION/CHASSIS_REQUIRED";
pub const RECORDS_NOT_FOUND: &str = "RECORDS/NOT_FOUND";

/// Unfiltered listings still scope to this window, ending today.
pub const DEFAULT_WINDOW_DAYS: u64 = 7;

/// The stored date text is day-month-year, so its lexical order is not
/// chronological. Every range comparison goes through this derived
/// year-month-day key instead.
const DATE_KEY_EXPR: &str =
    "(substr(recorded_at, 7, 4) || substr(recorded_at, 4, 2) || substr(recorded_at, 1, 2))";

const SELECT_COLUMNS: &str = "SELECT id, bb_number, chassis_number, vehicle_type, \
     work_order_number, sub_group, findings, defect_locations, photo_references, \
     recorded_at, recorded_by FROM inspection_records";

#[derive(Debug, Clone)]
pub struct RecordFilter {
    /// Case-insensitive substring over the chassis number.
    pub chassis_contains: Option<String>,
    /// Inclusive calendar-date range.
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub sub_group: Option<SubGroup>,
    /// Substring match over the joined defect-location column.
    pub defect_location: Option<String>,
    /// Exact creator username.
    pub recorded_by: Option<String>,
    pub vehicle_type: Option<VehicleType>,
}

impl RecordFilter {
    /// No field filters, date range defaulting to the last
    /// [`DEFAULT_WINDOW_DAYS`] days through today.
    pub fn default_window() -> Self {
        let today = Utc::now().date_naive();
        Self::for_range(
            today.checked_sub_days(Days::new(DEFAULT_WINDOW_DAYS)).unwrap_or(today),
            today,
        )
    }

    pub fn for_range(date_from: NaiveDate, date_to: NaiveDate) -> Self {
        RecordFilter {
            chassis_contains: None,
            date_from,
            date_to,
            sub_group: None,
            defect_location: None,
            recorded_by: None,
            vehicle_type: None,
        }
    }
}

/// Draft of a record to create. `recorded_by` is stamped from the
/// session, never taken from the caller.
#[derive(Debug, Clone)]
pub struct RecordDraft {
    pub bb_number: String,
    pub chassis_number: String,
    pub vehicle_type: VehicleType,
    pub work_order_number: String,
    pub sub_group: SubGroup,
    pub findings: String,
    pub defect_locations: Vec<String>,
    pub photo_references: Vec<String>,
    pub recorded_at: NaiveDate,
}

/// Full overwrite of the mutable fields. `id` and `recorded_by` are
/// never altered; photo references are merged, not replaced: the stored
/// URIs stay first, `new_photo_references` are appended in order.
#[derive(Debug, Clone)]
pub struct RecordPatch {
    pub bb_number: String,
    pub chassis_number: String,
    pub vehicle_type: VehicleType,
    pub work_order_number: String,
    pub sub_group: SubGroup,
    pub findings: String,
    pub defect_locations: Vec<String>,
    pub recorded_at: NaiveDate,
    pub new_photo_references: Vec<String>,
}

fn list_query(filter: &RecordFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb: QueryBuilder<'static, Postgres> = QueryBuilder::new(SELECT_COLUMNS);

    qb.push(" WHERE ");
    qb.push(DATE_KEY_EXPR);
    qb.push(" BETWEEN ");
    qb.push_bind(date_sort_key(filter.date_from));
    qb.push(" AND ");
    qb.push_bind(date_sort_key(filter.date_to));

    if let Some(chassis) = &filter.chassis_contains {
        qb.push(" AND chassis_number ILIKE ");
        qb.push_bind(format!("%{chassis}%"));
    }
    if let Some(sub_group) = filter.sub_group {
        qb.push(" AND sub_group = ");
        qb.push_bind(sub_group.as_str());
    }
    if let Some(location) = &filter.defect_location {
        qb.push(" AND defect_locations ILIKE ");
        qb.push_bind(format!("%{location}%"));
    }
    if let Some(username) = &filter.recorded_by {
        qb.push(" AND recorded_by = ");
        qb.push_bind(username.clone());
    }
    if let Some(vehicle_type) = filter.vehicle_type {
        qb.push(" AND vehicle_type = ");
        qb.push_bind(vehicle_type.as_str());
    }

    qb.push(" ORDER BY id DESC");
    qb
}

/// List records matching the filter, most recent identifier first. No
/// filter combination is rejected.
pub async fn list(pool: &PgPool, filter: &RecordFilter) -> AppResult<Vec<InspectionRecord>> {
    let mut qb = list_query(filter);
    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::from(e).with_context("operation", "records_list"))?;
    rows.iter().map(InspectionRecord::try_from).collect()
}

pub async fn get(pool: &PgPool, id: i64) -> AppResult<Option<InspectionRecord>> {
    let sql = format!("{SELECT_COLUMNS} WHERE id = $1");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            AppError::from(e)
                .with_context("operation", "records_get")
                .with_context("id", id.to_string())
        })?;
    row.as_ref().map(InspectionRecord::try_from).transpose()
}

/// Create a record. Any authenticated session may create; the chassis
/// number is required and defect tags must come from the fixed
/// enumeration.
pub async fn create(
    pool: &PgPool,
    session: &Session,
    draft: &RecordDraft,
) -> AppResult<InspectionRecord> {
    let chassis_number = draft.chassis_number.trim();
    if chassis_number.is_empty() {
        return Err(AppError::new(
            VALIDATION_CHASSIS_REQUIRED,
            "Chassis number is required",
        ));
    }
    validate_defect_locations(&draft.defect_locations)?;

    let record = InspectionRecord {
        id: 0,
        bb_number: draft.bb_number.trim().to_string(),
        chassis_number: chassis_number.to_string(),
        vehicle_type: draft.vehicle_type.as_str().to_string(),
        work_order_number: draft.work_order_number.trim().to_string(),
        sub_group: draft.sub_group.as_str().to_string(),
        findings: draft.findings.trim().to_string(),
        defect_locations: draft.defect_locations.clone(),
        photo_references: draft.photo_references.clone(),
        recorded_at: draft.recorded_at,
        recorded_by: session.username.clone(),
    };

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO inspection_records \
         (bb_number, chassis_number, vehicle_type, work_order_number, sub_group, \
          findings, defect_locations, photo_references, recorded_at, recorded_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING id",
    )
    .bind(&record.bb_number)
    .bind(&record.chassis_number)
    .bind(&record.vehicle_type)
    .bind(&record.work_order_number)
    .bind(&record.sub_group)
    .bind(&record.findings)
    .bind(join_tags(&record.defect_locations))
    .bind(join_photo_references(&record.photo_references))
    .bind(encode_recorded_at(record.recorded_at))
    .bind(&record.recorded_by)
    .fetch_one(pool)
    .await
    .map_err(|e| AppError::from(e).with_context("operation", "records_create"))?;

    tracing::info!(
        target: "pdireg",
        event = "record_created",
        id,
        chassis_number = %record.chassis_number,
        recorded_by = %record.recorded_by
    );

    Ok(InspectionRecord { id, ..record })
}

/// Overwrite the mutable fields of a record. Admin only. The stored
/// photo references are read and the new ones appended inside the same
/// transaction, so the merge cannot drop a reference added by this call.
pub async fn update(
    pool: &PgPool,
    session: &Session,
    id: i64,
    patch: &RecordPatch,
) -> AppResult<()> {
    session.require_admin("records_update")?;
    validate_defect_locations(&patch.defect_locations)?;

    run_in_tx(pool, |tx| {
        async move {
            let existing: Option<String> = sqlx::query_scalar(
                "SELECT photo_references FROM inspection_records WHERE id = $1 FOR UPDATE",
            )
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;

            let Some(existing) = existing else {
                return Err(AppError::new(RECORDS_NOT_FOUND, "Record not found")
                    .with_context("operation", "records_update")
                    .with_context("id", id.to_string()));
            };

            let stored = split_photo_references(&existing);
            let photo_references =
                merge_photo_references(&stored, &patch.new_photo_references);

            sqlx::query(
                "UPDATE inspection_records SET \
                 bb_number = $1, chassis_number = $2, vehicle_type = $3, \
                 work_order_number = $4, sub_group = $5, findings = $6, \
                 defect_locations = $7, photo_references = $8, recorded_at = $9 \
                 WHERE id = $10",
            )
            .bind(patch.bb_number.trim())
            .bind(patch.chassis_number.trim())
            .bind(patch.vehicle_type.as_str())
            .bind(patch.work_order_number.trim())
            .bind(patch.sub_group.as_str())
            .bind(patch.findings.trim())
            .bind(join_tags(&patch.defect_locations))
            .bind(join_photo_references(&photo_references))
            .bind(encode_recorded_at(patch.recorded_at))
            .bind(id)
            .execute(&mut **tx)
            .await?;

            Ok(())
        }
        .boxed()
    })
    .await?;

    tracing::info!(target: "pdireg", event = "record_updated", id, by = %session.username);
    Ok(())
}

/// Delete a record. Admin only, unconditional; deleting an id that does
/// not exist is a no-op success.
pub async fn delete(pool: &PgPool, session: &Session, id: i64) -> AppResult<()> {
    session.require_admin("records_delete")?;

    let affected = sqlx::query("DELETE FROM inspection_records WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| {
            AppError::from(e)
                .with_context("operation", "records_delete")
                .with_context("id", id.to_string())
        })?
        .rows_affected();

    tracing::info!(
        target: "pdireg",
        event = "record_deleted",
        id,
        affected,
        by = %session.username
    );
    Ok(())
}

use crate::curriculum::CurriculumCatalog;
use crate::history::{ProgressionHistory, ProgressionRecord, SqliteHistory, Status};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    db_conn, format_date, load_catalog, now_stamp, optional_i64, optional_str, parse_date,
    required_i64, required_str, respond, student_exists, teacher_exists, today,
};
use crate::ipc::types::{AppState, Request};
use crate::progression::{self, Decision, Proposal, Rejection, Standing};
use chrono::NaiveDate;
use rusqlite::{ErrorCode, OptionalExtension, TransactionBehavior};
use serde_json::json;

struct EntryInput {
    student_id: String,
    unit_id: i64,
    position: i64,
    status: Status,
}

impl EntryInput {
    fn proposal(&self) -> Proposal<'_> {
        Proposal {
            student_id: &self.student_id,
            unit_id: self.unit_id,
            position: self.position,
            status: self.status,
        }
    }
}

// toAyah is accepted from older clients but ignored: entries cover one ayah.
fn parse_entry(params: &serde_json::Value) -> Result<EntryInput, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let unit_id = required_i64(params, "surahId")?;
    let position = required_i64(params, "fromAyah")?;
    let status_raw = required_str(params, "status")?;
    let status = Status::parse(&status_raw).ok_or_else(|| {
        HandlerErr::bad_params("status must be murojaah or selesai")
            .with_details(json!({ "field": "status", "status": status_raw }))
    })?;
    Ok(EntryInput {
        student_id,
        unit_id,
        position,
        status,
    })
}

pub fn record_json(catalog: &CurriculumCatalog, r: &ProgressionRecord) -> serde_json::Value {
    let unit = catalog.unit(r.unit_id);
    json!({
        "id": r.id,
        "studentId": r.student_id,
        "teacherId": r.teacher_id,
        "surahId": r.unit_id,
        "surahCode": unit.map(|u| u.code.as_str()),
        "surahName": unit.map(|u| u.name.as_str()),
        "fromAyah": r.position,
        "toAyah": r.position,
        "date": format_date(r.date),
        "status": r.status.as_str(),
        "notes": r.notes
    })
}

pub fn standing_json(standing: &Standing) -> serde_json::Value {
    json!({
        "pendingReview": standing.pending_review,
        "nextExpected": standing.next_expected,
        "target": standing.target(),
        "curriculumComplete": standing.next_expected.is_none(),
        "lastCompletedOn": standing.last_completed.as_ref().map(|r| format_date(r.date))
    })
}

// History is ordered by (date, id), so an entry dated before the student's
// latest record would sort behind it and no longer be "latest".
fn ensure_not_backdated<H: ProgressionHistory + ?Sized>(
    history: &H,
    student_id: &str,
    date: NaiveDate,
) -> Result<(), HandlerErr> {
    let Some(latest) = history.latest_overall(student_id)? else {
        return Ok(());
    };
    if date < latest.date {
        return Err(HandlerErr::bad_params(
            "date must not be earlier than the student's latest hafalan entry",
        )
        .with_details(json!({
            "field": "date",
            "date": format_date(date),
            "latestDate": format_date(latest.date),
            "latestRecordId": latest.id
        })));
    }
    Ok(())
}

fn rejection_json(r: &Rejection) -> serde_json::Value {
    json!({
        "field": r.field().as_str(),
        "reason": r.reason(),
        "message": r.message(),
        "details": r.details()
    })
}

fn hafalan_validate(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let catalog = load_catalog(state)?;
    let conn = db_conn(state)?;
    let input = parse_entry(params)?;
    let date = optional_str(params, "date")?
        .map(|raw| parse_date(&raw))
        .transpose()?;
    if !student_exists(conn, &input.student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    let history = SqliteHistory::new(conn);
    if let Some(date) = date {
        ensure_not_backdated(&history, &input.student_id, date)?;
    }
    let decision = progression::validate(&catalog, &history, &input.proposal())?;
    let rejection = match &decision {
        Decision::Accepted => None,
        Decision::Rejected(r) => Some(rejection_json(r)),
    };
    Ok(json!({
        "accepted": decision.is_accepted(),
        "rejection": rejection
    }))
}

fn hafalan_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let catalog = load_catalog(state)?;
    let input = parse_entry(params)?;
    let teacher_id = optional_str(params, "teacherId")?;
    let notes = optional_str(params, "notes")?;
    let date_raw = optional_str(params, "date")?;

    let conn = state.db.as_mut().ok_or_else(HandlerErr::no_workspace)?;
    let settings = setup::hafalan_settings(conn)?;

    let today = today();
    let date = match date_raw {
        Some(raw) => parse_date(&raw)?,
        None => today,
    };
    if !settings.allow_future_dates && date > today {
        return Err(HandlerErr::bad_params("date must not be in the future")
            .with_details(json!({ "field": "date", "date": format_date(date) })));
    }
    if settings.require_teacher && teacher_id.is_none() {
        return Err(HandlerErr::bad_params("teacherId is required"));
    }
    if let Some(t) = teacher_id.as_deref() {
        if !teacher_exists(conn, t)? {
            return Err(HandlerErr::not_found("teacher not found"));
        }
    }
    if !student_exists(conn, &input.student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    // Validation and insert share one write transaction; a concurrent writer for
    // the same workspace waits on the lock and then sees this record.
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let history = SqliteHistory::new(&tx);
    ensure_not_backdated(&history, &input.student_id, date)?;
    let decision = progression::validate(&catalog, &history, &input.proposal())?;
    if let Decision::Rejected(r) = decision {
        tracing::info!(
            student_id = %input.student_id,
            surah_id = input.unit_id,
            ayah = input.position,
            reason = r.reason(),
            "hafalan entry rejected"
        );
        return Err(HandlerErr::rejected(&r));
    }

    let inserted = tx.execute(
        "INSERT INTO hafalan_records(
            student_id, teacher_id, unit_id, from_ayah, to_ayah, record_date, status, notes, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &input.student_id,
            &teacher_id,
            input.unit_id,
            input.position,
            input.position,
            format_date(date),
            input.status.as_str(),
            &notes,
            now_stamp(),
        ),
    );
    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            return Err(HandlerErr::new("validation_failed", "this ayah is already selesai")
                .with_details(json!({ "field": "status", "reason": "already_completed" })));
        }
        Err(e) => return Err(HandlerErr::db_update(e, "hafalan_records")),
    }
    let id = tx.last_insert_rowid();
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(
        record_id = id,
        student_id = %input.student_id,
        surah_id = input.unit_id,
        ayah = input.position,
        status = input.status.as_str(),
        "hafalan entry recorded"
    );

    // Range was checked by the validator.
    let position = u32::try_from(input.position).unwrap_or_default();
    let record = ProgressionRecord {
        id,
        student_id: input.student_id.clone(),
        teacher_id,
        unit_id: input.unit_id,
        position,
        date,
        status: input.status,
        notes,
    };
    let standing = progression::standing(&catalog, &SqliteHistory::new(conn), &input.student_id)?;
    Ok(json!({
        "record": record_json(&catalog, &record),
        "standing": standing_json(&standing)
    }))
}

fn hafalan_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let catalog = load_catalog(state)?;
    let conn = db_conn(state)?;
    let student_id = required_str(params, "studentId")?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    let limit = match optional_i64(params, "limit")? {
        Some(n) => n.clamp(1, 500),
        None => setup::hafalan_settings(conn)?.history_page_size,
    };
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM hafalan_records WHERE student_id = ?",
        [&student_id],
        |r| r.get(0),
    )?;
    let records = SqliteHistory::new(conn).list(&student_id, limit)?;
    let rows: Vec<serde_json::Value> = records.iter().map(|r| record_json(&catalog, r)).collect();
    Ok(json!({
        "studentId": student_id,
        "total": total,
        "records": rows
    }))
}

fn hafalan_next_expected(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let catalog = load_catalog(state)?;
    let conn = db_conn(state)?;
    let student_id = required_str(params, "studentId")?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    let standing = progression::standing(&catalog, &SqliteHistory::new(conn), &student_id)?;
    Ok(standing_json(&standing))
}

fn hafalan_update_notes(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let record_id = required_i64(params, "recordId")?;
    let notes = optional_str(params, "notes")?;
    let n = conn
        .execute(
            "UPDATE hafalan_records SET notes = ? WHERE id = ?",
            (&notes, record_id),
        )
        .map_err(|e| HandlerErr::db_update(e, "hafalan_records"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("record not found"));
    }
    Ok(json!({ "ok": true }))
}

// Only the newest entry may go; removing an older one would leave a gap the
// progression rule never allowed.
fn hafalan_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let record_id = required_i64(params, "recordId")?;
    let conn = state.db.as_mut().ok_or_else(HandlerErr::no_workspace)?;
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let student_id: Option<String> = tx
        .query_row(
            "SELECT student_id FROM hafalan_records WHERE id = ?",
            [record_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(student_id) = student_id else {
        return Err(HandlerErr::not_found("record not found"));
    };
    let latest = SqliteHistory::new(&tx).latest_overall(&student_id)?;
    if let Some(latest) = latest.filter(|l| l.id != record_id) {
        return Err(HandlerErr::new(
            "conflict",
            "only the most recent hafalan entry of a student can be deleted",
        )
        .with_details(json!({ "latestRecordId": latest.id })));
    }

    tx.execute("DELETE FROM hafalan_records WHERE id = ?", [record_id])
        .map_err(|e| HandlerErr::db_update(e, "hafalan_records"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(record_id, student_id = %student_id, "hafalan entry deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "hafalan.validate" => hafalan_validate(state, &req.params),
        "hafalan.create" => hafalan_create(state, &req.params),
        "hafalan.list" => hafalan_list(state, &req.params),
        "hafalan.nextExpected" => hafalan_next_expected(state, &req.params),
        "hafalan.updateNotes" => hafalan_update_notes(state, &req.params),
        "hafalan.delete" => hafalan_delete(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}

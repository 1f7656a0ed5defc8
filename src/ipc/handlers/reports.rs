use crate::curriculum::CurriculumCatalog;
use crate::history::{ProgressionHistory, SqliteHistory};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::hafalan::standing_json;
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    db_conn, format_date, load_catalog, optional_bool, optional_str, required_str, respond,
    round_off_1_decimal,
};
use crate::ipc::types::{AppState, Request};
use crate::progression;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;

fn percent_of(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_off_1_decimal(100.0 * done as f64 / total as f64)
}

fn report_student_progress(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let catalog = load_catalog(state)?;
    let conn = db_conn(state)?;
    let student_id = required_str(params, "studentId")?;

    let student = conn
        .query_row(
            "SELECT full_name, class_name, active FROM students WHERE id = ?",
            [&student_id],
            |r| {
                Ok(json!({
                    "id": student_id,
                    "fullName": r.get::<_, String>(0)?,
                    "className": r.get::<_, Option<String>>(1)?,
                    "active": r.get::<_, i64>(2)? != 0
                }))
            },
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;

    let history = SqliteHistory::new(conn);
    let completed = history.completed_slots(&student_id)?;
    let standing = progression::standing(&catalog, &history, &student_id)?;
    let last_activity = history.latest_overall(&student_id)?.map(|r| format_date(r.date));

    let units = unit_rows(&catalog, &completed, standing.pending_review.as_ref().map(|p| p.unit_id));
    let total = catalog.total_positions();
    let done = completed.len() as u64;

    Ok(json!({
        "student": student,
        "completedAyahs": done,
        "totalAyahs": total,
        "percentComplete": percent_of(done, total),
        "completedSurahs": units.iter().filter(|u| u["complete"] == true).count(),
        "lastActivityOn": last_activity,
        "standing": standing_json(&standing),
        "surahs": units
    }))
}

/// One row per unit that has any completed ayah or an open review.
fn unit_rows(
    catalog: &CurriculumCatalog,
    completed: &[crate::history::Slot],
    reviewing_unit: Option<i64>,
) -> Vec<serde_json::Value> {
    let mut per_unit: BTreeMap<i64, u32> = BTreeMap::new();
    for slot in completed {
        *per_unit.entry(slot.unit_id).or_default() += 1;
    }
    if let Some(u) = reviewing_unit {
        per_unit.entry(u).or_default();
    }
    catalog
        .units()
        .filter_map(|u| {
            let done = *per_unit.get(&u.id)?;
            Some(json!({
                "surahId": u.id,
                "code": u.code,
                "name": u.name,
                "ayahCount": u.position_count,
                "completedAyahs": done,
                "complete": done >= u.position_count,
                "underReview": reviewing_unit == Some(u.id)
            }))
        })
        .collect()
}

fn report_class_overview(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let catalog = load_catalog(state)?;
    let conn = db_conn(state)?;
    let class_name = optional_str(params, "className")?;
    let include_inactive = match optional_bool(params, "includeInactive")? {
        Some(v) => v,
        None => setup::reports_show_inactive(conn)?,
    };

    let mut sql = String::from(
        "SELECT s.id, s.full_name, s.class_name, s.active,
                (SELECT COUNT(*) FROM hafalan_records h
                 WHERE h.student_id = s.id AND h.status = 'selesai')
         FROM students s
         WHERE 1 = 1",
    );
    let mut binds: Vec<Value> = Vec::new();
    if !include_inactive {
        sql.push_str(" AND s.active = 1");
    }
    if let Some(c) = class_name.as_ref() {
        sql.push_str(" AND s.class_name = ?");
        binds.push(Value::Text(c.clone()));
    }
    sql.push_str(" ORDER BY s.full_name COLLATE NOCASE, s.id");

    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, i64>(3)? != 0,
                r.get::<_, i64>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let total = catalog.total_positions();
    let history = SqliteHistory::new(conn);
    let mut rows = Vec::with_capacity(students.len());
    for (id, full_name, class, active, done) in students {
        let standing = progression::standing(&catalog, &history, &id)?;
        let done = u64::try_from(done).unwrap_or_default();
        rows.push(json!({
            "studentId": id,
            "fullName": full_name,
            "className": class,
            "active": active,
            "completedAyahs": done,
            "percentComplete": percent_of(done, total),
            "pendingReview": standing.pending_review,
            "target": standing.target()
        }));
    }

    Ok(json!({
        "className": class_name,
        "totalAyahs": total,
        "students": rows
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "reports.studentProgress" => report_student_progress(state, &req.params),
        "reports.classOverview" => report_class_overview(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}

use crate::curriculum::{self, CurriculumUnit};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{db_conn, load_catalog, respond};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn unit_json(u: &CurriculumUnit) -> serde_json::Value {
    json!({
        "id": u.id,
        "code": u.code,
        "name": u.name,
        "ayahCount": u.position_count
    })
}

fn curriculum_list(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let catalog = load_catalog(state)?;
    let units: Vec<serde_json::Value> = catalog.units().map(unit_json).collect();
    Ok(json!({
        "units": units,
        "empty": catalog.is_empty(),
        "totalAyahs": catalog.total_positions()
    }))
}

// Records reference units by id, so the curriculum is frozen once any exist.
fn ensure_no_records(conn: &Connection) -> Result<(), HandlerErr> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM hafalan_records", [], |r| r.get(0))?;
    if n > 0 {
        return Err(HandlerErr::new(
            "conflict",
            "curriculum cannot change while hafalan records exist",
        )
        .with_details(json!({ "recordCount": n })));
    }
    Ok(())
}

fn parse_units(params: &serde_json::Value) -> Result<Vec<(String, String, u32)>, HandlerErr> {
    let Some(raw) = params.get("units").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("units must be an array"));
    };
    if raw.is_empty() {
        return Err(HandlerErr::bad_params("units must not be empty"));
    }
    let mut out = Vec::with_capacity(raw.len());
    for (i, u) in raw.iter().enumerate() {
        let name = u
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                HandlerErr::bad_params("unit name is required").with_details(json!({ "index": i }))
            })?;
        let count = u
            .get("positionCount")
            .or_else(|| u.get("ayahCount"))
            .and_then(|v| v.as_i64())
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n >= 1)
            .ok_or_else(|| {
                HandlerErr::bad_params("ayahCount must be a positive integer")
                    .with_details(json!({ "index": i }))
            })?;
        let code = u
            .get("code")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| curriculum::unit_code(i + 1));
        out.push((code, name.to_string(), count));
    }
    Ok(out)
}

fn curriculum_replace(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let units = parse_units(params)?;
    let conn = db_conn(state)?;
    ensure_no_records(conn)?;
    let n = curriculum::replace_units(conn, &units)
        .map_err(|e| HandlerErr::db_update(e, "curriculum_units"))?;
    state.invalidate_catalog();
    tracing::info!(units = n, "curriculum replaced");
    Ok(json!({ "unitCount": n }))
}

fn curriculum_seed_quran(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    ensure_no_records(conn)?;
    let n = curriculum::seed_quran(conn).map_err(|e| HandlerErr::db_update(e, "curriculum_units"))?;
    state.invalidate_catalog();
    tracing::info!(units = n, "curriculum reset to Quran");
    Ok(json!({ "unitCount": n }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "curriculum.list" => curriculum_list(state),
        "curriculum.replace" => curriculum_replace(state, &req.params),
        "curriculum.seedQuran" => curriculum_seed_quran(state),
        _ => return None,
    };
    Some(respond(req, result))
}

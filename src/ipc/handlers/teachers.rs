use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{db_conn, now_stamp, required_str, respond};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn teachers_list(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let mut stmt = conn.prepare(
        "SELECT id, full_name FROM teachers ORDER BY full_name COLLATE NOCASE, id",
    )?;
    let teachers = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "teachers": teachers }))
}

fn teachers_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let full_name = required_str(params, "fullName")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, full_name, created_at) VALUES(?, ?, ?)",
        (&id, &full_name, now_stamp()),
    )
    .map_err(|e| HandlerErr::db_update(e, "teachers"))?;
    Ok(json!({ "teacherId": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "teachers.list" => teachers_list(state),
        "teachers.create" => teachers_create(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}

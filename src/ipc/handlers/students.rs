use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    db_conn, now_stamp, optional_bool, optional_str, required_str, respond, student_exists,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::params_from_iter;
use serde_json::json;
use uuid::Uuid;

fn students_list(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let include_inactive = optional_bool(params, "includeInactive")?.unwrap_or(false);
    let class_name = optional_str(params, "className")?;

    let mut sql = String::from(
        "SELECT id, full_name, student_no, class_name, guardian_name, active
         FROM students WHERE 1 = 1",
    );
    let mut binds: Vec<Value> = Vec::new();
    if !include_inactive {
        sql.push_str(" AND active = 1");
    }
    if let Some(c) = class_name {
        sql.push_str(" AND class_name = ?");
        binds.push(Value::Text(c));
    }
    sql.push_str(" ORDER BY full_name COLLATE NOCASE, id");

    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
                "studentNo": r.get::<_, Option<String>>(2)?,
                "className": r.get::<_, Option<String>>(3)?,
                "guardianName": r.get::<_, Option<String>>(4)?,
                "active": r.get::<_, i64>(5)? != 0
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

fn students_create(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let full_name = required_str(params, "fullName")?;
    let student_no = optional_str(params, "studentNo")?;
    let class_name = optional_str(params, "className")?;
    let guardian_name = optional_str(params, "guardianName")?;
    let active = optional_bool(params, "active")?.unwrap_or(true);

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, full_name, student_no, class_name, guardian_name, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &full_name,
            &student_no,
            &class_name,
            &guardian_name,
            i64::from(active),
            now_stamp(),
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "students"))?;
    tracing::info!(student_id = %id, "student created");
    Ok(json!({ "studentId": id }))
}

fn students_update(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(params, "studentId")?;
    let Some(patch_value) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let mut sets: Vec<&'static str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    let keys = patch_value.as_object().map(|o| o.keys()).into_iter().flatten();
    for k in keys {
        match k.as_str() {
            "fullName" => {
                sets.push("full_name = ?");
                binds.push(Value::Text(required_str(patch_value, k)?));
            }
            "studentNo" | "className" | "guardianName" => {
                sets.push(match k.as_str() {
                    "studentNo" => "student_no = ?",
                    "className" => "class_name = ?",
                    _ => "guardian_name = ?",
                });
                binds.push(match optional_str(patch_value, k)? {
                    Some(s) => Value::Text(s),
                    None => Value::Null,
                });
            }
            "active" => {
                sets.push("active = ?");
                let active = optional_bool(patch_value, k)?
                    .ok_or_else(|| HandlerErr::bad_params("active must be boolean"))?;
                binds.push(Value::Integer(i64::from(active)));
            }
            other => {
                return Err(HandlerErr::bad_params(format!("unknown student field: {}", other)))
            }
        }
    }
    if sets.is_empty() {
        return Ok(json!({ "ok": true }));
    }
    sets.push("updated_at = ?");
    binds.push(Value::Text(now_stamp()));
    binds.push(Value::Text(student_id));

    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    conn.execute(&sql, params_from_iter(binds))
        .map_err(|e| HandlerErr::db_update(e, "students"))?;
    Ok(json!({ "ok": true }))
}

fn students_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(params, "studentId")?;
    let records: i64 = conn.query_row(
        "SELECT COUNT(*) FROM hafalan_records WHERE student_id = ?",
        [&student_id],
        |r| r.get(0),
    )?;
    if records > 0 {
        return Err(HandlerErr::new(
            "conflict",
            "student has hafalan records; deactivate instead",
        )
        .with_details(json!({ "recordCount": records })));
    }
    let n = conn
        .execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::db_update(e, "students"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, &req.params),
        "students.create" => students_create(state, &req.params),
        "students.update" => students_update(state, &req.params),
        "students.delete" => students_delete(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}

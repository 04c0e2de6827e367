use rusqlite::Connection;
use serde_json::json;

use crate::consistency::{self, ClassRow, StudentRow, UserRow};
use crate::ipc::error::ApiError;

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, ApiError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ApiError::bad_params(format!("missing {key}")))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn optional_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

pub fn student_json(s: &StudentRow) -> serde_json::Value {
    json!({
        "id": s.id,
        "rollNo": s.roll_no,
        "name": s.name,
        "fatherName": s.father_name,
        "classId": s.class_id,
        "contact": s.contact,
        "gender": s.gender,
        "age": s.age,
    })
}

/// Student with the class name joined in, for list/detail responses.
pub fn student_json_with_class(
    conn: &Connection,
    s: &StudentRow,
) -> Result<serde_json::Value, ApiError> {
    let mut v = student_json(s);
    let class_name = match s.class_id.as_deref() {
        Some(cid) => consistency::find_class(conn, cid)?.map(|c| c.name),
        None => None,
    };
    v["className"] = json!(class_name);
    Ok(v)
}

pub fn user_json(u: &UserRow) -> serde_json::Value {
    json!({
        "id": u.id,
        "name": u.name,
        "email": u.email,
        "role": u.role,
        "contact": u.contact,
        "gender": u.gender,
        "age": u.age,
    })
}

/// Class with teacher and roster denormalized, as list/detail responses
/// shape it. The roster and the teacher's name are derived reads.
pub fn class_json(conn: &Connection, c: &ClassRow) -> Result<serde_json::Value, ApiError> {
    let teacher = match c.class_teacher.as_deref() {
        Some(tid) => consistency::find_user(conn, tid)?
            .map(|u| json!({ "id": u.id, "name": u.name, "email": u.email })),
        None => None,
    };
    let students: Vec<serde_json::Value> = consistency::class_students(conn, &c.id)?
        .iter()
        .map(|s| json!({ "id": s.id, "name": s.name, "rollNo": s.roll_no }))
        .collect();
    Ok(json!({
        "id": c.id,
        "className": c.name,
        "classTeacher": teacher,
        "students": students,
        "studentCount": students.len(),
    }))
}

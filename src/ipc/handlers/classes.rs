use rusqlite::Connection;
use serde_json::json;

use crate::auth;
use crate::consistency;
use crate::ipc::error::{err, ok, ApiError};
use crate::ipc::helpers::{class_json, required_str, student_json};
use crate::ipc::types::{AppState, Request};
use crate::ledger;

fn classes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    auth::require_admin(&principal)?;
    let name = required_str(params, "className")?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("className must not be empty"));
    }
    let teacher_id = params.get("teacherId").and_then(|v| v.as_str());

    let class = consistency::create_class(conn, name, teacher_id)?;
    Ok(json!({
        "message": "Class created successfully",
        "class": class_json(conn, &class)?,
    }))
}

fn classes_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    auth::resolve_principal(conn, params)?;

    let mut stmt =
        conn.prepare("SELECT id, name, class_teacher FROM classes ORDER BY name")?;
    let classes = stmt
        .query_map([], |r| {
            Ok(consistency::ClassRow {
                id: r.get(0)?,
                name: r.get(1)?,
                class_teacher: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(classes.len());
    for c in &classes {
        out.push(class_json(conn, c)?);
    }
    Ok(json!({
        "message": "Classes fetched successfully",
        "count": out.len(),
        "classes": out,
    }))
}

fn classes_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    auth::resolve_principal(conn, params)?;
    let class_id = required_str(params, "classId")?;
    let class = consistency::require_class(conn, &class_id)?;
    Ok(json!({ "class": class_json(conn, &class)? }))
}

fn classes_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    auth::require_admin(&principal)?;
    let class_id = required_str(params, "classId")?;
    let name = required_str(params, "className")?;

    let class = consistency::rename_class(conn, &class_id, name.trim())?;
    Ok(json!({
        "message": "Class updated successfully",
        "class": class_json(conn, &class)?,
    }))
}

fn classes_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    auth::require_admin(&principal)?;
    let class_id = required_str(params, "classId")?;

    consistency::delete_class(conn, &class_id)?;
    Ok(json!({ "message": "Class deleted successfully" }))
}

fn classes_assign_teacher(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    auth::require_admin(&principal)?;
    let class_id = required_str(params, "classId")?;
    let teacher_id = required_str(params, "teacherId")?;

    let class = consistency::assign_teacher(conn, &class_id, &teacher_id)?;
    Ok(json!({
        "message": "Teacher assigned successfully",
        "class": class_json(conn, &class)?,
    }))
}

fn classes_remove_teacher(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    auth::require_admin(&principal)?;
    let class_id = required_str(params, "classId")?;

    let class = consistency::remove_teacher(conn, &class_id)?;
    Ok(json!({
        "message": "Teacher removed successfully",
        "class": class_json(conn, &class)?,
    }))
}

fn classes_add_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    auth::require_admin(&principal)?;
    let class_id = required_str(params, "classId")?;
    let student_id = required_str(params, "studentId")?;

    consistency::add_student_to_class(conn, &class_id, &student_id)?;
    let class = consistency::require_class(conn, &class_id)?;
    Ok(json!({
        "message": "Student added to class successfully",
        "class": class_json(conn, &class)?,
    }))
}

fn classes_remove_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    auth::require_admin(&principal)?;
    let class_id = required_str(params, "classId")?;
    let student_id = required_str(params, "studentId")?;

    consistency::remove_student_from_class(conn, &class_id, &student_id)?;
    Ok(json!({ "message": "Student removed from class successfully" }))
}

fn classes_students(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    auth::resolve_principal(conn, params)?;
    let class_id = required_str(params, "classId")?;
    let class = consistency::require_class(conn, &class_id)?;

    let students: Vec<serde_json::Value> = consistency::class_students(conn, &class_id)?
        .iter()
        .map(student_json)
        .collect();
    Ok(json!({
        "message": "Students fetched successfully",
        "className": class.name,
        "count": students.len(),
        "students": students,
    }))
}

fn classes_stats(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    auth::resolve_principal(conn, params)?;
    let class_id = required_str(params, "classId")?;
    let class = consistency::require_class(conn, &class_id)?;

    let teacher_name = match class.class_teacher.as_deref() {
        Some(tid) => consistency::find_user(conn, tid)?.map(|u| u.name),
        None => None,
    };
    let students = consistency::class_students(conn, &class_id)?;
    let male = students.iter().filter(|s| s.gender == "male").count();
    let female = students.iter().filter(|s| s.gender == "female").count();

    let tally = ledger::class_tally(conn, &class_id, None, None)?;

    Ok(json!({
        "message": "Class statistics fetched",
        "class": {
            "id": class.id,
            "className": class.name,
            "teacher": teacher_name.unwrap_or_else(|| "Not Assigned".to_string()),
        },
        "studentStats": {
            "total": students.len(),
            "male": male,
            "female": female,
        },
        "attendanceStats": {
            "totalRecords": tally.total,
            "presentCount": tally.present,
            "absentCount": tally.absent,
            "attendanceRate": tally.rate(),
        }
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    type Handler = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, ApiError>;
    let handler: Handler = match req.method.as_str() {
        "classes.create" => classes_create,
        "classes.list" => classes_list,
        "classes.get" => classes_get,
        "classes.update" => classes_update,
        "classes.delete" => classes_delete,
        "classes.assignTeacher" => classes_assign_teacher,
        "classes.removeTeacher" => classes_remove_teacher,
        "classes.addStudent" => classes_add_student,
        "classes.removeStudent" => classes_remove_student,
        "classes.students" => classes_students,
        "classes.stats" => classes_stats,
        _ => return None,
    };

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match handler(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}

use rusqlite::Connection;
use serde_json::json;

use crate::auth;
use crate::consistency::{self, now_ts};
use crate::ipc::error::{err, ok, ApiError};
use crate::ipc::helpers::{
    optional_i64, optional_str, required_str, student_json, student_json_with_class,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger;

fn validate_student_gender(gender: &str) -> Result<(), ApiError> {
    match gender {
        "male" | "female" => Ok(()),
        other => Err(ApiError::validation(format!(
            "invalid gender: {other} (expected male or female)"
        ))),
    }
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    auth::require_admin(&principal)?;

    let roll_no = required_str(params, "rollNo")?;
    let name = required_str(params, "name")?;
    let father_name = required_str(params, "fatherName")?;
    let class_id = required_str(params, "classId")?;
    let gender = required_str(params, "gender")?;
    validate_student_gender(&gender)?;
    let contact = optional_str(params, "contact");
    let age = optional_i64(params, "age");

    let student = consistency::create_student(
        conn,
        &roll_no,
        &name,
        &father_name,
        &class_id,
        contact.as_deref(),
        &gender,
        age,
    )?;
    Ok(json!({
        "message": "Student created successfully",
        "student": student_json(&student),
    }))
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    auth::resolve_principal(conn, params)?;
    let class_filter = optional_str(params, "classId");

    let students = match class_filter.as_deref() {
        Some(class_id) => {
            consistency::require_class(conn, class_id)?;
            consistency::class_students(conn, class_id)?
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, roll_no, name, father_name, class_id, contact, gender, age
                 FROM students ORDER BY roll_no",
            )?;
            let rows = stmt
                .query_map([], |r| {
                    Ok(consistency::StudentRow {
                        id: r.get(0)?,
                        roll_no: r.get(1)?,
                        name: r.get(2)?,
                        father_name: r.get(3)?,
                        class_id: r.get(4)?,
                        contact: r.get(5)?,
                        gender: r.get(6)?,
                        age: r.get(7)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };

    let mut out = Vec::with_capacity(students.len());
    for s in &students {
        out.push(student_json_with_class(conn, s)?);
    }
    Ok(json!({
        "message": "Students fetched successfully",
        "count": out.len(),
        "students": out,
    }))
}

fn students_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    auth::resolve_principal(conn, params)?;
    let student_id = required_str(params, "studentId")?;
    let student = consistency::require_student(conn, &student_id)?;
    Ok(json!({ "student": student_json_with_class(conn, &student)? }))
}

fn students_get_by_roll(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    auth::resolve_principal(conn, params)?;
    let roll_no = required_str(params, "rollNo")?;
    let student = consistency::find_student_by_roll(conn, &roll_no)?
        .ok_or_else(|| ApiError::not_found("student not found"))?;
    Ok(json!({ "student": student_json_with_class(conn, &student)? }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    auth::require_admin(&principal)?;
    let student_id = required_str(params, "studentId")?;
    let mut student = consistency::require_student(conn, &student_id)?;

    if let Some(roll_no) = optional_str(params, "rollNo") {
        if roll_no != student.roll_no {
            if consistency::roll_no_taken(conn, &roll_no, Some(&student_id))? {
                return Err(ApiError::conflict("roll number already exists"));
            }
            student.roll_no = roll_no;
        }
    }
    if let Some(class_id) = optional_str(params, "classId") {
        consistency::move_student(conn, &student_id, &class_id)?;
        student.class_id = Some(class_id);
    }
    if let Some(name) = optional_str(params, "name") {
        student.name = name;
    }
    if let Some(father_name) = optional_str(params, "fatherName") {
        student.father_name = father_name;
    }
    if let Some(contact) = optional_str(params, "contact") {
        student.contact = Some(contact);
    }
    if let Some(gender) = optional_str(params, "gender") {
        validate_student_gender(&gender)?;
        student.gender = gender;
    }
    if let Some(age) = optional_i64(params, "age") {
        student.age = Some(age);
    }

    conn.execute(
        "UPDATE students SET roll_no = ?, name = ?, father_name = ?, contact = ?, gender = ?, age = ?, updated_at = ?
         WHERE id = ?",
        (
            &student.roll_no,
            &student.name,
            &student.father_name,
            &student.contact,
            &student.gender,
            student.age,
            now_ts(),
            &student_id,
        ),
    )?;

    Ok(json!({
        "message": "Student updated successfully",
        "student": student_json_with_class(conn, &student)?,
    }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    auth::require_admin(&principal)?;
    let student_id = required_str(params, "studentId")?;

    consistency::delete_student(conn, &student_id)?;
    Ok(json!({ "message": "Student deleted successfully" }))
}

fn students_attendance(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    auth::resolve_principal(conn, params)?;
    let student_id = required_str(params, "studentId")?;
    let student = consistency::require_student(conn, &student_id)?;

    let start = match optional_str(params, "startDate") {
        Some(s) => Some(ledger::normalize_day(Some(&s))?),
        None => None,
    };
    let end = match optional_str(params, "endDate") {
        Some(s) => Some(ledger::normalize_day(Some(&s))?),
        None => None,
    };

    let clause = match (&start, &end) {
        (Some(_), Some(_)) => " AND a.date >= ?2 AND a.date <= ?3",
        (Some(_), None) => " AND a.date >= ?2",
        (None, Some(_)) => " AND a.date <= ?2",
        (None, None) => "",
    };
    let sql = format!(
        "SELECT a.id, a.date, a.status, c.name, u.name
         FROM attendance a
         LEFT JOIN classes c ON c.id = a.class_id
         LEFT JOIN users u ON u.id = a.marked_by
         WHERE a.student_id = ?1{clause}
         ORDER BY a.date DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "date": r.get::<_, String>(1)?,
            "status": r.get::<_, String>(2)?,
            "className": r.get::<_, Option<String>>(3)?,
            "markedBy": r.get::<_, Option<String>>(4)?,
        }))
    };
    let records: Vec<serde_json::Value> = match (&start, &end) {
        (Some(s), Some(e)) => stmt
            .query_map(rusqlite::params![student_id, s, e], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
        (Some(s), None) => stmt
            .query_map(rusqlite::params![student_id, s], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
        (None, Some(e)) => stmt
            .query_map(rusqlite::params![student_id, e], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
        (None, None) => stmt
            .query_map(rusqlite::params![student_id], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
    };

    let tally = ledger::student_tally(conn, &student_id, start.as_deref(), end.as_deref())?;
    Ok(json!({
        "message": "Attendance fetched successfully",
        "student": {
            "id": student.id,
            "name": student.name,
            "rollNo": student.roll_no,
        },
        "stats": {
            "totalDays": tally.total,
            "presentDays": tally.present,
            "absentDays": tally.absent,
            "attendancePercentage": tally.rate(),
        },
        "attendance": records,
    }))
}

// Bulk ingestion keeps per-record validation and dedup only; a bad row is
// reported and skipped, never failing the rows around it.
fn students_bulk_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    auth::require_admin(&principal)?;
    let Some(rows) = params.get("students").and_then(|v| v.as_array()) else {
        return Err(ApiError::validation("no student data provided"));
    };
    if rows.is_empty() {
        return Err(ApiError::validation("no student data provided"));
    }

    let mut success: Vec<String> = Vec::new();
    let mut failed: Vec<serde_json::Value> = Vec::new();

    for row in rows {
        let roll_no = row.get("rollNo").and_then(|v| v.as_str());
        let name = row.get("name").and_then(|v| v.as_str());
        let father_name = row.get("fatherName").and_then(|v| v.as_str());
        let class_id = row.get("classId").and_then(|v| v.as_str());
        let gender = row.get("gender").and_then(|v| v.as_str());
        let contact = row.get("contact").and_then(|v| v.as_str());
        let age = row.get("age").and_then(|v| v.as_i64());

        let mut missing: Vec<&str> = Vec::new();
        if roll_no.is_none() {
            missing.push("rollNo");
        }
        if name.is_none() {
            missing.push("name");
        }
        if father_name.is_none() {
            missing.push("fatherName");
        }
        if class_id.is_none() {
            missing.push("classId");
        }
        if gender.is_none() {
            missing.push("gender");
        }
        if !missing.is_empty() {
            failed.push(json!({
                "rollNo": roll_no.unwrap_or("?"),
                "reason": format!("missing fields: {}", missing.join(", ")),
            }));
            continue;
        }

        let (roll_no, name, father_name, class_id, gender) = (
            roll_no.unwrap_or_default(),
            name.unwrap_or_default(),
            father_name.unwrap_or_default(),
            class_id.unwrap_or_default(),
            gender.unwrap_or_default().to_lowercase(),
        );

        if validate_student_gender(&gender).is_err() {
            failed.push(json!({ "rollNo": roll_no, "reason": "invalid gender" }));
            continue;
        }
        match consistency::create_student(
            conn,
            roll_no,
            name,
            father_name,
            class_id,
            contact,
            &gender,
            age,
        ) {
            Ok(_) => success.push(roll_no.to_string()),
            Err(e) => {
                failed.push(json!({ "rollNo": roll_no, "reason": e.message }));
            }
        }
    }

    Ok(json!({
        "message": format!(
            "Import complete. {} added, {} failed.",
            success.len(),
            failed.len()
        ),
        "success": success,
        "failed": failed,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    type Handler = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, ApiError>;
    let handler: Handler = match req.method.as_str() {
        "students.create" => students_create,
        "students.list" => students_list,
        "students.get" => students_get,
        "students.getByRollNo" => students_get_by_roll,
        "students.update" => students_update,
        "students.delete" => students_delete,
        "students.attendance" => students_attendance,
        "students.bulkCreate" => students_bulk_create,
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

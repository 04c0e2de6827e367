use std::collections::BTreeMap;

use rusqlite::Connection;
use serde_json::json;

use crate::auth;
use crate::consistency;
use crate::ipc::error::{err, ok, ApiError};
use crate::ipc::helpers::{optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::ledger;

fn attendance_row_json(row: &ledger::AttendanceRow) -> serde_json::Value {
    json!({
        "id": row.id,
        "studentId": row.student_id,
        "classId": row.class_id,
        "markedBy": row.marked_by,
        "date": row.date,
        "status": row.status,
    })
}

fn normalized_range(
    params: &serde_json::Value,
) -> Result<(Option<String>, Option<String>), ApiError> {
    let start = match optional_str(params, "startDate") {
        Some(s) => Some(ledger::normalize_day(Some(&s))?),
        None => None,
    };
    let end = match optional_str(params, "endDate") {
        Some(s) => Some(ledger::normalize_day(Some(&s))?),
        None => None,
    };
    Ok((start, end))
}

fn attendance_mark(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    let class_id = required_str(params, "classId")?;
    let class = consistency::require_class(conn, &class_id)?;
    auth::require_class_access(&principal, class.class_teacher.as_deref())?;

    let day = ledger::normalize_day(optional_str(params, "date").as_deref())?;

    let Some(raw_records) = params.get("records").and_then(|v| v.as_array()) else {
        return Err(ApiError::bad_params("missing records"));
    };
    let mut entries: Vec<(String, String)> = Vec::with_capacity(raw_records.len());
    for r in raw_records {
        let student_id = r
            .get("studentId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ApiError::bad_params("record missing studentId"))?;
        let status = r
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ApiError::bad_params("record missing status"))?;
        let status = ledger::parse_status(status)?;
        entries.push((student_id.to_string(), status.to_string()));
    }

    let saved = ledger::mark_day(conn, &class_id, &day, &entries, &principal.id)?;
    Ok(json!({
        "message": "Attendance marked successfully",
        "date": day,
        "recordsCount": saved.len(),
        "records": saved.iter().map(attendance_row_json).collect::<Vec<_>>(),
    }))
}

fn attendance_mark_single(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    let student_id = required_str(params, "studentId")?;
    let class_id = required_str(params, "classId")?;
    consistency::require_student(conn, &student_id)?;
    let class = consistency::require_class(conn, &class_id)?;
    auth::require_class_access(&principal, class.class_teacher.as_deref())?;

    let day = ledger::normalize_day(optional_str(params, "date").as_deref())?;
    let status = ledger::parse_status(&required_str(params, "status")?)?;

    let row = ledger::mark_single(conn, &student_id, &class_id, &day, status, &principal.id)?;
    Ok(json!({
        "message": "Attendance marked successfully",
        "attendance": attendance_row_json(&row),
    }))
}

fn attendance_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    let attendance_id = required_str(params, "attendanceId")?;
    let status = ledger::parse_status(&required_str(params, "status")?)?;

    let record = ledger::require_record(conn, &attendance_id)?;
    let class = consistency::require_class(conn, &record.class_id)?;
    auth::require_class_access(&principal, class.class_teacher.as_deref())?;

    let updated = ledger::update_status(conn, &attendance_id, status)?;
    Ok(json!({
        "message": "Attendance updated successfully",
        "attendance": attendance_row_json(&updated),
    }))
}

fn attendance_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    auth::require_admin(&principal)?;
    let attendance_id = required_str(params, "attendanceId")?;

    ledger::delete_record(conn, &attendance_id)?;
    Ok(json!({ "message": "Attendance deleted successfully" }))
}

fn attendance_by_class(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    let class_id = required_str(params, "classId")?;
    let class = consistency::require_class(conn, &class_id)?;
    auth::require_class_access(&principal, class.class_teacher.as_deref())?;

    let day = match optional_str(params, "date") {
        Some(d) => Some(ledger::normalize_day(Some(&d))?),
        None => None,
    };

    let sql = format!(
        "SELECT a.id, a.date, a.status, a.student_id, s.name, s.roll_no, u.name
         FROM attendance a
         LEFT JOIN students s ON s.id = a.student_id
         LEFT JOIN users u ON u.id = a.marked_by
         WHERE a.class_id = ?1{}
         ORDER BY a.date DESC, s.roll_no",
        if day.is_some() { " AND a.date = ?2" } else { "" }
    );
    let mut stmt = conn.prepare(&sql)?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<(String, serde_json::Value)> {
        let date: String = r.get(1)?;
        let record = json!({
            "id": r.get::<_, String>(0)?,
            "date": date,
            "status": r.get::<_, String>(2)?,
            "studentId": r.get::<_, String>(3)?,
            "studentName": r.get::<_, Option<String>>(4)?,
            "rollNo": r.get::<_, Option<String>>(5)?,
            "markedBy": r.get::<_, Option<String>>(6)?,
        });
        Ok((date, record))
    };
    let rows: Vec<(String, serde_json::Value)> = match &day {
        Some(d) => stmt
            .query_map(rusqlite::params![class_id, d], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt
            .query_map(rusqlite::params![class_id], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
    };

    let total = rows.len();
    // BTreeMap keeps the day groups ordered; reversed below for newest-first.
    let mut grouped: BTreeMap<String, Vec<serde_json::Value>> = BTreeMap::new();
    for (date, record) in rows {
        grouped.entry(date).or_default().push(record);
    }
    let mut attendance = serde_json::Map::new();
    for (date, records) in grouped.into_iter().rev() {
        attendance.insert(date, json!(records));
    }

    Ok(json!({
        "message": "Attendance fetched successfully",
        "className": class.name,
        "totalRecords": total,
        "attendance": attendance,
    }))
}

fn attendance_class_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    let class_id = required_str(params, "classId")?;
    let class = consistency::require_class(conn, &class_id)?;
    auth::require_class_access(&principal, class.class_teacher.as_deref())?;

    let (start, end) = normalized_range(params)?;
    let tallies = ledger::class_tallies(conn, &class_id, start.as_deref(), end.as_deref())?;

    let summary: Vec<serde_json::Value> = consistency::class_students(conn, &class_id)?
        .iter()
        .map(|s| {
            let tally = tallies.get(&s.id).copied().unwrap_or_default();
            json!({
                "student": {
                    "id": s.id,
                    "name": s.name,
                    "rollNo": s.roll_no,
                },
                "totalDays": tally.total,
                "presentDays": tally.present,
                "absentDays": tally.absent,
                "attendancePercentage": tally.rate(),
            })
        })
        .collect();

    Ok(json!({
        "message": "Attendance summary fetched",
        "className": class.name,
        "summary": summary,
    }))
}

fn attendance_today(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    let class_id = required_str(params, "classId")?;
    let class = consistency::require_class(conn, &class_id)?;
    auth::require_class_access(&principal, class.class_teacher.as_deref())?;

    let today = ledger::normalize_day(None)?;
    let mut stmt = conn.prepare(
        "SELECT id, student_id, status FROM attendance WHERE class_id = ? AND date = ?",
    )?;
    let marked: Vec<(String, String, String)> = stmt
        .query_map(rusqlite::params![class_id, today], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let students = consistency::class_students(conn, &class_id)?;
    let statuses: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            let record = marked.iter().find(|(_, sid, _)| sid == &s.id);
            json!({
                "student": {
                    "id": s.id,
                    "name": s.name,
                    "rollNo": s.roll_no,
                },
                "isMarked": record.is_some(),
                "status": record.map(|(_, _, status)| status.clone()),
                "attendanceId": record.map(|(id, _, _)| id.clone()),
            })
        })
        .collect();
    let all_marked = !students.is_empty()
        && students
            .iter()
            .all(|s| marked.iter().any(|(_, sid, _)| sid == &s.id));

    Ok(json!({
        "message": "Today's attendance status",
        "date": today,
        "className": class.name,
        "allMarked": all_marked,
        "markedCount": marked.len(),
        "totalStudents": students.len(),
        "students": statuses,
    }))
}

fn attendance_report(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    auth::require_admin(&principal)?;
    let (start, end) = normalized_range(params)?;

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

    let mut report = Vec::with_capacity(classes.len());
    for c in &classes {
        let teacher_name = match c.class_teacher.as_deref() {
            Some(tid) => consistency::find_user(conn, tid)?.map(|u| u.name),
            None => None,
        };
        let tally = ledger::class_tally(conn, &c.id, start.as_deref(), end.as_deref())?;
        let student_count = consistency::class_students(conn, &c.id)?.len();
        report.push(json!({
            "class": {
                "id": c.id,
                "className": c.name,
                "teacher": teacher_name.unwrap_or_else(|| "Not Assigned".to_string()),
            },
            "studentCount": student_count,
            "totalRecords": tally.total,
            "presentCount": tally.present,
            "absentCount": tally.absent,
            "attendanceRate": tally.rate(),
        }));
    }

    Ok(json!({
        "message": "Overall attendance report",
        "report": report,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    type Handler = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, ApiError>;
    let handler: Handler = match req.method.as_str() {
        "attendance.mark" => attendance_mark,
        "attendance.markSingle" => attendance_mark_single,
        "attendance.update" => attendance_update,
        "attendance.delete" => attendance_delete,
        "attendance.byClass" => attendance_by_class,
        "attendance.classSummary" => attendance_class_summary,
        "attendance.today" => attendance_today,
        "attendance.report" => attendance_report,
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

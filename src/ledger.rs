//! Attendance ledger: one row per student per calendar day. A tuple moves
//! from unmarked to marked on insert, stays marked through status updates,
//! and only returns to unmarked via explicit delete.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::consistency::{self, now_ts};
use crate::ipc::error::ApiError;

pub const STATUS_PRESENT: &str = "Present";
pub const STATUS_ABSENT: &str = "Absent";

pub fn parse_status(raw: &str) -> Result<&'static str, ApiError> {
    match raw {
        "Present" => Ok(STATUS_PRESENT),
        "Absent" => Ok(STATUS_ABSENT),
        _ => Err(ApiError::validation(format!(
            "invalid status: {raw} (expected Present or Absent)"
        ))),
    }
}

/// Normalizes an incoming date to calendar-day granularity. Accepts a plain
/// `YYYY-MM-DD` day or an RFC3339 timestamp (time-of-day dropped, UTC);
/// a missing date means today. Every comparison in the ledger uses the
/// returned `YYYY-MM-DD` form.
pub fn normalize_day(raw: Option<&str>) -> Result<String, ApiError> {
    let Some(raw) = raw else {
        return Ok(Utc::now().date_naive().format("%Y-%m-%d").to_string());
    };
    let t = raw.trim();
    if let Ok(day) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Ok(day.format("%Y-%m-%d").to_string());
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(t) {
        return Ok(ts
            .with_timezone(&Utc)
            .date_naive()
            .format("%Y-%m-%d")
            .to_string());
    }
    Err(ApiError::validation(format!(
        "invalid date: {t} (expected YYYY-MM-DD or RFC3339)"
    )))
}

#[derive(Debug, Clone)]
pub struct AttendanceRow {
    pub id: String,
    pub student_id: String,
    pub class_id: String,
    pub marked_by: String,
    pub date: String,
    pub status: String,
}

const ATTENDANCE_COLS: &str = "id, student_id, class_id, marked_by, date, status";

fn attendance_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRow> {
    Ok(AttendanceRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        class_id: r.get(2)?,
        marked_by: r.get(3)?,
        date: r.get(4)?,
        status: r.get(5)?,
    })
}

pub fn find_record(
    conn: &Connection,
    attendance_id: &str,
) -> Result<Option<AttendanceRow>, ApiError> {
    let sql = format!("SELECT {ATTENDANCE_COLS} FROM attendance WHERE id = ?");
    let row = conn
        .query_row(&sql, [attendance_id], |r| attendance_from_row(r))
        .optional()?;
    Ok(row)
}

pub fn require_record(conn: &Connection, attendance_id: &str) -> Result<AttendanceRow, ApiError> {
    find_record(conn, attendance_id)?
        .ok_or_else(|| ApiError::not_found("attendance record not found"))
}

fn class_day_marked(conn: &Connection, class_id: &str, day: &str) -> Result<bool, ApiError> {
    let marked = conn
        .query_row(
            "SELECT 1 FROM attendance WHERE class_id = ? AND date = ? LIMIT 1",
            (class_id, day),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    Ok(marked)
}

fn student_day_marked(conn: &Connection, student_id: &str, day: &str) -> Result<bool, ApiError> {
    let marked = conn
        .query_row(
            "SELECT 1 FROM attendance WHERE student_id = ? AND date = ? LIMIT 1",
            (student_id, day),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    Ok(marked)
}

/// Batch-marks one class-day. All-or-nothing: any existing record for the
/// class-day is a conflict, every listed student must currently belong to
/// the class, and the inserts run in a single transaction.
pub fn mark_day(
    conn: &Connection,
    class_id: &str,
    day: &str,
    entries: &[(String, String)],
    marked_by: &str,
) -> Result<Vec<AttendanceRow>, ApiError> {
    if entries.is_empty() {
        return Err(ApiError::validation("no attendance records provided"));
    }
    if class_day_marked(conn, class_id, day)? {
        return Err(ApiError::conflict(
            "attendance already marked for this date",
        ));
    }

    let roster: Vec<String> = consistency::class_students(conn, class_id)?
        .into_iter()
        .map(|s| s.id)
        .collect();
    for (student_id, _) in entries {
        if !roster.iter().any(|id| id == student_id) {
            return Err(ApiError::validation(format!(
                "student {student_id} does not belong to this class"
            ))
            .with_details(serde_json::json!({ "studentId": student_id })));
        }
    }
    for (student_id, _) in entries {
        // Canonical uniqueness is per student-day, so a row written through
        // the single-mark path also blocks the batch.
        if student_day_marked(conn, student_id, day)? {
            return Err(ApiError::conflict(format!(
                "attendance already marked for student {student_id} on this date"
            )));
        }
    }

    let ts = now_ts();
    let tx = conn.unchecked_transaction()?;
    let mut saved = Vec::with_capacity(entries.len());
    for (student_id, status) in entries {
        let row = AttendanceRow {
            id: Uuid::new_v4().to_string(),
            student_id: student_id.clone(),
            class_id: class_id.to_string(),
            marked_by: marked_by.to_string(),
            date: day.to_string(),
            status: status.clone(),
        };
        tx.execute(
            "INSERT INTO attendance(id, student_id, class_id, marked_by, date, status, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &row.id,
                &row.student_id,
                &row.class_id,
                &row.marked_by,
                &row.date,
                &row.status,
                &ts,
                &ts,
            ),
        )?;
        saved.push(row);
    }
    tx.commit()?;
    Ok(saved)
}

/// Marks a single student for one day. Uniqueness is keyed on the student
/// and the day alone, so the same logical fact can never gain a second row
/// through a different class.
pub fn mark_single(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
    day: &str,
    status: &str,
    marked_by: &str,
) -> Result<AttendanceRow, ApiError> {
    if student_day_marked(conn, student_id, day)? {
        return Err(ApiError::conflict(
            "attendance already marked for this student on this date",
        ));
    }

    let ts = now_ts();
    let row = AttendanceRow {
        id: Uuid::new_v4().to_string(),
        student_id: student_id.to_string(),
        class_id: class_id.to_string(),
        marked_by: marked_by.to_string(),
        date: day.to_string(),
        status: status.to_string(),
    };
    conn.execute(
        "INSERT INTO attendance(id, student_id, class_id, marked_by, date, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &row.id,
            &row.student_id,
            &row.class_id,
            &row.marked_by,
            &row.date,
            &row.status,
            &ts,
            &ts,
        ),
    )?;
    Ok(row)
}

pub fn update_status(
    conn: &Connection,
    attendance_id: &str,
    status: &str,
) -> Result<AttendanceRow, ApiError> {
    let mut record = require_record(conn, attendance_id)?;
    conn.execute(
        "UPDATE attendance SET status = ?, updated_at = ? WHERE id = ?",
        (status, now_ts(), attendance_id),
    )?;
    record.status = status.to_string();
    Ok(record)
}

pub fn delete_record(conn: &Connection, attendance_id: &str) -> Result<(), ApiError> {
    require_record(conn, attendance_id)?;
    conn.execute("DELETE FROM attendance WHERE id = ?", [attendance_id])?;
    Ok(())
}

// ---- aggregation ----

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Tally {
    pub total: i64,
    pub present: i64,
    pub absent: i64,
}

impl Tally {
    pub fn record(&mut self, status: &str) {
        self.total += 1;
        if status == STATUS_PRESENT {
            self.present += 1;
        } else {
            self.absent += 1;
        }
    }

    pub fn rate(&self) -> String {
        format_rate(self.present, self.total)
    }
}

/// Two-decimal percentage, or "N/A" when there is nothing to divide by.
pub fn format_rate(present: i64, total: i64) -> String {
    if total <= 0 {
        return "N/A".to_string();
    }
    format!("{:.2}%", (present as f64 / total as f64) * 100.0)
}

fn range_clause(start: Option<&str>, end: Option<&str>) -> &'static str {
    match (start.is_some(), end.is_some()) {
        (true, true) => " AND date >= ?2 AND date <= ?3",
        (true, false) => " AND date >= ?2",
        (false, true) => " AND date <= ?2",
        (false, false) => "",
    }
}

pub fn student_tally(
    conn: &Connection,
    student_id: &str,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<Tally, ApiError> {
    let sql = format!(
        "SELECT status, COUNT(*) FROM attendance WHERE student_id = ?1{} GROUP BY status",
        range_clause(start, end)
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut tally = Tally::default();
    let rows: Vec<(String, i64)> = match (start, end) {
        (Some(s), Some(e)) => stmt
            .query_map(rusqlite::params![student_id, s, e], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?,
        (Some(s), None) => stmt
            .query_map(rusqlite::params![student_id, s], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?,
        (None, Some(e)) => stmt
            .query_map(rusqlite::params![student_id, e], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?,
        (None, None) => stmt
            .query_map(rusqlite::params![student_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?,
    };
    for (status, count) in rows {
        tally.total += count;
        if status == STATUS_PRESENT {
            tally.present += count;
        } else {
            tally.absent += count;
        }
    }
    Ok(tally)
}

/// Per-student tallies for one class over an optional day range.
pub fn class_tallies(
    conn: &Connection,
    class_id: &str,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<HashMap<String, Tally>, ApiError> {
    let sql = format!(
        "SELECT student_id, status, COUNT(*) FROM attendance WHERE class_id = ?1{} GROUP BY student_id, status",
        range_clause(start, end)
    );
    let mut stmt = conn.prepare(&sql)?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String, i64)> {
        Ok((r.get(0)?, r.get(1)?, r.get(2)?))
    };
    let rows: Vec<(String, String, i64)> = match (start, end) {
        (Some(s), Some(e)) => stmt
            .query_map(rusqlite::params![class_id, s, e], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
        (Some(s), None) => stmt
            .query_map(rusqlite::params![class_id, s], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
        (None, Some(e)) => stmt
            .query_map(rusqlite::params![class_id, e], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
        (None, None) => stmt
            .query_map(rusqlite::params![class_id], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
    };

    let mut by_student: HashMap<String, Tally> = HashMap::new();
    for (student_id, status, count) in rows {
        let tally = by_student.entry(student_id).or_default();
        tally.total += count;
        if status == STATUS_PRESENT {
            tally.present += count;
        } else {
            tally.absent += count;
        }
    }
    Ok(by_student)
}

/// Whole-class tally (every record for the class in range).
pub fn class_tally(
    conn: &Connection,
    class_id: &str,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<Tally, ApiError> {
    let per_student = class_tallies(conn, class_id, start, end)?;
    let mut tally = Tally::default();
    for t in per_student.values() {
        tally.total += t.total;
        tally.present += t.present;
        tally.absent += t.absent;
    }
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consistency::{create_class, create_student};
    use crate::db;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn open_test_db(prefix: &str) -> Connection {
        let dir = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        db::open_db(&dir).expect("open test db")
    }

    fn insert_admin(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO users(id, name, email, role, created_at) VALUES(?, ?, ?, 'admin', ?)",
            (id, "Admin", format!("{id}@example.com"), now_ts()),
        )
        .expect("insert admin");
    }

    #[test]
    fn rate_formatting_matches_report_contract() {
        assert_eq!(format_rate(7, 10), "70.00%");
        assert_eq!(format_rate(1, 1), "100.00%");
        assert_eq!(format_rate(1, 3), "33.33%");
        assert_eq!(format_rate(0, 0), "N/A");
    }

    #[test]
    fn tally_accumulates_by_status() {
        let mut t = Tally::default();
        t.record(STATUS_PRESENT);
        t.record(STATUS_ABSENT);
        t.record(STATUS_PRESENT);
        assert_eq!(t.total, 3);
        assert_eq!(t.present, 2);
        assert_eq!(t.absent, 1);
        assert_eq!(t.rate(), "66.67%");
    }

    #[test]
    fn day_normalization_truncates_time() {
        assert_eq!(
            normalize_day(Some("2025-01-10")).expect("plain day"),
            "2025-01-10"
        );
        assert_eq!(
            normalize_day(Some("2025-01-10T15:42:07Z")).expect("rfc3339"),
            "2025-01-10"
        );
        assert_eq!(
            normalize_day(Some("2025-01-11T01:30:00+05:00")).expect("offset"),
            "2025-01-10"
        );
        assert!(normalize_day(Some("10/01/2025")).is_err());
        // default is today, shaped like a day key
        let today = normalize_day(None).expect("today");
        assert_eq!(today.len(), 10);
    }

    #[test]
    fn status_enum_is_closed() {
        assert_eq!(parse_status("Present").expect("present"), STATUS_PRESENT);
        assert_eq!(parse_status("Absent").expect("absent"), STATUS_ABSENT);
        assert_eq!(
            parse_status("Late").expect_err("late").code,
            "validation"
        );
    }

    #[test]
    fn batch_then_batch_same_day_conflicts() {
        let conn = open_test_db("schoolbook-ledger-batch");
        insert_admin(&conn, "a1");
        let class = create_class(&conn, "10-A", None).expect("class");
        let s = create_student(&conn, "101", "S", "F", &class.id, None, "male", None)
            .expect("student");

        let entries = vec![(s.id.clone(), STATUS_PRESENT.to_string())];
        let saved = mark_day(&conn, &class.id, "2025-01-10", &entries, "a1").expect("first mark");
        assert_eq!(saved.len(), 1);

        let err = mark_day(&conn, &class.id, "2025-01-10", &entries, "a1")
            .expect_err("second mark must conflict");
        assert_eq!(err.code, "conflict");
    }

    #[test]
    fn single_mark_blocks_batch_for_same_student_day() {
        let conn = open_test_db("schoolbook-ledger-crosspath");
        insert_admin(&conn, "a1");
        let a = create_class(&conn, "A", None).expect("class a");
        let b = create_class(&conn, "B", None).expect("class b");
        let s = create_student(&conn, "9", "S", "F", &a.id, None, "female", None)
            .expect("student");

        mark_single(&conn, &s.id, &b.id, "2025-02-01", STATUS_ABSENT, "a1")
            .expect("single mark via other class");

        let err = mark_single(&conn, &s.id, &a.id, "2025-02-01", STATUS_PRESENT, "a1")
            .expect_err("same student-day via home class");
        assert_eq!(err.code, "conflict");
    }

    #[test]
    fn batch_rejects_non_members_by_id() {
        let conn = open_test_db("schoolbook-ledger-membership");
        insert_admin(&conn, "a1");
        let a = create_class(&conn, "A", None).expect("class a");
        let b = create_class(&conn, "B", None).expect("class b");
        let outsider = create_student(&conn, "55", "S", "F", &b.id, None, "male", None)
            .expect("student");

        let entries = vec![(outsider.id.clone(), STATUS_PRESENT.to_string())];
        let err = mark_day(&conn, &a.id, "2025-03-01", &entries, "a1")
            .expect_err("outsider must be rejected");
        assert_eq!(err.code, "validation");
        assert!(err.message.contains(&outsider.id));
    }

    #[test]
    fn update_keeps_tuple_marked_with_new_status() {
        let conn = open_test_db("schoolbook-ledger-update");
        insert_admin(&conn, "a1");
        let class = create_class(&conn, "C", None).expect("class");
        let s = create_student(&conn, "3", "S", "F", &class.id, None, "male", None)
            .expect("student");
        let row = mark_single(&conn, &s.id, &class.id, "2025-04-01", STATUS_PRESENT, "a1")
            .expect("mark");

        let updated = update_status(&conn, &row.id, STATUS_ABSENT).expect("update");
        assert_eq!(updated.status, STATUS_ABSENT);

        delete_record(&conn, &row.id).expect("delete");
        assert!(find_record(&conn, &row.id).expect("lookup").is_none());
        // deletion returns the tuple to unmarked, so marking works again
        mark_single(&conn, &s.id, &class.id, "2025-04-01", STATUS_PRESENT, "a1")
            .expect("re-mark after delete");
    }

    #[test]
    fn tallies_respect_date_range() {
        let conn = open_test_db("schoolbook-ledger-range");
        insert_admin(&conn, "a1");
        let class = create_class(&conn, "R", None).expect("class");
        let s = create_student(&conn, "12", "S", "F", &class.id, None, "female", None)
            .expect("student");

        for (day, status) in [
            ("2025-05-01", STATUS_PRESENT),
            ("2025-05-02", STATUS_ABSENT),
            ("2025-05-03", STATUS_PRESENT),
        ] {
            mark_single(&conn, &s.id, &class.id, day, status, "a1").expect("mark");
        }

        let all = student_tally(&conn, &s.id, None, None).expect("all");
        assert_eq!(all.total, 3);
        assert_eq!(all.rate(), "66.67%");

        let windowed =
            student_tally(&conn, &s.id, Some("2025-05-02"), Some("2025-05-03")).expect("window");
        assert_eq!(windowed.total, 2);
        assert_eq!(windowed.present, 1);

        let by_student = class_tallies(&conn, &class.id, None, None).expect("class");
        assert_eq!(by_student.get(&s.id).map(|t| t.total), Some(3));
    }
}

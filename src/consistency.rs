//! Cross-entity rules that keep users, classes, students and attendance
//! referentially consistent. Every multi-entity mutation here runs inside a
//! single SQLite transaction so the relationships never observably diverge.
//!
//! Membership and teacher assignment each have a single source of truth
//! (`students.class_id`, `classes.class_teacher`); rosters and a teacher's
//! assigned classes are derived from them on read.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::auth::Role;
use crate::ipc::error::ApiError;

#[derive(Debug, Clone)]
pub struct ClassRow {
    pub id: String,
    pub name: String,
    pub class_teacher: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub roll_no: String,
    pub name: String,
    pub father_name: String,
    pub class_id: Option<String>,
    pub contact: Option<String>,
    pub gender: String,
    pub age: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub contact: Option<String>,
    pub gender: Option<String>,
    pub age: Option<i64>,
}

pub fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

// ---- lookups ----

pub fn find_class(conn: &Connection, class_id: &str) -> Result<Option<ClassRow>, ApiError> {
    let row = conn
        .query_row(
            "SELECT id, name, class_teacher FROM classes WHERE id = ?",
            [class_id],
            |r| {
                Ok(ClassRow {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    class_teacher: r.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn require_class(conn: &Connection, class_id: &str) -> Result<ClassRow, ApiError> {
    find_class(conn, class_id)?.ok_or_else(|| ApiError::not_found("class not found"))
}

fn student_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        roll_no: r.get(1)?,
        name: r.get(2)?,
        father_name: r.get(3)?,
        class_id: r.get(4)?,
        contact: r.get(5)?,
        gender: r.get(6)?,
        age: r.get(7)?,
    })
}

const STUDENT_COLS: &str = "id, roll_no, name, father_name, class_id, contact, gender, age";

pub fn find_student(conn: &Connection, student_id: &str) -> Result<Option<StudentRow>, ApiError> {
    let sql = format!("SELECT {STUDENT_COLS} FROM students WHERE id = ?");
    let row = conn
        .query_row(&sql, [student_id], |r| student_from_row(r))
        .optional()?;
    Ok(row)
}

pub fn require_student(conn: &Connection, student_id: &str) -> Result<StudentRow, ApiError> {
    find_student(conn, student_id)?.ok_or_else(|| ApiError::not_found("student not found"))
}

pub fn find_student_by_roll(
    conn: &Connection,
    roll_no: &str,
) -> Result<Option<StudentRow>, ApiError> {
    let sql = format!("SELECT {STUDENT_COLS} FROM students WHERE roll_no = ?");
    let row = conn
        .query_row(&sql, [roll_no], |r| student_from_row(r))
        .optional()?;
    Ok(row)
}

pub fn find_user(conn: &Connection, user_id: &str) -> Result<Option<UserRow>, ApiError> {
    let row = conn
        .query_row(
            "SELECT id, name, email, role, contact, gender, age FROM users WHERE id = ?",
            [user_id],
            |r| {
                Ok(UserRow {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    email: r.get(2)?,
                    role: r.get(3)?,
                    contact: r.get(4)?,
                    gender: r.get(5)?,
                    age: r.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Resolves a user that must exist and hold the teacher role.
pub fn require_teacher(conn: &Connection, user_id: &str) -> Result<UserRow, ApiError> {
    let user = find_user(conn, user_id)?.ok_or_else(|| ApiError::not_found("teacher not found"))?;
    if Role::parse(&user.role) != Some(Role::Teacher) {
        return Err(ApiError::not_found("teacher not found"));
    }
    Ok(user)
}

// ---- advisory uniqueness checks (the unique index is the backstop) ----

pub fn class_name_taken(
    conn: &Connection,
    name: &str,
    exclude_id: Option<&str>,
) -> Result<bool, ApiError> {
    let taken = conn
        .query_row(
            "SELECT 1 FROM classes WHERE name = ? AND id != COALESCE(?, '')",
            (name, exclude_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    Ok(taken)
}

pub fn roll_no_taken(
    conn: &Connection,
    roll_no: &str,
    exclude_id: Option<&str>,
) -> Result<bool, ApiError> {
    let taken = conn
        .query_row(
            "SELECT 1 FROM students WHERE roll_no = ? AND id != COALESCE(?, '')",
            (roll_no, exclude_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    Ok(taken)
}

pub fn email_taken(
    conn: &Connection,
    email: &str,
    exclude_id: Option<&str>,
) -> Result<bool, ApiError> {
    let taken = conn
        .query_row(
            "SELECT 1 FROM users WHERE email = ? AND id != COALESCE(?, '')",
            (email, exclude_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    Ok(taken)
}

// ---- derived reads ----

/// A teacher's assigned classes, computed from `classes.class_teacher`
/// rather than stored, so the reverse index can never drift.
pub fn assigned_classes(conn: &Connection, teacher_id: &str) -> Result<Vec<ClassRow>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, class_teacher FROM classes WHERE class_teacher = ? ORDER BY name",
    )?;
    let rows = stmt
        .query_map([teacher_id], |r| {
            Ok(ClassRow {
                id: r.get(0)?,
                name: r.get(1)?,
                class_teacher: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Class roster, derived from `students.class_id`, roll order ascending.
pub fn class_students(conn: &Connection, class_id: &str) -> Result<Vec<StudentRow>, ApiError> {
    let sql =
        format!("SELECT {STUDENT_COLS} FROM students WHERE class_id = ? ORDER BY roll_no");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([class_id], |r| student_from_row(r))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---- class mutations ----

pub fn create_class(
    conn: &Connection,
    name: &str,
    teacher_id: Option<&str>,
) -> Result<ClassRow, ApiError> {
    if class_name_taken(conn, name, None)? {
        return Err(ApiError::conflict("class name already exists"));
    }
    if let Some(tid) = teacher_id {
        require_teacher(conn, tid)?;
    }

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, class_teacher, created_at) VALUES(?, ?, ?, ?)",
        (&class_id, name, teacher_id, now_ts()),
    )?;
    Ok(ClassRow {
        id: class_id,
        name: name.to_string(),
        class_teacher: teacher_id.map(|s| s.to_string()),
    })
}

pub fn rename_class(conn: &Connection, class_id: &str, name: &str) -> Result<ClassRow, ApiError> {
    let mut class = require_class(conn, class_id)?;
    if name != class.name {
        if class_name_taken(conn, name, Some(class_id))? {
            return Err(ApiError::conflict("class name already exists"));
        }
        conn.execute(
            "UPDATE classes SET name = ? WHERE id = ?",
            (name, class_id),
        )?;
        class.name = name.to_string();
    }
    Ok(class)
}

/// Reassignment detaches the previous teacher and attaches the new one in
/// one statement; both sides read the same column so no ordering window
/// exists for a class to appear under two teachers.
pub fn assign_teacher(
    conn: &Connection,
    class_id: &str,
    teacher_id: &str,
) -> Result<ClassRow, ApiError> {
    require_teacher(conn, teacher_id)?;
    let mut class = require_class(conn, class_id)?;

    conn.execute(
        "UPDATE classes SET class_teacher = ? WHERE id = ?",
        (teacher_id, class_id),
    )?;
    class.class_teacher = Some(teacher_id.to_string());
    Ok(class)
}

pub fn remove_teacher(conn: &Connection, class_id: &str) -> Result<ClassRow, ApiError> {
    let mut class = require_class(conn, class_id)?;
    if class.class_teacher.is_none() {
        return Err(ApiError::validation("no teacher assigned to this class"));
    }

    conn.execute(
        "UPDATE classes SET class_teacher = NULL WHERE id = ?",
        [class_id],
    )?;
    class.class_teacher = None;
    Ok(class)
}

// ---- student membership ----

/// Adds a student to a class; a student already in another class is moved,
/// which detaches the old membership and attaches the new one atomically
/// because `class_id` is the only record of membership.
pub fn add_student_to_class(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
) -> Result<(), ApiError> {
    require_class(conn, class_id)?;
    let student = require_student(conn, student_id)?;

    if student.class_id.as_deref() == Some(class_id) {
        return Err(ApiError::conflict("student already in this class"));
    }

    conn.execute(
        "UPDATE students SET class_id = ?, updated_at = ? WHERE id = ?",
        (class_id, now_ts(), student_id),
    )?;
    Ok(())
}

/// Membership change on behalf of a student update: same detach/attach as
/// [`add_student_to_class`] but idempotent when the student is already a
/// member of the target class.
pub fn move_student(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
) -> Result<(), ApiError> {
    let student = require_student(conn, student_id)?;
    if student.class_id.as_deref() == Some(class_id) {
        return Ok(());
    }
    require_class(conn, class_id)?;
    conn.execute(
        "UPDATE students SET class_id = ?, updated_at = ? WHERE id = ?",
        (class_id, now_ts(), student_id),
    )?;
    Ok(())
}

pub fn remove_student_from_class(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
) -> Result<(), ApiError> {
    require_class(conn, class_id)?;
    let student = require_student(conn, student_id)?;
    if student.class_id.as_deref() != Some(class_id) {
        return Err(ApiError::validation("student is not in this class"));
    }

    conn.execute(
        "UPDATE students SET class_id = NULL, updated_at = ? WHERE id = ?",
        (now_ts(), student_id),
    )?;
    Ok(())
}

pub fn create_student(
    conn: &Connection,
    roll_no: &str,
    name: &str,
    father_name: &str,
    class_id: &str,
    contact: Option<&str>,
    gender: &str,
    age: Option<i64>,
) -> Result<StudentRow, ApiError> {
    if roll_no_taken(conn, roll_no, None)? {
        return Err(ApiError::conflict("roll number already exists"));
    }
    require_class(conn, class_id)?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, roll_no, name, father_name, class_id, contact, gender, age, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            roll_no,
            name,
            father_name,
            class_id,
            contact,
            gender,
            age,
            now_ts(),
        ),
    )?;
    Ok(StudentRow {
        id: student_id,
        roll_no: roll_no.to_string(),
        name: name.to_string(),
        father_name: father_name.to_string(),
        class_id: Some(class_id.to_string()),
        contact: contact.map(|s| s.to_string()),
        gender: gender.to_string(),
        age,
    })
}

// ---- cascading deletion ----

/// Deletes a class and everything that depends on it: attendance rows keyed
/// by the class first, then member students (with their attendance), then
/// the class row. Dependency order means a partial failure can only orphan
/// leaf records, never leave a live row pointing at a deleted one.
pub fn delete_class(conn: &Connection, class_id: &str) -> Result<(), ApiError> {
    require_class(conn, class_id)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM attendance WHERE class_id = ?", [class_id])?;
    tx.execute(
        "DELETE FROM attendance
         WHERE student_id IN (SELECT id FROM students WHERE class_id = ?)",
        [class_id],
    )?;
    tx.execute("DELETE FROM students WHERE class_id = ?", [class_id])?;
    tx.execute("DELETE FROM classes WHERE id = ?", [class_id])?;
    tx.commit()?;
    Ok(())
}

/// Deletes a student and all of its attendance rows. Membership needs no
/// separate cleanup: the roster is derived from the row being deleted.
pub fn delete_student(conn: &Connection, student_id: &str) -> Result<(), ApiError> {
    require_student(conn, student_id)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM attendance WHERE student_id = ?", [student_id])?;
    tx.execute("DELETE FROM students WHERE id = ?", [student_id])?;
    tx.commit()?;
    Ok(())
}

/// Deletes a teacher. Owned classes are detached, never deleted;
/// reassignment stays an explicit admin action.
pub fn delete_teacher(conn: &Connection, teacher_id: &str) -> Result<(), ApiError> {
    require_teacher(conn, teacher_id)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE classes SET class_teacher = NULL WHERE class_teacher = ?",
        [teacher_id],
    )?;
    tx.execute("DELETE FROM users WHERE id = ?", [teacher_id])?;
    tx.commit()?;
    Ok(())
}

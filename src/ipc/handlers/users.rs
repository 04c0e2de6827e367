use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{self, Role};
use crate::consistency::{self, now_ts};
use crate::ipc::error::{err, ok, ApiError};
use crate::ipc::helpers::{optional_i64, optional_str, required_str, user_json};
use crate::ipc::types::{AppState, Request};

fn validate_gender(gender: Option<&str>) -> Result<(), ApiError> {
    match gender {
        None | Some("male") | Some("female") => Ok(()),
        Some(other) => Err(ApiError::validation(format!(
            "invalid gender: {other} (expected male or female)"
        ))),
    }
}

// Registration only establishes a principal with a role; credentials and
// token issuance are handled outside this daemon.
fn users_register(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let name = required_str(params, "name")?;
    let email = required_str(params, "email")?;
    let role_raw = required_str(params, "role")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| ApiError::validation(format!("invalid role: {role_raw}")))?;
    let contact = optional_str(params, "contact");
    let gender = optional_str(params, "gender");
    validate_gender(gender.as_deref())?;
    let age = optional_i64(params, "age");

    if consistency::email_taken(conn, &email, None)? {
        return Err(ApiError::conflict("user already exists"));
    }

    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, name, email, role, contact, gender, age, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &name,
            &email,
            role.as_str(),
            &contact,
            &gender,
            age,
            now_ts(),
        ),
    )?;

    Ok(json!({
        "message": format!("{} registered successfully", role.as_str()),
        "user": {
            "id": user_id,
            "name": name,
            "email": email,
            "role": role.as_str(),
        }
    }))
}

fn users_profile(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    let user = consistency::find_user(conn, &principal.id)?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    let classes: Vec<serde_json::Value> = consistency::assigned_classes(conn, &user.id)?
        .iter()
        .map(|c| json!({ "id": c.id, "className": c.name }))
        .collect();

    let mut profile = user_json(&user);
    profile["assignedClasses"] = json!(classes);
    Ok(json!({ "user": profile }))
}

fn teachers_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    auth::require_admin(&principal)?;

    let mut stmt = conn.prepare(
        "SELECT id, name, email, role, contact, gender, age FROM users
         WHERE role = 'teacher' ORDER BY name",
    )?;
    let teachers = stmt
        .query_map([], |r| {
            Ok(consistency::UserRow {
                id: r.get(0)?,
                name: r.get(1)?,
                email: r.get(2)?,
                role: r.get(3)?,
                contact: r.get(4)?,
                gender: r.get(5)?,
                age: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(teachers.len());
    for t in &teachers {
        let classes: Vec<serde_json::Value> = consistency::assigned_classes(conn, &t.id)?
            .iter()
            .map(|c| json!({ "id": c.id, "className": c.name }))
            .collect();
        let mut v = user_json(t);
        v["assignedClasses"] = json!(classes);
        out.push(v);
    }

    Ok(json!({
        "message": "Teachers fetched successfully",
        "count": out.len(),
        "teachers": out,
    }))
}

fn teachers_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    auth::require_admin(&principal)?;
    let teacher_id = required_str(params, "teacherId")?;
    let mut teacher = consistency::require_teacher(conn, &teacher_id)?;

    if let Some(email) = optional_str(params, "email") {
        if email != teacher.email && consistency::email_taken(conn, &email, Some(&teacher_id))? {
            return Err(ApiError::conflict("email already exists"));
        }
        teacher.email = email;
    }
    if let Some(name) = optional_str(params, "name") {
        teacher.name = name;
    }
    if let Some(contact) = optional_str(params, "contact") {
        teacher.contact = Some(contact);
    }
    if let Some(gender) = optional_str(params, "gender") {
        validate_gender(Some(&gender))?;
        teacher.gender = Some(gender);
    }
    if let Some(age) = optional_i64(params, "age") {
        teacher.age = Some(age);
    }

    conn.execute(
        "UPDATE users SET name = ?, email = ?, contact = ?, gender = ?, age = ? WHERE id = ?",
        (
            &teacher.name,
            &teacher.email,
            &teacher.contact,
            &teacher.gender,
            teacher.age,
            &teacher_id,
        ),
    )?;

    Ok(json!({
        "message": "Teacher updated successfully",
        "teacher": user_json(&teacher),
    }))
}

fn teachers_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    auth::require_admin(&principal)?;
    let teacher_id = required_str(params, "teacherId")?;

    consistency::delete_teacher(conn, &teacher_id)?;
    Ok(json!({ "message": "Teacher deleted successfully" }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    type Handler = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, ApiError>;
    let handler: Handler = match req.method.as_str() {
        "users.register" => users_register,
        "users.profile" => users_profile,
        "teachers.list" => teachers_list,
        "teachers.update" => teachers_update,
        "teachers.delete" => teachers_delete,
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

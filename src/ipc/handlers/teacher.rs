use rusqlite::Connection;
use serde_json::json;

use crate::auth::{self, Role};
use crate::consistency;
use crate::ipc::error::{err, ok, ApiError};
use crate::ipc::helpers::class_json;
use crate::ipc::types::{AppState, Request};

// The rest of the teacher portal (class students, class attendance, marking)
// is the shared class/attendance methods under the ownership predicate; only
// the "my classes" view is portal-specific.
fn teacher_my_classes(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, ApiError> {
    let principal = auth::resolve_principal(conn, params)?;
    if principal.role != Role::Teacher {
        return Err(ApiError::forbidden("not authorized"));
    }

    let classes = consistency::assigned_classes(conn, &principal.id)?;
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

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if req.method != "teacher.myClasses" {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match teacher_my_classes(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}

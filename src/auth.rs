use rusqlite::{Connection, OptionalExtension};

use crate::ipc::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Teacher,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
        }
    }
}

/// The authenticated actor behind a request. Credential verification and
/// token issuance live outside this daemon; a request only names its actor
/// and we resolve identity and role from the users registry.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: String,
    pub name: String,
    pub role: Role,
}

pub fn resolve_principal(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<Principal, ApiError> {
    let actor_id = params
        .get("actorId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::unauthenticated("missing actorId"))?;

    let row = conn
        .query_row(
            "SELECT id, name, role FROM users WHERE id = ?",
            [actor_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    let (id, name, role) = row.ok_or_else(|| ApiError::unauthenticated("unknown actor"))?;
    let role =
        Role::parse(&role).ok_or_else(|| ApiError::unauthenticated("actor has no valid role"))?;
    Ok(Principal { id, name, role })
}

pub fn require_admin(principal: &Principal) -> Result<(), ApiError> {
    if principal.role != Role::Admin {
        return Err(ApiError::forbidden("not authorized"));
    }
    Ok(())
}

/// The one authorization predicate for class-scoped mutations and reads:
/// admins may act on any class, teachers only on a class assigned to them.
pub fn can_manage_class(principal: &Principal, class_teacher: Option<&str>) -> bool {
    match principal.role {
        Role::Admin => true,
        Role::Teacher => class_teacher == Some(principal.id.as_str()),
    }
}

pub fn require_class_access(
    principal: &Principal,
    class_teacher: Option<&str>,
) -> Result<(), ApiError> {
    if !can_manage_class(principal, class_teacher) {
        return Err(ApiError::forbidden("not authorized"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teacher(id: &str) -> Principal {
        Principal {
            id: id.to_string(),
            name: "T".to_string(),
            role: Role::Teacher,
        }
    }

    #[test]
    fn admin_manages_any_class() {
        let admin = Principal {
            id: "a1".to_string(),
            name: "A".to_string(),
            role: Role::Admin,
        };
        assert!(can_manage_class(&admin, None));
        assert!(can_manage_class(&admin, Some("someone-else")));
    }

    #[test]
    fn teacher_manages_only_own_class() {
        let t = teacher("t1");
        assert!(can_manage_class(&t, Some("t1")));
        assert!(!can_manage_class(&t, Some("t2")));
        assert!(!can_manage_class(&t, None));
    }

    #[test]
    fn role_parse_roundtrip() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("teacher"), Some(Role::Teacher));
        assert_eq!(Role::parse("student"), None);
        assert_eq!(Role::Teacher.as_str(), "teacher");
    }
}


use serde_json::json;
use test_support::{register_user, request_err, request_ok, setup_admin, spawn_sidecar};

#[test]
fn duplicate_names_rolls_and_emails_conflict() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = setup_admin(&mut stdin, &mut reader, "schoolbook-unique");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "classes.create",
        json!({ "actorId": admin, "className": "4-A" }),
    );
    let class_id = created
        .pointer("/class/id")
        .and_then(|v| v.as_str())
        .expect("class id")
        .to_string();

    let code = request_err(
        &mut stdin,
        &mut reader,
        "c2",
        "classes.create",
        json!({ "actorId": admin, "className": "4-A" }),
    );
    assert_eq!(code, "conflict");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.create",
        json!({
            "actorId": admin,
            "rollNo": "901",
            "name": "First",
            "fatherName": "F",
            "classId": class_id,
            "gender": "male",
        }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "s2",
        "students.create",
        json!({
            "actorId": admin,
            "rollNo": "901",
            "name": "Second",
            "fatherName": "F",
            "classId": class_id,
            "gender": "female",
        }),
    );
    assert_eq!(code, "conflict");

    let _ = register_user(&mut stdin, &mut reader, "taken@example.com", "teacher");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "r1",
        "users.register",
        json!({ "name": "again", "email": "taken@example.com", "role": "teacher" }),
    );
    assert_eq!(code, "conflict");
}

#[test]
fn updates_cannot_steal_taken_keys() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = setup_admin(&mut stdin, &mut reader, "schoolbook-unique-update");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "classes.create",
        json!({ "actorId": admin, "className": "First" }),
    );
    let class_a = created
        .pointer("/class/id")
        .and_then(|v| v.as_str())
        .expect("class id")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "c2",
        "classes.create",
        json!({ "actorId": admin, "className": "Second" }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "u1",
        "classes.update",
        json!({ "actorId": admin, "classId": class_a, "className": "Second" }),
    );
    assert_eq!(code, "conflict");
    // renaming to itself is a no-op, not a collision
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "u2",
        "classes.update",
        json!({ "actorId": admin, "classId": class_a, "className": "First" }),
    );

    for roll in ["911", "912"] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s-{roll}"),
            "students.create",
            json!({
                "actorId": admin,
                "rollNo": roll,
                "name": format!("Student {roll}"),
                "fatherName": "F",
                "classId": class_a,
                "gender": "male",
            }),
        );
    }
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "byroll",
        "students.getByRollNo",
        json!({ "actorId": admin, "rollNo": "911" }),
    );
    let student_id = student
        .pointer("/student/id")
        .and_then(|v| v.as_str())
        .expect("id")
        .to_string();
    let code = request_err(
        &mut stdin,
        &mut reader,
        "u3",
        "students.update",
        json!({ "actorId": admin, "studentId": student_id, "rollNo": "912" }),
    );
    assert_eq!(code, "conflict");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "u4",
        "students.update",
        json!({ "actorId": admin, "studentId": student_id, "rollNo": "911" }),
    );

    let t1 = register_user(&mut stdin, &mut reader, "one@example.com", "teacher");
    let _ = register_user(&mut stdin, &mut reader, "two@example.com", "teacher");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "u5",
        "teachers.update",
        json!({ "actorId": admin, "teacherId": t1, "email": "two@example.com" }),
    );
    assert_eq!(code, "conflict");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "u6",
        "teachers.update",
        json!({ "actorId": admin, "teacherId": t1, "email": "one@example.com" }),
    );
}

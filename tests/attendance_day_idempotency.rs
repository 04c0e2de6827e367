
use serde_json::json;
use test_support::{request_err, request_ok, setup_admin, spawn_sidecar};

#[test]
fn batch_marking_a_class_day_twice_conflicts() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = setup_admin(&mut stdin, &mut reader, "schoolbook-idem-batch");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "classes.create",
        json!({ "actorId": admin, "className": "5-A" }),
    );
    let class_id = created
        .pointer("/class/id")
        .and_then(|v| v.as_str())
        .expect("class id")
        .to_string();

    let mut student_ids = Vec::new();
    for roll in ["201", "202"] {
        let s = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s-{roll}"),
            "students.create",
            json!({
                "actorId": admin,
                "rollNo": roll,
                "name": format!("Student {roll}"),
                "fatherName": "F",
                "classId": class_id,
                "gender": "male",
            }),
        );
        student_ids.push(
            s.pointer("/student/id")
                .and_then(|v| v.as_str())
                .expect("id")
                .to_string(),
        );
    }

    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "attendance.mark",
        json!({
            "actorId": admin,
            "classId": class_id,
            "date": "2025-01-10",
            "records": [
                { "studentId": student_ids[0], "status": "Present" },
                { "studentId": student_ids[1], "status": "Absent" },
            ],
        }),
    );
    assert_eq!(marked.get("recordsCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(marked.get("date").and_then(|v| v.as_str()), Some("2025-01-10"));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "m2",
        "attendance.mark",
        json!({
            "actorId": admin,
            "classId": class_id,
            "date": "2025-01-10",
            "records": [{ "studentId": student_ids[0], "status": "Present" }],
        }),
    );
    assert_eq!(code, "conflict");

    // time-of-day does not defeat day-level idempotency
    let code = request_err(
        &mut stdin,
        &mut reader,
        "m3",
        "attendance.mark",
        json!({
            "actorId": admin,
            "classId": class_id,
            "date": "2025-01-10T18:30:00Z",
            "records": [{ "studentId": student_ids[0], "status": "Present" }],
        }),
    );
    assert_eq!(code, "conflict");
}

#[test]
fn single_and_batch_paths_share_one_student_day_key() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = setup_admin(&mut stdin, &mut reader, "schoolbook-idem-crosspath");

    let class_a = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "classes.create",
        json!({ "actorId": admin, "className": "Home" }),
    );
    let class_a = class_a
        .pointer("/class/id")
        .and_then(|v| v.as_str())
        .expect("class id")
        .to_string();
    let class_b = request_ok(
        &mut stdin,
        &mut reader,
        "c2",
        "classes.create",
        json!({ "actorId": admin, "className": "Elective" }),
    );
    let class_b = class_b
        .pointer("/class/id")
        .and_then(|v| v.as_str())
        .expect("class id")
        .to_string();

    let s = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.create",
        json!({
            "actorId": admin,
            "rollNo": "301",
            "name": "Sana",
            "fatherName": "F",
            "classId": class_a,
            "gender": "female",
        }),
    );
    let student_id = s
        .pointer("/student/id")
        .and_then(|v| v.as_str())
        .expect("id")
        .to_string();

    // single mark through a different class still claims the student-day
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "attendance.markSingle",
        json!({
            "actorId": admin,
            "studentId": student_id,
            "classId": class_b,
            "date": "2025-02-01",
            "status": "Present",
        }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "m2",
        "attendance.mark",
        json!({
            "actorId": admin,
            "classId": class_a,
            "date": "2025-02-01",
            "records": [{ "studentId": student_id, "status": "Absent" }],
        }),
    );
    assert_eq!(code, "conflict");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "m3",
        "attendance.markSingle",
        json!({
            "actorId": admin,
            "studentId": student_id,
            "classId": class_a,
            "date": "2025-02-01",
            "status": "Absent",
        }),
    );
    assert_eq!(code, "conflict");
}

#[test]
fn batch_rejects_students_outside_the_class() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = setup_admin(&mut stdin, &mut reader, "schoolbook-idem-member");

    let class_a = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "classes.create",
        json!({ "actorId": admin, "className": "A" }),
    );
    let class_a = class_a
        .pointer("/class/id")
        .and_then(|v| v.as_str())
        .expect("class id")
        .to_string();
    let class_b = request_ok(
        &mut stdin,
        &mut reader,
        "c2",
        "classes.create",
        json!({ "actorId": admin, "className": "B" }),
    );
    let class_b = class_b
        .pointer("/class/id")
        .and_then(|v| v.as_str())
        .expect("class id")
        .to_string();

    let outsider = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.create",
        json!({
            "actorId": admin,
            "rollNo": "401",
            "name": "Out",
            "fatherName": "F",
            "classId": class_b,
            "gender": "male",
        }),
    );
    let outsider = outsider
        .pointer("/student/id")
        .and_then(|v| v.as_str())
        .expect("id")
        .to_string();

    let code = request_err(
        &mut stdin,
        &mut reader,
        "m1",
        "attendance.mark",
        json!({
            "actorId": admin,
            "classId": class_a,
            "date": "2025-03-01",
            "records": [{ "studentId": outsider, "status": "Present" }],
        }),
    );
    assert_eq!(code, "validation");

    // invalid status is rejected before anything is written
    let code = request_err(
        &mut stdin,
        &mut reader,
        "m2",
        "attendance.markSingle",
        json!({
            "actorId": admin,
            "studentId": outsider,
            "classId": class_b,
            "date": "2025-03-01",
            "status": "Late",
        }),
    );
    assert_eq!(code, "validation");
}

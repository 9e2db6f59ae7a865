use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_aulad");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn aulad");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn staff_by_id(result: &serde_json::Value, staff_id: &str) -> serde_json::Value {
    result
        .get("staff")
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|s| s.get("id").and_then(|v| v.as_str()) == Some(staff_id))
        })
        .cloned()
        .unwrap_or_else(|| panic!("staff {} missing in {}", staff_id, result))
}

fn assignments(staff: &serde_json::Value) -> Vec<serde_json::Value> {
    staff
        .get("assignments")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

fn main_assignment(staff: &serde_json::Value) -> serde_json::Value {
    assignments(staff)
        .into_iter()
        .find(|a| a.get("areaId").map(|v| v.is_null()).unwrap_or(true))
        .expect("main assignment present")
}

#[test]
fn toggle_area_and_tutor_flow_builds_the_expected_set() {
    let workspace = temp_dir("aulad-toggle-flow");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "staff.create",
        json!({ "staffId": "t-100", "lastName": "Quispe", "firstName": "María", "role": "teacher" }),
    );
    let opened = request_ok(&mut stdin, &mut reader, "3", "session.open", json!({}));
    assert_eq!(
        opened.get("staff").and_then(|v| v.as_array()).map(|v| v.len()),
        Some(1)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "session.select",
        json!({ "grade": "1er Grado", "section": "A" }),
    );

    let after_area = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "session.toggleArea",
        json!({ "staffId": "t-100", "areaId": "p-mat", "checked": true }),
    );
    let staff = staff_by_id(&after_area, "t-100");
    assert_eq!(assignments(&staff).len(), 2);
    assert_eq!(
        main_assignment(&staff).get("role").and_then(|v| v.as_str()),
        Some("teacher")
    );
    let area = assignments(&staff)
        .into_iter()
        .find(|a| a.get("areaId").and_then(|v| v.as_str()) == Some("p-mat"))
        .expect("area assignment");
    assert_eq!(area.get("role").and_then(|v| v.as_str()), Some("teacher"));

    let after_tutor = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "session.toggleTutor",
        json!({ "staffId": "t-100", "checked": true }),
    );
    let staff = staff_by_id(&after_tutor, "t-100");
    assert_eq!(
        main_assignment(&staff).get("role").and_then(|v| v.as_str()),
        Some("teacher_tutor")
    );
    let area = assignments(&staff)
        .into_iter()
        .find(|a| a.get("areaId").and_then(|v| v.as_str()) == Some("p-mat"))
        .expect("area assignment");
    assert_eq!(area.get("role").and_then(|v| v.as_str()), Some("teacher"));

    // Removing the last area keeps the tutor main alive.
    let after_off = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "session.toggleArea",
        json!({ "staffId": "t-100", "areaId": "p-mat", "checked": false }),
    );
    let staff = staff_by_id(&after_off, "t-100");
    assert_eq!(assignments(&staff).len(), 1);
    assert_eq!(
        main_assignment(&staff).get("role").and_then(|v| v.as_str()),
        Some("teacher_tutor")
    );

    let state = request_ok(&mut stdin, &mut reader, "8", "session.state", json!({}));
    let dirty = state
        .get("dirty")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(dirty, vec![json!("t-100")]);
}

#[test]
fn toggles_without_a_selection_change_nothing() {
    let workspace = temp_dir("aulad-no-selection");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "staff.create",
        json!({ "staffId": "t-100", "lastName": "Quispe", "firstName": "María", "role": "teacher" }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "3", "session.open", json!({}));

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "session.toggleArea",
        json!({ "staffId": "t-100", "areaId": "p-mat", "checked": true }),
    );
    assert!(assignments(&staff_by_id(&after, "t-100")).is_empty());

    let state = request_ok(&mut stdin, &mut reader, "5", "session.state", json!({}));
    assert_eq!(
        state.get("dirty").and_then(|v| v.as_array()).map(|v| v.len()),
        Some(0)
    );
}

#[test]
fn tutor_role_moves_between_staff_members() {
    let workspace = temp_dir("aulad-tutor-unique");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    for (i, (id, last)) in [("t-1", "Quispe"), ("t-2", "Huamán")].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("create-{}", i),
            "staff.create",
            json!({ "staffId": id, "lastName": last, "firstName": "Ana", "role": "teacher" }),
        );
    }
    let _ = request_ok(&mut stdin, &mut reader, "3", "session.open", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "session.select",
        json!({ "grade": "2do Grado", "section": "B" }),
    );

    for (i, (id, area)) in [("t-1", "p-mat"), ("t-2", "p-com")].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("area-{}", i),
            "session.toggleArea",
            json!({ "staffId": id, "areaId": area, "checked": true }),
        );
    }

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "session.toggleTutor",
        json!({ "staffId": "t-1", "checked": true }),
    );
    let after = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "session.toggleTutor",
        json!({ "staffId": "t-2", "checked": true }),
    );

    let t1_main = main_assignment(&staff_by_id(&after, "t-1"));
    let t2_main = main_assignment(&staff_by_id(&after, "t-2"));
    assert_eq!(t1_main.get("role").and_then(|v| v.as_str()), Some("teacher"));
    assert_eq!(
        t2_main.get("role").and_then(|v| v.as_str()),
        Some("teacher_tutor")
    );
}

#[test]
fn assistants_hold_main_only_sections() {
    let workspace = temp_dir("aulad-assistant");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "staff.create",
        json!({ "staffId": "x-1", "lastName": "Rojas", "firstName": "Elena", "role": "assistant" }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "3", "session.open", json!({}));

    let after_aux = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "session.toggleAuxiliar",
        json!({ "staffId": "x-1", "grade": "3 Años", "section": "A", "checked": true }),
    );
    let staff = staff_by_id(&after_aux, "x-1");
    assert_eq!(assignments(&staff).len(), 1);
    assert_eq!(
        main_assignment(&staff).get("role").and_then(|v| v.as_str()),
        Some("assistant")
    );

    // Area toggles never apply to assistants, selection or not.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "session.select",
        json!({ "grade": "3 Años", "section": "A" }),
    );
    let after_area = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "session.toggleArea",
        json!({ "staffId": "x-1", "areaId": "i-mat", "checked": true }),
    );
    assert_eq!(assignments(&staff_by_id(&after_area, "x-1")).len(), 1);

    let after_off = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "session.toggleAuxiliar",
        json!({ "staffId": "x-1", "grade": "3 Años", "section": "A", "checked": false }),
    );
    assert!(assignments(&staff_by_id(&after_off, "x-1")).is_empty());
}

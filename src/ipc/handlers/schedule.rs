use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Who a schedule request is about. Students and staff get their timetable
/// from different places, so the subject arrives tagged and is matched
/// exhaustively instead of probing fields.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum SubjectRef {
    Student { id: String },
    Staff { id: String },
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

fn parse_subject(params: &serde_json::Value) -> Result<SubjectRef, HandlerErr> {
    let raw = params
        .get("subject")
        .ok_or_else(|| HandlerErr::new("bad_params", "missing subject"))?;
    serde_json::from_value(raw.clone()).map_err(|e| {
        HandlerErr::with_details(
            "bad_params",
            format!("subject must be a tagged student/staff reference: {}", e),
            json!({ "subject": raw }),
        )
    })
}

/// Assignment facts for one staff member, keyed by row id.
fn staff_assignment_index(
    conn: &Connection,
    staff_id: &str,
) -> Result<BTreeMap<String, serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT a.id, gs.grade, gs.section, a.area_id, a.role
             FROM assignments a
             JOIN grade_sections gs ON gs.id = a.grade_section_id
             WHERE a.staff_id = ?",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map([staff_id], |r| {
            let id: String = r.get(0)?;
            let grade: String = r.get(1)?;
            let section: String = r.get(2)?;
            let area_id: Option<String> = r.get(3)?;
            let role: String = r.get(4)?;
            Ok((
                id,
                json!({ "grade": grade, "section": section, "areaId": area_id, "role": role }),
            ))
        })
        .and_then(|it| it.collect::<Result<BTreeMap<_, _>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(rows)
}

fn handle_schedule_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    match parse_subject(params)? {
        SubjectRef::Staff { id } => {
            let schedule_raw: Option<Option<String>> = conn
                .query_row(
                    "SELECT schedule_json FROM staff_members WHERE id = ?",
                    [&id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
            let Some(schedule_raw) = schedule_raw else {
                return Err(HandlerErr::new("not_found", "staff member not found"));
            };

            let slots: BTreeMap<String, String> = schedule_raw
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default();
            let index = staff_assignment_index(conn, &id)?;

            // Slots pointing at assignments that no longer exist are dropped
            // rather than surfaced as dangling references.
            let entries: Vec<serde_json::Value> = slots
                .iter()
                .filter_map(|(slot, assignment_id)| {
                    index.get(assignment_id).map(|a| {
                        json!({
                            "slot": slot,
                            "assignmentId": assignment_id,
                            "assignment": a
                        })
                    })
                })
                .collect();
            Ok(json!({ "kind": "staff", "subjectId": id, "entries": entries }))
        }
        SubjectRef::Student { id } => {
            let section: Option<Option<String>> = conn
                .query_row(
                    "SELECT grade_section_id FROM students WHERE id = ?",
                    [&id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
            let Some(section) = section else {
                return Err(HandlerErr::new("not_found", "student not found"));
            };
            let Some(section_id) = section else {
                return Ok(json!({ "kind": "student", "subjectId": id, "entries": [] }));
            };

            // A student's timetable is derived from whoever teaches their
            // section.
            let mut stmt = conn
                .prepare(
                    "SELECT a.area_id, a.role, a.weekly_hours, sm.id, sm.last_name, sm.first_name
                     FROM assignments a
                     JOIN staff_members sm ON sm.id = a.staff_id
                     WHERE a.grade_section_id = ?
                     ORDER BY a.area_id IS NOT NULL, a.area_id, sm.last_name",
                )
                .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
            let entries = stmt
                .query_map([&section_id], |r| {
                    let area_id: Option<String> = r.get(0)?;
                    let role: String = r.get(1)?;
                    let weekly_hours: Option<f64> = r.get(2)?;
                    let staff_id: String = r.get(3)?;
                    let last_name: String = r.get(4)?;
                    let first_name: String = r.get(5)?;
                    Ok(json!({
                        "areaId": area_id,
                        "role": role,
                        "weeklyHours": weekly_hours,
                        "staffId": staff_id,
                        "staffName": format!("{}, {}", last_name, first_name)
                    }))
                })
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
            Ok(json!({ "kind": "student", "subjectId": id, "entries": entries }))
        }
    }
}

fn handle_schedule_set(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let staff_id = get_required_str(params, "staffId")?;
    let slots_raw = params
        .get("slots")
        .ok_or_else(|| HandlerErr::new("bad_params", "missing slots"))?;
    let slots: BTreeMap<String, String> = serde_json::from_value(slots_raw.clone())
        .map_err(|e| HandlerErr::new("bad_params", format!("slots must map slot -> assignmentId: {}", e)))?;

    let index = staff_assignment_index(conn, &staff_id)?;
    for (slot, assignment_id) in &slots {
        if !index.contains_key(assignment_id) {
            return Err(HandlerErr::with_details(
                "bad_params",
                "slot references an assignment the staff member does not hold",
                json!({ "slot": slot, "assignmentId": assignment_id }),
            ));
        }
    }

    let stored = if slots.is_empty() {
        None
    } else {
        Some(
            serde_json::to_string(&slots)
                .map_err(|e| HandlerErr::new("bad_params", e.to_string()))?,
        )
    };
    let changed = conn
        .execute(
            "UPDATE staff_members SET schedule_json = ?, updated_at = ? WHERE id = ?",
            (&stored, chrono::Utc::now().to_rfc3339(), &staff_id),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "staff member not found"));
    }
    Ok(json!({ "staffId": staff_id, "slots": slots.len() }))
}

fn handle_students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let section_filter = params
        .get("gradeSectionId")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let (sql, args): (&str, Vec<String>) = match &section_filter {
        Some(id) => (
            "SELECT id, last_name, first_name, grade_section_id, active, sort_order
             FROM students WHERE grade_section_id = ? ORDER BY sort_order, last_name",
            vec![id.clone()],
        ),
        None => (
            "SELECT id, last_name, first_name, grade_section_id, active, sort_order
             FROM students ORDER BY sort_order, last_name",
            Vec::new(),
        ),
    };

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |r| {
            let id: String = r.get(0)?;
            let last_name: String = r.get(1)?;
            let first_name: String = r.get(2)?;
            let grade_section_id: Option<String> = r.get(3)?;
            let active: i64 = r.get(4)?;
            let sort_order: i64 = r.get(5)?;
            Ok(json!({
                "id": id,
                "lastName": last_name,
                "firstName": first_name,
                "gradeSectionId": grade_section_id,
                "active": active != 0,
                "sortOrder": sort_order
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    Ok(json!({ "students": rows }))
}

fn handle_students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_required_str(params, "firstName")?;
    let grade_section_id = params
        .get("gradeSectionId")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    if let Some(gs) = &grade_section_id {
        let known: Option<i64> = conn
            .query_row("SELECT 1 FROM grade_sections WHERE id = ?", [gs], |r| r.get(0))
            .optional()
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        if known.is_none() {
            return Err(HandlerErr::new("not_found", "grade-section not found"));
        }
    }

    let next_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students",
            [],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, grade_section_id, last_name, first_name, active, sort_order)
         VALUES(?, ?, ?, ?, 1, ?)",
        (&student_id, &grade_section_id, &last_name, &first_name, next_order),
    )
    .map_err(|e| {
        HandlerErr::with_details("db_insert_failed", e.to_string(), json!({ "table": "students" }))
    })?;

    Ok(json!({ "studentId": student_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !matches!(
        req.method.as_str(),
        "schedule.get" | "schedule.set" | "students.list" | "students.create"
    ) {
        return None;
    }

    let Some(conn) = state.db.as_ref() else {
        return Some(
            HandlerErr::new("no_workspace", "select a workspace first").response(&req.id),
        );
    };

    let result = match req.method.as_str() {
        "schedule.get" => handle_schedule_get(conn, &req.params),
        "schedule.set" => handle_schedule_set(conn, &req.params),
        "students.list" => handle_students_list(conn, &req.params),
        _ => handle_students_create(conn, &req.params),
    };

    Some(match result {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}

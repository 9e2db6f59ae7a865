use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::roster::StaffRole;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

fn parse_role(params: &serde_json::Value) -> Result<StaffRole, HandlerErr> {
    let raw = get_required_str(params, "role")?;
    StaffRole::parse(&raw).ok_or_else(|| {
        HandlerErr::with_details(
            "bad_params",
            "role must be one of: admin, director, coordinator, teacher, assistant",
            json!({ "role": raw }),
        )
    })
}

fn staff_exists(conn: &Connection, staff_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM staff_members WHERE id = ?", [staff_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn handle_staff_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               sm.id,
               sm.last_name,
               sm.first_name,
               sm.role,
               sm.updated_at,
               (SELECT COUNT(*) FROM assignments a WHERE a.staff_id = sm.id) AS assignment_count
             FROM staff_members sm
             ORDER BY sm.last_name, sm.first_name",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let last_name: String = row.get(1)?;
            let first_name: String = row.get(2)?;
            let role: String = row.get(3)?;
            let updated_at: Option<String> = row.get(4)?;
            let assignment_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "lastName": last_name,
                "firstName": first_name,
                "role": role,
                "updatedAt": updated_at,
                "assignmentCount": assignment_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    Ok(json!({ "staff": rows }))
}

fn handle_staff_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let staff_id = get_required_str(params, "staffId")?;
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_required_str(params, "firstName")?;
    let role = parse_role(params)?;

    conn.execute(
        "INSERT INTO staff_members(id, last_name, first_name, role) VALUES(?, ?, ?, ?)",
        (&staff_id, &last_name, &first_name, role.as_str()),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "staff_members" }),
        )
    })?;

    Ok(json!({ "staffId": staff_id }))
}

fn handle_staff_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let staff_id = get_required_str(params, "staffId")?;
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_required_str(params, "firstName")?;
    let role = parse_role(params)?;

    if !staff_exists(conn, &staff_id)? {
        return Err(HandlerErr::new("not_found", "staff member not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    tx.execute(
        "UPDATE staff_members SET last_name = ?, first_name = ?, role = ?, updated_at = ? WHERE id = ?",
        (
            &last_name,
            &first_name,
            role.as_str(),
            chrono::Utc::now().to_rfc3339(),
            &staff_id,
        ),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    // Assistants hold main-only assignments; demoting a record to assistant
    // drops its area rows right away instead of waiting for the next session.
    let mut dropped_areas = 0usize;
    if role == StaffRole::Assistant {
        dropped_areas = tx
            .execute(
                "DELETE FROM assignments WHERE staff_id = ? AND area_id IS NOT NULL",
                [&staff_id],
            )
            .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "staffId": staff_id, "droppedAreaAssignments": dropped_areas }))
}

fn handle_staff_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let staff_id = get_required_str(params, "staffId")?;

    if !staff_exists(conn, &staff_id)? {
        return Err(HandlerErr::new("not_found", "staff member not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Dependents first (no ON DELETE CASCADE).
    tx.execute("DELETE FROM assignments WHERE staff_id = ?", [&staff_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "assignments" }),
            )
        })?;
    tx.execute("DELETE FROM staff_members WHERE id = ?", [&staff_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "staff_members" }),
            )
        })?;

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !matches!(
        req.method.as_str(),
        "staff.list" | "staff.create" | "staff.update" | "staff.delete"
    ) {
        return None;
    }

    let Some(conn) = state.db.as_ref() else {
        return Some(
            HandlerErr::new("no_workspace", "select a workspace first").response(&req.id),
        );
    };

    let result = match req.method.as_str() {
        "staff.list" => handle_staff_list(conn),
        "staff.create" => handle_staff_create(conn, &req.params),
        "staff.update" => handle_staff_update(conn, &req.params),
        _ => handle_staff_delete(conn, &req.params),
    };

    Some(match result {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}

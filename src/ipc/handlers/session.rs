use crate::catalog::{self, SectionResolver};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::reconcile;
use crate::roster::{EditSession, SectionKey, StaffMember, StaffRole};
use log::{info, warn};
use rusqlite::Connection;
use serde_json::json;

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

fn get_required_bool(params: &serde_json::Value, key: &str) -> Result<bool, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

/// Working staff roster for one staff row, assignments and schedule included.
fn load_staff(conn: &Connection) -> Result<Vec<StaffMember>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, role, schedule_json
             FROM staff_members
             ORDER BY last_name, first_name",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, Option<String>>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut staff = Vec::with_capacity(rows.len());
    for (id, last_name, first_name, role_raw, schedule_raw) in rows {
        let Some(role) = StaffRole::parse(&role_raw) else {
            warn!("staff {} carries unknown role {:?}; leaving it out of the session", id, role_raw);
            continue;
        };
        let assignments = reconcile::canonical_assignments(conn, &id)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        let schedule = schedule_raw.and_then(|raw| serde_json::from_str(&raw).ok());
        staff.push(StaffMember {
            id,
            last_name,
            first_name,
            role,
            assignments,
            schedule,
        });
    }
    Ok(staff)
}

fn staff_json(session: &EditSession) -> serde_json::Value {
    serde_json::to_value(session.staff()).unwrap_or_else(|_| json!([]))
}

fn state_json(session: &EditSession) -> serde_json::Value {
    json!({
        "staff": staff_json(session),
        "selection": session.selection(),
        "dirty": session.dirty_ids(),
    })
}

fn handle_open(conn: &Connection) -> Result<EditSession, HandlerErr> {
    let staff = load_staff(conn)?;
    let sections = catalog::sections_by_grade(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(EditSession::open(staff, sections))
}

fn handle_select(
    session: &mut EditSession,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let grade = params.get("grade").and_then(|v| v.as_str());
    let section = params.get("section").and_then(|v| v.as_str());
    match (grade, section) {
        (Some(g), Some(s)) if !g.trim().is_empty() && !s.trim().is_empty() => {
            session.select(Some(SectionKey::new(g.trim(), s.trim())));
        }
        (None, None) => session.select(None),
        _ => {
            return Err(HandlerErr::new(
                "bad_params",
                "selection needs both grade and section, or neither",
            ))
        }
    }
    Ok(json!({ "selection": session.selection() }))
}

fn handle_save(
    conn: &Connection,
    session: &mut EditSession,
) -> Result<serde_json::Value, HandlerErr> {
    let dirty = session.dirty_ids();
    let mut resolver = SectionResolver::new(conn);
    let mut saved = 0usize;
    let mut inserted = 0usize;
    let mut updated = 0usize;
    let mut deleted = 0usize;
    let mut warnings: Vec<String> = Vec::new();
    let mut failed: Vec<serde_json::Value> = Vec::new();

    for staff_id in dirty {
        let Some(staff) = session.get(&staff_id).cloned() else {
            continue;
        };
        // Each staff member reconciles independently; one failure leaves its
        // edits dirty for retry and never rolls back the others.
        match reconcile::save_staff(conn, &staff, &mut resolver) {
            Ok(outcome) => {
                saved += 1;
                inserted += outcome.inserted;
                updated += outcome.updated;
                deleted += outcome.deleted;
                warnings.extend(outcome.warnings);
                session.mark_saved(outcome.staff);
            }
            Err(e) => {
                warn!("save failed for staff {}: {:#}", staff_id, e);
                failed.push(json!({ "staffId": staff_id, "error": e.to_string() }));
            }
        }
    }

    info!(
        "session save: {} staff saved, {} failed, {}/{}/{} rows inserted/updated/deleted",
        saved,
        failed.len(),
        inserted,
        updated,
        deleted
    );

    Ok(json!({
        "saved": saved,
        "inserted": inserted,
        "updated": updated,
        "deleted": deleted,
        "warnings": warnings,
        "failed": failed,
        "staff": staff_json(session),
        "dirty": session.dirty_ids(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !matches!(
        req.method.as_str(),
        "session.open"
            | "session.state"
            | "session.select"
            | "session.toggleArea"
            | "session.toggleTutor"
            | "session.toggleAuxiliar"
            | "session.assignAllAreas"
            | "session.clearAreas"
            | "session.save"
            | "session.close"
    ) {
        return None;
    }

    if req.method == "session.close" {
        state.session = None;
        return Some(ok(&req.id, json!({ "ok": true })));
    }

    if req.method == "session.open" {
        let Some(conn) = state.db.as_ref() else {
            return Some(
                HandlerErr::new("no_workspace", "select a workspace first").response(&req.id),
            );
        };
        return Some(match handle_open(conn) {
            Ok(session) => {
                let snapshot = state_json(&session);
                state.session = Some(session);
                ok(&req.id, snapshot)
            }
            Err(e) => e.response(&req.id),
        });
    }

    let Some(session) = state.session.as_mut() else {
        return Some(HandlerErr::new("no_session", "open a session first").response(&req.id));
    };

    let result = match req.method.as_str() {
        "session.state" => Ok(state_json(session)),
        "session.select" => handle_select(session, &req.params),
        "session.toggleArea" => get_required_str(&req.params, "staffId").and_then(|staff_id| {
            let area_id = get_required_str(&req.params, "areaId")?;
            let checked = get_required_bool(&req.params, "checked")?;
            session.toggle_area(&staff_id, &area_id, checked);
            Ok(json!({ "staff": staff_json(session) }))
        }),
        "session.toggleTutor" => get_required_str(&req.params, "staffId").and_then(|staff_id| {
            let checked = get_required_bool(&req.params, "checked")?;
            session.toggle_tutor(&staff_id, checked);
            Ok(json!({ "staff": staff_json(session) }))
        }),
        "session.toggleAuxiliar" => get_required_str(&req.params, "staffId").and_then(|staff_id| {
            let grade = get_required_str(&req.params, "grade")?;
            let section = get_required_str(&req.params, "section")?;
            let checked = get_required_bool(&req.params, "checked")?;
            session.toggle_auxiliar(&staff_id, &grade, &section, checked);
            Ok(json!({ "staff": staff_json(session) }))
        }),
        "session.assignAllAreas" => get_required_str(&req.params, "staffId").map(|staff_id| {
            session.assign_all_areas(&staff_id);
            json!({ "staff": staff_json(session) })
        }),
        "session.clearAreas" => get_required_str(&req.params, "staffId").map(|staff_id| {
            session.clear_areas(&staff_id);
            json!({ "staff": staff_json(session) })
        }),
        _ => {
            // session.save needs the connection alongside the session.
            match state.db.as_ref() {
                Some(conn) => handle_save(conn, session),
                None => Err(HandlerErr::new("no_workspace", "select a workspace first")),
            }
        }
    };

    Some(match result {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}

use crate::catalog;
use crate::curriculum;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use log::info;
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

fn handle_structure() -> Result<serde_json::Value, HandlerErr> {
    let levels: Vec<serde_json::Value> = curriculum::PLAN
        .iter()
        .map(|l| {
            json!({
                "level": l.level,
                "label": l.label,
                "grades": l.grades,
                "areas": l.areas,
            })
        })
        .collect();
    Ok(json!({ "levels": levels }))
}

fn handle_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               gs.id,
               gs.grade,
               gs.section,
               gs.level,
               (SELECT COUNT(*) FROM assignments a WHERE a.grade_section_id = gs.id) AS assignment_count,
               (SELECT COUNT(*) FROM students st WHERE st.grade_section_id = gs.id) AS student_count
             FROM grade_sections gs
             ORDER BY gs.level, gs.grade, gs.section",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let grade: String = row.get(1)?;
            let section: String = row.get(2)?;
            let level: String = row.get(3)?;
            let assignment_count: i64 = row.get(4)?;
            let student_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "grade": grade,
                "section": section,
                "level": level,
                "assignmentCount": assignment_count,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    Ok(json!({ "sections": rows }))
}

fn usage_counts(
    conn: &Connection,
    grade: &str,
    section: Option<&str>,
) -> Result<(i64, i64), HandlerErr> {
    let (assignment_sql, student_sql) = match section {
        Some(_) => (
            "SELECT COUNT(*) FROM assignments a
             JOIN grade_sections gs ON gs.id = a.grade_section_id
             WHERE gs.grade = ? AND gs.section = ?",
            "SELECT COUNT(*) FROM students st
             JOIN grade_sections gs ON gs.id = st.grade_section_id
             WHERE gs.grade = ? AND gs.section = ?",
        ),
        None => (
            "SELECT COUNT(*) FROM assignments a
             JOIN grade_sections gs ON gs.id = a.grade_section_id
             WHERE gs.grade = ?",
            "SELECT COUNT(*) FROM students st
             JOIN grade_sections gs ON gs.id = st.grade_section_id
             WHERE gs.grade = ?",
        ),
    };

    let count = |sql: &str| -> Result<i64, HandlerErr> {
        let res = match section {
            Some(s) => conn.query_row(sql, (grade, s), |r| r.get(0)),
            None => conn.query_row(sql, [grade], |r| r.get(0)),
        };
        res.map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
    };

    Ok((count(assignment_sql)?, count(student_sql)?))
}

fn refuse_if_in_use(
    conn: &Connection,
    grade: &str,
    section: Option<&str>,
) -> Result<(), HandlerErr> {
    let (assignments, students) = usage_counts(conn, grade, section)?;
    if assignments > 0 || students > 0 {
        return Err(HandlerErr::with_details(
            "catalog_in_use",
            "grade-section entries still referenced by assignments or students",
            json!({
                "grade": grade,
                "section": section,
                "assignmentCount": assignments,
                "studentCount": students
            }),
        ));
    }
    Ok(())
}

fn handle_delete_grade(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let grade = get_required_str(params, "grade")?;
    refuse_if_in_use(conn, &grade, None)?;
    let removed = catalog::delete_grade(conn, &grade)
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    if removed == 0 {
        return Err(HandlerErr::new("not_found", "grade has no catalog entries"));
    }
    info!("catalog grade {} removed ({} sections)", grade, removed);
    Ok(json!({ "removed": removed }))
}

fn handle_delete_section(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let grade = get_required_str(params, "grade")?;
    let section = get_required_str(params, "section")?;
    refuse_if_in_use(conn, &grade, Some(&section))?;
    let removed = catalog::delete_grade_section(conn, &grade, &section)
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    if removed == 0 {
        return Err(HandlerErr::new("not_found", "grade-section not found"));
    }
    info!("catalog entry {} {} removed", grade, section);
    Ok(json!({ "removed": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !matches!(
        req.method.as_str(),
        "catalog.structure" | "catalog.list" | "catalog.deleteGrade" | "catalog.deleteSection"
    ) {
        return None;
    }

    if req.method == "catalog.structure" {
        return Some(match handle_structure() {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        });
    }

    let Some(conn) = state.db.as_ref() else {
        return Some(
            HandlerErr::new("no_workspace", "select a workspace first").response(&req.id),
        );
    };

    let result = match req.method.as_str() {
        "catalog.list" => handle_list(conn),
        "catalog.deleteGrade" => handle_delete_grade(conn, &req.params),
        _ => handle_delete_section(conn, &req.params),
    };

    Some(match result {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}

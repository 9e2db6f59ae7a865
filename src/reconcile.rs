//! Reconciliation of a staff member's desired assignment set against the
//! persisted rows: minimal insert/update/delete plan, stable row identity,
//! catalog resolution on the fly.

use log::warn;
use rusqlite::Connection;
use std::collections::HashMap;
use uuid::Uuid;

use crate::catalog::SectionResolver;
use crate::roster::{Assignment, AssignmentRole, StaffMember};

#[derive(Debug, Clone, PartialEq)]
pub struct PersistedAssignment {
    pub id: String,
    pub grade_section_id: String,
    pub area_id: Option<String>,
    pub role: AssignmentRole,
    pub weekly_hours: Option<f64>,
}

/// Composite persistence key of one assignment row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SlotKey {
    grade_section_id: String,
    area_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanInsert {
    pub grade_section_id: String,
    pub area_id: Option<String>,
    pub role: AssignmentRole,
    pub weekly_hours: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanUpdate {
    pub id: String,
    pub role: AssignmentRole,
    pub weekly_hours: Option<f64>,
}

#[derive(Debug, Default)]
pub struct Plan {
    pub inserts: Vec<PlanInsert>,
    pub updates: Vec<PlanUpdate>,
    pub deletes: Vec<String>,
    pub warnings: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Diffs `desired` against `persisted`.
///
/// Unresolvable desired entries are skipped with a warning, never aborting
/// the whole staff member. Two desired entries landing on one slot key keep
/// the later edit (also warned). Unchanged rows produce no plan entry at
/// all, which is what makes a second run over the engine's own output empty.
pub fn build_plan(
    persisted: &[PersistedAssignment],
    desired: &[Assignment],
    resolver: &mut SectionResolver,
) -> Plan {
    let mut plan = Plan::default();

    let mut wanted: Vec<(SlotKey, AssignmentRole, Option<f64>)> = Vec::new();
    let mut slot_of: HashMap<SlotKey, usize> = HashMap::new();
    for d in desired {
        let grade_section_id = match &d.grade_section_id {
            Some(id) => id.clone(),
            None => match resolver.resolve(&d.grade, &d.section) {
                Ok(id) => id,
                Err(e) => {
                    let msg = format!(
                        "assignment for {} {} skipped: {}",
                        d.grade, d.section, e
                    );
                    warn!("{}", msg);
                    plan.warnings.push(msg);
                    continue;
                }
            },
        };
        let key = SlotKey {
            grade_section_id,
            area_id: d.area_id.clone(),
        };
        match slot_of.get(&key) {
            Some(&idx) => {
                let msg = format!(
                    "duplicate assignment for {} {} (area {:?}); keeping the latest edit",
                    d.grade, d.section, d.area_id
                );
                warn!("{}", msg);
                plan.warnings.push(msg);
                wanted[idx] = (key, d.role, d.weekly_hours);
            }
            None => {
                slot_of.insert(key.clone(), wanted.len());
                wanted.push((key, d.role, d.weekly_hours));
            }
        }
    }

    let mut remaining: HashMap<SlotKey, &PersistedAssignment> = persisted
        .iter()
        .map(|p| {
            (
                SlotKey {
                    grade_section_id: p.grade_section_id.clone(),
                    area_id: p.area_id.clone(),
                },
                p,
            )
        })
        .collect();

    for (key, role, weekly_hours) in wanted {
        match remaining.remove(&key) {
            Some(existing) => {
                if existing.role != role || existing.weekly_hours != weekly_hours {
                    plan.updates.push(PlanUpdate {
                        id: existing.id.clone(),
                        role,
                        weekly_hours,
                    });
                }
            }
            None => plan.inserts.push(PlanInsert {
                grade_section_id: key.grade_section_id,
                area_id: key.area_id,
                role,
                weekly_hours,
            }),
        }
    }

    plan.deletes = remaining.into_values().map(|p| p.id.clone()).collect();
    plan.deletes.sort();
    plan
}

pub fn load_persisted(conn: &Connection, staff_id: &str) -> anyhow::Result<Vec<PersistedAssignment>> {
    let mut stmt = conn.prepare(
        "SELECT id, grade_section_id, area_id, role, weekly_hours
         FROM assignments
         WHERE staff_id = ?
         ORDER BY id",
    )?;
    let rows = stmt
        .query_map([staff_id], |r| {
            let role_raw: String = r.get(3)?;
            let role = AssignmentRole::parse(&role_raw).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    format!("unknown assignment role {:?}", role_raw).into(),
                )
            })?;
            Ok(PersistedAssignment {
                id: r.get(0)?,
                grade_section_id: r.get(1)?,
                area_id: r.get(2)?,
                role,
                weekly_hours: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Canonical assignment view for a staff member, grade/section strings
/// joined back in from the catalog.
pub fn canonical_assignments(conn: &Connection, staff_id: &str) -> anyhow::Result<Vec<Assignment>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, gs.grade, gs.section, a.area_id, a.role, a.weekly_hours, a.grade_section_id
         FROM assignments a
         JOIN grade_sections gs ON gs.id = a.grade_section_id
         WHERE a.staff_id = ?
         ORDER BY gs.grade, gs.section, a.area_id IS NOT NULL, a.area_id",
    )?;
    let rows = stmt
        .query_map([staff_id], |r| {
            let role_raw: String = r.get(4)?;
            let role = AssignmentRole::parse(&role_raw).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    format!("unknown assignment role {:?}", role_raw).into(),
                )
            })?;
            Ok(Assignment {
                id: r.get(0)?,
                grade: r.get(1)?,
                section: r.get(2)?,
                area_id: r.get(3)?,
                role,
                weekly_hours: r.get(5)?,
                grade_section_id: Some(r.get(6)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Executes the plan inside one transaction: deletes, then inserts, then
/// updates, each through a single prepared statement. Failure rolls the
/// whole staff member back.
pub fn apply_plan(conn: &Connection, staff_id: &str, plan: &Plan) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut del = tx.prepare("DELETE FROM assignments WHERE id = ? AND staff_id = ?")?;
        for id in &plan.deletes {
            del.execute((id, staff_id))?;
        }

        let mut ins = tx.prepare(
            "INSERT INTO assignments(id, staff_id, grade_section_id, area_id, role, weekly_hours)
             VALUES(?, ?, ?, ?, ?, ?)",
        )?;
        for i in &plan.inserts {
            ins.execute((
                Uuid::new_v4().to_string(),
                staff_id,
                &i.grade_section_id,
                &i.area_id,
                i.role.as_str(),
                i.weekly_hours,
            ))?;
        }

        let mut upd =
            tx.prepare("UPDATE assignments SET role = ?, weekly_hours = ? WHERE id = ?")?;
        for u in &plan.updates {
            upd.execute((u.role.as_str(), u.weekly_hours, &u.id))?;
        }
    }
    tx.commit()?;
    Ok(())
}

#[derive(Debug)]
pub struct SaveOutcome {
    pub staff: StaffMember,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub warnings: Vec<String>,
}

/// Reconciles one staff member and returns the canonical state re-read from
/// storage, so row ids in the outcome are authoritative.
pub fn save_staff(
    conn: &Connection,
    staff: &StaffMember,
    resolver: &mut SectionResolver,
) -> anyhow::Result<SaveOutcome> {
    let persisted = load_persisted(conn, &staff.id)?;
    let plan = build_plan(&persisted, &staff.assignments, resolver);
    if !plan.is_empty() {
        apply_plan(conn, &staff.id, &plan)?;
        conn.execute(
            "UPDATE staff_members SET updated_at = ? WHERE id = ?",
            (chrono::Utc::now().to_rfc3339(), &staff.id),
        )?;
    }
    let canonical = canonical_assignments(conn, &staff.id)?;
    Ok(SaveOutcome {
        staff: StaffMember {
            assignments: canonical,
            ..staff.clone()
        },
        inserted: plan.inserts.len(),
        updated: plan.updates.len(),
        deleted: plan.deletes.len(),
        warnings: plan.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::roster::StaffRole;

    fn seed_staff(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO staff_members(id, last_name, first_name, role) VALUES(?, ?, ?, ?)",
            (id, "Quispe", "María", "teacher"),
        )
        .expect("insert staff");
    }

    fn insert_row(
        conn: &Connection,
        id: &str,
        staff_id: &str,
        gs: &str,
        area: Option<&str>,
        role: AssignmentRole,
        hours: Option<f64>,
    ) {
        conn.execute(
            "INSERT INTO assignments(id, staff_id, grade_section_id, area_id, role, weekly_hours)
             VALUES(?, ?, ?, ?, ?, ?)",
            (id, staff_id, gs, area, role.as_str(), hours),
        )
        .expect("insert assignment");
    }

    fn desired(
        grade: &str,
        section: &str,
        area: Option<&str>,
        role: AssignmentRole,
        hours: Option<f64>,
    ) -> Assignment {
        Assignment {
            id: format!("tmp-{}", uuid::Uuid::new_v4()),
            grade: grade.to_string(),
            section: section.to_string(),
            area_id: area.map(str::to_string),
            role,
            weekly_hours: hours,
            grade_section_id: None,
        }
    }

    fn member(id: &str, assignments: Vec<Assignment>) -> StaffMember {
        StaffMember {
            id: id.to_string(),
            last_name: "Quispe".to_string(),
            first_name: "María".to_string(),
            role: StaffRole::Teacher,
            assignments,
            schedule: None,
        }
    }

    #[test]
    fn role_change_becomes_one_update_preserving_the_id() {
        let conn = db::open_db_in_memory().expect("open db");
        seed_staff(&conn, "t1");
        let mut resolver = SectionResolver::new(&conn);
        let gs1 = resolver.resolve("1er Grado", "A").expect("resolve");
        insert_row(&conn, "r1", "t1", &gs1, None, AssignmentRole::Teacher, None);

        let persisted = load_persisted(&conn, "t1").expect("load");
        let want = vec![desired(
            "1er Grado",
            "A",
            None,
            AssignmentRole::TeacherTutor,
            None,
        )];
        let plan = build_plan(&persisted, &want, &mut resolver);

        assert!(plan.inserts.is_empty());
        assert!(plan.deletes.is_empty());
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].id, "r1");
        assert_eq!(plan.updates[0].role, AssignmentRole::TeacherTutor);
    }

    #[test]
    fn missing_desired_rows_become_deletes() {
        let conn = db::open_db_in_memory().expect("open db");
        seed_staff(&conn, "t1");
        let mut resolver = SectionResolver::new(&conn);
        let gs1 = resolver.resolve("1er Grado", "A").expect("resolve");
        insert_row(&conn, "r1", "t1", &gs1, Some("a1"), AssignmentRole::Teacher, None);
        insert_row(&conn, "r2", "t1", &gs1, Some("a2"), AssignmentRole::Teacher, None);

        let persisted = load_persisted(&conn, "t1").expect("load");
        let want = vec![desired(
            "1er Grado",
            "A",
            Some("a1"),
            AssignmentRole::Teacher,
            None,
        )];
        let plan = build_plan(&persisted, &want, &mut resolver);

        assert!(plan.inserts.is_empty());
        assert!(plan.updates.is_empty());
        assert_eq!(plan.deletes, vec!["r2".to_string()]);
    }

    #[test]
    fn save_is_idempotent_against_its_own_output() {
        let conn = db::open_db_in_memory().expect("open db");
        seed_staff(&conn, "t1");
        let mut resolver = SectionResolver::new(&conn);

        let staff = member(
            "t1",
            vec![
                desired("1er Grado", "A", None, AssignmentRole::Teacher, None),
                desired("1er Grado", "A", Some("p-mat"), AssignmentRole::Teacher, Some(6.0)),
            ],
        );
        let first = save_staff(&conn, &staff, &mut resolver).expect("first save");
        assert_eq!(first.inserted, 2);
        assert_eq!(first.updated, 0);
        assert_eq!(first.deleted, 0);

        let second = save_staff(&conn, &first.staff, &mut resolver).expect("second save");
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.deleted, 0);
        assert_eq!(second.staff.assignments, first.staff.assignments);
    }

    #[test]
    fn unchanged_rows_keep_their_ids_across_edits() {
        let conn = db::open_db_in_memory().expect("open db");
        seed_staff(&conn, "t1");
        let mut resolver = SectionResolver::new(&conn);

        let staff = member(
            "t1",
            vec![
                desired("1er Grado", "A", None, AssignmentRole::Teacher, None),
                desired("1er Grado", "A", Some("p-mat"), AssignmentRole::Teacher, None),
                desired("1er Grado", "A", Some("p-com"), AssignmentRole::Teacher, None),
            ],
        );
        let saved = save_staff(&conn, &staff, &mut resolver).expect("save");
        let untouched_ids: Vec<String> = saved
            .staff
            .assignments
            .iter()
            .filter(|a| a.area_id.as_deref() != Some("p-mat"))
            .map(|a| a.id.clone())
            .collect();

        // Change hours on one area only.
        let mut edited = saved.staff.clone();
        for a in &mut edited.assignments {
            if a.area_id.as_deref() == Some("p-mat") {
                a.weekly_hours = Some(4.0);
            }
        }
        let resaved = save_staff(&conn, &edited, &mut resolver).expect("resave");
        assert_eq!(resaved.inserted, 0);
        assert_eq!(resaved.updated, 1);
        assert_eq!(resaved.deleted, 0);

        let after_ids: Vec<String> = resaved
            .staff
            .assignments
            .iter()
            .filter(|a| a.area_id.as_deref() != Some("p-mat"))
            .map(|a| a.id.clone())
            .collect();
        assert_eq!(untouched_ids, after_ids);
    }

    #[test]
    fn unresolvable_grade_is_skipped_with_a_warning() {
        let conn = db::open_db_in_memory().expect("open db");
        seed_staff(&conn, "t1");
        let mut resolver = SectionResolver::new(&conn);

        let want = vec![
            desired("1er Grado", "A", None, AssignmentRole::Teacher, None),
            desired("Grado Fantasma", "A", None, AssignmentRole::Teacher, None),
        ];
        let plan = build_plan(&[], &want, &mut resolver);

        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.warnings[0].contains("Grado Fantasma"));
    }

    #[test]
    fn duplicate_slot_keys_keep_the_last_edit_and_warn() {
        let conn = db::open_db_in_memory().expect("open db");
        seed_staff(&conn, "t1");
        let mut resolver = SectionResolver::new(&conn);

        let want = vec![
            desired("1er Grado", "A", Some("p-mat"), AssignmentRole::Teacher, Some(2.0)),
            desired("1er Grado", "A", Some("p-mat"), AssignmentRole::TeacherTutor, Some(5.0)),
        ];
        let plan = build_plan(&[], &want, &mut resolver);

        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.inserts[0].role, AssignmentRole::TeacherTutor);
        assert_eq!(plan.inserts[0].weekly_hours, Some(5.0));
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn apply_rolls_back_as_one_unit() {
        let conn = db::open_db_in_memory().expect("open db");
        seed_staff(&conn, "t1");
        let mut resolver = SectionResolver::new(&conn);
        let gs1 = resolver.resolve("1er Grado", "A").expect("resolve");
        insert_row(&conn, "r1", "t1", &gs1, None, AssignmentRole::Teacher, None);

        // An insert colliding with a surviving row violates the slot index
        // and must abort the whole plan, including its delete.
        let plan = Plan {
            inserts: vec![PlanInsert {
                grade_section_id: gs1.clone(),
                area_id: None,
                role: AssignmentRole::Teacher,
                weekly_hours: None,
            }],
            updates: Vec::new(),
            deletes: vec!["missing-row".to_string()],
            warnings: Vec::new(),
        };
        assert!(apply_plan(&conn, "t1", &plan).is_err());

        let rows = load_persisted(&conn, "t1").expect("load");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "r1");
    }

    #[test]
    fn canonical_view_joins_grade_and_section_back() {
        let conn = db::open_db_in_memory().expect("open db");
        seed_staff(&conn, "t1");
        let mut resolver = SectionResolver::new(&conn);

        let staff = member(
            "t1",
            vec![desired("3er Grado", "B", None, AssignmentRole::Teacher, None)],
        );
        let saved = save_staff(&conn, &staff, &mut resolver).expect("save");
        let a = &saved.staff.assignments[0];
        assert_eq!(a.grade, "3er Grado");
        assert_eq!(a.section, "B");
        assert!(a.grade_section_id.is_some());
        assert!(!a.id.starts_with("tmp-"));
    }
}

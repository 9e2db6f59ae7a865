//! In-memory assignment editing for staff records.
//!
//! An [`EditSession`] owns the working copy of every staff member plus a
//! pristine snapshot taken at open time. All toggle operations are total:
//! a missing selection, an unknown staff id or a role that cannot hold the
//! requested assignment is a silent no-op, never an error. Every mutation
//! rebuilds the affected assignment vector, so snapshots handed out earlier
//! never change under the caller.
//!
//! Invariants maintained here (storage does not enforce them):
//! - one main (arealess) assignment per (staff, grade, section)
//! - an area assignment implies its main assignment exists
//! - assistants hold main-only assignments
//! - one homeroom tutor per (grade, section) across all staff

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::curriculum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Admin,
    Director,
    Coordinator,
    Teacher,
    Assistant,
}

impl StaffRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "director" => Some(Self::Director),
            "coordinator" => Some(Self::Coordinator),
            "teacher" => Some(Self::Teacher),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Director => "director",
            Self::Coordinator => "coordinator",
            Self::Teacher => "teacher",
            Self::Assistant => "assistant",
        }
    }

    /// Role a freshly synthesized assignment starts with.
    pub fn default_assignment_role(self) -> AssignmentRole {
        match self {
            Self::Assistant => AssignmentRole::Assistant,
            _ => AssignmentRole::Teacher,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentRole {
    Teacher,
    TeacherTutor,
    Assistant,
}

impl AssignmentRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "teacher" => Some(Self::Teacher),
            "teacher_tutor" => Some(Self::TeacherTutor),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Teacher => "teacher",
            Self::TeacherTutor => "teacher_tutor",
            Self::Assistant => "assistant",
        }
    }
}

/// A (grade, section) pair with structural equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectionKey {
    pub grade: String,
    pub section: String,
}

impl SectionKey {
    pub fn new(grade: impl Into<String>, section: impl Into<String>) -> Self {
        Self {
            grade: grade.into(),
            section: section.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// Persisted row id, or a `tmp-` prefixed id until the first save.
    pub id: String,
    pub grade: String,
    pub section: String,
    /// `None` marks this as the section's main assignment.
    #[serde(default)]
    pub area_id: Option<String>,
    pub role: AssignmentRole,
    #[serde(default)]
    pub weekly_hours: Option<f64>,
    /// Resolved grade-section catalog id; `None` until resolution.
    #[serde(default)]
    pub grade_section_id: Option<String>,
}

impl Assignment {
    pub fn is_main(&self) -> bool {
        self.area_id.is_none()
    }

    fn matches_pair(&self, grade: &str, section: &str) -> bool {
        self.grade == grade && self.section == section
    }

    fn ephemeral_id() -> String {
        format!("tmp-{}", Uuid::new_v4())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffMember {
    /// Document number; doubles as the storage key.
    pub id: String,
    pub last_name: String,
    pub first_name: String,
    pub role: StaffRole,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    /// Weekly schedule: slot label -> assignment id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<BTreeMap<String, String>>,
}

/// Returns the assignment set with a main assignment guaranteed for the pair,
/// plus its index. Synthesizes one (ephemeral id, role derived from the
/// holder's global role) when missing.
pub fn ensure_main(
    assignments: &[Assignment],
    holder_role: StaffRole,
    grade: &str,
    section: &str,
) -> (Vec<Assignment>, usize) {
    let mut next = assignments.to_vec();
    if let Some(idx) = next
        .iter()
        .position(|a| a.is_main() && a.matches_pair(grade, section))
    {
        return (next, idx);
    }
    next.push(Assignment {
        id: Assignment::ephemeral_id(),
        grade: grade.to_string(),
        section: section.to_string(),
        area_id: None,
        role: holder_role.default_assignment_role(),
        weekly_hours: None,
        grade_section_id: None,
    });
    let idx = next.len() - 1;
    (next, idx)
}

fn has_area_for_pair(assignments: &[Assignment], grade: &str, section: &str) -> bool {
    assignments
        .iter()
        .any(|a| !a.is_main() && a.matches_pair(grade, section))
}

/// Adds an area assignment, ensuring the main exists first. Role and hours
/// are copied from the main at creation time. Idempotent per (pair, area).
pub fn toggle_area_on(
    assignments: &[Assignment],
    holder_role: StaffRole,
    grade: &str,
    section: &str,
    area_id: &str,
) -> Vec<Assignment> {
    let already = assignments
        .iter()
        .any(|a| a.matches_pair(grade, section) && a.area_id.as_deref() == Some(area_id));
    if already {
        return assignments.to_vec();
    }
    let (mut next, main_idx) = ensure_main(assignments, holder_role, grade, section);
    let main = next[main_idx].clone();
    next.push(Assignment {
        id: Assignment::ephemeral_id(),
        grade: grade.to_string(),
        section: section.to_string(),
        area_id: Some(area_id.to_string()),
        role: main.role,
        weekly_hours: main.weekly_hours,
        grade_section_id: main.grade_section_id,
    });
    next
}

/// Removes an area assignment. When that empties the pair's area set, the
/// main assignment goes too, unless its role is homeroom tutor.
pub fn toggle_area_off(
    assignments: &[Assignment],
    grade: &str,
    section: &str,
    area_id: &str,
) -> Vec<Assignment> {
    let mut next: Vec<Assignment> = assignments
        .iter()
        .filter(|a| !(a.matches_pair(grade, section) && a.area_id.as_deref() == Some(area_id)))
        .cloned()
        .collect();
    if !has_area_for_pair(&next, grade, section) {
        next.retain(|a| {
            !(a.is_main() && a.matches_pair(grade, section) && a.role != AssignmentRole::TeacherTutor)
        });
    }
    next
}

/// Promotes the pair's main assignment to homeroom tutor.
pub fn toggle_tutor_on(
    assignments: &[Assignment],
    holder_role: StaffRole,
    grade: &str,
    section: &str,
) -> Vec<Assignment> {
    let (mut next, main_idx) = ensure_main(assignments, holder_role, grade, section);
    next[main_idx].role = AssignmentRole::TeacherTutor;
    next
}

/// Demotes the pair's main back to teacher; a main left with zero areas is
/// removed entirely.
pub fn toggle_tutor_off(assignments: &[Assignment], grade: &str, section: &str) -> Vec<Assignment> {
    let mut next = assignments.to_vec();
    let Some(idx) = next
        .iter()
        .position(|a| a.is_main() && a.matches_pair(grade, section))
    else {
        return next;
    };
    next[idx].role = AssignmentRole::Teacher;
    if !has_area_for_pair(&next, grade, section) {
        next.remove(idx);
    }
    next
}

/// Clears the tutor flag on a pair's main without touching anything else.
/// Used on the *other* staff members when someone takes the tutor role.
pub fn clear_tutor(assignments: &[Assignment], grade: &str, section: &str) -> Vec<Assignment> {
    assignments
        .iter()
        .map(|a| {
            if a.is_main() && a.matches_pair(grade, section) && a.role == AssignmentRole::TeacherTutor
            {
                let mut demoted = a.clone();
                demoted.role = AssignmentRole::Teacher;
                demoted
            } else {
                a.clone()
            }
        })
        .collect()
}

fn toggle_auxiliar_on(assignments: &[Assignment], grade: &str, section: &str) -> Vec<Assignment> {
    let mut next = assignments.to_vec();
    let exists = next
        .iter()
        .any(|a| a.is_main() && a.matches_pair(grade, section));
    if !exists {
        next.push(Assignment {
            id: Assignment::ephemeral_id(),
            grade: grade.to_string(),
            section: section.to_string(),
            area_id: None,
            role: AssignmentRole::Assistant,
            weekly_hours: None,
            grade_section_id: None,
        });
    }
    next
}

fn toggle_auxiliar_off(assignments: &[Assignment], grade: &str, section: &str) -> Vec<Assignment> {
    assignments
        .iter()
        .filter(|a| !(a.is_main() && a.matches_pair(grade, section)))
        .cloned()
        .collect()
}

/// Strips area assignments from assistant records. Guards against
/// inconsistent persisted data; a no-op for every other role.
pub fn sanitize(mut staff: StaffMember) -> StaffMember {
    if staff.role == StaffRole::Assistant {
        staff.assignments.retain(Assignment::is_main);
    }
    staff
}

/// One editing session over the full staff roster.
///
/// Created by `session.open`, torn down by `session.close`. The `original`
/// snapshots back dirty detection and survive failed saves, so local edits
/// are never lost; `mark_saved` replaces a snapshot with the canonical
/// post-save record.
pub struct EditSession {
    staff: Vec<StaffMember>,
    original: HashMap<String, StaffMember>,
    selection: Option<SectionKey>,
    sections_by_grade: HashMap<String, Vec<String>>,
}

impl EditSession {
    pub fn open(
        staff: Vec<StaffMember>,
        sections_by_grade: HashMap<String, Vec<String>>,
    ) -> Self {
        let staff: Vec<StaffMember> = staff.into_iter().map(sanitize).collect();
        let original = staff.iter().map(|s| (s.id.clone(), s.clone())).collect();
        Self {
            staff,
            original,
            selection: None,
            sections_by_grade,
        }
    }

    pub fn staff(&self) -> &[StaffMember] {
        &self.staff
    }

    pub fn get(&self, staff_id: &str) -> Option<&StaffMember> {
        self.staff.iter().find(|s| s.id == staff_id)
    }

    pub fn selection(&self) -> Option<&SectionKey> {
        self.selection.as_ref()
    }

    pub fn select(&mut self, selection: Option<SectionKey>) {
        self.selection = selection;
    }

    /// Ids of staff members whose working copy differs from the snapshot.
    pub fn dirty_ids(&self) -> Vec<String> {
        self.staff
            .iter()
            .filter(|s| self.original.get(&s.id) != Some(*s))
            .map(|s| s.id.clone())
            .collect()
    }

    /// Replaces working copy and snapshot with the canonical post-save record.
    pub fn mark_saved(&mut self, canonical: StaffMember) {
        if let Some(slot) = self.staff.iter_mut().find(|s| s.id == canonical.id) {
            *slot = canonical.clone();
        }
        self.original.insert(canonical.id.clone(), canonical);
    }

    pub fn toggle_area(&mut self, staff_id: &str, area_id: &str, checked: bool) {
        let Some(sel) = self.selection.clone() else {
            return;
        };
        let Some(staff) = self.staff.iter_mut().find(|s| s.id == staff_id) else {
            return;
        };
        if staff.role == StaffRole::Assistant {
            return;
        }
        staff.assignments = if checked {
            toggle_area_on(
                &staff.assignments,
                staff.role,
                &sel.grade,
                &sel.section,
                area_id,
            )
        } else {
            toggle_area_off(&staff.assignments, &sel.grade, &sel.section, area_id)
        };
    }

    pub fn toggle_tutor(&mut self, staff_id: &str, checked: bool) {
        let Some(sel) = self.selection.clone() else {
            return;
        };
        let Some(target) = self.staff.iter().find(|s| s.id == staff_id) else {
            return;
        };
        if target.role == StaffRole::Assistant {
            return;
        }
        if checked {
            for staff in self.staff.iter_mut() {
                if staff.id == staff_id {
                    staff.assignments =
                        toggle_tutor_on(&staff.assignments, staff.role, &sel.grade, &sel.section);
                } else {
                    staff.assignments = clear_tutor(&staff.assignments, &sel.grade, &sel.section);
                }
            }
        } else if let Some(staff) = self.staff.iter_mut().find(|s| s.id == staff_id) {
            staff.assignments = toggle_tutor_off(&staff.assignments, &sel.grade, &sel.section);
        }
    }

    pub fn toggle_auxiliar(&mut self, staff_id: &str, grade: &str, section: &str, checked: bool) {
        let Some(staff) = self.staff.iter_mut().find(|s| s.id == staff_id) else {
            return;
        };
        if staff.role != StaffRole::Assistant {
            return;
        }
        staff.assignments = if checked {
            toggle_auxiliar_on(&staff.assignments, grade, section)
        } else {
            toggle_auxiliar_off(&staff.assignments, grade, section)
        };
    }

    /// Bulk check: every area of the selected grade for teaching staff, or a
    /// main assignment in every known section of the selected grade for
    /// assistants.
    pub fn assign_all_areas(&mut self, staff_id: &str) {
        let Some(sel) = self.selection.clone() else {
            return;
        };
        let Some(staff) = self.staff.iter().find(|s| s.id == staff_id) else {
            return;
        };
        if staff.role == StaffRole::Assistant {
            for section in self.grade_sections(&sel.grade) {
                self.toggle_auxiliar(staff_id, &sel.grade, &section, true);
            }
        } else {
            for area in curriculum::areas_for_grade(&sel.grade) {
                self.toggle_area(staff_id, area.id, true);
            }
        }
    }

    /// Bulk uncheck, the inverse of [`Self::assign_all_areas`].
    pub fn clear_areas(&mut self, staff_id: &str) {
        let Some(sel) = self.selection.clone() else {
            return;
        };
        let Some(staff) = self.staff.iter().find(|s| s.id == staff_id) else {
            return;
        };
        if staff.role == StaffRole::Assistant {
            for section in self.grade_sections(&sel.grade) {
                self.toggle_auxiliar(staff_id, &sel.grade, &section, false);
            }
        } else {
            for area in curriculum::areas_for_grade(&sel.grade) {
                self.toggle_area(staff_id, area.id, false);
            }
        }
    }

    fn grade_sections(&self, grade: &str) -> Vec<String> {
        self.sections_by_grade
            .get(grade)
            .cloned()
            .unwrap_or_default()
    }
}

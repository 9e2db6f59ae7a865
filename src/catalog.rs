//! Grade-section catalog: resolves (grade, section) pairs to stable row ids,
//! creating entries lazily.

use log::debug;
use rusqlite::Connection;
use std::collections::HashMap;
use uuid::Uuid;

use crate::curriculum;
use crate::roster::SectionKey;

/// Cached resolver over the `grade_sections` table.
///
/// A miss runs a single unique-constraint upsert, never a check-then-insert,
/// so concurrent first-time resolution of the same pair cannot create
/// duplicate catalog rows.
pub struct SectionResolver<'c> {
    conn: &'c Connection,
    cache: HashMap<SectionKey, String>,
}

impl<'c> SectionResolver<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            cache: HashMap::new(),
        }
    }

    pub fn resolve(&mut self, grade: &str, section: &str) -> anyhow::Result<String> {
        let key = SectionKey::new(grade, section);
        if let Some(id) = self.cache.get(&key) {
            return Ok(id.clone());
        }
        let Some(level) = curriculum::level_for_grade(grade) else {
            anyhow::bail!("grade {:?} is not part of the curricular plan", grade);
        };
        let candidate = Uuid::new_v4().to_string();
        let id: String = self.conn.query_row(
            "INSERT INTO grade_sections(id, grade, section, level)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(grade, section) DO UPDATE SET level = excluded.level
             RETURNING id",
            (&candidate, grade, section, level),
            |r| r.get(0),
        )?;
        if id == candidate {
            debug!("catalog entry created for {} {} ({})", grade, section, id);
        }
        self.cache.insert(key, id.clone());
        Ok(id)
    }
}

/// Known sections per grade, for the edit session's assistant bulk ops.
pub fn sections_by_grade(conn: &Connection) -> anyhow::Result<HashMap<String, Vec<String>>> {
    let mut stmt =
        conn.prepare("SELECT grade, section FROM grade_sections ORDER BY grade, section")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (grade, section) in rows {
        out.entry(grade).or_default().push(section);
    }
    Ok(out)
}

/// Removes every catalog row of a grade. Callers verify the rows are
/// unreferenced first.
pub fn delete_grade(conn: &Connection, grade: &str) -> anyhow::Result<usize> {
    let n = conn.execute("DELETE FROM grade_sections WHERE grade = ?", [grade])?;
    Ok(n)
}

pub fn delete_grade_section(conn: &Connection, grade: &str, section: &str) -> anyhow::Result<usize> {
    let n = conn.execute(
        "DELETE FROM grade_sections WHERE grade = ? AND section = ?",
        (grade, section),
    )?;
    Ok(n)
}

//! Static curricular plan: institution levels, their grades and areas.
//!
//! This is reference data, not user data. Sections actually in use live in
//! the `grade_sections` table; this module only answers "which grades exist
//! at which level, and which areas does a grade teach".

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Area {
    pub id: &'static str,
    pub name: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct LevelPlan {
    pub level: &'static str,
    pub label: &'static str,
    pub grades: &'static [&'static str],
    pub areas: &'static [Area],
}

pub const PLAN: &[LevelPlan] = &[
    LevelPlan {
        level: "inicial",
        label: "Inicial",
        grades: &["3 Años", "4 Años", "5 Años"],
        areas: &[
            Area { id: "i-com", name: "Comunicación" },
            Area { id: "i-mat", name: "Matemática" },
            Area { id: "i-per", name: "Personal Social" },
            Area { id: "i-cyt", name: "Ciencia y Tecnología" },
            Area { id: "i-psm", name: "Psicomotricidad" },
        ],
    },
    LevelPlan {
        level: "primaria",
        label: "Primaria",
        grades: &[
            "1er Grado",
            "2do Grado",
            "3er Grado",
            "4to Grado",
            "5to Grado",
            "6to Grado",
        ],
        areas: &[
            Area { id: "p-mat", name: "Matemática" },
            Area { id: "p-com", name: "Comunicación" },
            Area { id: "p-cyt", name: "Ciencia y Tecnología" },
            Area { id: "p-per", name: "Personal Social" },
            Area { id: "p-art", name: "Arte y Cultura" },
            Area { id: "p-ing", name: "Inglés" },
            Area { id: "p-rel", name: "Educación Religiosa" },
            Area { id: "p-fis", name: "Educación Física" },
        ],
    },
    LevelPlan {
        level: "secundaria",
        label: "Secundaria",
        grades: &["1er Año", "2do Año", "3er Año", "4to Año", "5to Año"],
        areas: &[
            Area { id: "s-mat", name: "Matemática" },
            Area { id: "s-com", name: "Comunicación" },
            Area { id: "s-cyt", name: "Ciencia y Tecnología" },
            Area { id: "s-hge", name: "Ciencias Sociales" },
            Area { id: "s-dpc", name: "Desarrollo Personal y Cívica" },
            Area { id: "s-art", name: "Arte y Cultura" },
            Area { id: "s-ing", name: "Inglés" },
            Area { id: "s-rel", name: "Educación Religiosa" },
            Area { id: "s-fis", name: "Educación Física" },
            Area { id: "s-ept", name: "Educación para el Trabajo" },
        ],
    },
];

pub fn level_for_grade(grade: &str) -> Option<&'static str> {
    PLAN.iter()
        .find(|l| l.grades.contains(&grade))
        .map(|l| l.level)
}

pub fn areas_for_grade(grade: &str) -> &'static [Area] {
    PLAN.iter()
        .find(|l| l.grades.contains(&grade))
        .map(|l| l.areas)
        .unwrap_or(&[])
}

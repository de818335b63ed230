use crate::model::AcademicSubject;

pub const LEVEL_FUNDAMENTAL_I: &str = "Fundamental I";
pub const LEVEL_FUNDAMENTAL_II: &str = "Fundamental II";
pub const LEVEL_MEDIO: &str = "Ensino Médio";

/// Built-in curriculum: weekly lessons per subject per level. Used whenever
/// the subject has no configured `weeklyHours` for the grade.
const DEFAULT_MATRIX: &[(&str, &[(&str, u32)])] = &[
    (
        "sub_portuguese",
        &[(LEVEL_FUNDAMENTAL_I, 6), (LEVEL_FUNDAMENTAL_II, 5), (LEVEL_MEDIO, 3)],
    ),
    (
        "sub_math",
        &[(LEVEL_FUNDAMENTAL_I, 5), (LEVEL_FUNDAMENTAL_II, 5), (LEVEL_MEDIO, 4)],
    ),
    (
        "sub_science",
        &[(LEVEL_FUNDAMENTAL_I, 2), (LEVEL_FUNDAMENTAL_II, 3)],
    ),
    (
        "sub_history",
        &[(LEVEL_FUNDAMENTAL_I, 2), (LEVEL_FUNDAMENTAL_II, 2), (LEVEL_MEDIO, 2)],
    ),
    (
        "sub_geography",
        &[(LEVEL_FUNDAMENTAL_I, 2), (LEVEL_FUNDAMENTAL_II, 2), (LEVEL_MEDIO, 2)],
    ),
    (
        "sub_english",
        &[(LEVEL_FUNDAMENTAL_I, 1), (LEVEL_FUNDAMENTAL_II, 2), (LEVEL_MEDIO, 2)],
    ),
    ("sub_spanish", &[(LEVEL_FUNDAMENTAL_II, 1), (LEVEL_MEDIO, 1)]),
    (
        "sub_arts",
        &[(LEVEL_FUNDAMENTAL_I, 1), (LEVEL_FUNDAMENTAL_II, 1), (LEVEL_MEDIO, 1)],
    ),
    (
        "sub_physical_education",
        &[(LEVEL_FUNDAMENTAL_I, 2), (LEVEL_FUNDAMENTAL_II, 2), (LEVEL_MEDIO, 1)],
    ),
    (
        "sub_religion",
        &[(LEVEL_FUNDAMENTAL_I, 1), (LEVEL_FUNDAMENTAL_II, 1)],
    ),
    ("sub_literature", &[(LEVEL_MEDIO, 2)]),
    ("sub_biology", &[(LEVEL_MEDIO, 2)]),
    ("sub_physics", &[(LEVEL_MEDIO, 2)]),
    ("sub_chemistry", &[(LEVEL_MEDIO, 2)]),
    ("sub_philosophy", &[(LEVEL_MEDIO, 1)]),
    ("sub_sociology", &[(LEVEL_MEDIO, 1)]),
];

/// Subject ids the built-in matrix knows about.
pub fn default_subject_ids() -> impl Iterator<Item = &'static str> {
    DEFAULT_MATRIX.iter().map(|(id, _)| *id)
}

/// Picks the value of the longest level key contained in `grade_level`, so
/// "Fundamental II" is never shadowed by "Fundamental I".
fn lookup_level<'k, I>(entries: I, grade_level: &str) -> Option<u32>
where
    I: IntoIterator<Item = (&'k str, u32)>,
{
    let mut entries: Vec<(&str, u32)> = entries.into_iter().collect();
    entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
    entries
        .into_iter()
        .find(|(level, _)| !level.is_empty() && grade_level.contains(level))
        .map(|(_, hours)| hours)
}

/// Expected weekly lessons of `subject` in `grade_level`. Zero means the
/// subject is not taught in that grade.
pub fn weekly_hours(subject: &str, grade_level: &str, academic_subjects: &[AcademicSubject]) -> u32 {
    let configured = academic_subjects
        .iter()
        .find(|s| s.id == subject && !s.weekly_hours.is_empty())
        .and_then(|s| {
            lookup_level(
                s.weekly_hours.iter().map(|(k, v)| (k.as_str(), *v)),
                grade_level,
            )
        });
    if let Some(hours) = configured {
        return hours;
    }
    DEFAULT_MATRIX
        .iter()
        .find(|(id, _)| *id == subject)
        .and_then(|(_, levels)| lookup_level(levels.iter().copied(), grade_level))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn fundamental_two_is_not_shadowed() {
        assert_eq!(weekly_hours("sub_science", "7º Ano - Fundamental II", &[]), 3);
        assert_eq!(weekly_hours("sub_science", "3º Ano - Fundamental I", &[]), 2);
    }

    #[test]
    fn configured_hours_take_precedence() {
        let mut hours = BTreeMap::new();
        hours.insert(LEVEL_MEDIO.to_string(), 3);
        let subjects = vec![AcademicSubject {
            id: "sub_biology".into(),
            name: "Biologia".into(),
            short_name: None,
            weekly_hours: hours,
            active: true,
        }];
        assert_eq!(weekly_hours("sub_biology", "2ª Série - Ensino Médio", &subjects), 3);
        // No configured level matches: the built-in matrix answers.
        assert_eq!(weekly_hours("sub_biology", "9º Ano - Fundamental II", &subjects), 0);
    }

    #[test]
    fn unknown_subject_or_level_is_zero() {
        assert_eq!(weekly_hours("sub_robotics", "Ensino Médio", &[]), 0);
        assert_eq!(weekly_hours("sub_math", "Educação Infantil", &[]), 0);
    }
}

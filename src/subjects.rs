//! Resolving free-text and legacy subject strings to canonical subject ids.
//!
//! Resolution is an ordered pipeline of named strategies. Each one either
//! returns a canonical id or passes; the first hit wins. When every strategy
//! passes the subject needs an operator's decision and is never guessed.
//!
//! Order: [`Strategy::ExactCanonical`], [`Strategy::NormalizedName`],
//! [`Strategy::KeywordFamily`], [`Strategy::TeacherAssignment`].

use serde::Serialize;
use std::collections::BTreeSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::matrix;
use crate::model::{AcademicSubject, TeacherRecord};

pub const CANONICAL_PREFIX: &str = "sub_";

/// Lowercase, strip diacritics, turn punctuation into spaces and collapse
/// whitespace: `"Ed. Física"` becomes `"ed fisica"`.
pub fn normalize_subject_text(raw: &str) -> String {
    let folded: String = raw
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    id: String,
    names: Vec<String>,
}

/// The canonical subject set: configured academic subjects plus the ids the
/// built-in curriculum matrix knows.
#[derive(Debug, Clone)]
pub struct SubjectCatalog {
    entries: Vec<CatalogEntry>,
    ids: BTreeSet<String>,
}

impl SubjectCatalog {
    pub fn new(academic_subjects: &[AcademicSubject]) -> Self {
        let mut entries: Vec<CatalogEntry> = academic_subjects
            .iter()
            .map(|s| {
                let mut names = vec![normalize_subject_text(&s.id), normalize_subject_text(&s.name)];
                if let Some(short) = &s.short_name {
                    names.push(normalize_subject_text(short));
                }
                names.retain(|n| !n.is_empty());
                CatalogEntry {
                    id: s.id.clone(),
                    names,
                }
            })
            .collect();
        let mut ids: BTreeSet<String> = entries.iter().map(|e| e.id.clone()).collect();
        for id in matrix::default_subject_ids() {
            if ids.insert(id.to_string()) {
                entries.push(CatalogEntry {
                    id: id.to_string(),
                    names: vec![normalize_subject_text(id)],
                });
            }
        }
        Self { entries, ids }
    }

    pub fn is_canonical(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

/// Extra facts about where a subject string was found.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveContext<'a> {
    pub teacher: Option<&'a TeacherRecord>,
    pub grade_level: Option<&'a str>,
    pub school_class: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    ExactCanonical,
    NormalizedName,
    KeywordFamily,
    TeacherAssignment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Resolution {
    Resolved { id: String, strategy: Strategy },
    NeedsManualAction,
}

impl Resolution {
    pub fn id(&self) -> Option<&str> {
        match self {
            Resolution::Resolved { id, .. } => Some(id),
            Resolution::NeedsManualAction => None,
        }
    }
}

type StrategyFn = fn(&str, &SubjectCatalog, &ResolveContext<'_>) -> Option<String>;

/// The resolution order. Earlier strategies are stricter.
pub const PIPELINE: &[(Strategy, StrategyFn)] = &[
    (Strategy::ExactCanonical, exact_canonical),
    (Strategy::NormalizedName, normalized_name),
    (Strategy::KeywordFamily, keyword_family),
    (Strategy::TeacherAssignment, teacher_assignment),
];

pub fn exact_canonical(raw: &str, catalog: &SubjectCatalog, _: &ResolveContext<'_>) -> Option<String> {
    catalog.is_canonical(raw).then(|| raw.to_string())
}

/// Matches the normalized string against every configured id, name and
/// short name. More than one distinct hit is ambiguous and passes.
pub fn normalized_name(raw: &str, catalog: &SubjectCatalog, _: &ResolveContext<'_>) -> Option<String> {
    let wanted = normalize_subject_text(raw);
    if wanted.is_empty() {
        return None;
    }
    let hits: BTreeSet<&str> = catalog
        .entries
        .iter()
        .filter(|e| e.names.iter().any(|n| *n == wanted))
        .map(|e| e.id.as_str())
        .collect();
    if hits.len() == 1 {
        hits.into_iter().next().map(str::to_string)
    } else {
        None
    }
}

/// Keyword families, most specific first. A matched keyword is blanked out
/// before later families are tried, so "educacao fisica" never also reads
/// as physics.
const KEYWORD_FAMILIES: &[(&str, &[&str])] = &[
    (
        "sub_physical_education",
        &["educacao fisica", "ed fisica", "edfisica", "physical education"],
    ),
    ("sub_portuguese", &["lingua portuguesa", "portugues", "portuguese"]),
    ("sub_literature", &["literatura", "literature"]),
    ("sub_math", &["matematica", "math"]),
    ("sub_biology", &["biolog"]),
    ("sub_chemistry", &["quimica", "chemistry"]),
    ("sub_physics", &["fisica", "physics"]),
    ("sub_science", &["ciencia", "science"]),
    ("sub_history", &["historia", "history"]),
    ("sub_geography", &["geografia", "geography"]),
    ("sub_english", &["lingua inglesa", "ingles", "english"]),
    ("sub_spanish", &["lingua espanhola", "espanhol", "spanish"]),
    ("sub_philosophy", &["filosofia", "philosoph"]),
    ("sub_sociology", &["sociolog"]),
    ("sub_religion", &["ensino religioso", "religi"]),
    ("sub_arts", &["artes", "arte", "artistic", "arts"]),
];

pub fn keyword_family(raw: &str, catalog: &SubjectCatalog, _: &ResolveContext<'_>) -> Option<String> {
    let mut text = normalize_subject_text(raw);
    let mut hits: BTreeSet<&str> = BTreeSet::new();
    for (id, keywords) in KEYWORD_FAMILIES {
        for kw in keywords.iter() {
            if text.contains(kw) {
                hits.insert(*id);
                text = text.replace(kw, " ");
            }
        }
    }
    if hits.len() != 1 {
        return None;
    }
    hits.into_iter()
        .next()
        .filter(|id| catalog.is_canonical(id))
        .map(str::to_string)
}

/// Infers the subject from what the record's teacher teaches: the
/// assignments for the same grade/class (or the teacher's subject list when
/// there are none), each resolved by the stricter strategies. Exactly one
/// distinct canonical id is required.
pub fn teacher_assignment(_: &str, catalog: &SubjectCatalog, ctx: &ResolveContext<'_>) -> Option<String> {
    fn matches_opt(want: Option<&str>, have: Option<&str>) -> bool {
        match (want, have) {
            (Some(w), Some(h)) => w == h,
            _ => true,
        }
    }

    let teacher = ctx.teacher?;
    let mut candidates: Vec<&str> = teacher
        .assignments
        .iter()
        .filter(|a| {
            matches_opt(ctx.grade_level, a.grade_level.as_deref())
                && matches_opt(ctx.school_class, a.school_class.as_deref())
        })
        .map(|a| a.subject.as_str())
        .collect();
    if candidates.is_empty() {
        candidates = teacher.subjects.iter().map(String::as_str).collect();
    }
    let none = ResolveContext::default();
    let resolved: BTreeSet<String> = candidates
        .into_iter()
        .filter_map(|c| {
            PIPELINE
                .iter()
                .filter(|(s, _)| *s != Strategy::TeacherAssignment)
                .find_map(|(_, f)| f(c, catalog, &none))
        })
        .collect();
    if resolved.len() == 1 {
        resolved.into_iter().next()
    } else {
        None
    }
}

pub fn resolve_subject(raw: &str, catalog: &SubjectCatalog, ctx: &ResolveContext<'_>) -> Resolution {
    for (strategy, f) in PIPELINE {
        if let Some(id) = f(raw, catalog, ctx) {
            return Resolution::Resolved {
                id,
                strategy: *strategy,
            };
        }
    }
    Resolution::NeedsManualAction
}

/// Grouping key for duplicate detection: the canonical id when the subject
/// resolves, else its normalized text.
pub fn bucket_key(raw: &str, catalog: &SubjectCatalog, ctx: &ResolveContext<'_>) -> (String, bool) {
    match resolve_subject(raw, catalog, ctx) {
        Resolution::Resolved { id, .. } => (id, true),
        Resolution::NeedsManualAction => (normalize_subject_text(raw), false),
    }
}

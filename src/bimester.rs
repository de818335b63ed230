//! Mapping dates onto bimesters.
//!
//! Configured windows come from the `academicSettings` row for the unit and
//! year, inheriting the network-wide `all` row until a unit has its own.
//! When no configured window contains a date the resolver falls back to a
//! month-based quarter heuristic. That fallback is lossy: it can disagree
//! with what the administrators meant, so it is reported as
//! [`BimesterSource::Fallback`] instead of being presented as configured.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::model::{AcademicSettings, BimesterNumber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BimesterSource {
    Configured,
    /// Settings had windows, but none contained the date.
    Fallback,
    /// No settings (or no windows) at all.
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BimesterResolution {
    pub bimester: BimesterNumber,
    pub source: BimesterSource,
}

/// Quarter of the year: Jan–Mar 1, Apr–Jun 2, Jul–Sep 3, Oct–Dec 4.
pub fn static_bimester(date: NaiveDate) -> BimesterNumber {
    match date.month() {
        1..=3 => BimesterNumber::First,
        4..=6 => BimesterNumber::Second,
        7..=9 => BimesterNumber::Third,
        _ => BimesterNumber::Fourth,
    }
}

pub fn resolve_bimester(date: NaiveDate, settings: Option<&AcademicSettings>) -> BimesterResolution {
    let Some(settings) = settings.filter(|s| !s.bimesters.is_empty()) else {
        return BimesterResolution {
            bimester: static_bimester(date),
            source: BimesterSource::Static,
        };
    };
    if let Some(w) = settings
        .bimesters
        .iter()
        .find(|w| w.start_date <= date && date <= w.end_date)
    {
        return BimesterResolution {
            bimester: w.number,
            source: BimesterSource::Configured,
        };
    }
    BimesterResolution {
        bimester: static_bimester(date),
        source: BimesterSource::Fallback,
    }
}

/// The settings row that applies to `unit` in `year`: its own override if
/// present, otherwise the network default.
pub fn effective_settings<'s>(
    all: &'s [AcademicSettings],
    year: i32,
    unit: &str,
) -> Option<&'s AcademicSettings> {
    all.iter()
        .find(|s| s.year == year && s.unit == unit)
        .or_else(|| all.iter().find(|s| s.year == year && s.unit == "all"))
}

fn static_range(year: i32, b: BimesterNumber) -> Option<(NaiveDate, NaiveDate)> {
    let (start_month, end_month, end_day) = match b {
        BimesterNumber::First => (1, 3, 31),
        BimesterNumber::Second => (4, 6, 30),
        BimesterNumber::Third => (7, 9, 30),
        BimesterNumber::Fourth => (10, 12, 31),
    };
    Some((
        NaiveDate::from_ymd_opt(year, start_month, 1)?,
        NaiveDate::from_ymd_opt(year, end_month, end_day)?,
    ))
}

/// Inclusive date range of a bimester: the configured window when there is
/// one, else the static quarter. `None` only for years chrono cannot
/// represent.
pub fn bimester_range(
    year: i32,
    b: BimesterNumber,
    settings: Option<&AcademicSettings>,
) -> Option<(NaiveDate, NaiveDate)> {
    if let Some(w) = settings.and_then(|s| s.bimesters.iter().find(|w| w.number == b)) {
        return Some((w.start_date, w.end_date));
    }
    static_range(year, b)
}

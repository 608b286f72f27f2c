//! Per-student record edits. Each helper replaces the row with the same
//! natural key instead of appending a duplicate.

use crate::error::{Error, Result};
use crate::model::{
    Assessment, DplObservation, HafalanRecord, HafalanStatus, Student, SummativeAssessment,
};

pub const MAX_LEVEL: u8 = 4;

/// Keyed by `(tpId, aspek, pertemuan)`.
pub fn upsert_assessment(student: &mut Student, a: Assessment) -> Result<()> {
    if a.level > MAX_LEVEL {
        return Err(Error::Validation(format!(
            "level must be 0-{}, got {}",
            MAX_LEVEL, a.level
        )));
    }
    match student
        .assessments
        .iter_mut()
        .find(|x| x.tp_id == a.tp_id && x.aspek == a.aspek && x.pertemuan == a.pertemuan)
    {
        Some(existing) => *existing = a,
        None => student.assessments.push(a),
    }
    Ok(())
}

/// Keyed by id.
pub fn upsert_summative(student: &mut Student, s: SummativeAssessment) -> Result<()> {
    if !(0.0..=100.0).contains(&s.score) {
        return Err(Error::Validation("score must be between 0 and 100".to_string()));
    }
    match student.summatives.iter_mut().find(|x| x.id == s.id) {
        Some(existing) => *existing = s,
        None => student.summatives.push(s),
    }
    Ok(())
}

pub fn delete_summative(student: &mut Student, summative_id: &str) -> bool {
    let before = student.summatives.len();
    student.summatives.retain(|s| s.id != summative_id);
    student.summatives.len() != before
}

/// Keyed by `(tpId, dimension, pertemuan)`.
pub fn upsert_dpl_observation(student: &mut Student, o: DplObservation) -> Result<()> {
    if o.level > MAX_LEVEL {
        return Err(Error::Validation(format!(
            "level must be 0-{}, got {}",
            MAX_LEVEL, o.level
        )));
    }
    match student
        .dpl_observations
        .iter_mut()
        .find(|x| x.tp_id == o.tp_id && x.dimension == o.dimension && x.pertemuan == o.pertemuan)
    {
        Some(existing) => *existing = o,
        None => student.dpl_observations.push(o),
    }
    Ok(())
}

pub fn set_hafalan(student: &mut Student, item_id: &str, status: HafalanStatus, now: i64) {
    match student.hafalan.iter_mut().find(|h| h.item_id == item_id) {
        Some(existing) => {
            existing.status = status;
            existing.timestamp = now;
        }
        None => student.hafalan.push(HafalanRecord {
            item_id: item_id.to_string(),
            status,
            timestamp: now,
        }),
    }
}

/// Level at the latest meeting where this aspect was assessed.
pub fn latest_level(student: &Student, tp_id: &str, aspek: &str) -> Option<u8> {
    student
        .assessments
        .iter()
        .filter(|a| a.tp_id == tp_id && a.aspek == aspek)
        .max_by_key(|a| (a.pertemuan, a.timestamp))
        .map(|a| a.level)
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::session::CompletedSet;
use crate::types::IDLE_LABEL;

/// Resumen de una sesión terminada. Solo guarda series con repeticiones
/// y etiqueta de ejercicio real.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub started_at: f64,
    pub ended_at: f64,
    pub sets: Vec<CompletedSet>,
}

impl SessionSummary {
    pub fn new(started_at: f64, ended_at: f64, sets: &[CompletedSet]) -> Self {
        let sets = sets
            .iter()
            .filter(|s| s.reps > 0 && s.exercise != IDLE_LABEL)
            .cloned()
            .collect();
        Self {
            started_at,
            ended_at,
            sets,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.ended_at - self.started_at).max(0.0)
    }

    pub fn total_reps(&self) -> u32 {
        self.sets.iter().map(|s| s.reps).sum()
    }

    /// Σ reps × peso
    pub fn total_volume(&self) -> f64 {
        self.sets.iter().map(CompletedSet::volume).sum()
    }

    /// Series agrupadas por ejercicio, ordenadas por índice de serie
    pub fn sets_by_exercise(&self) -> BTreeMap<String, Vec<CompletedSet>> {
        let mut grouped: BTreeMap<String, Vec<CompletedSet>> = BTreeMap::new();
        for set in &self.sets {
            grouped.entry(set.exercise.clone()).or_default().push(set.clone());
        }
        for sets in grouped.values_mut() {
            sets.sort_by_key(|s| s.set_index);
        }
        grouped
    }

    pub fn reps_by_exercise(&self) -> BTreeMap<String, u32> {
        let mut reps: BTreeMap<String, u32> = BTreeMap::new();
        for set in &self.sets {
            *reps.entry(set.exercise.clone()).or_insert(0) += set.reps;
        }
        reps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn set(exercise: &str, set_index: u32, reps: u32, weight_kg: f64) -> CompletedSet {
        CompletedSet {
            exercise: exercise.to_string(),
            set_index,
            reps,
            weight_kg,
            started_at: 0.0,
            ended_at: 30.0,
            avg_confidence: 0.8,
        }
    }

    #[test]
    fn test_summary_filters_empty_and_idle_sets() {
        let summary = SessionSummary::new(
            0.0,
            600.0,
            &[set("squat", 1, 8, 40.0), set("idle", 1, 3, 0.0), set("curl", 1, 0, 10.0)],
        );
        assert_eq!(summary.sets.len(), 1);
        assert_eq!(summary.sets[0].exercise, "squat");
    }

    #[test]
    fn test_totals() {
        let summary = SessionSummary::new(
            10.0,
            130.0,
            &[set("squat", 1, 8, 40.0), set("curl", 1, 12, 10.0), set("squat", 2, 6, 45.0)],
        );
        assert_eq!(summary.total_reps(), 26);
        assert_relative_eq!(summary.total_volume(), 320.0 + 120.0 + 270.0);
        assert_relative_eq!(summary.duration_secs(), 120.0);

        let reps = summary.reps_by_exercise();
        assert_eq!(reps["squat"], 14);
        assert_eq!(reps["curl"], 12);
    }

    #[test]
    fn test_sets_grouped_and_sorted() {
        let summary = SessionSummary::new(
            0.0,
            1.0,
            &[set("squat", 2, 6, 45.0), set("curl", 1, 12, 10.0), set("squat", 1, 8, 40.0)],
        );
        let grouped = summary.sets_by_exercise();
        let squat_indices: Vec<u32> = grouped["squat"].iter().map(|s| s.set_index).collect();
        assert_eq!(squat_indices, vec![1, 2]);
        assert_eq!(grouped.keys().collect::<Vec<_>>(), vec!["curl", "squat"]);
    }

    #[test]
    fn test_serializes_to_json() {
        let summary = SessionSummary::new(0.0, 60.0, &[set("row", 1, 10, 30.0)]);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["sets"][0]["exercise"], "row");
        assert_eq!(json["sets"][0]["set_index"], 1);
        assert_eq!(json["ended_at"], 60.0);
    }
}

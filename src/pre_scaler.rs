use crate::dataset::{AVAILABILITY_IDX, FeatureVec, Transform};

/// Downweights rows by how likely the player is to feature at all: every
/// column is multiplied by `chance_of_playing / 100`. A player ruled out
/// contributes a zero row instead of being excised, which preserves the
/// matrix shape for the regressor. Apply exactly once per pipeline run —
/// reapplying rescales by the already-scaled availability.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreScaler;

impl Transform for PreScaler {
    fn fit(&mut self, _rows: &[FeatureVec]) {}

    fn transform(&self, rows: &[FeatureVec]) -> Vec<FeatureVec> {
        rows.iter()
            .map(|row| {
                let weight = row[AVAILABILITY_IDX] / 100.0;
                let mut out = *row;
                for value in &mut out {
                    *value *= weight;
                }
                out
            })
            .collect()
    }
}

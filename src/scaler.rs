use crate::dataset::{FEATURE_COUNT, FeatureVec, Transform};

/// Per-column standardization to zero mean and unit variance. Statistics
/// are learned from the training rows only; the same fitted statistics are
/// applied to validation and prediction data.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    means: FeatureVec,
    stds: FeatureVec,
}

impl Default for StandardScaler {
    fn default() -> Self {
        Self {
            means: [0.0; FEATURE_COUNT],
            stds: [1.0; FEATURE_COUNT],
        }
    }
}

impl Transform for StandardScaler {
    fn fit(&mut self, rows: &[FeatureVec]) {
        if rows.is_empty() {
            return;
        }
        let n = rows.len() as f64;
        for column in 0..FEATURE_COUNT {
            let mean = rows.iter().map(|row| row[column]).sum::<f64>() / n;
            let variance = rows
                .iter()
                .map(|row| (row[column] - mean).powi(2))
                .sum::<f64>()
                / n;
            self.means[column] = mean;
            // Constant columns would otherwise divide by zero.
            self.stds[column] = variance.sqrt().max(1e-6);
        }
    }

    fn transform(&self, rows: &[FeatureVec]) -> Vec<FeatureVec> {
        rows.iter()
            .map(|row| {
                let mut out = [0.0; FEATURE_COUNT];
                for column in 0..FEATURE_COUNT {
                    out[column] = (row[column] - self.means[column]) / self.stds[column];
                }
                out
            })
            .collect()
    }
}

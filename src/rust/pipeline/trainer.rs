use linfa::traits::Fit;
use linfa::Dataset;
use linfa_logistic::MultiLogisticRegression;
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::error::PipelineError;
use super::utils::softmax;

/// Options for the multinomial logistic regression head optimized with L-BFGS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LbfgsOptions {
    /// Upper bound on optimizer iterations
    pub max_iterations: u64,
    /// L2 regularization strength
    pub l2_penalty: f64,
    /// The optimizer stops once the gradient norm drops below this value
    pub gradient_tolerance: f64,
    /// Scale each feature by its maximum absolute training value before fitting
    pub normalize_features: bool,
    /// Report softmax probabilities instead of raw decision values
    pub normalize_scores: bool,
}

impl Default for LbfgsOptions {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            l2_penalty: 1.0,
            gradient_tolerance: 1e-4,
            normalize_features: true,
            normalize_scores: true,
        }
    }
}

impl LbfgsOptions {
    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_l2_penalty(mut self, l2_penalty: f64) -> Self {
        self.l2_penalty = l2_penalty;
        self
    }

    pub fn with_normalized_scores(mut self, normalize: bool) -> Self {
        self.normalize_scores = normalize;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if self.max_iterations == 0 {
            return Err(PipelineError::InvalidConfig("max_iterations must be at least 1".into()));
        }
        if !self.l2_penalty.is_finite() || self.l2_penalty < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "l2_penalty must be a non-negative number, got {}",
                self.l2_penalty
            )));
        }
        if !self.gradient_tolerance.is_finite() || self.gradient_tolerance <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "gradient_tolerance must be positive, got {}",
                self.gradient_tolerance
            )));
        }
        Ok(())
    }
}

/// Per-feature max-abs scaling learned from training features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    scale: Array1<f64>,
}

impl FeatureScaler {
    fn fit(records: &Array2<f64>) -> Self {
        let scale = records.map_axis(Axis(0), |column| {
            let max = column.iter().fold(0.0f64, |acc, &v| acc.max(v.abs()));
            if max > 1e-12 { 1.0 / max } else { 1.0 }
        });
        Self { scale }
    }

    fn apply(&self, records: &mut Array2<f64>) {
        for mut row in records.rows_mut() {
            row *= &self.scale;
        }
    }
}

/// The learned classification head: optional feature scaling plus one weight
/// column and intercept per label key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedClassifier {
    scaler: Option<FeatureScaler>,
    /// Shape `(n_features, n_classes)`, column `k` belongs to label key `k`
    weights: Array2<f64>,
    intercept: Array1<f64>,
    normalize_scores: bool,
}

impl TrainedClassifier {
    /// Fits the head on a `(n_samples, n_features)` matrix and dense label keys `0..n_classes`.
    ///
    /// Training starts from zero-initialized parameters, so identical inputs
    /// always produce identical weights.
    pub(crate) fn fit(
        mut records: Array2<f64>,
        targets: Array1<usize>,
        n_classes: usize,
        options: &LbfgsOptions,
    ) -> Result<Self, PipelineError> {
        options.validate()?;
        let start = Instant::now();
        info!(
            "Training L-BFGS logistic regression on {} samples x {} features ({} classes, max {} iterations)",
            records.nrows(),
            records.ncols(),
            n_classes,
            options.max_iterations
        );

        let scaler = if options.normalize_features {
            let scaler = FeatureScaler::fit(&records);
            scaler.apply(&mut records);
            Some(scaler)
        } else {
            None
        };

        let dataset = Dataset::new(records, targets);
        let model = MultiLogisticRegression::default()
            .alpha(options.l2_penalty)
            .gradient_tolerance(options.gradient_tolerance)
            .max_iterations(options.max_iterations)
            .with_intercept(true)
            .fit(&dataset)
            .map_err(|e| PipelineError::TrainingError(e.to_string()))?;

        // Reorder the model's columns (sorted by class) into key order
        let n_features = model.params().nrows();
        let mut weights = Array2::zeros((n_features, n_classes));
        let mut intercept = Array1::zeros(n_classes);
        let mut seen = vec![false; n_classes];
        for (column, &key) in model.classes().iter().enumerate() {
            if key >= n_classes {
                return Err(PipelineError::TrainingError(format!(
                    "optimizer returned unexpected class key {}",
                    key
                )));
            }
            weights.column_mut(key).assign(&model.params().column(column));
            intercept[key] = model.intercept()[column];
            seen[key] = true;
        }
        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(PipelineError::TrainingError(format!(
                "class key {} has no training samples",
                missing
            )));
        }

        debug!("Classifier trained in {:.2?}", start.elapsed());
        Ok(Self {
            scaler,
            weights,
            intercept,
            normalize_scores: options.normalize_scores,
        })
    }

    /// Scores a single feature vector, one entry per label key.
    pub(crate) fn score(&self, features: ArrayView1<f32>) -> Result<Vec<f32>, PipelineError> {
        if features.len() != self.num_features() {
            return Err(PipelineError::ModelError(format!(
                "feature vector has {} entries, classifier expects {}",
                features.len(),
                self.num_features()
            )));
        }
        let mut x = features.mapv(f64::from);
        if let Some(scaler) = &self.scaler {
            x *= &scaler.scale;
        }
        let logits = x.dot(&self.weights) + &self.intercept;
        let values = if self.normalize_scores {
            softmax(&logits.to_vec())
        } else {
            logits.to_vec()
        };
        Ok(values.into_iter().map(|v| v as f32).collect())
    }

    /// Checks that the scaler, weights and intercept agree on their dimensions
    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if self.intercept.len() != self.num_classes() {
            return Err(PipelineError::InvalidPipeline(format!(
                "classifier intercept has {} entries for {} classes",
                self.intercept.len(),
                self.num_classes()
            )));
        }
        if let Some(scaler) = &self.scaler {
            if scaler.scale.len() != self.num_features() {
                return Err(PipelineError::InvalidPipeline(format!(
                    "feature scaler has {} entries for {} features",
                    scaler.scale.len(),
                    self.num_features()
                )));
            }
        }
        Ok(())
    }

    pub fn num_features(&self) -> usize {
        self.weights.nrows()
    }

    pub fn num_classes(&self) -> usize {
        self.weights.ncols()
    }

    /// Whether `score` returns probabilities rather than decision values
    pub fn scores_normalized(&self) -> bool {
        self.normalize_scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn separable() -> (Array2<f64>, Array1<usize>) {
        let records = array![
            [10.0, 0.0],
            [9.0, 1.0],
            [11.0, 0.5],
            [0.0, 10.0],
            [1.0, 9.0],
            [0.5, 11.0],
        ];
        (records, array![0, 0, 0, 1, 1, 1])
    }

    #[test]
    fn test_fit_separates_classes() {
        let (records, targets) = separable();
        let options = LbfgsOptions::default().with_l2_penalty(0.01).with_max_iterations(200);
        let model = TrainedClassifier::fit(records, targets, 2, &options).unwrap();

        let scores = model.score(array![10.0f32, 0.0].view()).unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores[0] > scores[1]);
        assert!((scores.iter().sum::<f32>() - 1.0).abs() < 1e-5);

        let scores = model.score(array![0.0f32, 10.0].view()).unwrap();
        assert!(scores[1] > scores[0]);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let options = LbfgsOptions::default();
        let (records, targets) = separable();
        let first = TrainedClassifier::fit(records.clone(), targets.clone(), 2, &options).unwrap();
        let second = TrainedClassifier::fit(records, targets, 2, &options).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_raw_scores_are_not_normalized() {
        let (records, targets) = separable();
        let options = LbfgsOptions::default().with_normalized_scores(false);
        let model = TrainedClassifier::fit(records, targets, 2, &options).unwrap();
        assert!(!model.scores_normalized());
        let scores = model.score(array![10.0f32, 0.0].view()).unwrap();
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_feature_length_mismatch() {
        let (records, targets) = separable();
        let model = TrainedClassifier::fit(records, targets, 2, &LbfgsOptions::default()).unwrap();
        assert!(matches!(
            model.score(array![1.0f32, 2.0, 3.0].view()),
            Err(PipelineError::ModelError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_mismatched_shapes() {
        let (records, targets) = separable();
        let model = TrainedClassifier::fit(records, targets, 2, &LbfgsOptions::default()).unwrap();
        assert!(model.validate().is_ok());

        let mut short_intercept = model.clone();
        short_intercept.intercept = Array1::zeros(3);
        assert!(matches!(short_intercept.validate(), Err(PipelineError::InvalidPipeline(_))));

        let mut wide_scaler = model;
        wide_scaler.scaler = Some(FeatureScaler { scale: Array1::ones(5) });
        assert!(matches!(wide_scaler.validate(), Err(PipelineError::InvalidPipeline(_))));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let (records, targets) = separable();
        let options = LbfgsOptions::default().with_max_iterations(0);
        assert!(matches!(
            TrainedClassifier::fit(records, targets, 2, &options),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}

//! Multiclass metrics for a fitted pipeline on held-out data.

use log::info;
use serde::{Deserialize, Serialize};

use crate::dataset::LabeledImage;
use crate::pipeline::{softmax, FittedPipeline, PipelineError, Prediction};

/// Probabilities are clamped to this value before taking the log
const LOG_LOSS_EPSILON: f64 = 1e-15;

/// Counts of (true label, predicted label) pairs, indexed by vocabulary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<String>,
    /// `counts[truth][predicted]`
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    fn new(labels: Vec<String>) -> Self {
        let n = labels.len();
        Self {
            labels,
            counts: vec![vec![0; n]; n],
        }
    }

    /// Fraction of the records of class `key` that were predicted correctly,
    /// or `None` when the class has no records
    pub fn recall(&self, key: usize) -> Option<f64> {
        let row = self.counts.get(key)?;
        let total: usize = row.iter().sum();
        (total > 0).then(|| row[key] as f64 / total as f64)
    }
}

/// Aggregate classification metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Unweighted mean of per-class accuracy over the classes present in the test set
    pub macro_accuracy: f64,
    /// Fraction of all records predicted correctly
    pub micro_accuracy: f64,
    pub log_loss: f64,
    /// Log-loss per class in vocabulary order; `0.0` for classes without test records
    pub per_class_log_loss: Vec<f64>,
    /// Relative improvement of `log_loss` over always predicting the test-set class frequencies
    pub log_loss_reduction: f64,
    pub confusion_matrix: ConfusionMatrix,
}

/// Applies the pipeline to every test record and compares with ground truth.
///
/// All labels are checked against the vocabulary before any image is read.
///
/// # Errors
/// - `EmptyEvaluationSet` if `test_data` is empty
/// - `SchemaMismatch` if a test label was never seen in training
/// - `ImageRead` for any unreadable image
pub fn evaluate(pipeline: &FittedPipeline, test_data: &[LabeledImage]) -> Result<Metrics, PipelineError> {
    if test_data.is_empty() {
        return Err(PipelineError::EmptyEvaluationSet);
    }
    let vocabulary = pipeline.vocabulary();
    let truths = test_data
        .iter()
        .map(|r| vocabulary.key_of(&r.label).map_err(|_| PipelineError::SchemaMismatch(r.label.clone())))
        .collect::<Result<Vec<_>, _>>()?;

    let predictions = pipeline.transform(test_data)?;
    let metrics = compute_metrics(
        vocabulary.labels().to_vec(),
        &truths,
        &predictions,
        pipeline.scores_normalized(),
    );
    info!(
        "Evaluated {} records: macro accuracy {:.4}, log-loss {:.4}",
        test_data.len(),
        metrics.macro_accuracy,
        metrics.log_loss
    );
    Ok(metrics)
}

fn probabilities(prediction: &Prediction, normalized: bool) -> Vec<f64> {
    let scores: Vec<f64> = prediction.scores.iter().map(|&s| f64::from(s)).collect();
    if normalized {
        scores
    } else {
        softmax(&scores)
    }
}

fn compute_metrics(
    labels: Vec<String>,
    truths: &[usize],
    predictions: &[Prediction],
    normalized: bool,
) -> Metrics {
    let n_classes = labels.len();
    let mut confusion = ConfusionMatrix::new(labels);
    let mut class_loss = vec![0.0f64; n_classes];
    let mut class_count = vec![0usize; n_classes];

    for (&truth, prediction) in truths.iter().zip(predictions) {
        let predicted = confusion
            .labels
            .iter()
            .position(|l| *l == prediction.predicted_label)
            .unwrap_or(truth);
        confusion.counts[truth][predicted] += 1;

        let probs = probabilities(prediction, normalized);
        let p_true = probs.get(truth).copied().unwrap_or(0.0);
        class_loss[truth] += -p_true.max(LOG_LOSS_EPSILON).ln();
        class_count[truth] += 1;
    }

    let total = truths.len() as f64;
    let correct: usize = (0..n_classes).map(|k| confusion.counts[k][k]).sum();
    let recalls: Vec<f64> = (0..n_classes).filter_map(|k| confusion.recall(k)).collect();
    let macro_accuracy = recalls.iter().sum::<f64>() / recalls.len() as f64;

    let log_loss = class_loss.iter().sum::<f64>() / total;
    let per_class_log_loss = class_loss
        .iter()
        .zip(&class_count)
        .map(|(&loss, &count)| if count > 0 { loss / count as f64 } else { 0.0 })
        .collect();

    // Entropy of the test-set class distribution
    let prior_log_loss: f64 = class_count
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.ln()
        })
        .sum();
    let log_loss_reduction = if prior_log_loss > 0.0 {
        (prior_log_loss - log_loss) / prior_log_loss
    } else {
        0.0
    };

    Metrics {
        macro_accuracy,
        micro_accuracy: correct as f64 / total,
        log_loss,
        per_class_log_loss,
        log_loss_reduction,
        confusion_matrix: confusion,
    }
}

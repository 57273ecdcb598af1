pub mod evaluation;
pub mod evaluator;
pub mod uncertainty;

pub use evaluation::{EvaluationReport, classification_evaluation, dense_evaluation};
pub use evaluator::{PredictionBatch, TestSet, predict};
pub use uncertainty::{UncertaintyEstimator, UncertaintyStrategy, UncertaintySummary};

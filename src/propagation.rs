//! Posterior predictive propagation.
//!
//! Calibrated parameter samples are pushed one by one through a forward
//! solver while the known input stays fixed. The outputs are kept in input
//! order so they can be summarised and plotted afterwards.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::info;

use crate::{
    error::{CemflowError, Result},
    forward::ForwardSolver,
    stats,
};

/// Number of samples evaluated in [`PropagationMode::Cheap`]
pub const CHEAP_SAMPLE_COUNT: usize = 3;

/// How many parameter samples to push through the solver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationMode {
    /// A fixed handful of samples, for smoke tests of expensive solvers
    Cheap,
    /// The first `n` samples
    Full(usize),
}

/// Mean and population standard deviation of the predictive samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub mean: f64,
    pub std_dev: f64,
    pub count: usize,
}

pub struct PosteriorPredictive<S> {
    solver: S,
    known_input: f64,
    parameter: Vec<f64>,
    samples: Option<Vec<f64>>,
}

impl<S: ForwardSolver> PosteriorPredictive<S> {
    /// # Arguments
    /// * `solver` - The solver through which parametric uncertainty is propagated
    /// * `known_input` - Input held fixed for every evaluation
    /// * `parameter` - Posterior samples of the calibrated parameter
    pub fn new(solver: S, known_input: f64, parameter: Vec<f64>) -> Result<PosteriorPredictive<S>> {
        if parameter.is_empty() {
            return Err(CemflowError::Input(
                "Posterior predictive needs at least one parameter sample".to_owned(),
            ));
        }

        Ok(PosteriorPredictive {
            solver,
            known_input,
            parameter,
            samples: None,
        })
    }

    pub fn parameter(&self) -> &[f64] {
        &self.parameter
    }

    pub fn known_input(&self) -> f64 {
        self.known_input
    }

    /// Evaluates the solver on the first `sample_count` parameter samples
    ///
    /// # Returns
    /// The summary of the outputs. The outputs themselves are stored and
    /// can be read with [`PosteriorPredictive::samples`]. If any evaluation
    /// fails nothing is stored.
    pub fn get_stats(&mut self, sample_count: usize) -> Result<Summary> {
        if sample_count == 0 {
            return Err(CemflowError::Input(
                "At least one sample must be evaluated".to_owned(),
            ));
        }
        if sample_count > self.parameter.len() {
            return Err(CemflowError::SampleCount {
                requested: sample_count,
                available: self.parameter.len(),
            });
        }

        self.samples = None;
        info!(
            "propagating {sample_count} of {} parameter samples",
            self.parameter.len()
        );

        let bar = ProgressBar::new(sample_count as u64);
        if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} samples [{elapsed}]") {
            bar.set_style(style);
        }

        let mut outputs = Vec::with_capacity(sample_count);
        for (index, &parameter) in self.parameter[..sample_count].iter().enumerate() {
            let output = self
                .solver
                .solve(parameter, self.known_input)
                .map_err(|source| CemflowError::Propagation {
                    index,
                    source: Box::new(source),
                })?;
            outputs.push(output);
            bar.inc(1);
        }
        bar.finish_and_clear();

        let summary = summarize(&outputs)?;
        info!(
            "posterior predictive mean = {:.4}, sd = {:.4}",
            summary.mean, summary.std_dev
        );

        self.samples = Some(outputs);
        Ok(summary)
    }

    /// Runs [`PosteriorPredictive::get_stats`] with the sample count of `mode`.
    /// Cheap mode uses all samples when fewer than three are available.
    pub fn run(&mut self, mode: PropagationMode) -> Result<Summary> {
        let sample_count = match mode {
            PropagationMode::Cheap => CHEAP_SAMPLE_COUNT.min(self.parameter.len()),
            PropagationMode::Full(n) => n,
        };
        self.get_stats(sample_count)
    }

    /// The predictive samples of the last successful run, in input order
    pub fn samples(&self) -> Option<&[f64]> {
        self.samples.as_deref()
    }

    pub fn into_samples(self) -> Option<Vec<f64>> {
        self.samples
    }
}

fn summarize(outputs: &[f64]) -> Result<Summary> {
    let (Some(mean), Some(std_dev)) = (stats::mean(outputs), stats::population_std_dev(outputs))
    else {
        return Err(CemflowError::Input(
            "Cannot summarise an empty sample set".to_owned(),
        ));
    };

    Ok(Summary {
        mean,
        std_dev,
        count: outputs.len(),
    })
}

/// Result of a full posterior predictive run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub summary: Summary,
    pub samples: Vec<f64>,
}

/// Propagates the parameter samples through `solver`
///
/// # Arguments
/// * `solver` - The forward solver
/// * `parameter` - Posterior samples of the calibrated parameter
/// * `known_input` - Input held fixed for every evaluation
/// * `mode` - How many samples to evaluate
pub fn perform_prediction<S: ForwardSolver>(
    solver: S,
    parameter: Vec<f64>,
    known_input: f64,
    mode: PropagationMode,
) -> Result<Prediction> {
    let mut posterior_predictive = PosteriorPredictive::new(solver, known_input, parameter)?;
    let summary = posterior_predictive.run(mode)?;
    let samples = posterior_predictive.into_samples().unwrap_or_default();

    Ok(Prediction { summary, samples })
}

//! Unconstrained minimization for the maximum-likelihood fitters
//!
//! Wraps argmin's Nelder–Mead solver behind a small [`Objective`] trait so the
//! fitters only describe their penalized negative log-likelihood. Parameters
//! are unconstrained reals; the fitters map positive model parameters through
//! `exp` themselves.

use crate::error::CltvError;
use argmin::core::observers::{Observe, ObserverMode};
use argmin::core::{
    CostFunction, Error as ArgminError, Executor, State, TerminationReason, TerminationStatus, KV,
};
use argmin::solver::neldermead::NelderMead;
use serde::Deserialize;
use std::cell::Cell;
use std::rc::Rc;
use tracing::debug;

/// A scalar function to be minimized over an unconstrained vector.
pub trait Objective {
    fn value(&self, theta: &[f64]) -> f64;
}

/// Iteration budget and tolerances for [`minimize`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OptimizerOptions {
    /// Maximum Nelder–Mead iterations per run
    pub max_iters: u64,
    /// Standard deviation of simplex costs below which a run has converged
    pub sd_tolerance: f64,
    /// Edge length of the initial simplex
    pub initial_step: f64,
    /// Extra runs started from the best point with a fresh simplex
    pub restarts: usize,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            max_iters: 5000,
            sd_tolerance: 1e-10,
            initial_step: 0.5,
            restarts: 2,
        }
    }
}

impl OptimizerOptions {
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_iters == 0 {
            return Err(CltvError::InvalidArgument(
                "optimizer max_iters must be positive".to_string(),
            ));
        }
        if !(self.sd_tolerance.is_finite() && self.sd_tolerance > 0.0) {
            return Err(CltvError::InvalidArgument(format!(
                "optimizer sd_tolerance must be positive, got {}",
                self.sd_tolerance
            )));
        }
        if !(self.initial_step.is_finite() && self.initial_step > 0.0) {
            return Err(CltvError::InvalidArgument(format!(
                "optimizer initial_step must be positive, got {}",
                self.initial_step
            )));
        }
        Ok(())
    }
}

/// Result of a successful minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub theta: Vec<f64>,
    pub objective: f64,
    /// Iterations summed over all runs
    pub iterations: u64,
}

/// Adapter exposing an [`Objective`] as an argmin cost function.
///
/// Non-finite values abort the run instead of entering the simplex ordering.
/// The lowest finite cost seen is kept for error reporting.
struct CostAdapter<'a, O: ?Sized> {
    objective: &'a O,
    best_seen: &'a Cell<f64>,
}

impl<O: Objective + ?Sized> CostFunction for CostAdapter<'_, O> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, ArgminError> {
        let value = self.objective.value(theta);
        if value.is_finite() {
            if value < self.best_seen.get() {
                self.best_seen.set(value);
            }
            Ok(value)
        } else {
            Err(ArgminError::msg(format!(
                "objective is non-finite ({value}) at {theta:?}"
            )))
        }
    }
}

/// Records how many iterations argmin completed, which its error path drops.
struct IterationCounter {
    completed: Rc<Cell<u64>>,
}

impl<I: State> Observe<I> for IterationCounter {
    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), ArgminError> {
        self.completed.set(state.get_iter() + 1);
        Ok(())
    }
}

/// Minimize `objective` starting from `theta0`.
///
/// Fails with [`CltvError::ConvergenceFailure`] when the objective is
/// non-finite anywhere the solver evaluates it, or when a run exhausts
/// `max_iters` without meeting the simplex tolerance.
///
/// # Arguments
/// * `objective` - Function to minimize
/// * `theta0` - Starting point, also the first simplex vertex
/// * `options` - Iteration budget, tolerance, simplex size and restarts
///
/// # Returns
/// * Best point found with its objective and total iteration count
pub fn minimize<O: Objective + ?Sized>(
    objective: &O,
    theta0: &[f64],
    options: &OptimizerOptions,
) -> crate::Result<Minimum> {
    options.validate()?;
    if theta0.is_empty() {
        return Err(CltvError::InvalidArgument(
            "cannot minimize over an empty parameter vector".to_string(),
        ));
    }

    let start_value = objective.value(theta0);
    if !start_value.is_finite() {
        return Err(CltvError::ConvergenceFailure {
            iterations: 0,
            last_objective: start_value,
            reason: "objective is non-finite at the starting point".to_string(),
        });
    }

    let mut best = Minimum {
        theta: theta0.to_vec(),
        objective: start_value,
        iterations: 0,
    };

    for run in 0..=options.restarts {
        let previous = best.objective;
        let (theta, value, iterations) = run_simplex(objective, &best.theta, options, best.iterations)?;
        best.iterations += iterations;
        if value <= best.objective {
            best.theta = theta;
            best.objective = value;
        }
        debug!(
            run,
            objective = best.objective,
            iterations = best.iterations,
            "nelder-mead run finished"
        );
        if run > 0 && (previous - best.objective).abs() <= options.sd_tolerance {
            break;
        }
    }

    Ok(best)
}

/// One Nelder–Mead run from `start`; returns `(theta, objective, iterations)`.
fn run_simplex<O: Objective + ?Sized>(
    objective: &O,
    start: &[f64],
    options: &OptimizerOptions,
    iterations_so_far: u64,
) -> crate::Result<(Vec<f64>, f64, u64)> {
    let simplex = initial_simplex(start, options.initial_step);

    // argmin evaluates the initial simplex without error propagation, so every
    // vertex is checked here first.
    let mut start_value = f64::INFINITY;
    for vertex in &simplex {
        let value = objective.value(vertex);
        if !value.is_finite() {
            return Err(CltvError::ConvergenceFailure {
                iterations: iterations_so_far,
                last_objective: value,
                reason: format!("objective is non-finite at initial simplex vertex {vertex:?}"),
            });
        }
        start_value = start_value.min(value);
    }

    let solver = NelderMead::new(simplex)
        .with_sd_tolerance(options.sd_tolerance)
        .map_err(|e| CltvError::InvalidArgument(e.to_string()))?;

    let best_seen = Cell::new(start_value);
    let completed = Rc::new(Cell::new(0));
    let counter = IterationCounter {
        completed: Rc::clone(&completed),
    };

    let cost = CostAdapter {
        objective,
        best_seen: &best_seen,
    };
    let result = Executor::new(cost, solver)
        .configure(|state| state.max_iters(options.max_iters))
        .add_observer(counter, ObserverMode::Always)
        .run()
        .map_err(|e| CltvError::ConvergenceFailure {
            iterations: iterations_so_far + completed.get(),
            last_objective: best_seen.get(),
            reason: e.to_string(),
        })?;

    let state = result.state();
    let iterations = state.get_iter();
    let cost = state.get_best_cost();
    let theta = state
        .get_best_param()
        .cloned()
        .ok_or_else(|| CltvError::ConvergenceFailure {
            iterations: iterations_so_far + iterations,
            last_objective: cost,
            reason: "solver returned no parameter vector".to_string(),
        })?;

    match state.get_termination_status() {
        TerminationStatus::Terminated(TerminationReason::SolverConverged) => {
            Ok((theta, cost, iterations))
        }
        TerminationStatus::Terminated(TerminationReason::MaxItersReached) => {
            Err(CltvError::ConvergenceFailure {
                iterations: iterations_so_far + iterations,
                last_objective: cost,
                reason: format!("iteration budget of {} exhausted", options.max_iters),
            })
        }
        other => Err(CltvError::ConvergenceFailure {
            iterations: iterations_so_far + iterations,
            last_objective: cost,
            reason: format!("solver stopped early: {other:?}"),
        }),
    }
}

/// Start point plus one vertex displaced by `step` along each axis.
fn initial_simplex(start: &[f64], step: f64) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(start.len() + 1);
    simplex.push(start.to_vec());
    for i in 0..start.len() {
        let mut vertex = start.to_vec();
        vertex[i] += step;
        simplex.push(vertex);
    }
    simplex
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Rosenbrock;

    impl Objective for Rosenbrock {
        fn value(&self, theta: &[f64]) -> f64 {
            let (x, y) = (theta[0], theta[1]);
            (1.0 - x).powi(2) + 100.0 * (y - x * x).powi(2)
        }
    }

    struct ShiftedBowl;

    impl Objective for ShiftedBowl {
        fn value(&self, theta: &[f64]) -> f64 {
            theta
                .iter()
                .enumerate()
                .map(|(i, t)| (t - i as f64).powi(2))
                .sum()
        }
    }

    struct NanEverywhere;

    impl Objective for NanEverywhere {
        fn value(&self, _theta: &[f64]) -> f64 {
            f64::NAN
        }
    }

    /// Finite at the origin only.
    struct CliffOutsideOrigin;

    impl Objective for CliffOutsideOrigin {
        fn value(&self, theta: &[f64]) -> f64 {
            if theta.iter().all(|t| *t == 0.0) {
                1.0
            } else {
                f64::INFINITY
            }
        }
    }

    /// Bowl centred at (5, 5) that turns NaN once any coordinate passes 1.5.
    struct BowlBehindCliff;

    impl Objective for BowlBehindCliff {
        fn value(&self, theta: &[f64]) -> f64 {
            if theta.iter().any(|t| *t > 1.5) {
                f64::NAN
            } else {
                theta.iter().map(|t| (t - 5.0).powi(2)).sum()
            }
        }
    }

    #[test]
    fn test_minimize_rosenbrock() {
        let result = minimize(&Rosenbrock, &[-1.2, 1.0], &OptimizerOptions::default()).unwrap();
        assert_relative_eq!(result.theta[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(result.theta[1], 1.0, epsilon = 1e-3);
        assert!(result.objective < 1e-6);
        assert!(result.iterations > 0);
    }

    #[test]
    fn test_minimize_four_dimensional_bowl() {
        let result = minimize(&ShiftedBowl, &[0.0; 4], &OptimizerOptions::default()).unwrap();
        for (i, t) in result.theta.iter().enumerate() {
            assert_relative_eq!(*t, i as f64, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_minimize_is_deterministic() {
        let options = OptimizerOptions::default();
        let first = minimize(&Rosenbrock, &[-1.2, 1.0], &options).unwrap();
        let second = minimize(&Rosenbrock, &[-1.2, 1.0], &options).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_non_finite_start_fails() {
        let err = minimize(&NanEverywhere, &[0.0, 0.0], &OptimizerOptions::default()).unwrap_err();
        assert!(matches!(err, CltvError::ConvergenceFailure { iterations: 0, .. }));
    }

    #[test]
    fn test_non_finite_simplex_vertex_fails() {
        let err = minimize(&CliffOutsideOrigin, &[0.0, 0.0], &OptimizerOptions::default()).unwrap_err();
        assert!(matches!(err, CltvError::ConvergenceFailure { .. }));
    }

    #[test]
    fn test_mid_run_non_finite_keeps_progress() {
        let err = minimize(&BowlBehindCliff, &[0.0, 0.0], &OptimizerOptions::default()).unwrap_err();
        match err {
            CltvError::ConvergenceFailure {
                iterations,
                last_objective,
                ..
            } => {
                assert!(iterations >= 1);
                assert!(last_objective.is_finite());
                // better than every vertex of the initial simplex
                assert!(last_objective < 45.25, "{last_objective}");
            }
            other => panic!("expected ConvergenceFailure, got {other:?}"),
        }
    }

    #[test]
    fn test_iteration_budget_exhaustion_fails() {
        let options = OptimizerOptions {
            max_iters: 3,
            ..OptimizerOptions::default()
        };
        let err = minimize(&Rosenbrock, &[-1.2, 1.0], &options).unwrap_err();
        match err {
            CltvError::ConvergenceFailure {
                iterations,
                last_objective,
                ..
            } => {
                assert_eq!(iterations, 3);
                assert!(last_objective.is_finite());
            }
            other => panic!("expected ConvergenceFailure, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_options_rejected() {
        let options = OptimizerOptions {
            initial_step: 0.0,
            ..OptimizerOptions::default()
        };
        assert!(matches!(
            minimize(&ShiftedBowl, &[0.0], &options),
            Err(CltvError::InvalidArgument(_))
        ));
        assert!(minimize(&ShiftedBowl, &[], &OptimizerOptions::default()).is_err());
    }

    #[test]
    fn test_initial_simplex_shape() {
        let simplex = initial_simplex(&[1.0, 2.0], 0.5);
        assert_eq!(simplex, vec![vec![1.0, 2.0], vec![1.5, 2.0], vec![1.0, 2.5]]);
    }
}

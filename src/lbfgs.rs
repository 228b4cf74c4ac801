/// Limited-memory BFGS minimisation of smooth, unconstrained objectives, with an
/// orthant-wise variant for objectives that add a weighted L1 norm.
///
/// The inverse Hessian is approximated from the last `history_size` steps with
/// the usual two-loop recursion; step lengths come from a backtracking line
/// search on the Armijo condition.

use std::collections::VecDeque;

use log::{debug, warn};
use ndarray::{Array1, Zip};

const ARMIJO: f64 = 1e-4;
const BACKTRACK: f64 = 0.5;
const MAX_LINE_SEARCH_STEPS: usize = 60;
/// Pairs with less curvature than this would make the update unstable.
const MIN_CURVATURE: f64 = 1e-12;

pub trait Objective
{
    /// Value of the objective at `x`; the gradient at `x` is written into `gradient`.
    fn evaluate(&self, x: &Array1<f64>, gradient: &mut Array1<f64>) -> f64;
}

#[derive(Debug, Clone)]
pub struct Lbfgs
{
    pub history_size: usize,
    pub tolerance: f64,
    pub max_iterations: usize,
}

#[derive(Debug, Clone)]
pub struct Minimum
{
    pub x: Array1<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

struct Correction
{
    s: Array1<f64>,
    y: Array1<f64>,
    rho: f64,
}

impl Default for Lbfgs
{
    fn default() -> Self
    {
        Lbfgs { history_size: 20, tolerance: 1e-7, max_iterations: 1000 }
    }
}

impl Lbfgs
{
    pub fn minimize<O: Objective>(&self, objective: &O, x0: Array1<f64>) -> Minimum
    {
        self.run(objective, x0, None)
    }

    /// Minimises `objective(x) + sum_i l1[i] * |x_i|` with the orthant-wise variant
    /// (OWL-QN). Coordinates with a zero weight are not penalised.
    pub fn minimize_l1<O: Objective>(&self, objective: &O, x0: Array1<f64>, l1: &Array1<f64>) -> Minimum
    {
        self.run(objective, x0, Some(l1))
    }

    fn run<O: Objective>(&self, objective: &O, x0: Array1<f64>, l1: Option<&Array1<f64>>) -> Minimum
    {
        let mut x = x0;
        let mut gradient = Array1::zeros(x.len());
        let mut value = objective.evaluate(&x, &mut gradient) + l1_penalty(&x, l1);
        let mut history: VecDeque<Correction> = VecDeque::with_capacity(self.history_size);

        let mut new_gradient = Array1::zeros(x.len());
        for iteration in 0..self.max_iterations
        {
            let pseudo_gradient = pseudo_gradient(&x, &gradient, l1);
            if norm(&pseudo_gradient) <= self.tolerance * norm(&x).max(1.) {
                return Minimum { x, value, iterations: iteration, converged: true };
            }

            let mut direction = self.direction(&pseudo_gradient, &history);
            if pseudo_gradient.dot(&direction) >= 0. {
                // Not a descent direction; the curvature pairs are stale.
                debug!("Resetting L-BFGS history at iteration {}", iteration);
                history.clear();
                direction = -&pseudo_gradient;
            }

            let orthant = l1.map(|_| {
                // Only move coordinates downhill of the pseudo-gradient, and never across zero.
                direction.zip_mut_with(&pseudo_gradient, |d, &g| if *d * g >= 0. { *d = 0. });
                orthant(&x, &pseudo_gradient)
            });

            let mut step = if history.is_empty() { (1. / norm(&pseudo_gradient)).min(1.) } else { 1. };
            let mut accepted = None;
            for _ in 0..MAX_LINE_SEARCH_STEPS
            {
                let mut candidate = &x + &(&direction * step);
                if let Some(orthant) = &orthant {
                    project(&mut candidate, orthant);
                }
                let candidate_value = objective.evaluate(&candidate, &mut new_gradient) + l1_penalty(&candidate, l1);
                let decrease = pseudo_gradient.dot(&(&candidate - &x));
                if candidate_value.is_finite() && candidate_value <= value + ARMIJO * decrease {
                    accepted = Some((candidate, candidate_value));
                    break;
                }
                step *= BACKTRACK;
            }

            let (candidate, candidate_value) = match accepted
            {
                Some(accepted) => accepted,
                None => {
                    warn!("L-BFGS line search failed at iteration {}; keeping the current point", iteration);
                    return Minimum { x, value, iterations: iteration, converged: false };
                }
            };

            // Curvature comes from the smooth part only.
            let s = &candidate - &x;
            let y = &new_gradient - &gradient;
            let curvature = s.dot(&y);
            if curvature > MIN_CURVATURE && self.history_size > 0 {
                if history.len() == self.history_size {
                    history.pop_front();
                }
                history.push_back(Correction { s, y, rho: 1. / curvature });
            }

            let change = (value - candidate_value).abs() / value.abs().max(candidate_value.abs()).max(1.);
            x = candidate;
            value = candidate_value;
            std::mem::swap(&mut gradient, &mut new_gradient);

            if change < self.tolerance {
                return Minimum { x, value, iterations: iteration + 1, converged: true };
            }
        }

        Minimum { x, value, iterations: self.max_iterations, converged: false }
    }

    /// Two-loop recursion: `-H * gradient` for the current inverse Hessian estimate.
    fn direction(&self, gradient: &Array1<f64>, history: &VecDeque<Correction>) -> Array1<f64>
    {
        let mut q = gradient.clone();
        let mut alphas = Vec::with_capacity(history.len());
        for correction in history.iter().rev()
        {
            let alpha = correction.rho * correction.s.dot(&q);
            q.scaled_add(-alpha, &correction.y);
            alphas.push(alpha);
        }

        let gamma = match history.back()
        {
            Some(last) => last.s.dot(&last.y) / last.y.dot(&last.y),
            None => 1.,
        };
        q *= gamma;

        for (correction, alpha) in history.iter().zip(alphas.iter().rev())
        {
            let beta = correction.rho * correction.y.dot(&q);
            q.scaled_add(alpha - beta, &correction.s);
        }

        -q
    }
}

fn norm(v: &Array1<f64>) -> f64
{
    v.dot(v).sqrt()
}

fn l1_penalty(x: &Array1<f64>, l1: Option<&Array1<f64>>) -> f64
{
    l1.map_or(0., |l1| x.iter().zip(l1).map(|(xi, c)| c * xi.abs()).sum())
}

/// Steepest-descent direction of the L1-penalised objective, negated. At zero it
/// picks the one-sided derivative that points downhill, or zero if neither does.
fn pseudo_gradient(x: &Array1<f64>, gradient: &Array1<f64>, l1: Option<&Array1<f64>>) -> Array1<f64>
{
    let l1 = match l1
    {
        Some(l1) => l1,
        None => return gradient.clone(),
    };

    Zip::from(x).and(gradient).and(l1).map_collect(|&xi, &g, &c| {
        if xi > 0. {
            g + c
        } else if xi < 0. {
            g - c
        } else if g + c < 0. {
            g + c
        } else if g - c > 0. {
            g - c
        } else {
            0.
        }
    })
}

/// Sign of the orthant a step may explore: the sign of each non-zero coordinate,
/// and the downhill side of the pseudo-gradient for the zero ones.
fn orthant(x: &Array1<f64>, pseudo_gradient: &Array1<f64>) -> Array1<f64>
{
    Zip::from(x).and(pseudo_gradient).map_collect(|&xi, &g| if xi != 0. { xi.signum() } else { -g.signum() })
}

/// Zeroes the coordinates that left their orthant.
fn project(candidate: &mut Array1<f64>, orthant: &Array1<f64>)
{
    candidate.zip_mut_with(orthant, |c, &o| if *c * o <= 0. { *c = 0. });
}

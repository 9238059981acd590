use tracing::debug;

/// Armijo sufficient-decrease constant
const ARMIJO_C1: f64 = 1e-4;
const MAX_LINE_SEARCH_STEPS: usize = 60;
/// Minimum curvature s.y for an inverse-Hessian update
const MIN_CURVATURE: f64 = 1e-12;
/// Relative change in value treated as a stall
const VALUE_TOLERANCE: f64 = 1e-15;
/// Values this many ulps apart are indistinguishable to the line search
const VALUE_NOISE_ULPS: f64 = 8.0;

/// Dense BFGS minimiser for smooth, unconstrained objectives.
///
/// The objective returns the function value and writes the gradient into the
/// provided buffer. Problem sizes are small (two coefficients per team plus two
/// globals), so the full inverse-Hessian approximation is kept.
#[derive(Debug, Clone, Copy)]
pub struct Bfgs {
    pub max_iterations: usize,
    /// Convergence threshold on the gradient's infinity norm
    pub tolerance: f64,
}

/// Result of a minimisation, converged or not
#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub gradient_norm: f64,
    pub converged: bool,
}

impl Bfgs {
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
        }
    }

    pub fn minimize<F>(&self, mut objective: F, x0: Vec<f64>) -> Minimum
    where
        F: FnMut(&[f64], &mut [f64]) -> f64,
    {
        let n = x0.len();
        let mut x = x0;
        let mut grad = vec![0.0; n];
        let mut value = objective(&x, &mut grad);
        let mut inv_hessian = identity(n);

        let mut x_next = vec![0.0; n];
        let mut grad_next = vec![0.0; n];
        let mut iterations = 0;

        while iterations < self.max_iterations {
            let gradient_norm = inf_norm(&grad);
            if gradient_norm <= self.tolerance {
                return Minimum {
                    x,
                    value,
                    iterations,
                    gradient_norm,
                    converged: true,
                };
            }
            iterations += 1;

            let mut direction = mat_vec(&inv_hessian, &grad);
            direction.iter_mut().for_each(|d| *d = -*d);
            let mut slope = dot(&grad, &direction);
            if !(slope < 0.0) {
                // Lost positive definiteness; restart from steepest descent.
                inv_hessian = identity(n);
                direction = grad.iter().map(|g| -g).collect();
                slope = dot(&grad, &direction);
            }

            // Near the optimum the decrease falls below the value's rounding noise;
            // a step there is still taken when it shrinks the gradient.
            let noise = VALUE_NOISE_ULPS * f64::EPSILON * value.abs().max(1.0);
            let mut step = 1.0;
            let mut next_value = f64::INFINITY;
            let mut accepted = false;
            for _ in 0..MAX_LINE_SEARCH_STEPS {
                for i in 0..n {
                    x_next[i] = x[i] + step * direction[i];
                }
                next_value = objective(&x_next, &mut grad_next);
                if next_value.is_finite()
                    && (next_value <= value + ARMIJO_C1 * step * slope
                        || (next_value <= value + noise && inf_norm(&grad_next) < gradient_norm))
                {
                    accepted = true;
                    break;
                }
                step *= 0.5;
            }

            if !accepted {
                debug!(iterations, value, "line search failed");
                break;
            }

            let s: Vec<f64> = x_next.iter().zip(&x).map(|(a, b)| a - b).collect();
            let y: Vec<f64> = grad_next.iter().zip(&grad).map(|(a, b)| a - b).collect();
            let sy = dot(&s, &y);
            if sy > MIN_CURVATURE {
                if iterations == 1 {
                    // Rescale the initial guess to the observed curvature.
                    let scale = sy / dot(&y, &y);
                    inv_hessian = identity(n);
                    inv_hessian.iter_mut().for_each(|row| row.iter_mut().for_each(|v| *v *= scale));
                }
                update_inverse_hessian(&mut inv_hessian, &s, &y, sy);
            }

            // A flat value only ends the run once the gradient stops shrinking too.
            let stalled = (value - next_value).abs()
                <= VALUE_TOLERANCE * value.abs().max(next_value.abs()).max(1.0)
                && inf_norm(&grad_next) >= gradient_norm;

            std::mem::swap(&mut x, &mut x_next);
            std::mem::swap(&mut grad, &mut grad_next);
            value = next_value;

            if iterations % 25 == 0 {
                debug!(iterations, value, gradient_norm = inf_norm(&grad), "bfgs progress");
            }

            if stalled {
                let gradient_norm = inf_norm(&grad);
                debug!(iterations, value, gradient_norm, "bfgs stalled");
                return Minimum {
                    x,
                    value,
                    iterations,
                    gradient_norm,
                    converged: gradient_norm <= self.tolerance,
                };
            }
        }

        let gradient_norm = inf_norm(&grad);
        Minimum {
            x,
            value,
            iterations,
            gradient_norm,
            converged: gradient_norm <= self.tolerance,
        }
    }
}

/// H <- H + (sy + y'Hy) ss' / sy^2 - (Hy s' + s y'H) / sy
fn update_inverse_hessian(h: &mut [Vec<f64>], s: &[f64], y: &[f64], sy: f64) {
    let hy = mat_vec(h, y);
    let yhy = dot(y, &hy);
    let a = (sy + yhy) / (sy * sy);
    for i in 0..s.len() {
        for j in 0..s.len() {
            h[i][j] += a * s[i] * s[j] - (hy[i] * s[j] + s[i] * hy[j]) / sy;
        }
    }
}

fn identity(n: usize) -> Vec<Vec<f64>> {
    (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect()
}

fn mat_vec(m: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    m.iter().map(|row| dot(row, v)).collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn inf_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

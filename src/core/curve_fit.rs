//! Bounded nonlinear least-squares fit of a scaled Gaussian
//!
//! Levenberg-Marquardt with steps projected back into the parameter box.
//! Parameters are `[mag, mu, sigma]` for `mag * N(x; mu, sigma)`.

use super::signal::{gauss, gaussian_pdf};

const MAX_ITERATIONS: usize = 300;
const INITIAL_DAMPING: f64 = 1e-3;
const MAX_DAMPING: f64 = 1e12;
const COST_TOLERANCE: f64 = 1e-10;
const STEP_TOLERANCE: f64 = 1e-10;

/// Box constraints on `[mag, mu, sigma]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower: [f64; 3],
    pub upper: [f64; 3],
}

impl Bounds {
    fn contains(&self, p: &[f64; 3]) -> bool {
        (0..3).all(|k| p[k] >= self.lower[k] && p[k] <= self.upper[k])
    }

    fn clamp(&self, p: [f64; 3]) -> [f64; 3] {
        let mut out = p;
        for k in 0..3 {
            out[k] = p[k].clamp(self.lower[k], self.upper[k]);
        }
        out
    }
}

fn cost(x: &[f64], y: &[f64], p: &[f64; 3]) -> f64 {
    x.iter()
        .zip(y)
        .map(|(xi, yi)| (yi - gauss(*xi, p[0], p[1], p[2])).powi(2))
        .sum::<f64>()
        * 0.5
}

/// Solve a 3x3 system by Gaussian elimination with partial pivoting
fn solve3(mut a: [[f64; 3]; 3], mut b: [f64; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3).max_by(|i, j| a[*i][col].abs().total_cmp(&a[*j][col].abs()))?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..3 {
            let f = a[row][col] / a[col][col];
            for k in col..3 {
                a[row][k] -= f * a[col][k];
            }
            b[row] -= f * b[col];
        }
    }
    let mut out = [0.0; 3];
    for row in (0..3).rev() {
        let tail: f64 = (row + 1..3).map(|k| a[row][k] * out[k]).sum();
        out[row] = (b[row] - tail) / a[row][row];
    }
    out.iter().all(|v| v.is_finite()).then_some(out)
}

/// Fit `mag * N(x; mu, sigma)` to `(x, y)` starting from `p0`.
///
/// Returns `None` when there are fewer points than parameters, the start
/// point lies outside `bounds`, or the iteration produces non-finite values.
pub fn fit_gaussian(x: &[f64], y: &[f64], p0: [f64; 3], bounds: Bounds) -> Option<[f64; 3]> {
    if x.len() < 3 || x.len() != y.len() || !bounds.contains(&p0) || p0[2] <= 0.0 {
        return None;
    }

    let mut p = p0;
    let mut current = cost(x, y, &p);
    let mut damping = INITIAL_DAMPING;

    for _ in 0..MAX_ITERATIONS {
        let mut jtj = [[0.0; 3]; 3];
        let mut jtr = [0.0; 3];
        for (xi, yi) in x.iter().zip(y) {
            let pdf = gaussian_pdf(*xi, p[1], p[2]);
            let f = p[0] * pdf;
            let d = xi - p[1];
            let s2 = p[2] * p[2];
            let jac = [pdf, f * d / s2, f * (d * d / (s2 * p[2]) - 1.0 / p[2])];
            let r = yi - f;
            for a in 0..3 {
                jtr[a] += jac[a] * r;
                for b in 0..3 {
                    jtj[a][b] += jac[a] * jac[b];
                }
            }
        }

        let mut improved = false;
        while damping < MAX_DAMPING {
            let mut lhs = jtj;
            for k in 0..3 {
                lhs[k][k] += damping * jtj[k][k].max(1e-12);
            }
            let Some(step) = solve3(lhs, jtr) else {
                damping *= 10.0;
                continue;
            };
            let candidate = bounds.clamp([p[0] + step[0], p[1] + step[1], p[2] + step[2]]);
            if candidate[2] <= 0.0 {
                damping *= 10.0;
                continue;
            }
            let next = cost(x, y, &candidate);
            if next.is_finite() && next <= current {
                let step_size: f64 = (0..3).map(|k| (candidate[k] - p[k]).abs()).sum();
                let reduction = current - next;
                p = candidate;
                damping = (damping / 10.0).max(1e-12);
                improved = true;
                if reduction <= COST_TOLERANCE * current.max(1e-300) || step_size < STEP_TOLERANCE {
                    return p.iter().all(|v| v.is_finite()).then_some(p);
                }
                current = next;
                break;
            }
            damping *= 10.0;
        }

        if !improved {
            // no descent direction left inside the box
            return p.iter().all(|v| v.is_finite()).then_some(p);
        }
    }

    log::debug!("Gaussian fit hit the iteration limit");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_recovers_exact_gaussian() {
        let x: Vec<f64> = (0..60).map(|i| 10.0 + i as f64 * 0.1).collect();
        let y: Vec<f64> = x.iter().map(|v| gauss(*v, 25.0, 13.1, 0.45)).collect();
        let bounds = Bounds {
            lower: [1e-31, 10.0, 1e-31],
            upper: [100.0, 16.0, 3.0],
        };
        let p = fit_gaussian(&x, &y, [20.0, 13.0, 0.6], bounds).unwrap();
        assert_relative_eq!(p[0], 25.0, epsilon = 1e-3);
        assert_relative_eq!(p[1], 13.1, epsilon = 1e-4);
        assert_relative_eq!(p[2], 0.45, epsilon = 1e-4);
    }

    #[test]
    fn test_infeasible_start_fails() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [0.0, 1.0, 1.0, 0.0];
        let bounds = Bounds {
            lower: [1e-31, 0.0, 1e-31],
            upper: [10.0, 3.0, 3.0],
        };
        assert!(fit_gaussian(&x, &y, [1.0, 1.5, 4.0], bounds).is_none());
        assert!(fit_gaussian(&x[..2], &y[..2], [1.0, 1.5, 1.0], bounds).is_none());
    }

    #[test]
    fn test_respects_bounds() {
        let x: Vec<f64> = (0..40).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = x.iter().map(|v| gauss(*v, 5.0, 1.0, 0.3)).collect();
        let bounds = Bounds {
            lower: [1e-31, 1.5, 1e-31],
            upper: [50.0, 4.0, 3.0],
        };
        let p = fit_gaussian(&x, &y, [5.0, 2.0, 0.5], bounds).unwrap();
        assert!(p[1] >= 1.5);
    }
}

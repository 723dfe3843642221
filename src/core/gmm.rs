//! Two-component 1-D Gaussian mixture fitted by expectation-maximisation

use super::signal::gaussian_pdf;

const REG_VARIANCE: f64 = 1e-6;
const MAX_ITERATIONS: usize = 100;
const TOLERANCE: f64 = 1e-3;
const MIN_SAMPLES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianMixture {
    pub weights: [f64; 2],
    pub means: [f64; 2],
    pub stds: [f64; 2],
}

impl GaussianMixture {
    /// Weighted density of component `k`
    pub fn component_pdf(&self, k: usize, x: f64) -> f64 {
        self.weights[k] * gaussian_pdf(x, self.means[k], self.stds[k])
    }

    /// Mixture density
    pub fn pdf(&self, x: f64) -> f64 {
        self.component_pdf(0, x) + self.component_pdf(1, x)
    }

    /// Index of the component with the smaller mean
    pub fn upper_component(&self) -> usize {
        if self.means[0] <= self.means[1] {
            0
        } else {
            1
        }
    }

    fn log_component(&self, k: usize, x: f64) -> f64 {
        let var = self.stds[k] * self.stds[k];
        let d = x - self.means[k];
        self.weights[k].ln() - 0.5 * (2.0 * std::f64::consts::PI * var).ln() - d * d / (2.0 * var)
    }

    /// Fit by EM starting from `init`. Returns `None` when the data are too
    /// few, the iteration diverges, or it does not converge.
    pub fn fit(samples: &[f64], init: GaussianMixture) -> Option<GaussianMixture> {
        let n = samples.len();
        if n < MIN_SAMPLES {
            return None;
        }

        let mut model = init;
        let mut responsibilities = vec![[0.0f64; 2]; n];
        let mut previous = f64::NEG_INFINITY;

        for iteration in 0..MAX_ITERATIONS {
            // E-step
            let mut log_likelihood = 0.0;
            for (x, r) in samples.iter().zip(responsibilities.iter_mut()) {
                let l0 = model.log_component(0, *x);
                let l1 = model.log_component(1, *x);
                let top = l0.max(l1);
                let norm = top + ((l0 - top).exp() + (l1 - top).exp()).ln();
                r[0] = (l0 - norm).exp();
                r[1] = (l1 - norm).exp();
                log_likelihood += norm;
            }
            log_likelihood /= n as f64;
            if !log_likelihood.is_finite() {
                return None;
            }

            // M-step
            let mut next = model;
            for k in 0..2 {
                let nk: f64 = responsibilities.iter().map(|r| r[k]).sum::<f64>() + 10.0 * f64::EPSILON;
                let mean = samples
                    .iter()
                    .zip(&responsibilities)
                    .map(|(x, r)| r[k] * x)
                    .sum::<f64>()
                    / nk;
                let var = samples
                    .iter()
                    .zip(&responsibilities)
                    .map(|(x, r)| r[k] * (x - mean).powi(2))
                    .sum::<f64>()
                    / nk
                    + REG_VARIANCE;
                next.weights[k] = nk / n as f64;
                next.means[k] = mean;
                next.stds[k] = var.sqrt();
            }
            model = next;

            if (log_likelihood - previous).abs() < TOLERANCE {
                log::trace!("GMM converged after {} iterations", iteration + 1);
                let finite = model
                    .weights
                    .iter()
                    .chain(&model.means)
                    .chain(&model.stds)
                    .all(|v| v.is_finite());
                return finite.then_some(model);
            }
            previous = log_likelihood;
        }

        log::trace!("GMM did not converge in {} iterations", MAX_ITERATIONS);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_recovers_separated_clusters() {
        let mut samples = Vec::new();
        for i in 0..60 {
            samples.push(-1.0 + 0.01 * (i as f64 - 30.0));
        }
        for i in 0..40 {
            samples.push(2.0 + 0.01 * (i as f64 - 20.0));
        }
        let init = GaussianMixture {
            weights: [0.5, 0.5],
            means: [0.0, 1.0],
            stds: [1.0, 1.0],
        };
        let fit = GaussianMixture::fit(&samples, init).unwrap();
        let upper = fit.upper_component();
        let lower = 1 - upper;
        assert_relative_eq!(fit.means[upper], -1.0, epsilon = 0.02);
        assert_relative_eq!(fit.means[lower], 2.0, epsilon = 0.02);
        assert_relative_eq!(fit.weights[upper], 0.6, epsilon = 0.01);
    }

    #[test]
    fn test_too_few_samples() {
        let init = GaussianMixture {
            weights: [0.9, 0.1],
            means: [0.0, 0.5],
            stds: [0.1, 0.1],
        };
        assert!(GaussianMixture::fit(&[0.0, 0.1, 0.2], init).is_none());
    }

    #[test]
    fn test_pdf_integrates_to_one() {
        let gm = GaussianMixture {
            weights: [0.7, 0.3],
            means: [0.0, 3.0],
            stds: [0.5, 1.0],
        };
        let dx = 0.001;
        let total: f64 = (-10_000..20_000).map(|i| gm.pdf(i as f64 * dx) * dx).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-4);
    }
}

//! Bounded Nelder-Mead minimizer
//!
//! Used to profile the REML criterion over relative random-effect standard
//! deviations, which are bounded below by zero. Bounds are enforced by
//! projecting every trial point onto the feasible box.

/// Minimizer settings
#[derive(Debug, Clone, Copy)]
pub struct NelderMeadOptions {
    pub initial_step: f64,
    pub lower_bound: f64,
    pub f_tolerance: f64,
    pub x_tolerance: f64,
    pub max_iterations: usize,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            initial_step: 0.5,
            lower_bound: 0.0,
            f_tolerance: 1e-10,
            x_tolerance: 1e-8,
            max_iterations: 2000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
}

/// Minimize `f` from `start`; `Err` carries a reason when the iteration budget runs out
pub fn nelder_mead<F>(f: F, start: &[f64], opts: &NelderMeadOptions) -> Result<Minimum, String>
where
    F: Fn(&[f64]) -> f64,
{
    let dim = start.len();
    if dim == 0 {
        return Ok(Minimum { x: Vec::new(), value: f(&[]), iterations: 0 });
    }

    let project = |x: Vec<f64>| -> Vec<f64> {
        x.into_iter().map(|v| v.max(opts.lower_bound)).collect()
    };
    let eval = |x: &[f64]| -> f64 {
        let v = f(x);
        if v.is_nan() { f64::INFINITY } else { v }
    };

    let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(dim + 1);
    let x0 = project(start.to_vec());
    simplex.push((x0.clone(), eval(&x0)));
    for i in 0..dim {
        let mut xi = x0.clone();
        xi[i] += opts.initial_step;
        let xi = project(xi);
        let fi = eval(&xi);
        simplex.push((xi, fi));
    }

    for iteration in 0..opts.max_iterations {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));

        let f_best = simplex[0].1;
        let f_worst = simplex[dim].1;
        let spread = (f_worst - f_best).abs();
        let size = simplex[1..]
            .iter()
            .flat_map(|(x, _)| x.iter().zip(&simplex[0].0).map(|(a, b)| (a - b).abs()))
            .fold(0.0_f64, f64::max);

        if f_best.is_finite()
            && (spread <= opts.f_tolerance * (1.0 + f_best.abs()) || size <= opts.x_tolerance)
        {
            return Ok(Minimum {
                x: simplex[0].0.clone(),
                value: f_best,
                iterations: iteration,
            });
        }

        // Centroid of every vertex except the worst
        let mut centroid = vec![0.0; dim];
        for (x, _) in &simplex[..dim] {
            for (c, v) in centroid.iter_mut().zip(x) {
                *c += v / dim as f64;
            }
        }
        let along = |from: &[f64], coef: f64| -> Vec<f64> {
            project(
                centroid
                    .iter()
                    .zip(from)
                    .map(|(c, x)| c + coef * (x - c))
                    .collect(),
            )
        };

        let worst = simplex[dim].0.clone();
        let reflected = along(&worst, -1.0);
        let f_reflected = eval(&reflected);

        if f_reflected < f_best {
            let expanded = along(&worst, -2.0);
            let f_expanded = eval(&expanded);
            simplex[dim] = if f_expanded < f_reflected {
                (expanded, f_expanded)
            } else {
                (reflected, f_reflected)
            };
        } else if f_reflected < simplex[dim - 1].1 {
            simplex[dim] = (reflected, f_reflected);
        } else {
            let contracted = if f_reflected < f_worst {
                along(&reflected, 0.5)
            } else {
                along(&worst, 0.5)
            };
            let f_contracted = eval(&contracted);
            if f_contracted < f_reflected.min(f_worst) {
                simplex[dim] = (contracted, f_contracted);
            } else {
                let best = simplex[0].0.clone();
                for vertex in simplex.iter_mut().skip(1) {
                    let shrunk: Vec<f64> = best
                        .iter()
                        .zip(&vertex.0)
                        .map(|(b, x)| b + 0.5 * (x - b))
                        .collect();
                    let shrunk = project(shrunk);
                    let value = eval(&shrunk);
                    *vertex = (shrunk, value);
                }
            }
        }
    }

    Err(format!(
        "Nelder-Mead did not converge within {} iterations",
        opts.max_iterations
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_quadratic_interior_minimum() {
        let f = |x: &[f64]| (x[0] - 1.5).powi(2) + 2.0 * (x[1] - 0.7).powi(2);
        let min = nelder_mead(f, &[1.0, 1.0], &NelderMeadOptions::default()).unwrap();
        assert_relative_eq!(min.x[0], 1.5, epsilon = 1e-4);
        assert_relative_eq!(min.x[1], 0.7, epsilon = 1e-4);
    }

    #[test]
    fn test_minimum_on_boundary() {
        // Unconstrained minimum at x = -2 is infeasible
        let f = |x: &[f64]| (x[0] + 2.0).powi(2) + (x[1] - 1.0).powi(2);
        let min = nelder_mead(f, &[1.0, 1.0], &NelderMeadOptions::default()).unwrap();
        assert!(min.x[0] >= 0.0);
        assert!(min.x[0] < 1e-3);
        assert_relative_eq!(min.x[1], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_iteration_budget_reported() {
        let f = |x: &[f64]| (x[0] - 3.0).powi(2);
        let opts = NelderMeadOptions { max_iterations: 1, ..Default::default() };
        assert!(nelder_mead(f, &[0.0], &opts).is_err());
    }
}

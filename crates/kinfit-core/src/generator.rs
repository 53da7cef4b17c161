use crate::config::VarSpec;
use crate::domain::random_provider;
use crate::params::{ParamSchema, ParamVector};
use kinfit_error::{FitResult, fit_bail};

/// Folds the declarative variable specs, in order, into the initial
/// population of parameter vectors.
///
/// `list`, `linear` and `log` take the Cartesian product with the working
/// set; `static_list` zips against it; the random families either append an
/// independent sample to every existing row (two or more rows) or expand a
/// single seed row to `target` samples. The result is truncated to `target`
/// rows when oversized and rejected when undersized.
pub fn generate_population(
    specs: &[VarSpec],
    target: usize,
) -> FitResult<(ParamSchema, Vec<ParamVector>)> {
    let mut names = Vec::with_capacity(specs.len());
    // The working set starts as one empty row that every spec extends.
    let mut rows: Vec<Vec<f64>> = vec![Vec::new()];

    for spec in specs {
        if names.iter().any(|n| n == spec.name()) {
            fit_bail!(ParamSpec: "duplicate variable {:?}", spec.name());
        }
        names.push(spec.name().to_string());

        match spec {
            VarSpec::Fixed { value, .. } => {
                for row in rows.iter_mut() {
                    row.push(*value);
                }
            }
            VarSpec::List { values, .. } => {
                rows = cartesian(rows, values);
            }
            VarSpec::StaticList { name, values } => {
                if rows.len() == 1 && values.len() > 1 {
                    // A leading static_list expands the seed row itself.
                    let seed = rows.remove(0);
                    rows = values
                        .iter()
                        .map(|v| {
                            let mut row = seed.clone();
                            row.push(*v);
                            row
                        })
                        .collect();
                } else {
                    if values.len() != rows.len() {
                        fit_bail!(
                            ParamSpec: "{}: static_list arity {} does not match working set size {}",
                            name,
                            values.len(),
                            rows.len()
                        );
                    }
                    for (row, value) in rows.iter_mut().zip(values.iter()) {
                        row.push(*value);
                    }
                }
            }
            VarSpec::Linear {
                first, last, steps, ..
            } => {
                rows = cartesian(rows, &linear_values(*first, *last, *steps));
            }
            VarSpec::Log {
                first, last, steps, ..
            } => {
                rows = cartesian(rows, &log_values(*first, *last, *steps));
            }
            VarSpec::Random { first, last, .. } => {
                sample_into(&mut rows, target, || random_provider::range(*first..*last));
            }
            VarSpec::LogUniform { min, max, .. } => {
                let (lo, hi) = (min.log10(), max.log10());
                sample_into(&mut rows, target, || {
                    let u: f64 = random_provider::random();
                    10f64.powf(lo + u * (hi - lo))
                });
            }
            VarSpec::LogNormRandom { mean, stddev, .. } => {
                let ln_mean = mean.ln();
                sample_into(&mut rows, target, || {
                    random_provider::gaussian(ln_mean, *stddev).exp()
                });
            }
        }
    }

    if rows.len() < target {
        fit_bail!(
            ParamSpec: "variable specs produce {} permutations, {} required",
            rows.len(),
            target
        );
    }
    rows.truncate(target);

    Ok((
        ParamSchema::new(names),
        rows.into_iter().map(ParamVector::from).collect(),
    ))
}

/// `steps` equally spaced values in [first, last]. The last value is pinned
/// to `last` exactly rather than trusting accumulated arithmetic.
fn linear_values(first: f64, last: f64, steps: usize) -> Vec<f64> {
    let width = (last - first) / (steps - 1) as f64;
    let mut values = (0..steps)
        .map(|i| first + width * i as f64)
        .collect::<Vec<_>>();
    values[steps - 1] = last;
    values
}

/// Geometrically spaced values from first to last, last exact.
fn log_values(first: f64, last: f64, steps: usize) -> Vec<f64> {
    let (lo, hi) = (first.log10(), last.log10());
    let width = (hi - lo) / (steps - 1) as f64;
    let mut values = (0..steps)
        .map(|i| 10f64.powf(lo + width * i as f64))
        .collect::<Vec<_>>();
    values[steps - 1] = last;
    values
}

fn cartesian(rows: Vec<Vec<f64>>, values: &[f64]) -> Vec<Vec<f64>> {
    let mut out = Vec::with_capacity(rows.len() * values.len());
    for row in rows {
        for value in values {
            let mut next = row.clone();
            next.push(*value);
            out.push(next);
        }
    }
    out
}

/// Random families: with two or more rows present, append one independent
/// sample per row; a lone seed row is expanded to `target` sampled rows.
fn sample_into(rows: &mut Vec<Vec<f64>>, target: usize, mut sample: impl FnMut() -> f64) {
    if rows.len() >= 2 {
        for row in rows.iter_mut() {
            row.push(sample());
        }
    } else {
        let seed = rows.pop().unwrap_or_default();
        *rows = (0..target)
            .map(|_| {
                let mut row = seed.clone();
                row.push(sample());
                row
            })
            .collect();
    }
}

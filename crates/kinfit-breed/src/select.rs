use kinfit_core::SummaryRow;
use kinfit_core::random_provider;
use kinfit_error::{FitResult, ensure};

/// The survivors eligible for weighted selection: the ranked summary rows
/// left after culling anything over the objective ceiling and capping at
/// `max_parents`.
#[derive(Debug, Clone)]
pub struct ParentPool {
    rows: Vec<SummaryRow>,
}

impl ParentPool {
    /// Cull a ranked summary. Fewer than 3 survivors terminates the fit with
    /// a diagnostic rather than breeding from a degenerate pool.
    pub fn cull(
        ranked: &[SummaryRow],
        max_objfunc_value: Option<f64>,
        max_parents: usize,
    ) -> FitResult<ParentPool> {
        let mut rows = ranked
            .iter()
            .filter(|row| max_objfunc_value.is_none_or(|ceiling| row.score <= ceiling))
            .cloned()
            .collect::<Vec<_>>();
        rows.truncate(max_parents);

        ensure!(
            rows.len() >= 3,
            Engine: "only {} permutations survive culling (max_objfunc_value {:?}); cannot breed",
            rows.len(),
            max_objfunc_value
        );

        Ok(ParentPool { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> &SummaryRow {
        &self.rows[index]
    }

    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }
}

/// Prefix-sum roulette over the survivor pool. Each survivor weighs
/// `max_score − score`, so the best chi carries the most weight and the worst
/// survivor weighs 0 and is never drawn.
#[derive(Debug, Clone)]
pub struct SelectionWheel {
    weights: Vec<f64>,
    total: f64,
}

impl SelectionWheel {
    pub fn new(pool: &ParentPool) -> SelectionWheel {
        let max_score = pool
            .rows()
            .iter()
            .map(|row| row.score)
            .fold(f64::MIN, f64::max);
        let weights = pool
            .rows()
            .iter()
            .map(|row| max_score - row.score)
            .collect::<Vec<_>>();
        let total = weights.iter().sum();

        SelectionWheel { weights, total }
    }

    /// Draw one parent index: `u` is uniform on `[0, Σw · (1 − extra_weight/10))`
    /// and the pick is the first prefix sum reaching `u`. Overflow falls back
    /// to the last survivor.
    pub fn pick(&self, extra_weight: f64) -> usize {
        if self.total <= 0.0 {
            return 0;
        }

        let span = self.total * (1.0 - extra_weight / 10.0);
        let u = random_provider::random::<f64>() * span;

        let mut acc = 0.0;
        for (index, weight) in self.weights.iter().enumerate() {
            acc += weight;
            if acc >= u {
                return index;
            }
        }
        self.weights.len() - 1
    }

    /// Draw two parents. With `force_different` set, resample the second up
    /// to 100 times; if the pair still collides, fall back to indices 0 and 1.
    pub fn pick_pair(&self, extra_weight: f64, force_different: bool) -> (usize, usize) {
        let first = self.pick(extra_weight);
        let mut second = self.pick(extra_weight);

        if force_different && first == second {
            for _ in 0..100 {
                second = self.pick(extra_weight);
                if second != first {
                    return (first, second);
                }
            }
            return (0, 1);
        }

        (first, second)
    }
}

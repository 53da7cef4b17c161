use crate::crossover::PositionalCrossover;
use crate::mutate::MutationSet;
use crate::select::{ParentPool, SelectionWheel};
use kinfit_core::{FitConfig, ParamSchema, ParamVector, Summary};
use kinfit_error::FitResult;

/// Why breeding decided the fit is over instead of producing a next
/// generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The ranked top-P no longer changes between generations.
    Stalled,
    /// The best chi value reached `min_objfunc_value`.
    ThresholdMet,
}

/// Result of one breeding step. When `termination` is set, `vectors` is
/// empty and the controller finalizes instead of continuing.
#[derive(Debug, Clone)]
pub struct BreedOutcome {
    pub vectors: Vec<ParamVector>,
    /// The merged top-P, persisted as the next generation's parent summary.
    pub parent_summary: Summary,
    pub termination: Option<Termination>,
}

/// The genetic operator: merges and ranks summaries, checks the termination
/// conditions, then breeds the next generation under weighted selection,
/// positional crossover, mutation and parent preservation.
pub struct Breeder {
    schema: ParamSchema,
    population_size: usize,
    crossover: PositionalCrossover,
    mutation: MutationSet,
    keep_parents: usize,
    max_parents: usize,
    max_objfunc_value: Option<f64>,
    min_objfunc_value: Option<f64>,
    stop_when_stalled: bool,
    force_different_parents: bool,
    extra_weight: f64,
}

impl Breeder {
    pub fn from_config(config: &FitConfig, schema: ParamSchema) -> Self {
        Breeder {
            schema,
            population_size: config.population_size,
            crossover: PositionalCrossover::new(config.swap_rate),
            mutation: MutationSet::new(config.mutation.clone()),
            keep_parents: config.keep_parents,
            max_parents: config.max_parents,
            max_objfunc_value: config.max_objfunc_value,
            min_objfunc_value: config.min_objfunc_value,
            stop_when_stalled: config.stop_when_stalled,
            force_different_parents: config.force_different_parents,
            extra_weight: config.extra_weight,
        }
    }

    /// Produce generation g+1 from generation g's ranked summary and the
    /// parent summary carried out of generation g−1.
    pub fn next_generation(
        &self,
        current: &Summary,
        previous_parents: Option<&Summary>,
    ) -> FitResult<BreedOutcome> {
        let p = self.population_size;
        let parent_summary = current.merge_parents(previous_parents, p);

        if self.stop_when_stalled
            && let Some(previous) = previous_parents
            && stalled(&parent_summary, previous)
        {
            return Ok(BreedOutcome {
                vectors: Vec::new(),
                parent_summary,
                termination: Some(Termination::Stalled),
            });
        }

        if let Some(threshold) = self.min_objfunc_value
            && parent_summary
                .best()
                .is_some_and(|best| best.score <= threshold)
        {
            return Ok(BreedOutcome {
                vectors: Vec::new(),
                parent_summary,
                termination: Some(Termination::ThresholdMet),
            });
        }

        // Snapshot the top-K before breeding; they re-enter unchanged.
        let keep = self.keep_parents.min(parent_summary.len());
        let preserved = parent_summary.rows[..keep]
            .iter()
            .map(|row| row.values.clone())
            .collect::<Vec<_>>();

        let pool = ParentPool::cull(
            &parent_summary.rows,
            self.max_objfunc_value,
            self.max_parents,
        )?;
        let wheel = SelectionWheel::new(&pool);

        let mut children = Vec::with_capacity(p + 1);
        while children.len() < p {
            let (first, second) =
                wheel.pick_pair(self.extra_weight, self.force_different_parents);
            let (mut c1, mut c2) = self
                .crossover
                .breed(&pool.row(first).values, &pool.row(second).values);

            self.mutation.mutate(&self.schema, &mut c1);
            self.mutation.mutate(&self.schema, &mut c2);

            children.push(c1);
            children.push(c2);
        }
        // An odd population trims the surplus child of the last pair.
        children.truncate(p);

        // Preserved parents go first; the same number of children fall off
        // the end to hold the population size at P.
        let mut vectors = preserved;
        children.truncate(p - vectors.len());
        vectors.extend(children);

        Ok(BreedOutcome {
            vectors: vectors.into_iter().map(ParamVector::new).collect(),
            parent_summary,
            termination: None,
        })
    }
}

/// Elementwise comparison of the ranked parameter vectors.
fn stalled(current: &Summary, previous: &Summary) -> bool {
    current.len() == previous.len()
        && current
            .rows
            .iter()
            .zip(previous.rows.iter())
            .all(|(a, b)| a.values == b.values)
}

use kinfit_core::random_provider;
use kinfit_core::{MutationSpec, ParamSchema};
use std::collections::BTreeMap;

/// Name-keyed mutation settings. A position's spec is looked up by its
/// parameter name, falling back to the `default` entry; with neither present
/// the position never mutates.
#[derive(Debug, Clone, Default)]
pub struct MutationSet {
    specs: BTreeMap<String, MutationSpec>,
}

impl MutationSet {
    pub fn new(specs: BTreeMap<String, MutationSpec>) -> Self {
        MutationSet { specs }
    }

    fn spec_for(&self, name: &str) -> Option<&MutationSpec> {
        self.specs.get(name).or_else(|| self.specs.get("default"))
    }

    /// Mutate a child vector in place. A mutating position `v` moves by a
    /// uniform draw on [−v·pct, +v·pct], a multiplicative perturbation of up
    /// to ±pct.
    pub fn mutate(&self, schema: &ParamSchema, child: &mut [f64]) {
        for (name, value) in schema.names().iter().zip(child.iter_mut()) {
            let Some(spec) = self.spec_for(name) else {
                continue;
            };
            if !random_provider::bool(spec.prob) {
                continue;
            }

            let width = (*value * spec.pct).abs();
            if width > 0.0 {
                *value += random_provider::range(-width..width);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinfit_core::random_provider::scoped_seed;

    fn schema() -> ParamSchema {
        ParamSchema::new(vec!["kon".into(), "koff".into()])
    }

    fn set(entries: &[(&str, f64, f64)]) -> MutationSet {
        MutationSet::new(
            entries
                .iter()
                .map(|(name, prob, pct)| {
                    (
                        name.to_string(),
                        MutationSpec {
                            prob: *prob,
                            pct: *pct,
                        },
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn zero_probability_never_mutates() {
        let set = set(&[("default", 0.0, 0.5)]);
        let mut child = vec![1.0, 2.0];

        scoped_seed(1, || set.mutate(&schema(), &mut child));
        assert_eq!(child, vec![1.0, 2.0]);
    }

    #[test]
    fn mutation_stays_within_pct_band() {
        let set = set(&[("default", 1.0, 0.1)]);

        scoped_seed(2, || {
            for _ in 0..200 {
                let mut child = vec![10.0, -10.0];
                set.mutate(&schema(), &mut child);
                assert!((9.0..11.0).contains(&child[0]));
                assert!((-11.0..-9.0).contains(&child[1]));
            }
        });
    }

    #[test]
    fn named_spec_overrides_default() {
        let set = set(&[("default", 1.0, 0.5), ("kon", 0.0, 0.5)]);

        scoped_seed(3, || {
            let mut child = vec![5.0, 5.0];
            set.mutate(&schema(), &mut child);
            assert_eq!(child[0], 5.0);
        });
    }

    #[test]
    fn zero_value_positions_are_left_alone() {
        let set = set(&[("default", 1.0, 0.5)]);
        let mut child = vec![0.0, 0.0];

        scoped_seed(4, || set.mutate(&schema(), &mut child));
        assert_eq!(child, vec![0.0, 0.0]);
    }

    #[test]
    fn unknown_name_without_default_is_untouched() {
        let set = set(&[("other", 1.0, 0.5)]);
        let mut child = vec![3.0, 4.0];

        scoped_seed(5, || set.mutate(&schema(), &mut child));
        assert_eq!(child, vec![3.0, 4.0]);
    }
}

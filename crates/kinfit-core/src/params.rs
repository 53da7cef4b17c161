use kinfit_error::{FitResult, ensure};

/// Score attached to a permutation whose result cannot be trusted (failed
/// replicates, scoring divide-by-zero, misaligned output). Sorts after every
/// real chi value but still participates in ranking.
pub const SENTINEL_SCORE: f64 = 9007199254740992.0; // 2^53

/// The ordered set of free-parameter names shared by every vector of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSchema {
    names: Vec<String>,
}

impl ParamSchema {
    pub fn new(names: Vec<String>) -> Self {
        ParamSchema { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// One concrete assignment of the schema's parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamVector {
    pub values: Vec<f64>,
}

impl ParamVector {
    pub fn new(values: Vec<f64>) -> Self {
        ParamVector { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Checks the vector against its schema; every vector in a run must carry
    /// exactly one value per declared name.
    pub fn check(&self, schema: &ParamSchema) -> FitResult<()> {
        ensure!(
            self.values.len() == schema.len(),
            Engine: "parameter vector has {} values, schema declares {}",
            self.values.len(),
            schema.len()
        );
        Ok(())
    }
}

impl From<Vec<f64>> for ParamVector {
    fn from(values: Vec<f64>) -> Self {
        ParamVector { values }
    }
}

/// One candidate parameter vector within a generation, identified by its
/// permutation index. `score` is 0 until the scorer has run.
#[derive(Debug, Clone, PartialEq)]
pub struct Permutation {
    pub id: usize,
    pub vector: ParamVector,
    pub score: f64,
}

impl Permutation {
    pub fn new(id: usize, vector: ParamVector) -> Self {
        Permutation {
            id,
            vector,
            score: 0.0,
        }
    }

    pub fn failed(&self) -> bool {
        self.score >= SENTINEL_SCORE
    }
}

/// An ordered collection of permutations for one generation. Sorting is
/// stable, so rank order across equal scores follows insertion order.
#[derive(Debug, Clone, Default)]
pub struct Population {
    members: Vec<Permutation>,
    is_sorted: bool,
}

impl Population {
    pub fn new(members: Vec<Permutation>) -> Self {
        Population {
            members,
            is_sorted: false,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn push(&mut self, member: Permutation) {
        self.is_sorted = false;
        self.members.push(member);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permutation> {
        self.members.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Permutation> {
        self.members.get(index)
    }

    pub fn best(&self) -> Option<&Permutation> {
        if self.is_sorted {
            self.members.first()
        } else {
            self.members
                .iter()
                .min_by(|a, b| a.score.total_cmp(&b.score))
        }
    }

    /// Sort ascending by score, stable across ties.
    pub fn sort_by_score(&mut self) {
        if self.is_sorted {
            return;
        }
        self.members.sort_by(|a, b| a.score.total_cmp(&b.score));
        self.is_sorted = true;
    }

    pub fn truncate(&mut self, len: usize) {
        self.members.truncate(len);
    }

    pub fn into_members(self) -> Vec<Permutation> {
        self.members
    }
}

impl From<Vec<Permutation>> for Population {
    fn from(members: Vec<Permutation>) -> Self {
        Population::new(members)
    }
}

impl IntoIterator for Population {
    type Item = Permutation;
    type IntoIter = std::vec::IntoIter<Permutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perm(id: usize, score: f64) -> Permutation {
        let mut p = Permutation::new(id, ParamVector::new(vec![id as f64]));
        p.score = score;
        p
    }

    #[test]
    fn sort_is_stable_across_ties() {
        let mut pop = Population::new(vec![perm(3, 1.0), perm(1, 0.5), perm(2, 0.5)]);
        pop.sort_by_score();
        let order = pop.iter().map(|p| p.id).collect::<Vec<_>>();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn sentinel_sorts_last() {
        let mut pop = Population::new(vec![perm(1, SENTINEL_SCORE), perm(2, 123.0)]);
        pop.sort_by_score();
        assert_eq!(pop.best().unwrap().id, 2);
        assert!(pop.get(1).unwrap().failed());
    }

    #[test]
    fn vector_schema_mismatch_is_an_error() {
        let schema = ParamSchema::new(vec!["a".into(), "b".into()]);
        assert!(ParamVector::new(vec![1.0]).check(&schema).is_err());
        assert!(ParamVector::new(vec![1.0, 2.0]).check(&schema).is_ok());
    }
}

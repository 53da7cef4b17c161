#[cfg(test)]
mod roundtrip_tests {
    use kinfit_core::*;
    use tempfile::TempDir;

    const TEMPLATE: &str = "\
begin model
begin parameters
1 kon 1.0
2 koff 1.0
end parameters
end model
simulate({method=>\"ode\",t_end=>2,n_steps=>2})
";

    /// The change-log header is the contract between the materializer and
    /// the scorer: a vector written into a model file must come back intact.
    #[test]
    fn materialized_vectors_survive_the_disk_round_trip() {
        let dir = TempDir::new().unwrap();
        let template_path = dir.path().join("model.bngl");
        std::fs::write(&template_path, TEMPLATE).unwrap();
        let template = ModelTemplate::load(&template_path).unwrap();

        let schema = ParamSchema::new(vec!["kon".into(), "koff".into()]);
        let vectors = [
            ParamVector::new(vec![0.1, 12.5]),
            ParamVector::new(vec![3.0e-7, 8.0e4]),
        ];

        for (perm, vector) in vectors.iter().enumerate() {
            let out = dir.path().join(format!("model_perm{}.bngl", perm));
            template.materialize(&schema, vector, &out, None).unwrap();

            let recovered = ChangeLog::read(&out).unwrap().to_vector(&schema).unwrap();
            assert_eq!(&recovered, vector);
        }
    }

    /// Generation seeding, scoring and summary emission working off real
    /// files, with the hand-checked chi value of the absolute objective.
    #[test]
    fn seeded_population_scores_and_summarizes() {
        let dir = TempDir::new().unwrap();

        let reference = Table::parse("# time A\n0 1\n1 2\n2 3\n").unwrap();
        let specs = vec![VarSpec::Linear {
            name: "k".into(),
            first: 0.0,
            last: 1.0,
            steps: 5,
        }];
        let (schema, vectors) = generate_population(&specs, 5).unwrap();
        assert_eq!(vectors.len(), 5);

        let scorer = Scorer {
            kind: ObjectiveKind::Absolute,
            preprocess: Default::default(),
            control: "time".into(),
        };
        let refs = vec![scorer.prep_reference(reference).unwrap()];

        // Every permutation simulates to the same trace here; the chi value
        // is sqrt((2-4)^2) = 2 regardless of k.
        let mut population = Population::default();
        for (perm, vector) in vectors.iter().enumerate() {
            let sim = Table::parse("# time A\n0 1\n1 4\n2 3\n").unwrap();
            let score = scorer.score_permutation(&refs, vec![sim], None).unwrap();
            let mut member = Permutation::new(perm, vector.clone());
            member.score = score.total;
            population.push(member);
        }

        let summary = Summary::from_population(schema.names().to_vec(), &mut population);
        assert_eq!(summary.len(), 5);
        assert!(summary.rows.iter().all(|row| row.score == 2.0));

        let path = dir.path().join("1_summary_diff.txt");
        summary.write(&path).unwrap();
        assert_eq!(Summary::read(&path).unwrap(), summary);
    }

    /// Bootstrap weights reshape the chi value without touching the data.
    #[test]
    fn weights_scale_residuals() {
        let scorer = Scorer {
            kind: ObjectiveKind::Absolute,
            preprocess: Default::default(),
            control: "time".into(),
        };
        let refs = vec![
            scorer
                .prep_reference(Table::parse("# time A\n0 1\n1 2\n").unwrap())
                .unwrap(),
        ];
        let sim = || Table::parse("# time A\n0 2\n1 4\n").unwrap();

        let unweighted = scorer.score_permutation(&refs, vec![sim()], None).unwrap();
        assert_eq!(unweighted.total, 5f64.sqrt());

        // All weight on the second row: 0*1 + 2*4.
        let weights = WeightMap {
            files: vec![FileWeights {
                columns: vec!["A".into()],
                rows: vec![vec![0], vec![2]],
            }],
        };
        let weighted = scorer
            .score_permutation(&refs, vec![sim()], Some(&weights))
            .unwrap();
        assert_eq!(weighted.total, 8f64.sqrt());
    }
}

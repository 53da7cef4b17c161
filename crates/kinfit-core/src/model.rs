use crate::params::{ParamSchema, ParamVector};
use kinfit_error::{FitResult, fit_bail, fit_err};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

const CHANGE_LOG_END: &str = "# End of permute change log";

/// A template model file. Continuation-character line splits are joined at
/// load time so the parameters block can be edited line by line.
#[derive(Debug, Clone)]
pub struct ModelTemplate {
    path: PathBuf,
    lines: Vec<String>,
}

impl ModelTemplate {
    pub fn load(path: &Path) -> FitResult<ModelTemplate> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| fit_err!(Model: "cannot read {}: {}", path.display(), e))?;

        let mut lines: Vec<String> = Vec::new();
        let mut pending: Option<String> = None;
        for raw in text.lines() {
            let mut line = match pending.take() {
                Some(mut prefix) => {
                    prefix.push_str(raw);
                    prefix
                }
                None => raw.to_string(),
            };

            if let Some(stripped) = line.strip_suffix('\\') {
                line = stripped.to_string();
                pending = Some(line);
            } else {
                lines.push(line);
            }
        }
        if let Some(rest) = pending {
            lines.push(rest);
        }

        Ok(ModelTemplate {
            path: path.to_path_buf(),
            lines,
        })
    }

    /// Base name of the template without its extension, used to derive
    /// per-permutation file names.
    pub fn stem(&self) -> &str {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("model")
    }

    /// Write a concrete model for one permutation: the parameters block gets
    /// the vector's values substituted in, and a machine-readable change log
    /// is prepended so the vector can be recovered from disk.
    ///
    /// Every declared parameter name must match exactly one line of the
    /// parameters block; anything else is a model error.
    pub fn materialize(
        &self,
        schema: &ParamSchema,
        vector: &ParamVector,
        out_path: &Path,
        network: Option<&Path>,
    ) -> FitResult<()> {
        vector.check(schema)?;

        let (block_start, block_end) = self.parameter_block()?;
        let mut lines = self.lines.clone();
        let mut replaced = vec![false; schema.len()];

        for line in lines[block_start + 1..block_end].iter_mut() {
            if let Some((index, rewritten)) = rewrite_parameter_line(line, schema, vector) {
                if replaced[index] {
                    fit_bail!(
                        Model: "parameter {:?} matches more than one line in {}",
                        schema.names()[index],
                        self.path.display()
                    );
                }
                replaced[index] = true;
                *line = rewritten;
            }
        }

        if let Some(missing) = replaced.iter().position(|done| !done) {
            fit_bail!(
                Model: "parameter {:?} not found in the parameters block of {}",
                schema.names()[missing],
                self.path.display()
            );
        }

        let mut out = String::new();
        for (name, value) in schema.names().iter().zip(vector.values.iter()) {
            let _ = writeln!(out, "# {} changed to {}", name, value);
        }
        out.push_str(CHANGE_LOG_END);
        out.push('\n');

        if let Some(net) = network {
            let _ = writeln!(out, "readFile({{file=>\"{}\"}})", net.display());
        }

        for line in &lines {
            out.push_str(line);
            out.push('\n');
        }

        std::fs::write(out_path, out)
            .map_err(|e| fit_err!(Model: "cannot write {}: {}", out_path.display(), e))?;
        Ok(())
    }

    /// Write an unmodified copy used for the one-time generate-network run on
    /// the deterministic-ODE path.
    pub fn write_plain(&self, out_path: &Path) -> FitResult<()> {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        std::fs::write(out_path, out)
            .map_err(|e| fit_err!(Model: "cannot write {}: {}", out_path.display(), e))?;
        Ok(())
    }

    fn parameter_block(&self) -> FitResult<(usize, usize)> {
        let start = self
            .lines
            .iter()
            .position(|l| l.trim() == "begin parameters")
            .ok_or_else(
                || fit_err!(Model: "{}: no 'begin parameters' block", self.path.display()),
            )?;
        let end = self.lines[start..]
            .iter()
            .position(|l| l.trim() == "end parameters")
            .map(|offset| start + offset)
            .ok_or_else(
                || fit_err!(Model: "{}: unterminated parameters block", self.path.display()),
            )?;
        Ok((start, end))
    }
}

/// Parameter-block lines come as `name value` or `index name value`. Returns
/// the schema index and the rewritten line when the line declares a schema
/// parameter.
fn rewrite_parameter_line(
    line: &str,
    schema: &ParamSchema,
    vector: &ParamVector,
) -> Option<(usize, String)> {
    let tokens = line.split_whitespace().collect::<Vec<_>>();
    if tokens.is_empty() || tokens[0].starts_with('#') {
        return None;
    }

    let (name_pos, value_pos) = if tokens.len() >= 3 && tokens[0].parse::<usize>().is_ok() {
        (1, 2)
    } else if tokens.len() >= 2 {
        (0, 1)
    } else {
        return None;
    };

    let index = schema.index_of(tokens[name_pos])?;
    let mut rewritten = tokens.clone();
    let value = vector.values[index].to_string();
    rewritten[value_pos] = &value;
    Some((index, rewritten.join(" ")))
}

/// The change-log header of a materialized model: one `# <name> changed to
/// <value>` line per parameter, closed by the `# End of permute change log`
/// sentinel. This is the contract that lets the scorer recover a parameter
/// vector from a model file on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeLog {
    pub entries: Vec<(String, f64)>,
}

impl ChangeLog {
    pub fn read(path: &Path) -> FitResult<ChangeLog> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| fit_err!(Model: "cannot read {}: {}", path.display(), e))?;

        let mut entries = Vec::new();
        for line in text.lines() {
            if line.trim() == CHANGE_LOG_END {
                return Ok(ChangeLog { entries });
            }

            let rest = line
                .strip_prefix("# ")
                .ok_or_else(|| fit_err!(Model: "{}: malformed change log", path.display()))?;
            let (name, value) = rest.split_once(" changed to ").ok_or_else(
                || fit_err!(Model: "{}: malformed change log line {:?}", path.display(), line),
            )?;
            let value = value.trim().parse::<f64>().map_err(
                |_| fit_err!(Model: "{}: unparsable change log value {:?}", path.display(), value),
            )?;
            entries.push((name.to_string(), value));
        }

        fit_bail!(Model: "{}: change log missing its end sentinel", path.display())
    }

    /// Reassemble the vector in schema order.
    pub fn to_vector(&self, schema: &ParamSchema) -> FitResult<ParamVector> {
        let mut values = vec![f64::NAN; schema.len()];
        for (name, value) in &self.entries {
            let index = schema
                .index_of(name)
                .ok_or_else(|| fit_err!(Model: "change log names unknown parameter {:?}", name))?;
            values[index] = *value;
        }
        if values.iter().any(|v| v.is_nan()) {
            fit_bail!(Model: "change log does not cover the full schema");
        }
        Ok(ParamVector::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MODEL: &str = "\
begin model
begin parameters
1 kon 10.0
2 koff 5.0
3 scale 1.0
end parameters
begin observables
Molecules A A()
end observables
end model
simulate({method=>\"ode\",t_end=>10,n_steps=>20})
";

    fn template(dir: &TempDir, text: &str) -> ModelTemplate {
        let path = dir.path().join("model.bngl");
        std::fs::write(&path, text).unwrap();
        ModelTemplate::load(&path).unwrap()
    }

    fn schema() -> ParamSchema {
        ParamSchema::new(vec!["kon".into(), "koff".into()])
    }

    #[test]
    fn substitutes_parameter_values() {
        let dir = TempDir::new().unwrap();
        let template = template(&dir, MODEL);
        let out = dir.path().join("model_perm0.bngl");

        template
            .materialize(&schema(), &ParamVector::new(vec![2.5, 0.125]), &out, None)
            .unwrap();

        let written = std::fs::read_to_string(&out).unwrap();
        assert!(written.contains("1 kon 2.5"));
        assert!(written.contains("2 koff 0.125"));
        assert!(written.contains("3 scale 1.0"));
        assert!(written.contains("# kon changed to 2.5"));
        assert!(written.contains(CHANGE_LOG_END));
    }

    #[test]
    fn change_log_round_trips() {
        let dir = TempDir::new().unwrap();
        let template = template(&dir, MODEL);
        let out = dir.path().join("model_perm1.bngl");
        let vector = ParamVector::new(vec![0.001953125, 1e6]);

        template.materialize(&schema(), &vector, &out, None).unwrap();

        let log = ChangeLog::read(&out).unwrap();
        assert_eq!(log.to_vector(&schema()).unwrap(), vector);
    }

    #[test]
    fn missing_parameter_is_fatal() {
        let dir = TempDir::new().unwrap();
        let template = template(&dir, MODEL);
        let out = dir.path().join("model_perm0.bngl");
        let schema = ParamSchema::new(vec!["nope".into()]);

        let err = template
            .materialize(&schema, &ParamVector::new(vec![1.0]), &out, None)
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn joins_continuation_lines() {
        let dir = TempDir::new().unwrap();
        let text = MODEL.replace("1 kon 10.0", "1 kon \\\n10.0");
        let template = template(&dir, &text);
        let out = dir.path().join("model_perm0.bngl");

        template
            .materialize(&schema(), &ParamVector::new(vec![3.0, 4.0]), &out, None)
            .unwrap();
        assert!(std::fs::read_to_string(&out).unwrap().contains("1 kon 3"));
    }

    #[test]
    fn network_reference_is_inserted() {
        let dir = TempDir::new().unwrap();
        let template = template(&dir, MODEL);
        let out = dir.path().join("model_perm0.bngl");
        let net = dir.path().join("model.net");

        template
            .materialize(
                &schema(),
                &ParamVector::new(vec![1.0, 2.0]),
                &out,
                Some(&net),
            )
            .unwrap();

        let written = std::fs::read_to_string(&out).unwrap();
        assert!(written.contains(&format!("readFile({{file=>\"{}\"}})", net.display())));
    }

    #[test]
    fn unterminated_block_is_fatal() {
        let dir = TempDir::new().unwrap();
        let template = template(&dir, "begin parameters\nkon 1.0\n");
        let out = dir.path().join("model_perm0.bngl");
        assert!(
            template
                .materialize(
                    &ParamSchema::new(vec!["kon".into()]),
                    &ParamVector::new(vec![1.0]),
                    &out,
                    None
                )
                .is_err()
        );
    }
}

use kinfit_error::{FitResult, fit_bail, fit_err};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// The external simulation executable, treated as a black box over a
/// filesystem protocol: it reads a parameterized model file and writes one
/// tabular output per suffix declared in the model, plus a `.net` reaction
/// network when asked to generate one.
#[derive(Debug, Clone)]
pub struct Simulator {
    exe: PathBuf,
}

impl Simulator {
    pub fn new(exe: PathBuf) -> Self {
        Simulator { exe }
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }

    /// `<simulator> --outdir <dir> <model-file>`
    pub fn command(&self, model: &Path, outdir: &Path) -> Command {
        let mut command = Command::new(&self.exe);
        command.arg("--outdir").arg(outdir).arg(model);
        command
    }

    /// The same invocation rendered as a shell word list, used when packing
    /// cluster chunk scripts.
    pub fn shell_invocation(&self, model: &Path, outdir: &Path) -> String {
        format!(
            "{} --outdir {} {}",
            self.exe.display(),
            outdir.display(),
            model.display()
        )
    }

    /// One-time generate-network run on the deterministic-ODE path. The model
    /// passed here carries a generate-only action; a successful run leaves a
    /// `.net` file next to the other outputs.
    pub fn generate_network(&self, model: &Path, outdir: &Path) -> FitResult<PathBuf> {
        let console = outdir.join(format!(
            "{}.BNG_OUT",
            model.file_stem().and_then(|s| s.to_str()).unwrap_or("netgen")
        ));
        let log = std::fs::File::create(&console)?;
        let err_log = log.try_clone()?;

        let status = self
            .command(model, outdir)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(err_log)
            .status()
            .map_err(|e| fit_err!(Simulation: "cannot launch {}: {}", self.exe.display(), e))?;

        if !status.success() {
            fit_bail!(
                Simulation: "network generation exited with {} (see {})",
                status,
                console.display()
            );
        }

        let stem = model.file_stem().and_then(|s| s.to_str()).unwrap_or("model");
        let net = outdir.join(format!("{}.net", stem));
        if !net.is_file() {
            fit_bail!(
                Simulation: "network generation produced no {} file",
                net.display()
            );
        }
        Ok(net)
    }
}

use super::sandbox::{guarded, run_with_deadline, Isolation, SandboxError};
use crate::config::DocumentConfig;
use lopdf::Document;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::warn;

/// One step of the repair cascade.
///
/// `attempt` writes a candidate to `output` and returns its path. The caller
/// decides whether the candidate is acceptable by validating it again.
pub trait RepairStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn attempt(&self, input: &Path, output: &Path) -> Result<PathBuf, String>;
}

type ArgBuilder = fn(&Path, &Path) -> Vec<OsString>;

/// A repair performed by an external tool.
pub struct ExternalTool {
    name: &'static str,
    program: &'static str,
    args: ArgBuilder,
    /// Exit codes that still produce usable output (qpdf exits 3 on warnings).
    accepted_codes: &'static [i32],
    timeout: Duration,
}

impl ExternalTool {
    pub fn qpdf_rewrite(timeout: Duration) -> Self {
        Self {
            name: "qpdf-rewrite",
            program: "qpdf",
            args: |input, output| vec![input.into(), output.into()],
            accepted_codes: &[0, 3],
            timeout,
        }
    }

    pub fn qpdf_linearize(timeout: Duration) -> Self {
        Self {
            name: "qpdf-linearize",
            program: "qpdf",
            args: |input, output| vec!["--linearize".into(), input.into(), output.into()],
            accepted_codes: &[0, 3],
            timeout,
        }
    }

    pub fn ghostscript_reencode(timeout: Duration) -> Self {
        Self {
            name: "ghostscript-reencode",
            program: "gs",
            args: |input, output| {
                let mut out_arg = OsString::from("-sOutputFile=");
                out_arg.push(output);
                vec![
                    "-q".into(),
                    "-dBATCH".into(),
                    "-dNOPAUSE".into(),
                    "-dSAFER".into(),
                    "-sDEVICE=pdfwrite".into(),
                    out_arg,
                    input.into(),
                ]
            },
            accepted_codes: &[0],
            timeout,
        }
    }
}

impl RepairStrategy for ExternalTool {
    fn name(&self) -> &str {
        self.name
    }

    fn attempt(&self, input: &Path, output: &Path) -> Result<PathBuf, String> {
        let mut cmd = Command::new(self.program);
        cmd.args((self.args)(input, output));
        let result = run_with_deadline(cmd, self.timeout).map_err(|e| match e {
            SandboxError::Spawn { .. } => format!("{} is not available: {}", self.program, e),
            other => other.to_string(),
        })?;

        let code = result.status.code();
        if !code.map(|c| self.accepted_codes.contains(&c)).unwrap_or(false) {
            return Err(format!(
                "{} exited with {:?}: {}",
                self.program,
                code,
                result.stderr_excerpt()
            ));
        }
        if !output.is_file() {
            return Err(format!("{} produced no output", self.program));
        }
        Ok(output.to_path_buf())
    }
}

/// Load with `lopdf`, drop unreachable objects, renumber and save.
pub struct LopdfResave {
    isolation: Isolation,
    timeout: Duration,
}

impl LopdfResave {
    pub fn new(isolation: Isolation, timeout: Duration) -> Self {
        Self { isolation, timeout }
    }
}

impl RepairStrategy for LopdfResave {
    fn name(&self) -> &str {
        "lopdf-resave"
    }

    fn attempt(&self, input: &Path, output: &Path) -> Result<PathBuf, String> {
        match &self.isolation {
            Isolation::InProcess => guarded(|| resave(input, output))?,
            Isolation::Subprocess { program } => {
                let mut cmd = Command::new(program);
                cmd.arg("worker").arg("resave").arg(input).arg(output);
                let result = run_with_deadline(cmd, self.timeout).map_err(|e| e.to_string())?;
                if !result.status.success() {
                    return Err(format!("resave worker failed: {}", result.stderr_excerpt()));
                }
            }
        }
        if !output.is_file() {
            return Err("resave produced no output".to_string());
        }
        Ok(output.to_path_buf())
    }
}

/// In-process body of the `lopdf-resave` strategy; also what the resave
/// worker runs.
pub fn resave(input: &Path, output: &Path) -> Result<(), String> {
    let mut doc = Document::load(input).map_err(|e| format!("failed to load PDF: {}", e))?;
    doc.prune_objects();
    doc.renumber_objects();
    doc.compress();
    doc.save(output)
        .map(|_| ())
        .map_err(|e| format!("failed to save {}: {}", output.display(), e))
}

/// Build the configured cascade in order. Unknown names are logged and skipped.
pub fn build_strategies(config: &DocumentConfig, isolation: &Isolation) -> Vec<Box<dyn RepairStrategy>> {
    let timeout = Duration::from_secs(config.repair_timeout_secs.max(1));
    config
        .repair_strategies
        .iter()
        .filter_map(|name| -> Option<Box<dyn RepairStrategy>> {
            match name.as_str() {
                "qpdf-rewrite" => Some(Box::new(ExternalTool::qpdf_rewrite(timeout))),
                "lopdf-resave" => Some(Box::new(LopdfResave::new(isolation.clone(), timeout))),
                "qpdf-linearize" => Some(Box::new(ExternalTool::qpdf_linearize(timeout))),
                "ghostscript-reencode" => Some(Box::new(ExternalTool::ghostscript_reencode(timeout))),
                other => {
                    warn!("Unknown repair strategy '{}' ignored", other);
                    None
                }
            }
        })
        .collect()
}

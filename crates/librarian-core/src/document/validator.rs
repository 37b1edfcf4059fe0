use super::inspect::{self, PdfDetails};
use super::repair::{build_strategies, RepairStrategy};
use super::sandbox::{guarded, run_with_deadline, Isolation, SandboxError};
use crate::config::AppConfig;
use crate::error::{FileError, IssueKind};
use crate::hasher;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

/// Lifecycle of a single validity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValidationState {
    Unchecked,
    HeaderChecked,
    Valid { has_text: bool },
    Invalid,
}

/// Deep structural check applied after the header passes.
pub trait DocumentCheck: Send + Sync {
    fn probe(&self, path: &Path) -> Result<PdfDetails, FileError>;
}

/// JSON reply of the `worker probe` helper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReply {
    pub details: Option<PdfDetails>,
    pub error: Option<String>,
}

impl ProbeReply {
    pub fn from_result(result: Result<PdfDetails, String>) -> Self {
        match result {
            Ok(details) => Self {
                details: Some(details),
                error: None,
            },
            Err(error) => Self {
                details: None,
                error: Some(error),
            },
        }
    }
}

/// `lopdf`-backed check, in-process or through the worker helper.
pub struct LopdfCheck {
    isolation: Isolation,
    timeout: Duration,
    max_text_pages: usize,
}

impl LopdfCheck {
    pub fn new(isolation: Isolation, timeout: Duration, max_text_pages: usize) -> Self {
        Self {
            isolation,
            timeout,
            max_text_pages,
        }
    }

    fn probe_in_child(&self, program: &Path, path: &Path) -> Result<PdfDetails, FileError> {
        let mut cmd = Command::new(program);
        cmd.arg("worker")
            .arg("probe")
            .arg(path)
            .arg("--max-pages")
            .arg(self.max_text_pages.to_string());

        let output = run_with_deadline(cmd, self.timeout).map_err(|e| match e {
            SandboxError::TimedOut(t) => FileError::new(
                path,
                IssueKind::Timeout,
                format!("validation exceeded {}s", t.as_secs()),
            ),
            other => FileError::new(path, IssueKind::StructuralCorruption, other.to_string()),
        })?;

        let reply: ProbeReply = serde_json::from_slice(&output.stdout).map_err(|e| {
            FileError::new(
                path,
                IssueKind::StructuralCorruption,
                format!(
                    "probe worker exited with {:?} without a reply ({}): {}",
                    output.status.code(),
                    e,
                    output.stderr_excerpt()
                ),
            )
        })?;
        match (reply.details, reply.error) {
            (Some(details), _) => Ok(details),
            (None, error) => Err(FileError::new(
                path,
                IssueKind::StructuralCorruption,
                error.unwrap_or_else(|| "probe failed".to_string()),
            )),
        }
    }
}

impl DocumentCheck for LopdfCheck {
    fn probe(&self, path: &Path) -> Result<PdfDetails, FileError> {
        match &self.isolation {
            Isolation::InProcess => guarded(|| inspect::probe_pdf(path, self.max_text_pages))
                .map_err(|cause| FileError::new(path, IssueKind::StructuralCorruption, cause)),
            Isolation::Subprocess { program } => self.probe_in_child(program, path),
        }
    }
}

/// A repair that re-passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptedRepair {
    pub strategy: String,
    pub path: PathBuf,
}

/// Result of validating one document, including any repair.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentOutcome {
    pub state: ValidationState,
    pub details: Option<PdfDetails>,
    pub repair: Option<AcceptedRepair>,
    /// Invalid and unrepairable. Kept, but earns no validity or text credit.
    pub degraded: bool,
    /// One `(strategy, cause)` per failed repair attempt.
    pub failures: Vec<(String, String)>,
    #[serde(skip)]
    pub issues: Vec<FileError>,
}

impl DocumentOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self.state, ValidationState::Valid { .. })
    }

    pub fn has_text(&self) -> bool {
        matches!(self.state, ValidationState::Valid { has_text: true })
    }

    /// The file that should be copied: the accepted repair if any.
    pub fn accepted_path<'a>(&'a self, original: &'a Path) -> &'a Path {
        self.repair.as_ref().map(|r| r.path.as_path()).unwrap_or(original)
    }
}

/// Runs the validity check and, on failure, the ordered repair cascade.
pub struct DocumentValidator {
    check: Box<dyn DocumentCheck>,
    strategies: Vec<Box<dyn RepairStrategy>>,
    repair_dir: PathBuf,
}

impl DocumentValidator {
    pub fn new(config: &AppConfig, isolation: Isolation) -> Self {
        let docs = &config.documents;
        let check = LopdfCheck::new(
            isolation.clone(),
            Duration::from_secs(docs.timeout_secs.max(1)),
            docs.max_text_pages,
        );
        Self {
            check: Box::new(check),
            strategies: build_strategies(docs, &isolation),
            repair_dir: config.staging_path().join("repaired"),
        }
    }

    pub fn with_parts(
        check: Box<dyn DocumentCheck>,
        strategies: Vec<Box<dyn RepairStrategy>>,
        repair_dir: PathBuf,
    ) -> Self {
        Self {
            check,
            strategies,
            repair_dir,
        }
    }

    /// Unchecked -> HeaderChecked -> Valid | Invalid. Originals and repair
    /// candidates both go through this.
    pub fn verify(&self, path: &Path) -> (ValidationState, Result<PdfDetails, FileError>) {
        let state = match inspect::read_header(path) {
            Ok(Some(_)) => ValidationState::HeaderChecked,
            Ok(None) => {
                let err = FileError::new(
                    path,
                    IssueKind::StructuralCorruption,
                    "missing %PDF- header",
                );
                return (ValidationState::Invalid, Err(err));
            }
            Err(e) => return (ValidationState::Invalid, Err(FileError::from_io(path, &e))),
        };
        debug!("{:?}: {}", state, path.display());

        match self.check.probe(path) {
            Ok(details) => (
                ValidationState::Valid {
                    has_text: details.has_text,
                },
                Ok(details),
            ),
            Err(err) => (ValidationState::Invalid, Err(err)),
        }
    }

    pub fn validate(&self, path: &Path) -> DocumentOutcome {
        let (state, checked) = self.verify(path);
        let mut outcome = DocumentOutcome {
            state,
            details: None,
            repair: None,
            degraded: false,
            failures: Vec::new(),
            issues: Vec::new(),
        };

        let first_failure = match checked {
            Ok(details) => {
                outcome.details = Some(details);
                return outcome;
            }
            Err(err) => err,
        };
        // Unreadable is not corrupt; nothing to repair.
        if first_failure.kind == IssueKind::TransientAccess {
            outcome.issues.push(first_failure);
            return outcome;
        }
        outcome.issues.push(first_failure);

        if let Err(e) = fs::create_dir_all(&self.repair_dir) {
            outcome.failures.push(("setup".to_string(), e.to_string()));
        } else {
            for strategy in &self.strategies {
                let output = self.repair_output(path, strategy.name());
                let cause = match strategy.attempt(path, &output) {
                    Ok(candidate) => match self.verify(&candidate) {
                        (state @ ValidationState::Valid { .. }, Ok(details)) => {
                            info!(
                                "Repaired {} with {} -> {}",
                                path.display(),
                                strategy.name(),
                                candidate.display()
                            );
                            outcome.state = state;
                            outcome.details = Some(details);
                            outcome.repair = Some(AcceptedRepair {
                                strategy: strategy.name().to_string(),
                                path: candidate,
                            });
                            return outcome;
                        }
                        (_, Err(err)) => {
                            let _ = fs::remove_file(&candidate);
                            format!("output failed validation: {}", err.cause)
                        }
                        (_, Ok(_)) => {
                            let _ = fs::remove_file(&candidate);
                            "output failed validation".to_string()
                        }
                    },
                    Err(cause) => {
                        let _ = fs::remove_file(&output);
                        cause
                    }
                };
                debug!("{} failed on {}: {}", strategy.name(), path.display(), cause);
                outcome.failures.push((strategy.name().to_string(), cause));
            }
        }

        outcome.degraded = true;
        let detail = if outcome.failures.is_empty() {
            "no repair strategies configured".to_string()
        } else {
            outcome
                .failures
                .iter()
                .map(|(name, cause)| format!("{}: {}", name, cause))
                .collect::<Vec<_>>()
                .join("; ")
        };
        outcome
            .issues
            .push(FileError::new(path, IssueKind::RepairFailed, detail));
        outcome
    }

    fn repair_output(&self, path: &Path, strategy: &str) -> PathBuf {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let tag = hasher::hash_data(path.to_string_lossy().as_bytes());
        self.repair_dir
            .join(format!("{}-{}.{}.pdf", stem, &tag[..12], strategy))
    }
}

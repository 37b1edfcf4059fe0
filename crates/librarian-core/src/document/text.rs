//! Text sampling from validated documents, under the same isolation as
//! validation.

use super::inspect;
use super::sandbox::{guarded, run_with_deadline, Isolation};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// JSON reply of the `worker text` helper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextReply {
    pub text: Option<String>,
    pub error: Option<String>,
}

impl TextReply {
    pub fn from_result(result: Result<String, String>) -> Self {
        match result {
            Ok(text) => Self {
                text: Some(text),
                error: None,
            },
            Err(error) => Self {
                text: None,
                error: Some(error),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextSampler {
    isolation: Isolation,
    timeout: Duration,
    max_pages: usize,
}

impl TextSampler {
    pub fn new(isolation: Isolation, timeout: Duration, max_pages: usize) -> Self {
        Self {
            isolation,
            timeout,
            max_pages,
        }
    }

    pub fn in_process(max_pages: usize) -> Self {
        Self::new(Isolation::InProcess, Duration::from_secs(30), max_pages)
    }

    /// Text of the first pages of `path`. Callers pass only documents that
    /// already passed validation.
    pub fn sample(&self, path: &Path) -> Result<String, String> {
        match &self.isolation {
            Isolation::InProcess => guarded(|| inspect::extract_text_sample(path, self.max_pages)),
            Isolation::Subprocess { program } => self.sample_in_child(program, path),
        }
    }

    fn sample_in_child(&self, program: &Path, path: &Path) -> Result<String, String> {
        let mut cmd = Command::new(program);
        cmd.arg("worker")
            .arg("text")
            .arg(path)
            .arg("--max-pages")
            .arg(self.max_pages.to_string());

        let output = run_with_deadline(cmd, self.timeout).map_err(|e| e.to_string())?;
        let reply: TextReply = serde_json::from_slice(&output.stdout).map_err(|e| {
            format!(
                "text worker exited with {:?} without a reply ({}): {}",
                output.status.code(),
                e,
                output.stderr_excerpt()
            )
        })?;
        match (reply.text, reply.error) {
            (Some(text), _) => Ok(text),
            (None, error) => Err(error.unwrap_or_else(|| "text extraction failed".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::inspect::fixtures::write_pdf;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_in_process_sample_reads_text() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("book.pdf");
        write_pdf(&path, Some("ISBN 978-1-939979-70-4"));

        let text = TextSampler::in_process(3).sample(&path).unwrap();
        assert!(text.contains("978-1-939979-70-4"));
    }

    #[cfg(unix)]
    #[test]
    fn test_worker_without_reply_is_an_error() {
        let sampler = TextSampler::new(
            Isolation::Subprocess {
                program: PathBuf::from("true"),
            },
            Duration::from_secs(5),
            3,
        );
        let err = sampler.sample(Path::new("/nowhere.pdf")).unwrap_err();
        assert!(err.contains("without a reply"));
    }
}

//! File- and command-backed collaborators over a workspace directory:
//!
//! ```text
//! <workspace>/
//!   reference/page-NNNN.txt     trusted reference text
//!   generated/page-NNNN.html    initial page content
//!   judgment.json               visual judgment when no judge command is set
//!   .folio/ledger/              append-only ledger
//! ```

use async_trait::async_trait;
use folio_gate::{CollaboratorError, GenerationService, Judgment, ReferenceProvider, VisualJudgmentService};
use folio_kernel::feedback::Feedback;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn reference_path(&self, page: u32) -> PathBuf {
        self.root.join("reference").join(format!("page-{page:04}.txt"))
    }

    pub fn generated_path(&self, page: u32) -> PathBuf {
        self.root.join("generated").join(format!("page-{page:04}.html"))
    }

    pub fn judgment_path(&self) -> PathBuf {
        self.root.join("judgment.json")
    }

    pub fn ledger_root(&self) -> PathBuf {
        self.root.join(".folio").join("ledger")
    }
}

async fn read_file(path: &Path) -> Result<String, CollaboratorError> {
    tokio::fs::read_to_string(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => CollaboratorError::NotFound(path.display().to_string()),
        _ => CollaboratorError::Failed(format!("{}: {e}", path.display())),
    })
}

/// Run `command` through `sh -c`, feeding `input` on stdin. Returns stdout.
async fn run_shell(command: &str, input: &[u8], env: &[(&str, String)]) -> Result<String, CollaboratorError> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CollaboratorError::Failed(format!("failed to spawn `{command}`: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        // A command that ignores its input may close stdin early.
        if let Err(e) = stdin.write_all(input).await
            && e.kind() != ErrorKind::BrokenPipe
        {
            return Err(CollaboratorError::Failed(format!("failed to write to `{command}`: {e}")));
        }
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| CollaboratorError::Failed(format!("`{command}` did not finish: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CollaboratorError::Failed(format!(
            "`{command}` exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    String::from_utf8(output.stdout)
        .map_err(|e| CollaboratorError::InvalidOutput(format!("`{command}` wrote non-UTF-8 output: {e}")))
}

pub struct FileReferences {
    workspace: Workspace,
}

impl FileReferences {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl ReferenceProvider for FileReferences {
    async fn page_text(&self, _unit_id: &str, page: u32) -> Result<String, CollaboratorError> {
        read_file(&self.workspace.reference_path(page)).await
    }
}

/// Initial content from `generated/`; regenerations from the generator
/// command, which gets the feedback as JSON on stdin.
pub struct WorkspaceGenerator {
    workspace: Workspace,
    command: Option<String>,
}

impl WorkspaceGenerator {
    pub fn new(workspace: Workspace, command: Option<String>) -> Self {
        Self { workspace, command }
    }
}

#[async_trait]
impl GenerationService for WorkspaceGenerator {
    async fn generate(
        &self,
        unit_id: &str,
        page: u32,
        feedback: Option<&Feedback>,
    ) -> Result<String, CollaboratorError> {
        if feedback.is_none() {
            let path = self.workspace.generated_path(page);
            match read_file(&path).await {
                Err(CollaboratorError::NotFound(_)) if self.command.is_some() => {}
                other => return other,
            }
        }

        let Some(command) = &self.command else {
            return Err(CollaboratorError::Failed(format!(
                "no generator command configured; cannot regenerate page {page}"
            )));
        };
        let attempt = feedback.map(|f| f.attempt).unwrap_or(0);
        let input = serde_json::to_vec(&feedback)
            .map_err(|e| CollaboratorError::Failed(format!("failed to encode feedback: {e}")))?;
        debug!(unit = %unit_id, page, attempt, "running generator command");
        let artifact = run_shell(
            command,
            &input,
            &[
                ("FOLIO_UNIT", unit_id.to_string()),
                ("FOLIO_PAGE", page.to_string()),
                ("FOLIO_ATTEMPT", attempt.to_string()),
            ],
        )
        .await?;
        if artifact.trim().is_empty() {
            return Err(CollaboratorError::InvalidOutput(format!(
                "generator produced no content for page {page}"
            )));
        }
        Ok(artifact)
    }
}

/// Scores from the judge command (artifact on stdin, `Judgment` JSON on
/// stdout), or from `judgment.json` when no command is set.
pub struct WorkspaceJudge {
    workspace: Workspace,
    command: Option<String>,
}

impl WorkspaceJudge {
    pub fn new(workspace: Workspace, command: Option<String>) -> Self {
        Self { workspace, command }
    }
}

#[async_trait]
impl VisualJudgmentService for WorkspaceJudge {
    async fn score(&self, unit_id: &str, artifact: &str) -> Result<Judgment, CollaboratorError> {
        let raw = match &self.command {
            Some(command) => {
                debug!(unit = %unit_id, "running judge command");
                run_shell(command, artifact.as_bytes(), &[("FOLIO_UNIT", unit_id.to_string())]).await?
            }
            None => read_file(&self.workspace.judgment_path()).await?,
        };
        serde_json::from_str(&raw)
            .map_err(|e| CollaboratorError::InvalidOutput(format!("judgment is not valid JSON: {e}")))
    }
}

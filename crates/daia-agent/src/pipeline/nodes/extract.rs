use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::pipeline::context::{required, TableArtifact};
use crate::pipeline::{Action, Node, PipelineError, SharedContext};
use crate::table::{extract_tables, ExtractedTable, TableExtraction, ARTIFACT_PREFIX};

/// Pulls markdown tables out of the reply and writes each one to a temp
/// file that will ride along as an attachment.
pub struct ExtractTables {
    artifact_dir: PathBuf,
}

impl ExtractTables {
    pub fn new(artifact_dir: PathBuf) -> Self {
        Self { artifact_dir }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractInput {
    pub reply: String,
    pub message_id: u64,
}

#[derive(Debug)]
pub struct Extracted {
    pub extraction: TableExtraction,
    pub artifacts: Vec<TableArtifact>,
}

#[async_trait]
impl Node<SharedContext> for ExtractTables {
    type Prep = ExtractInput;
    type Output = Extracted;

    fn name(&self) -> &'static str {
        "extract_tables"
    }

    fn prepare(&self, ctx: &SharedContext) -> Result<ExtractInput, PipelineError> {
        Ok(ExtractInput {
            reply: required(&ctx.reply, "reply")?.clone(),
            message_id: ctx.message.message_id,
        })
    }

    async fn execute(&self, input: ExtractInput) -> Result<Extracted, PipelineError> {
        let extraction = extract_tables(&input.reply, input.message_id);
        if !extraction.has_tables() {
            return Ok(Extracted {
                extraction,
                artifacts: Vec::new(),
            });
        }

        let dir = self.artifact_dir.clone();
        let tables = extraction.tables.clone();
        let artifacts = tokio::task::spawn_blocking(move || write_artifacts(&dir, &tables))
            .await
            .map_err(|e| PipelineError::Node {
                node: "extract_tables",
                reason: format!("artifact writer panicked: {e}"),
            })?;

        info!(
            tables = extraction.tables.len(),
            artifacts = artifacts.len(),
            "tables extracted from reply"
        );
        Ok(Extracted {
            extraction,
            artifacts,
        })
    }

    fn finalize(&self, ctx: &mut SharedContext, out: Extracted) -> Result<Action, PipelineError> {
        if !out.extraction.has_tables() {
            return Ok(Action::NoTables);
        }
        ctx.extraction = Some(out.extraction);
        ctx.artifacts = out.artifacts;
        Ok(Action::TablesFound)
    }
}

/// A table whose artifact cannot be written is still rendered; it just
/// won't be recoverable from history later.
fn write_artifacts(dir: &Path, tables: &[ExtractedTable]) -> Vec<TableArtifact> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "cannot create artifact directory");
        return Vec::new();
    }
    tables
        .iter()
        .filter_map(|t| match write_artifact(dir, t) {
            Ok(a) => Some(a),
            Err(e) => {
                warn!(key = %t.key, error = %e, "failed to write table artifact");
                None
            }
        })
        .collect()
}

fn write_artifact(dir: &Path, table: &ExtractedTable) -> std::io::Result<TableArtifact> {
    let mut file = tempfile::Builder::new()
        .prefix(ARTIFACT_PREFIX)
        .suffix(".md")
        .tempfile_in(dir)?;
    file.write_all(table.raw_text.as_bytes())?;
    file.flush()?;
    let path = file.into_temp_path();
    debug!(key = %table.key, path = %path.display(), "table artifact written");
    Ok(TableArtifact {
        key: table.key,
        attachment_name: table.key.attachment_name(),
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = "Scores:\n\n| a | b |\n|---|---|\n| 1 | 2 |\n\nDone.";

    #[test]
    fn artifacts_hold_raw_table_text() {
        let dir = tempfile::tempdir().unwrap();
        let ex = extract_tables(REPLY, 77);
        let artifacts = write_artifacts(dir.path(), &ex.tables);

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].attachment_name, "daia_replaced_table_77_1.md");
        let body = std::fs::read_to_string(artifacts[0].file_path()).unwrap();
        assert_eq!(body, "| a | b |\n|---|---|\n| 1 | 2 |");
    }

    #[test]
    fn dropping_an_artifact_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let ex = extract_tables(REPLY, 5);
        let artifacts = write_artifacts(dir.path(), &ex.tables);
        let path = artifacts[0].file_path();
        assert!(path.exists());

        drop(artifacts);
        assert!(!path.exists());
    }

    #[test]
    fn missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let ex = extract_tables(REPLY, 5);
        assert_eq!(write_artifacts(&nested, &ex.tables).len(), 1);
    }
}

//! Compose template files into concrete artifacts under `_generated/`.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use edison_core::EdisonError;

use crate::engine::TemplateEngine;
use crate::report::CompositionReport;

/// Renders every template in a source directory through the pipeline and
/// writes the results into an output directory (conventionally
/// `<config-dir>/_generated`).
pub struct ArtifactComposer<'a> {
    engine: &'a TemplateEngine,
    output_dir: PathBuf,
}

impl<'a> ArtifactComposer<'a> {
    pub fn new(engine: &'a TemplateEngine, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Compose a single template file; the artifact keeps its file name.
    pub fn compose_file(
        &self,
        template_path: &Path,
        entity_type: &str,
        source_layers: &[String],
    ) -> Result<(PathBuf, CompositionReport), EdisonError> {
        let content = std::fs::read_to_string(template_path).map_err(|e| {
            EdisonError::Template(format!(
                "Failed to read template {}: {e}",
                template_path.display()
            ))
        })?;
        let entity_name = template_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown");

        let (rendered, report) = self
            .engine
            .process(&content, entity_name, entity_type, source_layers);

        let file_name = template_path
            .file_name()
            .ok_or_else(|| EdisonError::Template("template path has no file name".into()))?;
        let target = self.output_dir.join(file_name);
        edison_core::write_atomic(&target, &rendered)?;
        debug!(artifact = %target.display(), "artifact composed");
        Ok((target, report))
    }

    /// Compose every `.md` template in a directory. Individual failures are
    /// reported, not fatal.
    pub fn compose_dir(
        &self,
        templates_dir: &Path,
        entity_type: &str,
        source_layers: &[String],
    ) -> Vec<(PathBuf, CompositionReport)> {
        let mut outputs = Vec::new();
        let Ok(entries) = std::fs::read_dir(templates_dir) else {
            return outputs;
        };
        let mut templates: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
            .collect();
        templates.sort();

        for template in templates {
            match self.compose_file(&template, entity_type, source_layers) {
                Ok(output) => outputs.push(output),
                Err(e) => warn!(template = %template.display(), error = %e, "artifact composition failed"),
            }
        }
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_compose_file_writes_artifact_and_report() {
        let dir = tempdir().unwrap();
        let templates = dir.path().join("templates");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(
            templates.join("COMMANDS.md"),
            "{{if:has-pack(nextjs)}}next build{{else}}cargo build{{/if}}\n",
        )
        .unwrap();

        let engine = TemplateEngine::new(serde_yaml::Value::Null, vec!["nextjs".into()]);
        let composer = ArtifactComposer::new(&engine, dir.path().join("_generated"));
        let (path, report) = composer
            .compose_file(&templates.join("COMMANDS.md"), "command", &[])
            .unwrap();

        assert!(path.ends_with("_generated/COMMANDS.md"));
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "next build");
        assert!(!report.has_issues());
    }

    #[test]
    fn test_compose_dir_processes_all_md_templates() {
        let dir = tempdir().unwrap();
        let templates = dir.path().join("templates");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(templates.join("a.md"), "A").unwrap();
        std::fs::write(templates.join("b.md"), "B").unwrap();
        std::fs::write(templates.join("notes.txt"), "skip me").unwrap();

        let engine = TemplateEngine::new(serde_yaml::Value::Null, vec![]);
        let composer = ArtifactComposer::new(&engine, dir.path().join("_generated"));
        let outputs = composer.compose_dir(&templates, "template", &[]);

        assert_eq!(outputs.len(), 2);
        assert!(dir.path().join("_generated/a.md").exists());
        assert!(!dir.path().join("_generated/notes.txt").exists());
    }

    #[test]
    fn test_missing_template_is_error() {
        let dir = tempdir().unwrap();
        let engine = TemplateEngine::new(serde_yaml::Value::Null, vec![]);
        let composer = ArtifactComposer::new(&engine, dir.path());
        let err = composer
            .compose_file(Path::new("/nope/none.md"), "t", &[])
            .unwrap_err();
        assert_eq!(err.kind(), "template");
    }
}

//! Prompt pre-compilation.
//!
//! `person_job` nodes may point at a prompt file instead of inlining the
//! prompt. When the compile options carry a base path, the file content is
//! resolved relative to the diagram and inlined into `resolved_prompt` /
//! `resolved_first_prompt`, so the runtime never touches the filesystem
//! for prompts.

use crate::error::{CompileError, Result};
use crate::executable::ExecutableNode;
use dipeo_domain::NodeData;
use std::path::Path;

pub fn resolve_prompts(nodes: &mut [ExecutableNode], base_path: &Path) -> Result<()> {
    for node in nodes.iter_mut() {
        let NodeData::PersonJob(data) = &mut node.data else {
            continue;
        };
        let Some(prompt_file) = data.prompt_file.clone() else {
            continue;
        };

        let path = base_path.join(&prompt_file);
        let content = std::fs::read_to_string(&path).map_err(|source| CompileError::PromptFile {
            path: path.display().to_string(),
            source,
        })?;

        tracing::debug!(node = %node.id, file = %path.display(), "resolved prompt file");
        if data.default_prompt.is_none() {
            data.resolved_prompt = Some(content.clone());
        }
        if data.first_only_prompt.is_none() && data.resolved_first_prompt.is_none() {
            data.resolved_first_prompt = Some(content);
        }
    }
    Ok(())
}

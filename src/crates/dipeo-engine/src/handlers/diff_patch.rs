//! `diff_patch` handler: apply a unified diff to a file.
//!
//! Hunks are applied with exact context matching first, then a
//! whitespace-normalized fallback. `backup` writes a `.bak` copy of the
//! original; `dry_run` reports what would change without writing.

use super::expect_data;
use crate::error::{EngineError, Result};
use crate::handler::NodeHandler;
use crate::keys::FILESYSTEM_ADAPTER;
use crate::request::ExecutionRequest;
use async_trait::async_trait;
use dipeo_domain::{NodeData, NodeType};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

pub struct DiffPatchHandler;

#[derive(Debug, Clone)]
struct Hunk {
    /// 1-based start line in the original file, from the `@@` header.
    old_start: usize,
    /// Lines removed (context ` ` and deletions `-`), without prefixes.
    old_lines: Vec<String>,
    /// Lines of the result (context ` ` and additions `+`), without prefixes.
    new_lines: Vec<String>,
}

fn parse_unified_diff(diff: &str) -> Result<Vec<Hunk>> {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in diff.lines() {
        if line.starts_with("--- ") || line.starts_with("+++ ") {
            continue;
        }
        if let Some(header) = line.strip_prefix("@@") {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            // "@@ -old_start,old_count +new_start,new_count @@"
            let old_part = header
                .split_whitespace()
                .find(|p| p.starts_with('-'))
                .ok_or_else(|| {
                    EngineError::service(format!("malformed hunk header '{line}'"), false)
                })?;
            let old_start: usize = old_part[1..]
                .split(',')
                .next()
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| {
                    EngineError::service(format!("malformed hunk header '{line}'"), false)
                })?;
            current = Some(Hunk {
                old_start,
                old_lines: Vec::new(),
                new_lines: Vec::new(),
            });
            continue;
        }
        let Some(hunk) = current.as_mut() else {
            continue;
        };
        if let Some(content) = line.strip_prefix('-') {
            hunk.old_lines.push(content.to_string());
        } else if let Some(content) = line.strip_prefix('+') {
            hunk.new_lines.push(content.to_string());
        } else if let Some(content) = line.strip_prefix(' ') {
            hunk.old_lines.push(content.to_string());
            hunk.new_lines.push(content.to_string());
        } else if line.is_empty() {
            hunk.old_lines.push(String::new());
            hunk.new_lines.push(String::new());
        }
    }
    if let Some(hunk) = current.take() {
        hunks.push(hunk);
    }
    if hunks.is_empty() {
        return Err(EngineError::service("diff contains no hunks", false));
    }
    Ok(hunks)
}

/// Locate `needle` in `haystack`, trying the hinted position first, then
/// an exact scan, then a whitespace-normalized scan.
fn locate(haystack: &[String], needle: &[String], hint: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(hint.min(haystack.len()));
    }
    let matches_at = |at: usize, normalize: bool| -> bool {
        if at + needle.len() > haystack.len() {
            return false;
        }
        needle.iter().enumerate().all(|(i, expected)| {
            let actual = &haystack[at + i];
            if normalize {
                actual.trim() == expected.trim()
            } else {
                actual == expected
            }
        })
    };

    if hint <= haystack.len() && matches_at(hint, false) {
        return Some(hint);
    }
    (0..=haystack.len().saturating_sub(needle.len()))
        .find(|&at| matches_at(at, false))
        .or_else(|| {
            (0..=haystack.len().saturating_sub(needle.len()))
                .find(|&at| matches_at(at, true))
        })
}

fn apply_hunks(content: &str, hunks: &[Hunk]) -> Result<(String, usize)> {
    let mut lines: Vec<String> = content.lines().map(String::from).collect();
    let mut applied = 0;

    for hunk in hunks {
        let hint = hunk.old_start.saturating_sub(1);
        let at = locate(&lines, &hunk.old_lines, hint).ok_or_else(|| {
            EngineError::service(
                format!("hunk at line {} does not match target", hunk.old_start),
                false,
            )
        })?;
        lines.splice(at..at + hunk.old_lines.len(), hunk.new_lines.clone());
        applied += 1;
    }

    let trailing_newline = content.ends_with('\n');
    let mut out = lines.join("\n");
    if trailing_newline {
        out.push('\n');
    }
    Ok((out, applied))
}

#[async_trait]
impl NodeHandler for DiffPatchHandler {
    fn node_type(&self) -> NodeType {
        NodeType::DiffPatch
    }

    fn validate(&self, req: &ExecutionRequest) -> std::result::Result<(), String> {
        if let NodeData::DiffPatch(data) = &req.node.data {
            if data.target_path.is_empty() {
                return Err("diff_patch requires target_path".to_string());
            }
        }
        Ok(())
    }

    async fn run(&self, inputs: Value, req: &ExecutionRequest) -> Result<Value> {
        let data = expect_data!(req, DiffPatch);
        let fs = req.services.resolve(FILESYSTEM_ADAPTER)?;

        // Inline diff wins; otherwise the upstream node supplies it.
        let diff = match &data.diff {
            Some(diff) => diff.clone(),
            None => inputs
                .get("default")
                .and_then(Value::as_str)
                .map(String::from)
                .ok_or_else(|| {
                    EngineError::node_execution(
                        req.node.id.clone(),
                        "diff_patch requires a diff",
                        "validation",
                    )
                })?,
        };

        let target = Path::new(&data.target_path);
        let original = fs.read_to_string(target).await?;
        let hunks = parse_unified_diff(&diff)?;
        let (patched, applied) = apply_hunks(&original, &hunks)?;

        if data.dry_run {
            return Ok(json!({
                "dry_run": true,
                "applied_hunks": applied,
                "preview": patched,
            }));
        }

        if data.backup {
            let backup_path = PathBuf::from(format!("{}.bak", data.target_path));
            fs.write(&backup_path, original.as_bytes()).await?;
        }
        fs.write(target, patched.as_bytes()).await?;
        Ok(json!({
            "applied_hunks": applied,
            "target": data.target_path,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mock::MemoryFileSystem;
    use crate::ports::FileSystem;
    use crate::testing::request_with_services;
    use dipeo_domain::DiffPatchData;
    use std::sync::Arc;

    const ORIGINAL: &str = "alpha\nbeta\ngamma\n";
    const DIFF: &str = "--- a/f.txt\n+++ b/f.txt\n@@ -1,3 +1,3 @@\n alpha\n-beta\n+BETA\n gamma\n";

    fn patch_node(fs: Arc<MemoryFileSystem>, data: DiffPatchData) -> crate::request::ExecutionRequest {
        request_with_services(NodeData::DiffPatch(data), move |services| {
            services.register(FILESYSTEM_ADAPTER, fs as Arc<dyn FileSystem>);
        })
    }

    #[tokio::test]
    async fn test_applies_hunk() {
        let fs = Arc::new(MemoryFileSystem::with_files([("f.txt", ORIGINAL.as_bytes().to_vec())]));
        let req = patch_node(
            fs.clone(),
            DiffPatchData {
                target_path: "f.txt".into(),
                diff: Some(DIFF.into()),
                ..Default::default()
            },
        );
        let out = DiffPatchHandler.run(json!({}), &req).await.unwrap();
        assert_eq!(out["applied_hunks"], 1);
        assert_eq!(fs.contents("f.txt").unwrap(), "alpha\nBETA\ngamma\n");
    }

    #[tokio::test]
    async fn test_backup_written() {
        let fs = Arc::new(MemoryFileSystem::with_files([("f.txt", ORIGINAL.as_bytes().to_vec())]));
        let req = patch_node(
            fs.clone(),
            DiffPatchData {
                target_path: "f.txt".into(),
                diff: Some(DIFF.into()),
                backup: true,
                ..Default::default()
            },
        );
        DiffPatchHandler.run(json!({}), &req).await.unwrap();
        assert_eq!(fs.contents("f.txt.bak").unwrap(), ORIGINAL);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_file_untouched() {
        let fs = Arc::new(MemoryFileSystem::with_files([("f.txt", ORIGINAL.as_bytes().to_vec())]));
        let req = patch_node(
            fs.clone(),
            DiffPatchData {
                target_path: "f.txt".into(),
                diff: Some(DIFF.into()),
                dry_run: true,
                ..Default::default()
            },
        );
        let out = DiffPatchHandler.run(json!({}), &req).await.unwrap();
        assert_eq!(out["dry_run"], true);
        assert!(out["preview"].as_str().unwrap().contains("BETA"));
        assert_eq!(fs.contents("f.txt").unwrap(), ORIGINAL);
    }

    #[tokio::test]
    async fn test_fuzzy_whitespace_match() {
        let fs = Arc::new(MemoryFileSystem::with_files([(
            "f.txt",
            b"  alpha\nbeta\ngamma\n".to_vec(),
        )]));
        let req = patch_node(
            fs.clone(),
            DiffPatchData {
                target_path: "f.txt".into(),
                diff: Some(DIFF.into()),
                ..Default::default()
            },
        );
        let out = DiffPatchHandler.run(json!({}), &req).await.unwrap();
        assert_eq!(out["applied_hunks"], 1);
    }

    #[tokio::test]
    async fn test_unmatched_hunk_fails() {
        let fs = Arc::new(MemoryFileSystem::with_files([(
            "f.txt",
            b"entirely different\n".to_vec(),
        )]));
        let req = patch_node(
            fs,
            DiffPatchData {
                target_path: "f.txt".into(),
                diff: Some(DIFF.into()),
                ..Default::default()
            },
        );
        let err = DiffPatchHandler.run(json!({}), &req).await.unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }
}

//! `db` handler: file-backed reads and writes through the filesystem
//! port. "Database" here is DiPeO's lightweight notion: JSON or text
//! files addressed by path, optionally via glob patterns.

use super::expect_data;
use crate::error::{EngineError, Result};
use crate::handler::NodeHandler;
use crate::keys::FILESYSTEM_ADAPTER;
use crate::ports::FileSystem;
use crate::request::ExecutionRequest;
use async_trait::async_trait;
use dipeo_domain::{DbData, DbOperation, NodeType};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;

pub struct DbHandler;

impl DbHandler {
    fn file_list(data: &DbData, req: &ExecutionRequest) -> Result<Vec<String>> {
        let value = data.file.as_ref().ok_or_else(|| {
            EngineError::node_execution(req.node.id.clone(), "db node requires a file", "validation")
        })?;
        match value {
            Value::String(s) => Ok(vec![s.clone()]),
            Value::Array(items) => Ok(items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()),
            _ => Err(EngineError::node_execution(
                req.node.id.clone(),
                "db file must be a path or list of paths",
                "validation",
            )),
        }
    }

    async fn read_one(
        fs: &Arc<dyn FileSystem>,
        path: &str,
        parse_json: bool,
    ) -> Result<Value> {
        let content = fs.read_to_string(Path::new(path)).await?;
        if parse_json || path.ends_with(".json") {
            if let Ok(parsed) = serde_json::from_str(&content) {
                return Ok(parsed);
            }
        }
        Ok(Value::String(content))
    }

    fn render(inputs: &Value, serialize_json: bool) -> Result<Vec<u8>> {
        let payload = match inputs {
            Value::Object(map) if map.len() == 1 => map.values().next().unwrap(),
            other => other,
        };
        Ok(match payload {
            Value::String(s) if !serialize_json => s.clone().into_bytes(),
            other => serde_json::to_vec_pretty(other)?,
        })
    }
}

#[async_trait]
impl NodeHandler for DbHandler {
    fn node_type(&self) -> NodeType {
        NodeType::Db
    }

    async fn run(&self, inputs: Value, req: &ExecutionRequest) -> Result<Value> {
        let data = expect_data!(req, Db);
        let fs = req.services.resolve(FILESYSTEM_ADAPTER)?;
        let files = Self::file_list(data, req)?;

        match data.operation {
            DbOperation::Read => {
                let mut paths: Vec<String> = Vec::new();
                if data.glob {
                    for pattern in &files {
                        for matched in fs.glob(pattern).await? {
                            paths.push(matched.display().to_string());
                        }
                    }
                } else {
                    paths = files;
                }

                if paths.len() == 1 {
                    return Self::read_one(&fs, &paths[0], data.serialize_json).await;
                }
                let mut out = Map::new();
                for path in paths {
                    let value = Self::read_one(&fs, &path, data.serialize_json).await?;
                    out.insert(path, value);
                }
                Ok(Value::Object(out))
            }
            DbOperation::Write => {
                let path = &files[0];
                fs.write(Path::new(path), &Self::render(&inputs, data.serialize_json)?)
                    .await?;
                Ok(json!({"written": path}))
            }
            DbOperation::Append => {
                let path = &files[0];
                let mut bytes = Self::render(&inputs, data.serialize_json)?;
                bytes.push(b'\n');
                fs.append(Path::new(path), &bytes).await?;
                Ok(json!({"appended": path}))
            }
            DbOperation::Update => {
                let path = &files[0];
                let existing = if fs.exists(Path::new(path)).await {
                    Self::read_one(&fs, path, true).await?
                } else {
                    json!({})
                };
                let mut merged = match existing {
                    Value::Object(map) => map,
                    other => {
                        let mut m = Map::new();
                        m.insert("previous".to_string(), other);
                        m
                    }
                };
                let update = match &inputs {
                    Value::Object(map) if map.len() == 1 => map.values().next().unwrap().clone(),
                    other => other.clone(),
                };
                if let Value::Object(update_map) = update {
                    for (k, v) in update_map {
                        merged.insert(k, v);
                    }
                } else {
                    return Err(EngineError::node_execution(
                        req.node.id.clone(),
                        "db update requires an object input",
                        "validation",
                    ));
                }
                let merged = Value::Object(merged);
                fs.write(Path::new(path), &serde_json::to_vec_pretty(&merged)?)
                    .await?;
                Ok(merged)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mock::MemoryFileSystem;
    use crate::testing::request_with_services;
    use dipeo_domain::NodeData;

    fn db_node(file: Value, operation: DbOperation, serialize_json: bool, glob: bool) -> NodeData {
        NodeData::Db(DbData {
            file: Some(file),
            operation,
            serialize_json,
            glob,
        })
    }

    fn with_fs(
        fs: Arc<MemoryFileSystem>,
        node: NodeData,
    ) -> crate::request::ExecutionRequest {
        request_with_services(node, move |services| {
            services.register(FILESYSTEM_ADAPTER, fs as Arc<dyn FileSystem>);
        })
    }

    #[tokio::test]
    async fn test_read_json_file() {
        let fs = Arc::new(MemoryFileSystem::with_files([(
            "data/config.json",
            br#"{"depth": 3}"#.to_vec(),
        )]));
        let req = with_fs(
            fs,
            db_node(json!("data/config.json"), DbOperation::Read, false, false),
        );
        let out = DbHandler.run(json!({}), &req).await.unwrap();
        assert_eq!(out, json!({"depth": 3}));
    }

    #[tokio::test]
    async fn test_read_glob_keyed_by_path() {
        let fs = Arc::new(MemoryFileSystem::with_files([
            ("logs/a.txt", b"alpha".to_vec()),
            ("logs/b.txt", b"beta".to_vec()),
            ("logs/skip.json", b"{}".to_vec()),
        ]));
        let req = with_fs(
            fs,
            db_node(json!("logs/*.txt"), DbOperation::Read, false, true),
        );
        let out = DbHandler.run(json!({}), &req).await.unwrap();
        assert_eq!(out["logs/a.txt"], json!("alpha"));
        assert_eq!(out["logs/b.txt"], json!("beta"));
        assert!(out.get("logs/skip.json").is_none());
    }

    #[tokio::test]
    async fn test_write_unwraps_single_input() {
        let fs = Arc::new(MemoryFileSystem::default());
        let req = with_fs(
            fs.clone(),
            db_node(json!("out.txt"), DbOperation::Write, false, false),
        );
        DbHandler
            .run(json!({"default": "payload"}), &req)
            .await
            .unwrap();
        assert_eq!(fs.contents("out.txt").unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_update_merges_objects() {
        let fs = Arc::new(MemoryFileSystem::with_files([(
            "state.json",
            br#"{"a": 1}"#.to_vec(),
        )]));
        let req = with_fs(
            fs.clone(),
            db_node(json!("state.json"), DbOperation::Update, true, false),
        );
        let out = DbHandler.run(json!({"b": 2}), &req).await.unwrap();
        assert_eq!(out, json!({"a": 1, "b": 2}));
        assert!(fs.contents("state.json").unwrap().contains("\"b\""));
    }

    #[tokio::test]
    async fn test_missing_file_config_fails() {
        let fs = Arc::new(MemoryFileSystem::default());
        let req = with_fs(
            fs,
            NodeData::Db(DbData {
                file: None,
                ..Default::default()
            }),
        );
        assert!(DbHandler.run(json!({}), &req).await.is_err());
    }
}

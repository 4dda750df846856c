//! Datasource over a directory of JSON files.
//!
//! Each file matching the include globs is one object; its raw id is the
//! path relative to the root, with `/` separators.

use anyhow::{bail, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use indexkit_core::datasource::Datasource;
use indexkit_core::field::FieldType;
use indexkit_core::item::{resolve_property, SourceObject};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::DatasourceConfig;

pub struct JsonDirDatasource {
    id: String,
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    language_property: Option<String>,
    properties: BTreeMap<String, FieldType>,
}

impl JsonDirDatasource {
    pub fn from_config(id: &str, config: &DatasourceConfig) -> Result<Self> {
        let mut excludes = vec!["**/.git/**".to_string()];
        excludes.extend(config.exclude_globs.clone());
        Ok(Self {
            id: id.to_string(),
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
            language_property: config.language_property.clone(),
            properties: config.properties.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn matches(&self, relative: &str) -> bool {
        !self.exclude.is_match(relative) && self.include.is_match(relative)
    }

    /// Every matching raw id, sorted.
    fn scan(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            bail!(
                "Datasource '{}' root does not exist: {}",
                self.id,
                self.root.display()
            );
        }

        let mut ids = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if self.matches(&rel_str) {
                ids.push(rel_str);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Path of a raw id, `None` if the id could not have come from `scan`.
    fn path_of(&self, raw_id: &str) -> Option<PathBuf> {
        let relative = Path::new(raw_id);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !plain || !self.matches(raw_id) {
            return None;
        }
        Some(self.root.join(relative))
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[async_trait]
impl Datasource for JsonDirDatasource {
    fn id(&self) -> &str {
        &self.id
    }

    fn property_definitions(&self) -> BTreeMap<String, FieldType> {
        self.properties.clone()
    }

    async fn load_multiple(
        &self,
        raw_ids: &[String],
    ) -> Result<BTreeMap<String, Arc<dyn SourceObject>>> {
        let mut loaded = BTreeMap::new();
        for raw_id in raw_ids {
            let Some(path) = self.path_of(raw_id) else {
                continue;
            };
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_str::<Json>(&content) {
                Ok(object) => {
                    loaded.insert(raw_id.clone(), Arc::new(object) as Arc<dyn SourceObject>);
                }
                Err(e) => {
                    warn!(datasource = %self.id, item = %raw_id, error = %e, "invalid JSON, skipping");
                }
            }
        }
        Ok(loaded)
    }

    async fn get_item_ids(
        &self,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<Vec<String>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|id| cursor.map_or(true, |c| id.as_str() > c))
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    fn item_language(&self, object: &dyn SourceObject) -> Option<String> {
        let property = self.language_property.as_deref()?;
        match resolve_property(object, property) {
            Json::String(lang) if !lang.is_empty() => Some(lang),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn datasource(root: &Path) -> JsonDirDatasource {
        let config = DatasourceConfig {
            kind: "json".into(),
            root: root.to_path_buf(),
            include_globs: vec!["**/*.json".into()],
            exclude_globs: vec!["drafts/**".into()],
            language_property: Some("lang".into()),
            properties: BTreeMap::new(),
        };
        JsonDirDatasource::from_config("docs", &config).unwrap()
    }

    fn setup() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("guides")).unwrap();
        std::fs::create_dir_all(root.join("drafts")).unwrap();
        std::fs::write(root.join("b.json"), r#"{"title": "B", "lang": "en"}"#).unwrap();
        std::fs::write(root.join("guides/a.json"), r#"{"title": "A"}"#).unwrap();
        std::fs::write(root.join("drafts/x.json"), r#"{"title": "X"}"#).unwrap();
        std::fs::write(root.join("notes.txt"), "not json").unwrap();
        std::fs::write(root.join("broken.json"), "{").unwrap();
        tmp
    }

    #[tokio::test]
    async fn ids_are_sorted_relative_paths() {
        let tmp = setup();
        let ds = datasource(tmp.path());

        let ids = ds.get_item_ids(None, None).await.unwrap();
        assert_eq!(ids, vec!["b.json", "broken.json", "guides/a.json"]);

        let page = ds.get_item_ids(Some(1), Some("b.json")).await.unwrap();
        assert_eq!(page, vec!["broken.json"]);
    }

    #[tokio::test]
    async fn missing_broken_and_foreign_ids_are_left_out() {
        let tmp = setup();
        let ds = datasource(tmp.path());

        let ids: Vec<String> = ["b.json", "broken.json", "gone.json", "../b.json", "drafts/x.json"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let loaded = ds.load_multiple(&ids).await.unwrap();
        assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["b.json"]);

        let object = &loaded["b.json"];
        assert_eq!(ds.item_language(object.as_ref()).as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let ds = datasource(&tmp.path().join("nope"));
        assert!(ds.get_item_ids(None, None).await.is_err());
    }
}

//! 分区集目录
//!
//! 分区集在加载时校验其分区定义，加载后不可变。目录按 `(仓库名, 分区集名)` 查找。

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use partition_core::{tags, PartitionError, PartitionResult, PartitionSetOrigin};

use crate::definitions::PartitionDefinition;
use crate::key_space::PartitionKeySpace;
use crate::partition_key::{MultiPartitionKey, PartitionKey};

fn default_mode() -> String {
    "default".to_string()
}

/// A partition definition bound to a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionSet {
    pub origin: PartitionSetOrigin,
    pub job_name: String,
    pub op_selection: Option<Vec<String>>,
    pub mode: String,
    pub definition: PartitionDefinition,
}

impl PartitionSet {
    pub fn new(
        origin: PartitionSetOrigin,
        job_name: impl Into<String>,
        definition: PartitionDefinition,
    ) -> PartitionResult<Self> {
        definition.validate(&origin.partition_set_name)?;
        Ok(Self {
            origin,
            job_name: job_name.into(),
            op_selection: None,
            mode: default_mode(),
            definition,
        })
    }

    pub fn name(&self) -> &str {
        &self.origin.partition_set_name
    }

    pub fn id(&self) -> String {
        self.origin.origin_id()
    }

    pub fn key_space(&self) -> PartitionKeySpace<'_> {
        PartitionKeySpace::new(&self.definition, self.name())
    }

    /// Parses an encoded key into this set's key shape.
    pub fn parse_key(&self, encoded: &str) -> PartitionResult<PartitionKey> {
        match &self.definition {
            PartitionDefinition::Multi(multi) => Ok(PartitionKey::Multi(MultiPartitionKey::parse(
                encoded,
                &multi.dimension_names(),
            )?)),
            _ => Ok(PartitionKey::single(encoded)),
        }
    }

    /// Tags a run for `key` must carry to be attributed to this partition.
    pub fn partition_tags(&self, key: &PartitionKey) -> BTreeMap<String, String> {
        let mut result = BTreeMap::new();
        result.insert(tags::PARTITION_SET_TAG.to_string(), self.name().to_string());
        result.insert(tags::PARTITION_NAME_TAG.to_string(), key.encode());
        if let PartitionKey::Multi(multi) = key {
            for (dimension, value) in multi.dimensions() {
                result.insert(tags::dimension_tag(dimension), value.to_string());
            }
        }
        result
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    location_name: String,
    repository_name: String,
    #[serde(default)]
    partition_sets: Vec<PartitionSetEntry>,
}

#[derive(Debug, Deserialize)]
struct PartitionSetEntry {
    name: String,
    job_name: String,
    #[serde(default)]
    op_selection: Option<Vec<String>>,
    #[serde(default = "default_mode")]
    mode: String,
    definition: PartitionDefinition,
}

/// All partition sets known to the engine.
#[derive(Debug, Default, Clone)]
pub struct PartitionSetCatalog {
    sets: HashMap<(String, String), Arc<PartitionSet>>,
}

impl PartitionSetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog file (TOML).
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("读取分区集定义文件失败: {}", path.display()))?;
        let catalog = Self::from_toml(&text)
            .with_context(|| format!("解析分区集定义文件失败: {}", path.display()))?;
        info!(path = %path.display(), partition_sets = catalog.len(), "Loaded partition set catalog");
        Ok(catalog)
    }

    pub fn from_toml(text: &str) -> PartitionResult<Self> {
        let file: CatalogFile = toml::from_str(text)
            .map_err(|e| PartitionError::Configuration(format!("分区集定义格式错误: {e}")))?;

        let mut catalog = Self::new();
        for entry in file.partition_sets {
            let origin = PartitionSetOrigin::new(&file.location_name, &file.repository_name, &entry.name);
            let mut set = PartitionSet::new(origin, entry.job_name, entry.definition)?;
            set.op_selection = entry.op_selection;
            set.mode = entry.mode;
            catalog.insert(set)?;
        }
        Ok(catalog)
    }

    /// Names are unique per repository.
    pub fn insert(&mut self, set: PartitionSet) -> PartitionResult<()> {
        let key = (
            set.origin.repository_name.clone(),
            set.origin.partition_set_name.clone(),
        );
        if self.sets.contains_key(&key) {
            return Err(PartitionError::Configuration(format!(
                "分区集重复定义: {}/{}",
                key.0, key.1
            )));
        }
        self.sets.insert(key, Arc::new(set));
        Ok(())
    }

    pub fn get(&self, repository: &str, name: &str) -> PartitionResult<Arc<PartitionSet>> {
        self.sets
            .get(&(repository.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| PartitionError::PartitionSetNotFound {
                repository: repository.to_string(),
                name: name.to_string(),
            })
    }

    /// Sorted by name.
    pub fn list(&self, repository: &str) -> Vec<Arc<PartitionSet>> {
        let mut sets: Vec<Arc<PartitionSet>> = self
            .sets
            .iter()
            .filter(|((repo, _), _)| repo == repository)
            .map(|(_, set)| set.clone())
            .collect();
        sets.sort_by(|a, b| a.name().cmp(b.name()));
        sets
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

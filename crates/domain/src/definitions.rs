use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use partition_core::{PartitionError, PartitionResult};

use crate::partition_key::{check_dimension_value, MULTI_PARTITION_KEY_DELIMITER};
use crate::time_window::TimeWindowPartitions;

/// Dimension name reported for single-dimension definitions.
pub const DEFAULT_DIMENSION_NAME: &str = "default";

/// 分区定义
///
/// Closed set of partitioning schemes. Every consumer matches exhaustively, so a new
/// scheme is a compile error at each enumeration, status and serialization site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionDefinition {
    Static(StaticPartitions),
    TimeWindow(TimeWindowPartitions),
    Dynamic(DynamicPartitions),
    Multi(MultiPartitions),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticPartitions {
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicPartitions {
    /// Name under which the keys live in the dynamic partition registry.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiPartitions {
    pub dimensions: Vec<PartitionDimension>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionDimension {
    pub name: String,
    #[serde(default)]
    pub primary: bool,
    pub definition: PartitionDefinition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitionDefinitionType {
    TimeWindow,
    Static,
    Multipartitioned,
    Dynamic,
}

impl fmt::Display for PartitionDefinitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PartitionDefinitionType::TimeWindow => "TIME_WINDOW",
            PartitionDefinitionType::Static => "STATIC",
            PartitionDefinitionType::Multipartitioned => "MULTIPARTITIONED",
            PartitionDefinitionType::Dynamic => "DYNAMIC",
        };
        f.write_str(name)
    }
}

/// Per-dimension metadata for the query layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionDefinitionType {
    pub name: String,
    pub description: String,
    pub definition_type: PartitionDefinitionType,
    pub is_primary_dimension: bool,
    pub dynamic_partitions_definition_name: Option<String>,
}

impl StaticPartitions {
    pub fn new<S: Into<String>>(keys: impl IntoIterator<Item = S>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl DynamicPartitions {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl PartitionDimension {
    pub fn new(name: impl Into<String>, definition: PartitionDefinition) -> Self {
        Self {
            name: name.into(),
            primary: false,
            definition,
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }
}

impl MultiPartitions {
    pub fn new(dimensions: Vec<PartitionDimension>) -> Self {
        Self { dimensions }
    }

    /// The single dimension marked primary.
    pub fn primary_dimension(&self, label: &str) -> PartitionResult<&PartitionDimension> {
        let mut primaries = self.dimensions.iter().filter(|d| d.primary);
        match (primaries.next(), primaries.next()) {
            (Some(primary), None) => Ok(primary),
            (None, _) => Err(PartitionError::invalid_definition(label, "多维分区定义缺少主维度")),
            (Some(_), Some(_)) => Err(PartitionError::invalid_definition(
                label,
                "多维分区定义只能有一个主维度",
            )),
        }
    }

    pub fn dimension_names(&self) -> Vec<&str> {
        self.dimensions.iter().map(|d| d.name.as_str()).collect()
    }

    fn validate(&self, label: &str) -> PartitionResult<()> {
        if self.dimensions.is_empty() {
            return Err(PartitionError::invalid_definition(label, "多维分区定义至少需要一个维度"));
        }

        let mut seen = HashSet::new();
        for dimension in &self.dimensions {
            if dimension.name.trim().is_empty() {
                return Err(PartitionError::invalid_definition(label, "维度名称不能为空"));
            }
            if dimension.name.contains(MULTI_PARTITION_KEY_DELIMITER) {
                return Err(PartitionError::invalid_definition(
                    label,
                    format!("维度名称 '{}' 包含保留分隔符", dimension.name),
                ));
            }
            if !seen.insert(dimension.name.as_str()) {
                return Err(PartitionError::invalid_definition(
                    label,
                    format!("维度名称重复: {}", dimension.name),
                ));
            }
            match &dimension.definition {
                PartitionDefinition::Multi(_) => {
                    return Err(PartitionError::invalid_definition(
                        label,
                        format!("维度 '{}' 不能嵌套多维分区定义", dimension.name),
                    ));
                }
                PartitionDefinition::Static(statics) => {
                    for key in &statics.keys {
                        check_dimension_value(&dimension.name, key)?;
                    }
                }
                PartitionDefinition::TimeWindow(window) => {
                    if window.key_format().contains(MULTI_PARTITION_KEY_DELIMITER) {
                        return Err(PartitionError::invalid_definition(
                            label,
                            format!("维度 '{}' 的分区键格式包含保留分隔符", dimension.name),
                        ));
                    }
                }
                PartitionDefinition::Dynamic(_) => {}
            }
            dimension.definition.validate(&dimension.name)?;
        }

        self.primary_dimension(label)?;
        Ok(())
    }
}

impl PartitionDefinition {
    pub fn definition_type(&self) -> PartitionDefinitionType {
        match self {
            PartitionDefinition::Static(_) => PartitionDefinitionType::Static,
            PartitionDefinition::TimeWindow(_) => PartitionDefinitionType::TimeWindow,
            PartitionDefinition::Dynamic(_) => PartitionDefinitionType::Dynamic,
            PartitionDefinition::Multi(_) => PartitionDefinitionType::Multipartitioned,
        }
    }

    /// Structural checks that do not need the registry or a clock.
    pub fn validate(&self, label: &str) -> PartitionResult<()> {
        match self {
            PartitionDefinition::Static(statics) => {
                let mut seen = HashSet::new();
                for key in &statics.keys {
                    if key.is_empty() {
                        return Err(PartitionError::invalid_definition(label, "静态分区键不能为空"));
                    }
                    if !seen.insert(key.as_str()) {
                        return Err(PartitionError::invalid_definition(
                            label,
                            format!("静态分区键重复: {key}"),
                        ));
                    }
                }
                Ok(())
            }
            PartitionDefinition::TimeWindow(window) => window.validate(label),
            PartitionDefinition::Dynamic(dynamic) => {
                if dynamic.name.trim().is_empty() {
                    return Err(PartitionError::invalid_definition(label, "动态分区定义名称不能为空"));
                }
                Ok(())
            }
            PartitionDefinition::Multi(multi) => multi.validate(label),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            PartitionDefinition::Static(statics) => statics
                .keys
                .iter()
                .map(|k| format!("'{k}'"))
                .collect::<Vec<_>>()
                .join(", "),
            PartitionDefinition::TimeWindow(window) => window.description(),
            PartitionDefinition::Dynamic(dynamic) => {
                format!("Dynamic partitions definition '{}'", dynamic.name)
            }
            PartitionDefinition::Multi(multi) => {
                let dimensions = multi
                    .dimensions
                    .iter()
                    .map(|d| format!("{}: {}", d.name, d.definition.describe()))
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("Multi-partitioned, with dimensions: {dimensions}")
            }
        }
    }

    pub fn dimension_types(&self) -> Vec<DimensionDefinitionType> {
        match self {
            PartitionDefinition::Multi(multi) => multi
                .dimensions
                .iter()
                .map(|d| DimensionDefinitionType {
                    name: d.name.clone(),
                    description: d.definition.describe(),
                    definition_type: d.definition.definition_type(),
                    is_primary_dimension: d.primary,
                    dynamic_partitions_definition_name: d.definition.dynamic_name().map(str::to_string),
                })
                .collect(),
            single => vec![DimensionDefinitionType {
                name: DEFAULT_DIMENSION_NAME.to_string(),
                description: single.describe(),
                definition_type: single.definition_type(),
                is_primary_dimension: true,
                dynamic_partitions_definition_name: single.dynamic_name().map(str::to_string),
            }],
        }
    }

    pub fn dynamic_name(&self) -> Option<&str> {
        match self {
            PartitionDefinition::Dynamic(dynamic) => Some(&dynamic.name),
            _ => None,
        }
    }

    /// Every dynamic definition this definition reads from, in declaration order.
    pub fn dynamic_definition_names(&self) -> Vec<&str> {
        match self {
            PartitionDefinition::Dynamic(dynamic) => vec![dynamic.name.as_str()],
            PartitionDefinition::Multi(multi) => multi
                .dimensions
                .iter()
                .flat_map(|d| d.definition.dynamic_definition_names())
                .collect(),
            PartitionDefinition::Static(_) | PartitionDefinition::TimeWindow(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn colors() -> PartitionDefinition {
        PartitionDefinition::Static(StaticPartitions::new(["red", "green"]))
    }

    fn daily() -> PartitionDefinition {
        PartitionDefinition::TimeWindow(TimeWindowPartitions::daily(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            "UTC",
        ))
    }

    #[test]
    fn test_multi_requires_exactly_one_primary() {
        let none = PartitionDefinition::Multi(MultiPartitions::new(vec![
            PartitionDimension::new("date", daily()),
            PartitionDimension::new("color", colors()),
        ]));
        assert!(matches!(
            none.validate("multi"),
            Err(PartitionError::InvalidPartitionDefinition { .. })
        ));

        let two = PartitionDefinition::Multi(MultiPartitions::new(vec![
            PartitionDimension::new("date", daily()).primary(),
            PartitionDimension::new("color", colors()).primary(),
        ]));
        assert!(two.validate("multi").is_err());

        let one = PartitionDefinition::Multi(MultiPartitions::new(vec![
            PartitionDimension::new("date", daily()).primary(),
            PartitionDimension::new("color", colors()),
        ]));
        assert!(one.validate("multi").is_ok());
    }

    #[test]
    fn test_multi_rejects_duplicate_names_and_separator_keys() {
        let duplicate = PartitionDefinition::Multi(MultiPartitions::new(vec![
            PartitionDimension::new("color", colors()).primary(),
            PartitionDimension::new("color", colors()),
        ]));
        assert!(duplicate.validate("multi").is_err());

        let separator = PartitionDefinition::Multi(MultiPartitions::new(vec![
            PartitionDimension::new("date", daily()).primary(),
            PartitionDimension::new(
                "region",
                PartitionDefinition::Static(StaticPartitions::new(["eu|west"])),
            ),
        ]));
        assert!(separator.validate("multi").is_err());
    }

    #[test]
    fn test_static_duplicate_keys_rejected() {
        let def = PartitionDefinition::Static(StaticPartitions::new(["a", "b", "a"]));
        assert!(def.validate("letters").is_err());
    }

    #[test]
    fn test_dimension_types() {
        let single = PartitionDefinition::Dynamic(DynamicPartitions::new("customers"));
        let types = single.dimension_types();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].name, DEFAULT_DIMENSION_NAME);
        assert!(types[0].is_primary_dimension);
        assert_eq!(
            types[0].dynamic_partitions_definition_name.as_deref(),
            Some("customers")
        );

        let multi = PartitionDefinition::Multi(MultiPartitions::new(vec![
            PartitionDimension::new("date", daily()).primary(),
            PartitionDimension::new(
                "customer",
                PartitionDefinition::Dynamic(DynamicPartitions::new("customers")),
            ),
        ]));
        let types = multi.dimension_types();
        assert_eq!(multi.definition_type(), PartitionDefinitionType::Multipartitioned);
        assert_eq!(types[0].definition_type, PartitionDefinitionType::TimeWindow);
        assert!(types[0].is_primary_dimension);
        assert!(!types[1].is_primary_dimension);
        assert_eq!(multi.dynamic_definition_names(), vec!["customers"]);
    }

    #[test]
    fn test_deserialize_tagged_definition() {
        let def: PartitionDefinition = toml::from_str(
            r#"
            type = "multi"

            [[dimensions]]
            name = "date"
            primary = true
            [dimensions.definition]
            type = "time_window"
            start = "2024-03-01"
            schedule = "daily"

            [[dimensions]]
            name = "color"
            [dimensions.definition]
            type = "static"
            keys = ["red", "green"]
            "#,
        )
        .unwrap();
        assert!(def.validate("multi").is_ok());
        assert_eq!(def.describe(), "Multi-partitioned, with dimensions: date: Daily, starting 2024-03-01 UTC.; color: 'red', 'green'");
    }
}

use std::fmt;

use serde::{Serialize, Serializer};

use partition_core::{PartitionError, PartitionResult};

/// Reserved separator between dimension values of a multi-dimensional key.
/// No single-dimension key may contain it.
pub const MULTI_PARTITION_KEY_DELIMITER: &str = "|";

pub(crate) fn check_dimension_value(label: &str, value: &str) -> PartitionResult<()> {
    if value.is_empty() {
        return Err(PartitionError::invalid_definition(label, "分区键不能为空"));
    }
    if value.contains(MULTI_PARTITION_KEY_DELIMITER) {
        return Err(PartitionError::invalid_definition(
            label,
            format!("分区键 '{value}' 包含保留分隔符 '{MULTI_PARTITION_KEY_DELIMITER}'"),
        ));
    }
    Ok(())
}

/// Key of a multi-dimensional partition: one value per dimension, in dimension declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MultiPartitionKey {
    dimensions: Vec<(String, String)>,
}

impl MultiPartitionKey {
    pub fn new<N, V>(dimensions: impl IntoIterator<Item = (N, V)>) -> PartitionResult<Self>
    where
        N: Into<String>,
        V: Into<String>,
    {
        let dimensions: Vec<(String, String)> = dimensions
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();

        if dimensions.is_empty() {
            return Err(PartitionError::invalid_definition(
                "multi_partition_key",
                "多维分区键至少需要一个维度",
            ));
        }
        for (i, (name, value)) in dimensions.iter().enumerate() {
            if dimensions[..i].iter().any(|(other, _)| other == name) {
                return Err(PartitionError::invalid_definition(
                    name.as_str(),
                    "多维分区键中维度名称重复",
                ));
            }
            check_dimension_value(name, value)?;
        }

        Ok(Self { dimensions })
    }

    /// Splits an encoded key back into its dimensions.
    pub fn parse(encoded: &str, dimension_names: &[&str]) -> PartitionResult<Self> {
        let values: Vec<&str> = encoded.split(MULTI_PARTITION_KEY_DELIMITER).collect();
        if values.len() != dimension_names.len() {
            return Err(PartitionError::invalid_definition(
                "multi_partition_key",
                format!(
                    "分区键 '{encoded}' 有 {} 个维度值，期望 {} 个",
                    values.len(),
                    dimension_names.len()
                ),
            ));
        }
        Self::new(dimension_names.iter().copied().zip(values))
    }

    pub fn get(&self, dimension: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|(name, _)| name == dimension)
            .map(|(_, value)| value.as_str())
    }

    pub fn dimensions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dimensions
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn encode(&self) -> String {
        self.dimensions
            .iter()
            .map(|(_, value)| value.as_str())
            .collect::<Vec<_>>()
            .join(MULTI_PARTITION_KEY_DELIMITER)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartitionKey {
    Single(String),
    Multi(MultiPartitionKey),
}

impl PartitionKey {
    pub fn single(key: impl Into<String>) -> Self {
        PartitionKey::Single(key.into())
    }

    /// The string form used in run tags and by the query layer.
    pub fn encode(&self) -> String {
        match self {
            PartitionKey::Single(key) => key.clone(),
            PartitionKey::Multi(key) => key.encode(),
        }
    }

    pub fn as_multi(&self) -> Option<&MultiPartitionKey> {
        match self {
            PartitionKey::Multi(key) => Some(key),
            PartitionKey::Single(_) => None,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Single(key) => f.write_str(key),
            PartitionKey::Multi(key) => f.write_str(&key.encode()),
        }
    }
}

impl Serialize for PartitionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_key_encodes_in_dimension_order() {
        let key = MultiPartitionKey::new([("date", "2024-03-01"), ("region", "eu")]).unwrap();
        assert_eq!(key.encode(), "2024-03-01|eu");
        assert_eq!(key.get("region"), Some("eu"));
        assert_eq!(key.get("color"), None);
    }

    #[test]
    fn test_separator_collision_rejected() {
        let err = MultiPartitionKey::new([("region", "eu|west")]).unwrap_err();
        assert!(matches!(err, PartitionError::InvalidPartitionDefinition { .. }));
    }

    #[test]
    fn test_duplicate_dimension_rejected() {
        assert!(MultiPartitionKey::new([("a", "1"), ("a", "2")]).is_err());
    }

    #[test]
    fn test_parse_checks_dimension_count() {
        let key = MultiPartitionKey::parse("2024-03-01|eu", &["date", "region"]).unwrap();
        assert_eq!(key.get("date"), Some("2024-03-01"));
        assert!(MultiPartitionKey::parse("2024-03-01", &["date", "region"]).is_err());
        assert!(MultiPartitionKey::parse("a||b", &["x", "y"]).is_err());
    }

    #[test]
    fn test_partition_key_serializes_as_string() {
        let key = PartitionKey::Multi(MultiPartitionKey::new([("a", "1"), ("b", "2")]).unwrap());
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"1|2\"");
        assert_eq!(PartitionKey::single("x").to_string(), "x");
    }
}

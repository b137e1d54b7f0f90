//! 分区键空间
//!
//! 给定分区定义与快照令牌，枚举该定义表示的有序分区键序列。枚举是纯函数：
//! 同一令牌多次枚举得到完全相同的序列。令牌固定了"当前时间"和动态分区注册表
//! 的内容，调用方可以显式传入令牌复用同一快照，或者每次调用重新获取。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use partition_core::{Clock, DynamicPartitionsState, PartitionError, PartitionResult};

use crate::definitions::{PartitionDefinition, PartitionDimension};
use crate::dynamic_registry::DynamicPartitionRegistry;
use crate::partition_key::{check_dimension_value, MultiPartitionKey, PartitionKey};

/// Everything enumeration depends on besides the definition itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotToken {
    pub evaluated_at: DateTime<Utc>,
    pub dynamic_partitions: DynamicPartitionsState,
}

impl SnapshotToken {
    pub fn new(evaluated_at: DateTime<Utc>) -> Self {
        Self {
            evaluated_at,
            dynamic_partitions: DynamicPartitionsState::new(),
        }
    }

    pub fn with_dynamic_partitions(mut self, definition: impl Into<String>, keys: Vec<String>) -> Self {
        self.dynamic_partitions.insert(definition, keys);
        self
    }
}

/// Dimension name paired with that dimension's own key sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionPartitionKeys {
    pub name: String,
    pub partition_keys: Vec<String>,
}

pub struct PartitionKeySpace<'a> {
    definition: &'a PartitionDefinition,
    label: &'a str,
}

impl<'a> PartitionKeySpace<'a> {
    /// `label` names the definition in error messages, typically the partition set name.
    pub fn new(definition: &'a PartitionDefinition, label: &'a str) -> Self {
        Self { definition, label }
    }

    /// Captures the clock and every dynamic definition this key space reads.
    #[instrument(skip(self, clock, registry), fields(definition = %self.label))]
    pub async fn snapshot(
        &self,
        clock: &dyn Clock,
        registry: &DynamicPartitionRegistry,
    ) -> PartitionResult<SnapshotToken> {
        let mut token = SnapshotToken::new(clock.now());
        for name in self.definition.dynamic_definition_names() {
            if token.dynamic_partitions.contains_definition(name) {
                continue;
            }
            let keys = registry.list_keys(name).await?;
            token.dynamic_partitions.insert(name, keys);
        }
        Ok(token)
    }

    /// Keys as of `as_of`, or as of a freshly captured snapshot.
    pub async fn keys(
        &self,
        as_of: Option<&SnapshotToken>,
        clock: &dyn Clock,
        registry: &DynamicPartitionRegistry,
    ) -> PartitionResult<Vec<PartitionKey>> {
        match as_of {
            Some(token) => self.keys_at(token),
            None => {
                let token = self.snapshot(clock, registry).await?;
                self.keys_at(&token)
            }
        }
    }

    pub fn keys_at(&self, token: &SnapshotToken) -> PartitionResult<Vec<PartitionKey>> {
        match self.definition {
            PartitionDefinition::Multi(multi) => {
                let primary = multi.primary_dimension(self.label)?;
                // Primary dimension first so it varies slowest.
                let ordered: Vec<&PartitionDimension> = std::iter::once(primary)
                    .chain(multi.dimensions.iter().filter(|d| d.name != primary.name))
                    .collect();

                let mut per_dimension = Vec::with_capacity(ordered.len());
                for dimension in &ordered {
                    let keys = single_dimension_keys(&dimension.definition, &dimension.name, token)?;
                    for key in &keys {
                        check_dimension_value(&dimension.name, key)?;
                    }
                    per_dimension.push(keys);
                }

                let declared: Vec<&str> = multi.dimensions.iter().map(|d| d.name.as_str()).collect();
                let mut result = Vec::with_capacity(per_dimension.iter().map(Vec::len).product());
                for combination in cartesian_product(&per_dimension) {
                    let values = declared.iter().map(|name| {
                        let position = ordered
                            .iter()
                            .position(|d| d.name == *name)
                            .unwrap_or_default();
                        (*name, combination[position])
                    });
                    result.push(PartitionKey::Multi(MultiPartitionKey::new(values)?));
                }
                Ok(result)
            }
            single => Ok(single_dimension_keys(single, self.label, token)?
                .into_iter()
                .map(PartitionKey::Single)
                .collect()),
        }
    }

    /// String form of every key, as stored in run tags.
    pub fn encoded_keys_at(&self, token: &SnapshotToken) -> PartitionResult<Vec<String>> {
        Ok(self
            .keys_at(token)?
            .iter()
            .map(PartitionKey::encode)
            .collect())
    }

    pub fn dimension_keys_at(&self, token: &SnapshotToken) -> PartitionResult<Vec<DimensionPartitionKeys>> {
        match self.definition {
            PartitionDefinition::Multi(multi) => multi
                .dimensions
                .iter()
                .map(|d| {
                    Ok(DimensionPartitionKeys {
                        name: d.name.clone(),
                        partition_keys: single_dimension_keys(&d.definition, &d.name, token)?,
                    })
                })
                .collect(),
            single => Ok(vec![DimensionPartitionKeys {
                name: crate::definitions::DEFAULT_DIMENSION_NAME.to_string(),
                partition_keys: single_dimension_keys(single, self.label, token)?,
            }]),
        }
    }
}

fn single_dimension_keys(
    definition: &PartitionDefinition,
    label: &str,
    token: &SnapshotToken,
) -> PartitionResult<Vec<String>> {
    match definition {
        PartitionDefinition::Static(statics) => Ok(statics.keys.clone()),
        PartitionDefinition::TimeWindow(window) => window.keys(label, token.evaluated_at),
        PartitionDefinition::Dynamic(dynamic) => token
            .dynamic_partitions
            .keys(&dynamic.name)
            .map(<[String]>::to_vec)
            .ok_or_else(|| PartitionError::ExternalLookup {
                definition: dynamic.name.clone(),
            }),
        PartitionDefinition::Multi(_) => Err(PartitionError::invalid_definition(
            label,
            "多维分区定义不能作为单个维度",
        )),
    }
}

/// Row-major product: the last sequence varies fastest.
fn cartesian_product(sequences: &[Vec<String>]) -> Vec<Vec<&str>> {
    let mut rows: Vec<Vec<&str>> = vec![Vec::new()];
    for sequence in sequences {
        let mut next = Vec::with_capacity(rows.len() * sequence.len());
        for row in &rows {
            for value in sequence {
                let mut extended = row.clone();
                extended.push(value.as_str());
                next.push(extended);
            }
        }
        rows = next;
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{DynamicPartitions, MultiPartitions, StaticPartitions};
    use crate::time_window::TimeWindowPartitions;
    use chrono::{NaiveDate, TimeZone};

    fn token() -> SnapshotToken {
        SnapshotToken::new(Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap())
            .with_dynamic_partitions("customers", vec!["acme".to_string(), "globex".to_string()])
    }

    fn multi() -> PartitionDefinition {
        PartitionDefinition::Multi(MultiPartitions::new(vec![
            PartitionDimension::new(
                "color",
                PartitionDefinition::Static(StaticPartitions::new(["red", "green", "blue"])),
            ),
            PartitionDimension::new(
                "date",
                PartitionDefinition::TimeWindow(TimeWindowPartitions::daily(
                    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                    "UTC",
                )),
            )
            .primary(),
        ]))
    }

    #[test]
    fn test_keys_are_deterministic_for_a_token() {
        let def = multi();
        let space = PartitionKeySpace::new(&def, "multi");
        let token = token();
        assert_eq!(space.keys_at(&token).unwrap(), space.keys_at(&token).unwrap());
    }

    #[test]
    fn test_multi_product_with_primary_outermost() {
        let def = multi();
        let space = PartitionKeySpace::new(&def, "multi");
        let keys = space.keys_at(&token()).unwrap();

        // 3 dates closed by Mar 4 noon times 3 colors.
        assert_eq!(keys.len(), 9);

        let dates: Vec<&str> = keys
            .iter()
            .map(|k| k.as_multi().unwrap().get("date").unwrap())
            .collect();
        assert_eq!(
            dates,
            vec![
                "2024-03-01", "2024-03-01", "2024-03-01", "2024-03-02", "2024-03-02",
                "2024-03-02", "2024-03-03", "2024-03-03", "2024-03-03"
            ]
        );
        // Encoded in declaration order, not iteration order.
        assert_eq!(keys[0].encode(), "red|2024-03-01");
    }

    #[test]
    fn test_unregistered_dynamic_definition() {
        let def = PartitionDefinition::Dynamic(DynamicPartitions::new("unknown"));
        let space = PartitionKeySpace::new(&def, "dyn");
        assert!(matches!(
            space.keys_at(&token()),
            Err(PartitionError::ExternalLookup { definition }) if definition == "unknown"
        ));
    }

    #[test]
    fn test_missing_primary_fails_enumeration() {
        let def = PartitionDefinition::Multi(MultiPartitions::new(vec![PartitionDimension::new(
            "color",
            PartitionDefinition::Static(StaticPartitions::new(["red"])),
        )]));
        let space = PartitionKeySpace::new(&def, "multi");
        assert!(matches!(
            space.keys_at(&token()),
            Err(PartitionError::InvalidPartitionDefinition { .. })
        ));
    }

    #[test]
    fn test_dimension_keys() {
        let def = multi();
        let space = PartitionKeySpace::new(&def, "multi");
        let dims = space.dimension_keys_at(&token()).unwrap();
        assert_eq!(dims[0].name, "color");
        assert_eq!(dims[0].partition_keys, vec!["red", "green", "blue"]);
        assert_eq!(dims[1].partition_keys.len(), 3);

        let single = PartitionDefinition::Dynamic(DynamicPartitions::new("customers"));
        let dims = PartitionKeySpace::new(&single, "dyn")
            .dimension_keys_at(&token())
            .unwrap();
        assert_eq!(dims[0].name, "default");
        assert_eq!(dims[0].partition_keys, vec!["acme", "globex"]);
    }

    #[test]
    fn test_empty_dimension_gives_empty_product() {
        let def = PartitionDefinition::Multi(MultiPartitions::new(vec![
            PartitionDimension::new(
                "customer",
                PartitionDefinition::Dynamic(DynamicPartitions::new("empty")),
            )
            .primary(),
            PartitionDimension::new(
                "color",
                PartitionDefinition::Static(StaticPartitions::new(["red"])),
            ),
        ]));
        let token = token().with_dynamic_partitions("empty", Vec::new());
        assert!(PartitionKeySpace::new(&def, "multi").keys_at(&token).unwrap().is_empty());
    }
}

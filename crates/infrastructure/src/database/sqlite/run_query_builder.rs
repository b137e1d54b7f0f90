//! Run query builder - builds the SQL for tag/status/id filtered ledger lookups
//!
//! Only responsible for SQL text and parameter order; execution lives in the ledger.

use partition_core::RunsFilter;

use crate::database::placeholders;

pub struct RunQueryBuilder;

impl RunQueryBuilder {
    /// Newest first by insertion sequence. The cursor is the run id of the previous page's
    /// last row; rows strictly older than it are returned.
    pub fn build_find_query(
        filter: &RunsFilter,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> (String, Vec<RunQueryParam>) {
        let mut query =
            "SELECT r.run_id, r.status, r.created_at, r.start_time, r.end_time FROM runs r WHERE 1=1"
                .to_string();
        let mut params = Vec::new();

        // One EXISTS per tag: every tag must match exactly
        for (key, value) in &filter.tags {
            query.push_str(
                " AND EXISTS (SELECT 1 FROM run_tags t WHERE t.run_id = r.run_id AND t.key = ? AND t.value = ?)",
            );
            params.push(RunQueryParam::Text(key.clone()));
            params.push(RunQueryParam::Text(value.clone()));
        }

        if let Some(statuses) = &filter.statuses {
            if statuses.is_empty() {
                query.push_str(" AND 0");
            } else {
                query.push_str(&format!(" AND r.status IN ({})", placeholders(statuses.len())));
                params.extend(
                    statuses
                        .iter()
                        .map(|s| RunQueryParam::Text(s.as_str().to_string())),
                );
            }
        }

        if let Some(run_ids) = &filter.run_ids {
            if run_ids.is_empty() {
                query.push_str(" AND 0");
            } else {
                query.push_str(&format!(" AND r.run_id IN ({})", placeholders(run_ids.len())));
                params.extend(run_ids.iter().cloned().map(RunQueryParam::Text));
            }
        }

        if let Some(cursor) = cursor {
            query.push_str(" AND r.seq < (SELECT seq FROM runs WHERE run_id = ?)");
            params.push(RunQueryParam::Text(cursor.to_string()));
        }

        query.push_str(" ORDER BY r.seq DESC");

        if let Some(limit) = limit {
            query.push_str(" LIMIT ?");
            params.push(RunQueryParam::Int64(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        (query, params)
    }

    pub fn build_tags_query(run_count: usize) -> String {
        format!(
            "SELECT run_id, key, value FROM run_tags WHERE run_id IN ({})",
            placeholders(run_count)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunQueryParam {
    Text(String),
    Int64(i64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use partition_core::{tags, RunStatus};

    #[test]
    fn test_no_filter() {
        let (query, params) = RunQueryBuilder::build_find_query(&RunsFilter::new(), None, None);
        assert!(query.ends_with("ORDER BY r.seq DESC"));
        assert!(params.is_empty());
    }

    #[test]
    fn test_tags_statuses_cursor_and_limit() {
        let filter = RunsFilter::new()
            .with_tag(tags::PARTITION_SET_TAG, "letters")
            .with_tag(tags::PARTITION_NAME_TAG, "a")
            .with_statuses([RunStatus::Success, RunStatus::Failure]);
        let (query, params) = RunQueryBuilder::build_find_query(&filter, Some("r9"), Some(1));

        assert_eq!(query.matches("EXISTS").count(), 2);
        assert!(query.contains("r.status IN (?, ?)"));
        assert!(query.contains("r.seq < (SELECT seq FROM runs WHERE run_id = ?)"));
        assert!(query.ends_with("LIMIT ?"));
        // 2 tags * 2 + 2 statuses + cursor + limit
        assert_eq!(params.len(), 8);
        assert_eq!(params[6], RunQueryParam::Text("r9".to_string()));
        assert_eq!(params[7], RunQueryParam::Int64(1));
    }

    #[test]
    fn test_empty_status_set_matches_nothing() {
        let filter = RunsFilter::new().with_statuses([]);
        let (query, _) = RunQueryBuilder::build_find_query(&filter, None, None);
        assert!(query.contains("AND 0"));
    }
}

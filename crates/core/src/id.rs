//! Identifiers and remote object references.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueryError;

/// Local identity of a job, assigned at construction.
///
/// The remote service assigns its own [`JobReference`] only after submission;
/// this id exists from the start so a job can be found in a group or
/// correlated in logs before then.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Uses UUIDv7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for JobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|e| QueryError::invalid_config(format!("JobId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Remote-assigned reference to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub project_id: String,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl JobReference {
    pub fn new(project_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            job_id: job_id.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

impl core::fmt::Display for JobReference {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.project_id, self.job_id)
    }
}

/// Reference to a remote table, e.g. a query's destination table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableReference {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }

    /// `project:dataset.table`, or `[project:dataset.table]` when `bracketed`.
    pub fn fully_qualified_name(&self, bracketed: bool) -> String {
        let name = format!("{}:{}.{}", self.project_id, self.dataset_id, self.table_id);
        if bracketed {
            format!("[{name}]")
        } else {
            name
        }
    }
}

impl core::fmt::Display for TableReference {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.fully_qualified_name(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fully_qualified_table_name() {
        let table = TableReference::new("4213455", "bar", "foo");
        assert_eq!(table.fully_qualified_name(true), "[4213455:bar.foo]");
        assert_eq!(table.fully_qualified_name(false), "4213455:bar.foo");
        assert_eq!(table.to_string(), "4213455:bar.foo");
    }

    #[test]
    fn references_use_wire_field_names() {
        let table: TableReference = serde_json::from_value(serde_json::json!({
            "projectId": "p",
            "datasetId": "d",
            "tableId": "t",
        }))
        .unwrap();
        assert_eq!(table, TableReference::new("p", "d", "t"));

        let job = JobReference::new("p", "job_1");
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value, serde_json::json!({"projectId": "p", "jobId": "job_1"}));
    }

    #[test]
    fn job_ids_parse_back() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }
}

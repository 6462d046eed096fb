//! Reading remote tables into typed rows.

use std::sync::Arc;

use tracing::debug;

use bqjob_core::{materialize_row, QueryResult, Schema, TableReference, TypedRow};

use super::RemoteQueryService;
use crate::jobs::backoff::retry_with_backoff;
use crate::jobs::types::RetryPolicy;

/// A remote table bound to the service that serves it.
#[derive(Clone)]
pub struct Table {
    service: Arc<dyn RemoteQueryService>,
    reference: TableReference,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("reference", &self.reference)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Table {
    pub fn new(service: Arc<dyn RemoteQueryService>, reference: TableReference) -> Self {
        Self {
            service,
            reference,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn reference(&self) -> &TableReference {
        &self.reference
    }

    pub fn fully_qualified_name(&self, bracketed: bool) -> String {
        self.reference.fully_qualified_name(bracketed)
    }

    pub fn schema(&self) -> QueryResult<Schema> {
        retry_with_backoff("fetch_schema", &self.retry, || {
            self.service.fetch_schema(&self.reference)
        })
    }

    /// Fetch the schema, then stream and coerce every row (up to `max_rows`).
    pub fn read_rows(&self, max_rows: Option<usize>) -> QueryResult<Vec<TypedRow>> {
        let schema = self.schema()?;
        let stream = retry_with_backoff("fetch_rows", &self.retry, || {
            self.service.fetch_rows(&self.reference)
        })?;

        let limit = max_rows.unwrap_or(usize::MAX);
        let mut rows = Vec::new();
        for raw in stream.take(limit) {
            rows.push(materialize_row(&schema, &raw?)?);
        }

        debug!(table = %self.reference, rows = rows.len(), "table rows materialized");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryQueryService;
    use bqjob_core::{Field, QueryError, TypedValue};
    use serde_json::json;

    fn billing_table() -> (Arc<InMemoryQueryService>, TableReference) {
        let service = InMemoryQueryService::arc("4213455");
        let reference = TableReference::new("4213455", "bar", "foo");
        service.insert_table(
            reference.clone(),
            Schema::new(vec![Field::new("date", "STRING"), Field::new("charge", "FLOAT")]),
            vec![
                vec![json!("2012-06-21"), json!("1.0")],
                vec![json!("2012-06-23"), json!("2.0")],
                vec![json!("2012-09-01"), json!("1000.0")],
            ],
        );
        (service, reference)
    }

    #[test]
    fn read_rows_coerces_by_schema() {
        let (service, reference) = billing_table();
        let table = Table::new(service, reference);

        let rows = table.read_rows(None).unwrap();
        let charges: Vec<_> = rows.iter().map(|r| r.get("charge").cloned()).collect();
        assert_eq!(
            charges,
            vec![
                Some(TypedValue::Float(1.0)),
                Some(TypedValue::Float(2.0)),
                Some(TypedValue::Float(1000.0)),
            ]
        );
        assert_eq!(rows[2].get("date"), Some(&TypedValue::from("2012-09-01")));
    }

    #[test]
    fn read_rows_honours_max_rows() {
        let (service, reference) = billing_table();
        let rows = Table::new(service, reference).read_rows(Some(2)).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn names_and_missing_tables() {
        let (service, _) = billing_table();
        let table = Table::new(service, TableReference::new("4213455", "bar", "missing"))
            .with_retry_policy(RetryPolicy::no_retry());

        assert_eq!(table.fully_qualified_name(true), "[4213455:bar.missing]");
        assert!(matches!(table.read_rows(None), Err(QueryError::NotFound { .. })));
    }
}

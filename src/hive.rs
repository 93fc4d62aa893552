use crate::records::SinkRecord;
use crate::schemas::Schema;

/// Error returned by a [`HiveService`] implementation.
///
/// Catalog failures break the exactly-once contract and are surfaced as fatal
/// by the partition writer.
#[derive(thiserror::Error, Debug)]
pub enum HiveError {
    /// The metastore rejected or failed the request.
    #[error("Hive metastore request failed: {0}")]
    Metastore(String),

    /// The schema could not be represented in the catalog.
    #[error("Schema {name} is not representable in Hive: {reason}")]
    UnsupportedSchema { name: String, reason: String },
}

/// Side-effect hook registering the committed directory layout with a schema
/// catalog.
///
/// Invoked by the partition writer when `hive.integration` is enabled: table
/// creation and schema alteration on every schema transition, partition
/// registration the first time a record is routed to a new encoded partition.
/// Implementations are expected to be safe for concurrent use across
/// partition writers.
pub trait HiveService {
    /// Creates the backing table for the schema if it does not exist.
    fn create_hive_table(&self, schema: &Schema) -> Result<(), HiveError>;

    /// Alters the table definition to match the schema.
    fn alter_hive_schema(&self, schema: &Schema) -> Result<(), HiveError>;

    /// Registers the partition the record was routed to.
    fn add_hive_partition(
        &self,
        record: &SinkRecord,
        schema: Option<&Schema>,
    ) -> Result<(), HiveError>;
}

use crate::catalog::EntitySchema;
use crate::error::CdcError;
use crate::row::EntityRow;
use crate::source::BoxFuture;

/// Destination store.
///
/// One instance is shared by all pipelines; each pipeline writes its own
/// table, so implementations need no cross-table coordination.
pub trait RowSink: Send + Sync {
    /// Prepare `table` for writes of `schema` rows. A table that does not
    /// match the schema is a `Schema` error.
    fn prepare<'a>(
        &'a self,
        table: &'a str,
        schema: &'static EntitySchema,
    ) -> BoxFuture<'a, Result<(), CdcError>>;

    /// Upsert one row keyed by its primary key. Writing the same key twice
    /// leaves a single record.
    ///
    /// A `Row` error rejects only this row; `Unavailable` means the
    /// destination could not be reached.
    fn write_row<'a>(
        &'a self,
        table: &'a str,
        row: &'a EntityRow,
    ) -> BoxFuture<'a, Result<(), CdcError>>;

    /// Release connections.
    fn close(&self) -> BoxFuture<'_, Result<(), CdcError>> {
        Box::pin(async { Ok(()) })
    }
}

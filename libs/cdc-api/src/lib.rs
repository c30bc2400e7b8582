pub mod catalog;
pub mod error;
pub mod event;
pub mod row;
pub mod sink;
pub mod source;

pub use catalog::{EntityKind, EntitySchema, FieldSpec, FieldType};
pub use error::{CdcError, ErrorKind};
pub use event::{ChangeEvent, Operation, RowImage};
pub use row::{EntityRow, Value};
pub use sink::RowSink;
pub use source::{BoxFuture, BusMessage, ChangeSource, OffsetTracker, Position, SourceFactory};

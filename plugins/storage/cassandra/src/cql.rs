//! CQL statement generation from the entity catalog.

use cdc_api::{CdcError, EntitySchema, FieldType};

pub fn cql_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Long => "bigint",
        FieldType::Int => "int",
        FieldType::Double => "double",
        FieldType::Text => "text",
    }
}

/// Keyspace and table names are spliced into statements, so only plain
/// identifiers are accepted.
pub fn validate_identifier(kind: &str, name: &str) -> Result<(), CdcError> {
    let valid = !name.is_empty()
        && name.len() <= 48
        && name.starts_with(|c: char| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CdcError::config(format!("invalid {kind} name '{name}'")))
    }
}

/// `CREATE TABLE IF NOT EXISTS` for one entity: business fields, then the
/// passthrough columns, keyed by the entity's primary key.
pub fn create_table_cql(keyspace: &str, table: &str, schema: &EntitySchema) -> String {
    let mut cql = format!("CREATE TABLE IF NOT EXISTS {keyspace}.{table} (\n");
    for column in schema.columns() {
        cql.push_str(&format!("    \"{}\" {},\n", column.name, cql_type(column.field_type)));
    }
    cql.push_str(&format!("    PRIMARY KEY (\"{}\")\n)", schema.primary_key));
    cql
}

/// Upsert of a full destination row, one bind marker per column.
pub fn insert_cql(keyspace: &str, table: &str, schema: &EntitySchema) -> String {
    let columns: Vec<String> = schema.columns().map(|c| format!("\"{}\"", c.name)).collect();
    let markers = vec!["?"; columns.len()];
    format!(
        "INSERT INTO {keyspace}.{table} ({}) VALUES ({})",
        columns.join(", "),
        markers.join(", ")
    )
}

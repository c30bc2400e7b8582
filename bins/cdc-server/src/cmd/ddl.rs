use cdc_api::EntityKind;
use cdc_storage_cassandra::cql::validate_identifier;
use cdc_storage_cassandra::create_table_cql;

use crate::config::DdlArgs;
use crate::error::ServerError;

/// Print the schema of every default destination table.
pub fn run(args: DdlArgs) -> Result<(), ServerError> {
    validate_identifier("keyspace", &args.keyspace)?;
    for entity in EntityKind::ALL {
        let schema = entity.schema();
        println!("-- {entity}");
        println!("{};\n", create_table_cql(&args.keyspace, schema.table, schema));
    }
    Ok(())
}

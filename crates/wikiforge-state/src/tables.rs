//! redb table definitions for the instance registry.

use redb::TableDefinition;

/// Instance records keyed by instance id (UUID string), JSON values.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

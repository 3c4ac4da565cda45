//! redb table definitions for the coordination store.

use redb::TableDefinition;

/// Persistent nodes keyed by their full path (`endpoints/web/config`).
/// Ephemeral nodes never reach disk.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

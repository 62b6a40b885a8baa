use redb::TableDefinition;

/// Asset records: asset id -> StoredAsset (msgpack)
pub const ASSETS: TableDefinition<&str, &[u8]> = TableDefinition::new("assets");

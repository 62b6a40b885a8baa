use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::StoredAsset;
use super::tables::*;
use crate::media::Quality;

impl Database {
    // ========================================================================
    // Asset operations
    // ========================================================================

    /// Record a new asset. Fails if the id is already taken, since originals
    /// are immutable once written.
    pub fn insert_asset(&self, asset: &StoredAsset) -> Result<(), DatabaseError> {
        debug_assert!(!asset.id.is_empty(), "asset id must not be empty");

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(ASSETS)?;
            if table.get(asset.id.as_str())?.is_some() {
                return Err(DatabaseError::AlreadyExists(asset.id.clone()));
            }
            let data = rmp_serde::to_vec_named(asset)?;
            table.insert(asset.id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_asset(&self, id: &str) -> Result<Option<StoredAsset>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ASSETS)?;

        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Add or replace one quality variant. The original key is left untouched.
    /// Returns the updated asset, or `None` if the asset does not exist.
    pub fn add_variant(
        &self,
        id: &str,
        quality: Quality,
        key: &str,
    ) -> Result<Option<StoredAsset>, DatabaseError> {
        self.modify_asset(id, |asset| {
            asset.quality_variants.insert(quality, key.to_string());
            asset.failed_variants.retain(|q| *q != quality);
        })
    }

    fn modify_asset<F>(&self, id: &str, change: F) -> Result<Option<StoredAsset>, DatabaseError>
    where
        F: FnOnce(&mut StoredAsset),
    {
        let write_txn = self.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(ASSETS)?;
            let existing: Option<StoredAsset> = match table.get(id)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };

            match existing {
                Some(mut asset) => {
                    let original_key = asset.original_key.clone();
                    change(&mut asset);
                    asset.original_key = original_key;

                    let data = rmp_serde::to_vec_named(&asset)?;
                    table.insert(id, data.as_slice())?;
                    Some(asset)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Remove an asset record, returning it if it existed
    pub fn delete_asset(&self, id: &str) -> Result<Option<StoredAsset>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(ASSETS)?;
            let removed: Option<StoredAsset> = match table.remove(id)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// All assets, ordered by id
    pub fn list_assets(&self) -> Result<Vec<StoredAsset>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ASSETS)?;

        let mut assets = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            assets.push(rmp_serde::from_slice(value.value())?);
        }
        Ok(assets)
    }
}

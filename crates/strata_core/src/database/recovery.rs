//! Loading a database from its checkpoint and WAL.
//!
//! Recovery starts from the checkpoint image (if any) and replays every
//! committed batch with a sequence newer than the image. A batch without a
//! `Commit` record was never acknowledged and is discarded; the log is then
//! truncated to the end of the last committed batch so new commits never
//! follow a torn tail.

use crate::checkpoint::CheckpointImage;
use crate::config::Config;
use crate::database::provider::DatabaseBackends;
use crate::database::shared::{Catalog, DatabaseShared, Durability};
use crate::error::{CoreError, CoreResult};
use crate::store::StoreData;
use crate::types::{SequenceNumber, TransactionId};
use crate::wal::{WalOp, WalRecord, WalWriter};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What replay found, for logging.
#[derive(Debug, Default)]
struct ReplayStats {
    applied: usize,
    skipped: usize,
    discarded: usize,
}

impl DatabaseShared {
    /// Rebuilds database `name` from `backends`.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat`/`ChecksumMismatch` for a damaged checkpoint
    /// - `WalCorruption`/`ChecksumMismatch` for a damaged WAL record that is
    ///   not part of a torn tail
    /// - storage errors while reading or truncating
    pub(crate) fn recover(
        name: &str,
        config: Config,
        backends: DatabaseBackends,
    ) -> CoreResult<Self> {
        let DatabaseBackends {
            wal,
            checkpoint,
            dir,
        } = backends;

        let image_bytes = checkpoint.read_all()?;
        let (mut version, mut stores, base) = if image_bytes.is_empty() {
            (0, BTreeMap::new(), SequenceNumber::default())
        } else {
            let image = CheckpointImage::decode(&image_bytes, config.format_version.0)?;
            let stores = image
                .stores
                .into_iter()
                .map(|store| {
                    let name = store.meta.name.clone();
                    StoreData::load(store.meta, store.counter, store.records)
                        .map(|data| (name, data))
                })
                .collect::<CoreResult<BTreeMap<_, _>>>()?;
            (image.version, stores, image.sequence)
        };

        let mut wal = WalWriter::new(wal, config.sync_on_commit);
        let mut stats = ReplayStats::default();
        let mut sequence = base;
        let mut max_txid = 0u64;
        let committed_end;
        {
            let mut records = wal.iter()?;
            let mut pending: Option<(TransactionId, Vec<WalOp>)> = None;
            let mut end = 0u64;

            while let Some(item) = records.next() {
                let (offset, record) = item?;
                max_txid = max_txid.max(record.txid().as_u64());
                match record {
                    WalRecord::Begin { txid } => {
                        if pending.replace((txid, Vec::new())).is_some() {
                            stats.discarded += 1;
                        }
                    }
                    WalRecord::Op { txid, op } => match &mut pending {
                        Some((open, ops)) if *open == txid => ops.push(op),
                        _ => {
                            return Err(CoreError::wal_corruption(format!(
                                "operation of {txid} outside its batch at offset {offset}"
                            )))
                        }
                    },
                    WalRecord::Commit {
                        txid,
                        sequence: committed,
                    } => {
                        let ops = match pending.take() {
                            Some((open, ops)) if open == txid => ops,
                            _ => {
                                return Err(CoreError::wal_corruption(format!(
                                    "commit of {txid} without a batch at offset {offset}"
                                )))
                            }
                        };
                        if committed > base {
                            for op in ops {
                                replay(&mut stores, &mut version, op)?;
                            }
                            stats.applied += 1;
                        } else {
                            stats.skipped += 1;
                        }
                        sequence = sequence.max(committed);
                        end = records.valid_end();
                    }
                }
            }
            if pending.is_some() {
                stats.discarded += 1;
            }
            committed_end = end;
        }

        let wal_size = wal.size()?;
        if wal_size > committed_end {
            tracing::warn!(
                db = name,
                discarded_bytes = wal_size - committed_end,
                "truncating uncommitted WAL tail"
            );
            wal.truncate(committed_end)?;
        }

        tracing::info!(
            db = name,
            version,
            stores = stores.len(),
            %sequence,
            batches_applied = stats.applied,
            batches_skipped = stats.skipped,
            batches_discarded = stats.discarded,
            "database recovered"
        );

        let catalog = Catalog {
            version,
            stores: stores
                .into_iter()
                .map(|(name, data)| (name, Arc::new(RwLock::new(data))))
                .collect(),
        };
        let durability = Durability {
            wal,
            checkpoint,
            sequence,
        };
        Ok(Self::new(name, config, catalog, durability, max_txid + 1, dir))
    }
}

fn live<'a>(stores: &'a mut BTreeMap<String, StoreData>, name: &str) -> CoreResult<&'a mut StoreData> {
    stores
        .get_mut(name)
        .ok_or_else(|| CoreError::wal_corruption(format!("WAL refers to unknown store {name:?}")))
}

/// Applies one committed operation. Every operation sets an absolute state.
fn replay(stores: &mut BTreeMap<String, StoreData>, version: &mut u64, op: WalOp) -> CoreResult<()> {
    match op {
        WalOp::Put { store, key, value } => live(stores, &store)?.replay_put(key, value)?,
        WalOp::Delete { store, key } => live(stores, &store)?.restore_record(&key, None)?,
        WalOp::Clear { store } => {
            live(stores, &store)?.clear()?;
        }
        WalOp::CreateStore { meta } => {
            stores.insert(meta.name.clone(), StoreData::new(meta));
        }
        WalOp::DeleteStore { name } => {
            stores.remove(&name);
        }
        WalOp::CreateIndex { store, meta } => live(stores, &store)?.create_index(meta)?,
        WalOp::DeleteIndex { store, name } => {
            live(stores, &store)?.delete_index(&name)?;
        }
        WalOp::SetVersion { version: new } => *version = new,
    }
    Ok(())
}

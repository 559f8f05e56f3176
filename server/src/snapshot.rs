//! Periodic JSON snapshots of the session store.
//!
//! The snapshot is a `[members, item_ledger, processed_logs]` triple. Writes
//! go through a temp file and a rename so a crash mid-write never leaves a
//! torn snapshot, and startup picks the lexicographically greatest file,
//! which the timestamped names make the newest.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;

use tandem_core::protocol::ItemMap;

use crate::ledger::SessionStore;

pub const SNAPSHOT_PREFIX: &str = "parity_backup_";

type SnapshotParts = (
    HashMap<String, String>,
    HashMap<String, Option<ItemMap>>,
    HashMap<String, u64>,
);

pub fn save(store: &SessionStore, dir: &Path) -> anyhow::Result<PathBuf> {
    let stamp = Local::now().format("%Y%m%d-%H%M");
    let name = format!("{SNAPSHOT_PREFIX}{stamp}.json");
    let path = dir.join(&name);
    let tmp = dir.join(format!("{name}.tmp"));

    let json =
        serde_json::to_string(&store.snapshot_parts()).context("serializing the snapshot")?;
    fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, &path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(path)
}

/// Load the newest snapshot in `dir`, if any. Integer ledger keys come back
/// as integers and every member is marked pending, so each peer receives a
/// fresh SYNC after the restart.
pub fn load_latest(dir: &Path) -> anyhow::Result<Option<SessionStore>> {
    let mut newest: Option<PathBuf> = None;

    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !name.starts_with(SNAPSHOT_PREFIX) || !name.ends_with(".json") {
            continue;
        }
        if newest
            .as_ref()
            .and_then(|newest| newest.file_name())
            .and_then(|newest| newest.to_str())
            .map_or(true, |current| name > current)
        {
            newest = Some(path);
        }
    }

    let Some(path) = newest else {
        return Ok(None);
    };

    let json = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let (members, ledgers, processed_logs): SnapshotParts =
        serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))?;

    log::info!(
        "restored {} member(s) across {} session(s) from {}",
        members.len(),
        ledgers.len(),
        path.display()
    );
    Ok(Some(SessionStore::restore(members, ledgers, processed_logs)))
}

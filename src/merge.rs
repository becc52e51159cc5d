//! Decoding of the remote collection and reconciliation against local tasks.
//!
//! Reconciliation is last-writer-wins by full overwrite: a remote record
//! replaces every synced field of the matching local task. There is no
//! per-field diffing and no version or timestamp comparison.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::de::{self, Deserialize, Deserializer, MapAccess, Visitor};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::repository::{TaskRepository, UnitOfWork};
use crate::task::{Task, TaskRepresentation, parse_identifier};

/// Valid remote records keyed by identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteCollection {
    pub records: BTreeMap<Uuid, TaskRepresentation>,
    /// Entries dropped while decoding.
    pub skipped: usize,
}

/// Outcome of a successful pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullSummary {
    pub updated: usize,
    pub created: usize,
    pub skipped: usize,
}

impl PullSummary {
    pub fn mutations(&self) -> usize {
        self.updated + self.created
    }
}

/// Top-level object entries in document order. Repeated keys are rejected.
struct RawCollection(Vec<(String, serde_json::Value)>);

impl<'de> Deserialize<'de> for RawCollection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RawCollection;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping identifiers to task records")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawCollection, A::Error> {
                let mut seen = HashSet::new();
                let mut entries = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, serde_json::Value>()? {
                    if !seen.insert(key.clone()) {
                        return Err(de::Error::custom(format!("duplicate key {key:?}")));
                    }
                    entries.push((key, value));
                }
                Ok(RawCollection(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Decode a collection body.
///
/// `null` is an empty collection. Individual entries that cannot be used are
/// counted in `skipped`; only a body that is not a JSON object (or `null`), or
/// two entries claiming the same identifier, fail the whole decode.
pub fn decode_collection(body: &[u8]) -> SyncResult<RemoteCollection> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(SyncError::NoData);
    }
    let raw: Option<RawCollection> =
        serde_json::from_slice(body).map_err(|e| SyncError::Decode(e.to_string()))?;
    let Some(RawCollection(entries)) = raw else {
        return Ok(RemoteCollection::default());
    };

    let mut out = RemoteCollection::default();
    for (key, value) in entries {
        let Some(id) = parse_identifier(&key) else {
            warn!(%key, "skipping remote entry with malformed identifier");
            out.skipped += 1;
            continue;
        };
        let rep: TaskRepresentation = match serde_json::from_value(value) {
            Ok(rep) => rep,
            Err(e) => {
                warn!(%key, error = %e, "skipping undecodable remote record");
                out.skipped += 1;
                continue;
            }
        };
        if parse_identifier(&rep.identifier) != Some(id) {
            warn!(%key, identifier = %rep.identifier, "skipping remote record keyed under another identifier");
            out.skipped += 1;
            continue;
        }
        if let Err(e) = rep.validate() {
            warn!(%key, error = %e, "skipping remote record");
            out.skipped += 1;
            continue;
        }
        if out.records.insert(id, rep).is_some() {
            return Err(SyncError::Decode(format!(
                "identifier {id} appears under more than one key"
            )));
        }
    }
    Ok(out)
}

/// Merge `collection` into `repo` and commit the result in one batch.
///
/// Matching local tasks are overwritten in place; records with no local
/// match become new tasks. Local tasks absent from the collection are left
/// alone. A failed commit is reported as [`SyncError::Commit`]; nothing is
/// retried or compensated.
pub fn reconcile<R: TaskRepository + ?Sized>(
    repo: &R,
    collection: RemoteCollection,
) -> SyncResult<PullSummary> {
    let RemoteCollection { records, skipped } = collection;
    let mut summary = PullSummary {
        skipped,
        ..PullSummary::default()
    };
    if records.is_empty() {
        return Ok(summary);
    }

    let ids: Vec<Uuid> = records.keys().copied().collect();
    let mut uow = UnitOfWork::new(repo);
    let existing = uow.fetch(&ids)?;

    let mut to_create: BTreeMap<Uuid, &TaskRepresentation> =
        records.iter().map(|(id, rep)| (*id, rep)).collect();

    for mut task in existing {
        let Some(id) = task.identifier else { continue };
        let Some(rep) = to_create.remove(&id) else {
            continue;
        };
        match task.apply_representation(rep) {
            Ok(()) => {
                uow.update(task)?;
                summary.updated += 1;
            }
            Err(e) => {
                warn!(%id, error = %e, "not updating local task");
                summary.skipped += 1;
            }
        }
    }

    for (id, rep) in to_create {
        match Task::from_representation(id, rep) {
            Ok(task) => {
                uow.insert(task)?;
                summary.created += 1;
            }
            Err(e) => {
                warn!(%id, error = %e, "not creating local task");
                summary.skipped += 1;
            }
        }
    }

    uow.save().map_err(|e| {
        error!(error = %e, staged = summary.mutations(), "commit after pull failed");
        SyncError::Commit(e)
    })?;
    debug!(?summary, "pull reconciled");
    Ok(summary)
}

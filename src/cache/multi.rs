//! Scatter/gather engine for the multi-key commands.
//!
//! Input keys are partitioned by ring owner; each group goes to its server
//! on one borrowed connection as a batch of quiet requests terminated by a
//! NOOP, all under distinct opaques drawn from a per-call opaque → key
//! table. Quiet requests answer only on failure (and on GETQ hits), so the
//! batch result is read by draining responses until the NOOP's opaque
//! arrives: a store or delete is successful exactly when no response for
//! its opaque preceded the NOOP.
//!
//! Groups run in parallel, one thread per server. A group that fails
//! (borrow, send, or mid-stream) degrades only its own keys: hits already
//! received stay, everything still pending becomes a per-key failure, and
//! the overall call always returns a result map.

use std::collections::HashMap;
use std::net::SocketAddr;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

use crate::cache::{MemcachedCache, ValueWithCas};
use crate::error::OpError;
use crate::protocol::{Extras, Opcode, Request};

/// One input key with its payload (unused fields empty for GET/DELETE).
struct BatchItem {
    key: Vec<u8>,
    value: Vec<u8>,
    cas: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Get,
    Store { expiration: u32 },
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ItemOutcome {
    /// Retrieval: no value (not stored, or its server failed).
    Miss,
    /// Retrieval hit.
    Hit(ValueWithCas),
    /// Mutation acknowledged by silence before the NOOP.
    Ok,
    /// Mutation rejected or its server failed.
    Failed,
}

fn build_quiet_request(item: &BatchItem, verb: Verb, opaque: u32) -> Request {
    match verb {
        Verb::Get => Request {
            opaque,
            key: item.key.clone(),
            ..Request::new(Opcode::GetQ)
        },
        Verb::Store { expiration } => Request {
            opaque,
            cas: item.cas,
            extras: Extras::Storage {
                flags: 0,
                expiration,
            },
            key: item.key.clone(),
            value: item.value.clone(),
            ..Request::new(Opcode::SetQ)
        },
        Verb::Delete => Request {
            opaque,
            key: item.key.clone(),
            ..Request::new(Opcode::DeleteQ)
        },
    }
}

impl MemcachedCache {
    /// Fetches many keys at once. The result contains only the hits; a key
    /// is absent when it was not stored or its server failed.
    pub fn get_multi(&self, keys: &[Vec<u8>]) -> HashMap<Vec<u8>, Vec<u8>> {
        self.gets_multi(keys)
            .into_iter()
            .map(|(key, found)| (key, found.value))
            .collect()
    }

    /// Like [`get_multi`](Self::get_multi) but carries each hit's CAS
    /// token.
    pub fn gets_multi(&self, keys: &[Vec<u8>]) -> HashMap<Vec<u8>, ValueWithCas> {
        self.ensure_running();
        let items = dedupe_keys(keys)
            .into_iter()
            .map(|key| BatchItem {
                key,
                value: Vec::new(),
                cas: 0,
            })
            .collect::<Vec<_>>();
        let outcomes = self.scatter(&items, Verb::Get);
        let mut result = HashMap::new();
        for (item, outcome) in items.into_iter().zip(outcomes) {
            match outcome {
                ItemOutcome::Hit(found) => {
                    self.inner.metrics.record_hit();
                    result.insert(item.key, found);
                },
                _ => self.inner.metrics.record_miss(),
            }
        }
        result
    }

    /// Stores many entries at once. The result maps every input key to
    /// whether its store succeeded.
    pub fn set_multi(
        &self,
        entries: &HashMap<Vec<u8>, Vec<u8>>,
        expiration: u32,
    ) -> HashMap<Vec<u8>, bool> {
        self.ensure_running();
        let items = entries
            .iter()
            .map(|(key, value)| BatchItem {
                key: key.clone(),
                value: value.clone(),
                cas: 0,
            })
            .collect::<Vec<_>>();
        self.mutate_many(items, Verb::Store { expiration })
    }

    /// Compare-and-stores many entries at once; each entry carries its own
    /// CAS token.
    pub fn cas_multi(
        &self,
        entries: &HashMap<Vec<u8>, ValueWithCas>,
        expiration: u32,
    ) -> HashMap<Vec<u8>, bool> {
        self.ensure_running();
        let items = entries
            .iter()
            .map(|(key, entry)| BatchItem {
                key: key.clone(),
                value: entry.value.clone(),
                cas: entry.cas,
            })
            .collect::<Vec<_>>();
        self.mutate_many(items, Verb::Store { expiration })
    }

    /// Deletes many keys at once.
    pub fn delete_multi(&self, keys: &[Vec<u8>]) -> HashMap<Vec<u8>, bool> {
        self.ensure_running();
        let items = dedupe_keys(keys)
            .into_iter()
            .map(|key| BatchItem {
                key,
                value: Vec::new(),
                cas: 0,
            })
            .collect::<Vec<_>>();
        self.mutate_many(items, Verb::Delete)
    }

    fn mutate_many(&self, items: Vec<BatchItem>, verb: Verb) -> HashMap<Vec<u8>, bool> {
        let outcomes = self.scatter(&items, verb);
        let mut result = HashMap::new();
        for (item, outcome) in items.into_iter().zip(outcomes) {
            let ok = matches!(outcome, ItemOutcome::Ok);
            if ok {
                match verb {
                    Verb::Delete => self.inner.metrics.record_delete(),
                    _ => self.inner.metrics.record_store(),
                }
            } else {
                self.inner.metrics.record_failure();
            }
            result.insert(item.key, ok);
        }
        result
    }

    /// Partitions items by ring owner and runs one batch per server in
    /// parallel.
    fn scatter(&self, items: &[BatchItem], verb: Verb) -> Vec<ItemOutcome> {
        let unroutable = match verb {
            Verb::Get => ItemOutcome::Miss,
            _ => ItemOutcome::Failed,
        };
        let mut outcomes = vec![unroutable; items.len()];
        let mut groups: FxHashMap<SocketAddr, Vec<usize>> = FxHashMap::default();
        for (index, item) in items.iter().enumerate() {
            if let Some(server) = self.inner.ring.lookup(&item.key) {
                if !self.inner.monitor.is_quarantined(&server) {
                    groups.entry(server).or_default().push(index);
                }
            }
        }
        let groups: Vec<(SocketAddr, Vec<usize>)> = groups.into_iter().collect();
        let collected: Mutex<Vec<(usize, ItemOutcome)>> =
            Mutex::new(Vec::with_capacity(items.len()));
        std::thread::scope(|scope| {
            for (server, indices) in &groups {
                let collected = &collected;
                scope.spawn(move || {
                    let group = self.run_group(*server, indices, items, verb);
                    collected.lock().extend(group);
                });
            }
        });
        for (index, outcome) in collected.into_inner() {
            outcomes[index] = outcome;
        }
        outcomes
    }

    /// One server's batch: quiet requests, NOOP terminator, drain until
    /// the NOOP's opaque.
    fn run_group(
        &self,
        server: SocketAddr,
        indices: &[usize],
        items: &[BatchItem],
        verb: Verb,
    ) -> Vec<(usize, ItemOutcome)> {
        let config = &self.inner.config;
        let fail_all = |indices: &[usize]| -> Vec<(usize, ItemOutcome)> {
            let outcome = match verb {
                Verb::Get => ItemOutcome::Miss,
                _ => ItemOutcome::Failed,
            };
            indices.iter().map(|&i| (i, outcome.clone())).collect()
        };

        let mut conn = match self
            .inner
            .pool
            .borrow(&server, Some(config.connect_timeout))
        {
            Ok(conn) => conn,
            Err(err) => {
                let err = OpError::from(err);
                warn!(server = %server, error = %err, "batch could not borrow a connection");
                self.note_server_failure(server, &err);
                return fail_all(indices);
            },
        };

        let mut requests = Vec::with_capacity(indices.len() + 1);
        let mut opaque_to_index: FxHashMap<u32, usize> = FxHashMap::default();
        for &index in indices {
            let opaque = conn.next_opaque();
            conn.track(opaque);
            opaque_to_index.insert(opaque, index);
            requests.push(build_quiet_request(&items[index], verb, opaque));
        }
        let noop_opaque = conn.next_opaque();
        conn.track(noop_opaque);
        requests.push(Request {
            opaque: noop_opaque,
            ..Request::new(Opcode::Noop)
        });

        // Within a live group, silence means success for mutations and a
        // miss for retrievals.
        let pending = match verb {
            Verb::Get => ItemOutcome::Miss,
            _ => ItemOutcome::Ok,
        };
        let mut group: FxHashMap<usize, ItemOutcome> = indices
            .iter()
            .map(|&index| (index, pending.clone()))
            .collect();

        if let Err(err) = conn.send(&requests, config.write_timeout) {
            warn!(server = %server, error = %err, "batch write failed");
            self.note_server_failure(server, &err);
            self.inner.pool.invalidate(&server, conn);
            return fail_all(indices);
        }

        loop {
            match conn.receive(config.response_timeout) {
                Ok(response) if response.opaque == noop_opaque => {
                    // The NOOP delimits the batch: silent opaques will
                    // never answer now, so retire them before the
                    // connection goes back to the pool.
                    for opaque in opaque_to_index.keys() {
                        conn.untrack(*opaque);
                    }
                    break;
                },
                Ok(response) => {
                    if let Some(&index) = opaque_to_index.get(&response.opaque) {
                        let outcome = match verb {
                            Verb::Get if response.is_ok() => ItemOutcome::Hit(ValueWithCas {
                                value: response.value,
                                cas: response.cas,
                            }),
                            Verb::Get => ItemOutcome::Miss,
                            _ => ItemOutcome::Failed,
                        };
                        group.insert(index, outcome);
                    }
                },
                Err(err) => {
                    warn!(server = %server, error = %err, "batch stream failed");
                    self.note_server_failure(server, &err);
                    self.inner.pool.invalidate(&server, conn);
                    // Hits already received stay; everything pending
                    // degrades to a per-key failure.
                    for outcome in group.values_mut() {
                        let keep = matches!(verb, Verb::Get) && matches!(outcome, ItemOutcome::Hit(_));
                        if !keep {
                            *outcome = match verb {
                                Verb::Get => ItemOutcome::Miss,
                                _ => ItemOutcome::Failed,
                            };
                        }
                    }
                    return group.into_iter().collect();
                },
            }
        }
        self.inner.pool.return_object(&server, conn);
        group.into_iter().collect()
    }
}

fn dedupe_keys(keys: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let mut seen: FxHashSet<&[u8]> = FxHashSet::default();
    let mut unique = Vec::with_capacity(keys.len());
    for key in keys {
        if seen.insert(key.as_slice()) {
            unique.push(key.clone());
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(key: &[u8]) -> BatchItem {
        BatchItem {
            key: key.to_vec(),
            value: b"v".to_vec(),
            cas: 9,
        }
    }

    #[test]
    fn quiet_requests_use_quiet_opcodes() {
        let get = build_quiet_request(&item(b"k"), Verb::Get, 1);
        assert_eq!(get.opcode, Opcode::GetQ);
        assert!(get.opcode.is_quiet());

        let store = build_quiet_request(&item(b"k"), Verb::Store { expiration: 60 }, 2);
        assert_eq!(store.opcode, Opcode::SetQ);
        assert_eq!(store.cas, 9);
        assert_eq!(
            store.extras,
            Extras::Storage {
                flags: 0,
                expiration: 60
            }
        );

        let delete = build_quiet_request(&item(b"k"), Verb::Delete, 3);
        assert_eq!(delete.opcode, Opcode::DeleteQ);
        assert!(delete.value.is_empty());
    }

    #[test]
    fn batch_requests_carry_distinct_opaques() {
        let requests: Vec<Request> = (0..16)
            .map(|opaque| build_quiet_request(&item(b"k"), Verb::Get, opaque))
            .collect();
        let opaques: FxHashSet<u32> = requests.iter().map(|request| request.opaque).collect();
        assert_eq!(opaques.len(), requests.len());
    }

    #[test]
    fn dedupe_preserves_first_appearance_order() {
        let keys = vec![
            b"a".to_vec(),
            b"b".to_vec(),
            b"a".to_vec(),
            b"c".to_vec(),
            b"b".to_vec(),
        ];
        assert_eq!(
            dedupe_keys(&keys),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
    }
}

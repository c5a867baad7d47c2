use crate::foundation::core::NodeId;
use crate::stream::data::StreamData;

/// Generational handle to a payload owned by a [`StreamArena`].
///
/// A stale handle (slot freed, possibly reused) never resolves: lookups
/// return `None` instead of aliasing another payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    idx: u32,
    r#gen: u32,
}

/// Lifetime responsibility tag for a live payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamOwner {
    /// Retained by the given node's cache; freed when that cache clears.
    Cached(NodeId),
    /// Transient walk payload, freed when the level that produced it is
    /// popped. `tracked` is set once the walk has registered the handle
    /// on a level, and guards against registering it twice.
    Pending {
        /// Whether a walk level currently tracks this handle.
        tracked: bool,
    },
    /// Transferred to the leaf output collection; freed on release.
    Output,
}

struct Slot {
    data: StreamData,
    producer: NodeId,
    owner: StreamOwner,
}

struct Entry {
    r#gen: u32,
    body: Option<Slot>,
}

/// Arena owning every payload produced by refresh walks.
///
/// Payload lifetime is driven entirely through owner tags: the walk
/// frees `Pending` payloads when their level pops, cache clears free
/// `Cached` payloads, and [`release`](StreamArena::free) of delivered
/// outputs frees `Output` payloads. Each slot can be freed exactly once;
/// later frees through stale handles are no-ops.
#[derive(Default)]
pub struct StreamArena {
    entries: Vec<Entry>,
    free: Vec<u32>,
}

impl StreamArena {
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a payload produced by `producer`. The new payload starts
    /// `Pending` and untracked.
    pub fn alloc(&mut self, producer: NodeId, data: StreamData) -> StreamHandle {
        let owner = StreamOwner::Pending { tracked: false };
        if let Some(idx) = self.free.pop() {
            let entry = &mut self.entries[idx as usize];
            debug_assert!(entry.body.is_none());
            entry.body = Some(Slot {
                data,
                producer,
                owner,
            });
            StreamHandle {
                idx,
                r#gen: entry.r#gen,
            }
        } else {
            let idx = self.entries.len() as u32;
            self.entries.push(Entry {
                r#gen: 0,
                body: Some(Slot {
                    data,
                    producer,
                    owner,
                }),
            });
            StreamHandle { idx, r#gen: 0 }
        }
    }

    fn slot(&self, h: StreamHandle) -> Option<&Slot> {
        let entry = self.entries.get(h.idx as usize)?;
        if entry.r#gen != h.r#gen {
            return None;
        }
        entry.body.as_ref()
    }

    fn slot_mut(&mut self, h: StreamHandle) -> Option<&mut Slot> {
        let entry = self.entries.get_mut(h.idx as usize)?;
        if entry.r#gen != h.r#gen {
            return None;
        }
        entry.body.as_mut()
    }

    /// Payload behind `h`, or `None` for a stale handle.
    pub fn get(&self, h: StreamHandle) -> Option<&StreamData> {
        self.slot(h).map(|s| &s.data)
    }

    /// Current owner tag, or `None` for a stale handle.
    pub fn owner(&self, h: StreamHandle) -> Option<StreamOwner> {
        self.slot(h).map(|s| s.owner)
    }

    /// Node that produced the payload, or `None` for a stale handle.
    pub fn producer(&self, h: StreamHandle) -> Option<NodeId> {
        self.slot(h).map(|s| s.producer)
    }

    /// Flip a pending payload to cache ownership by `node`.
    ///
    /// Only `Pending` payloads may be admitted to a cache; admitting a
    /// payload some other structure owns is a tracking defect.
    pub(crate) fn mark_cached(&mut self, h: StreamHandle, node: NodeId) {
        if let Some(slot) = self.slot_mut(h) {
            debug_assert!(
                matches!(slot.owner, StreamOwner::Pending { .. }),
                "cache admission of non-pending payload"
            );
            debug_assert_eq!(slot.producer, node, "cache admission of foreign payload");
            slot.owner = StreamOwner::Cached(node);
        }
    }

    /// Flip a pending payload to output ownership. Cached payloads are
    /// left untouched: delivery of a cached payload does not move its
    /// lifetime out of the cache.
    pub(crate) fn mark_output(&mut self, h: StreamHandle) {
        if let Some(slot) = self.slot_mut(h)
            && matches!(slot.owner, StreamOwner::Pending { .. })
        {
            slot.owner = StreamOwner::Output;
        }
    }

    /// Record that the walk now tracks `h` on a level. Returns `false`
    /// (and changes nothing) when the payload is not pending or is
    /// already tracked.
    pub(crate) fn mark_tracked(&mut self, h: StreamHandle) -> bool {
        match self.slot_mut(h) {
            Some(slot) => match slot.owner {
                StreamOwner::Pending { tracked: false } => {
                    slot.owner = StreamOwner::Pending { tracked: true };
                    true
                }
                _ => false,
            },
            None => false,
        }
    }

    /// Free the payload behind `h`. Returns `true` when a live payload
    /// was actually freed; stale handles are a no-op, which is what
    /// makes level pops idempotent against forwarded payloads.
    pub(crate) fn free(&mut self, h: StreamHandle) -> bool {
        let Some(entry) = self.entries.get_mut(h.idx as usize) else {
            return false;
        };
        if entry.r#gen != h.r#gen || entry.body.is_none() {
            return false;
        }
        entry.body = None;
        entry.r#gen = entry.r#gen.wrapping_add(1);
        self.free.push(h.idx);
        true
    }

    /// Free every payload cached by `node`. Returns the number freed.
    pub(crate) fn free_cached_by(&mut self, node: NodeId) -> usize {
        self.free_where(|slot| slot.owner == StreamOwner::Cached(node))
    }

    /// Free every cache-owned payload, whoever owns it. Used when a
    /// whole tree is replaced (undo/redo/load) and no cache survives.
    pub(crate) fn free_all_cached(&mut self) -> usize {
        self.free_where(|slot| matches!(slot.owner, StreamOwner::Cached(_)))
    }

    /// Free every payload still pending. Non-zero on a clean walk end
    /// means a filter produced a payload and dropped it on the floor.
    pub(crate) fn free_pending(&mut self) -> usize {
        self.free_where(|slot| matches!(slot.owner, StreamOwner::Pending { .. }))
    }

    /// Free every walk-transient payload: pending and delivered-output.
    /// The error path uses this so an abandoned walk leaks nothing.
    pub(crate) fn free_transient(&mut self) -> usize {
        self.free_where(|slot| {
            matches!(
                slot.owner,
                StreamOwner::Pending { .. } | StreamOwner::Output
            )
        })
    }

    fn free_where(&mut self, pred: impl Fn(&Slot) -> bool) -> usize {
        let mut n = 0;
        for (idx, entry) in self.entries.iter_mut().enumerate() {
            if let Some(slot) = &entry.body
                && pred(slot)
            {
                entry.body = None;
                entry.r#gen = entry.r#gen.wrapping_add(1);
                self.free.push(idx as u32);
                n += 1;
            }
        }
        n
    }

    /// Number of live payloads.
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.body.is_some()).count()
    }

    /// Total approximate bytes held by cache-owned payloads, for cache
    /// budget admission.
    pub fn cached_bytes(&self) -> u64 {
        self.entries
            .iter()
            .filter_map(|e| e.body.as_ref())
            .filter(|s| matches!(s.owner, StreamOwner::Cached(_)))
            .map(|s| s.data.approx_bytes())
            .sum()
    }

    /// Iterate live handles with their owner tags. Diagnostic/test aid.
    pub fn live(&self) -> impl Iterator<Item = (StreamHandle, StreamOwner)> + '_ {
        self.entries.iter().enumerate().filter_map(|(idx, e)| {
            e.body.as_ref().map(|slot| {
                (
                    StreamHandle {
                        idx: idx as u32,
                        r#gen: e.r#gen,
                    },
                    slot.owner,
                )
            })
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/stream/arena.rs"]
mod tests;

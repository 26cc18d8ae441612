//! Two-region arena with content-addressed interning.
//!
//! Every persistent object lives in one of two regions:
//!
//! - **Scratch**: where every new object is allocated while a step is being
//!   computed. Cleared wholesale once the step's result has been promoted.
//! - **Durable**: where objects survive across steps. Only [`Arena::promote`]
//!   writes here.
//!
//! Objects are addressed by typed [`Handle`]s (an index into a per-type pool
//! plus the region, the scratch epoch and the object's content hash). A
//! fixed-size intern cache maps content hashes to handles so that structurally
//! identical objects collapse to one instance and equality becomes handle
//! equality. The cache is best-effort: a slot holds the newest object written
//! to it, and every hit is re-verified against the full value.
//!
//! Scratch handles carry the epoch they were allocated in. Resolving one after
//! the scratch region has been cleared yields [`SessionError::StaleHandle`]
//! rather than reading reused memory.

use crate::error::{Result, SessionError};
use sha2::{Digest, Sha256};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use tracing::trace;

/// The region an object is allocated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Survives [`Context::checkpoint`](crate::Context::checkpoint).
    Durable,
    /// Reset by every checkpoint.
    Scratch,
}

/// A typed reference to an object stored in an [`Arena`].
pub struct Handle<T> {
    index: u32,
    region: Region,
    epoch: u32,
    hash: u64,
    marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: u32, region: Region, epoch: u32, hash: u64) -> Self {
        Self {
            index,
            region,
            epoch,
            hash,
            marker: PhantomData,
        }
    }

    /// Returns the memoized content hash of the referenced object.
    pub fn content_hash(&self) -> u64 {
        self.hash
    }

    /// Returns the region the object lives in.
    pub fn region(&self) -> Region {
        self.region
    }

    /// Returns true if the object lives in the durable region.
    pub fn is_durable(&self) -> bool {
        self.region == Region::Durable
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.region == other.region && self.epoch == other.epoch
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.region.hash(state);
        self.epoch.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let region = match self.region {
            Region::Durable => "d",
            Region::Scratch => "s",
        };
        write!(f, "Handle({}{}#{}, {:016x})", region, self.epoch, self.index, self.hash)
    }
}

/// Incremental content hasher.
///
/// SHA-256 over a type tag followed by the object's fields, truncated to 64
/// bits. Children contribute their memoized hash, never their address, so the
/// result is identical across processes.
pub struct ContentHasher(Sha256);

impl ContentHasher {
    /// Starts hashing an object of the given kind.
    pub fn new(kind: &'static str) -> Self {
        let mut inner = Sha256::new();
        inner.update(kind.as_bytes());
        inner.update([0u8]);
        Self(inner)
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, value: u8) {
        self.0.update([value]);
    }

    /// Writes a u32, little-endian.
    pub fn write_u32(&mut self, value: u32) {
        self.0.update(value.to_le_bytes());
    }

    /// Writes a u64, little-endian.
    pub fn write_u64(&mut self, value: u64) {
        self.0.update(value.to_le_bytes());
    }

    /// Writes a length-prefixed byte string.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_u64(bytes.len() as u64);
        self.0.update(bytes);
    }

    /// Writes a child reference.
    pub fn write_handle<T>(&mut self, handle: &Handle<T>) {
        self.write_u64(handle.hash);
    }

    /// Finishes and returns the 64-bit content hash.
    pub fn finish(self) -> u64 {
        let digest = self.0.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }
}

/// An immutable, hash-consed value stored in the arena.
pub trait Object: Clone + PartialEq + fmt::Debug + Send + 'static {
    /// Type tag mixed into the content hash.
    const KIND: &'static str;

    /// Feeds every field into the hasher.
    fn hash_fields(&self, hasher: &mut ContentHasher);

    /// Returns a copy whose child handles all point into the durable region.
    fn promote_children(&self, arena: &mut Arena) -> Result<Self>;

    /// Computes the content hash.
    fn content_hash(&self) -> u64 {
        let mut hasher = ContentHasher::new(Self::KIND);
        self.hash_fields(&mut hasher);
        hasher.finish()
    }
}

/// A value that can be stored inside a persistent container.
pub trait Element: Clone + PartialEq + fmt::Debug + Send + 'static {
    /// Feeds the element into the container's hash.
    fn hash_into(&self, hasher: &mut ContentHasher);

    /// Promotes any handle the element holds.
    fn promote(&self, arena: &mut Arena) -> Result<Self>;
}

impl Element for u32 {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        hasher.write_u32(*self);
    }

    fn promote(&self, _arena: &mut Arena) -> Result<Self> {
        Ok(*self)
    }
}

impl<T: Object> Element for Handle<T> {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        hasher.write_handle(self);
    }

    fn promote(&self, arena: &mut Arena) -> Result<Self> {
        arena.promote(*self)
    }
}

impl<E: Element> Element for Option<E> {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        match self {
            None => hasher.write_u8(0),
            Some(inner) => {
                hasher.write_u8(1);
                inner.hash_into(hasher);
            }
        }
    }

    fn promote(&self, arena: &mut Arena) -> Result<Self> {
        self.as_ref().map(|inner| inner.promote(arena)).transpose()
    }
}

/// Type-erased storage for one object type within one region.
trait Pool: Send {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn reset(&mut self);
}

impl<T: Object> Pool for Vec<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn reset(&mut self) {
        // Keeps the capacity so the next step reuses the allocation.
        self.clear();
    }
}

#[derive(Default)]
struct RegionStore {
    pools: HashMap<TypeId, Box<dyn Pool>>,
    objects: usize,
    bytes: usize,
}

impl RegionStore {
    fn pool<T: Object>(&self) -> Option<&Vec<T>> {
        self.pools
            .get(&TypeId::of::<T>())
            .and_then(|pool| pool.as_any().downcast_ref::<Vec<T>>())
    }

    fn pool_mut<T: Object>(&mut self) -> Result<&mut Vec<T>> {
        self.pools
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Vec::<T>::new()) as Box<dyn Pool>)
            .as_any_mut()
            .downcast_mut::<Vec<T>>()
            .ok_or_else(|| SessionError::Inconsistent(format!("pool type mismatch for {}", T::KIND)))
    }

    fn reset(&mut self) {
        for pool in self.pools.values_mut() {
            pool.reset();
        }
        self.objects = 0;
        self.bytes = 0;
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheSlot {
    type_id: TypeId,
    hash: u64,
    index: u32,
    region: Region,
    epoch: u32,
}

/// Fixed-size, single-slot-per-bucket cache from content hash to handle.
struct InternCache {
    slots: Vec<Option<CacheSlot>>,
    mask: u64,
    hits: u64,
    misses: u64,
}

impl InternCache {
    fn new(bits: u32) -> Self {
        let size = 1usize << bits;
        Self {
            slots: vec![None; size],
            mask: (size as u64) - 1,
            hits: 0,
            misses: 0,
        }
    }

    fn bucket(&self, hash: u64) -> usize {
        (hash & self.mask) as usize
    }
}

/// Arena usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Objects currently in the durable region.
    pub durable_objects: usize,
    /// Approximate bytes held by durable objects.
    pub durable_bytes: usize,
    /// Objects currently in the scratch region.
    pub scratch_objects: usize,
    /// Approximate bytes held by scratch objects.
    pub scratch_bytes: usize,
    /// Intern cache hits (verified equal).
    pub cache_hits: u64,
    /// Intern cache misses, including collisions.
    pub cache_misses: u64,
    /// Number of scratch clears plus one.
    pub scratch_epoch: u32,
}

/// The two memory regions plus the intern cache.
pub struct Arena {
    durable: RegionStore,
    scratch: RegionStore,
    cache: InternCache,
    scratch_epoch: u32,
    /// Scratch object (type, index) -> durable index, for the current epoch.
    promoted: HashMap<(TypeId, u32), u32>,
}

impl Arena {
    /// Creates an arena whose intern cache holds `2^cache_bits` slots.
    pub fn new(cache_bits: u32) -> Self {
        Self {
            durable: RegionStore::default(),
            scratch: RegionStore::default(),
            cache: InternCache::new(cache_bits),
            scratch_epoch: 1,
            promoted: HashMap::new(),
        }
    }

    /// Resolves a handle.
    pub fn get<T: Object>(&self, handle: Handle<T>) -> Result<&T> {
        let store = match handle.region {
            Region::Durable => &self.durable,
            Region::Scratch => {
                if handle.epoch != self.scratch_epoch {
                    return Err(SessionError::StaleHandle { kind: T::KIND });
                }
                &self.scratch
            }
        };
        store
            .pool::<T>()
            .and_then(|pool| pool.get(handle.index as usize))
            .ok_or(SessionError::DanglingHandle {
                kind: T::KIND,
                index: handle.index,
            })
    }

    /// Returns true if the handle points into the durable region.
    pub fn is_durable<T>(&self, handle: Handle<T>) -> bool {
        handle.is_durable()
    }

    /// Stores `value` in `region` without consulting the intern cache.
    pub fn alloc<T: Object>(&mut self, value: T, hash: u64, region: Region) -> Result<Handle<T>> {
        let epoch = match region {
            Region::Durable => 0,
            Region::Scratch => self.scratch_epoch,
        };
        let store = match region {
            Region::Durable => &mut self.durable,
            Region::Scratch => &mut self.scratch,
        };
        let pool = store.pool_mut::<T>()?;
        let index = u32::try_from(pool.len()).map_err(|_| {
            SessionError::Inconsistent(format!("{} pool exceeds u32 indices", T::KIND))
        })?;
        pool.push(value);
        store.objects += 1;
        store.bytes += std::mem::size_of::<T>();
        Ok(Handle::new(index, region, epoch, hash))
    }

    /// Looks up the cache slot for `hash`.
    ///
    /// The returned handle is only a candidate: callers must compare the full
    /// value before trusting it.
    pub fn get_by_hash<T: Object>(&self, hash: u64) -> Option<Handle<T>> {
        let slot = self.cache.slots[self.cache.bucket(hash)]?;
        if slot.type_id != TypeId::of::<T>() || slot.hash != hash {
            return None;
        }
        if slot.region == Region::Scratch && slot.epoch != self.scratch_epoch {
            return None;
        }
        Some(Handle::new(slot.index, slot.region, slot.epoch, hash))
    }

    /// Records `handle` in the cache, evicting whatever occupied its slot.
    pub fn record_hash<T: Object>(&mut self, handle: Handle<T>) {
        let bucket = self.cache.bucket(handle.hash);
        self.cache.slots[bucket] = Some(CacheSlot {
            type_id: TypeId::of::<T>(),
            hash: handle.hash,
            index: handle.index,
            region: handle.region,
            epoch: handle.epoch,
        });
    }

    /// Interns `value` in the scratch region, reusing an equal object when the
    /// cache knows one.
    pub fn create<T: Object>(&mut self, value: T) -> Result<Handle<T>> {
        self.intern_in(value, Region::Scratch)
    }

    /// Returns the first of `candidates` equal to `value`, or interns `value`.
    ///
    /// State transitions use this so that a no-op returns the input handle.
    pub fn create_or_reuse<T: Object>(
        &mut self,
        value: T,
        candidates: &[Handle<T>],
    ) -> Result<Handle<T>> {
        for &candidate in candidates {
            if *self.get(candidate)? == value {
                return Ok(candidate);
            }
        }
        self.create(value)
    }

    fn intern_in<T: Object>(&mut self, value: T, region: Region) -> Result<Handle<T>> {
        let hash = value.content_hash();
        if let Some(existing) = self.get_by_hash::<T>(hash) {
            // Durable results must never reference scratch objects.
            let usable = region == Region::Scratch || existing.is_durable();
            if usable && self.get(existing).map(|v| *v == value).unwrap_or(false) {
                self.cache.hits += 1;
                return Ok(existing);
            }
        }
        self.cache.misses += 1;
        let handle = self.alloc(value, hash, region)?;
        self.record_hash(handle);
        Ok(handle)
    }

    /// Deep-copies the object graph rooted at `handle` into the durable region.
    ///
    /// Every promoted child is re-interned, so identical children collapse to
    /// one durable instance. Objects already promoted in this epoch are not
    /// copied twice. Durable handles are returned unchanged.
    pub fn promote<T: Object>(&mut self, handle: Handle<T>) -> Result<Handle<T>> {
        if handle.is_durable() {
            return Ok(handle);
        }
        if handle.epoch != self.scratch_epoch {
            return Err(SessionError::StaleHandle { kind: T::KIND });
        }
        let key = (TypeId::of::<T>(), handle.index);
        if let Some(&index) = self.promoted.get(&key) {
            return Ok(Handle::new(index, Region::Durable, 0, handle.hash));
        }
        let value = self.get(handle)?.clone();
        let value = value.promote_children(self)?;
        let durable = self.intern_in(value, Region::Durable)?;
        self.promoted.insert(key, durable.index);
        Ok(durable)
    }

    /// Resets the scratch region and invalidates every scratch handle.
    ///
    /// Only reachable through [`Context::checkpoint`](crate::Context::checkpoint),
    /// which promotes the caller's root first.
    pub(crate) fn clear_scratch(&mut self) {
        trace!(
            epoch = self.scratch_epoch,
            objects = self.scratch.objects,
            promoted = self.promoted.len(),
            "clearing scratch region"
        );
        self.scratch.reset();
        self.promoted.clear();
        self.scratch_epoch = self.scratch_epoch.wrapping_add(1).max(1);
    }

    /// Returns the current scratch epoch.
    pub fn scratch_epoch(&self) -> u32 {
        self.scratch_epoch
    }

    /// Returns usage counters.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            durable_objects: self.durable.objects,
            durable_bytes: self.durable.bytes,
            scratch_objects: self.scratch.objects,
            scratch_bytes: self.scratch.bytes,
            cache_hits: self.cache.hits,
            cache_misses: self.cache.misses,
            scratch_epoch: self.scratch_epoch,
        }
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena").field("stats", &self.stats()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Leaf(u32);

    impl Object for Leaf {
        const KIND: &'static str = "test_leaf";

        fn hash_fields(&self, hasher: &mut ContentHasher) {
            hasher.write_u32(self.0);
        }

        fn promote_children(&self, _arena: &mut Arena) -> Result<Self> {
            Ok(self.clone())
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Pair(Handle<Leaf>, Handle<Leaf>);

    impl Object for Pair {
        const KIND: &'static str = "test_pair";

        fn hash_fields(&self, hasher: &mut ContentHasher) {
            hasher.write_handle(&self.0);
            hasher.write_handle(&self.1);
        }

        fn promote_children(&self, arena: &mut Arena) -> Result<Self> {
            Ok(Pair(arena.promote(self.0)?, arena.promote(self.1)?))
        }
    }

    #[test]
    fn test_create_deduplicates() {
        let mut arena = Arena::new(10);
        let a = arena.create(Leaf(7)).unwrap();
        let b = arena.create(Leaf(7)).unwrap();
        let c = arena.create(Leaf(8)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(arena.stats().scratch_objects, 2);
    }

    #[test]
    fn test_content_hash_independent_of_region() {
        let mut arena = Arena::new(10);
        let scratch = arena.create(Leaf(1)).unwrap();
        let durable = arena.promote(scratch).unwrap();
        assert!(durable.is_durable());
        assert!(!scratch.is_durable());
        assert_eq!(scratch.content_hash(), durable.content_hash());
    }

    #[test]
    fn test_promote_preserves_sharing() {
        let mut arena = Arena::new(10);
        let leaf = arena.create(Leaf(3)).unwrap();
        let pair = arena.create(Pair(leaf, leaf)).unwrap();
        let promoted = arena.promote(pair).unwrap();

        let value = arena.get(promoted).unwrap().clone();
        assert_eq!(value.0, value.1);
        assert!(value.0.is_durable());
        assert_eq!(arena.stats().durable_objects, 2);
    }

    #[test]
    fn test_promote_durable_is_noop() {
        let mut arena = Arena::new(10);
        let leaf = arena.create(Leaf(3)).unwrap();
        let durable = arena.promote(leaf).unwrap();
        assert_eq!(arena.promote(durable).unwrap(), durable);
    }

    #[test]
    fn test_stale_handle_after_clear() {
        let mut arena = Arena::new(10);
        let leaf = arena.create(Leaf(5)).unwrap();
        let kept = arena.promote(leaf).unwrap();
        arena.clear_scratch();

        assert!(matches!(
            arena.get(leaf),
            Err(SessionError::StaleHandle { kind: "test_leaf" })
        ));
        assert_eq!(arena.get(kept).unwrap(), &Leaf(5));
        assert!(arena.promote(leaf).is_err());
    }

    #[test]
    fn test_scratch_reuses_durable_instance() {
        let mut arena = Arena::new(10);
        let leaf = arena.create(Leaf(9)).unwrap();
        let durable = arena.promote(leaf).unwrap();
        arena.clear_scratch();

        let again = arena.create(Leaf(9)).unwrap();
        assert_eq!(again, durable);
    }

    #[test]
    fn test_collision_keeps_newest() {
        // One-slot cache: every object collides.
        let mut arena = Arena::new(0);
        let a = arena.create(Leaf(1)).unwrap();
        let _b = arena.create(Leaf(2)).unwrap();
        let a2 = arena.create(Leaf(1)).unwrap();
        assert_ne!(a, a2);
        assert_eq!(arena.get(a).unwrap(), arena.get(a2).unwrap());
        assert_eq!(a.content_hash(), a2.content_hash());
    }

    #[test]
    fn test_create_or_reuse_prefers_candidates() {
        let mut arena = Arena::new(0);
        let a = arena.create(Leaf(1)).unwrap();
        let _evict = arena.create(Leaf(2)).unwrap();
        let reused = arena.create_or_reuse(Leaf(1), &[a]).unwrap();
        assert_eq!(reused, a);
    }
}

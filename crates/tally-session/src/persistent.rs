//! Copy-on-write containers stored in the arena.
//!
//! Every container is an immutable [`Object`]: an update builds a new
//! container and interns it, so two containers with the same content end up
//! behind the same handle (modulo intern-cache evictions). Merges return one
//! of their inputs unchanged whenever that input already covers the other.

use crate::arena::{Arena, ContentHasher, Element, Handle, Object};
use crate::context::Context;
use crate::error::{Result, SessionError};
use std::fmt;
use tally_types::CandidateId;

/// A fixed or append-only sequence of elements.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentVector<E> {
    items: Vec<E>,
}

impl<E: Element> Object for PersistentVector<E> {
    const KIND: &'static str = "vector";

    fn hash_fields(&self, hasher: &mut ContentHasher) {
        hasher.write_u64(self.items.len() as u64);
        for item in &self.items {
            item.hash_into(hasher);
        }
    }

    fn promote_children(&self, arena: &mut Arena) -> Result<Self> {
        let items = self
            .items
            .iter()
            .map(|item| item.promote(arena))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { items })
    }
}

impl<E: Element> PersistentVector<E> {
    /// Interns a vector holding `items`.
    pub fn create(ctx: &mut Context, items: Vec<E>) -> Result<Handle<Self>> {
        ctx.arena.create(Self { items })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the vector holds no element.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Element at `idx`.
    pub fn at(&self, idx: usize) -> Option<&E> {
        self.items.get(idx)
    }

    /// Iterates over the elements.
    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.items.iter()
    }

    /// Returns a vector equal to `vec` except at `idx`.
    pub fn change(ctx: &mut Context, vec: Handle<Self>, idx: usize, value: E) -> Result<Handle<Self>> {
        let mut items = ctx.get(vec)?.items.clone();
        let slot = items.get_mut(idx).ok_or_else(|| {
            SessionError::Inconsistent(format!("vector change at {idx} out of bounds"))
        })?;
        if *slot == value {
            return Ok(vec);
        }
        *slot = value;
        ctx.arena.create(Self { items })
    }

    /// Appends `value`; `idx` must equal the current length.
    pub fn push(ctx: &mut Context, vec: Handle<Self>, idx: usize, value: E) -> Result<Handle<Self>> {
        let mut items = ctx.get(vec)?.items.clone();
        if idx != items.len() {
            return Err(SessionError::Inconsistent(format!(
                "vector push at {idx}, length is {}",
                items.len()
            )));
        }
        items.push(value);
        ctx.arena.create(Self { items })
    }

    /// Slot-wise merge.
    ///
    /// Slots present on one side only are copied through. Equal slots are
    /// kept, differing ones are resolved by `merge_fn`, which must itself be
    /// commutative for the merge to be.
    pub fn merge<F>(
        ctx: &mut Context,
        left: Handle<Self>,
        right: Handle<Self>,
        mut merge_fn: F,
    ) -> Result<Handle<Self>>
    where
        F: FnMut(&mut Context, &E, &E) -> Result<E>,
    {
        if left == right {
            return Ok(left);
        }
        let l = ctx.get(left)?.items.clone();
        let r = ctx.get(right)?.items.clone();
        let len = l.len().max(r.len());
        let mut items = Vec::with_capacity(len);
        for idx in 0..len {
            let item = match (l.get(idx), r.get(idx)) {
                (Some(a), Some(b)) if a == b => a.clone(),
                (Some(a), Some(b)) => merge_fn(ctx, a, b)?,
                (Some(a), None) => a.clone(),
                (None, Some(b)) => b.clone(),
                (None, None) => break,
            };
            items.push(item);
        }
        ctx.arena.create_or_reuse(Self { items }, &[left, right])
    }
}

/// Merges two optional children, returning the present side when only one is.
pub fn merge_optional<T, F>(
    ctx: &mut Context,
    left: Option<Handle<T>>,
    right: Option<Handle<T>>,
    merge_fn: F,
) -> Result<Option<Handle<T>>>
where
    F: FnOnce(&mut Context, Handle<T>, Handle<T>) -> Result<Handle<T>>,
{
    match (left, right) {
        (Some(l), Some(r)) if l == r => Ok(Some(l)),
        (Some(l), Some(r)) => merge_fn(ctx, l, r).map(Some),
        (Some(l), None) => Ok(Some(l)),
        (None, r) => Ok(r),
    }
}

/// Merges two per-source `Option<u32>` vectors slot-wise with `pick`.
pub(crate) fn merge_markers(
    ctx: &mut Context,
    left: Handle<PersistentVector<Option<u32>>>,
    right: Handle<PersistentVector<Option<u32>>>,
    pick: fn(u32, u32) -> u32,
) -> Result<Handle<PersistentVector<Option<u32>>>> {
    PersistentVector::merge(ctx, left, right, |_, a, b| {
        Ok(match (*a, *b) {
            (Some(a), Some(b)) => Some(pick(a, b)),
            (a, b) => a.or(b),
        })
    })
}

/// A packed boolean vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentBitset {
    words: Vec<u64>,
    len: u32,
}

impl Object for PersistentBitset {
    const KIND: &'static str = "bitset";

    fn hash_fields(&self, hasher: &mut ContentHasher) {
        hasher.write_u32(self.len);
        for word in &self.words {
            hasher.write_u64(*word);
        }
    }

    fn promote_children(&self, _arena: &mut Arena) -> Result<Self> {
        Ok(self.clone())
    }
}

impl PersistentBitset {
    /// Interns an all-clear bitset of `len` bits.
    pub fn create(ctx: &mut Context, len: u32) -> Result<Handle<Self>> {
        let words = vec![0u64; (len as usize).div_ceil(64)];
        ctx.arena.create(Self { words, len })
    }

    /// Number of bits.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Returns true for a zero-length bitset.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads bit `idx`; out-of-range bits read as clear.
    pub fn get(&self, idx: u32) -> bool {
        if idx >= self.len {
            return false;
        }
        self.words[(idx / 64) as usize] & (1u64 << (idx % 64)) != 0
    }

    /// Number of set bits.
    pub fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Iterates over the indices of set bits, in increasing order.
    pub fn iter_set(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len).filter(move |&idx| self.get(idx))
    }

    /// Returns true if every bit set in `other` is set in `self`.
    pub fn covers(&self, other: &Self) -> bool {
        self.len >= other.len
            && self
                .words
                .iter()
                .zip(&other.words)
                .all(|(a, b)| a & b == *b)
    }

    /// Returns a bitset equal to `set` except at `idx`.
    pub fn change(ctx: &mut Context, set: Handle<Self>, idx: u32, value: bool) -> Result<Handle<Self>> {
        let current = ctx.get(set)?;
        if idx >= current.len {
            return Err(SessionError::Inconsistent(format!(
                "bitset change at {idx}, length is {}",
                current.len
            )));
        }
        if current.get(idx) == value {
            return Ok(set);
        }
        let mut next = current.clone();
        let mask = 1u64 << (idx % 64);
        if value {
            next.words[(idx / 64) as usize] |= mask;
        } else {
            next.words[(idx / 64) as usize] &= !mask;
        }
        ctx.arena.create(next)
    }

    /// Bitwise OR.
    pub fn merge(ctx: &mut Context, left: Handle<Self>, right: Handle<Self>) -> Result<Handle<Self>> {
        if left == right {
            return Ok(left);
        }
        let l = ctx.get(left)?;
        let r = ctx.get(right)?;
        if l.covers(r) {
            return Ok(left);
        }
        if r.covers(l) {
            return Ok(right);
        }
        let len = l.len.max(r.len);
        let words = (0..(len as usize).div_ceil(64))
            .map(|i| l.words.get(i).copied().unwrap_or(0) | r.words.get(i).copied().unwrap_or(0))
            .collect();
        ctx.arena.create(Self { words, len })
    }
}

/// A key usable in a [`PersistentSortedVector`].
pub trait SortKey: Copy + Ord + fmt::Debug + Send + 'static {
    /// Feeds the key into a container hash.
    fn hash_into(&self, hasher: &mut ContentHasher);
}

impl SortKey for u32 {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        hasher.write_u32(*self);
    }
}

impl SortKey for CandidateId {
    fn hash_into(&self, hasher: &mut ContentHasher) {
        hasher.write_bytes(self.as_bytes());
    }
}

/// An object ordered by a key inside a [`PersistentSortedVector`].
pub trait Keyed: Object {
    /// Sort key type.
    type Key: SortKey;

    /// Returns the object's key.
    fn key(&self) -> Self::Key;
}

/// Objects kept sorted by key, at most one per key.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentSortedVector<T: Keyed> {
    entries: Vec<(T::Key, Handle<T>)>,
}

impl<T: Keyed> Object for PersistentSortedVector<T> {
    const KIND: &'static str = "sorted_vector";

    fn hash_fields(&self, hasher: &mut ContentHasher) {
        hasher.write_u64(self.entries.len() as u64);
        for (key, handle) in &self.entries {
            key.hash_into(hasher);
            hasher.write_handle(handle);
        }
    }

    fn promote_children(&self, arena: &mut Arena) -> Result<Self> {
        let entries = self
            .entries
            .iter()
            .map(|(key, handle)| Ok((*key, arena.promote(*handle)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }
}

impl<T: Keyed> PersistentSortedVector<T> {
    /// Interns an empty vector.
    pub fn empty(ctx: &mut Context) -> Result<Handle<Self>> {
        ctx.arena.create(Self {
            entries: Vec::new(),
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there is no entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds the entry for `key`.
    pub fn find(&self, key: T::Key) -> Option<Handle<T>> {
        self.entries
            .binary_search_by(|(k, _)| k.cmp(&key))
            .ok()
            .map(|pos| self.entries[pos].1)
    }

    /// Iterates over `(key, handle)` pairs in key order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (T::Key, Handle<T>)> + '_ {
        self.entries.iter().copied()
    }

    /// Finds the entry for `key` in the vector behind `vec`.
    pub fn get(ctx: &Context, vec: Handle<Self>, key: T::Key) -> Result<Option<Handle<T>>> {
        Ok(ctx.get(vec)?.find(key))
    }

    /// Inserts `item`, replacing any entry with the same key.
    pub fn push(ctx: &mut Context, vec: Handle<Self>, item: Handle<T>) -> Result<Handle<Self>> {
        let key = ctx.get(item)?.key();
        let mut entries = ctx.get(vec)?.entries.clone();
        match entries.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(pos) if entries[pos].1 == item => return Ok(vec),
            Ok(pos) => entries[pos].1 = item,
            Err(pos) => entries.insert(pos, (key, item)),
        }
        ctx.arena.create(Self { entries })
    }

    /// Ordered linear merge; `merge_fn` resolves entries sharing a key.
    pub fn merge<F>(
        ctx: &mut Context,
        left: Handle<Self>,
        right: Handle<Self>,
        mut merge_fn: F,
    ) -> Result<Handle<Self>>
    where
        F: FnMut(&mut Context, Handle<T>, Handle<T>) -> Result<Handle<T>>,
    {
        if left == right {
            return Ok(left);
        }
        let l = ctx.get(left)?.entries.clone();
        let r = ctx.get(right)?.entries.clone();
        let mut entries = Vec::with_capacity(l.len().max(r.len()));
        let (mut i, mut j) = (0, 0);
        while i < l.len() && j < r.len() {
            let (lk, lh) = l[i];
            let (rk, rh) = r[j];
            match lk.cmp(&rk) {
                std::cmp::Ordering::Less => {
                    entries.push((lk, lh));
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    entries.push((rk, rh));
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    let merged = if lh == rh { lh } else { merge_fn(ctx, lh, rh)? };
                    entries.push((lk, merged));
                    i += 1;
                    j += 1;
                }
            }
        }
        entries.extend_from_slice(&l[i..]);
        entries.extend_from_slice(&r[j..]);
        ctx.arena.create_or_reuse(Self { entries }, &[left, right])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        key: u32,
        value: u32,
    }

    impl Object for Counter {
        const KIND: &'static str = "test_counter";

        fn hash_fields(&self, hasher: &mut ContentHasher) {
            hasher.write_u32(self.key);
            hasher.write_u32(self.value);
        }

        fn promote_children(&self, _arena: &mut Arena) -> Result<Self> {
            Ok(self.clone())
        }
    }

    impl Keyed for Counter {
        type Key = u32;

        fn key(&self) -> u32 {
            self.key
        }
    }

    fn counter(ctx: &mut Context, key: u32, value: u32) -> Handle<Counter> {
        ctx.arena.create(Counter { key, value }).unwrap()
    }

    fn max_counter(ctx: &mut Context, a: Handle<Counter>, b: Handle<Counter>) -> Result<Handle<Counter>> {
        let (va, vb) = (ctx.get(a)?.value, ctx.get(b)?.value);
        Ok(if va >= vb { a } else { b })
    }

    #[test]
    fn test_equal_vectors_share_handle() {
        let mut ctx = test_context(4);
        let a = PersistentVector::create(&mut ctx, vec![1u32, 2, 3]).unwrap();
        let b = PersistentVector::create(&mut ctx, vec![1u32, 2, 3]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_change_same_value_is_identity() {
        let mut ctx = test_context(4);
        let v = PersistentVector::create(&mut ctx, vec![0u32; 4]).unwrap();
        assert_eq!(PersistentVector::change(&mut ctx, v, 2, 0).unwrap(), v);

        let changed = PersistentVector::change(&mut ctx, v, 2, 7).unwrap();
        assert_ne!(changed, v);
        assert_eq!(ctx.get(changed).unwrap().at(2), Some(&7));
        assert_eq!(ctx.get(v).unwrap().at(2), Some(&0));
    }

    #[test]
    fn test_change_out_of_bounds() {
        let mut ctx = test_context(4);
        let v = PersistentVector::create(&mut ctx, vec![0u32; 2]).unwrap();
        assert!(PersistentVector::change(&mut ctx, v, 5, 1).is_err());
    }

    #[test]
    fn test_push_requires_next_index() {
        let mut ctx = test_context(4);
        let v = PersistentVector::<u32>::create(&mut ctx, vec![]).unwrap();
        let v = PersistentVector::push(&mut ctx, v, 0, 10).unwrap();
        assert!(PersistentVector::push(&mut ctx, v, 2, 11).is_err());
        let v = PersistentVector::push(&mut ctx, v, 1, 11).unwrap();
        assert_eq!(ctx.get(v).unwrap().len(), 2);
    }

    #[test]
    fn test_vector_merge_subsumed_returns_input() {
        let mut ctx = test_context(4);
        let small = PersistentVector::create(&mut ctx, vec![1u32, 2]).unwrap();
        let big = PersistentVector::create(&mut ctx, vec![1u32, 5, 3]).unwrap();
        let merged = PersistentVector::merge(&mut ctx, small, big, |_, a, b| Ok(*a.max(b))).unwrap();
        assert_eq!(merged, big);
        let merged = PersistentVector::merge(&mut ctx, big, small, |_, a, b| Ok(*a.max(b))).unwrap();
        assert_eq!(merged, big);
    }

    #[test]
    fn test_vector_merge_slotwise() {
        let mut ctx = test_context(4);
        let a = PersistentVector::create(&mut ctx, vec![1u32, 9, 0]).unwrap();
        let b = PersistentVector::create(&mut ctx, vec![4u32, 2, 0, 6]).unwrap();
        let merged = PersistentVector::merge(&mut ctx, a, b, |_, x, y| Ok(*x.max(y))).unwrap();
        let items: Vec<u32> = ctx.get(merged).unwrap().iter().copied().collect();
        assert_eq!(items, vec![4, 9, 0, 6]);
    }

    #[test]
    fn test_merge_markers() {
        let mut ctx = test_context(4);
        let a = PersistentVector::create(&mut ctx, vec![Some(1u32), None, Some(5)]).unwrap();
        let b = PersistentVector::create(&mut ctx, vec![Some(3u32), Some(2), None]).unwrap();
        let max = merge_markers(&mut ctx, a, b, u32::max).unwrap();
        let min = merge_markers(&mut ctx, a, b, u32::min).unwrap();
        let max: Vec<_> = ctx.get(max).unwrap().iter().copied().collect();
        let min: Vec<_> = ctx.get(min).unwrap().iter().copied().collect();
        assert_eq!(max, vec![Some(3), Some(2), Some(5)]);
        assert_eq!(min, vec![Some(1), Some(2), Some(5)]);
    }

    #[test]
    fn test_merge_optional() {
        let mut ctx = test_context(4);
        let a = counter(&mut ctx, 1, 1);
        let b = counter(&mut ctx, 1, 2);
        assert_eq!(merge_optional(&mut ctx, Some(a), None, max_counter).unwrap(), Some(a));
        assert_eq!(merge_optional(&mut ctx, None, Some(b), max_counter).unwrap(), Some(b));
        assert_eq!(merge_optional(&mut ctx, Some(a), Some(b), max_counter).unwrap(), Some(b));
        assert_eq!(merge_optional::<Counter, _>(&mut ctx, None, None, max_counter).unwrap(), None);
    }

    #[test]
    fn test_bitset_change_and_count() {
        let mut ctx = test_context(4);
        let set = PersistentBitset::create(&mut ctx, 70).unwrap();
        let set = PersistentBitset::change(&mut ctx, set, 3, true).unwrap();
        let set = PersistentBitset::change(&mut ctx, set, 65, true).unwrap();
        let value = ctx.get(set).unwrap();
        assert!(value.get(3));
        assert!(value.get(65));
        assert!(!value.get(4));
        assert_eq!(value.count(), 2);
        assert_eq!(value.iter_set().collect::<Vec<_>>(), vec![3, 65]);
    }

    #[test]
    fn test_bitset_change_same_value_is_identity() {
        let mut ctx = test_context(4);
        let set = PersistentBitset::create(&mut ctx, 4).unwrap();
        assert_eq!(PersistentBitset::change(&mut ctx, set, 1, false).unwrap(), set);
        assert!(PersistentBitset::change(&mut ctx, set, 4, true).is_err());
    }

    #[test]
    fn test_bitset_merge_or() {
        let mut ctx = test_context(4);
        let empty = PersistentBitset::create(&mut ctx, 4).unwrap();
        let a = PersistentBitset::change(&mut ctx, empty, 0, true).unwrap();
        let b = PersistentBitset::change(&mut ctx, empty, 2, true).unwrap();
        let ab = PersistentBitset::merge(&mut ctx, a, b).unwrap();
        assert_eq!(ctx.get(ab).unwrap().iter_set().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(PersistentBitset::merge(&mut ctx, ab, a).unwrap(), ab);
        assert_eq!(PersistentBitset::merge(&mut ctx, b, ab).unwrap(), ab);
        assert_eq!(PersistentBitset::merge(&mut ctx, a, a).unwrap(), a);
    }

    #[test]
    fn test_sorted_push_keeps_order() {
        let mut ctx = test_context(4);
        let vec = PersistentSortedVector::<Counter>::empty(&mut ctx).unwrap();
        let c3 = counter(&mut ctx, 3, 0);
        let c1 = counter(&mut ctx, 1, 0);
        let vec = PersistentSortedVector::push(&mut ctx, vec, c3).unwrap();
        let vec = PersistentSortedVector::push(&mut ctx, vec, c1).unwrap();
        let keys: Vec<u32> = ctx.get(vec).unwrap().iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![1, 3]);

        let c3b = counter(&mut ctx, 3, 9);
        let replaced = PersistentSortedVector::push(&mut ctx, vec, c3b).unwrap();
        assert_eq!(PersistentSortedVector::get(&ctx, replaced, 3).unwrap(), Some(c3b));
        assert_eq!(PersistentSortedVector::push(&mut ctx, replaced, c3b).unwrap(), replaced);
    }

    #[test]
    fn test_sorted_merge() {
        let mut ctx = test_context(4);
        let empty = PersistentSortedVector::<Counter>::empty(&mut ctx).unwrap();
        let a1 = counter(&mut ctx, 1, 5);
        let a2 = counter(&mut ctx, 2, 1);
        let b2 = counter(&mut ctx, 2, 7);
        let b4 = counter(&mut ctx, 4, 0);

        let left = PersistentSortedVector::push(&mut ctx, empty, a1).unwrap();
        let left = PersistentSortedVector::push(&mut ctx, left, a2).unwrap();
        let right = PersistentSortedVector::push(&mut ctx, empty, b2).unwrap();
        let right = PersistentSortedVector::push(&mut ctx, right, b4).unwrap();

        let merged = PersistentSortedVector::merge(&mut ctx, left, right, max_counter).unwrap();
        let value = ctx.get(merged).unwrap().clone();
        assert_eq!(value.len(), 3);
        assert_eq!(value.find(1), Some(a1));
        assert_eq!(value.find(2), Some(b2));
        assert_eq!(value.find(4), Some(b4));

        assert_eq!(PersistentSortedVector::merge(&mut ctx, merged, left, max_counter).unwrap(), merged);
        assert_eq!(PersistentSortedVector::merge(&mut ctx, empty, merged, max_counter).unwrap(), merged);
    }
}

//! Session context: the immutable description plus the mutable arena.

use crate::arena::{Arena, ArenaStats, Handle, Object};
use crate::description::Description;
use crate::error::Result;
use tracing::trace;

/// Everything a state transition runs against.
///
/// The description never changes after construction. The arena grows as
/// states are built, and its scratch region is reset by [`Context::checkpoint`].
#[derive(Debug)]
pub struct Context {
    pub(crate) desc: Description,
    pub(crate) arena: Arena,
}

impl Context {
    /// Creates a context sized by the description's options.
    pub fn new(desc: Description) -> Self {
        let arena = Arena::new(desc.options().intern_cache_bits);
        Self { desc, arena }
    }

    /// Returns the session description.
    pub fn description(&self) -> &Description {
        &self.desc
    }

    /// Returns the arena.
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Resolves a handle.
    pub fn get<T: Object>(&self, handle: Handle<T>) -> Result<&T> {
        self.arena.get(handle)
    }

    /// Moves the graph rooted at `handle` into the durable region.
    pub fn promote<T: Object>(&mut self, handle: Handle<T>) -> Result<Handle<T>> {
        self.arena.promote(handle)
    }

    /// Promotes `root` and then resets the scratch region.
    ///
    /// The returned handle is durable. Every scratch handle obtained before
    /// the call becomes stale.
    pub fn checkpoint<T: Object>(&mut self, root: Handle<T>) -> Result<Handle<T>> {
        let durable = self.arena.promote(root)?;
        self.arena.clear_scratch();
        trace!(
            kind = T::KIND,
            durable_objects = self.arena.stats().durable_objects,
            "checkpoint"
        );
        Ok(durable)
    }

    /// Runs one step against the context and checkpoints its result.
    ///
    /// Scratch handles created inside `f` cannot escape except through the
    /// returned (promoted) root.
    pub fn step<T, F>(&mut self, f: F) -> Result<Handle<T>>
    where
        T: Object,
        F: FnOnce(&mut Context) -> Result<Handle<T>>,
    {
        let root = f(self)?;
        self.checkpoint(root)
    }

    /// Returns arena usage counters.
    pub fn stats(&self) -> ArenaStats {
        self.arena.stats()
    }
}

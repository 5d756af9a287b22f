//! Virtual Register Model
//!
//! A register identity is a (space, name) pair; an instance additionally
//! carries a version (0 until SSA construction, which is outside this crate,
//! bumps it). All instances of one identity observe the same canonical
//! rebinding when the identity is renamed.
//!
//! Identities are interned in a [`RegisterPool`] scoped to one compilation
//! session. The pool is an explicit context object passed to every allocator:
//! there is no process-wide interning table, and dropping (or resetting) the
//! pool ends the session with nothing surviving into the next compilation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Register address space for operand-stack spill slots (named by depth).
pub const SPACE_STACK: u16 = 1;
/// Register address space for bytecode locals (named by local index).
pub const SPACE_LOCAL: u16 = 2;
/// Register address space for session-allocated temporaries.
pub const SPACE_TMP: u16 = 3;
/// Register address space for coprocessor-mapped registers.
pub const SPACE_COPRO: u16 = 4;

/// A versioned virtual-register instance.
///
/// Ordering and equality are lexicographic over (space, name, version), which
/// the derive provides through field order. The reserved identity (0, 0, 0)
/// is the universal "no register" sentinel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RegisterId {
    /// Address space
    pub space: u16,
    /// Numeric name within the space
    pub name: u32,
    /// SSA version (0 before SSA construction)
    pub version: u32,
}

impl RegisterId {
    /// The "invalid/no register" sentinel (0, 0, 0).
    pub const INVALID: RegisterId = RegisterId {
        space: 0,
        name: 0,
        version: 0,
    };

    /// Create a version-0 register instance.
    #[inline]
    pub fn new(space: u16, name: u32) -> Self {
        Self {
            space,
            name,
            version: 0,
        }
    }

    /// True unless this is the invalid sentinel.
    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// The unversioned (space, name) identity of this instance.
    #[inline]
    pub fn identity(self) -> (u16, u32) {
        (self.space, self.name)
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}.{}.{}", self.space, self.name, self.version)
    }
}

/// Session-scoped register interning and allocation state.
///
/// Owns the per-space fresh-name counters, the set of observed identities,
/// and the canonical-rebinding table consulted by [`RegisterPool::resolve`].
/// Exactly one pool exists per compilation session.
#[derive(Debug, Default)]
pub struct RegisterPool {
    /// Highest name observed or issued per space; `get_new` continues past it
    highest: HashMap<u16, u32>,
    /// Canonical rebinding per identity, shared by all instances of the identity
    canonical: HashMap<(u16, u32), (u16, u32)>,
}

impl RegisterPool {
    /// Create an empty pool for a new compilation session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a fresh, session-unique name in `space`.
    ///
    /// Names issued here never collide with names previously observed via
    /// [`RegisterPool::observe`] in the same session.
    pub fn get_new(&mut self, space: u16) -> RegisterId {
        let next: u32 = match self.highest.get(&space) {
            Some(&n) => n + 1,
            None => 1,
        };
        self.highest.insert(space, next);
        RegisterId::new(space, next)
    }

    /// Record an externally named register (stack depth, local index,
    /// coprocessor slot) so the fresh-name counter skips past it.
    pub fn observe(&mut self, reg: RegisterId) {
        let entry = self.highest.entry(reg.space).or_insert(0);
        if reg.name > *entry {
            *entry = reg.name;
        }
    }

    /// Rename an identity: every instance sharing it observes the rebinding.
    pub fn rename(&mut self, from: RegisterId, to: RegisterId) {
        self.canonical.insert(from.identity(), to.identity());
    }

    /// Resolve an instance through the canonical-rebinding table.
    ///
    /// Chases chained renames; the chase is bounded by the table size, so a
    /// (malformed) rename cycle terminates instead of spinning.
    pub fn resolve(&self, reg: RegisterId) -> RegisterId {
        let mut ident = reg.identity();
        let mut hops = 0usize;
        while let Some(&next) = self.canonical.get(&ident) {
            ident = next;
            hops += 1;
            if hops > self.canonical.len() {
                break;
            }
        }
        RegisterId {
            space: ident.0,
            name: ident.1,
            version: reg.version,
        }
    }

    /// End the session: discard all interning and allocation state.
    pub fn reset(&mut self) {
        self.highest.clear();
        self.canonical.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_sentinel_orders_first() {
        let r = RegisterId::new(SPACE_STACK, 0);
        assert!(RegisterId::INVALID < r);
        assert!(!RegisterId::INVALID.is_valid());
        assert!(r.is_valid());
    }

    #[test]
    fn get_new_skips_observed_names() {
        let mut pool = RegisterPool::new();
        pool.observe(RegisterId::new(SPACE_STACK, 7));
        let fresh = pool.get_new(SPACE_STACK);
        assert_eq!(fresh.name, 8);
        // Other spaces are unaffected
        assert_eq!(pool.get_new(SPACE_TMP).name, 1);
    }

    #[test]
    fn rename_is_observed_by_all_instances() {
        let mut pool = RegisterPool::new();
        let a = RegisterId::new(SPACE_TMP, 1);
        let b = RegisterId::new(SPACE_TMP, 2);
        pool.rename(a, b);
        let instance = RegisterId {
            space: SPACE_TMP,
            name: 1,
            version: 3,
        };
        let resolved = pool.resolve(instance);
        assert_eq!(resolved.identity(), b.identity());
        // The instance keeps its own version across the rebinding
        assert_eq!(resolved.version, 3);
    }

    #[test]
    fn reset_clears_the_session() {
        let mut pool = RegisterPool::new();
        pool.get_new(SPACE_TMP);
        pool.rename(RegisterId::new(SPACE_TMP, 1), RegisterId::new(SPACE_TMP, 2));
        pool.reset();
        assert_eq!(pool.get_new(SPACE_TMP).name, 1);
        let r = RegisterId::new(SPACE_TMP, 1);
        assert_eq!(pool.resolve(r), r);
    }
}

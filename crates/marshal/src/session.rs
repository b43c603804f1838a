//! Per-call serialization state.
//!
//! Every top-level [`dump`](crate::dump) or [`load`](crate::load) owns one
//! session, created fresh and discarded with the call. A session carries the
//! two identity tables (objects and symbols are independent namespaces), and
//! on the decode side the transient wrapper state: the pending
//! extended-module stack, the pending user-class override, and the
//! ivar-block markers.

use amber_value::{Heap, SymbolId, Value, ValueId};
use fxhash::FxHashMap;

use crate::error::{EncodeError, LinkError};

/// The sentinel budget meaning "no depth bound".
const UNBOUNDED: i64 = -1;

/// The recursion bound for one encode call.
///
/// The budget counts call-stack depth, not total node count: it is spent on
/// entry to every nested value and refunded on return. `Bounded(0)` fails
/// before encoding anything, matching the historical behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthLimit {
    /// No bound; cyclic graphs still terminate through back-references.
    #[default]
    Unbounded,
    /// Allow at most this many nested values.
    Bounded(u32),
}

impl DepthLimit {
    fn budget(self) -> i64 {
        match self {
            Self::Unbounded => UNBOUNDED,
            Self::Bounded(limit) => i64::from(limit),
        }
    }
}

/// Encode-side state: identity-to-index maps plus the depth budget.
#[derive(Debug)]
pub(crate) struct EncodeSession {
    links: FxHashMap<ValueId, u32>,
    symlinks: FxHashMap<SymbolId, u32>,
    depth: i64,
}

impl EncodeSession {
    pub(crate) fn new(limit: DepthLimit) -> Self {
        Self {
            links: FxHashMap::default(),
            symlinks: FxHashMap::default(),
            depth: limit.budget(),
        }
    }

    /// Spends one unit of the depth budget.
    pub(crate) fn enter(&mut self) -> Result<(), EncodeError> {
        if self.depth == 0 {
            return Err(EncodeError::DepthExceeded);
        }
        self.depth -= 1;
        Ok(())
    }

    /// Refunds one unit of the depth budget.
    pub(crate) fn leave(&mut self) { self.depth += 1; }

    /// Returns the remaining budget (negative means unbounded), passed to
    /// byte-dump codecs as a hint.
    pub(crate) const fn remaining_depth(&self) -> i64 { self.depth }

    pub(crate) fn find_link(&self, id: ValueId) -> Option<u32> {
        self.links.get(&id).copied()
    }

    /// Registers an object identity at the next index.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn add_object(&mut self, id: ValueId) {
        let index = self.links.len() as u32;
        self.links.insert(id, index);
    }

    pub(crate) fn find_symlink(&self, symbol: SymbolId) -> Option<u32> {
        self.symlinks.get(&symbol).copied()
    }

    /// Registers a symbol identity at the next index of the symbol table.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn add_symlink(&mut self, symbol: SymbolId) {
        let index = self.symlinks.len() as u32;
        self.symlinks.insert(symbol, index);
    }
}

/// Decode-side state: index-to-identity tables plus pending wrapper state.
#[derive(Debug, Default)]
pub(crate) struct DecodeSession {
    objects: Vec<ValueId>,
    symbols: Vec<SymbolId>,
    /// Extended-module names awaiting attachment, in wire order
    /// (outermost first).
    pub(crate) pending_modules: Vec<SymbolId>,
    /// A user-class override awaiting consumption by the next string,
    /// pattern, sequence, or mapping construction.
    pub(crate) pending_class: Option<SymbolId>,
    /// One marker per open ivar-block wrapper; a construction that consumes
    /// the block early (the byte-dump payload path) clears its marker.
    pub(crate) has_ivar: Vec<bool>,
}

impl DecodeSession {
    pub(crate) fn new() -> Self { Self::default() }

    /// Registers a decoded object at the next index.
    pub(crate) fn add_object(&mut self, id: ValueId) {
        self.objects.push(id);
    }

    /// Registers a decoded symbol at the next index of the symbol table.
    pub(crate) fn add_symbol(&mut self, symbol: SymbolId) {
        self.symbols.push(symbol);
    }

    /// Resolves an object back-reference.
    pub(crate) fn object(&self, index: i64) -> Result<ValueId, LinkError> {
        usize::try_from(index)
            .ok()
            .and_then(|index| self.objects.get(index))
            .copied()
            .ok_or(LinkError::UnlinkedObject(index))
    }

    /// Resolves a symbol reference.
    pub(crate) fn symbol(&self, index: i64) -> Result<SymbolId, LinkError> {
        usize::try_from(index)
            .ok()
            .and_then(|index| self.symbols.get(index))
            .copied()
            .ok_or(LinkError::BadSymbol(index))
    }
}

/// Returns `true` for kinds that carry no independent identity and are
/// therefore never registered in the object table: `nil`, booleans,
/// integers inside the compact wire range, and symbols (which live in
/// their own table).
pub(crate) fn is_immediate(heap: &Heap, id: ValueId) -> bool {
    match heap.value(id) {
        Value::Nil | Value::Bool(_) | Value::Symbol(_) => true,
        Value::Integer(n) => i32::try_from(*n).is_ok(),
        // A big integer holding a compact value is written as one, so it
        // must not take an index either.
        Value::BigInteger(big) => {
            big.to_i64().is_some_and(|n| i32::try_from(n).is_ok())
        }
        _ => false,
    }
}

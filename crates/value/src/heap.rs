//! The [`Heap`] arena owning every value slot and the symbol intern table.

use fxhash::{FxHashMap, FxHashSet};

use crate::value::{BigInt, SymbolId, Value, ValueId};

/// A single heap slot: a [`Value`] plus the decoration any value may carry.
///
/// Decoration is kept out of the [`Value`] union because it is orthogonal to
/// the kind: a byte string, a sequence, or a plain object may each carry
/// instance variables, a user-class override, or extended modules.
#[derive(Debug, Clone)]
pub struct Slot {
    value: Value,
    class: Option<SymbolId>,
    ivars: Vec<(SymbolId, ValueId)>,
    modules: Vec<SymbolId>,
}

impl Slot {
    const fn new(value: Value) -> Self {
        Self { value, class: None, ivars: Vec::new(), modules: Vec::new() }
    }

    /// Returns the value held by this slot.
    #[must_use]
    pub const fn value(&self) -> &Value { &self.value }

    /// Returns the user-class override, if the value's runtime type is a
    /// named subclass of its base kind.
    #[must_use]
    pub const fn class(&self) -> Option<SymbolId> { self.class }

    /// Returns the instance variables in insertion order.
    #[must_use]
    pub fn ivars(&self) -> &[(SymbolId, ValueId)] { &self.ivars }

    /// Returns the extended-module names, outermost first.
    #[must_use]
    pub fn modules(&self) -> &[SymbolId] { &self.modules }
}

/// An arena of value slots plus the append-only symbol intern table.
///
/// Every value lives in exactly one slot and is named by the [`ValueId`]
/// returned at allocation. Identity is the id: sharing a value between two
/// containers means storing the same id twice, and a cyclic graph is a slot
/// whose contents reach its own id. Nothing in the heap is ever freed or
/// moved, so ids stay valid for the heap's lifetime.
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Slot>,
    symbol_names: Vec<String>,
    symbol_index: FxHashMap<String, SymbolId>,
    symbol_slots: FxHashMap<SymbolId, ValueId>,
}

impl Default for Heap {
    fn default() -> Self { Self::new() }
}

impl Heap {
    /// Slot indices of the shared immediates allocated by [`Heap::new`].
    const NIL_SLOT: ValueId = ValueId(0);
    const FALSE_SLOT: ValueId = ValueId(1);
    const TRUE_SLOT: ValueId = ValueId(2);

    /// Creates an empty heap with the three shared immediates pre-allocated.
    #[must_use]
    pub fn new() -> Self {
        let mut heap = Self {
            slots: Vec::new(),
            symbol_names: Vec::new(),
            symbol_index: FxHashMap::default(),
            symbol_slots: FxHashMap::default(),
        };
        heap.alloc(Value::Nil);
        heap.alloc(Value::Bool(false));
        heap.alloc(Value::Bool(true));
        heap
    }

    /// Returns the shared `nil` value.
    #[must_use]
    pub const fn nil(&self) -> ValueId { Self::NIL_SLOT }

    /// Returns the shared boolean value.
    #[must_use]
    pub const fn bool(&self, value: bool) -> ValueId {
        if value {
            Self::TRUE_SLOT
        } else {
            Self::FALSE_SLOT
        }
    }

    /// Allocates a fresh slot holding `value` and returns its id.
    ///
    /// # Panics
    ///
    /// Panics if the heap has exhausted the 32-bit id space.
    pub fn alloc(&mut self, value: Value) -> ValueId {
        let id = ValueId(
            u32::try_from(self.slots.len()).expect("heap slot space exhausted"),
        );
        self.slots.push(Slot::new(value));
        id
    }

    /// Returns the slot behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this heap.
    #[must_use]
    pub fn get(&self, id: ValueId) -> &Slot { &self.slots[id.index()] }

    /// Returns the value behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this heap.
    #[must_use]
    pub fn value(&self, id: ValueId) -> &Value { &self.slots[id.index()].value }

    // =========================================================================
    // Symbol interning
    // =========================================================================

    /// Interns `name`, returning the same id for every equal name.
    ///
    /// # Panics
    ///
    /// Panics if the intern table has exhausted the 32-bit id space.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.symbol_index.get(name) {
            return id;
        }

        let id = SymbolId(
            u32::try_from(self.symbol_names.len())
                .expect("symbol intern space exhausted"),
        );
        self.symbol_names.push(name.to_owned());
        self.symbol_index.insert(name.to_owned(), id);
        id
    }

    /// Returns the name behind an interned symbol id.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this heap.
    #[must_use]
    pub fn symbol_name(&self, id: SymbolId) -> &str {
        &self.symbol_names[id.index()]
    }

    /// Returns the canonical `Value::Symbol` slot for `symbol`, allocating
    /// it on first use. Symbol values therefore share identity the way
    /// interned names do.
    pub fn symbol_value(&mut self, symbol: SymbolId) -> ValueId {
        if let Some(&id) = self.symbol_slots.get(&symbol) {
            return id;
        }

        let id = self.alloc(Value::Symbol(symbol));
        self.symbol_slots.insert(symbol, id);
        id
    }

    // =========================================================================
    // Convenience constructors
    // =========================================================================

    /// Allocates an integer value.
    pub fn integer(&mut self, value: i64) -> ValueId {
        self.alloc(Value::Integer(value))
    }

    /// Allocates a big-integer value.
    pub fn big_integer(&mut self, value: BigInt) -> ValueId {
        self.alloc(Value::BigInteger(value))
    }

    /// Allocates a float value.
    pub fn float(&mut self, value: f64) -> ValueId {
        self.alloc(Value::Float(value))
    }

    /// Interns `name` and returns its canonical symbol value.
    pub fn symbol(&mut self, name: &str) -> ValueId {
        let symbol = self.intern(name);
        self.symbol_value(symbol)
    }

    /// Allocates a byte-string value.
    pub fn bytes(&mut self, bytes: impl Into<Vec<u8>>) -> ValueId {
        self.alloc(Value::Bytes(bytes.into()))
    }

    /// Allocates a pattern value.
    pub fn pattern(
        &mut self,
        source: impl Into<Vec<u8>>,
        options: u8,
    ) -> ValueId {
        self.alloc(Value::Pattern { source: source.into(), options })
    }

    /// Allocates a sequence value.
    pub fn sequence(&mut self, items: Vec<ValueId>) -> ValueId {
        self.alloc(Value::Sequence(items))
    }

    /// Allocates a mapping value without a default.
    pub fn mapping(&mut self, entries: Vec<(ValueId, ValueId)>) -> ValueId {
        self.alloc(Value::Mapping { entries, default: None })
    }

    /// Allocates a mapping value with a default.
    pub fn mapping_with_default(
        &mut self,
        entries: Vec<(ValueId, ValueId)>,
        default: ValueId,
    ) -> ValueId {
        self.alloc(Value::Mapping { entries, default: Some(default) })
    }

    /// Allocates a record value, interning the type and member names.
    pub fn record(
        &mut self,
        name: &str,
        members: Vec<(&str, ValueId)>,
    ) -> ValueId {
        let name = self.intern(name);
        let members = members
            .into_iter()
            .map(|(member, value)| (self.intern(member), value))
            .collect();
        self.alloc(Value::Record { name, members })
    }

    /// Allocates a plain object of the named class with no fields set.
    pub fn object(&mut self, class: &str) -> ValueId {
        let class = self.intern(class);
        self.alloc(Value::Object { class })
    }

    /// Allocates a class reference.
    pub fn class_ref(&mut self, name: &str) -> ValueId {
        let name = self.intern(name);
        self.alloc(Value::Class(name))
    }

    /// Allocates a module reference.
    pub fn module_ref(&mut self, name: &str) -> ValueId {
        let name = self.intern(name);
        self.alloc(Value::Module(name))
    }

    // =========================================================================
    // Slot mutation
    // =========================================================================

    /// Sets a named instance variable on `id`.
    ///
    /// Names are canonicalized by stripping one leading `@` sigil (the
    /// historical wire format writes object field names with the sigil).
    /// Setting an existing name overwrites its value in place; new names
    /// append in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this heap.
    pub fn set_ivar(&mut self, id: ValueId, name: SymbolId, value: ValueId) {
        let name = self.strip_sigil(name);
        let slot = &mut self.slots[id.index()];

        if let Some(pair) =
            slot.ivars.iter_mut().find(|(existing, _)| *existing == name)
        {
            pair.1 = value;
        } else {
            slot.ivars.push((name, value));
        }
    }

    /// Sets the user-class override on `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this heap.
    pub fn set_class_override(&mut self, id: ValueId, class: SymbolId) {
        self.slots[id.index()].class = Some(class);
    }

    /// Appends extended-module names to `id`, outermost first.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this heap.
    pub fn extend_with(
        &mut self,
        id: ValueId,
        modules: impl IntoIterator<Item = SymbolId>,
    ) {
        self.slots[id.index()].modules.extend(modules);
    }

    /// Appends an element to a sequence value.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not name a sequence in this heap.
    pub fn sequence_push(&mut self, id: ValueId, item: ValueId) {
        match &mut self.slots[id.index()].value {
            Value::Sequence(items) => items.push(item),
            _ => panic!("value is not a sequence"),
        }
    }

    /// Appends a key/value entry to a mapping value.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not name a mapping in this heap.
    pub fn mapping_push(&mut self, id: ValueId, key: ValueId, value: ValueId) {
        match &mut self.slots[id.index()].value {
            Value::Mapping { entries, .. } => entries.push((key, value)),
            _ => panic!("value is not a mapping"),
        }
    }

    /// Sets the default of a mapping value.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not name a mapping in this heap.
    pub fn mapping_set_default(&mut self, id: ValueId, default: ValueId) {
        match &mut self.slots[id.index()].value {
            Value::Mapping { default: slot, .. } => *slot = Some(default),
            _ => panic!("value is not a mapping"),
        }
    }

    /// Appends a member to a record value.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not name a record in this heap.
    pub fn record_push_member(
        &mut self,
        id: ValueId,
        name: SymbolId,
        value: ValueId,
    ) {
        match &mut self.slots[id.index()].value {
            Value::Record { members, .. } => members.push((name, value)),
            _ => panic!("value is not a record"),
        }
    }

    fn strip_sigil(&mut self, name: SymbolId) -> SymbolId {
        let text = self.symbol_name(name);
        if let Some(stripped) = text.strip_prefix('@') {
            let stripped = stripped.to_owned();
            self.intern(&stripped)
        } else {
            name
        }
    }

    // =========================================================================
    // Structural comparison
    // =========================================================================

    /// Deep structural equality between `a` in this heap and `b` in `other`.
    ///
    /// Symbols compare by name, floats by bit pattern with all NaNs treated
    /// as one kind (so `NaN` graphs compare equal while `0.0` and `-0.0` do
    /// not), and decoration (ivars, class override, modules) participates.
    /// Cyclic graphs terminate: a pair of ids already under comparison is
    /// assumed equal.
    #[must_use]
    pub fn deep_eq(&self, a: ValueId, other: &Self, b: ValueId) -> bool {
        let mut visited = FxHashSet::default();
        self.deep_eq_inner(a, other, b, &mut visited)
    }

    fn deep_eq_inner(
        &self,
        a: ValueId,
        other: &Self,
        b: ValueId,
        visited: &mut FxHashSet<(ValueId, ValueId)>,
    ) -> bool {
        if !visited.insert((a, b)) {
            return true;
        }

        let left = self.get(a);
        let right = other.get(b);

        let class_matches = match (left.class(), right.class()) {
            (None, None) => true,
            (Some(x), Some(y)) => {
                self.symbol_name(x) == other.symbol_name(y)
            }
            _ => false,
        };
        if !class_matches {
            return false;
        }

        if left.modules().len() != right.modules().len()
            || !left.modules().iter().zip(right.modules()).all(|(x, y)| {
                self.symbol_name(*x) == other.symbol_name(*y)
            })
        {
            return false;
        }

        if left.ivars().len() != right.ivars().len()
            || !left.ivars().iter().zip(right.ivars()).all(
                |((name_a, value_a), (name_b, value_b))| {
                    self.symbol_name(*name_a) == other.symbol_name(*name_b)
                        && self.deep_eq_inner(*value_a, other, *value_b, visited)
                },
            )
        {
            return false;
        }

        match (left.value(), right.value()) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Integer(x), Value::Integer(y)) => x == y,
            (Value::BigInteger(x), Value::BigInteger(y)) => x == y,
            // Numeric equality reaches across the machine-width split.
            (Value::Integer(x), Value::BigInteger(y)) => {
                y.to_i64() == Some(*x)
            }
            (Value::BigInteger(x), Value::Integer(y)) => {
                x.to_i64() == Some(*y)
            }
            (Value::Float(x), Value::Float(y)) => {
                (x.is_nan() && y.is_nan()) || x.to_bits() == y.to_bits()
            }
            (Value::Symbol(x), Value::Symbol(y)) => {
                self.symbol_name(*x) == other.symbol_name(*y)
            }
            (Value::Bytes(x), Value::Bytes(y)) => x == y,
            (
                Value::Pattern { source: src_a, options: opt_a },
                Value::Pattern { source: src_b, options: opt_b },
            ) => src_a == src_b && opt_a == opt_b,
            (Value::Sequence(items_a), Value::Sequence(items_b)) => {
                items_a.len() == items_b.len()
                    && items_a.iter().zip(items_b).all(|(x, y)| {
                        self.deep_eq_inner(*x, other, *y, visited)
                    })
            }
            (
                Value::Mapping { entries: ent_a, default: def_a },
                Value::Mapping { entries: ent_b, default: def_b },
            ) => {
                let defaults = match (def_a, def_b) {
                    (None, None) => true,
                    (Some(x), Some(y)) => {
                        self.deep_eq_inner(*x, other, *y, visited)
                    }
                    _ => false,
                };
                defaults
                    && ent_a.len() == ent_b.len()
                    && ent_a.iter().zip(ent_b).all(
                        |((key_a, value_a), (key_b, value_b))| {
                            self.deep_eq_inner(*key_a, other, *key_b, visited)
                                && self.deep_eq_inner(
                                    *value_a, other, *value_b, visited,
                                )
                        },
                    )
            }
            (
                Value::Record { name: name_a, members: mem_a },
                Value::Record { name: name_b, members: mem_b },
            ) => {
                self.symbol_name(*name_a) == other.symbol_name(*name_b)
                    && mem_a.len() == mem_b.len()
                    && mem_a.iter().zip(mem_b).all(
                        |((field_a, value_a), (field_b, value_b))| {
                            self.symbol_name(*field_a)
                                == other.symbol_name(*field_b)
                                && self.deep_eq_inner(
                                    *value_a, other, *value_b, visited,
                                )
                        },
                    )
            }
            (
                Value::Object { class: class_a },
                Value::Object { class: class_b },
            ) => self.symbol_name(*class_a) == other.symbol_name(*class_b),
            (Value::Class(x), Value::Class(y))
            | (Value::Module(x), Value::Module(y)) => {
                self.symbol_name(*x) == other.symbol_name(*y)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_deduplicates() {
        let mut heap = Heap::new();
        let a = heap.intern("name");
        let b = heap.intern("name");
        let c = heap.intern("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.symbol_name(a), "name");
    }

    #[test]
    fn symbol_values_share_identity() {
        let mut heap = Heap::new();
        let a = heap.symbol("tag");
        let b = heap.symbol("tag");
        assert_eq!(a, b);
    }

    #[test]
    fn set_ivar_strips_sigil_and_overwrites() {
        let mut heap = Heap::new();
        let object = heap.object("Widget");
        let one = heap.integer(1);
        let two = heap.integer(2);

        let sigiled = heap.intern("@size");
        heap.set_ivar(object, sigiled, one);
        let bare = heap.intern("size");
        heap.set_ivar(object, bare, two);

        let ivars = heap.get(object).ivars();
        assert_eq!(ivars.len(), 1);
        assert_eq!(heap.symbol_name(ivars[0].0), "size");
        assert_eq!(ivars[0].1, two);
    }

    #[test]
    fn deep_eq_across_heaps() {
        let mut left = Heap::new();
        let mut right = Heap::new();

        let a = {
            let n = left.integer(42);
            let s = left.bytes("hello");
            left.sequence(vec![n, s])
        };
        let b = {
            let s = right.bytes("hello");
            let n = right.integer(42);
            right.sequence(vec![n, s])
        };

        assert!(left.deep_eq(a, &right, b));
    }

    #[test]
    fn deep_eq_terminates_on_cycles() {
        let mut left = Heap::new();
        let a = left.sequence(vec![]);
        left.sequence_push(a, a);

        let mut right = Heap::new();
        let b = right.sequence(vec![]);
        right.sequence_push(b, b);

        assert!(left.deep_eq(a, &right, b));
    }

    #[test]
    fn deep_eq_distinguishes_float_zero_signs() {
        let mut left = Heap::new();
        let mut right = Heap::new();

        let pos = left.float(0.0);
        let neg = right.float(-0.0);
        assert!(!left.deep_eq(pos, &right, neg));

        let nan_a = left.float(f64::NAN);
        let nan_b = right.float(-f64::NAN);
        assert!(left.deep_eq(nan_a, &right, nan_b));
    }

    #[test]
    fn deep_eq_compares_decoration() {
        let mut left = Heap::new();
        let mut right = Heap::new();

        let a = left.bytes("payload");
        let cls = left.intern("Blob");
        left.set_class_override(a, cls);

        let b = right.bytes("payload");
        assert!(!left.deep_eq(a, &right, b));

        let cls = right.intern("Blob");
        right.set_class_override(b, cls);
        assert!(left.deep_eq(a, &right, b));
    }
}

//! Shared helpers for the cross-crate behavioral suite under `tests/`.

use amber_marshal::{dump, load, DepthLimit, Registry, TypeRegistry};
use amber_value::{Heap, ValueId};

/// The product of one encode/decode pass: both heaps, both roots, and the
/// wire bytes in between.
#[derive(Debug)]
pub struct RoundTrip {
    /// The heap the graph was built in.
    pub source: Heap,
    /// The encoded root.
    pub root: ValueId,
    /// The heap the graph was decoded into.
    pub decoded: Heap,
    /// The decoded root.
    pub result: ValueId,
    /// The encoded stream.
    pub bytes: Vec<u8>,
}

impl RoundTrip {
    /// Asserts the decoded graph is structurally equal to the source.
    ///
    /// # Panics
    ///
    /// Panics when the graphs differ.
    pub fn assert_deep_eq(&self) {
        assert!(
            self.source.deep_eq(self.root, &self.decoded, self.result),
            "decoded graph differs from the source"
        );
    }
}

/// Builds a graph, encodes it unbounded with an empty registry, and decodes
/// it into a fresh heap.
///
/// # Panics
///
/// Panics when either direction fails.
pub fn round_trip(build: impl FnOnce(&mut Heap) -> ValueId) -> RoundTrip {
    round_trip_with(&Registry::new(), build)
}

/// [`round_trip`] with a caller-supplied registry.
///
/// # Panics
///
/// Panics when either direction fails.
pub fn round_trip_with(
    registry: &dyn TypeRegistry,
    build: impl FnOnce(&mut Heap) -> ValueId,
) -> RoundTrip {
    let mut source = Heap::new();
    let root = build(&mut source);
    let bytes = dump(&mut source, registry, root, DepthLimit::Unbounded)
        .expect("encode failed");

    let mut decoded = Heap::new();
    let result = load(&mut decoded, registry, &bytes).expect("decode failed");

    RoundTrip { source, root, decoded, result, bytes }
}

/// An owned value-tree description, used by the property tests to generate
/// graphs without threading a heap through the generator.
#[derive(Debug, Clone)]
pub enum Tree {
    /// `nil`.
    Nil,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// A byte string.
    Str(Vec<u8>),
    /// A symbol.
    Sym(String),
    /// A sequence of subtrees.
    Seq(Vec<Tree>),
    /// A mapping of subtree pairs.
    Map(Vec<(Tree, Tree)>),
}

/// Materializes a [`Tree`] into heap values.
pub fn materialize(heap: &mut Heap, tree: &Tree) -> ValueId {
    match tree {
        Tree::Nil => heap.nil(),
        Tree::Bool(value) => heap.bool(*value),
        Tree::Int(value) => heap.integer(*value),
        Tree::Float(value) => heap.float(*value),
        Tree::Str(bytes) => heap.bytes(bytes.clone()),
        Tree::Sym(name) => heap.symbol(name),
        Tree::Seq(items) => {
            let items =
                items.iter().map(|item| materialize(heap, item)).collect();
            heap.sequence(items)
        }
        Tree::Map(entries) => {
            let entries = entries
                .iter()
                .map(|(key, value)| {
                    (materialize(heap, key), materialize(heap, value))
                })
                .collect();
            heap.mapping(entries)
        }
    }
}

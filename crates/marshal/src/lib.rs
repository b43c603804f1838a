//! A versioned binary serializer for dynamic value graphs.
//!
//! This crate converts an in-memory graph of
//! [`amber_value`](amber_value) values into a compact, versioned byte
//! stream ([`dump`]) and reconstructs an equivalent graph from such a
//! stream ([`load`]). The engine preserves object identity (a value shared
//! by two containers, or a cycle, decodes back to one reconstructed
//! instance) and fails predictably on malformed or incompatible input.
//!
//! # Format
//!
//! A stream is a 2-byte version header (major [`MAJOR_VERSION`], minor
//! [`MINOR_VERSION`]) followed by tagged records: one ASCII tag byte per
//! record, variable-length integers for every count and index, and
//! back-reference records standing in for values already written. The
//! decoder rejects any stream whose major version differs or whose minor
//! version is newer than its own; there is no forward compatibility.
//!
//! # Identity
//!
//! Each top-level call keeps two independent identity tables, one for
//! objects and one for interned symbols, assigning indices in order of
//! first encounter. Kinds with no independent identity (`nil`, booleans, compact
//! integers) are encoded by value and never take an index.
//!
//! # Extensibility
//!
//! A class may customize its representation through the capability traits
//! in [`registry`]: a [`ByteCodec`] replaces the field-by-field encoding
//! with an opaque byte payload, a [`ValueCodec`] with a delegate value.
//! Record (struct) types are validated member-by-member against the
//! caller-supplied [`TypeRegistry`].
//!
//! # Example
//!
//! ```ignore
//! use amber_marshal::{dump, load, DepthLimit, Registry};
//! use amber_value::Heap;
//!
//! let registry = Registry::new();
//!
//! let mut heap = Heap::new();
//! let greeting = heap.bytes("hello");
//! let pair = heap.sequence(vec![greeting, greeting]);
//!
//! let bytes = dump(&mut heap, &registry, pair, DepthLimit::Unbounded)?;
//!
//! let mut decoded = Heap::new();
//! let root = load(&mut decoded, &registry, &bytes)?;
//! assert!(heap.deep_eq(pair, &decoded, root));
//! ```

pub mod decode;
pub mod encode;
pub mod error;
pub mod registry;
pub mod session;
pub mod wire;

pub use decode::{load, load_with};
pub use encode::dump;
pub use error::{
    DecodeError, EncodeError, FormatError, HookError, LinkError, TypeError,
};
pub use registry::{
    ByteCodec, ByteDump, HookResult, Registry, TypeRegistry, ValueCodec,
};
pub use session::DepthLimit;
pub use wire::{MAJOR_VERSION, MINOR_VERSION};

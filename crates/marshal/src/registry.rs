//! Caller-supplied type knowledge and the custom-codec capability traits.
//!
//! There is no process-global registry of known types: everything the engine
//! needs to know about the caller's domain arrives through one
//! [`TypeRegistry`] passed into [`dump`](crate::dump) and
//! [`load`](crate::load). Capability *presence* is what drives dispatch:
//! a class with a registered [`ByteCodec`] serializes through its own byte
//! representation, one with a [`ValueCodec`] through a delegate value, and
//! everything else field by field.

use std::fmt;

use amber_value::{Heap, SymbolId, ValueId};
use fxhash::FxHashMap;

/// The result type user codecs return; failures are wrapped with class
/// context by the engine.
pub type HookResult<T> =
    Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// The product of a byte-dump codec: an opaque payload, plus instance
/// variables to wrap it with on the wire (most dumps carry none).
#[derive(Debug, Default)]
pub struct ByteDump {
    /// The opaque byte payload.
    pub bytes: Vec<u8>,
    /// Instance variables attached to the payload record.
    pub ivars: Vec<(SymbolId, ValueId)>,
}

impl ByteDump {
    /// Creates a dump with no attached instance variables.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into(), ivars: Vec::new() }
    }
}

/// A class's custom byte representation.
///
/// On encode the codec turns a value into opaque bytes; on decode it
/// reconstructs a value from them. The decode side receives the payload as
/// a `Bytes` slot in the heap, already decorated with any instance-variable
/// block the wire deferred onto it.
pub trait ByteCodec: Send + Sync {
    /// Produces the byte representation of `value`.
    ///
    /// `remaining_depth` is the encoder's unspent recursion budget
    /// (negative when unbounded), passed as a hint for codecs that encode
    /// nested structures themselves.
    ///
    /// # Errors
    ///
    /// Any error aborts the whole encode call.
    fn dump(
        &self,
        heap: &mut Heap,
        value: ValueId,
        remaining_depth: i64,
    ) -> HookResult<ByteDump>;

    /// Reconstructs a value from `payload`, a `Bytes` slot carrying the
    /// dumped bytes and any deferred instance variables.
    ///
    /// # Errors
    ///
    /// Any error aborts the whole decode call.
    fn load(&self, heap: &mut Heap, payload: ValueId) -> HookResult<ValueId>;
}

/// A class's custom value representation.
///
/// On encode the codec produces a delegate value that is serialized in the
/// object's place; on decode it populates a freshly allocated instance from
/// the reconstructed delegate.
pub trait ValueCodec: Send + Sync {
    /// Produces the delegate value for `value`, allocating in the heap if
    /// needed.
    ///
    /// # Errors
    ///
    /// Any error aborts the whole encode call.
    fn dump(&self, heap: &mut Heap, value: ValueId) -> HookResult<ValueId>;

    /// Populates `instance` (a pre-registered, zero-initialized object of
    /// the codec's class) from `delegate`.
    ///
    /// # Errors
    ///
    /// Any error aborts the whole decode call.
    fn load(
        &self,
        heap: &mut Heap,
        instance: ValueId,
        delegate: ValueId,
    ) -> HookResult<()>;
}

/// What the engine may ask about the caller's types, by name.
pub trait TypeRegistry: Send + Sync {
    /// The declared member names of a record type, in declaration order,
    /// or `None` if the type is unknown.
    fn record_members(&self, name: &str) -> Option<&[String]>;

    /// The byte codec registered for a class, if any.
    fn byte_codec(&self, name: &str) -> Option<&dyn ByteCodec>;

    /// The value codec registered for a class, if any.
    fn value_codec(&self, name: &str) -> Option<&dyn ValueCodec>;
}

/// The map-backed [`TypeRegistry`] implementation.
#[derive(Default)]
pub struct Registry {
    records: FxHashMap<String, Vec<String>>,
    byte_codecs: FxHashMap<String, Box<dyn ByteCodec>>,
    value_codecs: FxHashMap<String, Box<dyn ValueCodec>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Declares a record type and its member names, in declaration order.
    pub fn register_record<I, S>(&mut self, name: impl Into<String>, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.records.insert(
            name.into(),
            members.into_iter().map(Into::into).collect(),
        );
    }

    /// Registers a byte codec for a class.
    pub fn register_byte_codec(
        &mut self,
        name: impl Into<String>,
        codec: impl ByteCodec + 'static,
    ) {
        self.byte_codecs.insert(name.into(), Box::new(codec));
    }

    /// Registers a value codec for a class.
    pub fn register_value_codec(
        &mut self,
        name: impl Into<String>,
        codec: impl ValueCodec + 'static,
    ) {
        self.value_codecs.insert(name.into(), Box::new(codec));
    }
}

impl TypeRegistry for Registry {
    fn record_members(&self, name: &str) -> Option<&[String]> {
        self.records.get(name).map(Vec::as_slice)
    }

    fn byte_codec(&self, name: &str) -> Option<&dyn ByteCodec> {
        self.byte_codecs.get(name).map(AsRef::as_ref)
    }

    fn value_codec(&self, name: &str) -> Option<&dyn ValueCodec> {
        self.value_codecs.get(name).map(AsRef::as_ref)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("records", &self.records.len())
            .field("byte_codecs", &self.byte_codecs.len())
            .field("value_codecs", &self.value_codecs.len())
            .finish_non_exhaustive()
    }
}

//! The recursive-descent encoder.
//!
//! [`dump`] walks a value and its transitive references, consulting the
//! session's identity tables to emit back-references instead of re-encoding
//! (which is also what makes cyclic graphs terminate), and dispatching by
//! kind to the tag-specific writers. Kinds that carry no independent
//! identity (`nil`, booleans, compact integers) are emitted by value and
//! never registered.

use amber_value::{BigInt, Heap, SymbolId, Value, ValueId};

use crate::{
    error::{EncodeError, HookError, TypeError},
    registry::TypeRegistry,
    session::{is_immediate, DepthLimit, EncodeSession},
    wire::{tag, Writer, MAJOR_VERSION, MINOR_VERSION},
};

/// Encodes the graph reachable from `root` into a fresh byte stream,
/// prefixed with the 2-byte format-version header.
///
/// The `registry` supplies the custom codecs consulted for object values;
/// pass a default [`Registry`](crate::Registry) when no class customizes
/// its representation. `limit` bounds recursion depth, not node count.
///
/// # Errors
///
/// Returns [`EncodeError::DepthExceeded`] when the budget runs out, a
/// [`TypeError`] for values that cannot be dumped (anonymous class or
/// module references), or a [`HookError`] when a custom codec fails.
#[tracing::instrument(level = "debug", skip(heap, registry))]
pub fn dump(
    heap: &mut Heap,
    registry: &dyn TypeRegistry,
    root: ValueId,
    limit: DepthLimit,
) -> Result<Vec<u8>, EncodeError> {
    let mut encoder = Encoder {
        heap,
        registry,
        writer: Writer::new(),
        session: EncodeSession::new(limit),
    };

    encoder.writer.put_u8(MAJOR_VERSION);
    encoder.writer.put_u8(MINOR_VERSION);
    encoder.serialize(root)?;

    let bytes = encoder.writer.into_bytes();
    tracing::debug!(len = bytes.len(), "dump complete");
    Ok(bytes)
}

struct Encoder<'a> {
    heap: &'a mut Heap,
    registry: &'a dyn TypeRegistry,
    writer: Writer,
    session: EncodeSession,
}

impl Encoder<'_> {
    /// One full encode step: depth accounting around the record writer.
    fn serialize(&mut self, id: ValueId) -> Result<(), EncodeError> {
        self.session.enter()?;
        let result = self.serialize_record(id);
        self.session.leave();
        result
    }

    fn serialize_record(&mut self, id: ValueId) -> Result<(), EncodeError> {
        if let Some(index) = self.session.find_link(id) {
            self.writer.put_u8(tag::LINK);
            self.writer.put_long(i64::from(index));
            return Ok(());
        }

        if !is_immediate(self.heap, id) {
            self.session.add_object(id);
        }

        if let Value::Object { class } = *self.heap.value(id) {
            let registry = self.registry;
            let name = self.heap.symbol_name(class).to_owned();
            if registry.byte_codec(&name).is_some() {
                return self.serialize_user_bytes(id, class);
            }
            if registry.value_codec(&name).is_some() {
                return self.serialize_user_value(id, class);
            }
        }

        self.serialize_value(id)
    }

    /// Writes the body of a value: wrappers, tag, and payload. Used both
    /// from the full path and for user-value delegates, which skip the
    /// back-reference check and hook dispatch by design.
    fn serialize_value(&mut self, id: ValueId) -> Result<(), EncodeError> {
        let slot = self.heap.get(id);
        let value = slot.value().clone();
        let ivars = slot.ivars().to_vec();
        let modules = slot.modules().to_vec();
        let class_override = slot.class();

        match value {
            Value::Nil => self.writer.put_u8(tag::NIL),
            Value::Bool(true) => self.writer.put_u8(tag::TRUE),
            Value::Bool(false) => self.writer.put_u8(tag::FALSE),

            Value::Integer(n) => {
                if i32::try_from(n).is_ok() {
                    self.writer.put_u8(tag::FIXNUM);
                    self.writer.put_long(n);
                } else {
                    self.put_big_integer(&BigInt::from_i64(n));
                }
            }

            // A big integer that fits the compact range writes as one, so
            // both sides of the wire agree on what takes an index.
            Value::BigInteger(big) => match big.to_i64() {
                Some(n) if i32::try_from(n).is_ok() => {
                    self.writer.put_u8(tag::FIXNUM);
                    self.writer.put_long(n);
                }
                _ => self.put_big_integer(&big),
            },

            Value::Float(float) => {
                self.writer.put_u8(tag::FLOAT);
                self.writer.put_float(float);
            }

            Value::Symbol(symbol) => self.serialize_symbol(symbol)?,

            Value::Bytes(payload) => {
                self.put_ivar_prefix(&ivars);
                self.put_extended(&modules)?;
                self.put_user_class(class_override)?;
                self.writer.put_u8(tag::STRING);
                self.writer.put_byte_sequence(&payload);
                self.put_ivar_suffix(&ivars)?;
            }

            Value::Pattern { source, options } => {
                self.put_ivar_prefix(&ivars);
                self.put_extended(&modules)?;
                self.put_user_class(class_override)?;
                self.writer.put_u8(tag::REGEXP);
                self.writer.put_byte_sequence(&source);
                self.writer.put_u8(options & 0x7);
                self.put_ivar_suffix(&ivars)?;
            }

            Value::Sequence(items) => {
                self.put_ivar_prefix(&ivars);
                self.put_extended(&modules)?;
                self.put_user_class(class_override)?;
                self.writer.put_u8(tag::ARRAY);
                self.writer.put_long(count_to_long(items.len()));
                for item in items {
                    self.serialize(item)?;
                }
                self.put_ivar_suffix(&ivars)?;
            }

            Value::Mapping { entries, default } => {
                self.put_ivar_prefix(&ivars);
                self.put_extended(&modules)?;
                self.put_user_class(class_override)?;
                self.writer.put_u8(if default.is_some() {
                    tag::HASH_DEFAULT
                } else {
                    tag::HASH
                });
                self.writer.put_long(count_to_long(entries.len()));
                for (key, value) in entries {
                    self.serialize(key)?;
                    self.serialize(value)?;
                }
                if let Some(default) = default {
                    self.serialize(default)?;
                }
                self.put_ivar_suffix(&ivars)?;
            }

            Value::Record { name, members } => {
                self.put_ivar_prefix(&ivars);
                self.put_extended(&modules)?;
                self.writer.put_u8(tag::STRUCT);
                self.serialize_symbol(name)?;
                self.writer.put_long(count_to_long(members.len()));
                for (member, value) in members {
                    self.serialize_symbol(member)?;
                    self.serialize(value)?;
                }
                self.put_ivar_suffix(&ivars)?;
            }

            Value::Object { class } => {
                self.put_extended(&modules)?;
                self.writer.put_u8(tag::OBJECT);
                self.serialize_symbol(class)?;
                self.put_ivar_block(&ivars)?;
            }

            Value::Class(name) => {
                let text = self.heap.symbol_name(name).to_owned();
                if text.is_empty() {
                    return Err(TypeError::AnonymousClass.into());
                }
                self.writer.put_u8(tag::CLASS);
                self.writer.put_byte_sequence(text.as_bytes());
            }

            Value::Module(name) => {
                let text = self.heap.symbol_name(name).to_owned();
                if text.is_empty() {
                    return Err(TypeError::AnonymousModule.into());
                }
                self.writer.put_u8(tag::MODULE);
                self.writer.put_byte_sequence(text.as_bytes());
            }
        }

        Ok(())
    }

    /// Writes a symbol record: a reference into the session's symbol table
    /// after the first occurrence, the interned bytes on it.
    fn serialize_symbol(
        &mut self,
        symbol: SymbolId,
    ) -> Result<(), EncodeError> {
        if let Some(index) = self.session.find_symlink(symbol) {
            self.writer.put_u8(tag::SYMLINK);
            self.writer.put_long(i64::from(index));
        } else {
            self.session.add_symlink(symbol);
            self.writer.put_u8(tag::SYMBOL);
            let name = self.heap.symbol_name(symbol);
            self.writer.put_byte_sequence(name.as_bytes());
        }
        Ok(())
    }

    fn put_big_integer(&mut self, big: &BigInt) {
        self.writer.put_u8(tag::BIGNUM);
        self.writer.put_u8(if big.is_negative() { b'-' } else { b'+' });

        // The wire carries the magnitude in halfwords, padded to an even
        // byte count.
        let mut magnitude = big.magnitude().to_vec();
        if magnitude.len() % 2 == 1 {
            magnitude.push(0);
        }
        self.writer.put_long(count_to_long(magnitude.len() / 2));
        self.writer.put_raw(&magnitude);
    }

    fn put_ivar_prefix(&mut self, ivars: &[(SymbolId, ValueId)]) {
        if !ivars.is_empty() {
            self.writer.put_u8(tag::IVARS);
        }
    }

    fn put_ivar_suffix(
        &mut self,
        ivars: &[(SymbolId, ValueId)],
    ) -> Result<(), EncodeError> {
        if ivars.is_empty() {
            return Ok(());
        }
        self.put_ivar_block(ivars)
    }

    fn put_ivar_block(
        &mut self,
        ivars: &[(SymbolId, ValueId)],
    ) -> Result<(), EncodeError> {
        self.writer.put_long(count_to_long(ivars.len()));
        for (name, value) in ivars {
            self.serialize_symbol(*name)?;
            self.serialize(*value)?;
        }
        Ok(())
    }

    fn put_extended(
        &mut self,
        modules: &[SymbolId],
    ) -> Result<(), EncodeError> {
        for module in modules {
            self.writer.put_u8(tag::EXTENDED);
            self.serialize_symbol(*module)?;
        }
        Ok(())
    }

    fn put_user_class(
        &mut self,
        class: Option<SymbolId>,
    ) -> Result<(), EncodeError> {
        if let Some(class) = class {
            self.writer.put_u8(tag::USER_CLASS);
            self.serialize_symbol(class)?;
        }
        Ok(())
    }

    fn serialize_user_bytes(
        &mut self,
        id: ValueId,
        class: SymbolId,
    ) -> Result<(), EncodeError> {
        let registry = self.registry;
        let name = self.heap.symbol_name(class).to_owned();
        let Some(codec) = registry.byte_codec(&name) else {
            return Err(HookError::Missing { class: name, kind: "byte" }.into());
        };

        let dump = codec
            .dump(self.heap, id, self.session.remaining_depth())
            .map_err(|source| HookError::Failed { class: name, source })?;

        if !dump.ivars.is_empty() {
            self.writer.put_u8(tag::IVARS);
        }
        self.writer.put_u8(tag::USER_BYTES);
        self.serialize_symbol(class)?;
        self.writer.put_byte_sequence(&dump.bytes);
        if !dump.ivars.is_empty() {
            self.put_ivar_block(&dump.ivars)?;
        }
        Ok(())
    }

    fn serialize_user_value(
        &mut self,
        id: ValueId,
        class: SymbolId,
    ) -> Result<(), EncodeError> {
        let registry = self.registry;
        let name = self.heap.symbol_name(class).to_owned();
        let Some(codec) = registry.value_codec(&name) else {
            return Err(
                HookError::Missing { class: name, kind: "value" }.into()
            );
        };

        let delegate = codec
            .dump(self.heap, id)
            .map_err(|source| HookError::Failed { class: name, source })?;

        // The delegate takes the identity-table index right after the
        // original object's, and its body is written directly: no
        // back-reference check, no depth charge, no hook dispatch.
        if !is_immediate(self.heap, delegate) {
            self.session.add_object(delegate);
        }

        self.writer.put_u8(tag::USER_VALUE);
        self.serialize_symbol(class)?;
        self.serialize_value(delegate)
    }
}

/// Converts an in-memory count to its wire integer.
///
/// # Panics
///
/// Panics if the count exceeds the wire's integer range.
fn count_to_long(count: usize) -> i64 {
    i64::try_from(count).expect("count exceeds the wire integer range")
}

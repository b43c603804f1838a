//! The tag-dispatch decoder.
//!
//! [`load`] checks the version header, then reads one record per step,
//! dispatching on the tag byte. Compound containers are registered in the
//! session's object table *before* their contents are read, which is what
//! lets a self-referential element resolve through a back-reference during
//! the same pass. The wrapper records (`I`, `e`, `C`) are transparent to
//! identity and to the streaming callback: they never take an index and
//! never fire the callback themselves.

use amber_value::{Heap, SymbolId, Value, ValueId};

use crate::{
    error::{DecodeError, FormatError, HookError, TypeError},
    registry::TypeRegistry,
    session::{is_immediate, DecodeSession},
    wire::{parse_float_token, tag, Reader, MAJOR_VERSION, MINOR_VERSION},
};

/// Decodes one value graph from `bytes` into `heap` and returns its root.
///
/// # Errors
///
/// Returns a [`FormatError`] for version mismatches, truncation, or unknown
/// tags; a [`LinkError`](crate::LinkError) for dangling references; a
/// [`TypeError`] when the stream disagrees with the registry's record
/// declarations; or a [`HookError`] when a required custom codec is missing
/// or fails. Nothing is constructed observably on failure paths before the
/// header check passes.
#[tracing::instrument(level = "debug", skip_all, fields(len = bytes.len()))]
pub fn load(
    heap: &mut Heap,
    registry: &dyn TypeRegistry,
    bytes: &[u8],
) -> Result<ValueId, DecodeError> {
    load_impl(heap, registry, bytes, None)
}

/// Like [`load`], additionally invoking `on_value` once per logical value
/// as it is fully reconstructed: nested values included, wrapper records
/// and symbols read in wrapper position excluded. The root fires last.
///
/// # Errors
///
/// See [`load`].
pub fn load_with<F>(
    heap: &mut Heap,
    registry: &dyn TypeRegistry,
    bytes: &[u8],
    mut on_value: F,
) -> Result<ValueId, DecodeError>
where
    F: FnMut(&Heap, ValueId),
{
    load_impl(heap, registry, bytes, Some(&mut on_value))
}

fn load_impl<'a>(
    heap: &mut Heap,
    registry: &'a dyn TypeRegistry,
    bytes: &'a [u8],
    on_value: Option<&'a mut dyn FnMut(&Heap, ValueId)>,
) -> Result<ValueId, DecodeError> {
    let mut reader = Reader::new(bytes);
    let major = reader.get_u8()?;
    let minor = reader.get_u8()?;
    if major != MAJOR_VERSION || minor > MINOR_VERSION {
        return Err(FormatError::Version { major, minor }.into());
    }

    let mut decoder = Decoder {
        heap,
        registry,
        reader,
        session: DecodeSession::new(),
        on_value,
    };
    let root = decoder.construct(None, true)?;
    tracing::debug!(?root, "load complete");
    Ok(root)
}

struct Decoder<'a, 'h> {
    heap: &'h mut Heap,
    registry: &'a dyn TypeRegistry,
    reader: Reader<'a>,
    session: DecodeSession,
    on_value: Option<&'a mut dyn FnMut(&Heap, ValueId)>,
}

impl Decoder<'_, '_> {
    /// Reads one record. `ivar_index` names the enclosing ivar-block marker
    /// (used by the byte-dump path to consume the block early); `fire`
    /// is false while a wrapper frame is reading its inner value.
    fn construct(
        &mut self,
        ivar_index: Option<usize>,
        fire: bool,
    ) -> Result<ValueId, DecodeError> {
        let tag_byte = self.reader.get_u8()?;
        let id = match tag_byte {
            tag::NIL => self.heap.alloc(Value::Nil),
            tag::TRUE => self.heap.alloc(Value::Bool(true)),
            tag::FALSE => self.heap.alloc(Value::Bool(false)),

            tag::FIXNUM => {
                let n = self.reader.get_long()?;
                self.heap.alloc(Value::Integer(n))
            }
            tag::BIGNUM => self.construct_big_integer()?,
            tag::FLOAT => self.construct_float()?,

            tag::SYMBOL => {
                let symbol = self.parse_symbol()?;
                self.heap.symbol_value(symbol)
            }
            tag::SYMLINK => {
                let index = self.reader.get_long()?;
                let symbol = self.session.symbol(index)?;
                return Ok(self.heap.symbol_value(symbol));
            }
            tag::LINK => {
                let index = self.reader.get_long()?;
                return Ok(self.session.object(index)?);
            }

            tag::STRING => self.construct_string()?,
            tag::REGEXP => self.construct_pattern()?,
            tag::ARRAY => self.construct_sequence()?,
            tag::HASH => self.construct_mapping(false)?,
            tag::HASH_DEFAULT => self.construct_mapping(true)?,
            tag::STRUCT => self.construct_record()?,
            tag::OBJECT => self.construct_object()?,
            tag::USER_BYTES => self.construct_user_bytes(ivar_index)?,
            tag::USER_VALUE => self.construct_user_value()?,
            tag::CLASS => self.construct_class_ref(false)?,
            tag::MODULE => self.construct_class_ref(true)?,

            tag::EXTENDED => {
                let module = self.read_symbol()?;
                self.session.pending_modules.push(module);
                let inner = self.construct(None, false)?;
                // The innermost frame drains the whole pending stack, so
                // nested wrappers attach every module in wire order.
                let modules =
                    std::mem::take(&mut self.session.pending_modules);
                self.heap.extend_with(inner, modules);
                inner
            }
            tag::USER_CLASS => {
                let class = self.read_symbol()?;
                self.session.pending_class = Some(class);
                self.construct(None, false)?
            }
            tag::IVARS => {
                let marker = self.session.has_ivar.len();
                self.session.has_ivar.push(true);
                let inner = self.construct(Some(marker), false)?;
                let pending = self.session.has_ivar.pop().unwrap_or(false);
                if pending {
                    self.read_ivar_block(inner)?;
                }
                inner
            }

            other => return Err(FormatError::UnknownTag(other).into()),
        };

        if fire {
            self.fire_callback(id);
        }
        Ok(id)
    }

    fn fire_callback(&mut self, id: ValueId) {
        if let Some(callback) = self.on_value.as_deref_mut() {
            callback(&*self.heap, id);
        }
    }

    /// Registers a constructed value in the object table unless it is an
    /// immediate kind.
    fn register(&mut self, id: ValueId) {
        if !is_immediate(self.heap, id) {
            self.session.add_object(id);
        }
    }

    /// Reads a symbol in wrapper position (class names, member names,
    /// module names): either a fresh symbol record or a reference.
    fn read_symbol(&mut self) -> Result<SymbolId, DecodeError> {
        let tag_byte = self.reader.get_u8()?;
        match tag_byte {
            tag::SYMBOL => self.parse_symbol(),
            tag::SYMLINK => {
                let index = self.reader.get_long()?;
                Ok(self.session.symbol(index)?)
            }
            other => Err(FormatError::ExpectedSymbol(other).into()),
        }
    }

    /// Reads a symbol payload and registers it in the symbol table.
    fn parse_symbol(&mut self) -> Result<SymbolId, DecodeError> {
        let bytes = self.reader.get_byte_sequence()?;
        let name = std::str::from_utf8(bytes)
            .map_err(|_| FormatError::InvalidSymbol)?;
        let symbol = self.heap.intern(name);
        self.session.add_symbol(symbol);
        Ok(symbol)
    }

    fn construct_big_integer(&mut self) -> Result<ValueId, DecodeError> {
        let sign = self.reader.get_u8()?;
        let negative = sign == b'-';
        let halfwords = self.reader.get_count()?;
        let data = self.reader.get_exact(halfwords.saturating_mul(2))?;

        let big = amber_value::BigInt::new(negative, data.to_vec());
        // Magnitudes that fit the machine integer collapse to the plain
        // integer kind.
        let id = match big.to_i64() {
            Some(n) => self.heap.alloc(Value::Integer(n)),
            None => self.heap.alloc(Value::BigInteger(big)),
        };
        self.register(id);
        Ok(id)
    }

    fn construct_float(&mut self) -> Result<ValueId, DecodeError> {
        let token = self.reader.get_byte_sequence()?;
        let value = parse_float_token(token)?;
        let id = self.heap.alloc(Value::Float(value));
        self.session.add_object(id);
        Ok(id)
    }

    fn construct_string(&mut self) -> Result<ValueId, DecodeError> {
        let payload = self.reader.get_byte_sequence()?.to_vec();
        let id = self.heap.alloc(Value::Bytes(payload));
        if let Some(class) = self.session.pending_class.take() {
            self.heap.set_class_override(id, class);
        }
        self.session.add_object(id);
        Ok(id)
    }

    fn construct_pattern(&mut self) -> Result<ValueId, DecodeError> {
        let source = self.reader.get_byte_sequence()?.to_vec();
        let options = self.reader.get_u8()?;
        let id = self.heap.alloc(Value::Pattern { source, options });
        if let Some(class) = self.session.pending_class.take() {
            self.heap.set_class_override(id, class);
        }
        self.session.add_object(id);
        Ok(id)
    }

    fn construct_sequence(&mut self) -> Result<ValueId, DecodeError> {
        // Registered empty first so a self-referential element resolves.
        let id = self.heap.alloc(Value::Sequence(Vec::new()));
        if let Some(class) = self.session.pending_class.take() {
            self.heap.set_class_override(id, class);
        }
        self.session.add_object(id);

        let count = self.reader.get_count()?;
        for _ in 0..count {
            let item = self.construct(None, true)?;
            self.heap.sequence_push(id, item);
        }
        Ok(id)
    }

    fn construct_mapping(
        &mut self,
        has_default: bool,
    ) -> Result<ValueId, DecodeError> {
        let id =
            self.heap.alloc(Value::Mapping { entries: Vec::new(), default: None });
        if let Some(class) = self.session.pending_class.take() {
            self.heap.set_class_override(id, class);
        }
        self.session.add_object(id);

        let count = self.reader.get_count()?;
        for _ in 0..count {
            let key = self.construct(None, true)?;
            let value = self.construct(None, true)?;
            self.heap.mapping_push(id, key, value);
        }
        if has_default {
            let default = self.construct(None, true)?;
            self.heap.mapping_set_default(id, default);
        }
        Ok(id)
    }

    fn construct_record(&mut self) -> Result<ValueId, DecodeError> {
        let name = self.read_symbol()?;
        let type_name = self.heap.symbol_name(name).to_owned();

        let registry = self.registry;
        let declared = registry
            .record_members(&type_name)
            .ok_or_else(|| TypeError::UnknownRecord(type_name.clone()))?
            .to_vec();

        let id = self.heap.alloc(Value::Record { name, members: Vec::new() });
        self.session.add_object(id);

        let count = self.reader.get_count()?;
        for position in 0..count {
            let member = self.read_symbol()?;
            let member_name = self.heap.symbol_name(member).to_owned();
            match declared.get(position) {
                Some(expected) if *expected == member_name => {}
                other => {
                    return Err(TypeError::IncompatibleRecord {
                        name: type_name,
                        expected: other
                            .cloned()
                            .unwrap_or_else(|| "nothing".to_owned()),
                        found: member_name,
                    }
                    .into());
                }
            }
            let value = self.construct(None, true)?;
            self.heap.record_push_member(id, member, value);
        }
        Ok(id)
    }

    fn construct_object(&mut self) -> Result<ValueId, DecodeError> {
        let class = self.read_symbol()?;
        let id = self.heap.alloc(Value::Object { class });
        self.session.add_object(id);
        self.read_ivar_block(id)?;
        Ok(id)
    }

    fn construct_user_bytes(
        &mut self,
        ivar_index: Option<usize>,
    ) -> Result<ValueId, DecodeError> {
        let class = self.read_symbol()?;
        let name = self.heap.symbol_name(class).to_owned();

        let payload_bytes = self.reader.get_byte_sequence()?.to_vec();
        let payload = self.heap.alloc(Value::Bytes(payload_bytes));

        // An enclosing ivar block belongs to the byte payload, applied
        // before the load codec runs; the wrapper frame is told it has
        // been consumed.
        if let Some(marker) = ivar_index {
            if self.session.has_ivar.get(marker).copied().unwrap_or(false) {
                self.read_ivar_block(payload)?;
                self.session.has_ivar[marker] = false;
            }
        }

        let registry = self.registry;
        let codec = registry.byte_codec(&name).ok_or_else(|| {
            HookError::Missing { class: name.clone(), kind: "byte" }
        })?;
        let result = codec
            .load(self.heap, payload)
            .map_err(|source| HookError::Failed { class: name, source })?;

        self.register(result);
        Ok(result)
    }

    fn construct_user_value(&mut self) -> Result<ValueId, DecodeError> {
        let class = self.read_symbol()?;
        let name = self.heap.symbol_name(class).to_owned();

        let id = self.heap.alloc(Value::Object { class });
        if !self.session.pending_modules.is_empty() {
            let modules = std::mem::take(&mut self.session.pending_modules);
            self.heap.extend_with(id, modules);
        }

        let registry = self.registry;
        let codec = registry.value_codec(&name).ok_or_else(|| {
            HookError::Missing { class: name.clone(), kind: "value" }
        })?;

        // The instance takes its index before the delegate is read, so a
        // back-reference to the original object resolves to the instance
        // and the delegate holds the following index.
        self.session.add_object(id);
        let delegate = self.construct(None, true)?;
        codec
            .load(self.heap, id, delegate)
            .map_err(|source| HookError::Failed { class: name, source })?;
        Ok(id)
    }

    fn construct_class_ref(
        &mut self,
        module: bool,
    ) -> Result<ValueId, DecodeError> {
        let bytes = self.reader.get_byte_sequence()?;
        let text = std::str::from_utf8(bytes)
            .map_err(|_| FormatError::InvalidSymbol)?;
        let symbol = self.heap.intern(text);
        let id = self.heap.alloc(if module {
            Value::Module(symbol)
        } else {
            Value::Class(symbol)
        });
        self.session.add_object(id);
        Ok(id)
    }

    /// Reads an instance-variable block (count plus name/value pairs) and
    /// applies it to `target`.
    fn read_ivar_block(
        &mut self,
        target: ValueId,
    ) -> Result<(), DecodeError> {
        let count = self.reader.get_count()?;
        for _ in 0..count {
            let name = self.read_symbol()?;
            let value = self.construct(None, true)?;
            self.heap.set_ivar(target, name, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use amber_value::Heap;

    use super::*;
    use crate::{error::LinkError, Registry};

    fn load_bytes(bytes: &[u8]) -> Result<ValueId, DecodeError> {
        let mut heap = Heap::new();
        load(&mut heap, &Registry::new(), bytes)
    }

    #[test]
    fn rejects_foreign_major_version() {
        assert!(matches!(
            load_bytes(b"\x05\x080"),
            Err(DecodeError::Format(FormatError::Version {
                major: 5,
                minor: 8
            }))
        ));
    }

    #[test]
    fn rejects_newer_minor_version() {
        assert!(matches!(
            load_bytes(b"\x04\x090"),
            Err(DecodeError::Format(FormatError::Version {
                major: 4,
                minor: 9
            }))
        ));
    }

    #[test]
    fn rejects_unknown_tag() {
        assert!(matches!(
            load_bytes(b"\x04\x08X"),
            Err(DecodeError::Format(FormatError::UnknownTag(b'X')))
        ));
    }

    #[test]
    fn rejects_truncated_stream() {
        assert!(matches!(
            load_bytes(b"\x04"),
            Err(DecodeError::Format(FormatError::Truncated))
        ));
        assert!(matches!(
            load_bytes(b"\x04\x08\"\x08fo"),
            Err(DecodeError::Format(FormatError::Truncated))
        ));
    }

    #[test]
    fn rejects_dangling_references() {
        assert!(matches!(
            load_bytes(b"\x04\x08@\x06"),
            Err(DecodeError::Link(LinkError::UnlinkedObject(1)))
        ));
        assert!(matches!(
            load_bytes(b"\x04\x08;\x00"),
            Err(DecodeError::Link(LinkError::BadSymbol(0)))
        ));
    }

    #[test]
    fn decodes_immediates() {
        let mut heap = Heap::new();
        let registry = Registry::new();

        let id = load(&mut heap, &registry, b"\x04\x080").unwrap();
        assert!(heap.value(id).is_nil());

        let id = load(&mut heap, &registry, b"\x04\x08T").unwrap();
        assert_eq!(heap.value(id), &Value::Bool(true));

        let id = load(&mut heap, &registry, b"\x04\x08i\x2f").unwrap();
        assert_eq!(heap.value(id), &Value::Integer(42));
    }

    #[test]
    fn wrapper_position_requires_a_symbol() {
        // An object record whose class name is not a symbol record.
        assert!(matches!(
            load_bytes(b"\x04\x08o\"\x06C\x00"),
            Err(DecodeError::Format(FormatError::ExpectedSymbol(b'"')))
        ));
    }
}

//! The custom-codec contracts: byte dumps, value delegates, deferred ivar
//! blocks on byte payloads, and the identity-table positions the delegate
//! path pins down.

use amber_integration_test::round_trip_with;
use amber_marshal::{
    dump, load, ByteCodec, ByteDump, DecodeError, DepthLimit, EncodeError,
    HookError, HookResult, Registry, ValueCodec,
};
use amber_value::{Heap, Value, ValueId};

/// A class dumping one integer field as eight little-endian bytes.
struct TimestampCodec;

impl ByteCodec for TimestampCodec {
    fn dump(
        &self,
        heap: &mut Heap,
        value: ValueId,
        _remaining_depth: i64,
    ) -> HookResult<ByteDump> {
        let seconds = heap
            .get(value)
            .ivars()
            .first()
            .map(|(_, value)| *value)
            .ok_or("timestamp has no field")?;
        let Value::Integer(seconds) = *heap.value(seconds) else {
            return Err("timestamp field is not an integer".into());
        };
        Ok(ByteDump::new(seconds.to_le_bytes().to_vec()))
    }

    fn load(&self, heap: &mut Heap, payload: ValueId) -> HookResult<ValueId> {
        let bytes = match heap.value(payload) {
            Value::Bytes(bytes) => bytes.clone(),
            _ => return Err("payload is not a byte string".into()),
        };
        let bytes: [u8; 8] =
            bytes.as_slice().try_into().map_err(|_| "bad payload length")?;

        let object = heap.object("Timestamp");
        let seconds = heap.integer(i64::from_le_bytes(bytes));
        let name = heap.intern("unix");
        heap.set_ivar(object, name, seconds);
        Ok(object)
    }
}

fn timestamp_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_byte_codec("Timestamp", TimestampCodec);
    registry
}

fn make_timestamp(heap: &mut Heap, seconds: i64) -> ValueId {
    let object = heap.object("Timestamp");
    let value = heap.integer(seconds);
    let name = heap.intern("unix");
    heap.set_ivar(object, name, value);
    object
}

#[test]
fn byte_codec_round_trips() {
    let registry = timestamp_registry();
    let trip =
        round_trip_with(&registry, |heap| make_timestamp(heap, 1_700_000_000));
    trip.assert_deep_eq();

    assert_eq!(trip.bytes[2], b'u', "expected a byte-dump record");
}

#[test]
fn byte_codec_failure_is_wrapped_with_class_context() {
    let registry = timestamp_registry();
    let mut heap = Heap::new();
    // No field set, so the codec itself fails.
    let object = heap.object("Timestamp");
    match dump(&mut heap, &registry, object, DepthLimit::Unbounded) {
        Err(EncodeError::Hook(HookError::Failed { class, .. })) => {
            assert_eq!(class, "Timestamp");
        }
        other => panic!("expected a hook failure, got {other:?}"),
    }
}

#[test]
fn missing_byte_codec_on_decode() {
    let registry = timestamp_registry();
    let mut heap = Heap::new();
    let object = make_timestamp(&mut heap, 7);
    let bytes =
        dump(&mut heap, &registry, object, DepthLimit::Unbounded).unwrap();

    let mut decoded = Heap::new();
    match load(&mut decoded, &Registry::new(), &bytes) {
        Err(DecodeError::Hook(HookError::Missing { class, kind })) => {
            assert_eq!(class, "Timestamp");
            assert_eq!(kind, "byte");
        }
        other => panic!("expected a missing codec, got {other:?}"),
    }
}

/// A codec whose payload carries an instance-variable block, exercising
/// the deferred-ivar path on both sides of the wire.
struct AnnotatedBlobCodec;

impl ByteCodec for AnnotatedBlobCodec {
    fn dump(
        &self,
        heap: &mut Heap,
        _value: ValueId,
        _remaining_depth: i64,
    ) -> HookResult<ByteDump> {
        let note = heap.bytes("attached");
        let name = heap.intern("note");
        Ok(ByteDump { bytes: b"blob".to_vec(), ivars: vec![(name, note)] })
    }

    fn load(&self, heap: &mut Heap, payload: ValueId) -> HookResult<ValueId> {
        // The deferred block must already be on the payload slot.
        let ivars = heap.get(payload).ivars().to_vec();
        let (name, note) = *ivars.first().ok_or("payload lost its ivars")?;
        if heap.symbol_name(name) != "note" {
            return Err("unexpected ivar name".into());
        }
        let Value::Bytes(note) = heap.value(note) else {
            return Err("note is not a byte string".into());
        };
        if note != b"attached" {
            return Err("unexpected note contents".into());
        }

        Ok(heap.object("AnnotatedBlob"))
    }
}

#[test]
fn byte_payload_ivars_defer_to_the_payload() {
    let mut registry = Registry::new();
    registry.register_byte_codec("AnnotatedBlob", AnnotatedBlobCodec);

    let trip =
        round_trip_with(&registry, |heap| heap.object("AnnotatedBlob"));

    // The wrapper precedes the byte-dump record on the wire.
    assert_eq!(trip.bytes[2], b'I');
    assert_eq!(trip.bytes[3], b'u');
    assert!(trip
        .decoded
        .value(trip.result)
        .is_object());
}

/// A class represented by a two-element sequence delegate.
struct FractionCodec;

impl ValueCodec for FractionCodec {
    fn dump(&self, heap: &mut Heap, value: ValueId) -> HookResult<ValueId> {
        let parts: Vec<ValueId> = heap
            .get(value)
            .ivars()
            .iter()
            .map(|(_, value)| *value)
            .collect();
        if parts.len() != 2 {
            return Err("fraction needs two fields".into());
        }
        Ok(heap.sequence(parts))
    }

    fn load(
        &self,
        heap: &mut Heap,
        instance: ValueId,
        delegate: ValueId,
    ) -> HookResult<()> {
        let parts = match heap.value(delegate) {
            Value::Sequence(items) if items.len() == 2 => items.clone(),
            _ => return Err("delegate is not a pair".into()),
        };
        let numerator = heap.intern("numerator");
        let denominator = heap.intern("denominator");
        heap.set_ivar(instance, numerator, parts[0]);
        heap.set_ivar(instance, denominator, parts[1]);
        Ok(())
    }
}

fn fraction_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_value_codec("Fraction", FractionCodec);
    registry
}

fn make_fraction(heap: &mut Heap, numerator: i64, denominator: i64) -> ValueId {
    let object = heap.object("Fraction");
    let n = heap.integer(numerator);
    let d = heap.integer(denominator);
    let numerator = heap.intern("numerator");
    let denominator = heap.intern("denominator");
    heap.set_ivar(object, numerator, n);
    heap.set_ivar(object, denominator, d);
    object
}

#[test]
fn value_codec_round_trips() {
    let registry = fraction_registry();
    let trip = round_trip_with(&registry, |heap| make_fraction(heap, 2, 3));
    trip.assert_deep_eq();
    assert_eq!(trip.bytes[2], b'U', "expected a value-delegate record");
}

#[test]
fn missing_value_codec_on_decode() {
    let registry = fraction_registry();
    let mut heap = Heap::new();
    let object = make_fraction(&mut heap, 1, 2);
    let bytes =
        dump(&mut heap, &registry, object, DepthLimit::Unbounded).unwrap();

    let mut decoded = Heap::new();
    assert!(matches!(
        load(&mut decoded, &Registry::new(), &bytes),
        Err(DecodeError::Hook(HookError::Missing { kind: "value", .. }))
    ));
}

/// Pins the identity-table layout of the delegate path: the original object
/// registers first, the delegate immediately after, and a back-reference to
/// the original resolves to the reconstructed instance.
#[test]
fn delegate_registers_after_the_original() {
    let registry = fraction_registry();
    let trip = round_trip_with(&registry, |heap| {
        let fraction = make_fraction(heap, 2, 3);
        heap.sequence(vec![fraction, fraction])
    });
    trip.assert_deep_eq();

    // Outer sequence takes index 0, the fraction 1, its delegate 2; the
    // second occurrence must therefore be a link to index 1.
    assert_eq!(
        &trip.bytes[trip.bytes.len() - 2..],
        &[b'@', 0x06],
        "the second occurrence must reference the original's index"
    );

    let Value::Sequence(items) = trip.decoded.value(trip.result) else {
        panic!("expected a sequence");
    };
    assert_eq!(items[0], items[1]);
    assert!(trip.decoded.value(items[0]).is_object());
}

/// The flip side of the pinned layout: a link to the next index resolves to
/// the delegate value itself.
#[test]
fn link_past_the_original_resolves_to_the_delegate() {
    let registry = fraction_registry();
    let mut heap = Heap::new();
    let fraction = make_fraction(&mut heap, 2, 3);
    let pair = heap.sequence(vec![fraction, fraction]);
    let mut bytes =
        dump(&mut heap, &registry, pair, DepthLimit::Unbounded).unwrap();

    // Rewrite the trailing link from index 1 (the instance) to index 2
    // (the delegate).
    let last = bytes.len() - 1;
    assert_eq!(bytes[last], 0x06);
    bytes[last] = 0x07;

    let mut decoded = Heap::new();
    let root = load(&mut decoded, &registry, &bytes).unwrap();
    let Value::Sequence(items) = decoded.value(root) else {
        panic!("expected a sequence");
    };
    assert!(decoded.value(items[0]).is_object());
    assert!(
        decoded.value(items[1]).is_sequence(),
        "the rewritten link must resolve to the delegate sequence"
    );
}

/// A delegate may reference the original object, closing a cycle through
/// the codec.
#[test]
fn delegate_may_close_a_cycle() {
    struct SelfishCodec;

    impl ValueCodec for SelfishCodec {
        fn dump(
            &self,
            heap: &mut Heap,
            value: ValueId,
        ) -> HookResult<ValueId> {
            Ok(heap.sequence(vec![value]))
        }

        fn load(
            &self,
            heap: &mut Heap,
            instance: ValueId,
            delegate: ValueId,
        ) -> HookResult<()> {
            let name = heap.intern("inner");
            heap.set_ivar(instance, name, delegate);
            Ok(())
        }
    }

    let mut registry = Registry::new();
    registry.register_value_codec("Selfish", SelfishCodec);

    let mut heap = Heap::new();
    let object = heap.object("Selfish");
    let bytes =
        dump(&mut heap, &registry, object, DepthLimit::Unbounded).unwrap();

    let mut decoded = Heap::new();
    let root = load(&mut decoded, &registry, &bytes).unwrap();
    let ivars = decoded.get(root).ivars().to_vec();
    let Value::Sequence(items) = decoded.value(ivars[0].1) else {
        panic!("expected the delegate sequence");
    };
    assert_eq!(items[0], root, "the cycle must close on the instance");
}

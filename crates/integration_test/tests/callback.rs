//! The streaming callback: fired once per logical reconstructed value,
//! nested values included, wrappers and wrapper-position symbols excluded,
//! back-references never re-fired.

use amber_marshal::{dump, load_with, DepthLimit, Registry};
use amber_value::{Heap, Value, ValueId};

fn collect_fired(
    build: impl FnOnce(&mut Heap) -> ValueId,
) -> (Heap, ValueId, Vec<ValueId>) {
    let registry = Registry::new();
    let mut source = Heap::new();
    let root = build(&mut source);
    let bytes = dump(&mut source, &registry, root, DepthLimit::Unbounded)
        .expect("encode failed");

    let mut decoded = Heap::new();
    let mut fired = Vec::new();
    let result =
        load_with(&mut decoded, &registry, &bytes, |_heap, id| {
            fired.push(id);
        })
        .expect("decode failed");
    (decoded, result, fired)
}

#[test]
fn fires_per_value_with_the_root_last() {
    let (decoded, result, fired) = collect_fired(|heap| {
        let one = heap.integer(1);
        let word = heap.bytes("x");
        heap.sequence(vec![one, word])
    });

    assert_eq!(fired.len(), 3);
    assert_eq!(*fired.last().unwrap(), result);
    assert_eq!(decoded.value(fired[0]), &Value::Integer(1));
    assert!(decoded.value(fired[1]).is_bytes());
}

#[test]
fn wrapped_value_fires_once_after_decoration() {
    let (decoded, result, fired) = collect_fired(|heap| {
        let string = heap.bytes("payload");
        let note = heap.integer(9);
        let name = heap.intern("note");
        heap.set_ivar(string, name, note);
        string
    });

    // The ivar value fires while the block is read, then the wrapped
    // string exactly once, already decorated.
    assert_eq!(fired.len(), 2);
    assert_eq!(decoded.value(fired[0]), &Value::Integer(9));
    assert_eq!(fired[1], result);
    assert_eq!(decoded.get(result).ivars().len(), 1);
}

#[test]
fn back_references_do_not_refire() {
    let (_decoded, result, fired) = collect_fired(|heap| {
        let shared = heap.bytes("shared");
        heap.sequence(vec![shared, shared])
    });

    assert_eq!(fired.len(), 2, "the shared value fires once");
    assert_eq!(*fired.last().unwrap(), result);
}

#[test]
fn bare_symbols_fire_but_names_do_not() {
    let (decoded, result, fired) = collect_fired(|heap| {
        let tag = heap.symbol("tag");
        let object = heap.object("Widget");
        let name = heap.intern("field");
        heap.set_ivar(object, name, tag);
        heap.sequence(vec![object, tag])
    });

    // Fired: the symbol value (as an ivar value), the object, the symbol's
    // back-reference is silent, then the sequence. The class name and the
    // ivar name never fire.
    assert_eq!(fired.len(), 3);
    assert!(decoded.value(fired[0]).is_symbol());
    assert!(decoded.value(fired[1]).is_object());
    assert_eq!(fired[2], result);
}

#[test]
fn extended_wrapper_fires_once_for_the_final_value() {
    let (decoded, result, fired) = collect_fired(|heap| {
        let object = heap.object("Widget");
        let module = heap.intern("Comparable");
        heap.extend_with(object, [module]);
        object
    });

    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0], result);
    assert_eq!(decoded.get(result).modules().len(), 1);
}

#[test]
fn cycle_fires_once() {
    let (_decoded, result, fired) = collect_fired(|heap| {
        let cycle = heap.sequence(vec![]);
        heap.sequence_push(cycle, cycle);
        cycle
    });

    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0], result);
}

//! The error taxonomy of the serializer.
//!
//! Errors are grouped by what went wrong rather than where: framing problems
//! ([`FormatError`]), dangling references ([`LinkError`]), schema and dump
//! eligibility problems ([`TypeError`]), and user-codec failures
//! ([`HookError`]). The [`EncodeError`] and [`DecodeError`] umbrellas are
//! what the public entry points return. Nothing is retried internally; any
//! detected inconsistency aborts the whole call with no partial result.

use crate::wire::{MAJOR_VERSION, MINOR_VERSION};

/// A framing problem: the stream is malformed and unusable.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The stream's version header is not readable by this implementation.
    #[error(
        "incompatible format version (\
         {MAJOR_VERSION}.{MINOR_VERSION} required; {major}.{minor} given)"
    )]
    Version {
        /// The major version byte found in the stream.
        major: u8,
        /// The minor version byte found in the stream.
        minor: u8,
    },

    /// The stream ended in the middle of a record.
    #[error("unexpected end of stream")]
    Truncated,

    /// A record began with a byte that is not a known tag.
    #[error("unknown record tag {0:#04x}")]
    UnknownTag(u8),

    /// A symbol or symbol reference was required at this position.
    #[error("expected a symbol record, got tag {0:#04x}")]
    ExpectedSymbol(u8),

    /// A symbol name was not valid UTF-8.
    #[error("symbol name is not valid UTF-8")]
    InvalidSymbol,

    /// A length or count field was negative or out of range.
    #[error("bad length {0}")]
    BadLength(i64),

    /// A float record's decimal text did not parse.
    #[error("malformed float literal {0:?}")]
    MalformedFloat(String),
}

/// A dangling back-reference: the stream names an index that was never
/// registered. Indicates a corrupt or adversarial stream.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// An object back-reference pointed outside the object table.
    #[error("dump format error (unlinked object {0})")]
    UnlinkedObject(i64),

    /// A symbol reference pointed outside the symbol table.
    #[error("bad symbol reference {0}")]
    BadSymbol(i64),
}

/// A schema or dump-eligibility problem: the graph and the live types
/// disagree, or a value cannot be dumped at all.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    /// A class reference with an empty name cannot be dumped.
    #[error("can't dump anonymous class")]
    AnonymousClass,

    /// A module reference with an empty name cannot be dumped.
    #[error("can't dump anonymous module")]
    AnonymousModule,

    /// A record member on the wire does not match the declared member at
    /// the same position.
    #[error("record {name} is not compatible ({found} for {expected})")]
    IncompatibleRecord {
        /// The record type name.
        name: String,
        /// The member name the live type declares at this position.
        expected: String,
        /// The member name found on the wire.
        found: String,
    },

    /// The stream names a record type the registry does not know.
    #[error("unknown record type {0}")]
    UnknownRecord(String),
}

/// A user-supplied codec was missing or failed.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// The stream requires a codec the registry does not provide.
    #[error("class {class} has no registered {kind} codec")]
    Missing {
        /// The class name the stream asked for.
        class: String,
        /// Which codec kind was required (`"byte"` or `"value"`).
        kind: &'static str,
    },

    /// A codec returned an error; the class context is attached here.
    #[error("custom codec for {class} failed")]
    Failed {
        /// The class whose codec failed.
        class: String,
        /// The codec's own error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Everything [`dump`](crate::dump) can fail with.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// The recursion budget ran out before the graph bottomed out.
    #[error("exceed depth limit")]
    DepthExceeded,

    /// A value in the graph cannot be dumped.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// A user-supplied dump codec was missing or failed.
    #[error(transparent)]
    Hook(#[from] HookError),
}

/// Everything [`load`](crate::load) can fail with.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The stream is malformed.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The stream contains a dangling reference.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// The stream disagrees with the live types.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// A user-supplied load codec was missing or failed.
    #[error(transparent)]
    Hook(#[from] HookError),
}

// Closed error taxonomy for the message runtime (spec.md §7). Every
// constructor logs through `tracing` the moment the error is raised,
// not just wherever it's eventually handled or displayed, so a single
// trace capture shows the whole causal chain.

use std::borrow::Cow;

use backtrace_error::DynBacktraceError;
use thiserror::Error as ThisError;
use tracing::error;

#[cfg(test)]
use test_log::test;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("type mismatch on field {field}: schema says {expected}, got {actual}")]
    TypeMismatch {
        field: u16,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("value out of range: {0}")]
    OutOfRange(Cow<'static, str>),

    #[error("malformed wire data: {0}")]
    Malformed(Cow<'static, str>),

    #[error("unknown field number {field} ({context})")]
    UnknownField {
        field: u16,
        context: Cow<'static, str>,
    },

    #[error("encode inconsistency: wrote {wrote} bytes, struct declared {declared}")]
    EncodeInconsistency { wrote: u64, declared: u64 },

    #[error("patch rejected: {0}")]
    PatchRejected(Cow<'static, str>),

    #[error("unsupported patch version {0}")]
    UnsupportedPatchVersion(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] DynBacktraceError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    fn log(self) -> Self {
        error!(target: "claw", "{:?}", self);
        self
    }

    pub fn type_mismatch(field: u16, expected: &'static str, actual: &'static str) -> Self {
        Error::TypeMismatch {
            field,
            expected,
            actual,
        }
        .log()
    }

    pub fn out_of_range(msg: impl Into<Cow<'static, str>>) -> Self {
        Error::OutOfRange(msg.into()).log()
    }

    pub fn malformed(msg: impl Into<Cow<'static, str>>) -> Self {
        Error::Malformed(msg.into()).log()
    }

    pub fn unknown_field(field: u16, context: impl Into<Cow<'static, str>>) -> Self {
        Error::UnknownField {
            field,
            context: context.into(),
        }
        .log()
    }

    pub fn encode_inconsistency(wrote: u64, declared: u64) -> Self {
        Error::EncodeInconsistency { wrote, declared }.log()
    }

    pub fn patch_rejected(msg: impl Into<Cow<'static, str>>) -> Self {
        Error::PatchRejected(msg.into()).log()
    }

    pub fn unsupported_patch_version(version: u32) -> Self {
        Error::UnsupportedPatchVersion(version).log()
    }

    pub fn other<E: std::error::Error + Send + Sync + 'static>(err: E) -> Error {
        let dbe = DynBacktraceError::from(err);
        Error::Other(dbe).log()
    }
}

/// Shorthand for a one-off malformed-data error, in the spirit of the
/// teacher's ubiquitous `err("message")` call sites.
pub fn err(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::malformed(msg)
}

#[test]
fn test_error_kinds_log_and_display() {
    let e = err("test error");
    assert_eq!(format!("{e}"), "malformed wire data: test error");

    let e = Error::type_mismatch(3, "i32", "string");
    assert_eq!(
        format!("{e}"),
        "type mismatch on field 3: schema says i32, got string"
    );

    let e = Error::unsupported_patch_version(7);
    assert_eq!(format!("{e}"), "unsupported patch version 7");
}

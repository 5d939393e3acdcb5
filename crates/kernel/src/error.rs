use cellgraph_common::Kid;

use crate::field::FieldType;

/// Errors from kernel operations.
///
/// Every variant signals invalid usage (a dangling identifier, a write to a
/// locked cell, a broken edge pair). Expected runtime outcomes such as a
/// refused destruction are reported as `Ok(false)` instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("unknown cell {0}")]
    UnknownCell(Kid),
    #[error("cell {0} has been destroyed")]
    Retired(Kid),
    #[error("cell {0} is locked")]
    Locked(Kid),
    #[error("edge {from} -> {to} is not mirrored on both sides")]
    EdgeInvariant { from: Kid, to: Kid },
    #[error("construction of {type_name} failed: {reason}")]
    Construction {
        type_name: &'static str,
        reason: String,
    },
    #[error("field {field} expects {expected:?}, got {found:?}")]
    FieldType {
        field: String,
        expected: FieldType,
        found: FieldType,
    },
}

pub type Result<T, E = KernelError> = std::result::Result<T, E>;

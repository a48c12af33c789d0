//! Host-side error types.

use crate::{ClassId, ObjectRef};
use thiserror::Error;

/// Failure of a host heap operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    /// The handle refers to an object that no longer exists
    #[error("object {0} is not alive")]
    StaleObject(ObjectRef),

    /// No class with this id is registered
    #[error("unknown class id {0:?}")]
    UnknownClass(ClassId),

    /// No class with this name is registered
    #[error("unknown class `{0}`")]
    UnknownClassName(String),

    /// The class has no field with this name
    #[error("class `{class}` has no field `{field}`")]
    UnknownField {
        /// Class name
        class: String,
        /// Field name
        field: String,
    },

    /// The field exists but its value could not be read
    #[error("field `{field}` of `{class}` is not accessible")]
    InaccessibleField {
        /// Class name
        class: String,
        /// Field name
        field: String,
    },

    /// The object is not an array
    #[error("object {0} is not an object array")]
    NotAnArray(ObjectRef),

    /// A heap description referenced an object key that was never defined
    #[error("undefined object `{0}` in heap description")]
    UndefinedObject(String),
}

/// Result type for host heap operations.
pub type HeapResult<T> = Result<T, HeapError>;

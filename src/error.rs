//! Error type shared by the fallible map and hashing entry points.

use core::alloc::Layout;

/// Errors surfaced by fallible operations.
///
/// Misses are never errors: lookups report absence through `Option`,
/// `bool` or a default value.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The requested bucket count does not fit in the address space.
    #[error("bucket count overflowed the address space")]
    CapacityOverflow,

    /// The allocator refused to provide a new bucket array. The table that
    /// requested it is left untouched.
    #[error("allocating {} bytes for the bucket array failed", layout.size())]
    AllocError {
        /// Layout of the bucket array that could not be allocated.
        layout: Layout,
    },

    /// A [`crate::Config`] value was rejected by `Config::validate`.
    #[error("invalid table configuration: {0}")]
    InvalidConfig(&'static str),

    /// The process-wide hash seed was already read, so it can no longer be
    /// overridden.
    #[error("the execution hash seed is already fixed")]
    SeedAlreadyFixed,
}

/// Unwrap the result of a growth step on an infallible code path.
///
/// Allocation failure is routed to the global allocation error handler,
/// overflow panics.
pub(crate) fn infallible<T>(res: Result<T, Error>) -> T {
    match res {
        Ok(v) => v,
        Err(Error::AllocError { layout }) => std::alloc::handle_alloc_error(layout),
        Err(e) => panic!("{e}"),
    }
}

/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{
    fmt::{Debug, Display},
    io,
};

/// Convenience alias for a `Result<T, RingError>`.
pub type RingResult<T> = Result<T, RingError>;

/// Common error type shared through blockring.
///
/// The runtime origin of an error is disambiguated by [`kind()`](Self::kind);
/// the full source chain (with the file and line of every propagation point)
/// is carried by an inner [`anyhow::Error`].
///
/// # Properties
///
/// * `std::mem::size_of::<RingError>() == 16`: The struct is 16 bytes. This allows it to
///   be returned in registers rather than on the stack.
/// * `std::mem::size_of::<Option<RingError>>() == 16`: The struct can use Rust's niche
///   optimization.
#[derive(Debug)]
pub struct RingError {
    kind: RingErrorKind,
    error: anyhow::Error,
}

impl RingError {
    /// Construct a new `RingError` encapsulating `err`.
    ///
    /// # Attributes
    ///
    /// - `track_caller`: Internally, the type `err` is embedded inside a `Located` struct,
    ///   recording the file and line of creation. The `[track_caller]` attribute allows
    ///   for precise recording of the caller.
    ///
    /// - `inline(never)`: To keep the happy-path cost as minimal as possible, this function
    ///   is marked as `[inline(never)]` to outline error handling code.
    #[track_caller]
    #[inline(never)]
    pub fn new<E>(kind: RingErrorKind, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            error: anyhow::Error::new(Located::new(err)),
        }
    }

    /// Construct a new `RingError` with the provided error message.
    #[track_caller]
    #[inline(never)]
    pub fn message<D>(kind: RingErrorKind, display: D) -> Self
    where
        D: Display + Debug + Send + Sync + 'static,
    {
        Self {
            kind,
            error: anyhow::Error::msg(Located::new(display)),
        }
    }

    /// Attach the context to `Self` and return a new error.
    #[track_caller]
    #[inline(never)]
    pub fn context<C>(self, context: C) -> Self
    where
        C: Display + Debug + Send + Sync + 'static,
    {
        Self {
            kind: self.kind,
            error: self.error.context(Located::new(context)),
        }
    }

    /// Return the kind of the originally constructed error.
    pub fn kind(&self) -> RingErrorKind {
        self.kind
    }

    /// Create and return an IOError
    #[track_caller]
    #[inline(never)]
    pub fn log_io_error(err: io::Error) -> Self {
        Self::new(RingErrorKind::IOError, err)
    }

    /// Create and return an AllocationError
    #[track_caller]
    #[inline(never)]
    pub fn log_alloc_error<D: Display>(err: D) -> Self {
        Self::message(RingErrorKind::AllocationError, err.to_string())
    }

    /// Create and return an AlignmentError
    #[track_caller]
    #[inline(never)]
    pub fn log_alignment_error<D: Display>(err: D) -> Self {
        Self::message(RingErrorKind::AlignmentError, err.to_string())
    }

    /// Create and return a ConfigError
    #[track_caller]
    #[inline(never)]
    pub fn log_config_error<D: Display>(err: D) -> Self {
        Self::message(RingErrorKind::ConfigError, err.to_string())
    }

    /// Create and return a SubmissionError for a failed push into the submission ring
    #[track_caller]
    #[inline(never)]
    pub fn log_push_error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(RingErrorKind::SubmissionError, err)
    }

    /// Create and return a SubmissionError for a failed submit syscall
    #[track_caller]
    #[inline(never)]
    pub fn log_submit_error(err: io::Error) -> Self {
        Self::new(RingErrorKind::SubmissionError, err)
    }

    /// Create and return a WaitFailed error
    #[track_caller]
    #[inline(never)]
    pub fn log_wait_error(err: io::Error) -> Self {
        Self::new(RingErrorKind::WaitFailed, err)
    }

    /// Create and return an OperationFailed error
    #[track_caller]
    #[inline(never)]
    pub fn log_operation_error(err: io::Error) -> Self {
        Self::new(RingErrorKind::OperationFailed, err)
    }

    /// Create and return a StaleCompletion error
    #[track_caller]
    #[inline(never)]
    pub fn log_stale_completion<D: Display>(err: D) -> Self {
        Self::message(RingErrorKind::StaleCompletion, err.to_string())
    }

    /// Create and return an InvalidOperation error
    #[track_caller]
    #[inline(never)]
    pub fn log_invalid_operation<D: Display>(err: D) -> Self {
        Self::message(RingErrorKind::InvalidOperation, err.to_string())
    }
}

impl Display for RingError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        // Use the debug format `{:?}` for `anyhow::Error` to get the source chain as well
        // as a stack trace.
        write!(formatter, "RingError: {:?}\n\n{:?}", self.kind, self.error)
    }
}

impl std::error::Error for RingError {
    // Don't implement `source` because we print the whole source chain in our `Display`
    // implementation.
}

// Convert from `io::Error` to `RingError`
impl From<io::Error> for RingError {
    #[track_caller]
    fn from(err: io::Error) -> Self {
        RingError::log_io_error(err)
    }
}

/// An internal wrapper for error types that also tracks the file and line information
/// for where the error was first converted and where context was propagated.
#[derive(Debug)]
struct Located<T>
where
    T: Debug,
{
    err: T,
    location: &'static std::panic::Location<'static>,
}

impl<T> Located<T>
where
    T: Debug,
{
    #[track_caller]
    fn new(err: T) -> Self {
        Self {
            err,
            location: std::panic::Location::caller(),
        }
    }
}

impl<T> Display for Located<T>
where
    T: Display + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "{} -- ({}:{})",
            self.err,
            self.location.file(),
            self.location.line()
        )
    }
}

impl<T> std::error::Error for Located<T>
where
    T: std::error::Error + Debug,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.err.source()
    }
}

/// Add context to a returned error that will be included in the source chain.
pub trait ErrorContext<T> {
    /// Attach the provided context to the error part of the result.
    fn context<C>(self, context: C) -> Result<T, RingError>
    where
        C: Display + Debug + Send + Sync + 'static;

    /// Attach the provided context to the error part of the result.
    ///
    /// The function `f` will only be evaluated if `self` is an `Err`.
    fn with_context<F, C>(self, f: F) -> Result<T, RingError>
    where
        C: Display + Debug + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    RingError: From<E>,
{
    #[track_caller]
    fn context<C>(self, context: C) -> Result<T, RingError>
    where
        C: Display + Debug + Send + Sync + 'static,
    {
        match self {
            Ok(value) => Ok(value),
            Err(error) => Err(RingError::from(error).context(context)),
        }
    }

    #[track_caller]
    fn with_context<F, C>(self, f: F) -> Result<T, RingError>
    where
        C: Display + Debug + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        match self {
            Ok(value) => Ok(value),
            Err(error) => Err(RingError::from(error).context(f())),
        }
    }
}

/// Error kinds used to tag a returned error.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RingErrorKind {
    /// Aligned buffer allocation failed. Fatal to the calling request, never retried.
    AllocationError,

    /// An offset, length or base address violates the block alignment requirement.
    AlignmentError,

    /// The ring configuration is invalid (block size, queue depth).
    ConfigError,

    /// The submission queue or buffer pool has no free slot, or the kernel
    /// rejected the submit syscall.
    SubmissionError,

    /// The blocking or timed wait primitive itself failed.
    WaitFailed,

    /// A completion record carries a negative result; the underlying read failed
    /// and the slot's buffer contents are undefined.
    OperationFailed,

    /// A completion's generation tag does not match the slot's current generation.
    /// The record is discarded instead of being resolved to a buffer.
    StaleCompletion,

    /// The API was driven out of order (e.g. waiting with nothing in flight).
    InvalidOperation,

    /// File open, descriptor registration or other OS-level failure.
    IOError,
}

use std::fmt;

use backtrace::Backtrace;

use crate::btree::page_pos::PagePos;

/// Errors surfaced by the node page subsystem.
///
/// All four kinds propagate to the caller of the map-level operation; none
/// of them leave a partially mutated page installed, because copy-on-write
/// only swaps a `PageReference` once the replacement subtree is complete.
#[derive(Debug)]
pub enum PageError {
    /// Page length mismatch, check-value mismatch, unknown type byte, or
    /// varint overflow. The offending page is never installed.
    CorruptPage { pos: PagePos, reason: String },

    /// The storage collaborator failed to read or write a page.
    IoFault { pos: PagePos, reason: String },

    /// Compression algorithm or page variant not recognized.
    UnsupportedFormat { reason: String },

    /// A programming error: split bounds out of range, key/child length
    /// mismatch, and similar invariant violations. Carries a backtrace
    /// since these indicate a bug in the caller, not a recoverable
    /// condition.
    Invariant { reason: String, backtrace: Backtrace },
}

impl PageError {
    pub fn corrupt(pos: PagePos, reason: impl Into<String>) -> Self {
        PageError::CorruptPage { pos, reason: reason.into() }
    }

    pub fn io_fault(pos: PagePos, reason: impl Into<String>) -> Self {
        PageError::IoFault { pos, reason: reason.into() }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        PageError::UnsupportedFormat { reason: reason.into() }
    }

    pub fn invariant(reason: impl Into<String>) -> Self {
        let err = PageError::Invariant {
            reason: reason.into(),
            backtrace: Backtrace::new(),
        };
        err.show_backtrace();
        err
    }

    /// Log the backtrace at error level; only meaningful for the
    /// `Invariant` variant, a no-op otherwise.
    pub fn show_backtrace(&self) {
        if let PageError::Invariant { reason, backtrace } = self {
            log::error!("invariant violation: {}\n{:?}", reason, backtrace);
        }
    }
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PageError::CorruptPage { pos, reason } => {
                write!(f, "corrupt page at {}: {}", pos, reason)
            }
            PageError::IoFault { pos, reason } => {
                write!(f, "io fault at {}: {}", pos, reason)
            }
            PageError::UnsupportedFormat { reason } => {
                write!(f, "unsupported format: {}", reason)
            }
            PageError::Invariant { reason, .. } => {
                write!(f, "invariant violation: {}", reason)
            }
        }
    }
}

impl std::error::Error for PageError {}

pub type PageResult<T> = Result<T, PageError>;

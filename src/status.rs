use crate::address::{Address, RecordInfo};
use crate::error::OperationError;

/// Outcome of a data operation, both as returned by the issuing call and as
/// delivered to its completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotFound,
    /// Suspended on I/O. The completion callback carries the final status.
    Pending,
    Error(OperationError),
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Status::Pending)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Status::NotFound)
    }

    pub fn error(&self) -> Option<&OperationError> {
        match self {
            Status::Error(e) => Some(e),
            _ => None,
        }
    }
}

/// Synchronous result of [`crate::Session::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome<O> {
    pub status: Status,
    /// `None` while the read is pending or when no record was read.
    pub output: Option<O>,
    pub record_info: RecordInfo,
}

impl<O> ReadOutcome<O> {
    pub(crate) fn pending() -> Self {
        Self {
            status: Status::Pending,
            output: None,
            record_info: RecordInfo::default(),
        }
    }
}

/// What an operation left behind once it reached a terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OpOutcome {
    pub(crate) status: Status,
    /// Record holding this operation's effect, if it wrote one.
    pub(crate) written: Option<Address>,
}

impl OpOutcome {
    pub(crate) fn status(status: Status) -> Self {
        Self {
            status,
            written: None,
        }
    }

    pub(crate) fn wrote(address: Address) -> Self {
        Self {
            status: Status::Ok,
            written: Some(address),
        }
    }

    pub(crate) fn failed(err: impl Into<OperationError>) -> Self {
        Self::status(Status::Error(err.into()))
    }
}

//! What a worker does with a work item that it could not complete.
//!
//! Every failure puts the item back in the queue, the only question is if
//! the worker keeps its connection or gives up on the peer.
use crate::error::{Error, ErrorClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The peer did not announce the piece.
    PeerLacksPiece,
    /// The piece was downloaded but its hash is wrong.
    Integrity,
    /// The download of the piece failed with an error of this class.
    Download(ErrorClass),
}

impl From<&Error> for Failure {
    fn from(value: &Error) -> Self {
        match value.class() {
            ErrorClass::Integrity => Failure::Integrity,
            class => Failure::Download(class),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RequeueAndContinue,
    RequeueAndTerminateWorker,
}

pub fn on_failure(failure: &Failure) -> RetryDecision {
    match failure {
        // another peer may have it
        Failure::PeerLacksPiece => RetryDecision::RequeueAndContinue,
        // a single bad piece does not condemn the connection
        Failure::Integrity => RetryDecision::RequeueAndContinue,
        // the connection is presumed broken, or the peer is misbehaving
        Failure::Download(_) => RetryDecision::RequeueAndTerminateWorker,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decisions() {
        assert_eq!(
            on_failure(&Failure::PeerLacksPiece),
            RetryDecision::RequeueAndContinue
        );
        assert_eq!(
            on_failure(&Failure::Integrity),
            RetryDecision::RequeueAndContinue
        );

        let classes =
            [ErrorClass::Io, ErrorClass::Decode, ErrorClass::Connection];
        for class in classes {
            assert_eq!(
                on_failure(&Failure::Download(class)),
                RetryDecision::RequeueAndTerminateWorker
            );
        }
    }

    #[test]
    fn from_error() {
        assert_eq!(Failure::from(&Error::PieceInvalid(3)), Failure::Integrity);
        assert_eq!(
            Failure::from(&Error::Timeout),
            Failure::Download(ErrorClass::Io)
        );
        assert_eq!(
            Failure::from(&Error::BeginOutOfBounds { begin: 12, len: 10 }),
            Failure::Download(ErrorClass::Decode)
        );
    }
}

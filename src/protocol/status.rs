//! Binary-protocol response status codes.

use crate::error::ProtocolError;

/// The 16-bit status carried in a response header.
///
/// `NoError` is success; everything else is a per-request server failure.
/// The cache front-end maps a handful of these to expected outcomes
/// (`KeyNotFound` on DELETE is success, `KeyExists` on ADD/CAS is a plain
/// `false`); all other statuses are logged and reported as failure for the
/// affected key. A status outside this set is a client-side
/// [`ProtocolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResponseStatus {
    NoError = 0x0000,
    KeyNotFound = 0x0001,
    KeyExists = 0x0002,
    ValueTooLarge = 0x0003,
    InvalidArguments = 0x0004,
    ItemNotStored = 0x0005,
    IncrDecrOnNonNumericValue = 0x0006,
    VbucketBelongsToAnotherServer = 0x0007,
    AuthenticationError = 0x0008,
    AuthenticationContinue = 0x0009,
    AuthenticationRequired = 0x0020,
    FurtherAuthenticationRequired = 0x0021,
    UnknownCommand = 0x0081,
    OutOfMemory = 0x0082,
    NotSupported = 0x0083,
    InternalError = 0x0084,
    Busy = 0x0085,
    TemporaryFailure = 0x0086,
}

impl ResponseStatus {
    /// Returns the wire code for this status.
    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }

    /// True for `NoError`.
    #[inline]
    pub fn is_ok(self) -> bool {
        self == ResponseStatus::NoError
    }

    /// Human-readable description, matching the protocol text.
    pub fn message(self) -> &'static str {
        match self {
            ResponseStatus::NoError => "No error",
            ResponseStatus::KeyNotFound => "Key not found",
            ResponseStatus::KeyExists => "Key exists",
            ResponseStatus::ValueTooLarge => "Value too large",
            ResponseStatus::InvalidArguments => "Invalid arguments",
            ResponseStatus::ItemNotStored => "Item not stored",
            ResponseStatus::IncrDecrOnNonNumericValue => "Incr/Decr on non-numeric value",
            ResponseStatus::VbucketBelongsToAnotherServer => {
                "The vbucket belongs to another server"
            },
            ResponseStatus::AuthenticationError => "Authentication error",
            ResponseStatus::AuthenticationContinue => "Authentication continue",
            ResponseStatus::AuthenticationRequired => "Authentication required or not successful",
            ResponseStatus::FurtherAuthenticationRequired => {
                "Further authentication steps required"
            },
            ResponseStatus::UnknownCommand => "Unknown command",
            ResponseStatus::OutOfMemory => "Out of memory",
            ResponseStatus::NotSupported => "Not supported",
            ResponseStatus::InternalError => "Internal error",
            ResponseStatus::Busy => "Busy",
            ResponseStatus::TemporaryFailure => "Temporary failure",
        }
    }
}

impl TryFrom<u16> for ResponseStatus {
    type Error = ProtocolError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        let status = match code {
            0x0000 => ResponseStatus::NoError,
            0x0001 => ResponseStatus::KeyNotFound,
            0x0002 => ResponseStatus::KeyExists,
            0x0003 => ResponseStatus::ValueTooLarge,
            0x0004 => ResponseStatus::InvalidArguments,
            0x0005 => ResponseStatus::ItemNotStored,
            0x0006 => ResponseStatus::IncrDecrOnNonNumericValue,
            0x0007 => ResponseStatus::VbucketBelongsToAnotherServer,
            0x0008 => ResponseStatus::AuthenticationError,
            0x0009 => ResponseStatus::AuthenticationContinue,
            0x0020 => ResponseStatus::AuthenticationRequired,
            0x0021 => ResponseStatus::FurtherAuthenticationRequired,
            0x0081 => ResponseStatus::UnknownCommand,
            0x0082 => ResponseStatus::OutOfMemory,
            0x0083 => ResponseStatus::NotSupported,
            0x0084 => ResponseStatus::InternalError,
            0x0085 => ResponseStatus::Busy,
            0x0086 => ResponseStatus::TemporaryFailure,
            other => return Err(ProtocolError::UnknownStatus(other)),
        };
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_try_from() {
        let all = [
            ResponseStatus::NoError,
            ResponseStatus::KeyNotFound,
            ResponseStatus::KeyExists,
            ResponseStatus::ValueTooLarge,
            ResponseStatus::InvalidArguments,
            ResponseStatus::ItemNotStored,
            ResponseStatus::IncrDecrOnNonNumericValue,
            ResponseStatus::VbucketBelongsToAnotherServer,
            ResponseStatus::AuthenticationError,
            ResponseStatus::AuthenticationContinue,
            ResponseStatus::AuthenticationRequired,
            ResponseStatus::FurtherAuthenticationRequired,
            ResponseStatus::UnknownCommand,
            ResponseStatus::OutOfMemory,
            ResponseStatus::NotSupported,
            ResponseStatus::InternalError,
            ResponseStatus::Busy,
            ResponseStatus::TemporaryFailure,
        ];
        for status in all {
            assert_eq!(ResponseStatus::try_from(status.code()).unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_a_protocol_error() {
        assert!(matches!(
            ResponseStatus::try_from(0x00ff),
            Err(ProtocolError::UnknownStatus(0x00ff))
        ));
    }

    #[test]
    fn only_no_error_is_ok() {
        assert!(ResponseStatus::NoError.is_ok());
        assert!(!ResponseStatus::KeyNotFound.is_ok());
        assert!(!ResponseStatus::TemporaryFailure.is_ok());
    }
}

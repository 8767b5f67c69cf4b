//! Binary-protocol command opcodes.
//!
//! The set mirrors the standard memcached binary protocol, including the
//! quiet variants, SASL authentication, and the TAP / vbucket management
//! opcodes. The latter are carried for encode/decode parity only; the cache
//! front-end issues no TAP commands itself.
//!
//! `gets` has no opcode of its own: it is a `Get` (`0x00`) whose caller
//! reads the CAS field out of the response, so no `Gets` variant exists
//! here.

use crate::error::ProtocolError;

/// A binary-protocol opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    Add = 0x02,
    Replace = 0x03,
    Delete = 0x04,
    Increment = 0x05,
    Decrement = 0x06,
    Quit = 0x07,
    Flush = 0x08,
    GetQ = 0x09,
    Noop = 0x0a,
    Version = 0x0b,
    GetK = 0x0c,
    GetKQ = 0x0d,
    Append = 0x0e,
    Prepend = 0x0f,
    Stat = 0x10,
    SetQ = 0x11,
    AddQ = 0x12,
    ReplaceQ = 0x13,
    DeleteQ = 0x14,
    IncrementQ = 0x15,
    DecrementQ = 0x16,
    QuitQ = 0x17,
    FlushQ = 0x18,
    AppendQ = 0x19,
    PrependQ = 0x1a,
    Verbosity = 0x1b,
    Touch = 0x1c,
    Gat = 0x1d,
    GatQ = 0x1e,
    SaslListMechs = 0x20,
    SaslAuth = 0x21,
    SaslStep = 0x22,
    RGet = 0x30,
    RSet = 0x31,
    RSetQ = 0x32,
    RAppend = 0x33,
    RAppendQ = 0x34,
    RPrepend = 0x35,
    RPrependQ = 0x36,
    RDelete = 0x37,
    RDeleteQ = 0x38,
    RIncr = 0x39,
    RIncrQ = 0x3a,
    RDecr = 0x3b,
    RDecrQ = 0x3c,
    SetVbucket = 0x3d,
    GetVbucket = 0x3e,
    DelVbucket = 0x3f,
    TapConnect = 0x40,
    TapMutation = 0x41,
    TapDelete = 0x42,
    TapFlush = 0x43,
    TapOpaque = 0x44,
    TapVbucketSet = 0x45,
    TapCheckpointStart = 0x46,
    TapCheckpointEnd = 0x47,
}

impl Opcode {
    /// Returns the wire byte for this opcode.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Returns the quiet variant of this opcode, if one exists.
    ///
    /// Quiet opcodes suppress per-request responses on success; a quiet
    /// batch must be terminated with [`Opcode::Noop`] so the client can
    /// detect the end of the batch.
    pub fn quiet(self) -> Option<Opcode> {
        match self {
            Opcode::Get => Some(Opcode::GetQ),
            Opcode::GetK => Some(Opcode::GetKQ),
            Opcode::Set => Some(Opcode::SetQ),
            Opcode::Add => Some(Opcode::AddQ),
            Opcode::Replace => Some(Opcode::ReplaceQ),
            Opcode::Delete => Some(Opcode::DeleteQ),
            Opcode::Increment => Some(Opcode::IncrementQ),
            Opcode::Decrement => Some(Opcode::DecrementQ),
            Opcode::Quit => Some(Opcode::QuitQ),
            Opcode::Flush => Some(Opcode::FlushQ),
            Opcode::Append => Some(Opcode::AppendQ),
            Opcode::Prepend => Some(Opcode::PrependQ),
            Opcode::Gat => Some(Opcode::GatQ),
            Opcode::RSet => Some(Opcode::RSetQ),
            Opcode::RAppend => Some(Opcode::RAppendQ),
            Opcode::RPrepend => Some(Opcode::RPrependQ),
            Opcode::RDelete => Some(Opcode::RDeleteQ),
            Opcode::RIncr => Some(Opcode::RIncrQ),
            Opcode::RDecr => Some(Opcode::RDecrQ),
            _ => None,
        }
    }

    /// True if this opcode suppresses success responses.
    pub fn is_quiet(self) -> bool {
        matches!(
            self,
            Opcode::GetQ
                | Opcode::GetKQ
                | Opcode::SetQ
                | Opcode::AddQ
                | Opcode::ReplaceQ
                | Opcode::DeleteQ
                | Opcode::IncrementQ
                | Opcode::DecrementQ
                | Opcode::QuitQ
                | Opcode::FlushQ
                | Opcode::AppendQ
                | Opcode::PrependQ
                | Opcode::GatQ
                | Opcode::RSetQ
                | Opcode::RAppendQ
                | Opcode::RPrependQ
                | Opcode::RDeleteQ
                | Opcode::RIncrQ
                | Opcode::RDecrQ
        )
    }
}

impl TryFrom<u8> for Opcode {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        let opcode = match byte {
            0x00 => Opcode::Get,
            0x01 => Opcode::Set,
            0x02 => Opcode::Add,
            0x03 => Opcode::Replace,
            0x04 => Opcode::Delete,
            0x05 => Opcode::Increment,
            0x06 => Opcode::Decrement,
            0x07 => Opcode::Quit,
            0x08 => Opcode::Flush,
            0x09 => Opcode::GetQ,
            0x0a => Opcode::Noop,
            0x0b => Opcode::Version,
            0x0c => Opcode::GetK,
            0x0d => Opcode::GetKQ,
            0x0e => Opcode::Append,
            0x0f => Opcode::Prepend,
            0x10 => Opcode::Stat,
            0x11 => Opcode::SetQ,
            0x12 => Opcode::AddQ,
            0x13 => Opcode::ReplaceQ,
            0x14 => Opcode::DeleteQ,
            0x15 => Opcode::IncrementQ,
            0x16 => Opcode::DecrementQ,
            0x17 => Opcode::QuitQ,
            0x18 => Opcode::FlushQ,
            0x19 => Opcode::AppendQ,
            0x1a => Opcode::PrependQ,
            0x1b => Opcode::Verbosity,
            0x1c => Opcode::Touch,
            0x1d => Opcode::Gat,
            0x1e => Opcode::GatQ,
            0x20 => Opcode::SaslListMechs,
            0x21 => Opcode::SaslAuth,
            0x22 => Opcode::SaslStep,
            0x30 => Opcode::RGet,
            0x31 => Opcode::RSet,
            0x32 => Opcode::RSetQ,
            0x33 => Opcode::RAppend,
            0x34 => Opcode::RAppendQ,
            0x35 => Opcode::RPrepend,
            0x36 => Opcode::RPrependQ,
            0x37 => Opcode::RDelete,
            0x38 => Opcode::RDeleteQ,
            0x39 => Opcode::RIncr,
            0x3a => Opcode::RIncrQ,
            0x3b => Opcode::RDecr,
            0x3c => Opcode::RDecrQ,
            0x3d => Opcode::SetVbucket,
            0x3e => Opcode::GetVbucket,
            0x3f => Opcode::DelVbucket,
            0x40 => Opcode::TapConnect,
            0x41 => Opcode::TapMutation,
            0x42 => Opcode::TapDelete,
            0x43 => Opcode::TapFlush,
            0x44 => Opcode::TapOpaque,
            0x45 => Opcode::TapVbucketSet,
            0x46 => Opcode::TapCheckpointStart,
            0x47 => Opcode::TapCheckpointEnd,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        };
        Ok(opcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_try_from() {
        let all = [
            Opcode::Get,
            Opcode::Set,
            Opcode::Add,
            Opcode::Replace,
            Opcode::Delete,
            Opcode::Increment,
            Opcode::Decrement,
            Opcode::Quit,
            Opcode::Flush,
            Opcode::GetQ,
            Opcode::Noop,
            Opcode::Version,
            Opcode::GetK,
            Opcode::GetKQ,
            Opcode::Append,
            Opcode::Prepend,
            Opcode::Stat,
            Opcode::SetQ,
            Opcode::AddQ,
            Opcode::ReplaceQ,
            Opcode::DeleteQ,
            Opcode::IncrementQ,
            Opcode::DecrementQ,
            Opcode::QuitQ,
            Opcode::FlushQ,
            Opcode::AppendQ,
            Opcode::PrependQ,
            Opcode::Verbosity,
            Opcode::Touch,
            Opcode::Gat,
            Opcode::GatQ,
            Opcode::SaslListMechs,
            Opcode::SaslAuth,
            Opcode::SaslStep,
            Opcode::TapConnect,
            Opcode::TapCheckpointEnd,
        ];
        for opcode in all {
            assert_eq!(Opcode::try_from(opcode.code()).unwrap(), opcode);
        }
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        assert!(matches!(
            Opcode::try_from(0x7f),
            Err(ProtocolError::UnknownOpcode(0x7f))
        ));
        // 0x1f sits in the gap between GatQ and SaslListMechs.
        assert!(Opcode::try_from(0x1f).is_err());
    }

    #[test]
    fn quiet_mapping_is_consistent() {
        for opcode in [
            Opcode::Get,
            Opcode::GetK,
            Opcode::Set,
            Opcode::Add,
            Opcode::Replace,
            Opcode::Delete,
            Opcode::Increment,
            Opcode::Decrement,
            Opcode::Append,
            Opcode::Prepend,
            Opcode::Gat,
        ] {
            let quiet = opcode.quiet().expect("quiet variant exists");
            assert!(quiet.is_quiet());
            assert!(!opcode.is_quiet());
        }
    }

    #[test]
    fn noop_and_version_have_no_quiet_variant() {
        assert_eq!(Opcode::Noop.quiet(), None);
        assert_eq!(Opcode::Version.quiet(), None);
        assert_eq!(Opcode::Stat.quiet(), None);
    }
}

//! Memcached binary wire protocol.
//!
//! Every request and response on the wire is a 24-byte header followed by
//! extras, key, and value, concatenated in that order:
//!
//! ```text
//! +---------+---------+------------------+---------------+
//! | magic   | opcode  | key length (BE)  | extras length |
//! | 1 byte  | 1 byte  | 2 bytes          | 1 byte        |
//! +---------+---------+------------------+---------------+
//! | data    | vbucket id / status (BE)   | total body    |
//! | type 0  | 2 bytes                    | length, 4B BE |
//! +---------+----------------------------+---------------+
//! | opaque (4 bytes)   | cas (8 bytes)                   |
//! +--------------------+---------------------------------+
//! | extras | key | value   ... total body length bytes   |
//! +-------------------------------------------------------+
//! ```
//!
//! Requests carry magic `0x80`, responses `0x81`. The opaque and CAS fields
//! are echoed by the server unchanged; the opaque is the client's response
//! correlation handle.
//!
//! ## Key Components
//!
//! - [`Opcode`]: the full standard opcode set, including quiet variants,
//!   SASL, TAP, and vbucket management (wire parity only).
//! - [`ResponseStatus`]: the 16-bit status codes a server may answer with.
//! - [`Request`] / [`Response`]: owned frame envelopes with symmetric
//!   encode/decode so both a client and an in-process test server can be
//!   built on the same codec.

pub mod frame;
pub mod opcode;
pub mod status;

pub use frame::{
    Extras, Request, Response, EXPIRATION_NO_CREATE, HEADER_LEN, REQUEST_MAGIC, RESPONSE_MAGIC,
};
pub use opcode::Opcode;
pub use status::ResponseStatus;

//! Shared types for the Alyx reactive backend core: the error taxonomy
//! (§7), RFC3339 time helpers, opaque token generation, and the
//! (type, source, action) wildcard matching used by both the event bus and
//! the hook dispatcher.

mod error;
mod matching;
mod time;
mod token;

pub use error::{AlyxError, ErrorCode, ErrorWire};
pub use matching::{dispatch_keys, pattern_matches, WILDCARD};
pub use time::{now, parse_rfc3339, to_rfc3339};
pub use token::opaque_token;

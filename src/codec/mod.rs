//! The wire codec (C1, spec §4.1): framing, the primitive map codec,
//! modified UTF-8 strings, tight/loose command marshalling, and wireformat
//! negotiation.

pub mod frame;
pub mod marshal;
pub mod negotiate;
pub mod primitives;
pub mod string;

pub use frame::{read_length_prefix, split_frame, write_frame, MAX_FRAME_LEN};
pub use marshal::{decode_command, decode_envelope, encode_command, encode_envelope};
pub use negotiate::{bootstrap_wireformat_info, negotiate, NegotiatedWireformat, Negotiator};

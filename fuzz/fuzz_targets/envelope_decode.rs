//! Fuzz target for Envelope::decode
//!
//! Feeds arbitrary byte sequences to the envelope decoder to find:
//! - Parser crashes or panics
//! - Integer overflows in CBOR length handling
//! - Malformed bodies that bypass version validation
//!
//! The decoder should NEVER panic. All invalid inputs must return an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tally_proto::Envelope;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must decode to Ok or Err, never panic.
    let _ = Envelope::decode(data);
});

//! Fuzz target for decode/encode stability
//!
//! Any bytes the decoder accepts must re-encode and decode back to the
//! same envelope, and the signing bytes of a request must be stable
//! across the round trip. Divergence here would let a re-encoded request
//! carry a signature over different content.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tally_proto::{Body, Envelope};

fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = Envelope::decode(data) else {
        return;
    };

    let encoded = envelope.encode().expect("accepted envelope must re-encode");
    let reparsed = Envelope::decode(&encoded).expect("re-encoded envelope must decode");
    assert_eq!(envelope, reparsed);

    if let (Body::Request(a), Body::Request(b)) = (&envelope.body, &reparsed.body) {
        let sa = a.signing_bytes().expect("signing bytes");
        let sb = b.signing_bytes().expect("signing bytes");
        assert_eq!(sa, sb);
    }
});

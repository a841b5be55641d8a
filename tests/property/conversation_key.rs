// Test-specific lint overrides: property tests use unwrap freely.
#![allow(clippy::unwrap_used)]

//! Property tests for conversation key canonicalization.
//!
//! Uses proptest to verify:
//! 1. The key for `(a, b)` equals the key for `(b, a)` for any two ids.
//! 2. The smaller id is always listed first.
//! 3. Distinct unordered pairs never share a key.
//! 4. Random text never panics the frame decoder.

use proptest::prelude::*;
use parley_proto::codec;
use parley_proto::message::{ConversationKey, UserId};

/// Strategy for generating arbitrary non-empty user ids, including ids that
/// contain the `:` separator used by the key's display form.
fn arb_user_id() -> impl Strategy<Value = UserId> {
    "[^\x00]{1,32}".prop_map(|s| UserId::parse(s).unwrap())
}

proptest! {
    #[test]
    fn key_is_symmetric(a in arb_user_id(), b in arb_user_id()) {
        prop_assert_eq!(ConversationKey::new(&a, &b), ConversationKey::new(&b, &a));
    }

    #[test]
    fn smaller_id_comes_first(a in arb_user_id(), b in arb_user_id()) {
        let key = ConversationKey::new(&a, &b);
        let (low, high) = key.participants();
        prop_assert!(low <= high);
        prop_assert!((low == &a && high == &b) || (low == &b && high == &a));
    }

    #[test]
    fn distinct_pairs_get_distinct_keys(
        a in arb_user_id(),
        b in arb_user_id(),
        c in arb_user_id(),
        d in arb_user_id(),
    ) {
        let same_pair = (a == c && b == d) || (a == d && b == c);
        let same_key = ConversationKey::new(&a, &b) == ConversationKey::new(&c, &d);
        prop_assert_eq!(same_pair, same_key);
    }

    #[test]
    fn random_text_never_panics_decoder(text in ".{0,256}") {
        let _ = codec::decode_frame(&text);
        let _ = codec::decode_message(&text);
    }
}

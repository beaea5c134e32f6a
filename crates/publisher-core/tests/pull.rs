//! Exercises the pull path (the part of §4.F that doesn't require a live
//! database): a context ID round-trips through decode to the same
//! `(peer, first, count)` the engine was given, and the resulting window's
//! multihash stream contains exactly the non-empty CIDs in that window, in
//! order, and terminates cleanly.

use cid::multihash::Multihash;
use publisher_core::{context_id, MultihashIter};

fn object_cid(n: u64) -> Vec<u8> {
    let digest = Multihash::<64>::wrap(0x12, &n.to_be_bytes()).unwrap();
    cid::Cid::new_v1(0x55, digest).to_bytes()
}

#[test]
fn pull_yields_exactly_the_windows_non_empty_cids_in_order() {
    let peer = libp2p_identity::Keypair::generate_ed25519().public().into();
    let context_id = context_id::encode(peer, 0, 25_000);

    // Simulates the `objects` rows for ids 0..24999: a run of real CIDs with
    // a couple of empty ones interspersed, as the source tolerates.
    let mut raw_cids = Vec::new();
    for id in 0..25_000u64 {
        if id == 10 || id == 20_000 {
            raw_cids.push(Vec::new());
        } else {
            raw_cids.push(object_cid(id));
        }
    }

    // The engine, on a pull, decodes the context ID it was given back into
    // (peer, first, count) and asks the lister for that window.
    let parts = context_id::decode(&context_id).unwrap();
    assert_eq!(parts.peer, peer);
    assert_eq!(parts.first, 0);
    assert_eq!(parts.count, 25_000);

    let mut iter = MultihashIter::from_raw_cids(raw_cids).unwrap();
    assert_eq!(iter.remaining(), 24_998);

    let mut count = 0;
    while iter.next().is_some() {
        count += 1;
    }
    assert_eq!(count, 24_998);

    // Exhausted iterators keep signalling end rather than restarting.
    assert_eq!(iter.next(), None);
    assert_eq!(iter.next(), None);
}

//! Correlation keys for DNS questions.
//!
//! A query and its response carry the same question, so both sides derive
//! the same pair of keys from `(name, qtype)` alone. The primary key indexes
//! the store; the conflict key is an independent hash that confirms a match
//! and rejects primary key collisions.

use std::hash::{DefaultHasher, Hasher};

use rustc_hash::FxHasher;

/// Keys derived from a question's name and type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub primary: u64,
    pub conflict: u64,
}

impl QueryKey {
    pub const fn new(primary: u64, conflict: u64) -> Self {
        Self { primary, conflict }
    }

    /// Derive the keys for a question.
    ///
    /// Names compare case-insensitively and a trailing root dot is ignored,
    /// so `Example.COM.` and `example.com` yield identical keys.
    pub fn derive(name: &str, qtype: u16) -> Self {
        let name = normalized(name);

        let mut fx = FxHasher::default();
        fx.write_usize(name.len());
        for b in name {
            fx.write_u8(b.to_ascii_lowercase());
        }
        fx.write_u16(qtype);

        // SipHash with fixed keys, fed in a different order.
        let mut sip = DefaultHasher::new();
        sip.write_u16(qtype);
        for b in name {
            sip.write_u8(b.to_ascii_lowercase());
        }
        sip.write_usize(name.len());

        Self {
            primary: mix64(fx.finish()),
            conflict: sip.finish(),
        }
    }
}

fn normalized(name: &str) -> &[u8] {
    let bytes = name.as_bytes();
    match bytes {
        [rest @ .., b'.'] => rest,
        _ => bytes,
    }
}

/// splitmix64 finaliser. Fx output is weak in its low bits.
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

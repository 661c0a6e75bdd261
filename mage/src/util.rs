//! Fixed-width random identifiers, grounded in the alphabet-index
//! generator style `ice`'s `rand` helper module uses for candidate IDs
//! and ufrags/pwds.

use rand::Rng;

pub const NAME_LEN: usize = 15;

const ALPHABET: &[u8] = b"0123456789!@#$%^&*ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Generates a fixed-width 15-byte random identifier drawn from
/// `[0-9!@#$%^&*A-Za-z]`, used for `NodeName`s, `EndpointName`s, and
/// temporary node names minted during the invitation handshake.
pub fn generate_name() -> [u8; NAME_LEN] {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; NAME_LEN];
    for b in bytes.iter_mut() {
        *b = ALPHABET[rng.gen_range(0..ALPHABET.len())];
    }
    bytes
}

//! Mux entropy facade (SPEC_FULL §4.3 / C3): a single-threaded deterministic
//! CSPRNG driving layout decisions. Every draw happens through this one
//! type so the select-index → draw-length → byte-ops ordering invariant
//! can be enforced in one place.

use crate::error::{PackageError, Result};
use crate::model::{CsprngCipherName, CsprngConfiguration};

use salsa20::cipher::{KeyIvInit, StreamCipher};
use salsa20::Salsa20;

/// Wraps a keyed stream cipher as a byte-oriented CSPRNG. Not
/// `Clone`/`Send`-shared: the payload multiplexer (C4) owns exactly one
/// instance and draws from it in a fixed order.
pub struct MuxEntropy {
    cipher: Salsa20,
}

impl MuxEntropy {
    pub fn new(cfg: &CsprngConfiguration) -> Result<Self> {
        match cfg.cipher {
            CsprngCipherName::Salsa20 => {
                if cfg.key.len() != 32 {
                    return Err(PackageError::invalid_configuration("mux CSPRNG key must be 32 bytes"));
                }
                if cfg.nonce.len() != 8 {
                    return Err(PackageError::invalid_configuration("mux CSPRNG nonce must be 8 bytes"));
                }
                Ok(MuxEntropy { cipher: Salsa20::new(cfg.key.as_slice().into(), cfg.nonce.as_slice().into()) })
            }
        }
    }

    /// Fills `out` with raw keystream bytes.
    pub fn next_bytes(&mut self, out: &mut [u8]) {
        out.fill(0);
        self.cipher.apply_keystream(out);
    }

    /// Draws an unsigned 64-bit word, big-endian, from the keystream.
    fn next_u64(&mut self) -> u64 {
        let mut raw = [0u8; 8];
        self.next_bytes(&mut raw);
        u64::from_be_bytes(raw)
    }

    /// Uniform integer in `[min, max]` via rejection sampling, avoiding the
    /// modulo bias a plain `% range` would introduce (SPEC_FULL §4.3
    /// invariant).
    pub fn next(&mut self, min: u32, max: u32) -> Result<u32> {
        if min > max {
            return Err(PackageError::invalid_configuration("mux entropy range is empty"));
        }
        let span = (max - min) as u64 + 1;
        if span == 1 << 32 {
            return Ok(min.wrapping_add(self.next_u64() as u32));
        }
        let limit = u64::MAX - (u64::MAX % span);
        loop {
            let draw = self.next_u64();
            if draw < limit {
                return Ok(min + (draw % span) as u32);
            }
        }
    }

    /// Shorthand for a strictly-positive draw, used to pick stripe/pad
    /// lengths where zero would be meaningless.
    pub fn next_positive(&mut self, max: u32) -> Result<u32> {
        self.next(1, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entropy() -> MuxEntropy {
        MuxEntropy::new(&CsprngConfiguration {
            cipher: CsprngCipherName::Salsa20,
            key: vec![3u8; 32],
            nonce: vec![9u8; 8],
        })
        .unwrap()
    }

    #[test]
    fn next_stays_within_range() {
        let mut e = entropy();
        for _ in 0..256 {
            let v = e.next(8, 32_768).unwrap();
            assert!((8..=32_768).contains(&v));
        }
    }

    #[test]
    fn deterministic_given_same_key_and_nonce() {
        let mut a = entropy();
        let mut b = entropy();
        let seq_a: Vec<u32> = (0..16).map(|_| a.next(0, 1000).unwrap()).collect();
        let seq_b: Vec<u32> = (0..16).map(|_| b.next(0, 1000).unwrap()).collect();
        assert_eq!(seq_a, seq_b);
    }
}

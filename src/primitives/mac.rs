//! `MacEngine`: the capability seam the MAC decorator (C1) drives, and the
//! Poly1305 key-clamping resolution from DESIGN.md open question #2.

use crate::error::{PackageError, Result};
use crate::model::{AuthFunctionName, AuthenticationConfiguration};

use hmac::{Hmac, Mac as HmacMac};
use sha2::Sha256;
use sha3::Sha3_256;

/// Absorbs bytes without transforming them, producing a fixed-size tag at
/// `finish` (SPEC_FULL §4.1). `finish` may only be called once; the
/// decorator above this enforces that, not the engine itself.
pub trait MacEngine {
    fn update(&mut self, input: &[u8]);
    fn finish(self: Box<Self>) -> Vec<u8>;
    fn output_size(&self) -> usize;
}

pub fn build_mac_engine(cfg: &AuthenticationConfiguration, key: &[u8]) -> Result<Box<dyn MacEngine + Send>> {
    match cfg.function_name {
        AuthFunctionName::HmacSha256 => Ok(Box::new(HmacEngine::<Sha256>::new(key, cfg.output_size as usize)?)),
        AuthFunctionName::HmacSha3_256 => {
            Ok(Box::new(HmacEngine::<Sha3_256>::new(key, cfg.output_size as usize)?))
        }
        AuthFunctionName::Poly1305 => {
            if cfg.poly1305_pre_clamped {
                Poly1305Engine::from_clamped_key(key)
            } else {
                Poly1305Engine::from_raw_key(key)
            }
            .map(|e| Box::new(e) as Box<dyn MacEngine + Send>)
        }
    }
}

struct HmacEngine<D: hmac::digest::Digest + hmac::digest::core_api::BlockSizeUser> {
    inner: Hmac<D>,
    output_size: usize,
}

impl<D> HmacEngine<D>
where
    D: hmac::digest::Digest + hmac::digest::core_api::BlockSizeUser,
{
    fn new(key: &[u8], output_size: usize) -> Result<Self> {
        let inner = Hmac::<D>::new_from_slice(key)
            .map_err(|_| PackageError::invalid_configuration("HMAC key of invalid length"))?;
        Ok(HmacEngine { inner, output_size })
    }
}

impl<D> MacEngine for HmacEngine<D>
where
    D: hmac::digest::Digest + hmac::digest::core_api::BlockSizeUser,
{
    fn update(&mut self, input: &[u8]) {
        self.inner.update(input);
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        let full = self.inner.finalize().into_bytes().to_vec();
        full[..self.output_size.min(full.len())].to_vec()
    }

    fn output_size(&self) -> usize {
        self.output_size
    }
}

/// Poly1305 requires its 32-byte key's `r` half to be "clamped" (certain
/// bits forced to zero) before use. DESIGN.md #2 resolves the source's
/// ambiguous `CheckKey`/`ClampKeyInPlace` duality as two named constructors
/// instead of a boolean flag (SPEC_FULL §9 redesign).
struct Poly1305Engine {
    inner: poly1305::Poly1305,
}

const POLY1305_CLAMP_MASK: [u8; 16] = [
    0x0f, 0xff, 0xff, 0xff, 0x0f, 0xfc, 0xff, 0xff, 0x0f, 0xfc, 0xff, 0xff, 0x0f, 0xfc, 0xff, 0xff,
];

impl Poly1305Engine {
    /// Errors with `InvalidConfiguration` if the key's `r` half is not
    /// already clamped, rather than silently clamping — the caller declared
    /// (`poly1305_pre_clamped = false`) that the key should already satisfy
    /// the clamp invariant.
    fn from_raw_key(key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(PackageError::invalid_configuration("Poly1305 key must be 32 bytes"));
        }
        for i in 0..16 {
            if key[i] & !POLY1305_CLAMP_MASK[i] != 0 {
                return Err(PackageError::invalid_configuration(
                    "Poly1305 key is not pre-clamped; use from_clamped_key or clamp it first",
                ));
            }
        }
        Self::build(key)
    }

    /// Clamps the key's `r` half in place, unconditionally succeeding.
    fn from_clamped_key(key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(PackageError::invalid_configuration("Poly1305 key must be 32 bytes"));
        }
        let mut clamped = [0u8; 32];
        clamped.copy_from_slice(key);
        for i in 0..16 {
            clamped[i] &= POLY1305_CLAMP_MASK[i];
        }
        let result = Self::build(&clamped);
        use zeroize::Zeroize;
        clamped.zeroize();
        result
    }

    fn build(key: &[u8]) -> Result<Self> {
        use poly1305::KeyInit;
        let key = poly1305::Key::from_slice(key);
        Ok(Poly1305Engine { inner: poly1305::Poly1305::new(key) })
    }
}

impl MacEngine for Poly1305Engine {
    fn update(&mut self, input: &[u8]) {
        use poly1305::universal_hash::UniversalHash;
        // Poly1305 absorbs in fixed 16-byte blocks; the crate's
        // `update_padded` handles any trailing partial block per-call.
        self.inner.update_padded(input);
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        use poly1305::universal_hash::UniversalHash;
        self.inner.finalize().into_bytes().to_vec()
    }

    fn output_size(&self) -> usize {
        16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hmac_cfg(output_size: u16) -> AuthenticationConfiguration {
        AuthenticationConfiguration {
            function_type: crate::model::AuthFunctionType::Mac,
            function_name: AuthFunctionName::HmacSha256,
            key_size_bits: 256,
            salt: Vec::new(),
            nonce: Vec::new(),
            output_size,
            poly1305_pre_clamped: false,
        }
    }

    #[test]
    fn hmac_output_is_truncated_to_the_declared_size() {
        let engine = build_mac_engine(&hmac_cfg(16), &[1u8; 32]).unwrap();
        assert_eq!(engine.output_size(), 16);
        let tag = engine.finish();
        assert_eq!(tag.len(), 16);
    }

    #[test]
    fn poly1305_from_raw_key_rejects_an_unclamped_key() {
        let mut cfg = hmac_cfg(16);
        cfg.function_name = AuthFunctionName::Poly1305;
        cfg.poly1305_pre_clamped = false;
        let unclamped_key = [0xffu8; 32];
        assert!(build_mac_engine(&cfg, &unclamped_key).is_err());
    }

    #[test]
    fn poly1305_from_clamped_key_accepts_an_unclamped_key_and_clamps_it() {
        let mut cfg = hmac_cfg(16);
        cfg.function_name = AuthFunctionName::Poly1305;
        cfg.poly1305_pre_clamped = true;
        let unclamped_key = [0xffu8; 32];
        let engine = build_mac_engine(&cfg, &unclamped_key).unwrap();
        assert_eq!(engine.output_size(), 16);
    }

    #[test]
    fn poly1305_tag_is_deterministic_for_the_same_key_and_message() {
        let mut cfg = hmac_cfg(16);
        cfg.function_name = AuthFunctionName::Poly1305;
        cfg.poly1305_pre_clamped = true;
        let key = [0x2au8; 32];

        let mut a = build_mac_engine(&cfg, &key).unwrap();
        a.update(b"authenticate me");
        let tag_a = a.finish();

        let mut b = build_mac_engine(&cfg, &key).unwrap();
        b.update(b"authenticate me");
        let tag_b = b.finish();

        assert_eq!(tag_a, tag_b);
    }
}

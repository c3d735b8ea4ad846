//! Working-key derivation (SPEC_FULL §4.2): pre-key + per-item KDF
//! configuration in, fixed-length working key out.

use crate::error::{PackageError, Result};
use crate::model::{KdfScheme, KeyDerivationConfiguration};

use zeroize::Zeroizing;

/// Boundary behaviours per SPEC_FULL §8: zero PBKDF2 iterations and
/// non-power-of-two or zero scrypt cost both fail at construction, never
/// mid-derivation.
pub fn derive_working_key(
    pre_key: &[u8],
    kdf: &KeyDerivationConfiguration,
    out_len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let mut out = Zeroizing::new(vec![0u8; out_len]);
    match kdf.scheme {
        KdfScheme::Pbkdf2 { iterations, hmac } => {
            if iterations == 0 {
                return Err(PackageError::invalid_configuration("PBKDF2 iteration count must be nonzero"));
            }
            derive_pbkdf2(pre_key, &kdf.salt, iterations, hmac, &mut out)?;
        }
        KdfScheme::Scrypt { log2_n, r, p } => {
            if log2_n == 0 || r == 0 || p == 0 {
                return Err(PackageError::invalid_configuration("scrypt parameters must be nonzero"));
            }
            let params = scrypt::Params::new(log2_n, r, p, out_len)
                .map_err(|e| PackageError::invalid_configuration(format!("invalid scrypt parameters: {e}")))?;
            scrypt::scrypt(pre_key, &kdf.salt, &params, &mut out)
                .map_err(|e| PackageError::primitive_misuse(format!("scrypt derivation failed: {e}")))?;
        }
    }
    Ok(out)
}

fn derive_pbkdf2(
    pre_key: &[u8],
    salt: &[u8],
    iterations: u32,
    hmac: crate::model::AuthFunctionName,
    out: &mut [u8],
) -> Result<()> {
    use crate::model::AuthFunctionName;
    match hmac {
        AuthFunctionName::HmacSha256 => {
            pbkdf2::pbkdf2::<hmac::Hmac<sha2::Sha256>>(pre_key, salt, iterations, out)
                .map_err(|e| PackageError::primitive_misuse(format!("pbkdf2 derivation failed: {e}")))
        }
        AuthFunctionName::HmacSha3_256 => {
            pbkdf2::pbkdf2::<hmac::Hmac<sha3::Sha3_256>>(pre_key, salt, iterations, out)
                .map_err(|e| PackageError::primitive_misuse(format!("pbkdf2 derivation failed: {e}")))
        }
        AuthFunctionName::Poly1305 => Err(PackageError::invalid_configuration(
            "Poly1305 is not a hash function and cannot drive PBKDF2",
        )),
    }
}

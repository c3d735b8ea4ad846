//! `SymmetricCipherEngine`: the capability seam the cipher decorator (C1)
//! drives. Grounded on `other_examples/.../hbak_common-src-stream.rs.rs`'s
//! `SnapshotStream`/`RecoveryStream` chunked-STREAM-construction shape for
//! the AEAD family, and on a hand-buffered CBC engine for the block family.

use crate::error::{PackageError, Result};
use crate::model::{CipherConfiguration, CipherFamily, CipherName, PaddingScheme};

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use aes_gcm::aead::stream::{DecryptorBE32, EncryptorBE32};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;

/// Chunk size for the AEAD STREAM construction. Chosen small enough to keep
/// test fixtures cheap; production users can wrap items larger than this in
/// multiple chunks transparently, matching hbak's fixed-`CHUNKSIZE` design.
const AEAD_STREAM_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherDirection {
    Writing,
    Reading,
}

/// Transforms bytes as they pass through a `CipherDecorator` (SPEC_FULL
/// §4.1). `update` may buffer internally and return fewer bytes than it was
/// given (or none); `finish` flushes whatever remains, applying padding or
/// an authentication tag as the family requires.
pub trait SymmetricCipherEngine {
    fn update(&mut self, input: &[u8]) -> Result<Vec<u8>>;
    fn finish(&mut self) -> Result<Vec<u8>>;
}

pub fn build_cipher_engine(
    cfg: &CipherConfiguration,
    key: &[u8],
    direction: CipherDirection,
) -> Result<Box<dyn SymmetricCipherEngine + Send>> {
    if key.len() != cfg.key_size_bytes() {
        return Err(PackageError::invalid_configuration(format!(
            "cipher key length {} does not match declared key size {} bits",
            key.len(),
            cfg.key_size_bits
        )));
    }
    match cfg.name {
        CipherName::Aes256Gcm => {
            let prefix = stream_nonce_prefix(&cfg.iv)?;
            let aad = aead_associated_data(&cfg.family);
            Ok(Box::new(AeadStreamEngine::aes_gcm(key, &prefix, direction, aad)))
        }
        CipherName::ChaCha20Poly1305 => {
            let prefix = stream_nonce_prefix(&cfg.iv)?;
            let aad = aead_associated_data(&cfg.family);
            Ok(Box::new(AeadStreamEngine::chacha20poly1305(key, &prefix, direction, aad)))
        }
        CipherName::Aes256Cbc => {
            if !matches!(cfg.family, CipherFamily::Block { .. }) {
                return Err(PackageError::invalid_configuration(
                    "Aes256Cbc requires a block cipher configuration",
                ));
            }
            if cfg.iv.len() != 16 {
                return Err(PackageError::invalid_configuration("AES-CBC IV must be 16 bytes"));
            }
            let padding = match &cfg.family {
                CipherFamily::Block { padding, .. } => *padding,
                _ => unreachable!(),
            };
            Ok(Box::new(CbcEngine::new(key, &cfg.iv, direction, padding)?))
        }
        CipherName::ChaCha20 => Ok(Box::new(StreamCipherEngine::chacha20(key, &cfg.iv)?)),
        CipherName::Salsa20 => Ok(Box::new(StreamCipherEngine::salsa20(key, &cfg.iv)?)),
    }
}

/// Additional authenticated data declared on an AEAD cipher configuration
/// (SPEC_FULL §3) — empty for the block/stream families, which carry none.
fn aead_associated_data(family: &CipherFamily) -> Vec<u8> {
    match family {
        CipherFamily::Aead { associated_data, .. } => associated_data.clone(),
        _ => Vec::new(),
    }
}

fn stream_nonce_prefix(iv: &[u8]) -> Result<[u8; 7]> {
    if iv.len() != 7 {
        return Err(PackageError::invalid_configuration(
            "AEAD stream cipher configuration requires a 7-byte nonce prefix (STREAM construction reserves 5 bytes for the BE32 counter+flag)",
        ));
    }
    let mut out = [0u8; 7];
    out.copy_from_slice(iv);
    Ok(out)
}

// `EncryptorBE32`/`DecryptorBE32` consume `self` by value in `encrypt_last`/
// `decrypt_last`; the `Option` lets `finish` take ownership out of a `&mut
// self` field exactly the way the hbak example's `SnapshotStream::cipher`
// does it.
enum AeadStreamEngine {
    EncryptAesGcm { inner: Option<EncryptorBE32<Aes256Gcm>>, buf: Vec<u8>, aad: Vec<u8> },
    DecryptAesGcm { inner: Option<DecryptorBE32<Aes256Gcm>>, buf: Vec<u8>, aad: Vec<u8> },
    EncryptChaCha { inner: Option<EncryptorBE32<ChaCha20Poly1305>>, buf: Vec<u8>, aad: Vec<u8> },
    DecryptChaCha { inner: Option<DecryptorBE32<ChaCha20Poly1305>>, buf: Vec<u8>, aad: Vec<u8> },
}

impl AeadStreamEngine {
    fn aes_gcm(key: &[u8], nonce_prefix: &[u8; 7], direction: CipherDirection, aad: Vec<u8>) -> Self {
        let key = aes_gcm::aead::generic_array::GenericArray::from_slice(key);
        let nonce = aes_gcm::aead::generic_array::GenericArray::from_slice(nonce_prefix);
        match direction {
            CipherDirection::Writing => {
                AeadStreamEngine::EncryptAesGcm { inner: Some(EncryptorBE32::new(key, nonce)), buf: Vec::new(), aad }
            }
            CipherDirection::Reading => {
                AeadStreamEngine::DecryptAesGcm { inner: Some(DecryptorBE32::new(key, nonce)), buf: Vec::new(), aad }
            }
        }
    }

    fn chacha20poly1305(key: &[u8], nonce_prefix: &[u8; 7], direction: CipherDirection, aad: Vec<u8>) -> Self {
        let key = aes_gcm::aead::generic_array::GenericArray::from_slice(key);
        let nonce = aes_gcm::aead::generic_array::GenericArray::from_slice(nonce_prefix);
        match direction {
            CipherDirection::Writing => {
                AeadStreamEngine::EncryptChaCha { inner: Some(EncryptorBE32::new(key, nonce)), buf: Vec::new(), aad }
            }
            CipherDirection::Reading => {
                AeadStreamEngine::DecryptChaCha { inner: Some(DecryptorBE32::new(key, nonce)), buf: Vec::new(), aad }
            }
        }
    }
}

macro_rules! aead_stream_update {
    ($inner:expr, $buf:expr, $aad:expr, $input:expr, $chunk_len:expr, $next_fn:ident, $err:expr) => {{
        $buf.extend_from_slice($input);
        let mut out = Vec::new();
        while $buf.len() > $chunk_len {
            let chunk: Vec<u8> = $buf.drain(..$chunk_len).collect();
            let payload = aes_gcm::aead::Payload { msg: chunk.as_slice(), aad: $aad.as_slice() };
            let produced =
                $inner.as_mut().expect("update called after finish").$next_fn(payload).map_err(|_| $err)?;
            out.extend_from_slice(&produced);
        }
        Ok(out)
    }};
}

macro_rules! aead_stream_finish {
    ($inner:expr, $buf:expr, $aad:expr, $last_fn:ident, $err:expr) => {{
        let remaining = std::mem::take($buf);
        let payload = aes_gcm::aead::Payload { msg: remaining.as_slice(), aad: $aad.as_slice() };
        let owned = $inner.take().expect("finish called twice");
        owned.$last_fn(payload).map_err(|_| $err)
    }};
}

impl SymmetricCipherEngine for AeadStreamEngine {
    fn update(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let auth_err = PackageError::CiphertextAuthentication;
        match self {
            AeadStreamEngine::EncryptAesGcm { inner, buf, aad } => aead_stream_update!(
                inner, buf, aad, input, AEAD_STREAM_CHUNK, encrypt_next,
                PackageError::primitive_misuse("AEAD stream encrypt_next failed")
            ),
            AeadStreamEngine::DecryptAesGcm { inner, buf, aad } => {
                aead_stream_update!(inner, buf, aad, input, AEAD_STREAM_CHUNK + 16, decrypt_next, auth_err)
            }
            AeadStreamEngine::EncryptChaCha { inner, buf, aad } => aead_stream_update!(
                inner, buf, aad, input, AEAD_STREAM_CHUNK, encrypt_next,
                PackageError::primitive_misuse("AEAD stream encrypt_next failed")
            ),
            AeadStreamEngine::DecryptChaCha { inner, buf, aad } => {
                aead_stream_update!(inner, buf, aad, input, AEAD_STREAM_CHUNK + 16, decrypt_next, auth_err)
            }
        }
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        match self {
            AeadStreamEngine::EncryptAesGcm { inner, buf, aad } => aead_stream_finish!(
                inner, buf, aad, encrypt_last,
                PackageError::primitive_misuse("AEAD stream encrypt_last failed")
            ),
            AeadStreamEngine::DecryptAesGcm { inner, buf, aad } => {
                aead_stream_finish!(inner, buf, aad, decrypt_last, PackageError::CiphertextAuthentication)
            }
            AeadStreamEngine::EncryptChaCha { inner, buf, aad } => aead_stream_finish!(
                inner, buf, aad, encrypt_last,
                PackageError::primitive_misuse("AEAD stream encrypt_last failed")
            ),
            AeadStreamEngine::DecryptChaCha { inner, buf, aad } => {
                aead_stream_finish!(inner, buf, aad, decrypt_last, PackageError::CiphertextAuthentication)
            }
        }
    }
}

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

enum CbcEngine {
    Encrypt { inner: Aes256CbcEnc, buf: Vec<u8>, padding: PaddingScheme },
    Decrypt { inner: Aes256CbcDec, buf: Vec<u8>, padding: PaddingScheme },
}

const AES_BLOCK: usize = 16;

impl CbcEngine {
    fn new(key: &[u8], iv: &[u8], direction: CipherDirection, padding: PaddingScheme) -> Result<Self> {
        Ok(match direction {
            CipherDirection::Writing => CbcEngine::Encrypt {
                inner: Aes256CbcEnc::new(key.into(), iv.into()),
                buf: Vec::new(),
                padding,
            },
            CipherDirection::Reading => CbcEngine::Decrypt {
                inner: Aes256CbcDec::new(key.into(), iv.into()),
                buf: Vec::new(),
                padding,
            },
        })
    }
}

impl SymmetricCipherEngine for CbcEngine {
    fn update(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        match self {
            CbcEngine::Encrypt { inner, buf, .. } => {
                buf.extend_from_slice(input);
                let mut out = Vec::new();
                while buf.len() > AES_BLOCK {
                    let mut block: [u8; AES_BLOCK] = buf[..AES_BLOCK].try_into().unwrap();
                    buf.drain(..AES_BLOCK);
                    inner.encrypt_block_mut((&mut block).into());
                    out.extend_from_slice(&block);
                }
                Ok(out)
            }
            CbcEngine::Decrypt { inner, buf, .. } => {
                buf.extend_from_slice(input);
                // Keep at least one full block buffered so the final block,
                // which may be padded, is only decrypted inside `finish`.
                let mut out = Vec::new();
                while buf.len() > AES_BLOCK * 2 - 1 {
                    let mut block: [u8; AES_BLOCK] = buf[..AES_BLOCK].try_into().unwrap();
                    buf.drain(..AES_BLOCK);
                    inner.decrypt_block_mut((&mut block).into());
                    out.extend_from_slice(&block);
                }
                Ok(out)
            }
        }
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        match self {
            CbcEngine::Encrypt { inner, buf, padding } => {
                let remaining = std::mem::take(buf);
                match padding {
                    PaddingScheme::Pkcs7 => {
                        let msg_len = remaining.len();
                        let mut padded = vec![0u8; (msg_len / AES_BLOCK + 1) * AES_BLOCK];
                        padded[..msg_len].copy_from_slice(&remaining);
                        let ct = inner
                            .clone()
                            .encrypt_padded_mut::<Pkcs7>(&mut padded, msg_len)
                            .map_err(|_| PackageError::primitive_misuse("CBC padding failed"))?;
                        Ok(ct.to_vec())
                    }
                    PaddingScheme::None => {
                        if remaining.len() % AES_BLOCK != 0 {
                            return Err(PackageError::invalid_data(
                                "CBC-no-padding final block is not block-aligned",
                            ));
                        }
                        let mut out = remaining;
                        for block in out.chunks_mut(AES_BLOCK) {
                            inner.encrypt_block_mut(block.into());
                        }
                        Ok(out)
                    }
                }
            }
            CbcEngine::Decrypt { inner, buf, padding } => {
                let remaining = std::mem::take(buf);
                if remaining.is_empty() {
                    return Ok(Vec::new());
                }
                match padding {
                    PaddingScheme::Pkcs7 => {
                        let mut data = remaining;
                        let pt = inner
                            .clone()
                            .decrypt_padded_mut::<Pkcs7>(&mut data)
                            .map_err(|_| PackageError::invalid_data("CBC PKCS7 padding invalid"))?;
                        Ok(pt.to_vec())
                    }
                    PaddingScheme::None => {
                        if remaining.len() % AES_BLOCK != 0 {
                            return Err(PackageError::invalid_data(
                                "CBC-no-padding final block is not block-aligned",
                            ));
                        }
                        let mut out = remaining;
                        for block in out.chunks_mut(AES_BLOCK) {
                            inner.decrypt_block_mut(block.into());
                        }
                        Ok(out)
                    }
                }
            }
        }
    }
}

enum StreamCipherEngine {
    ChaCha20(chacha20::ChaCha20),
    Salsa20(salsa20::Salsa20),
}

impl StreamCipherEngine {
    fn chacha20(key: &[u8], iv: &[u8]) -> Result<Self> {
        if iv.len() != 12 {
            return Err(PackageError::invalid_configuration("ChaCha20 requires a 12-byte nonce"));
        }
        use chacha20::cipher::KeyIvInit as _;
        Ok(StreamCipherEngine::ChaCha20(chacha20::ChaCha20::new(key.into(), iv.into())))
    }

    fn salsa20(key: &[u8], iv: &[u8]) -> Result<Self> {
        if iv.len() != 8 {
            return Err(PackageError::invalid_configuration("Salsa20 requires an 8-byte nonce"));
        }
        use salsa20::cipher::KeyIvInit as _;
        Ok(StreamCipherEngine::Salsa20(salsa20::Salsa20::new(key.into(), iv.into())))
    }
}

impl SymmetricCipherEngine for StreamCipherEngine {
    fn update(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = input.to_vec();
        match self {
            StreamCipherEngine::ChaCha20(c) => c.apply_keystream(&mut out),
            StreamCipherEngine::Salsa20(c) => c.apply_keystream(&mut out),
        }
        Ok(out)
    }

    // Stream ciphers have no padding or tag to flush (SPEC_FULL §4.1).
    fn finish(&mut self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cbc_cfg(padding: PaddingScheme) -> CipherConfiguration {
        CipherConfiguration {
            name: CipherName::Aes256Cbc,
            family: CipherFamily::Block { mode: crate::model::BlockMode::Cbc, block_size: 16, padding },
            key_size_bits: 256,
            iv: vec![5u8; 16],
        }
    }

    fn roundtrip_cbc(padding: PaddingScheme, plaintext: &[u8]) -> Vec<u8> {
        let key = [3u8; 32];
        let cfg = cbc_cfg(padding);
        let mut enc = build_cipher_engine(&cfg, &key, CipherDirection::Writing).unwrap();
        let mut ciphertext = enc.update(plaintext).unwrap();
        ciphertext.extend(enc.finish().unwrap());

        let mut dec = build_cipher_engine(&cfg, &key, CipherDirection::Reading).unwrap();
        let mut plain = dec.update(&ciphertext).unwrap();
        plain.extend(dec.finish().unwrap());
        plain
    }

    #[test]
    fn cbc_pkcs7_round_trips_non_block_aligned_input() {
        let plaintext = b"not a multiple of sixteen bytes!!";
        assert_eq!(roundtrip_cbc(PaddingScheme::Pkcs7, plaintext), plaintext);
    }

    #[test]
    fn cbc_pkcs7_round_trips_empty_input() {
        assert_eq!(roundtrip_cbc(PaddingScheme::Pkcs7, b""), b"");
    }

    #[test]
    fn cbc_no_padding_round_trips_block_aligned_input() {
        let plaintext = vec![0x5au8; 32];
        assert_eq!(roundtrip_cbc(PaddingScheme::None, &plaintext), plaintext);
    }

    #[test]
    fn cbc_no_padding_rejects_misaligned_final_block() {
        let key = [3u8; 32];
        let cfg = cbc_cfg(PaddingScheme::None);
        let mut enc = build_cipher_engine(&cfg, &key, CipherDirection::Writing).unwrap();
        let _ = enc.update(b"thirteen bytes").unwrap();
        assert!(enc.finish().is_err());
    }

    #[test]
    fn aead_stream_nonce_prefix_must_be_seven_bytes() {
        let cfg = CipherConfiguration {
            name: CipherName::Aes256Gcm,
            family: CipherFamily::Aead { associated_data: Vec::new(), mac_size: 16 },
            key_size_bits: 256,
            iv: vec![1u8; 12],
        };
        let result = build_cipher_engine(&cfg, &[0u8; 32], CipherDirection::Writing);
        assert!(result.is_err());
    }
}

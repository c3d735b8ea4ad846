//! Manifest binder (SPEC_FULL §4.5 / C5): establishes the manifest-level key
//! a package's items are ultimately keyed from, under one of three crypto
//! schemes, and authenticates the manifest itself.
//!
//! `SymmetricOnly` needs no agreement. `Um1Hybrid` runs a one-pass unified
//! model (cofactor) ECDH over a registered curve. `JpakeHybrid` runs a
//! 3-round EC-J-PAKE — its zero-knowledge proof math is EC arithmetic this
//! crate treats as a capability (SPEC_FULL §1), so the round sequencing
//! lives here while the proof system itself is supplied by a `JpakeEngine`
//! implementation, the same split `CurveRegistry` draws around Brainpool
//! and SEC2 curves.

use std::io::{Read, Write};

use zeroize::Zeroizing;

use crate::decorator::{RawPipe, RawReadPipe};
use crate::error::{PackageError, Result};
use crate::item::ItemBinding;
use crate::model::{
    AuthFunctionName, AuthFunctionType, AuthenticationConfiguration, CipherConfiguration, CipherFamily, CipherName,
    ItemType, Manifest, ManifestCryptoSchemeTag, ManifestHeader, PayloadItem,
};
use crate::primitives::curve::{CurveRegistry, NamedCurve, SharedSecret};
use crate::primitives::cipher::CipherDirection;
use crate::wire;

use hkdf::Hkdf;
use sha2::Sha256;

/// Derives a key of `out_len` bytes from raw input key material,
/// domain-separated so the same IKM can never be reused across schemes or
/// contexts by accident.
fn hkdf_expand_raw(ikm: &[u8], info: &[u8], out_len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut out = Zeroizing::new(vec![0u8; out_len]);
    hk.expand(info, &mut out)
        .map_err(|_| PackageError::invalid_configuration("manifest key length too large for HKDF-SHA256"))?;
    Ok(out)
}

/// Derives a manifest key of `out_len` bytes from an agreed shared secret.
fn hkdf_expand(shared: &SharedSecret, info: &[u8], out_len: usize) -> Result<Zeroizing<Vec<u8>>> {
    hkdf_expand_raw(&shared.0, info, out_len)
}

/// Builds the synthetic item the manifest's own Encrypt-then-MAC pass is
/// keyed against (SPEC_FULL §6: "manifest ciphertext ... encrypted-then-MACed
/// under the manifest working key"), reusing `ItemBinding`/C2 rather than a
/// second bespoke AEAD call site.
fn manifest_pseudo_item(cipher_key: Vec<u8>, mac_key: Vec<u8>, nonce: Vec<u8>, verified_output: Vec<u8>) -> PayloadItem {
    let cipher = CipherConfiguration {
        name: CipherName::Aes256Gcm,
        family: CipherFamily::Aead { associated_data: Vec::new(), mac_size: 16 },
        key_size_bits: 256,
        iv: nonce,
    };
    let auth = AuthenticationConfiguration {
        function_type: AuthFunctionType::Mac,
        function_name: AuthFunctionName::HmacSha256,
        key_size_bits: 256,
        salt: Vec::new(),
        nonce: Vec::new(),
        output_size: 32,
        poly1305_pre_clamped: false,
    };
    let mut item = PayloadItem::new("__manifest__", ItemType::Binary, cipher, cipher_key, auth, mac_key, None);
    item.verified_output = verified_output;
    item
}

/// A round-sequencing message for EC-J-PAKE. Opaque to this crate: its
/// encoding (committed points, Schnorr NIZK transcripts) is owned entirely
/// by the injected `JpakeEngine`.
#[derive(Debug, Clone)]
pub struct JpakeMessage(pub Vec<u8>);

/// The zero-knowledge proof system and point arithmetic EC-J-PAKE needs,
/// supplied externally (SPEC_FULL §1 keeps concrete EC arithmetic and NIZK
/// construction out of this crate's scope). The three-round exchange order
/// itself, and the resulting shared-secret extraction, belong to this crate.
pub trait JpakeEngine: Send {
    fn round1(&mut self) -> Result<JpakeMessage>;
    fn round2(&mut self, peer_round1: &JpakeMessage) -> Result<JpakeMessage>;
    fn round3(&mut self, peer_round2: &JpakeMessage) -> Result<JpakeMessage>;
    fn finish(&mut self, peer_round3: &JpakeMessage) -> Result<SharedSecret>;
}

/// Explicit state machine over EC-J-PAKE's three rounds (SPEC_FULL §9
/// redesign: an explicit `tick`-style state machine, not a coroutine).
/// Each `advance_*` call consumes the previous state and produces the next,
/// so a caller cannot accidentally replay or skip a round at the type level.
pub enum JpakeRound {
    AwaitingRound1 { engine: Box<dyn JpakeEngine> },
    AwaitingRound2 { engine: Box<dyn JpakeEngine>, local_round1: JpakeMessage },
    AwaitingRound3 { engine: Box<dyn JpakeEngine>, local_round2: JpakeMessage },
    Complete { shared: SharedSecret },
}

impl JpakeRound {
    pub fn start(engine: Box<dyn JpakeEngine>) -> Self {
        JpakeRound::AwaitingRound1 { engine }
    }

    /// Produces this party's first-round message. Must be called before any
    /// `advance_*` call.
    pub fn emit_round1(&mut self) -> Result<JpakeMessage> {
        match self {
            JpakeRound::AwaitingRound1 { engine } => engine.round1(),
            _ => Err(PackageError::invalid_state("round1 already emitted")),
        }
    }

    pub fn advance_with_round1(self, peer_round1: &JpakeMessage) -> Result<(Self, JpakeMessage)> {
        match self {
            JpakeRound::AwaitingRound1 { mut engine } => {
                let local_round2 = engine.round2(peer_round1)?;
                Ok((
                    JpakeRound::AwaitingRound2 { engine, local_round1: local_round2.clone() },
                    local_round2,
                ))
            }
            _ => Err(PackageError::invalid_state("not awaiting round1")),
        }
    }

    pub fn advance_with_round2(self, peer_round2: &JpakeMessage) -> Result<(Self, JpakeMessage)> {
        match self {
            JpakeRound::AwaitingRound2 { mut engine, .. } => {
                let local_round3 = engine.round3(peer_round2)?;
                Ok((JpakeRound::AwaitingRound3 { engine, local_round2: local_round3.clone() }, local_round3))
            }
            _ => Err(PackageError::invalid_state("not awaiting round2")),
        }
    }

    pub fn advance_with_round3(self, peer_round3: &JpakeMessage) -> Result<Self> {
        match self {
            JpakeRound::AwaitingRound3 { mut engine, .. } => {
                let shared = engine.finish(peer_round3)?;
                Ok(JpakeRound::Complete { shared })
            }
            _ => Err(PackageError::invalid_state("not awaiting round3")),
        }
    }

    pub fn shared_secret(self) -> Result<SharedSecret> {
        match self {
            JpakeRound::Complete { shared } => Ok(shared),
            _ => Err(PackageError::invalid_state("jpake exchange not yet complete")),
        }
    }
}

pub struct ManifestBinder {
    pub header: ManifestHeader,
    manifest_key: Zeroizing<Vec<u8>>,
}

impl ManifestBinder {
    pub fn symmetric_only(manifest_key: Vec<u8>) -> Result<Self> {
        if manifest_key.is_empty() {
            return Err(PackageError::invalid_configuration("symmetric manifest key must be non-empty"));
        }
        Ok(ManifestBinder {
            header: ManifestHeader {
                version: crate::model::MANIFEST_FORMAT_VERSION,
                scheme: ManifestCryptoSchemeTag::SymmetricOnly,
                scheme_config: Vec::new(),
            },
            manifest_key: manifest_key.into(),
        })
    }

    /// One-pass unified-model ECDH: combines an ephemeral-static agreement
    /// with a static-static agreement so a compromised long-term key alone
    /// cannot retroactively derive past manifest keys (SPEC_FULL §4.5).
    pub fn um1_hybrid_initiate(
        registry: &CurveRegistry,
        curve: NamedCurve,
        local_static_private: &[u8],
        peer_static_public: &[u8],
        out_len: usize,
    ) -> Result<(Self, Vec<u8>)> {
        let mut ephemeral_private = [0u8; 32];
        getrandom::getrandom(&mut ephemeral_private)
            .map_err(|e| PackageError::primitive_misuse(format!("could not draw ephemeral scalar: {e}")))?;

        let ephemeral = registry.build(curve, &ephemeral_private)?;
        let local_static = registry.build(curve, local_static_private)?;

        let z_ephemeral = ephemeral.agree(peer_static_public)?;
        let z_static = local_static.agree(peer_static_public)?;
        let combined = SharedSecret(Zeroizing::new([z_ephemeral.0.as_slice(), z_static.0.as_slice()].concat()));
        let manifest_key = hkdf_expand(&combined, b"ocpkg-manifest-um1", out_len)?;

        let ephemeral_public = ephemeral.public_key();
        Ok((
            ManifestBinder {
                header: ManifestHeader {
                    version: crate::model::MANIFEST_FORMAT_VERSION,
                    scheme: ManifestCryptoSchemeTag::Um1Hybrid,
                    scheme_config: ephemeral_public.clone(),
                },
                manifest_key,
            },
            ephemeral_public,
        ))
    }

    /// The recipient side: takes the initiator's ephemeral public key
    /// (carried in `ManifestHeader::scheme_config`) and its own static
    /// secret to recompute the same combined secret.
    pub fn um1_hybrid_respond(
        registry: &CurveRegistry,
        curve: NamedCurve,
        local_static_private: &[u8],
        peer_static_public: &[u8],
        peer_ephemeral_public: &[u8],
        out_len: usize,
    ) -> Result<Self> {
        let local_static = registry.build(curve, local_static_private)?;
        let z_ephemeral = local_static.agree(peer_ephemeral_public)?;
        let z_static = local_static.agree(peer_static_public)?;
        let combined = SharedSecret(Zeroizing::new([z_ephemeral.0.as_slice(), z_static.0.as_slice()].concat()));
        let manifest_key = hkdf_expand(&combined, b"ocpkg-manifest-um1", out_len)?;
        Ok(ManifestBinder {
            header: ManifestHeader {
                version: crate::model::MANIFEST_FORMAT_VERSION,
                scheme: ManifestCryptoSchemeTag::Um1Hybrid,
                scheme_config: peer_ephemeral_public.to_vec(),
            },
            manifest_key,
        })
    }

    pub fn jpake_hybrid(completed: JpakeRound, out_len: usize) -> Result<Self> {
        let shared = completed.shared_secret()?;
        let manifest_key = hkdf_expand(&shared, b"ocpkg-manifest-jpake", out_len)?;
        Ok(ManifestBinder {
            header: ManifestHeader {
                version: crate::model::MANIFEST_FORMAT_VERSION,
                scheme: ManifestCryptoSchemeTag::JpakeHybrid,
                scheme_config: Vec::new(),
            },
            manifest_key,
        })
    }

    pub fn manifest_key(&self) -> &[u8] {
        &self.manifest_key
    }

    /// Splits the manifest working key into independent cipher and MAC
    /// keys, domain-separated so neither can be recovered from the other.
    fn split_manifest_keys(&self) -> Result<(Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>)> {
        let cipher_key = hkdf_expand_raw(&self.manifest_key, b"ocpkg-manifest-cipher", 32)?;
        let mac_key = hkdf_expand_raw(&self.manifest_key, b"ocpkg-manifest-mac", 32)?;
        Ok((cipher_key, mac_key))
    }

    /// Writes the full manifest record (SPEC_FULL §6): header, then the
    /// manifest's own Encrypt-then-MAC ciphertext and tag, each
    /// length-prefixed so `unseal` can read them back without knowing their
    /// lengths in advance.
    pub fn seal<W: Write>(&self, manifest: &Manifest, mut sink: W) -> Result<W> {
        let (cipher_key, mac_key) = self.split_manifest_keys()?;
        let mut nonce = vec![0u8; 7];
        getrandom::getrandom(&mut nonce)
            .map_err(|e| PackageError::primitive_misuse(format!("could not draw manifest nonce: {e}")))?;

        let body = wire::serialize_manifest_body(manifest)?;
        let item = manifest_pseudo_item(cipher_key.to_vec(), mac_key.to_vec(), nonce.clone(), Vec::new());
        let mut binding = ItemBinding::open(&item, RawPipe::new(Vec::<u8>::new()), CipherDirection::Writing)?;
        binding.write_exactly(&body)?;
        let (tag, pipe) = binding.finish_into_inner()?;
        let ciphertext = pipe.into_inner();

        let mut out = wire::write_manifest_header(&self.header);
        wire::write_length_prefixed(&mut out, &nonce);
        wire::write_length_prefixed(&mut out, &ciphertext);
        wire::write_length_prefixed(&mut out, &tag);
        sink.write_all(&out)?;
        Ok(sink)
    }

    /// Reads the manifest ciphertext and tag back and verifies them,
    /// returning the decoded manifest alongside the source stream so the
    /// caller can keep reading the payload that follows. The caller must
    /// already have parsed the manifest header (`wire::read_manifest_header_from`)
    /// and used it to build `self` before calling this — the header carries
    /// the scheme tag and config a `ManifestBinder` needs to exist at all.
    pub fn unseal<R: Read>(&self, mut source: R) -> Result<(Manifest, R)> {
        let (cipher_key, mac_key) = self.split_manifest_keys()?;
        let nonce = wire::read_length_prefixed_from(&mut source)?;
        let ciphertext = wire::read_length_prefixed_from(&mut source)?;
        let tag = wire::read_length_prefixed_from(&mut source)?;

        let item = manifest_pseudo_item(cipher_key.to_vec(), mac_key.to_vec(), nonce, tag);
        let mut binding =
            ItemBinding::open(&item, RawReadPipe::new(std::io::Cursor::new(ciphertext)), CipherDirection::Reading)?;
        let mut body = Vec::new();
        let mut chunk = vec![0u8; 4096];
        loop {
            let n = binding.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        binding.finish()?;
        let manifest = wire::deserialize_manifest_body(&body)?;
        Ok((manifest, source))
    }
}

//! The package data model (SPEC_FULL §3): payload items, manifests, and the
//! configuration records that travel alongside them.
//!
//! Structural round-trip equality is the only contract placed on these types
//! (SPEC_FULL §3.1) — serialisation itself lives in `wire`.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Stable per-package identifier. 128 bits, opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub [u8; 16]);

impl ItemId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        getrandom::getrandom(&mut bytes).expect("system randomness source must be available");
        ItemId(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemType {
    File,
    Directory,
    UnicodeString,
    Binary,
    KeyAction,
}

/// Enumerated cipher family (SPEC_FULL §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherFamily {
    Block { mode: BlockMode, block_size: u16, padding: PaddingScheme },
    Stream,
    Aead { associated_data: Vec<u8>, mac_size: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockMode {
    Cbc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaddingScheme {
    Pkcs7,
    None,
}

/// Names a concrete cipher engine. The engine itself is a capability
/// (`primitives::cipher::SymmetricCipherEngine`) this crate supplies for a
/// fixed allow-list; unrecognised names fail at construction time with
/// `InvalidConfiguration`, never mid-stream (SPEC_FULL §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherName {
    Aes256Gcm,
    ChaCha20Poly1305,
    Aes256Cbc,
    ChaCha20,
    Salsa20,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherConfiguration {
    pub name: CipherName,
    pub family: CipherFamily,
    pub key_size_bits: u16,
    pub iv: Vec<u8>,
}

impl CipherConfiguration {
    /// Declared key size, in bytes, rounded up — validated against the
    /// engine's actual key length at construction (SPEC_FULL §3 invariant).
    pub fn key_size_bytes(&self) -> usize {
        ((self.key_size_bits as usize) + 7) / 8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthFunctionType {
    Mac,
    KeyedHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthFunctionName {
    HmacSha256,
    HmacSha3_256,
    Poly1305,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationConfiguration {
    pub function_type: AuthFunctionType,
    pub function_name: AuthFunctionName,
    pub key_size_bits: u16,
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub output_size: u16,
    /// Resolves the Poly1305 key-clamping open question (DESIGN.md #2):
    /// when `function_name == Poly1305`, this flag selects
    /// `Poly1305Mac::from_raw_key` (false) vs `from_clamped_key` (true)
    /// rather than the core guessing.
    pub poly1305_pre_clamped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfScheme {
    Pbkdf2 { iterations: u32, hmac: AuthFunctionName },
    Scrypt { log2_n: u8, r: u32, p: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDerivationConfiguration {
    pub scheme: KdfScheme,
    pub salt: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CsprngCipherName {
    Salsa20,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsprngConfiguration {
    pub cipher: CsprngCipherName,
    pub key: Vec<u8>,
    pub nonce: Vec<u8>,
}

impl Drop for CsprngConfiguration {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// One content unit (SPEC_FULL §3). Key material (`pre_key`, the MAC key
/// inside `auth`) is supplied out of band and never serialised; see
/// `wire::authenticable_clone`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadItem {
    pub id: ItemId,
    pub item_type: ItemType,
    pub path: String,
    pub external_length: u64,
    pub internal_length: u64,
    pub cipher: CipherConfiguration,
    #[serde(skip, default)]
    pub pre_key: zeroize::Zeroizing<Vec<u8>>,
    pub auth: AuthenticationConfiguration,
    #[serde(skip, default)]
    pub mac_key: zeroize::Zeroizing<Vec<u8>>,
    pub kdf: Option<KeyDerivationConfiguration>,
    pub verified_output: Vec<u8>,
}

/// Key material is supplied out of band and never part of structural
/// equality — only the fields `wire::authenticable_clone` also covers.
impl PartialEq for PayloadItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.item_type == other.item_type
            && self.path == other.path
            && self.external_length == other.external_length
            && self.internal_length == other.internal_length
            && self.cipher == other.cipher
            && self.auth == other.auth
            && self.kdf == other.kdf
            && self.verified_output == other.verified_output
    }
}

impl PayloadItem {
    pub fn new(
        path: impl Into<String>,
        item_type: ItemType,
        cipher: CipherConfiguration,
        pre_key: Vec<u8>,
        auth: AuthenticationConfiguration,
        mac_key: Vec<u8>,
        kdf: Option<KeyDerivationConfiguration>,
    ) -> Self {
        PayloadItem {
            id: ItemId::random(),
            item_type,
            path: path.into(),
            external_length: 0,
            internal_length: 0,
            cipher,
            pre_key: pre_key.into(),
            auth,
            mac_key: mac_key.into(),
            kdf,
            verified_output: Vec::new(),
        }
    }

    /// Streams until source exhaustion when `external_length == 0`
    /// (SPEC_FULL §8 boundary behaviour).
    pub fn streams_until_exhausted(&self) -> bool {
        self.external_length == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutScheme {
    Simple,
    Frameshift { min_pad: u32, max_pad: u32 },
    Fabric { min_stripe: u32, max_stripe: u32 },
}

pub const FABRIC_STRIPE_MIN: u32 = 8;
pub const FABRIC_STRIPE_MAX: u32 = 32_768;

impl LayoutScheme {
    /// Fabric stripe range enforcement (SPEC_FULL §8 boundary behaviour).
    pub fn validate(&self) -> crate::error::Result<()> {
        if let LayoutScheme::Fabric { min_stripe, max_stripe } = *self {
            if min_stripe > max_stripe
                || min_stripe < FABRIC_STRIPE_MIN
                || max_stripe > FABRIC_STRIPE_MAX
            {
                return Err(crate::error::PackageError::invalid_configuration(format!(
                    "fabric stripe range [{min_stripe}, {max_stripe}] outside [{FABRIC_STRIPE_MIN}, {FABRIC_STRIPE_MAX}]"
                )));
            }
        }
        if let LayoutScheme::Frameshift { min_pad, max_pad } = *self {
            if min_pad > max_pad {
                return Err(crate::error::PackageError::invalid_configuration(format!(
                    "frameshift pad range [{min_pad}, {max_pad}] is empty"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadLayoutConfiguration {
    pub scheme: LayoutScheme,
    pub csprng: CsprngConfiguration,
}

/// Ordered item list plus layout configuration (SPEC_FULL §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub items: Vec<PayloadItem>,
    pub layout: PayloadLayoutConfiguration,
    pub payload_offset: u64,
}

impl Manifest {
    pub fn new(layout: PayloadLayoutConfiguration) -> Self {
        Manifest { items: Vec::new(), layout, payload_offset: 0 }
    }

    /// Invariant: item identifiers within a manifest are unique.
    pub fn add_item(&mut self, item: PayloadItem) -> crate::error::Result<()> {
        if self.items.iter().any(|existing| existing.id == item.id) {
            return Err(crate::error::PackageError::invalid_configuration(
                "duplicate item id in manifest",
            ));
        }
        self.items.push(item);
        Ok(())
    }

    pub fn find_incomplete(&self, completed: &[bool]) -> Vec<usize> {
        (0..self.items.len()).filter(|&i| !completed[i]).collect()
    }
}

pub const MANIFEST_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestCryptoSchemeTag {
    SymmetricOnly,
    Um1Hybrid,
    JpakeHybrid,
}

/// Format version, scheme tag, and the scheme's own opaque configuration
/// bytes (SPEC_FULL §3). Parsed and built by `manifest::ManifestBinder`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestHeader {
    pub version: u16,
    pub scheme: ManifestCryptoSchemeTag,
    pub scheme_config: Vec<u8>,
}

impl ManifestHeader {
    /// Open question #3 (DESIGN.md): unknown version is `InvalidConfiguration`.
    pub fn validate_version(&self) -> crate::error::Result<()> {
        if self.version != MANIFEST_FORMAT_VERSION {
            return Err(crate::error::PackageError::invalid_configuration(format!(
                "unsupported manifest format version {} (expected {})",
                self.version, MANIFEST_FORMAT_VERSION
            )));
        }
        Ok(())
    }
}

//! Elliptic-curve key agreement capability (SPEC_FULL §4.5). Concrete EC
//! arithmetic is out of scope for this crate except where a well-known
//! RustCrypto implementation exists; curves named in a manifest but not
//! registered fail at construction with `InvalidConfiguration`, never
//! mid-handshake.

use crate::error::{PackageError, Result};

use std::collections::HashMap;
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedCurve {
    BrainpoolP256r1,
    BrainpoolP384r1,
    BrainpoolP512r1,
    Sec2Secp256r1,
    Sec2Secp384r1,
    Sec2Secp521r1,
    Sec2Sect283k1,
    X25519,
    Ed25519,
}

/// The raw agreed secret, zeroized on drop. Feeds `item::ItemBinding`'s KDF
/// stage (SPEC_FULL §4.5), never used directly as a cipher key.
pub struct SharedSecret(pub Zeroizing<Vec<u8>>);

pub trait EcKeyAgreement: Send {
    fn curve(&self) -> NamedCurve;
    fn public_key(&self) -> Vec<u8>;
    /// One-pass agreement against a peer's encoded public key (SPEC_FULL
    /// §4.5 UM1Hybrid). Implementations must reject a peer key that decodes
    /// to the curve's identity/low-order point.
    fn agree(&self, peer_public: &[u8]) -> Result<SharedSecret>;
}

type Factory = Box<dyn Fn(&[u8]) -> Result<Box<dyn EcKeyAgreement>> + Send + Sync>;

/// Dispatch table from `NamedCurve` to a factory building an
/// `EcKeyAgreement` from a private scalar. `with_defaults` registers the
/// curves this crate ships a real implementation for (X25519, Ed25519);
/// callers may `register` additional curves (e.g. Brainpool, SEC2) backed
/// by their own implementation, matching the capability-trait split
/// SPEC_FULL §1 draws around EC arithmetic.
pub struct CurveRegistry {
    factories: HashMap<NamedCurve, Factory>,
}

impl CurveRegistry {
    pub fn empty() -> Self {
        CurveRegistry { factories: HashMap::new() }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(NamedCurve::X25519, |secret| {
            Ok(Box::new(X25519Agreement::new(secret)?) as Box<dyn EcKeyAgreement>)
        });
        registry.register(NamedCurve::Ed25519, |secret| {
            Ok(Box::new(Ed25519Agreement::new(secret)?) as Box<dyn EcKeyAgreement>)
        });
        registry
    }

    pub fn register(
        &mut self,
        curve: NamedCurve,
        factory: impl Fn(&[u8]) -> Result<Box<dyn EcKeyAgreement>> + Send + Sync + 'static,
    ) {
        self.factories.insert(curve, Box::new(factory));
    }

    pub fn build(&self, curve: NamedCurve, private_scalar: &[u8]) -> Result<Box<dyn EcKeyAgreement>> {
        let factory = self.factories.get(&curve).ok_or_else(|| {
            PackageError::invalid_configuration(format!("curve {curve:?} is not registered in this context"))
        })?;
        factory(private_scalar)
    }
}

impl Default for CurveRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for NamedCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NamedCurve::BrainpoolP256r1 => "brainpoolP256r1",
            NamedCurve::BrainpoolP384r1 => "brainpoolP384r1",
            NamedCurve::BrainpoolP512r1 => "brainpoolP512r1",
            NamedCurve::Sec2Secp256r1 => "secp256r1",
            NamedCurve::Sec2Secp384r1 => "secp384r1",
            NamedCurve::Sec2Secp521r1 => "secp521r1",
            NamedCurve::Sec2Sect283k1 => "sect283k1",
            NamedCurve::X25519 => "x25519",
            NamedCurve::Ed25519 => "ed25519",
        };
        f.write_str(name)
    }
}

struct X25519Agreement {
    secret: x25519_dalek::StaticSecret,
}

impl X25519Agreement {
    fn new(private_scalar: &[u8]) -> Result<Self> {
        if private_scalar.len() != 32 {
            return Err(PackageError::invalid_configuration("X25519 private scalar must be 32 bytes"));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(private_scalar);
        Ok(X25519Agreement { secret: x25519_dalek::StaticSecret::from(bytes) })
    }
}

impl EcKeyAgreement for X25519Agreement {
    fn curve(&self) -> NamedCurve {
        NamedCurve::X25519
    }

    fn public_key(&self) -> Vec<u8> {
        x25519_dalek::PublicKey::from(&self.secret).as_bytes().to_vec()
    }

    fn agree(&self, peer_public: &[u8]) -> Result<SharedSecret> {
        if peer_public.len() != 32 {
            return Err(PackageError::invalid_data("X25519 peer public key must be 32 bytes"));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(peer_public);
        let peer = x25519_dalek::PublicKey::from(bytes);
        let shared = self.secret.diffie_hellman(&peer);
        if shared.as_bytes().iter().all(|&b| b == 0) {
            return Err(PackageError::invalid_data("X25519 agreement produced a low-order result"));
        }
        Ok(SharedSecret(zeroize::Zeroizing::new(shared.as_bytes().to_vec())))
    }
}

/// Ed25519 keys used for key agreement via the standard birational map onto
/// the Montgomery curve (SPEC_FULL §4.5 allows Ed25519 in an agreement role,
/// not only as a signature scheme).
struct Ed25519Agreement {
    x25519: X25519Agreement,
}

impl Ed25519Agreement {
    fn new(private_scalar: &[u8]) -> Result<Self> {
        if private_scalar.len() != 32 {
            return Err(PackageError::invalid_configuration("Ed25519 seed must be 32 bytes"));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(private_scalar);
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
        let scalar_bytes = signing_key.to_scalar().to_bytes();
        Ok(Ed25519Agreement { x25519: X25519Agreement::new(&scalar_bytes)? })
    }
}

impl EcKeyAgreement for Ed25519Agreement {
    fn curve(&self) -> NamedCurve {
        NamedCurve::Ed25519
    }

    fn public_key(&self) -> Vec<u8> {
        self.x25519.public_key()
    }

    fn agree(&self, peer_public: &[u8]) -> Result<SharedSecret> {
        self.x25519.agree(peer_public)
    }
}

//! Per-item Encrypt-then-MAC binding (SPEC_FULL §4.2 / C2): wires a
//! `PayloadItem`'s configuration into a live decorator stack, derives its
//! working keys through the KDF when one is declared, and verifies the
//! finished tag in constant time.

use subtle::ConstantTimeEq;

use crate::decorator::{CipherDecorator, MacDecorator, StreamDecorator};
use crate::error::{PackageError, Result};
use crate::model::PayloadItem;
use crate::primitives::cipher::{build_cipher_engine, CipherDirection};
use crate::primitives::kdf::derive_working_key;
use crate::primitives::mac::build_mac_engine;
use crate::wire::authenticable_clone;

/// The keys an item's cipher and MAC engines are actually built from. When
/// `item.kdf` is `Some`, both are derived from `item.pre_key`/`item.mac_key`
/// through the declared KDF; otherwise the stored key material is used
/// directly (SPEC_FULL §4.2).
struct WorkingKeys {
    cipher_key: zeroize::Zeroizing<Vec<u8>>,
    mac_key: zeroize::Zeroizing<Vec<u8>>,
}

fn working_keys(item: &PayloadItem) -> Result<WorkingKeys> {
    match &item.kdf {
        Some(kdf) => {
            let cipher_key = derive_working_key(&item.pre_key, kdf, item.cipher.key_size_bytes())?;
            let mac_key = derive_working_key(&item.mac_key, kdf, (item.auth.key_size_bits as usize + 7) / 8)?;
            Ok(WorkingKeys { cipher_key, mac_key })
        }
        None => Ok(WorkingKeys {
            cipher_key: item.pre_key.clone(),
            mac_key: item.mac_key.clone(),
        }),
    }
}

/// Binds one item's Encrypt-then-MAC stack to an underlying decorator.
/// Construct with `ItemBinding::open`, then drive `write`/`read` through
/// `StreamDecorator`, and call `finish` exactly once when the item is done.
pub struct ItemBinding<B> {
    stack: CipherDecorator<MacDecorator<B>>,
    direction: CipherDirection,
    expected_tag: Vec<u8>,
}

impl<B: StreamDecorator> ItemBinding<B> {
    pub fn open(item: &PayloadItem, inner: B, direction: CipherDirection) -> Result<Self> {
        let keys = working_keys(item)?;
        let mac_engine = build_mac_engine(&item.auth, &keys.mac_key)?;
        let mut mac = MacDecorator::new(inner, mac_engine);
        mac.absorb_header(&authenticable_clone(item))?;
        let cipher_engine = build_cipher_engine(&item.cipher, &keys.cipher_key, direction)?;
        let stack = CipherDecorator::new(mac, cipher_engine, direction);
        Ok(ItemBinding { stack, direction, expected_tag: item.verified_output.clone() })
    }

    pub fn write_exactly(&mut self, data: &[u8]) -> Result<()> {
        self.stack.write_exactly(data)
    }

    pub fn read_exactly(&mut self, buf: &mut [u8]) -> Result<()> {
        self.stack.read_exactly(buf)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stack.read(buf)
    }

    fn finish_tail(&mut self) -> Result<Vec<u8>> {
        let tag = self.stack.finish()?;
        if self.direction == CipherDirection::Reading {
            if tag.len() != self.expected_tag.len() || tag.ct_eq(self.expected_tag.as_slice()).unwrap_u8() != 1 {
                return Err(PackageError::CiphertextAuthentication);
            }
        }
        Ok(tag)
    }

    /// Flushes the cipher tail and returns the item's computed MAC tag. On
    /// the reading side this is unconditionally checked against
    /// `item.verified_output` in constant time; a mismatch is
    /// `CiphertextAuthentication`, with no further detail, so it cannot be
    /// used as a byte-level oracle. Every `ItemBinding` opened for reading
    /// must therefore be given an `item` whose `verified_output` already
    /// holds the tag recorded at write time (SPEC_FULL §4.2); an item
    /// opened with no recorded tag can never pass verification.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        self.finish_tail()
    }

    /// Like `finish`, but also unwraps the underlying pipe back out — used
    /// when the pipe is an in-memory sink the caller still needs (e.g.
    /// `package::PackageWriter` staging the ciphertext it just produced).
    pub fn finish_into_inner(mut self) -> Result<(Vec<u8>, B)> {
        let tag = self.finish_tail()?;
        Ok((tag, self.stack.into_inner().into_inner()))
    }

    pub fn bytes_in(&self) -> u64 {
        self.stack.bytes_in()
    }

    pub fn bytes_out(&self) -> u64 {
        self.stack.bytes_out()
    }
}

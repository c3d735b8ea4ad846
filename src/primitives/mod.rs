//! Capability traits for the primitives SPEC_FULL §1 keeps out of scope,
//! plus the concrete implementations this crate ships for a fixed
//! allow-list of names. An unrecognised `CipherName`/`AuthFunctionName`
//! fails at construction with `InvalidConfiguration`, never mid-stream.

pub mod cipher;
pub mod curve;
pub mod kdf;
pub mod mac;

pub use cipher::{build_cipher_engine, CipherDirection, SymmetricCipherEngine};
pub use curve::{CurveRegistry, EcKeyAgreement, NamedCurve, SharedSecret};
pub use kdf::derive_working_key;
pub use mac::{build_mac_engine, MacEngine};

//! # ocpkg-core
//!
//! A cryptographic package format core: a self-describing manifest binds
//! one or more encrypted items into a single interleaved payload stream.
//!
//! ## Quick Start
//!
//! ```rust
//! use ocpkg_core::entropy::MuxEntropy;
//! use ocpkg_core::model::{CsprngCipherName, CsprngConfiguration};
//!
//! let cfg = CsprngConfiguration {
//!     cipher: CsprngCipherName::Salsa20,
//!     key: vec![0u8; 32],
//!     nonce: vec![0u8; 8],
//! };
//! let mut entropy = MuxEntropy::new(&cfg).unwrap();
//! let draw = entropy.next(8, 32_768).unwrap();
//! assert!((8..=32_768).contains(&draw));
//! ```
//!
//! ## What's NOT Provided
//!
//! - Key storage or lifecycle management
//! - Trust or PKI decisions about a peer's public key
//! - Network transport
//! - Multi-recipient fan-out beyond the two supported manifest schemes
//! - Random access into a package, or parallel single-item encryption

#![deny(unsafe_code)]

pub mod context;
pub mod decorator;
pub mod entropy;
pub mod error;
pub mod item;
pub mod manifest;
pub mod model;
pub mod mux;
pub mod package;
pub mod primitives;
pub mod wire;

pub use context::PackageContext;
pub use error::{PackageError, Result};
pub use manifest::ManifestBinder;
pub use model::{Manifest, PayloadItem};
pub use package::{KeyProvider, PackageReader, PackageWriter, PACKAGE_EXTENSION, PAYLOAD_EXTENSION};

//! Construction context (SPEC_FULL §2.3 / C0): the one place a caller wires
//! together the capabilities this crate treats as pluggable — the curve
//! registry and, when EC-J-PAKE is in play, the proof engine factory.
//! Everything downstream (`manifest::ManifestBinder`, `item::ItemBinding`)
//! takes its capabilities from here rather than reaching for global state.

use crate::manifest::JpakeEngine;
use crate::primitives::curve::CurveRegistry;

/// Owns the curve registry and any J-PAKE engine factory a package
/// operation needs. Built once per process (or per test) and passed by
/// reference into the operations that need it.
pub struct PackageContext {
    curves: CurveRegistry,
    jpake_engine: Option<Box<dyn Fn() -> Box<dyn JpakeEngine> + Send + Sync>>,
}

impl PackageContext {
    /// Registers the curves this crate ships a working agreement for
    /// (X25519, Ed25519) and no J-PAKE engine. Call `with_jpake_engine` or
    /// `curves_mut().register` to extend it.
    pub fn new() -> Self {
        PackageContext { curves: CurveRegistry::with_defaults(), jpake_engine: None }
    }

    pub fn curves(&self) -> &CurveRegistry {
        &self.curves
    }

    pub fn curves_mut(&mut self) -> &mut CurveRegistry {
        &mut self.curves
    }

    pub fn with_jpake_engine(mut self, factory: impl Fn() -> Box<dyn JpakeEngine> + Send + Sync + 'static) -> Self {
        self.jpake_engine = Some(Box::new(factory));
        self
    }

    pub fn new_jpake_engine(&self) -> crate::error::Result<Box<dyn JpakeEngine>> {
        match &self.jpake_engine {
            Some(factory) => Ok(factory()),
            None => Err(crate::error::PackageError::invalid_configuration(
                "no JpakeEngine registered in this context; JpakeHybrid manifests require one",
            )),
        }
    }
}

impl Default for PackageContext {
    fn default() -> Self {
        Self::new()
    }
}

//! # maphack-core
//!
//! Core library for a co-resident map-reveal extension living inside an
//! ARPG client process on 64-bit Windows.
//!
//! This crate provides:
//! - A compact byte-pattern DSL and scanner over executable image sections
//! - A declarative offset registry with a persistent, hash-keyed cache
//! - The return-address integrity bypass (S-box obfuscation, allowlist swap)
//! - A guarded-call shim for host functions behind the integrity check
//! - Player-identity recovery with runtime constant re-derivation
//! - The automap reveal traversal and world-to-automap conversion
//! - Runtime-mode and circuit-breaker safety gates
//!
//! Everything that dereferences host memory is Windows-only at runtime, but
//! the algorithms operate on explicit views (`ImageSections`, `IdentityHost`,
//! `RevealHost`) so they can be exercised against fabricated memory in tests.

pub mod automap;
pub mod clock;
pub mod error;
pub mod host;
pub mod identity;
pub mod offset;
pub mod retcheck;
pub mod reveal;
pub mod safety;

pub use automap::{Automap, AutomapHost};
pub use error::{Error, Result};
pub use identity::{IdentityHost, PlayerIdentity};
pub use offset::{
    ImageSections, OffsetCache, OffsetSlot, OffsetStrategy, Pattern, Section, SignatureDef,
    builtin_signatures, signature_hash,
};
pub use retcheck::{RetcheckBypass, RetcheckFn, deobfuscate, obfuscate};
pub use reveal::{Reveal, RevealHost};
pub use safety::{CircuitBreaker, LogLimiter, RuntimeMode};

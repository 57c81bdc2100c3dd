//! Chat-identity authorization for the tether bridge.
//!
//! Owns the durable binding registry (which chat identities may drive the
//! agent) and the short-lived verification codes that gate pairing.

pub mod binding_store;

pub use binding_store::{looks_like_verification_code, Binding, BindingStore};

//! Canonical values and binary encoding for the Cardano data prover.
//!
//! - **[`value`]** -- [`HostValue`], the host-side value model, and
//!   [`Canonical`], the language-neutral form values are classified into.
//! - **[`cbor`]** -- deterministic CBOR encoding, including the Plutus
//!   constructor tag convention.
//! - **[`plutus`]** -- [`PlutusData`] construction from canonical values.
//! - **[`hex`]** -- hex encoding with optional `0x` prefix.
//! - **[`address`]** -- bech32 and Shelley address utilities.
//!
//! Nothing in this crate depends on a guest language; every binding reduces
//! its values to [`HostValue`] first.

pub mod address;
pub mod cbor;
pub mod error;
pub mod hex;
pub mod plutus;
pub mod value;

pub use error::{CodecError, Result};
pub use plutus::PlutusData;
pub use value::{Canonical, HostValue, Record};

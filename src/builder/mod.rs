//! The build engine: fingerprinting and the concurrent executor.

pub mod executor;
pub mod fingerprint;

pub use executor::BuildExecutor;
pub use fingerprint::FingerprintStore;

pub mod commitment;
pub mod derivation;
pub mod revocation;
pub mod signer;

// Re-export commonly used items
pub use commitment::{
    derive_commitment_secret, derive_private_key, derive_public_key,
    derive_revocation_private_key, derive_revocation_public_key,
};
pub use revocation::RevocationStore;
pub use signer::ChannelSigner;

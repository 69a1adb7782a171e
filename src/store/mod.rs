use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::types::ShortChannelId;

/// SHA-256 of a payment preimage: the payment hash.
pub fn preimage_hash(preimage: &[u8; 32]) -> [u8; 32] {
    Sha256::digest(preimage).into()
}

#[derive(Clone, Debug)]
pub struct PreimageEntry {
    pub preimage: [u8; 32],
    pub amount_msat: u64,
    pub metadata: Option<String>,
}

// STORE CONTRACTS
// ============================================================================
// The durable key-value store is an external collaborator; these traits are
// the slice of its contract this core consumes.

pub trait PreimageStore: Send + Sync {
    fn preimage_save(&self, preimage: [u8; 32], amount_msat: u64, metadata: Option<String>);
    fn preimage_load(&self, payment_hash: &[u8; 32]) -> Option<PreimageEntry>;
    fn preimage_delete(&self, payment_hash: &[u8; 32]) -> bool;
    fn preimage_delete_all(&self) -> bool;
    fn preimage_iterate(&self) -> Vec<([u8; 32], PreimageEntry)>;
}

pub trait SkipStore: Send + Sync {
    /// Exclude a channel edge from routing. Temporary entries are dropped by
    /// `skip_drop(true)`; permanent ones only by `skip_drop(false)`.
    fn skip_save(&self, short_channel_id: ShortChannelId, temporary: bool);
    fn skip_drop(&self, temporary_only: bool);
    fn skip_load(&self) -> HashSet<ShortChannelId>;
    fn skip_temporary(&self) -> HashSet<ShortChannelId>;
}

pub trait InvoiceStore: Send + Sync {
    fn invoice_save(&self, payment_hash: &[u8; 32], invoice_json: &str);
    fn invoice_load(&self, payment_hash: &[u8; 32]) -> Option<String>;
    fn invoice_delete(&self, payment_hash: &[u8; 32]) -> bool;
    /// Hashes of payments with a saved (in-flight) invoice.
    fn invoice_hashes(&self) -> Vec<[u8; 32]>;
}

pub trait NodeStore: PreimageStore + SkipStore + InvoiceStore {}
impl<T: PreimageStore + SkipStore + InvoiceStore> NodeStore for T {}

// IN-MEMORY IMPLEMENTATION
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    preimages: Mutex<HashMap<[u8; 32], PreimageEntry>>,
    skips: Mutex<HashMap<ShortChannelId, bool>>,
    invoices: Mutex<HashMap<[u8; 32], String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreimageStore for MemoryStore {
    fn preimage_save(&self, preimage: [u8; 32], amount_msat: u64, metadata: Option<String>) {
        let hash = preimage_hash(&preimage);
        self.preimages.lock().unwrap().insert(
            hash,
            PreimageEntry {
                preimage,
                amount_msat,
                metadata,
            },
        );
    }

    fn preimage_load(&self, payment_hash: &[u8; 32]) -> Option<PreimageEntry> {
        self.preimages.lock().unwrap().get(payment_hash).cloned()
    }

    fn preimage_delete(&self, payment_hash: &[u8; 32]) -> bool {
        self.preimages.lock().unwrap().remove(payment_hash).is_some()
    }

    fn preimage_delete_all(&self) -> bool {
        self.preimages.lock().unwrap().clear();
        true
    }

    fn preimage_iterate(&self) -> Vec<([u8; 32], PreimageEntry)> {
        self.preimages
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }
}

impl SkipStore for MemoryStore {
    fn skip_save(&self, short_channel_id: ShortChannelId, temporary: bool) {
        self.skips.lock().unwrap().insert(short_channel_id, temporary);
    }

    fn skip_drop(&self, temporary_only: bool) {
        let mut skips = self.skips.lock().unwrap();
        if temporary_only {
            skips.retain(|_, temporary| !*temporary);
        } else {
            skips.clear();
        }
    }

    fn skip_load(&self) -> HashSet<ShortChannelId> {
        self.skips.lock().unwrap().keys().copied().collect()
    }

    fn skip_temporary(&self) -> HashSet<ShortChannelId> {
        self.skips
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, temporary)| **temporary)
            .map(|(id, _)| *id)
            .collect()
    }
}

impl InvoiceStore for MemoryStore {
    fn invoice_save(&self, payment_hash: &[u8; 32], invoice_json: &str) {
        self.invoices
            .lock()
            .unwrap()
            .insert(*payment_hash, invoice_json.to_string());
    }

    fn invoice_load(&self, payment_hash: &[u8; 32]) -> Option<String> {
        self.invoices.lock().unwrap().get(payment_hash).cloned()
    }

    fn invoice_delete(&self, payment_hash: &[u8; 32]) -> bool {
        self.invoices.lock().unwrap().remove(payment_hash).is_some()
    }

    fn invoice_hashes(&self) -> Vec<[u8; 32]> {
        self.invoices.lock().unwrap().keys().copied().collect()
    }
}

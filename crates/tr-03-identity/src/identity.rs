//! Node identity: keypair plus derived identifier.

use crate::errors::IdentityError;
use crate::store::BlobStore;
use serde::{Deserialize, Serialize};
use shared_crypto::{sha256_digest, Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
use shared_types::entities::NODE_ID_LEN;
use shared_types::NodeId;
use tracing::info;

/// Blob-store key the identity seed lives under.
pub const IDENTITY_STORE_KEY: &str = "identity/keypair";

/// Derive a node id from a public key: SHA-256 truncated to 160 bits.
pub fn node_id_from_public_key(public_key: &Ed25519PublicKey) -> NodeId {
    let digest = sha256_digest(public_key.as_bytes());
    let mut bytes = [0u8; NODE_ID_LEN];
    bytes.copy_from_slice(&digest[..NODE_ID_LEN]);
    NodeId::from_bytes(bytes)
}

/// Persisted identity record.
#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    seed: String,
}

/// A node's signing identity.
///
/// The id is derived from the public key, so the keypair is the
/// identity: present the key, prove the id.
pub struct NodeIdentity {
    keypair: Ed25519KeyPair,
    node_id: NodeId,
}

impl NodeIdentity {
    /// Generate a fresh identity (ephemeral participants).
    pub fn generate() -> Self {
        let keypair = Ed25519KeyPair::generate();
        let node_id = node_id_from_public_key(&keypair.public_key());
        Self { keypair, node_id }
    }

    /// Restore from a persisted seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let keypair = Ed25519KeyPair::from_seed(seed);
        let node_id = node_id_from_public_key(&keypair.public_key());
        Self { keypair, node_id }
    }

    /// Load the identity from the store, generating and persisting one
    /// on first run.
    pub fn load_or_generate(store: &dyn BlobStore) -> Result<Self, IdentityError> {
        if let Some(bytes) = store.get(IDENTITY_STORE_KEY)? {
            let stored: StoredIdentity = serde_json::from_slice(&bytes)
                .map_err(|e| IdentityError::Store(format!("corrupt identity record: {e}")))?;
            let raw = hex::decode(&stored.seed)
                .map_err(|e| IdentityError::Store(format!("corrupt identity seed: {e}")))?;
            let seed: [u8; 32] = raw
                .try_into()
                .map_err(|_| IdentityError::Store("identity seed wrong length".into()))?;
            let identity = Self::from_seed(seed);
            info!(node = %identity.node_id, "Loaded persistent identity");
            return Ok(identity);
        }

        let identity = Self::generate();
        let record = StoredIdentity {
            seed: hex::encode(identity.keypair.to_seed()),
        };
        let bytes = serde_json::to_vec(&record)
            .map_err(|e| IdentityError::Store(format!("encode identity: {e}")))?;
        store.put(IDENTITY_STORE_KEY, &bytes)?;
        info!(node = %identity.node_id, "Generated new identity");
        Ok(identity)
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    /// Sign arbitrary bytes with the identity key.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        self.keypair.sign(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBlobStore;

    #[test]
    fn node_id_is_bound_to_public_key() {
        let identity = NodeIdentity::generate();
        assert_eq!(
            identity.node_id(),
            node_id_from_public_key(&identity.public_key())
        );
    }

    #[test]
    fn distinct_keys_give_distinct_ids() {
        let a = NodeIdentity::generate();
        let b = NodeIdentity::generate();
        assert_ne!(a.node_id(), b.node_id());
    }

    #[test]
    fn load_or_generate_is_stable_across_restarts() {
        let store = MemoryBlobStore::new();
        let first = NodeIdentity::load_or_generate(&store).unwrap();
        let second = NodeIdentity::load_or_generate(&store).unwrap();
        assert_eq!(first.node_id(), second.node_id());
    }
}

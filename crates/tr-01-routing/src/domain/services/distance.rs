//! Bucket index math and refresh-target generation.

use rand::Rng;
use shared_types::entities::NODE_ID_LEN;
use shared_types::NodeId;

/// Bucket index of `remote` relative to `local`.
///
/// A distance with k leading zero bits maps to index `159 - k`, so the
/// farthest peers (first bit differs) land in bucket 159 and the nearest
/// possible non-self peer lands in bucket 0. The local identifier itself
/// (distance zero) maps to no bucket.
pub fn bucket_index(local: &NodeId, remote: &NodeId) -> Option<usize> {
    let distance = local.distance(remote);
    if distance.is_zero() {
        return None;
    }
    Some(159 - distance.leading_zero_bits() as usize)
}

/// Generate a random identifier whose distance to `local` falls in the
/// bucket at `index`.
///
/// The result shares exactly `159 - index` leading bits with `local`:
/// the shared prefix is copied, the next bit is flipped, and the
/// remainder is random. Used by bucket refresh to aim a lookup into an
/// idle region of the identifier space.
pub fn random_id_in_bucket<R: Rng>(local: &NodeId, index: usize, rng: &mut R) -> NodeId {
    let shared_bits = 159 - index.min(159);
    let local_bytes = local.as_bytes();
    let mut bytes = [0u8; NODE_ID_LEN];
    rng.fill(&mut bytes);

    // Copy the shared prefix wholesale, then fix up the boundary byte.
    let full_bytes = shared_bits / 8;
    bytes[..full_bytes].copy_from_slice(&local_bytes[..full_bytes]);

    let boundary_bit = shared_bits % 8;
    if full_bytes < NODE_ID_LEN {
        let keep_mask: u8 = if boundary_bit == 0 {
            0
        } else {
            0xffu8 << (8 - boundary_bit)
        };
        let flip_mask: u8 = 0x80u8 >> boundary_bit;
        let byte = (local_bytes[full_bytes] & keep_mask)
            | ((local_bytes[full_bytes] ^ flip_mask) & flip_mask)
            | (bytes[full_bytes] & !(keep_mask | flip_mask));
        bytes[full_bytes] = byte;
    }

    NodeId::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn id(bytes: [u8; NODE_ID_LEN]) -> NodeId {
        NodeId::from_bytes(bytes)
    }

    #[test]
    fn local_id_maps_to_no_bucket() {
        let local = id([7u8; NODE_ID_LEN]);
        assert_eq!(bucket_index(&local, &local), None);
    }

    #[test]
    fn first_bit_difference_is_bucket_159() {
        let local = id([0u8; NODE_ID_LEN]);
        let mut far = [0u8; NODE_ID_LEN];
        far[0] = 0x80;
        assert_eq!(bucket_index(&local, &id(far)), Some(159));
    }

    #[test]
    fn last_bit_difference_is_bucket_0() {
        let local = id([0u8; NODE_ID_LEN]);
        let mut near = [0u8; NODE_ID_LEN];
        near[NODE_ID_LEN - 1] = 0x01;
        assert_eq!(bucket_index(&local, &id(near)), Some(0));
    }

    #[test]
    fn bucket_index_is_always_in_range() {
        let mut rng = StdRng::seed_from_u64(11);
        let local = id([0x42; NODE_ID_LEN]);
        for _ in 0..200 {
            let mut bytes = [0u8; NODE_ID_LEN];
            rng.fill(&mut bytes);
            let other = id(bytes);
            if other == local {
                continue;
            }
            let index = bucket_index(&local, &other).unwrap();
            assert!(index <= 159);
        }
    }

    #[test]
    fn random_id_lands_in_requested_bucket() {
        let mut rng = StdRng::seed_from_u64(3);
        let local = id([0x42; NODE_ID_LEN]);
        for index in [0usize, 1, 8, 63, 100, 158, 159] {
            let target = random_id_in_bucket(&local, index, &mut rng);
            assert_eq!(
                bucket_index(&local, &target),
                Some(index),
                "index {index} missed"
            );
        }
    }
}

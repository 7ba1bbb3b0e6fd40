//! Distance-ordered peer selection.

use shared_types::NodeId;

/// Sort identifiers in place by ascending XOR distance to `target`.
pub fn sort_by_distance(ids: &mut [NodeId], target: &NodeId) {
    ids.sort_by_key(|id| id.distance(target));
}

/// The `count` identifiers closest to `target`, ascending by distance.
pub fn find_k_closest(ids: &[NodeId], target: &NodeId, count: usize) -> Vec<NodeId> {
    let mut sorted: Vec<NodeId> = ids.to_vec();
    sort_by_distance(&mut sorted, target);
    sorted.truncate(count);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::entities::NODE_ID_LEN;

    fn id(first: u8) -> NodeId {
        let mut bytes = [0u8; NODE_ID_LEN];
        bytes[0] = first;
        NodeId::from_bytes(bytes)
    }

    #[test]
    fn sorts_ascending_by_xor() {
        let target = id(0);
        let mut ids = vec![id(0xf0), id(0x01), id(0x10)];
        sort_by_distance(&mut ids, &target);
        assert_eq!(ids, vec![id(0x01), id(0x10), id(0xf0)]);
    }

    #[test]
    fn k_closest_truncates() {
        let target = id(0);
        let ids = vec![id(4), id(2), id(8), id(1)];
        assert_eq!(find_k_closest(&ids, &target, 2), vec![id(1), id(2)]);
    }

    #[test]
    fn xor_metric_satisfies_triangle_inequality() {
        // d(a,c) <= d(a,b) XOR-combined with d(b,c): XOR distances obey
        // d(a,c) = d(a,b) ^ d(b,c), and x ^ y <= x + y byte-wise.
        let a = id(0x0f);
        let b = id(0xf0);
        let c = id(0x3c);
        let ab = a.distance(&b).0;
        let bc = b.distance(&c).0;
        let ac = a.distance(&c).0;
        for i in 0..NODE_ID_LEN {
            assert_eq!(ac[i], ab[i] ^ bc[i]);
            assert!(u16::from(ac[i]) <= u16::from(ab[i]) + u16::from(bc[i]));
        }
    }
}

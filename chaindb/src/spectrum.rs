//! The spectrum of a node at height `h` is the deterministic set of ancestor
//! heights its tree object references besides the parent: a short window of
//! recent heights, plus geometrically spaced older heights quantized to
//! power-of-two boundaries. Together with the parent pointer this gives every
//! node O(log h) pointers and makes height-indexed ancestor lookup O(log h)
//! reads regardless of chain length.
//!
//! These constants shape the on-disk tree objects: changing them changes the
//! content hashes of every subsequently written node.

/// Number of heights immediately below a node that are candidates for the
/// recents window (the parent itself is excluded, it is tracked separately).
pub const RECENTS_WINDOW: u64 = 4;

/// Smallest power-of-two offset used for the geometric part of the spectrum.
pub const BASE_OFFSET: u64 = 32;

/// Ancestor heights a node at `height` must reference. Pure and deterministic.
///
/// The result is strictly increasing and never contains `height` or
/// `height - 1`.
pub fn spectrum(height: u64) -> Vec<u64> {
    if height <= 1 {
        return Vec::new();
    }
    let recents_floor = height.saturating_sub(RECENTS_WINDOW);

    // Recents: the window just below the parent.
    let mut heights: Vec<u64> = (recents_floor..=height - 2).collect();

    // Geometric offsets, doubling from BASE_OFFSET while they land strictly
    // below the recents window. Each offset x contributes the greatest
    // multiple of x not exceeding height - x.
    let mut quantized = Vec::new();
    let mut offset = BASE_OFFSET;
    while offset < recents_floor {
        quantized.push((height - offset) & !(offset - 1));
        match offset.checked_mul(2) {
            Some(next) => offset = next,
            None => break,
        }
    }
    heights.extend(quantized.into_iter().rev());

    heights.sort_unstable();
    heights.dedup();
    heights
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_cases() {
        assert!(spectrum(0).is_empty());
        assert!(spectrum(1).is_empty());
        assert_eq!(spectrum(2), vec![0]);
        assert_eq!(spectrum(3), vec![0, 1]);
        assert_eq!(spectrum(4), vec![0, 1, 2]);
        assert_eq!(spectrum(5), vec![1, 2, 3]);
    }

    #[test]
    fn test_spectrum_shape_at_1000() {
        // Recents 996..=998 plus offsets 32, 64, 128, 256, 512 quantized to
        // multiples of themselves below 1000 - offset.
        assert_eq!(spectrum(1000), vec![0, 512, 768, 896, 960, 996, 997, 998]);
        assert!(spectrum(1000).len() <= 1000u64.ilog2() as usize + 1 + RECENTS_WINDOW as usize);
    }

    #[test]
    fn test_determinism() {
        for height in [0, 1, 2, 100, 12345, 1 << 40] {
            assert_eq!(spectrum(height), spectrum(height));
        }
    }

    #[test]
    fn test_invariants() {
        for height in (0..4096).chain([1 << 20, 1 << 40, u64::MAX - 1, u64::MAX]) {
            let spec = spectrum(height);
            assert!(spec.windows(2).all(|pair| pair[0] < pair[1]), "not strictly increasing at {height}");
            assert!(!spec.contains(&height), "contains self at {height}");
            if height > 0 {
                assert!(!spec.contains(&(height - 1)), "contains parent at {height}");
            }
            if height > 1 {
                let bound = 64 - height.leading_zeros() as usize + RECENTS_WINDOW as usize;
                assert!(spec.len() <= bound, "too large at {height}: {} > {bound}", spec.len());
            }
        }
    }

    #[test]
    fn test_quantized_heights_are_aligned() {
        for height in [100u64, 1000, 65_537, 1 << 33] {
            let recents_floor = height - RECENTS_WINDOW;
            for ancestor in spectrum(height) {
                if ancestor < recents_floor {
                    // Every geometric entry is a multiple of some offset >= BASE_OFFSET
                    // that keeps it at distance >= offset from the node.
                    let mut offset = BASE_OFFSET;
                    let mut found = false;
                    while offset < recents_floor {
                        if ancestor % offset == 0 && ancestor + offset <= height {
                            found = true;
                            break;
                        }
                        offset *= 2;
                    }
                    assert!(found, "entry {ancestor} of spectrum({height}) is not offset-aligned");
                }
            }
        }
    }
}

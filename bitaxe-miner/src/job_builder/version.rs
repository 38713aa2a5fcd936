//! Version rolling arithmetic.

/// Next value of the masked bits of `value`, treating them as one counter.
///
/// Adds the mask's lowest set bit and lets the carry ripple through masked
/// positions only; unmasked bits come back unchanged. Once every masked bit
/// is set the counter wraps to all-clear. A zero mask is the identity.
pub fn increment_bitmask(value: u32, mask: u32) -> u32 {
    if mask == 0 {
        return value;
    }

    // Setting the unmasked bits lets the carry jump straight over them.
    let lowest = mask & mask.wrapping_neg();
    let counter = (value | !mask).wrapping_add(lowest) & mask;
    counter | (value & !mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use test_case::test_case;

    #[test]
    fn bip320_mask_steps_by_lowest_bit() {
        let mask = 0x1fffe000;
        let v1 = increment_bitmask(0x20000000, mask);
        let v2 = increment_bitmask(v1, mask);
        let v3 = increment_bitmask(v2, mask);
        assert_eq!([v1, v2, v3], [0x20002000, 0x20004000, 0x20006000]);
    }

    #[test]
    fn carry_skips_unmasked_bits() {
        // 0b1010_0000: counter lives in bits 5 and 7
        let mask = 0xa0;
        let seen: Vec<u32> =
            std::iter::successors(Some(0x0f), |v| Some(increment_bitmask(*v, mask)))
                .take(5)
                .collect();
        assert_eq!(seen, [0x0f, 0x2f, 0x8f, 0xaf, 0x0f]);
    }

    #[test_case(0x1fffe000, 0x20000000; "bip320")]
    #[test_case(0x0000f00f, 0xdeadbeef; "split_mask")]
    #[test_case(0x80000001, 0x12345678; "edges")]
    fn never_touches_unmasked_bits(mask: u32, start: u32) {
        let mut value = start;
        for _ in 0..1000 {
            value = increment_bitmask(value, mask);
            assert_eq!(value & !mask, start & !mask);
        }
    }

    #[test]
    fn full_range_is_covered_before_wrapping() {
        let mask = 0x000ff000;
        let start = 0x20000000;
        let mut seen = HashSet::new();
        let mut value = start;
        for _ in 0..256 {
            assert!(seen.insert(value), "repeated {value:#010x} before wrapping");
            value = increment_bitmask(value, mask);
        }
        assert_eq!(seen.len(), 256);
        assert_eq!(value, start);
    }

    #[test]
    fn zero_mask_is_identity() {
        assert_eq!(increment_bitmask(0x20000000, 0), 0x20000000);
    }
}

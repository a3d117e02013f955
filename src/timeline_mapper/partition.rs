use std::ops::Range;

/// Split `0..len` into at most `parts` contiguous ranges whose sizes differ by at most one.
/// Earlier ranges take the remainder.
pub fn split(len: usize, parts: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let parts = parts.clamp(1, len);
    let (size, extra) = (len / parts, len % parts);

    (0..parts)
        .map(|i| {
            let start = i * size + i.min(extra);
            let end = (i + 1) * size + (i + 1).min(extra);
            start..end
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_and_uneven() {
        assert_eq!(split(6, 3), vec![0..2, 2..4, 4..6]);
        assert_eq!(split(7, 3), vec![0..3, 3..5, 5..7]);
    }

    #[test]
    fn test_more_parts_than_items() {
        assert_eq!(split(2, 8), vec![0..1, 1..2]);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(split(0, 4).is_empty());
        assert_eq!(split(5, 0), vec![0..5]);
    }
}

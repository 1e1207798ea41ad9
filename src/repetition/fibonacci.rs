/// Largest configurable Fibonacci cap
pub const MAX_FIBONACCI_CAP: usize = 15;

const FIBONACCI: [u32; MAX_FIBONACCI_CAP + 1] =
    [0, 1, 1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144, 233, 377, 610];

/// Cycles to wait at a position; positions past the table clamp to its end
pub fn fibonacci(position: usize) -> u32 {
    FIBONACCI[position.min(MAX_FIBONACCI_CAP)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cap_sequence() {
        let seq: Vec<u32> = (0..=7).map(fibonacci).collect();
        assert_eq!(seq, vec![0, 1, 1, 2, 3, 5, 8, 13]);
    }

    #[test]
    fn test_out_of_range_clamps() {
        assert_eq!(fibonacci(99), fibonacci(MAX_FIBONACCI_CAP));
    }
}

//! Short numeric and long alphanumeric one-time code generation.

use anyhow::Result;
use rand::Rng;

const LONG_CODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// An `n`-digit decimal string, zero-padded, drawn uniformly from
/// `[0, 10^n)` using the OS CSPRNG. Never strips leading zeros.
pub fn generate_short(n: usize) -> Result<String> {
    if n == 0 {
        return Ok(String::new());
    }
    let mut rng = rand::rngs::OsRng;
    let mut digits = String::with_capacity(n);
    for _ in 0..n {
        let d = rng.gen_range(0..10u8);
        digits.push((b'0' + d) as char);
    }
    Ok(digits)
}

/// `n` characters independently drawn from the lowercase alphanumeric
/// alphabet (size 36).
pub fn generate_long(n: usize) -> Result<String> {
    let mut rng = rand::rngs::OsRng;
    let mut out = String::with_capacity(n);
    for _ in 0..n {
        let idx = rng.gen_range(0..LONG_CODE_ALPHABET.len());
        out.push(LONG_CODE_ALPHABET[idx] as char);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_has_exact_length_and_charset() {
        for n in [1, 4, 8, 12] {
            let code = generate_short(n).unwrap();
            assert_eq!(code.len(), n);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn short_zero_length_is_empty() {
        assert_eq!(generate_short(0).unwrap(), "");
    }

    #[test]
    fn long_has_exact_length_and_charset() {
        for n in [1, 8, 16, 20] {
            let code = generate_long(n).unwrap();
            assert_eq!(code.len(), n);
            assert!(code
                .bytes()
                .all(|b| LONG_CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn generates_non_constant_output() {
        let a = generate_long(16).unwrap();
        let b = generate_long(16).unwrap();
        // Astronomically unlikely to collide for 16 chars over a 36-symbol
        // alphabet; a failure here points at a broken RNG, not bad luck.
        assert_ne!(a, b);
    }
}

//! Structural hashing for the expression graph.
//!
//! The scheme is chosen so that commutative/associative rearrangements of
//! `+`/`×` collapse onto the same 32-bit value, which is what lets the
//! scheduler perform CSE by a single hash-table lookup. It is not a
//! cryptographic hash: collisions are merely unlikely, not infeasible.

/// `2^31 - 1`, kept prime so modular addition/multiplication spread evenly
/// across the 32-bit signed range.
pub const P: i64 = 2_147_483_647;

/// Reduce `x` modulo [`P`], matching the original C++ `%` semantics: the
/// result carries the sign of `x`: `(-h(a)) mod P` can be negative. Callers
/// rely on this being reproducible, not on the result being non-negative.
fn reduce(x: i64) -> i32 {
    (x % P) as i32
}

pub fn add(a: i32, b: i32) -> i32 {
    reduce(a as i64 + b as i64)
}

pub fn sub(a: i32, b: i32) -> i32 {
    reduce(a as i64 - b as i64)
}

pub fn mul(a: i32, b: i32) -> i32 {
    reduce(a as i64 * b as i64)
}

pub fn negate(a: i32) -> i32 {
    reduce(-(a as i64))
}

/// DJB2 over `prefix` concatenated with the little-endian bytes of `a`,
/// accumulated in a 64-bit counter and truncated to 32 bits. The truncation
/// can and does change the sign of the result; this is intentional (see
/// the design notes on sin/cos hashing) — it breaks the symmetry that
/// would otherwise let `sin(x)` collide with `cos(x)` or with `x` itself
/// under the linear +/−/× hash scheme above.
pub fn djb2_mix(prefix: &str, a: i32) -> i32 {
    let mut acc: u64 = 5381;
    for byte in prefix.bytes() {
        acc = acc.wrapping_mul(33).wrapping_add(byte as u64);
    }
    for byte in a.to_le_bytes() {
        acc = acc.wrapping_mul(33).wrapping_add(byte as u64);
    }
    (acc as u32) as i32
}

/// Structural hash for a numeric constant. Distinct from [`djb2_mix`]'s
/// prefix so that, e.g., `Constant(1.0)` cannot be mistaken for `cos(x)`
/// by accident of bit layout, while remaining deterministic across two
/// construction sites for the same value (enabling CSE of repeated
/// literals, which is allowed and expected).
pub fn constant_hash(value: f64) -> i32 {
    let bits = value.to_bits();
    let mut acc: u64 = 5381;
    for byte in b"const:" {
        acc = acc.wrapping_mul(33).wrapping_add(*byte as u64);
    }
    for byte in bits.to_le_bytes() {
        acc = acc.wrapping_mul(33).wrapping_add(byte as u64);
    }
    (acc as u32) as i32
}

/// Draw a fresh, effectively-unique hash for a new `Variable` leaf.
///
/// Distinct `Variable` occurrences are never deduplicated by identity, so
/// there is no need (and no way) to make this deterministic across calls;
/// tests that need cross-call determinism seed the RNG themselves.
pub fn random_variable_hash() -> i32 {
    use rand::Rng;
    reduce(rand::rng().random::<u32>() as i64)
}

pub const ZERO_HASH: i32 = 0;
pub const ONE_HASH: i32 = 1;

/// Structural hash for an `ExtCall` node. Not specified by name in the
/// original hash scheme (which only covers Add/Sub/Mul/Negate/Sin/Cos);
/// extended here in the same DJB2-with-truncation style, keyed on the
/// function name and the ordered hashes of its arguments so that calls to
/// different external functions, or the same function with different
/// arguments, never collide.
pub fn ext_call_hash(name: &str, arg_hashes: &[i32]) -> i32 {
    let mut acc: u64 = 5381;
    for byte in b"ext:" {
        acc = acc.wrapping_mul(33).wrapping_add(*byte as u64);
    }
    for byte in name.bytes() {
        acc = acc.wrapping_mul(33).wrapping_add(byte as u64);
    }
    for h in arg_hashes {
        for byte in h.to_le_bytes() {
            acc = acc.wrapping_mul(33).wrapping_add(byte as u64);
        }
    }
    (acc as u32) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_commutative() {
        assert_eq!(add(5, 7), add(7, 5));
    }

    #[test]
    fn mul_is_commutative() {
        assert_eq!(mul(123, 456), mul(456, 123));
    }

    #[test]
    fn sub_is_order_sensitive() {
        assert_ne!(sub(5, 7), sub(7, 5));
    }

    #[test]
    fn sin_cos_and_raw_do_not_collide() {
        let x = 42;
        let s = djb2_mix("sin:", x);
        let c = djb2_mix("cos:", x);
        assert_ne!(s, c);
        assert_ne!(s, x);
        assert_ne!(c, x);
    }

    #[test]
    fn constant_hash_is_deterministic() {
        assert_eq!(constant_hash(6.0), constant_hash(6.0));
        assert_ne!(constant_hash(6.0), constant_hash(7.0));
    }
}

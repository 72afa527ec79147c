//! Pollard-rho (Brent variant) factorization of the handshake's `pq`.
//!
//! The server sends a product of two primes that fits in 64 bits. The input
//! type enforces that bound, and every loop below has a fixed iteration cap,
//! so the routine returns an error instead of spinning on hostile input.

/// Errors from [`factorize`].
#[derive(Clone, Debug, PartialEq)]
pub enum FactorizeError {
    /// `pq` below 4 has no non-trivial factorization.
    TooSmall(u64),
    /// `pq` is prime.
    Prime(u64),
    /// No factor found within the iteration budget.
    Exhausted(u64),
}

impl std::fmt::Display for FactorizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooSmall(n) => write!(f, "pq {n} is too small to factorize"),
            Self::Prime(n) => write!(f, "pq {n} is prime"),
            Self::Exhausted(n) => write!(f, "failed to factorize pq {n}"),
        }
    }
}
impl std::error::Error for FactorizeError {}

// Cycle length cap per attempt. Factors of a 64-bit pq are around 2^32, so
// rho needs roughly 2^16 steps; this leaves plenty of slack.
const MAX_CYCLE: u128 = 1 << 22;

// Small factors are found by trial division before rho runs.
const TRIAL_LIMIT: u64 = 1 << 10;

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

fn mul_mod(a: u128, b: u128, m: u128) -> u128 {
    a * b % m
}

fn pow_mod(mut base: u128, mut exp: u128, m: u128) -> u128 {
    let mut result = 1 % m;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mul_mod(result, base, m);
        }
        exp >>= 1;
        base = mul_mod(base, base, m);
    }
    result
}

/// Deterministic Miller-Rabin for all 64-bit inputs.
fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    const BASES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];
    for p in BASES {
        if n % p == 0 {
            return n == p;
        }
    }
    let n = n as u128;
    let mut d = n - 1;
    let mut s = 0;
    while d % 2 == 0 {
        d /= 2;
        s += 1;
    }
    'witness: for a in BASES {
        let mut x = pow_mod(a as u128, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

fn abs_sub(a: u128, b: u128) -> u128 {
    a.max(b) - a.min(b)
}

/// One Brent attempt with polynomial `y² + c`. Returns a non-trivial factor.
fn brent(pq: u128, c: u128) -> Option<u128> {
    let step = |y: u128| (mul_mod(y, y, pq) + c) % pq;

    let mut y = 3 * (pq / 7);
    let m = 7 * (pq / 13);
    let mut g = 1u128;
    let mut r = 1u128;
    let mut q = 1u128;
    let mut x = 0u128;
    let mut ys = 0u128;

    while g == 1 {
        if r > MAX_CYCLE {
            return None;
        }
        x = y;
        for _ in 0..r {
            y = step(y);
        }
        let mut k = 0;
        while k < r && g == 1 {
            ys = y;
            for _ in 0..m.min(r - k) {
                y = step(y);
                q = mul_mod(q, abs_sub(x, y), pq);
            }
            g = gcd(q, pq);
            k += m;
        }
        r *= 2;
    }

    if g == pq {
        // The batched product overshot; walk back one step at a time.
        for _ in 0..r {
            ys = step(ys);
            g = gcd(abs_sub(x, ys), pq);
            if g > 1 {
                break;
            }
        }
    }

    (g > 1 && g < pq).then_some(g)
}

/// Factorize `pq` into `(p, q)` with `p ≤ q`.
pub fn factorize(pq: u64) -> Result<(u64, u64), FactorizeError> {
    if pq < 4 {
        return Err(FactorizeError::TooSmall(pq));
    }
    if pq % 2 == 0 {
        return Ok((2, pq / 2));
    }
    if is_prime(pq) {
        return Err(FactorizeError::Prime(pq));
    }
    if let Some(p) = (3..=TRIAL_LIMIT).step_by(2).find(|d| pq % d == 0) {
        return Ok((p, pq / p));
    }

    let n = pq as u128;
    for multiplier in [43u128, 47, 53, 59, 61] {
        let c = match (multiplier * (n / 103)) % n {
            0 => multiplier,
            c => c,
        };
        if let Some(g) = brent(n, c) {
            let p = g as u64;
            let q = pq / p;
            return Ok((p.min(q), p.max(q)));
        }
    }
    Err(FactorizeError::Exhausted(pq))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_sized_products() {
        assert_eq!(factorize(1470626929934143021), Ok((1206429347, 1218991343)));
        assert_eq!(factorize(2363612107535801713), Ok((1518968219, 1556064227)));
    }

    #[test]
    fn small_composites() {
        assert_eq!(factorize(15), Ok((3, 5)));
        assert_eq!(factorize(10), Ok((2, 5)));
        assert_eq!(factorize(9), Ok((3, 3)));
        assert_eq!(factorize(1009 * 1013), Ok((1009, 1013)));
    }

    #[test]
    fn rejects_degenerate_input() {
        assert_eq!(factorize(0), Err(FactorizeError::TooSmall(0)));
        assert_eq!(factorize(3), Err(FactorizeError::TooSmall(3)));
        assert_eq!(factorize(1_000_000_007), Err(FactorizeError::Prime(1_000_000_007)));
        assert_eq!(
            factorize(18446744073709551557),
            Err(FactorizeError::Prime(18446744073709551557))
        );
    }

    #[test]
    fn miller_rabin_agrees_on_known_values() {
        assert!(is_prime(1206429347));
        assert!(is_prime(1218991343));
        assert!(!is_prime(1470626929934143021));
        assert!(!is_prime(3215031751)); // strong pseudoprime to bases 2, 3, 5, 7
    }
}

//! Dynamic-key synthesis.
//!
//! Generated map keys must look like the detected identifier pattern while
//! never colliding within a run. Every key embeds a monotonic counter, so
//! uniqueness holds regardless of how the RNG behaves; the RNG only supplies
//! the cosmetic remainder.

use crate::keypattern::KeyPattern;
use data_encoding::HEXLOWER;
use data_encoding_macro::new_encoding;
use rand::Rng;

/// Crockford base-32, as ULIDs use.
const CROCKFORD: data_encoding::Encoding = new_encoding! {
    symbols: "0123456789ABCDEFGHJKMNPQRSTVWXYZ",
};

const PREFIXES: &[&str] = &["user", "doc", "item", "order"];

/// Encodes 16 bytes as a 26-character Crockford base-32 string, ULID-style.
pub fn crockford_encode(bytes: &[u8; 16]) -> String {
    CROCKFORD.encode(bytes)[..26].to_owned()
}

/// Stateful key generator. One instance per generator context; the counter
/// spans the whole run.
#[derive(Debug, Default)]
pub struct KeyGenerator {
    counter: u64,
}

impl KeyGenerator {
    /// A fresh generator with the counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys handed out so far.
    pub fn generated(&self) -> u64 {
        self.counter
    }

    /// Produces the next key for `pattern`. For [`KeyPattern::Custom`] the
    /// caller supplies a compiled shape generator; without one the key falls
    /// back to a counter-stamped opaque identifier.
    pub fn next_key(
        &mut self,
        pattern: KeyPattern,
        custom: Option<&rand_regex::Regex>,
        rng: &mut impl Rng,
    ) -> String {
        let counter = self.counter;
        self.counter += 1;
        match pattern {
            KeyPattern::Uuid => {
                let mut bytes = [0u8; 16];
                rng.fill(&mut bytes[..10]);
                bytes[10..].copy_from_slice(&counter.to_be_bytes()[2..]);
                // Version 4, RFC 4122 variant.
                bytes[6] = (bytes[6] & 0x0f) | 0x40;
                bytes[8] = (bytes[8] & 0x3f) | 0x80;
                let hex = HEXLOWER.encode(&bytes);
                format!(
                    "{}-{}-{}-{}-{}",
                    &hex[0..8],
                    &hex[8..12],
                    &hex[12..16],
                    &hex[16..20],
                    &hex[20..32]
                )
            }
            KeyPattern::MongodbObjectId => {
                let mut bytes = [0u8; 12];
                rng.fill(&mut bytes[..4]);
                bytes[4..].copy_from_slice(&counter.to_be_bytes());
                HEXLOWER.encode(&bytes)
            }
            KeyPattern::Ulid => {
                let mut bytes = [0u8; 16];
                rng.fill(&mut bytes[..8]);
                bytes[8..].copy_from_slice(&counter.to_be_bytes());
                crockford_encode(&bytes)
            }
            KeyPattern::NumericId => {
                format!("{:04}{:06}", rng.gen_range(0..10_000), counter)
            }
            KeyPattern::PrefixedId => {
                let prefix = PREFIXES[rng.gen_range(0..PREFIXES.len())];
                format!("{}_{:08x}{:016x}", prefix, rng.gen::<u32>(), counter)
            }
            KeyPattern::Custom => match custom {
                Some(shape) => rng.sample::<String, _>(shape),
                None => format!("key_{:08x}{:06x}", rng.gen::<u32>(), counter),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_hc::Hc128Rng;
    use regex::Regex;
    use std::collections::BTreeSet;

    fn rng() -> Hc128Rng {
        Hc128Rng::from_seed([7; 32])
    }

    fn many(pattern: KeyPattern, n: usize) -> Vec<String> {
        let mut keygen = KeyGenerator::new();
        let mut rng = rng();
        (0..n).map(|_| keygen.next_key(pattern, None, &mut rng)).collect()
    }

    #[test]
    fn uuids_match_shape_and_are_unique() {
        let shape =
            Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
                .unwrap();
        let keys = many(KeyPattern::Uuid, 500);
        assert!(keys.iter().all(|k| shape.is_match(k)));
        assert_eq!(keys.iter().collect::<BTreeSet<_>>().len(), 500);
    }

    #[test]
    fn objectids_are_24_hex() {
        let shape = Regex::new(r"^[0-9a-f]{24}$").unwrap();
        let keys = many(KeyPattern::MongodbObjectId, 200);
        assert!(keys.iter().all(|k| shape.is_match(k)));
        assert_eq!(keys.iter().collect::<BTreeSet<_>>().len(), 200);
    }

    #[test]
    fn ulids_are_26_crockford() {
        let shape = Regex::new(r"^[0-9A-HJKMNP-TV-Z]{26}$").unwrap();
        let keys = many(KeyPattern::Ulid, 200);
        assert!(keys.iter().all(|k| shape.is_match(k)), "bad ulid in {keys:?}");
        assert_eq!(keys.iter().collect::<BTreeSet<_>>().len(), 200);
    }

    #[test]
    fn numeric_and_prefixed_shapes() {
        let numeric = Regex::new(r"^[0-9]{6,20}$").unwrap();
        assert!(many(KeyPattern::NumericId, 100).iter().all(|k| numeric.is_match(k)));

        let prefixed = Regex::new(r"^(user|doc|item|order)_[A-Za-z0-9]{8,32}$").unwrap();
        let keys = many(KeyPattern::PrefixedId, 100);
        assert!(keys.iter().all(|k| prefixed.is_match(k)), "bad key in {keys:?}");
        assert_eq!(keys.iter().collect::<BTreeSet<_>>().len(), 100);
    }

    #[test]
    fn custom_pattern_drives_the_shape() {
        let shape = rand_regex::Regex::compile(r"acct:[0-9]{6}", 10).unwrap();
        let mut keygen = KeyGenerator::new();
        let mut rng = rng();
        let matcher = Regex::new(r"^acct:[0-9]{6}$").unwrap();
        for _ in 0..50 {
            let key = keygen.next_key(KeyPattern::Custom, Some(&shape), &mut rng);
            assert!(matcher.is_match(&key));
        }
    }

    #[test]
    fn determinism_per_seed() {
        let mut a = KeyGenerator::new();
        let mut b = KeyGenerator::new();
        let mut rng_a = rng();
        let mut rng_b = rng();
        for _ in 0..20 {
            assert_eq!(
                a.next_key(KeyPattern::Uuid, None, &mut rng_a),
                b.next_key(KeyPattern::Uuid, None, &mut rng_b)
            );
        }
    }
}

//! Per-message key generation.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;

use serde::{Deserialize, Deserializer, Serialize};

/// Round-robin keys cycle through this many distinct values.
const ROUND_ROBIN_KEY_COUNT: u64 = 10_000;

/// Key distribution requested by a work assignment. Values not recognized
/// by this worker fall back to `NoKey`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyDistributorType {
    #[default]
    NoKey,
    KeyRoundRobin,
    RandomNano,
}

impl<'de> Deserialize<'de> for KeyDistributorType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(match name.as_str() {
            "KEY_ROUND_ROBIN" => KeyDistributorType::KeyRoundRobin,
            "RANDOM_NANO" => KeyDistributorType::RandomNano,
            // NO_KEY, plus anything this worker does not recognize
            _ => KeyDistributorType::NoKey,
        })
    }
}

/// Generates keys for one load run. Shared by every producer task, so the
/// round-robin counter is atomic.
pub enum KeyDistributor {
    NoKey,
    RoundRobin(AtomicU64),
    RandomNano,
}

impl KeyDistributor {
    pub fn build(kind: KeyDistributorType) -> Self {
        match kind {
            KeyDistributorType::NoKey => KeyDistributor::NoKey,
            KeyDistributorType::KeyRoundRobin => KeyDistributor::RoundRobin(AtomicU64::new(0)),
            KeyDistributorType::RandomNano => KeyDistributor::RandomNano,
        }
    }

    pub fn next(&self) -> Option<String> {
        match self {
            KeyDistributor::NoKey => None,
            KeyDistributor::RoundRobin(counter) => {
                let n = counter.fetch_add(1, Relaxed) % ROUND_ROBIN_KEY_COUNT;
                Some(n.to_string())
            }
            KeyDistributor::RandomNano => Some(fastrand::u64(..).to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_key_returns_none() {
        let dist = KeyDistributor::build(KeyDistributorType::NoKey);
        assert_eq!(dist.next(), None);
        assert_eq!(dist.next(), None);
    }

    #[test]
    fn round_robin_cycles_decimal_keys() {
        let dist = KeyDistributor::build(KeyDistributorType::KeyRoundRobin);

        assert_eq!(dist.next().unwrap(), "0");
        assert_eq!(dist.next().unwrap(), "1");
        assert_eq!(dist.next().unwrap(), "2");
    }

    #[test]
    fn round_robin_wraps_at_key_count() {
        let dist = KeyDistributor::build(KeyDistributorType::KeyRoundRobin);

        for _ in 0..ROUND_ROBIN_KEY_COUNT {
            dist.next();
        }
        assert_eq!(dist.next().unwrap(), "0");
    }

    #[test]
    fn random_nano_yields_parseable_values() {
        let dist = KeyDistributor::build(KeyDistributorType::RandomNano);

        for _ in 0..100 {
            let key = dist.next().unwrap();
            key.parse::<u64>().unwrap();
        }
    }

    #[test]
    fn unknown_type_deserializes_to_default() {
        let kind: KeyDistributorType = serde_json::from_str(r#""KEY_ROUND_ROBIN""#).unwrap();
        assert_eq!(kind, KeyDistributorType::KeyRoundRobin);

        let kind: KeyDistributorType = serde_json::from_str(r#""SOMETHING_NEW""#).unwrap();
        assert_eq!(kind, KeyDistributorType::NoKey);
    }
}

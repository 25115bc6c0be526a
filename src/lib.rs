//! The Fortuna random number generator by N. Ferguson and B. Schneier

pub mod accumulator;
pub mod cipher;
pub mod entropy;
pub mod error;
pub mod generator;
pub mod rng;
pub mod seed;
mod sha256d;

pub use accumulator::{Accumulator, MAX_EVENT_SIZE, NUM_POOLS};
pub use cipher::{new_aes256, BlockCipher, InvalidLength, NewCipher};
pub use entropy::{InitialSeedProvider, SystemEntropy};
pub use error::{FortunaError, Result};
pub use generator::{Generator, KEY_SIZE};
pub use rng::{Rng, SEED_FILE_UPDATE_INTERVAL};
pub use seed::{SeedStore, SEED_FILE_SIZE};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.0");
    }
}

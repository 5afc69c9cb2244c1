use rand::{rngs::OsRng, Rng, RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use std::cell::RefCell;

/// Seeded random source for randomized cache tests.
///
/// Uses the xoshiro256** PRNG so a failing run can be replayed from its seed.
///
/// # Examples
///
/// ```
/// use graph_cache_util::fuzzer::Fuzzer;
///
/// let fuzzer = Fuzzer::new(Some([7; 32]));
/// let id = fuzzer.record_id("User", 5);
/// assert!(id.starts_with("User:"));
/// ```
pub struct Fuzzer {
    /// The seed used to initialize the PRNG.
    pub seed: [u8; 32],
    rng: RefCell<Xoshiro256StarStar>,
}

impl Fuzzer {
    /// Create a fuzzer, drawing a seed from `OsRng` when none is given.
    pub fn new(seed: Option<[u8; 32]>) -> Self {
        let seed = seed.unwrap_or_else(|| {
            let mut bytes = [0u8; 32];
            OsRng.fill_bytes(&mut bytes);
            bytes
        });
        Self {
            seed,
            rng: RefCell::new(Xoshiro256StarStar::from_seed(seed)),
        }
    }

    /// Random integer in `[min, max]`.
    pub fn random_int(&self, min: i64, max: i64) -> i64 {
        self.rng.borrow_mut().gen_range(min..=max)
    }

    /// `true` with the given probability.
    pub fn chance(&self, probability: f64) -> bool {
        self.rng.borrow_mut().gen_bool(probability.clamp(0.0, 1.0))
    }

    /// Pick an element of a non-empty slice.
    pub fn pick<'a, T>(&self, items: &'a [T]) -> &'a T {
        let idx = self.rng.borrow_mut().gen_range(0..items.len());
        &items[idx]
    }

    /// Raw key value in `1..=max` as a string, the way servers hand out ids.
    pub fn key(&self, max: i64) -> String {
        self.random_int(1, max.max(1)).to_string()
    }

    /// Record id of the form `Type:<n>` with `n` in `1..=max`.
    pub fn record_id(&self, type_name: &str, max: i64) -> String {
        format!("{}:{}", type_name, self.key(max))
    }

    /// Short lowercase word, handy as a scalar field value.
    pub fn word(&self, len: usize) -> String {
        let mut rng = self.rng.borrow_mut();
        (0..len.max(1))
            .map(|_| char::from(b'a' + rng.gen_range(0..26u8)))
            .collect()
    }
}

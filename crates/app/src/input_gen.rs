//! Sample traffic generation for demo runs.
//!
//! When no message is given on the command line, we generate a handful of
//! short printable messages. A few of them carry a `$` so the flag byte shows
//! up inside payloads and byte stuffing has something to do.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const WORDS: &[&str] = &[
    "hello", "frame", "token", "ring", "jam", "crc", "link", "ack", "data", "bus", "ping", "$5",
];

/// Generate `count` messages of one to `max_words` words each.
///
/// # Arguments
/// - `seed`: random seed for determinism
/// - `count`: number of messages
/// - `max_words`: upper bound on words per message (at least 1)
pub fn generate_messages(seed: u64, count: usize, max_words: usize) -> Vec<String> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let max_words = max_words.max(1);

    (0..count)
        .map(|_| {
            let words = rng.gen_range(1..=max_words);
            (0..words)
                .map(|_| WORDS[rng.gen_range(0..WORDS.len())])
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

pub mod account;
pub mod classifier;
pub mod error;
pub mod gate;
pub mod identity;
pub mod ingest;
pub mod media;
pub mod middleware;
pub mod posts;
pub mod routes;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

use rand::RngCore;

/// Hex of `n_bytes` drawn from the thread-local CSPRNG.
pub(crate) fn random_hex(n_bytes: usize) -> String {
    let mut buf = vec![0u8; n_bytes];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

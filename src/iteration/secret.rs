//! Per-run completion secret.
//!
//! The agent must echo the token verbatim to claim completion; the claim is
//! still gated behind the validator. The token is generated once per run and
//! never persisted.

use rand::Rng;

const SECRET_PREFIX: &str = "RALPH_COMPLETE_";

/// Generate a fresh secret of the form `RALPH_COMPLETE_<8 lowercase hex>`.
pub fn generate() -> String {
    let n: u32 = rand::rng().random();
    format!("{SECRET_PREFIX}{n:08x}")
}

/// True iff the secret appears as a contiguous substring of the output.
pub fn detect(output: &str, secret: &str) -> bool {
    output.contains(secret)
}

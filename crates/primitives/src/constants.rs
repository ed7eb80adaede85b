//! Constants for magic numbers and strings used in the primitives.

/// The size (in bytes) of a Hash (such as [`Txid`](bitcoin::Txid)).
pub const HASH_SIZE: usize = 32;

/// The size (in bytes) of a compressed secp256k1 public key as pushed in a multisig script.
pub const COMPRESSED_PUBKEY_SIZE: usize = 33;

/// The largest `n` that a bare `OP_CHECKMULTISIG` redeem script can commit to with small-int
/// pushes.
pub const MAX_MULTISIG_KEYS: usize = 16;

//! Threshold multisignature redeem scripts controlled by the federation.
//!
//! The federation spends through a P2WSH output whose witness script is a bare
//! `<m> <pk_1> .. <pk_n> <n> OP_CHECKMULTISIG`. This module parses and builds such scripts and
//! checks signatures against them the way `OP_CHECKMULTISIG` would.

use bitcoin::{
    ecdsa,
    hashes::Hash,
    opcodes::{all::OP_CHECKMULTISIG, Opcode},
    script::Instruction,
    secp256k1::{self, Message, Secp256k1, Verification},
    sighash::SighashCache,
    Address, Amount, EcdsaSighashType, Network, PublicKey, Script, ScriptBuf, Transaction,
};

use crate::{
    constants::{COMPRESSED_PUBKEY_SIZE, MAX_MULTISIG_KEYS},
    errors::ParseError,
};

/// `OP_PUSHNUM_1`, the opcode that pushes the small integer `1`.
const OP_PUSHNUM_BASE: u8 = 0x50;

/// A parsed `m-of-n` multisig redeem script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigScript {
    threshold: usize,
    pubkeys: Vec<PublicKey>,
    redeem_script: ScriptBuf,
}

impl MultisigScript {
    /// Builds the redeem script for the given threshold and ordered set of keys.
    pub fn new(threshold: usize, pubkeys: Vec<PublicKey>) -> Result<Self, ParseError> {
        check_threshold(threshold, pubkeys.len())?;

        let mut builder = ScriptBuf::builder().push_int(threshold as i64);
        for pk in &pubkeys {
            builder = builder.push_key(pk);
        }
        let redeem_script = builder
            .push_int(pubkeys.len() as i64)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script();

        Ok(Self {
            threshold,
            pubkeys,
            redeem_script,
        })
    }

    /// Parses a redeem script of the form `<m> <pk_1> .. <pk_n> <n> OP_CHECKMULTISIG`.
    pub fn from_script(script: &Script) -> Result<Self, ParseError> {
        let not_multisig = || ParseError::NotMultisig(script.to_owned());

        let instructions = script
            .instructions()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| not_multisig())?;

        // m, at least one key, n, OP_CHECKMULTISIG
        if instructions.len() < 4 {
            return Err(not_multisig());
        }

        let (head, rest) = instructions.split_at(1);
        let (keys, tail) = rest.split_at(rest.len() - 2);

        let threshold = small_int(&head[0]).ok_or_else(not_multisig)?;
        let num_keys = small_int(&tail[0]).ok_or_else(not_multisig)?;
        if tail[1] != Instruction::Op(OP_CHECKMULTISIG) || num_keys != keys.len() {
            return Err(not_multisig());
        }

        let mut pubkeys = Vec::with_capacity(keys.len());
        for ins in keys {
            match ins {
                Instruction::PushBytes(bytes) if bytes.len() == COMPRESSED_PUBKEY_SIZE => {
                    let pk = secp256k1::PublicKey::from_slice(bytes.as_bytes())?;
                    pubkeys.push(PublicKey::new(pk));
                }
                _ => return Err(not_multisig()),
            }
        }

        check_threshold(threshold, pubkeys.len())?;

        Ok(Self {
            threshold,
            pubkeys,
            redeem_script: script.to_owned(),
        })
    }

    /// Minimum number of signatures needed to spend.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Keys in the order they are committed in the script.
    pub fn pubkeys(&self) -> &[PublicKey] {
        &self.pubkeys
    }

    pub fn redeem_script(&self) -> &Script {
        &self.redeem_script
    }

    pub fn contains_key(&self, pubkey: &PublicKey) -> bool {
        self.pubkeys.contains(pubkey)
    }

    /// Position of the key in the script, used to order signatures in the witness.
    pub fn key_position(&self, pubkey: &PublicKey) -> Option<usize> {
        self.pubkeys.iter().position(|pk| pk == pubkey)
    }

    /// The P2WSH `script_pubkey` of the federation address.
    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2wsh(&self.redeem_script.wscript_hash())
    }

    pub fn address(&self, network: Network) -> Address {
        Address::p2wsh(&self.redeem_script, network)
    }

    /// Computes the BIP-143 message that a federation member signs for the given input.
    ///
    /// Returns `None` if the input does not exist.
    pub fn signature_message(
        &self,
        tx: &Transaction,
        input_index: usize,
        value: Amount,
        sighash_type: EcdsaSighashType,
    ) -> Option<Message> {
        let mut cache = SighashCache::new(tx);
        let sighash = cache
            .p2wsh_signature_hash(input_index, &self.redeem_script, value, sighash_type)
            .ok()?;

        Some(Message::from_digest(sighash.to_byte_array()))
    }

    /// Checks a single member's signature for an input.
    pub fn verify_signature<C: Verification>(
        &self,
        secp: &Secp256k1<C>,
        tx: &Transaction,
        input_index: usize,
        value: Amount,
        pubkey: &PublicKey,
        signature: &ecdsa::Signature,
    ) -> bool {
        if !self.contains_key(pubkey) {
            return false;
        }

        self.signature_message(tx, input_index, value, signature.sighash_type)
            .is_some_and(|msg| {
                secp.verify_ecdsa(&msg, &signature.signature, &pubkey.inner)
                    .is_ok()
            })
    }

    /// Checks that the witness of a finalized input satisfies the script, matching signatures
    /// against keys in order as `OP_CHECKMULTISIG` does.
    pub fn verify_input<C: Verification>(
        &self,
        secp: &Secp256k1<C>,
        tx: &Transaction,
        input_index: usize,
        value: Amount,
    ) -> bool {
        let Some(txin) = tx.input.get(input_index) else {
            return false;
        };

        let elements: Vec<&[u8]> = txin.witness.iter().collect();

        // <dummy> <sig_1> .. <sig_m> <redeem script>
        if elements.len() != self.threshold + 2
            || !elements[0].is_empty()
            || elements[elements.len() - 1] != self.redeem_script.as_bytes()
        {
            return false;
        }

        let mut keys = self.pubkeys.iter();
        for raw_sig in &elements[1..elements.len() - 1] {
            let Ok(signature) = ecdsa::Signature::from_slice(raw_sig) else {
                return false;
            };

            let Some(msg) = self.signature_message(tx, input_index, value, signature.sighash_type)
            else {
                return false;
            };

            // keys are consumed even when they do not match, exactly like the opcode
            let matched = keys.any(|pk| {
                secp.verify_ecdsa(&msg, &signature.signature, &pk.inner)
                    .is_ok()
            });
            if !matched {
                return false;
            }
        }

        true
    }

    /// Whether a spending input carries this script as its witness script.
    pub fn is_spent_by(&self, tx: &Transaction) -> bool {
        tx.input
            .iter()
            .any(|txin| txin.witness.last() == Some(self.redeem_script.as_bytes()))
    }
}

fn small_int(ins: &Instruction<'_>) -> Option<usize> {
    match ins {
        Instruction::Op(op) => pushnum_value(*op),
        _ => None,
    }
}

fn pushnum_value(op: Opcode) -> Option<usize> {
    let raw = op.to_u8();
    if (OP_PUSHNUM_BASE + 1..=OP_PUSHNUM_BASE + MAX_MULTISIG_KEYS as u8).contains(&raw) {
        Some((raw - OP_PUSHNUM_BASE) as usize)
    } else {
        None
    }
}

fn check_threshold(threshold: usize, keys: usize) -> Result<(), ParseError> {
    if threshold == 0 || threshold > keys || keys > MAX_MULTISIG_KEYS {
        return Err(ParseError::InvalidThreshold { threshold, keys });
    }

    Ok(())
}

//! Defines [`CrossChainTransfer`], the record kept for every deposit the federation pays out on
//! the tracked chain, along with the state machine its withdrawal moves through.

use std::{fmt, str::FromStr};

use arbitrary::Arbitrary;
use bitcoin::{psbt::Psbt, secp256k1::Secp256k1, Amount, Transaction, Txid, Witness};
use borsh::{BorshDeserialize, BorshSerialize};
use fedpeg_primitives::{
    bridge::{Deposit, DepositId},
    l1::{BitcoinPsbt, BitcoinTx, BlockRef},
    multisig::MultisigScript,
};
use serde::{Deserialize, Serialize};
use tracing::*;

use super::errors::{EntityResult, TransferError};

/// Plain status tag of a [`TransferState`], used to index transfers.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Arbitrary,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Partial,
    FullySigned,
    SeenInBlock,
    Rejected,
}

impl TransferStatus {
    pub const ALL: [TransferStatus; 4] = [
        Self::Partial,
        Self::FullySigned,
        Self::SeenInBlock,
        Self::Rejected,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Partial => "partial",
            Self::FullySigned => "fully_signed",
            Self::SeenInBlock => "seen_in_block",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown transfer status '{s}'"))
    }
}

/// Snapshot of the deposit that a transfer pays out.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary, BorshSerialize, BorshDeserialize)]
pub struct DepositInfo {
    /// Height of the counter-chain block the deposit matured at.
    height: u64,

    target_address: String,

    /// Amount in satoshis.
    amount: u64,
}

impl DepositInfo {
    pub fn new(height: u64, target_address: impl Into<String>, amount: Amount) -> Self {
        Self {
            height,
            target_address: target_address.into(),
            amount: amount.to_sat(),
        }
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn target_address(&self) -> &str {
        &self.target_address
    }

    pub fn amount(&self) -> Amount {
        Amount::from_sat(self.amount)
    }
}

/// Where a withdrawal is in its lifecycle. Every state carries the withdrawal transaction, partially
/// signed while signatures are still being collected.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary, BorshSerialize, BorshDeserialize)]
pub enum TransferState {
    /// Federation members are still contributing signatures.
    Partial { withdrawal: BitcoinPsbt },

    /// Quorum reached, ready to be broadcast.
    FullySigned { withdrawal: BitcoinTx },

    /// The withdrawal is included in a block of the tracked chain.
    SeenInBlock {
        withdrawal: BitcoinTx,
        block: BlockRef,
    },

    /// Permanently excluded, e.g. because the mempool refused it.
    Rejected { withdrawal: BitcoinTx },
}

impl TransferState {
    pub fn status(&self) -> TransferStatus {
        match self {
            Self::Partial { .. } => TransferStatus::Partial,
            Self::FullySigned { .. } => TransferStatus::FullySigned,
            Self::SeenInBlock { .. } => TransferStatus::SeenInBlock,
            Self::Rejected { .. } => TransferStatus::Rejected,
        }
    }
}

/// A deposit on the counter-chain together with the withdrawal that pays it out on the tracked
/// chain.
///
/// The encoding is deterministic: `deposit_id`, then the optional [`DepositInfo`], then the
/// [`TransferState`] variant index and its fields.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary, BorshSerialize, BorshDeserialize)]
pub struct CrossChainTransfer {
    deposit_id: DepositId,

    /// Absent for transfers that were first learned about from a block on the tracked chain.
    deposit: Option<DepositInfo>,

    state: TransferState,
}

impl CrossChainTransfer {
    /// Starts tracking a matured deposit with the withdrawal that the federation will sign.
    pub fn new_partial(deposit: &Deposit, deposit_height: u64, withdrawal: BitcoinPsbt) -> Self {
        Self {
            deposit_id: *deposit.id(),
            deposit: Some(DepositInfo::new(
                deposit_height,
                deposit.target_address(),
                deposit.amount(),
            )),
            state: TransferState::Partial { withdrawal },
        }
    }

    /// Starts tracking a withdrawal observed in a block before its deposit was recorded.
    pub fn new_seen_in_block(deposit_id: DepositId, withdrawal: BitcoinTx, block: BlockRef) -> Self {
        Self {
            deposit_id,
            deposit: None,
            state: TransferState::SeenInBlock { withdrawal, block },
        }
    }

    pub fn deposit_id(&self) -> &DepositId {
        &self.deposit_id
    }

    pub fn deposit(&self) -> Option<&DepositInfo> {
        self.deposit.as_ref()
    }

    pub fn deposit_height(&self) -> Option<u64> {
        self.deposit.as_ref().map(DepositInfo::height)
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    pub fn status(&self) -> TransferStatus {
        self.state.status()
    }

    /// The block the withdrawal was seen in, only set while in [`TransferStatus::SeenInBlock`].
    pub fn block(&self) -> Option<&BlockRef> {
        match &self.state {
            TransferState::SeenInBlock { block, .. } => Some(block),
            _ => None,
        }
    }

    /// Txid of the withdrawal. Witness data does not change it, so it is stable across signing.
    pub fn withdrawal_txid(&self) -> Txid {
        match &self.state {
            TransferState::Partial { withdrawal } => withdrawal.compute_txid(),
            TransferState::FullySigned { withdrawal }
            | TransferState::SeenInBlock { withdrawal, .. }
            | TransferState::Rejected { withdrawal } => withdrawal.compute_txid(),
        }
    }

    /// The withdrawal transaction, unsigned if signatures are still being collected.
    pub fn withdrawal_tx(&self) -> &Transaction {
        match &self.state {
            TransferState::Partial { withdrawal } => withdrawal.unsigned_tx(),
            TransferState::FullySigned { withdrawal }
            | TransferState::SeenInBlock { withdrawal, .. }
            | TransferState::Rejected { withdrawal } => withdrawal.inner(),
        }
    }

    pub fn withdrawal_psbt(&self) -> Option<&BitcoinPsbt> {
        match &self.state {
            TransferState::Partial { withdrawal } => Some(withdrawal),
            _ => None,
        }
    }

    /// Attaches the deposit snapshot if the transfer does not have one yet.
    ///
    /// # Returns
    ///
    /// Whether the snapshot was attached.
    pub fn attach_deposit(&mut self, deposit: DepositInfo) -> bool {
        if self.deposit.is_some() {
            return false;
        }

        self.deposit = Some(deposit);
        true
    }

    /// Moves a [`TransferStatus::Partial`] transfer to [`TransferStatus::FullySigned`].
    ///
    /// # Errors
    ///
    /// If the transfer is not partial or `signed` is not the withdrawal being tracked.
    pub fn mark_fully_signed(&mut self, signed: Transaction) -> EntityResult<()> {
        let TransferState::Partial { withdrawal } = &self.state else {
            return Err(self.invalid_transition(TransferStatus::FullySigned))?;
        };

        let expected = withdrawal.compute_txid();
        let got = signed.compute_txid();
        if expected != got {
            return Err(TransferError::MismatchedTransaction { expected, got })?;
        }

        self.state = TransferState::FullySigned {
            withdrawal: signed.into(),
        };
        Ok(())
    }

    /// Records that the withdrawal was included in `block`. The transaction is replaced by the
    /// one observed on chain.
    ///
    /// A partial transfer may move here directly: another federation member can reach quorum and
    /// broadcast before this node has merged enough signatures.
    ///
    /// # Errors
    ///
    /// If the transfer was rejected.
    pub fn mark_seen_in_block(&mut self, observed: Transaction, block: BlockRef) -> EntityResult<()> {
        if self.status() == TransferStatus::Rejected {
            return Err(self.invalid_transition(TransferStatus::SeenInBlock))?;
        }

        self.state = TransferState::SeenInBlock {
            withdrawal: observed.into(),
            block,
        };
        Ok(())
    }

    /// Undoes [`Self::mark_seen_in_block`] after the block left the best chain.
    ///
    /// The transaction seen on chain was fully signed, so the transfer always lands in
    /// [`TransferStatus::FullySigned`].
    pub fn revert_to_fully_signed(&mut self) -> EntityResult<()> {
        let TransferState::SeenInBlock { withdrawal, .. } = &self.state else {
            return Err(self.invalid_transition(TransferStatus::FullySigned))?;
        };

        let withdrawal = withdrawal.clone();
        self.state = TransferState::FullySigned { withdrawal };
        Ok(())
    }

    /// Excludes the transfer from further processing.
    ///
    /// # Errors
    ///
    /// If the withdrawal is already in a block or the transfer was rejected before.
    pub fn mark_rejected(&mut self) -> EntityResult<()> {
        let withdrawal = match &self.state {
            TransferState::Partial { withdrawal } => withdrawal.unsigned_tx().clone().into(),
            TransferState::FullySigned { withdrawal } => withdrawal.clone(),
            TransferState::SeenInBlock { .. } | TransferState::Rejected { .. } => {
                return Err(self.invalid_transition(TransferStatus::Rejected))?;
            }
        };

        self.state = TransferState::Rejected { withdrawal };
        Ok(())
    }

    /// Merges the signatures carried by copies of the withdrawal signed by other federation
    /// members.
    ///
    /// A signature is kept only if its key belongs to `multisig` and it verifies against the
    /// input's BIP-143 sighash. Missing `witness_utxo`s are taken from the partials so that
    /// signatures can be checked. Whether the result has reached quorum is left to the caller.
    ///
    /// # Returns
    ///
    /// The smallest number of valid signatures held by any input after the merge.
    ///
    /// # Errors
    ///
    /// If the transfer is not partial or any of `partials` spends a different transaction. In
    /// that case nothing is merged.
    pub fn combine_signatures(
        &mut self,
        multisig: &MultisigScript,
        partials: &[BitcoinPsbt],
    ) -> EntityResult<usize> {
        let deposit_id = self.deposit_id;
        let invalid = self.invalid_transition(TransferStatus::Partial);
        let TransferState::Partial { withdrawal } = &mut self.state else {
            return Err(invalid)?;
        };

        let expected = withdrawal.compute_txid();
        for partial in partials {
            let got = partial.compute_txid();
            if got != expected {
                return Err(TransferError::MismatchedTransaction { expected, got })?;
            }
        }

        let secp = Secp256k1::verification_only();
        let psbt = withdrawal.inner_mut();
        let unsigned_tx = psbt.unsigned_tx.clone();

        for (idx, input) in psbt.inputs.iter_mut().enumerate() {
            for partial in partials {
                let Some(theirs) = partial.inner().inputs.get(idx) else {
                    continue;
                };

                if input.witness_utxo.is_none() {
                    input.witness_utxo = theirs.witness_utxo.clone();
                }
                if input.witness_script.is_none() {
                    input.witness_script = Some(multisig.redeem_script().to_owned());
                }

                let Some(value) = input.witness_utxo.as_ref().map(|utxo| utxo.value) else {
                    debug!(%deposit_id, input = idx, "missing witness utxo, cannot check signatures");
                    continue;
                };

                for (pubkey, signature) in &theirs.partial_sigs {
                    if input.partial_sigs.contains_key(pubkey) {
                        continue;
                    }

                    if multisig.verify_signature(&secp, &unsigned_tx, idx, value, pubkey, signature)
                    {
                        input.partial_sigs.insert(*pubkey, *signature);
                    } else {
                        debug!(%deposit_id, input = idx, %pubkey, "dropping invalid signature");
                    }
                }
            }
        }

        Ok(count_signatures(psbt, multisig))
    }

    /// Number of signatures the least signed input holds, if signatures are still being
    /// collected.
    pub fn signature_count(&self, multisig: &MultisigScript) -> Option<usize> {
        self.withdrawal_psbt()
            .map(|psbt| count_signatures(psbt.inner(), multisig))
    }

    /// Builds the fully signed withdrawal from the collected signatures.
    ///
    /// Each input gets the witness `<empty> <sig_1> .. <sig_m> <redeem script>` with signatures in
    /// the order their keys appear in the redeem script, as `OP_CHECKMULTISIG` expects.
    pub fn finalize_withdrawal(&self, multisig: &MultisigScript) -> EntityResult<Transaction> {
        let Some(withdrawal) = self.withdrawal_psbt() else {
            return Err(self.invalid_transition(TransferStatus::FullySigned))?;
        };

        let psbt = withdrawal.inner();
        let need = multisig.threshold();
        let mut tx = psbt.unsigned_tx.clone();

        for (idx, (input, txin)) in psbt.inputs.iter().zip(tx.input.iter_mut()).enumerate() {
            let mut signatures: Vec<_> = input
                .partial_sigs
                .iter()
                .filter_map(|(pubkey, sig)| multisig.key_position(pubkey).map(|pos| (pos, sig)))
                .collect();

            if signatures.len() < need {
                return Err(TransferError::NotEnoughSignatures {
                    input: idx,
                    have: signatures.len(),
                    need,
                })?;
            }

            signatures.sort_by_key(|(pos, _)| *pos);

            let mut witness = Witness::new();
            witness.push(Vec::<u8>::new());
            for (_, sig) in signatures.into_iter().take(need) {
                witness.push(sig.to_vec());
            }
            witness.push(multisig.redeem_script().as_bytes());

            txin.witness = witness;
        }

        Ok(tx)
    }

    fn invalid_transition(&self, to: TransferStatus) -> TransferError {
        TransferError::InvalidTransition {
            deposit_id: self.deposit_id,
            from: self.status(),
            to,
        }
    }
}

fn count_signatures(psbt: &Psbt, multisig: &MultisigScript) -> usize {
    psbt.inputs
        .iter()
        .map(|input| {
            input
                .partial_sigs
                .keys()
                .filter(|pubkey| multisig.contains_key(pubkey))
                .count()
        })
        .min()
        .unwrap_or(0)
}

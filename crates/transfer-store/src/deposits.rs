//! Finding deposits into the federation on the counter-chain.

use bitcoin::{Amount, Block, ScriptBuf, Transaction};
use fedpeg_db::traits::DepositExtractor;
use fedpeg_primitives::{bridge::Deposit, multisig::MultisigScript, params::FederationParams};
use tracing::*;

use crate::utils::op_return_data;

/// Treats every transaction paying into the federation P2WSH address as a deposit.
///
/// The amount is the sum of all outputs paying the federation. The destination on the tracked
/// chain is the UTF-8 payload of the first `OP_RETURN` output. Transactions without a readable
/// destination are skipped.
#[derive(Debug, Clone)]
pub struct MultisigDepositExtractor {
    script_pubkey: ScriptBuf,
}

impl MultisigDepositExtractor {
    pub fn new(multisig: &MultisigScript) -> Self {
        Self {
            script_pubkey: multisig.script_pubkey(),
        }
    }

    pub fn from_params(params: &FederationParams) -> Self {
        Self::new(params.multisig())
    }

    fn extract_deposit(&self, tx: &Transaction) -> Option<Deposit> {
        let amount: Amount = tx
            .output
            .iter()
            .filter(|out| out.script_pubkey == self.script_pubkey)
            .map(|out| out.value)
            .sum();
        if amount == Amount::ZERO {
            return None;
        }

        let txid = tx.compute_txid();
        let Some(data) = tx
            .output
            .iter()
            .find_map(|out| op_return_data(&out.script_pubkey))
        else {
            debug!(%txid, "deposit without destination, skipping");
            return None;
        };

        let Ok(target_address) = std::str::from_utf8(data) else {
            debug!(%txid, "deposit destination is not utf-8, skipping");
            return None;
        };

        Some(Deposit::new(txid.into(), amount, target_address))
    }
}

impl DepositExtractor for MultisigDepositExtractor {
    fn extract_deposits(&self, block: &Block, height: u64) -> Vec<Deposit> {
        let deposits: Vec<Deposit> = block
            .txdata
            .iter()
            .filter_map(|tx| self.extract_deposit(tx))
            .collect();

        if !deposits.is_empty() {
            trace!(%height, count = deposits.len(), "extracted deposits");
        }
        deposits
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{hashes::Hash, BlockHash, TxOut};
    use fedpeg_primitives::bridge::DepositId;
    use fedpeg_test_utils::{
        bridge::{create_deposit_tx, generate_multisig, random_payout_script},
        chain::build_block,
    };

    use super::*;

    #[test]
    fn test_extracts_federation_deposits() {
        let (_, multisig) = generate_multisig(2, 3);
        let (_, other) = generate_multisig(2, 3);
        let extractor = MultisigDepositExtractor::new(&multisig);

        let deposit = create_deposit_tx(&multisig, Amount::from_sat(500), "addr1");

        // pays twice into the federation
        let mut split = create_deposit_tx(&multisig, Amount::from_sat(300), "addr2");
        split.output.push(TxOut {
            value: Amount::from_sat(200),
            script_pubkey: multisig.script_pubkey(),
        });

        let foreign = create_deposit_tx(&other, Amount::from_sat(500), "addr3");

        let block = build_block(
            BlockHash::all_zeros(),
            7,
            vec![deposit.clone(), foreign, split.clone()],
        );
        let deposits = extractor.extract_deposits(&block, 7);

        assert_eq!(
            deposits,
            vec![
                Deposit::new(
                    DepositId::from(deposit.compute_txid()),
                    Amount::from_sat(500),
                    "addr1"
                ),
                Deposit::new(
                    DepositId::from(split.compute_txid()),
                    Amount::from_sat(500),
                    "addr2"
                ),
            ]
        );
    }

    #[test]
    fn test_skips_deposit_without_destination() {
        let (_, multisig) = generate_multisig(1, 2);
        let extractor = MultisigDepositExtractor::new(&multisig);

        let mut tx = create_deposit_tx(&multisig, Amount::from_sat(500), "addr1");
        tx.output[1].script_pubkey = random_payout_script();

        let block = build_block(BlockHash::all_zeros(), 1, vec![tx]);
        assert!(extractor.extract_deposits(&block, 1).is_empty());
    }
}

//! Linking withdrawals on the tracked chain back to their deposits.

use bitcoin::Transaction;
use fedpeg_db::traits::WithdrawalCorrelator;
use fedpeg_primitives::bridge::DepositId;

use crate::utils::op_return_data;

/// Reads the deposit id from the first `OP_RETURN` output that pushes exactly 32 bytes.
///
/// Federation members add that output to every withdrawal they build.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpReturnCorrelator;

impl WithdrawalCorrelator for OpReturnCorrelator {
    fn try_get_deposit_reference(&self, tx: &Transaction) -> Option<DepositId> {
        tx.output.iter().find_map(|out| {
            let data: [u8; 32] = op_return_data(&out.script_pubkey)?.try_into().ok()?;
            Some(DepositId::from(data))
        })
    }
}

use std::io::{self, Read, Write};

use arbitrary::{Arbitrary, Unstructured};
use bitcoin::{
    absolute::LockTime,
    consensus::{deserialize, serialize},
    transaction::Version,
    Amount, OutPoint, Psbt, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::buf::Buf32;

/// [Borsh](borsh)-friendly Bitcoin [`Transaction`].
///
/// Encoded as a `u32` length followed by the consensus serialization of the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinTx(Transaction);

impl BitcoinTx {
    pub fn inner(&self) -> &Transaction {
        &self.0
    }

    pub fn compute_txid(&self) -> Txid {
        self.0.compute_txid()
    }
}

impl From<Transaction> for BitcoinTx {
    fn from(value: Transaction) -> Self {
        Self(value)
    }
}

impl From<BitcoinTx> for Transaction {
    fn from(value: BitcoinTx) -> Self {
        value.0
    }
}

impl BorshSerialize for BitcoinTx {
    fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let tx_bytes = serialize(&self.0);
        BorshSerialize::serialize(&(tx_bytes.len() as u32), writer)?;
        writer.write_all(&tx_bytes)
    }
}

impl BorshDeserialize for BitcoinTx {
    fn deserialize_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let len = u32::deserialize_reader(reader)? as usize;
        let mut tx_bytes = vec![0u8; len];
        reader.read_exact(&mut tx_bytes)?;

        let tx = deserialize(&tx_bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        Ok(Self(tx))
    }
}

impl<'a> Arbitrary<'a> for BitcoinTx {
    fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Self> {
        let num_inputs = u.int_in_range(1..=3)?;
        let mut input = Vec::with_capacity(num_inputs);
        for _ in 0..num_inputs {
            let mut txin = arbitrary_txin(u)?;

            let num_elements = u.int_in_range(0..=3)?;
            let mut witness = Witness::new();
            for _ in 0..num_elements {
                let element: Vec<u8> = u.arbitrary()?;
                witness.push(element);
            }
            txin.witness = witness;

            input.push(txin);
        }

        let tx = Transaction {
            version: Version(2),
            lock_time: LockTime::ZERO,
            input,
            output: arbitrary_outputs(u)?,
        };

        Ok(Self(tx))
    }
}

/// [Borsh](borsh)-friendly Bitcoin [`Psbt`].
///
/// Encoded as a `u32` length followed by the BIP-174 serialization of the PSBT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinPsbt(Psbt);

impl BitcoinPsbt {
    pub fn inner(&self) -> &Psbt {
        &self.0
    }

    pub fn inner_mut(&mut self) -> &mut Psbt {
        &mut self.0
    }

    pub fn unsigned_tx(&self) -> &Transaction {
        &self.0.unsigned_tx
    }

    pub fn compute_txid(&self) -> Txid {
        self.0.unsigned_tx.compute_txid()
    }
}

impl From<Psbt> for BitcoinPsbt {
    fn from(value: Psbt) -> Self {
        Self(value)
    }
}

impl From<BitcoinPsbt> for Psbt {
    fn from(value: BitcoinPsbt) -> Self {
        value.0
    }
}

impl BorshSerialize for BitcoinPsbt {
    fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let psbt_bytes = self.0.serialize();
        BorshSerialize::serialize(&(psbt_bytes.len() as u32), writer)?;
        writer.write_all(&psbt_bytes)
    }
}

impl BorshDeserialize for BitcoinPsbt {
    fn deserialize_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let len = u32::deserialize_reader(reader)? as usize;
        let mut psbt_bytes = vec![0u8; len];
        reader.read_exact(&mut psbt_bytes)?;

        let psbt = Psbt::deserialize(&psbt_bytes)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Invalid PSBT data"))?;
        Ok(Self(psbt))
    }
}

impl<'a> Arbitrary<'a> for BitcoinPsbt {
    fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Self> {
        let num_inputs = u.int_in_range(1..=3)?;
        let mut input = Vec::with_capacity(num_inputs);
        for _ in 0..num_inputs {
            input.push(arbitrary_txin(u)?);
        }

        let tx = Transaction {
            version: Version(2),
            lock_time: LockTime::ZERO,
            input,
            output: arbitrary_outputs(u)?,
        };

        let psbt = Psbt::from_unsigned_tx(tx).map_err(|_e| arbitrary::Error::IncorrectFormat)?;
        Ok(Self(psbt))
    }
}

fn arbitrary_txin(u: &mut Unstructured<'_>) -> arbitrary::Result<TxIn> {
    let txid: Txid = Buf32::arbitrary(u)?.into();
    let vout = u.int_in_range(0..=8)?;

    Ok(TxIn {
        previous_output: OutPoint::new(txid, vout),
        script_sig: ScriptBuf::new(),
        sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
        witness: Witness::new(),
    })
}

fn arbitrary_outputs(u: &mut Unstructured<'_>) -> arbitrary::Result<Vec<TxOut>> {
    let num_outputs = u.int_in_range(1..=4)?;
    let mut output = Vec::with_capacity(num_outputs);
    for _ in 0..num_outputs {
        let value = Amount::from_sat(u.int_in_range(0..=Amount::MAX_MONEY.to_sat())?);
        let script_bytes: Vec<u8> = u.arbitrary()?;

        output.push(TxOut {
            value,
            script_pubkey: ScriptBuf::from_bytes(script_bytes),
        });
    }

    Ok(output)
}

//! Keys, multisig scripts and withdrawal transactions for exercising signature collection.

use bitcoin::{
    absolute::LockTime,
    hashes::Hash,
    opcodes::all::OP_RETURN,
    script::{Builder, PushBytesBuf},
    secp256k1::{rand::rngs::OsRng, Secp256k1, SecretKey},
    transaction::Version,
    Amount, EcdsaSighashType, OutPoint, PublicKey, Psbt, ScriptBuf, Sequence, Transaction, TxIn,
    TxOut, Txid, WPubkeyHash, Witness,
};
use fedpeg_primitives::{bridge::DepositId, l1::BitcoinPsbt, multisig::MultisigScript};

pub fn generate_keypairs(n: usize) -> (Vec<SecretKey>, Vec<PublicKey>) {
    let secp = Secp256k1::new();
    (0..n)
        .map(|_| {
            let sk = SecretKey::new(&mut OsRng);
            (sk, PublicKey::new(sk.public_key(&secp)))
        })
        .unzip()
}

/// Generates an `m-of-n` federation. Secret keys are returned in the order of the script.
pub fn generate_multisig(threshold: usize, num_keys: usize) -> (Vec<SecretKey>, MultisigScript) {
    let (secret_keys, pubkeys) = generate_keypairs(num_keys);
    let multisig = MultisigScript::new(threshold, pubkeys).expect("valid threshold");
    (secret_keys, multisig)
}

/// `OP_RETURN <deposit id>`, the output that ties a withdrawal to its deposit.
pub fn deposit_reference_script(deposit_id: &DepositId) -> ScriptBuf {
    let data = PushBytesBuf::try_from(deposit_id.inner().0.to_vec()).expect("32 bytes fit a push");
    Builder::new()
        .push_opcode(OP_RETURN)
        .push_slice(data)
        .into_script()
}

pub fn random_payout_script() -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(rand::random()))
}

/// Creates an unsigned withdrawal spending `num_inputs` federation UTXOs worth `payout` each.
pub fn create_withdrawal_psbt(
    multisig: &MultisigScript,
    num_inputs: usize,
    payout: Amount,
) -> BitcoinPsbt {
    let outputs = vec![TxOut {
        value: payout,
        script_pubkey: random_payout_script(),
    }];
    build_psbt(multisig, num_inputs, payout, outputs)
}

/// Creates an unsigned withdrawal that references `deposit_id` in an `OP_RETURN` output.
pub fn create_withdrawal_psbt_for(
    multisig: &MultisigScript,
    deposit_id: &DepositId,
    payout: Amount,
) -> BitcoinPsbt {
    let outputs = vec![
        TxOut {
            value: payout,
            script_pubkey: random_payout_script(),
        },
        TxOut {
            value: Amount::ZERO,
            script_pubkey: deposit_reference_script(deposit_id),
        },
    ];
    build_psbt(multisig, 1, payout, outputs)
}

fn build_psbt(
    multisig: &MultisigScript,
    num_inputs: usize,
    input_value: Amount,
    output: Vec<TxOut>,
) -> BitcoinPsbt {
    let input = (0..num_inputs)
        .map(|_| TxIn {
            previous_output: OutPoint::new(Txid::from_byte_array(rand::random()), 0),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        })
        .collect();

    let tx = Transaction {
        version: Version(2),
        lock_time: LockTime::ZERO,
        input,
        output,
    };

    let mut psbt = Psbt::from_unsigned_tx(tx).expect("unsigned tx");
    for input in psbt.inputs.iter_mut() {
        input.witness_utxo = Some(TxOut {
            value: input_value,
            script_pubkey: multisig.script_pubkey(),
        });
        input.witness_script = Some(multisig.redeem_script().to_owned());
    }

    psbt.into()
}

/// Returns a copy of `psbt` carrying `secret_key`'s signature on every input.
pub fn sign_psbt(
    psbt: &BitcoinPsbt,
    multisig: &MultisigScript,
    secret_key: &SecretKey,
) -> BitcoinPsbt {
    let secp = Secp256k1::new();
    let pubkey = PublicKey::new(secret_key.public_key(&secp));

    let mut signed = psbt.clone();
    let unsigned_tx = signed.unsigned_tx().clone();
    for (idx, input) in signed.inner_mut().inputs.iter_mut().enumerate() {
        let value = input
            .witness_utxo
            .as_ref()
            .expect("witness utxo must be present")
            .value;
        let msg = multisig
            .signature_message(&unsigned_tx, idx, value, EcdsaSighashType::All)
            .expect("input exists");
        let sig = secp.sign_ecdsa(&msg, secret_key);

        input
            .partial_sigs
            .insert(pubkey, bitcoin::ecdsa::Signature::sighash_all(sig));
    }

    signed
}

/// Signs with the first `threshold` keys and returns each member's partial copy.
pub fn collect_partials(
    psbt: &BitcoinPsbt,
    multisig: &MultisigScript,
    secret_keys: &[SecretKey],
) -> Vec<BitcoinPsbt> {
    secret_keys
        .iter()
        .take(multisig.threshold())
        .map(|sk| sign_psbt(psbt, multisig, sk))
        .collect()
}

/// A counter-chain deposit paying `amount` into the federation, with the target address
/// carried in an `OP_RETURN` output.
pub fn create_deposit_tx(multisig: &MultisigScript, amount: Amount, target_address: &str) -> Transaction {
    let data = PushBytesBuf::try_from(target_address.as_bytes().to_vec()).expect("short address");

    Transaction {
        version: Version(2),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::from_byte_array(rand::random()), 0),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        }],
        output: vec![
            TxOut {
                value: amount,
                script_pubkey: multisig.script_pubkey(),
            },
            TxOut {
                value: Amount::ZERO,
                script_pubkey: Builder::new()
                    .push_opcode(OP_RETURN)
                    .push_slice(data)
                    .into_script(),
            },
        ],
    }
}

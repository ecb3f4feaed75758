// Transaction builder

use crate::chain::{Ledger, UnspentOutputs};
use crate::core::{OutPoint, Transaction, TxInput, TxOutput};
use crate::wallet::{Address, KeyPair, Keystore};
use crate::{LedgerError, Result};

/// Create a coinbase paying the subsidy to `to`.
/// An empty memo becomes `Reward to '<to>'`.
pub fn new_coinbase(to: &Address, memo: &str) -> Result<Transaction> {
    let pub_key_hash = to.pub_key_hash()?;
    let memo = if memo.is_empty() {
        format!("Reward to '{}'", to)
    } else {
        memo.to_string()
    };
    Ok(Transaction::coinbase(pub_key_hash, memo.into_bytes()))
}

/// Build an unsigned payment of `amount` from `from` to `to`.
///
/// Outputs are taken from `unspent` in order until they cover the amount.
/// The first output pays the recipient; a second one returns any change.
pub fn build_spend(
    from: &KeyPair,
    to: &Address,
    amount: u64,
    unspent: &[(OutPoint, TxOutput)],
) -> Result<Transaction> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    let recipient = to.pub_key_hash()?;

    let mut inputs = Vec::new();
    let mut total = 0u64;
    for (outpoint, output) in unspent {
        if total >= amount {
            break;
        }
        inputs.push(TxInput::new(outpoint.txid, outpoint.vout, from.public_key().to_vec()));
        total = total.saturating_add(output.value);
    }

    if total < amount {
        return Err(LedgerError::InsufficientFunds {
            available: total,
            required: amount,
        });
    }

    let mut outputs = vec![TxOutput::new(amount, recipient)];
    if total > amount {
        outputs.push(TxOutput::new(total - amount, from.pub_key_hash()));
    }

    Ok(Transaction::new(inputs, outputs))
}

/// Transaction builder
pub struct TransactionBuilder<'a> {
    keystore: &'a Keystore,
    ledger: &'a Ledger,
}

impl<'a> TransactionBuilder<'a> {
    /// Create a new transaction builder
    pub fn new(keystore: &'a Keystore, ledger: &'a Ledger) -> Self {
        Self { keystore, ledger }
    }

    /// Build and sign a transaction sending `amount` from a wallet address
    pub fn send(&self, from: &Address, to: &Address, amount: u64) -> Result<Transaction> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let keypair = self
            .keystore
            .get_keypair(from)
            .ok_or_else(|| LedgerError::UnknownAddress(from.to_string()))?;

        let (available, unspent) = self
            .ledger
            .utxo()
            .find_spendable_outputs(&keypair.pub_key_hash(), amount)?;
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                available,
                required: amount,
            });
        }

        let mut tx = build_spend(keypair, to, amount, &unspent)?;
        self.ledger.sign_transaction(&mut tx, keypair.signing_key())?;

        log::debug!(
            "Built transaction {} spending {} outputs worth {}",
            tx.id,
            tx.inputs.len(),
            available
        );
        Ok(tx)
    }

    /// Get balance for address
    pub fn get_balance(&self, address: &Address) -> Result<u64> {
        self.ledger.utxo().balance(&address.pub_key_hash()?)
    }

    /// List UTXOs for address
    pub fn list_utxos(&self, address: &Address) -> Result<UnspentOutputs> {
        self.ledger.utxo().find_utxo(&address.pub_key_hash()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Hash256, SUBSIDY};
    use crate::storage::BlockchainDB;

    const TEST_BITS: u32 = 8;

    fn unspent(kp: &KeyPair, values: &[u64]) -> UnspentOutputs {
        values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                (
                    OutPoint::new(Hash256::new([i as u8 + 1; 32]), 0),
                    TxOutput::new(*value, kp.pub_key_hash()),
                )
            })
            .collect()
    }

    #[test]
    fn test_coinbase_memo() {
        let to = Address::from_pubkey_hash(&[3; 20]);

        let tx = new_coinbase(&to, "").unwrap();
        assert!(tx.is_coinbase());
        assert_eq!(tx.inputs[0].pub_key, format!("Reward to '{}'", to).into_bytes());
        assert_eq!(tx.outputs[0].value, SUBSIDY);
        assert_eq!(tx.outputs[0].pub_key_hash, [3; 20]);

        let tx = new_coinbase(&to, "hello").unwrap();
        assert_eq!(tx.inputs[0].pub_key, b"hello".to_vec());
    }

    #[test]
    fn test_build_spend_with_change() {
        let from = KeyPair::generate().unwrap();
        let to = Address::from_pubkey_hash(&[5; 20]);

        let tx = build_spend(&from, &to, 12, &unspent(&from, &[10, 10, 10])).unwrap();

        assert_eq!(tx.inputs.len(), 2);
        assert_eq!(tx.inputs[0].pub_key, from.public_key());
        assert!(tx.inputs.iter().all(|input| input.signature.is_empty()));
        assert_eq!(tx.outputs.len(), 2); // Payment + change
        assert_eq!(tx.outputs[0], TxOutput::new(12, [5; 20]));
        assert_eq!(tx.outputs[1], TxOutput::new(8, from.pub_key_hash()));
        assert_eq!(tx.id, tx.hash());
    }

    #[test]
    fn test_build_spend_exact_amount() {
        let from = KeyPair::generate().unwrap();
        let to = Address::from_pubkey_hash(&[5; 20]);

        let tx = build_spend(&from, &to, 10, &unspent(&from, &[10, 10])).unwrap();
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs.len(), 1);
    }

    #[test]
    fn test_build_spend_rejects_bad_amounts() {
        let from = KeyPair::generate().unwrap();
        let to = Address::from_pubkey_hash(&[5; 20]);
        let outputs = unspent(&from, &[3, 4]);

        assert!(matches!(
            build_spend(&from, &to, 0, &outputs),
            Err(LedgerError::InvalidAmount(0))
        ));
        assert!(matches!(
            build_spend(&from, &to, 8, &outputs),
            Err(LedgerError::InsufficientFunds { available: 7, required: 8 })
        ));
    }

    #[test]
    fn test_send_and_balance() {
        let mut keystore = Keystore::new();
        let alice = keystore.new_address().unwrap();
        let bob = keystore.new_address().unwrap();
        let ledger = Ledger::create(BlockchainDB::memory().unwrap(), &alice, TEST_BITS).unwrap();

        let builder = TransactionBuilder::new(&keystore, &ledger);
        let tx = builder.send(&alice, &bob, 4).unwrap();
        assert!(ledger.verify_transaction(&tx).unwrap());

        ledger.mine_block(vec![tx]).unwrap();
        assert_eq!(builder.get_balance(&alice).unwrap(), 6);
        assert_eq!(builder.get_balance(&bob).unwrap(), 4);
        assert_eq!(builder.list_utxos(&bob).unwrap().len(), 1);
    }

    #[test]
    fn test_send_errors() {
        let mut keystore = Keystore::new();
        let alice = keystore.new_address().unwrap();
        let stranger = Address::from_pubkey_hash(&[1; 20]);
        let ledger = Ledger::create(BlockchainDB::memory().unwrap(), &alice, TEST_BITS).unwrap();
        let builder = TransactionBuilder::new(&keystore, &ledger);

        assert!(matches!(
            builder.send(&stranger, &alice, 1),
            Err(LedgerError::UnknownAddress(_))
        ));
        assert!(matches!(
            builder.send(&alice, &stranger, 11),
            Err(LedgerError::InsufficientFunds { available: 10, required: 11 })
        ));
        assert!(matches!(
            builder.send(&alice, &stranger, 0),
            Err(LedgerError::InvalidAmount(0))
        ));
    }
}

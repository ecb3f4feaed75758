// Unspent output queries

use crate::chain::Ledger;
use crate::core::{OutPoint, PubKeyHash, TxOutput};
use crate::Result;
use std::collections::HashSet;
use std::ops::ControlFlow;

/// Unspent outputs paired with where they live
pub type UnspentOutputs = Vec<(OutPoint, TxOutput)>;

/// Answers "what can this key spend" by scanning the chain.
///
/// There is no index. Each query walks from the tip to genesis, remembering
/// which outputs the key has already spent in newer blocks.
pub struct UtxoResolver<'a> {
    ledger: &'a Ledger,
}

impl<'a> UtxoResolver<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    /// Collect unspent outputs in discovery order until their sum reaches
    /// `amount`. The returned total may fall short if the key is too poor.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &PubKeyHash,
        amount: u64,
    ) -> Result<(u64, UnspentOutputs)> {
        let mut accumulated = 0u64;
        let mut found = Vec::new();

        self.scan(pub_key_hash, |outpoint, output| {
            accumulated = accumulated.saturating_add(output.value);
            found.push((outpoint, output.clone()));
            if accumulated >= amount {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;

        Ok((accumulated, found))
    }

    /// Every unspent output locked to the key
    pub fn find_utxo(&self, pub_key_hash: &PubKeyHash) -> Result<UnspentOutputs> {
        let mut found = Vec::new();
        self.scan(pub_key_hash, |outpoint, output| {
            found.push((outpoint, output.clone()));
            ControlFlow::Continue(())
        })?;
        Ok(found)
    }

    pub fn balance(&self, pub_key_hash: &PubKeyHash) -> Result<u64> {
        let mut total = 0u64;
        self.scan(pub_key_hash, |_, output| {
            total = total.saturating_add(output.value);
            ControlFlow::Continue(())
        })?;
        Ok(total)
    }

    fn scan<F>(&self, pub_key_hash: &PubKeyHash, mut visit: F) -> Result<()>
    where
        F: FnMut(OutPoint, &TxOutput) -> ControlFlow<()>,
    {
        let mut spent: HashSet<OutPoint> = HashSet::new();
        let mut scanned = 0usize;

        for block in self.ledger.iter() {
            let block = block?;
            scanned += 1;

            // Spends inside this block hide outputs created by the same block
            for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
                for input in &tx.inputs {
                    if input.uses_key(pub_key_hash) {
                        spent.insert(input.outpoint());
                    }
                }
            }

            for tx in &block.transactions {
                for (index, output) in tx.outputs.iter().enumerate() {
                    if !output.is_locked_with(pub_key_hash) {
                        continue;
                    }
                    let outpoint = OutPoint::new(tx.id, index as u32);
                    if spent.contains(&outpoint) {
                        continue;
                    }
                    if visit(outpoint, output).is_break() {
                        log::debug!("UTXO scan stopped early after {} blocks", scanned);
                        return Ok(());
                    }
                }
            }
        }

        log::debug!("UTXO scan covered {} blocks", scanned);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::CancelToken;
    use crate::core::{Block, PrevTransactions, SUBSIDY, Transaction, TxInput};
    use crate::storage::BlockchainDB;
    use crate::wallet::{Address, KeyPair, build_spend, new_coinbase};

    const TEST_BITS: u32 = 8;

    struct Fixture {
        ledger: Ledger,
        alice: KeyPair,
        bob: KeyPair,
    }

    fn fixture() -> Fixture {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let ledger =
            Ledger::create(BlockchainDB::memory().unwrap(), &alice.address(), TEST_BITS).unwrap();
        Fixture { ledger, alice, bob }
    }

    fn pay(f: &Fixture, from: &KeyPair, to: &Address, amount: u64) {
        let utxo = f.ledger.utxo();
        let (_, unspent) = utxo.find_spendable_outputs(&from.pub_key_hash(), amount).unwrap();
        let mut tx = build_spend(from, to, amount, &unspent).unwrap();
        f.ledger.sign_transaction(&mut tx, from.signing_key()).unwrap();
        f.ledger.mine_block(vec![tx]).unwrap();
    }

    #[test]
    fn test_genesis_balance() {
        let f = fixture();
        let utxo = f.ledger.utxo();

        assert_eq!(utxo.balance(&f.alice.pub_key_hash()).unwrap(), 10);
        assert_eq!(utxo.balance(&f.bob.pub_key_hash()).unwrap(), 0);
        assert!(utxo.find_utxo(&f.bob.pub_key_hash()).unwrap().is_empty());
    }

    #[test]
    fn test_spent_outputs_are_hidden() {
        let f = fixture();
        pay(&f, &f.alice, &f.bob.address(), 4);

        let utxo = f.ledger.utxo();
        let alice = utxo.find_utxo(&f.alice.pub_key_hash()).unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].1.value, 6); // Change only
        assert_eq!(utxo.balance(&f.bob.pub_key_hash()).unwrap(), 4);
    }

    #[test]
    fn test_spendable_stops_early() {
        let f = fixture();
        for i in 0..3 {
            let reward = new_coinbase(&f.alice.address(), &format!("reward {}", i)).unwrap();
            f.ledger.mine_block(vec![reward]).unwrap();
        }

        let (total, outputs) = f
            .ledger
            .utxo()
            .find_spendable_outputs(&f.alice.pub_key_hash(), 15)
            .unwrap();
        assert_eq!(total, 20);
        assert_eq!(outputs.len(), 2);

        let (total, outputs) = f
            .ledger
            .utxo()
            .find_spendable_outputs(&f.alice.pub_key_hash(), 100)
            .unwrap();
        assert_eq!(total, 40);
        assert_eq!(outputs.len(), 4);
    }

    #[test]
    fn test_output_spent_in_its_own_block_is_hidden() {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let carol = KeyPair::generate().unwrap();
        let db = BlockchainDB::memory().unwrap();
        let ledger = Ledger::create(db.clone(), &alice.address(), TEST_BITS).unwrap();
        let pow = *ledger.pow();
        let tip = ledger.tip();
        let genesis_tx = ledger.get_block(&tip).unwrap().unwrap().transactions[0].clone();

        // Alice pays bob, and bob forwards the same coins within one block
        let mut to_bob = Transaction::new(
            vec![TxInput::new(genesis_tx.id, 0, alice.public_key().to_vec())],
            vec![TxOutput::new(SUBSIDY, bob.pub_key_hash())],
        );
        let prevs: PrevTransactions = [(genesis_tx.id, genesis_tx)].into_iter().collect();
        to_bob.sign(alice.signing_key(), &prevs).unwrap();

        let mut to_carol = Transaction::new(
            vec![TxInput::new(to_bob.id, 0, bob.public_key().to_vec())],
            vec![TxOutput::new(SUBSIDY, carol.pub_key_hash())],
        );
        let prevs: PrevTransactions = [(to_bob.id, to_bob.clone())].into_iter().collect();
        to_carol.sign(bob.signing_key(), &prevs).unwrap();

        let mut block = Block::new(vec![to_bob, to_carol], Some(tip));
        let result = pow.run(&block, &CancelToken::new()).unwrap();
        block.nonce = result.nonce;
        block.hash = result.hash;
        db.commit_block(&block, &tip).unwrap();

        let reopened = Ledger::open(db).unwrap();
        let utxo = reopened.utxo();
        assert!(utxo.find_utxo(&bob.pub_key_hash()).unwrap().is_empty());
        let (total, found) = utxo.find_spendable_outputs(&bob.pub_key_hash(), 1).unwrap();
        assert_eq!((total, found.len()), (0, 0));

        let balances: Vec<u64> = [&alice, &bob, &carol]
            .iter()
            .map(|kp| utxo.balance(&kp.pub_key_hash()).unwrap())
            .collect();
        assert_eq!(balances, vec![0, 0, SUBSIDY]);
        assert_eq!(balances.iter().sum::<u64>(), SUBSIDY); // Genesis only
    }

    #[test]
    fn test_conservation_across_transfers() {
        let f = fixture();
        let carol = KeyPair::generate().unwrap();
        let reward = new_coinbase(&f.bob.address(), "bob reward").unwrap();
        f.ledger.mine_block(vec![reward]).unwrap();

        pay(&f, &f.alice, &f.bob.address(), 7);
        pay(&f, &f.bob, &carol.address(), 15);
        pay(&f, &carol, &f.alice.address(), 2);

        let utxo = f.ledger.utxo();
        let balances: Vec<u64> = [&f.alice, &f.bob, &carol]
            .iter()
            .map(|kp| utxo.balance(&kp.pub_key_hash()).unwrap())
            .collect();
        assert_eq!(balances, vec![5, 2, 13]);
        assert_eq!(balances.iter().sum::<u64>(), 20); // Two coinbases
    }
}

// CLI commands

use crate::chain::Ledger;
use crate::config::Config;
use crate::consensus::CancelToken;
use crate::core::{Block, Transaction};
use crate::storage::BlockchainDB;
use crate::wallet::{Address, Keystore, TransactionBuilder, new_coinbase};
use crate::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pow-ledger")]
#[command(about = "Single-node proof-of-work UTXO ledger", long_about = None)]
pub struct Cli {
    /// Data directory (overrides the config file)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Config file (defaults to <data-dir>/config.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new blockchain, paying the genesis reward to an address
    CreateBlockchain {
        #[arg(long)]
        address: String,
    },

    /// Mine a block holding only a coinbase reward
    Mine {
        #[arg(long)]
        address: String,
        /// Coinbase memo
        #[arg(long)]
        memo: Option<String>,
    },

    /// Print every block from the tip back to genesis
    PrintChain,

    /// Get balance for an address
    GetBalance {
        #[arg(long)]
        address: String,
    },

    /// Send coins from a wallet address and mine the transaction
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
    },

    /// Create a new address
    CreateWallet,

    /// List all addresses
    ListAddresses,

    /// Re-check every stored block
    VerifyChain,
}

/// CLI handler
pub struct CliHandler {
    config: Config,
    db: BlockchainDB,
    keystore: Keystore,
}

impl CliHandler {
    /// Create a new CLI handler
    pub fn new(cli: &Cli) -> Result<Self> {
        let config = Config::load(cli.config.as_deref(), cli.data_dir.clone())?;
        std::fs::create_dir_all(&config.data_dir)?;

        let db = BlockchainDB::new(config.blocks_path())?;
        let keystore = Keystore::load_or_default(config.keystore_path())?;

        Ok(Self {
            config,
            db,
            keystore,
        })
    }

    /// Save keystore to disk
    fn save_keystore(&self) -> Result<()> {
        self.keystore.save(self.config.keystore_path())
    }

    fn ledger(&self) -> Result<Ledger> {
        Ledger::open(self.db.clone())
    }

    /// Handle CLI command
    pub async fn handle(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::CreateBlockchain { address } => self.create_blockchain(&address),
            Commands::Mine { address, memo } => self.mine(&address, memo).await,
            Commands::PrintChain => self.print_chain(),
            Commands::GetBalance { address } => self.get_balance(&address),
            Commands::Send { from, to, amount } => self.send(&from, &to, amount).await,
            Commands::CreateWallet => self.create_wallet(),
            Commands::ListAddresses => self.list_addresses(),
            Commands::VerifyChain => self.verify_chain(),
        }
    }

    /// Initialize blockchain
    fn create_blockchain(&self, address: &str) -> Result<()> {
        let address = Address::parse(address)?;
        println!(
            "Mining genesis block at {} bits...",
            self.config.difficulty_bits
        );

        let ledger = Ledger::create(self.db.clone(), &address, self.config.difficulty_bits)?;

        println!("✓ Genesis block created");
        println!("  Hash: {}", ledger.tip());
        Ok(())
    }

    async fn mine(&self, address: &str, memo: Option<String>) -> Result<()> {
        let address = Address::parse(address)?;
        let ledger = self.ledger()?;

        // Rewards to the same address need distinct memos to get distinct ids
        let memo = memo.unwrap_or_else(|| format!("Reward to '{}' on {}", address, ledger.tip()));
        let coinbase = new_coinbase(&address, &memo)?;

        let block = mine_interruptible(&ledger, vec![coinbase]).await?;
        println!("✓ Block mined");
        println!("  Hash: {}", block.hash);
        Ok(())
    }

    fn print_chain(&self) -> Result<()> {
        let ledger = self.ledger()?;
        let pow = *ledger.pow();

        for block in ledger.iter_unchecked() {
            let block = block?;
            print_block(&block, pow.validate(&block));
        }
        Ok(())
    }

    fn get_balance(&self, address: &str) -> Result<()> {
        let address = Address::parse(address)?;
        let ledger = self.ledger()?;

        let balance = TransactionBuilder::new(&self.keystore, &ledger).get_balance(&address)?;
        println!("Balance of '{}': {}", address, balance);
        Ok(())
    }

    async fn send(&self, from: &str, to: &str, amount: u64) -> Result<()> {
        let from = Address::parse(from)?;
        let to = Address::parse(to)?;
        let ledger = self.ledger()?;

        let tx = TransactionBuilder::new(&self.keystore, &ledger).send(&from, &to, amount)?;
        println!("Transaction created:");
        println!("  TXID: {}", tx.id);
        println!("  Inputs: {}", tx.inputs.len());
        println!("  Outputs: {}", tx.outputs.len());

        let block = mine_interruptible(&ledger, vec![tx]).await?;
        println!("✓ Success! Mined in block {}", block.hash);
        Ok(())
    }

    fn create_wallet(&mut self) -> Result<()> {
        let address = self.keystore.new_address()?;
        self.save_keystore()?;
        println!("Your new address: {}", address);
        Ok(())
    }

    fn list_addresses(&self) -> Result<()> {
        let addresses = self.keystore.list_addresses();
        println!("Addresses ({}):", addresses.len());
        for address in addresses {
            println!("  {}", address);
        }
        Ok(())
    }

    fn verify_chain(&self) -> Result<()> {
        let count = self.ledger()?.verify_chain()?;
        println!("✓ Chain is valid ({} blocks)", count);
        Ok(())
    }
}

/// Mine on the blocking pool, cancelling on Ctrl-C
async fn mine_interruptible(ledger: &Ledger, transactions: Vec<Transaction>) -> Result<Block> {
    let cancel = CancelToken::new();
    let mut handle = ledger.spawn_mine(transactions, cancel.clone());

    tokio::select! {
        joined = &mut handle => joined?,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Interrupted, stopping miner");
            cancel.cancel();
            handle.await?
        }
    }
}

/// Print block information
fn print_block(block: &Block, pow_valid: bool) {
    println!("============ Block {} ============", block.hash);
    match &block.prev_hash {
        Some(prev) => println!("Prev. block: {}", prev),
        None => println!("Prev. block: (genesis)"),
    }
    println!("Timestamp: {}", block.timestamp);
    println!("Nonce: {}", block.nonce);
    println!("PoW: {}", pow_valid);

    for tx in &block.transactions {
        print_transaction(tx);
    }
    println!();
}

fn print_transaction(tx: &Transaction) {
    println!("--- Transaction {}:", tx.id);
    for (i, input) in tx.inputs.iter().enumerate() {
        println!("     Input {}:", i);
        if input.is_coinbase() {
            println!("       Coinbase: {}", String::from_utf8_lossy(&input.pub_key));
            continue;
        }
        println!("       TXID:      {}", input.prev_txid);
        println!("       Out:       {}", input.prev_index);
        println!("       Signature: {}", hex::encode(&input.signature));
        println!("       PubKey:    {}", hex::encode(&input.pub_key));
    }
    for (i, output) in tx.outputs.iter().enumerate() {
        println!("     Output {}:", i);
        println!("       Value:  {}", output.value);
        println!("       Script: {}", hex::encode(output.pub_key_hash));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LedgerError;

    fn handler(dir: &std::path::Path) -> CliHandler {
        let cli = Cli::parse_from([
            "pow-ledger",
            "--data-dir",
            dir.to_str().unwrap(),
            "list-addresses",
        ]);
        let mut handler = CliHandler::new(&cli).unwrap();
        handler.config.difficulty_bits = 8;
        handler
    }

    #[test]
    fn test_parse_commands() {
        let cli = Cli::parse_from([
            "pow-ledger", "send", "--from", "a", "--to", "b", "--amount", "3",
        ]);
        assert!(matches!(
            cli.command,
            Commands::Send { ref from, ref to, amount: 3 } if from == "a" && to == "b"
        ));
        assert!(cli.data_dir.is_none());

        let cli = Cli::parse_from(["pow-ledger", "print-chain", "--data-dir", "/tmp/x"]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
    }

    #[tokio::test]
    async fn test_wallet_and_send_flow() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = handler(dir.path());

        handler.handle(Commands::CreateWallet).await.unwrap();
        handler.handle(Commands::CreateWallet).await.unwrap();
        let addresses = handler.keystore.list_addresses();
        assert!(dir.path().join("wallet.json").exists());

        let (alice, bob) = (addresses[0].to_string(), addresses[1].to_string());
        handler
            .handle(Commands::CreateBlockchain { address: alice.clone() })
            .await
            .unwrap();
        handler
            .handle(Commands::Send { from: alice.clone(), to: bob.clone(), amount: 4 })
            .await
            .unwrap();
        handler
            .handle(Commands::Mine { address: bob.clone(), memo: None })
            .await
            .unwrap();
        handler.handle(Commands::VerifyChain).await.unwrap();
        handler.handle(Commands::PrintChain).await.unwrap();

        let ledger = handler.ledger().unwrap();
        let utxo = ledger.utxo();
        assert_eq!(utxo.balance(&addresses[0].pub_key_hash().unwrap()).unwrap(), 6);
        assert_eq!(utxo.balance(&addresses[1].pub_key_hash().unwrap()).unwrap(), 14);
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = handler(dir.path());

        let err = handler
            .handle(Commands::GetBalance { address: "bogus".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAddress(_)));

        let address = handler.keystore.new_address().unwrap().to_string();
        let err = handler
            .handle(Commands::GetBalance { address })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotInitialized));
    }
}

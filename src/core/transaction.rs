// Transaction data structures and the signing protocol

use crate::core::serialize::{read_array, read_len, read_var_bytes, write_varint, write_var_bytes};
use crate::core::{Hash256, PubKeyHash, Serializable, hash160, sha256};
use crate::{LedgerError, Result};
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::{EncodedPoint, FieldBytes};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor, Read};

/// Value created by every coinbase transaction
pub const SUBSIDY: u64 = 10;

/// Output index of a coinbase input (-1 as a 4-byte two's complement field)
pub const COINBASE_INDEX: u32 = u32::MAX;

/// Order of the P-256 group, big-endian
const CURVE_ORDER: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xbc, 0xe6, 0xfa, 0xad, 0xa7, 0x17, 0x9e, 0x84,
    0xf3, 0xb9, 0xca, 0xc2, 0xfc, 0x63, 0x25, 0x51,
];

/// Largest `s` a signature may carry: floor(order / 2)
const HALF_ORDER: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0x80, 0x00, 0x00, 0x00,
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xde, 0x73, 0x7d, 0x56, 0xd3, 0x8b, 0xcf, 0x42,
    0x79, 0xdc, 0xe5, 0x61, 0x7e, 0x31, 0x92, 0xa8,
];

/// Prior transactions referenced by a spend, keyed by id
pub type PrevTransactions = HashMap<Hash256, Transaction>;

/// Names one output of one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Transaction input - references a previous transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Id of the transaction holding the spent output (zero for coinbase)
    pub prev_txid: Hash256,
    /// Index of the output in the previous transaction
    pub prev_index: u32,
    /// r || s, 32 bytes each
    pub signature: Vec<u8>,
    /// Raw public key X || Y of the spender; memo bytes for a coinbase
    pub pub_key: Vec<u8>,
}

impl TxInput {
    /// Create a new unsigned input spending `prev_txid:prev_index`
    pub fn new(prev_txid: Hash256, prev_index: u32, pub_key: Vec<u8>) -> Self {
        Self {
            prev_txid,
            prev_index,
            signature: Vec::new(),
            pub_key,
        }
    }

    /// Create a coinbase input carrying arbitrary memo bytes
    pub fn coinbase(memo: Vec<u8>) -> Self {
        Self {
            prev_txid: Hash256::zero(),
            prev_index: COINBASE_INDEX,
            signature: Vec::new(),
            pub_key: memo,
        }
    }

    /// Check if this is a coinbase input
    pub fn is_coinbase(&self) -> bool {
        self.prev_txid.is_zero() && self.prev_index == COINBASE_INDEX
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.prev_txid, self.prev_index)
    }

    /// Whether this input was made by the owner of `pub_key_hash`
    pub fn uses_key(&self, pub_key_hash: &PubKeyHash) -> bool {
        hash160(&self.pub_key) == *pub_key_hash
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.prev_txid.as_bytes());
        buf.extend_from_slice(&self.prev_index.to_le_bytes());
        write_var_bytes(buf, &self.signature).unwrap();
        write_var_bytes(buf, &self.pub_key).unwrap();
    }

    fn read_from(reader: &mut dyn Read) -> io::Result<Self> {
        Ok(Self {
            prev_txid: Hash256::new(read_array(reader)?),
            prev_index: u32::from_le_bytes(read_array(reader)?),
            signature: read_var_bytes(reader)?,
            pub_key: read_var_bytes(reader)?,
        })
    }
}

/// Transaction output - an amount locked to a public key hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub pub_key_hash: PubKeyHash,
}

impl TxOutput {
    /// Create a new transaction output
    pub fn new(value: u64, pub_key_hash: PubKeyHash) -> Self {
        Self { value, pub_key_hash }
    }

    pub fn is_locked_with(&self, pub_key_hash: &PubKeyHash) -> bool {
        self.pub_key_hash == *pub_key_hash
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        buf.extend_from_slice(&self.pub_key_hash);
    }

    fn read_from(reader: &mut dyn Read) -> io::Result<Self> {
        Ok(Self {
            value: u64::from_le_bytes(read_array(reader)?),
            pub_key_hash: read_array(reader)?,
        })
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Hash of the transaction with this field cleared
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a new transaction and compute its id
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            id: Hash256::zero(),
            inputs,
            outputs,
        };
        tx.id = tx.hash();
        tx
    }

    /// Create a coinbase transaction paying the subsidy to `to`
    pub fn coinbase(to: PubKeyHash, memo: Vec<u8>) -> Self {
        Self::new(
            vec![TxInput::coinbase(memo)],
            vec![TxOutput::new(SUBSIDY, to)],
        )
    }

    /// Check if this is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// SHA256 of the encoding with the id cleared
    pub fn hash(&self) -> Hash256 {
        let mut buf = Vec::new();
        self.write_to(&Hash256::zero(), &mut buf);
        sha256(&buf)
    }

    /// Copy with every signature and public key cleared, the shape that gets signed
    pub fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput::new(input.prev_txid, input.prev_index, Vec::new()))
            .collect();

        Transaction {
            id: self.id,
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// Digest signed by input `index`: the trimmed copy with that input's key
    /// slot holding the lock of the output it spends.
    pub fn signing_digest(&self, index: usize, prev_lock: &PubKeyHash) -> Hash256 {
        let mut copy = self.trimmed_copy();
        copy.inputs[index].pub_key = prev_lock.to_vec();
        copy.hash()
    }

    /// Sign every input with `key`.
    ///
    /// Each input signs its own digest, so a signature cannot be moved to a
    /// different input. Signatures are stored in low-`s` form, the only form
    /// [`Transaction::verify`] accepts. The id is refreshed afterwards.
    pub fn sign(&mut self, key: &SigningKey, prev_txs: &PrevTransactions) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        for index in 0..self.inputs.len() {
            let input = &self.inputs[index];
            let prev_output = referenced_output(input, prev_txs).ok_or_else(|| {
                if prev_txs.contains_key(&input.prev_txid) {
                    LedgerError::OutputNotFound {
                        txid: input.prev_txid,
                        index: input.prev_index,
                    }
                } else {
                    LedgerError::TransactionNotFound(input.prev_txid)
                }
            })?;

            let digest = self.signing_digest(index, &prev_output.pub_key_hash);
            let signature: Signature = key.sign_prehash(digest.as_bytes())?;
            self.inputs[index].signature = encode_low_s(&signature)?;
        }

        self.id = self.hash();
        Ok(())
    }

    /// Verify every input signature against the outputs it spends.
    /// Signatures with a high `s` are rejected.
    pub fn verify(&self, prev_txs: &PrevTransactions) -> bool {
        if self.is_coinbase() {
            return true;
        }

        self.inputs.iter().enumerate().all(|(index, input)| {
            let Some(prev_output) = referenced_output(input, prev_txs) else {
                return false;
            };
            if !input.uses_key(&prev_output.pub_key_hash) {
                return false;
            }

            let (Some(signature), Some(public_key)) = (
                decode_signature(&input.signature),
                decode_public_key(&input.pub_key),
            ) else {
                return false;
            };

            let digest = self.signing_digest(index, &prev_output.pub_key_hash);
            public_key.verify_prehash(digest.as_bytes(), &signature).is_ok()
        })
    }

    /// Calculate total output value
    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|out| out.value).sum()
    }

    fn write_to(&self, id: &Hash256, buf: &mut Vec<u8>) {
        buf.extend_from_slice(id.as_bytes());

        write_varint(buf, self.inputs.len() as u64).unwrap();
        for input in &self.inputs {
            input.write_to(buf);
        }

        write_varint(buf, self.outputs.len() as u64).unwrap();
        for output in &self.outputs {
            output.write_to(buf);
        }
    }

    /// Deserialize from a reader positioned at the start of a transaction
    pub fn from_reader(reader: &mut dyn Read) -> io::Result<Self> {
        let id = Hash256::new(read_array(reader)?);

        let input_count = read_len(reader)?;
        let mut inputs = Vec::with_capacity(input_count.min(64));
        for _ in 0..input_count {
            inputs.push(TxInput::read_from(reader)?);
        }

        let output_count = read_len(reader)?;
        let mut outputs = Vec::with_capacity(output_count.min(64));
        for _ in 0..output_count {
            outputs.push(TxOutput::read_from(reader)?);
        }

        Ok(Self { id, inputs, outputs })
    }

    /// Append the full encoding to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        self.write_to(&self.id, buf);
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let tx = Self::from_reader(&mut cursor).map_err(LedgerError::corrupt)?;
        if cursor.position() != data.len() as u64 {
            return Err(LedgerError::corrupt("trailing bytes after transaction"));
        }
        Ok(tx)
    }
}

fn referenced_output<'a>(input: &TxInput, prev_txs: &'a PrevTransactions) -> Option<&'a TxOutput> {
    let prev_tx = prev_txs.get(&input.prev_txid)?;
    prev_tx.outputs.get(usize::try_from(input.prev_index).ok()?)
}

// Halves are left-padded so minimal-length big-endian integers also decode.
fn split_field_bytes(bytes: &[u8]) -> Option<(FieldBytes, FieldBytes)> {
    if bytes.is_empty() || bytes.len() % 2 != 0 || bytes.len() > 64 {
        return None;
    }
    let (left, right) = bytes.split_at(bytes.len() / 2);

    let mut a = FieldBytes::default();
    let mut b = FieldBytes::default();
    a[32 - left.len()..].copy_from_slice(left);
    b[32 - right.len()..].copy_from_slice(right);
    Some((a, b))
}

fn decode_signature(bytes: &[u8]) -> Option<Signature> {
    let (r, s) = split_field_bytes(bytes)?;
    if s.as_slice() > HALF_ORDER.as_slice() {
        return None;
    }
    Signature::from_scalars(r, s).ok()
}

/// r || s with `s` replaced by `n - s` when it lies above half the order
fn encode_low_s(signature: &Signature) -> Result<Vec<u8>> {
    let bytes = signature.to_bytes();
    let (r, s) = bytes.split_at(32);
    let s = FieldBytes::clone_from_slice(s);
    if s.as_slice() <= HALF_ORDER.as_slice() {
        return Ok(bytes.to_vec());
    }

    let low = Signature::from_scalars(FieldBytes::clone_from_slice(r), mirror_s(&s))?;
    Ok(low.to_bytes().to_vec())
}

/// `n - s` for a non-zero scalar `s` below the order
pub(crate) fn mirror_s(s: &FieldBytes) -> FieldBytes {
    let mut out = FieldBytes::default();
    let mut borrow = 0u8;
    for i in (0..32).rev() {
        let (diff, under) = CURVE_ORDER[i].overflowing_sub(s[i]);
        let (diff, under_borrow) = diff.overflowing_sub(borrow);
        out[i] = diff;
        borrow = u8::from(under || under_borrow);
    }
    out
}

/// Rebuild a P-256 key from raw X || Y
pub fn decode_public_key(bytes: &[u8]) -> Option<VerifyingKey> {
    let (x, y) = split_field_bytes(bytes)?;
    let point = EncodedPoint::from_affine_coordinates(&x, &y, false);
    VerifyingKey::from_encoded_point(&point).ok()
}

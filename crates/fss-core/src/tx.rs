//! EIP-1559 transactions and fee arithmetic for registry writes.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use crate::error::FssError;
use crate::eth;
use alloy_rlp::{BufMut, Decodable, Encodable, Header};

pub const EIP1559_TX_TYPE: u8 = 0x02;

/// Gas limit with 20% headroom, rounded up.
pub fn gas_limit_with_headroom(estimate: U256) -> Result<U256, FssError> {
    estimate
        .checked_mul(U256::from(6u64))
        .and_then(|scaled| scaled.checked_add(U256::from(4u64)))
        .map(|scaled| scaled / U256::from(5u64))
        .ok_or_else(|| FssError::Chain(format!("gas estimate {} overflows the limit", estimate)))
}

/// Fee caps for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
}

impl FeeQuote {
    /// Priority fee is 5% of `gas_price`; the cap covers a doubled base fee on top of it.
    pub fn compute(gas_price: U256, base_fee: Option<U256>) -> Result<Self, FssError> {
        let priority = gas_price
            .checked_mul(U256::from(5u64))
            .map(|scaled| scaled / U256::from(100u64))
            .ok_or_else(|| FssError::Chain(format!("gas price {} overflows", gas_price)))?;
        let max_fee = match base_fee {
            Some(base_fee) => base_fee
                .checked_mul(U256::from(2u64))
                .and_then(|doubled| doubled.checked_add(priority))
                .ok_or_else(|| FssError::Chain(format!("base fee {} overflows", base_fee)))?,
            None => priority,
        };
        Ok(Self {
            max_priority_fee_per_gas: priority,
            max_fee_per_gas: max_fee,
        })
    }
}

struct EmptyAccessList;

impl Encodable for EmptyAccessList {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: 0,
        }
        .encode(out);
    }

    fn length(&self) -> usize {
        1
    }
}

fn rlp_list(fields: &[&dyn Encodable]) -> Vec<u8> {
    let payload_length = fields.iter().map(|field| field.length()).sum();
    let mut out = Vec::new();
    Header {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    for field in fields {
        field.encode(&mut out);
    }
    out
}

/// Type-2 transaction with an empty access list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip1559Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub gas_limit: U256,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl Eip1559Transaction {
    pub fn new(
        chain_id: u64,
        nonce: u64,
        to: Address,
        data: Bytes,
        gas_limit: U256,
        fees: FeeQuote,
    ) -> Self {
        Self {
            chain_id,
            nonce,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            max_fee_per_gas: fees.max_fee_per_gas,
            gas_limit,
            to,
            value: U256::ZERO,
            data,
        }
    }

    fn typed(payload: Vec<u8>) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 1);
        out.push(EIP1559_TX_TYPE);
        out.extend(payload);
        out
    }

    /// Digest the sender signs.
    pub fn signing_hash(&self) -> B256 {
        keccak256(Self::typed(rlp_list(&[
            &self.chain_id,
            &self.nonce,
            &self.max_priority_fee_per_gas,
            &self.max_fee_per_gas,
            &self.gas_limit,
            &self.to,
            &self.value,
            &self.data,
            &EmptyAccessList,
        ])))
    }

    /// Broadcastable envelope carrying the signature.
    pub fn encode_signed(&self, parity: u8, r: &B256, s: &B256) -> Vec<u8> {
        let parity = parity != 0;
        let r = U256::from_be_bytes(r.0);
        let s = U256::from_be_bytes(s.0);
        Self::typed(rlp_list(&[
            &self.chain_id,
            &self.nonce,
            &self.max_priority_fee_per_gas,
            &self.max_fee_per_gas,
            &self.gas_limit,
            &self.to,
            &self.value,
            &self.data,
            &EmptyAccessList,
            &parity,
            &r,
            &s,
        ]))
    }
}

/// A broadcast envelope parsed back into its transaction and signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx: Eip1559Transaction,
    pub parity: u8,
    pub r: B256,
    pub s: B256,
}

impl SignedTransaction {
    pub fn decode(raw: &[u8]) -> Result<Self, String> {
        let (tx_type, mut buf) = raw.split_first().ok_or("empty transaction")?;
        if *tx_type != EIP1559_TX_TYPE {
            return Err(format!("unsupported transaction type 0x{:02x}", tx_type));
        }
        let header = Header::decode(&mut buf).map_err(|err| err.to_string())?;
        if !header.list || header.payload_length != buf.len() {
            return Err("malformed transaction list".to_string());
        }

        fn field<T: Decodable>(buf: &mut &[u8], name: &str) -> Result<T, String> {
            T::decode(buf).map_err(|err| format!("{}: {}", name, err))
        }

        let chain_id: u64 = field(&mut buf, "chainId")?;
        let nonce: u64 = field(&mut buf, "nonce")?;
        let max_priority_fee_per_gas: U256 = field(&mut buf, "maxPriorityFeePerGas")?;
        let max_fee_per_gas: U256 = field(&mut buf, "maxFeePerGas")?;
        let gas_limit: U256 = field(&mut buf, "gasLimit")?;
        let to: Address = field(&mut buf, "to")?;
        let value: U256 = field(&mut buf, "value")?;
        let data: Bytes = field(&mut buf, "data")?;
        let access_list = Header::decode(&mut buf).map_err(|err| err.to_string())?;
        if !access_list.list || access_list.payload_length != 0 {
            return Err("access lists are not supported".to_string());
        }
        let parity: bool = field(&mut buf, "yParity")?;
        let r: U256 = field(&mut buf, "r")?;
        let s: U256 = field(&mut buf, "s")?;
        if !buf.is_empty() {
            return Err("trailing bytes after signature".to_string());
        }

        Ok(Self {
            tx: Eip1559Transaction {
                chain_id,
                nonce,
                max_priority_fee_per_gas,
                max_fee_per_gas,
                gas_limit,
                to,
                value,
                data,
            },
            parity: u8::from(parity),
            r: B256::from(r.to_be_bytes::<32>()),
            s: B256::from(s.to_be_bytes::<32>()),
        })
    }

    /// Address that signed the envelope.
    pub fn sender(&self) -> Result<Address, String> {
        eth::recover_address(&self.tx.signing_hash(), &self.r, &self.s, self.parity)
    }
}

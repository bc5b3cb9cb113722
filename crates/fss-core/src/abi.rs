//! Minimal Solidity ABI encoder/decoder for the shapes the registry contract uses.
//!
//! Decoding is strict: offsets must be word aligned and in bounds, padding must be zero, and
//! address words must carry twelve zero bytes.

use alloy_primitives::{keccak256, Address, U256};

const WORD: usize = 32;
const MAX_ARRAY_LEN: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Uint(U256),
    Address(Address),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<Token>),
    Tuple(Vec<Token>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Uint,
    Address,
    Bytes,
    String,
    Array(Box<ParamType>),
    Tuple(Vec<ParamType>),
}

impl ParamType {
    fn is_dynamic(&self) -> bool {
        match self {
            Self::Uint | Self::Address => false,
            Self::Bytes | Self::String | Self::Array(_) => true,
            Self::Tuple(members) => members.iter().any(ParamType::is_dynamic),
        }
    }

    /// Head size of a static type.
    fn static_size(&self) -> usize {
        match self {
            Self::Tuple(members) => members.iter().map(ParamType::head_size).sum(),
            _ => WORD,
        }
    }

    fn head_size(&self) -> usize {
        if self.is_dynamic() {
            WORD
        } else {
            self.static_size()
        }
    }
}

impl Token {
    fn is_dynamic(&self) -> bool {
        match self {
            Self::Uint(_) | Self::Address(_) => false,
            Self::Bytes(_) | Self::String(_) | Self::Array(_) => true,
            Self::Tuple(members) => members.iter().any(Token::is_dynamic),
        }
    }

    fn head_size(&self) -> usize {
        match self {
            Self::Tuple(members) if !self.is_dynamic() => members.iter().map(Token::head_size).sum(),
            _ => WORD,
        }
    }
}

/// First four bytes of the keccak hash of a canonical function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Encodes `tokens` as a top-level parameter list, like `abi.encode(a, b, ...)`.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    encode_sequence(tokens)
}

/// Selector followed by the encoded arguments.
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend(encode(tokens));
    out
}

fn encode_sequence(tokens: &[Token]) -> Vec<u8> {
    let head_len: usize = tokens.iter().map(Token::head_size).sum();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&uint_word(head_len + tail.len()));
            tail.extend(encode_token(token));
        } else {
            head.extend(encode_token(token));
        }
    }

    head.extend(tail);
    head
}

fn encode_token(token: &Token) -> Vec<u8> {
    match token {
        Token::Uint(value) => value.to_be_bytes::<32>().to_vec(),
        Token::Address(address) => {
            let mut word = [0u8; WORD];
            word[12..].copy_from_slice(address.as_slice());
            word.to_vec()
        }
        Token::Bytes(bytes) => encode_packed_bytes(bytes),
        Token::String(text) => encode_packed_bytes(text.as_bytes()),
        Token::Array(items) => {
            let mut out = uint_word(items.len()).to_vec();
            out.extend(encode_sequence(items));
            out
        }
        Token::Tuple(members) => encode_sequence(members),
    }
}

fn encode_packed_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = uint_word(bytes.len()).to_vec();
    out.extend_from_slice(bytes);
    let padding = (WORD - bytes.len() % WORD) % WORD;
    out.extend(std::iter::repeat(0u8).take(padding));
    out
}

fn uint_word(value: usize) -> [u8; WORD] {
    U256::from(value).to_be_bytes::<32>()
}

/// Decodes a top-level parameter list.
pub fn decode(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>, String> {
    let mut decoder = Decoder { data };
    decoder.decode_sequence(types, 0)
}

struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    fn word(&self, at: usize) -> Result<&'a [u8], String> {
        let end = at
            .checked_add(WORD)
            .ok_or_else(|| "offset overflow".to_string())?;
        self.data
            .get(at..end)
            .ok_or_else(|| format!("word at {} is out of bounds (len {})", at, self.data.len()))
    }

    fn usize_at(&self, at: usize) -> Result<usize, String> {
        let word = self.word(at)?;
        if word[..24].iter().any(|b| *b != 0) {
            return Err(format!("value at {} does not fit in usize", at));
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&word[24..]);
        usize::try_from(u64::from_be_bytes(raw)).map_err(|_| format!("value at {} too large", at))
    }

    fn decode_sequence(&mut self, types: &[ParamType], base: usize) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::with_capacity(types.len());
        let mut cursor = base;
        for kind in types {
            if kind.is_dynamic() {
                let offset = self.usize_at(cursor)?;
                if offset % WORD != 0 {
                    return Err(format!("misaligned offset {}", offset));
                }
                let target = base
                    .checked_add(offset)
                    .ok_or_else(|| "offset overflow".to_string())?;
                tokens.push(self.decode_at(kind, target)?);
            } else {
                tokens.push(self.decode_at(kind, cursor)?);
            }
            cursor += kind.head_size();
        }
        Ok(tokens)
    }

    fn decode_at(&mut self, kind: &ParamType, at: usize) -> Result<Token, String> {
        match kind {
            ParamType::Uint => Ok(Token::Uint(U256::from_be_slice(self.word(at)?))),
            ParamType::Address => {
                let word = self.word(at)?;
                if word[..12].iter().any(|b| *b != 0) {
                    return Err(format!("address word at {} has dirty high bytes", at));
                }
                Ok(Token::Address(Address::from_slice(&word[12..])))
            }
            ParamType::Bytes => Ok(Token::Bytes(self.packed_bytes(at)?)),
            ParamType::String => {
                let raw = self.packed_bytes(at)?;
                String::from_utf8(raw)
                    .map(Token::String)
                    .map_err(|_| format!("string at {} is not utf-8", at))
            }
            ParamType::Array(item) => {
                let len = self.usize_at(at)?;
                if len > MAX_ARRAY_LEN {
                    return Err(format!("array length {} exceeds limit", len));
                }
                let items = vec![(**item).clone(); len];
                Ok(Token::Array(self.decode_sequence(&items, at + WORD)?))
            }
            ParamType::Tuple(members) => Ok(Token::Tuple(self.decode_sequence(members, at)?)),
        }
    }

    fn packed_bytes(&self, at: usize) -> Result<Vec<u8>, String> {
        let len = self.usize_at(at)?;
        let start = at + WORD;
        let end = start
            .checked_add(len)
            .ok_or_else(|| "length overflow".to_string())?;
        let bytes = self
            .data
            .get(start..end)
            .ok_or_else(|| format!("byte string at {} overruns input", at))?;
        let padded_end = end + (WORD - len % WORD) % WORD;
        if let Some(padding) = self.data.get(end..padded_end) {
            if padding.iter().any(|b| *b != 0) {
                return Err(format!("byte string at {} has non-zero padding", at));
            }
        } else {
            return Err(format!("byte string at {} is missing padding", at));
        }
        Ok(bytes.to_vec())
    }
}

//! Ethereum primitives shared by the codec, broker and registry client.

use alloy_primitives::{keccak256, Address, B256, U256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

/// Decimals assumed for spend amounts when converting to base units.
pub const DEFAULT_TOKEN_DECIMALS: u32 = 18;

/// Parses a `0x`-prefixed, 40-hex-digit address.
///
/// Mixed-case input is accepted without checksum validation; callers normalize through
/// [`checksum`] before persisting or comparing.
pub fn parse_address(value: &str) -> Result<Address, String> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| format!("address '{}' must start with 0x", value))?;
    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("address '{}' must be 40 hex digits", value));
    }
    let bytes = hex::decode(digits).map_err(|err| format!("address '{}': {}", value, err))?;
    Ok(Address::from_slice(&bytes))
}

/// EIP-55 mixed-case representation.
pub fn checksum(address: &Address) -> String {
    address.to_checksum(None)
}

/// Parses a non-negative base-10 integer that fits in 256 bits.
pub fn parse_uint(value: &str) -> Result<U256, String> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("'{}' is not a non-negative integer", value));
    }
    U256::from_str_radix(value, 10).map_err(|_| format!("'{}' does not fit in uint256", value))
}

/// Converts a decimal amount such as `"1.5"` into base units with the given decimals.
pub fn parse_units(value: &str, decimals: u32) -> Result<U256, String> {
    let value = value.trim();
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (value, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(format!("'{}' is not a decimal amount", value));
    }
    let digits_only = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    if !digits_only(whole) || !digits_only(fraction) || (value.contains('.') && fraction.is_empty())
    {
        return Err(format!("'{}' is not a decimal amount", value));
    }
    if fraction.len() > decimals as usize {
        return Err(format!(
            "'{}' has more than {} fractional digits",
            value, decimals
        ));
    }

    let overflow = || format!("'{}' does not fit in uint256", value);
    let mut scale = U256::from(1u64);
    for _ in 0..decimals {
        scale = scale.checked_mul(U256::from(10u64)).ok_or_else(overflow)?;
    }

    let whole = if whole.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(whole, 10).map_err(|_| overflow())?
    };
    let padded = format!("{:0<width$}", fraction, width = decimals as usize);
    let fraction = if padded.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(&padded, 10).map_err(|_| overflow())?
    };

    whole
        .checked_mul(scale)
        .and_then(|base| base.checked_add(fraction))
        .ok_or_else(overflow)
}

/// Hash signed by `personal_sign`.
pub fn eip191_hash(message: &[u8]) -> B256 {
    let mut payload = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    payload.extend_from_slice(message);
    keccak256(payload)
}

pub fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Derives the address of a hex-encoded SEC1 public key (compressed or not).
pub fn address_from_public_key(public_key: &str) -> Result<Address, String> {
    let raw = hex::decode(public_key.trim_start_matches("0x"))
        .map_err(|err| format!("public key is not hex: {}", err))?;
    let key = VerifyingKey::from_sec1_bytes(&raw)
        .map_err(|err| format!("public key is not a secp256k1 point: {}", err))?;
    Ok(address_from_verifying_key(&key))
}

/// Maps legacy `v` values (27/28) to a 0/1 parity.
pub fn normalize_recovery_id(v: u8) -> Result<u8, String> {
    match v {
        0 | 1 => Ok(v),
        27 | 28 => Ok(v - 27),
        other => Err(format!("unsupported recovery id {}", other)),
    }
}

/// Recovers the signer of a 32-byte digest for one recovery parity.
pub fn recover_address(digest: &B256, r: &B256, s: &B256, parity: u8) -> Result<Address, String> {
    let mut raw = [0u8; 64];
    raw[..32].copy_from_slice(r.as_slice());
    raw[32..].copy_from_slice(s.as_slice());
    let signature =
        Signature::from_slice(&raw).map_err(|err| format!("malformed signature: {}", err))?;
    let recovery_id =
        RecoveryId::from_byte(parity).ok_or_else(|| format!("invalid parity {}", parity))?;
    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &signature, recovery_id)
        .map_err(|err| format!("recovery failed: {}", err))?;
    Ok(address_from_verifying_key(&key))
}

/// Signs a digest and returns `(r, s, parity)`.
pub fn sign_digest(key: &SigningKey, digest: &B256) -> Result<(B256, B256, u8), String> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(digest.as_slice())
        .map_err(|err| format!("signing failed: {}", err))?;
    let bytes = signature.to_bytes();
    Ok((
        B256::from_slice(&bytes[..32]),
        B256::from_slice(&bytes[32..]),
        recovery_id.to_byte(),
    ))
}

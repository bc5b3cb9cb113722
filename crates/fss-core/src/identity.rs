use crate::error::FssError;
use crate::eth;
use crate::types::AuthSig;
use alloy_primitives::{Address, B256};
use k256::ecdsa::SigningKey;
use std::fmt;

pub const DERIVED_VIA_PERSONAL_SIGN: &str = "web3.eth.personal.sign";

/// The owner's secp256k1 key. Authorizes quota delegations and session credentials.
pub struct ActorIdentity {
    key: SigningKey,
    address: Address,
}

impl ActorIdentity {
    pub fn from_signing_key(key: SigningKey) -> Self {
        let address = eth::address_from_verifying_key(key.verifying_key());
        Self { key, address }
    }

    pub fn from_private_key_hex(private_key: &str) -> Result<Self, FssError> {
        let raw = hex::decode(private_key.trim().trim_start_matches("0x"))
            .map_err(|err| FssError::Config(format!("private key is not hex: {}", err)))?;
        let key = SigningKey::from_slice(&raw)
            .map_err(|_| FssError::Config("private key is not a valid secp256k1 scalar".to_string()))?;
        Ok(Self::from_signing_key(key))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn checksum_address(&self) -> String {
        eth::checksum(&self.address)
    }

    /// EIP-191 signature over `message`, packaged as an [`AuthSig`].
    pub fn personal_sign(&self, message: &str) -> Result<AuthSig, FssError> {
        let digest = eth::eip191_hash(message.as_bytes());
        let (r, s, parity) = eth::sign_digest(&self.key, &digest)
            .map_err(|err| FssError::InitializationFailed(format!("actor signing: {}", err)))?;

        let mut raw = Vec::with_capacity(65);
        raw.extend_from_slice(r.as_slice());
        raw.extend_from_slice(s.as_slice());
        raw.push(parity + 27);

        Ok(AuthSig {
            sig: format!("0x{}", hex::encode(raw)),
            derived_via: DERIVED_VIA_PERSONAL_SIGN.to_string(),
            signed_message: message.to_string(),
            address: self.checksum_address(),
        })
    }
}

impl fmt::Debug for ActorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorIdentity")
            .field("address", &self.checksum_address())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Recovers the signer of an [`AuthSig`] and checks it against the claimed address.
pub fn verify_auth_sig(auth: &AuthSig) -> Result<Address, FssError> {
    let raw = hex::decode(auth.sig.trim_start_matches("0x"))
        .map_err(|err| FssError::Network(format!("auth sig is not hex: {}", err)))?;
    if raw.len() != 65 {
        return Err(FssError::Network(format!(
            "auth sig must be 65 bytes, got {}",
            raw.len()
        )));
    }
    let parity = eth::normalize_recovery_id(raw[64]).map_err(FssError::Network)?;
    let digest = eth::eip191_hash(auth.signed_message.as_bytes());
    let recovered = eth::recover_address(
        &digest,
        &B256::from_slice(&raw[..32]),
        &B256::from_slice(&raw[32..64]),
        parity,
    )
    .map_err(FssError::Network)?;

    let claimed = eth::parse_address(&auth.address).map_err(FssError::Network)?;
    if recovered != claimed {
        return Err(FssError::Network(format!(
            "auth sig signed by {} but claims {}",
            eth::checksum(&recovered),
            auth.address
        )));
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn personal_sign_verifies_and_debug_hides_key() {
        let actor = ActorIdentity::from_private_key_hex(&format!("0x{}", "11".repeat(32))).unwrap();
        let auth = actor.personal_sign("hello").unwrap();
        assert_eq!(verify_auth_sig(&auth).unwrap(), actor.address());
        assert!(format!("{:?}", actor).contains("<redacted>"));

        let mut forged = auth.clone();
        forged.signed_message = "goodbye".to_string();
        assert!(verify_auth_sig(&forged).is_err());
    }

    #[test]
    fn rejects_bad_private_keys() {
        assert!(ActorIdentity::from_private_key_hex("0xnothex").is_err());
        assert!(ActorIdentity::from_private_key_hex(&"00".repeat(32)).is_err());
    }
}

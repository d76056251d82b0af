use ed25519_dalek::{Signature, VerifyingKey, PUBLIC_KEY_LENGTH};

use crate::{Verifier, WalletError};

/// Verifies ed25519 signatures against hex-encoded verifying-key addresses.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519Verifier;

impl Ed25519Verifier {
    fn key_for(address: &str) -> Result<VerifyingKey, WalletError> {
        let invalid = || WalletError::InvalidAddress(address.to_string());
        let raw = hex::decode(address).map_err(|_| invalid())?;
        let bytes: [u8; PUBLIC_KEY_LENGTH] = raw.try_into().map_err(|_| invalid())?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| invalid())
    }
}

impl Verifier for Ed25519Verifier {
    fn verify(&self, address: &str, msg: &[u8], signature: &[u8]) -> Result<(), WalletError> {
        let key = Self::key_for(address)?;
        let sig = Signature::from_slice(signature).map_err(|_| WalletError::InvalidSignature)?;
        key.verify_strict(msg, &sig)
            .map_err(|_| WalletError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use proptest::prelude::*;

    #[test]
    fn test_rejects_bad_address() {
        assert!(matches!(
            Ed25519Verifier.verify("not-hex", b"m", &[0u8; 64]),
            Err(WalletError::InvalidAddress(_))
        ));
        assert!(matches!(
            Ed25519Verifier.verify("abcd", b"m", &[0u8; 64]),
            Err(WalletError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_rejects_short_signature() {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let addr = crate::address_of(&key);
        assert!(matches!(
            Ed25519Verifier.verify(&addr, b"m", &[1u8; 10]),
            Err(WalletError::InvalidSignature)
        ));
    }

    proptest! {
        #[test]
        fn prop_signature_binds_message(msg in prop::collection::vec(any::<u8>(), 0..128), flip in 0usize..128) {
            let key = SigningKey::from_bytes(&[5u8; 32]);
            let addr = crate::address_of(&key);
            let sig = key.sign(&msg).to_bytes();
            prop_assert!(Ed25519Verifier.verify(&addr, &msg, &sig).is_ok());

            if !msg.is_empty() {
                let mut tampered = msg.clone();
                let i = flip % tampered.len();
                tampered[i] ^= 0x01;
                prop_assert!(Ed25519Verifier.verify(&addr, &tampered, &sig).is_err());
            }
        }
    }
}

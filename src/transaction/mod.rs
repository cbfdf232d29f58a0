use std::collections::BTreeSet;

use crowdfund_core::instruction::Instruction;
use crowdfund_core::Pubkey;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Instructions plus the account paying fees. `nonce` keeps otherwise
/// identical messages distinct.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub fee_payer: Pubkey,
    pub nonce: u64,
    pub instructions: Vec<Instruction>,
}

impl Message {
    pub fn new(fee_payer: Pubkey, nonce: u64, instructions: Vec<Instruction>) -> Self {
        Self {
            fee_payer,
            nonce,
            instructions,
        }
    }

    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.fee_payer.as_ref());
        hasher.update(self.nonce.to_le_bytes());
        hasher.update((self.instructions.len() as u64).to_le_bytes());
        for ix in &self.instructions {
            hasher.update(ix.program_id.as_ref());
            hasher.update((ix.accounts.len() as u64).to_le_bytes());
            for meta in &ix.accounts {
                hasher.update(meta.pubkey.as_ref());
                hasher.update([meta.is_signer as u8, meta.is_writable as u8]);
            }
            hasher.update((ix.data.len() as u64).to_le_bytes());
            hasher.update(&ix.data);
        }
        hasher.finalize().into()
    }

    /// Keys that must sign: the fee payer first, then every signer account
    /// in instruction order, without duplicates.
    pub fn required_signers(&self) -> Vec<Pubkey> {
        let mut seen = BTreeSet::new();
        let mut keys = Vec::new();
        let metas = self
            .instructions
            .iter()
            .flat_map(|ix| ix.accounts.iter())
            .filter(|meta| meta.is_signer)
            .map(|meta| meta.pubkey);
        for key in std::iter::once(self.fee_payer).chain(metas) {
            if seen.insert(key) {
                keys.push(key);
            }
        }
        keys
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignerSignature {
    pub signer: Pubkey,
    #[serde(with = "crate::transaction::serde_bytes")]
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub message: Message,
    pub signatures: Vec<SignerSignature>,
}

impl Transaction {
    /// Sign `message` with whichever of `keys` it requires.
    pub fn new_signed(message: Message, keys: &[&SigningKey]) -> Result<Self, VerificationError> {
        let digest = message.digest();
        let mut signatures = Vec::new();
        for required in message.required_signers() {
            let key = keys
                .iter()
                .find(|k| Pubkey::from(k.verifying_key()) == required)
                .ok_or(VerificationError::MissingSignature(required))?;
            signatures.push(SignerSignature {
                signer: required,
                signature: key.sign(&digest).to_bytes().to_vec(),
            });
        }
        Ok(Self {
            message,
            signatures,
        })
    }

    /// Hex of the fee payer's signature, used as the transaction id.
    pub fn id(&self) -> String {
        self.signatures
            .first()
            .map(|s| hex::encode(&s.signature))
            .unwrap_or_default()
    }

    /// Check every signature strictly and that all required signers signed.
    /// Returns the set of verified signers.
    pub fn verify(&self) -> Result<BTreeSet<Pubkey>, VerificationError> {
        let digest = self.message.digest();
        let mut verified = BTreeSet::new();
        for sig in &self.signatures {
            let key = VerifyingKey::from_bytes(&sig.signer.to_bytes())
                .map_err(|_| VerificationError::MalformedKey(sig.signer))?;
            let signature = Signature::from_slice(&sig.signature)
                .map_err(|_| VerificationError::MalformedSignature(sig.signer))?;
            key.verify_strict(&digest, &signature)
                .map_err(|_| VerificationError::InvalidSignature(sig.signer))?;
            verified.insert(sig.signer);
        }
        for required in self.message.required_signers() {
            if !verified.contains(&required) {
                return Err(VerificationError::MissingSignature(required));
            }
        }
        Ok(verified)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("signer {0} is not a valid ed25519 key")]
    MalformedKey(Pubkey),
    #[error("malformed signature from {0}")]
    MalformedSignature(Pubkey),
    #[error("invalid signature from {0}")]
    InvalidSignature(Pubkey),
    #[error("missing signature from {0}")]
    MissingSignature(Pubkey),
}

pub(crate) mod serde_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crowdfund_core::instruction::{donate, withdraw};
    use rand::rngs::OsRng;

    fn keypair() -> (SigningKey, Pubkey) {
        let sk = SigningKey::generate(&mut OsRng);
        let pk = Pubkey::from(sk.verifying_key());
        (sk, pk)
    }

    fn program() -> Pubkey {
        Pubkey::new_from_array([9u8; 32])
    }

    #[test]
    fn signs_and_verifies_all_required_signers() {
        let (payer_sk, payer) = keypair();
        let (donor_sk, donor) = keypair();
        let campaign = Pubkey::new_from_array([1u8; 32]);
        let vault = Pubkey::new_from_array([2u8; 32]);
        let message = Message::new(payer, 1, vec![donate(&program(), &donor, &campaign, &vault, 5)]);
        assert_eq!(message.required_signers(), vec![payer, donor]);

        let tx = Transaction::new_signed(message, &[&payer_sk, &donor_sk]).unwrap();
        let signers = tx.verify().unwrap();
        assert!(signers.contains(&payer));
        assert!(signers.contains(&donor));
        assert_eq!(tx.id().len(), 128);
    }

    #[test]
    fn signing_without_a_required_key_fails() {
        let (payer_sk, payer) = keypair();
        let (_, authority) = keypair();
        let message = Message::new(
            payer,
            1,
            vec![withdraw(&program(), &authority, &payer, &payer)],
        );
        let err = Transaction::new_signed(message, &[&payer_sk]).unwrap_err();
        assert!(matches!(err, VerificationError::MissingSignature(k) if k == authority));
    }

    #[test]
    fn tampered_message_fails_verification() {
        let (payer_sk, payer) = keypair();
        let campaign = Pubkey::new_from_array([1u8; 32]);
        let vault = Pubkey::new_from_array([2u8; 32]);
        let message = Message::new(payer, 1, vec![donate(&program(), &payer, &campaign, &vault, 5)]);
        let mut tx = Transaction::new_signed(message, &[&payer_sk]).unwrap();
        tx.message.instructions[0].data[1] = 50;
        assert!(matches!(
            tx.verify().unwrap_err(),
            VerificationError::InvalidSignature(k) if k == payer
        ));
    }

    #[test]
    fn dropped_signature_is_reported_missing() {
        let (payer_sk, payer) = keypair();
        let (donor_sk, donor) = keypair();
        let campaign = Pubkey::new_from_array([1u8; 32]);
        let message = Message::new(payer, 7, vec![donate(&program(), &donor, &campaign, &campaign, 1)]);
        let mut tx = Transaction::new_signed(message, &[&payer_sk, &donor_sk]).unwrap();
        tx.signatures.pop();
        assert!(matches!(
            tx.verify().unwrap_err(),
            VerificationError::MissingSignature(k) if k == donor
        ));
    }

    #[test]
    fn nonce_changes_digest() {
        let payer = Pubkey::new_from_array([1u8; 32]);
        let a = Message::new(payer, 1, vec![]);
        let b = Message::new(payer, 2, vec![]);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn json_round_trip_keeps_signatures_valid() {
        let (payer_sk, payer) = keypair();
        let message = Message::new(payer, 3, vec![]);
        let tx = Transaction::new_signed(message, &[&payer_sk]).unwrap();
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        back.verify().unwrap();
        assert_eq!(back, tx);
    }
}

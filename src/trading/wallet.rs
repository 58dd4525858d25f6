//! Wallet signing
//!
//! The venue returns a fully built transaction with an empty fee-payer
//! signature. Signing parses just enough of the wire format to find the
//! message bytes and overwrites signature slot 0.
//!
//! Wire layout: `compact-u16 signature count | count * 64-byte signatures | message`

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use solana_keypair::Keypair;
use solana_signer::Signer;

const SIGNATURE_LEN: usize = 64;

#[derive(Debug)]
pub enum SignError {
    InvalidKey(String),
    PubkeyMismatch { expected: String, derived: String },
    Encoding(String),
    Malformed(&'static str),
    Signer(String),
}

impl std::fmt::Display for SignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignError::InvalidKey(msg) => write!(f, "Invalid wallet key: {}", msg),
            SignError::PubkeyMismatch { expected, derived } => write!(
                f,
                "Wallet key mismatch: configured {}, key derives {}",
                expected, derived
            ),
            SignError::Encoding(msg) => write!(f, "Transaction encoding error: {}", msg),
            SignError::Malformed(msg) => write!(f, "Malformed transaction: {}", msg),
            SignError::Signer(msg) => write!(f, "Signing failed: {}", msg),
        }
    }
}

impl std::error::Error for SignError {}

pub trait TransactionSigner: Send + Sync {
    /// Base58 public key of the fee payer
    fn pubkey(&self) -> String;

    /// Sign an unsigned base64 transaction, returning it base64-encoded
    fn sign_transaction(&self, unsigned_tx: &str) -> Result<String, SignError>;
}

/// Read a compact-u16 length prefix, returning `(value, bytes consumed)`
fn read_compact_u16(bytes: &[u8]) -> Result<(usize, usize), SignError> {
    let mut value = 0usize;

    for (i, byte) in bytes.iter().take(3).enumerate() {
        value |= ((byte & 0x7f) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    Err(SignError::Malformed("bad signature count prefix"))
}

pub struct KeypairSigner {
    keypair: Keypair,
}

impl KeypairSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// Load a base58 64-byte keypair, checking it against `expected_pubkey` if given
    pub fn from_base58(private_key: &str, expected_pubkey: Option<&str>) -> Result<Self, SignError> {
        let bytes = bs58::decode(private_key.trim())
            .into_vec()
            .map_err(|e| SignError::InvalidKey(e.to_string()))?;

        let keypair =
            Keypair::try_from(bytes.as_slice()).map_err(|e| SignError::InvalidKey(e.to_string()))?;

        let derived = keypair.pubkey().to_string();
        if let Some(expected) = expected_pubkey {
            if expected != derived {
                return Err(SignError::PubkeyMismatch {
                    expected: expected.to_string(),
                    derived,
                });
            }
        }

        Ok(Self { keypair })
    }
}

impl TransactionSigner for KeypairSigner {
    fn pubkey(&self) -> String {
        self.keypair.pubkey().to_string()
    }

    fn sign_transaction(&self, unsigned_tx: &str) -> Result<String, SignError> {
        let mut tx = BASE64
            .decode(unsigned_tx.trim())
            .map_err(|e| SignError::Encoding(e.to_string()))?;

        let (count, prefix) = read_compact_u16(&tx)?;
        if count == 0 {
            return Err(SignError::Malformed("transaction has no signature slots"));
        }

        let message_start = prefix + count * SIGNATURE_LEN;
        if tx.len() <= message_start {
            return Err(SignError::Malformed("transaction shorter than its signatures"));
        }

        let signature = self
            .keypair
            .try_sign_message(&tx[message_start..])
            .map_err(|e| SignError::Signer(e.to_string()))?;

        tx[prefix..prefix + SIGNATURE_LEN].copy_from_slice(signature.as_ref());
        Ok(BASE64.encode(tx))
    }
}

use anyhow::{anyhow, Result};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

/// A wallet keypair. The address is the hex of the compressed public key,
/// so the transaction `sender` field doubles as the verification key.
pub struct Wallet {
    secret: SecretKey,
    public: PublicKey,
}

impl Wallet {
    /// Generate a fresh secp256k1 keypair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret, public) = secp.generate_keypair(&mut rand::thread_rng());
        Wallet { secret, public }
    }

    pub fn address(&self) -> String {
        hex::encode(self.public.serialize())
    }

    /// Sign a 32-byte transaction hash (hex-encoded). Returns the compact
    /// signature as hex.
    pub fn sign_hash(&self, hash_hex: &str) -> Result<String> {
        let digest = digest_from_hex(hash_hex)?;
        let secp = Secp256k1::new();
        let sig = secp.sign_ecdsa(&Message::from_digest(digest), &self.secret);
        Ok(hex::encode(sig.serialize_compact()))
    }
}

/// Verify an ECDSA signature over a transaction hash. `sender_hex` is the
/// signer's compressed public key. Any malformed input verifies as false.
pub fn verify_signature(hash_hex: &str, sender_hex: &str, signature_hex: &str) -> bool {
    let digest = match digest_from_hex(hash_hex) {
        Ok(d) => d,
        Err(_) => return false,
    };
    let pubkey_bytes = match hex::decode(sender_hex) {
        Ok(b) => b,
        Err(_) => return false,
    };
    let pubkey = match PublicKey::from_slice(&pubkey_bytes) {
        Ok(p) => p,
        Err(_) => return false,
    };
    let sig_bytes = match hex::decode(signature_hex) {
        Ok(b) => b,
        Err(_) => return false,
    };
    let sig = match Signature::from_compact(&sig_bytes) {
        Ok(s) => s,
        Err(_) => return false,
    };

    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(&Message::from_digest(digest), &sig, &pubkey)
        .is_ok()
}

fn digest_from_hex(hash_hex: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hash_hex)?;
    if bytes.len() != 32 {
        return Err(anyhow!(
            "invalid hash length for signing: expected 32 bytes, got {}",
            bytes.len()
        ));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

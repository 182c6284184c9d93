use crate::config::NetworkType;
use crate::error::{MaspError, MaspResult};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use bech32::{Bech32m, Hrp};
use bip32::{DerivationPath, XPrv};
use bip39::Mnemonic;
use blake2b_simd::Params;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// ZIP-32 purpose for shielded key trees.
pub const SHIELDED_PURPOSE: u32 = 32;

pub const SEED_LEN: usize = 64;
pub const VIEWING_KEY_LEN: usize = 32;
pub const DIVERSIFIER_LEN: usize = 11;
pub const PAYMENT_ADDRESS_LEN: usize = DIVERSIFIER_LEN + 32;

const VIEWING_KEY_PERSONAL: &[u8; 16] = b"MASP_ExpandViewK";
const SPENDING_KEY_PERSONAL: &[u8; 16] = b"MASP_ExpandSpenK";
const DIVERSIFIER_PERSONAL: &[u8; 16] = b"MASP_Diversifier";
const TRANSMISSION_PERSONAL: &[u8; 16] = b"MASP_PaymentAddr";
const FINGERPRINT_PERSONAL: &[u8; 16] = b"MASP_SeedFprint_";

/// The BIP-39 seed. Wiped from memory on drop and never serialized.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret([u8; SEED_LEN]);

impl MasterSecret {

    pub fn as_bytes(&self) -> &[u8; SEED_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterSecret(..)")
    }
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewingKey {
    /// Derivation path, unique per wallet.
    pub id: String,

    pub account: u32,

    /// bech32m encoding of the viewing material.
    pub encoded: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    pub created_at: String,
}

impl ViewingKey {
    /// Decodes the 32 bytes of viewing material, checking the network prefix.
    pub fn material(&self, network: NetworkType) -> MaspResult<[u8; VIEWING_KEY_LEN]> {
        let (hrp, data) = bech32::decode(&self.encoded)?;
        if hrp.as_str() != network.viewing_key_hrp() {
            return Err(MaspError::Crypto(format!(
                "Viewing key {} has prefix '{}', expected '{}'",
                self.id,
                hrp,
                network.viewing_key_hrp()
            )));
        }
        data.as_slice().try_into().map_err(|_| {
            MaspError::Crypto(format!(
                "Viewing key {} must be {} bytes, got {}",
                self.id,
                VIEWING_KEY_LEN,
                data.len()
            ))
        })
    }
}

/// Master secret encrypted at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {

    pub encrypted_data: Vec<u8>,

    pub nonce: Vec<u8>,

    pub salt: Vec<u8>,
}


pub fn derive(mnemonic: &Mnemonic) -> MasterSecret {
    MasterSecret(mnemonic.to_seed(""))
}


pub fn account_path(coin_type: u32, account: u32) -> String {
    format!("m/{}'/{}'/{}'", SHIELDED_PURPOSE, coin_type, account)
}

/// Derives the viewing key of `account` under `m/32'/coin_type'/account'`.
pub fn derive_viewing_key(
    master: &MasterSecret,
    account: u32,
    network: NetworkType,
    coin_type: u32,
) -> MaspResult<ViewingKey> {
    let path = account_path(coin_type, account);
    let derivation_path = DerivationPath::from_str(&path)?;

    // Derive the child key step by step
    let child = XPrv::derive_from_path(master.as_bytes(), &derivation_path)?;
    let public_key = child.public_key().to_bytes();
    let chain_code = child.attrs().chain_code;

    let hash = Params::new()
        .hash_length(VIEWING_KEY_LEN)
        .personal(VIEWING_KEY_PERSONAL)
        .to_state()
        .update(&public_key)
        .update(&chain_code)
        .finalize();

    let hrp = Hrp::parse(network.viewing_key_hrp())
        .map_err(|e| MaspError::Crypto(format!("Invalid viewing key prefix: {}", e)))?;
    let encoded = bech32::encode::<Bech32m>(hrp, hash.as_bytes())?;

    Ok(ViewingKey {
        id: path,
        account,
        encoded,
        alias: None,
        created_at: chrono::Utc::now().to_rfc3339(),
    })
}

/// Derives the spending key of `account`. Never persisted: callers get it
/// only by unsealing the master secret, and the buffer is wiped on drop.
pub fn derive_spending_key(
    master: &MasterSecret,
    account: u32,
    network: NetworkType,
    coin_type: u32,
) -> MaspResult<Zeroizing<String>> {
    let derivation_path = DerivationPath::from_str(&account_path(coin_type, account))?;
    let child = XPrv::derive_from_path(master.as_bytes(), &derivation_path)?;
    let private_key = Zeroizing::new(child.to_bytes());
    let chain_code = Zeroizing::new(child.attrs().chain_code);

    let hash = Params::new()
        .hash_length(32)
        .personal(SPENDING_KEY_PERSONAL)
        .to_state()
        .update(&private_key[..])
        .update(&chain_code[..])
        .finalize();
    let material = Zeroizing::new(*hash.as_array());

    let hrp = Hrp::parse(network.spending_key_hrp())
        .map_err(|e| MaspError::Crypto(format!("Invalid spending key prefix: {}", e)))?;
    Ok(Zeroizing::new(bech32::encode::<Bech32m>(hrp, &material[..32])?))
}

/// Derives the diversified payment address at `index`. Pure in (key, index).
pub fn derive_payment_address(
    viewing_key: &ViewingKey,
    index: u32,
    network: NetworkType,
) -> MaspResult<String> {
    let material = viewing_key.material(network)?;

    let diversifier = Params::new()
        .hash_length(DIVERSIFIER_LEN)
        .key(&material)
        .personal(DIVERSIFIER_PERSONAL)
        .to_state()
        .update(&index.to_le_bytes())
        .finalize();

    let transmission_key = Params::new()
        .hash_length(32)
        .personal(TRANSMISSION_PERSONAL)
        .to_state()
        .update(&material)
        .update(diversifier.as_bytes())
        .finalize();

    let mut raw = [0u8; PAYMENT_ADDRESS_LEN];
    raw[..DIVERSIFIER_LEN].copy_from_slice(diversifier.as_bytes());
    raw[DIVERSIFIER_LEN..].copy_from_slice(transmission_key.as_bytes());

    let hrp = Hrp::parse(network.payment_address_hrp())
        .map_err(|e| MaspError::Crypto(format!("Invalid address prefix: {}", e)))?;
    Ok(bech32::encode::<Bech32m>(hrp, &raw)?)
}

/// One-way identifier of a seed, used to tell wallets apart without the secret.
pub fn seed_fingerprint(master: &MasterSecret) -> String {
    let hash = Params::new()
        .hash_length(32)
        .personal(FINGERPRINT_PERSONAL)
        .hash(master.as_bytes());
    hex::encode(hash.as_bytes())
}


pub fn fingerprint_matches(master: &MasterSecret, fingerprint: &str) -> bool {
    let candidate = seed_fingerprint(master);
    candidate.as_bytes().ct_eq(fingerprint.as_bytes()).into()
}


pub fn seal(master: &MasterSecret, passphrase: &str, iterations: u32) -> MaspResult<SealedSecret> {
    warn_if_unprotected(passphrase);

    // Generate random salt and nonce
    let mut salt = [0u8; 32];
    let mut nonce = [0u8; 12];
    OsRng
        .try_fill_bytes(&mut salt)
        .and_then(|_| OsRng.try_fill_bytes(&mut nonce))
        .map_err(|e| MaspError::InsufficientEntropy(e.to_string()))?;

    let cipher = cipher_for(passphrase, &salt, iterations)?;

    let encrypted_data = cipher
        .encrypt(Nonce::from_slice(&nonce), master.as_bytes().as_slice())
        .map_err(|e| MaspError::Crypto(format!("Encryption failed: {}", e)))?;

    Ok(SealedSecret {
        encrypted_data,
        nonce: nonce.to_vec(),
        salt: salt.to_vec(),
    })
}


pub fn unseal(sealed: &SealedSecret, passphrase: &str, iterations: u32) -> MaspResult<MasterSecret> {
    let cipher = cipher_for(passphrase, &sealed.salt, iterations)?;

    let nonce_array: [u8; 12] = sealed
        .nonce
        .as_slice()
        .try_into()
        .map_err(|_| MaspError::Crypto("Invalid nonce length".to_string()))?;

    let decrypted = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&nonce_array), sealed.encrypted_data.as_slice())
            .map_err(|_| MaspError::Crypto("Decryption failed, wrong passphrase or tampered secret".to_string()))?,
    );

    let bytes: [u8; SEED_LEN] = decrypted
        .as_slice()
        .try_into()
        .map_err(|_| MaspError::Crypto("Sealed secret has unexpected length".to_string()))?;
    Ok(MasterSecret(bytes))
}


/// An empty passphrase leaves the sealed seed readable by anyone holding
/// the wallet file. Returns whether the warning was raised.
fn warn_if_unprotected(passphrase: &str) -> bool {
    if passphrase.is_empty() {
        tracing::warn!("sealing the master secret with an empty passphrase, set MASP_WALLET_PASSPHRASE");
        return true;
    }
    false
}

fn cipher_for(passphrase: &str, salt: &[u8], iterations: u32) -> MaspResult<Aes256Gcm> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2::pbkdf2::<hmac::Hmac<sha2::Sha256>>(passphrase.as_bytes(), salt, iterations, &mut key[..])
        .map_err(|e| MaspError::Crypto(format!("Key derivation failed: {}", e)))?;

    Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| MaspError::Crypto(format!("Invalid cipher key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon art";

    fn master() -> MasterSecret {
        derive(&Mnemonic::parse_normalized(PHRASE).unwrap())
    }

    #[test]
    fn test_seed_matches_bip39_vector() {
        let phrase = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
        let seed = derive(&Mnemonic::parse_normalized(phrase).unwrap());
        let expected = "5eb00bbddcf069084889a8ab9155568165f5c453ccb85e70811aaed6f6da5fc19a5ac40b389cd370d086206dec8aa6c43daea6690f20ad3d8d48b2d2ce9e38e4";
        assert_eq!(hex::encode(seed.as_bytes()), expected);
    }

    #[test]
    fn test_viewing_key_is_deterministic() {
        let a = derive_viewing_key(&master(), 0, NetworkType::Mainnet, 877).unwrap();
        let b = derive_viewing_key(&master(), 0, NetworkType::Mainnet, 877).unwrap();
        assert_eq!(a.encoded, b.encoded);
        assert_eq!(a.id, "m/32'/877'/0'");
        assert!(a.encoded.starts_with("zvknam1"));
        assert_eq!(a.material(NetworkType::Mainnet).unwrap().len(), VIEWING_KEY_LEN);
    }

    #[test]
    fn test_accounts_and_networks_differ() {
        let master = master();
        let first = derive_viewing_key(&master, 0, NetworkType::Mainnet, 877).unwrap();
        let second = derive_viewing_key(&master, 1, NetworkType::Mainnet, 877).unwrap();
        assert_ne!(first.encoded, second.encoded);

        let testnet = derive_viewing_key(&master, 0, NetworkType::Testnet, 877).unwrap();
        assert!(testnet.encoded.starts_with("zvktnam1"));
        assert!(first.material(NetworkType::Testnet).is_err());
    }

    #[test]
    fn test_payment_address_is_pure() {
        let key = derive_viewing_key(&master(), 0, NetworkType::Mainnet, 877).unwrap();
        let a0 = derive_payment_address(&key, 0, NetworkType::Mainnet).unwrap();
        let again = derive_payment_address(&key, 0, NetworkType::Mainnet).unwrap();
        let a1 = derive_payment_address(&key, 1, NetworkType::Mainnet).unwrap();

        assert_eq!(a0, again);
        assert_ne!(a0, a1);
        assert!(a0.starts_with("znam1"));

        let (_, raw) = bech32::decode(&a0).unwrap();
        assert_eq!(raw.len(), PAYMENT_ADDRESS_LEN);
    }

    #[test]
    fn test_seal_roundtrip_and_wrong_passphrase() {
        let master = master();
        let sealed = seal(&master, "correct horse", 1_000).unwrap();
        assert_ne!(sealed.encrypted_data, master.as_bytes().to_vec());

        let opened = unseal(&sealed, "correct horse", 1_000).unwrap();
        assert_eq!(opened.as_bytes(), master.as_bytes());

        assert!(matches!(unseal(&sealed, "battery staple", 1_000), Err(MaspError::Crypto(_))));
    }

    #[test]
    fn test_seal_uses_fresh_salt() {
        let master = master();
        let first = seal(&master, "correct horse", 1_000).unwrap();
        let second = seal(&master, "correct horse", 1_000).unwrap();
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.encrypted_data, second.encrypted_data);

        let mut swapped = first.clone();
        swapped.salt = second.salt.clone();
        assert!(matches!(unseal(&swapped, "correct horse", 1_000), Err(MaspError::Crypto(_))));
    }

    #[test]
    fn test_empty_passphrase_warns() {
        assert!(warn_if_unprotected(""));
        assert!(!warn_if_unprotected("correct horse"));
    }

    #[test]
    fn test_spending_key() {
        let master = master();
        let a = derive_spending_key(&master, 0, NetworkType::Mainnet, 877).unwrap();
        let b = derive_spending_key(&master, 0, NetworkType::Mainnet, 877).unwrap();
        let other = derive_spending_key(&master, 1, NetworkType::Mainnet, 877).unwrap();
        assert_eq!(*a, *b);
        assert_ne!(*a, *other);
        assert!(a.starts_with("zsknam1"));

        let viewing = derive_viewing_key(&master, 0, NetworkType::Mainnet, 877).unwrap();
        let (_, raw) = bech32::decode(&a).unwrap();
        assert_eq!(raw.len(), 32);
        assert_ne!(raw, viewing.material(NetworkType::Mainnet).unwrap().to_vec());

        let testnet = derive_spending_key(&master, 0, NetworkType::Testnet, 877).unwrap();
        assert!(testnet.starts_with("zsktnam1"));
    }

    #[test]
    fn test_fingerprint() {
        let master = master();
        let fingerprint = seed_fingerprint(&master);
        assert_eq!(fingerprint.len(), 64);
        assert!(fingerprint_matches(&master, &fingerprint));

        let other = derive(&crate::mnemonic::generate().unwrap());
        assert!(!fingerprint_matches(&other, &fingerprint));
    }
}

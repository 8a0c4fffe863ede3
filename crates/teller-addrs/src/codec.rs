//! Address validation for the supported chains.
//!
//! Deposit addresses are pre-provisioned, so validation only has to catch
//! operator mistakes in the pool files and malformed client input, not
//! derive keys.

use crate::{AddrsError, Result};
use sha2::{Digest, Sha256};
use teller_core::types::CoinType;

/// Validate an address against its coin's encoding rules.
pub fn validate_address(coin: CoinType, address: &str) -> Result<()> {
    let check = match coin {
        CoinType::Btc => validate_btc(address),
        CoinType::Eth => validate_eth(address),
        CoinType::Sky => validate_sky(address),
        CoinType::Waves | CoinType::WavesMdl => validate_waves(address),
    };
    check.map_err(|reason| AddrsError::InvalidAddress {
        coin,
        address: address.to_string(),
        reason,
    })
}

/// MDL is a Skycoin-lineage chain; its addresses use the same 25-byte
/// base58 layout.
pub fn validate_mdl_address(address: &str) -> Result<()> {
    validate_sky(address).map_err(|reason| AddrsError::InvalidMdlAddress {
        address: address.to_string(),
        reason,
    })
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

fn decode_base58(address: &str) -> std::result::Result<Vec<u8>, String> {
    bs58::decode(address)
        .into_vec()
        .map_err(|e| format!("not base58: {e}"))
}

/// Base58check: 1-byte version, 20-byte hash, 4-byte double-SHA256
/// checksum. Bech32 addresses are not in our pools.
fn validate_btc(address: &str) -> std::result::Result<(), String> {
    let bytes = decode_base58(address)?;
    if bytes.len() != 25 {
        return Err(format!("invalid length {}", bytes.len()));
    }
    let version = bytes[0];
    if version != 0x00 && version != 0x05 {
        return Err(format!("unsupported version byte {version:#04x}"));
    }
    let checksum = &sha256d(&bytes[..21])[..4];
    if checksum != &bytes[21..] {
        return Err("checksum mismatch".to_string());
    }
    Ok(())
}

fn validate_eth(address: &str) -> std::result::Result<(), String> {
    let hex = address
        .strip_prefix("0x")
        .ok_or_else(|| "missing 0x prefix".to_string())?;
    if hex.len() != 40 {
        return Err(format!("invalid length {}", hex.len()));
    }
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("not hex".to_string());
    }
    Ok(())
}

/// Skycoin layout: 20-byte key hash, 1-byte version, 4-byte SHA256
/// checksum over the first 21 bytes.
fn validate_sky(address: &str) -> std::result::Result<(), String> {
    let bytes = decode_base58(address)?;
    if bytes.len() != 25 {
        return Err(format!("invalid length {}", bytes.len()));
    }
    if bytes[20] != 0 {
        return Err(format!("unsupported version byte {}", bytes[20]));
    }
    let checksum = &sha256(&bytes[..21])[..4];
    if checksum != &bytes[21..] {
        return Err("checksum mismatch".to_string());
    }
    Ok(())
}

/// Waves addresses are 26 bytes: entity version 1, chain id, 20-byte key
/// hash, 4-byte checksum. The checksum uses Blake2b/Keccak which we do
/// not pull in; length and version catch the operator mistakes that
/// matter for pre-provisioned pools.
fn validate_waves(address: &str) -> std::result::Result<(), String> {
    let bytes = decode_base58(address)?;
    if bytes.len() != 26 {
        return Err(format!("invalid length {}", bytes.len()));
    }
    if bytes[0] != 1 {
        return Err(format!("unsupported entity version {}", bytes[0]));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_btc(version: u8, payload: [u8; 20]) -> String {
        let mut bytes = vec![version];
        bytes.extend_from_slice(&payload);
        let checksum = sha256d(&bytes);
        bytes.extend_from_slice(&checksum[..4]);
        bs58::encode(bytes).into_string()
    }

    fn encode_sky(version: u8, key: [u8; 20]) -> String {
        let mut bytes = key.to_vec();
        bytes.push(version);
        let checksum = sha256(&bytes);
        bytes.extend_from_slice(&checksum[..4]);
        bs58::encode(bytes).into_string()
    }

    fn encode_waves(version: u8, body: [u8; 21]) -> String {
        let mut bytes = vec![version];
        bytes.extend_from_slice(&body);
        bytes.extend_from_slice(&[0u8; 4]);
        bs58::encode(bytes).into_string()
    }

    #[test]
    fn btc_accepts_valid_and_rejects_tampered() {
        // The genesis coinbase address, plus constructed vectors.
        assert!(validate_address(CoinType::Btc, "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").is_ok());
        assert!(validate_address(CoinType::Btc, &encode_btc(0x00, [7u8; 20])).is_ok());
        assert!(validate_address(CoinType::Btc, &encode_btc(0x05, [9u8; 20])).is_ok());

        let mut tampered = encode_btc(0x00, [7u8; 20]);
        let last = tampered.pop().unwrap();
        tampered.push(if last == '1' { '2' } else { '1' });
        assert!(validate_address(CoinType::Btc, &tampered).is_err());
        assert!(validate_address(CoinType::Btc, "not-base58-0OIl").is_err());
        assert!(validate_address(CoinType::Btc, &encode_btc(0x6f, [1u8; 20])).is_err());
    }

    #[test]
    fn eth_checks_prefix_and_hex() {
        assert!(
            validate_address(CoinType::Eth, "0x2cf014d432e92685ef1cf7bc7967a4e4debca092").is_ok()
        );
        assert!(validate_address(CoinType::Eth, "2cf014d432e92685ef1cf7bc7967a4e4debca092").is_err());
        assert!(validate_address(CoinType::Eth, "0x2cf014").is_err());
        assert!(
            validate_address(CoinType::Eth, "0xzzf014d432e92685ef1cf7bc7967a4e4debca092").is_err()
        );
    }

    #[test]
    fn sky_checksum_round_trips() {
        let good = encode_sky(0, [3u8; 20]);
        assert!(validate_address(CoinType::Sky, &good).is_ok());
        assert!(validate_mdl_address(&good).is_ok());

        assert!(validate_address(CoinType::Sky, &encode_sky(1, [3u8; 20])).is_err());
        let mut tampered = good;
        let last = tampered.pop().unwrap();
        tampered.push(if last == '2' { '3' } else { '2' });
        assert!(validate_mdl_address(&tampered).is_err());
    }

    #[test]
    fn waves_checks_length_and_version() {
        assert!(validate_address(CoinType::Waves, &encode_waves(1, [5u8; 21])).is_ok());
        assert!(validate_address(CoinType::WavesMdl, &encode_waves(1, [5u8; 21])).is_ok());
        assert!(validate_address(CoinType::Waves, &encode_waves(2, [5u8; 21])).is_err());
        assert!(validate_address(CoinType::Waves, "abc").is_err());
    }
}

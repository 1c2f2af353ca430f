//! Account Provisioner: creates or loads pre-funded accounts for a
//! chain's data directory.

use std::path::Path;

use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::types::Account;

const GANACHE_BALANCE_WEI: u128 = 100_000_000_000_000_000_000; // 100 ETH

/// Deterministic Ganache mnemonic-derived private keys used for the
/// first ten accounts. Ganache itself derives these from `--mnemonic`;
/// this list mirrors the well-known default mnemonic's derivation so the
/// adapter's `--account` flags and this provisioner's return value agree
/// without re-deriving HD keys.
const GANACHE_DEV_KEYS: &[&str] = &[
    "4f3edf983ac636a65a842ce7c78d9aa706d3b113bce9c46f30d7d21715b23b1d",
    "06cbed15c793ce57650b9877cf6fa156fbef513c4e6134f022a85b1ffdd59b2a",
    "06370fd033278c143179d81c5526140625662b8daa446c22ee2d73db3707e620",
    "646f1ce2fdad0e6deeeb5c7e8e5543bdde65e86029e2fd9fc169899c440a7913",
    "add53f9a7e588d003326d1cbf9e4a43c061aadd9bc938c843a79e7b4fd2ad743",
    "395df67f0c2d2d9fe1ad08d1bc8b6627011959b79c53d7dd6a3536a33ab8a4fd",
    "e485d098507f54e7733a205420dfddbe58db035fa577fc294ebd14db90767a52",
    "a453611d9419d0e56f499079478fd72c37b251a94bfde4d19872c44cf65386e3",
    "829e924fdf021ba3dbbc4225edfece9aca04b929d6e75613329ca6f1d31c0bb4",
    "b0057716d5917badaf911b193b12b910811c1497b5bada8d7711f758981c3773",
];

/// Creates or loads the account list for one chain. `index 0` is the
/// coinbase.
pub enum AccountProvisioner {}

impl AccountProvisioner {
    /// Geth: if `db_path` is empty, spawns `geth account new` once per
    /// requested account against a password file; otherwise parses
    /// `geth account list` for existing addresses. Returns accounts in
    /// creation order.
    pub async fn geth_accounts(
        geth_executable: &Path,
        db_path: &Path,
        password_file: &Path,
        accounts_requested: u32,
    ) -> Result<Vec<Account>> {
        let is_empty = std::fs::read_dir(db_path)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true);

        if is_empty {
            let mut accounts = Vec::with_capacity(accounts_requested as usize);
            for _ in 0..accounts_requested {
                let output = Command::new(geth_executable)
                    .arg("account")
                    .arg("new")
                    .arg("--datadir")
                    .arg(db_path)
                    .arg("--password")
                    .arg(password_file)
                    .output()
                    .await
                    .map_err(|e| Error::StartFailure(format!("geth account new: {}", e)))?;
                let stdout = String::from_utf8_lossy(&output.stdout);
                let address = extract_hex40(&stdout)
                    .ok_or_else(|| Error::StartFailure("geth account new: no address in output".into()))?;
                accounts.push(Account {
                    address,
                    balance: 0,
                    priv_key: None,
                });
            }
            Ok(accounts)
        } else {
            let output = Command::new(geth_executable)
                .arg("account")
                .arg("list")
                .arg("--datadir")
                .arg(db_path)
                .output()
                .await
                .map_err(|e| Error::StartFailure(format!("geth account list: {}", e)))?;
            let stdout = String::from_utf8_lossy(&output.stdout);
            let accounts = extract_all_hex40(&stdout)
                .into_iter()
                .map(|address| Account {
                    address,
                    balance: 0,
                    priv_key: None,
                })
                .collect();
            Ok(accounts)
        }
    }

    /// Ganache: accounts are declared on the command line with
    /// deterministic private keys and a fixed initial balance. This
    /// function only computes the list the adapter will also encode as
    /// `--account` flags; it performs no I/O.
    pub fn ganache_accounts(accounts_requested: u32) -> Result<Vec<Account>> {
        if accounts_requested as usize > GANACHE_DEV_KEYS.len() {
            return Err(Error::Validation(format!(
                "ganache supports at most {} deterministic accounts, {} requested",
                GANACHE_DEV_KEYS.len(),
                accounts_requested
            )));
        }
        GANACHE_DEV_KEYS
            .iter()
            .take(accounts_requested as usize)
            .map(|key| {
                Ok(Account {
                    address: address_from_priv_key(key)?,
                    balance: GANACHE_BALANCE_WEI,
                    priv_key: Some((*key).to_string()),
                })
            })
            .collect()
    }
}

/// Derives the standard Ethereum address for a secp256k1 private key:
/// the low 20 bytes of the Keccak-256 hash of the uncompressed public
/// key's 64 X||Y bytes (the leading `0x04` SEC1 tag is stripped first).
fn address_from_priv_key(priv_key: &str) -> Result<String> {
    let bytes = hex::decode(priv_key)
        .map_err(|e| Error::Fatal(format!("invalid ganache dev key: {}", e)))?;
    let signing_key = SigningKey::from_slice(&bytes)
        .map_err(|e| Error::Fatal(format!("invalid ganache dev key: {}", e)))?;
    let encoded_point = signing_key.verifying_key().to_encoded_point(false);
    let hash = Keccak256::digest(&encoded_point.as_bytes()[1..]);
    Ok(format!("0x{}", hex::encode(&hash[12..])))
}

fn extract_hex40(text: &str) -> Option<String> {
    extract_all_hex40(text).into_iter().next()
}

fn extract_all_hex40(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut result = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            let start = i + 1;
            if let Some(end_offset) = text[start..].find('}') {
                let candidate = &text[start..start + end_offset];
                if candidate.len() == 40 && candidate.bytes().all(|b| b.is_ascii_hexdigit()) {
                    result.push(format!("0x{}", candidate));
                }
                i = start + end_offset;
            }
        }
        i += 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_hex40_addresses_from_geth_list_output() {
        let output = "Account #0: {5b38da6a701c568545dcfcb03fcb875f56beddc4} keystore://...\n\
                       Account #1: {ab8483f64d9c6d1ecf9b849ae677dd3315835cb2} keystore://...";
        let addresses = extract_all_hex40(output);
        assert_eq!(
            addresses,
            vec![
                "0x5b38da6a701c568545dcfcb03fcb875f56beddc4".to_string(),
                "0xab8483f64d9c6d1ecf9b849ae677dd3315835cb2".to_string(),
            ]
        );
    }

    #[test]
    fn ganache_accounts_are_deterministic_and_fully_funded() {
        let accounts = AccountProvisioner::ganache_accounts(2).unwrap();
        assert_eq!(accounts.len(), 2);
        for account in &accounts {
            assert_eq!(account.balance, GANACHE_BALANCE_WEI);
            assert!(account.priv_key.is_some());
            assert!(account.address.starts_with("0x"));
            assert_eq!(account.address.len(), 42);
        }
        // Same request twice yields the same addresses (CLI order).
        let again = AccountProvisioner::ganache_accounts(2).unwrap();
        assert_eq!(accounts, again);
    }

    #[test]
    fn ganache_accounts_rejects_more_than_available_keys() {
        let err = AccountProvisioner::ganache_accounts(999).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}

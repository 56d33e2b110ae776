//! Transaction construction for the gateway.
//!
//! The chain is consumed as a capability, so transactions are modeled at the
//! level the gateway reasons about: an ordered instruction list, a fee
//! payer, a recent blockhash with a tightened validity horizon, and partial
//! signatures collected from each required signer.

use serde::{Deserialize, Serialize};
use std::fmt;

use aegix_core::constants::BLOCKHASH_VALIDITY_BLOCKS;
use aegix_core::error::AegixError;
use aegix_core::types::{Address, Lamports, MicroUnits};
use aegix_crypto::keypair::KeyPair;

// ── Blockhash ────────────────────────────────────────────────────────────────

/// A recent blockhash anchoring a transaction to the chain tip.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blockhash(pub [u8; 32]);

impl Blockhash {
    pub fn to_b58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    pub fn from_b58(s: &str) -> Result<Self, AegixError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| AegixError::InvalidIdentifier(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(AegixError::InvalidIdentifier(format!(
                "blockhash must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blockhash({}…)", &self.to_b58()[..8])
    }
}

// ── Instruction ──────────────────────────────────────────────────────────────

/// The instruction set the gateway emits. Provider-built instructions
/// (compressed transfers, validity-proof verification) arrive as `Raw`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// Request a compute-unit limit. Must be the first instruction of any
    /// transaction carrying ZK verification.
    ComputeBudgetLimit { units: u32 },

    /// Attach a priority fee.
    ComputeBudgetPrice { micro_lamports: u64 },

    /// Move native gas.
    TransferLamports {
        from: Address,
        to: Address,
        lamports: Lamports,
    },

    /// Create the associated token account for `owner` and `mint`, rent
    /// paid by `payer`.
    CreateTokenAccount {
        payer: Address,
        owner: Address,
        mint: Address,
    },

    /// Checked SPL transfer. `authority` must sign.
    TransferChecked {
        source: Address,
        destination: Address,
        authority: Address,
        mint: Address,
        amount: MicroUnits,
        decimals: u8,
    },

    /// Close `account`, directing its rent to `destination`. `authority`
    /// must sign.
    CloseTokenAccount {
        account: Address,
        destination: Address,
        authority: Address,
    },

    /// Provider-built instruction carried opaquely. `signers` lists the
    /// accounts whose signatures the instruction demands.
    Raw {
        program: Address,
        accounts: Vec<Address>,
        signers: Vec<Address>,
        data: Vec<u8>,
    },
}

/// Deterministic associated-token-account address for `(owner, mint)`.
pub fn token_account_address(owner: &Address, mint: &Address) -> Address {
    let mut h = blake3::Hasher::new();
    h.update(b"aegix-ata:");
    h.update(owner.as_bytes());
    h.update(mint.as_bytes());
    Address::from_bytes(*h.finalize().as_bytes())
}

// ── PreparedTransaction ──────────────────────────────────────────────────────

/// One collected signature. The raw bytes travel hex-encoded because serde
/// has no built-in support for 64-byte arrays.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSig {
    pub signer: Address,
    #[serde(with = "sig_hex")]
    pub signature: [u8; 64],
}

mod sig_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(sig: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(sig))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be 64 bytes"))
    }
}

/// A transaction under construction or awaiting signatures.
///
/// `last_valid_block_height` is always set [`BLOCKHASH_VALIDITY_BLOCKS`]
/// past the observed height — well below the network default — to shrink
/// the window for delayed-submission attacks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreparedTransaction {
    pub fee_payer: Address,
    pub instructions: Vec<Instruction>,
    pub recent_blockhash: Option<Blockhash>,
    pub last_valid_block_height: u64,
    /// Signatures collected so far; fee payer first.
    pub signatures: Vec<TxSig>,
}

impl PreparedTransaction {
    pub fn new(fee_payer: Address, instructions: Vec<Instruction>) -> Self {
        Self {
            fee_payer,
            instructions,
            recent_blockhash: None,
            last_valid_block_height: 0,
            signatures: Vec::new(),
        }
    }

    /// Anchor to a fetched blockhash, tightening the validity horizon.
    /// Invalidates any signatures collected against an older hash.
    pub fn set_blockhash(&mut self, hash: Blockhash, current_height: u64) {
        self.recent_blockhash = Some(hash);
        self.last_valid_block_height = current_height + BLOCKHASH_VALIDITY_BLOCKS;
        self.signatures.clear();
    }

    /// Every signer this transaction requires: the fee payer plus each
    /// instruction authority, deduplicated in first-seen order.
    pub fn required_signers(&self) -> Vec<Address> {
        let mut signers = vec![self.fee_payer];
        for ix in &self.instructions {
            let authorities: Vec<Address> = match ix {
                Instruction::TransferLamports { from, .. } => vec![*from],
                Instruction::CreateTokenAccount { payer, .. } => vec![*payer],
                Instruction::TransferChecked { authority, .. } => vec![*authority],
                Instruction::CloseTokenAccount { authority, .. } => vec![*authority],
                Instruction::Raw { signers, .. } => signers.clone(),
                _ => Vec::new(),
            };
            for a in authorities {
                if !signers.contains(&a) {
                    signers.push(a);
                }
            }
        }
        signers
    }

    /// The canonical bytes every signer signs: bincode of all fields except
    /// the signature list.
    pub fn message_bytes(&self) -> Result<Vec<u8>, AegixError> {
        #[derive(Serialize)]
        struct Body<'a> {
            fee_payer: &'a Address,
            instructions: &'a [Instruction],
            recent_blockhash: &'a Option<Blockhash>,
            last_valid_block_height: u64,
        }
        bincode::serialize(&Body {
            fee_payer: &self.fee_payer,
            instructions: &self.instructions,
            recent_blockhash: &self.recent_blockhash,
            last_valid_block_height: self.last_valid_block_height,
        })
        .map_err(|e| AegixError::Serialization(e.to_string()))
    }

    /// Add `keypair`'s signature. A blockhash must be set first.
    pub fn partial_sign(&mut self, keypair: &KeyPair) -> Result<(), AegixError> {
        if self.recent_blockhash.is_none() {
            return Err(AegixError::BlockhashExpired);
        }
        let message = self.message_bytes()?;
        let signature = keypair.sign(&message);
        self.signatures.retain(|s| s.signer != keypair.address);
        self.signatures.push(TxSig {
            signer: keypair.address,
            signature,
        });
        Ok(())
    }

    pub fn is_fully_signed(&self) -> bool {
        self.required_signers()
            .iter()
            .all(|required| self.signatures.iter().any(|s| s.signer == *required))
    }

    /// Hex-encoded wire form submitted to the RPC (or handed to the owner
    /// for out-of-process signing in the two-phase creation pattern).
    pub fn encode(&self) -> Result<String, AegixError> {
        let bytes =
            bincode::serialize(self).map_err(|e| AegixError::Serialization(e.to_string()))?;
        Ok(hex::encode(bytes))
    }

    pub fn decode(s: &str) -> Result<Self, AegixError> {
        let bytes = hex::decode(s).map_err(|e| AegixError::Serialization(e.to_string()))?;
        bincode::deserialize(&bytes).map_err(|e| AegixError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_tx(fee_payer: &KeyPair, authority: &KeyPair) -> PreparedTransaction {
        PreparedTransaction::new(
            fee_payer.address,
            vec![Instruction::TransferChecked {
                source: Address::from_bytes([1u8; 32]),
                destination: Address::from_bytes([2u8; 32]),
                authority: authority.address,
                mint: Address::from_bytes([3u8; 32]),
                amount: 1_000_000,
                decimals: 6,
            }],
        )
    }

    #[test]
    fn required_signers_are_fee_payer_plus_authorities() {
        let fee_payer = KeyPair::generate();
        let authority = KeyPair::generate();
        let tx = transfer_tx(&fee_payer, &authority);
        assert_eq!(
            tx.required_signers(),
            vec![fee_payer.address, authority.address]
        );
    }

    #[test]
    fn fully_signed_requires_every_signer() {
        let fee_payer = KeyPair::generate();
        let authority = KeyPair::generate();
        let mut tx = transfer_tx(&fee_payer, &authority);
        tx.set_blockhash(Blockhash([9u8; 32]), 100);

        tx.partial_sign(&authority).unwrap();
        assert!(!tx.is_fully_signed());
        tx.partial_sign(&fee_payer).unwrap();
        assert!(tx.is_fully_signed());
    }

    #[test]
    fn signing_without_blockhash_is_rejected() {
        let kp = KeyPair::generate();
        let mut tx = transfer_tx(&kp, &kp);
        assert!(matches!(
            tx.partial_sign(&kp),
            Err(AegixError::BlockhashExpired)
        ));
    }

    #[test]
    fn blockhash_tightens_expiry_and_drops_stale_signatures() {
        let fee_payer = KeyPair::generate();
        let mut tx = transfer_tx(&fee_payer, &fee_payer);
        tx.set_blockhash(Blockhash([1u8; 32]), 500);
        assert_eq!(tx.last_valid_block_height, 500 + BLOCKHASH_VALIDITY_BLOCKS);

        tx.partial_sign(&fee_payer).unwrap();
        tx.set_blockhash(Blockhash([2u8; 32]), 600);
        assert!(tx.signatures.is_empty(), "stale signatures dropped");
    }

    #[test]
    fn encode_decode_round_trip() {
        let fee_payer = KeyPair::generate();
        let mut tx = transfer_tx(&fee_payer, &fee_payer);
        tx.set_blockhash(Blockhash([1u8; 32]), 10);
        tx.partial_sign(&fee_payer).unwrap();

        let decoded = PreparedTransaction::decode(&tx.encode().unwrap()).unwrap();
        assert_eq!(decoded.signatures.len(), 1);
        assert_eq!(decoded.message_bytes().unwrap(), tx.message_bytes().unwrap());
    }

    #[test]
    fn token_account_address_is_deterministic_per_owner_mint() {
        let owner = Address::from_bytes([1u8; 32]);
        let mint = Address::from_bytes([2u8; 32]);
        assert_eq!(
            token_account_address(&owner, &mint),
            token_account_address(&owner, &mint)
        );
        assert_ne!(
            token_account_address(&owner, &mint),
            token_account_address(&mint, &owner)
        );
    }
}

//! Typed transactions.
//!
//! A transaction is a uniform header plus a tagged payload. The signing
//! surface is the canonical encoding of `(header, payload)` so signature
//! verification never needs to inspect the variant; per-variant validation
//! and dispatch happen in the state processor.

use std::fmt;

use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::amount::Amount;
use crate::codec::to_bytes_canonical;
use crate::hashing::keccak256;
use crate::Hash;

/// Domain separator mixed into the paymaster co-signature payload.
const PAYMASTER_DOMAIN: &[u8] = b"nhb/paymaster/v1";

/// Wire tag identifying a transaction variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    /// Native-asset transfer of `header.value`.
    Transfer,
    /// Wrapped-asset transfer of `header.value`.
    TransferWrapped,
    /// Bond `header.value` from the primary balance into stake.
    Stake,
    /// Begin unbonding `header.value` of stake.
    Unstake,
    /// Claim matured unbonds back into the primary balance.
    StakeClaim,
    /// Credit minted funds against a signed voucher.
    Mint,
    /// POTSO liveness heartbeat.
    Heartbeat,
    /// Fund a paymaster account's sponsorship balance.
    PaymasterTopUp,
    /// Supply liquidity to the lending pool.
    LendSupply,
    /// Borrow against supplied collateral.
    LendBorrow,
    /// Repay an outstanding borrow.
    LendRepay,
    /// Withdraw unencumbered supply.
    LendWithdraw,
    /// Liquidate an undercollateralised borrower.
    LendLiquidate,
    /// Credit a swap payout against a signed receipt.
    SwapPayout,
    /// Open an escrow.
    EscrowCreate,
    /// Fund an open escrow.
    EscrowFund,
    /// Release escrowed funds to the payee.
    EscrowRelease,
    /// Refund escrowed funds to the payer.
    EscrowRefund,
    /// Flag an escrow as disputed.
    EscrowDispute,
    /// Resolve a disputed escrow (arbiter role).
    EscrowResolve,
    /// Submit a governance proposal.
    GovPropose,
    /// Vote on a governance proposal.
    GovVote,
    /// Execute a passed governance proposal.
    GovExecute,
}

impl TxType {
    /// The stable u32 wire tag for this variant.
    pub fn as_u32(self) -> u32 {
        match self {
            TxType::Transfer => 0x01,
            TxType::TransferWrapped => 0x02,
            TxType::Stake => 0x03,
            TxType::Unstake => 0x04,
            TxType::StakeClaim => 0x05,
            TxType::Mint => 0x06,
            TxType::Heartbeat => 0x07,
            TxType::PaymasterTopUp => 0x08,
            TxType::LendSupply => 0x10,
            TxType::LendBorrow => 0x11,
            TxType::LendRepay => 0x12,
            TxType::LendWithdraw => 0x13,
            TxType::LendLiquidate => 0x14,
            TxType::SwapPayout => 0x20,
            TxType::EscrowCreate => 0x30,
            TxType::EscrowFund => 0x31,
            TxType::EscrowRelease => 0x32,
            TxType::EscrowRefund => 0x33,
            TxType::EscrowDispute => 0x34,
            TxType::EscrowResolve => 0x35,
            TxType::GovPropose => 0x40,
            TxType::GovVote => 0x41,
            TxType::GovExecute => 0x42,
        }
    }

    /// Reverse of [`TxType::as_u32`].
    pub fn from_u32(tag: u32) -> Option<Self> {
        Some(match tag {
            0x01 => TxType::Transfer,
            0x02 => TxType::TransferWrapped,
            0x03 => TxType::Stake,
            0x04 => TxType::Unstake,
            0x05 => TxType::StakeClaim,
            0x06 => TxType::Mint,
            0x07 => TxType::Heartbeat,
            0x08 => TxType::PaymasterTopUp,
            0x10 => TxType::LendSupply,
            0x11 => TxType::LendBorrow,
            0x12 => TxType::LendRepay,
            0x13 => TxType::LendWithdraw,
            0x14 => TxType::LendLiquidate,
            0x20 => TxType::SwapPayout,
            0x30 => TxType::EscrowCreate,
            0x31 => TxType::EscrowFund,
            0x32 => TxType::EscrowRelease,
            0x33 => TxType::EscrowRefund,
            0x34 => TxType::EscrowDispute,
            0x35 => TxType::EscrowResolve,
            0x40 => TxType::GovPropose,
            0x41 => TxType::GovVote,
            0x42 => TxType::GovExecute,
            _ => return None,
        })
    }

    /// The native module this variant dispatches to.
    pub fn module(self) -> Module {
        match self {
            TxType::Transfer | TxType::TransferWrapped => Module::Transfer,
            TxType::Stake | TxType::Unstake | TxType::StakeClaim => Module::Staking,
            TxType::Mint => Module::Mint,
            TxType::Heartbeat => Module::Potso,
            TxType::PaymasterTopUp => Module::Paymaster,
            TxType::LendSupply
            | TxType::LendBorrow
            | TxType::LendRepay
            | TxType::LendWithdraw
            | TxType::LendLiquidate => Module::Lending,
            TxType::SwapPayout => Module::Swap,
            TxType::EscrowCreate
            | TxType::EscrowFund
            | TxType::EscrowRelease
            | TxType::EscrowRefund
            | TxType::EscrowDispute
            | TxType::EscrowResolve => Module::Escrow,
            TxType::GovPropose | TxType::GovVote | TxType::GovExecute => Module::Governance,
        }
    }
}

/// Native modules, used for pause switches and quotas.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Encode,
    Decode,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    /// Plain balance transfers.
    Transfer,
    /// Staking and unbonding.
    Staking,
    /// Voucher-backed minting.
    Mint,
    /// Lending pool.
    Lending,
    /// Swap payouts.
    Swap,
    /// Escrow lifecycle.
    Escrow,
    /// POTSO participation rewards.
    Potso,
    /// Governance proposals.
    Governance,
    /// Paymaster sponsorship.
    Paymaster,
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Module::Transfer => "transfer",
            Module::Staking => "staking",
            Module::Mint => "mint",
            Module::Lending => "lending",
            Module::Swap => "swap",
            Module::Escrow => "escrow",
            Module::Potso => "potso",
            Module::Governance => "governance",
            Module::Paymaster => "paymaster",
        };
        f.write_str(name)
    }
}

/// A recoverable secp256k1 signature triple.
#[derive(Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct TxSignature {
    /// The r component.
    pub r: [u8; 32],
    /// The s component.
    pub s: [u8; 32],
    /// The recovery id (0 or 1).
    pub v: u8,
}

impl TxSignature {
    /// A structurally-empty placeholder signature.
    pub fn empty() -> Self {
        TxSignature {
            r: [0u8; 32],
            s: [0u8; 32],
            v: 0,
        }
    }
}

impl fmt::Debug for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TxSignature(r=0x{}, s=0x{}, v={})",
            hex::encode(self.r),
            hex::encode(self.s),
            self.v
        )
    }
}

/// Fields shared by every transaction variant.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct TxHeader {
    /// The chain this transaction is bound to, decimal at external surfaces.
    pub chain_id: Amount,
    /// Sender's account nonce; must equal the account's next nonce.
    pub nonce: u64,
    /// Recipient, all-zero where the variant has no direct recipient.
    pub to: Address,
    /// Value moved by the variant, semantics per variant.
    pub value: Amount,
    /// Opaque auxiliary data.
    pub data: Vec<u8>,
    /// Maximum gas the sender is willing to spend.
    pub gas_limit: u64,
    /// Price per gas unit.
    pub gas_price: Amount,
    /// Sponsoring paymaster, if any.
    pub paymaster: Option<Address>,
    /// Client intent reference, canonicalised for the replay window.
    pub intent_ref: Vec<u8>,
    /// Intent expiry, unix seconds; zero when unused.
    pub intent_expiry: i64,
    /// Merchant identifier for paymaster accounting.
    pub merchant_addr: String,
    /// Device identifier for paymaster accounting.
    pub device_id: String,
    /// Reference to a transaction being refunded. Surfaced, not enforced.
    pub refund_of: String,
}

/// A signed voucher authorising a mint.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct MintVoucher {
    /// Unique invoice identifier; consumed on first use.
    pub invoice_id: String,
    /// Account to credit.
    pub recipient: Address,
    /// Token symbol, e.g. `NHB` or `ZNHB`.
    pub token: String,
    /// Amount to credit.
    pub amount: Amount,
    /// Chain the voucher is valid on.
    pub chain_id: Amount,
    /// Expiry, unix seconds; must be after the block timestamp.
    pub expiry: i64,
}

impl MintVoucher {
    /// The bytes the voucher issuer signs.
    pub fn sign_bytes(&self) -> Vec<u8> {
        to_bytes_canonical(&(b"nhb/mint-voucher/v1".as_slice(), self))
    }
}

/// A signed receipt authorising a swap payout.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct SwapReceipt {
    /// Unique order identifier; consumed on first use.
    pub order_id: String,
    /// Account to credit.
    pub recipient: Address,
    /// Token symbol being paid out.
    pub token: String,
    /// Amount to credit.
    pub amount: Amount,
}

impl SwapReceipt {
    /// The bytes the swap authority signs.
    pub fn sign_bytes(&self) -> Vec<u8> {
        to_bytes_canonical(&(b"nhb/swap-receipt/v1".as_slice(), self))
    }
}

/// A governance parameter change.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct ParamChange {
    /// Dotted parameter path, e.g. `pauses.lending` or `quotas.requests_per_minute`.
    pub key: String,
    /// New value, decimal or boolean string.
    pub value: String,
}

/// The per-variant body of a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum TxPayload {
    /// Move `header.value` of the native asset to `header.to`.
    Transfer,
    /// Move `header.value` of the wrapped asset to `header.to`.
    TransferWrapped,
    /// Bond `header.value` into stake.
    Stake,
    /// Begin unbonding `header.value`.
    Unstake,
    /// Claim matured unbonds.
    StakeClaim,
    /// Credit minted funds if the voucher checks out.
    Mint {
        /// The voucher being redeemed.
        voucher: MintVoucher,
        /// Detached 65-byte recoverable signature over the voucher.
        voucher_sig: Vec<u8>,
    },
    /// POTSO liveness heartbeat.
    Heartbeat {
        /// Client-reported timestamp of the previous heartbeat, unix seconds.
        last_seen: i64,
    },
    /// Fund the paymaster account named in `header.to` with `header.value`.
    PaymasterTopUp,
    /// Supply `header.value` to the lending pool.
    LendSupply,
    /// Borrow `header.value` from the lending pool.
    LendBorrow,
    /// Repay `header.value` of outstanding debt.
    LendRepay,
    /// Withdraw `header.value` of unencumbered supply.
    LendWithdraw,
    /// Liquidate an undercollateralised position.
    LendLiquidate {
        /// The borrower being liquidated.
        borrower: Address,
    },
    /// Credit a swap payout if the receipt checks out.
    SwapPayout {
        /// The receipt being redeemed.
        receipt: SwapReceipt,
        /// Detached 65-byte recoverable signature over the receipt.
        receipt_sig: Vec<u8>,
    },
    /// Open an escrow funded with `header.value`.
    EscrowCreate {
        /// Account the escrow pays out to on release.
        payee: Address,
        /// Deadline after which the payer may refund, unix seconds.
        deadline: i64,
    },
    /// Add `header.value` to an open escrow.
    EscrowFund {
        /// Escrow identifier.
        id: Hash,
    },
    /// Release escrowed funds to the payee.
    EscrowRelease {
        /// Escrow identifier.
        id: Hash,
    },
    /// Refund escrowed funds to the payer.
    EscrowRefund {
        /// Escrow identifier.
        id: Hash,
    },
    /// Flag an escrow as disputed, freezing release and refund.
    EscrowDispute {
        /// Escrow identifier.
        id: Hash,
    },
    /// Resolve a disputed escrow; requires the arbiter role.
    EscrowResolve {
        /// Escrow identifier.
        id: Hash,
        /// `true` pays the payee, `false` refunds the payer.
        release_to_payee: bool,
    },
    /// Submit a governance parameter change proposal.
    GovPropose {
        /// The change being proposed.
        change: ParamChange,
        /// Free-form description.
        memo: String,
    },
    /// Vote on an open proposal with stake-weighted power.
    GovVote {
        /// Proposal identifier.
        proposal: u64,
        /// `true` for yes.
        support: bool,
    },
    /// Execute a passed proposal after its voting period.
    GovExecute {
        /// Proposal identifier.
        proposal: u64,
    },
}

impl TxPayload {
    /// The wire tag for this payload.
    pub fn tx_type(&self) -> TxType {
        match self {
            TxPayload::Transfer => TxType::Transfer,
            TxPayload::TransferWrapped => TxType::TransferWrapped,
            TxPayload::Stake => TxType::Stake,
            TxPayload::Unstake => TxType::Unstake,
            TxPayload::StakeClaim => TxType::StakeClaim,
            TxPayload::Mint { .. } => TxType::Mint,
            TxPayload::Heartbeat { .. } => TxType::Heartbeat,
            TxPayload::PaymasterTopUp => TxType::PaymasterTopUp,
            TxPayload::LendSupply => TxType::LendSupply,
            TxPayload::LendBorrow => TxType::LendBorrow,
            TxPayload::LendRepay => TxType::LendRepay,
            TxPayload::LendWithdraw => TxType::LendWithdraw,
            TxPayload::LendLiquidate { .. } => TxType::LendLiquidate,
            TxPayload::SwapPayout { .. } => TxType::SwapPayout,
            TxPayload::EscrowCreate { .. } => TxType::EscrowCreate,
            TxPayload::EscrowFund { .. } => TxType::EscrowFund,
            TxPayload::EscrowRelease { .. } => TxType::EscrowRelease,
            TxPayload::EscrowRefund { .. } => TxType::EscrowRefund,
            TxPayload::EscrowDispute { .. } => TxType::EscrowDispute,
            TxPayload::EscrowResolve { .. } => TxType::EscrowResolve,
            TxPayload::GovPropose { .. } => TxType::GovPropose,
            TxPayload::GovVote { .. } => TxType::GovVote,
            TxPayload::GovExecute { .. } => TxType::GovExecute,
        }
    }
}

/// A complete signed transaction.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Transaction {
    /// Uniform header.
    pub header: TxHeader,
    /// Variant body.
    pub payload: TxPayload,
    /// Sender's recoverable signature over [`Transaction::sign_bytes`].
    pub signature: TxSignature,
    /// Paymaster co-signature over [`Transaction::paymaster_sign_bytes`].
    pub paymaster_signature: Option<TxSignature>,
}

impl Transaction {
    /// The wire tag of this transaction.
    pub fn tx_type(&self) -> TxType {
        self.payload.tx_type()
    }

    /// The module this transaction dispatches to.
    pub fn module(&self) -> Module {
        self.tx_type().module()
    }

    /// The bytes the sender signs: canonical `(header, payload)`.
    ///
    /// Variant-agnostic by construction; adding a variant never changes how
    /// existing ones are signed.
    pub fn sign_bytes(&self) -> Vec<u8> {
        to_bytes_canonical(&(&self.header, &self.payload))
    }

    /// The bytes a sponsoring paymaster co-signs.
    pub fn paymaster_sign_bytes(&self) -> Vec<u8> {
        to_bytes_canonical(&(PAYMASTER_DOMAIN, &self.header, &self.payload))
    }

    /// Keccak-256 of the full canonical encoding, including signatures.
    pub fn hash(&self) -> Hash {
        keccak256(&to_bytes_canonical(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::from_bytes_canonical;

    fn sample_tx() -> Transaction {
        Transaction {
            header: TxHeader {
                chain_id: Amount::from(187001u64),
                nonce: 7,
                to: Address([0xAA; 20]),
                value: Amount::from(5_000u64),
                data: vec![],
                gas_limit: 21_000,
                gas_price: Amount::from(1u64),
                paymaster: None,
                intent_ref: b"order-17".to_vec(),
                intent_expiry: 0,
                merchant_addr: String::new(),
                device_id: String::new(),
                refund_of: String::new(),
            },
            payload: TxPayload::Transfer,
            signature: TxSignature::empty(),
            paymaster_signature: None,
        }
    }

    #[test]
    fn tag_roundtrip_is_total() {
        for tag in [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x10, 0x11, 0x12, 0x13, 0x14, 0x20,
            0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x40, 0x41, 0x42,
        ] {
            let ty = TxType::from_u32(tag).unwrap();
            assert_eq!(ty.as_u32(), tag);
        }
        assert!(TxType::from_u32(0xFF).is_none());
    }

    #[test]
    fn sign_bytes_exclude_signatures() {
        let mut tx = sample_tx();
        let before = tx.sign_bytes();
        tx.signature = TxSignature {
            r: [9u8; 32],
            s: [9u8; 32],
            v: 1,
        };
        assert_eq!(before, tx.sign_bytes());
        // The hash, by contrast, covers the signature.
        let mut other = sample_tx();
        other.signature = TxSignature::empty();
        assert_ne!(tx.hash(), other.hash());
    }

    #[test]
    fn canonical_roundtrip() {
        let tx = sample_tx();
        let bytes = to_bytes_canonical(&tx);
        let back: Transaction = from_bytes_canonical(&bytes).unwrap();
        assert_eq!(tx, back);
    }

    #[test]
    fn paymaster_domain_separates() {
        let tx = sample_tx();
        assert_ne!(tx.sign_bytes(), tx.paymaster_sign_bytes());
    }
}

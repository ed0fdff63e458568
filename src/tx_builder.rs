//! tx_builder.rs
//! Pump.fun transaction building for the snipe pipeline
//! - pure codec helpers: instruction data, ordered account lists, amount math
//! - buy/sell assembly with compute budget and optional ATA creation
//! - signs VersionedTransaction with the wallet keypair, submits via RpcBroadcaster

use async_trait::async_trait;
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    instruction::{AccountMeta, Instruction},
    message::{v0::Message as MessageV0, VersionedMessage},
    pubkey,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    system_program, sysvar,
};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::coin_info::CoinInfoProvider;
use crate::rpc_manager::RpcBroadcaster;
use crate::types::BuyTokenResult;

pub const PUMP_PROGRAM: Pubkey = pubkey!("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P");
pub const PUMP_GLOBAL: Pubkey = pubkey!("4wTV1YmiEkRvAtNtsSGPtUrqRYQMe5SKy2uB4Jjaxnjf");
pub const PUMP_EVENT_AUTHORITY: Pubkey = pubkey!("Ce6TQqeHC9p8KetsN6JsjHK7UTZk7nasjjnr7XxXp9F1");
pub const PUMP_FEE_RECIPIENT: Pubkey = pubkey!("CebN5WGQ4jvEPvsVU4EoHEpgzq1VV7AbicfhtW4xC9iM");

/// Wire contract with the curve program: the discriminators and the 8-byte
/// little-endian field order below are fixed, the program rejects anything else.
const BUY_DISCRIMINATOR: u64 = 16_927_863_322_537_952_870;
const SELL_DISCRIMINATOR: u64 = 12_502_976_635_542_562_355;

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;
/// Token amounts travel on the wire with nine fractional digits, the same
/// scale as lamports.
pub const TOKEN_BASE_UNITS: u64 = 1_000_000_000;

// Codec errors are component-local; severity is assigned by the engine.

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("price is 0")]
    ZeroPrice,
}

#[derive(Debug, Error)]
pub enum TradeClientError {
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error(transparent)]
    Amounts(#[from] CodecError),
    #[error("price lookup failed: {0}")]
    PriceLookup(String),
    #[error("account lookup failed: {0}")]
    AccountLookup(String),
    #[error("blockhash fetch failed: {0}")]
    BlockhashFetch(String),
    #[error("message compile failed: {0}")]
    MessageCompile(String),
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("transaction submission failed: {0}")]
    Submission(String),
}

// --- Pure codec ---

/// Requested and slippage-capped amounts for one buy, all derived from a
/// single price observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuyAmounts {
    pub amount_base_units: u64,
    pub max_amount_base_units: u64,
    pub token_amount: f64,
}

/// Narrowing is truncation toward zero on every step; rounding up could
/// authorize spend above the slippage ceiling.
pub fn buy_token_amounts(
    sol_amount: f64,
    price_in_sol: f64,
    slippage: f64,
) -> Result<BuyAmounts, CodecError> {
    if price_in_sol == 0.0 {
        return Err(CodecError::ZeroPrice);
    }

    let token_amount = sol_amount / price_in_sol;
    let amount_base_units = (token_amount * TOKEN_BASE_UNITS as f64) as u64;
    let max_amount_base_units = (amount_base_units as f64 * (1.0 + slippage)) as u64;

    Ok(BuyAmounts {
        amount_base_units,
        max_amount_base_units,
        token_amount,
    })
}

/// Minimum acceptable lamports for selling `amount_base_units`. Base units and
/// lamports share the 1e9 scale, so the conversion factors cancel.
pub fn min_sell_output(amount_base_units: u64, price_in_sol: f64, slippage: f64) -> u64 {
    (amount_base_units as f64 * price_in_sol * (1.0 - slippage)) as u64
}

pub fn encode_buy(amount_base_units: u64, max_amount_base_units: u64) -> [u8; 24] {
    let mut data = [0u8; 24];
    data[..8].copy_from_slice(&BUY_DISCRIMINATOR.to_le_bytes());
    data[8..16].copy_from_slice(&amount_base_units.to_le_bytes());
    data[16..24].copy_from_slice(&max_amount_base_units.to_le_bytes());
    data
}

pub fn encode_sell(amount_base_units: u64, min_sol_output: u64) -> [u8; 24] {
    let mut data = [0u8; 24];
    data[..8].copy_from_slice(&SELL_DISCRIMINATOR.to_le_bytes());
    data[8..16].copy_from_slice(&amount_base_units.to_le_bytes());
    data[16..24].copy_from_slice(&min_sol_output.to_le_bytes());
    data
}

/// The curve program indexes accounts positionally; the order below is ABI.
pub fn buy_accounts(
    mint: Pubkey,
    bonding_curve: Pubkey,
    associated_bonding_curve: Pubkey,
    associated_token_account: Pubkey,
    payer: Pubkey,
) -> Vec<AccountMeta> {
    vec![
        AccountMeta::new_readonly(PUMP_GLOBAL, false),
        AccountMeta::new(PUMP_FEE_RECIPIENT, false),
        AccountMeta::new_readonly(mint, false),
        AccountMeta::new(bonding_curve, false),
        AccountMeta::new(associated_bonding_curve, false),
        AccountMeta::new(associated_token_account, false),
        AccountMeta::new(payer, true),
        AccountMeta::new_readonly(system_program::id(), false),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(sysvar::rent::id(), false),
        AccountMeta::new_readonly(PUMP_EVENT_AUTHORITY, false),
        AccountMeta::new_readonly(PUMP_PROGRAM, false),
    ]
}

/// Same layout as [`buy_accounts`] except the ATA program takes the rent
/// sysvar's place, shifting the token program down one slot.
pub fn sell_accounts(
    mint: Pubkey,
    bonding_curve: Pubkey,
    associated_bonding_curve: Pubkey,
    associated_token_account: Pubkey,
    payer: Pubkey,
) -> Vec<AccountMeta> {
    vec![
        AccountMeta::new_readonly(PUMP_GLOBAL, false),
        AccountMeta::new(PUMP_FEE_RECIPIENT, false),
        AccountMeta::new_readonly(mint, false),
        AccountMeta::new(bonding_curve, false),
        AccountMeta::new(associated_bonding_curve, false),
        AccountMeta::new(associated_token_account, false),
        AccountMeta::new(payer, true),
        AccountMeta::new_readonly(system_program::id(), false),
        AccountMeta::new_readonly(spl_associated_token_account::id(), false),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(PUMP_EVENT_AUTHORITY, false),
        AccountMeta::new_readonly(PUMP_PROGRAM, false),
    ]
}

/// Compute budget first, then the optional ATA creation, then the swap.
pub fn trade_instructions(
    compute_unit_limit: u32,
    ata_create: Option<Instruction>,
    swap: Instruction,
) -> Vec<Instruction> {
    let mut instructions = Vec::with_capacity(3);
    instructions.push(ComputeBudgetInstruction::set_compute_unit_limit(
        compute_unit_limit,
    ));
    if let Some(ix) = ata_create {
        instructions.push(ix);
    }
    instructions.push(swap);
    instructions
}

pub fn load_keypair(base58_private_key: &str) -> Result<Keypair, TradeClientError> {
    let bytes = bs58::decode(base58_private_key)
        .into_vec()
        .map_err(|e| TradeClientError::InvalidKey(e.to_string()))?;
    Keypair::from_bytes(&bytes).map_err(|e| TradeClientError::InvalidKey(e.to_string()))
}

fn parse_pubkey(address: &str) -> Result<Pubkey, TradeClientError> {
    Pubkey::from_str(address).map_err(|e| TradeClientError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

// --- Trade execution ---

/// Buy/sell against the bonding curve. The engine only sees this seam, so
/// tests drive it with scripted implementations.
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn buy_token_with_sol(
        &self,
        mint: &str,
        bonding_curve: &str,
        associated_bonding_curve: &str,
        sol_amount: f64,
        slippage: f64,
    ) -> Result<BuyTokenResult, TradeClientError>;

    async fn sell_token(
        &self,
        mint: &str,
        bonding_curve: &str,
        associated_bonding_curve: &str,
        position: &BuyTokenResult,
        slippage: f64,
    ) -> Result<Signature, TradeClientError>;
}

pub struct PumpTradeClient {
    rpc: Arc<dyn RpcBroadcaster>,
    coin_info: Arc<dyn CoinInfoProvider>,
    keypair: Keypair,
    compute_unit_limit: u32,
}

impl PumpTradeClient {
    pub fn new(
        rpc: Arc<dyn RpcBroadcaster>,
        coin_info: Arc<dyn CoinInfoProvider>,
        keypair: Keypair,
        compute_unit_limit: u32,
    ) -> Self {
        Self {
            rpc,
            coin_info,
            keypair,
            compute_unit_limit,
        }
    }

    pub fn payer(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Returns the ATA address plus a creation instruction when the account
    /// does not exist yet; the creation rides in the same transaction as the
    /// buy so there is no separate confirmation wait.
    async fn token_account_with_create(
        &self,
        mint: &Pubkey,
    ) -> Result<(Pubkey, Option<Instruction>), TradeClientError> {
        let owner = self.keypair.pubkey();
        let ata = spl_associated_token_account::get_associated_token_address(&owner, mint);

        let exists = self
            .rpc
            .account_exists(&ata)
            .await
            .map_err(|e| TradeClientError::AccountLookup(e.to_string()))?;
        if exists {
            debug!(ata = %ata, "Associated token account already exists");
            return Ok((ata, None));
        }

        let create_ix = spl_associated_token_account::instruction::create_associated_token_account(
            &owner,
            &owner,
            mint,
            &spl_token::id(),
        );
        Ok((ata, Some(create_ix)))
    }

    async fn sign_and_send(
        &self,
        instructions: &[Instruction],
    ) -> Result<Signature, TradeClientError> {
        let blockhash = self
            .rpc
            .latest_blockhash()
            .await
            .map_err(|e| TradeClientError::BlockhashFetch(e.to_string()))?;

        let payer = self.keypair.pubkey();
        let message = MessageV0::try_compile(&payer, instructions, &[], blockhash)
            .map_err(|e| TradeClientError::MessageCompile(e.to_string()))?;
        let tx = solana_sdk::transaction::VersionedTransaction::try_new(
            VersionedMessage::V0(message),
            &[&self.keypair],
        )
        .map_err(|e| TradeClientError::SigningFailed(e.to_string()))?;

        self.rpc
            .send_transaction(tx)
            .await
            .map_err(|e| TradeClientError::Submission(e.to_string()))
    }
}

#[async_trait]
impl TradeExecutor for PumpTradeClient {
    async fn buy_token_with_sol(
        &self,
        mint: &str,
        bonding_curve: &str,
        associated_bonding_curve: &str,
        sol_amount: f64,
        slippage: f64,
    ) -> Result<BuyTokenResult, TradeClientError> {
        let mint_pubkey = parse_pubkey(mint)?;
        let bonding_curve_pubkey = parse_pubkey(bonding_curve)?;
        let associated_bonding_curve_pubkey = parse_pubkey(associated_bonding_curve)?;

        let (ata, ata_create) = self.token_account_with_create(&mint_pubkey).await?;

        let price = self
            .coin_info
            .price_in_sol_from_bonding_curve(bonding_curve)
            .await
            .map_err(|e| TradeClientError::PriceLookup(e.to_string()))?;
        let amounts = buy_token_amounts(sol_amount, price, slippage)?;

        let data = encode_buy(amounts.amount_base_units, amounts.max_amount_base_units);
        let buy_ix = Instruction::new_with_bytes(
            PUMP_PROGRAM,
            &data,
            buy_accounts(
                mint_pubkey,
                bonding_curve_pubkey,
                associated_bonding_curve_pubkey,
                ata,
                self.keypair.pubkey(),
            ),
        );

        let instructions = trade_instructions(self.compute_unit_limit, ata_create, buy_ix);
        let signature = self.sign_and_send(&instructions).await?;

        info!(
            mint = %mint,
            signature = %signature,
            amount = amounts.amount_base_units,
            max_amount = amounts.max_amount_base_units,
            "Buy transaction submitted"
        );

        Ok(BuyTokenResult {
            signature,
            amount_base_units: amounts.amount_base_units,
            max_amount_base_units: amounts.max_amount_base_units,
            associated_token_account: ata,
            token_amount: amounts.token_amount,
        })
    }

    async fn sell_token(
        &self,
        mint: &str,
        bonding_curve: &str,
        associated_bonding_curve: &str,
        position: &BuyTokenResult,
        slippage: f64,
    ) -> Result<Signature, TradeClientError> {
        let mint_pubkey = parse_pubkey(mint)?;
        let bonding_curve_pubkey = parse_pubkey(bonding_curve)?;
        let associated_bonding_curve_pubkey = parse_pubkey(associated_bonding_curve)?;

        let price = self
            .coin_info
            .price_in_sol_from_bonding_curve(bonding_curve)
            .await
            .map_err(|e| TradeClientError::PriceLookup(e.to_string()))?;
        let min_output = min_sell_output(position.amount_base_units, price, slippage);

        let data = encode_sell(position.amount_base_units, min_output);
        let sell_ix = Instruction::new_with_bytes(
            PUMP_PROGRAM,
            &data,
            sell_accounts(
                mint_pubkey,
                bonding_curve_pubkey,
                associated_bonding_curve_pubkey,
                position.associated_token_account,
                self.keypair.pubkey(),
            ),
        );

        let instructions = trade_instructions(self.compute_unit_limit, None, sell_ix);
        let signature = self.sign_and_send(&instructions).await?;

        info!(
            mint = %mint,
            signature = %signature,
            amount = position.amount_base_units,
            min_output = min_output,
            "Sell transaction submitted"
        );

        Ok(signature)
    }
}

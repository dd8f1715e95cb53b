//! Migration sequencer
//!
//! Drives the fixed deploy → initialize → verify pipeline of the POSDAO
//! contract set:
//! - Legacy reward precheck
//! - Token (fixed), six upgradable contracts, Registry (fixed)
//! - ValidatorSet, Staking, BlockReward, Random, TxPermission, Certifier
//! - Initial mint and stake
//!
//! Every read-back is a hard assertion. The first mismatch aborts the run.

use crate::abi::{address_array, checksum, Address, Token, U256};
use crate::chain::ChainConnection;
use crate::compiler::ContractLibrary;
use crate::config::MigrationSettings;
use crate::contract::ContractHandle;
use crate::deployer::{ContractDeployer, Deployment};
use crate::error::{ConfigError, InvariantViolation, TransitError};
use crate::types::{ContractKind, MigrationParameters, TransitionBundle};
use std::fmt::Debug;

/// Smallest `k * round_length + 1` strictly above `current + settle_margin`
///
/// Returns `None` for a zero round length or on overflow.
#[must_use]
pub fn transition_block(current: u64, settle_margin: u64, round_length: u64) -> Option<u64> {
    if round_length == 0 {
        return None;
    }
    current
        .checked_add(settle_margin)?
        .div_ceil(round_length)
        .checked_mul(round_length)?
        .checked_add(1)
}

/// Handles of the freshly deployed contract set
#[derive(Debug, Clone)]
pub struct DeployedContracts {
    pub token: ContractHandle,
    pub validator_set: ContractHandle,
    pub staking: ContractHandle,
    pub block_reward: ContractHandle,
    pub random: ContractHandle,
    pub tx_permission: ContractHandle,
    pub certifier: ContractHandle,
    pub registry: ContractHandle,
}

impl DeployedContracts {
    /// Bundle for the spec document
    #[must_use]
    pub fn bundle(&self, transition_block: u64, bridges: &[Address]) -> TransitionBundle {
        TransitionBundle {
            transition_block,
            validator_set: self.validator_set.address(),
            staking: self.staking.address(),
            block_reward: self.block_reward.address(),
            random: self.random.address(),
            tx_permission: self.tx_permission.address(),
            certifier: self.certifier.address(),
            registry: self.registry.address(),
            token: self.token.address(),
            erc_to_native_bridges: bridges.to_vec(),
        }
    }
}

/// Cross-references between the token and the contracts that use it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLink {
    /// `Staking.setErc677TokenContract(token)`
    StakingKnowsToken,
    /// `Token.setStakingContract(staking)`
    TokenKnowsStaking,
    /// `Token.setBlockRewardContract(blockReward)`
    TokenKnowsBlockReward,
}

impl TokenLink {
    fn parts<'c>(
        self,
        contracts: &'c DeployedContracts,
    ) -> (&'c ContractHandle, &'static str, &'static str, &'c ContractHandle) {
        match self {
            Self::StakingKnowsToken => (
                &contracts.staking,
                "setErc677TokenContract",
                "erc677TokenContract",
                &contracts.token,
            ),
            Self::TokenKnowsStaking => (
                &contracts.token,
                "setStakingContract",
                "stakingContract",
                &contracts.staking,
            ),
            Self::TokenKnowsBlockReward => (
                &contracts.token,
                "setBlockRewardContract",
                "blockRewardContract",
                &contracts.block_reward,
            ),
        }
    }

    /// Submit the setter
    pub async fn wire(
        self,
        contracts: &DeployedContracts,
        conn: &ChainConnection,
    ) -> Result<(), TransitError> {
        let (holder, setter, _, target) = self.parts(contracts);
        holder
            .send(conn, setter, &[Token::Address(target.address())])
            .await?;
        Ok(())
    }

    /// Read the getter back
    pub async fn verify(
        self,
        contracts: &DeployedContracts,
        conn: &ChainConnection,
    ) -> Result<(), TransitError> {
        let (holder, _, getter, target) = self.parts(contracts);
        let actual = holder.read_address(conn, getter, &[]).await?;
        expect_eq(&check_name(holder, getter), target.address(), actual)?;
        Ok(())
    }
}

/// Result of a completed migration
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub contracts: DeployedContracts,
    pub bundle: TransitionBundle,
}

/// Sequences deployment and initialization of the POSDAO set
#[derive(Debug)]
pub struct MigrationSequencer<'a> {
    conn: &'a ChainConnection,
    library: &'a ContractLibrary,
    params: &'a MigrationParameters,
    settings: &'a MigrationSettings,
    legacy_block_reward: Address,
}

impl<'a> MigrationSequencer<'a> {
    /// `legacy_block_reward` is the POA reward contract being replaced
    #[must_use]
    pub fn new(
        conn: &'a ChainConnection,
        library: &'a ContractLibrary,
        params: &'a MigrationParameters,
        settings: &'a MigrationSettings,
        legacy_block_reward: Address,
    ) -> Self {
        Self {
            conn,
            library,
            params,
            settings,
            legacy_block_reward,
        }
    }

    /// Run every step in dependency order
    ///
    /// # Errors
    /// The first chain rejection, failed read-back or load failure.
    pub async fn run(&self) -> Result<MigrationOutcome, TransitError> {
        self.check_legacy_rewards().await?;

        let contracts = self.deploy_all().await?;
        self.init_validator_set(&contracts).await?;

        // Staking needs the transition height as its first epoch start
        let transition_block = self.derive_transition_block().await?;

        self.init_staking(&contracts, transition_block).await?;
        self.init_block_reward(&contracts).await?;
        self.init_random(&contracts).await?;
        self.init_tx_permission(&contracts).await?;
        self.init_certifier(&contracts).await?;
        self.mint_and_stake(&contracts).await?;

        let bundle = contracts.bundle(transition_block, &self.settings.erc_to_native_bridges);
        tracing::info!(transition_block, "contract set initialized");
        Ok(MigrationOutcome { contracts, bundle })
    }

    /// `lastBlockProcessed()` of the legacy reward contract must equal the
    /// current height and be non-zero
    pub async fn check_legacy_rewards(&self) -> Result<(), TransitError> {
        tracing::info!(
            address = %checksum(&self.legacy_block_reward),
            "checking legacy block reward contract"
        );
        let compiled = self.library.load(ContractKind::LegacyBlockReward).await?;
        let legacy = ContractHandle::new(
            ContractKind::LegacyBlockReward,
            self.legacy_block_reward,
            compiled.interface,
            compiled.bytecode,
            false,
        );

        let last_processed = legacy.read_uint(self.conn, "lastBlockProcessed", &[]).await?;
        let current = self.conn.block_number().await?;
        if last_processed.is_zero() || last_processed != U256::from(current) {
            return Err(InvariantViolation::new(
                check_name(&legacy, "lastBlockProcessed"),
                format!("{current} (non-zero)"),
                last_processed.to_string(),
            )
            .into());
        }
        tracing::debug!(%last_processed, "legacy rewards are live");
        Ok(())
    }

    async fn deploy_all(&self) -> Result<DeployedContracts, TransitError> {
        let proxy = self.library.load(ContractKind::UpgradeProxy).await?;
        let deployer = ContractDeployer::new(self.conn, &proxy, self.params.owner);
        let token_settings = &self.settings.token;

        let token = deployer
            .deploy(
                ContractKind::Token,
                Deployment::fixed(
                    self.library.load(ContractKind::Token).await?,
                    vec![
                        Token::String(token_settings.name.clone()),
                        Token::String(token_settings.symbol.clone()),
                        Token::Uint(U256::from(token_settings.decimals)),
                    ],
                ),
            )
            .await?;

        let mut upgradable = Vec::with_capacity(6);
        for kind in [
            ContractKind::ValidatorSet,
            ContractKind::Staking,
            ContractKind::BlockReward,
            ContractKind::Random,
            ContractKind::TxPermission,
            ContractKind::Certifier,
        ] {
            let implementation = self.library.load(kind).await?;
            upgradable.push(
                deployer
                    .deploy(kind, Deployment::upgradable(implementation))
                    .await?,
            );
        }
        let [validator_set, staking, block_reward, random, tx_permission, certifier]: [ContractHandle; 6] =
            upgradable
                .try_into()
                .map_err(|_| ConfigError::invalid("contracts", "upgradable set incomplete"))?;

        let registry = deployer
            .deploy(
                ContractKind::Registry,
                Deployment::fixed(
                    self.library.load(ContractKind::Registry).await?,
                    vec![
                        Token::Address(certifier.address()),
                        Token::Address(self.params.owner),
                    ],
                ),
            )
            .await?;

        Ok(DeployedContracts {
            token,
            validator_set,
            staking,
            block_reward,
            random,
            tx_permission,
            certifier,
            registry,
        })
    }

    async fn init_validator_set(&self, c: &DeployedContracts) -> Result<(), TransitError> {
        tracing::info!("initializing ValidatorSet");
        let vs = &c.validator_set;
        let params = self.params;

        let mut args = Vec::with_capacity(7);
        // older ValidatorSet builds take no legacy reward reference
        if vs.interface().function("initialize", 7).is_ok() {
            args.push(Token::Address(self.legacy_block_reward));
        }
        args.extend([
            Token::Address(c.block_reward.address()),
            Token::Address(c.random.address()),
            Token::Address(c.staking.address()),
            address_array(&params.mining_addresses),
            address_array(&params.staking_addresses),
            Token::Bool(params.first_validator_unremovable),
        ]);
        vs.send(self.conn, "initialize", &args).await?;

        self.expect_initialized(vs).await?;
        self.expect_address(vs, "blockRewardContract", c.block_reward.address()).await?;
        self.expect_address(vs, "randomContract", c.random.address()).await?;
        self.expect_address(vs, "stakingContract", c.staking.address()).await?;
        self.expect_addresses(vs, "getValidators", &params.mining_addresses).await?;
        self.expect_addresses(vs, "getPendingValidators", &params.mining_addresses).await?;
        self.expect_address(vs, "unremovableValidator", params.expected_unremovable()).await?;

        for (mining, staking) in params.mining_addresses.iter().zip(&params.staking_addresses) {
            let is_validator = vs
                .read_bool(self.conn, "isValidator", &[Token::Address(*mining)])
                .await?;
            expect_eq(&format!("{}({})", check_name(vs, "isValidator"), checksum(mining)), true, is_validator)?;

            let paired = vs
                .read_address(self.conn, "stakingByMiningAddress", &[Token::Address(*mining)])
                .await?;
            expect_eq(
                &format!("{}({})", check_name(vs, "stakingByMiningAddress"), checksum(mining)),
                *staking,
                paired,
            )?;
        }
        Ok(())
    }

    async fn derive_transition_block(&self) -> Result<u64, TransitError> {
        let current = self.conn.block_number().await?;
        let block = transition_block(
            current,
            self.settings.settle_margin,
            self.params.collect_round_length,
        )
        .ok_or_else(|| {
            ConfigError::invalid("COLLECT_ROUND_LENGTH", "transition block is not computable")
        })?;
        tracing::info!(
            current,
            settle_margin = self.settings.settle_margin,
            round_length = self.params.collect_round_length,
            transition_block = block,
            "transition block derived"
        );
        Ok(block)
    }

    async fn init_staking(
        &self,
        c: &DeployedContracts,
        transition_block: u64,
    ) -> Result<(), TransitError> {
        tracing::info!("initializing Staking");
        let staking = &c.staking;
        let params = self.params;

        staking
            .send(
                self.conn,
                "initialize",
                &[
                    Token::Address(c.validator_set.address()),
                    address_array(&params.staking_addresses),
                    Token::Uint(params.delegator_min_stake),
                    Token::Uint(params.candidate_min_stake),
                    Token::Uint(U256::from(params.staking_epoch_duration)),
                    Token::Uint(U256::from(transition_block)),
                    Token::Uint(U256::from(params.stake_withdraw_disallow_period)),
                ],
            )
            .await?;
        TokenLink::StakingKnowsToken.wire(c, self.conn).await?;
        TokenLink::TokenKnowsStaking.wire(c, self.conn).await?;

        self.expect_initialized(staking).await?;
        self.expect_address(staking, "validatorSetContract", c.validator_set.address()).await?;
        self.expect_uint(staking, "delegatorMinStake", params.delegator_min_stake).await?;
        self.expect_uint(staking, "candidateMinStake", params.candidate_min_stake).await?;
        self.expect_uint(staking, "stakingEpochDuration", U256::from(params.staking_epoch_duration))
            .await?;
        self.expect_uint(staking, "stakingEpochStartBlock", U256::from(transition_block)).await?;
        self.expect_uint(
            staking,
            "stakeWithdrawDisallowPeriod",
            U256::from(params.stake_withdraw_disallow_period),
        )
        .await?;
        self.expect_addresses(staking, "getPools", &params.staking_addresses).await?;
        TokenLink::StakingKnowsToken.verify(c, self.conn).await?;
        TokenLink::TokenKnowsStaking.verify(c, self.conn).await?;
        Ok(())
    }

    async fn init_block_reward(&self, c: &DeployedContracts) -> Result<(), TransitError> {
        tracing::info!("initializing BlockReward");
        let block_reward = &c.block_reward;
        let bridges = &self.settings.erc_to_native_bridges;

        block_reward
            .send(
                self.conn,
                "initialize",
                &[
                    Token::Address(c.validator_set.address()),
                    Token::Address(self.legacy_block_reward),
                ],
            )
            .await?;
        block_reward
            .send(self.conn, "setErcToNativeBridgesAllowed", &[address_array(bridges)])
            .await?;
        TokenLink::TokenKnowsBlockReward.wire(c, self.conn).await?;

        self.expect_initialized(block_reward).await?;
        self.expect_address(block_reward, "validatorSetContract", c.validator_set.address())
            .await?;
        self.expect_addresses(block_reward, "ercToNativeBridgesAllowed", bridges).await?;
        TokenLink::TokenKnowsBlockReward.verify(c, self.conn).await?;
        Ok(())
    }

    async fn init_random(&self, c: &DeployedContracts) -> Result<(), TransitError> {
        tracing::info!("initializing Random");
        let random = &c.random;
        let round_length = U256::from(self.params.collect_round_length);

        random
            .send(
                self.conn,
                "initialize",
                &[Token::Uint(round_length), Token::Address(c.validator_set.address())],
            )
            .await?;

        self.expect_initialized(random).await?;
        self.expect_address(random, "validatorSetContract", c.validator_set.address()).await?;
        self.expect_uint(random, "collectRoundLength", round_length).await?;
        Ok(())
    }

    async fn init_tx_permission(&self, c: &DeployedContracts) -> Result<(), TransitError> {
        tracing::info!("initializing TxPermission");
        let tx_permission = &c.tx_permission;
        let owner = self.params.owner;

        tx_permission
            .send(
                self.conn,
                "initialize",
                &[address_array(&[owner]), Token::Address(c.validator_set.address())],
            )
            .await?;

        self.expect_initialized(tx_permission).await?;
        self.expect_address(tx_permission, "validatorSetContract", c.validator_set.address())
            .await?;
        let allowed = tx_permission
            .read_bool(self.conn, "isSenderAllowed", &[Token::Address(owner)])
            .await?;
        expect_eq(&check_name(tx_permission, "isSenderAllowed"), true, allowed)?;
        self.expect_addresses(tx_permission, "allowedSenders", &[owner]).await?;
        Ok(())
    }

    async fn init_certifier(&self, c: &DeployedContracts) -> Result<(), TransitError> {
        tracing::info!("initializing Certifier");
        let certifier = &c.certifier;
        let owner = self.params.owner;

        certifier
            .send(
                self.conn,
                "initialize",
                &[address_array(&[owner]), Token::Address(c.validator_set.address())],
            )
            .await?;

        self.expect_initialized(certifier).await?;
        self.expect_address(certifier, "validatorSetContract", c.validator_set.address()).await?;
        let certified = certifier
            .read_bool(self.conn, "certified", &[Token::Address(owner)])
            .await?;
        expect_eq(&check_name(certifier, "certified"), true, certified)?;
        Ok(())
    }

    async fn mint_and_stake(&self, c: &DeployedContracts) -> Result<(), TransitError> {
        let amount = self
            .params
            .initial_mint()
            .ok_or_else(|| ConfigError::invalid("candidate_min_stake", "initial mint overflows"))?;
        tracing::info!(%amount, pools = self.params.pool_count(), "minting and staking initial tokens");

        let staking_address = c.staking.address();
        c.token
            .send(
                self.conn,
                "mint",
                &[Token::Address(staking_address), Token::Uint(amount)],
            )
            .await?;
        self.expect_uint(&c.token, "totalSupply", amount).await?;
        let balance = c
            .token
            .read_uint(self.conn, "balanceOf", &[Token::Address(staking_address)])
            .await?;
        expect_eq(&check_name(&c.token, "balanceOf(staking)"), amount, balance)?;

        c.staking
            .send(self.conn, "initialValidatorStake", &[Token::Uint(amount)])
            .await?;
        for pool in &self.params.staking_addresses {
            let stake = c
                .staking
                .read_uint(
                    self.conn,
                    "stakeAmount",
                    &[Token::Address(*pool), Token::Address(*pool)],
                )
                .await?;
            expect_eq(
                &format!("{}({})", check_name(&c.staking, "stakeAmount"), checksum(pool)),
                self.params.candidate_min_stake,
                stake,
            )?;
        }
        Ok(())
    }

    async fn expect_initialized(&self, handle: &ContractHandle) -> Result<(), TransitError> {
        let initialized = handle.read_bool(self.conn, "isInitialized", &[]).await?;
        expect_eq(&check_name(handle, "isInitialized"), true, initialized)?;
        Ok(())
    }

    async fn expect_address(
        &self,
        handle: &ContractHandle,
        method: &str,
        expected: Address,
    ) -> Result<(), TransitError> {
        let actual = handle.read_address(self.conn, method, &[]).await?;
        expect_eq(&check_name(handle, method), expected, actual)?;
        Ok(())
    }

    async fn expect_addresses(
        &self,
        handle: &ContractHandle,
        method: &str,
        expected: &[Address],
    ) -> Result<(), TransitError> {
        let actual = handle.read_addresses(self.conn, method, &[]).await?;
        expect_eq(&check_name(handle, method), expected, actual.as_slice())?;
        Ok(())
    }

    async fn expect_uint(
        &self,
        handle: &ContractHandle,
        method: &str,
        expected: U256,
    ) -> Result<(), TransitError> {
        let actual = handle.read_uint(self.conn, method, &[]).await?;
        expect_eq(&check_name(handle, method), expected, actual)?;
        Ok(())
    }
}

fn check_name(handle: &ContractHandle, method: &str) -> String {
    format!("{}.{method}", handle.name())
}

/// Hard assertion on a read-back value
///
/// # Errors
/// - `InvariantViolation` carrying both values when they differ
pub fn expect_eq<T: PartialEq + Debug>(
    check: &str,
    expected: T,
    actual: T,
) -> Result<(), InvariantViolation> {
    if expected == actual {
        tracing::debug!(check, "invariant holds");
        Ok(())
    } else {
        tracing::error!(check, ?expected, ?actual, "invariant violated");
        Err(InvariantViolation::new(
            check,
            format!("{expected:?}"),
            format!("{actual:?}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reference_heights() {
        assert_eq!(transition_block(1000, 31, 100), Some(1101));
        assert_eq!(transition_block(1069, 31, 100), Some(1101));
        assert_eq!(transition_block(1070, 31, 100), Some(1201));
        assert_eq!(transition_block(0, 0, 100), Some(1));
        assert_eq!(transition_block(5, 31, 0), None);
        assert_eq!(transition_block(u64::MAX, 31, 100), None);
    }

    #[test]
    fn expect_eq_reports_both_sides() {
        let err = expect_eq("Random.collectRoundLength", U256::from(100u64), U256::from(50u64)).unwrap_err();
        assert_eq!(err.expected, "100");
        assert_eq!(err.actual, "50");
        assert!(expect_eq("x", true, true).is_ok());
    }

    #[test]
    fn address_lists_compare_by_value() {
        let lower = crate::abi::parse_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        let mixed = crate::abi::parse_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").unwrap();
        let zero = Address::zero();
        assert!(expect_eq("list", &[lower][..], &[mixed][..]).is_ok());
        assert!(expect_eq("order", &[lower, zero][..], &[zero, lower][..]).is_err());
    }

    proptest! {
        #[test]
        fn transition_block_properties(
            current in 0u64..10_000_000,
            margin in 0u64..1_000,
            round in 1u64..10_000,
        ) {
            let block = transition_block(current, margin, round).unwrap();
            prop_assert!(block > current + margin);
            prop_assert_eq!(block % round, 1 % round);
            // the previous aligned candidate is not past the margin
            prop_assert!(block <= round || block - round <= current + margin);
        }
    }
}

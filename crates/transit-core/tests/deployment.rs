//! Deployment policies and contract handles against the simulated chain

use transit_core::{
    ChainError, ContractDeployer, ContractKind, Deployment, MigrationParameters,
    MigrationSequencer, MigrationSettings, Token, TransitError, U256,
};
use transit_core::abi::address_array;
use transit_test_utils::{compiled, connection, owner, sample_parameters, simulated_library, SimulatedChain};

#[tokio::test]
async fn upgradable_deployment_sits_behind_proxy() {
    let chain = SimulatedChain::new();
    let conn = connection(&chain);
    let proxy = compiled("AdminUpgradeabilityProxy");
    let deployer = ContractDeployer::new(&conn, &proxy, owner());

    let handle = deployer
        .deploy(ContractKind::Random, Deployment::upgradable(compiled("RandomAuRa")))
        .await
        .unwrap();

    let deployments = chain.deployments();
    assert_eq!(deployments.len(), 2);
    assert_eq!(deployments[0].0, "RandomAuRa");
    assert_eq!(deployments[1], ("AdminUpgradeabilityProxy".to_string(), handle.address()));

    let implementation = deployments[0].1;
    assert_ne!(implementation, handle.address());
    assert_eq!(chain.storage(handle.address(), "implementation"), Some(Token::Address(implementation)));
    assert_eq!(chain.storage(handle.address(), "admin"), Some(Token::Address(owner())));
    assert!(handle.is_upgrade_proxied());

    // the implementation's interface answers at the proxy address
    handle
        .send(&conn, "initialize", &[Token::Uint(U256::from(100u64)), Token::Address(owner())])
        .await
        .unwrap();
    assert_eq!(handle.read_uint(&conn, "collectRoundLength", &[]).await.unwrap(), U256::from(100u64));
    assert_eq!(chain.storage(implementation, "collectRoundLength"), None);
}

#[tokio::test]
async fn fixed_deployment_passes_constructor_arguments() {
    let chain = SimulatedChain::new();
    let conn = connection(&chain);
    let proxy = compiled("AdminUpgradeabilityProxy");
    let deployer = ContractDeployer::new(&conn, &proxy, owner());

    let handle = deployer
        .deploy(
            ContractKind::Token,
            Deployment::fixed(
                compiled("ERC677BridgeTokenRewardableMock"),
                vec![
                    Token::String("STAKE".to_string()),
                    Token::String("STAKE".to_string()),
                    Token::Uint(U256::from(18u64)),
                ],
            ),
        )
        .await
        .unwrap();

    assert_eq!(chain.deployments().len(), 1);
    assert!(!handle.is_upgrade_proxied());
    assert_eq!(handle.read_uint(&conn, "decimals", &[]).await.unwrap(), U256::from(18u64));
    let symbol = handle.read(&conn, "symbol", &[]).await.unwrap();
    assert_eq!(symbol, vec![Token::String("STAKE".to_string())]);
}

#[tokio::test]
async fn constructor_mismatch_is_rejected_before_sending() {
    let chain = SimulatedChain::new();
    let conn = connection(&chain);
    let proxy = compiled("AdminUpgradeabilityProxy");
    let deployer = ContractDeployer::new(&conn, &proxy, owner());

    let err = deployer
        .deploy(
            ContractKind::Registry,
            Deployment::fixed(compiled("Registry"), vec![Token::Bool(true)]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TransitError::Abi(_)));
    assert_eq!(chain.submitted(), 0);
}

#[tokio::test]
async fn reverted_call_surfaces_as_chain_error() {
    let chain = SimulatedChain::new();
    let conn = connection(&chain);
    let proxy = compiled("AdminUpgradeabilityProxy");
    let deployer = ContractDeployer::new(&conn, &proxy, owner());
    let handle = deployer
        .deploy(ContractKind::Certifier, Deployment::upgradable(compiled("Certifier")))
        .await
        .unwrap();

    let args = [address_array(&[owner()]), Token::Address(owner())];
    handle.send(&conn, "initialize", &args).await.unwrap();
    let err = handle.send(&conn, "initialize", &args).await.unwrap_err();
    assert!(matches!(err, ChainError::Reverted { .. }));
}

#[tokio::test]
async fn sequencer_wires_token_both_ways_and_reward_one_way() {
    let chain = SimulatedChain::at_height(200);
    let legacy = chain.install_legacy_block_reward();
    let conn = connection(&chain);
    let library = simulated_library();
    let params: MigrationParameters = sample_parameters(2);
    let settings = MigrationSettings::default();

    let outcome = MigrationSequencer::new(&conn, &library, &params, &settings, legacy)
        .run()
        .await
        .unwrap();
    let c = &outcome.contracts;

    assert_eq!(
        chain.storage(c.staking.address(), "erc677TokenContract"),
        Some(Token::Address(c.token.address()))
    );
    assert_eq!(
        chain.storage(c.token.address(), "stakingContract"),
        Some(Token::Address(c.staking.address()))
    );
    assert_eq!(
        chain.storage(c.token.address(), "blockRewardContract"),
        Some(Token::Address(c.block_reward.address()))
    );
    assert_eq!(
        chain.storage(c.validator_set.address(), "blockRewardContractPrev"),
        Some(Token::Address(legacy))
    );
    assert_eq!(
        chain.storage(c.registry.address(), "certifier"),
        Some(Token::Address(c.certifier.address()))
    );
    assert_eq!(outcome.bundle.erc_to_native_bridges, settings.erc_to_native_bridges);
}

#[tokio::test]
async fn contracts_deploy_in_dependency_order() {
    let chain = SimulatedChain::at_height(200);
    let legacy = chain.install_legacy_block_reward();
    let conn = connection(&chain);
    let library = simulated_library();
    let params = sample_parameters(2);
    let settings = MigrationSettings::default();

    MigrationSequencer::new(&conn, &library, &params, &settings, legacy)
        .run()
        .await
        .unwrap();

    let names: Vec<String> = chain.deployments().into_iter().map(|(name, _)| name).collect();
    let proxy = "AdminUpgradeabilityProxy";
    assert_eq!(
        names,
        vec![
            "ERC677BridgeTokenRewardableMock",
            "ValidatorSetAuRa",
            proxy,
            "StakingAuRa",
            proxy,
            "BlockRewardAuRa",
            proxy,
            "RandomAuRa",
            proxy,
            "TxPermission",
            proxy,
            "Certifier",
            proxy,
            "Registry",
        ]
    );

    let log = chain.transaction_log();
    let position = |entry: &str| log.iter().position(|e| e == entry).unwrap();
    assert!(position("ValidatorSetAuRa.initialize") < position("StakingAuRa.initialize"));
    assert!(position("StakingAuRa.initialize") < position("BlockRewardAuRa.initialize"));
    assert!(position("Certifier.initialize") < position("ERC677BridgeTokenRewardableMock.mint"));
    assert!(
        position("ERC677BridgeTokenRewardableMock.mint") < position("StakingAuRa.initialValidatorStake")
    );
}

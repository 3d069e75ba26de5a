use std::collections::HashMap;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use meta_relay_adapters::RelayConfig;
use meta_relay_core::{ErrorKind, PERMISSION_DELETE};

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (format!("META_RELAY_{k}"), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

fn complete() -> Vec<(&'static str, &'static str)> {
    vec![
        ("HOST", "0x0000000000000000000000000000000000000010"),
        ("AGREEMENT", "0x0000000000000000000000000000000000000020"),
        ("FORWARDER", "0x0000000000000000000000000000000000000030"),
        ("TOKEN", "0x00000000000000000000000000000000000000a1"),
        ("OPERATOR", "0x00000000000000000000000000000000000000b2"),
    ]
}

#[test]
fn defaults_apply_without_variables() {
    let cfg = RelayConfig::from_lookup(|_| None).expect("defaults");
    assert_eq!(cfg.rpc_url, "http://127.0.0.1:8545");
    assert_eq!(cfg.chain_id, 80_001);
    assert_eq!(cfg.tx_gas, U256::from(300_000u64));
    assert_eq!(cfg.deadline_offset_secs, 3_600);
    assert_eq!(cfg.grant_level, PERMISSION_DELETE);
    assert_eq!(cfg.domain_name, "Biconomy Forwarder");
    assert!(cfg.preflight_trusted_forwarder);
    assert_eq!(cfg.receipt_poll_interval(), Duration::from_millis(1_000));
    assert_eq!(cfg.relay_api_key, None);
}

#[test]
fn variables_override_defaults() {
    let mut pairs = complete();
    pairs.extend([
        ("RPC_URL", "http://node:8545"),
        ("RELAY_URL", "https://relay.example/"),
        ("RELAY_API_KEY", "secret-key"),
        ("CHAIN_ID", "137"),
        ("TX_GAS", "0x7a120"),
        ("DEADLINE_OFFSET_SECS", " 900 "),
        ("GRANT_LEVEL", "7"),
        ("FLOW_RATE_ALLOWANCE", "385802469135802"),
        ("PREFLIGHT_TRUST", "off"),
        ("USER_DATA", "0xabcd"),
        ("RECEIPT_POLL_MS", "0"),
    ]);
    let cfg = RelayConfig::from_lookup(lookup(&pairs)).expect("overrides");

    assert_eq!(cfg.rpc_url, "http://node:8545");
    assert_eq!(cfg.relay_url, "https://relay.example");
    assert_eq!(cfg.relay_api_key.as_deref(), Some("secret-key"));
    assert_eq!(cfg.chain_id, 137);
    assert_eq!(cfg.tx_gas, U256::from(500_000u64));
    assert_eq!(cfg.deadline_offset_secs, 900);
    assert_eq!(cfg.grant_level, 7);
    assert!(!cfg.preflight_trusted_forwarder);
    assert_eq!(cfg.user_data.as_ref(), &[0xab, 0xcd]);
    // Polling never spins with a zero interval.
    assert_eq!(cfg.receipt_poll_interval(), Duration::from_millis(1));

    let ctx = cfg.session_context().expect("context");
    assert_eq!(ctx.chain_id, 137);
    assert_eq!(ctx.forwarder, Address::with_last_byte(0x30));
    assert_eq!(ctx.gas.deadline_offset_secs, 900);
    assert_eq!(ctx.forwarder_domain().verifying_contract, ctx.forwarder);
}

#[test]
fn malformed_values_are_config_errors() {
    for (key, value) in [
        ("CHAIN_ID", "polygon"),
        ("HOST", "0x1234"),
        ("PREFLIGHT_TRUST", "maybe"),
        ("GRANT_LEVEL", "256"),
    ] {
        let err = RelayConfig::from_lookup(lookup(&[(key, value)])).expect_err(key);
        assert_eq!(err.kind(), ErrorKind::Config, "{key}");
        assert!(err.to_string().contains(key), "{key}: {err}");
    }
}

#[test]
fn session_context_requires_every_address() {
    let cfg = RelayConfig::from_lookup(lookup(&complete()[..4])).expect("partial");
    let err = cfg.session_context().expect_err("operator missing");
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains("META_RELAY_OPERATOR is not set"));

    let mut pairs = complete();
    pairs.push(("DEADLINE_OFFSET_SECS", "0"));
    let cfg = RelayConfig::from_lookup(lookup(&pairs)).expect("zero offset parses");
    assert!(cfg.session_context().is_err());
}

#[test]
fn zero_http_timeout_is_rejected() {
    let mut pairs = complete();
    pairs.push(("HTTP_TIMEOUT_MS", "0"));
    let cfg = RelayConfig::from_lookup(lookup(&pairs)).expect("zero timeout parses");
    assert_eq!(cfg.http_timeout_ms, 0);

    let err = cfg.session_context().expect_err("zero timeout");
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains("META_RELAY_HTTP_TIMEOUT_MS must be positive"));
}

#[test]
fn debug_output_redacts_the_api_key() {
    let cfg = RelayConfig::from_lookup(lookup(&[("RELAY_API_KEY", "secret-key")]))
        .expect("config");
    let rendered = format!("{cfg:?}");
    assert!(!rendered.contains("secret-key"));
    assert!(rendered.contains("<redacted>"));
}

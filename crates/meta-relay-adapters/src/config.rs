use std::str::FromStr;

use alloy::primitives::{aliases::I96, Address, Bytes, U256};

use meta_relay_core::{GasPolicy, RelayError, SessionContext, PERMISSION_DELETE};

const ENV_PREFIX: &str = "META_RELAY_";

#[derive(Clone)]
pub struct RelayConfig {
    pub rpc_url: String,
    pub relay_url: String,
    pub relay_api_key: Option<String>,
    pub chain_id: u64,
    pub host: Address,
    pub agreement: Address,
    pub forwarder: Address,
    pub token: Address,
    pub operator: Address,
    pub fee_token: Address,
    pub tx_gas: U256,
    pub token_gas_price: U256,
    pub batch_id: U256,
    pub deadline_offset_secs: u64,
    pub grant_level: u8,
    pub flow_rate_allowance: I96,
    pub receipt_poll_ms: u64,
    pub http_timeout_ms: u64,
    pub domain_name: String,
    pub domain_version: String,
    pub preflight_trusted_forwarder: bool,
    pub user_data: Bytes,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_owned(),
            relay_url: "https://api.biconomy.io".to_owned(),
            relay_api_key: None,
            chain_id: 80_001,
            host: Address::ZERO,
            agreement: Address::ZERO,
            forwarder: Address::ZERO,
            token: Address::ZERO,
            operator: Address::ZERO,
            fee_token: Address::ZERO,
            tx_gas: U256::from(300_000u64),
            token_gas_price: U256::ZERO,
            batch_id: U256::ZERO,
            deadline_offset_secs: 3_600,
            grant_level: PERMISSION_DELETE,
            flow_rate_allowance: I96::ZERO,
            receipt_poll_ms: 1_000,
            http_timeout_ms: 15_000,
            domain_name: "Biconomy Forwarder".to_owned(),
            domain_version: "1".to_owned(),
            preflight_trusted_forwarder: true,
            user_data: Bytes::new(),
        }
    }
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("rpc_url", &self.rpc_url)
            .field("relay_url", &self.relay_url)
            .field("relay_api_key", &self.relay_api_key.as_ref().map(|_| "<redacted>"))
            .field("chain_id", &self.chain_id)
            .field("host", &self.host)
            .field("agreement", &self.agreement)
            .field("forwarder", &self.forwarder)
            .field("token", &self.token)
            .field("operator", &self.operator)
            .field("fee_token", &self.fee_token)
            .field("tx_gas", &self.tx_gas)
            .field("token_gas_price", &self.token_gas_price)
            .field("batch_id", &self.batch_id)
            .field("deadline_offset_secs", &self.deadline_offset_secs)
            .field("grant_level", &self.grant_level)
            .field("flow_rate_allowance", &self.flow_rate_allowance)
            .field("receipt_poll_ms", &self.receipt_poll_ms)
            .field("http_timeout_ms", &self.http_timeout_ms)
            .field("domain_name", &self.domain_name)
            .field("domain_version", &self.domain_version)
            .field("preflight_trusted_forwarder", &self.preflight_trusted_forwarder)
            .finish_non_exhaustive()
    }
}

impl RelayConfig {
    /// Overlay `META_RELAY_*` environment variables on the defaults.
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RelayConfig::from_env`] with an arbitrary variable source.
    /// Keys are looked up with the `META_RELAY_` prefix.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };
        let mut cfg = Self::default();

        if let Some(v) = get("RPC_URL") {
            cfg.rpc_url = v;
        }
        if let Some(v) = get("RELAY_URL") {
            cfg.relay_url = v.trim_end_matches('/').to_owned();
        }
        if let Some(v) = get("RELAY_API_KEY") {
            cfg.relay_api_key = Some(v);
        }
        if let Some(v) = get("DOMAIN_NAME") {
            cfg.domain_name = v;
        }
        if let Some(v) = get("DOMAIN_VERSION") {
            cfg.domain_version = v;
        }

        parse_into(&get, "CHAIN_ID", &mut cfg.chain_id)?;
        parse_into(&get, "HOST", &mut cfg.host)?;
        parse_into(&get, "AGREEMENT", &mut cfg.agreement)?;
        parse_into(&get, "FORWARDER", &mut cfg.forwarder)?;
        parse_into(&get, "TOKEN", &mut cfg.token)?;
        parse_into(&get, "OPERATOR", &mut cfg.operator)?;
        parse_into(&get, "FEE_TOKEN", &mut cfg.fee_token)?;
        parse_into(&get, "TX_GAS", &mut cfg.tx_gas)?;
        parse_into(&get, "TOKEN_GAS_PRICE", &mut cfg.token_gas_price)?;
        parse_into(&get, "BATCH_ID", &mut cfg.batch_id)?;
        parse_into(&get, "DEADLINE_OFFSET_SECS", &mut cfg.deadline_offset_secs)?;
        parse_into(&get, "GRANT_LEVEL", &mut cfg.grant_level)?;
        parse_into(&get, "FLOW_RATE_ALLOWANCE", &mut cfg.flow_rate_allowance)?;
        parse_into(&get, "RECEIPT_POLL_MS", &mut cfg.receipt_poll_ms)?;
        parse_into(&get, "HTTP_TIMEOUT_MS", &mut cfg.http_timeout_ms)?;
        parse_into(&get, "USER_DATA", &mut cfg.user_data)?;

        if let Some(v) = get("PREFLIGHT_TRUST") {
            cfg.preflight_trusted_forwarder = parse_flag(&v).ok_or_else(|| {
                RelayError::Config(format!("{ENV_PREFIX}PREFLIGHT_TRUST: expected a boolean, got '{v}'"))
            })?;
        }

        Ok(cfg)
    }

    pub fn receipt_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.receipt_poll_ms.max(1))
    }

    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.http_timeout_ms)
    }

    /// Core session context. Every contract address must be set.
    pub fn session_context(&self) -> Result<SessionContext, RelayError> {
        for (name, address) in [
            ("HOST", self.host),
            ("AGREEMENT", self.agreement),
            ("FORWARDER", self.forwarder),
            ("TOKEN", self.token),
            ("OPERATOR", self.operator),
        ] {
            if address.is_zero() {
                return Err(RelayError::Config(format!("{ENV_PREFIX}{name} is not set")));
            }
        }
        if self.deadline_offset_secs == 0 {
            return Err(RelayError::Config(format!(
                "{ENV_PREFIX}DEADLINE_OFFSET_SECS must be positive"
            )));
        }
        if self.http_timeout_ms == 0 {
            return Err(RelayError::Config(format!(
                "{ENV_PREFIX}HTTP_TIMEOUT_MS must be positive"
            )));
        }

        Ok(SessionContext {
            chain_id: self.chain_id,
            host: self.host,
            agreement: self.agreement,
            forwarder: self.forwarder,
            token: self.token,
            operator: self.operator,
            fee_token: self.fee_token,
            gas: GasPolicy {
                tx_gas: self.tx_gas,
                token_gas_price: self.token_gas_price,
                batch_id: self.batch_id,
                deadline_offset_secs: self.deadline_offset_secs,
            },
            domain_name: self.domain_name.clone(),
            domain_version: self.domain_version.clone(),
            user_data: self.user_data.clone(),
            preflight_trusted_forwarder: self.preflight_trusted_forwarder,
        })
    }
}

fn parse_into<T, G>(get: &G, name: &str, slot: &mut T) -> Result<(), RelayError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(name) {
        *slot = raw
            .parse()
            .map_err(|e| RelayError::Config(format!("{ENV_PREFIX}{name}: invalid value '{raw}': {e}")))?;
    }
    Ok(())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

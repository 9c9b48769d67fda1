//! Validated runtime configuration.
//!
//! The daemon binary parses a TOML file into [`NodeConfig`] and hands the
//! struct to the core; nothing in the core reads files or the process
//! environment directly. Environment lookups go through an injected callback
//! so tests can fake them. Precedence for every overridable value is
//! CLI flag > environment variable > configuration file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::amount::Amount;
use crate::error::ConfigError;
use crate::tx::Module;

/// Environment variable holding the keystore passphrase.
pub const ENV_VALIDATOR_PASS: &str = "NHB_VALIDATOR_PASS";
/// Environment variable overriding the genesis file path.
pub const ENV_GENESIS: &str = "NHB_GENESIS";
/// Environment variable opting in to autogenesis.
pub const ENV_ALLOW_AUTOGENESIS: &str = "NHB_ALLOW_AUTOGENESIS";
/// Environment variables overriding the four consensus timeouts (millis).
pub const ENV_TIMEOUT_PROPOSAL: &str = "NHB_CONSENSUS_TIMEOUT_PROPOSAL";
pub const ENV_TIMEOUT_PREVOTE: &str = "NHB_CONSENSUS_TIMEOUT_PREVOTE";
pub const ENV_TIMEOUT_PRECOMMIT: &str = "NHB_CONSENSUS_TIMEOUT_PRECOMMIT";
pub const ENV_TIMEOUT_COMMIT: &str = "NHB_CONSENSUS_TIMEOUT_COMMIT";

/// Injected environment lookup, pure with respect to its inputs.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim(), "1" | "true" | "yes" | "on")
}

/// The four BFT step timeouts, in milliseconds. Each must be positive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusTimeouts {
    /// Waiting for a proposal before prevoting nil.
    pub proposal_ms: u64,
    /// Waiting for prevote quorum before precommitting nil.
    pub prevote_ms: u64,
    /// Waiting for precommit quorum before advancing the round.
    pub precommit_ms: u64,
    /// Settling time after a commit before starting the next height.
    pub commit_ms: u64,
}

impl Default for ConsensusTimeouts {
    fn default() -> Self {
        Self {
            proposal_ms: 3_000,
            prevote_ms: 1_000,
            precommit_ms: 1_000,
            commit_ms: 1_000,
        }
    }
}

impl ConsensusTimeouts {
    /// Proposal timeout as a [`Duration`].
    pub fn proposal(&self) -> Duration {
        Duration::from_millis(self.proposal_ms)
    }
    /// Prevote timeout as a [`Duration`].
    pub fn prevote(&self) -> Duration {
        Duration::from_millis(self.prevote_ms)
    }
    /// Precommit timeout as a [`Duration`].
    pub fn precommit(&self) -> Duration {
        Duration::from_millis(self.precommit_ms)
    }
    /// Commit settling timeout as a [`Duration`].
    pub fn commit(&self) -> Duration {
        Duration::from_millis(self.commit_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.proposal_ms == 0 {
            return Err(ConfigError::InvalidTimeout("proposal"));
        }
        if self.prevote_ms == 0 {
            return Err(ConfigError::InvalidTimeout("prevote"));
        }
        if self.precommit_ms == 0 {
            return Err(ConfigError::InvalidTimeout("precommit"));
        }
        if self.commit_ms == 0 {
            return Err(ConfigError::InvalidTimeout("commit"));
        }
        Ok(())
    }
}

/// Mempool capacity limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolLimits {
    /// Maximum resident transactions; lowest gas price is evicted on overflow.
    pub max_transactions: usize,
    /// Operator-testing escape hatch disabling the cap.
    #[serde(default)]
    pub unlimited: bool,
}

impl Default for MempoolLimits {
    fn default() -> Self {
        Self {
            max_transactions: 4_096,
            unlimited: false,
        }
    }
}

/// Automatic paymaster refill policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoTopUp {
    /// Refill triggers when the paymaster balance falls below this.
    pub min_balance: Amount,
    /// Amount moved from the treasury per refill.
    pub top_up_amount: Amount,
    /// Treasury account funding refills.
    pub treasury: Address,
}

/// Paymaster sponsorship limits.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymasterPolicy {
    /// Master switch for sponsored transactions.
    #[serde(default)]
    pub enabled: bool,
    /// Daily sponsored-gas cap per merchant, zero = unlimited.
    #[serde(default)]
    pub merchant_daily_cap: Amount,
    /// Daily sponsored-gas cap per device, zero = unlimited.
    #[serde(default)]
    pub device_daily_cap: Amount,
    /// Daily sponsored-gas cap across all sponsors, zero = unlimited.
    #[serde(default)]
    pub global_daily_cap: Amount,
    /// Optional automatic refill.
    #[serde(default)]
    pub auto_top_up: Option<AutoTopUp>,
}

/// Module pause switches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModulePauses {
    /// Modules currently refusing transactions.
    #[serde(default)]
    pub paused: BTreeSet<Module>,
}

impl ModulePauses {
    /// Whether a module is paused.
    pub fn is_paused(&self, module: Module) -> bool {
        self.paused.contains(&module)
    }

    /// Pauses or unpauses a module.
    pub fn set(&mut self, module: Module, paused: bool) {
        if paused {
            self.paused.insert(module);
        } else {
            self.paused.remove(&module);
        }
    }
}

/// Per-module quota settings. Zero disables the corresponding limit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Admitted requests per address per minute.
    #[serde(default)]
    pub requests_per_minute: u32,
    /// Admitted value units per address per epoch.
    #[serde(default)]
    pub units_per_epoch: Amount,
    /// Epoch length backing `units_per_epoch`, seconds.
    #[serde(default = "default_epoch_secs")]
    pub epoch_secs: i64,
}

fn default_epoch_secs() -> i64 {
    86_400
}

impl Default for QuotaConfig {
    fn default() -> Self {
        QuotaConfig {
            requests_per_minute: 0,
            units_per_epoch: Amount::zero(),
            epoch_secs: default_epoch_secs(),
        }
    }
}

/// Quotas keyed by module.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleQuotas {
    /// Per-module quota settings; absent modules are unlimited.
    #[serde(default)]
    pub per_module: BTreeMap<Module, QuotaConfig>,
}

impl ModuleQuotas {
    /// Quota settings for a module, if any.
    pub fn for_module(&self, module: Module) -> Option<&QuotaConfig> {
        self.per_module.get(&module)
    }
}

/// How liquidated collateral is routed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollateralRouting {
    /// Seized collateral returns to the shared pool.
    #[default]
    Pool,
    /// Seized collateral transfers to the liquidator.
    Liquidator,
}

/// Lending risk parameters, basis points.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LendingRiskConfig {
    /// Maximum borrow value against supply at origination.
    pub max_ltv_bps: u64,
    /// Debt ratio beyond which a position may be liquidated.
    pub liquidation_threshold_bps: u64,
    /// Collateral bonus paid to liquidators.
    pub liquidation_bonus_bps: u64,
    /// Where seized collateral goes.
    #[serde(default)]
    pub collateral_routing: CollateralRouting,
}

impl Default for LendingRiskConfig {
    fn default() -> Self {
        Self {
            max_ltv_bps: 7_500,
            liquidation_threshold_bps: 8_500,
            liquidation_bonus_bps: 500,
            collateral_routing: CollateralRouting::default(),
        }
    }
}

/// Swap oracle aggregation settings. Oracles themselves are external; the
/// core only threads these through to receipt validation policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOracleConfig {
    /// Maximum accepted quote age, seconds.
    pub max_quote_age_secs: i64,
    /// Named upstream sources, advisory.
    #[serde(default)]
    pub sources: Vec<String>,
}

impl Default for SwapOracleConfig {
    fn default() -> Self {
        Self {
            max_quote_age_secs: 120,
            sources: Vec::new(),
        }
    }
}

/// Governance policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernancePolicy {
    /// Voting window after proposal submission, seconds.
    pub voting_period_secs: i64,
    /// Participation quorum in basis points of total stake.
    pub quorum_bps: u64,
    /// Deposit locked on proposal submission.
    #[serde(default)]
    pub deposit: Amount,
}

impl Default for GovernancePolicy {
    fn default() -> Self {
        Self {
            voting_period_secs: 7 * 86_400,
            quorum_bps: 3_334,
            deposit: Amount::zero(),
        }
    }
}

/// POTSO participation reward settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PotsoRewardConfig {
    /// Heartbeats accepted per participant per epoch.
    pub max_heartbeats_per_epoch: u32,
    /// Epoch length, seconds.
    pub epoch_secs: i64,
    /// Uptime credited per heartbeat is capped at this many seconds.
    pub max_uptime_credit_secs: i64,
    /// Reward budget distributed per epoch.
    #[serde(default)]
    pub reward_per_epoch: Amount,
}

impl Default for PotsoRewardConfig {
    fn default() -> Self {
        Self {
            max_heartbeats_per_epoch: 24,
            epoch_secs: 86_400,
            max_uptime_credit_secs: 3_600,
            reward_per_epoch: Amount::zero(),
        }
    }
}

/// Paths to PEM-encoded TLS material.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsMaterial {
    /// Server or client certificate chain.
    pub cert_path: PathBuf,
    /// Private key for the certificate.
    pub key_path: PathBuf,
    /// Trust anchor for the remote side.
    pub ca_path: Option<PathBuf>,
}

/// Where the shared secret comes from. Resolution precedence is
/// environment, then file, then inline, and is pure with respect to the
/// `(base_dir, env_lookup)` pair.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedSecretConfig {
    /// Environment variable to read first.
    #[serde(default)]
    pub env: Option<String>,
    /// File (relative to the data dir unless absolute) to read second.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Inline literal, last resort.
    #[serde(default)]
    pub inline: Option<String>,
}

impl SharedSecretConfig {
    /// Whether any source is configured.
    pub fn is_configured(&self) -> bool {
        self.env.is_some() || self.file.is_some() || self.inline.is_some()
    }

    /// Resolves the secret through the configured sources.
    ///
    /// File reads go through the injected reader so the resolver stays pure;
    /// the daemon passes `std::fs::read_to_string`.
    pub fn resolve(
        &self,
        base_dir: &Path,
        env_lookup: EnvLookup<'_>,
        read_file: &dyn Fn(&Path) -> Result<String, String>,
    ) -> Result<Option<String>, ConfigError> {
        if let Some(var) = &self.env {
            if let Some(value) = env_lookup(var) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    return Ok(Some(trimmed.to_string()));
                }
            }
        }
        if let Some(file) = &self.file {
            let path = if file.is_absolute() {
                file.clone()
            } else {
                base_dir.join(file)
            };
            let value = read_file(&path).map_err(ConfigError::Invalid)?;
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
        if let Some(inline) = &self.inline {
            let trimmed = inline.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
        Ok(None)
    }
}

/// Network security descriptor shared by the gRPC server and the peer dial.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSecurity {
    /// TLS material; mandatory outside the loopback carve-out.
    #[serde(default)]
    pub tls: Option<TlsMaterial>,
    /// Shared-secret source for bearer-token authentication.
    #[serde(default)]
    pub shared_secret: SharedSecretConfig,
    /// Client certificate common names accepted by the server.
    #[serde(default)]
    pub allowed_client_cns: Vec<String>,
    /// Metadata header carrying the bearer token, compared lower-cased.
    #[serde(default = "default_auth_header")]
    pub auth_header: String,
    /// Config half of the development plaintext opt-in; the runtime flag is
    /// the other half, and the bind address must still be loopback.
    #[serde(default)]
    pub allow_insecure: bool,
    /// TLS server-name override for the peer dial.
    #[serde(default)]
    pub server_name_override: Option<String>,
}

fn default_auth_header() -> String {
    "authorization".to_string()
}

impl Default for NetworkSecurity {
    fn default() -> Self {
        NetworkSecurity {
            tls: None,
            shared_secret: SharedSecretConfig::default(),
            allowed_client_cns: Vec::new(),
            auth_header: default_auth_header(),
            allow_insecure: false,
            server_name_override: None,
        }
    }
}

/// Validator signing key source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum KeySource {
    /// JSON keystore on disk, unlocked with `NHB_VALIDATOR_PASS`.
    Keystore(PathBuf),
    /// KMS URI; the `env:NAME` scheme reads a hex secret from the env var.
    Kms(String),
}

/// Everything the validator core consumes at startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This chain's id.
    pub chain_id: Amount,
    /// Root for the key-value store and relative secret files.
    pub data_dir: PathBuf,
    /// Genesis file; optional only with the autogenesis opt-in.
    #[serde(default)]
    pub genesis_path: Option<PathBuf>,
    /// Config half of the autogenesis opt-in.
    #[serde(default)]
    pub allow_autogenesis: bool,
    /// Validator signing key.
    pub validator_key: KeySource,
    /// gRPC listen address, `host:port`.
    pub listen_addr: String,
    /// Peer relay endpoint URI.
    pub p2p_endpoint: String,
    /// BFT step timeouts.
    #[serde(default)]
    pub consensus: ConsensusTimeouts,
    /// Mempool limits.
    #[serde(default)]
    pub mempool: MempoolLimits,
    /// Paymaster sponsorship policy.
    #[serde(default)]
    pub paymaster: PaymasterPolicy,
    /// Module pause switches.
    #[serde(default)]
    pub pauses: ModulePauses,
    /// Per-module quotas.
    #[serde(default)]
    pub quotas: ModuleQuotas,
    /// Lending risk parameters.
    #[serde(default)]
    pub lending: LendingRiskConfig,
    /// Swap oracle aggregation settings.
    #[serde(default)]
    pub swap: SwapOracleConfig,
    /// Governance policy.
    #[serde(default)]
    pub governance: GovernancePolicy,
    /// POTSO reward settings.
    #[serde(default)]
    pub potso: PotsoRewardConfig,
    /// Annual emission caps keyed by token symbol.
    #[serde(default)]
    pub emission_caps: BTreeMap<String, Amount>,
    /// Network security descriptor.
    #[serde(default)]
    pub security: NetworkSecurity,
    /// Outbound queue capacity; oldest entries drop on overflow.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_queue_capacity: usize,
    /// Base outbound retry delay, milliseconds.
    #[serde(default = "default_retry_base_ms")]
    pub outbound_retry_base_ms: u64,
    /// Maximum outbound retry delay, milliseconds.
    #[serde(default = "default_retry_max_ms")]
    pub outbound_retry_max_ms: u64,
    /// Peer dial timeout, milliseconds.
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
}

fn default_outbound_capacity() -> usize {
    512
}
fn default_retry_base_ms() -> u64 {
    200
}
fn default_retry_max_ms() -> u64 {
    10_000
}
fn default_dial_timeout_ms() -> u64 {
    5_000
}

/// Extracts the host from `host:port` or a `scheme://host:port` URI.
pub fn host_of(addr: &str) -> &str {
    let without_scheme = addr.split_once("://").map(|(_, rest)| rest).unwrap_or(addr);
    let authority = without_scheme
        .split_once('/')
        .map(|(a, _)| a)
        .unwrap_or(without_scheme);
    // IPv6 literals are bracketed.
    if let Some(stripped) = authority.strip_prefix('[') {
        return stripped.split_once(']').map(|(h, _)| h).unwrap_or(stripped);
    }
    authority.rsplit_once(':').map(|(h, _)| h).unwrap_or(authority)
}

/// Whether an address string resolves to the loopback interface.
pub fn is_loopback(addr: &str) -> bool {
    let host = host_of(addr);
    host == "localhost" || host == "::1" || host.starts_with("127.")
}

impl NodeConfig {
    /// Applies environment overrides. CLI flags, applied by the daemon after
    /// this, win over both.
    pub fn apply_env_overrides(&mut self, lookup: EnvLookup<'_>) {
        if let Some(path) = lookup(ENV_GENESIS) {
            if !path.trim().is_empty() {
                self.genesis_path = Some(PathBuf::from(path.trim()));
            }
        }
        if let Some(raw) = lookup(ENV_ALLOW_AUTOGENESIS) {
            self.allow_autogenesis = parse_bool(&raw);
        }
        for (var, slot) in [
            (ENV_TIMEOUT_PROPOSAL, &mut self.consensus.proposal_ms),
            (ENV_TIMEOUT_PREVOTE, &mut self.consensus.prevote_ms),
            (ENV_TIMEOUT_PRECOMMIT, &mut self.consensus.precommit_ms),
            (ENV_TIMEOUT_COMMIT, &mut self.consensus.commit_ms),
        ] {
            if let Some(raw) = lookup(var) {
                if let Ok(ms) = raw.trim().parse::<u64>() {
                    *slot = ms;
                }
            }
        }
    }

    /// Full startup validation. `runtime_allow_insecure` is the CLI half of
    /// the plaintext opt-in.
    pub fn validate(&self, runtime_allow_insecure: bool) -> Result<(), ConfigError> {
        self.consensus.validate()?;

        if self.genesis_path.is_none() && !self.allow_autogenesis {
            return Err(ConfigError::MissingGenesis);
        }

        if !self.security.shared_secret.is_configured()
            && self.security.allowed_client_cns.is_empty()
        {
            return Err(ConfigError::MissingAuthenticator);
        }

        if self.security.tls.is_none() {
            let permitted = self.security.allow_insecure
                && runtime_allow_insecure
                && is_loopback(&self.listen_addr)
                && is_loopback(&self.p2p_endpoint);
            if !permitted {
                return Err(ConfigError::InsecureRefused(format!(
                    "no TLS material; plaintext requires allow_insecure in config, \
                     the runtime flag, and loopback endpoints (listen {}, peer {})",
                    self.listen_addr, self.p2p_endpoint
                )));
            }
        }

        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "outbound_queue_capacity must be positive".to_string(),
            ));
        }
        if self.outbound_retry_base_ms == 0
            || self.outbound_retry_max_ms < self.outbound_retry_base_ms
        {
            return Err(ConfigError::Invalid(
                "outbound retry delays must be positive and max >= base".to_string(),
            ));
        }

        match &self.validator_key {
            KeySource::Keystore(path) if path.as_os_str().is_empty() => Err(
                ConfigError::InvalidKeySource("empty keystore path".to_string()),
            ),
            KeySource::Kms(uri) if uri.trim().is_empty() => Err(ConfigError::InvalidKeySource(
                "empty KMS uri".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> NodeConfig {
        NodeConfig {
            chain_id: Amount::from(187001u64),
            data_dir: PathBuf::from("/tmp/nhb"),
            genesis_path: Some(PathBuf::from("genesis.json")),
            allow_autogenesis: false,
            validator_key: KeySource::Keystore(PathBuf::from("validator.key")),
            listen_addr: "127.0.0.1:9090".to_string(),
            p2p_endpoint: "http://127.0.0.1:9555".to_string(),
            consensus: ConsensusTimeouts::default(),
            mempool: MempoolLimits::default(),
            paymaster: PaymasterPolicy::default(),
            pauses: ModulePauses::default(),
            quotas: ModuleQuotas::default(),
            lending: LendingRiskConfig::default(),
            swap: SwapOracleConfig::default(),
            governance: GovernancePolicy::default(),
            potso: PotsoRewardConfig::default(),
            emission_caps: BTreeMap::new(),
            security: NetworkSecurity {
                shared_secret: SharedSecretConfig {
                    inline: Some("secret".to_string()),
                    ..Default::default()
                },
                allow_insecure: true,
                ..Default::default()
            },
            outbound_queue_capacity: 512,
            outbound_retry_base_ms: 200,
            outbound_retry_max_ms: 10_000,
            dial_timeout_ms: 5_000,
        }
    }

    #[test]
    fn zero_timeout_refused() {
        let mut cfg = base_config();
        cfg.consensus.prevote_ms = 0;
        assert!(matches!(
            cfg.validate(true),
            Err(ConfigError::InvalidTimeout("prevote"))
        ));
    }

    #[test]
    fn insecure_requires_both_flags_and_loopback() {
        // Config opt-in alone is not enough.
        let cfg = base_config();
        assert!(matches!(
            cfg.validate(false),
            Err(ConfigError::InsecureRefused(_))
        ));

        // Both flags but a public bind address: refused.
        let mut cfg = base_config();
        cfg.listen_addr = "0.0.0.0:9090".to_string();
        assert!(matches!(
            cfg.validate(true),
            Err(ConfigError::InsecureRefused(_))
        ));

        // Both flags, loopback everywhere: accepted.
        assert!(base_config().validate(true).is_ok());
    }

    #[test]
    fn missing_authenticator_refused() {
        let mut cfg = base_config();
        cfg.security.shared_secret = SharedSecretConfig::default();
        cfg.security.allowed_client_cns.clear();
        assert!(matches!(
            cfg.validate(true),
            Err(ConfigError::MissingAuthenticator)
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = base_config();
        let lookup = |key: &str| match key {
            ENV_TIMEOUT_PROPOSAL => Some("750".to_string()),
            ENV_ALLOW_AUTOGENESIS => Some("true".to_string()),
            _ => None,
        };
        cfg.apply_env_overrides(&lookup);
        assert_eq!(cfg.consensus.proposal_ms, 750);
        assert!(cfg.allow_autogenesis);
    }

    #[test]
    fn secret_resolution_precedence() {
        let cfg = SharedSecretConfig {
            env: Some("NHB_TEST_SECRET".to_string()),
            file: Some(PathBuf::from("secret.txt")),
            inline: Some("inline-secret".to_string()),
        };
        let base = Path::new("/data");

        let env_hit = |key: &str| (key == "NHB_TEST_SECRET").then(|| "from-env\n".to_string());
        let read = |_: &Path| -> Result<String, String> { Ok("from-file\n".to_string()) };
        let got = cfg.resolve(base, &env_hit, &read).unwrap();
        assert_eq!(got.as_deref(), Some("from-env"));

        let env_miss = |_: &str| None;
        let got = cfg.resolve(base, &env_miss, &read).unwrap();
        assert_eq!(got.as_deref(), Some("from-file"));

        let read_empty = |_: &Path| -> Result<String, String> { Ok(String::new()) };
        let got = cfg.resolve(base, &env_miss, &read_empty).unwrap();
        assert_eq!(got.as_deref(), Some("inline-secret"));
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("http://127.0.0.1:9555"), "127.0.0.1");
        assert_eq!(host_of("0.0.0.0:9090"), "0.0.0.0");
        assert_eq!(host_of("https://[::1]:443/x"), "::1");
        assert!(is_loopback("localhost:1"));
        assert!(!is_loopback("https://example.com:443"));
    }
}

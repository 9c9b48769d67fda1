//! The NHB validator daemon.
//!
//! Loads and validates configuration, bootstraps the chain, and wires the
//! long-lived tasks together: the BFT engine, the outbound broadcaster, the
//! peer-stream supervisor and the gRPC server, all sharing one shutdown
//! watch driven by SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{error, info};

use nhb_api::chain::ConsensusApi;
use nhb_api::storage::KvStore;
use nhb_consensus::BftEngine;
use nhb_crypto::ValidatorKey;
use nhb_ipc::auth::{AuthChain, Authenticator, CommonNameAuthenticator, TokenAuthenticator};
use nhb_ipc::consensus::consensus_service_server::ConsensusServiceServer;
use nhb_ipc::query::query_service_server::QueryServiceServer;
use nhb_node::{Node, RpcContext};
use nhb_relay::{Broadcaster, PeerStreamSupervisor};
use nhb_storage::RedbStore;
use nhb_types::config::{KeySource, NodeConfig, ENV_VALIDATOR_PASS};
use nhb_types::genesis::Genesis;
use nhb_types::hashing::keccak256;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};

struct CliArgs {
    config: PathBuf,
    allow_insecure: bool,
    genesis: Option<PathBuf>,
}

fn parse_args() -> Result<CliArgs> {
    let mut config = None;
    let mut allow_insecure = false;
    let mut genesis = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config = Some(PathBuf::from(
                    args.next().ok_or_else(|| anyhow!("--config needs a path"))?,
                ));
            }
            "--genesis" => {
                genesis = Some(PathBuf::from(
                    args.next().ok_or_else(|| anyhow!("--genesis needs a path"))?,
                ));
            }
            "--allow-insecure" => allow_insecure = true,
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(CliArgs {
        config: config.ok_or_else(|| anyhow!("--config <path> is required"))?,
        allow_insecure,
        genesis,
    })
}

/// On-disk keystore: an unlocked hex secret plus an optional passphrase
/// check. Encrypted keystores and real KMS backends live outside the core.
#[derive(Deserialize)]
struct KeystoreFile {
    secret_hex: String,
    /// Hex keccak of the required passphrase; when present the daemon
    /// refuses to start without a matching `NHB_VALIDATOR_PASS`.
    #[serde(default)]
    pass_check: Option<String>,
}

fn load_validator_key(
    config: &NodeConfig,
    env_lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<ValidatorKey> {
    match &config.validator_key {
        KeySource::Kms(uri) => {
            let var = uri
                .strip_prefix("env:")
                .ok_or_else(|| anyhow!("unsupported KMS uri scheme: {uri}"))?;
            let secret = env_lookup(var)
                .ok_or_else(|| anyhow!("KMS env var {var} is not set"))?;
            ValidatorKey::from_secret_hex(&secret).map_err(|e| anyhow!("{e}"))
        }
        KeySource::Keystore(path) => {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                config.data_dir.join(path)
            };
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading keystore {}", path.display()))?;
            let keystore: KeystoreFile =
                serde_json::from_str(&raw).context("parsing keystore JSON")?;
            if let Some(expected) = &keystore.pass_check {
                let pass = env_lookup(ENV_VALIDATOR_PASS)
                    .ok_or_else(|| anyhow!("{ENV_VALIDATOR_PASS} required by keystore"))?;
                if hex::encode(keccak256(pass.as_bytes())) != expected.to_lowercase() {
                    bail!("keystore passphrase check failed");
                }
            }
            ValidatorKey::from_secret_hex(&keystore.secret_hex).map_err(|e| anyhow!("{e}"))
        }
    }
}

fn load_genesis(
    config: &NodeConfig,
    validator: nhb_types::Address,
) -> Result<Genesis> {
    match &config.genesis_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading genesis {}", path.display()))?;
            let genesis: Genesis = serde_json::from_str(&raw).context("parsing genesis")?;
            Ok(genesis)
        }
        None => {
            // Startup validation already verified the explicit opt-in.
            info!(target: "node", "no genesis file; autogenesis in effect");
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            Ok(Genesis::autogenesis(config.chain_id.clone(), validator, now))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    nhb_node::telemetry::init_tracing()?;

    let raw = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading config {}", args.config.display()))?;
    let mut config: NodeConfig = toml::from_str(&raw).context("parsing config")?;

    // Precedence: CLI flag > environment > file.
    let env_lookup = |key: &str| std::env::var(key).ok();
    config.apply_env_overrides(&env_lookup);
    if let Some(genesis) = &args.genesis {
        config.genesis_path = Some(genesis.clone());
    }
    config
        .validate(args.allow_insecure)
        .context("configuration rejected")?;

    let key = load_validator_key(&config, &env_lookup)?;
    let genesis = load_genesis(&config, key.address())?;

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    let store: Arc<dyn KvStore> = Arc::new(
        RedbStore::open(&config.data_dir.join("state.redb")).map_err(|e| anyhow!("{e}"))?,
    );
    let node = Arc::new(
        Node::open(store, &config, &genesis, key.address()).map_err(|e| anyhow!("{e}"))?,
    );
    info!(target: "node", validator = %key.address(), "node initialised");

    // Root cancellation, wired to SIGINT/SIGTERM.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                ) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(target: "node", error = %e, "installing SIGTERM handler failed");
                        let _ = ctrl_c.await;
                        let _ = shutdown_tx.send(true);
                        return;
                    }
                };
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
            }
            info!(target: "node", "shutdown signal received");
            let _ = shutdown_tx.send(true);
        });
    }

    // Outbound broadcaster.
    let broadcaster = Broadcaster::new(
        config.outbound_queue_capacity,
        Duration::from_millis(config.outbound_retry_base_ms),
        Duration::from_millis(config.outbound_retry_max_ms),
    );
    let writer_task = {
        let broadcaster = broadcaster.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { broadcaster.run(shutdown).await })
    };

    // BFT engine.
    let node_api: Arc<dyn ConsensusApi> = node.clone();
    let (engine, engine_handle) = BftEngine::new(
        node_api.clone(),
        Arc::new(broadcaster.clone()),
        key,
        config.consensus.clone(),
        shutdown_rx.clone(),
    );
    node.set_engine(engine_handle);
    let fatal = Arc::new(AtomicBool::new(false));
    let engine_task = {
        let fatal = fatal.clone();
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run().await {
                error!(target: "consensus", error = %e, "engine halted");
                fatal.store(true, Ordering::SeqCst);
                let _ = shutdown_tx.send(true);
            }
        })
    };

    // Peer-stream supervisor.
    let supervisor_task = {
        let supervisor = PeerStreamSupervisor::new(
            config.p2p_endpoint.clone(),
            config.security.clone(),
            args.allow_insecure,
            Duration::from_millis(config.dial_timeout_ms),
            node_api.clone(),
            broadcaster.clone(),
        );
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { supervisor.run(shutdown).await })
    };

    // gRPC server.
    let secret = config
        .security
        .shared_secret
        .resolve(&config.data_dir, &env_lookup, &|path| {
            std::fs::read_to_string(path).map_err(|e| e.to_string())
        })
        .map_err(|e| anyhow!("{e}"))?;
    let mut authenticators: Vec<Box<dyn Authenticator>> = Vec::new();
    if let Some(secret) = secret {
        authenticators.push(Box::new(TokenAuthenticator::new(
            &config.security.auth_header,
            &secret,
        )));
    }
    if !config.security.allowed_client_cns.is_empty() {
        authenticators.push(Box::new(CommonNameAuthenticator::new(
            config.security.allowed_client_cns.clone(),
        )));
    }
    let rpc = RpcContext {
        node: node_api,
        auth: Arc::new(AuthChain::new(authenticators)),
    };

    let addr = config
        .listen_addr
        .parse()
        .with_context(|| format!("bad listen address {}", config.listen_addr))?;
    let mut builder = Server::builder();
    if let Some(material) = &config.security.tls {
        let cert = std::fs::read(&material.cert_path).context("reading server cert")?;
        let cert_key = std::fs::read(&material.key_path).context("reading server key")?;
        let mut tls = ServerTlsConfig::new().identity(Identity::from_pem(cert, cert_key));
        if let Some(ca_path) = &material.ca_path {
            let ca = std::fs::read(ca_path).context("reading client CA")?;
            tls = tls.client_ca_root(Certificate::from_pem(ca));
        }
        builder = builder.tls_config(tls).context("server TLS config")?;
    }

    let mut server_shutdown = shutdown_rx.clone();
    info!(target: "rpc", %addr, "gRPC server listening");
    builder
        .add_service(ConsensusServiceServer::new(rpc.clone()))
        .add_service(QueryServiceServer::new(rpc))
        .serve_with_shutdown(addr, async move {
            let _ = server_shutdown.changed().await;
        })
        .await
        .context("gRPC server failed")?;

    // Drain the long-lived tasks.
    let _ = engine_task.await;
    let _ = supervisor_task.await;
    let _ = writer_task.await;

    if fatal.load(Ordering::SeqCst) {
        bail!("engine halted on a fatal consensus error");
    }
    info!(target: "node", "shutdown complete");
    Ok(())
}

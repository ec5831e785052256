//! Shared broker state passed to every RPC handler.

use std::sync::Arc;

use parking_lot::RwLock;

use wb_audit::AuditLog;
use wb_containers::{ContainerManager, ContainerRuntime};
use wb_domain::config::Config;
use wb_domain::Result;
use wb_inject::{SecretInjector, TokenStore};
use wb_keystore::Keystore;
use wb_matrix::{
    BridgeManager, LoopbackConnector, MatrixAdapter, MatrixClient, PlatformRegistry, RoomEvent,
};
use wb_scrubber::{PatternTable, QuarantineNotifier, Scrubber};
use wb_zerotrust::ZeroTrustManager;

use crate::errstore::ErrorStore;
use crate::license::LicenseManager;
use crate::plugins::PluginRegistry;
use crate::recovery::RecoveryManager;
use crate::voice::VoiceSessionStore;

/// Shared application state passed to all RPC handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, audit log, keystore, scrubber
/// - **Injection** — one-time tokens, secret sockets
/// - **Containers** — manager + TTL tracker
/// - **Zero-trust** — devices, sessions, policies
/// - **Matrix & bridging** — adapter, bridge manager, platforms, inbox
/// - **Supplementary** — voice, recovery, plugins, license, errors
#[derive(Clone)]
pub struct BrokerState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub audit: Arc<AuditLog>,
    pub keystore: Arc<Keystore>,
    pub scrubber: Arc<Scrubber>,

    // ── Injection ─────────────────────────────────────────────────────
    pub tokens: Arc<TokenStore>,
    pub injector: Arc<SecretInjector>,

    // ── Containers ────────────────────────────────────────────────────
    pub containers: Arc<ContainerManager>,

    // ── Zero-trust ────────────────────────────────────────────────────
    pub zerotrust: Arc<ZeroTrustManager>,

    // ── Matrix & bridging ─────────────────────────────────────────────
    /// `None` until `matrix_login` succeeds or a token is configured.
    pub matrix: Option<Arc<MatrixAdapter>>,
    pub bridge: Option<Arc<BridgeManager>>,
    pub platforms: Arc<PlatformRegistry>,
    /// Incoming Matrix events drained by `matrix_receive`.
    pub inbox: Arc<RwLock<Vec<RoomEvent>>>,

    // ── Supplementary ─────────────────────────────────────────────────
    pub voice: Arc<VoiceSessionStore>,
    pub recovery: Arc<RecoveryManager>,
    pub plugins: Arc<PluginRegistry>,
    pub license: Arc<LicenseManager>,
    pub errors: Arc<ErrorStore>,
}

impl BrokerState {
    /// Wire the component graph, leaves first: audit → keystore →
    /// scrubber → injector → containers → zero-trust → adapters. The
    /// container runtime is injected so tests can substitute a mock.
    pub fn build(
        config: Arc<Config>,
        runtime: Arc<dyn ContainerRuntime>,
        keystore: Arc<Keystore>,
        notifier: Option<Arc<dyn QuarantineNotifier>>,
    ) -> Result<Self> {
        let audit = Arc::new(AuditLog::open(&config.audit)?);

        let table = PatternTable::for_set(config.scrubber.pattern_set)?;
        let scrubber = Arc::new(Scrubber::new(
            &config.scrubber,
            table,
            Some(audit.clone()),
            notifier,
        ));

        let tokens = Arc::new(TokenStore::new(std::time::Duration::from_secs(
            config.inject.token_ttl_secs,
        )));
        let injector = Arc::new(SecretInjector::new(&config.inject)?);

        let containers = Arc::new(ContainerManager::new(runtime, config.containers.clone()));
        let zerotrust = Arc::new(ZeroTrustManager::from_config(&config.zerotrust));

        // The Matrix adapter and bridge manager come up only when a
        // homeserver is configured; everything else works without one.
        let (matrix, bridge) = if config.matrix.homeserver.is_empty() {
            (None, None)
        } else {
            let client = Arc::new(MatrixClient::new(&config.matrix)?);
            let adapter_scrubber = config.matrix.scrub_outgoing.then(|| scrubber.clone());
            let adapter = Arc::new(MatrixAdapter::new(
                client.clone(),
                adapter_scrubber.clone(),
                config.matrix.sync_timeout_ms,
            ));
            let bridge = Arc::new(BridgeManager::new(
                client,
                adapter_scrubber,
                audit.clone(),
                config.matrix.server_name.clone(),
            ));
            (Some(adapter), Some(bridge))
        };

        let platforms = Arc::new(PlatformRegistry::new());
        platforms.register(Arc::new(LoopbackConnector::new()));

        let voice = Arc::new(VoiceSessionStore::new(config.voice.clone()));
        let recovery = Arc::new(RecoveryManager::new(keystore.clone()));
        let plugins = Arc::new(PluginRegistry::new());
        let license = Arc::new(LicenseManager::new(&config.license.key));
        let errors = Arc::new(ErrorStore::new());

        Ok(Self {
            config,
            audit,
            keystore,
            scrubber,
            tokens,
            injector,
            containers,
            zerotrust,
            matrix,
            bridge,
            platforms,
            inbox: Arc::new(RwLock::new(Vec::new())),
            voice,
            recovery,
            plugins,
            license,
            errors,
        })
    }
}

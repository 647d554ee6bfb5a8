//! Lifecycle of the HSM session: locate the HSM, start the HSM client
//! process, wait for it to be ready, log in, and tear everything down.

use std::{
    fmt,
    future::Future,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{
        Arc, Mutex, OnceLock, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use hsm_signer_interfaces::{
    HsmConnector, HsmCredentials, HsmDirectory, HsmProvider, InterfaceResult, SecretStore,
};
use tokio::{
    fs::File,
    io::AsyncReadExt,
    process::{Child, Command},
    sync::{oneshot, watch},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::{SessionError, SessionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    LocatingHsm,
    ClientStarting,
    ClientReady,
    Authenticating,
    Authenticated,
    LoggedOut,
    Failed,
}

impl SessionState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::LoggedOut | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unstarted => "unstarted",
            Self::LocatingHsm => "locating HSM",
            Self::ClientStarting => "client starting",
            Self::ClientReady => "client ready",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::LoggedOut => "logged out",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cluster_id: String,
    pub region: String,
    pub partition: String,
    /// The HSM client executable
    pub client_bin: PathBuf,
    pub client_args: Vec<String>,
    /// Tool pointing the client configuration at the HSM, run as `<bin> -a <address>`
    pub configure_bin: Option<PathBuf>,
    /// File receiving the combined output of the client
    pub client_log: PathBuf,
    /// Text of the log line announcing that the client accepts connections
    pub readiness_marker: String,
    pub readiness_timeout: Duration,
    /// Bound of every call to the directory, the secret store and the configure tool
    pub dependency_timeout: Duration,
    /// Delay between two reads of the client log once its end is reached
    pub poll_interval: Duration,
}

/// Owns the running client process
struct ClientSupervisor {
    kill: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// The authenticated connection to the HSM.
///
/// Created once at startup and shared by reference with every component
/// that needs the HSM.
pub struct HsmSession {
    config: SessionConfig,
    state: Mutex<SessionState>,
    hsm_address: OnceLock<String>,
    provider: OnceLock<Arc<dyn HsmProvider>>,
    keystore_password: OnceLock<Zeroizing<String>>,
    client_exit: OnceLock<watch::Receiver<Option<String>>>,
    supervisor: tokio::sync::Mutex<Option<ClientSupervisor>>,
    released: AtomicBool,
}

impl fmt::Debug for HsmSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HsmSession")
            .field("cluster_id", &self.config.cluster_id)
            .field("partition", &self.config.partition)
            .field("state", &self.state())
            .field("hsm_address", &self.hsm_address.get())
            .finish_non_exhaustive()
    }
}

impl HsmSession {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SessionState::Unstarted),
            hsm_address: OnceLock::new(),
            provider: OnceLock::new(),
            keystore_password: OnceLock::new(),
            client_exit: OnceLock::new(),
            supervisor: tokio::sync::Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Address of the HSM the client is connected to, once located
    pub fn hsm_address(&self) -> Option<&str> {
        self.hsm_address.get().map(String::as_str)
    }

    /// Move to `next` unless the session already reached a terminal state
    fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_terminal() {
            debug!("HSM session: ignoring {next} in the {} state", *state);
            return false;
        }
        if next == SessionState::Failed {
            error!("HSM session: {} -> {next}", *state);
        } else {
            info!("HSM session: {} -> {next}", *state);
        }
        *state = next;
        true
    }

    fn fail(&self, e: SessionError) -> SessionError {
        error!("HSM session startup failed: {e}");
        self.transition(SessionState::Failed);
        e
    }

    /// Bring the session to the `Authenticated` state.
    ///
    /// Any failure leaves the session `Failed` with the client process
    /// stopped; callers are expected to abort.
    pub async fn start(
        &self,
        directory: &dyn HsmDirectory,
        secrets: &dyn SecretStore,
        connector: Arc<dyn HsmConnector>,
    ) -> SessionResult<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != SessionState::Unstarted {
                return Err(SessionError::InvalidState(format!(
                    "the session cannot start from the {} state",
                    *state
                )));
            }
            info!(
                "HSM session: {} -> {}",
                *state,
                SessionState::LocatingHsm
            );
            *state = SessionState::LocatingHsm;
        }

        let address = within(
            self.config.dependency_timeout,
            "the HSM directory",
            directory.locate(&self.config.cluster_id, &self.config.region),
            SessionError::Directory,
        )
        .await
        .map_err(|e| self.fail(e))?;
        info!(
            "located the HSM {address} of the cluster {} in {}",
            self.config.cluster_id, self.config.region
        );
        let address = self.hsm_address.get_or_init(|| address);

        self.transition(SessionState::ClientStarting);
        let child = self
            .launch_client(address)
            .await
            .map_err(|e| self.fail(e))?;
        self.supervise(child).await;
        self.transition(SessionState::ClientReady);

        self.transition(SessionState::Authenticating);
        if let Err(e) = self.authenticate(secrets, connector).await {
            self.stop_client().await;
            return Err(self.fail(e));
        }
        if !self.transition(SessionState::Authenticated) {
            return Err(SessionError::InvalidState(
                "the session ended during startup".to_owned(),
            ));
        }
        Ok(())
    }

    /// Configure and spawn the client, then wait for its readiness marker
    async fn launch_client(&self, address: &str) -> SessionResult<Child> {
        if let Some(configure) = &self.config.configure_bin {
            configure_client(configure, address, self.config.dependency_timeout).await?;
        }

        let log = File::create(&self.config.client_log).await?.into_std().await;
        let log_err = log.try_clone()?;
        let mut child = Command::new(&self.config.client_bin)
            .args(&self.config.client_args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SessionError::ClientProcess(format!(
                    "failed to start {}: {e}",
                    self.config.client_bin.display()
                ))
            })?;
        info!(
            "started the HSM client {} (pid {:?}), logging to {}",
            self.config.client_bin.display(),
            child.id(),
            self.config.client_log.display()
        );

        let mut tailer = tokio::spawn(wait_for_marker(
            self.config.client_log.clone(),
            self.config.readiness_marker.clone(),
            self.config.poll_interval,
        ));
        let readiness = tokio::select! {
            found = &mut tailer => found.map_err(SessionError::from).and_then(|line| line),
            status = child.wait() => Err(match status {
                Ok(status) => SessionError::ClientExited(status.to_string()),
                Err(e) => e.into(),
            }),
            () = sleep(self.config.readiness_timeout) => {
                Err(SessionError::ReadinessTimeout(self.config.readiness_timeout))
            }
        };
        match readiness {
            Ok(line) => {
                info!("the HSM client is ready: {line}");
                Ok(child)
            }
            Err(e) => {
                tailer.abort();
                if let Err(kill_error) = child.kill().await {
                    warn!("failed to kill the HSM client: {kill_error}");
                }
                Err(e)
            }
        }
    }

    /// Hand the child over to a task publishing its exit
    async fn supervise(&self, mut child: Child) {
        let (kill, killed) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(None);
        let task = tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => format!("exited with {status}"),
                    Err(e) => format!("cannot be waited for: {e}"),
                },
                _ = killed => {
                    if let Err(e) = child.kill().await {
                        warn!("failed to kill the HSM client: {e}");
                    }
                    "killed".to_owned()
                }
            };
            debug!("the HSM client {status}");
            exit_tx.send_replace(Some(status));
        });
        let _ = self.client_exit.set(exit_rx);
        *self.supervisor.lock().await = Some(ClientSupervisor { kill, task });
    }

    async fn authenticate(
        &self,
        secrets: &dyn SecretStore,
        connector: Arc<dyn HsmConnector>,
    ) -> SessionResult<()> {
        let secret = within(
            self.config.dependency_timeout,
            "the secret store",
            secrets.credentials(&self.config.cluster_id, &self.config.region),
            SessionError::Secrets,
        )
        .await?;
        let credentials = HsmCredentials::from_secret(&secret)
            .map_err(|e| SessionError::Secrets(e.to_string()))?;
        let user = credentials.user.clone();
        let password = credentials.password.clone();

        let partition = self.config.partition.clone();
        let provider =
            tokio::task::spawn_blocking(move || connector.connect(&partition, &credentials))
                .await??;
        info!(
            "logged into the partition {} as {user} through the {} provider",
            self.config.partition,
            provider.name()
        );
        self.provider
            .set(provider)
            .map_err(|_| SessionError::InvalidState("already logged in".to_owned()))?;
        self.keystore_password
            .set(password)
            .map_err(|_| SessionError::InvalidState("already logged in".to_owned()))?;
        Ok(())
    }

    /// The logged-in HSM provider
    pub fn provider(&self) -> SessionResult<Arc<dyn HsmProvider>> {
        let state = self.state();
        if state != SessionState::Authenticated {
            return Err(SessionError::InvalidState(format!(
                "the HSM session is {state}"
            )));
        }
        self.provider
            .get()
            .cloned()
            .ok_or_else(|| SessionError::InvalidState("no HSM provider".to_owned()))
    }

    /// The password of the HSM user, which also protects the software keys
    /// of the keystore
    pub fn keystore_password(&self) -> SessionResult<&str> {
        self.keystore_password
            .get()
            .map(|password| password.as_str())
            .ok_or_else(|| SessionError::InvalidState("the HSM session is not logged in".to_owned()))
    }

    /// Wait until the client process exits.
    ///
    /// Returns its exit status and moves the session to `Failed` if it
    /// exited on its own; returns `None` when the client was stopped by
    /// [`Self::logout`] or never started.
    pub async fn wait_for_client_exit(&self) -> Option<String> {
        let mut exit = self.client_exit.get()?.clone();
        let status = match exit.wait_for(Option::is_some).await {
            Ok(status) => (*status).clone().unwrap_or_default(),
            Err(_) => "the client supervisor stopped".to_owned(),
        };
        if self.transition(SessionState::Failed) {
            error!("the HSM client {status} while the session was in use");
            Some(status)
        } else {
            None
        }
    }

    async fn stop_client(&self) {
        let Some(supervisor) = self.supervisor.lock().await.take() else {
            return;
        };
        let _ = supervisor.kill.send(());
        if let Err(e) = supervisor.task.await {
            warn!("the HSM client supervisor failed: {e}");
        }
    }

    /// Release the HSM login and kill the client process.
    ///
    /// Calling it again is a no-op.
    pub async fn logout(&self) -> SessionResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = match self.provider.get() {
            Some(provider) => {
                let provider = provider.clone();
                tokio::task::spawn_blocking(move || provider.logout())
                    .await
                    .map_err(SessionError::from)
                    .and_then(|r| r.map_err(SessionError::from))
            }
            None => Ok(()),
        };
        self.transition(SessionState::LoggedOut);
        self.stop_client().await;
        if let Err(e) = &result {
            warn!("HSM logout failed: {e}");
        }
        result
    }
}

/// Await a dependency call for at most `limit`
async fn within<T>(
    limit: Duration,
    dependency: &str,
    call: impl Future<Output = InterfaceResult<T>>,
    kind: fn(String) -> SessionError,
) -> SessionResult<T> {
    match timeout(limit, call).await {
        Ok(result) => result.map_err(|e| kind(e.to_string())),
        Err(_) => Err(kind(format!("{dependency} did not answer within {limit:?}"))),
    }
}

async fn configure_client(configure: &Path, address: &str, limit: Duration) -> SessionResult<()> {
    let status = timeout(
        limit,
        Command::new(configure)
            .arg("-a")
            .arg(address)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status(),
    )
    .await
    .map_err(|_| {
        SessionError::ClientProcess(format!(
            "{} did not complete within {limit:?}",
            configure.display()
        ))
    })??;
    if !status.success() {
        return Err(SessionError::ClientProcess(format!(
            "{} -a {address} {status}",
            configure.display()
        )));
    }
    debug!("configured the HSM client for {address}");
    Ok(())
}

/// Follow `path` and return the first complete line containing `marker`
async fn wait_for_marker(path: PathBuf, marker: String, poll: Duration) -> SessionResult<String> {
    let mut file = File::open(&path).await?;
    let mut pending = Vec::new();
    let mut buffer = [0_u8; 4096];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            sleep(poll).await;
            continue;
        }
        pending.extend_from_slice(&buffer[..read]);
        while let Some(end) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end();
            debug!(target: "hsm_client", "{line}");
            if line.contains(marker.as_str()) {
                return Ok(line.to_owned());
            }
        }
    }
}

#[expect(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc, time::Duration};

    use tempfile::TempDir;

    use super::*;
    use crate::test_helpers::{
        FixedDirectory, FixedSecretStore, MemoryConnector, MemoryHsm, credentials_secret,
    };

    const MARKER: &str = "libevmulti_init: Ready !";

    struct Fixture {
        _dir: TempDir,
        session: HsmSession,
        hsm: Arc<MemoryHsm>,
    }

    fn fixture(script: &str, configure_bin: Option<&str>) -> Fixture {
        hsm_signer_logger::log_init(None);
        let dir = TempDir::new().unwrap();
        let script_path = dir.path().join("client.sh");
        fs::write(&script_path, script).unwrap();
        let config = SessionConfig {
            cluster_id: "cluster-1234".to_owned(),
            region: "eu-west-1".to_owned(),
            partition: "PARTITION_1".to_owned(),
            client_bin: "/bin/sh".into(),
            client_args: vec![script_path.to_string_lossy().into_owned()],
            configure_bin: configure_bin.map(PathBuf::from),
            client_log: dir.path().join("client.log"),
            readiness_marker: MARKER.to_owned(),
            readiness_timeout: Duration::from_secs(5),
            dependency_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(20),
        };
        Fixture {
            _dir: dir,
            session: HsmSession::new(config),
            hsm: Arc::new(MemoryHsm::new()),
        }
    }

    impl Fixture {
        async fn start(&self, password: &str) -> SessionResult<()> {
            self.session
                .start(
                    &FixedDirectory(Some("10.0.0.12".to_owned())),
                    &FixedSecretStore(Some(credentials_secret("crypto_user", password))),
                    Arc::new(MemoryConnector::new(self.hsm.clone(), "crypto_user", "secret")),
                )
                .await
        }
    }

    fn ready_script() -> String {
        format!("echo 'starting'\necho '{MARKER}'\nsleep 30\n")
    }

    #[tokio::test]
    async fn test_start_and_logout() {
        let f = fixture(&ready_script(), Some("/bin/true"));
        assert_eq!(f.session.state(), SessionState::Unstarted);
        assert!(f.session.provider().is_err());

        f.start("secret").await.unwrap();
        assert_eq!(f.session.state(), SessionState::Authenticated);
        assert_eq!(f.session.hsm_address(), Some("10.0.0.12"));
        assert_eq!(f.session.keystore_password().unwrap(), "secret");
        assert_eq!(f.session.provider().unwrap().name(), "memory");

        // a second start is refused
        assert!(matches!(
            f.start("secret").await,
            Err(SessionError::InvalidState(_))
        ));

        f.session.logout().await.unwrap();
        assert_eq!(f.session.state(), SessionState::LoggedOut);
        assert_eq!(f.hsm.logout_calls(), 1);
        assert!(f.session.provider().is_err());
        assert_eq!(f.session.wait_for_client_exit().await, None);

        f.session.logout().await.unwrap();
        assert_eq!(f.hsm.logout_calls(), 1);
    }

    #[tokio::test]
    async fn test_marker_split_across_writes() {
        let script = "printf 'libevmulti_init: Re'\nsleep 0.3\nprintf 'ady !\\n'\nsleep 30\n";
        let f = fixture(script, None);
        f.start("secret").await.unwrap();
        let log = fs::read_to_string(&f.session.config.client_log).unwrap();
        assert!(log.contains(MARKER));
        f.session.logout().await.unwrap();
    }

    #[tokio::test]
    async fn test_readiness_timeout() {
        let mut f = fixture("echo 'starting'\nsleep 30\n", None);
        f.session.config.readiness_timeout = Duration::from_millis(300);
        let err = f.start("secret").await.unwrap_err();
        assert!(matches!(err, SessionError::ReadinessTimeout(_)));
        assert_eq!(f.session.state(), SessionState::Failed);
        assert!(!err.is_authentication_failure());
        // no supervisor: the child was killed during startup
        assert_eq!(f.session.wait_for_client_exit().await, None);
    }

    #[tokio::test]
    async fn test_client_exits_before_ready() {
        let f = fixture("echo 'cannot reach the HSM'\nexit 3\n", None);
        let err = f.start("secret").await.unwrap_err();
        assert!(matches!(err, SessionError::ClientExited(_)), "{err}");
        assert_eq!(f.session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_authentication_failure() {
        let f = fixture(&ready_script(), None);
        let err = f.start("wrong").await.unwrap_err();
        assert!(err.is_authentication_failure(), "{err}");
        assert_eq!(f.session.state(), SessionState::Failed);
        assert!(f.session.provider().is_err());
        // the client was stopped
        assert!(f.session.supervisor.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_secret() {
        let f = fixture(&ready_script(), None);
        let err = f
            .session
            .start(
                &FixedDirectory(Some("10.0.0.12".to_owned())),
                &FixedSecretStore(None),
                Arc::new(MemoryConnector::new(f.hsm.clone(), "crypto_user", "secret")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Secrets(_)));
        assert_eq!(f.session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_directory_failure() {
        let f = fixture(&ready_script(), None);
        let err = f
            .session
            .start(
                &FixedDirectory(None),
                &FixedSecretStore(Some(credentials_secret("crypto_user", "secret"))),
                Arc::new(MemoryConnector::new(f.hsm.clone(), "crypto_user", "secret")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Directory(_)));
        assert_eq!(f.session.state(), SessionState::Failed);
        assert_eq!(f.session.hsm_address(), None);
        // the client was never launched
        assert!(!f.session.config.client_log.exists());
    }

    #[tokio::test]
    async fn test_configure_failure() {
        let f = fixture(&ready_script(), Some("/bin/false"));
        let err = f.start("secret").await.unwrap_err();
        assert!(matches!(err, SessionError::ClientProcess(_)), "{err}");
        assert_eq!(f.session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_client_exit_while_serving() {
        let script = format!("echo '{MARKER}'\nsleep 0.5\nexit 1\n");
        let f = fixture(&script, None);
        f.start("secret").await.unwrap();
        let status = f.session.wait_for_client_exit().await.unwrap();
        assert!(status.contains("exited"), "{status}");
        assert_eq!(f.session.state(), SessionState::Failed);
        assert!(f.session.provider().is_err());
        // teardown still releases the login
        f.session.logout().await.unwrap();
        assert_eq!(f.hsm.logout_calls(), 1);
        assert_eq!(f.session.state(), SessionState::Failed);
    }
}

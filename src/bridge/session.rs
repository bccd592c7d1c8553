//! Script sessions
//!
//! A V8 isolate is single-threaded, so each session owns a dedicated OS
//! thread running a current-thread tokio runtime inside a `LocalSet`. Callers
//! talk to it over a command channel and get their answer on a oneshot, which
//! keeps at most one call in flight per session. Dropping the last handle to
//! a session closes the channel; the worker then exits and every native
//! object it owns is dropped with the isolate.

use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::modules::ModuleRegistry;
use super::runtime::ScriptRuntime;
use super::value::ScriptValue;
use crate::core::error::{FolioError, Result};

enum SessionCommand {
    Call {
        function: String,
        arg: String,
        resp: oneshot::Sender<Result<ScriptValue>>,
    },
    MissingFunctions {
        names: Vec<String>,
        resp: oneshot::Sender<Result<Vec<String>>>,
    },
    HandleCount {
        resp: oneshot::Sender<usize>,
    },
}

/// Send + Sync front for a provider script running on its own thread
pub struct ScriptSession {
    id: Uuid,
    name: String,
    tx: mpsc::Sender<SessionCommand>,
}

impl ScriptSession {
    /// Spawn the worker, apply `registry` and evaluate `source`
    ///
    /// Returns once the provider is loaded; a load failure is reported here
    /// and no session is created.
    pub async fn start(
        name: impl Into<String>,
        source: String,
        registry: ModuleRegistry,
    ) -> Result<Self> {
        let name = name.into();
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel::<SessionCommand>(32);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        let worker_name = name.clone();
        thread::Builder::new()
            .name(format!("folio-session-{}", name))
            .spawn(move || {
                let name = worker_name;
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(FolioError::ProviderLoadError(format!(
                            "failed to create runtime for {}: {}",
                            name, e
                        ))));
                        return;
                    }
                };

                let local = tokio::task::LocalSet::new();
                local.block_on(&rt, async move {
                    let loaded = ScriptRuntime::new(&name, &registry).and_then(|mut runtime| {
                        runtime.load(source)?;
                        Ok(runtime)
                    });
                    let mut runtime = match loaded {
                        Ok(runtime) => runtime,
                        Err(e) => {
                            let message = format!("{}: {:#}", name, e);
                            error!(provider = %name, error = %message, "Provider failed to load");
                            let _ = ready_tx.send(Err(FolioError::ProviderLoadError(message)));
                            return;
                        }
                    };

                    let _ = ready_tx.send(Ok(()));
                    info!(session = %id, provider = %name, "Script session ready");

                    while let Some(cmd) = rx.recv().await {
                        match cmd {
                            SessionCommand::Call {
                                function,
                                arg,
                                resp,
                            } => {
                                let result = match runtime.call(&function, &arg).await {
                                    Ok(Ok(value)) => Ok(value),
                                    Ok(Err(message)) => {
                                        Err(FolioError::ScriptError { function, message })
                                    }
                                    Err(e) => Err(FolioError::ScriptError {
                                        function,
                                        message: format!("{:#}", e),
                                    }),
                                };
                                let _ = resp.send(result);
                            }
                            SessionCommand::MissingFunctions { names, resp } => {
                                let result = runtime.missing_functions(&names).map_err(|e| {
                                    FolioError::ProviderLoadError(format!("{}: {:#}", name, e))
                                });
                                let _ = resp.send(result);
                            }
                            SessionCommand::HandleCount { resp } => {
                                let _ = resp.send(runtime.handle_count());
                            }
                        }
                    }

                    debug!(session = %id, provider = %name, "Script session exiting");
                });
            })
            .map_err(|e| {
                FolioError::ProviderLoadError(format!("Failed to spawn session thread: {}", e))
            })?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self { id, name, tx }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(FolioError::SessionClosed(format!(
                "{} exited during startup",
                name
            ))),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn closed(&self) -> FolioError {
        FolioError::SessionClosed(self.name.clone())
    }

    async fn request<T>(
        &self,
        command: SessionCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T> {
        self.tx.send(command).await.map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())
    }

    /// Invoke the global function `function` with one string argument
    pub async fn call(&self, function: &str, arg: &str) -> Result<ScriptValue> {
        let (resp, rx) = oneshot::channel();
        let command = SessionCommand::Call {
            function: function.to_string(),
            arg: arg.to_string(),
            resp,
        };
        self.request(command, rx).await?
    }

    /// Which of `names` the script does not define as functions
    pub async fn missing_functions(&self, names: &[&str]) -> Result<Vec<String>> {
        let (resp, rx) = oneshot::channel();
        let command = SessionCommand::MissingFunctions {
            names: names.iter().map(|n| n.to_string()).collect(),
            resp,
        };
        self.request(command, rx).await?
    }

    /// Live handles in this session's table
    pub async fn handle_count(&self) -> Result<usize> {
        let (resp, rx) = oneshot::channel();
        self.request(SessionCommand::HandleCount { resp }, rx).await
    }
}

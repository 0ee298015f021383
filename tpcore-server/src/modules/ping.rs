//! `tpping`: a diagnostic protocol module.
//!
//! Listens on `port` from its own config section. A client sends one line
//! holding a session id; the module claims the ticket, reports the session
//! start, answers `ok <account>@<host>:<port>`, then reports the end and
//! returns the ticket. Anything else gets `denied <reason>`.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tpcore_plugin_host::{InitArgs, ModuleError, ModuleResult, ProtocolModule, SessionCallbacks};
use tpcore_types::SessionTicket;
use tracing::{Instrument, Span, debug, info, warn};

pub const PING_LIB: &str = "tpping";

struct Setup {
    bind: SocketAddr,
    callbacks: SessionCallbacks,
    span: Span,
}

struct Worker {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    thread: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    setup: Option<Setup>,
    worker: Option<Worker>,
}

#[derive(Default)]
pub struct PingModule {
    inner: Mutex<Inner>,
}

impl PingModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address the listener is bound to while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().worker.as_ref().map(|w| w.local_addr)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProtocolModule for PingModule {
    fn init(&self, args: InitArgs) -> ModuleResult {
        let _enter = args.logger.enter();
        let section = args
            .module_config()
            .ok_or_else(|| ModuleError::new(format!("missing [{}] section", args.section)))?;

        let port = section
            .get("port")
            .and_then(toml::Value::as_integer)
            .ok_or_else(|| ModuleError::new("`port` is required"))?;
        let port = u16::try_from(port)
            .map_err(|_| ModuleError::new(format!("`port` out of range: {port}")))?;

        let ip = match section.get("bind-ip").and_then(toml::Value::as_str) {
            Some(s) => s
                .parse::<IpAddr>()
                .map_err(|e| ModuleError::new(format!("bad `bind-ip` {s}: {e}")))?,
            None => IpAddr::from([127, 0, 0, 1]),
        };

        debug!(%ip, port, "Ping configured");
        self.lock().setup = Some(Setup {
            bind: SocketAddr::new(ip, port),
            callbacks: args.callbacks.clone(),
            span: args.logger.clone(),
        });
        Ok(())
    }

    fn start(&self) -> ModuleResult {
        let mut inner = self.lock();
        if inner.worker.is_some() {
            return Ok(());
        }
        let setup = inner
            .setup
            .as_ref()
            .ok_or_else(|| ModuleError::new("start before init"))?;

        let listener = std::net::TcpListener::bind(setup.bind)
            .map_err(|e| ModuleError::new(format!("cannot listen on {}: {e}", setup.bind)))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| ModuleError::new(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ModuleError::new(e.to_string()))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ModuleError::new(format!("cannot build runtime: {e}")))?;

        let (shutdown, rx) = oneshot::channel();
        let callbacks = setup.callbacks.clone();
        let span = setup.span.clone();
        let thread = std::thread::Builder::new()
            .name("tpping-accept".into())
            .spawn(move || runtime.block_on(serve(listener, callbacks, rx).instrument(span)))
            .map_err(|e| ModuleError::new(format!("cannot spawn accept thread: {e}")))?;

        setup.span.in_scope(|| info!(addr = %local_addr, "Ping listening"));
        inner.worker = Some(Worker {
            local_addr,
            shutdown,
            thread,
        });
        Ok(())
    }

    fn stop(&self) {
        let Some(worker) = self.lock().worker.take() else {
            return;
        };
        let _ = worker.shutdown.send(());
        if worker.thread.join().is_err() {
            warn!(addr = %worker.local_addr, "Ping accept thread panicked");
        }
    }
}

async fn serve(
    listener: std::net::TcpListener,
    callbacks: SessionCallbacks,
    mut shutdown: oneshot::Receiver<()>,
) {
    let listener = match TcpListener::from_std(listener) {
        Ok(l) => l,
        Err(e) => {
            warn!(error = %e, "Ping listener unusable");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "Ping connection");
                    tokio::spawn(handle(stream, callbacks.clone()).in_current_span());
                }
                Err(e) => warn!(error = %e, "Ping accept failed"),
            },
        }
    }
    debug!("Ping listener closed");
}

async fn handle(stream: TcpStream, callbacks: SessionCallbacks) {
    let (reader, mut writer) = stream.into_split();
    let sid = match BufReader::new(reader).lines().next_line().await {
        Ok(Some(line)) => line.trim().to_string(),
        _ => return,
    };

    // Callbacks block on the core, so keep them off this runtime's thread.
    let cb = callbacks.clone();
    let opened = tokio::task::spawn_blocking(move || open_session(&cb, &sid))
        .await
        .unwrap_or_else(|e| Err(e.to_string()));

    match opened {
        Ok((ticket, db_id)) => {
            let line = format!(
                "ok {}@{}:{}\n",
                ticket.account_name, ticket.host_ip, ticket.host_port
            );
            let _ = writer.write_all(line.as_bytes()).await;
            let _ = tokio::task::spawn_blocking(move || close_session(&callbacks, ticket, db_id)).await;
        }
        Err(reason) => {
            let _ = writer.write_all(format!("denied {reason}\n").as_bytes()).await;
        }
    }
    let _ = writer.shutdown().await;
}

fn open_session(callbacks: &SessionCallbacks, sid: &str) -> Result<(SessionTicket, i64), String> {
    let ticket = callbacks
        .take_session(sid)
        .ok_or_else(|| "unknown session".to_string())?;

    match callbacks.session_begin(&ticket) {
        Ok(db_id) => Ok((ticket, db_id)),
        Err(e) => {
            callbacks.free_session(ticket);
            Err(e.to_string())
        }
    }
}

fn close_session(callbacks: &SessionCallbacks, ticket: SessionTicket, db_id: i64) {
    // The broker logs a failed report; the ticket is returned either way.
    let _ = callbacks.session_end(db_id, 0);
    callbacks.free_session(ticket);
}

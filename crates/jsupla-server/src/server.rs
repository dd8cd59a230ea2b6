//! TCP front end.
//!
//! Frames are newline-delimited JSON, capped at `MAX_FRAME_LEN` bytes. Every
//! connection gets a session, a reader loop feeding it and a writer task
//! draining its transport.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::Instrument;

use jsupla_core::{
    ChannelTransport, DeviceMessage, EventBus, JSuplaEvent, MAX_FRAME_LEN, Outbound, ServerConfig,
};
use jsupla_devices::{DeviceRegistry, DiscoverySink};

use crate::credentials::CredentialVerifier;
use crate::error::{Result, ServerError};
use crate::scheduler::Scheduler;
use crate::session::{Session, SessionContext};

/// Number of currently connected sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionCount(Arc<AtomicUsize>);

impl SessionCount {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn increment(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn decrement(&self) -> usize {
        self.0.fetch_sub(1, Ordering::SeqCst) - 1
    }
}

struct Shared {
    ctx: SessionContext,
    event_bus: EventBus,
    next_id: AtomicU64,
    sessions: SessionCount,
}

/// jSupla device server.
pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl Server {
    /// Bind the listening socket and prepare the shared session context.
    pub async fn bind(
        config: &ServerConfig,
        registry: DeviceRegistry,
        discovery: Arc<dyn DiscoverySink>,
        event_bus: EventBus,
    ) -> Result<Self> {
        config.validate()?;

        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;

        let ctx = SessionContext {
            verifier: Arc::new(CredentialVerifier::from_config(&config.auth)),
            registry,
            discovery,
            scheduler: Scheduler::current(),
            activity_timeout: config.activity_timeout(),
            device_timeout: config.device_timeout(),
        };
        tracing::info!(
            %addr,
            scheme = ctx.verifier.scheme(),
            timeout_secs = config.device_timeout_secs,
            "jSupla server listening"
        );

        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                ctx,
                event_bus,
                next_id: AtomicU64::new(1),
                sessions: SessionCount::default(),
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn session_count(&self) -> SessionCount {
        self.shared.sessions.clone()
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("jSupla server stopping");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let shared = self.shared.clone();
                        tokio::spawn(handle_connection(shared, stream, peer));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
    }
}

enum Exit {
    Eof,
    Failed(jsupla_core::Error),
    WriterDone,
}

async fn handle_connection(shared: Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
    let id = shared.next_id.fetch_add(1, Ordering::SeqCst);
    let peer = peer.to_string();
    let (read, write) = stream.into_split();
    let (transport, outbound) = ChannelTransport::new();
    let session = Session::new(id, &peer, transport.clone(), shared.ctx.clone());

    let connected = shared.sessions.increment();
    tracing::info!(parent: session.span(), connected, "Device connected");
    shared.event_bus.publish_with_source(
        JSuplaEvent::SessionOpened {
            session_id: id,
            peer,
            timestamp: chrono::Utc::now().timestamp(),
        },
        "server",
    );

    let mut writer = tokio::spawn(write_loop(write, outbound).instrument(session.span().clone()));
    let mut lines = FramedRead::new(read, LinesCodec::new_with_max_length(MAX_FRAME_LEN));

    let exit = loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<DeviceMessage>(&line) {
                        Ok(message) => session.accept(message).await,
                        Err(e) => break Exit::Failed(e.into()),
                    }
                }
                Some(Err(e)) => break Exit::Failed(frame_error(e)),
                None => break Exit::Eof,
            },
            _ = &mut writer => break Exit::WriterDone,
        }
    };

    let writer_done = matches!(exit, Exit::WriterDone);
    match exit {
        Exit::Failed(error) => session.on_error(&error.to_string()).await,
        Exit::Eof | Exit::WriterDone => session.on_complete().await,
    }
    // Teardown closed the transport, so the writer drains and stops.
    if !writer_done {
        let _ = writer.await;
    }

    let connected = shared.sessions.decrement();
    tracing::info!(parent: session.span(), connected, "Device disconnected");
    shared.event_bus.publish_with_source(
        JSuplaEvent::SessionClosed {
            session_id: id,
            guid: session.guid().await,
            timestamp: chrono::Utc::now().timestamp(),
        },
        "server",
    );
}

fn frame_error(error: LinesCodecError) -> jsupla_core::Error {
    match error {
        LinesCodecError::MaxLineLengthExceeded => {
            jsupla_core::Error::FrameTooLong { max: MAX_FRAME_LEN }
        }
        LinesCodecError::Io(e) => e.into(),
    }
}

async fn write_loop(mut write: OwnedWriteHalf, mut outbound: UnboundedReceiver<Outbound>) {
    while let Some(item) = outbound.recv().await {
        let message = match item {
            Outbound::Message(message) => message,
            Outbound::Close => break,
        };
        let mut frame = match serde_json::to_string(&message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(kind = message.kind(), error = %e, "Failed to encode message");
                continue;
            }
        };
        frame.push('\n');
        match write.write_all(frame.as_bytes()).await {
            Ok(()) => tracing::trace!(kind = message.kind(), "Sent message"),
            Err(e) => tracing::warn!(kind = message.kind(), error = %e, "Failed to write message"),
        }
    }
    if let Err(e) = write.shutdown().await {
        tracing::debug!(error = %e, "Failed to shut down connection");
    }
}

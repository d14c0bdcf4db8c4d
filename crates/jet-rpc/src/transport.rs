//! Duplex text-frame transports.
//!
//! The peer engine never sees sockets. It talks to a [`Transport`], which
//! hands back a bounded channel of inbound frames on connect and accepts
//! outbound frames without blocking.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::codec::TextFrameCodec;
use crate::config::TransportConfig;
use crate::error::{Result, TransportError};

/// Contract between the peer engine and the physical connection.
pub trait Transport: Send + Sync + 'static {
    /// Open the connection.
    ///
    /// On success, inbound frames are delivered one at a time, in arrival
    /// order, on the returned channel. The channel closes when the
    /// connection goes away.
    fn connect(&self) -> impl Future<Output = Result<mpsc::Receiver<String>>> + Send;

    /// Queue one outbound frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is not connected.
    fn send(&self, frame: String) -> Result<()>;

    /// Close the connection. Safe to call when not connected.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

struct Link {
    outbound: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
    open: Arc<AtomicBool>,
}

impl Link {
    fn shutdown(self) {
        self.open.store(false, Ordering::SeqCst);
        self.reader.abort();
        // Dropping `outbound` lets the writer flush and close the socket.
    }
}

/// TCP transport framing text with [`TextFrameCodec`].
///
/// Can be connected again after a disconnect or a dropped connection.
pub struct StreamTransport {
    config: TransportConfig,
    link: Mutex<Option<Link>>,
}

impl StreamTransport {
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            link: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace_link(&self, link: Option<Link>) {
        let previous = std::mem::replace(&mut *self.link(), link);
        if let Some(previous) = previous {
            previous.shutdown();
        }
    }
}

impl Transport for StreamTransport {
    fn connect(&self) -> impl Future<Output = Result<mpsc::Receiver<String>>> + Send {
        async move {
            let stream = tokio::time::timeout(
                self.config.connect_timeout(),
                TcpStream::connect(self.config.address.as_str()),
            )
            .await
            .map_err(|_| TransportError::ConnectTimeout(self.config.connect_timeout_ms))??;
            stream.set_nodelay(true)?;
            debug!("Connected to jet daemon at {}", self.config.address);

            let codec = TextFrameCodec::with_max_frame_size(self.config.max_frame_size);
            let (mut sink, mut frames) = Framed::new(stream, codec).split();
            let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
            let (inbound, inbound_rx) = mpsc::channel(self.config.inbound_capacity);
            let open = Arc::new(AtomicBool::new(true));

            let writer_open = Arc::clone(&open);
            tokio::spawn(async move {
                while let Some(frame) = outbound_rx.recv().await {
                    if let Err(e) = sink.send(frame).await {
                        warn!("Failed to write frame: {}", e);
                        break;
                    }
                }
                writer_open.store(false, Ordering::SeqCst);
                let _ = sink.close().await;
            });

            let reader_open = Arc::clone(&open);
            let reader = tokio::spawn(async move {
                while let Some(result) = frames.next().await {
                    match result {
                        Ok(frame) => {
                            trace!("Received frame: {}", frame);
                            if inbound.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Dropping connection after read error: {}", e);
                            break;
                        }
                    }
                }
                reader_open.store(false, Ordering::SeqCst);
                debug!("Connection reader finished");
            });

            self.replace_link(Some(Link {
                outbound,
                reader,
                open,
            }));

            Ok(inbound_rx)
        }
    }

    fn send(&self, frame: String) -> Result<()> {
        let link = self.link();
        let Some(link) = link.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        if !link.open.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }

        trace!("Sending frame: {}", frame);
        link.outbound
            .send(frame)
            .map_err(|_| TransportError::Disconnected)
    }

    fn disconnect(&self) {
        debug!("Disconnecting from {}", self.config.address);
        self.replace_link(None);
    }

    fn is_connected(&self) -> bool {
        self.link()
            .as_ref()
            .is_some_and(|link| link.open.load(Ordering::SeqCst))
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.replace_link(None);
    }
}

//! Long-lived websocket subscription with reconnection
//!
//! The connector owns exactly one connection at a time. Inbound frames are
//! pushed, in arrival order, onto a bounded queue; a full queue blocks the
//! read loop, which in turn applies backpressure to the socket.
//!
//! ```text
//! Connected --(read error / remote close)--> Reconnecting --(connect + subscribe)--> Connected
//!     \______________________(shutdown)______________________> Closed
//! ```

use crate::streamer_core::error_handler::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
pub enum StreamError {
    Connect(String),
    Timeout(&'static str),
    Send(String),
    Closed,
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Connect(msg) => write!(f, "Connection error: {}", msg),
            StreamError::Timeout(stage) => write!(f, "Timed out during {}", stage),
            StreamError::Send(msg) => write!(f, "Failed to send frame: {}", msg),
            StreamError::Closed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for StreamError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Connected,
    Reconnecting,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    pub url: String,
    /// Sent verbatim once per connection
    pub subscription: Vec<u8>,
    pub connect_timeout: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

enum ReadOutcome {
    Shutdown,
    Failed(String),
}

pub struct StreamConnector {
    settings: ConnectorSettings,
    conn: Option<WsStream>,
    msg_tx: mpsc::Sender<Vec<u8>>,
    state_tx: watch::Sender<ConnectorState>,
    shutdown: watch::Receiver<bool>,
    reconnects: u64,
}

impl StreamConnector {
    /// Open the first connection and subscribe.
    ///
    /// Failing here is a startup failure and is returned to the caller rather
    /// than retried.
    pub async fn connect(
        settings: ConnectorSettings,
        msg_tx: mpsc::Sender<Vec<u8>>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, StreamError> {
        let (state_tx, _) = watch::channel(ConnectorState::Reconnecting);

        let mut connector = Self {
            settings,
            conn: None,
            msg_tx,
            state_tx,
            shutdown,
            reconnects: 0,
        };

        connector.open().await?;
        connector.subscribe().await?;
        connector.set_state(ConnectorState::Connected);

        Ok(connector)
    }

    /// Watch the connector state from another task
    pub fn state(&self) -> watch::Receiver<ConnectorState> {
        self.state_tx.subscribe()
    }

    async fn open(&mut self) -> Result<(), StreamError> {
        log::info!("🔌 Connecting to log feed...");

        let (ws, response) = timeout(
            self.settings.connect_timeout,
            connect_async(self.settings.url.as_str()),
        )
        .await
        .map_err(|_| StreamError::Timeout("connect"))?
        .map_err(|e| StreamError::Connect(e.to_string()))?;

        log::info!("✅ Feed connected (status: {})", response.status());
        self.conn = Some(ws);
        Ok(())
    }

    /// Send the subscription request over the open connection
    pub async fn subscribe(&mut self) -> Result<(), StreamError> {
        let ws = self.conn.as_mut().ok_or(StreamError::Closed)?;
        let payload = String::from_utf8_lossy(&self.settings.subscription).into_owned();

        timeout(self.settings.connect_timeout, ws.send(Message::Text(payload)))
            .await
            .map_err(|_| StreamError::Timeout("subscribe"))?
            .map_err(|e| StreamError::Send(e.to_string()))?;

        log::info!("📡 Subscription request sent");
        Ok(())
    }

    /// Pump inbound frames onto the message queue until the connection fails
    /// or shutdown is requested.
    async fn read_loop(&mut self) -> ReadOutcome {
        let Some(ws) = self.conn.as_mut() else {
            return ReadOutcome::Failed("no open connection".to_string());
        };

        loop {
            let frame = tokio::select! {
                frame = ws.next() => frame,
                _ = self.shutdown.changed() => return ReadOutcome::Shutdown,
            };

            let payload = match frame {
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Binary(bytes))) => bytes,
                Some(Ok(Message::Close(frame))) => {
                    return ReadOutcome::Failed(format!("remote closed: {:?}", frame));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return ReadOutcome::Failed(e.to_string()),
                None => return ReadOutcome::Failed("stream ended".to_string()),
            };

            let sent = tokio::select! {
                sent = self.msg_tx.send(payload) => sent,
                _ = self.shutdown.changed() => return ReadOutcome::Shutdown,
            };

            if sent.is_err() {
                log::warn!("⚠️  Message queue closed, stopping feed reader");
                return ReadOutcome::Shutdown;
            }
        }
    }

    /// Drop the broken connection and keep trying until a new one is open and
    /// subscribed. Returns `false` if shutdown arrived first.
    pub async fn reconnect(&mut self) -> bool {
        self.set_state(ConnectorState::Reconnecting);
        self.close_connection().await;

        let mut backoff =
            ExponentialBackoff::new(self.settings.reconnect_initial, self.settings.reconnect_max);

        loop {
            if !backoff.sleep(&mut self.shutdown).await {
                return false;
            }

            let attempt = match self.open().await {
                Ok(()) => self.subscribe().await,
                Err(e) => Err(e),
            };

            match attempt {
                Ok(()) => {
                    self.reconnects += 1;
                    self.set_state(ConnectorState::Connected);
                    log::info!("🔄 Reconnected after {} attempt(s)", backoff.attempt());
                    return true;
                }
                Err(e) => {
                    log::error!("❌ Reconnect failed: {}", e);
                    self.close_connection().await;
                }
            }
        }
    }

    /// Run until shutdown: read, and on any read failure reconnect and resume.
    pub async fn run(mut self) {
        loop {
            match self.read_loop().await {
                ReadOutcome::Shutdown => break,
                ReadOutcome::Failed(reason) => {
                    log::warn!("⚠️  Feed read failed: {}", reason);
                    if !self.reconnect().await {
                        break;
                    }
                }
            }
        }

        self.close_connection().await;
        self.set_state(ConnectorState::Closed);
        log::info!("✅ Feed connector closed after {} reconnects", self.reconnects);
    }

    async fn close_connection(&mut self) {
        if let Some(mut ws) = self.conn.take() {
            let _ = timeout(Duration::from_secs(1), ws.close(None)).await;
        }
    }

    fn set_state(&self, state: ConnectorState) {
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn settings(addr: std::net::SocketAddr) -> ConnectorSettings {
        ConnectorSettings {
            url: format!("ws://{}", addr),
            subscription: br#"{"method":"logsSubscribe"}"#.to_vec(),
            connect_timeout: Duration::from_secs(2),
            reconnect_initial: Duration::from_millis(10),
            reconnect_max: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_delivers_frames_and_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (sub_tx, mut sub_rx) = mpsc::unbounded_channel::<String>();

        // Each connection: expect the subscription, send one frame, then drop
        tokio::spawn(async move {
            for i in 0..2 {
                let (tcp, _) = listener.accept().await.unwrap();
                let mut ws = accept_async(tcp).await.unwrap();
                if let Some(Ok(Message::Text(sub))) = ws.next().await {
                    sub_tx.send(sub).unwrap();
                }
                ws.send(Message::Text(format!("frame-{}", i))).await.unwrap();
                ws.close(None).await.unwrap();
            }
        });

        let (msg_tx, mut msg_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let connector = StreamConnector::connect(settings(addr), msg_tx, shutdown_rx)
            .await
            .unwrap();
        let state = connector.state();
        let handle = tokio::spawn(connector.run());

        assert_eq!(msg_rx.recv().await.unwrap(), b"frame-0".to_vec());
        assert_eq!(msg_rx.recv().await.unwrap(), b"frame-1".to_vec());

        // Subscribed once per connection
        assert_eq!(sub_rx.recv().await.unwrap(), r#"{"method":"logsSubscribe"}"#);
        assert_eq!(sub_rx.recv().await.unwrap(), r#"{"method":"logsSubscribe"}"#);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*state.borrow(), ConnectorState::Closed);
    }

    #[tokio::test]
    async fn test_first_connect_failure_is_fatal() {
        // Bind and drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let (msg_tx, _msg_rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let result = StreamConnector::connect(settings(addr), msg_tx, shutdown_rx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_idle_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            // Hold the connection open without sending anything
            while ws.next().await.is_some() {}
        });

        let (msg_tx, _msg_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let connector = StreamConnector::connect(settings(addr), msg_tx, shutdown_rx)
            .await
            .unwrap();
        let handle = tokio::spawn(connector.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

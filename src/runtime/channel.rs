//! Ordered, asynchronous message channel between the two processes.
//!
//! Each side holds one [`Endpoint`]. Messages sent from one endpoint arrive at
//! its peer in FIFO order. Nothing else is shared between the two sides.

use std::fmt;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::error::BridgeError;
use super::message::ProcessMessage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcessId {
    /// Owns browsers, issues evaluation requests, talks to the host.
    Browser,
    /// Runs scripts in isolation and answers evaluation requests.
    Renderer,
}

impl ProcessId {
    pub fn peer(self) -> Self {
        match self {
            ProcessId::Browser => ProcessId::Renderer,
            ProcessId::Renderer => ProcessId::Browser,
        }
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessId::Browser => f.write_str("browser"),
            ProcessId::Renderer => f.write_str("renderer"),
        }
    }
}

/// One side of a process channel.
pub struct Endpoint {
    local: ProcessId,
    tx: mpsc::UnboundedSender<ProcessMessage>,
    rx: mpsc::UnboundedReceiver<ProcessMessage>,
}

/// Create a connected `(browser, renderer)` endpoint pair.
pub fn pair() -> (Endpoint, Endpoint) {
    let (to_renderer, from_browser) = mpsc::unbounded_channel();
    let (to_browser, from_renderer) = mpsc::unbounded_channel();
    (
        Endpoint {
            local: ProcessId::Browser,
            tx: to_renderer,
            rx: from_renderer,
        },
        Endpoint {
            local: ProcessId::Renderer,
            tx: to_browser,
            rx: from_browser,
        },
    )
}

impl Endpoint {
    pub fn local(&self) -> ProcessId {
        self.local
    }

    /// Queue `message` for the peer process. Never blocks.
    pub fn send(&self, message: ProcessMessage) -> Result<(), BridgeError> {
        tracing::trace!(from = %self.local, name = %message.name(), "send process message");
        self.tx
            .send(message)
            .map_err(|_| BridgeError::ChannelClosed(self.local.peer()))
    }

    /// Take the next delivered message without waiting.
    pub fn try_recv(&mut self) -> Option<ProcessMessage> {
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait for the next message. Returns `None` once the peer has gone away
    /// and every queued message has been delivered.
    pub async fn recv(&mut self) -> Option<ProcessMessage> {
        self.rx.recv().await
    }

    /// Whether the peer has dropped its endpoint.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_delivers_in_order() {
        let (browser, mut renderer) = pair();
        for i in 0..5 {
            browser
                .send(ProcessMessage::new("Ping").with_int(i))
                .unwrap();
        }
        for i in 0..5 {
            let message = renderer.try_recv().unwrap();
            assert_eq!(message.int(0).unwrap(), i);
        }
        assert!(renderer.try_recv().is_none());
    }

    #[test]
    fn test_send_after_peer_dropped_fails() {
        let (browser, renderer) = pair();
        drop(renderer);
        assert!(browser.is_closed());
        assert!(matches!(
            browser.send(ProcessMessage::new("Ping")),
            Err(BridgeError::ChannelClosed(ProcessId::Renderer))
        ));
    }

    #[tokio::test]
    async fn test_recv_ends_when_peer_dropped() {
        let (browser, mut renderer) = pair();
        browser.send(ProcessMessage::new("Last")).unwrap();
        drop(browser);
        assert_eq!(renderer.recv().await.unwrap().name(), "Last");
        assert!(renderer.recv().await.is_none());
    }
}

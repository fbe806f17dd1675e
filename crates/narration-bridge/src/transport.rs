//! Persistent bidirectional connection carrying narration frames.
//!
//! The receive thread is the only user of a [`Transport`]. Reads return
//! [`Incoming::Idle`] after the poll interval so the thread can notice a stop request
//! and close the connection itself with the requested code.

use std::net::TcpStream;
use std::time::Duration;

use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::protocol::WebSocketConfig;
use tungstenite::protocol::frame::CloseFrame;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::error::NarrationError;

/// Close code for a user cancel.
pub const CLOSE_CANCEL: u16 = 3001;
pub const CLOSE_CANCEL_REASON: &str = "cancel";
/// Close code after the completion frame.
pub const CLOSE_NORMAL: u16 = 1000;

#[derive(Debug, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    /// Nothing arrived within the poll interval.
    Idle,
    /// The peer closed the connection.
    Closed,
}

pub trait Transport: Send {
    fn send_text(&mut self, text: &str) -> Result<(), NarrationError>;
    fn read(&mut self) -> Result<Incoming, NarrationError>;
    /// Best-effort close. Safe to call more than once.
    fn close(&mut self, code: u16, reason: &str);
}

pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &str, token: &str) -> Result<Box<dyn Transport>, NarrationError>;
}

/// WebSocket connector (plain or TLS).
#[derive(Clone, Debug)]
pub struct WsConnector {
    pub read_poll: Duration,
    pub max_message_bytes: usize,
}

impl Connector for WsConnector {
    fn connect(&self, endpoint: &str, token: &str) -> Result<Box<dyn Transport>, NarrationError> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| NarrationError::Transport(format!("bad endpoint {endpoint}: {e}")))?;
        let auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| NarrationError::InvalidRequest(format!("token: {e}")))?;
        request.headers_mut().insert("Authorization", auth);

        let config = WebSocketConfig::default()
            .max_message_size(Some(self.max_message_bytes))
            .max_frame_size(Some(self.max_message_bytes));
        let (socket, response) = tungstenite::client::connect_with_config(request, Some(config), 3)
            .map_err(|e| NarrationError::Transport(format!("connect: {e}")))?;
        tracing::info!(endpoint, status = response.status().as_u16(), "websocket connected");

        set_read_timeout(socket.get_ref(), Some(self.read_poll))
            .map_err(|e| NarrationError::Transport(format!("read timeout: {e}")))?;

        Ok(Box::new(WsTransport {
            socket,
            closed: false,
        }))
    }
}

fn set_read_timeout(stream: &MaybeTlsStream<TcpStream>, t: Option<Duration>) -> std::io::Result<()> {
    match stream {
        MaybeTlsStream::Plain(s) => s.set_read_timeout(t),
        MaybeTlsStream::NativeTls(s) => s.get_ref().set_read_timeout(t),
        _ => Ok(()),
    }
}

struct WsTransport {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl Transport for WsTransport {
    fn send_text(&mut self, text: &str) -> Result<(), NarrationError> {
        self.socket
            .send(Message::text(text.to_string()))
            .map_err(|e| NarrationError::Transport(format!("send: {e}")))
    }

    fn read(&mut self) -> Result<Incoming, NarrationError> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(Incoming::Text(text.as_str().to_string())),
            Ok(Message::Close(frame)) => {
                tracing::info!(
                    code = ?frame.as_ref().map(|f| u16::from(f.code)),
                    "peer closed websocket"
                );
                self.closed = true;
                Ok(Incoming::Closed)
            }
            Ok(_) => Ok(Incoming::Idle),
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(Incoming::Idle)
            }
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                self.closed = true;
                Ok(Incoming::Closed)
            }
            Err(e) => Err(NarrationError::Transport(format!("read: {e}"))),
        }
    }

    fn close(&mut self, code: u16, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        if let Err(e) = self.socket.close(Some(frame)) {
            tracing::debug!("websocket close: {e}");
        }
        let _ = self.socket.flush();
        tracing::info!(code, reason, "websocket closed");
    }
}

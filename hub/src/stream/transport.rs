use std::future::Future;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::error::HubError;

/// A source of text events for one streamed run.
///
/// `next_message` yields `None` once the peer has closed the stream.
/// `close` must be safe to call on a stream that has already ended.
pub trait EventStream: Send + 'static {
    fn next_message(&mut self) -> impl Future<Output = Option<Result<String, HubError>>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// [`EventStream`] over a client WebSocket connection.
pub struct WsEventStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

pub async fn connect(url: Url) -> Result<WsEventStream, HubError> {
    let (ws, resp) = tokio_tungstenite::connect_async(url.as_str()).await?;
    debug!(%url, status = %resp.status(), "stream connected");
    Ok(WsEventStream { ws, closed: false })
}

impl EventStream for WsEventStream {
    async fn next_message(&mut self) -> Option<Result<String, HubError>> {
        if self.closed {
            return None;
        }
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(txt))) => return Some(Ok(txt.as_str().to_owned())),
                Some(Ok(Message::Binary(bin))) => {
                    return Some(Ok(String::from_utf8_lossy(&bin).into_owned()))
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = self.ws.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "stream closed by peer");
                    self.closed = true;
                    return None;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Some(Err(e.into())),
                None => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.ws.close(None).await {
            debug!("stream close: {e}");
        }
    }
}

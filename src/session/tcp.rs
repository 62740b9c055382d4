//! JSON-lines transport over TCP.

use crate::defaults;
use crate::error::{Result, VoxdeskError};
use crate::session::config::SessionConfig;
use crate::session::events::{Outbound, StreamEvent};
use crate::session::protocol::{ClientMessage, ServerMessage};
use crate::session::transport::{InferenceTransport, TransportLink};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Connects to a service speaking the crate's JSON-lines protocol.
#[derive(Debug, Clone)]
pub struct JsonLinesTransport {
    endpoint: String,
    max_line_bytes: usize,
}

impl JsonLinesTransport {
    /// `endpoint` is a `host:port` address.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_line_bytes: defaults::MAX_LINE_BYTES,
        }
    }

    /// Longer inbound lines are skipped as protocol errors.
    pub fn with_max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = limit.max(1);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn handshake(
        &self,
        config: &SessionConfig,
    ) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
        let stream =
            TcpStream::connect(&self.endpoint)
                .await
                .map_err(|e| VoxdeskError::Connection {
                    message: format!("Failed to connect to {}: {}", self.endpoint, e),
                })?;
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("could not disable Nagle on {}: {}", self.endpoint, e);
        }

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        write_message(&mut writer, &ClientMessage::setup(config)).await?;

        let mut buf = Vec::new();
        loop {
            let line = match next_line(&mut reader, &mut buf, self.max_line_bytes)
                .await
                .map_err(|e| VoxdeskError::Connection {
                    message: format!("Failed to read setup response: {}", e),
                })? {
                Line::Eof => {
                    return Err(VoxdeskError::Connection {
                        message: "service closed the connection during setup".to_string(),
                    });
                }
                Line::Invalid(reason) => {
                    return Err(VoxdeskError::Connection {
                        message: format!("invalid setup response: {}", reason),
                    });
                }
                Line::Text(line) => line,
            };
            if line.is_empty() {
                continue;
            }

            match ServerMessage::from_json(&line) {
                Ok(ServerMessage::SetupComplete) => return Ok((reader, writer)),
                Ok(ServerMessage::Error { message }) => {
                    return Err(VoxdeskError::Connection {
                        message: format!("service rejected setup: {}", message),
                    });
                }
                Ok(other) => {
                    log::debug!("ignoring {:?} before setup_complete", other);
                }
                Err(e) => {
                    return Err(VoxdeskError::Connection {
                        message: format!("invalid setup response: {}", e),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl InferenceTransport for JsonLinesTransport {
    async fn connect(&self, config: &SessionConfig) -> Result<TransportLink> {
        let (reader, writer) =
            match tokio::time::timeout(config.connect_timeout, self.handshake(config)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(VoxdeskError::Connection {
                        message: format!(
                            "setup with {} timed out after {} ms",
                            self.endpoint,
                            config.connect_timeout.as_millis()
                        ),
                    });
                }
            };

        log::info!("session open with {}", self.endpoint);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(writer, outbound_rx));
        tokio::spawn(read_loop(reader, inbound_tx, self.max_line_bytes));

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

async fn write_message(writer: &mut OwnedWriteHalf, message: &ClientMessage) -> Result<()> {
    let json = message.to_json().map_err(|e| VoxdeskError::Protocol {
        message: format!("Failed to serialize message: {}", e),
    })?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn write_loop(mut writer: OwnedWriteHalf, mut outbound: UnboundedReceiver<Outbound>) {
    let mut sent: u64 = 0;
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Outbound::Close);
        if let Err(e) = write_message(&mut writer, &ClientMessage::from(message)).await {
            log::warn!("dropping connection after write failure: {}", e);
            break;
        }
        sent += 1;
        if closing {
            break;
        }
    }
    log::debug!("writer finished after {} message(s)", sent);
    if let Err(e) = writer.shutdown().await {
        log::debug!("socket shutdown: {}", e);
    }
}

/// One inbound line, already checked for length and encoding.
#[derive(Debug, PartialEq)]
enum Line {
    Eof,
    Text(String),
    Invalid(String),
}

/// Read up to the next newline, at most `limit` bytes of it.
///
/// An overlong line is consumed up to its newline and reported as invalid,
/// as is a line that is not UTF-8. Only I/O failures are errors.
async fn next_line<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> std::io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = (&mut *reader).take(limit as u64).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(Line::Eof);
    }
    if read >= limit && buf.last() != Some(&b'\n') {
        skip_line(reader).await?;
        return Ok(Line::Invalid(format!("line longer than {} bytes", limit)));
    }
    match std::str::from_utf8(buf) {
        Ok(text) => Ok(Line::Text(text.trim().to_string())),
        Err(e) => Ok(Line::Invalid(format!("line is not UTF-8: {}", e))),
    }
}

async fn skip_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(newline) => {
                reader.consume(newline + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    inbound: UnboundedSender<StreamEvent>,
    max_line_bytes: usize,
) {
    let mut buf = Vec::new();
    loop {
        let event = match next_line(&mut reader, &mut buf, max_line_bytes).await {
            Ok(Line::Eof) => StreamEvent::Closed,
            Ok(Line::Invalid(reason)) => {
                log::warn!("{}", VoxdeskError::Protocol {
                    message: format!("skipping inbound line: {}", reason),
                });
                continue;
            }
            Ok(Line::Text(line)) => {
                if line.is_empty() {
                    continue;
                }
                match ServerMessage::from_json(&line) {
                    Ok(message) => match message.into_event() {
                        Some(event) => event,
                        None => continue,
                    },
                    Err(e) => {
                        log::warn!("{}", VoxdeskError::Protocol {
                            message: format!("skipping unparseable line: {}", e),
                        });
                        continue;
                    }
                }
            }
            Err(e) => StreamEvent::Error {
                reason: format!("connection lost: {}", e),
            },
        };

        let terminal = event.is_terminal();
        if inbound.send(event).is_err() || terminal {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn test_setup_rejected_by_service() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = socket.into_split();
            let mut reader = BufReader::new(reader);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            writer
                .write_all(b"{\"type\":\"error\",\"message\":\"unknown model\"}\n")
                .await
                .unwrap();
        });

        let result = JsonLinesTransport::new(addr)
            .connect(&SessionConfig::default())
            .await;

        match result {
            Err(VoxdeskError::Connection { message }) => {
                assert!(message.contains("unknown model"), "got: {}", message)
            }
            other => panic!("Expected Connection error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_setup_timeout() {
        let (listener, addr) = listener().await;
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let config = SessionConfig::default().with_connect_timeout(Duration::from_millis(100));
        let result = JsonLinesTransport::new(addr).connect(&config).await;

        match result {
            Err(VoxdeskError::Connection { message }) => assert!(message.contains("timed out")),
            other => panic!("Expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let (listener, addr) = listener().await;
        drop(listener);

        let result = JsonLinesTransport::new(addr)
            .connect(&SessionConfig::default())
            .await;

        assert!(matches!(result, Err(VoxdeskError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_next_line_skips_overlong_and_non_utf8_lines() {
        let mut reader: &[u8] = b"{\"type\":\"interrupted\"}\nxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx\n\xff\xfe\nlast";
        let mut buf = Vec::new();

        assert_eq!(
            next_line(&mut reader, &mut buf, 24).await.unwrap(),
            Line::Text("{\"type\":\"interrupted\"}".to_string())
        );
        assert_eq!(
            next_line(&mut reader, &mut buf, 24).await.unwrap(),
            Line::Invalid("line longer than 24 bytes".to_string())
        );
        assert!(matches!(
            next_line(&mut reader, &mut buf, 24).await.unwrap(),
            Line::Invalid(reason) if reason.contains("UTF-8")
        ));
        assert_eq!(
            next_line(&mut reader, &mut buf, 24).await.unwrap(),
            Line::Text("last".to_string())
        );
        assert_eq!(next_line(&mut reader, &mut buf, 24).await.unwrap(), Line::Eof);
    }

    #[tokio::test]
    async fn test_invalid_setup_line_fails_connect() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = socket.into_split();
            let mut reader = BufReader::new(reader);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            writer.write_all(b"\xff\xfe\n").await.unwrap();
        });

        let result = JsonLinesTransport::new(addr)
            .connect(&SessionConfig::default())
            .await;

        match result {
            Err(VoxdeskError::Connection { message }) => assert!(message.contains("UTF-8")),
            other => panic!("Expected Connection error, got {:?}", other),
        }
    }
}

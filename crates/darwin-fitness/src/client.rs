//! Line-delimited JSON client for the game server.

use std::{
    io::{self, BufRead, BufReader, ErrorKind, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    time::Duration,
};

use crate::protocol::{AGENT_TYPE, Connected, GameAction, Observation, Request, Response};

/// Failures talking to the game server.
#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum ClientError {
    #[display("not connected to the game server")]
    NotConnected,
    #[display("failed to connect to {addr}")]
    Connect { addr: String, source: io::Error },
    #[display("connection closed by the game server (broken pipe)")]
    BrokenPipe,
    #[display("connection reset by the game server")]
    ConnectionReset,
    #[display("timed out waiting for the game server")]
    Timeout,
    #[display("I/O error talking to the game server")]
    Io { source: io::Error },
    #[display("malformed message from the game server")]
    Json { source: serde_json::Error },
    #[display("game server error: {message}")]
    Server {
        message: String,
        details: Option<String>,
    },
    #[display("game server closed the connection")]
    Disconnected,
}

impl ClientError {
    /// Whether the failure leaves the connection unusable.
    #[must_use]
    pub fn breaks_connection(&self) -> bool {
        !matches!(self, ClientError::Server { .. })
    }

    fn from_io(err: io::Error) -> Self {
        match err.kind() {
            ErrorKind::BrokenPipe => ClientError::BrokenPipe,
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                ClientError::ConnectionReset
            }
            ErrorKind::WouldBlock | ErrorKind::TimedOut => ClientError::Timeout,
            ErrorKind::UnexpectedEof | ErrorKind::NotConnected => ClientError::Disconnected,
            _ => ClientError::Io { source: err },
        }
    }
}

/// A single connection to the game server.
///
/// Every read and write is bounded by the timeout given at connect time.
#[derive(Debug)]
pub struct GameClient {
    addr: String,
    writer: Option<TcpStream>,
    reader: Option<BufReader<TcpStream>>,
    line: String,
}

impl GameClient {
    /// Opens a connection to `addr`.
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self, ClientError> {
        let connect_err = |source| ClientError::Connect {
            addr: addr.to_owned(),
            source,
        };
        let mut last_err = io::Error::new(ErrorKind::NotFound, "address resolved to nothing");
        let mut stream = None;
        for sock_addr in addr.to_socket_addrs().map_err(connect_err)? {
            match TcpStream::connect_timeout(&sock_addr, timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(err) => last_err = err,
            }
        }
        let stream = stream.ok_or_else(|| connect_err(last_err))?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|()| stream.set_write_timeout(Some(timeout)))
            .and_then(|()| stream.set_nodelay(true))
            .map_err(connect_err)?;
        let reader = BufReader::new(stream.try_clone().map_err(connect_err)?);
        log::debug!("connected to game server at {addr}");
        Ok(Self {
            addr: addr.to_owned(),
            writer: Some(stream),
            reader: Some(reader),
            line: String::new(),
        })
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Health probe: the socket is open and still has a peer address.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.writer
            .as_ref()
            .is_some_and(|stream| stream.peer_addr().is_ok())
    }

    /// Closes the connection. Further calls fail with [`ClientError::NotConnected`].
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.writer.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.reader = None;
    }

    /// Writes one message followed by a newline.
    pub fn send(&mut self, request: &Request) -> Result<(), ClientError> {
        let stream = self.writer.as_mut().ok_or(ClientError::NotConnected)?;
        let mut line = serde_json::to_vec(request).map_err(|source| ClientError::Json { source })?;
        line.push(b'\n');
        let result = stream
            .write_all(&line)
            .and_then(|()| stream.flush())
            .map_err(ClientError::from_io);
        if result.is_err() {
            self.disconnect();
        }
        result
    }

    /// Reads the next message, skipping blank lines.
    pub fn receive(&mut self) -> Result<Response, ClientError> {
        loop {
            let reader = self.reader.as_mut().ok_or(ClientError::NotConnected)?;
            self.line.clear();
            match reader.read_line(&mut self.line) {
                Ok(0) => {
                    self.disconnect();
                    return Err(ClientError::Disconnected);
                }
                Ok(_) => {}
                Err(err) => {
                    self.disconnect();
                    return Err(ClientError::from_io(err));
                }
            }
            let text = self.line.trim();
            if text.is_empty() {
                continue;
            }
            return serde_json::from_str(text).map_err(|source| ClientError::Json { source });
        }
    }

    /// Starts a game against `opponent_type` and waits for the server to confirm.
    pub fn connect_to_game(&mut self, opponent_type: &str) -> Result<Connected, ClientError> {
        self.send(&Request::Connect {
            agent_type: AGENT_TYPE.to_owned(),
            opponent_type: opponent_type.to_owned(),
        })?;
        loop {
            match self.receive()? {
                Response::Connected(connected) => return Ok(connected),
                Response::Error(err) => {
                    return Err(ClientError::Server {
                        message: err.message,
                        details: err.details,
                    });
                }
                other => log::debug!("skipping {other:?} while connecting"),
            }
        }
    }

    pub fn send_action(&mut self, action: GameAction) -> Result<(), ClientError> {
        self.send(&Request::Action { action })
    }

    /// Waits for the next observation.
    ///
    /// A `game_over` message is returned as a terminated observation.
    pub fn receive_observation(&mut self) -> Result<Observation, ClientError> {
        loop {
            match self.receive()? {
                Response::Observation(observation) => return Ok(observation),
                Response::GameOver(over) => {
                    log::debug!("game over: {}", over.reason);
                    return Ok(Observation {
                        terminated: true,
                        ..Observation::default()
                    });
                }
                Response::Error(err) => {
                    return Err(ClientError::Server {
                        message: err.message,
                        details: err.details,
                    });
                }
                Response::Connected(_) | Response::Unknown => {}
            }
        }
    }

    pub fn reset(&mut self) -> Result<(), ClientError> {
        self.send(&Request::Reset)
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        io::{BufRead, BufReader, Write},
        net::{TcpListener, TcpStream},
        thread,
    };

    use super::*;

    /// Serves each accepted connection with `handler` on its own thread.
    pub(crate) fn serve<F>(handler: F) -> String
    where
        F: Fn(BufReader<TcpStream>, TcpStream) + Send + Sync + Clone + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let handler = handler.clone();
                thread::spawn(move || {
                    let reader = BufReader::new(stream.try_clone().unwrap());
                    handler(reader, stream);
                });
            }
        });
        addr
    }

    fn timeout() -> Duration {
        Duration::from_secs(2)
    }

    #[test]
    fn test_game_handshake_and_observation() {
        let addr = serve(|mut reader, mut writer| {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert!(line.contains(r#""type":"connect""#));
            writeln!(writer, r#"{{"type":"welcome"}}"#).unwrap();
            writeln!(
                writer,
                r#"{{"type":"connected","agent_id":1,"opponent_id":2,"message":"ok"}}"#
            )
            .unwrap();
            writeln!(writer, r#"{{"type":"observation","reward":0.5}}"#).unwrap();
            line.clear();
            reader.read_line(&mut line).unwrap();
            assert!(line.contains(r#""action":[1,0,0,0,0]"#));
            writeln!(writer).unwrap();
            writeln!(writer, r#"{{"type":"game_over","reason":"done"}}"#).unwrap();
        });

        let mut client = GameClient::connect(&addr, timeout()).unwrap();
        assert!(client.is_healthy());
        let connected = client.connect_to_game("random").unwrap();
        assert_eq!(connected.message, "ok");
        let first = client.receive_observation().unwrap();
        assert!((first.reward - 0.5).abs() < f64::EPSILON);
        client.send_action(GameAction::PASS).unwrap();
        let last = client.receive_observation().unwrap();
        assert!(last.is_done());
    }

    #[test]
    fn test_server_error_is_surfaced() {
        let addr = serve(|mut reader, mut writer| {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            writeln!(
                writer,
                r#"{{"type":"error","message":"no opponents","details":"queue empty"}}"#
            )
            .unwrap();
        });
        let mut client = GameClient::connect(&addr, timeout()).unwrap();
        let err = client.connect_to_game("random").unwrap_err();
        assert!(matches!(err, ClientError::Server { ref message, .. } if message == "no opponents"));
        assert!(!err.breaks_connection());
    }

    #[test]
    fn test_closed_connection_is_reported() {
        let addr = serve(|_reader, _writer| {});
        let mut client = GameClient::connect(&addr, timeout()).unwrap();
        let err = client.receive().unwrap_err();
        assert!(matches!(
            err,
            ClientError::Disconnected | ClientError::ConnectionReset
        ));
        assert!(!client.is_healthy());
        assert!(matches!(
            client.send(&Request::Reset),
            Err(ClientError::NotConnected)
        ));
    }

    #[test]
    fn test_malformed_json_is_reported() {
        let addr = serve(|_reader, mut writer| {
            writeln!(writer, "not json").unwrap();
        });
        let mut client = GameClient::connect(&addr, timeout()).unwrap();
        assert!(matches!(client.receive(), Err(ClientError::Json { .. })));
    }

    #[test]
    fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let err = GameClient::connect(&addr, timeout()).unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }));
    }
}

//! Readiness gate for the shared coordination store (redis).
//!
//! The probe opens its own connection, authenticates if configured, sends
//! `PING`, expects `PONG` and closes the connection again. Nothing else
//! reuses the connection.

use crate::config::RedisConfig;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum ReadinessError {
    #[error("cannot connect to redis at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("redis at {addr} did not answer within {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("redis authentication failed: {0}")]
    Auth(String),

    #[error("unexpected redis reply: {0}")]
    UnexpectedReply(String),

    #[error("redis probe I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Liveness check a worker runs before touching any platform.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Resolves exactly once, with the terminal outcome of the probe.
    async fn check_ready(&self) -> Result<(), ReadinessError>;
}

pub struct RedisProbe {
    host: String,
    port: u16,
    password: Option<String>,
    timeout: Duration,
}

impl RedisProbe {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &RedisConfig) -> Self {
        let mut probe = Self::new(config.host.clone(), config.port).timeout(config.probe_timeout());
        probe.password = config.password.clone();
        probe
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn probe(&self) -> Result<(), ReadinessError> {
        let addr = self.addr();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| ReadinessError::Connect {
                addr: addr.clone(),
                source,
            })?;
        let mut stream = BufReader::new(stream);

        if let Some(password) = &self.password {
            send_command(&mut stream, &["AUTH", password.as_str()]).await?;
            let reply = read_reply(&mut stream).await?;
            if let Some(err) = reply.strip_prefix('-') {
                return Err(ReadinessError::Auth(err.to_string()));
            }
        }

        send_command(&mut stream, &["PING"]).await?;
        let reply = read_reply(&mut stream).await?;
        match reply.as_str() {
            "+PONG" => {}
            r if r.starts_with("-NOAUTH") || r.starts_with("-WRONGPASS") => {
                return Err(ReadinessError::Auth(r[1..].to_string()));
            }
            r => return Err(ReadinessError::UnexpectedReply(r.to_string())),
        }

        // Close politely; the reply is irrelevant.
        send_command(&mut stream, &["QUIT"]).await?;
        stream.get_mut().shutdown().await.ok();
        Ok(())
    }
}

#[async_trait]
impl ReadinessProbe for RedisProbe {
    async fn check_ready(&self) -> Result<(), ReadinessError> {
        debug!(addr = %self.addr(), "Probing redis");
        match tokio::time::timeout(self.timeout, self.probe()).await {
            Ok(result) => result,
            Err(_) => Err(ReadinessError::Timeout {
                addr: self.addr(),
                timeout: self.timeout,
            }),
        }
    }
}

/// Encode a command as a RESP array of bulk strings.
fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

async fn send_command(stream: &mut BufReader<TcpStream>, args: &[&str]) -> std::io::Result<()> {
    trace!(command = args[0], "Sending redis command");
    stream.get_mut().write_all(&encode_command(args)).await?;
    stream.get_mut().flush().await
}

async fn read_reply(stream: &mut BufReader<TcpStream>) -> Result<String, ReadinessError> {
    let mut line = String::new();
    let n = stream.read_line(&mut line).await?;
    if n == 0 {
        return Err(ReadinessError::UnexpectedReply(
            "connection closed before reply".to_string(),
        ));
    }
    Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
}

//! beanstalkd client.
//!
//! Speaks the two read-only commands the collector needs (`list-tubes`
//! and `stats-tube`) over a single buffered TCP connection. The connection
//! is established eagerly in [`BeanstalkClient::connect`] so an unreachable
//! server fails startup; after that, any transport or protocol error drops
//! the connection and the next call dials again.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::stats::decode_tube_list;

/// Boxed future alias used by the backend traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Longest tube name beanstalkd accepts.
const MAX_TUBE_NAME: usize = 200;

/// Largest reply body accepted. Stats documents and tube lists are a few KiB.
const MAX_BODY: usize = 1024 * 1024;

/// The queue operations the collector depends on.
pub trait QueueBackend: Send + Sync {
    /// List the names of all tubes currently known to the server.
    fn list_tubes(&self) -> BoxFuture<'_, QueueResult<Vec<String>>>;

    /// Fetch the raw stats document for one tube.
    fn stats_tube<'a>(&'a self, tube: &'a str) -> BoxFuture<'a, QueueResult<Vec<u8>>>;
}

impl<T: QueueBackend + ?Sized> QueueBackend for Arc<T> {
    fn list_tubes(&self) -> BoxFuture<'_, QueueResult<Vec<String>>> {
        (**self).list_tubes()
    }

    fn stats_tube<'a>(&'a self, tube: &'a str) -> BoxFuture<'a, QueueResult<Vec<u8>>> {
        (**self).stats_tube(tube)
    }
}

/// Check a tube name against the beanstalkd name grammar.
pub fn validate_tube_name(name: &str) -> QueueResult<()> {
    let valid_char = |c: char| {
        c.is_ascii_alphanumeric()
            || matches!(c, '-' | '+' | '/' | ';' | '.' | '$' | '_' | '(' | ')')
    };

    if name.is_empty()
        || name.len() > MAX_TUBE_NAME
        || name.starts_with('-')
        || !name.chars().all(valid_char)
    {
        return Err(QueueError::InvalidTubeName(name.to_string()));
    }
    Ok(())
}

/// First line of a server reply.
#[derive(Debug, PartialEq, Eq)]
enum ReplyHead {
    /// `OK <bytes>`: a body of the given length follows.
    Ok(usize),
    /// `NOT_FOUND`.
    NotFound,
}

fn parse_reply_head(line: &str) -> QueueResult<ReplyHead> {
    let mut parts = line.split_ascii_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("OK"), Some(len), None) => len
            .parse::<usize>()
            .map(ReplyHead::Ok)
            .map_err(|_| QueueError::Protocol(format!("bad body length in `{line}`"))),
        (Some("NOT_FOUND"), None, None) => Ok(ReplyHead::NotFound),
        _ => Err(QueueError::Protocol(format!("unexpected reply `{line}`"))),
    }
}

/// Reply to a command, body already read.
#[derive(Debug)]
enum Reply {
    Ok(Vec<u8>),
    NotFound,
}

type Connection = BufStream<TcpStream>;

async fn dial(addr: &str, timeout: Duration) -> QueueResult<Connection> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| QueueError::Timeout(timeout))?
        .map_err(|source| QueueError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    stream.set_nodelay(true)?;
    Ok(BufStream::new(stream))
}

async fn exchange(conn: &mut Connection, command: &str) -> QueueResult<Reply> {
    conn.write_all(command.as_bytes()).await?;
    conn.write_all(b"\r\n").await?;
    conn.flush().await?;

    let mut line = String::new();
    if conn.read_line(&mut line).await? == 0 {
        return Err(QueueError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed by server",
        )));
    }

    match parse_reply_head(line.trim_end_matches(['\r', '\n']))? {
        ReplyHead::NotFound => Ok(Reply::NotFound),
        ReplyHead::Ok(len) => {
            if len > MAX_BODY {
                return Err(QueueError::Protocol(format!(
                    "reply body of {len} bytes exceeds {MAX_BODY}"
                )));
            }
            let mut body = vec![0u8; len + 2];
            conn.read_exact(&mut body).await?;
            if !body.ends_with(b"\r\n") {
                return Err(QueueError::Protocol("body not terminated by CRLF".to_string()));
            }
            body.truncate(len);
            Ok(Reply::Ok(body))
        }
    }
}

/// beanstalkd connection shared by all collector calls.
pub struct BeanstalkClient {
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for BeanstalkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeanstalkClient")
            .field("addr", &self.addr)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BeanstalkClient {
    /// Connect to beanstalkd at `addr` (host:port).
    ///
    /// `timeout` bounds the initial dial and every later request.
    pub async fn connect(addr: impl Into<String>, timeout: Duration) -> QueueResult<Self> {
        let addr = addr.into();
        let conn = dial(&addr, timeout).await?;
        info!(%addr, "connected to beanstalkd");
        Ok(Self {
            addr,
            timeout,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Address this client dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn request(&self, command: &str) -> QueueResult<Reply> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            debug!(addr = %self.addr, "reconnecting to beanstalkd");
            *guard = Some(dial(&self.addr, self.timeout).await?);
        }
        let conn = guard
            .as_mut()
            .ok_or_else(|| QueueError::Protocol("connection unavailable".to_string()))?;

        let result = match tokio::time::timeout(self.timeout, exchange(conn, command)).await {
            Ok(result) => result,
            Err(_) => Err(QueueError::Timeout(self.timeout)),
        };

        if let Err(e) = &result {
            // The stream may be mid-reply; it can't be reused.
            warn!(addr = %self.addr, error = %e, "dropping beanstalkd connection");
            *guard = None;
        }
        result
    }
}

impl QueueBackend for BeanstalkClient {
    fn list_tubes(&self) -> BoxFuture<'_, QueueResult<Vec<String>>> {
        Box::pin(async move {
            match self.request("list-tubes").await? {
                Reply::Ok(body) => decode_tube_list(&body),
                Reply::NotFound => Err(QueueError::Protocol(
                    "NOT_FOUND in reply to list-tubes".to_string(),
                )),
            }
        })
    }

    fn stats_tube<'a>(&'a self, tube: &'a str) -> BoxFuture<'a, QueueResult<Vec<u8>>> {
        Box::pin(async move {
            validate_tube_name(tube)?;
            match self.request(&format!("stats-tube {tube}")).await? {
                Reply::Ok(body) => Ok(body),
                Reply::NotFound => Err(QueueError::TubeNotFound(tube.to_string())),
            }
        })
    }
}

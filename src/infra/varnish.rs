//! Varnish CLI admin-socket client.
//!
//! Every reply is a `<status> <length>\n` header line followed by `length`
//! bytes of body and a trailing newline. A fresh connection greets with a
//! reply of its own; status 107 carries an authentication challenge.

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::application::dispatch::{
    AdminError, AdminSession, AdminTransport, BanListEntry, BanReply,
};
use crate::domain::hosts::AdminEndpoint;

const STATUS_OK: i32 = 200;
const STATUS_AUTH: i32 = 107;
const MAX_HEADER_BYTES: usize = 64;
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct VarnishCliTransport {
    timeout: Duration,
}

impl VarnishCliTransport {
    /// `timeout` bounds the connect and every reply read.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl AdminTransport for VarnishCliTransport {
    async fn connect(
        &self,
        endpoint: &AdminEndpoint,
    ) -> Result<Box<dyn AdminSession>, AdminError> {
        let address = format!("{}:{}", endpoint.ip, endpoint.port);

        let stream = timeout(self.timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| AdminError::Timeout {
                address: address.clone(),
            })?
            .map_err(|err| AdminError::Connect {
                address: address.clone(),
                message: err.to_string(),
            })?;

        let mut session = VarnishCliSession {
            stream: BufReader::new(stream),
            address,
            timeout: self.timeout,
        };
        session.handshake(&endpoint.secret).await?;
        debug!(address = %session.address, "admin session established");

        Ok(Box::new(session))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    status: i32,
    body: String,
}

struct VarnishCliSession {
    stream: BufReader<TcpStream>,
    address: String,
    timeout: Duration,
}

impl VarnishCliSession {
    async fn handshake(&mut self, secret: &str) -> Result<(), AdminError> {
        let banner = self.expect_reply().await?;
        match banner.status {
            STATUS_OK => Ok(()),
            STATUS_AUTH => {
                let challenge = banner.body.lines().next().unwrap_or_default();
                let response = challenge_response(challenge, secret);
                self.send(&format!("auth {response}")).await?;

                let reply = self.expect_reply().await?;
                if reply.status == STATUS_OK {
                    Ok(())
                } else {
                    Err(AdminError::Auth(format!(
                        "{} rejected the secret ({})",
                        self.address, reply.status
                    )))
                }
            }
            status => Err(AdminError::Protocol(format!(
                "unexpected greeting status {status} from {}",
                self.address
            ))),
        }
    }

    async fn send(&mut self, command: &str) -> Result<(), AdminError> {
        if command.contains(['\r', '\n']) {
            return Err(AdminError::Protocol(format!(
                "refusing multi-line command for {}",
                self.address
            )));
        }
        let stream = self.stream.get_mut();
        stream.write_all(command.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;
        Ok(())
    }

    async fn expect_reply(&mut self) -> Result<Reply, AdminError> {
        self.read_reply().await?.ok_or_else(|| {
            AdminError::Protocol(format!("{} closed the connection", self.address))
        })
    }

    /// `Ok(None)` when the peer closed the connection before a header arrived.
    async fn read_reply(&mut self) -> Result<Option<Reply>, AdminError> {
        let address = self.address.clone();
        timeout(self.timeout, read_reply(&mut self.stream))
            .await
            .map_err(|_| AdminError::Timeout { address })?
    }
}

#[async_trait]
impl AdminSession for VarnishCliSession {
    async fn add_ban(&mut self, expression: &str) -> Result<Option<BanReply>, AdminError> {
        self.send(&format!("ban {expression}")).await?;

        Ok(self.read_reply().await?.map(|reply| {
            if reply.status == STATUS_OK {
                BanReply::Added
            } else {
                BanReply::Rejected {
                    code: reply.status,
                    messages: reply
                        .body
                        .lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .map(str::to_string)
                        .collect(),
                }
            }
        }))
    }

    async fn ban_list(&mut self) -> Result<Vec<BanListEntry>, AdminError> {
        self.send("ban.list").await?;

        let reply = self.expect_reply().await?;
        if reply.status != STATUS_OK {
            return Err(AdminError::Protocol(format!(
                "ban.list failed with status {}: {}",
                reply.status,
                reply.body.trim()
            )));
        }
        Ok(parse_ban_list(&reply.body))
    }
}

async fn read_reply<R>(reader: &mut R) -> Result<Option<Reply>, AdminError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut header = Vec::new();
    let read = (&mut *reader)
        .take(MAX_HEADER_BYTES as u64)
        .read_until(b'\n', &mut header)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if !header.ends_with(b"\n") {
        return Err(AdminError::Protocol("reply header too long".to_string()));
    }

    let header = String::from_utf8_lossy(&header);
    let (status, length) = parse_header(header.trim_end())?;
    if length > MAX_BODY_BYTES {
        return Err(AdminError::Protocol(format!(
            "reply body of {length} bytes exceeds limit"
        )));
    }

    let mut body = vec![0u8; length + 1];
    reader.read_exact(&mut body).await?;
    body.pop();

    Ok(Some(Reply {
        status,
        body: String::from_utf8_lossy(&body).into_owned(),
    }))
}

fn parse_header(header: &str) -> Result<(i32, usize), AdminError> {
    let mut parts = header.split_whitespace();
    let status = parts.next().and_then(|value| value.parse::<i32>().ok());
    let length = parts.next().and_then(|value| value.parse::<usize>().ok());

    match (status, length) {
        (Some(status), Some(length)) => Ok((status, length)),
        _ => Err(AdminError::Protocol(format!(
            "malformed reply header `{header}`"
        ))),
    }
}

/// Hex SHA-256 of `challenge \n secret challenge \n`.
pub fn challenge_response(challenge: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge.as_bytes());
    hasher.update(b"\n");
    hasher.update(secret.as_bytes());
    hasher.update(challenge.as_bytes());
    hasher.update(b"\n");
    hex::encode(hasher.finalize())
}

/// Parse `ban.list` output. Lines that do not start with a timestamp and a
/// reference count (such as the `Present bans:` heading) are skipped.
pub fn parse_ban_list(body: &str) -> Vec<BanListEntry> {
    body.lines().filter_map(parse_ban_line).collect()
}

fn parse_ban_line(line: &str) -> Option<BanListEntry> {
    let (time, rest) = next_token(line.trim())?;
    time.parse::<f64>().ok()?;
    let (refs, rest) = next_token(rest)?;
    let refs = refs.parse::<u64>().ok()?;

    let (completed, spec) = match next_token(rest) {
        Some(("C", spec)) => (true, spec),
        Some(("-", spec)) => (false, spec),
        _ => (false, rest),
    };

    Some(BanListEntry {
        time: time.to_string(),
        refs,
        completed,
        spec: spec.to_string(),
    })
}

fn next_token(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    match input.split_once(char::is_whitespace) {
        Some((token, rest)) => Some((token, rest.trim_start())),
        None => Some((input, "")),
    }
}

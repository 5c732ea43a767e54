//! One keep-alive HTTP connection to a shuffle host.
//!
//! Wraps the streamed response body behind read calls that honor the single
//! tunable read timeout and the fetcher's shutdown abort. Opening the
//! connection also performs the whole protocol handshake: signed request,
//! status check, service name/version check, reply-hash verification.

use crate::protocol::auth::{self, JobTokenManager};
use crate::protocol::header::ShuffleHeader;
use anyhow::{anyhow, bail, Result};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use std::io;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

/// How much unread body a graceful close will consume so the pooled
/// connection stays reusable.
const DRAIN_CAP_BYTES: usize = 32 * 1024;
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Failure while establishing or validating a session connection.
///
/// `connected` tells the caller whether the HTTP exchange itself went
/// through; a `true` here means the reply could not be trusted.
#[derive(Debug)]
pub struct ConnectError {
    pub connected: bool,
    pub source: anyhow::Error,
}

pub struct ShuffleConnection {
    reader: StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>,
    read_timeout: Duration,
    abort: CancellationToken,
}

impl ShuffleConnection {
    /// Sends the signed fetch request and validates the reply before any
    /// payload byte is consumed.
    pub async fn open(
        client: &reqwest::Client,
        url: &str,
        tokens: &JobTokenManager,
        read_timeout: Duration,
        abort: CancellationToken,
    ) -> Result<Self, ConnectError> {
        let url_hash = tokens.sign_url(url);
        let request = client
            .get(url)
            .header(auth::HTTP_HEADER_NAME, auth::SHUFFLE_SERVICE_NAME)
            .header(auth::HTTP_HEADER_VERSION, auth::SHUFFLE_VERSION)
            .header(auth::HTTP_HEADER_URL_HASH, url_hash.clone());

        let response = tokio::select! {
            _ = abort.cancelled() => {
                return Err(ConnectError {
                    connected: false,
                    source: anyhow!("fetcher shut down while connecting"),
                });
            }
            outcome = tokio::time::timeout(read_timeout, request.send()) => match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    return Err(ConnectError {
                        connected: false,
                        source: err.into(),
                    });
                }
                Err(_) => {
                    return Err(ConnectError {
                        connected: false,
                        source: anyhow!("connect timed out after {read_timeout:?}"),
                    });
                }
            },
        };

        if let Err(source) = validate_reply(&response, tokens, &url_hash) {
            return Err(ConnectError {
                connected: true,
                source,
            });
        }

        let stream = response.bytes_stream().map_err(io::Error::other).boxed();
        Ok(Self {
            reader: StreamReader::new(stream),
            read_timeout,
            abort,
        })
    }

    /// Reads one output header. Timeouts surface as
    /// [`io::ErrorKind::TimedOut`], shutdown as
    /// [`io::ErrorKind::ConnectionAborted`].
    pub async fn read_header(&mut self) -> io::Result<ShuffleHeader> {
        tokio::select! {
            _ = self.abort.cancelled() => Err(abort_error()),
            outcome = tokio::time::timeout(
                self.read_timeout,
                ShuffleHeader::read_from(&mut self.reader),
            ) => match outcome {
                Ok(result) => result,
                Err(_) => Err(timeout_error(self.read_timeout)),
            },
        }
    }

    /// Reads exactly `buf.len()` payload bytes, with the same timeout and
    /// abort behavior as [`read_header`](Self::read_header).
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        tokio::select! {
            _ = self.abort.cancelled() => Err(abort_error()),
            outcome = tokio::time::timeout(
                self.read_timeout,
                self.reader.read_exact(buf),
            ) => match outcome {
                Ok(result) => result.map(|_| ()),
                Err(_) => Err(timeout_error(self.read_timeout)),
            },
        }
    }

    /// Closes the connection. A graceful close (`disconnect == false`)
    /// drains a bounded remainder of the body so the underlying socket can
    /// be reused; `disconnect` drops it as is.
    pub async fn close(mut self, disconnect: bool) {
        if disconnect {
            return;
        }
        let mut scratch = [0u8; 4096];
        let mut drained = 0;
        while drained < DRAIN_CAP_BYTES {
            let read = tokio::select! {
                _ = self.abort.cancelled() => break,
                outcome = tokio::time::timeout(DRAIN_TIMEOUT, self.reader.read(&mut scratch)) => {
                    match outcome {
                        Ok(Ok(n)) => n,
                        _ => break,
                    }
                }
            };
            if read == 0 {
                break;
            }
            drained += read;
        }
    }
}

fn validate_reply(
    response: &reqwest::Response,
    tokens: &JobTokenManager,
    url_hash: &str,
) -> Result<()> {
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        bail!("shuffle service replied {status}");
    }

    let name = reply_header(response, auth::HTTP_HEADER_NAME)?;
    let version = reply_header(response, auth::HTTP_HEADER_VERSION)?;
    if name != auth::SHUFFLE_SERVICE_NAME || version != auth::SHUFFLE_VERSION {
        bail!("incompatible shuffle reply: name={name:?} version={version:?}");
    }

    let reply_hash = reply_header(response, auth::HTTP_HEADER_REPLY_URL_HASH)?;
    if !tokens.verify_reply(url_hash, reply_hash) {
        bail!("reply hash verification failed");
    }
    Ok(())
}

fn reply_header<'a>(response: &'a reqwest::Response, header: &str) -> Result<&'a str> {
    response
        .headers()
        .get(header)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| anyhow!("reply is missing the {header} header"))
}

fn abort_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "fetcher shut down")
}

fn timeout_error(read_timeout: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("read timed out after {read_timeout:?}"),
    )
}

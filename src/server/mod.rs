//! HTTP server front end driven by the socket pool.
//!
//! Accepts connections on a non-blocking listening socket and decodes
//! HTTP/1.1 requests on each one, dispatching them to a handler function.
//! Connections are persistent unless a request asks for `Connection: close`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::http::{DecodeError, Request, RequestDecoder, Response, StatusCode};
use crate::reactor::{ReactorError, SocketPool};
use crate::socket::{Domain, Socket, SocketError, SocketOption, SocketType};
use crate::stream::{AsyncSocket, StreamError};

/// Pause after a failed accept (e.g. out of descriptors) before retrying.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: SocketError,
    },

    #[error("reactor error: {0}")]
    Reactor(#[from] ReactorError),

    #[error("connection error: {0}")]
    Stream(#[from] StreamError),
}

/// The pollhttp HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use pollhttp::config::ServerConfig;
/// use pollhttp::http::{Request, Response, StatusCode};
/// use pollhttp::server::HttpServer;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = HttpServer::bind(&ServerConfig::from_env()?)?;
///     server.run(|_req: Request| async {
///         Response::new(StatusCode::Ok).body("Hello!")
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct HttpServer {
    listener: AsyncSocket,
    local_addr: SocketAddr,
    decoder: RequestDecoder,
}

impl HttpServer {
    /// Creates, binds and starts listening on the configured address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let addr = config.address;
        let socket = Socket::new(Domain::of(&addr), SocketType::Stream)?;
        socket.set_value(SocketOption::LOCAL_ADDRESS_REUSE, true)?;
        socket
            .bind(addr)
            .map_err(|source| ServerError::Bind { addr, source })?;
        socket.listen()?;
        let local_addr = socket.local_addr()?;

        let pool = SocketPool::with_interval(config.poll_interval);
        Ok(Self {
            listener: AsyncSocket::new(socket, pool),
            local_addr,
            decoder: RequestDecoder::with_limits(config.limits.clone()),
        })
    }

    /// The address actually bound, with the OS-assigned port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The reactor shared by the listener and every connection.
    pub fn pool(&self) -> &SocketPool {
        self.listener.pool()
    }

    /// Runs the reactor and the accept loop until either fails.
    ///
    /// Each accepted connection is served on its own Tokio task.
    /// Dropping the returned future stops the reactor, which cancels every
    /// connection still waiting on it.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let pool = self.pool().clone();
        info!(address = %self.local_addr, "pollhttp listening");

        tokio::select! {
            result = pool.run() => {
                result?;
                Ok(())
            }
            result = self.accept_loop(handler) => result,
        }
    }

    async fn accept_loop<H, F>(&self, handler: Arc<H>) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        loop {
            let connection = match self.listener.accept().await {
                Ok(connection) => connection,
                Err(StreamError::Socket(e)) => {
                    error!(error = %e, "failed to accept connection");
                    // Yield to the reactor sharing this task.
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let fd = connection.socket().raw_fd();
            debug!(fd, "connection accepted");
            let handler = Arc::clone(&handler);
            let decoder = self.decoder.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(connection, decoder, handler).await {
                    warn!(fd, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Serves requests on one connection until the peer closes it, a request
/// asks to close, or a request fails to decode.
async fn handle_connection<H, F>(
    mut connection: AsyncSocket,
    decoder: RequestDecoder,
    handler: Arc<H>,
) -> Result<(), ServerError>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let fd = connection.socket().raw_fd();
    {
        let mut bytes = connection.bytes();
        loop {
            let request = match decoder.decode_next(&mut bytes).await {
                Ok(Some(request)) => request,
                Ok(None) => {
                    debug!(fd, "connection closed by peer");
                    break;
                }
                Err(DecodeError::Stream(e)) => return Err(e.into()),
                Err(e) => {
                    let status = match e {
                        DecodeError::BodyTooLarge { .. } => StatusCode::PayloadTooLarge,
                        _ => StatusCode::BadRequest,
                    };
                    warn!(fd, error = %e, status = status.as_u16(), "rejecting request");
                    let response = Response::new(status).body(format!("{status}: {e}"));
                    connection.write_all(&response.encode(false)).await?;
                    break;
                }
            };

            let keep_alive = request.is_keep_alive();
            debug!(
                fd,
                method = %request.method(),
                path = %request.path(),
                "dispatching request"
            );

            let response = handler(request).await;
            connection.write_all(&response.encode(keep_alive)).await?;

            if !keep_alive {
                debug!(fd, "closing connection on request");
                break;
            }
        }
    }
    connection.close()?;
    Ok(())
}

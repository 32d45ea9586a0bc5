//! # pollhttp
//!
//! A readiness-polling socket reactor with an incremental HTTP/1.1 request
//! decoder on top.
//!
//! Non-blocking sockets ([`socket`]) park the calling task on a
//! [`SocketPool`] whenever an operation would block. The pool's poll loop
//! resumes the task once the descriptor is ready. [`stream`] turns a
//! connection into a lazy byte sequence, and [`http::RequestDecoder`] reads
//! requests from any such sequence.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pollhttp::config::ServerConfig;
//! use pollhttp::http::{Request, Response, StatusCode};
//! use pollhttp::server::HttpServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = HttpServer::bind(&ServerConfig::default())?;
//!     println!("Listening on http://{}", server.local_addr());
//!     server.run(|req: Request| async move {
//!         let name = req.query_param("name").unwrap_or("World").to_owned();
//!         Response::new(StatusCode::Ok).body(format!("Hello, {name}!"))
//!     }).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod http;
pub mod reactor;
pub mod server;
pub mod socket;
pub mod stream;

pub use config::{ConfigError, ServerConfig};
pub use http::{
    DecodeError, DecoderLimits, HeaderName, Headers, Method, QueryItem, Request, RequestDecoder,
    Response, StatusCode,
};
pub use reactor::{Direction, Interval, ReactorError, SocketPool};
pub use server::{HttpServer, ServerError};
pub use socket::{Domain, Flags, Socket, SocketError, SocketOption, SocketType};
pub use stream::{AsyncSocket, ByteSource, ConsumingBytes, SocketBytes, StreamError};

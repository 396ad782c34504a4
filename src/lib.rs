//! 9P2000(.u) protocol engine: wire codec, server dispatcher with a
//! pluggable back-end trait, and client runtime.
//!
//! Concrete filesystem back ends, the interactive shell, and auth
//! cryptography (PKI/RSA, `p9sk1`) are external collaborators; see
//! `demos/` for minimal illustrations built on top of this crate.

#[macro_use]
extern crate enum_primitive;

pub mod auth;
pub mod client;
pub mod config;
pub mod conn;
pub mod error;
pub mod fcall;
pub mod serialize;
pub mod srv;

pub use auth::AuthFs;
pub use client::{Client, Credentials};
pub use config::Config;
pub use conn::Connection;
pub use error::{Error, Result};
pub use fcall::*;
pub use serialize::{read_msg, write_msg};
pub use srv::{dispatch_once, srv, Filesystem, Req, Server};

//! Configuration surface (§6): the collaborator CLI shape preserved for
//! compatibility with py9p's `localsrv.py` option set (`-dcD -p -r -l -a`
//! plus the trailing `srvuser domain` pair for `sk1`).
//!
//! `Config` only carries the shape; wiring it to a concrete binary (picking
//! a back end, loading a key file) is a collaborator concern per §1.

use clap::{Parser, ValueEnum};

use crate::fcall::IOHDRSZ;

/// Default 9P listen port, per §6.
pub const DEFAULT_PORT: u16 = 564;
/// Default negotiated `msize`, matching the teacher's `Filesystem::rversion` default.
pub const DEFAULT_MSIZE: u32 = 8192;

/// Authentication mode, mirroring py9p's `-a {none,pki,sk1}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum AuthMode {
    /// No `Tauth` channel is offered; `Tattach` always succeeds.
    #[default]
    None,
    /// PKI/RSA auth channel. Concrete crypto is a collaborator (§1).
    Pki,
    /// Plan 9 shared-key `p9sk1` auth channel. Concrete crypto is a
    /// collaborator (§1).
    Sk1,
}

/// Server/client configuration, built with `clap`'s derive API.
#[derive(Parser, Clone, Debug)]
#[command(name = "9p", about = "9P2000(.u) file-service protocol runtime")]
pub struct Config {
    /// Address to listen on (server) or connect to (client).
    #[arg(short = 'l', long, default_value = "0.0.0.0")]
    pub listen: String,

    /// TCP port, or the Unix-domain socket's file mode when `listen` begins
    /// with `/`.
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Root path the back end exports.
    #[arg(short = 'r', long, default_value = "/")]
    pub root: String,

    /// Authentication mode.
    #[arg(short = 'a', long, value_enum, default_value_t = AuthMode::None)]
    pub authmode: AuthMode,

    /// User name for `sk1`/`pki` authentication.
    #[arg(long)]
    pub user: Option<String>,

    /// Authentication domain, required by `sk1`.
    #[arg(long)]
    pub domain: Option<String>,

    /// Path to a key file for `sk1`/`pki` authentication.
    #[arg(long)]
    pub keyfile: Option<String>,

    /// Negotiate the `9P2000.u` Unix extension.
    #[arg(short = 'd', long)]
    pub dotu: bool,

    /// Enable chatty per-message trace logging (py9p's `-D`).
    #[arg(short = 'D', long)]
    pub debug: bool,

    /// Maximum message size to negotiate.
    #[arg(long, default_value_t = DEFAULT_MSIZE)]
    pub msize: u32,
}

impl Config {
    /// `proto!address!port` string accepted by [`crate::srv::Server::bind`],
    /// derived from `listen`/`port`.
    pub fn listen_spec(&self) -> String {
        let proto = if self.listen.starts_with('/') { "unix" } else { "tcp" };
        format!("{}!{}!{}", proto, self.listen, self.port)
    }

    /// The largest atomic read/write this configuration allows.
    pub fn iounit(&self) -> u32 {
        self.msize.saturating_sub(IOHDRSZ)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: "0.0.0.0".to_owned(),
            port: DEFAULT_PORT,
            root: "/".to_owned(),
            authmode: AuthMode::None,
            user: None,
            domain: None,
            keyfile: None,
            dotu: false,
            debug: false,
            msize: DEFAULT_MSIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_spec_tcp() {
        let cfg = Config { listen: "127.0.0.1".to_owned(), port: 564, ..Config::default() };
        assert_eq!(cfg.listen_spec(), "tcp!127.0.0.1!564");
    }

    #[test]
    fn listen_spec_unix_socket_path() {
        let cfg = Config { listen: "/tmp/9p.sock".to_owned(), port: 0o666, ..Config::default() };
        assert_eq!(cfg.listen_spec(), "unix!/tmp/9p.sock!438");
    }

    #[test]
    fn iounit_clamped_to_msize_minus_iohdrsz() {
        let cfg = Config { msize: 8192, ..Config::default() };
        assert_eq!(cfg.iounit(), 8192 - IOHDRSZ);
    }
}

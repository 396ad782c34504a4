//! The auth channel: a pseudo-file bound to a `Tauth` fid that a back end
//! drives to completion before `Tattach` is allowed to bind its `uname`.
//!
//! No concrete cryptography ships here — PKI/RSA and `p9sk1` stay external
//! collaborators, same as py9p keeps `pki.py`/`sk1.py` as separate, swappable
//! modules behind its own auth hooks.

use crate::error::Result;

/// Per-connection auth state machine, one instance per `Tauth` fid.
///
/// `estab` seeds state for the `uname`/`aname` pair named in `Tauth`;
/// `read`/`write` service `Tread`/`Twrite` issued against the afid while the
/// exchange is in progress, carrying whatever framing the concrete auth
/// protocol uses. Once `done` reports true, `Tattach` may bind `uname` for
/// this connection.
pub trait AuthFs: Send {
    /// Seed per-fid auth state for `uname`/`aname`.
    fn estab(&mut self, uname: &str, aname: &str) -> Result<()>;

    /// Service a `Tread` against the auth fid, returning up to `count` bytes
    /// starting at `offset`.
    fn read(&mut self, offset: u64, count: u32) -> Result<Vec<u8>>;

    /// Service a `Twrite` against the auth fid, returning the number of
    /// bytes consumed.
    fn write(&mut self, offset: u64, data: &[u8]) -> Result<u32>;

    /// `Some(uid)` once the exchange has completed, where `uid` is the
    /// authenticated user name `Tattach` must match against its `uname`
    /// before accepting this afid. `None` while still in progress.
    fn done(&self) -> Option<&str>;
}

/// An auth back end that completes immediately without any exchange, for
/// connections that should succeed `Tauth` with no real authentication.
/// Mirrors py9p's `authmode == "none"`.
#[derive(Default)]
pub struct NullAuth {
    uname: String,
}

impl AuthFs for NullAuth {
    fn estab(&mut self, uname: &str, _aname: &str) -> Result<()> {
        self.uname = uname.to_owned();
        Ok(())
    }

    fn read(&mut self, _offset: u64, _count: u32) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn write(&mut self, _offset: u64, data: &[u8]) -> Result<u32> {
        Ok(data.len() as u32)
    }

    fn done(&self) -> Option<&str> {
        Some(&self.uname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_auth_completes_immediately() {
        let mut a = NullAuth::default();
        a.estab("glenda", "").unwrap();
        assert_eq!(a.done(), Some("glenda"));
        assert_eq!(a.write(0, b"hello").unwrap(), 5);
        assert!(a.read(0, 10).unwrap().is_empty());
    }
}

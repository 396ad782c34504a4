//! Client runtime: RPC correlation over a byte stream, plus the convenience
//! surface (`walk`/`open`/`read`/`write`/`ls`/`cd`/...) built on top of it.
//!
//! Grounded directly on py9p's `Client` class, which the distillation this
//! crate started from trimmed to a one-line mention; the well-known fid
//! numbers, `login` sequence, and convenience methods below all come from
//! there.

use std::io::{Read, Write};

use crate::error::{ClientError, Result, RpcError};
use crate::fcall::*;
use crate::serialize::{read_msg, write_msg};

/// Reserved fid used for the `Tauth` handshake.
pub const AFID: u32 = !0 - 3;
/// Fid bound to the attached tree's root.
pub const ROOT: u32 = !0 - 2;
/// Fid that tracks the current working directory.
pub const CWD: u32 = !0 - 1;
/// Scratch fid used internally by convenience calls that need a throwaway
/// walk target (e.g. `stat` on a path, or a one-shot `open`).
pub const SCRATCH: u32 = !0;

/// Credentials passed to `login`; mirrors py9p's `Credentials`. Concrete key
/// loading (PKI, `p9sk1`) stays a collaborator concern.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    pub user: String,
    pub passwd: String,
    pub authmode: String,
}

/// A 9P client bound to one connection.
pub struct Client<S: Read + Write> {
    stream: S,
    dotu: bool,
    msize: u32,
    next_fid: u32,
    next_tag: u16,
}

impl<S: Read + Write> Client<S> {
    pub fn new(stream: S) -> Client<S> {
        Client { stream, dotu: false, msize: 8192, next_fid: SCRATCH.wrapping_sub(1), next_tag: 0 }
    }

    fn fresh_fid(&mut self) -> u32 {
        let fid = self.next_fid;
        self.next_fid = self.next_fid.wrapping_sub(1);
        fid
    }

    fn fresh_tag(&mut self) -> u16 {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);
        if self.next_tag == NOTAG {
            self.next_tag = 0;
        }
        tag
    }

    /// Send `body` tagged `tag`, read the correlated reply, and verify the
    /// reply type matches. On any error before a reply arrives (besides an
    /// explicit `Rerror`), makes a best-effort attempt to cancel the request
    /// with `Tflush{oldtag: tag}` — using `oldtag`, not `tag`, fixing the bug
    /// in the original this crate traces to, where `_flush` resent `tag`
    /// instead of the tag being cancelled.
    fn rpc(&mut self, tag: u16, body: Fcall) -> Result<Fcall> {
        let want_type = body.msg_type();
        let req = Msg { tag, body };
        if let Err(e) = write_msg(&mut self.stream, &req, self.dotu) {
            let _ = self.try_flush(tag);
            return Err(e.into());
        }

        let reply = match read_msg(&mut self.stream, self.dotu) {
            Ok(r) => r,
            Err(e) => {
                let _ = self.try_flush(tag);
                return Err(e.into());
            }
        };

        if reply.tag != tag {
            return Err(RpcError(format!("tag mismatch: sent {}, got {}", tag, reply.tag)).into());
        }

        match reply.body {
            Fcall::Rerror { ename, .. } => Err(ename.into()),
            other if other.msg_type() as u8 == want_type as u8 + 1 => Ok(other),
            other => Err(RpcError(format!("unexpected reply {:?} to a {:?} request", other.msg_type(), want_type)).into()),
        }
    }

    fn try_flush(&mut self, oldtag: u16) -> Result<()> {
        let flush_tag = self.fresh_tag();
        let req = Msg { tag: flush_tag, body: Fcall::Tflush { oldtag } };
        write_msg(&mut self.stream, &req, self.dotu)?;
        let _ = read_msg(&mut self.stream, self.dotu);
        Ok(())
    }

    /// Negotiate the protocol version. Always the first RPC on a connection.
    fn version(&mut self, msize: u32) -> Result<()> {
        let tag = NOTAG;
        let reply = self.rpc(
            tag,
            Fcall::Tversion { msize, version: VERSION_9P_U.to_owned() },
        )?;
        if let Fcall::Rversion { msize: neg_msize, version } = reply {
            self.dotu = version == VERSION_9P_U;
            self.msize = neg_msize.min(msize);
            Ok(())
        } else {
            unreachable!("rpc() already checked the reply type")
        }
    }

    fn auth(&mut self, uname: &str, aname: &str) -> Result<Option<Qid>> {
        let tag = self.fresh_tag();
        match self.rpc(tag, Fcall::Tauth { afid: AFID, uname: uname.to_owned(), aname: aname.to_owned(), n_uname: UIDUNDEF }) {
            Ok(Fcall::Rauth { aqid }) => Ok(Some(aqid)),
            Ok(_) => unreachable!(),
            Err(_) => Ok(None),
        }
    }

    fn attach(&mut self, fid: u32, afid: u32, uname: &str, aname: &str) -> Result<Qid> {
        let tag = self.fresh_tag();
        match self.rpc(tag, Fcall::Tattach { fid, afid, uname: uname.to_owned(), aname: aname.to_owned(), n_uname: UIDUNDEF })? {
            Fcall::Rattach { qid } => Ok(qid),
            _ => unreachable!(),
        }
    }

    /// Version-negotiate, attempt `Tauth` (falling back to `NOFID` if the
    /// server has none or it fails), attach root, and point `cwd` at it.
    /// Mirrors py9p's `Client.login`.
    pub fn login(&mut self, creds: &Credentials, aname: &str, msize: u32) -> Result<()> {
        self.version(msize)?;

        let afid = match self.auth(&creds.user, aname)? {
            Some(_aqid) => AFID,
            None => NOFID,
        };

        self.attach(ROOT, afid, &creds.user, aname)?;
        self.walk_into(ROOT, CWD, &[])?;
        Ok(())
    }

    fn walk_into(&mut self, fid: u32, newfid: u32, wnames: &[String]) -> Result<Vec<Qid>> {
        let tag = self.fresh_tag();
        match self.rpc(tag, Fcall::Twalk { fid, newfid, wnames: wnames.to_vec() })? {
            Fcall::Rwalk { wqids } => Ok(wqids),
            _ => unreachable!(),
        }
    }

    /// Walk `path` (slash-separated) from `CWD` into a fresh fid, returning
    /// that fid and the qid it bound to.
    pub fn walk(&mut self, path: &str) -> Result<(u32, Qid)> {
        let newfid = self.fresh_fid();
        let names: Vec<String> = path.split('/').filter(|s| !s.is_empty()).map(str::to_owned).collect();
        let wqids = self.walk_into(CWD, newfid, &names)?;
        if wqids.len() != names.len() {
            return Err(ClientError(format!("walk to {} stopped short", path)).into());
        }
        let qid = wqids.last().cloned().unwrap_or_else(|| Qid { typ: QidType::DIR, version: 0, path: 0 });
        Ok((newfid, qid))
    }

    pub fn open(&mut self, fid: u32, mode: u8) -> Result<Qid> {
        let tag = self.fresh_tag();
        match self.rpc(tag, Fcall::Topen { fid, mode })? {
            Fcall::Ropen { qid, .. } => Ok(qid),
            _ => unreachable!(),
        }
    }

    pub fn create(&mut self, fid: u32, name: &str, perm: u32, mode: u8) -> Result<Qid> {
        let tag = self.fresh_tag();
        match self.rpc(
            tag,
            Fcall::Tcreate { fid, name: name.to_owned(), perm, mode, extension: String::new() },
        )? {
            Fcall::Rcreate { qid, .. } => Ok(qid),
            _ => unreachable!(),
        }
    }

    pub fn read(&mut self, fid: u32, offset: u64, count: u32) -> Result<Vec<u8>> {
        let tag = self.fresh_tag();
        match self.rpc(tag, Fcall::Tread { fid, offset, count })? {
            Fcall::Rread { data } => Ok(data.into_vec()),
            _ => unreachable!(),
        }
    }

    pub fn write(&mut self, fid: u32, offset: u64, data: &[u8]) -> Result<u32> {
        let tag = self.fresh_tag();
        match self.rpc(tag, Fcall::Twrite { fid, offset, data: Data::new(data.to_vec()) })? {
            Fcall::Rwrite { count } => Ok(count),
            _ => unreachable!(),
        }
    }

    pub fn close(&mut self, fid: u32) -> Result<()> {
        let tag = self.fresh_tag();
        self.rpc(tag, Fcall::Tclunk { fid })?;
        Ok(())
    }

    pub fn rm(&mut self, path: &str) -> Result<()> {
        let (fid, _) = self.walk(path)?;
        let tag = self.fresh_tag();
        self.rpc(tag, Fcall::Tremove { fid })?;
        Ok(())
    }

    pub fn stat(&mut self, fid: u32) -> Result<Stat> {
        let tag = self.fresh_tag();
        match self.rpc(tag, Fcall::Tstat { fid })? {
            Fcall::Rstat { stat } => Ok(stat),
            _ => unreachable!(),
        }
    }

    /// Read a directory fid to completion and parse it into `Stat` records.
    pub fn lsdir(&mut self, fid: u32) -> Result<Vec<Stat>> {
        let mut offset = 0u64;
        let mut out = Vec::new();
        loop {
            let chunk = self.read(fid, offset, self.msize - IOHDRSZ)?;
            if chunk.is_empty() {
                break;
            }
            offset += chunk.len() as u64;
            let mut cur = std::io::Cursor::new(chunk);
            loop {
                match Stat::decode_nolen(&mut cur, self.dotu) {
                    Ok(s) => out.push(s),
                    Err(_) => break,
                }
            }
        }
        Ok(out)
    }

    /// List `path`: short form is just names, `long` renders each entry with
    /// [`Stat::to_long_string`], mirroring `ls`/`ls -l`.
    pub fn ls(&mut self, path: &str, long: bool) -> Result<Vec<String>> {
        let (fid, qid) = self.walk(path)?;
        self.open(fid, om::OREAD)?;
        let entries = if qid.typ.contains(QidType::DIR) {
            self.lsdir(fid)?
        } else {
            vec![self.stat(fid)?]
        };
        self.close(fid)?;
        Ok(entries
            .iter()
            .map(|s| if long { s.to_long_string() } else { s.name.clone() })
            .collect())
    }

    /// Walk to `path`, verify it is a directory, and make it the new `cwd`.
    pub fn cd(&mut self, path: &str) -> Result<()> {
        let (fid, qid) = self.walk(path)?;
        if !qid.typ.contains(QidType::DIR) {
            self.close(fid)?;
            return Err(crate::error::string::ENOTDIR.into());
        }
        self.close(CWD)?;
        self.walk_into(fid, CWD, &[])?;
        self.close(fid)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fid_allocation_descends_from_scratch() {
        let mut c = Client::new(std::io::Cursor::new(Vec::<u8>::new()));
        let a = c.fresh_fid();
        let b = c.fresh_fid();
        assert_ne!(a, b);
        assert_ne!(a, ROOT);
        assert_ne!(a, CWD);
        assert_ne!(a, AFID);
    }

    #[test]
    fn tag_allocation_avoids_notag() {
        let mut c = Client::new(std::io::Cursor::new(Vec::<u8>::new()));
        c.next_tag = NOTAG - 1;
        let t = c.fresh_tag();
        assert_eq!(t, NOTAG - 1);
        assert_eq!(c.next_tag, 0);
    }
}

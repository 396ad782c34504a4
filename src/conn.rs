//! Per-connection protocol state: the fid table, the outstanding-request
//! map, and the attributes the handshake pins down (`uname`, `msize`, `.u`).
//!
//! Grounded on py9p's `Sock` class, which keeps exactly this bookkeeping
//! (`fids`, `reqs`, `uname`, `closing`) alongside the raw socket.

use std::collections::HashMap;

use crate::fcall::Qid;

/// Bookkeeping the framework keeps per fid, independent of whatever a back
/// end stores about the file itself.
#[derive(Clone, Debug)]
pub struct FidEntry {
    /// Qid bound by the most recent successful walk/attach/create.
    pub qid: Qid,
    /// Set once `Topen`/`Tcreate` succeeds; `None` means not yet open.
    pub open_mode: Option<u8>,
    /// Bytes consumed so far by sequential `Tread`s of an open directory.
    pub diroffset: u64,
    /// Number of directory entries already packed into a previous `Rread`,
    /// since a back end's `rreaddir` returns the full remaining listing on
    /// every call rather than tracking pagination itself.
    pub dir_pos: u64,
    /// True for the fid bound to the auth channel (`Tauth`'s `afid`).
    pub is_auth: bool,
    /// Reference count; a `newfid == fid` walk increments rather than replaces.
    pub refs: u32,
}

impl FidEntry {
    pub fn new(qid: Qid) -> FidEntry {
        FidEntry { qid, open_mode: None, diroffset: 0, dir_pos: 0, is_auth: false, refs: 1 }
    }

    pub fn is_open(&self) -> bool {
        self.open_mode.is_some()
    }
}

/// Per-connection state, independent of the transport it rides on.
pub struct Connection {
    pub fids: HashMap<u32, FidEntry>,
    /// Tags of requests currently being processed; used to reject duplicate
    /// tags and to let `Tflush` find what it's cancelling.
    pub reqs: HashMap<u16, ()>,
    /// Authenticated user name, bound once `Tattach`/auth completes.
    pub uname: String,
    /// Negotiated message size, set by `Tversion`; capped by `server_msize`.
    pub msize: u32,
    /// The server's ceiling on `msize`, fixed for the life of the connection.
    pub server_msize: u32,
    /// Whether this server configuration offers `9P2000.u` at all; the
    /// negotiated `dotu` additionally requires the client to have asked for
    /// it in `Tversion`.
    pub dotu_supported: bool,
    /// Whether the connection negotiated `.u`.
    pub dotu: bool,
    /// Set once `Tversion` has been processed; no other message is legal
    /// before this.
    pub version_done: bool,
    /// Set while the connection is being torn down.
    pub closing: bool,
}

impl Connection {
    pub fn new() -> Connection {
        Connection::with_config(8192, true)
    }

    /// Construct a connection bound to a server's negotiated `msize` ceiling
    /// and whether it offers `.u` at all.
    pub fn with_config(server_msize: u32, dotu_supported: bool) -> Connection {
        Connection {
            fids: HashMap::new(),
            reqs: HashMap::new(),
            uname: String::new(),
            msize: server_msize,
            server_msize,
            dotu_supported,
            dotu: false,
            version_done: false,
            closing: false,
        }
    }

    /// Insert a fresh fid, failing if it is already in use.
    pub fn new_fid(&mut self, fid: u32, qid: Qid) -> Result<(), ()> {
        if self.fids.contains_key(&fid) {
            return Err(());
        }
        self.fids.insert(fid, FidEntry::new(qid));
        Ok(())
    }

    pub fn get(&self, fid: u32) -> Option<&FidEntry> {
        self.fids.get(&fid)
    }

    pub fn get_mut(&mut self, fid: u32) -> Option<&mut FidEntry> {
        self.fids.get_mut(&fid)
    }

    pub fn clunk(&mut self, fid: u32) -> Option<FidEntry> {
        self.fids.remove(&fid)
    }

    /// The lowest tag value not currently outstanding; used by the teardown
    /// sequence to synthesize a `Tflush` for every pending request.
    pub fn free_tag(&self) -> u16 {
        (0..0xFFFEu16).find(|t| !self.reqs.contains_key(t)).unwrap_or(0)
    }

    pub fn begin_req(&mut self, tag: u16) -> Result<(), ()> {
        if self.reqs.contains_key(&tag) {
            return Err(());
        }
        self.reqs.insert(tag, ());
        Ok(())
    }

    pub fn end_req(&mut self, tag: u16) {
        self.reqs.remove(&tag);
    }

    /// All fids still open, in no particular order; used at teardown.
    pub fn all_fids(&self) -> Vec<u32> {
        self.fids.keys().copied().collect()
    }

    /// All tags still outstanding; used at teardown.
    pub fn all_tags(&self) -> Vec<u16> {
        self.reqs.keys().copied().collect()
    }
}

impl Default for Connection {
    fn default() -> Self {
        Connection::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcall::QidType;

    fn qid(path: u64) -> Qid {
        Qid { typ: QidType::FILE, version: 0, path }
    }

    #[test]
    fn duplicate_fid_rejected() {
        let mut c = Connection::new();
        assert!(c.new_fid(1, qid(1)).is_ok());
        assert!(c.new_fid(1, qid(2)).is_err());
    }

    #[test]
    fn free_tag_skips_outstanding() {
        let mut c = Connection::new();
        c.begin_req(0).unwrap();
        c.begin_req(1).unwrap();
        assert_eq!(c.free_tag(), 2);
    }

    #[test]
    fn clunk_removes_fid() {
        let mut c = Connection::new();
        c.new_fid(3, qid(3)).unwrap();
        assert!(c.clunk(3).is_some());
        assert!(c.get(3).is_none());
    }
}

//! Server dispatcher: protocol-level validation wired to a pluggable
//! `Filesystem` back end and an optional `AuthFs` auth channel, plus a
//! single-threaded, readiness-based event loop multiplexing every connected
//! socket and the listener itself.
//!
//! Grounded on py9p's `Server` class (`serve`/`respond`/`shutdown`,
//! `regreadfd`/`regwritefd`) and on the teacher's `server::Filesystem`
//! trait, generalized from a dynamic method-name dispatch into an explicit
//! capability set.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::{Arc, Mutex};

use log::{debug, info, trace, warn};
use nix::sys::select::{select, FdSet};
use nix::sys::time::{TimeVal, TimeValLike};

use crate::auth::AuthFs;
use crate::conn::{Connection, FidEntry};
use crate::error::{self, Error, Result};
use crate::fcall::*;
use crate::serialize::{read_msg, write_msg};

/// The request a `Filesystem` handler sees.
pub struct Req<'a> {
    /// The message the client sent.
    pub ifcall: &'a Fcall,
    /// A human-readable identifier of the remote peer (address or path).
    pub remote: &'a str,
    /// Whether the connection negotiated `.u`.
    pub dotu: bool,
    /// The uname bound to this connection by the last successful attach.
    pub uname: &'a str,
}

/// Pluggable filesystem back end. 9P2000.L, the in-memory tree, the disk
/// exporter and the FUSE bridge are all just implementors of this living
/// outside the crate. Version negotiation and the auth channel are handled
/// by the dispatcher itself (§4.3/§4.6), not by this trait.
///
/// Every method defaults to `ENOSYS`, except `rattach` (binds the root qid)
/// and `rclunk` (always succeeds).
pub trait Filesystem: Send {
    fn rattach(&mut self, _: &Req) -> Result<Fcall> {
        Ok(Fcall::Rattach { qid: Qid { typ: QidType::DIR, version: 0, path: 0 } })
    }
    fn rwalk(&mut self, _: &Req) -> Result<Fcall> { Err(error::string::ENOSYS.into()) }
    fn ropen(&mut self, _: &Req) -> Result<Fcall> { Err(error::string::ENOSYS.into()) }
    fn rcreate(&mut self, _: &Req) -> Result<Fcall> { Err(error::string::ENOSYS.into()) }
    fn rread(&mut self, _: &Req) -> Result<Fcall> { Err(error::string::ENOSYS.into()) }
    /// Return the full (or remaining) directory listing as `Stat` records.
    /// The dispatcher, not the back end, packs these onto the wire -- it
    /// stops before a record would make an `Rread` exceed the requested
    /// count, so a record is never split across two reads (§4.3/§8).
    fn rreaddir(&mut self, _: &Req) -> Result<Vec<Stat>> { Err(error::string::ENOSYS.into()) }
    fn rwrite(&mut self, _: &Req) -> Result<Fcall> { Err(error::string::ENOSYS.into()) }
    fn rclunk(&mut self, _: &Req) -> Result<Fcall> { Ok(Fcall::Rclunk) }
    fn rremove(&mut self, _: &Req) -> Result<Fcall> { Err(error::string::ENOSYS.into()) }
    fn rstat(&mut self, _: &Req) -> Result<Fcall> { Err(error::string::ENOSYS.into()) }
    fn rwstat(&mut self, _: &Req) -> Result<Fcall> { Err(error::string::ENOSYS.into()) }
    /// Optional: a back end that wants to react to `Tflush` (cancel an
    /// in-flight deferred read, say) overrides this. The default makes the
    /// dispatcher fall back to dropping the outstanding request and
    /// replying empty (§4.3).
    fn rflush(&mut self, _: &Req) -> Result<Fcall> { Err(error::string::ENOSYS.into()) }
}

fn qid_of(fcall: &Fcall) -> Option<Qid> {
    match fcall {
        Fcall::Rattach { qid } => Some(*qid),
        Fcall::Rcreate { qid, .. } => Some(*qid),
        _ => None,
    }
}

/// Hash a pseudo-file name (`"#a"`) into a stable qid path, the way the
/// teacher's back ends derive qid paths for synthetic files.
fn hash_path(name: &str) -> u64 {
    let mut h = DefaultHasher::new();
    name.hash(&mut h);
    h.finish()
}

/// Apply protocol-level validation, update connection state, and call
/// through to the back end or the auth channel.
fn handle<Fs: Filesystem + ?Sized>(
    fs: &Mutex<Fs>,
    authfs: Option<&mut dyn AuthFs>,
    conn: &mut Connection,
    msg: &Msg,
    remote: &str,
) -> Result<Fcall> {
    if !conn.version_done && !matches!(msg.body, Fcall::Tversion { .. }) {
        return Err(error::string::EBOTCH.into());
    }

    let req = Req { ifcall: &msg.body, remote, dotu: conn.dotu, uname: &conn.uname };

    match &msg.body {
        Fcall::Tversion { msize, version } => {
            conn.fids.clear();
            conn.reqs.clear();
            if !version.starts_with("9P") {
                conn.version_done = true;
                return Ok(Fcall::Rversion { msize: *msize, version: "unknown".to_owned() });
            }
            conn.dotu = conn.dotu_supported && version == VERSION_9P_U;
            conn.msize = (*msize).min(conn.server_msize);
            conn.version_done = true;
            let version = if conn.dotu { VERSION_9P_U } else { VERSION_9P };
            Ok(Fcall::Rversion { msize: conn.msize, version: version.to_owned() })
        }

        Fcall::Tauth { afid, uname, .. } => {
            if conn.fids.contains_key(afid) {
                return Err(error::string::EDUPFID.into());
            }
            match authfs {
                None => Err(error::string::EAUTHNOTREQUIRED.into()),
                Some(a) => {
                    a.estab(uname, "")?;
                    let qid = Qid { typ: QidType::AUTH, version: 0, path: hash_path("#a") };
                    let mut entry = FidEntry::new(qid);
                    entry.is_auth = true;
                    conn.fids.insert(*afid, entry);
                    Ok(Fcall::Rauth { aqid: qid })
                }
            }
        }

        Fcall::Tattach { fid, afid, uname, .. } => {
            if conn.fids.contains_key(fid) {
                return Err(error::string::EDUPFID.into());
            }
            if *afid != NOFID {
                let is_auth_fid = conn.get(*afid).map(|e| e.is_auth).unwrap_or(false);
                if !is_auth_fid {
                    return Err(error::string::EUNKNOWNFID.into());
                }
                match &authfs {
                    Some(a) => match a.done() {
                        Some(suid) if suid == uname => {}
                        Some(_) => return Err(error::string::EACCES.into()),
                        None => return Err(error::string::EAUTHNOTDONE.into()),
                    },
                    None => {}
                }
            } else if authfs.is_some() {
                return Err(error::string::EAUTHNOTDONE.into());
            }
            let r = fs.lock().unwrap().rattach(&req);
            if let Ok(ref fcall) = r {
                if let Some(qid) = qid_of(fcall) {
                    let _ = conn.new_fid(*fid, qid);
                }
                conn.uname = uname.clone();
            }
            r
        }

        Fcall::Twalk { fid, newfid, wnames } => {
            if fid != newfid && conn.fids.contains_key(newfid) {
                return Err(error::string::EDUPFID.into());
            }
            let entry = conn.get(*fid).ok_or_else(|| Error::from(error::string::EUNKNOWNFID))?;
            if entry.is_open() && !wnames.is_empty() {
                return Err(error::string::EBOTCH.into());
            }
            if !wnames.is_empty() && !entry.qid.typ.contains(QidType::DIR) {
                return Err(error::string::EWALKNOTDIR.into());
            }
            // A zero-name walk clones the source fid; the dispatcher answers
            // it directly without delegating to the back end.
            if wnames.is_empty() {
                let qid = entry.qid;
                if fid == newfid {
                    if let Some(e) = conn.get_mut(*fid) {
                        e.refs += 1;
                    }
                } else {
                    let _ = conn.new_fid(*newfid, qid);
                }
                return Ok(Fcall::Rwalk { wqids: Vec::new() });
            }
            let r = fs.lock().unwrap().rwalk(&req);
            if let Ok(Fcall::Rwalk { wqids }) = &r {
                if wqids.is_empty() {
                    return Err(error::string::ENOENT_FILE.into());
                }
                if wqids.len() == wnames.len() {
                    let qid = *wqids.last().unwrap();
                    if fid == newfid {
                        if let Some(e) = conn.get_mut(*fid) {
                            e.qid = qid;
                            e.refs += 1;
                        }
                    } else {
                        let _ = conn.new_fid(*newfid, qid);
                    }
                }
            }
            r
        }

        Fcall::Topen { fid, mode } => {
            match conn.get(*fid) {
                None => return Err(error::string::EUNKNOWNFID.into()),
                Some(f) if f.is_open() => return Err(error::string::EBOTCH.into()),
                Some(f) if f.qid.typ.contains(QidType::DIR) && (*mode & !om::ORCLOSE) != om::OREAD => {
                    return Err(error::string::EACCES2.into());
                }
                _ => {}
            }
            let r = fs.lock().unwrap().ropen(&req);
            let r = clamp_iounit(r, conn.msize);
            if r.is_ok() {
                if let Some(e) = conn.get_mut(*fid) {
                    e.open_mode = Some(*mode);
                }
            }
            r
        }

        Fcall::Tcreate { fid, .. } => {
            match conn.get(*fid) {
                None => return Err(error::string::EUNKNOWNFID.into()),
                Some(f) if f.is_open() => return Err(error::string::EBOTCH.into()),
                Some(f) if !f.qid.typ.contains(QidType::DIR) => {
                    return Err(error::string::ECREATENONDIR.into());
                }
                _ => {}
            }
            let r = fs.lock().unwrap().rcreate(&req);
            let r = clamp_iounit(r, conn.msize);
            if let Ok(Fcall::Rcreate { qid, .. }) = &r {
                if let Some(e) = conn.get_mut(*fid) {
                    e.qid = *qid;
                    e.open_mode = Some(om::ORDWR);
                }
            }
            r
        }

        Fcall::Tread { fid, offset, count } => {
            let fid = *fid;
            let offset = *offset;
            let count_req = *count;
            let entry = conn.get(fid).ok_or_else(|| Error::from(error::string::EUNKNOWNFID))?;
            if entry.is_auth {
                return match authfs {
                    Some(a) => Ok(Fcall::Rread { data: Data::new(a.read(offset, count_req)?) }),
                    None => Err(error::string::EBOTCH.into()),
                };
            }
            if entry.open_mode.is_none() {
                return Err(error::string::EOPEN.into());
            }
            let is_dir = entry.qid.typ.contains(QidType::DIR);
            if is_dir && offset != entry.diroffset {
                return Err(error::string::EBADOFFSET.into());
            }
            let count = clamp_count(count_req, conn.msize);
            let clamped = Fcall::Tread { fid, offset, count };
            let creq = Req { ifcall: &clamped, remote, dotu: conn.dotu, uname: &conn.uname };

            if is_dir {
                // The dispatcher, not the back end, packs directory listings:
                // whole Stat records only, stopping before one would exceed
                // the requested count, so a slice never splits a record.
                let start_pos = entry.dir_pos as usize;
                let stats = fs.lock().unwrap().rreaddir(&creq)?;
                let mut buf = Vec::new();
                let mut packed = 0usize;
                for stat in stats.iter().skip(start_pos) {
                    let mut rec = Vec::new();
                    stat.encode(&mut rec, conn.dotu, false)?;
                    if buf.len() + rec.len() > count as usize {
                        break;
                    }
                    buf.extend_from_slice(&rec);
                    packed += 1;
                }
                if let Some(e) = conn.get_mut(fid) {
                    e.dir_pos = (start_pos + packed) as u64;
                    e.diroffset = offset + buf.len() as u64;
                }
                Ok(Fcall::Rread { data: Data::new(buf) })
            } else {
                fs.lock().unwrap().rread(&creq)
            }
        }

        Fcall::Twrite { fid, offset, data } => {
            let entry = conn.get(*fid).ok_or_else(|| Error::from(error::string::EUNKNOWNFID))?;
            if entry.is_auth {
                return match authfs {
                    Some(a) => Ok(Fcall::Rwrite { count: a.write(*offset, data.data())? }),
                    None => Err(error::string::EBOTCH.into()),
                };
            }
            match entry.open_mode {
                None => return Err(error::string::EOPEN.into()),
                Some(m) if (m & om::MODE_MASK) == om::OREAD => return Err(error::string::EACCES2.into()),
                _ => {}
            }
            let count = clamp_count(data.data().len() as u32, conn.msize);
            let clamped_data = Data::new(data.data()[..count as usize].to_vec());
            let clamped = Fcall::Twrite { fid: *fid, offset: *offset, data: clamped_data };
            let creq = Req { ifcall: &clamped, remote, dotu: conn.dotu, uname: &conn.uname };
            fs.lock().unwrap().rwrite(&creq)
        }

        Fcall::Tclunk { fid } => {
            let r = fs.lock().unwrap().rclunk(&req);
            conn.clunk(*fid);
            r
        }

        Fcall::Tremove { fid } => {
            let r = fs.lock().unwrap().rremove(&req);
            conn.clunk(*fid);
            r
        }

        Fcall::Tstat { fid } => {
            if !conn.fids.contains_key(fid) {
                return Err(error::string::EUNKNOWNFID.into());
            }
            fs.lock().unwrap().rstat(&req)
        }
        Fcall::Twstat { fid, .. } => {
            if !conn.fids.contains_key(fid) {
                return Err(error::string::EUNKNOWNFID.into());
            }
            fs.lock().unwrap().rwstat(&req)
        }

        Fcall::Tflush { oldtag } => {
            conn.reqs.remove(oldtag);
            let r = fs.lock().unwrap().rflush(&req);
            r.or(Ok(Fcall::Rflush))
        }

        _ => Err(error::string::EBOTCH.into()),
    }
}

fn clamp_count(count: u32, msize: u32) -> u32 {
    count.min(msize.saturating_sub(IOHDRSZ))
}

fn clamp_iounit(r: Result<Fcall>, msize: u32) -> Result<Fcall> {
    let cap = msize.saturating_sub(IOHDRSZ);
    r.map(|fcall| match fcall {
        Fcall::Ropen { qid, iounit } => Fcall::Ropen { qid, iounit: iounit.min(cap) },
        Fcall::Rcreate { qid, iounit } => Fcall::Rcreate { qid, iounit: iounit.min(cap) },
        other => other,
    })
}

/// Dispatch one incoming message, turning a handler error into `Rerror`.
pub fn dispatch_once<Fs: Filesystem + ?Sized>(
    fs: &Mutex<Fs>,
    authfs: Option<&mut dyn AuthFs>,
    conn: &mut Connection,
    msg: Msg,
    remote: &str,
) -> Msg {
    let tag = msg.tag;

    if conn.version_done && !matches!(msg.body, Fcall::Tversion { .. }) {
        if conn.reqs.contains_key(&tag) {
            return Msg { tag, body: Fcall::Rerror { ename: error::string::EDUPTAG.to_owned(), errno: ERRUNDEF } };
        }
        let _ = conn.begin_req(tag);
    }

    trace!("<- {:?}", msg.body);
    let result = handle(fs, authfs, conn, &msg, remote);
    conn.end_req(tag);

    let body = match result {
        Ok(b) => b,
        Err(e) => Fcall::Rerror { ename: e.ename(), errno: e.errno().map(|n| n as i32 as u32).unwrap_or(ERRUNDEF) },
    };
    trace!("-> {:?}", body);
    Msg { tag, body }
}

/// Either transport a connection can ride on; kept as a plain enum rather
/// than a trait object so `Read`/`Write` forward without extra plumbing.
enum Sock {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Sock {
    fn fd(&self) -> RawFd {
        match self {
            Sock::Tcp(s) => s.as_raw_fd(),
            #[cfg(unix)]
            Sock::Unix(s) => s.as_raw_fd(),
        }
    }
}

impl Read for Sock {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Sock::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Sock::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Sock {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sock::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Sock::Unix(s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sock::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Sock::Unix(s) => s.flush(),
        }
    }
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    fn fd(&self) -> RawFd {
        match self {
            Listener::Tcp(l) => l.as_raw_fd(),
            #[cfg(unix)]
            Listener::Unix(l) => l.as_raw_fd(),
        }
    }

    fn accept(&self) -> io::Result<(Sock, String)> {
        match self {
            Listener::Tcp(l) => {
                let (s, addr) = l.accept()?;
                s.set_nodelay(true).ok();
                Ok((Sock::Tcp(s), addr.to_string()))
            }
            #[cfg(unix)]
            Listener::Unix(l) => {
                let (s, _) = l.accept()?;
                Ok((Sock::Unix(s), "unix socket".to_owned()))
            }
        }
    }
}

struct ConnSlot {
    stream: Sock,
    conn: Connection,
    remote: String,
    authfs: Option<Box<dyn AuthFs>>,
}

/// A running server: owns the listener, the back end, and every connected
/// client, and multiplexes them through one `select` loop.
///
/// Single-threaded by design (§5): one readiness loop per process, the back
/// end guarded by a mutex only so multi-threaded extensions remain possible
/// without an API break.
pub struct Server<Fs: Filesystem> {
    fs: Arc<Mutex<Fs>>,
    listener: Listener,
    conns: HashMap<RawFd, ConnSlot>,
    extra_reads: HashMap<RawFd, Box<dyn FnMut() + Send>>,
    msize: u32,
    dotu: bool,
    auth_factory: Option<Arc<dyn Fn() -> Box<dyn AuthFs> + Send + Sync>>,
}

/// `proto!address!port`, as accepted by the collaborator CLI layer. Returns
/// `(proto, "address:port")`.
fn parse_proto(arg: &str) -> ::std::result::Result<(&str, String), ()> {
    let mut split = arg.split('!');
    let proto = split.next().ok_or(())?;
    let addr = split.next().ok_or(())?;
    let port = split.next().ok_or(())?;
    Ok((proto, format!("{}:{}", addr, port)))
}

impl<Fs: Filesystem + 'static> Server<Fs> {
    /// Bind a TCP or Unix-domain listener from a `proto!address!port`
    /// string. A `unix` proto treats `address` as a socket path and `port`
    /// as the file mode to `chmod` it to, matching py9p's `Server.__init__`.
    pub fn bind(fs: Fs, addr: &str) -> io::Result<Server<Fs>> {
        let (proto, sockaddr) = parse_proto(addr)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid proto!address!port"))?;

        let listener = match proto {
            "tcp" => Listener::Tcp(TcpListener::bind(&sockaddr)?),
            #[cfg(unix)]
            "unix" => {
                let mut parts = sockaddr.splitn(2, ':');
                let path = parts.next().unwrap();
                let mode = parts.next().and_then(|p| u32::from_str_radix(p, 8).ok());
                let l = UnixListener::bind(path)?;
                if let Some(m) = mode {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(path, std::fs::Permissions::from_mode(m))?;
                }
                Listener::Unix(l)
            }
            _ => return Err(io::Error::new(io::ErrorKind::InvalidInput, "unsupported protocol")),
        };

        info!("listening on {}", addr);
        Ok(Server {
            fs: Arc::new(Mutex::new(fs)),
            listener,
            conns: HashMap::new(),
            extra_reads: HashMap::new(),
            msize: 8192,
            dotu: true,
            auth_factory: None,
        })
    }

    /// Cap the `msize` this server will ever negotiate down to.
    pub fn with_msize(mut self, msize: u32) -> Self {
        self.msize = msize;
        self
    }

    /// Whether to offer `9P2000.u` at all (independent of what a given
    /// client asks for in `Tversion`).
    pub fn with_dotu(mut self, dotu: bool) -> Self {
        self.dotu = dotu;
        self
    }

    /// Configure an auth channel: `factory` is called once per accepted
    /// connection to produce a fresh `AuthFs`, since auth state (§4.6) is
    /// per-connection, not shared.
    pub fn with_authfs<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn AuthFs> + Send + Sync + 'static,
    {
        self.auth_factory = Some(Arc::new(factory));
        self
    }

    /// Register `fd` so the event loop calls `on_ready` once it becomes
    /// readable; mirrors py9p's `Server.regreadfd`, used by back ends that
    /// complete a response asynchronously (e.g. a pipe or a timer fd).
    pub fn regreadfd<F: FnMut() + Send + 'static>(&mut self, fd: RawFd, on_ready: F) {
        self.extra_reads.insert(fd, Box::new(on_ready));
    }

    pub fn unregreadfd(&mut self, fd: RawFd) {
        self.extra_reads.remove(&fd);
    }

    /// Run the event loop forever.
    pub fn serve(&mut self) -> io::Result<()> {
        loop {
            let mut rset = FdSet::new();
            rset.insert(self.listener.fd());
            for fd in self.conns.keys() {
                rset.insert(*fd);
            }
            for fd in self.extra_reads.keys() {
                rset.insert(*fd);
            }

            let mut timeout = TimeVal::seconds(1);
            select(None, Some(&mut rset), None, None, Some(&mut timeout))
                .map_err(|e| io::Error::from_raw_os_error(e as i32))?;

            if rset.contains(self.listener.fd()) {
                match self.listener.accept() {
                    Ok((stream, remote)) => {
                        info!("accepted connection from {}", remote);
                        let fd = stream.fd();
                        let conn = Connection::with_config(self.msize, self.dotu);
                        let authfs = self.auth_factory.as_ref().map(|f| f());
                        self.conns.insert(fd, ConnSlot { stream, conn, remote, authfs });
                    }
                    Err(e) => warn!("accept failed: {}", e),
                }
            }

            let ready: Vec<RawFd> = self.conns.keys().copied().filter(|fd| rset.contains(*fd)).collect();
            for fd in ready {
                if let Err(e) = self.service_one(fd) {
                    debug!("connection {} closing: {}", fd, e);
                    self.teardown(fd);
                }
            }

            let ready_extra: Vec<RawFd> = self.extra_reads.keys().copied().filter(|fd| rset.contains(*fd)).collect();
            for fd in ready_extra {
                if let Some(cb) = self.extra_reads.get_mut(&fd) {
                    cb();
                }
            }
        }
    }

    fn service_one(&mut self, fd: RawFd) -> io::Result<()> {
        let slot = self.conns.get_mut(&fd).expect("fd tracked in conns");
        let dotu = slot.conn.dotu;
        let msg = read_msg(&mut slot.stream, dotu)?;
        let remote = slot.remote.clone();
        let reply = dispatch_once(&*self.fs, slot.authfs.as_deref_mut(), &mut slot.conn, msg, &remote);
        write_msg(&mut slot.stream, &reply, slot.conn.dotu)?;
        Ok(())
    }

    /// Synthesize `Tflush` for every outstanding request and `Tclunk` for
    /// every remaining fid before dropping the connection, exactly as
    /// py9p's `Server.shutdown` does per client.
    fn teardown(&mut self, fd: RawFd) {
        if let Some(mut slot) = self.conns.remove(&fd) {
            for tag in slot.conn.all_tags() {
                let flush_tag = slot.conn.free_tag();
                let flush = Msg { tag: flush_tag, body: Fcall::Tflush { oldtag: tag } };
                let _ = dispatch_once(&*self.fs, slot.authfs.as_deref_mut(), &mut slot.conn, flush, &slot.remote);
            }
            for fid in slot.conn.all_fids() {
                let clunk_tag = slot.conn.free_tag();
                let clunk = Msg { tag: clunk_tag, body: Fcall::Tclunk { fid } };
                let _ = dispatch_once(&*self.fs, slot.authfs.as_deref_mut(), &mut slot.conn, clunk, &slot.remote);
            }
            slot.conn.closing = true;
            info!("closed connection from {}", slot.remote);
        }
    }
}

/// Convenience entry point: bind and serve forever.
pub fn srv<Fs: Filesystem + 'static>(filesystem: Fs, addr: &str) -> io::Result<()> {
    Server::bind(filesystem, addr)?.serve()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NullAuth;

    struct Echo;
    impl Filesystem for Echo {}

    fn msg(tag: u16, body: Fcall) -> Msg {
        Msg { tag, body }
    }

    fn no_auth() -> Option<&'static mut dyn AuthFs> {
        None
    }

    #[test]
    fn tversion_before_anything_else_required() {
        let fs = Mutex::new(Echo);
        let mut conn = Connection::new();
        let reply = dispatch_once(&fs, no_auth(), &mut conn, msg(1, Fcall::Tstat { fid: 0 }), "test");
        match reply.body {
            Fcall::Rerror { .. } => {}
            other => panic!("expected Rerror, got {:?}", other),
        }
    }

    #[test]
    fn tversion_unlocks_the_connection_and_clamps_msize() {
        let fs = Mutex::new(Echo);
        let mut conn = Connection::with_config(4096, true);
        let reply = dispatch_once(
            &fs,
            no_auth(),
            &mut conn,
            msg(NOTAG, Fcall::Tversion { msize: 8192, version: VERSION_9P.to_owned() }),
            "test",
        );
        match reply.body {
            Fcall::Rversion { msize, version } => {
                assert_eq!(msize, 4096);
                assert_eq!(version, VERSION_9P);
            }
            other => panic!("expected Rversion, got {:?}", other),
        }
        assert!(conn.version_done);
    }

    #[test]
    fn tversion_unknown_version_is_rejected() {
        let fs = Mutex::new(Echo);
        let mut conn = Connection::new();
        let reply = dispatch_once(
            &fs,
            no_auth(),
            &mut conn,
            msg(NOTAG, Fcall::Tversion { msize: 8192, version: "bogus".to_owned() }),
            "test",
        );
        match reply.body {
            Fcall::Rversion { version, .. } => assert_eq!(version, "unknown"),
            other => panic!("expected Rversion, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_fid_on_attach_is_rejected() {
        struct AttachOk;
        impl Filesystem for AttachOk {
            fn rattach(&mut self, _: &Req) -> Result<Fcall> {
                Ok(Fcall::Rattach { qid: Qid { typ: QidType::DIR, version: 0, path: 1 } })
            }
        }
        let fs = Mutex::new(AttachOk);
        let mut conn = Connection::new();
        conn.version_done = true;

        let attach = |fid| Fcall::Tattach { fid, afid: NOFID, uname: "glenda".into(), aname: "".into(), n_uname: UIDUNDEF };
        let r1 = dispatch_once(&fs, no_auth(), &mut conn, msg(1, attach(0)), "t");
        assert!(matches!(r1.body, Fcall::Rattach { .. }));
        let r2 = dispatch_once(&fs, no_auth(), &mut conn, msg(2, attach(0)), "t");
        assert!(matches!(r2.body, Fcall::Rerror { .. }));
    }

    fn dummy_stat(name: &str) -> Stat {
        Stat {
            typ: 0,
            dev: 0,
            qid: Qid { typ: QidType::FILE, version: 0, path: 2 },
            mode: 0o644,
            atime: 0,
            mtime: 0,
            length: 0,
            name: name.to_owned(),
            uid: "glenda".to_owned(),
            gid: "glenda".to_owned(),
            muid: "glenda".to_owned(),
            extension: String::new(),
            n_uid: UIDUNDEF,
            n_gid: UIDUNDEF,
            n_muid: UIDUNDEF,
        }
    }

    #[test]
    fn directory_read_offset_must_be_sequential() {
        struct DirFs;
        impl Filesystem for DirFs {
            fn rattach(&mut self, _: &Req) -> Result<Fcall> {
                Ok(Fcall::Rattach { qid: Qid { typ: QidType::DIR, version: 0, path: 1 } })
            }
            fn ropen(&mut self, _: &Req) -> Result<Fcall> {
                Ok(Fcall::Ropen { qid: Qid { typ: QidType::DIR, version: 0, path: 1 }, iounit: 0 })
            }
            fn rreaddir(&mut self, _: &Req) -> Result<Vec<Stat>> {
                Ok(vec![dummy_stat("a"), dummy_stat("b")])
            }
        }
        let fs = Mutex::new(DirFs);
        let mut conn = Connection::new();
        conn.version_done = true;
        conn.new_fid(0, Qid { typ: QidType::DIR, version: 0, path: 1 }).unwrap();
        conn.get_mut(0).unwrap().open_mode = Some(om::OREAD);

        // A count too small for both records must yield only the first,
        // never a partial record.
        let r1 = dispatch_once(&fs, no_auth(), &mut conn, msg(1, Fcall::Tread { fid: 0, offset: 0, count: 100 }), "t");
        let first_len = match r1.body {
            Fcall::Rread { data } => data.data().len(),
            other => panic!("expected Rread, got {:?}", other),
        };
        assert!(first_len > 0 && first_len <= 100);
        let diroffset = conn.get(0).unwrap().diroffset;
        assert_eq!(diroffset as usize, first_len);
        assert_eq!(conn.get(0).unwrap().dir_pos, 1);

        // Out-of-sequence offset must fail.
        let r2 = dispatch_once(&fs, no_auth(), &mut conn, msg(2, Fcall::Tread { fid: 0, offset: 0, count: 100 }), "t");
        assert!(matches!(r2.body, Fcall::Rerror { .. }));

        // The sequential offset must succeed and return the second record.
        let r3 = dispatch_once(&fs, no_auth(), &mut conn, msg(3, Fcall::Tread { fid: 0, offset: diroffset, count: 100 }), "t");
        let second_len = match r3.body {
            Fcall::Rread { data } => data.data().len(),
            other => panic!("expected Rread, got {:?}", other),
        };
        assert!(second_len > 0);
        let diroffset2 = conn.get(0).unwrap().diroffset;
        assert_eq!(conn.get(0).unwrap().dir_pos, 2);

        // The listing is now exhausted; a further sequential read is empty.
        let r4 = dispatch_once(&fs, no_auth(), &mut conn, msg(4, Fcall::Tread { fid: 0, offset: diroffset2, count: 100 }), "t");
        match r4.body {
            Fcall::Rread { data } => assert_eq!(data.data().len(), 0),
            other => panic!("expected empty Rread, got {:?}", other),
        }
    }

    #[test]
    fn read_on_unopened_fid_is_rejected() {
        struct DirFs;
        impl Filesystem for DirFs {
            fn rattach(&mut self, _: &Req) -> Result<Fcall> {
                Ok(Fcall::Rattach { qid: Qid { typ: QidType::DIR, version: 0, path: 1 } })
            }
        }
        let fs = Mutex::new(DirFs);
        let mut conn = Connection::new();
        conn.version_done = true;
        conn.new_fid(0, Qid { typ: QidType::DIR, version: 0, path: 1 }).unwrap();

        let r = dispatch_once(&fs, no_auth(), &mut conn, msg(1, Fcall::Tread { fid: 0, offset: 0, count: 10 }), "t");
        assert!(matches!(r.body, Fcall::Rerror { .. }));
    }

    #[test]
    fn tauth_without_authfs_errors() {
        let fs = Mutex::new(Echo);
        let mut conn = Connection::new();
        conn.version_done = true;
        let r = dispatch_once(
            &fs,
            no_auth(),
            &mut conn,
            msg(1, Fcall::Tauth { afid: 0, uname: "glenda".into(), aname: "".into(), n_uname: UIDUNDEF }),
            "t",
        );
        assert!(matches!(r.body, Fcall::Rerror { .. }));
    }

    #[test]
    fn tauth_then_tattach_with_matching_uname_succeeds() {
        let fs = Mutex::new(Echo);
        let mut conn = Connection::new();
        conn.version_done = true;
        let mut auth = NullAuth::default();

        let r1 = dispatch_once(
            &fs,
            Some(&mut auth),
            &mut conn,
            msg(1, Fcall::Tauth { afid: 0, uname: "glenda".into(), aname: "".into(), n_uname: UIDUNDEF }),
            "t",
        );
        assert!(matches!(r1.body, Fcall::Rauth { .. }));

        let r2 = dispatch_once(
            &fs,
            Some(&mut auth),
            &mut conn,
            msg(2, Fcall::Tattach { fid: 1, afid: 0, uname: "glenda".into(), aname: "".into(), n_uname: UIDUNDEF }),
            "t",
        );
        assert!(matches!(r2.body, Fcall::Rattach { .. }));
    }

    #[test]
    fn tattach_without_afid_rejected_when_auth_required() {
        let fs = Mutex::new(Echo);
        let mut conn = Connection::new();
        conn.version_done = true;
        let mut auth = NullAuth::default();
        let r = dispatch_once(
            &fs,
            Some(&mut auth),
            &mut conn,
            msg(1, Fcall::Tattach { fid: 1, afid: NOFID, uname: "glenda".into(), aname: "".into(), n_uname: UIDUNDEF }),
            "t",
        );
        assert!(matches!(r.body, Fcall::Rerror { .. }));
    }
}

//! End-to-end exercise of the wire protocol: a real Unix-domain socket,
//! a `Server` running a tiny in-memory back end on one thread, and a
//! `Client` driving `login`/`create`/`write`/`read`/`ls` on another.

use std::collections::HashMap;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

use p9::{Client, Credentials, Fcall, Filesystem, Qid, QidType, Req, Result};

struct OneFile {
    data: Vec<u8>,
    fid_at_root: HashMap<u32, bool>,
}

const ROOT_QID: Qid = Qid { typ: QidType::DIR, version: 0, path: 1 };
const FILE_QID: Qid = Qid { typ: QidType::FILE, version: 0, path: 2 };

impl OneFile {
    fn new() -> OneFile {
        OneFile { data: Vec::new(), fid_at_root: HashMap::new() }
    }

    fn fid_of(req: &Req) -> u32 {
        match req.ifcall {
            Fcall::Tattach { fid, .. } => *fid,
            Fcall::Twalk { fid, .. } => *fid,
            Fcall::Topen { fid, .. } => *fid,
            Fcall::Tcreate { fid, .. } => *fid,
            Fcall::Tread { fid, .. } => *fid,
            Fcall::Twrite { fid, .. } => *fid,
            Fcall::Tclunk { fid } => *fid,
            Fcall::Tstat { fid } => *fid,
            _ => unreachable!(),
        }
    }
}

impl Filesystem for OneFile {
    fn rattach(&mut self, req: &Req) -> Result<Fcall> {
        self.fid_at_root.insert(Self::fid_of(req), true);
        Ok(Fcall::Rattach { qid: ROOT_QID })
    }

    fn rwalk(&mut self, req: &Req) -> Result<Fcall> {
        let (fid, newfid, wnames) = match req.ifcall {
            Fcall::Twalk { fid, newfid, wnames } => (*fid, *newfid, wnames),
            _ => unreachable!(),
        };
        let at_root = self.fid_at_root.get(&fid).copied().unwrap_or(false);
        self.fid_at_root.insert(newfid, at_root);
        Ok(Fcall::Rwalk { wqids: Vec::new() })
    }

    fn ropen(&mut self, req: &Req) -> Result<Fcall> {
        let fid = Self::fid_of(req);
        let at_root = self.fid_at_root.get(&fid).copied().unwrap_or(false);
        let qid = if at_root { ROOT_QID } else { FILE_QID };
        Ok(Fcall::Ropen { qid, iounit: 0 })
    }

    fn rcreate(&mut self, req: &Req) -> Result<Fcall> {
        let fid = Self::fid_of(req);
        self.fid_at_root.insert(fid, false);
        Ok(Fcall::Rcreate { qid: FILE_QID, iounit: 0 })
    }

    fn rread(&mut self, req: &Req) -> Result<Fcall> {
        let (offset, count) = match req.ifcall {
            Fcall::Tread { offset, count, .. } => (*offset, *count),
            _ => unreachable!(),
        };
        let start = (offset as usize).min(self.data.len());
        let end = (start + count as usize).min(self.data.len());
        Ok(Fcall::Rread { data: p9::Data::new(self.data[start..end].to_vec()) })
    }

    fn rwrite(&mut self, req: &Req) -> Result<Fcall> {
        let (offset, data) = match req.ifcall {
            Fcall::Twrite { offset, data, .. } => (*offset, data),
            _ => unreachable!(),
        };
        let start = offset as usize;
        if start + data.data().len() > self.data.len() {
            self.data.resize(start + data.data().len(), 0);
        }
        self.data[start..start + data.data().len()].copy_from_slice(data.data());
        Ok(Fcall::Rwrite { count: data.data().len() as u32 })
    }
}

#[test]
fn login_create_write_read_roundtrip() {
    let (client_sock, server_sock) = UnixStream::pair().expect("socketpair");

    let server = thread::spawn(move || {
        let mut conn = p9::Connection::new();
        let fs = std::sync::Mutex::new(OneFile::new());
        let mut stream = server_sock;
        loop {
            let msg = match p9::read_msg(&mut stream, conn.dotu) {
                Ok(m) => m,
                Err(_) => break,
            };
            let reply = p9::dispatch_once(&fs, None, &mut conn, msg, "test");
            if p9::write_msg(&mut stream, &reply, conn.dotu).is_err() {
                break;
            }
            if conn.closing {
                break;
            }
        }
    });

    let mut client = Client::new(client_sock);
    let creds = Credentials { user: "glenda".to_owned(), passwd: String::new(), authmode: "none".to_owned() };
    client.login(&creds, "", 8192).expect("login");

    let (fid, _qid) = client.walk("").expect("walk");
    client.create(fid, "greeting", 0o644, p9::om::ORDWR).expect("create");

    let written = client.write(fid, 0, b"hello, 9p").expect("write");
    assert_eq!(written, 9);

    let read_back = client.read(fid, 0, 9).expect("read");
    assert_eq!(&read_back, b"hello, 9p");

    client.close(fid).expect("clunk");
    drop(client);

    // The server thread exits once the client drops its socket half, which
    // yields a read error and breaks its loop.
    thread::sleep(Duration::from_millis(50));
    server.join().expect("server thread panicked");
}

//! A tree that lives entirely in memory, exported over 9P2000(.u).
//!
//! Grounded on the teacher's `unpfs` example (path-per-fid bookkeeping,
//! `main` shape) but reworked against the crate's current `Filesystem`
//! trait, which owns no fid state itself -- the back end tracks fid to
//! inode mappings on its own.

use std::collections::BTreeMap;
use std::collections::HashMap;

use clap::Parser;
use log::info;

use p9::{self, error, Config, Data, DirMode, Fcall, Filesystem, Qid, QidType, Req, Stat};

const ROOT_INO: u64 = 1;

enum Node {
    Dir(BTreeMap<String, u64>),
    File(Vec<u8>),
}

struct Inode {
    node: Node,
    name: String,
    uid: String,
    gid: String,
}

impl Inode {
    fn qid(&self, ino: u64) -> Qid {
        let typ = match self.node {
            Node::Dir(_) => QidType::DIR,
            Node::File(_) => QidType::FILE,
        };
        Qid { typ, version: 0, path: ino }
    }

    fn stat(&self, ino: u64) -> Stat {
        let (mode, length) = match &self.node {
            Node::Dir(_) => (DirMode::DIR.bits() | 0o755, 0),
            Node::File(data) => (0o644, data.len() as u64),
        };
        Stat {
            typ: 0,
            dev: 0,
            qid: self.qid(ino),
            mode,
            atime: 0,
            mtime: 0,
            length,
            name: self.name.clone(),
            uid: self.uid.clone(),
            gid: self.gid.clone(),
            muid: self.uid.clone(),
            extension: String::new(),
            n_uid: 0,
            n_gid: 0,
            n_muid: 0,
        }
    }
}

/// Per-fid bookkeeping: which inode the fid currently names.
#[derive(Default)]
struct FidState {
    ino: u64,
}

struct MemFs {
    inodes: HashMap<u64, Inode>,
    next_ino: u64,
    fids: HashMap<u32, FidState>,
}

impl MemFs {
    fn new() -> MemFs {
        let mut inodes = HashMap::new();
        inodes.insert(
            ROOT_INO,
            Inode { node: Node::Dir(BTreeMap::new()), name: "/".to_owned(), uid: "glenda".to_owned(), gid: "glenda".to_owned() },
        );
        MemFs { inodes, next_ino: ROOT_INO + 1, fids: HashMap::new() }
    }

    fn fresh_ino(&mut self) -> u64 {
        let ino = self.next_ino;
        self.next_ino += 1;
        ino
    }

    fn fid_of(&self, req: &Req) -> Option<u32> {
        match req.ifcall {
            Fcall::Tattach { fid, .. } => Some(*fid),
            Fcall::Twalk { fid, .. } => Some(*fid),
            Fcall::Topen { fid, .. } => Some(*fid),
            Fcall::Tcreate { fid, .. } => Some(*fid),
            Fcall::Tread { fid, .. } => Some(*fid),
            Fcall::Twrite { fid, .. } => Some(*fid),
            Fcall::Tclunk { fid } => Some(*fid),
            Fcall::Tremove { fid } => Some(*fid),
            Fcall::Tstat { fid } => Some(*fid),
            Fcall::Twstat { fid, .. } => Some(*fid),
            _ => None,
        }
    }

    fn ino_of(&self, fid: u32) -> p9::Result<u64> {
        self.fids.get(&fid).map(|s| s.ino).ok_or_else(|| error::string::EUNKNOWNFID.into())
    }
}

impl Filesystem for MemFs {
    fn rattach(&mut self, req: &Req) -> p9::Result<Fcall> {
        let fid = self.fid_of(req).unwrap();
        self.fids.insert(fid, FidState { ino: ROOT_INO });
        Ok(Fcall::Rattach { qid: self.inodes[&ROOT_INO].qid(ROOT_INO) })
    }

    fn rwalk(&mut self, req: &Req) -> p9::Result<Fcall> {
        let (fid, newfid, wnames) = match req.ifcall {
            Fcall::Twalk { fid, newfid, wnames } => (*fid, *newfid, wnames),
            _ => unreachable!(),
        };
        let mut cur = self.ino_of(fid)?;
        let mut wqids = Vec::new();

        for name in wnames {
            let next = match &self.inodes[&cur].node {
                Node::Dir(children) => children.get(name).copied(),
                Node::File(_) => None,
            };
            match next {
                Some(ino) => {
                    wqids.push(self.inodes[&ino].qid(ino));
                    cur = ino;
                }
                None => break,
            }
        }

        if wqids.len() == wnames.len() {
            self.fids.insert(newfid, FidState { ino: cur });
        }
        Ok(Fcall::Rwalk { wqids })
    }

    fn ropen(&mut self, req: &Req) -> p9::Result<Fcall> {
        let fid = self.fid_of(req).unwrap();
        let ino = self.ino_of(fid)?;
        Ok(Fcall::Ropen { qid: self.inodes[&ino].qid(ino), iounit: 0 })
    }

    fn rcreate(&mut self, req: &Req) -> p9::Result<Fcall> {
        let (fid, name, perm) = match req.ifcall {
            Fcall::Tcreate { fid, name, perm, .. } => (*fid, name.clone(), *perm),
            _ => unreachable!(),
        };
        let dir_ino = self.ino_of(fid)?;
        let ino = self.fresh_ino();
        let is_dir = DirMode::from_bits_truncate(perm).contains(DirMode::DIR);
        let node = if is_dir { Node::Dir(BTreeMap::new()) } else { Node::File(Vec::new()) };
        self.inodes.insert(ino, Inode { node, name: name.clone(), uid: "glenda".to_owned(), gid: "glenda".to_owned() });

        match &mut self.inodes.get_mut(&dir_ino).unwrap().node {
            Node::Dir(children) => {
                children.insert(name, ino);
            }
            Node::File(_) => return Err(error::string::ECREATENONDIR.into()),
        }

        self.fids.insert(fid, FidState { ino });
        Ok(Fcall::Rcreate { qid: self.inodes[&ino].qid(ino), iounit: 0 })
    }

    fn rreaddir(&mut self, req: &Req) -> p9::Result<Vec<Stat>> {
        let fid = self.fid_of(req).unwrap();
        let ino = self.ino_of(fid)?;
        match &self.inodes[&ino].node {
            Node::Dir(children) => Ok(children
                .values()
                .map(|child_ino| self.inodes[child_ino].stat(*child_ino))
                .collect()),
            Node::File(_) => Err(error::string::ENOTDIR.into()),
        }
    }

    fn rread(&mut self, req: &Req) -> p9::Result<Fcall> {
        let (fid, offset, count) = match req.ifcall {
            Fcall::Tread { fid, offset, count } => (*fid, *offset, *count),
            _ => unreachable!(),
        };
        let ino = self.ino_of(fid)?;

        let bytes = match &self.inodes[&ino].node {
            Node::File(data) => {
                let start = (offset as usize).min(data.len());
                let end = (start + count as usize).min(data.len());
                data[start..end].to_vec()
            }
            Node::Dir(_) => return Err(error::string::EPERM.into()),
        };

        Ok(Fcall::Rread { data: Data::new(bytes) })
    }

    fn rwrite(&mut self, req: &Req) -> p9::Result<Fcall> {
        let (fid, offset, data) = match req.ifcall {
            Fcall::Twrite { fid, offset, data } => (*fid, *offset, data),
            _ => unreachable!(),
        };
        let ino = self.ino_of(fid)?;
        match &mut self.inodes.get_mut(&ino).unwrap().node {
            Node::File(buf) => {
                let start = offset as usize;
                if start + data.data().len() > buf.len() {
                    buf.resize(start + data.data().len(), 0);
                }
                buf[start..start + data.data().len()].copy_from_slice(data.data());
                Ok(Fcall::Rwrite { count: data.data().len() as u32 })
            }
            Node::Dir(_) => Err(error::string::EPERM.into()),
        }
    }

    fn rclunk(&mut self, req: &Req) -> p9::Result<Fcall> {
        if let Some(fid) = self.fid_of(req) {
            self.fids.remove(&fid);
        }
        Ok(Fcall::Rclunk)
    }

    fn rremove(&mut self, req: &Req) -> p9::Result<Fcall> {
        let fid = self.fid_of(req).unwrap();
        let ino = self.ino_of(fid)?;
        if ino == ROOT_INO {
            return Err(error::string::EPERM_RMROOT.into());
        }
        let name = self.inodes[&ino].name.clone();
        for inode in self.inodes.values_mut() {
            if let Node::Dir(children) = &mut inode.node {
                children.remove(&name);
            }
        }
        self.inodes.remove(&ino);
        self.fids.remove(&fid);
        Ok(Fcall::Rremove)
    }

    fn rstat(&mut self, req: &Req) -> p9::Result<Fcall> {
        let fid = self.fid_of(req).unwrap();
        let ino = self.ino_of(fid)?;
        Ok(Fcall::Rstat { stat: self.inodes[&ino].stat(ino) })
    }

    fn rwstat(&mut self, req: &Req) -> p9::Result<Fcall> {
        let (fid, stat) = match req.ifcall {
            Fcall::Twstat { fid, stat } => (*fid, stat),
            _ => unreachable!(),
        };
        let ino = self.ino_of(fid)?;
        if !stat.name.is_empty() {
            self.inodes.get_mut(&ino).unwrap().name = stat.name.clone();
        }
        Ok(Fcall::Rwstat)
    }
}

fn main() {
    env_logger::init();
    let cfg = Config::parse();

    info!("memfs listening on {}", cfg.listen_spec());
    let server = p9::Server::bind(MemFs::new(), &cfg.listen_spec()).expect("bind failed");
    let mut server = server.with_msize(cfg.msize).with_dotu(cfg.dotu);
    server.serve().expect("server loop failed");
}

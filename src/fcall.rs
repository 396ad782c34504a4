//! Data types and constants used by the 9P2000(.u) protocol.

use bitflags::bitflags;
use enum_primitive::enum_from_primitive;

/// Size of the fixed part of every message header: size[4] type[1] tag[2].
pub const IOHDRSZ: u32 = 24;
/// Tag value meaning "no tag", used only in `Tversion`/`Rversion`.
pub const NOTAG: u16 = 0xFFFF;
/// Fid value meaning "no fid", used when a connection has no auth channel.
pub const NOFID: u32 = 0xFFFFFFFF;
/// Sentinel numeric uid/errno meaning "undefined", per the `.u` extension.
pub const ERRUNDEF: u32 = 0xFFFFFFFF;
/// Alias of `ERRUNDEF` used where the numeric field in question is a uid.
pub const UIDUNDEF: u32 = 0xFFFFFFFF;

/// Version string for plain 9P2000.
pub const VERSION_9P: &str = "9P2000";
/// Version string for the Unix (`.u`) extension.
pub const VERSION_9P_U: &str = "9P2000.u";

bitflags! {
    /// Bits in `Qid.typ`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct QidType: u8 {
        /// Type bit for directories.
        const DIR     = 0x80;
        /// Type bit for append-only files.
        const APPEND  = 0x40;
        /// Type bit for exclusive-use files.
        const EXCL    = 0x20;
        /// Type bit for mounted channels.
        const MOUNT   = 0x10;
        /// Type bit for authentication files.
        const AUTH    = 0x08;
        /// Type bit for non-backed-up files.
        const TMP     = 0x04;
        /// Type bit for symbolic links (`.u` extension).
        const SYMLINK = 0x02;
        /// Plain file.
        const FILE    = 0x00;
    }
}

bitflags! {
    /// Bits in `Stat.mode`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct DirMode: u32 {
        /// Mode bit for directories.
        const DIR       = 0x8000_0000;
        /// Mode bit for append-only files.
        const APPEND    = 0x4000_0000;
        /// Mode bit for exclusive-use files.
        const EXCL      = 0x2000_0000;
        /// Mode bit for mounted channels.
        const MOUNT     = 0x1000_0000;
        /// Mode bit for authentication files.
        const AUTH      = 0x0800_0000;
        /// Mode bit for non-backed-up files.
        const TMP       = 0x0400_0000;
        /// Mode bit for symbolic links (`.u` extension).
        const SYMLINK   = 0x0200_0000;
        /// Mode bit for devices (`.u` extension).
        const DEVICE    = 0x0080_0000;
        /// Mode bit for named pipes (`.u` extension).
        const NAMEDPIPE = 0x0020_0000;
        /// Mode bit for sockets (`.u` extension).
        const SOCKET    = 0x0010_0000;
        /// setuid bit (`.u` extension).
        const SETUID    = 0x0008_0000;
        /// setgid bit (`.u` extension).
        const SETGID    = 0x0004_0000;
        /// Owner read permission.
        const OREAD     = 0o400;
        /// Owner write permission.
        const OWRITE    = 0o200;
        /// Owner execute permission.
        const OEXEC     = 0o100;
        /// Group read permission.
        const GREAD     = 0o040;
        /// Group write permission.
        const GWRITE    = 0o020;
        /// Group execute permission.
        const GEXEC     = 0o010;
        /// Other read permission.
        const READ      = 0o004;
        /// Other write permission.
        const WRITE     = 0o002;
        /// Other execute permission.
        const EXEC      = 0o001;
    }
}

/// Mode values for `Topen`/`Tcreate` (low two bits select the access mode,
/// `OTRUNC`/`ORCLOSE` are independent flag bits ORed in).
pub mod om {
    pub const OREAD: u8 = 0;
    pub const OWRITE: u8 = 1;
    pub const ORDWR: u8 = 2;
    pub const OEXEC: u8 = 3;
    /// Mask selecting the access-mode bits above.
    pub const MODE_MASK: u8 = 0x03;
    /// Truncate file on open.
    pub const OTRUNC: u8 = 0x10;
    /// Remove on clunk.
    pub const ORCLOSE: u8 = 0x40;
}

/// Server-side handle for path tracking: the server's unique identification
/// for the file being accessed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Qid {
    /// Whether the file is a directory, append-only file, etc.
    pub typ: QidType,
    /// Version number for a file; incremented each time the file is modified.
    pub version: u32,
    /// An integer unique among all files in the hierarchy.
    pub path: u64,
}

/// Namespace metadata (roughly a Unix `stat`), the `.u` fields included.
///
/// Named `Dir` in Plan 9's `libc.h`; kept as `Stat` here to match the
/// `Tstat`/`Rstat` message names it is carried in.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stat {
    /// Server type.
    pub typ: u16,
    /// Server subtype.
    pub dev: u32,
    /// Unique id from the server.
    pub qid: Qid,
    /// Permissions and type bits, see `DirMode`.
    pub mode: u32,
    /// Last read time.
    pub atime: u32,
    /// Last write time.
    pub mtime: u32,
    /// File length.
    pub length: u64,
    /// Last element of the path.
    pub name: String,
    /// Owner name.
    pub uid: String,
    /// Group name.
    pub gid: String,
    /// Name of the last user to modify the file.
    pub muid: String,
    /// `.u` extension: symlink target, or "device type major,minor" for
    /// device files. Empty when the connection did not negotiate `.u`.
    pub extension: String,
    /// `.u` extension: numeric uid, or `UIDUNDEF`.
    pub n_uid: u32,
    /// `.u` extension: numeric gid, or `UIDUNDEF`.
    pub n_gid: u32,
    /// `.u` extension: numeric muid, or `UIDUNDEF`.
    pub n_muid: u32,
}

impl Stat {
    /// `ls -l`-style rendering of this record, e.g. `-rw-r--r-- alice alice 123 name`.
    pub fn to_long_string(&self) -> String {
        format!(
            "{} {:<8} {:<8} {:>8} {}",
            modetostr(self.mode),
            self.uid,
            self.gid,
            self.length,
            self.name,
        )
    }
}

/// Payload of `Rread`/`Twrite`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Data(Vec<u8>);

impl Data {
    pub fn new(v: Vec<u8>) -> Data { Data(v) }
    pub fn data(&self) -> &[u8] { &self.0 }
    pub fn into_vec(self) -> Vec<u8> { self.0 }
}

enum_from_primitive! {
    /// Message type, one byte on the wire.
    #[repr(u8)]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub enum MsgType {
        Tversion =  100,
        Rversion,
        Tauth =     102,
        Rauth,
        Tattach =   104,
        Rattach,
        // Illegal, never sent.
        Terror =    106,
        Rerror,
        Tflush =    108,
        Rflush,
        Twalk =     110,
        Rwalk,
        Topen =     112,
        Ropen,
        Tcreate =   114,
        Rcreate,
        Tread =     116,
        Rread,
        Twrite =    118,
        Rwrite,
        Tclunk =    120,
        Rclunk,
        Tremove =   122,
        Rremove,
        Tstat =     124,
        Rstat,
        Twstat =    126,
        Rwstat,
    }
}

/// Envelope for a 9P message.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Msg {
    /// Chosen by the client to identify the message; the reply carries the
    /// same tag.
    pub tag: u16,
    /// The message itself.
    pub body: Fcall,
}

/// The various 9P2000(.u) messages.
///
/// `Tauth`/`Tattach` carry `n_uname`, `Tcreate` carries `extension`, and
/// `Rerror` carries `errno`; all three are meaningful only when the
/// connection negotiated `.u` and are `UIDUNDEF`/empty/`ERRUNDEF` otherwise.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Fcall {
    Tversion { msize: u32, version: String },
    Rversion { msize: u32, version: String },
    Tauth { afid: u32, uname: String, aname: String, n_uname: u32 },
    Rauth { aqid: Qid },
    Rerror { ename: String, errno: u32 },
    Tflush { oldtag: u16 },
    Rflush,
    Tattach { fid: u32, afid: u32, uname: String, aname: String, n_uname: u32 },
    Rattach { qid: Qid },
    Twalk { fid: u32, newfid: u32, wnames: Vec<String> },
    Rwalk { wqids: Vec<Qid> },
    Topen { fid: u32, mode: u8 },
    Ropen { qid: Qid, iounit: u32 },
    Tcreate { fid: u32, name: String, perm: u32, mode: u8, extension: String },
    Rcreate { qid: Qid, iounit: u32 },
    Tread { fid: u32, offset: u64, count: u32 },
    Rread { data: Data },
    Twrite { fid: u32, offset: u64, data: Data },
    Rwrite { count: u32 },
    Tclunk { fid: u32 },
    Rclunk,
    Tremove { fid: u32 },
    Rremove,
    Tstat { fid: u32 },
    Rstat { stat: Stat },
    Twstat { fid: u32, stat: Stat },
    Rwstat,
}

impl Fcall {
    /// The `MsgType` this variant is carried as on the wire.
    pub fn msg_type(&self) -> MsgType {
        match *self {
            Fcall::Tversion { .. } => MsgType::Tversion,
            Fcall::Rversion { .. } => MsgType::Rversion,
            Fcall::Tauth { .. } => MsgType::Tauth,
            Fcall::Rauth { .. } => MsgType::Rauth,
            Fcall::Rerror { .. } => MsgType::Rerror,
            Fcall::Tflush { .. } => MsgType::Tflush,
            Fcall::Rflush => MsgType::Rflush,
            Fcall::Tattach { .. } => MsgType::Tattach,
            Fcall::Rattach { .. } => MsgType::Rattach,
            Fcall::Twalk { .. } => MsgType::Twalk,
            Fcall::Rwalk { .. } => MsgType::Rwalk,
            Fcall::Topen { .. } => MsgType::Topen,
            Fcall::Ropen { .. } => MsgType::Ropen,
            Fcall::Tcreate { .. } => MsgType::Tcreate,
            Fcall::Rcreate { .. } => MsgType::Rcreate,
            Fcall::Tread { .. } => MsgType::Tread,
            Fcall::Rread { .. } => MsgType::Rread,
            Fcall::Twrite { .. } => MsgType::Twrite,
            Fcall::Rwrite { .. } => MsgType::Rwrite,
            Fcall::Tclunk { .. } => MsgType::Tclunk,
            Fcall::Rclunk => MsgType::Rclunk,
            Fcall::Tremove { .. } => MsgType::Tremove,
            Fcall::Rremove => MsgType::Rremove,
            Fcall::Tstat { .. } => MsgType::Tstat,
            Fcall::Rstat { .. } => MsgType::Rstat,
            Fcall::Twstat { .. } => MsgType::Twstat,
            Fcall::Rwstat => MsgType::Rwstat,
        }
    }

    /// True for every `T`-message (client to server).
    pub fn is_treq(&self) -> bool {
        (self.msg_type() as u8) % 2 == 0
    }
}

/// Translate an open mode (`om::OREAD` etc.) into the `DirMode` access bits
/// it requires, as Plan 9's `otoa` table does.
pub fn otoa(mode: u8) -> DirMode {
    match mode & om::MODE_MASK {
        om::OREAD => DirMode::READ,
        om::OWRITE => DirMode::WRITE,
        om::ORDWR => DirMode::READ | DirMode::WRITE,
        om::OEXEC => DirMode::EXEC,
        _ => unreachable!("mode & MODE_MASK is in 0..=3"),
    }
}

/// Alias of [`otoa`] kept under its original name for call sites that check
/// an open request against a file's stat record.
pub fn open2stat(mode: u8) -> DirMode {
    otoa(mode)
}

/// Whether `uid`/`gid` has `access` permission (`DirMode::READ`/`WRITE`/`EXEC`,
/// as returned by [`otoa`]) on a file owned by `fuid`/`fgid` with mode `fmode`.
pub fn hasperm(fmode: DirMode, fuid: &str, fgid: &str, uid: &str, gid: &str, access: DirMode) -> bool {
    let bits = access.bits();
    let shifted = if uid == fuid {
        (fmode.bits() >> 6) & 0o7
    } else if gid == fgid {
        (fmode.bits() >> 3) & 0o7
    } else {
        fmode.bits() & 0o7
    };
    shifted & bits == bits
}

/// Convert a Unix `mode_t` (as returned by `stat(2)`) into the permission and
/// type bits of a 9P `Stat.mode`.
pub fn mode2stat(unix_mode: u32) -> u32 {
    const S_IFMT: u32 = 0o170000;
    const S_IFDIR: u32 = 0o040000;
    const S_IFLNK: u32 = 0o120000;

    let mut m = unix_mode & 0o777;
    if unix_mode & S_IFMT == S_IFDIR {
        m |= DirMode::DIR.bits();
    }
    if unix_mode & S_IFMT == S_IFLNK {
        m |= DirMode::SYMLINK.bits();
    }
    if unix_mode & 0o4000 != 0 {
        m |= DirMode::SETUID.bits();
    }
    if unix_mode & 0o2000 != 0 {
        m |= DirMode::SETGID.bits();
    }
    m
}

/// `ls -l`-style permission string for a `Stat.mode` value, e.g. `drwxr-xr-x`.
pub fn modetostr(mode: u32) -> String {
    let mut s = String::with_capacity(10);
    s.push(if mode & DirMode::DIR.bits() != 0 {
        'd'
    } else if mode & DirMode::SYMLINK.bits() != 0 {
        'l'
    } else {
        '-'
    });
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otoa_table() {
        assert_eq!(otoa(om::OREAD), DirMode::READ);
        assert_eq!(otoa(om::OWRITE), DirMode::WRITE);
        assert_eq!(otoa(om::ORDWR), DirMode::READ | DirMode::WRITE);
        assert_eq!(otoa(om::OEXEC), DirMode::EXEC);
    }

    #[test]
    fn modetostr_dir_rwxr_xr_x() {
        let mode = DirMode::DIR.bits() | 0o755;
        assert_eq!(modetostr(mode), "drwxr-xr-x");
    }

    #[test]
    fn hasperm_owner_group_other() {
        let mode = DirMode::from_bits_truncate(0o640);
        assert!(hasperm(mode, "alice", "staff", "alice", "staff", DirMode::WRITE));
        assert!(hasperm(mode, "alice", "staff", "bob", "staff", DirMode::READ));
        assert!(!hasperm(mode, "alice", "staff", "bob", "staff", DirMode::WRITE));
        assert!(!hasperm(mode, "alice", "staff", "eve", "other", DirMode::READ));
    }

    #[test]
    fn mode2stat_dir_bit() {
        assert_eq!(mode2stat(0o040755) & DirMode::DIR.bits(), DirMode::DIR.bits());
        assert_eq!(mode2stat(0o040755) & 0o777, 0o755);
    }
}

//! Serialize and deserialize 9P messages into and from binary.
//!
//! Most types encode the same regardless of whether the connection
//! negotiated `.u`; `Stat` and `Msg` take an explicit `dotu` flag because
//! their wire shape grows extra fields under the extension. `Stat` also
//! takes an explicit `enclen` flag: `Rstat`/`Twstat` wrap the record in an
//! outer total-length prefix, but a directory read's byte stream does not,
//! and that difference is a framing decision the caller makes, not something
//! derivable from the message type alone.

use std::io::{self, Cursor, Read, Write};
use std::mem;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_traits::FromPrimitive;

use crate::fcall::*;

fn read_exact<R: Read>(r: &mut R, size: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0; size];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// A type that can be serialized into a 9P byte stream.
pub trait Encodable {
    /// Writes `self` to `w`, returning the number of bytes written.
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize>;
}

/// A type that can be deserialized from a 9P byte stream.
pub trait Decodable: Sized {
    fn decode<R: ReadBytesExt>(r: &mut R) -> io::Result<Self>;
}

impl Encodable for u8 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        w.write_u8(*self)?;
        Ok(mem::size_of::<Self>())
    }
}

impl Decodable for u8 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> io::Result<Self> {
        r.read_u8()
    }
}

impl Encodable for u16 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        w.write_u16::<LittleEndian>(*self)?;
        Ok(mem::size_of::<Self>())
    }
}

impl Decodable for u16 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> io::Result<Self> {
        r.read_u16::<LittleEndian>()
    }
}

impl Encodable for u32 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        w.write_u32::<LittleEndian>(*self)?;
        Ok(mem::size_of::<Self>())
    }
}

impl Decodable for u32 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> io::Result<Self> {
        r.read_u32::<LittleEndian>()
    }
}

impl Encodable for u64 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        w.write_u64::<LittleEndian>(*self)?;
        Ok(mem::size_of::<Self>())
    }
}

impl Decodable for u64 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> io::Result<Self> {
        r.read_u64::<LittleEndian>()
    }
}

impl Encodable for String {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        let mut bytes = (self.len() as u16).encode(w)?;
        w.write_all(self.as_bytes())?;
        bytes += self.len();
        Ok(bytes)
    }
}

impl Decodable for String {
    fn decode<R: ReadBytesExt>(r: &mut R) -> io::Result<Self> {
        let len: u16 = Decodable::decode(r)?;
        let buf = read_exact(r, len as usize)?;
        String::from_utf8(buf).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid UTF-8 sequence"))
    }
}

impl Encodable for Qid {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        let mut bytes = self.typ.bits().encode(w)?;
        bytes += self.version.encode(w)?;
        bytes += self.path.encode(w)?;
        Ok(bytes)
    }
}

impl Decodable for Qid {
    fn decode<R: ReadBytesExt>(r: &mut R) -> io::Result<Self> {
        let typ: u8 = Decodable::decode(r)?;
        Ok(Qid {
            typ: QidType::from_bits_truncate(typ),
            version: Decodable::decode(r)?,
            path: Decodable::decode(r)?,
        })
    }
}

impl Encodable for Data {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        let size = self.data().len();
        let bytes = (size as u32).encode(w)? + size;
        w.write_all(self.data())?;
        Ok(bytes)
    }
}

impl Decodable for Data {
    fn decode<R: ReadBytesExt>(r: &mut R) -> io::Result<Self> {
        let len: u32 = Decodable::decode(r)?;
        let buf = read_exact(r, len as usize)?;
        Ok(Data::new(buf))
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> io::Result<usize> {
        let mut bytes = (self.len() as u16).encode(w)?;
        for item in self {
            bytes += item.encode(w)?;
        }
        Ok(bytes)
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn decode<R: ReadBytesExt>(r: &mut R) -> io::Result<Self> {
        let len: u16 = Decodable::decode(r)?;
        let mut buf = Vec::with_capacity(len as usize);
        for _ in 0..len {
            buf.push(Decodable::decode(r)?);
        }
        Ok(buf)
    }
}

impl Stat {
    /// Size of the encoded record, not counting the leading `u2 size` word
    /// itself (i.e. what py9p calls `statsz`).
    fn statsz(&self, dotu: bool) -> u16 {
        // typ[2] dev[4] qid[13] mode[4] atime[4] mtime[4] length[8]
        let mut n = 2 + 4 + 13 + 4 + 4 + 4 + 8;
        n += 2 + self.name.len();
        n += 2 + self.uid.len();
        n += 2 + self.gid.len();
        n += 2 + self.muid.len();
        if dotu {
            n += 2 + self.extension.len();
            n += 4 + 4 + 4;
        }
        n as u16
    }

    /// Encode this record. `enclen` controls whether the outer total-length
    /// `u2` prefix used by `Rstat`/`Twstat` is written; a directory-read byte
    /// stream concatenates records without that prefix.
    pub fn encode<W: WriteBytesExt>(&self, w: &mut W, dotu: bool, enclen: bool) -> io::Result<usize> {
        let sz = self.statsz(dotu);
        let mut bytes = 0;
        if enclen {
            bytes += (sz + 2).encode(w)?;
        }
        bytes += sz.encode(w)?;
        bytes += self.typ.encode(w)?;
        bytes += self.dev.encode(w)?;
        bytes += self.qid.encode(w)?;
        bytes += self.mode.encode(w)?;
        bytes += self.atime.encode(w)?;
        bytes += self.mtime.encode(w)?;
        bytes += self.length.encode(w)?;
        bytes += self.name.encode(w)?;
        bytes += self.uid.encode(w)?;
        bytes += self.gid.encode(w)?;
        bytes += self.muid.encode(w)?;
        if dotu {
            bytes += self.extension.encode(w)?;
            bytes += self.n_uid.encode(w)?;
            bytes += self.n_gid.encode(w)?;
            bytes += self.n_muid.encode(w)?;
        }
        Ok(bytes)
    }

    /// Decode a record previously written with `enclen: true`; directory-read
    /// streams are decoded record-by-record by callers that already know the
    /// stream length, via [`decode_nolen`](Stat::decode_nolen).
    pub fn decode<R: ReadBytesExt>(r: &mut R, dotu: bool) -> io::Result<Self> {
        let _outer_len: u16 = Decodable::decode(r)?;
        Self::decode_nolen(r, dotu)
    }

    /// Decode a record with no outer length prefix (directory-read streams).
    pub fn decode_nolen<R: ReadBytesExt>(r: &mut R, dotu: bool) -> io::Result<Self> {
        let _statsz: u16 = Decodable::decode(r)?;
        let typ = Decodable::decode(r)?;
        let dev = Decodable::decode(r)?;
        let qid = Decodable::decode(r)?;
        let mode = Decodable::decode(r)?;
        let atime = Decodable::decode(r)?;
        let mtime = Decodable::decode(r)?;
        let length = Decodable::decode(r)?;
        let name = Decodable::decode(r)?;
        let uid = Decodable::decode(r)?;
        let gid = Decodable::decode(r)?;
        let muid = Decodable::decode(r)?;
        let (extension, n_uid, n_gid, n_muid) = if dotu {
            (Decodable::decode(r)?, Decodable::decode(r)?, Decodable::decode(r)?, Decodable::decode(r)?)
        } else {
            (String::new(), UIDUNDEF, UIDUNDEF, UIDUNDEF)
        };
        Ok(Stat {
            typ, dev, qid, mode, atime, mtime, length, name, uid, gid, muid,
            extension, n_uid, n_gid, n_muid,
        })
    }
}

impl Msg {
    pub fn encode<W: WriteBytesExt>(&self, w: &mut W, dotu: bool) -> io::Result<usize> {
        let mut buf: Vec<u8> = Vec::new();
        (self.body.msg_type() as u8).encode(&mut buf)?;
        self.tag.encode(&mut buf)?;

        match &self.body {
            Fcall::Tversion { msize, version } => {
                msize.encode(&mut buf)?;
                version.encode(&mut buf)?;
            }
            Fcall::Rversion { msize, version } => {
                msize.encode(&mut buf)?;
                version.encode(&mut buf)?;
            }
            Fcall::Tauth { afid, uname, aname, n_uname } => {
                afid.encode(&mut buf)?;
                uname.encode(&mut buf)?;
                aname.encode(&mut buf)?;
                if dotu {
                    n_uname.encode(&mut buf)?;
                }
            }
            Fcall::Rauth { aqid } => {
                aqid.encode(&mut buf)?;
            }
            Fcall::Rerror { ename, errno } => {
                ename.encode(&mut buf)?;
                if dotu {
                    errno.encode(&mut buf)?;
                }
            }
            Fcall::Tflush { oldtag } => {
                oldtag.encode(&mut buf)?;
            }
            Fcall::Rflush => {}
            Fcall::Tattach { fid, afid, uname, aname, n_uname } => {
                fid.encode(&mut buf)?;
                afid.encode(&mut buf)?;
                uname.encode(&mut buf)?;
                aname.encode(&mut buf)?;
                if dotu {
                    n_uname.encode(&mut buf)?;
                }
            }
            Fcall::Rattach { qid } => {
                qid.encode(&mut buf)?;
            }
            Fcall::Twalk { fid, newfid, wnames } => {
                fid.encode(&mut buf)?;
                newfid.encode(&mut buf)?;
                wnames.encode(&mut buf)?;
            }
            Fcall::Rwalk { wqids } => {
                wqids.encode(&mut buf)?;
            }
            Fcall::Topen { fid, mode } => {
                fid.encode(&mut buf)?;
                mode.encode(&mut buf)?;
            }
            Fcall::Ropen { qid, iounit } => {
                qid.encode(&mut buf)?;
                iounit.encode(&mut buf)?;
            }
            Fcall::Tcreate { fid, name, perm, mode, extension } => {
                fid.encode(&mut buf)?;
                name.encode(&mut buf)?;
                perm.encode(&mut buf)?;
                mode.encode(&mut buf)?;
                if dotu {
                    extension.encode(&mut buf)?;
                }
            }
            Fcall::Rcreate { qid, iounit } => {
                qid.encode(&mut buf)?;
                iounit.encode(&mut buf)?;
            }
            Fcall::Tread { fid, offset, count } => {
                fid.encode(&mut buf)?;
                offset.encode(&mut buf)?;
                count.encode(&mut buf)?;
            }
            Fcall::Rread { data } => {
                data.encode(&mut buf)?;
            }
            Fcall::Twrite { fid, offset, data } => {
                fid.encode(&mut buf)?;
                offset.encode(&mut buf)?;
                data.encode(&mut buf)?;
            }
            Fcall::Rwrite { count } => {
                count.encode(&mut buf)?;
            }
            Fcall::Tclunk { fid } => {
                fid.encode(&mut buf)?;
            }
            Fcall::Rclunk => {}
            Fcall::Tremove { fid } => {
                fid.encode(&mut buf)?;
            }
            Fcall::Rremove => {}
            Fcall::Tstat { fid } => {
                fid.encode(&mut buf)?;
            }
            Fcall::Rstat { stat } => {
                stat.encode(&mut buf, dotu, true)?;
            }
            Fcall::Twstat { fid, stat } => {
                fid.encode(&mut buf)?;
                stat.encode(&mut buf, dotu, true)?;
            }
            Fcall::Rwstat => {}
        }

        let size = mem::size_of::<u32>() + buf.len();
        (size as u32).encode(w)?;
        w.write_all(&buf)?;
        Ok(size)
    }

    pub fn decode<R: ReadBytesExt>(r: &mut R, dotu: bool) -> io::Result<Self> {
        let size: u32 = Decodable::decode(r)?;
        let body_len = size.checked_sub(4).ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "message too short"))?;
        let mut buf = Cursor::new(read_exact(r, body_len as usize)?);

        let raw_type: u8 = Decodable::decode(&mut buf)?;
        let msg_type = MsgType::from_u8(raw_type)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "invalid message type"))?;
        let tag: u16 = Decodable::decode(&mut buf)?;

        let body = match msg_type {
            MsgType::Tversion => Fcall::Tversion { msize: Decodable::decode(&mut buf)?, version: Decodable::decode(&mut buf)? },
            MsgType::Rversion => Fcall::Rversion { msize: Decodable::decode(&mut buf)?, version: Decodable::decode(&mut buf)? },
            MsgType::Tauth => {
                let afid = Decodable::decode(&mut buf)?;
                let uname = Decodable::decode(&mut buf)?;
                let aname = Decodable::decode(&mut buf)?;
                let n_uname = if dotu { Decodable::decode(&mut buf)? } else { UIDUNDEF };
                Fcall::Tauth { afid, uname, aname, n_uname }
            }
            MsgType::Rauth => Fcall::Rauth { aqid: Decodable::decode(&mut buf)? },
            MsgType::Rerror => {
                let ename = Decodable::decode(&mut buf)?;
                let errno = if dotu { Decodable::decode(&mut buf)? } else { ERRUNDEF };
                Fcall::Rerror { ename, errno }
            }
            MsgType::Tflush => Fcall::Tflush { oldtag: Decodable::decode(&mut buf)? },
            MsgType::Rflush => Fcall::Rflush,
            MsgType::Tattach => {
                let fid = Decodable::decode(&mut buf)?;
                let afid = Decodable::decode(&mut buf)?;
                let uname = Decodable::decode(&mut buf)?;
                let aname = Decodable::decode(&mut buf)?;
                let n_uname = if dotu { Decodable::decode(&mut buf)? } else { UIDUNDEF };
                Fcall::Tattach { fid, afid, uname, aname, n_uname }
            }
            MsgType::Rattach => Fcall::Rattach { qid: Decodable::decode(&mut buf)? },
            MsgType::Twalk => Fcall::Twalk {
                fid: Decodable::decode(&mut buf)?,
                newfid: Decodable::decode(&mut buf)?,
                wnames: Decodable::decode(&mut buf)?,
            },
            MsgType::Rwalk => Fcall::Rwalk { wqids: Decodable::decode(&mut buf)? },
            MsgType::Topen => Fcall::Topen { fid: Decodable::decode(&mut buf)?, mode: Decodable::decode(&mut buf)? },
            MsgType::Ropen => Fcall::Ropen { qid: Decodable::decode(&mut buf)?, iounit: Decodable::decode(&mut buf)? },
            MsgType::Tcreate => {
                let fid = Decodable::decode(&mut buf)?;
                let name = Decodable::decode(&mut buf)?;
                let perm = Decodable::decode(&mut buf)?;
                let mode = Decodable::decode(&mut buf)?;
                let extension = if dotu { Decodable::decode(&mut buf)? } else { String::new() };
                Fcall::Tcreate { fid, name, perm, mode, extension }
            }
            MsgType::Rcreate => Fcall::Rcreate { qid: Decodable::decode(&mut buf)?, iounit: Decodable::decode(&mut buf)? },
            MsgType::Tread => Fcall::Tread {
                fid: Decodable::decode(&mut buf)?,
                offset: Decodable::decode(&mut buf)?,
                count: Decodable::decode(&mut buf)?,
            },
            MsgType::Rread => Fcall::Rread { data: Decodable::decode(&mut buf)? },
            MsgType::Twrite => Fcall::Twrite {
                fid: Decodable::decode(&mut buf)?,
                offset: Decodable::decode(&mut buf)?,
                data: Decodable::decode(&mut buf)?,
            },
            MsgType::Rwrite => Fcall::Rwrite { count: Decodable::decode(&mut buf)? },
            MsgType::Tclunk => Fcall::Tclunk { fid: Decodable::decode(&mut buf)? },
            MsgType::Rclunk => Fcall::Rclunk,
            MsgType::Tremove => Fcall::Tremove { fid: Decodable::decode(&mut buf)? },
            MsgType::Rremove => Fcall::Rremove,
            MsgType::Tstat => Fcall::Tstat { fid: Decodable::decode(&mut buf)? },
            MsgType::Rstat => Fcall::Rstat { stat: Stat::decode(&mut buf, dotu)? },
            MsgType::Twstat => {
                let fid = Decodable::decode(&mut buf)?;
                let stat = Stat::decode(&mut buf, dotu)?;
                Fcall::Twstat { fid, stat }
            }
            MsgType::Rwstat => Fcall::Rwstat,
            MsgType::Terror => return Err(io::Error::new(io::ErrorKind::InvalidData, "Terror is never sent on the wire")),
        };

        Ok(Msg { tag, body })
    }
}

/// Read one message from a byte-oriented stream.
pub fn read_msg<R: ReadBytesExt>(r: &mut R, dotu: bool) -> io::Result<Msg> {
    Msg::decode(r, dotu)
}

/// Write one message to a byte-oriented stream.
pub fn write_msg<W: WriteBytesExt>(w: &mut W, msg: &Msg, dotu: bool) -> io::Result<usize> {
    msg.encode(w, dotu)
}

/// Helper to serialize values into an in-memory buffer.
#[derive(Clone, Debug, Default)]
pub struct MsgEncoder {
    data: Vec<u8>,
}

impl MsgEncoder {
    pub fn new() -> MsgEncoder {
        MsgEncoder { data: Vec::new() }
    }

    pub fn get_ref(&self) -> &[u8] {
        &self.data[..]
    }

    pub fn encode<T: Encodable>(&mut self, data: &T) -> io::Result<usize> {
        data.encode(&mut self.data)
    }
}

/// Helper to deserialize values out of an in-memory buffer.
#[derive(Clone, Debug)]
pub struct MsgDecoder {
    data: Cursor<Vec<u8>>,
}

impl MsgDecoder {
    pub fn new(data: Vec<u8>) -> MsgDecoder {
        MsgDecoder { data: Cursor::new(data) }
    }

    pub fn decode<T: Decodable>(&mut self) -> io::Result<T> {
        Decodable::decode(&mut self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_test1() {
        let expected: Vec<u8> = (0..10).collect();
        let mut encoder = MsgEncoder::new();
        for i in 0..10 {
            encoder.encode(&(i as u8)).unwrap();
        }
        assert_eq!(expected, encoder.get_ref());
    }

    #[test]
    fn decoder_test1() {
        let expected: Vec<u8> = (0..10).collect();
        let mut decoder = MsgDecoder::new(expected.clone());
        let mut actual: Vec<u8> = Vec::new();
        loop {
            match decoder.decode() {
                Ok(i) => actual.push(i),
                Err(_) => break,
            }
        }
        assert_eq!(expected, actual);
    }

    #[test]
    fn msg_encode_decode_plain() {
        let expected = Msg {
            tag: 0xdead,
            body: Fcall::Rversion { msize: 40, version: "9P2000".to_owned() },
        };
        let mut buf = Vec::new();
        expected.encode(&mut buf, false).unwrap();

        let mut readbuf = Cursor::new(buf);
        let actual = Msg::decode(&mut readbuf, false).unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn msg_encode_decode_dotu_tattach() {
        let expected = Msg {
            tag: 7,
            body: Fcall::Tattach {
                fid: 1,
                afid: NOFID,
                uname: "glenda".to_owned(),
                aname: "".to_owned(),
                n_uname: 42,
            },
        };
        let mut buf = Vec::new();
        expected.encode(&mut buf, true).unwrap();

        let mut readbuf = Cursor::new(buf);
        let actual = Msg::decode(&mut readbuf, true).unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn msg_encode_decode_dotu_dropped_without_dotu() {
        // n_uname/extension/errno are only read/written when dotu is negotiated.
        let msg = Msg {
            tag: 7,
            body: Fcall::Tattach {
                fid: 1,
                afid: NOFID,
                uname: "glenda".to_owned(),
                aname: "".to_owned(),
                n_uname: 42,
            },
        };
        let mut buf = Vec::new();
        msg.encode(&mut buf, false).unwrap();

        let mut readbuf = Cursor::new(buf);
        let actual = Msg::decode(&mut readbuf, false).unwrap();
        match actual.body {
            Fcall::Tattach { n_uname, .. } => assert_eq!(n_uname, UIDUNDEF),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn serialize_rstat() {
        use std::env;
        use std::fs;
        use std::os::unix::fs::MetadataExt;
        use std::path;

        let path = path::Path::new("/tmp");
        let attr = fs::metadata(path).unwrap();
        let mut mode = attr.mode() & 0o777;
        if attr.is_dir() {
            mode |= DirMode::DIR.bits();
        }
        let qid_type = if attr.is_dir() { QidType::DIR } else { QidType::FILE };

        let user = env::var("USER").unwrap_or_else(|_| "nobody".to_owned());
        let stat = Stat {
            typ: 0,
            dev: attr.dev() as u32,
            qid: Qid { typ: qid_type, version: 0, path: attr.ino() },
            mode,
            atime: attr.atime() as u32,
            mtime: attr.mtime() as u32,
            length: attr.size(),
            name: path.file_name().unwrap().to_str().unwrap().to_owned(),
            uid: user.clone(),
            gid: user.clone(),
            muid: user,
            extension: String::new(),
            n_uid: UIDUNDEF,
            n_gid: UIDUNDEF,
            n_muid: UIDUNDEF,
        };

        let expected = Msg { tag: 1, body: Fcall::Rstat { stat } };

        let mut buf = Vec::new();
        expected.encode(&mut buf, false).unwrap();

        let mut readbuf = Cursor::new(buf);
        let actual = Msg::decode(&mut readbuf, false).unwrap();

        assert_eq!(expected, actual);
    }

    #[test]
    fn stat_directory_stream_no_outer_len() {
        let qid = Qid { typ: QidType::FILE, version: 0, path: 1 };
        let stat = Stat {
            typ: 0, dev: 0, qid, mode: 0o644,
            atime: 0, mtime: 0, length: 0,
            name: "a".to_owned(), uid: "u".to_owned(), gid: "g".to_owned(), muid: "u".to_owned(),
            extension: String::new(), n_uid: UIDUNDEF, n_gid: UIDUNDEF, n_muid: UIDUNDEF,
        };
        let mut buf = Vec::new();
        stat.encode(&mut buf, false, false).unwrap();
        let mut r = Cursor::new(buf);
        let decoded = Stat::decode_nolen(&mut r, false).unwrap();
        assert_eq!(decoded.name, "a");
    }
}

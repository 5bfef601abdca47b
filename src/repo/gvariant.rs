//! Just enough GVariant to walk an OSTree object graph.
//!
//! commit:  (a{sv}aya(say)sstayay)
//!          metadata, parent, related, subject, body, timestamp (BE),
//!          root dirtree checksum, root dirmeta checksum
//! dirtree: (a(say)a(sayay))
//!          files (name, content checksum), dirs (name, dirtree, dirmeta)
//!
//! Variable-sized members are located through framing offsets stored at the
//! end of their container: in order for arrays, reversed for structs. The
//! width of an offset depends on the container size.

use ostreehub_protocol::Checksum;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GVariantError {
    #[error("Truncated {0}")]
    Truncated(&'static str),

    #[error("Framing offset out of bounds in {0}")]
    BadOffset(&'static str),

    #[error("String not nul-terminated or not UTF-8 in {0}")]
    BadString(&'static str),

    #[error("Checksum of {0} bytes, expected 32")]
    BadChecksum(usize),
}

type Result<T> = std::result::Result<T, GVariantError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitObject {
    pub parent: Option<Checksum>,
    pub subject: String,
    pub body: String,
    pub timestamp: u64,
    pub root_tree: Checksum,
    pub root_meta: Checksum,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub tree: Checksum,
    pub meta: Checksum,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirTreeObject {
    pub files: Vec<(String, Checksum)>,
    pub dirs: Vec<DirEntry>,
}

impl CommitObject {
    pub fn parse(data: &[u8]) -> Result<Self> {
        const CTX: &str = "commit";
        let frame = Frame::new(data, 6, CTX)?;

        // a{sv} metadata ends at offset 0 and is skipped
        let parent = frame.slice(frame.offset(0)?, frame.offset(1)?)?;
        // a(say) related objects end at offset 2, skipped
        let subject = frame.slice(frame.offset(2)?, frame.offset(3)?)?;
        let body = frame.slice(frame.offset(3)?, frame.offset(4)?)?;

        let ts_start = align(frame.offset(4)?, 8);
        let ts_end = ts_start + 8;
        let contents_end = frame.offset(5)?;
        if ts_end > contents_end {
            return Err(GVariantError::Truncated(CTX));
        }
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&data[ts_start..ts_end]);

        Ok(CommitObject {
            parent: match parent.len() {
                0 => None,
                _ => Some(checksum(parent)?),
            },
            subject: string(subject, CTX)?,
            body: string(body, CTX)?,
            timestamp: u64::from_be_bytes(ts),
            root_tree: checksum(&data[ts_end..contents_end])?,
            root_meta: checksum(&data[contents_end..frame.body_end])?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::default();
        w.member(&[], 8, true); // empty a{sv}
        w.member(self.parent.as_ref().map_or(&[][..], |p| &p[..]), 1, true);
        w.member(&[], 1, true); // empty a(say)
        w.member(&nul_terminated(&self.subject), 1, true);
        w.member(&nul_terminated(&self.body), 1, true);
        w.member(&self.timestamp.to_be_bytes(), 8, false);
        w.member(&self.root_tree, 1, true);
        w.member(&self.root_meta, 1, false);
        w.finish_struct()
    }
}

impl DirTreeObject {
    pub fn parse(data: &[u8]) -> Result<Self> {
        const CTX: &str = "dirtree";
        let frame = Frame::new(data, 1, CTX)?;
        let files_end = frame.offset(0)?;

        let mut tree = DirTreeObject::default();
        for elem in array_elements(&data[..files_end], CTX)? {
            let f = Frame::new(elem, 1, CTX)?;
            let name_end = f.offset(0)?;
            tree.files.push((
                string(&elem[..name_end], CTX)?,
                checksum(&elem[name_end..f.body_end])?,
            ));
        }
        for elem in array_elements(&data[files_end..frame.body_end], CTX)? {
            let f = Frame::new(elem, 2, CTX)?;
            let name_end = f.offset(0)?;
            let tree_end = f.offset(1)?;
            tree.dirs.push(DirEntry {
                name: string(&elem[..name_end], CTX)?,
                tree: checksum(f.slice(name_end, tree_end)?)?,
                meta: checksum(&elem[tree_end..f.body_end])?,
            });
        }
        Ok(tree)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut files = Writer::default();
        for (name, sum) in &self.files {
            let mut elem = Writer::default();
            elem.member(&nul_terminated(name), 1, true);
            elem.member(sum, 1, false);
            files.member(&elem.finish_struct(), 1, true);
        }

        let mut dirs = Writer::default();
        for dir in &self.dirs {
            let mut elem = Writer::default();
            elem.member(&nul_terminated(&dir.name), 1, true);
            elem.member(&dir.tree, 1, true);
            elem.member(&dir.meta, 1, false);
            dirs.member(&elem.finish_struct(), 1, true);
        }

        let mut w = Writer::default();
        w.member(&files.finish_array(), 1, true);
        w.member(&dirs.finish_array(), 1, false);
        w.finish_struct()
    }
}

/// View over a struct whose trailing framing offsets are already known
struct Frame<'a> {
    data: &'a [u8],
    offset_size: usize,
    body_end: usize,
    ctx: &'static str,
}

impl<'a> Frame<'a> {
    fn new(data: &'a [u8], offsets: usize, ctx: &'static str) -> Result<Self> {
        let offset_size = offset_size(data.len());
        let table = offsets * offset_size;
        if data.len() < table || (offsets > 0 && data.is_empty()) {
            return Err(GVariantError::Truncated(ctx));
        }
        Ok(Frame {
            data,
            offset_size,
            body_end: data.len() - table,
            ctx,
        })
    }

    /// End of the i-th variable-sized member; struct offsets are stored
    /// last-to-first, so member 0 owns the final bytes.
    fn offset(&self, i: usize) -> Result<usize> {
        let pos = self.data.len() - (i + 1) * self.offset_size;
        let value = read_offset(self.data, pos, self.offset_size);
        if value > self.body_end {
            return Err(GVariantError::BadOffset(self.ctx));
        }
        Ok(value)
    }

    fn slice(&self, start: usize, end: usize) -> Result<&'a [u8]> {
        if start > end {
            return Err(GVariantError::BadOffset(self.ctx));
        }
        Ok(&self.data[start..end])
    }
}

/// Elements of an array of variable-sized, byte-aligned elements
fn array_elements<'a>(data: &'a [u8], ctx: &'static str) -> Result<Vec<&'a [u8]>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let size = offset_size(data.len());
    let table_start = read_offset(data, data.len() - size, size);
    if table_start > data.len() - size || (data.len() - table_start) % size != 0 {
        return Err(GVariantError::BadOffset(ctx));
    }

    let count = (data.len() - table_start) / size;
    let mut elements = Vec::with_capacity(count);
    let mut start = 0;
    for i in 0..count {
        let end = read_offset(data, table_start + i * size, size);
        if end < start || end > table_start {
            return Err(GVariantError::BadOffset(ctx));
        }
        elements.push(&data[start..end]);
        start = end;
    }
    Ok(elements)
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
    ends: Vec<usize>,
}

impl Writer {
    fn member(&mut self, bytes: &[u8], alignment: usize, framed: bool) {
        self.buf.resize(align(self.buf.len(), alignment), 0);
        self.buf.extend_from_slice(bytes);
        if framed {
            self.ends.push(self.buf.len());
        }
    }

    fn finish_struct(self) -> Vec<u8> {
        let ends: Vec<usize> = self.ends.iter().rev().copied().collect();
        self.write_offsets(&ends)
    }

    fn finish_array(mut self) -> Vec<u8> {
        let ends = std::mem::take(&mut self.ends);
        self.write_offsets(&ends)
    }

    fn write_offsets(mut self, ends: &[usize]) -> Vec<u8> {
        let size = offset_size_for(self.buf.len(), ends.len());
        for end in ends {
            self.buf.extend_from_slice(&end.to_le_bytes()[..size]);
        }
        self.buf
    }
}

fn offset_size(container_len: usize) -> usize {
    match container_len {
        0 => 0,
        n if n <= 0xff => 1,
        n if n <= 0xffff => 2,
        n if n as u64 <= 0xffff_ffff => 4,
        _ => 8,
    }
}

/// Smallest offset width that can address the finished container
fn offset_size_for(body_len: usize, offsets: usize) -> usize {
    if offsets == 0 {
        return 0;
    }
    for (size, max) in [(1usize, 0xffu64), (2, 0xffff), (4, 0xffff_ffff)] {
        if (body_len + offsets * size) as u64 <= max {
            return size;
        }
    }
    8
}

fn read_offset(data: &[u8], pos: usize, size: usize) -> usize {
    let mut buf = [0u8; 8];
    buf[..size].copy_from_slice(&data[pos..pos + size]);
    u64::from_le_bytes(buf) as usize
}

fn align(pos: usize, alignment: usize) -> usize {
    (pos + alignment - 1) & !(alignment - 1)
}

fn nul_terminated(s: &str) -> Vec<u8> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

fn string(bytes: &[u8], ctx: &'static str) -> Result<String> {
    match bytes.split_last() {
        Some((0, text)) => String::from_utf8(text.to_vec()).map_err(|_| GVariantError::BadString(ctx)),
        _ => Err(GVariantError::BadString(ctx)),
    }
}

fn checksum(bytes: &[u8]) -> Result<Checksum> {
    if bytes.len() != 32 {
        return Err(GVariantError::BadChecksum(bytes.len()));
    }
    let mut sum = [0u8; 32];
    sum.copy_from_slice(bytes);
    Ok(sum)
}

//! Packfile reader
//!
//! Clones keep almost all of their objects in packfiles rather than as loose
//! objects. A pack comes as a pair of files under `objects/pack/`:
//!
//! ```text
//! pack-<sha>.idx   version 2 index
//!   "\377tOc" | version (4) | fanout (256 x 4) | oids (N x 20)
//!   | crc32 (N x 4) | offsets (N x 4) | large offsets (M x 8) | checksums
//!
//! pack-<sha>.pack  object data
//!   "PACK" | version (4) | count (4) | entries... | checksum
//! ```
//!
//! Every entry starts with a variable-length header holding its type and
//! inflated size, followed by zlib data. Delta entries (`OFS_DELTA`,
//! `REF_DELTA`) name a base object and carry copy/insert instructions that
//! rebuild the target from the base.
//!
//! The index is kept in memory. Pack data is never loaded whole: each read
//! seeks to the entries it needs.

use crate::artifacts::errors::StoreError;
use crate::artifacts::objects::RAW_OBJECT_ID_LENGTH;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use anyhow::Context;
use bytes::Bytes;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

const IDX_SIGNATURE: &[u8; 4] = b"\xfftOc";
const IDX_VERSION: u32 = 2;
const IDX_HEADER_SIZE: usize = 8;
const FANOUT_SIZE: usize = 256 * 4;
const PACK_SIGNATURE: &[u8; 4] = b"PACK";
const PACK_HEADER_SIZE: usize = 12;

const OFS_DELTA: u8 = 6;
const REF_DELTA: u8 = 7;

/// Longest delta chain followed before the pack is considered corrupt
const MAX_DELTA_CHAIN: usize = 10_000;

/// Largest output of a single delta copy instruction
const MAX_COPY_SIZE: usize = 0x10000;

/// How a base object is found for a `REF_DELTA` whose base lives outside the pack
pub type BaseLookup<'a> = dyn Fn(&ObjectId) -> Result<(ObjectType, Bytes), StoreError> + 'a;

#[derive(Debug)]
pub struct Pack {
    pack_path: PathBuf,
    index: PackIndex,
}

impl Pack {
    /// Open a pack by its index path, checking the header of the pack data
    pub fn open(idx_path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read(idx_path)
            .context(format!("Unable to read pack index {}", idx_path.display()))?;
        let index = PackIndex::parse(raw.into())
            .context(format!("Invalid pack index {}", idx_path.display()))?;

        let pack = Pack {
            pack_path: idx_path.with_extension("pack"),
            index,
        };

        let mut header = [0u8; PACK_HEADER_SIZE];
        pack.open_data()?
            .read_exact(&mut header)
            .context(format!("{} is not a packfile", pack.pack_path.display()))?;
        if &header[..4] != PACK_SIGNATURE {
            return Err(anyhow::anyhow!(
                "{} is not a packfile",
                pack.pack_path.display()
            ));
        }

        Ok(pack)
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.index.find_offset(oid).is_some()
    }

    pub fn object_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.index.object_ids()
    }

    /// Inflate the object, resolving any delta chain it sits on
    pub fn read_object(
        &self,
        oid: &ObjectId,
        lookup: &BaseLookup<'_>,
    ) -> Result<Option<(ObjectType, Bytes)>, StoreError> {
        let Some(offset) = self.index.find_offset(oid) else {
            return Ok(None);
        };

        let mut data = self
            .open_data()
            .map_err(|source| StoreError::corrupt(oid, source))?;
        self.read_at(&mut data, offset, oid, lookup).map(Some)
    }

    fn open_data(&self) -> anyhow::Result<BufReader<File>> {
        let file = File::open(&self.pack_path)
            .context(format!("Unable to open pack {}", self.pack_path.display()))?;

        Ok(BufReader::new(file))
    }

    fn read_at(
        &self,
        data: &mut BufReader<File>,
        offset: u64,
        oid: &ObjectId,
        lookup: &BaseLookup<'_>,
    ) -> Result<(ObjectType, Bytes), StoreError> {
        let corrupt = |source: anyhow::Error| StoreError::corrupt(oid, source);

        let mut deltas = Vec::new();
        let mut offset = offset;

        let (base_type, mut content) = loop {
            if deltas.len() > MAX_DELTA_CHAIN {
                return Err(corrupt(anyhow::anyhow!("delta chain too long")));
            }

            data.seek(SeekFrom::Start(offset))
                .context("entry offset past end of pack")
                .map_err(corrupt)?;
            let entry = EntryHeader::parse(data).map_err(corrupt)?;
            match entry.type_code {
                OFS_DELTA => {
                    let distance = read_offset_encoding(data).map_err(corrupt)?;
                    deltas.push(inflate(data, entry.size).map_err(corrupt)?);
                    offset = offset
                        .checked_sub(distance)
                        .ok_or_else(|| corrupt(anyhow::anyhow!("delta base before pack start")))?;
                }
                REF_DELTA => {
                    let mut raw_base = [0u8; RAW_OBJECT_ID_LENGTH];
                    let base_oid = data
                        .read_exact(&mut raw_base)
                        .context("truncated delta base id")
                        .and_then(|_| ObjectId::from_raw(&raw_base))
                        .map_err(corrupt)?;
                    deltas.push(inflate(data, entry.size).map_err(corrupt)?);

                    match self.index.find_offset(&base_oid) {
                        Some(base_offset) => offset = base_offset,
                        None => break lookup(&base_oid)?,
                    }
                }
                code => {
                    let object_type = ObjectType::from_pack_code(code)
                        .ok_or_else(|| corrupt(anyhow::anyhow!("unknown pack entry type {code}")))?;
                    break (object_type, inflate(data, entry.size).map_err(corrupt)?);
                }
            }
        };

        // innermost delta applies first
        while let Some(delta) = deltas.pop() {
            content = apply_delta(&content, &delta).map_err(corrupt)?;
        }

        Ok((base_type, content))
    }
}

/// Sorted oid → offset table of a version 2 pack index
#[derive(Debug)]
struct PackIndex {
    raw: Bytes,
    count: usize,
}

impl PackIndex {
    fn parse(raw: Bytes) -> anyhow::Result<Self> {
        if raw.len() < IDX_HEADER_SIZE + FANOUT_SIZE || &raw[..4] != IDX_SIGNATURE {
            return Err(anyhow::anyhow!("unsupported pack index format"));
        }
        let version = read_u32(&raw, 4)?;
        if version != IDX_VERSION {
            return Err(anyhow::anyhow!("unsupported pack index version {version}"));
        }

        let count = read_u32(&raw, IDX_HEADER_SIZE + 255 * 4)? as usize;
        let minimum_size = IDX_HEADER_SIZE + FANOUT_SIZE + count * (RAW_OBJECT_ID_LENGTH + 8);
        if raw.len() < minimum_size {
            return Err(anyhow::anyhow!("truncated pack index"));
        }

        Ok(PackIndex { raw, count })
    }

    fn oids_start(&self) -> usize {
        IDX_HEADER_SIZE + FANOUT_SIZE
    }

    fn offsets_start(&self) -> usize {
        self.oids_start() + self.count * (RAW_OBJECT_ID_LENGTH + 4)
    }

    fn large_offsets_start(&self) -> usize {
        self.offsets_start() + self.count * 4
    }

    fn oid_at(&self, position: usize) -> &[u8] {
        let start = self.oids_start() + position * RAW_OBJECT_ID_LENGTH;
        &self.raw[start..start + RAW_OBJECT_ID_LENGTH]
    }

    fn fanout(&self, byte: usize) -> usize {
        read_u32(&self.raw, IDX_HEADER_SIZE + byte * 4).unwrap_or_default() as usize
    }

    fn find_offset(&self, oid: &ObjectId) -> Option<u64> {
        let raw_oid = oid.to_raw();
        let first = raw_oid[0] as usize;

        let mut low = if first == 0 { 0 } else { self.fanout(first - 1) };
        let mut high = self.fanout(first).min(self.count);

        while low < high {
            let middle = low + (high - low) / 2;
            match self.oid_at(middle).cmp(&raw_oid[..]) {
                std::cmp::Ordering::Less => low = middle + 1,
                std::cmp::Ordering::Greater => high = middle,
                std::cmp::Ordering::Equal => return self.offset_at(middle),
            }
        }

        None
    }

    fn offset_at(&self, position: usize) -> Option<u64> {
        let offset = read_u32(&self.raw, self.offsets_start() + position * 4).ok()?;
        if offset & 0x8000_0000 == 0 {
            return Some(offset as u64);
        }

        let large_position = (offset & 0x7fff_ffff) as usize;
        let start = self.large_offsets_start() + large_position * 8;
        let bytes = self.raw.get(start..start + 8)?;
        Some(u64::from_be_bytes(bytes.try_into().ok()?))
    }

    fn object_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        (0..self.count).filter_map(|position| ObjectId::from_raw(self.oid_at(position)).ok())
    }
}

#[derive(Debug)]
struct EntryHeader {
    type_code: u8,
    size: usize,
}

impl EntryHeader {
    fn parse(data: &mut impl Read) -> anyhow::Result<Self> {
        let mut byte = read_byte(data).context("entry offset past end of pack")?;

        let type_code = (byte >> 4) & 0b111;
        let mut size = (byte & 0x0f) as usize;
        let mut shift = 4;

        while byte & 0x80 != 0 {
            byte = read_byte(data).context("truncated entry header")?;
            size |= ((byte & 0x7f) as usize)
                .checked_shl(shift)
                .context("entry size overflow")?;
            shift += 7;
        }

        Ok(EntryHeader { type_code, size })
    }
}

fn read_byte(data: &mut impl Read) -> std::io::Result<u8> {
    let mut byte = [0u8; 1];
    data.read_exact(&mut byte)?;
    Ok(byte[0])
}

/// Decode the base distance of an `OFS_DELTA`
fn read_offset_encoding(data: &mut impl Read) -> anyhow::Result<u64> {
    let mut byte = read_byte(data).context("truncated delta offset")?;
    let mut distance = (byte & 0x7f) as u64;

    while byte & 0x80 != 0 {
        byte = read_byte(data).context("truncated delta offset")?;
        distance = distance
            .checked_add(1)
            .and_then(|distance| distance.checked_mul(0x80))
            .context("delta offset overflow")?
            | (byte & 0x7f) as u64;
    }

    Ok(distance)
}

/// Inflate one entry, reading no more than `size` bytes of output plus one
fn inflate(data: &mut impl BufRead, size: usize) -> anyhow::Result<Bytes> {
    let decoder = flate2::bufread::ZlibDecoder::new(data);
    let mut content = Vec::new();
    decoder
        .take((size as u64).saturating_add(1))
        .read_to_end(&mut content)
        .context("Unable to decompress pack entry")?;

    if content.len() != size {
        return Err(anyhow::anyhow!(
            "pack entry inflated to {} bytes, expected {size}",
            content.len()
        ));
    }

    Ok(content.into())
}

fn read_varint(delta: &[u8], position: &mut usize) -> anyhow::Result<usize> {
    let mut value = 0usize;
    let mut shift = 0;

    loop {
        let byte = *delta.get(*position).context("truncated delta size")?;
        *position += 1;
        value |= ((byte & 0x7f) as usize)
            .checked_shl(shift)
            .context("delta size overflow")?;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

/// Rebuild an object from its base and a git delta
pub fn apply_delta(base: &[u8], delta: &[u8]) -> anyhow::Result<Bytes> {
    let mut position = 0;
    let base_size = read_varint(delta, &mut position)?;
    let result_size = read_varint(delta, &mut position)?;

    if base_size != base.len() {
        return Err(anyhow::anyhow!(
            "delta expects a {base_size} byte base, got {}",
            base.len()
        ));
    }

    // every instruction byte yields at most one full copy
    let largest_result = (delta.len() - position).saturating_mul(MAX_COPY_SIZE);
    if result_size > largest_result {
        return Err(anyhow::anyhow!(
            "delta cannot produce the {result_size} bytes it declares"
        ));
    }

    let mut result = Vec::with_capacity(result_size.min(base.len().saturating_add(delta.len())));

    while position < delta.len() {
        let instruction = delta[position];
        position += 1;

        if instruction & 0x80 != 0 {
            // copy from base: bits 0-3 select offset bytes, bits 4-6 size bytes
            let mut copy_offset = 0usize;
            for i in 0..4 {
                if instruction & (1 << i) != 0 {
                    let byte = *delta.get(position).context("truncated copy offset")?;
                    position += 1;
                    copy_offset |= (byte as usize) << (8 * i);
                }
            }

            let mut copy_size = 0usize;
            for i in 0..3 {
                if instruction & (0x10 << i) != 0 {
                    let byte = *delta.get(position).context("truncated copy size")?;
                    position += 1;
                    copy_size |= (byte as usize) << (8 * i);
                }
            }
            if copy_size == 0 {
                copy_size = MAX_COPY_SIZE;
            }

            let chunk = copy_offset
                .checked_add(copy_size)
                .and_then(|end| base.get(copy_offset..end))
                .context("delta copy outside of base")?;
            result.extend_from_slice(chunk);
        } else if instruction != 0 {
            let end = position + instruction as usize;
            let literal = delta.get(position..end).context("truncated delta insert")?;
            result.extend_from_slice(literal);
            position = end;
        } else {
            return Err(anyhow::anyhow!("reserved delta instruction 0"));
        }

        if result.len() > result_size {
            return Err(anyhow::anyhow!(
                "delta produced more than the {result_size} bytes it declares"
            ));
        }
    }

    if result.len() != result_size {
        return Err(anyhow::anyhow!(
            "delta produced {} bytes, expected {result_size}",
            result.len()
        ));
    }

    Ok(result.into())
}

fn read_u32(raw: &[u8], start: usize) -> anyhow::Result<u32> {
    let bytes = raw
        .get(start..start + 4)
        .context("truncated pack index")?;
    Ok(u32::from_be_bytes(bytes.try_into()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::objects::blob::Blob;
    use crate::artifacts::objects::object::Object;
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn deflate(content: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap()
    }

    fn entry_header(type_code: u8, size: usize) -> Vec<u8> {
        let mut header = Vec::new();
        let mut byte = (type_code << 4) | (size & 0x0f) as u8;
        let mut rest = size >> 4;
        while rest > 0 {
            header.push(byte | 0x80);
            byte = (rest & 0x7f) as u8;
            rest >>= 7;
        }
        header.push(byte);
        header
    }

    fn pack_header(count: u32) -> Vec<u8> {
        let mut pack = Vec::new();
        pack.extend_from_slice(PACK_SIGNATURE);
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&count.to_be_bytes());
        pack
    }

    /// Write `pack` next to a version 2 index of the given (oid, offset) entries
    fn write_pack(dir: &Path, pack: Vec<u8>, mut entries: Vec<([u8; 20], u64)>) -> PathBuf {
        entries.sort();

        let mut idx = Vec::new();
        idx.extend_from_slice(IDX_SIGNATURE);
        idx.extend_from_slice(&IDX_VERSION.to_be_bytes());
        for byte in 0..256usize {
            let count = entries.iter().filter(|(oid, _)| (oid[0] as usize) <= byte).count();
            idx.extend_from_slice(&(count as u32).to_be_bytes());
        }
        for (oid, _) in &entries {
            idx.extend_from_slice(oid);
        }
        for _ in &entries {
            idx.extend_from_slice(&0u32.to_be_bytes());
        }
        for (_, offset) in &entries {
            idx.extend_from_slice(&(*offset as u32).to_be_bytes());
        }

        std::fs::write(dir.join("pack-test.pack"), pack).unwrap();
        let idx_path = dir.join("pack-test.idx");
        std::fs::write(&idx_path, idx).unwrap();
        idx_path
    }

    /// Build a pack holding `base` as a blob and `target` as an OFS_DELTA on it
    fn write_pack_pair(dir: &Path, base: &[u8], target_delta: &[u8]) -> PathBuf {
        let mut pack = pack_header(2);

        let base_offset = pack.len() as u64;
        pack.extend(entry_header(3, base.len()));
        pack.extend(deflate(base));

        let delta_offset = pack.len() as u64;
        pack.extend(entry_header(OFS_DELTA, target_delta.len()));
        // single-byte distance encoding is enough for this tiny pack
        let distance = delta_offset - base_offset;
        assert!(distance < 0x80);
        pack.push(distance as u8);
        pack.extend(deflate(target_delta));

        let base_oid = Blob::new(Bytes::copy_from_slice(base)).object_id().unwrap();
        let target_oid = ObjectId::try_parse("f".repeat(40)).unwrap();

        write_pack(
            dir,
            pack,
            vec![(base_oid.to_raw(), base_offset), (target_oid.to_raw(), delta_offset)],
        )
    }

    fn no_external_bases(oid: &ObjectId) -> Result<(ObjectType, Bytes), StoreError> {
        Err(StoreError::ObjectNotFound(oid.clone()))
    }

    #[test]
    fn applies_copy_and_insert_instructions() {
        let base = b"hello world";
        let delta = [
            11, 13, // sizes
            0x91, 0, 6, // copy offset 0 size 6 -> "hello "
            2, b'm', b'y', // insert "my"
            0x91, 6, 5, // copy offset 6 size 5 -> "world"
        ];

        let result = apply_delta(base, &delta).unwrap();

        assert_eq!(&result[..], b"hello myworld");
    }

    #[test]
    fn rejects_delta_for_wrong_base() {
        let delta = [3, 1, 1, b'x'];

        assert!(apply_delta(b"toolong", &delta).is_err());
    }

    #[test]
    fn delta_sizes_beyond_what_it_can_produce_are_rejected() {
        // result size close to 2^63 with no instructions to back it
        let huge = [0, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x7f];
        assert!(apply_delta(b"", &huge).is_err());

        // copies 3 bytes while declaring 1
        let overlong = [3, 1, 0x90, 3];
        assert!(apply_delta(b"abc", &overlong).is_err());
    }

    #[test]
    fn oversized_entry_header_is_reported_as_corrupt() {
        let dir = assert_fs::TempDir::new().unwrap();
        let mut pack = pack_header(1);
        let offset = pack.len() as u64;
        pack.extend(entry_header(3, 1 << 60));
        pack.extend(deflate(b"abc"));
        let oid = ObjectId::try_parse("a".repeat(40)).unwrap();
        let idx_path = write_pack(dir.path(), pack, vec![(oid.to_raw(), offset)]);

        let pack = Pack::open(&idx_path).unwrap();
        let error = pack.read_object(&oid, &no_external_bases).unwrap_err();

        assert!(matches!(error, StoreError::Corrupt { oid: corrupt, .. } if corrupt == oid));
    }

    #[test]
    fn index_without_pack_data_fails_to_open() {
        let dir = assert_fs::TempDir::new().unwrap();
        let idx_path = write_pack_pair(dir.path(), b"abc", &[3, 3, 0x90, 3]);
        std::fs::remove_file(dir.path().join("pack-test.pack")).unwrap();

        assert!(Pack::open(&idx_path).is_err());
    }

    #[test]
    fn reads_plain_and_delta_entries() {
        let dir = assert_fs::TempDir::new().unwrap();
        let base = b"line one\nline two\n";
        let delta = [
            base.len() as u8,
            base.len() as u8 + 6,
            0x90,
            base.len() as u8, // copy the whole base
            6,
            b'l',
            b'i',
            b'n',
            b'e',
            b' ',
            b'3',
        ];
        let idx_path = write_pack_pair(dir.path(), base, &delta);

        let pack = Pack::open(&idx_path).unwrap();
        let base_oid = Blob::new(Bytes::copy_from_slice(base)).object_id().unwrap();
        let target_oid = ObjectId::try_parse("f".repeat(40)).unwrap();

        let (base_type, base_content) = pack
            .read_object(&base_oid, &no_external_bases)
            .unwrap()
            .unwrap();
        assert_eq!(base_type, ObjectType::Blob);
        assert_eq!(&base_content[..], base);

        let (target_type, target_content) = pack
            .read_object(&target_oid, &no_external_bases)
            .unwrap()
            .unwrap();
        assert_eq!(target_type, ObjectType::Blob);
        assert_eq!(&target_content[..], b"line one\nline two\nline 3");

        assert!(pack.contains(&base_oid));
        assert_eq!(pack.object_ids().count(), 2);
    }

    #[test]
    fn unknown_objects_are_absent() {
        let dir = assert_fs::TempDir::new().unwrap();
        let idx_path = write_pack_pair(dir.path(), b"abc", &[3, 3, 0x90, 3]);
        let pack = Pack::open(&idx_path).unwrap();

        let missing = ObjectId::try_parse("0".repeat(40)).unwrap();

        assert!(pack.read_object(&missing, &no_external_bases).unwrap().is_none());
    }
}

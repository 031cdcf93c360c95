//! Fixed-layout records of the ZIP format and the little-endian helpers
//! used to pack and unpack them.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::error::{ZipError, ZipResult};

pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06064b50;
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x07064b50;

/// Value stored in a 32-bit field whose real value lives in the Zip64 extra field.
pub const ZIP64_SENTINEL: u32 = 0xFFFF_FFFF;
/// Entry count sentinel in the classic end record.
pub const ZIP64_COUNT_SENTINEL: u16 = 0xFFFF;

pub const FLAG_ENCRYPTED: u16 = 0x0001;
/// Bits 1 and 2: the compression option the entry was written with.
pub const FLAG_COMPRESSION_OPTIONS: u16 = 0x0006;
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
pub const FLAG_UTF8: u16 = 0x0800;

pub const VERSION_DEFAULT: u16 = 20;
pub const VERSION_ZIP64: u16 = 45;
pub const VERSION_AES: u16 = 51;
pub const VERSION_MADE_BY: u16 = 45;

/// Host system byte of "version made by".
pub const HOST_DOS: u8 = 0;
pub const HOST_UNIX: u8 = 3;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
pub const MAX_COMMENT_SIZE: u64 = 65535;

/// Read a little-endian `u16` from the front of `bytes`.
pub fn read_u16_le(bytes: &[u8]) -> ZipResult<u16> {
    bytes
        .get(..2)
        .map(LittleEndian::read_u16)
        .ok_or_else(|| ZipError::truncated("u16"))
}

pub fn read_u32_le(bytes: &[u8]) -> ZipResult<u32> {
    bytes
        .get(..4)
        .map(LittleEndian::read_u32)
        .ok_or_else(|| ZipError::truncated("u32"))
}

pub fn read_u64_le(bytes: &[u8]) -> ZipResult<u64> {
    bytes
        .get(..8)
        .map(LittleEndian::read_u64)
        .ok_or_else(|| ZipError::truncated("u64"))
}

pub fn write_u16_le(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_u32_le(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_u64_le(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Whether a 64-bit value cannot be stored in a classic 32-bit field.
///
/// The sentinel value itself counts as overflowing.
pub fn exceeds_u32(value: u64) -> bool {
    value >= ZIP64_SENTINEL as u64
}

/// Find the last occurrence of `signature` in `buf`, scanning backwards.
pub fn rfind_signature(buf: &[u8], signature: u32) -> Option<usize> {
    let needle = signature.to_le_bytes();
    if buf.len() < 4 {
        return None;
    }
    (0..=buf.len() - 4).rev().find(|&i| buf[i..i + 4] == needle)
}

/// Advance `reader` until `signature` has been consumed.
///
/// Returns the number of bytes skipped before the signature, or `None` if the
/// stream ended first. Running out of data is not an error here: callers use
/// this to probe for the next record.
pub fn find_signature<R: Read>(reader: &mut R, signature: u32) -> io::Result<Option<u64>> {
    let needle = signature.to_le_bytes();
    let mut window = [0u8; 4];
    let mut filled = 0usize;
    let mut skipped = 0u64;
    let mut byte = [0u8; 1];
    loop {
        if filled == 4 && window == needle {
            return Ok(Some(skipped));
        }
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
        if filled < 4 {
            window[filled] = byte[0];
            filled += 1;
        } else {
            window.copy_within(1.., 0);
            window[3] = byte[0];
            skipped += 1;
        }
    }
}

fn check_signature(actual: u32, expected: u32, what: &str) -> ZipResult<()> {
    if actual != expected {
        return Err(ZipError::BadRead(format!(
            "invalid {what} signature {actual:#010x}"
        )));
    }
    Ok(())
}

fn checked_len(len: usize, what: &str) -> ZipResult<u16> {
    u16::try_from(len).map_err(|_| ZipError::Argument(format!("{what} is longer than 65535 bytes")))
}

/// Map a short read to a format error naming the record being parsed.
fn eof_as_bad_read(what: &'static str) -> impl Fn(io::Error) -> ZipError {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ZipError::truncated(what)
        } else {
            ZipError::Io(e)
        }
    }
}

/// Local File Header (LFH) - 30 bytes plus name and extra field
#[derive(Debug, Clone, Default)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
}

impl LocalFileHeader {
    pub const SIZE: usize = 30;

    /// Read a header, signature included.
    pub fn read<R: Read>(reader: &mut R) -> ZipResult<Self> {
        let mut fixed = [0u8; Self::SIZE];
        reader
            .read_exact(&mut fixed)
            .map_err(eof_as_bad_read("local file header"))?;
        let mut header = Self::from_fixed(&fixed)?;
        let name_len = read_u16_le(&fixed[26..])? as usize;
        let extra_len = read_u16_le(&fixed[28..])? as usize;
        header.file_name = vec![0u8; name_len];
        reader
            .read_exact(&mut header.file_name)
            .map_err(eof_as_bad_read("local file name"))?;
        header.extra_field = vec![0u8; extra_len];
        reader
            .read_exact(&mut header.extra_field)
            .map_err(eof_as_bad_read("local extra field"))?;
        Ok(header)
    }

    /// Parse the fixed 30-byte portion; name and extra field are left empty.
    pub fn from_fixed(data: &[u8]) -> ZipResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ZipError::truncated("local file header"));
        }
        let mut cursor = Cursor::new(data);
        check_signature(
            cursor.read_u32::<LittleEndian>()?,
            LOCAL_FILE_HEADER_SIGNATURE,
            "local file header",
        )?;
        Ok(Self {
            version_needed: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            compression_method: cursor.read_u16::<LittleEndian>()?,
            last_mod_time: cursor.read_u16::<LittleEndian>()?,
            last_mod_date: cursor.read_u16::<LittleEndian>()?,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            file_name: Vec::new(),
            extra_field: Vec::new(),
        })
    }

    /// Name and extra field lengths as declared in a fixed portion.
    pub fn variable_lengths(fixed: &[u8]) -> ZipResult<(u16, u16)> {
        Ok((read_u16_le(&fixed[26..])?, read_u16_le(&fixed[28..])?))
    }

    /// Total header length: fixed portion plus name and extra field.
    pub fn len(&self) -> u64 {
        (Self::SIZE + self.file_name.len() + self.extra_field.len()) as u64
    }

    pub fn dos_datetime(&self) -> u32 {
        (self.last_mod_date as u32) << 16 | self.last_mod_time as u32
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> ZipResult<()> {
        let name_len = checked_len(self.file_name.len(), "file name")?;
        let extra_len = checked_len(self.extra_field.len(), "extra field")?;
        let mut buf = Vec::with_capacity(self.len() as usize);
        buf.write_u32::<LittleEndian>(LOCAL_FILE_HEADER_SIGNATURE)?;
        buf.write_u16::<LittleEndian>(self.version_needed)?;
        buf.write_u16::<LittleEndian>(self.flags)?;
        buf.write_u16::<LittleEndian>(self.compression_method)?;
        buf.write_u16::<LittleEndian>(self.last_mod_time)?;
        buf.write_u16::<LittleEndian>(self.last_mod_date)?;
        buf.write_u32::<LittleEndian>(self.crc32)?;
        buf.write_u32::<LittleEndian>(self.compressed_size)?;
        buf.write_u32::<LittleEndian>(self.uncompressed_size)?;
        buf.write_u16::<LittleEndian>(name_len)?;
        buf.write_u16::<LittleEndian>(extra_len)?;
        buf.extend_from_slice(&self.file_name);
        buf.extend_from_slice(&self.extra_field);
        writer.write_all(&buf)?;
        Ok(())
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
#[derive(Debug, Clone, Default)]
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number_start: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub local_header_offset: u32,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
    pub file_comment: Vec<u8>,
}

impl CentralDirectoryHeader {
    pub const MIN_SIZE: usize = 46;

    /// Read the next directory header.
    ///
    /// Returns `Ok(None)` when the next record is not a directory header;
    /// that is how the end of the central directory is recognised.
    pub fn read<R: Read>(reader: &mut R) -> ZipResult<Option<Self>> {
        let signature = match reader.read_u32::<LittleEndian>() {
            Ok(sig) => sig,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if signature != CENTRAL_DIRECTORY_SIGNATURE {
            return Ok(None);
        }

        let mut fixed = [0u8; Self::MIN_SIZE - 4];
        reader
            .read_exact(&mut fixed)
            .map_err(eof_as_bad_read("central directory header"))?;
        let mut cursor = Cursor::new(&fixed[..]);

        let version_made_by = cursor.read_u16::<LittleEndian>()?;
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;
        let file_comment_length = cursor.read_u16::<LittleEndian>()?;
        let disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let internal_attributes = cursor.read_u16::<LittleEndian>()?;
        let external_attributes = cursor.read_u32::<LittleEndian>()?;
        let local_header_offset = cursor.read_u32::<LittleEndian>()?;

        let mut file_name = vec![0u8; file_name_length as usize];
        reader
            .read_exact(&mut file_name)
            .map_err(eof_as_bad_read("central directory file name"))?;
        let mut extra_field = vec![0u8; extra_field_length as usize];
        reader
            .read_exact(&mut extra_field)
            .map_err(eof_as_bad_read("central directory extra field"))?;
        let mut file_comment = vec![0u8; file_comment_length as usize];
        reader
            .read_exact(&mut file_comment)
            .map_err(eof_as_bad_read("central directory comment"))?;

        Ok(Some(Self {
            version_made_by,
            version_needed,
            flags,
            compression_method,
            last_mod_time,
            last_mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number_start,
            internal_attributes,
            external_attributes,
            local_header_offset,
            file_name,
            extra_field,
            file_comment,
        }))
    }

    pub fn len(&self) -> u64 {
        (Self::MIN_SIZE + self.file_name.len() + self.extra_field.len() + self.file_comment.len())
            as u64
    }

    pub fn dos_datetime(&self) -> u32 {
        (self.last_mod_date as u32) << 16 | self.last_mod_time as u32
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> ZipResult<()> {
        let name_len = checked_len(self.file_name.len(), "file name")?;
        let extra_len = checked_len(self.extra_field.len(), "extra field")?;
        let comment_len = checked_len(self.file_comment.len(), "entry comment")?;
        let mut buf = Vec::with_capacity(self.len() as usize);
        buf.write_u32::<LittleEndian>(CENTRAL_DIRECTORY_SIGNATURE)?;
        buf.write_u16::<LittleEndian>(self.version_made_by)?;
        buf.write_u16::<LittleEndian>(self.version_needed)?;
        buf.write_u16::<LittleEndian>(self.flags)?;
        buf.write_u16::<LittleEndian>(self.compression_method)?;
        buf.write_u16::<LittleEndian>(self.last_mod_time)?;
        buf.write_u16::<LittleEndian>(self.last_mod_date)?;
        buf.write_u32::<LittleEndian>(self.crc32)?;
        buf.write_u32::<LittleEndian>(self.compressed_size)?;
        buf.write_u32::<LittleEndian>(self.uncompressed_size)?;
        buf.write_u16::<LittleEndian>(name_len)?;
        buf.write_u16::<LittleEndian>(extra_len)?;
        buf.write_u16::<LittleEndian>(comment_len)?;
        buf.write_u16::<LittleEndian>(self.disk_number_start)?;
        buf.write_u16::<LittleEndian>(self.internal_attributes)?;
        buf.write_u32::<LittleEndian>(self.external_attributes)?;
        buf.write_u32::<LittleEndian>(self.local_header_offset)?;
        buf.extend_from_slice(&self.file_name);
        buf.extend_from_slice(&self.extra_field);
        buf.extend_from_slice(&self.file_comment);
        writer.write_all(&buf)?;
        Ok(())
    }
}

/// Trailing CRC/size record for entries written with bit 3 set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    /// Encoded length including the signature.
    pub fn encoded_len(zip64: bool) -> usize {
        if zip64 { 24 } else { 16 }
    }

    /// Read a descriptor whose signature is optional.
    pub fn read<R: Read>(reader: &mut R, zip64: bool) -> ZipResult<Self> {
        let map = eof_as_bad_read("data descriptor");
        let first = reader.read_u32::<LittleEndian>().map_err(&map)?;
        let crc32 = if first == DATA_DESCRIPTOR_SIGNATURE {
            reader.read_u32::<LittleEndian>().map_err(&map)?
        } else {
            first
        };
        let (compressed_size, uncompressed_size) = if zip64 {
            (
                reader.read_u64::<LittleEndian>().map_err(&map)?,
                reader.read_u64::<LittleEndian>().map_err(&map)?,
            )
        } else {
            (
                reader.read_u32::<LittleEndian>().map_err(&map)? as u64,
                reader.read_u32::<LittleEndian>().map_err(&map)? as u64,
            )
        };
        Ok(Self {
            crc32,
            compressed_size,
            uncompressed_size,
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W, zip64: bool) -> ZipResult<()> {
        let mut buf = Vec::with_capacity(Self::encoded_len(zip64));
        buf.write_u32::<LittleEndian>(DATA_DESCRIPTOR_SIGNATURE)?;
        buf.write_u32::<LittleEndian>(self.crc32)?;
        if zip64 {
            buf.write_u64::<LittleEndian>(self.compressed_size)?;
            buf.write_u64::<LittleEndian>(self.uncompressed_size)?;
        } else {
            let compressed = u32::try_from(self.compressed_size)
                .map_err(|_| ZipError::Zip64Required("compressed size".into()))?;
            let uncompressed = u32::try_from(self.uncompressed_size)
                .map_err(|_| ZipError::Zip64Required("uncompressed size".into()))?;
            buf.write_u32::<LittleEndian>(compressed)?;
            buf.write_u32::<LittleEndian>(uncompressed)?;
        }
        writer.write_all(&buf)?;
        Ok(())
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, Default)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub const SIZE: usize = 22;

    /// Parse the fixed portion; the comment is attached by the caller.
    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ZipError::truncated("end of central directory"));
        }

        let mut cursor = Cursor::new(data);
        check_signature(
            cursor.read_u32::<LittleEndian>()?,
            END_OF_CENTRAL_DIRECTORY_SIGNATURE,
            "end of central directory",
        )?;

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
            comment: Vec::new(),
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == ZIP64_COUNT_SENTINEL
            || self.total_entries == ZIP64_COUNT_SENTINEL
            || self.cd_size == ZIP64_SENTINEL
            || self.cd_offset == ZIP64_SENTINEL
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> ZipResult<()> {
        let comment_len = checked_len(self.comment.len(), "archive comment")?;
        let mut buf = Vec::with_capacity(Self::SIZE + self.comment.len());
        buf.write_u32::<LittleEndian>(END_OF_CENTRAL_DIRECTORY_SIGNATURE)?;
        buf.write_u16::<LittleEndian>(self.disk_number)?;
        buf.write_u16::<LittleEndian>(self.disk_with_cd)?;
        buf.write_u16::<LittleEndian>(self.disk_entries)?;
        buf.write_u16::<LittleEndian>(self.total_entries)?;
        buf.write_u32::<LittleEndian>(self.cd_size)?;
        buf.write_u32::<LittleEndian>(self.cd_offset)?;
        buf.write_u16::<LittleEndian>(comment_len)?;
        buf.extend_from_slice(&self.comment);
        writer.write_all(&buf)?;
        Ok(())
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone, Default)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ZipError::truncated("Zip64 end of central directory locator"));
        }

        let mut cursor = Cursor::new(data);
        check_signature(
            cursor.read_u32::<LittleEndian>()?,
            ZIP64_LOCATOR_SIGNATURE,
            "Zip64 locator",
        )?;

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> ZipResult<()> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.write_u32::<LittleEndian>(ZIP64_LOCATOR_SIGNATURE)?;
        buf.write_u32::<LittleEndian>(self.disk_with_eocd64)?;
        buf.write_u64::<LittleEndian>(self.eocd64_offset)?;
        buf.write_u32::<LittleEndian>(self.total_disks)?;
        writer.write_all(&buf)?;
        Ok(())
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone, Default)]
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        if data.len() < Self::MIN_SIZE {
            return Err(ZipError::truncated("Zip64 end of central directory"));
        }

        let mut cursor = Cursor::new(data);
        check_signature(
            cursor.read_u32::<LittleEndian>()?,
            ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE,
            "Zip64 end of central directory",
        )?;

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> ZipResult<()> {
        let mut buf = Vec::with_capacity(Self::MIN_SIZE);
        buf.write_u32::<LittleEndian>(ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE)?;
        // Size of the remaining record, excluding signature and this field.
        buf.write_u64::<LittleEndian>((Self::MIN_SIZE - 12) as u64)?;
        buf.write_u16::<LittleEndian>(self.version_made_by)?;
        buf.write_u16::<LittleEndian>(self.version_needed)?;
        buf.write_u32::<LittleEndian>(self.disk_number)?;
        buf.write_u32::<LittleEndian>(self.disk_with_cd)?;
        buf.write_u64::<LittleEndian>(self.disk_entries)?;
        buf.write_u64::<LittleEndian>(self.total_entries)?;
        buf.write_u64::<LittleEndian>(self.cd_size)?;
        buf.write_u64::<LittleEndian>(self.cd_offset)?;
        writer.write_all(&buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn le_helpers_reject_short_input() {
        assert_eq!(read_u16_le(&[0x34, 0x12]).unwrap(), 0x1234);
        assert_eq!(read_u32_le(&[0x50, 0x4b, 0x03, 0x04]).unwrap(), LOCAL_FILE_HEADER_SIGNATURE);
        assert!(read_u64_le(&[0; 7]).is_err());
    }

    #[test]
    fn exceeds_u32_includes_sentinel() {
        assert!(!exceeds_u32(0xFFFF_FFFE));
        assert!(exceeds_u32(0xFFFF_FFFF));
        assert!(exceeds_u32(0x1_0000_0000));
    }

    #[test]
    fn rfind_signature_finds_last_match() {
        let mut buf = vec![0u8; 8];
        buf.extend_from_slice(&END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
        buf.extend_from_slice(b"xx");
        buf.extend_from_slice(&END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
        assert_eq!(rfind_signature(&buf, END_OF_CENTRAL_DIRECTORY_SIGNATURE), Some(14));
        assert_eq!(rfind_signature(b"abc", END_OF_CENTRAL_DIRECTORY_SIGNATURE), None);
    }

    #[test]
    fn find_signature_reports_skipped_bytes() {
        let mut data = b"stub!".to_vec();
        data.extend_from_slice(&LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes());
        data.extend_from_slice(b"rest");
        let mut cursor = Cursor::new(data);
        let skipped = find_signature(&mut cursor, LOCAL_FILE_HEADER_SIGNATURE).unwrap();
        assert_eq!(skipped, Some(5));
        assert_eq!(cursor.position(), 9);

        let mut empty = Cursor::new(b"nothing here".to_vec());
        assert_eq!(find_signature(&mut empty, LOCAL_FILE_HEADER_SIGNATURE).unwrap(), None);
    }

    #[test]
    fn local_header_write_then_read() {
        let header = LocalFileHeader {
            version_needed: VERSION_DEFAULT,
            flags: FLAG_UTF8,
            compression_method: 8,
            last_mod_time: 0x6000,
            last_mod_date: 0x5021,
            crc32: 0xDEADBEEF,
            compressed_size: 10,
            uncompressed_size: 20,
            file_name: b"dir/file.txt".to_vec(),
            extra_field: vec![0x99, 0x99, 0x00, 0x00],
        };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, header.len());

        let parsed = LocalFileHeader::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.file_name, header.file_name);
        assert_eq!(parsed.extra_field, header.extra_field);
        assert_eq!(parsed.crc32, 0xDEADBEEF);
        assert_eq!(parsed.dos_datetime(), 0x5021_6000);
    }

    #[test]
    fn local_header_rejects_bad_signature() {
        let buf = [0u8; LocalFileHeader::SIZE];
        let err = LocalFileHeader::read(&mut Cursor::new(&buf[..])).unwrap_err();
        assert!(matches!(err, ZipError::BadRead(_)));
    }

    #[test]
    fn central_header_stops_on_other_signature() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
        let next = CentralDirectoryHeader::read(&mut Cursor::new(&buf)).unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn data_descriptor_reads_with_and_without_signature() {
        let descriptor = DataDescriptor {
            crc32: 7,
            compressed_size: 3,
            uncompressed_size: 5,
        };
        let mut signed = Vec::new();
        descriptor.write(&mut signed, false).unwrap();
        assert_eq!(signed.len(), DataDescriptor::encoded_len(false));
        assert_eq!(DataDescriptor::read(&mut Cursor::new(&signed), false).unwrap(), descriptor);

        let unsigned = &signed[4..];
        assert_eq!(DataDescriptor::read(&mut Cursor::new(unsigned), false).unwrap(), descriptor);
    }

    #[test]
    fn oversized_descriptor_needs_zip64() {
        let descriptor = DataDescriptor {
            crc32: 0,
            compressed_size: 0x1_0000_0000,
            uncompressed_size: 1,
        };
        let err = descriptor.write(&mut Vec::new(), false).unwrap_err();
        assert!(matches!(err, ZipError::Zip64Required(_)));
        let mut buf = Vec::new();
        descriptor.write(&mut buf, true).unwrap();
        assert_eq!(buf.len(), 24);
    }

    #[test]
    fn zip64_end_record_round_trips_through_bytes() {
        let record = Zip64EOCD {
            eocd64_size: 44,
            version_made_by: VERSION_MADE_BY,
            version_needed: VERSION_ZIP64,
            disk_entries: 70_000,
            total_entries: 70_000,
            cd_size: 1 << 33,
            cd_offset: 1 << 34,
            ..Default::default()
        };
        let mut buf = Vec::new();
        record.write(&mut buf).unwrap();
        let parsed = Zip64EOCD::from_bytes(&buf).unwrap();
        assert_eq!(parsed.eocd64_size, 44);
        assert_eq!(parsed.total_entries, 70_000);
        assert_eq!(parsed.cd_offset, 1 << 34);
    }
}

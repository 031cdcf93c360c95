//! Extra-field records attached to local and central directory headers.
//!
//! The raw list of `(tag, payload)` records is what gets stored on an entry,
//! so tags this crate does not interpret survive a rewrite untouched. The
//! typed views below decode the records the reader and writer care about.

use crate::error::{ZipError, ZipResult};
use crate::zip::structures::{read_u16_le, read_u32_le, read_u64_le, write_u16_le, write_u32_le, write_u64_le};

pub const TAG_ZIP64: u16 = 0x0001;
pub const TAG_NTFS: u16 = 0x000a;
pub const TAG_EXTENDED_TIMESTAMP: u16 = 0x5455;
pub const TAG_UNICODE_PATH: u16 = 0x7075;
pub const TAG_AES: u16 = 0x9901;

/// One tag-delimited record of an extra field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraRecord {
    pub tag: u16,
    pub data: Vec<u8>,
}

impl ExtraRecord {
    pub fn new(tag: u16, data: Vec<u8>) -> Self {
        Self { tag, data }
    }
}

/// Split an extra field into records.
///
/// A record whose declared length runs past the buffer is a format error.
/// Fewer than four trailing bytes are padding some tools emit and are dropped.
pub fn parse_extra(buf: &[u8]) -> ZipResult<Vec<ExtraRecord>> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    while buf.len() - pos >= 4 {
        let tag = read_u16_le(&buf[pos..])?;
        let len = read_u16_le(&buf[pos + 2..])? as usize;
        let start = pos + 4;
        let end = start + len;
        if end > buf.len() {
            return Err(ZipError::BadRead(format!(
                "extra field {tag:#06x} declares {len} bytes but only {} remain",
                buf.len() - start
            )));
        }
        records.push(ExtraRecord::new(tag, buf[start..end].to_vec()));
        pos = end;
    }
    Ok(records)
}

/// Serialise records back into an extra field.
///
/// Fails instead of truncating when a record or the whole field would not
/// fit the 16-bit length fields of the format.
pub fn emit_extra(records: &[ExtraRecord]) -> ZipResult<Vec<u8>> {
    let total: usize = records.iter().map(|r| 4 + r.data.len()).sum();
    if total > u16::MAX as usize {
        return Err(ZipError::Argument(format!(
            "extra field of {total} bytes exceeds 65535"
        )));
    }
    let mut out = Vec::with_capacity(total);
    for record in records {
        let len = u16::try_from(record.data.len()).map_err(|_| {
            ZipError::Argument(format!("extra record {:#06x} is too long", record.tag))
        })?;
        write_u16_le(&mut out, record.tag);
        write_u16_le(&mut out, len);
        out.extend_from_slice(&record.data);
    }
    debug_assert_eq!(out.len(), total);
    Ok(out)
}

pub fn find_record(records: &[ExtraRecord], tag: u16) -> Option<&ExtraRecord> {
    records.iter().find(|r| r.tag == tag)
}

/// The timestamp records (NTFS and extended timestamp), in stored order.
pub fn time_records(records: &[ExtraRecord]) -> Vec<ExtraRecord> {
    records
        .iter()
        .filter(|r| matches!(r.tag, TAG_NTFS | TAG_EXTENDED_TIMESTAMP))
        .cloned()
        .collect()
}

/// Drop the records this crate regenerates on write.
pub fn retain_foreign(records: &mut Vec<ExtraRecord>) {
    records.retain(|r| {
        !matches!(
            r.tag,
            TAG_ZIP64 | TAG_NTFS | TAG_EXTENDED_TIMESTAMP | TAG_UNICODE_PATH | TAG_AES
        )
    });
}

/// Which header fields held the Zip64 sentinel and therefore live in the
/// Zip64 record.
#[derive(Debug, Clone, Copy, Default)]
pub struct Zip64Needs {
    pub uncompressed: bool,
    pub compressed: bool,
    pub offset: bool,
    pub disk: bool,
}

/// Zip64 extended information (tag 0x0001).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64ExtendedInfo {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub local_header_offset: Option<u64>,
    pub disk_start: Option<u32>,
}

impl Zip64ExtendedInfo {
    /// Decode the positional fields in their fixed order, taking only the
    /// ones `needs` asks for and stopping once the payload is exhausted.
    pub fn parse(payload: &[u8], needs: Zip64Needs) -> ZipResult<Self> {
        let mut info = Self::default();
        let mut rest = payload;
        if needs.uncompressed && rest.len() >= 8 {
            info.uncompressed_size = Some(read_u64_le(rest)?);
            rest = &rest[8..];
        }
        if needs.compressed && rest.len() >= 8 {
            info.compressed_size = Some(read_u64_le(rest)?);
            rest = &rest[8..];
        }
        if needs.offset && rest.len() >= 8 {
            info.local_header_offset = Some(read_u64_le(rest)?);
            rest = &rest[8..];
        }
        if needs.disk && rest.len() >= 4 {
            info.disk_start = Some(read_u32_le(rest)?);
        }
        Ok(info)
    }

    pub fn is_empty(&self) -> bool {
        self.uncompressed_size.is_none()
            && self.compressed_size.is_none()
            && self.local_header_offset.is_none()
            && self.disk_start.is_none()
    }

    pub fn to_record(&self) -> ExtraRecord {
        let mut data = Vec::with_capacity(28);
        if let Some(v) = self.uncompressed_size {
            write_u64_le(&mut data, v);
        }
        if let Some(v) = self.compressed_size {
            write_u64_le(&mut data, v);
        }
        if let Some(v) = self.local_header_offset {
            write_u64_le(&mut data, v);
        }
        if let Some(v) = self.disk_start {
            write_u32_le(&mut data, v);
        }
        ExtraRecord::new(TAG_ZIP64, data)
    }
}

/// NTFS timestamps (tag 0x000a, attribute tag 1), as FILETIME ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtfsTimes {
    pub modified: u64,
    pub accessed: u64,
    pub created: u64,
}

impl NtfsTimes {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        // 4 reserved bytes, then attribute records.
        let mut pos = 4usize;
        while payload.len().saturating_sub(pos) >= 4 {
            let tag = read_u16_le(&payload[pos..]).ok()?;
            let len = read_u16_le(&payload[pos + 2..]).ok()? as usize;
            let body = payload.get(pos + 4..pos + 4 + len)?;
            if tag == 1 && len >= 24 {
                return Some(Self {
                    modified: read_u64_le(body).ok()?,
                    accessed: read_u64_le(&body[8..]).ok()?,
                    created: read_u64_le(&body[16..]).ok()?,
                });
            }
            pos += 4 + len;
        }
        None
    }

    pub fn to_record(&self) -> ExtraRecord {
        let mut data = Vec::with_capacity(32);
        write_u32_le(&mut data, 0);
        write_u16_le(&mut data, 1);
        write_u16_le(&mut data, 24);
        write_u64_le(&mut data, self.modified);
        write_u64_le(&mut data, self.accessed);
        write_u64_le(&mut data, self.created);
        ExtraRecord::new(TAG_NTFS, data)
    }
}

/// Info-ZIP extended timestamp (tag 0x5455), Unix seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtendedTimestamp {
    pub modified: Option<i32>,
    pub accessed: Option<i32>,
    pub created: Option<i32>,
}

impl ExtendedTimestamp {
    const MODIFIED: u8 = 0x01;
    const ACCESSED: u8 = 0x02;
    const CREATED: u8 = 0x04;

    /// Flags announce all three times, but central directory copies carry
    /// only the modification time; missing trailing values are tolerated.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let (&flags, mut rest) = payload.split_first()?;
        let mut take = |present: bool| -> Option<i32> {
            if !present || rest.len() < 4 {
                return None;
            }
            let value = read_u32_le(rest).ok()? as i32;
            rest = &rest[4..];
            Some(value)
        };
        let modified = take(flags & Self::MODIFIED != 0);
        let accessed = take(flags & Self::ACCESSED != 0);
        let created = take(flags & Self::CREATED != 0);
        Some(Self {
            modified,
            accessed,
            created,
        })
    }

    /// `local` records carry every time present; central ones only mtime.
    pub fn to_record(&self, local: bool) -> ExtraRecord {
        let mut flags = 0u8;
        let mut data = vec![0u8];
        if let Some(t) = self.modified {
            flags |= Self::MODIFIED;
            write_u32_le(&mut data, t as u32);
        }
        if let Some(t) = self.accessed {
            flags |= Self::ACCESSED;
            if local {
                write_u32_le(&mut data, t as u32);
            }
        }
        if let Some(t) = self.created {
            flags |= Self::CREATED;
            if local {
                write_u32_le(&mut data, t as u32);
            }
        }
        data[0] = flags;
        ExtraRecord::new(TAG_EXTENDED_TIMESTAMP, data)
    }
}

/// WinZip AES record (tag 0x9901).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesExtraField {
    /// 1 for AE-1, 2 for AE-2.
    pub version: u16,
    /// 1, 2 or 3 for AES-128, AES-192, AES-256.
    pub strength: u8,
    /// Compression method hidden behind method 99.
    pub method: u16,
}

impl AesExtraField {
    pub fn parse(payload: &[u8]) -> ZipResult<Self> {
        if payload.len() < 7 {
            return Err(ZipError::truncated("AES extra field"));
        }
        if &payload[2..4] != b"AE" {
            return Err(ZipError::BadRead("AES extra field has wrong vendor id".into()));
        }
        Ok(Self {
            version: read_u16_le(payload)?,
            strength: payload[4],
            method: read_u16_le(&payload[5..])?,
        })
    }

    pub fn to_record(&self) -> ExtraRecord {
        let mut data = Vec::with_capacity(7);
        write_u16_le(&mut data, self.version);
        data.extend_from_slice(b"AE");
        data.push(self.strength);
        write_u16_le(&mut data, self.method);
        ExtraRecord::new(TAG_AES, data)
    }
}

/// Info-ZIP Unicode path (tag 0x7075).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnicodePath {
    /// CRC-32 of the header name this record overrides.
    pub name_crc: u32,
    pub name: String,
}

impl UnicodePath {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 5 || payload[0] != 1 {
            return None;
        }
        let name = std::str::from_utf8(&payload[5..]).ok()?.to_owned();
        Some(Self {
            name_crc: read_u32_le(&payload[1..]).ok()?,
            name,
        })
    }

    /// The Unicode name, provided the record still matches `raw_name`.
    pub fn resolve(&self, raw_name: &[u8]) -> Option<&str> {
        (crc32fast::hash(raw_name) == self.name_crc).then_some(self.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_preserves_unknown_records() {
        let records = vec![
            ExtraRecord::new(0xCAFE, vec![1, 2, 3]),
            ExtraRecord::new(TAG_ZIP64, vec![0; 8]),
        ];
        let bytes = emit_extra(&records).unwrap();
        assert_eq!(bytes.len(), 4 + 3 + 4 + 8);
        assert_eq!(parse_extra(&bytes).unwrap(), records);
    }

    #[test]
    fn overlong_record_is_format_error() {
        let bytes = [0x01, 0x00, 0x10, 0x00, 0xAA];
        assert!(matches!(parse_extra(&bytes), Err(ZipError::BadRead(_))));
    }

    #[test]
    fn short_padding_is_ignored() {
        let bytes = [0xFE, 0xCA, 0x00, 0x00, 0x00, 0x00];
        let records = parse_extra(&bytes).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].data.is_empty());
    }

    #[test]
    fn oversized_field_is_rejected_before_write() {
        let records = vec![ExtraRecord::new(0x1234, vec![0; 70_000])];
        assert!(matches!(emit_extra(&records), Err(ZipError::Argument(_))));
    }

    #[test]
    fn zip64_fields_follow_fixed_order() {
        let info = Zip64ExtendedInfo {
            compressed_size: Some(0x1_0000_0001),
            local_header_offset: Some(42),
            ..Default::default()
        };
        let record = info.to_record();
        assert_eq!(record.data.len(), 16);

        let needs = Zip64Needs {
            compressed: true,
            offset: true,
            ..Default::default()
        };
        assert_eq!(Zip64ExtendedInfo::parse(&record.data, needs).unwrap(), info);
    }

    #[test]
    fn zip64_parse_stops_when_payload_runs_out() {
        let mut data = Vec::new();
        write_u64_le(&mut data, 7);
        let needs = Zip64Needs {
            uncompressed: true,
            compressed: true,
            offset: true,
            disk: true,
        };
        let info = Zip64ExtendedInfo::parse(&data, needs).unwrap();
        assert_eq!(info.uncompressed_size, Some(7));
        assert_eq!(info.compressed_size, None);
    }

    #[test]
    fn ntfs_times_round_trip() {
        let times = NtfsTimes {
            modified: 1,
            accessed: 2,
            created: 3,
        };
        let record = times.to_record();
        assert_eq!(record.data.len(), 32);
        assert_eq!(NtfsTimes::parse(&record.data), Some(times));
    }

    #[test]
    fn central_timestamp_keeps_only_mtime() {
        let ts = ExtendedTimestamp {
            modified: Some(100),
            accessed: Some(200),
            created: None,
        };
        let central = ts.to_record(false);
        assert_eq!(central.data.len(), 5);
        let parsed = ExtendedTimestamp::parse(&central.data).unwrap();
        assert_eq!(parsed.modified, Some(100));
        assert_eq!(parsed.accessed, None);

        let local = ts.to_record(true);
        assert_eq!(ExtendedTimestamp::parse(&local.data).unwrap(), ts);
    }

    #[test]
    fn aes_record_layout() {
        let field = AesExtraField {
            version: 1,
            strength: 3,
            method: 8,
        };
        let record = field.to_record();
        assert_eq!(record.data, vec![1, 0, b'A', b'E', 3, 8, 0]);
        assert_eq!(AesExtraField::parse(&record.data).unwrap(), field);
    }

    #[test]
    fn unicode_path_requires_matching_crc() {
        let mut payload = vec![1];
        write_u32_le(&mut payload, crc32fast::hash(b"caf?.txt"));
        payload.extend_from_slice("café.txt".as_bytes());
        let path = UnicodePath::parse(&payload).unwrap();
        assert_eq!(path.resolve(b"caf?.txt"), Some("café.txt"));
        assert_eq!(path.resolve(b"renamed.txt"), None);
    }
}

//! `cmap` table processing.

use super::Cursor;
use crate::{errors::ParseErrorKind, ParseError, TableTag};

#[derive(Debug, Clone, Copy)]
pub(crate) struct SegmentWithDelta {
    pub(crate) start_code: u16,
    pub(crate) end_code: u16,
    pub(crate) id_delta: u16,
    pub(crate) id_range_offset: u16,
}

/// Segment mapping to delta values (format 4) subtable of the `cmap` table.
#[derive(Debug, Clone)]
pub(crate) struct SegmentDeltas<'a> {
    pub(crate) segments: Vec<SegmentWithDelta>,
    pub(crate) glyph_id_array: Cursor<'a>,
}

impl<'a> SegmentDeltas<'a> {
    pub(crate) const FORMAT: u16 = 4;

    fn parse(mut cursor: Cursor<'a>) -> Result<Self, ParseError> {
        cursor.skip(2)?; // format
        let remaining_len = cursor.read_u16_checked(|subtable_len| {
            Ok(usize::from(
                subtable_len
                    .checked_sub(4)
                    .ok_or(ParseErrorKind::UnexpectedEof)?,
            ))
        })?;
        // Some fonts have the length field truncated to 16 bits for large subtables
        cursor = cursor.range(0..remaining_len.min(cursor.bytes.len()))?;

        cursor.skip(2)?; // language
        let segment_count = cursor.read_u16()? / 2;
        cursor.skip(6)?; // searchRange, entrySelector, rangeShift

        let vec_len = 2 * usize::from(segment_count);
        let mut end_codes = cursor.split_at(vec_len)?;
        cursor.skip(2)?; // reserved padding
        let mut start_codes = cursor.split_at(vec_len)?;
        let mut id_deltas = cursor.split_at(vec_len)?;
        let mut id_range_offsets = cursor.split_at(vec_len)?;

        let segments = (0..segment_count).map(|_| {
            Ok(SegmentWithDelta {
                start_code: start_codes.read_u16()?,
                end_code: end_codes.read_u16()?,
                id_delta: id_deltas.read_u16()?,
                id_range_offset: id_range_offsets.read_u16()?,
            })
        });

        Ok(Self {
            segments: segments.collect::<Result<_, ParseError>>()?,
            glyph_id_array: cursor,
        })
    }

    fn map_code(&self, code: u32) -> Result<u16, ParseError> {
        let Ok(code) = u16::try_from(code) else {
            return Ok(0);
        };

        let segment_idx = self
            .segments
            .binary_search_by_key(&code, |segment| segment.end_code)
            .unwrap_or_else(|pos| pos);
        let Some(segment) = self.segments.get(segment_idx) else {
            return Ok(0); // `code` exceeds `end_code` for the last segment
        };
        if segment.start_code > code {
            return Ok(0); // missing glyph
        }

        if segment.id_range_offset == 0 {
            Ok(segment.id_delta.wrapping_add(code))
        } else {
            // Offset is counted from the start of `idRangeOffsets`
            let mut byte_offset = 2 * segment_idx;
            byte_offset += usize::from(segment.id_range_offset);
            byte_offset += 2 * usize::from(code - segment.start_code);

            let segments_len = 2 * self.segments.len();
            let Some(byte_offset) = byte_offset.checked_sub(segments_len) else {
                let err = ParseErrorKind::OffsetOutOfBounds(byte_offset);
                return Err(self.glyph_id_array.err(err));
            };
            // ^ Shift the offset to count from the start of `glyphIdArray`
            let glyph_id = self.glyph_id_array.at(byte_offset)?.read_u16()?;
            if glyph_id == 0 {
                Ok(0)
            } else {
                Ok(segment.id_delta.wrapping_add(glyph_id))
            }
        }
    }

    fn mappings(&self) -> Result<Vec<(u32, u16)>, ParseError> {
        let mut mappings = vec![];
        for segment in &self.segments {
            for code in segment.start_code..=segment.end_code {
                if code == u16::MAX {
                    break;
                }
                let glyph_id = self.map_code(code.into())?;
                if glyph_id != 0 {
                    mappings.push((code.into(), glyph_id));
                }
            }
        }
        Ok(mappings)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SequentialMapGroup {
    pub(crate) start_char_code: u32,
    pub(crate) end_char_code: u32,
    pub(crate) start_glyph_id: u32,
}

/// Segmented coverage (format 12) subtable of the `cmap` table.
#[derive(Debug, Default, Clone)]
pub(crate) struct SegmentedCoverage {
    pub(crate) groups: Vec<SequentialMapGroup>,
}

impl SegmentedCoverage {
    pub(crate) const FORMAT: u16 = 12;

    fn parse(mut cursor: Cursor<'_>) -> Result<Self, ParseError> {
        cursor.skip(4)?; // format, reserved
        let remaining_len = cursor.read_u32_checked(|subtable_len| {
            Ok(subtable_len
                .checked_sub(8)
                .ok_or(ParseErrorKind::UnexpectedEof)? as usize)
        })?;
        cursor = cursor.range(0..remaining_len)?;

        cursor.skip(4)?; // language
        let num_groups = cursor.read_u32()?;
        let groups = (0..num_groups).map(|_| {
            Ok(SequentialMapGroup {
                start_char_code: cursor.read_u32()?,
                end_char_code: cursor.read_u32()?,
                start_glyph_id: cursor.read_u32()?,
            })
        });

        Ok(Self {
            groups: groups.collect::<Result<_, ParseError>>()?,
        })
    }

    fn map_code(&self, code: u32) -> u16 {
        let group_idx = self
            .groups
            .binary_search_by_key(&code, |group| group.end_char_code)
            .unwrap_or_else(|pos| pos);
        let Some(group) = self.groups.get(group_idx) else {
            return 0; // `code` exceeds `end_char_code` for the last segment
        };
        if group.start_char_code > code {
            return 0; // missing glyph
        }
        // Overflow is only possible in a corrupt font; such codes are unmapped
        let glyph_id = (code - group.start_char_code).checked_add(group.start_glyph_id);
        glyph_id.and_then(|id| u16::try_from(id).ok()).unwrap_or(0)
    }

    fn mappings(&self) -> Vec<(u32, u16)> {
        let mut mappings = vec![];
        for group in &self.groups {
            let end_char_code = group.end_char_code.min(u32::from(char::MAX));
            for code in group.start_char_code..=end_char_code {
                let glyph_id = self.map_code(code);
                if glyph_id != 0 {
                    mappings.push((code, glyph_id));
                }
            }
        }
        mappings
    }
}

/// Byte encoding table (format 0) or trimmed table mapping (format 6).
#[derive(Debug, Clone)]
pub(crate) struct TrimmedTable<'a> {
    is_byte_encoding: bool,
    first_code: u16,
    glyph_ids: Cursor<'a>,
}

impl<'a> TrimmedTable<'a> {
    const BYTE_ENCODING_FORMAT: u16 = 0;
    pub(crate) const FORMAT: u16 = 6;

    fn parse_byte_encoding(mut cursor: Cursor<'a>) -> Result<Self, ParseError> {
        cursor.skip(6)?; // format, length, language
        let glyph_ids = cursor.split_at(256)?;
        Ok(Self {
            is_byte_encoding: true,
            first_code: 0,
            glyph_ids,
        })
    }

    fn parse(mut cursor: Cursor<'a>) -> Result<Self, ParseError> {
        cursor.skip(6)?; // format, length, language
        let first_code = cursor.read_u16()?;
        let entry_count = cursor.read_u16()?;
        let glyph_ids = cursor.split_at(2 * usize::from(entry_count))?;
        Ok(Self {
            is_byte_encoding: false,
            first_code,
            glyph_ids,
        })
    }

    fn entry_count(&self) -> usize {
        if self.is_byte_encoding {
            256
        } else {
            self.glyph_ids.bytes.len() / 2
        }
    }

    fn map_code(&self, code: u32) -> Result<u16, ParseError> {
        let Some(idx) = code.checked_sub(self.first_code.into()) else {
            return Ok(0);
        };
        let idx = idx as usize;
        if idx >= self.entry_count() {
            return Ok(0);
        }
        if self.is_byte_encoding {
            self.glyph_ids.at(idx)?.read_u8().map(u16::from)
        } else {
            self.glyph_ids.at(2 * idx)?.read_u16()
        }
    }

    fn mappings(&self) -> Result<Vec<(u32, u16)>, ParseError> {
        let mut mappings = vec![];
        for idx in 0..self.entry_count() {
            let code = u32::from(self.first_code) + idx as u32;
            let glyph_id = self.map_code(code)?;
            if glyph_id != 0 {
                mappings.push((code, glyph_id));
            }
        }
        Ok(mappings)
    }
}

/// Supported `cmap` subtable.
#[derive(Debug, Clone)]
pub(crate) enum CmapSubtable<'a> {
    Trimmed(TrimmedTable<'a>),
    Deltas(SegmentDeltas<'a>),
    Coverage(SegmentedCoverage),
}

impl<'a> CmapSubtable<'a> {
    /// Returns `Ok(None)` if the subtable format is not supported.
    pub(crate) fn parse(cursor: Cursor<'a>) -> Result<Option<Self>, ParseError> {
        let format = cursor.range(0..2)?.read_u16()?;
        Ok(Some(match format {
            TrimmedTable::BYTE_ENCODING_FORMAT => {
                Self::Trimmed(TrimmedTable::parse_byte_encoding(cursor)?)
            }
            TrimmedTable::FORMAT => Self::Trimmed(TrimmedTable::parse(cursor)?),
            SegmentDeltas::FORMAT => Self::Deltas(SegmentDeltas::parse(cursor)?),
            SegmentedCoverage::FORMAT => Self::Coverage(SegmentedCoverage::parse(cursor)?),
            _ => {
                log::debug!("skipping `cmap` subtable with unsupported format {format}");
                return Ok(None);
            }
        }))
    }

    fn is_full_range(&self) -> bool {
        matches!(self, Self::Coverage(_))
    }

    pub(crate) fn map_code(&self, code: u32) -> Result<u16, ParseError> {
        match self {
            Self::Trimmed(table) => table.map_code(code),
            Self::Deltas(deltas) => deltas.map_code(code),
            Self::Coverage(coverage) => Ok(coverage.map_code(code)),
        }
    }

    /// Enumerates all `(code, glyph_id)` mappings to non-zero glyph IDs.
    pub(crate) fn mappings(&self) -> Result<Vec<(u32, u16)>, ParseError> {
        match self {
            Self::Trimmed(table) => table.mappings(),
            Self::Deltas(deltas) => deltas.mappings(),
            Self::Coverage(coverage) => Ok(coverage.mappings()),
        }
    }
}

/// Encoding record together with the parsed subtable.
#[derive(Debug, Clone)]
pub(crate) struct EncodingRecord<'a> {
    pub(crate) platform_id: u16,
    pub(crate) encoding_id: u16,
    pub(crate) subtable: CmapSubtable<'a>,
}

/// Parsed `cmap` table. Subtables are split by their purpose.
#[derive(Debug, Clone)]
pub(crate) struct CmapTable<'a> {
    /// Unicode subtables, full-range ones first.
    pub(crate) unicode: Vec<EncodingRecord<'a>>,
    pub(crate) symbol: Option<EncodingRecord<'a>>,
    /// Macintosh-platform subtables.
    pub(crate) legacy: Vec<EncodingRecord<'a>>,
}

impl<'a> CmapTable<'a> {
    pub(crate) const UNICODE_PLATFORM: u16 = 0;
    pub(crate) const MACINTOSH_PLATFORM: u16 = 1;
    pub(crate) const WINDOWS_PLATFORM: u16 = 3;

    pub(super) fn parse(raw: &'a [u8]) -> Result<Self, ParseError> {
        let table_cursor = Cursor::new(raw, Some(TableTag::CMAP));
        let mut cursor = table_cursor;
        cursor.read_u16_checked(|version| {
            if version != 0 {
                return Err(ParseErrorKind::UnexpectedTableVersion(version.into()));
            }
            Ok(())
        })?;

        let num_tables = cursor.read_u16()?;
        let mut this = Self {
            unicode: vec![],
            symbol: None,
            legacy: vec![],
        };
        for _ in 0..num_tables {
            let platform_id = cursor.read_u16()?;
            let encoding_id = cursor.read_u16()?;
            let offset = cursor.read_u32()? as usize;

            let is_unicode = matches!(
                (platform_id, encoding_id),
                (Self::UNICODE_PLATFORM, 0..=4) | (Self::WINDOWS_PLATFORM, 1 | 10)
            );
            let is_symbol = (platform_id, encoding_id) == (Self::WINDOWS_PLATFORM, 0);
            let is_legacy = platform_id == Self::MACINTOSH_PLATFORM;
            if !is_unicode && !is_symbol && !is_legacy {
                log::debug!("skipping `cmap` subtable ({platform_id}, {encoding_id})");
                continue;
            }

            let Some(subtable) = CmapSubtable::parse(table_cursor.at(offset)?)? else {
                continue;
            };
            let record = EncodingRecord {
                platform_id,
                encoding_id,
                subtable,
            };
            if is_unicode {
                this.unicode.push(record);
            } else if is_symbol {
                this.symbol.get_or_insert(record);
            } else {
                this.legacy.push(record);
            }
        }

        if this.unicode.is_empty() {
            return Err(cursor.err(ParseErrorKind::NoSupportedCmap));
        }
        this.unicode.sort_by_key(|record| {
            (
                !record.subtable.is_full_range(),
                record.platform_id,
                record.encoding_id,
            )
        });
        Ok(this)
    }

    /// Maps a char using the first Unicode subtable that has a non-zero mapping for it.
    pub(crate) fn map_char(&self, ch: char) -> Result<u16, ParseError> {
        for record in &self.unicode {
            let glyph_id = record.subtable.map_code(ch.into())?;
            if glyph_id != 0 {
                return Ok(glyph_id);
            }
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format4_subtable(segments: &[(u16, u16, u16)]) -> Vec<u8> {
        // Each segment is `(start, end, delta)`; the final 0xffff segment is added automatically.
        let mut segments = segments.to_vec();
        segments.push((0xffff, 0xffff, 1));
        let seg_count = u16::try_from(segments.len()).unwrap();
        let mut bytes = vec![];
        bytes.extend_from_slice(&4_u16.to_be_bytes());
        bytes.extend_from_slice(&(16 + 8 * seg_count).to_be_bytes());
        bytes.extend_from_slice(&[0; 2]); // language
        bytes.extend_from_slice(&(2 * seg_count).to_be_bytes());
        bytes.extend_from_slice(&[0; 6]);
        for &(_, end, _) in &segments {
            bytes.extend_from_slice(&end.to_be_bytes());
        }
        bytes.extend_from_slice(&[0; 2]);
        for &(start, ..) in &segments {
            bytes.extend_from_slice(&start.to_be_bytes());
        }
        for &(.., delta) in &segments {
            bytes.extend_from_slice(&delta.to_be_bytes());
        }
        bytes.extend(segments.iter().flat_map(|_| [0_u8; 2]));
        bytes
    }

    fn cmap_table(records: &[(u16, u16, &[u8])]) -> Vec<u8> {
        let mut bytes = vec![0, 0];
        bytes.extend_from_slice(&u16::try_from(records.len()).unwrap().to_be_bytes());
        let mut offset = 4 + 8 * records.len();
        for &(platform_id, encoding_id, subtable) in records {
            bytes.extend_from_slice(&platform_id.to_be_bytes());
            bytes.extend_from_slice(&encoding_id.to_be_bytes());
            bytes.extend_from_slice(&u32::try_from(offset).unwrap().to_be_bytes());
            offset += subtable.len();
        }
        for &(.., subtable) in records {
            bytes.extend_from_slice(subtable);
        }
        bytes
    }

    #[test]
    fn mapping_chars_with_format4() {
        // 'A'..='C' map to 1..=3
        let subtable = format4_subtable(&[(0x41, 0x43, 0_u16.wrapping_sub(0x40))]);
        let raw = cmap_table(&[(3, 1, &subtable)]);
        let cmap = CmapTable::parse(&raw).unwrap();
        assert_eq!(cmap.unicode.len(), 1);
        assert_eq!(cmap.map_char('A').unwrap(), 1);
        assert_eq!(cmap.map_char('C').unwrap(), 3);
        assert_eq!(cmap.map_char('D').unwrap(), 0);
        assert_eq!(cmap.map_char('\u{1f600}').unwrap(), 0);

        let mappings = cmap.unicode[0].subtable.mappings().unwrap();
        assert_eq!(mappings, [(0x41, 1), (0x42, 2), (0x43, 3)]);
    }

    #[test]
    fn full_range_subtables_are_preferred() {
        let bmp = format4_subtable(&[(0x41, 0x41, 0_u16.wrapping_sub(0x40))]);
        let mut full = vec![];
        full.extend_from_slice(&12_u16.to_be_bytes());
        full.extend_from_slice(&[0; 2]);
        full.extend_from_slice(&28_u32.to_be_bytes());
        full.extend_from_slice(&[0; 4]);
        full.extend_from_slice(&1_u32.to_be_bytes());
        for value in [0x41_u32, 0x41, 5] {
            full.extend_from_slice(&value.to_be_bytes());
        }

        let raw = cmap_table(&[(3, 1, &bmp), (3, 10, &full)]);
        let cmap = CmapTable::parse(&raw).unwrap();
        assert_eq!(cmap.unicode[0].encoding_id, 10);
        assert_eq!(cmap.map_char('A').unwrap(), 5);
    }

    #[test]
    fn symbol_and_legacy_subtables_are_collected() {
        let unicode = format4_subtable(&[(0x41, 0x41, 0_u16.wrapping_sub(0x40))]);
        let symbol = format4_subtable(&[(0xf041, 0xf041, 0_u16.wrapping_sub(0xf040))]);
        let mut legacy = vec![0, 0, 1, 6, 0, 0];
        legacy.extend((0..=255_u8).map(|code| u8::from(code == b'A')));

        let raw = cmap_table(&[(1, 0, &legacy), (3, 0, &symbol), (3, 1, &unicode)]);
        let cmap = CmapTable::parse(&raw).unwrap();
        let symbol = cmap.symbol.as_ref().unwrap();
        assert_eq!(symbol.subtable.mappings().unwrap(), [(0xf041, 1)]);
        assert_eq!(cmap.legacy.len(), 1);
        assert_eq!(cmap.legacy[0].subtable.mappings().unwrap(), [(0x41, 1)]);
    }

    #[test]
    fn overflowing_format12_glyph_ids_are_unmapped() {
        let coverage = SegmentedCoverage {
            groups: vec![
                SequentialMapGroup {
                    start_char_code: 0x41,
                    end_char_code: 0x42,
                    start_glyph_id: 3,
                },
                SequentialMapGroup {
                    start_char_code: 0x100,
                    end_char_code: 0x1_0000_u32.wrapping_neg(),
                    start_glyph_id: u32::MAX,
                },
            ],
        };
        assert_eq!(coverage.map_code(0x42), 4);
        assert_eq!(coverage.map_code(0x100), 0);
        assert_eq!(coverage.map_code(0x101), 0);
        assert_eq!(coverage.map_code(0x1_0000_u32.wrapping_neg()), 0);
        assert_eq!(coverage.mappings(), [(0x41, 3), (0x42, 4)]);
    }

    #[test]
    fn symbol_only_cmap_is_unsupported() {
        let symbol = format4_subtable(&[(0xf041, 0xf041, 1)]);
        let raw = cmap_table(&[(3, 0, &symbol)]);
        let err = CmapTable::parse(&raw).unwrap_err();
        assert!(matches!(err.kind(), ParseErrorKind::NoSupportedCmap));
        assert!(err.kind().is_unsupported());
    }

    #[test]
    fn unsupported_formats_are_skipped() {
        let format2 = [0, 2, 0, 6, 0, 0];
        let unicode = format4_subtable(&[(0x41, 0x41, 0_u16.wrapping_sub(0x40))]);
        let raw = cmap_table(&[(3, 1, &format2), (0, 3, &unicode)]);
        let cmap = CmapTable::parse(&raw).unwrap();
        assert_eq!(cmap.unicode.len(), 1);
        assert_eq!(cmap.map_char('A').unwrap(), 1);
    }
}

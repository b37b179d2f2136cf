//! OpenType parsing logic.

use core::{fmt, ops};
use std::collections::BTreeMap;

pub(crate) use self::{
    cff::{CffTable, CharString},
    cmap::{
        CmapSubtable, CmapTable, SegmentDeltas, SegmentWithDelta, SegmentedCoverage,
        SequentialMapGroup, TrimmedTable,
    },
    glyph::{
        Glyph, GlyphComponent, GlyphComponentArgs, GlyphWithMetrics, Outline,
        TransformData,
    },
    post::{GlyphNames, PostTable},
};
use crate::{errors::ParseErrorKind, ParseError};

pub(crate) mod cff;
pub(crate) mod charstring;
mod cmap;
mod glyph;
mod post;

/// Four-byte tag identifying a font table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableTag(pub(crate) [u8; 4]);

impl fmt::Debug for TableTag {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "\"{self}\"")
    }
}

impl fmt::Display for TableTag {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in &self.0 {
            let ch = if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '?'
            };
            fmt::Write::write_char(formatter, ch)?;
        }
        Ok(())
    }
}

impl TableTag {
    /// `cmap` table tag.
    pub const CMAP: Self = Self(*b"cmap");
    /// `head` table tag.
    pub const HEAD: Self = Self(*b"head");
    /// `hhea` table tag.
    pub const HHEA: Self = Self(*b"hhea");
    /// `hmtx` table tag.
    pub const HMTX: Self = Self(*b"hmtx");
    /// `maxp` table tag.
    pub const MAXP: Self = Self(*b"maxp");
    /// `name` table tag.
    pub const NAME: Self = Self(*b"name");
    /// `OS/2` table tag.
    pub const OS2: Self = Self(*b"OS/2");
    /// `post` table tag.
    pub const POST: Self = Self(*b"post");
    /// `loca` table tag.
    pub const LOCA: Self = Self(*b"loca");
    /// `glyf` table tag.
    pub const GLYF: Self = Self(*b"glyf");
    /// `cvt ` table tag.
    pub const CVT: Self = Self(*b"cvt ");
    /// `fpgm` table tag.
    pub const FPGM: Self = Self(*b"fpgm");
    /// `prep` table tag.
    pub const PREP: Self = Self(*b"prep");
    /// `gasp` table tag.
    pub const GASP: Self = Self(*b"gasp");
    /// `CFF ` table tag.
    pub const CFF: Self = Self(*b"CFF ");
    /// `CFF2` table tag.
    pub const CFF2: Self = Self(*b"CFF2");

    /// Creates a tag from its bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Returns the tag bytes.
    pub const fn as_bytes(&self) -> [u8; 4] {
        self.0
    }
}

/// Read-only view into font data that tracks its position for error reporting.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cursor<'a> {
    pub(crate) bytes: &'a [u8],
    offset: usize,
    table: Option<TableTag>,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(bytes: &'a [u8], table: Option<TableTag>) -> Self {
        Self {
            bytes,
            offset: 0,
            table,
        }
    }

    pub(crate) fn err(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            kind,
            offset: self.offset,
            table: self.table,
        }
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn skip(&mut self, n: usize) -> Result<(), ParseError> {
        if self.bytes.len() < n {
            return Err(self.err(ParseErrorKind::UnexpectedEof));
        }
        self.bytes = &self.bytes[n..];
        self.offset += n;
        Ok(())
    }

    pub(crate) fn read_byte_array<const N: usize>(&mut self) -> Result<[u8; N], ParseError> {
        let Some((head, tail)) = self.bytes.split_first_chunk::<N>() else {
            return Err(self.err(ParseErrorKind::UnexpectedEof));
        };
        self.bytes = tail;
        self.offset += N;
        Ok(*head)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, ParseError> {
        self.read_byte_array::<1>().map(|[byte]| byte)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, ParseError> {
        self.read_byte_array().map(u16::from_be_bytes)
    }

    pub(crate) fn read_i16(&mut self) -> Result<i16, ParseError> {
        self.read_byte_array().map(i16::from_be_bytes)
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, ParseError> {
        self.read_byte_array().map(u32::from_be_bytes)
    }

    /// Reads a `u16` value and checks it with the provided closure. On error, the error offset
    /// points to the value start.
    pub(crate) fn read_u16_checked<T>(
        &mut self,
        check: impl FnOnce(u16) -> Result<T, ParseErrorKind>,
    ) -> Result<T, ParseError> {
        let start = *self;
        let value = self.read_u16()?;
        check(value).map_err(|kind| start.err(kind))
    }

    pub(crate) fn read_u32_checked<T>(
        &mut self,
        check: impl FnOnce(u32) -> Result<T, ParseErrorKind>,
    ) -> Result<T, ParseError> {
        let start = *self;
        let value = self.read_u32()?;
        check(value).map_err(|kind| start.err(kind))
    }

    /// Splits off the first `len` bytes of this cursor and advances the cursor past them.
    pub(crate) fn split_at(&mut self, len: usize) -> Result<Self, ParseError> {
        let head = self.range(0..len)?;
        self.skip(len)?;
        Ok(head)
    }

    /// Returns a sub-cursor for the specified range relative to the current position.
    pub(crate) fn range(&self, range: ops::Range<usize>) -> Result<Self, ParseError> {
        let bytes = self.bytes.get(range.clone()).ok_or_else(|| {
            self.err(ParseErrorKind::RangeOutOfBounds {
                range: range.clone(),
                len: self.bytes.len(),
            })
        })?;
        Ok(Self {
            bytes,
            offset: self.offset + range.start,
            table: self.table,
        })
    }

    /// Returns a sub-cursor starting at the specified offset relative to the current position.
    pub(crate) fn at(&self, offset: usize) -> Result<Self, ParseError> {
        if offset > self.bytes.len() {
            return Err(self.err(ParseErrorKind::OffsetOutOfBounds(offset)));
        }
        self.range(offset..self.bytes.len())
    }
}

/// Computes an OpenType checksum: the wrapping sum of big-endian `u32` words, with the trailing
/// bytes zero-padded.
pub(crate) fn checksum(data: &[u8]) -> u32 {
    data.chunks(4).fold(0_u32, |acc, chunk| {
        let mut word = [0_u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        acc.wrapping_add(u32::from_be_bytes(word))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LocaFormat {
    Short,
    Long,
}

impl LocaFormat {
    const fn bytes_per_offset(self) -> usize {
        match self {
            Self::Short => 2,
            Self::Long => 4,
        }
    }
}

/// Parsed `head` table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeadTable<'a> {
    pub(crate) raw: &'a [u8],
    pub(crate) units_per_em: u16,
    pub(crate) checksum_adjustment: u32,
    pub(crate) loca_format: LocaFormat,
}

impl<'a> HeadTable<'a> {
    pub(crate) const CHECKSUM_OFFSET: usize = 8;
    pub(crate) const BBOX_OFFSET: usize = 36;
    pub(crate) const LOCA_FORMAT_OFFSET: usize = 50;
    const MIN_LEN: usize = 54;

    fn parse(raw: &'a [u8]) -> Result<Self, ParseError> {
        let mut cursor = Cursor::new(raw, Some(TableTag::HEAD));
        if raw.len() < Self::MIN_LEN {
            return Err(cursor.err(ParseErrorKind::UnexpectedTableLen {
                expected: Self::MIN_LEN,
                actual: raw.len(),
            }));
        }
        cursor.read_u32_checked(|version| {
            if version == 0x_0001_0000 {
                Ok(())
            } else {
                Err(ParseErrorKind::UnexpectedTableVersion(version))
            }
        })?;
        cursor.skip(4)?; // fontRevision
        let checksum_adjustment = cursor.read_u32()?;
        cursor.skip(6)?; // magicNumber, flags
        let units_per_em = cursor.read_u16()?;
        cursor.skip(32)?;
        // ^ created, modified, bounding box, macStyle, lowestRecPPEM, fontDirectionHint

        let loca_format = cursor.read_u16_checked(|format| match format {
            0 => Ok(LocaFormat::Short),
            1 => Ok(LocaFormat::Long),
            _ => Err(ParseErrorKind::UnexpectedTableFormat(format)),
        })?;
        Ok(Self {
            raw,
            units_per_em,
            checksum_adjustment,
            loca_format,
        })
    }
}

/// Parsed `maxp` table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MaxpTable<'a> {
    pub(crate) raw: &'a [u8],
    pub(crate) glyph_count: u16,
}

impl<'a> MaxpTable<'a> {
    pub(crate) const VERSION_0_5: u32 = 0x_0000_5000;
    pub(crate) const VERSION_1_0: u32 = 0x_0001_0000;
    pub(crate) const V1_LEN: usize = 32;

    fn parse(raw: &'a [u8]) -> Result<Self, ParseError> {
        let mut cursor = Cursor::new(raw, Some(TableTag::MAXP));
        let version = cursor.read_u32_checked(|version| match version {
            Self::VERSION_0_5 | Self::VERSION_1_0 => Ok(version),
            _ => Err(ParseErrorKind::UnexpectedTableVersion(version)),
        })?;
        let glyph_count = cursor.read_u16()?;
        if version == Self::VERSION_1_0 && raw.len() < Self::V1_LEN {
            return Err(cursor.err(ParseErrorKind::UnexpectedTableLen {
                expected: Self::V1_LEN,
                actual: raw.len(),
            }));
        }
        if glyph_count == 0 {
            return Err(cursor.err(ParseErrorKind::InvalidValue("glyph count")));
        }
        Ok(Self { raw, glyph_count })
    }

    pub(crate) fn is_v1(&self) -> bool {
        self.raw.len() >= Self::V1_LEN && self.raw[..4] == Self::VERSION_1_0.to_be_bytes()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HheaTable<'a> {
    pub(crate) raw: &'a [u8],
    pub(crate) number_of_h_metrics: u16,
}

impl<'a> HheaTable<'a> {
    pub(crate) const EXPECTED_LEN: usize = 36; // 18 `u16` fields
    pub(crate) const ADVANCE_WIDTH_MAX_OFFSET: usize = 10;

    fn parse(raw: &'a [u8]) -> Result<Self, ParseError> {
        let cursor = Cursor::new(raw, Some(TableTag::HHEA));
        if raw.len() != Self::EXPECTED_LEN {
            return Err(cursor.err(ParseErrorKind::UnexpectedTableLen {
                expected: Self::EXPECTED_LEN,
                actual: raw.len(),
            }));
        }
        let number_of_h_metrics = cursor
            .at(Self::EXPECTED_LEN - 2)?
            .read_u16_checked(|count| {
                if count == 0 {
                    Err(ParseErrorKind::InvalidValue("numberOfHMetrics"))
                } else {
                    Ok(count)
                }
            })?;
        Ok(Self {
            raw,
            number_of_h_metrics,
        })
    }
}

#[derive(Debug)]
pub(crate) struct HmtxTable<'a> {
    raw: &'a [u8],
    number_of_h_metrics: u16,
}

impl<'a> HmtxTable<'a> {
    fn new(raw: &'a [u8], hhea: &HheaTable<'_>, glyph_count: u16) -> Result<Self, ParseError> {
        let cursor = Cursor::new(raw, Some(TableTag::HMTX));
        let number_of_h_metrics = hhea.number_of_h_metrics;
        if number_of_h_metrics > glyph_count {
            return Err(cursor.err(ParseErrorKind::InvalidValue("numberOfHMetrics")));
        }
        let expected_len = 4 * usize::from(number_of_h_metrics)
            + 2 * usize::from(glyph_count - number_of_h_metrics);
        if raw.len() < expected_len {
            return Err(cursor.err(ParseErrorKind::UnexpectedTableLen {
                expected: expected_len,
                actual: raw.len(),
            }));
        }
        Ok(Self {
            raw,
            number_of_h_metrics,
        })
    }

    fn advance_and_lsb(&self, glyph_idx: u16) -> Result<(u16, u16), ParseError> {
        let cursor = Cursor::new(self.raw, Some(TableTag::HMTX));
        if glyph_idx < self.number_of_h_metrics {
            let mut metric = cursor.at(usize::from(glyph_idx) * 4)?;
            Ok((metric.read_u16()?, metric.read_u16()?))
        } else {
            let advance_offset = usize::from(self.number_of_h_metrics - 1) * 4;
            let advance = cursor.at(advance_offset)?.read_u16()?;

            let lsb_offset = usize::from(self.number_of_h_metrics) * 4
                + usize::from(glyph_idx - self.number_of_h_metrics) * 2;
            let lsb = cursor.at(lsb_offset)?.read_u16()?;
            Ok((advance, lsb))
        }
    }
}

#[derive(Debug)]
pub(crate) struct LocaTable<'a> {
    format: LocaFormat,
    bytes: &'a [u8],
}

impl<'a> LocaTable<'a> {
    fn new(format: LocaFormat, glyph_count: u16, bytes: &'a [u8]) -> Result<Self, ParseError> {
        let expected_len = format.bytes_per_offset() * (usize::from(glyph_count) + 1);
        if bytes.len() == expected_len {
            Ok(Self { format, bytes })
        } else {
            let cursor = Cursor::new(bytes, Some(TableTag::LOCA));
            Err(cursor.err(ParseErrorKind::UnexpectedTableLen {
                expected: expected_len,
                actual: bytes.len(),
            }))
        }
    }

    fn glyph_range(&self, glyph_idx: u16) -> Result<ops::Range<usize>, ParseError> {
        let glyph_idx = usize::from(glyph_idx);
        let mut cursor = Cursor::new(self.bytes, Some(TableTag::LOCA));
        let (start, end) = match self.format {
            LocaFormat::Short => {
                cursor.skip(glyph_idx * 2)?;
                let start_offset = usize::from(cursor.read_u16()?) * 2;
                let end_offset = usize::from(cursor.read_u16()?) * 2;
                (start_offset, end_offset)
            }
            LocaFormat::Long => {
                cursor.skip(glyph_idx * 4)?;
                let start_offset = cursor.read_u32()? as usize;
                let end_offset = cursor.read_u32()? as usize;
                (start_offset, end_offset)
            }
        };
        if start > end {
            return Err(cursor.err(ParseErrorKind::InvalidValue("glyph location order")));
        }
        Ok(start..end)
    }
}

/// Kind of glyph outlines contained in a [`Font`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OutlineKind {
    /// TrueType quadratic outlines (`glyf` + `loca` tables).
    TrueType,
    /// PostScript cubic outlines (`CFF ` table).
    Cff,
}

#[derive(Debug)]
pub(crate) enum Outlines<'a> {
    TrueType { loca: LocaTable<'a>, glyf: &'a [u8] },
    Cff(CffTable<'a>),
}

/// OpenType font container: table directory and typed views of the tables necessary for
/// subsetting.
///
/// The font borrows the raw font data and is never mutated; subsetting produces a new container.
#[derive(Debug)]
pub struct Font<'a> {
    tables: BTreeMap<TableTag, &'a [u8]>,
    pub(crate) head: HeadTable<'a>,
    pub(crate) maxp: MaxpTable<'a>,
    pub(crate) hhea: HheaTable<'a>,
    pub(crate) hmtx: HmtxTable<'a>,
    pub(crate) cmap: CmapTable<'a>,
    pub(crate) post: Option<PostTable<'a>>,
    pub(crate) outlines: Outlines<'a>,
}

impl<'a> Font<'a> {
    pub(crate) const TRUETYPE_VERSION: u32 = 0x_0001_0000;
    pub(crate) const APPLE_TRUETYPE_VERSION: u32 = u32::from_be_bytes(*b"true");
    pub(crate) const CFF_VERSION: u32 = u32::from_be_bytes(*b"OTTO");
    pub(crate) const SFNT_CHECKSUM: u32 = 0x_b1b0_afba;
    const TABLE_RECORD_LEN: usize = 16;

    /// Parses a font from the provided bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the font container is malformed, or a required table is missing.
    pub fn new(bytes: &'a [u8]) -> Result<Self, ParseError> {
        let mut cursor = Cursor::new(bytes, None);
        let sfnt_version = cursor.read_u32_checked(|version| match version {
            Self::TRUETYPE_VERSION | Self::APPLE_TRUETYPE_VERSION | Self::CFF_VERSION => {
                Ok(version)
            }
            _ => Err(ParseErrorKind::UnexpectedFontVersion(version)),
        })?;
        let table_count = cursor.read_u16()?;
        cursor.skip(6)?; // searchRange, entrySelector, rangeShift

        let mut tables = BTreeMap::new();
        for _ in 0..table_count {
            let record = cursor.split_at(Self::TABLE_RECORD_LEN)?;
            let (tag, table_bytes) = Self::parse_table_record(record, bytes)?;
            tables.entry(tag).or_insert(table_bytes);
        }

        let require = |tag: TableTag| {
            tables
                .get(&tag)
                .copied()
                .ok_or_else(|| ParseError::missing_table(tag))
        };
        let head = HeadTable::parse(require(TableTag::HEAD)?)?;
        let maxp = MaxpTable::parse(require(TableTag::MAXP)?)?;
        let hhea = HheaTable::parse(require(TableTag::HHEA)?)?;
        let hmtx = HmtxTable::new(require(TableTag::HMTX)?, &hhea, maxp.glyph_count)?;
        let cmap = CmapTable::parse(require(TableTag::CMAP)?)?;
        let post = tables
            .get(&TableTag::POST)
            .map(|raw| PostTable::parse(raw))
            .transpose()?;

        let has_glyf = tables.contains_key(&TableTag::GLYF);
        let outlines = if let Some(cff) = tables.get(&TableTag::CFF).filter(|_| !has_glyf) {
            Outlines::Cff(CffTable::parse(cff, maxp.glyph_count)?)
        } else if has_glyf || sfnt_version != Self::CFF_VERSION {
            let glyf = require(TableTag::GLYF)?;
            let loca = LocaTable::new(head.loca_format, maxp.glyph_count, require(TableTag::LOCA)?)?;
            Outlines::TrueType { loca, glyf }
        } else if tables.contains_key(&TableTag::CFF2) {
            return Err(ParseError::new(
                ParseErrorKind::UnsupportedOutlines,
                Some(TableTag::CFF2),
            ));
        } else {
            return Err(ParseError::missing_table(TableTag::CFF));
        };

        Ok(Self {
            tables,
            head,
            maxp,
            hhea,
            hmtx,
            cmap,
            post,
            outlines,
        })
    }

    fn parse_table_record(
        mut record: Cursor<'_>,
        font_bytes: &'a [u8],
    ) -> Result<(TableTag, &'a [u8]), ParseError> {
        let tag = TableTag(record.read_byte_array()?);
        record.skip(4)?; // checksum
        let offset = record.read_u32()? as usize;
        let len = record.read_u32()? as usize;
        let range = offset..offset.checked_add(len).ok_or_else(|| {
            record.err(ParseErrorKind::OffsetOutOfBounds(offset))
        })?;
        let table_bytes = font_bytes.get(range.clone()).ok_or_else(|| ParseError {
            kind: ParseErrorKind::RangeOutOfBounds {
                range,
                len: font_bytes.len(),
            },
            offset: 0,
            table: Some(tag),
        })?;
        Ok((tag, table_bytes))
    }

    /// Returns the number of glyphs in this font.
    pub fn glyph_count(&self) -> u16 {
        self.maxp.glyph_count
    }

    /// Returns the number of font units per em.
    pub fn units_per_em(&self) -> u16 {
        self.head.units_per_em
    }

    /// Returns the checksum adjustment recorded in the `head` table of the font.
    pub fn checksum_adjustment(&self) -> u32 {
        self.head.checksum_adjustment
    }

    /// Returns the kind of glyph outlines in this font.
    pub fn outline_kind(&self) -> OutlineKind {
        match &self.outlines {
            Outlines::TrueType { .. } => OutlineKind::TrueType,
            Outlines::Cff(_) => OutlineKind::Cff,
        }
    }

    /// Returns raw bytes of the table with the specified tag.
    pub fn table(&self, tag: TableTag) -> Option<&'a [u8]> {
        self.tables.get(&tag).copied()
    }

    /// Iterates over table tags present in the font in the ascending order.
    pub fn tags(&self) -> impl Iterator<Item = TableTag> + '_ {
        self.tables.keys().copied()
    }

    /// Maps a char to a glyph ID using the Unicode subtables of the `cmap` table.
    /// Returns 0 (the missing glyph) if the char is not mapped.
    ///
    /// # Errors
    ///
    /// Returns an error if the `cmap` table data is malformed.
    pub fn map_char(&self, ch: char) -> Result<u16, ParseError> {
        let glyph_id = self.cmap.map_char(ch)?;
        if glyph_id >= self.glyph_count() {
            log::warn!(
                "char {ch:?} is mapped to glyph {glyph_id}, which is out of range; treating as unmapped"
            );
            return Ok(0);
        }
        Ok(glyph_id)
    }

    pub(crate) fn check_glyph_id(&self, glyph_id: u16, table: TableTag) -> Result<(), ParseError> {
        if glyph_id < self.glyph_count() {
            Ok(())
        } else {
            Err(ParseError::new(
                ParseErrorKind::GlyphOutOfRange {
                    glyph_id,
                    glyph_count: self.glyph_count(),
                },
                Some(table),
            ))
        }
    }

    pub(crate) fn glyph(&self, glyph_idx: u16) -> Result<GlyphWithMetrics<'a>, ParseError> {
        let inner = match &self.outlines {
            Outlines::TrueType { loca, glyf } => {
                self.check_glyph_id(glyph_idx, TableTag::GLYF)?;
                let range = loca.glyph_range(glyph_idx)?;
                let raw = Cursor::new(glyf, Some(TableTag::GLYF)).range(range)?;
                Outline::TrueType(Glyph::new(raw)?)
            }
            Outlines::Cff(cff) => {
                self.check_glyph_id(glyph_idx, TableTag::CFF)?;
                Outline::Cff(cff.charstring(glyph_idx)?)
            }
        };
        let (advance, lsb) = self.hmtx.advance_and_lsb(glyph_idx)?;
        Ok(GlyphWithMetrics {
            inner,
            advance,
            lsb,
        })
    }

    /// Returns IDs of the glyphs directly referenced by the outline of the specified glyph.
    pub(crate) fn glyph_components(&self, glyph_idx: u16) -> Result<Vec<u16>, ParseError> {
        Ok(match self.glyph(glyph_idx)?.inner {
            Outline::TrueType(Glyph::Composite { components, .. }) => {
                components.iter().map(|component| component.glyph_idx).collect()
            }
            Outline::TrueType(_) | Outline::Cff(_) => vec![],
        })
    }
}

//! Rebuilding tables of a `FontSubset` and serializing them in OpenType or WOFF2 format.

use core::iter;
use std::collections::BTreeSet;

use self::{cff::CffWriter, cmap::CmapWriter, glyf::GlyphStats};
use crate::{
    errors::RebuildErrorKind,
    font::{checksum, HeadTable, LocaTable, Outlines},
    Error, Font, FontSubset, OutputFormat, RebuildError, TableTag,
};

mod brotli;
mod cff;
mod cmap;
mod glyf;
mod persist;
mod tables;
mod verify;

pub use self::persist::persist;

fn write_u16(writer: &mut Vec<u8>, value: u16) {
    writer.extend_from_slice(&value.to_be_bytes());
}

fn write_u32(writer: &mut Vec<u8>, value: u32) {
    writer.extend_from_slice(&value.to_be_bytes());
}

fn overflow(table: TableTag, what: &'static str) -> RebuildError {
    RebuildError::new(table, RebuildErrorKind::Overflow(what))
}

fn to_u16(value: usize, table: TableTag, what: &'static str) -> Result<u16, RebuildError> {
    u16::try_from(value).map_err(|_| overflow(table, what))
}

fn to_u32(value: usize, table: TableTag, what: &'static str) -> Result<u32, RebuildError> {
    u32::try_from(value).map_err(|_| overflow(table, what))
}

fn uint_base128_len(val: u32) -> usize {
    if val == 0 {
        1
    } else {
        val.ilog2() as usize / 7 + 1
    }
}

#[allow(clippy::cast_possible_truncation)] // intentional
fn write_uint_base128(buffer: &mut Vec<u8>, val: u32) {
    for shift in [28, 21, 14, 7] {
        if val >= 1 << shift {
            buffer.push(0x80 | (val >> shift) as u8);
        }
    }
    buffer.push((val & 127) as u8);
}

/// Tables copied verbatim when present.
const COPIED_TABLES: [TableTag; 2] = [TableTag::NAME, TableTag::GASP];
/// Tables copied only if hinting is retained.
const HINTING_TABLES: [TableTag; 3] = [TableTag::CVT, TableTag::FPGM, TableTag::PREP];

impl FontSubset<'_> {
    /// Serializes this subset to the OpenType format.
    ///
    /// # Errors
    ///
    /// Returns an error if the subset cannot be rebuilt consistently.
    pub fn to_opentype(&self) -> Result<Vec<u8>, Error> {
        self.rebuild()?.into_opentype().map_err(Error::from)
    }

    /// Serializes this subset to the WOFF2 format.
    ///
    /// # Errors
    ///
    /// Returns an error if the subset cannot be rebuilt consistently.
    pub fn to_woff2(&self) -> Result<Vec<u8>, Error> {
        self.rebuild()?.into_woff2().map_err(Error::from)
    }

    /// Serializes this subset to the specified format.
    ///
    /// # Errors
    ///
    /// Returns an error if the subset cannot be rebuilt consistently.
    pub fn to_format(&self, format: OutputFormat) -> Result<Vec<u8>, Error> {
        match format {
            OutputFormat::OpenType => self.to_opentype(),
            OutputFormat::Woff2 => self.to_woff2(),
        }
    }

    fn rebuild(&self) -> Result<FontWriter, Error> {
        let font = &self.font;
        let strip_hinting = !self.options.hinting;
        let glyph_count = to_u16(self.glyphs.len(), TableTag::MAXP, "glyph count")?;
        let mut writer = FontWriter::new(font);
        let mut rebuilt = verify::Rebuilt::default();

        let cmap = CmapWriter::new(self)?;
        writer.write_table(TableTag::CMAP, |buffer| cmap.write(buffer))?;
        rebuilt.cmap_glyph_ids = cmap.glyph_ids().collect();

        if self.options.hinting {
            for tag in HINTING_TABLES {
                if let Some(raw) = font.table(tag) {
                    writer.write_raw_table(tag, raw)?;
                }
            }
        }

        let number_of_h_metrics = writer.write_table(TableTag::HMTX, |buffer| {
            tables::write_hmtx(&self.glyphs, buffer)
        })?;
        let stats = match &font.outlines {
            Outlines::TrueType { .. } => Some(GlyphStats::new(&self.glyphs, strip_hinting)),
            Outlines::Cff(_) => None,
        };
        let advance_width_max = self.glyphs.iter().map(|glyph| glyph.advance).max();
        let extents = stats.as_ref().and_then(|stats| stats.horizontal_extents);
        writer.write_table(TableTag::HHEA, |buffer| {
            font.hhea.write(
                number_of_h_metrics,
                advance_width_max.unwrap_or(0),
                extents,
                buffer,
            );
            Ok(())
        })?;

        writer.write_table(TableTag::MAXP, |buffer| {
            font.maxp
                .write(glyph_count, stats.as_ref(), strip_hinting, buffer);
            Ok(())
        })?;
        rebuilt.maxp_glyph_count = glyph_count;

        for tag in COPIED_TABLES {
            if let Some(raw) = font.table(tag) {
                writer.write_raw_table(tag, raw)?;
            }
        }
        if let Some(os2) = font.table(TableTag::OS2) {
            writer.write_table(TableTag::OS2, |buffer| {
                tables::write_os2(os2, &self.char_map, buffer);
                Ok(())
            })?;
        }
        if let Some(post) = &font.post {
            writer.write_table(TableTag::POST, |buffer| {
                post.write_subset(
                    self.closure.old_glyph_ids(),
                    self.options.glyph_names,
                    buffer,
                )
            })?;
        }

        let loca_format = match &font.outlines {
            Outlines::TrueType { .. } => {
                let locations = writer.write_table(TableTag::GLYF, |buffer| {
                    Ok(glyf::write_glyphs(&self.glyphs, strip_hinting, buffer))
                })?;
                let loca_format = writer.write_table(TableTag::LOCA, |buffer| {
                    LocaTable::write(&locations, buffer)
                })?;
                rebuilt.glyf_len = writer.last_table_len(TableTag::GLYF);
                rebuilt.locations = Some(locations);
                Some(loca_format)
            }
            Outlines::Cff(cff) => {
                let cff = CffWriter::new(cff, &self.glyphs, self.options.desubroutinize)?;
                writer.write_table(TableTag::CFF, |buffer| cff.write(buffer))?;
                rebuilt.charstring_count = Some(cff.charstring_count());
                None
            }
        };

        let bbox = stats.as_ref().and_then(|stats| stats.bbox);
        writer.write_table(TableTag::HEAD, |buffer| {
            font.head.write(loca_format, bbox, buffer);
            Ok(())
        })?;

        self.log_dropped_tables(&writer);
        rebuilt.verify(self)?;
        Ok(writer)
    }

    fn log_dropped_tables(&self, writer: &FontWriter) {
        let written: BTreeSet<_> = writer.tables.iter().map(|record| record.tag).collect();
        let dropped: Vec<_> = self
            .font
            .tags()
            .filter(|tag| !written.contains(tag))
            .map(|tag| tag.to_string())
            .collect();
        if !dropped.is_empty() {
            log::info!("dropped font tables: {}", dropped.join(", "));
        }
    }
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(test, derive(PartialEq))]
struct TableRecord {
    tag: TableTag,
    checksum: u32,
    /// Offset is initially recorded relative to the table data start. It's always 4-byte aligned.
    offset: u32,
    length: u32,
}

impl TableRecord {
    const BYTE_LEN: usize = 16;
    /// Tag referring to an arbitrary table in WOFF2 table flags.
    const WOFF2_ARBITRARY_TAG: u8 = 63;
    const WOFF2_KNOWN_TAGS: [TableTag; 18] = [
        TableTag::CMAP,
        TableTag::HEAD,
        TableTag::HHEA,
        TableTag::HMTX,
        TableTag::MAXP,
        TableTag::NAME,
        TableTag::OS2,
        TableTag::POST,
        TableTag::CVT,
        TableTag::FPGM,
        TableTag::GLYF,
        TableTag::LOCA,
        TableTag::PREP,
        TableTag::CFF,
        TableTag::new(*b"VORG"),
        TableTag::new(*b"EBDT"),
        TableTag::new(*b"EBLC"),
        TableTag::GASP,
    ];

    fn write_opentype(&self, writer: &mut Vec<u8>) {
        writer.extend_from_slice(&self.tag.0);
        write_u32(writer, self.checksum);
        write_u32(writer, self.offset);
        write_u32(writer, self.length);
    }

    fn self_checksum(&self) -> u32 {
        u32::from_be_bytes(self.tag.0)
            .wrapping_add(self.checksum)
            .wrapping_add(self.offset)
            .wrapping_add(self.length)
    }

    fn woff2_tag_index(&self) -> Option<u8> {
        let idx = Self::WOFF2_KNOWN_TAGS
            .iter()
            .position(|&tag| tag == self.tag)?;
        u8::try_from(idx).ok()
    }

    fn woff2_len(&self) -> usize {
        let tag_len = if self.woff2_tag_index().is_some() {
            0
        } else {
            4
        };
        1 /* flags */ + tag_len + uint_base128_len(self.length)
    }

    fn write_woff2(&self, buffer: &mut Vec<u8>) {
        const NULL_TRANSFORM: u8 = 0b_1100_0000;

        if let Some(idx) = self.woff2_tag_index() {
            let is_outline_table = matches!(self.tag, TableTag::GLYF | TableTag::LOCA);
            buffer.push(if is_outline_table {
                idx | NULL_TRANSFORM
            } else {
                idx
            });
        } else {
            buffer.push(Self::WOFF2_ARBITRARY_TAG);
            buffer.extend_from_slice(&self.tag.0);
        }
        write_uint_base128(buffer, self.length);
    }
}

#[derive(Debug, Clone)]
struct FontWriter {
    sfnt_version: u32,
    tables: Vec<TableRecord>,
    /// Contains *aligned* table data
    table_data: Vec<u8>,
}

impl FontWriter {
    const SFNT_HEADER_LEN: usize = 12;
    const WOFF2_HEADER_LEN: usize = 48;

    fn new(font: &Font<'_>) -> Self {
        let sfnt_version = match &font.outlines {
            Outlines::TrueType { .. } => Font::TRUETYPE_VERSION,
            Outlines::Cff(_) => Font::CFF_VERSION,
        };
        Self {
            sfnt_version,
            tables: vec![],
            table_data: vec![],
        }
    }

    fn write_table<T>(
        &mut self,
        tag: TableTag,
        with: impl FnOnce(&mut Vec<u8>) -> Result<T, RebuildError>,
    ) -> Result<T, RebuildError> {
        let offset = self.table_data.len();
        debug_assert_eq!(offset % 4, 0, "unaligned offset: {offset}");

        let output = with(&mut self.table_data)?;
        let length = self.table_data.len() - offset;
        // Pad the table heap to a 4-byte boundary.
        if length % 4 > 0 {
            let zero_padding = 4 - length % 4;
            self.table_data.extend(iter::repeat_n(0_u8, zero_padding));
        }
        log::debug!("rebuilt table `{tag}` ({length} bytes)");

        self.tables.push(TableRecord {
            tag,
            checksum: checksum(&self.table_data[offset..]),
            offset: to_u32(offset, tag, "table offset")?,
            length: to_u32(length, tag, "table length")?,
        });
        Ok(output)
    }

    fn write_raw_table(&mut self, tag: TableTag, content: &[u8]) -> Result<(), RebuildError> {
        self.write_table(tag, |buffer| {
            buffer.extend_from_slice(content);
            Ok(())
        })
    }

    fn last_table_len(&self, tag: TableTag) -> usize {
        self.tables
            .iter()
            .rfind(|record| record.tag == tag)
            .map_or(0, |record| record.length as usize)
    }

    fn write_sfnt_header(&self) -> Result<Vec<u8>, RebuildError> {
        let mut buffer = vec![];
        write_u32(&mut buffer, self.sfnt_version);

        let table_count = to_u16(self.tables.len(), TableTag::HEAD, "table count")?;
        write_u16(&mut buffer, table_count);
        let entry_selector = table_count.checked_ilog2().unwrap_or(0);
        let search_range = 16_u16 << entry_selector;
        write_u16(&mut buffer, search_range);
        write_u16(&mut buffer, u16::try_from(entry_selector).unwrap_or_default());
        let range_shift = table_count.saturating_mul(16).saturating_sub(search_range);
        write_u16(&mut buffer, range_shift);

        debug_assert_eq!(buffer.len(), Self::SFNT_HEADER_LEN);
        Ok(buffer)
    }

    /// Returns the starting offset of table data.
    fn data_offset(&self) -> usize {
        Self::SFNT_HEADER_LEN + self.tables.len() * TableRecord::BYTE_LEN
    }

    fn into_opentype(mut self) -> Result<Vec<u8>, RebuildError> {
        let mut buffer = self.write_sfnt_header()?;
        self.adjust_data(checksum(&buffer))?;

        self.tables.sort_unstable_by_key(|record| record.tag);
        for record in &self.tables {
            record.write_opentype(&mut buffer);
        }
        buffer.extend(self.table_data);
        Ok(buffer)
    }

    fn adjust_data(&mut self, sfnt_header_checksum: u32) -> Result<(), RebuildError> {
        let data_offset = self.data_offset();
        let data_offset_u32 = to_u32(data_offset, TableTag::HEAD, "table data offset")?;

        let mut file_checksum = sfnt_header_checksum;
        for record in &mut self.tables {
            record.offset = record
                .offset
                .checked_add(data_offset_u32)
                .ok_or_else(|| overflow(record.tag, "table offset"))?;
            file_checksum = file_checksum
                .wrapping_add(record.self_checksum())
                .wrapping_add(record.checksum);
        }
        self.patch_head_table(file_checksum, data_offset)
    }

    fn patch_head_table(
        &mut self,
        file_checksum: u32,
        data_offset: usize,
    ) -> Result<(), RebuildError> {
        let checksum_adjustment = Font::SFNT_CHECKSUM.wrapping_sub(file_checksum);
        let head = self
            .tables
            .iter()
            .find(|record| record.tag == TableTag::HEAD)
            .ok_or_else(|| overflow(TableTag::HEAD, "missing table"))?;
        // At this point, the table offset already includes the heap offset, so we need to subtract it.
        let offset = head.offset as usize - data_offset + HeadTable::CHECKSUM_OFFSET;
        self.table_data[offset..offset + 4].copy_from_slice(&checksum_adjustment.to_be_bytes());
        Ok(())
    }

    fn into_woff2(mut self) -> Result<Vec<u8>, RebuildError> {
        const WOFF2_SIGNATURE: u32 = 0x_774f_4632;

        let sfnt_header = self.write_sfnt_header()?;
        self.adjust_data(checksum(&sfnt_header))?;

        let compressed_data = self.compress_data()?;
        let tables_len = self
            .tables
            .iter()
            .map(TableRecord::woff2_len)
            .sum::<usize>();
        let unpadded_len = Self::WOFF2_HEADER_LEN + tables_len + compressed_data.len();
        let file_len = unpadded_len.next_multiple_of(4);
        let decompressed_len = self.data_offset() + self.table_data.len();

        let mut buffer = Vec::with_capacity(file_len);
        write_u32(&mut buffer, WOFF2_SIGNATURE);
        write_u32(&mut buffer, self.sfnt_version);
        write_u32(&mut buffer, to_u32(file_len, TableTag::HEAD, "file length")?);
        let table_count = to_u16(self.tables.len(), TableTag::HEAD, "table count")?;
        write_u16(&mut buffer, table_count);
        write_u16(&mut buffer, 0); // reserved
        write_u32(
            &mut buffer,
            to_u32(decompressed_len, TableTag::HEAD, "sfnt length")?,
        );
        write_u32(
            &mut buffer,
            to_u32(compressed_data.len(), TableTag::HEAD, "compressed length")?,
        );
        write_u32(&mut buffer, 0); // WOFF version
        write_u32(&mut buffer, 0); // metadata offset
        write_u32(&mut buffer, 0); // metadata length
        write_u32(&mut buffer, 0); // original metadata length
        write_u32(&mut buffer, 0); // private block offset
        write_u32(&mut buffer, 0); // private block length
        debug_assert_eq!(buffer.len(), Self::WOFF2_HEADER_LEN);

        for record in &self.tables {
            record.write_woff2(&mut buffer);
        }
        debug_assert_eq!(buffer.len(), Self::WOFF2_HEADER_LEN + tables_len);
        buffer.extend(compressed_data);

        // Pad `buffer` to be 4-byte aligned. This is required even though we don't have metadata or private blocks.
        buffer.resize(file_len, 0);
        Ok(buffer)
    }
}

//! Rebuilding the `cmap` table.

use core::mem;
use std::collections::BTreeSet;

use super::{to_u16, to_u32, write_u16, write_u32};
use crate::{
    font::{
        CmapSubtable, CmapTable, Cursor, SegmentDeltas, SegmentWithDelta, SegmentedCoverage,
        SequentialMapGroup, TrimmedTable,
    },
    Error, FontSubset, RebuildError, TableTag,
};

/// Mappings `(code, new_glyph_id)` sorted by code.
type Mappings = Vec<(u32, u16)>;

impl SegmentedCoverage {
    fn from_mappings(mappings: &[(u32, u16)]) -> Self {
        let mut groups = vec![];
        let [(first_code, first_id), rest @ ..] = mappings else {
            return Self::default();
        };
        let mut current_group = SequentialMapGroup {
            start_char_code: *first_code,
            end_char_code: *first_code,
            start_glyph_id: (*first_id).into(),
        };

        for &(code, glyph_id) in rest {
            let expected_id =
                current_group.start_glyph_id + (code - current_group.start_char_code);
            if code == current_group.end_char_code + 1 && u32::from(glyph_id) == expected_id {
                current_group.end_char_code += 1;
            } else {
                let prev_group = mem::replace(
                    &mut current_group,
                    SequentialMapGroup {
                        start_char_code: code,
                        end_char_code: code,
                        start_glyph_id: glyph_id.into(),
                    },
                );
                groups.push(prev_group);
            }
        }

        groups.push(current_group);
        Self { groups }
    }

    fn write(&self, writer: &mut Vec<u8>) -> Result<(), RebuildError> {
        let subtable_len = 16 + 12 * self.groups.len();
        write_u16(writer, Self::FORMAT);
        write_u16(writer, 0); // reserved
        write_u32(writer, to_u32(subtable_len, TableTag::CMAP, "subtable length")?);
        write_u32(writer, 0); // language
        let group_count = to_u32(self.groups.len(), TableTag::CMAP, "group count")?;
        write_u32(writer, group_count);
        for group in &self.groups {
            write_u32(writer, group.start_char_code);
            write_u32(writer, group.end_char_code);
            write_u32(writer, group.start_glyph_id);
        }
        Ok(())
    }
}

impl SegmentDeltas<'static> {
    /// Creates a subtable from BMP mappings. Codes must be less than `0xffff`.
    fn from_mappings(mappings: &[(u32, u16)]) -> Self {
        let coverage = SegmentedCoverage::from_mappings(mappings);
        #[allow(clippy::cast_possible_truncation)]
        // `_ as u16` is safe since all codes and glyph IDs fit into `u16`
        let delta_segments = coverage.groups.iter().map(|group| {
            let start_code = group.start_char_code as u16;
            SegmentWithDelta {
                start_code,
                end_code: group.end_char_code as u16,
                id_delta: (group.start_glyph_id as u16).wrapping_sub(start_code),
                id_range_offset: 0,
            }
        });
        // Final segment with `start_code == end_code == 0xffff` mapping to the missing glyph.
        let delta_segments = delta_segments.chain([SegmentWithDelta {
            start_code: u16::MAX,
            end_code: u16::MAX,
            id_delta: 1,
            id_range_offset: 0,
        }]);
        Self {
            segments: delta_segments.collect(),
            glyph_id_array: Cursor::new(&[], Some(TableTag::CMAP)),
        }
    }
}

impl SegmentDeltas<'_> {
    fn byte_len(&self) -> usize {
        16 + 8 * self.segments.len() + self.glyph_id_array.bytes.len()
    }

    fn write(&self, writer: &mut Vec<u8>) -> Result<(), RebuildError> {
        let subtable_len = self.byte_len();
        write_u16(writer, Self::FORMAT);
        write_u16(writer, to_u16(subtable_len, TableTag::CMAP, "subtable length")?);
        write_u16(writer, 0); // language

        let segment_count = to_u16(self.segments.len(), TableTag::CMAP, "segment count")?;
        let seg_count_x2 = segment_count
            .checked_mul(2)
            .ok_or_else(|| super::overflow(TableTag::CMAP, "segment count"))?;
        write_u16(writer, seg_count_x2);
        let entry_selector = segment_count.checked_ilog2().unwrap_or(0);
        let search_range = 2_u16 << entry_selector;
        write_u16(writer, search_range);
        write_u16(writer, u16::try_from(entry_selector).unwrap_or_default());
        write_u16(writer, seg_count_x2 - search_range);

        for segment in &self.segments {
            write_u16(writer, segment.end_code);
        }
        write_u16(writer, 0); // reserved padding
        for segment in &self.segments {
            write_u16(writer, segment.start_code);
        }
        for segment in &self.segments {
            write_u16(writer, segment.id_delta);
        }
        for segment in &self.segments {
            write_u16(writer, segment.id_range_offset);
        }
        writer.extend_from_slice(self.glyph_id_array.bytes);
        Ok(())
    }
}

impl TrimmedTable<'_> {
    /// Writes a trimmed table mapping (format 6) covering the range of `mappings`.
    /// Codes must fit into `u16`.
    fn write_mappings(mappings: &[(u32, u16)], writer: &mut Vec<u8>) -> Result<(), RebuildError> {
        let (Some(&(first_code, _)), Some(&(last_code, _))) = (mappings.first(), mappings.last())
        else {
            return Ok(());
        };
        let entry_count = (last_code - first_code) as usize + 1;
        let subtable_len = 10 + 2 * entry_count;
        write_u16(writer, Self::FORMAT);
        write_u16(writer, to_u16(subtable_len, TableTag::CMAP, "subtable length")?);
        write_u16(writer, 0); // language
        write_u16(writer, to_u16(first_code as usize, TableTag::CMAP, "char code")?);
        write_u16(writer, to_u16(entry_count, TableTag::CMAP, "entry count")?);

        let mut glyph_ids = vec![0_u16; entry_count];
        for &(code, glyph_id) in mappings {
            glyph_ids[(code - first_code) as usize] = glyph_id;
        }
        for glyph_id in glyph_ids {
            write_u16(writer, glyph_id);
        }
        Ok(())
    }
}

/// Rebuilt `cmap` table: encoding records pointing to deduplicated subtables.
#[derive(Debug)]
pub(super) struct CmapWriter {
    /// `(platform_id, encoding_id, subtable_idx)` sorted by the platform and encoding.
    records: Vec<(u16, u16, usize)>,
    subtables: Vec<Vec<u8>>,
    glyph_ids: BTreeSet<u16>,
}

impl CmapWriter {
    const UNICODE_BMP_ENCODING: u16 = 3;
    const UNICODE_FULL_ENCODING: u16 = 4;
    const WINDOWS_SYMBOL_ENCODING: u16 = 0;
    const WINDOWS_BMP_ENCODING: u16 = 1;
    const WINDOWS_FULL_ENCODING: u16 = 10;

    pub(super) fn new(subset: &FontSubset<'_>) -> Result<Self, Error> {
        let mut this = Self {
            records: vec![],
            subtables: vec![],
            glyph_ids: BTreeSet::new(),
        };

        let unicode: Mappings = subset
            .char_map
            .iter()
            .map(|&(ch, glyph_id)| (u32::from(ch), glyph_id))
            .collect();
        let bmp: Mappings = unicode
            .iter()
            .copied()
            .filter(|&(code, _)| code < u32::from(u16::MAX))
            .collect();

        let bmp_subtable = SegmentDeltas::from_mappings(&bmp);
        let has_bmp_subtable = bmp_subtable.byte_len() <= usize::from(u16::MAX);
        if has_bmp_subtable {
            let mut buffer = vec![];
            bmp_subtable.write(&mut buffer)?;
            let bmp_idx = this.push_subtable(buffer, &bmp);
            this.records.push((CmapTable::UNICODE_PLATFORM, Self::UNICODE_BMP_ENCODING, bmp_idx));
            this.records.push((CmapTable::WINDOWS_PLATFORM, Self::WINDOWS_BMP_ENCODING, bmp_idx));
        } else {
            log::warn!(
                "{} BMP segments do not fit into a format 4 `cmap` subtable; \
                 only the format 12 subtable will be written",
                bmp_subtable.segments.len()
            );
        }

        if !has_bmp_subtable || bmp.len() < unicode.len() {
            let mut buffer = vec![];
            SegmentedCoverage::from_mappings(&unicode).write(&mut buffer)?;
            let full_idx = this.push_subtable(buffer, &unicode);
            this.records.push((CmapTable::UNICODE_PLATFORM, Self::UNICODE_FULL_ENCODING, full_idx));
            this.records.push((CmapTable::WINDOWS_PLATFORM, Self::WINDOWS_FULL_ENCODING, full_idx));
        }

        let cmap = &subset.font.cmap;
        if subset.options.legacy_cmap {
            for record in &cmap.legacy {
                let is_duplicate = this.records.iter().any(|&(platform_id, encoding_id, _)| {
                    (platform_id, encoding_id) == (record.platform_id, record.encoding_id)
                });
                if is_duplicate {
                    continue;
                }
                let mappings = Self::retained_mappings(subset, &record.subtable)?;
                if mappings.is_empty() {
                    log::debug!(
                        "skipping legacy `cmap` subtable ({}, {}) with no retained glyphs",
                        record.platform_id,
                        record.encoding_id
                    );
                    continue;
                }
                let mut buffer = vec![];
                TrimmedTable::write_mappings(&mappings, &mut buffer)?;
                let idx = this.push_subtable(buffer, &mappings);
                this.records.push((record.platform_id, record.encoding_id, idx));
            }
        }

        if let Some(record) = cmap.symbol.as_ref().filter(|_| subset.options.symbol_cmap) {
            let mappings = Self::retained_mappings(subset, &record.subtable)?;
            if !mappings.is_empty() {
                let mut buffer = vec![];
                SegmentDeltas::from_mappings(&mappings).write(&mut buffer)?;
                let idx = this.push_subtable(buffer, &mappings);
                this.records.push((CmapTable::WINDOWS_PLATFORM, Self::WINDOWS_SYMBOL_ENCODING, idx));
            }
        }

        this.records
            .sort_unstable_by_key(|&(platform_id, encoding_id, _)| (platform_id, encoding_id));
        Ok(this)
    }

    /// Restricts mappings of a legacy or symbol subtable to retained glyphs. Such subtables
    /// never extend the glyph closure.
    fn retained_mappings(
        subset: &FontSubset<'_>,
        subtable: &CmapSubtable<'_>,
    ) -> Result<Mappings, Error> {
        let mappings = subtable.mappings()?;
        Ok(mappings
            .into_iter()
            .filter(|&(code, _)| code < u32::from(u16::MAX))
            .filter_map(|(code, old_id)| Some((code, subset.closure.new_glyph_id(old_id)?)))
            .filter(|&(_, new_id)| new_id != 0)
            .collect())
    }

    fn push_subtable(&mut self, subtable: Vec<u8>, mappings: &[(u32, u16)]) -> usize {
        self.glyph_ids
            .extend(mappings.iter().map(|&(_, glyph_id)| glyph_id));
        self.subtables.push(subtable);
        self.subtables.len() - 1
    }

    /// Returns all glyph IDs referenced by the rebuilt subtables.
    pub(super) fn glyph_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.glyph_ids.iter().copied()
    }

    pub(super) fn write(&self, writer: &mut Vec<u8>) -> Result<(), RebuildError> {
        write_u16(writer, 0); // table version
        let record_count = to_u16(self.records.len(), TableTag::CMAP, "subtable count")?;
        write_u16(writer, record_count);

        let mut subtable_offsets = Vec::with_capacity(self.subtables.len());
        let mut offset = 4 + 8 * self.records.len();
        for subtable in &self.subtables {
            subtable_offsets.push(to_u32(offset, TableTag::CMAP, "subtable offset")?);
            offset += subtable.len();
        }
        for &(platform_id, encoding_id, subtable_idx) in &self.records {
            write_u16(writer, platform_id);
            write_u16(writer, encoding_id);
            write_u32(writer, subtable_offsets[subtable_idx]);
        }
        for subtable in &self.subtables {
            writer.extend_from_slice(subtable);
        }
        Ok(())
    }
}

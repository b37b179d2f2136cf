//! Rebuilding header, metrics and naming tables.

use std::collections::BTreeMap;

use super::{
    glyf::{GlyphStats, HorizontalExtents},
    to_u16, write_u16, write_u32,
};
use crate::{
    font::{
        GlyphNames, GlyphWithMetrics, HeadTable, HheaTable, LocaFormat, MaxpTable, PostTable,
    },
    RebuildError, TableTag,
};

/// Writes the `hmtx` table collapsing trailing glyphs with equal advances into the LSB-only tail.
/// Returns the number of full metric records.
pub(super) fn write_hmtx(
    glyphs: &[GlyphWithMetrics<'_>],
    writer: &mut Vec<u8>,
) -> Result<u16, RebuildError> {
    let mut number_of_h_metrics = glyphs.len();
    while let Some([prev, current]) = glyphs[..number_of_h_metrics].last_chunk::<2>() {
        if prev.advance != current.advance {
            break;
        }
        number_of_h_metrics -= 1;
    }

    for (i, glyph) in glyphs.iter().enumerate() {
        if i < number_of_h_metrics {
            write_u16(writer, glyph.advance);
        }
        write_u16(writer, glyph.lsb);
    }
    to_u16(number_of_h_metrics, TableTag::HMTX, "numberOfHMetrics")
}

impl HheaTable<'_> {
    const MIN_LEFT_SIDE_BEARING_OFFSET: usize = 12;
    const MIN_RIGHT_SIDE_BEARING_OFFSET: usize = 14;
    const X_MAX_EXTENT_OFFSET: usize = 16;

    /// Writes the table with recomputed metric limits. Side bearings and the extent are kept
    /// from the source font if `extents` are not known (e.g., for CFF outlines).
    pub(super) fn write(
        &self,
        number_of_h_metrics: u16,
        advance_width_max: u16,
        extents: Option<HorizontalExtents>,
        writer: &mut Vec<u8>,
    ) {
        let start = writer.len();
        writer.extend_from_slice(&self.raw[..Self::EXPECTED_LEN - 2]);
        write_u16(writer, number_of_h_metrics);
        let table = &mut writer[start..];
        let mut patch = |offset: usize, value: [u8; 2]| {
            table[offset..offset + 2].copy_from_slice(&value);
        };
        patch(Self::ADVANCE_WIDTH_MAX_OFFSET, advance_width_max.to_be_bytes());
        if let Some(extents) = extents {
            patch(
                Self::MIN_LEFT_SIDE_BEARING_OFFSET,
                extents.min_left_side_bearing.to_be_bytes(),
            );
            patch(
                Self::MIN_RIGHT_SIDE_BEARING_OFFSET,
                extents.min_right_side_bearing.to_be_bytes(),
            );
            patch(Self::X_MAX_EXTENT_OFFSET, extents.x_max_extent.to_be_bytes());
        }
    }
}

impl MaxpTable<'_> {
    const GLYPH_COUNT_OFFSET: usize = 4;
    const MAX_ZONES_OFFSET: usize = 14;
    /// `maxTwilightPoints` through `maxStackElements`.
    const PROGRAM_LIMITS: core::ops::Range<usize> = 16..26;

    /// Writes the table with the updated glyph count. For version 1.0 tables of TrueType fonts,
    /// `stats` are used to recompute outline limits.
    pub(super) fn write(
        &self,
        glyph_count: u16,
        stats: Option<&GlyphStats>,
        strip_hinting: bool,
        writer: &mut Vec<u8>,
    ) {
        let start = writer.len();
        writer.extend_from_slice(self.raw);
        let table = &mut writer[start..];
        let mut patch = |offset: usize, value: u16| {
            table[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
        };
        patch(Self::GLYPH_COUNT_OFFSET, glyph_count);

        let Some(stats) = stats.filter(|_| self.is_v1()) else {
            return;
        };
        patch(6, stats.max_points);
        patch(8, stats.max_contours);
        patch(10, stats.max_composite_points);
        patch(12, stats.max_composite_contours);
        patch(26, stats.max_size_of_instructions);
        patch(28, stats.max_component_elements);
        patch(30, stats.max_component_depth);
        if strip_hinting {
            patch(Self::MAX_ZONES_OFFSET, 1);
            table[Self::PROGRAM_LIMITS].fill(0);
        }
    }
}

impl HeadTable<'_> {
    /// Writes the table with a zeroed checksum adjustment (it is patched once the whole font
    /// is laid out).
    pub(super) fn write(
        &self,
        loca_format: Option<LocaFormat>,
        bbox: Option<[i16; 4]>,
        writer: &mut Vec<u8>,
    ) {
        let start = writer.len();
        writer.extend_from_slice(self.raw);
        let table = &mut writer[start..];
        table[Self::CHECKSUM_OFFSET..Self::CHECKSUM_OFFSET + 4].fill(0);

        if let Some(bbox) = bbox {
            for (i, value) in bbox.into_iter().enumerate() {
                let offset = Self::BBOX_OFFSET + 2 * i;
                table[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
            }
        }
        if let Some(format) = loca_format {
            let format: u16 = match format {
                LocaFormat::Short => 0,
                LocaFormat::Long => 1,
            };
            let offset = Self::LOCA_FORMAT_OFFSET;
            table[offset..offset + 2].copy_from_slice(&format.to_be_bytes());
        }
    }
}

impl PostTable<'_> {
    /// Writes the table for retained glyphs (identified by their original IDs). If names are
    /// not retained or not present, writes a version 3.0 table.
    pub(super) fn write_subset(
        &self,
        old_glyph_ids: &[u16],
        keep_names: bool,
        writer: &mut Vec<u8>,
    ) -> Result<(), RebuildError> {
        let names = self.names.as_ref().filter(|_| keep_names);
        let version = if names.is_some() {
            Self::VERSION_2
        } else {
            Self::VERSION_3
        };
        write_u32(writer, version);
        writer.extend_from_slice(&self.header[4..]);
        let Some(names) = names else {
            return Ok(());
        };

        let glyph_count = to_u16(old_glyph_ids.len(), TableTag::POST, "glyph count")?;
        write_u16(writer, glyph_count);
        let mut custom_names = vec![];
        let mut custom_indices = BTreeMap::new();
        for &old_id in old_glyph_ids {
            let name_idx = match names {
                GlyphNames::Standard if old_id < Self::STANDARD_NAMES => old_id,
                GlyphNames::Standard => 0,
                GlyphNames::Indexed { indices, custom } => {
                    let idx = indices.get(usize::from(old_id)).copied().unwrap_or(0);
                    match idx.checked_sub(Self::STANDARD_NAMES) {
                        None => idx,
                        Some(custom_idx) => {
                            let new_idx = *custom_indices.entry(custom_idx).or_insert_with(|| {
                                custom_names.push(custom[usize::from(custom_idx)]);
                                custom_names.len() - 1
                            });
                            let new_idx = usize::from(Self::STANDARD_NAMES) + new_idx;
                            to_u16(new_idx, TableTag::POST, "glyph name index")?
                        }
                    }
                }
            };
            write_u16(writer, name_idx);
        }

        for name in custom_names {
            // Lengths come from Pascal strings, so they always fit into a byte
            writer.push(u8::try_from(name.len()).unwrap_or(u8::MAX));
            writer.extend_from_slice(name);
        }
        Ok(())
    }
}

/// Copies the `OS/2` table patching the char index range from the retained char map.
pub(super) fn write_os2(raw: &[u8], char_map: &[(char, u16)], writer: &mut Vec<u8>) {
    const FIRST_CHAR_OFFSET: usize = 64;
    const LAST_CHAR_OFFSET: usize = 66;

    let start = writer.len();
    writer.extend_from_slice(raw);
    let (Some(&(first, _)), Some(&(last, _))) = (char_map.first(), char_map.last()) else {
        return;
    };
    if raw.len() < LAST_CHAR_OFFSET + 2 {
        return;
    }
    let clamp = |ch: char| u16::try_from(u32::from(ch)).unwrap_or(u16::MAX);
    let table = &mut writer[start..];
    table[FIRST_CHAR_OFFSET..FIRST_CHAR_OFFSET + 2].copy_from_slice(&clamp(first).to_be_bytes());
    table[LAST_CHAR_OFFSET..LAST_CHAR_OFFSET + 2].copy_from_slice(&clamp(last).to_be_bytes());
}

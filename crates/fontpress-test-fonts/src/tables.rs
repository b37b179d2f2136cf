//! Generation of sfnt tables.

use std::collections::BTreeMap;

use crate::{FontBuilder, Shape, TestGlyph};

pub(crate) fn push_u16(buffer: &mut Vec<u8>, value: u16) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn push_i16(buffer: &mut Vec<u8>, value: i16) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn push_u32(buffer: &mut Vec<u8>, value: u32) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

fn to_u16(value: usize) -> u16 {
    u16::try_from(value).expect("value overflow")
}

fn checksum(data: &[u8]) -> u32 {
    data.chunks(4)
        .map(|chunk| {
            let mut word = [0_u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_be_bytes(word)
        })
        .fold(0, u32::wrapping_add)
}

/// Outline statistics used in `head`, `hhea` and `maxp` tables.
#[derive(Debug, Default)]
pub(crate) struct GlyphStats {
    bbox: [i16; 4],
    max_points: u16,
    max_contours: u16,
    max_composite_points: u16,
    max_composite_contours: u16,
    max_component_elements: u16,
    max_component_depth: u16,
    max_instructions: u16,
}

impl GlyphStats {
    /// Vertical offset of the `n`-th component in a composite glyph.
    const COMPONENT_SHIFT: i16 = 100;

    pub(crate) fn new(glyphs: &[TestGlyph], with_instructions: bool) -> Self {
        let mut stats = Self::default();
        let mut bbox: Option<[i16; 4]> = None;
        for idx in 0..glyphs.len() {
            if let Some(glyph_bbox) = glyph_bbox(glyphs, idx) {
                bbox = Some(bbox.map_or(glyph_bbox, |bbox| union(bbox, glyph_bbox)));
            }
            let glyph = &glyphs[idx];
            match &glyph.shape {
                Shape::Empty => {}
                Shape::Square(_) => {
                    stats.max_points = stats.max_points.max(4);
                    stats.max_contours = stats.max_contours.max(1);
                }
                Shape::Composite(components) => {
                    let (points, contours, depth) = composite_stats(glyphs, idx);
                    stats.max_composite_points = stats.max_composite_points.max(points);
                    stats.max_composite_contours = stats.max_composite_contours.max(contours);
                    stats.max_component_depth = stats.max_component_depth.max(depth);
                    stats.max_component_elements =
                        stats.max_component_elements.max(to_u16(components.len()));
                }
            }
            if with_instructions {
                let len = to_u16(glyph.instructions.len());
                stats.max_instructions = stats.max_instructions.max(len);
            }
        }
        stats.bbox = bbox.unwrap_or_default();
        stats
    }
}

fn union(lhs: [i16; 4], rhs: [i16; 4]) -> [i16; 4] {
    [
        lhs[0].min(rhs[0]),
        lhs[1].min(rhs[1]),
        lhs[2].max(rhs[2]),
        lhs[3].max(rhs[3]),
    ]
}

fn glyph_bbox(glyphs: &[TestGlyph], idx: usize) -> Option<[i16; 4]> {
    match &glyphs[idx].shape {
        Shape::Empty => None,
        Shape::Square(size) => Some([0, 0, *size, *size]),
        Shape::Composite(components) => {
            let mut bbox = None;
            for (shift, &component) in (0_i16..).zip(components) {
                let Some([x_min, y_min, x_max, y_max]) =
                    glyph_bbox(glyphs, usize::from(component))
                else {
                    continue;
                };
                let dy = shift * GlyphStats::COMPONENT_SHIFT;
                let shifted = [x_min, y_min + dy, x_max, y_max + dy];
                bbox = Some(bbox.map_or(shifted, |bbox| union(bbox, shifted)));
            }
            bbox
        }
    }
}

/// Returns `(points, contours, depth)` for a composite glyph.
fn composite_stats(glyphs: &[TestGlyph], idx: usize) -> (u16, u16, u16) {
    match &glyphs[idx].shape {
        Shape::Empty => (0, 0, 0),
        Shape::Square(_) => (4, 1, 0),
        Shape::Composite(components) => {
            components
                .iter()
                .fold((0, 0, 1), |(points, contours, depth), &component| {
                    let (component_points, component_contours, component_depth) =
                        composite_stats(glyphs, usize::from(component));
                    (
                        points + component_points,
                        contours + component_contours,
                        depth.max(component_depth + 1),
                    )
                })
        }
    }
}

fn write_glyph(glyphs: &[TestGlyph], idx: usize, hinting: bool, buffer: &mut Vec<u8>) {
    const ARG_1_AND_2_ARE_WORDS: u16 = 0x0001;
    const ARGS_ARE_XY_VALUES: u16 = 0x0002;
    const MORE_COMPONENTS: u16 = 0x0020;
    const WE_HAVE_INSTRUCTIONS: u16 = 0x0100;
    const ON_CURVE_POINT: u8 = 0x01;

    let glyph = &glyphs[idx];
    let instructions = if hinting { glyph.instructions.as_slice() } else { &[] };
    let Some([x_min, y_min, x_max, y_max]) = glyph_bbox(glyphs, idx) else {
        return; // empty glyph
    };

    match &glyph.shape {
        Shape::Empty => unreachable!(),
        Shape::Square(size) => {
            push_i16(buffer, 1); // numberOfContours
            for value in [x_min, y_min, x_max, y_max] {
                push_i16(buffer, value);
            }
            push_u16(buffer, 3); // endPtsOfContours
            push_u16(buffer, to_u16(instructions.len()));
            buffer.extend_from_slice(instructions);
            buffer.extend_from_slice(&[ON_CURVE_POINT; 4]);
            for dx in [0, *size, 0, -size] {
                push_i16(buffer, dx);
            }
            for dy in [0, 0, *size, 0] {
                push_i16(buffer, dy);
            }
        }
        Shape::Composite(components) => {
            push_i16(buffer, -1);
            for value in [x_min, y_min, x_max, y_max] {
                push_i16(buffer, value);
            }
            for (i, &component) in components.iter().enumerate() {
                let is_last = i + 1 == components.len();
                let mut flags = ARG_1_AND_2_ARE_WORDS | ARGS_ARE_XY_VALUES;
                if !is_last {
                    flags |= MORE_COMPONENTS;
                } else if !instructions.is_empty() {
                    flags |= WE_HAVE_INSTRUCTIONS;
                }
                push_u16(buffer, flags);
                push_u16(buffer, component);
                push_i16(buffer, 0);
                let shift = i16::try_from(i).expect("too many components");
                push_i16(buffer, shift * GlyphStats::COMPONENT_SHIFT);
            }
            if !instructions.is_empty() {
                push_u16(buffer, to_u16(instructions.len()));
                buffer.extend_from_slice(instructions);
            }
        }
    }
}

/// Returns `glyf` and `loca` tables together with `indexToLocFormat`. The short `loca` format
/// is used if all offsets fit into it.
pub(crate) fn glyf_and_loca(glyphs: &[TestGlyph], hinting: bool) -> (Vec<u8>, Vec<u8>, i16) {
    let mut glyf = vec![];
    let mut offsets = vec![];
    for idx in 0..glyphs.len() {
        offsets.push(glyf.len());
        write_glyph(glyphs, idx, hinting, &mut glyf);
        if glyf.len() % 2 == 1 {
            glyf.push(0);
        }
    }
    offsets.push(glyf.len());

    let is_short = glyf.len() <= 2 * usize::from(u16::MAX);
    let mut loca = vec![];
    for offset in offsets {
        if is_short {
            push_u16(&mut loca, to_u16(offset / 2));
        } else {
            push_u32(&mut loca, u32::try_from(offset).expect("offset overflow"));
        }
    }
    (glyf, loca, i16::from(!is_short))
}

/// Creates a `head` table. `loca_format` is `None` for CFF fonts.
pub(crate) fn head(stats: &GlyphStats, loca_format: Option<i16>) -> Vec<u8> {
    let mut buffer = vec![];
    push_u32(&mut buffer, 0x_0001_0000); // version
    push_u32(&mut buffer, 0x_0001_0000); // fontRevision
    push_u32(&mut buffer, 0); // checksumAdjustment
    push_u32(&mut buffer, 0x_5f0f_3cf5); // magicNumber
    push_u16(&mut buffer, 0x000b); // flags
    push_u16(&mut buffer, 1_000); // unitsPerEm
    buffer.extend_from_slice(&[0; 16]); // created, modified
    for value in stats.bbox {
        push_i16(&mut buffer, value);
    }
    push_u16(&mut buffer, 0); // macStyle
    push_u16(&mut buffer, 8); // lowestRecPPEM
    push_i16(&mut buffer, 2); // fontDirectionHint
    push_i16(&mut buffer, loca_format.unwrap_or(0));
    push_i16(&mut buffer, 0); // glyphDataFormat
    buffer
}

pub(crate) fn hhea(glyphs: &[TestGlyph], stats: &GlyphStats) -> Vec<u8> {
    let advance_max = glyphs.iter().map(|glyph| glyph.advance).max().unwrap_or(0);
    let mut buffer = vec![];
    push_u32(&mut buffer, 0x_0001_0000);
    push_i16(&mut buffer, 800); // ascender
    push_i16(&mut buffer, -200); // descender
    push_i16(&mut buffer, 0); // lineGap
    push_u16(&mut buffer, advance_max);
    push_i16(&mut buffer, 0); // minLeftSideBearing
    push_i16(&mut buffer, 0); // minRightSideBearing
    push_i16(&mut buffer, stats.bbox[2]); // xMaxExtent
    push_i16(&mut buffer, 1); // caretSlopeRise
    push_i16(&mut buffer, 0); // caretSlopeRun
    push_i16(&mut buffer, 0); // caretOffset
    buffer.extend_from_slice(&[0; 8]); // reserved
    push_i16(&mut buffer, 0); // metricDataFormat
    push_u16(&mut buffer, to_u16(glyphs.len())); // numberOfHMetrics
    buffer
}

pub(crate) fn hmtx(glyphs: &[TestGlyph]) -> Vec<u8> {
    let mut buffer = vec![];
    for glyph in glyphs {
        push_u16(&mut buffer, glyph.advance);
        push_i16(&mut buffer, 0); // lsb
    }
    buffer
}

pub(crate) fn maxp_v05(glyph_count: u16) -> Vec<u8> {
    let mut buffer = vec![];
    push_u32(&mut buffer, 0x_0000_5000);
    push_u16(&mut buffer, glyph_count);
    buffer
}

pub(crate) fn maxp_v1(glyph_count: u16, stats: &GlyphStats, hinting: bool) -> Vec<u8> {
    let mut buffer = vec![];
    push_u32(&mut buffer, 0x_0001_0000);
    push_u16(&mut buffer, glyph_count);
    push_u16(&mut buffer, stats.max_points);
    push_u16(&mut buffer, stats.max_contours);
    push_u16(&mut buffer, stats.max_composite_points);
    push_u16(&mut buffer, stats.max_composite_contours);
    push_u16(&mut buffer, 2); // maxZones
    push_u16(&mut buffer, 0); // maxTwilightPoints
    push_u16(&mut buffer, 0); // maxStorage
    push_u16(&mut buffer, u16::from(hinting)); // maxFunctionDefs
    push_u16(&mut buffer, 0); // maxInstructionDefs
    push_u16(&mut buffer, if hinting { 16 } else { 0 }); // maxStackElements
    push_u16(&mut buffer, stats.max_instructions);
    push_u16(&mut buffer, stats.max_component_elements);
    push_u16(&mut buffer, stats.max_component_depth);
    buffer
}

pub(crate) fn os2(glyphs: &[TestGlyph]) -> Vec<u8> {
    let chars = glyphs.iter().flat_map(|glyph| &glyph.chars);
    let first_char = chars.clone().min().map_or(0, |&ch| u32::from(ch));
    let last_char = chars.max().map_or(0, |&ch| u32::from(ch));
    let clamp = |code: u32| u16::try_from(code).unwrap_or(u16::MAX);

    let mut buffer = vec![];
    push_u16(&mut buffer, 4); // version
    push_i16(&mut buffer, 500); // xAvgCharWidth
    push_u16(&mut buffer, 400); // usWeightClass
    push_u16(&mut buffer, 5); // usWidthClass
    push_u16(&mut buffer, 0); // fsType
    for value in [650, 600, 0, 75, 650, 600, 0, 350, 50, 250] {
        push_i16(&mut buffer, value); // subscript, superscript and strikeout metrics
    }
    push_i16(&mut buffer, 0); // sFamilyClass
    buffer.extend_from_slice(&[0; 10]); // panose
    buffer.extend_from_slice(&[0; 16]); // ulUnicodeRange1..4
    buffer.extend_from_slice(b"TEST");
    push_u16(&mut buffer, 0x40); // fsSelection
    push_u16(&mut buffer, clamp(first_char));
    push_u16(&mut buffer, clamp(last_char));
    push_i16(&mut buffer, 800); // sTypoAscender
    push_i16(&mut buffer, -200); // sTypoDescender
    push_i16(&mut buffer, 0); // sTypoLineGap
    push_u16(&mut buffer, 1_000); // usWinAscent
    push_u16(&mut buffer, 200); // usWinDescent
    push_u32(&mut buffer, 1); // ulCodePageRange1
    push_u32(&mut buffer, 0); // ulCodePageRange2
    push_i16(&mut buffer, 500); // sxHeight
    push_i16(&mut buffer, 700); // sCapHeight
    push_u16(&mut buffer, 0); // usDefaultChar
    push_u16(&mut buffer, 0x20); // usBreakChar
    push_u16(&mut buffer, 2); // usMaxContext
    debug_assert_eq!(buffer.len(), 96);
    buffer
}

pub(crate) fn name() -> Vec<u8> {
    let records: [(u16, &str); 4] = [
        (1, "Fontpress Test"),
        (2, "Regular"),
        (4, "Fontpress Test Regular"),
        (6, "FontpressTest-Regular"),
    ];
    let mut storage = vec![];
    let mut buffer = vec![];
    push_u16(&mut buffer, 0); // format
    push_u16(&mut buffer, to_u16(records.len()));
    push_u16(&mut buffer, to_u16(6 + 12 * records.len())); // storageOffset
    for (name_id, value) in records {
        let encoded: Vec<u8> = value.encode_utf16().flat_map(u16::to_be_bytes).collect();
        push_u16(&mut buffer, 3); // platform
        push_u16(&mut buffer, 1); // encoding
        push_u16(&mut buffer, 0x409); // language
        push_u16(&mut buffer, name_id);
        push_u16(&mut buffer, to_u16(encoded.len()));
        push_u16(&mut buffer, to_u16(storage.len()));
        storage.extend_from_slice(&encoded);
    }
    buffer.extend_from_slice(&storage);
    buffer
}

pub(crate) fn post(glyphs: &[TestGlyph], glyph_names: bool) -> Vec<u8> {
    let mut buffer = vec![];
    push_u32(&mut buffer, if glyph_names { 0x_0002_0000 } else { 0x_0003_0000 });
    push_u32(&mut buffer, 0); // italicAngle
    push_i16(&mut buffer, -100); // underlinePosition
    push_i16(&mut buffer, 50); // underlineThickness
    push_u32(&mut buffer, 0); // isFixedPitch
    buffer.extend_from_slice(&[0; 16]); // memory usage
    if !glyph_names {
        return buffer;
    }

    push_u16(&mut buffer, to_u16(glyphs.len()));
    let mut custom_names = vec![];
    for (glyph_id, glyph) in glyphs.iter().enumerate() {
        let name_idx = match glyph.chars.first() {
            _ if glyph_id == 0 => 0,
            // Standard Macintosh glyph order contains ASCII glyphs starting from index 3 (space)
            Some(ch) if glyph.name.is_none() && (' '..='~').contains(ch) => {
                u16::try_from(u32::from(*ch) - 29).expect("ASCII code")
            }
            _ => {
                custom_names.push(glyph.name(glyph_id));
                to_u16(258 + custom_names.len() - 1)
            }
        };
        push_u16(&mut buffer, name_idx);
    }
    for name in custom_names {
        buffer.push(u8::try_from(name.len()).expect("glyph name is too long"));
        buffer.extend_from_slice(name.as_bytes());
    }
    buffer
}

pub(crate) fn gasp() -> Vec<u8> {
    // Version 1, a single range covering all sizes with gridfitting and smoothing
    vec![0, 1, 0, 1, 0xff, 0xff, 0, 0x0f]
}

fn format4_subtable(mappings: &[(u32, u16)]) -> Vec<u8> {
    // `(start_code, end_code, id_delta)`; runs consecutive in both code and glyph ID are merged
    let mut segments: Vec<(u16, u16, u16)> = vec![];
    for &(code, glyph_id) in mappings {
        let code = u16::try_from(code).expect("non-BMP code");
        let delta = glyph_id.wrapping_sub(code);
        match segments.last_mut() {
            Some((_, end, prev_delta)) if *end + 1 == code && *prev_delta == delta => *end = code,
            _ => segments.push((code, code, delta)),
        }
    }
    segments.push((0xffff, 0xffff, 1));

    let seg_count = to_u16(segments.len());
    let entry_selector = seg_count.ilog2();
    let search_range = 2_u16 << entry_selector;
    let mut buffer = vec![];
    push_u16(&mut buffer, 4);
    push_u16(&mut buffer, to_u16(16 + 8 * segments.len()));
    push_u16(&mut buffer, 0); // language
    push_u16(&mut buffer, 2 * seg_count);
    push_u16(&mut buffer, search_range);
    push_u16(&mut buffer, to_u16(entry_selector as usize));
    push_u16(&mut buffer, 2 * seg_count - search_range);
    for &(_, end, _) in &segments {
        push_u16(&mut buffer, end); // endCode
    }
    push_u16(&mut buffer, 0); // reservedPad
    for &(start, ..) in &segments {
        push_u16(&mut buffer, start); // startCode
    }
    for &(.., delta) in &segments {
        push_u16(&mut buffer, delta);
    }
    for _ in &segments {
        push_u16(&mut buffer, 0); // idRangeOffset
    }
    buffer
}

fn format12_subtable(mappings: &[(u32, u16)]) -> Vec<u8> {
    let mut buffer = vec![];
    push_u16(&mut buffer, 12);
    push_u16(&mut buffer, 0); // reserved
    let len = u32::try_from(16 + 12 * mappings.len()).expect("subtable is too large");
    push_u32(&mut buffer, len);
    push_u32(&mut buffer, 0); // language
    push_u32(&mut buffer, u32::try_from(mappings.len()).expect("too many groups"));
    for &(code, glyph_id) in mappings {
        push_u32(&mut buffer, code);
        push_u32(&mut buffer, code);
        push_u32(&mut buffer, glyph_id.into());
    }
    buffer
}

fn format6_subtable(first_code: u16, glyph_ids: &[u16]) -> Vec<u8> {
    let mut buffer = vec![];
    push_u16(&mut buffer, 6);
    push_u16(&mut buffer, to_u16(10 + 2 * glyph_ids.len()));
    push_u16(&mut buffer, 0); // language
    push_u16(&mut buffer, first_code);
    push_u16(&mut buffer, to_u16(glyph_ids.len()));
    for &glyph_id in glyph_ids {
        push_u16(&mut buffer, glyph_id);
    }
    buffer
}

pub(crate) fn cmap(builder: &FontBuilder) -> Vec<u8> {
    let mut mappings = BTreeMap::new();
    for (glyph_id, glyph) in builder.glyphs.iter().enumerate() {
        for &ch in &glyph.chars {
            mappings.insert(u32::from(ch), to_u16(glyph_id));
        }
    }
    let mappings: Vec<_> = mappings.into_iter().collect();
    let bmp: Vec<_> = mappings
        .iter()
        .copied()
        .filter(|&(code, _)| code < 0xffff)
        .collect();
    let ascii_glyph = |code: u32| {
        mappings
            .iter()
            .find_map(|&(mapped, glyph_id)| (mapped == code).then_some(glyph_id))
            .unwrap_or(0)
    };

    let mut subtables: Vec<(u16, u16, Vec<u8>)> = vec![];
    if builder.legacy_cmap {
        let glyph_ids: Vec<_> = (0x20..=0x7e).map(ascii_glyph).collect();
        subtables.push((1, 0, format6_subtable(0x20, &glyph_ids)));
    }
    if builder.symbol_cmap {
        let symbol: Vec<_> = (0x20..=0x7e)
            .map(|code| (0xf000 + code, ascii_glyph(code)))
            .filter(|&(_, glyph_id)| glyph_id != 0)
            .collect();
        subtables.push((3, 0, format4_subtable(&symbol)));
    }
    subtables.push((3, 1, format4_subtable(&bmp)));
    if bmp.len() < mappings.len() {
        subtables.push((3, 10, format12_subtable(&mappings)));
    }

    let mut buffer = vec![];
    push_u16(&mut buffer, 0); // version
    push_u16(&mut buffer, to_u16(subtables.len()));
    let mut offset = 4 + 8 * subtables.len();
    for (platform_id, encoding_id, subtable) in &subtables {
        push_u16(&mut buffer, *platform_id);
        push_u16(&mut buffer, *encoding_id);
        push_u32(&mut buffer, u32::try_from(offset).expect("offset overflow"));
        offset += subtable.len();
    }
    for (.., subtable) in subtables {
        buffer.extend_from_slice(&subtable);
    }
    buffer
}

/// Assembles an sfnt container from tables sorted by tag.
pub(crate) fn assemble(sfnt_version: u32, tables: &BTreeMap<[u8; 4], Vec<u8>>) -> Vec<u8> {
    const HEAD_CHECKSUM_OFFSET: usize = 8;

    let table_count = to_u16(tables.len());
    let entry_selector = table_count.ilog2();
    let search_range = 16_u16 << entry_selector;
    let mut buffer = vec![];
    push_u32(&mut buffer, sfnt_version);
    push_u16(&mut buffer, table_count);
    push_u16(&mut buffer, search_range);
    push_u16(&mut buffer, to_u16(entry_selector as usize));
    push_u16(&mut buffer, 16 * table_count - search_range);

    let mut offset = 12 + 16 * tables.len();
    let mut head_offset = None;
    for (tag, data) in tables {
        if tag == b"head" {
            head_offset = Some(offset);
        }
        buffer.extend_from_slice(tag);
        push_u32(&mut buffer, checksum(data));
        push_u32(&mut buffer, u32::try_from(offset).expect("offset overflow"));
        push_u32(&mut buffer, u32::try_from(data.len()).expect("table is too large"));
        offset += data.len().next_multiple_of(4);
    }
    for data in tables.values() {
        buffer.extend_from_slice(data);
        buffer.resize(buffer.len().next_multiple_of(4), 0);
    }

    if let Some(head_offset) = head_offset {
        let adjustment = 0x_b1b0_afba_u32.wrapping_sub(checksum(&buffer));
        let range = head_offset + HEAD_CHECKSUM_OFFSET..head_offset + HEAD_CHECKSUM_OFFSET + 4;
        buffer[range].copy_from_slice(&adjustment.to_be_bytes());
    }
    buffer
}

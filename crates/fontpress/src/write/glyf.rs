//! Writing TrueType outlines (`glyf` and `loca` tables).

use super::{overflow, write_u16, write_u32};
use crate::{
    font::{
        Glyph, GlyphComponent, GlyphComponentArgs, GlyphWithMetrics, LocaFormat, LocaTable,
        Outline, TransformData,
    },
    RebuildError, TableTag,
};

/// Writes glyphs in the subset order, padding each glyph to 4 bytes. Returns glyph locations
/// relative to the table start (one more than the number of glyphs).
pub(super) fn write_glyphs(
    glyphs: &[GlyphWithMetrics<'_>],
    strip_hinting: bool,
    writer: &mut Vec<u8>,
) -> Vec<usize> {
    let initial_offset = writer.len();
    let mut locations = Vec::with_capacity(glyphs.len() + 1);
    locations.push(0);
    for glyph in glyphs {
        if let Outline::TrueType(glyph) = &glyph.inner {
            glyph.write(writer, strip_hinting);
        }
        let padded_len = (writer.len() - initial_offset).next_multiple_of(4);
        writer.resize(initial_offset + padded_len, 0);
        locations.push(padded_len);
    }
    locations
}

impl Glyph<'_> {
    fn write(&self, writer: &mut Vec<u8>, strip_hinting: bool) {
        match self {
            Self::Empty => { /* do nothing */ }
            Self::Simple(glyph) => {
                if strip_hinting && !glyph.instructions.is_empty() {
                    // Keep everything up to and excluding `instructionLength`
                    writer.extend_from_slice(&glyph.raw[..glyph.instructions.start - 2]);
                    write_u16(writer, 0);
                    writer.extend_from_slice(&glyph.raw[glyph.instructions.end..]);
                } else {
                    writer.extend_from_slice(glyph.raw);
                }
            }
            Self::Composite {
                header,
                components,
                instructions,
            } => {
                write_u16(writer, u16::MAX); // numberOfContours = -1
                writer.extend_from_slice(header);
                for component in components {
                    let mut flags = component.flags;
                    if strip_hinting {
                        flags &= !GlyphComponent::WE_HAVE_INSTRUCTIONS;
                    }
                    component.write(flags, writer);
                }
                if !strip_hinting {
                    writer.extend_from_slice(instructions);
                }
            }
        }
    }
}

impl GlyphComponent {
    fn write(&self, flags: u16, writer: &mut Vec<u8>) {
        write_u16(writer, flags);
        write_u16(writer, self.glyph_idx);
        match self.args {
            GlyphComponentArgs::U16(args) => write_u16(writer, args),
            GlyphComponentArgs::U32(args) => write_u32(writer, args),
        }
        match self.transform {
            TransformData::None => { /* do nothing */ }
            TransformData::Scale(val) => write_u16(writer, val),
            TransformData::TwoScales(scales) => {
                for val in scales {
                    write_u16(writer, val);
                }
            }
            TransformData::Affine(matrix) => {
                for val in matrix {
                    write_u16(writer, val);
                }
            }
        }
    }
}

impl LocaTable<'_> {
    /// Largest location representable in the short format.
    const MAX_SHORT_LOCATION: usize = 0x1_fffe;

    pub(super) fn write(
        locations: &[usize],
        writer: &mut Vec<u8>,
    ) -> Result<LocaFormat, RebuildError> {
        let all_even = locations.iter().all(|&loc| loc % 2 == 0);
        let in_bounds = locations
            .last()
            .is_none_or(|&loc| loc <= Self::MAX_SHORT_LOCATION);
        if all_even && in_bounds {
            for &loc in locations {
                #[allow(clippy::cast_possible_truncation)]
                // doesn't happen due to the preceding check
                write_u16(writer, (loc / 2) as u16);
            }
            Ok(LocaFormat::Short)
        } else {
            for &loc in locations {
                let loc = u32::try_from(loc).map_err(|_| overflow(TableTag::LOCA, "glyph location"))?;
                write_u32(writer, loc);
            }
            Ok(LocaFormat::Long)
        }
    }
}

/// Outline limits of retained glyphs, as recorded in `maxp` version 1.0, and their bounding box.
#[derive(Debug, Default)]
pub(super) struct GlyphStats {
    pub(super) max_points: u16,
    pub(super) max_contours: u16,
    pub(super) max_composite_points: u16,
    pub(super) max_composite_contours: u16,
    pub(super) max_size_of_instructions: u16,
    pub(super) max_component_elements: u16,
    pub(super) max_component_depth: u16,
    pub(super) bbox: Option<[i16; 4]>,
    pub(super) horizontal_extents: Option<HorizontalExtents>,
}

/// Side bearing and extent limits recorded in `hhea`. Only glyphs with contours contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct HorizontalExtents {
    pub(super) min_left_side_bearing: i16,
    pub(super) min_right_side_bearing: i16,
    pub(super) x_max_extent: i16,
}

impl HorizontalExtents {
    fn new(metrics: &GlyphWithMetrics<'_>, [x_min, _, x_max, _]: [i16; 4]) -> Self {
        let lsb = i16::from_be_bytes(metrics.lsb.to_be_bytes());
        let extent = i32::from(lsb) + i32::from(x_max) - i32::from(x_min);
        Self {
            min_left_side_bearing: lsb,
            min_right_side_bearing: saturate(i32::from(metrics.advance) - extent),
            x_max_extent: saturate(extent),
        }
    }

    fn merge(self, other: Self) -> Self {
        Self {
            min_left_side_bearing: self.min_left_side_bearing.min(other.min_left_side_bearing),
            min_right_side_bearing: self.min_right_side_bearing.min(other.min_right_side_bearing),
            x_max_extent: self.x_max_extent.max(other.x_max_extent),
        }
    }
}

fn saturate(value: i32) -> i16 {
    let clamped = value.clamp(i32::from(i16::MIN), i32::from(i16::MAX));
    i16::try_from(clamped).unwrap_or_default()
}

impl GlyphStats {
    /// Nesting depth after which composite references are assumed to form a cycle.
    const MAX_DEPTH: u16 = 16;

    /// Computes stats for glyphs in the subset order (i.e., with remapped component references).
    pub(super) fn new(glyphs: &[GlyphWithMetrics<'_>], strip_hinting: bool) -> Self {
        let mut this = Self::default();
        for (glyph_id, metrics) in glyphs.iter().enumerate() {
            let Outline::TrueType(glyph) = &metrics.inner else {
                continue;
            };
            if let Some(bbox) = glyph.bbox() {
                this.extend_bbox(bbox);
                let extents = HorizontalExtents::new(metrics, bbox);
                this.horizontal_extents = Some(match this.horizontal_extents {
                    None => extents,
                    Some(prev) => prev.merge(extents),
                });
            }
            match glyph {
                Glyph::Empty => {}
                Glyph::Simple(simple) => {
                    this.max_points = this.max_points.max(simple.point_count);
                    this.max_contours = this.max_contours.max(simple.contour_count);
                    if !strip_hinting {
                        let len = u16::try_from(simple.instructions.len()).unwrap_or(u16::MAX);
                        this.max_size_of_instructions = this.max_size_of_instructions.max(len);
                    }
                }
                Glyph::Composite {
                    components,
                    instructions,
                    ..
                } => {
                    let component_count = u16::try_from(components.len()).unwrap_or(u16::MAX);
                    this.max_component_elements = this.max_component_elements.max(component_count);
                    let leaf = Self::composite_leaf(glyphs, glyph, 0);
                    if leaf.depth > Self::MAX_DEPTH {
                        log::warn!("composite glyph {glyph_id} has cyclic or too deep component references");
                    }
                    this.max_composite_points = this.max_composite_points.max(leaf.points);
                    this.max_composite_contours = this.max_composite_contours.max(leaf.contours);
                    this.max_component_depth = this.max_component_depth.max(leaf.depth);

                    let has_instructions = components
                        .iter()
                        .any(|component| component.flags & GlyphComponent::WE_HAVE_INSTRUCTIONS != 0);
                    if has_instructions && !strip_hinting && instructions.len() >= 2 {
                        let len = u16::from_be_bytes([instructions[0], instructions[1]]);
                        this.max_size_of_instructions = this.max_size_of_instructions.max(len);
                    }
                }
            }
        }
        this
    }

    fn extend_bbox(&mut self, [x_min, y_min, x_max, y_max]: [i16; 4]) {
        self.bbox = Some(match self.bbox {
            None => [x_min, y_min, x_max, y_max],
            Some([prev_x_min, prev_y_min, prev_x_max, prev_y_max]) => [
                prev_x_min.min(x_min),
                prev_y_min.min(y_min),
                prev_x_max.max(x_max),
                prev_y_max.max(y_max),
            ],
        });
    }

    /// Sums points and contours of the simple glyphs a composite glyph is ultimately built of.
    fn composite_leaf(
        glyphs: &[GlyphWithMetrics<'_>],
        glyph: &Glyph<'_>,
        depth: u16,
    ) -> LeafStats {
        let mut stats = LeafStats::default();
        match glyph {
            Glyph::Empty => {}
            Glyph::Simple(simple) => {
                stats.points = simple.point_count;
                stats.contours = simple.contour_count;
            }
            Glyph::Composite { components, .. } => {
                stats.depth = depth + 1;
                if depth >= Self::MAX_DEPTH {
                    return stats;
                }
                for component in components {
                    let Some(GlyphWithMetrics {
                        inner: Outline::TrueType(child),
                        ..
                    }) = glyphs.get(usize::from(component.glyph_idx))
                    else {
                        continue;
                    };
                    let child = Self::composite_leaf(glyphs, child, depth + 1);
                    stats.points = stats.points.saturating_add(child.points);
                    stats.contours = stats.contours.saturating_add(child.contours);
                    stats.depth = stats.depth.max(child.depth);
                }
            }
        }
        stats
    }
}

#[derive(Debug, Default)]
struct LeafStats {
    points: u16,
    contours: u16,
    depth: u16,
}

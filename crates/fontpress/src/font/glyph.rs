//! `Glyph` and related types.

use core::ops;

use super::{CharString, Cursor};
use crate::{errors::ParseErrorKind, ParseError};

/// TrueType simple glyph with its instructions located.
#[derive(Debug, Clone)]
pub(crate) struct SimpleGlyph<'a> {
    pub(crate) raw: &'a [u8],
    pub(crate) contour_count: u16,
    pub(crate) point_count: u16,
    /// Range of the instruction bytecode within `raw`.
    pub(crate) instructions: ops::Range<usize>,
}

impl<'a> SimpleGlyph<'a> {
    fn parse(contour_count: u16, raw: Cursor<'a>) -> Result<Self, ParseError> {
        let mut cursor = raw;
        cursor.skip(10)?; // numberOfContours, bbox
        let mut point_count = 0;
        for _ in 0..contour_count {
            point_count = cursor.read_u16()?;
        }
        if contour_count > 0 {
            point_count = point_count.checked_add(1).ok_or_else(|| {
                cursor.err(ParseErrorKind::InvalidValue("contour end point"))
            })?;
        }
        let instructions_len = usize::from(cursor.read_u16()?);
        let start = 12 + 2 * usize::from(contour_count);
        let instructions = start..start + instructions_len;
        raw.range(instructions.clone())?;

        Ok(Self {
            raw: raw.bytes,
            contour_count,
            point_count,
            instructions,
        })
    }

    pub(crate) fn instructions(&self) -> &'a [u8] {
        &self.raw[self.instructions.clone()]
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Glyph<'a> {
    Empty,
    Simple(SimpleGlyph<'a>),
    Composite {
        /// xMin, yMin, xMax, yMax
        header: [u8; 8],
        components: Vec<GlyphComponent>,
        /// Optional instructions after the last component descriptor (including their length)
        instructions: &'a [u8],
    },
}

impl<'a> Glyph<'a> {
    pub(crate) fn new(raw: Cursor<'a>) -> Result<Self, ParseError> {
        if raw.is_empty() {
            return Ok(Self::Empty);
        }

        let mut cursor = raw;
        let number_of_contours = cursor.read_u16()?;
        if number_of_contours > i16::MAX as u16 {
            let header = cursor.read_byte_array::<8>()?;
            let mut has_more_components = true;
            let mut components = Vec::with_capacity(1);
            while has_more_components {
                let (component, new_has_more_components) = GlyphComponent::new(&mut cursor)?;
                components.push(component);
                has_more_components = new_has_more_components;
            }
            Ok(Self::Composite {
                header,
                components,
                instructions: cursor.bytes,
            })
        } else {
            SimpleGlyph::parse(number_of_contours, raw).map(Self::Simple)
        }
    }

    /// Returns the glyph bounding box `[x_min, y_min, x_max, y_max]`, or `None` for empty glyphs.
    pub(crate) fn bbox(&self) -> Option<[i16; 4]> {
        let header = match self {
            Self::Empty => return None,
            Self::Simple(glyph) => &glyph.raw[2..10],
            Self::Composite { header, .. } => header.as_slice(),
        };
        let mut bbox = [0_i16; 4];
        for (value, chunk) in bbox.iter_mut().zip(header.chunks_exact(2)) {
            *value = i16::from_be_bytes([chunk[0], chunk[1]]);
        }
        Some(bbox)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct GlyphComponent {
    pub(crate) flags: u16,
    pub(crate) glyph_idx: u16,
    pub(crate) args: GlyphComponentArgs,
    pub(crate) transform: TransformData,
}

impl GlyphComponent {
    const ARG_1_AND_2_ARE_WORDS: u16 = 0x0001;
    const WE_HAVE_A_SCALE: u16 = 0x0008;
    pub(crate) const MORE_COMPONENTS: u16 = 0x0020;
    const WE_HAVE_AN_X_AND_Y_SCALE: u16 = 0x0040;
    const WE_HAVE_A_TWO_BY_TWO: u16 = 0x0080;
    pub(crate) const WE_HAVE_INSTRUCTIONS: u16 = 0x0100;

    fn new(cursor: &mut Cursor<'_>) -> Result<(Self, bool), ParseError> {
        let flags = cursor.read_u16()?;
        let glyph_idx = cursor.read_u16()?;
        let args = if flags & Self::ARG_1_AND_2_ARE_WORDS != 0 {
            GlyphComponentArgs::U32(cursor.read_u32()?)
        } else {
            GlyphComponentArgs::U16(cursor.read_u16()?)
        };
        let transform = if flags & Self::WE_HAVE_A_SCALE != 0 {
            TransformData::Scale(cursor.read_u16()?)
        } else if flags & Self::WE_HAVE_AN_X_AND_Y_SCALE != 0 {
            TransformData::TwoScales([cursor.read_u16()?, cursor.read_u16()?])
        } else if flags & Self::WE_HAVE_A_TWO_BY_TWO != 0 {
            TransformData::Affine([
                cursor.read_u16()?,
                cursor.read_u16()?,
                cursor.read_u16()?,
                cursor.read_u16()?,
            ])
        } else {
            TransformData::None
        };
        let this = Self {
            flags,
            glyph_idx,
            args,
            transform,
        };

        let has_more_components = flags & Self::MORE_COMPONENTS != 0;
        Ok((this, has_more_components))
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum GlyphComponentArgs {
    U16(u16),
    U32(u32),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum TransformData {
    None,
    Scale(u16),
    TwoScales([u16; 2]),
    Affine([u16; 4]),
}

/// Glyph outline in one of the supported formats.
#[derive(Debug, Clone)]
pub(crate) enum Outline<'a> {
    TrueType(Glyph<'a>),
    Cff(CharString<'a>),
}

/// [`Outline`] together with metrics read from the `hmtx` table.
#[derive(Debug, Clone)]
pub(crate) struct GlyphWithMetrics<'a> {
    pub(crate) inner: Outline<'a>,
    pub(crate) advance: u16,
    pub(crate) lsb: u16,
}

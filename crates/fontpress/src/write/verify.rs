//! Self-check of the rebuilt tables before they are serialized.

use crate::{
    errors::RebuildErrorKind,
    font::{Glyph, Outline},
    FontSubset, RebuildError, TableTag,
};

/// Facts about the rebuilt tables collected while writing them.
#[derive(Debug, Default)]
pub(super) struct Rebuilt {
    pub(super) cmap_glyph_ids: Vec<u16>,
    pub(super) maxp_glyph_count: u16,
    pub(super) glyf_len: usize,
    /// Glyph locations for TrueType outlines.
    pub(super) locations: Option<Vec<usize>>,
    /// Number of charstrings for CFF outlines.
    pub(super) charstring_count: Option<usize>,
}

impl Rebuilt {
    pub(super) fn verify(&self, subset: &FontSubset<'_>) -> Result<(), RebuildError> {
        let glyph_count = subset.glyphs.len();
        if subset.closure.old_glyph_ids().first() != Some(&0) {
            return Err(RebuildError::new(TableTag::GLYF, RebuildErrorKind::MissingNotdef));
        }
        check_count(TableTag::MAXP, glyph_count, self.maxp_glyph_count.into())?;

        if let Some(locations) = &self.locations {
            check_count(TableTag::LOCA, glyph_count + 1, locations.len())?;
            let is_monotonic = locations.windows(2).all(|pair| pair[0] <= pair[1]);
            if !is_monotonic || locations.last() != Some(&self.glyf_len) {
                return Err(RebuildError::new(
                    TableTag::LOCA,
                    RebuildErrorKind::InvalidLocations,
                ));
            }
        }
        if let Some(charstring_count) = self.charstring_count {
            check_count(TableTag::CFF, glyph_count, charstring_count)?;
        }

        for glyph in &subset.glyphs {
            if let Outline::TrueType(Glyph::Composite { components, .. }) = &glyph.inner {
                for component in components {
                    check_glyph_id(TableTag::GLYF, component.glyph_idx, glyph_count)?;
                }
            }
        }
        for &glyph_id in &self.cmap_glyph_ids {
            check_glyph_id(TableTag::CMAP, glyph_id, glyph_count)?;
        }
        Ok(())
    }
}

fn check_count(table: TableTag, expected: usize, actual: usize) -> Result<(), RebuildError> {
    if expected == actual {
        Ok(())
    } else {
        let kind = RebuildErrorKind::GlyphCount { expected, actual };
        Err(RebuildError::new(table, kind))
    }
}

fn check_glyph_id(table: TableTag, glyph_id: u16, glyph_count: usize) -> Result<(), RebuildError> {
    if usize::from(glyph_id) < glyph_count {
        Ok(())
    } else {
        Err(RebuildError::new(table, RebuildErrorKind::DanglingGlyph(glyph_id)))
    }
}

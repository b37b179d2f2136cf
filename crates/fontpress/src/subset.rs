use std::collections::BTreeSet;

use crate::{
    errors::RebuildErrorKind,
    font::{Glyph, GlyphWithMetrics, Outline},
    Error, Font, GlyphClosure, RebuildError, TableTag,
};

/// Options controlling which optional font data is retained in a [`FontSubset`].
///
/// The default options strip everything that is not necessary for rendering,
/// and inline CFF subroutines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct SubsetOptions {
    /// Retain hinting: TrueType instructions and the `cvt `, `fpgm` and `prep` tables.
    pub hinting: bool,
    /// Retain legacy (Macintosh platform) `cmap` subtables.
    pub legacy_cmap: bool,
    /// Retain the symbol `cmap` subtable (platform 3, encoding 0).
    pub symbol_cmap: bool,
    /// Inline subroutine calls into CFF charstrings and drop subroutine INDEXes.
    pub desubroutinize: bool,
    /// Retain glyph names in the `post` table.
    pub glyph_names: bool,
}

impl Default for SubsetOptions {
    fn default() -> Self {
        Self {
            hinting: false,
            legacy_cmap: false,
            symbol_cmap: false,
            desubroutinize: true,
            glyph_names: false,
        }
    }
}

impl SubsetOptions {
    /// Sets whether to retain hinting.
    #[must_use]
    pub fn with_hinting(mut self, hinting: bool) -> Self {
        self.hinting = hinting;
        self
    }

    /// Sets whether to retain legacy `cmap` subtables.
    #[must_use]
    pub fn with_legacy_cmap(mut self, legacy_cmap: bool) -> Self {
        self.legacy_cmap = legacy_cmap;
        self
    }

    /// Sets whether to retain the symbol `cmap` subtable.
    #[must_use]
    pub fn with_symbol_cmap(mut self, symbol_cmap: bool) -> Self {
        self.symbol_cmap = symbol_cmap;
        self
    }

    /// Sets whether to inline CFF subroutines.
    #[must_use]
    pub fn with_desubroutinize(mut self, desubroutinize: bool) -> Self {
        self.desubroutinize = desubroutinize;
        self
    }

    /// Sets whether to retain glyph names.
    #[must_use]
    pub fn with_glyph_names(mut self, glyph_names: bool) -> Self {
        self.glyph_names = glyph_names;
        self
    }
}

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum OutputFormat {
    /// Uncompressed OpenType (`.ttf` / `.otf`).
    #[default]
    OpenType,
    /// WOFF2 with Brotli-compressed table data.
    Woff2,
}

/// Subset of a [`Font`] produced by removing some of its glyphs and related data.
#[derive(Debug)]
pub struct FontSubset<'a> {
    pub(crate) font: Font<'a>,
    pub(crate) options: SubsetOptions,
    pub(crate) closure: GlyphClosure,
    /// Retained chars mapped to new glyph IDs.
    pub(crate) char_map: Vec<(char, u16)>,
    /// Retained glyphs in the new order, with component references remapped.
    pub(crate) glyphs: Vec<GlyphWithMetrics<'a>>,
}

impl<'a> FontSubset<'a> {
    /// Computes a subset of the font retaining the specified chars.
    ///
    /// # Errors
    ///
    /// Returns an error if the font data necessary for subsetting is malformed.
    pub fn new(
        font: Font<'a>,
        chars: &BTreeSet<char>,
        options: SubsetOptions,
    ) -> Result<Self, Error> {
        let closure = GlyphClosure::resolve(&font, chars)?;
        let glyphs = closure
            .old_glyph_ids()
            .iter()
            .map(|&old_id| {
                let mut glyph = font.glyph(old_id)?;
                if let Outline::TrueType(Glyph::Composite { components, .. }) = &mut glyph.inner {
                    for component in components {
                        component.glyph_idx = remap(&closure, component.glyph_idx, TableTag::GLYF)?;
                    }
                }
                Ok(glyph)
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let char_map = closure
            .char_map()
            .map(|(ch, old_id)| Ok((ch, remap(&closure, old_id, TableTag::CMAP)?)))
            .collect::<Result<Vec<_>, Error>>()?;

        log::debug!(
            "retained {} of {} glyphs for {} mapped char(s)",
            glyphs.len(),
            font.glyph_count(),
            char_map.len()
        );
        Ok(Self {
            font,
            options,
            closure,
            char_map,
            glyphs,
        })
    }

    /// Returns the number of glyphs in this subset.
    pub fn glyph_count(&self) -> usize {
        self.glyphs.len()
    }

    /// Returns the glyph closure this subset is based on.
    pub fn closure(&self) -> &GlyphClosure {
        &self.closure
    }

    /// Returns options used to create this subset.
    pub fn options(&self) -> &SubsetOptions {
        &self.options
    }
}

fn remap(closure: &GlyphClosure, old_id: u16, table: TableTag) -> Result<u16, RebuildError> {
    closure
        .new_glyph_id(old_id)
        .ok_or_else(|| RebuildError::new(table, RebuildErrorKind::DanglingGlyph(old_id)))
}

#[cfg(test)]
mod tests {
    use fontpress_test_fonts::FontBuilder;

    use super::*;

    #[test]
    fn default_options() {
        let options = SubsetOptions::default();
        assert!(!options.hinting);
        assert!(!options.legacy_cmap);
        assert!(!options.symbol_cmap);
        assert!(options.desubroutinize);
        assert!(!options.glyph_names);

        let options = options.with_hinting(true).with_desubroutinize(false);
        assert!(options.hinting);
        assert!(!options.desubroutinize);
    }

    #[test]
    fn composite_references_are_remapped() {
        let builder = FontBuilder::latin();
        let bytes = builder.build();
        let font = Font::new(&bytes).unwrap();
        let subset = FontSubset::new(font, &BTreeSet::from(['é']), SubsetOptions::default())
            .unwrap();
        assert_eq!(subset.glyph_count(), 4);

        let composite = subset
            .glyphs
            .iter()
            .find_map(|glyph| match &glyph.inner {
                Outline::TrueType(Glyph::Composite { components, .. }) => Some(components),
                _ => None,
            })
            .unwrap();
        for component in composite {
            assert!(usize::from(component.glyph_idx) < subset.glyph_count());
            assert_ne!(component.glyph_idx, 0);
        }
        let (ch, new_id) = subset.char_map[0];
        assert_eq!(ch, 'é');
        assert_eq!(new_id, 3); // the composite has the largest original ID
    }
}

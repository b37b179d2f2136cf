//! Glyph closure: glyphs that must be retained to render a set of chars.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::{Font, ParseError, TableTag};

/// Transitively closed set of glyphs required to render a set of chars, together
/// with the compacted glyph numbering used in the subset.
///
/// Glyph 0 (`.notdef`) is always retained. Retained glyphs keep their relative order:
/// the new glyph ID is the position of the original ID in the ascending list of retained IDs.
#[derive(Debug, Clone)]
pub struct GlyphClosure {
    glyphs: Vec<u16>,
    old_to_new: BTreeMap<u16, u16>,
    char_map: Vec<(char, u16)>,
}

impl GlyphClosure {
    /// Resolves the closure for the specified chars. Chars not mapped by the font are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the font data necessary for resolution is malformed, e.g.
    /// a composite glyph references a glyph outside the font.
    pub fn resolve(font: &Font<'_>, chars: &BTreeSet<char>) -> Result<Self, ParseError> {
        let mut visited = BTreeSet::from([0]);
        let mut queue = VecDeque::from([0]);
        let mut char_map = Vec::with_capacity(chars.len());
        let mut unmapped_count = 0_usize;

        for &ch in chars {
            let glyph_id = font.map_char(ch)?;
            if glyph_id == 0 {
                unmapped_count += 1;
                continue;
            }
            char_map.push((ch, glyph_id));
            if visited.insert(glyph_id) {
                queue.push_back(glyph_id);
            }
        }
        if unmapped_count > 0 {
            log::debug!("{unmapped_count} requested char(s) are not mapped by the font");
        }

        while let Some(glyph_id) = queue.pop_front() {
            for component_id in font.glyph_components(glyph_id)? {
                font.check_glyph_id(component_id, TableTag::GLYF)?;
                if visited.insert(component_id) {
                    queue.push_back(component_id);
                } else if component_id == glyph_id {
                    log::warn!("glyph {glyph_id} references itself as a component");
                }
            }
        }

        let glyphs: Vec<u16> = visited.into_iter().collect();
        let old_to_new = glyphs
            .iter()
            .zip(0_u16..)
            .map(|(&old_id, new_id)| (old_id, new_id))
            .collect();
        Ok(Self {
            glyphs,
            old_to_new,
            char_map,
        })
    }

    /// Returns the number of retained glyphs.
    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    /// Always returns `false` since glyph 0 is always retained.
    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    /// Returns original IDs of the retained glyphs in the ascending order. The index of an ID
    /// in this slice is the new glyph ID.
    pub fn old_glyph_ids(&self) -> &[u16] {
        &self.glyphs
    }

    /// Maps an original glyph ID to the new ID, or returns `None` if the glyph is not retained.
    pub fn new_glyph_id(&self, old_id: u16) -> Option<u16> {
        self.old_to_new.get(&old_id).copied()
    }

    /// Iterates over retained chars and their *original* glyph IDs in the ascending char order.
    pub fn char_map(&self) -> impl Iterator<Item = (char, u16)> + '_ {
        self.char_map.iter().copied()
    }
}

//! Rebuilding the `CFF ` table.

use super::{overflow, to_u16, write_u16};
use crate::{
    font::{
        cff::{op, CffFonts, Index, PrivateDict},
        charstring::{self, Subroutines},
        CffTable, GlyphWithMetrics, Outline,
    },
    Error, RebuildError, TableTag,
};

fn to_operand(value: usize) -> Result<i32, RebuildError> {
    i32::try_from(value).map_err(|_| overflow(TableTag::CFF, "DICT operand"))
}

fn offset_size(max_offset: usize) -> usize {
    match max_offset {
        0..=0xff => 1,
        0x100..=0xffff => 2,
        0x1_0000..=0xff_ffff => 3,
        _ => 4,
    }
}

/// Writes an INDEX using the minimum offset size.
fn write_index(buffer: &mut Vec<u8>, items: &[&[u8]]) -> Result<(), RebuildError> {
    let count = to_u16(items.len(), TableTag::CFF, "INDEX count")?;
    write_u16(buffer, count);
    if count == 0 {
        return Ok(());
    }

    let data_len: usize = items.iter().map(|item| item.len()).sum();
    let off_size = offset_size(data_len + 1);
    if off_size == 4 && u32::try_from(data_len + 1).is_err() {
        return Err(overflow(TableTag::CFF, "INDEX offset"));
    }
    #[allow(clippy::cast_possible_truncation)] // `off_size` is in 1..=4
    buffer.push(off_size as u8);
    let write_offset = |buffer: &mut Vec<u8>, offset: usize| {
        let bytes = offset.to_be_bytes();
        buffer.extend_from_slice(&bytes[bytes.len() - off_size..]);
    };
    let mut offset = 1;
    write_offset(buffer, offset);
    for item in items {
        offset += item.len();
        write_offset(buffer, offset);
    }
    for item in items {
        buffer.extend_from_slice(item);
    }
    Ok(())
}

/// Offsets of the table parts referenced from DICTs.
#[derive(Debug, Default, Clone, PartialEq)]
struct Layout {
    charset: usize,
    fd_select: usize,
    charstrings: usize,
    /// `(size, offset)` for each Private DICT.
    privates: Vec<(usize, usize)>,
    fd_array: usize,
}

/// Rebuilt `CFF ` table for the retained glyphs.
#[derive(Debug)]
pub(super) struct CffWriter<'a, 'r> {
    cff: &'r CffTable<'a>,
    old_glyph_ids: Vec<u16>,
    charstrings: Vec<Vec<u8>>,
    desubroutinize: bool,
}

impl<'a, 'r> CffWriter<'a, 'r> {
    const HEADER_LEN: u8 = 4;

    pub(super) fn new(
        cff: &'r CffTable<'a>,
        glyphs: &[GlyphWithMetrics<'a>],
        desubroutinize: bool,
    ) -> Result<Self, Error> {
        let mut old_glyph_ids = Vec::with_capacity(glyphs.len());
        let mut charstrings = Vec::with_capacity(glyphs.len());
        for glyph in glyphs {
            let Outline::Cff(charstring) = &glyph.inner else {
                continue;
            };
            old_glyph_ids.push(charstring.glyph_id);
            charstrings.push(if desubroutinize {
                let subrs = Subroutines {
                    global: &cff.global_subrs,
                    local: cff.local_subrs(charstring.glyph_id),
                };
                charstring::flatten(charstring.bytes, subrs)?
            } else {
                charstring.bytes.to_vec()
            });
        }

        if desubroutinize {
            log::debug!(
                "inlined subroutines into {} charstring(s)",
                charstrings.len()
            );
        }
        Ok(Self {
            cff,
            old_glyph_ids,
            charstrings,
            desubroutinize,
        })
    }

    pub(super) fn charstring_count(&self) -> usize {
        self.charstrings.len()
    }

    pub(super) fn write(&self, buffer: &mut Vec<u8>) -> Result<(), RebuildError> {
        // DICT offsets are written with fixed-size operands, so the layout doesn't depend
        // on offset values. The first pass determines the layout, and the second one writes
        // the actual data.
        let mut scratch = vec![];
        let layout = self.write_with_layout(&Layout::default(), &mut scratch)?;

        // Offsets are relative to the table start, so the table is assembled separately
        let mut table = Vec::with_capacity(scratch.len());
        let final_layout = self.write_with_layout(&layout, &mut table)?;
        debug_assert_eq!(layout, final_layout);
        buffer.extend_from_slice(&table);
        Ok(())
    }

    fn write_with_layout(
        &self,
        layout: &Layout,
        buffer: &mut Vec<u8>,
    ) -> Result<Layout, RebuildError> {
        let cff = self.cff;
        let mut actual = Layout::default();
        buffer.extend_from_slice(&[cff.major, cff.minor, Self::HEADER_LEN, 4]);
        buffer.extend_from_slice(cff.names.raw);

        let mut top_dict = vec![];
        cff.top_dict
            .write_patched(&mut top_dict, &self.top_dict_patches(layout)?);
        write_index(buffer, &[top_dict.as_slice()])?;
        buffer.extend_from_slice(cff.strings.raw);
        if self.desubroutinize {
            buffer.extend_from_slice(&Index::EMPTY);
        } else {
            buffer.extend_from_slice(cff.global_subrs.raw);
        }

        actual.charset = buffer.len();
        buffer.push(0); // format
        for &old_id in self.old_glyph_ids.iter().skip(1) {
            write_u16(buffer, cff.charset.id(old_id));
        }

        if cff.is_cid_keyed() {
            actual.fd_select = buffer.len();
            buffer.push(0); // format
            buffer.extend(self.old_glyph_ids.iter().map(|&id| cff.fd_index(id)));
        }

        actual.charstrings = buffer.len();
        let charstrings: Vec<&[u8]> = self.charstrings.iter().map(Vec::as_slice).collect();
        write_index(buffer, &charstrings)?;

        match &cff.fonts {
            CffFonts::NameKeyed(private) => {
                let offset = buffer.len();
                let size = self.write_private(private, buffer)?;
                actual.privates.push((size, offset));
            }
            CffFonts::CidKeyed { font_dicts, .. } => {
                for font_dict in font_dicts {
                    let offset = buffer.len();
                    let size = self.write_private(&font_dict.private, buffer)?;
                    actual.privates.push((size, offset));
                }

                actual.fd_array = buffer.len();
                let mut dicts = Vec::with_capacity(font_dicts.len());
                for (i, font_dict) in font_dicts.iter().enumerate() {
                    let (size, offset) = layout.privates.get(i).copied().unwrap_or_default();
                    let private = Some(vec![to_operand(size)?, to_operand(offset)?]);
                    let mut dict = vec![];
                    font_dict.dict.write_patched(&mut dict, &[(op::PRIVATE, private)]);
                    dicts.push(dict);
                }
                let dicts: Vec<&[u8]> = dicts.iter().map(Vec::as_slice).collect();
                write_index(buffer, &dicts)?;
            }
        }
        Ok(actual)
    }

    fn top_dict_patches(
        &self,
        layout: &Layout,
    ) -> Result<Vec<(u16, Option<Vec<i32>>)>, RebuildError> {
        let mut patches = vec![
            (op::CHARSET, Some(vec![to_operand(layout.charset)?])),
            (op::ENCODING, None),
            (op::CHAR_STRINGS, Some(vec![to_operand(layout.charstrings)?])),
        ];
        if self.cff.is_cid_keyed() {
            patches.push((op::FD_ARRAY, Some(vec![to_operand(layout.fd_array)?])));
            patches.push((op::FD_SELECT, Some(vec![to_operand(layout.fd_select)?])));
            patches.push((op::PRIVATE, None));
        } else {
            let (size, offset) = layout.privates.first().copied().unwrap_or_default();
            patches.push((op::PRIVATE, Some(vec![to_operand(size)?, to_operand(offset)?])));
        }
        Ok(patches)
    }

    /// Writes a Private DICT followed by its local subroutines. Returns the DICT size.
    fn write_private(
        &self,
        private: &PrivateDict<'_>,
        buffer: &mut Vec<u8>,
    ) -> Result<usize, RebuildError> {
        let subrs = private.subrs.as_ref().filter(|_| !self.desubroutinize);
        let patches = |offset| [(op::SUBRS, subrs.map(|_| vec![offset]))];

        let mut dict = vec![];
        private.dict.write_patched(&mut dict, &patches(0));
        let size = dict.len();
        if subrs.is_some() {
            // Subrs offset is relative to the Private DICT start
            dict.clear();
            private.dict.write_patched(&mut dict, &patches(to_operand(size)?));
        }

        buffer.extend_from_slice(&dict);
        if let Some(subrs) = subrs {
            buffer.extend_from_slice(subrs.raw);
        }
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use fontpress_test_fonts::FontBuilder;

    use super::*;
    use crate::{
        font::{Cursor, Outlines},
        Font, FontSubset, SubsetOptions,
    };

    fn rebuild_cff(font_bytes: &[u8], chars: &str, desubroutinize: bool) -> (Vec<u8>, Vec<u16>) {
        let font = Font::new(font_bytes).unwrap();
        let chars: BTreeSet<_> = chars.chars().collect();
        let options = SubsetOptions::default().with_desubroutinize(desubroutinize);
        let subset = FontSubset::new(font, &chars, options).unwrap();
        let Outlines::Cff(cff) = &subset.font.outlines else {
            unreachable!();
        };
        let writer = CffWriter::new(cff, &subset.glyphs, desubroutinize).unwrap();
        assert_eq!(writer.charstring_count(), subset.glyph_count());
        let mut buffer = vec![];
        writer.write(&mut buffer).unwrap();
        (buffer, subset.closure().old_glyph_ids().to_vec())
    }

    fn source_cff(font_bytes: &[u8]) -> CffTable<'_> {
        let font = Font::new(font_bytes).unwrap();
        let raw = font.table(TableTag::CFF).unwrap();
        CffTable::parse(raw, font.glyph_count()).unwrap()
    }

    #[test]
    fn index_offset_sizes() {
        let mut buffer = vec![];
        write_index(&mut buffer, &[]).unwrap();
        assert_eq!(buffer, Index::EMPTY);

        buffer.clear();
        write_index(&mut buffer, &[b"ab".as_slice(), b"c"]).unwrap();
        assert_eq!(buffer, [0, 2, 1, 1, 3, 4, b'a', b'b', b'c']);

        let large = vec![0_u8; 300];
        buffer.clear();
        write_index(&mut buffer, &[large.as_slice()]).unwrap();
        assert_eq!(buffer[..7], [0, 1, 2, 0, 1, 0x01, 0x2d]);

        let parsed = Index::parse(&mut Cursor::new(&buffer, None)).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.get(0).unwrap().bytes, large.as_slice());
    }

    #[test]
    fn index_count_overflow() {
        let items = vec![&[] as &[u8]; 70_000];
        let err = write_index(&mut vec![], &items).unwrap_err();
        assert_eq!(err.table(), TableTag::CFF);
    }

    #[test]
    fn desubroutinized_table_has_no_subroutines() {
        let font_bytes = FontBuilder::latin()
            .with_cff_outlines()
            .with_subroutines()
            .build();
        let source = source_cff(&font_bytes);
        assert!(source.global_subrs.len() > 0);

        let (rebuilt, old_ids) = rebuild_cff(&font_bytes, "AB", true);
        let rebuilt = CffTable::parse(&rebuilt, u16::try_from(old_ids.len()).unwrap()).unwrap();
        assert_eq!(rebuilt.global_subrs.len(), 0);
        assert!(rebuilt.local_subrs(0).is_none());
        assert!(rebuilt.top_dict.get(op::ENCODING).is_none());

        for (new_id, &old_id) in (0_u16..).zip(&old_ids) {
            let subrs = Subroutines {
                global: &source.global_subrs,
                local: source.local_subrs(old_id),
            };
            let expected = charstring::flatten(source.charstring(old_id).unwrap().bytes, subrs);
            assert_eq!(rebuilt.charstring(new_id).unwrap().bytes, expected.unwrap());
            assert_eq!(rebuilt.charset.id(new_id), source.charset.id(old_id));
        }
    }

    #[test]
    fn subroutines_are_retained_if_requested() {
        let font_bytes = FontBuilder::latin()
            .with_cff_outlines()
            .with_subroutines()
            .build();
        let source = source_cff(&font_bytes);

        let (rebuilt, old_ids) = rebuild_cff(&font_bytes, "AB", false);
        let rebuilt = CffTable::parse(&rebuilt, u16::try_from(old_ids.len()).unwrap()).unwrap();
        assert_eq!(rebuilt.global_subrs.raw, source.global_subrs.raw);
        assert_eq!(
            rebuilt.local_subrs(0).map(|subrs| subrs.raw),
            source.local_subrs(0).map(|subrs| subrs.raw)
        );
        for (new_id, &old_id) in (0_u16..).zip(&old_ids) {
            assert_eq!(
                rebuilt.charstring(new_id).unwrap().bytes,
                source.charstring(old_id).unwrap().bytes
            );
        }
    }

    #[test]
    fn cid_keyed_font_dicts_are_selected_for_new_ids() {
        let font_bytes = FontBuilder::latin()
            .with_cid_keyed_cff()
            .with_subroutines()
            .build();
        let source = source_cff(&font_bytes);
        assert!(source.is_cid_keyed());

        for desubroutinize in [false, true] {
            let (rebuilt, old_ids) = rebuild_cff(&font_bytes, "Bab", desubroutinize);
            let rebuilt =
                CffTable::parse(&rebuilt, u16::try_from(old_ids.len()).unwrap()).unwrap();
            assert!(rebuilt.is_cid_keyed());
            assert!(rebuilt.top_dict.get(op::PRIVATE).is_none());
            for (new_id, &old_id) in (0_u16..).zip(&old_ids) {
                assert_eq!(rebuilt.fd_index(new_id), source.fd_index(old_id));
                assert_eq!(rebuilt.charset.id(new_id), source.charset.id(old_id));
                assert_eq!(
                    rebuilt.local_subrs(new_id).is_some(),
                    !desubroutinize && source.local_subrs(old_id).is_some()
                );
            }
        }
    }
}

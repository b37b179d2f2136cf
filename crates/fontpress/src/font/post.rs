//! `post` table parsing.

use super::Cursor;
use crate::{errors::ParseErrorKind, ParseError, TableTag};

/// Glyph names stored in the `post` table.
#[derive(Debug, Clone)]
pub(crate) enum GlyphNames<'a> {
    /// Version 1.0: glyphs follow the standard Macintosh order.
    Standard,
    /// Version 2.0: per-glyph indices into the standard names and custom Pascal strings.
    Indexed {
        indices: Vec<u16>,
        custom: Vec<&'a [u8]>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct PostTable<'a> {
    /// Fixed-size header (version, italic angle, underline metrics, memory hints).
    pub(crate) header: &'a [u8],
    pub(crate) names: Option<GlyphNames<'a>>,
}

impl<'a> PostTable<'a> {
    pub(crate) const HEADER_LEN: usize = 32;
    pub(crate) const VERSION_1: u32 = 0x_0001_0000;
    pub(crate) const VERSION_2: u32 = 0x_0002_0000;
    pub(crate) const VERSION_3: u32 = 0x_0003_0000;
    /// Number of names in the standard Macintosh glyph order.
    pub(crate) const STANDARD_NAMES: u16 = 258;

    pub(crate) fn parse(raw: &'a [u8]) -> Result<Self, ParseError> {
        let mut cursor = Cursor::new(raw, Some(TableTag::POST));
        let header = cursor.split_at(Self::HEADER_LEN)?;
        let version = header.range(0..4)?.read_u32()?;
        let names = match version {
            Self::VERSION_1 => Some(GlyphNames::Standard),
            Self::VERSION_2 => Some(Self::parse_indexed_names(cursor)?),
            _ => None,
        };
        Ok(Self {
            header: header.bytes,
            names,
        })
    }

    fn parse_indexed_names(mut cursor: Cursor<'a>) -> Result<GlyphNames<'a>, ParseError> {
        let glyph_count = cursor.read_u16()?;
        let indices = (0..glyph_count)
            .map(|_| cursor.read_u16())
            .collect::<Result<Vec<_>, _>>()?;
        let mut custom = vec![];
        while !cursor.is_empty() {
            let len = cursor.read_u8()?;
            custom.push(cursor.split_at(len.into())?.bytes);
        }

        let max_custom_idx = indices
            .iter()
            .filter_map(|&idx| idx.checked_sub(Self::STANDARD_NAMES))
            .max();
        if let Some(idx) = max_custom_idx {
            if usize::from(idx) >= custom.len() {
                return Err(cursor.err(ParseErrorKind::InvalidValue("glyph name index")));
            }
        }
        Ok(GlyphNames::Indexed { indices, custom })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsing_v2_names() {
        let mut raw = PostTable::VERSION_2.to_be_bytes().to_vec();
        raw.resize(PostTable::HEADER_LEN, 0);
        raw.extend_from_slice(&3_u16.to_be_bytes());
        for idx in [0_u16, 36, 258] {
            raw.extend_from_slice(&idx.to_be_bytes());
        }
        raw.push(4);
        raw.extend_from_slice(b"uni0");

        let post = PostTable::parse(&raw).unwrap();
        let Some(GlyphNames::Indexed { indices, custom }) = &post.names else {
            panic!("unexpected names: {:?}", post.names);
        };
        assert_eq!(*indices, [0, 36, 258]);
        assert_eq!(*custom, [b"uni0"]);
    }

    #[test]
    fn dangling_name_index_is_an_error() {
        let mut raw = PostTable::VERSION_2.to_be_bytes().to_vec();
        raw.resize(PostTable::HEADER_LEN, 0);
        raw.extend_from_slice(&1_u16.to_be_bytes());
        raw.extend_from_slice(&300_u16.to_be_bytes());
        let err = PostTable::parse(&raw).unwrap_err();
        assert!(matches!(err.kind(), ParseErrorKind::InvalidValue(_)), "{err:?}");
    }

    #[test]
    fn v3_has_no_names() {
        let mut raw = PostTable::VERSION_3.to_be_bytes().to_vec();
        raw.resize(PostTable::HEADER_LEN, 0);
        let post = PostTable::parse(&raw).unwrap();
        assert!(post.names.is_none());
    }
}

//! `CFF ` table parsing: INDEX and DICT structures, charsets and Font DICT selection.

use super::Cursor;
use crate::{errors::ParseErrorKind, ParseError, TableTag};

/// DICT operators relevant for subsetting. Two-byte operators are encoded as `0x0c00 | b1`.
pub(crate) mod op {
    pub(crate) const CHARSET: u16 = 15;
    pub(crate) const ENCODING: u16 = 16;
    pub(crate) const CHAR_STRINGS: u16 = 17;
    pub(crate) const PRIVATE: u16 = 18;
    pub(crate) const SUBRS: u16 = 19;
    pub(crate) const ESCAPE: u8 = 12;
    pub(crate) const ROS: u16 = 0x0c1e;
    pub(crate) const FD_ARRAY: u16 = 0x0c24;
    pub(crate) const FD_SELECT: u16 = 0x0c25;
}

const MAX_OPERANDS: usize = 48;

fn invalid(cursor: &Cursor<'_>, what: &'static str) -> ParseError {
    cursor.err(ParseErrorKind::InvalidValue(what))
}

/// CFF INDEX: an array of variable-sized objects.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Index<'a> {
    count: usize,
    off_size: u8,
    offsets: Cursor<'a>,
    data: Cursor<'a>,
    /// Complete INDEX bytes, including the header.
    pub(crate) raw: &'a [u8],
}

impl<'a> Index<'a> {
    /// Empty INDEX encoding.
    pub(crate) const EMPTY: [u8; 2] = [0, 0];

    pub(crate) fn parse(cursor: &mut Cursor<'a>) -> Result<Self, ParseError> {
        let start = *cursor;
        let count = usize::from(cursor.read_u16()?);
        if count == 0 {
            return Ok(Self {
                count,
                off_size: 1,
                offsets: cursor.range(0..0)?,
                data: cursor.range(0..0)?,
                raw: start.range(0..2)?.bytes,
            });
        }

        let off_size = cursor.read_u8()?;
        if !(1..=4).contains(&off_size) {
            return Err(invalid(cursor, "INDEX offset size"));
        }
        let offsets = cursor.split_at((count + 1) * usize::from(off_size))?;
        let mut this = Self {
            count,
            off_size,
            offsets,
            data: offsets,
            raw: &[],
        };
        let data_len = this
            .offset(count)?
            .checked_sub(1)
            .ok_or_else(|| invalid(&offsets, "INDEX offset"))?;
        this.data = cursor.split_at(data_len)?;
        let raw_len = cursor.offset() - start.offset();
        this.raw = start.range(0..raw_len)?.bytes;
        Ok(this)
    }

    fn offset(&self, idx: usize) -> Result<usize, ParseError> {
        let off_size = usize::from(self.off_size);
        let mut cursor = self.offsets.range(idx * off_size..(idx + 1) * off_size)?;
        let mut value = 0_usize;
        for _ in 0..off_size {
            value = (value << 8) | usize::from(cursor.read_u8()?);
        }
        Ok(value)
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn get(&self, idx: usize) -> Result<Cursor<'a>, ParseError> {
        if idx >= self.count {
            return Err(self.data.err(ParseErrorKind::OffsetOutOfBounds(idx)));
        }
        let start = self.offset(idx)?;
        let end = self.offset(idx + 1)?;
        if start == 0 || start > end {
            return Err(invalid(&self.offsets, "INDEX offset"));
        }
        self.data.range(start - 1..end - 1)
    }
}

/// DICT operand with its original encoding.
#[derive(Debug, Clone)]
pub(crate) struct Operand<'a> {
    pub(crate) raw: &'a [u8],
    /// Integer value; `None` for real numbers.
    pub(crate) value: Option<i32>,
}

#[derive(Debug, Clone)]
pub(crate) struct DictEntry<'a> {
    pub(crate) operator: u16,
    pub(crate) operands: Vec<Operand<'a>>,
}

/// CFF DICT: a sequence of operator entries.
#[derive(Debug, Clone, Default)]
pub(crate) struct Dict<'a> {
    pub(crate) entries: Vec<DictEntry<'a>>,
}

impl<'a> Dict<'a> {
    pub(crate) fn parse(mut cursor: Cursor<'a>) -> Result<Self, ParseError> {
        let mut entries = vec![];
        let mut operands = vec![];
        while !cursor.is_empty() {
            let start = cursor;
            let b0 = cursor.read_u8()?;
            let value = match b0 {
                0..=11 | 13..=21 => {
                    let operator = u16::from(b0);
                    entries.push(DictEntry {
                        operator,
                        operands: std::mem::take(&mut operands),
                    });
                    continue;
                }
                op::ESCAPE => {
                    let operator = 0x0c00 | u16::from(cursor.read_u8()?);
                    entries.push(DictEntry {
                        operator,
                        operands: std::mem::take(&mut operands),
                    });
                    continue;
                }
                28 => Some(i32::from(cursor.read_i16()?)),
                29 => Some(i32::from_be_bytes(cursor.read_byte_array()?)),
                30 => {
                    // Real number: nibbles up to the end-of-number marker in either half of a byte
                    loop {
                        let byte = cursor.read_u8()?;
                        if byte >> 4 == 0x0f || byte & 0x0f == 0x0f {
                            break;
                        }
                    }
                    None
                }
                32..=246 => Some(i32::from(b0) - 139),
                247..=250 => {
                    let b1 = cursor.read_u8()?;
                    Some((i32::from(b0) - 247) * 256 + i32::from(b1) + 108)
                }
                251..=254 => {
                    let b1 = cursor.read_u8()?;
                    Some(-(i32::from(b0) - 251) * 256 - i32::from(b1) - 108)
                }
                22..=27 | 31 | 255 => return Err(invalid(&start, "DICT operand")),
            };
            let len = cursor.offset() - start.offset();
            operands.push(Operand {
                raw: start.range(0..len)?.bytes,
                value,
            });
            if operands.len() > MAX_OPERANDS {
                return Err(invalid(&start, "DICT operand count"));
            }
        }
        Ok(Self { entries })
    }

    pub(crate) fn get(&self, operator: u16) -> Option<&[Operand<'a>]> {
        self.entries
            .iter()
            .find(|entry| entry.operator == operator)
            .map(|entry| entry.operands.as_slice())
    }

    /// Returns non-negative integer operands for the specified operator.
    fn offsets<const N: usize>(
        &self,
        operator: u16,
        cursor: &Cursor<'_>,
    ) -> Result<Option<[usize; N]>, ParseError> {
        let Some(operands) = self.get(operator) else {
            return Ok(None);
        };
        if operands.len() != N {
            return Err(invalid(cursor, "DICT operand count"));
        }
        let mut values = [0; N];
        for (value, operand) in values.iter_mut().zip(operands) {
            let int = operand.value.ok_or_else(|| invalid(cursor, "DICT offset"))?;
            *value = usize::try_from(int).map_err(|_| invalid(cursor, "DICT offset"))?;
        }
        Ok(Some(values))
    }

    /// Writes this DICT, replacing operands for the patched operators. Patches with `None`
    /// remove the operator; patched operators absent from the DICT are appended.
    /// Patched operands are encoded as fixed-size 32-bit integers.
    pub(crate) fn write_patched(&self, buffer: &mut Vec<u8>, patches: &[(u16, Option<Vec<i32>>)]) {
        let find_patch = |operator| patches.iter().find(|(patched, _)| *patched == operator);
        for entry in &self.entries {
            match find_patch(entry.operator) {
                Some((_, None)) => { /* removed */ }
                Some((operator, Some(values))) => write_fixed_entry(buffer, *operator, values),
                None => {
                    for operand in &entry.operands {
                        buffer.extend_from_slice(operand.raw);
                    }
                    write_operator(buffer, entry.operator);
                }
            }
        }

        for (operator, values) in patches {
            let is_present = self.entries.iter().any(|entry| entry.operator == *operator);
            if let (false, Some(values)) = (is_present, values) {
                write_fixed_entry(buffer, *operator, values);
            }
        }
    }
}

fn write_operator(buffer: &mut Vec<u8>, operator: u16) {
    match u8::try_from(operator) {
        Ok(byte) => buffer.push(byte),
        Err(_) => buffer.extend_from_slice(&operator.to_be_bytes()),
    }
}

fn write_fixed_entry(buffer: &mut Vec<u8>, operator: u16, values: &[i32]) {
    for &value in values {
        buffer.push(29);
        buffer.extend_from_slice(&value.to_be_bytes());
    }
    write_operator(buffer, operator);
}

/// SIDs of the predefined Expert charset.
#[rustfmt::skip]
const EXPERT_SIDS: &[u16] = &[
      0,    1,  229,  230,  231,  232,  233,  234,  235,  236,  237,  238,   13,   14,   15,   99,
    239,  240,  241,  242,  243,  244,  245,  246,  247,  248,   27,   28,  249,  250,  251,  252,
    253,  254,  255,  256,  257,  258,  259,  260,  261,  262,  263,  264,  265,  266,  109,  110,
    267,  268,  269,  270,  271,  272,  273,  274,  275,  276,  277,  278,  279,  280,  281,  282,
    283,  284,  285,  286,  287,  288,  289,  290,  291,  292,  293,  294,  295,  296,  297,  298,
    299,  300,  301,  302,  303,  304,  305,  306,  307,  308,  309,  310,  311,  312,  313,  314,
    315,  316,  317,  318,  158,  155,  163,  319,  320,  321,  322,  323,  324,  325,  326,  150,
    164,  169,  327,  328,  329,  330,  331,  332,  333,  334,  335,  336,  337,  338,  339,  340,
    341,  342,  343,  344,  345,  346,  347,  348,  349,  350,  351,  352,  353,  354,  355,  356,
    357,  358,  359,  360,  361,  362,  363,  364,  365,  366,  367,  368,  369,  370,  371,  372,
    373,  374,  375,  376,  377,  378,
];

/// SIDs of the predefined Expert Subset charset.
#[rustfmt::skip]
const EXPERT_SUBSET_SIDS: &[u16] = &[
      0,    1,  231,  232,  235,  236,  237,  238,   13,   14,   15,   99,  239,  240,  241,  242,
    243,  244,  245,  246,  247,  248,   27,   28,  249,  250,  251,  253,  254,  255,  256,  257,
    258,  259,  260,  261,  262,  263,  264,  265,  266,  109,  110,  267,  268,  269,  270,  272,
    300,  301,  302,  305,  314,  315,  158,  155,  163,  320,  321,  322,  323,  324,  325,  326,
    150,  164,  169,  327,  328,  329,  330,  331,  332,  333,  334,  335,  336,  337,  338,  339,
    340,  341,  342,  343,  344,  345,  346,
];

/// Mapping of glyph IDs to SIDs (for name-keyed fonts) or CIDs.
#[derive(Debug, Clone)]
pub(crate) enum Charset {
    /// Predefined ISOAdobe charset; IDs coincide with glyph IDs.
    IsoAdobe,
    /// IDs for each glyph, starting from glyph 0 (`.notdef`, always 0).
    Custom(Vec<u16>),
}

impl Charset {
    /// Resolves the charset by the `charset` operand of the Top DICT. Offsets 0..=2 denote
    /// predefined charsets.
    fn new(
        table: &Cursor<'_>,
        offset: Option<usize>,
        glyph_count: usize,
    ) -> Result<Self, ParseError> {
        let predefined_sids = match offset {
            None | Some(0) => return Ok(Self::IsoAdobe),
            Some(1) => EXPERT_SIDS,
            Some(2) => EXPERT_SUBSET_SIDS,
            Some(offset) => return Self::parse(table.at(offset)?, glyph_count),
        };
        if glyph_count > predefined_sids.len() {
            log::warn!(
                "predefined charset covers {} glyphs out of {glyph_count}",
                predefined_sids.len()
            );
        }
        let ids = predefined_sids.iter().copied().take(glyph_count);
        Ok(Self::Custom(ids.collect()))
    }

    fn parse(mut cursor: Cursor<'_>, glyph_count: usize) -> Result<Self, ParseError> {
        let format = cursor.read_u8()?;
        let mut ids = Vec::with_capacity(glyph_count);
        ids.push(0);
        while ids.len() < glyph_count {
            match format {
                0 => ids.push(cursor.read_u16()?),
                1 | 2 => {
                    let first = cursor.read_u16()?;
                    let left = if format == 1 {
                        u16::from(cursor.read_u8()?)
                    } else {
                        cursor.read_u16()?
                    };
                    let range = (0..=left).map_while(|i| first.checked_add(i));
                    ids.extend(range.take(glyph_count - ids.len()));
                }
                _ => return Err(cursor.err(ParseErrorKind::UnexpectedTableFormat(format.into()))),
            }
        }
        Ok(Self::Custom(ids))
    }

    pub(crate) fn id(&self, glyph_id: u16) -> u16 {
        match self {
            Self::IsoAdobe => glyph_id,
            Self::Custom(ids) => ids.get(usize::from(glyph_id)).copied().unwrap_or(0),
        }
    }
}

fn parse_fd_select(
    mut cursor: Cursor<'_>,
    glyph_count: usize,
    font_dict_count: usize,
) -> Result<Vec<u8>, ParseError> {
    let format_cursor = cursor;
    let format = cursor.read_u8()?;
    let fd_indices = match format {
        0 => cursor.split_at(glyph_count)?.bytes.to_vec(),
        3 => {
            let range_count = cursor.read_u16()?;
            let mut ranges = Vec::with_capacity(usize::from(range_count) + 1);
            for _ in 0..range_count {
                ranges.push((cursor.read_u16()?, cursor.read_u8()?));
            }
            let sentinel = cursor.read_u16()?;
            ranges.push((sentinel, 0));

            let mut fd_indices = vec![0_u8; glyph_count];
            for window in ranges.windows(2) {
                let ((first, fd_idx), (next, _)) = (window[0], window[1]);
                let range = usize::from(first)..usize::from(next).min(glyph_count);
                if let Some(slice) = fd_indices.get_mut(range) {
                    slice.fill(fd_idx);
                }
            }
            fd_indices
        }
        _ => {
            let err = ParseErrorKind::UnexpectedTableFormat(format.into());
            return Err(format_cursor.err(err));
        }
    };

    if fd_indices.iter().any(|&idx| usize::from(idx) >= font_dict_count) {
        return Err(invalid(&format_cursor, "Font DICT index"));
    }
    Ok(fd_indices)
}

/// Private DICT together with its local subroutines.
#[derive(Debug, Clone)]
pub(crate) struct PrivateDict<'a> {
    pub(crate) dict: Dict<'a>,
    pub(crate) subrs: Option<Index<'a>>,
}

impl<'a> PrivateDict<'a> {
    fn parse(table: &Cursor<'a>, parent: &Dict<'a>) -> Result<Self, ParseError> {
        let [size, offset] = parent
            .offsets(op::PRIVATE, table)?
            .ok_or_else(|| invalid(table, "Private DICT"))?;
        let private = table.at(offset)?;
        let dict = Dict::parse(private.range(0..size)?)?;
        let subrs = if let Some([subrs_offset]) = dict.offsets(op::SUBRS, &private)? {
            Some(Index::parse(&mut private.at(subrs_offset)?)?)
        } else {
            None
        };
        Ok(Self { dict, subrs })
    }
}

/// Font DICT of a CID-keyed font.
#[derive(Debug, Clone)]
pub(crate) struct FontDict<'a> {
    pub(crate) dict: Dict<'a>,
    pub(crate) private: PrivateDict<'a>,
}

#[derive(Debug, Clone)]
pub(crate) enum CffFonts<'a> {
    NameKeyed(PrivateDict<'a>),
    CidKeyed {
        fd_select: Vec<u8>,
        font_dicts: Vec<FontDict<'a>>,
    },
}

/// Type 2 charstring of a single glyph.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CharString<'a> {
    pub(crate) bytes: &'a [u8],
    pub(crate) glyph_id: u16,
}

/// Parsed `CFF ` table (version 1).
#[derive(Debug)]
pub(crate) struct CffTable<'a> {
    pub(crate) major: u8,
    pub(crate) minor: u8,
    pub(crate) names: Index<'a>,
    pub(crate) top_dict: Dict<'a>,
    pub(crate) strings: Index<'a>,
    pub(crate) global_subrs: Index<'a>,
    pub(crate) charstrings: Index<'a>,
    pub(crate) charset: Charset,
    pub(crate) fonts: CffFonts<'a>,
}

impl<'a> CffTable<'a> {
    pub(crate) fn parse(raw: &'a [u8], glyph_count: u16) -> Result<Self, ParseError> {
        let table = Cursor::new(raw, Some(TableTag::CFF));
        let mut cursor = table;
        let major = cursor.read_u8()?;
        if major != 1 {
            let err = ParseErrorKind::UnexpectedTableVersion(major.into());
            return Err(table.err(err));
        }
        let minor = cursor.read_u8()?;
        let header_len = cursor.read_u8()?;
        let mut cursor = table.at(header_len.into())?;

        let names = Index::parse(&mut cursor)?;
        if names.len() != 1 {
            return Err(invalid(&cursor, "font count"));
        }
        let top_dicts = Index::parse(&mut cursor)?;
        let top_dict = Dict::parse(top_dicts.get(0)?)?;
        let strings = Index::parse(&mut cursor)?;
        let global_subrs = Index::parse(&mut cursor)?;

        let [charstrings_offset] = top_dict
            .offsets(op::CHAR_STRINGS, &table)?
            .ok_or_else(|| invalid(&table, "CharStrings offset"))?;
        let charstrings = Index::parse(&mut table.at(charstrings_offset)?)?;
        let glyph_count = usize::from(glyph_count);
        if charstrings.len() != glyph_count {
            return Err(table.err(ParseErrorKind::GlyphOutOfRange {
                glyph_id: u16::try_from(charstrings.len()).unwrap_or(u16::MAX),
                glyph_count: u16::try_from(glyph_count).unwrap_or(u16::MAX),
            }));
        }

        let charset_offset = top_dict.offsets(op::CHARSET, &table)?.map(|[offset]| offset);
        let charset = Charset::new(&table, charset_offset, glyph_count)?;

        let fonts = if top_dict.get(op::ROS).is_some() {
            let [fd_array_offset] = top_dict
                .offsets(op::FD_ARRAY, &table)?
                .ok_or_else(|| invalid(&table, "FDArray offset"))?;
            let fd_array = Index::parse(&mut table.at(fd_array_offset)?)?;
            let font_dicts = (0..fd_array.len())
                .map(|idx| {
                    let dict = Dict::parse(fd_array.get(idx)?)?;
                    let private = PrivateDict::parse(&table, &dict)?;
                    Ok(FontDict { dict, private })
                })
                .collect::<Result<Vec<_>, ParseError>>()?;

            let [fd_select_offset] = top_dict
                .offsets(op::FD_SELECT, &table)?
                .ok_or_else(|| invalid(&table, "FDSelect offset"))?;
            let fd_select =
                parse_fd_select(table.at(fd_select_offset)?, glyph_count, font_dicts.len())?;
            CffFonts::CidKeyed {
                fd_select,
                font_dicts,
            }
        } else {
            CffFonts::NameKeyed(PrivateDict::parse(&table, &top_dict)?)
        };

        Ok(Self {
            major,
            minor,
            names,
            top_dict,
            strings,
            global_subrs,
            charstrings,
            charset,
            fonts,
        })
    }

    pub(crate) fn is_cid_keyed(&self) -> bool {
        matches!(self.fonts, CffFonts::CidKeyed { .. })
    }

    pub(crate) fn charstring(&self, glyph_id: u16) -> Result<CharString<'a>, ParseError> {
        Ok(CharString {
            bytes: self.charstrings.get(glyph_id.into())?.bytes,
            glyph_id,
        })
    }

    pub(crate) fn fd_index(&self, glyph_id: u16) -> u8 {
        match &self.fonts {
            CffFonts::NameKeyed(_) => 0,
            CffFonts::CidKeyed { fd_select, .. } => {
                fd_select.get(usize::from(glyph_id)).copied().unwrap_or(0)
            }
        }
    }

    pub(crate) fn local_subrs(&self, glyph_id: u16) -> Option<&Index<'a>> {
        match &self.fonts {
            CffFonts::NameKeyed(private) => private.subrs.as_ref(),
            CffFonts::CidKeyed { font_dicts, .. } => {
                let font_dict = font_dicts.get(usize::from(self.fd_index(glyph_id)))?;
                font_dict.private.subrs.as_ref()
            }
        }
    }
}

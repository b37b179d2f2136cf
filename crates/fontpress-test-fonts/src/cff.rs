//! Generation of the `CFF ` table.

use crate::{
    tables::{push_u16, push_u32},
    Shape, TestGlyph,
};

mod ops {
    pub(super) const HLINETO: u8 = 6;
    pub(super) const VLINETO: u8 = 7;
    pub(super) const CALLSUBR: u8 = 10;
    pub(super) const RETURN: u8 = 11;
    pub(super) const ENDCHAR: u8 = 14;
    pub(super) const RMOVETO: u8 = 21;
    pub(super) const CALLGSUBR: u8 = 29;

    // DICT operators
    pub(super) const CHARSET: u16 = 15;
    pub(super) const CHAR_STRINGS: u16 = 17;
    pub(super) const PRIVATE: u16 = 18;
    pub(super) const SUBRS: u16 = 19;
    pub(super) const DEFAULT_WIDTH_X: u16 = 20;
    pub(super) const ROS: u16 = 0x0c1e;
    pub(super) const FD_ARRAY: u16 = 0x0c24;
    pub(super) const FD_SELECT: u16 = 0x0c25;
}

/// First SID of custom strings.
const CUSTOM_SID: usize = 391;
/// Bias for subroutine numbers in INDEXes with less than 1240 subroutines.
const SUBR_BIAS: i32 = 107;

/// Encodes a charstring integer operand.
fn push_int(buffer: &mut Vec<u8>, value: i32) {
    let byte = |value: i32| u8::try_from(value).expect("byte overflow");
    match value {
        -107..=107 => buffer.push(byte(value + 139)),
        108..=1131 => {
            let value = value - 108;
            buffer.extend_from_slice(&[byte(value / 256 + 247), byte(value % 256)]);
        }
        -1131..=-108 => {
            let value = -value - 108;
            buffer.extend_from_slice(&[byte(value / 256 + 251), byte(value % 256)]);
        }
        _ => {
            buffer.push(28);
            let value = i16::try_from(value).expect("charstring operand overflow");
            buffer.extend_from_slice(&value.to_be_bytes());
        }
    }
}

fn index(items: &[&[u8]]) -> Vec<u8> {
    if items.is_empty() {
        return vec![0, 0];
    }
    let data_len: usize = items.iter().map(|item| item.len()).sum();
    let off_size = match data_len + 1 {
        0..=0xff => 1,
        0x100..=0xffff => 2,
        0x1_0000..=0xff_ffff => 3,
        _ => 4,
    };
    let mut buffer = vec![];
    push_u16(&mut buffer, u16::try_from(items.len()).expect("INDEX overflow"));
    buffer.push(u8::try_from(off_size).expect("offset size"));
    let mut offset = 1_usize;
    let push_offset = |buffer: &mut Vec<u8>, offset: usize| {
        let bytes = offset.to_be_bytes();
        buffer.extend_from_slice(&bytes[bytes.len() - off_size..]);
    };
    push_offset(&mut buffer, offset);
    for item in items {
        offset += item.len();
        push_offset(&mut buffer, offset);
    }
    for item in items {
        buffer.extend_from_slice(item);
    }
    buffer
}

/// DICT with integer operands encoded as fixed-size 32-bit values.
#[derive(Debug, Default)]
struct Dict(Vec<u8>);

impl Dict {
    fn entry(mut self, operator: u16, operands: &[usize]) -> Self {
        for &operand in operands {
            self.0.push(29);
            push_u32(
                &mut self.0,
                u32::try_from(operand).expect("DICT operand overflow"),
            );
        }
        match u8::try_from(operator) {
            Ok(byte) => self.0.push(byte),
            Err(_) => push_u16(&mut self.0, operator),
        }
        self
    }
}

fn charstring(glyph: &TestGlyph, subroutines: bool) -> Vec<u8> {
    let mut buffer = vec![];
    if matches!(glyph.shape, Shape::Empty) {
        buffer.push(ops::ENDCHAR);
        return buffer;
    }

    let size = i32::from(glyph.square_size());
    push_int(&mut buffer, 0);
    push_int(&mut buffer, 0);
    buffer.push(ops::RMOVETO);
    if subroutines {
        // Local subr 0 is `hlineto return`, global subr 0 is `vlineto return`
        push_int(&mut buffer, size);
        push_int(&mut buffer, -SUBR_BIAS);
        buffer.push(ops::CALLSUBR);
        push_int(&mut buffer, size);
        push_int(&mut buffer, -SUBR_BIAS);
        buffer.push(ops::CALLGSUBR);
    } else {
        push_int(&mut buffer, size);
        buffer.push(ops::HLINETO);
        push_int(&mut buffer, size);
        buffer.push(ops::VLINETO);
    }
    push_int(&mut buffer, -size);
    buffer.push(ops::HLINETO);
    buffer.push(ops::ENDCHAR);
    buffer
}

/// Writes a Private DICT followed by local subroutines (if any).
fn private_dict(subroutines: bool, buffer: &mut Vec<u8>) -> (usize, usize) {
    let offset = buffer.len();
    let dict = Dict::default().entry(ops::DEFAULT_WIDTH_X, &[500]);
    // Subrs offset is relative to the dict start; the dict size doesn't depend on it
    let dict_len = dict.0.len() + if subroutines { 6 } else { 0 };
    let dict = if subroutines {
        dict.entry(ops::SUBRS, &[dict_len])
    } else {
        dict
    };
    buffer.extend_from_slice(&dict.0);
    if subroutines {
        buffer.extend_from_slice(&index(&[[ops::HLINETO, ops::RETURN].as_slice()]));
    }
    (dict_len, offset)
}

/// Creates a CFF table for the specified glyphs.
pub(crate) fn cff_table(glyphs: &[TestGlyph], cid_keyed: bool, subroutines: bool) -> Vec<u8> {
    let mut strings: Vec<String> = vec![];
    let mut charset = vec![0_u8]; // format 0
    for (glyph_id, glyph) in glyphs.iter().enumerate().skip(1) {
        let sid = if cid_keyed {
            glyph_id
        } else {
            match glyph.chars.first() {
                // Standard strings contain ASCII glyph names starting from SID 1 (space)
                Some(ch) if glyph.name.is_none() && (' '..='~').contains(ch) => {
                    usize::try_from(u32::from(*ch) - 31).expect("ASCII code")
                }
                _ => {
                    strings.push(glyph.name(glyph_id));
                    CUSTOM_SID + strings.len() - 1
                }
            }
        };
        push_u16(&mut charset, u16::try_from(sid).expect("SID overflow"));
    }
    if cid_keyed {
        strings = vec!["Adobe".to_owned(), "Identity".to_owned()];
    }

    let header = [1_u8, 0, 4, 1];
    let names = index(&[b"FontpressTest".as_slice()]);
    let strings: Vec<&[u8]> = strings.iter().map(String::as_bytes).collect();
    let strings = index(&strings);
    let global_subrs = if subroutines {
        index(&[[ops::VLINETO, ops::RETURN].as_slice()])
    } else {
        index(&[])
    };

    // All DICT operands are fixed-size, so the top DICT length is known in advance
    let top_dict = |charset: usize, charstrings: usize, extra: [usize; 2]| {
        let dict = if cid_keyed {
            Dict::default()
                .entry(ops::ROS, &[CUSTOM_SID, CUSTOM_SID + 1, 0])
                .entry(ops::FD_ARRAY, &[extra[0]])
                .entry(ops::FD_SELECT, &[extra[1]])
        } else {
            Dict::default().entry(ops::PRIVATE, &extra)
        };
        dict.entry(ops::CHARSET, &[charset])
            .entry(ops::CHAR_STRINGS, &[charstrings])
    };
    let top_dict_len = index(&[top_dict(0, 0, [0, 0]).0.as_slice()]).len();
    let base = header.len() + names.len() + top_dict_len + strings.len() + global_subrs.len();

    let mut tail = vec![];
    let charset_offset = base;
    tail.extend_from_slice(&charset);

    let fd_select_offset = base + tail.len();
    let glyph_count = u16::try_from(glyphs.len()).expect("glyph count overflow");
    if cid_keyed {
        // Format 3: the first half of glyphs uses Font DICT 0, and the rest uses Font DICT 1
        tail.push(3);
        push_u16(&mut tail, 2);
        push_u16(&mut tail, 0);
        tail.push(0);
        push_u16(&mut tail, glyph_count / 2);
        tail.push(1);
        push_u16(&mut tail, glyph_count);
    }

    let charstrings_offset = base + tail.len();
    let charstrings: Vec<_> = glyphs
        .iter()
        .map(|glyph| charstring(glyph, subroutines))
        .collect();
    let charstrings: Vec<&[u8]> = charstrings.iter().map(Vec::as_slice).collect();
    tail.extend_from_slice(&index(&charstrings));

    let extra = if cid_keyed {
        let mut font_dicts = vec![];
        for _ in 0..2 {
            let (size, offset) = private_dict(subroutines, &mut tail);
            font_dicts.push(Dict::default().entry(ops::PRIVATE, &[size, base + offset]));
        }
        let fd_array_offset = base + tail.len();
        let font_dicts: Vec<&[u8]> = font_dicts.iter().map(|dict| dict.0.as_slice()).collect();
        tail.extend_from_slice(&index(&font_dicts));
        [fd_array_offset, fd_select_offset]
    } else {
        let (size, offset) = private_dict(subroutines, &mut tail);
        [size, base + offset]
    };

    let top_dict = top_dict(charset_offset, charstrings_offset, extra);
    let top_dict = index(&[top_dict.0.as_slice()]);
    assert_eq!(top_dict.len(), top_dict_len);

    let mut buffer = header.to_vec();
    buffer.extend_from_slice(&names);
    buffer.extend_from_slice(&top_dict);
    buffer.extend_from_slice(&strings);
    buffer.extend_from_slice(&global_subrs);
    buffer.extend_from_slice(&tail);
    buffer
}

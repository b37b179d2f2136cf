//! Type 2 charstring flattening: inlining of local and global subroutine calls.

use super::cff::Index;
use crate::{errors::ParseErrorKind, ParseError, TableTag};

const MAX_NESTING: u8 = 10;

mod ops {
    pub(super) const HSTEM: u8 = 1;
    pub(super) const VSTEM: u8 = 3;
    pub(super) const CALLSUBR: u8 = 10;
    pub(super) const RETURN: u8 = 11;
    pub(super) const ESCAPE: u8 = 12;
    pub(super) const ENDCHAR: u8 = 14;
    pub(super) const HSTEMHM: u8 = 18;
    pub(super) const HINTMASK: u8 = 19;
    pub(super) const CNTRMASK: u8 = 20;
    pub(super) const VSTEMHM: u8 = 23;
    pub(super) const SHORTINT: u8 = 28;
    pub(super) const CALLGSUBR: u8 = 29;
    pub(super) const FIXED: u8 = 255;
}

/// Subroutines available to a charstring.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Subroutines<'a, 'r> {
    pub(crate) global: &'r Index<'a>,
    pub(crate) local: Option<&'r Index<'a>>,
}

fn subroutine_bias(count: usize) -> i32 {
    if count < 1_240 {
        107
    } else if count < 33_900 {
        1_131
    } else {
        32_768
    }
}

fn err(kind: ParseErrorKind) -> ParseError {
    ParseError::new(kind, Some(TableTag::CFF))
}

#[derive(Debug)]
struct Flattener<'a, 'r> {
    subrs: Subroutines<'a, 'r>,
    output: Vec<u8>,
    /// Operand bytes not yet flushed to `output`.
    pending: Vec<u8>,
    /// Known operand values with their start positions in `pending`.
    stack: Vec<(i32, usize)>,
    stem_count: usize,
    is_finished: bool,
}

impl Flattener<'_, '_> {
    fn push_operand(&mut self, value: i32, raw: &[u8]) {
        self.stack.push((value, self.pending.len()));
        self.pending.extend_from_slice(raw);
    }

    fn flush_operator(&mut self, operator: &[u8]) {
        self.output.append(&mut self.pending);
        self.output.extend_from_slice(operator);
        self.stack.clear();
    }

    fn count_stems(&mut self) {
        self.stem_count += self.stack.len() / 2;
    }

    fn call(&mut self, is_global: bool, depth: u8) -> Result<(), ParseError> {
        let (index, start) = self
            .stack
            .pop()
            .ok_or_else(|| err(ParseErrorKind::InvalidCharstring("missing subroutine index")))?;
        self.pending.truncate(start);

        let subrs = if is_global {
            Some(self.subrs.global)
        } else {
            self.subrs.local
        };
        let subrs =
            subrs.ok_or_else(|| err(ParseErrorKind::InvalidCharstring("no local subroutines")))?;
        let biased = i64::from(index) + i64::from(subroutine_bias(subrs.len()));
        let subr_idx = usize::try_from(biased)
            .ok()
            .filter(|&idx| idx < subrs.len())
            .ok_or_else(|| err(ParseErrorKind::InvalidCharstring("subroutine index")))?;

        if depth >= MAX_NESTING {
            return Err(err(ParseErrorKind::SubroutineNesting));
        }
        let subr = subrs.get(subr_idx)?.bytes;
        self.process(subr, depth + 1)
    }

    fn process(&mut self, bytes: &[u8], depth: u8) -> Result<(), ParseError> {
        let truncated = || err(ParseErrorKind::InvalidCharstring("unexpected end"));
        let mut pos = 0;
        while pos < bytes.len() && !self.is_finished {
            let b0 = bytes[pos];
            let operand_len = match b0 {
                32..=246 => 1,
                247..=254 => 2,
                ops::SHORTINT => 3,
                ops::FIXED => 5,
                _ => 0,
            };
            if operand_len > 0 {
                let raw = bytes.get(pos..pos + operand_len).ok_or_else(truncated)?;
                let value = match b0 {
                    32..=246 => i32::from(b0) - 139,
                    247..=250 => (i32::from(b0) - 247) * 256 + i32::from(raw[1]) + 108,
                    251..=254 => -(i32::from(b0) - 251) * 256 - i32::from(raw[1]) - 108,
                    ops::SHORTINT => i32::from(i16::from_be_bytes([raw[1], raw[2]])),
                    // 16.16 fixed; only the integer part is tracked
                    _ => i32::from_be_bytes([raw[1], raw[2], raw[3], raw[4]]) >> 16,
                };
                self.push_operand(value, raw);
                pos += operand_len;
                continue;
            }

            match b0 {
                ops::CALLSUBR | ops::CALLGSUBR => {
                    self.call(b0 == ops::CALLGSUBR, depth)?;
                    pos += 1;
                }
                ops::RETURN => return Ok(()),
                ops::ENDCHAR => {
                    self.flush_operator(&[b0]);
                    self.is_finished = true;
                }
                ops::HSTEM | ops::VSTEM | ops::HSTEMHM | ops::VSTEMHM => {
                    self.count_stems();
                    self.flush_operator(&[b0]);
                    pos += 1;
                }
                ops::HINTMASK | ops::CNTRMASK => {
                    // Operands before the first mask are implicit `vstem` hints
                    self.count_stems();
                    self.flush_operator(&[b0]);
                    let mask_len = self.stem_count.div_ceil(8);
                    let mask = bytes.get(pos + 1..pos + 1 + mask_len).ok_or_else(truncated)?;
                    self.output.extend_from_slice(mask);
                    pos += 1 + mask_len;
                }
                ops::ESCAPE => {
                    let operator = bytes.get(pos..pos + 2).ok_or_else(truncated)?;
                    self.flush_operator(operator);
                    pos += 2;
                }
                _ => {
                    self.flush_operator(&[b0]);
                    pos += 1;
                }
            }
        }
        Ok(())
    }
}

/// Inlines all subroutine calls in the charstring. The output contains no `callsubr`,
/// `callgsubr` or `return` operators; hint masks are copied verbatim.
pub(crate) fn flatten(charstring: &[u8], subrs: Subroutines<'_, '_>) -> Result<Vec<u8>, ParseError> {
    let mut flattener = Flattener {
        subrs,
        output: Vec::with_capacity(charstring.len()),
        pending: vec![],
        stack: vec![],
        stem_count: 0,
        is_finished: false,
    };
    flattener.process(charstring, 0)?;
    let Flattener {
        mut output,
        mut pending,
        ..
    } = flattener;
    output.append(&mut pending);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::Cursor;

    fn index_bytes(items: &[&[u8]]) -> Vec<u8> {
        if items.is_empty() {
            return Index::EMPTY.to_vec();
        }
        let mut bytes = u16::try_from(items.len()).unwrap().to_be_bytes().to_vec();
        bytes.push(2);
        let mut offset = 1_u16;
        bytes.extend_from_slice(&offset.to_be_bytes());
        for item in items {
            offset += u16::try_from(item.len()).unwrap();
            bytes.extend_from_slice(&offset.to_be_bytes());
        }
        for item in items {
            bytes.extend_from_slice(item);
        }
        bytes
    }

    fn parse_index(bytes: &[u8]) -> Index<'_> {
        Index::parse(&mut Cursor::new(bytes, None)).unwrap()
    }

    /// Encodes a small integer operand.
    fn int(value: i32) -> u8 {
        u8::try_from(value + 139).unwrap()
    }

    #[test]
    fn subroutine_bias_thresholds() {
        assert_eq!(subroutine_bias(0), 107);
        assert_eq!(subroutine_bias(1_239), 107);
        assert_eq!(subroutine_bias(1_240), 1_131);
        assert_eq!(subroutine_bias(33_899), 1_131);
        assert_eq!(subroutine_bias(33_900), 32_768);
    }

    #[test]
    fn inlining_local_and_global_subroutines() {
        // Local subr 0: `10 20 rlineto return`; global subr 0: `30 hlineto return`
        let local = index_bytes(&[&[int(10), int(20), 5, ops::RETURN]]);
        let global = index_bytes(&[&[int(30), 6, ops::RETURN]]);
        let (local, global) = (parse_index(&local), parse_index(&global));
        let subrs = Subroutines {
            global: &global,
            local: Some(&local),
        };

        let charstring = [
            int(0), int(0), 21, // rmoveto
            int(-107), ops::CALLSUBR,
            int(-107), ops::CALLGSUBR,
            ops::ENDCHAR,
        ];
        let flattened = flatten(&charstring, subrs).unwrap();
        assert_eq!(
            flattened,
            [int(0), int(0), 21, int(10), int(20), 5, int(30), 6, ops::ENDCHAR]
        );

        // Flattening is idempotent and needs no subroutines afterwards.
        let empty = parse_index(&Index::EMPTY);
        let no_subrs = Subroutines {
            global: &empty,
            local: None,
        };
        assert_eq!(flatten(&flattened, no_subrs).unwrap(), flattened);
    }

    #[test]
    fn operands_are_shared_with_subroutines() {
        // Subr computes nothing but consumes the caller's operands
        let local = index_bytes(&[&[5, ops::RETURN]]);
        let local = parse_index(&local);
        let empty = parse_index(&Index::EMPTY);
        let subrs = Subroutines {
            global: &empty,
            local: Some(&local),
        };
        let charstring = [int(1), int(2), int(-107), ops::CALLSUBR, ops::ENDCHAR];
        let flattened = flatten(&charstring, subrs).unwrap();
        assert_eq!(flattened, [int(1), int(2), 5, ops::ENDCHAR]);
    }

    #[test]
    fn hint_masks_are_copied() {
        let empty = parse_index(&Index::EMPTY);
        let subrs = Subroutines {
            global: &empty,
            local: None,
        };
        // 5 hstem pairs + 5 implicit vstem pairs = 10 stems, i.e. 2 mask bytes
        let mut charstring = vec![];
        charstring.extend((0..10).map(int));
        charstring.push(ops::HSTEMHM);
        charstring.extend((0..10).map(int));
        charstring.extend([ops::HINTMASK, 0xff, 0xc0]);
        charstring.extend([int(0), int(0), 21, ops::ENDCHAR]);

        let flattened = flatten(&charstring, subrs).unwrap();
        assert_eq!(flattened, charstring);

        let truncated = &charstring[..charstring.len() - 5];
        let err = flatten(truncated, subrs).unwrap_err();
        assert!(matches!(err.kind(), ParseErrorKind::InvalidCharstring(_)), "{err:?}");
    }

    #[test]
    fn endchar_in_subroutine_stops_processing() {
        let local = index_bytes(&[&[ops::ENDCHAR]]);
        let local = parse_index(&local);
        let empty = parse_index(&Index::EMPTY);
        let subrs = Subroutines {
            global: &empty,
            local: Some(&local),
        };
        let charstring = [int(-107), ops::CALLSUBR, int(1), 6];
        let flattened = flatten(&charstring, subrs).unwrap();
        assert_eq!(flattened, [ops::ENDCHAR]);
    }

    #[test]
    fn invalid_calls_are_errors() {
        let local = index_bytes(&[&[int(-107), ops::CALLSUBR, ops::RETURN]]);
        let local = parse_index(&local);
        let empty = parse_index(&Index::EMPTY);
        let subrs = Subroutines {
            global: &empty,
            local: Some(&local),
        };

        let err = flatten(&[int(-107), ops::CALLSUBR], subrs).unwrap_err();
        assert!(matches!(err.kind(), ParseErrorKind::SubroutineNesting), "{err:?}");

        let err = flatten(&[int(5), ops::CALLSUBR], subrs).unwrap_err();
        assert!(matches!(err.kind(), ParseErrorKind::InvalidCharstring(_)), "{err:?}");

        let err = flatten(&[ops::CALLGSUBR], subrs).unwrap_err();
        assert!(matches!(err.kind(), ParseErrorKind::InvalidCharstring(_)), "{err:?}");
    }
}

use core::{fmt, ops};
use std::{error, io, path::PathBuf};

use crate::TableTag;

/// Kind of a font [`ParseError`].
#[derive(Debug)]
#[non_exhaustive]
pub enum ParseErrorKind {
    /// Unexpected end of the font data.
    UnexpectedEof,
    /// Unexpected font version (aka container signature).
    UnexpectedFontVersion(u32),
    /// Missing required font table (e.g., `head`).
    MissingTable,
    /// No supported subtable in the `cmap` table.
    NoSupportedCmap,
    /// Outlines are stored in an unsupported format (e.g., `CFF2` only).
    UnsupportedOutlines,
    /// Offset inferred from the table data is out of bounds.
    OffsetOutOfBounds(usize),
    /// Range inferred from the table data is out of bounds.
    RangeOutOfBounds {
        /// Inferred range.
        range: ops::Range<usize>,
        /// Length of the indexed data.
        len: usize,
    },
    /// Unexpected table version.
    UnexpectedTableVersion(u32),
    /// Unexpected table length.
    UnexpectedTableLen {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },
    /// Unexpected table format (e.g., for a `cmap` subtable).
    UnexpectedTableFormat(u16),
    /// Glyph ID is out of range for the font.
    GlyphOutOfRange {
        /// Referenced glyph ID.
        glyph_id: u16,
        /// Number of glyphs in the font.
        glyph_count: u16,
    },
    /// Invalid value in the table data.
    InvalidValue(&'static str),
    /// CFF charstring cannot be flattened (e.g., a subroutine call with a computed index).
    InvalidCharstring(&'static str),
    /// Subroutine calls in a CFF charstring are nested too deeply.
    SubroutineNesting,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => formatter.write_str("unexpected end of the font data"),
            Self::UnexpectedFontVersion(val) => {
                write!(formatter, "unexpected font version ({val:#010x})")
            }
            Self::MissingTable => formatter.write_str("missing required font table"),
            Self::NoSupportedCmap => {
                formatter.write_str("no supported subtable in the `cmap` table")
            }
            Self::UnsupportedOutlines => {
                formatter.write_str("font has neither `glyf` nor `CFF ` outlines")
            }
            Self::OffsetOutOfBounds(val) => {
                write!(
                    formatter,
                    "offset ({val}) inferred from the table data is out of bounds"
                )
            }
            Self::RangeOutOfBounds { range, len } => {
                write!(
                    formatter,
                    "range ({range:?}) inferred from the table data is out of bounds (..{len})"
                )
            }
            Self::UnexpectedTableVersion(val) => {
                write!(formatter, "unexpected table version ({val})")
            }
            Self::UnexpectedTableLen { expected, actual } => {
                write!(
                    formatter,
                    "unexpected table length: expected {expected}, got {actual}"
                )
            }
            Self::UnexpectedTableFormat(val) => {
                write!(formatter, "unexpected table format ({val})")
            }
            Self::GlyphOutOfRange {
                glyph_id,
                glyph_count,
            } => {
                write!(
                    formatter,
                    "glyph ID {glyph_id} is out of range (font has {glyph_count} glyphs)"
                )
            }
            Self::InvalidValue(what) => write!(formatter, "invalid {what}"),
            Self::InvalidCharstring(what) => write!(formatter, "invalid charstring: {what}"),
            Self::SubroutineNesting => formatter.write_str("subroutine calls nested too deeply"),
        }
    }
}

impl error::Error for ParseErrorKind {}

impl ParseErrorKind {
    /// Checks whether this error means that the font is well-formed, but uses features
    /// the engine does not handle (as opposed to the font being corrupt).
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Self::MissingTable
                | Self::NoSupportedCmap
                | Self::UnsupportedOutlines
                | Self::UnexpectedTableVersion(_)
        )
    }
}

/// Errors that can occur when parsing an OpenType [`Font`](crate::Font).
#[derive(Debug)]
pub struct ParseError {
    pub(crate) kind: ParseErrorKind,
    pub(crate) offset: usize,
    pub(crate) table: Option<TableTag>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(table) = self.table {
            write!(formatter, "[{table}] ")?;
        }
        if self.offset > 0 {
            write!(formatter, "{}: ", self.offset)?;
        }
        fmt::Display::fmt(&self.kind, formatter)
    }
}

impl error::Error for ParseError {}

impl ParseError {
    pub(crate) fn new(kind: ParseErrorKind, table: Option<TableTag>) -> Self {
        Self {
            kind,
            offset: 0,
            table,
        }
    }

    pub(crate) fn missing_table(tag: TableTag) -> Self {
        Self::new(ParseErrorKind::MissingTable, Some(tag))
    }

    /// Gets the error kind.
    pub fn kind(&self) -> &ParseErrorKind {
        &self.kind
    }

    /// Gets the table this error relates to.
    pub fn table(&self) -> Option<TableTag> {
        self.table
    }

    /// Gets the offset in the table data (or in the font data if the table is not set).
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Kind of a [`RebuildError`].
#[derive(Debug)]
#[non_exhaustive]
pub enum RebuildErrorKind {
    /// Glyph 0 (`.notdef`) is not retained.
    MissingNotdef,
    /// Glyph count in the rebuilt font differs from the number of retained glyphs.
    GlyphCount {
        /// Number of retained glyphs.
        expected: usize,
        /// Number of glyphs in the rebuilt table.
        actual: usize,
    },
    /// Glyph ID referenced by a rebuilt table is not a retained glyph.
    DanglingGlyph(u16),
    /// Glyph locations are not ordered or do not end at the outline data length.
    InvalidLocations,
    /// Value does not fit into the field that should hold it.
    Overflow(&'static str),
    /// Brotli compression of WOFF2 table data failed.
    Compression,
}

impl fmt::Display for RebuildErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingNotdef => formatter.write_str("glyph 0 is not retained"),
            Self::GlyphCount { expected, actual } => {
                write!(
                    formatter,
                    "unexpected glyph count: expected {expected}, got {actual}"
                )
            }
            Self::DanglingGlyph(id) => {
                write!(formatter, "glyph ID {id} does not refer to a retained glyph")
            }
            Self::InvalidLocations => formatter.write_str("glyph locations are inconsistent"),
            Self::Overflow(what) => write!(formatter, "{what} overflow"),
            Self::Compression => formatter.write_str("failed compressing table data"),
        }
    }
}

/// Violated cross-table invariant detected after rebuilding a font subset.
///
/// This error signals a bug in the subsetting logic rather than in the input font.
#[derive(Debug)]
pub struct RebuildError {
    pub(crate) kind: RebuildErrorKind,
    pub(crate) table: TableTag,
}

impl fmt::Display for RebuildError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "[{}] {}", self.table, self.kind)
    }
}

impl error::Error for RebuildError {}

impl RebuildError {
    pub(crate) fn new(table: TableTag, kind: RebuildErrorKind) -> Self {
        Self { kind, table }
    }

    /// Gets the error kind.
    pub fn kind(&self) -> &RebuildErrorKind {
        &self.kind
    }

    /// Gets the rebuilt table this error relates to.
    pub fn table(&self) -> TableTag {
        self.table
    }
}

/// Top-level error of the subsetting pipeline.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The font container fails structural validation.
    Corrupt(ParseError),
    /// A required table is absent, or the outline format is not recognized.
    Unsupported(ParseError),
    /// An internal invariant was violated after rebuilding tables.
    Inconsistent(RebuildError),
    /// I/O failure while persisting the output.
    Write {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupt(err) => write!(formatter, "corrupt font: {err}"),
            Self::Unsupported(err) => write!(formatter, "unsupported font: {err}"),
            Self::Inconsistent(err) => write!(formatter, "inconsistent subset: {err}"),
            Self::Write { path, source } => {
                write!(formatter, "failed writing `{}`: {source}", path.display())
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Corrupt(err) | Self::Unsupported(err) => Some(err),
            Self::Inconsistent(err) => Some(err),
            Self::Write { source, .. } => Some(source),
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        if err.kind.is_unsupported() {
            Self::Unsupported(err)
        } else {
            Self::Corrupt(err)
        }
    }
}

impl From<RebuildError> for Error {
    fn from(err: RebuildError) -> Self {
        Self::Inconsistent(err)
    }
}

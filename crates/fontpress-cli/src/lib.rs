//! Shrinks a font to the chars displayed by a web project.
//!
//! The project directory is scanned for HTML and JS / TS sources; chars found in them
//! (plus a configurable set of always retained chars) are passed to the [`fontpress`] engine,
//! and the resulting font subset is written atomically.

use std::{collections::BTreeSet, fs, io, path::PathBuf};

use clap::Parser;
use fontpress::{Font, FontSubset, OutputFormat, SubsetOptions};

pub use crate::{
    collect::{collect, Collection, ExtractionRule, FileKind},
    errors::RunError,
};

mod collect;
mod errors;

/// Chars retained regardless of the collected ones: ASCII letters, digits and punctuation.
pub const DEFAULT_KEEP_CHARS: &str = concat!(
    "ABCDEFGHIJKLMNOPQRSTUVWXYZ",
    "abcdefghijklmnopqrstuvwxyz",
    "0123456789",
    "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~",
);

/// Whitespace chars always added to the requested set so that page layout is not broken.
const WHITESPACE_CHARS: [char; 4] = [' ', '\n', '\t', '\r'];

/// Scans a web project for displayed chars and keeps only the corresponding glyphs in a font.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory with HTML / JS / TS files to scan.
    #[arg(short, long)]
    pub directory: PathBuf,
    /// Source font file (TrueType or CFF-flavored OpenType).
    #[arg(short, long)]
    pub font: PathBuf,
    /// Output font file. WOFF2 is produced if the path has the `.woff2` extension.
    #[arg(short, long, default_value = "Output.ttf")]
    pub output: PathBuf,
    /// Chars to retain in addition to collected ones. Defaults to ASCII letters, digits
    /// and punctuation.
    #[arg(short, long, default_value = DEFAULT_KEEP_CHARS, hide_default_value = true)]
    pub keep: String,
    /// Retain TrueType hinting.
    #[arg(long)]
    pub hinting: bool,
    /// Retain legacy (Macintosh) `cmap` subtables.
    #[arg(long)]
    pub legacy_cmap: bool,
    /// Retain the symbol `cmap` subtable.
    #[arg(long)]
    pub symbol_cmap: bool,
    /// Do not inline CFF subroutines.
    #[arg(long)]
    pub no_desubroutinize: bool,
    /// Retain glyph names.
    #[arg(long)]
    pub glyph_names: bool,
    /// Produce WOFF2 regardless of the output extension.
    #[arg(long)]
    pub woff2: bool,
}

impl Args {
    /// Returns subsetting options corresponding to these args.
    pub fn subset_options(&self) -> SubsetOptions {
        SubsetOptions::default()
            .with_hinting(self.hinting)
            .with_legacy_cmap(self.legacy_cmap)
            .with_symbol_cmap(self.symbol_cmap)
            .with_desubroutinize(!self.no_desubroutinize)
            .with_glyph_names(self.glyph_names)
    }

    /// Returns the output format.
    pub fn output_format(&self) -> OutputFormat {
        let has_woff2_extension = self
            .output
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("woff2"));
        if self.woff2 || has_woff2_extension {
            OutputFormat::Woff2
        } else {
            OutputFormat::OpenType
        }
    }
}

/// Summary of a successful [`run()`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct RunSummary {
    /// Number of scanned files.
    pub files_scanned: usize,
    /// Number of recognized files that were skipped because of read / decode errors.
    pub files_skipped: usize,
    /// Number of distinct requested chars (collected + retained).
    pub distinct_chars: usize,
    /// Number of glyphs in the output font.
    pub retained_glyphs: usize,
    /// Source font size in bytes.
    pub original_size: usize,
    /// Output font size in bytes.
    pub new_size: usize,
}

impl RunSummary {
    /// Returns the size reduction in percent. Negative if the output is larger than the source.
    #[allow(clippy::cast_precision_loss)] // sizes are way below 2^52
    pub fn reduction_percent(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        (1.0 - self.new_size as f64 / self.original_size as f64) * 100.0
    }
}

/// Runs the entire pipeline: validate inputs, collect chars, parse the font, subset it,
/// serialize and persist the output.
///
/// # Errors
///
/// Returns an error if inputs are missing or unreadable, or the font cannot be processed.
/// On error, the output file is neither created nor overwritten.
pub fn run(args: &Args) -> Result<RunSummary, RunError> {
    let dir_metadata = fs::metadata(&args.directory).map_err(RunError::input(&args.directory))?;
    if !dir_metadata.is_dir() {
        let err = io::Error::other("not a directory");
        return Err(RunError::input(&args.directory)(err));
    }
    let font_bytes = fs::read(&args.font).map_err(RunError::input(&args.font))?;

    log::info!("collecting chars used in `{}`", args.directory.display());
    let collection = collect(&args.directory)?;
    let mut chars: BTreeSet<char> = collection.chars;
    chars.extend(args.keep.chars());
    chars.extend(WHITESPACE_CHARS);
    log::info!("requesting {} distinct char(s)", chars.len());

    log::info!("creating font subset");
    let font = Font::new(&font_bytes).map_err(fontpress::Error::from)?;
    let subset = FontSubset::new(font, &chars, args.subset_options())?;
    let output = subset.to_format(args.output_format())?;
    fontpress::persist(&args.output, &output)?;

    Ok(RunSummary {
        files_scanned: collection.files_scanned,
        files_skipped: collection.files_skipped,
        distinct_chars: chars.len(),
        retained_glyphs: subset.glyph_count(),
        original_size: font_bytes.len(),
        new_size: output.len(),
    })
}

//! TrueType / CFF font subsetting.
//!
//! The engine is a straight pipeline: a [`Font`] is parsed from raw bytes, the [`GlyphClosure`]
//! of the requested chars is resolved, and a [`FontSubset`] rebuilds every retained table
//! for the compacted glyph numbering. The subset can be serialized as OpenType or WOFF2,
//! and persisted atomically with [`persist()`].
//!
//! The crate never installs a logger; diagnostics are emitted via the [`log`] facade.
//!
//! # Examples
//!
//! ```no_run
//! use std::{collections::BTreeSet, fs};
//! use fontpress::{Font, FontSubset, OutputFormat, SubsetOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let font_bytes = fs::read("Roboto.ttf")?;
//! let font = Font::new(&font_bytes)?;
//! let chars: BTreeSet<char> = "Hello, world!".chars().collect();
//! let subset = FontSubset::new(font, &chars, SubsetOptions::default())?;
//! let output = subset.to_format(OutputFormat::Woff2)?;
//! fontpress::persist("Roboto-subset.woff2", &output)?;
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/fontpress/0.1.0")]

mod closure;
mod errors;
mod font;
mod subset;
#[cfg(test)]
pub(crate) mod tests;
mod write;

pub use crate::{
    closure::GlyphClosure,
    errors::{Error, ParseError, ParseErrorKind, RebuildError, RebuildErrorKind},
    font::{Font, OutlineKind, TableTag},
    subset::{FontSubset, OutputFormat, SubsetOptions},
    write::persist,
};

#[cfg(doctest)]
doc_comment::doctest!("../README.md");

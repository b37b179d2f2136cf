//! Synthetic OpenType fonts for `fontpress` tests.
//!
//! Fonts are assembled from scratch by [`FontBuilder`], so tests do not depend on binary fixtures.
//! Glyph outlines are trivial (squares), but the table structure is realistic: composite glyphs,
//! hinting, glyph names, several `cmap` subtables and both TrueType and CFF outlines are supported.

use std::collections::BTreeMap;

mod cff;
mod tables;

/// Shape of a [`TestGlyph`].
#[derive(Debug, Clone)]
enum Shape {
    Empty,
    Square(i16),
    Composite(Vec<u16>),
}

/// Glyph in a font produced by [`FontBuilder`].
#[derive(Debug, Clone)]
pub struct TestGlyph {
    shape: Shape,
    advance: u16,
    chars: Vec<char>,
    instructions: Vec<u8>,
    name: Option<String>,
}

impl TestGlyph {
    fn new(shape: Shape) -> Self {
        Self {
            shape,
            advance: 500,
            chars: vec![],
            instructions: vec![],
            name: None,
        }
    }

    /// Creates a glyph without outline (e.g., a space).
    pub fn empty() -> Self {
        Self::new(Shape::Empty)
    }

    /// Creates a glyph with a square outline of the specified size.
    pub fn square(size: i16) -> Self {
        Self::new(Shape::Square(size))
    }

    /// Creates a composite glyph referencing the specified glyphs. For CFF outlines,
    /// the glyph is rendered as a square.
    pub fn composite(components: &[u16]) -> Self {
        Self::new(Shape::Composite(components.to_vec()))
    }

    /// Sets the advance width of the glyph.
    #[must_use]
    pub fn advance(mut self, advance: u16) -> Self {
        self.advance = advance;
        self
    }

    /// Maps the specified char to this glyph.
    #[must_use]
    pub fn map_to(mut self, ch: char) -> Self {
        self.chars.push(ch);
        self
    }

    /// Sets TrueType instructions for this glyph. Instructions are only written if the font
    /// is built [with hinting](FontBuilder::with_hinting()).
    #[must_use]
    pub fn with_instructions(mut self, instructions: &[u8]) -> Self {
        self.instructions = instructions.to_vec();
        self
    }

    /// Sets the glyph name.
    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    fn name(&self, glyph_id: usize) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if glyph_id == 0 {
            return ".notdef".to_owned();
        }
        match self.chars.first() {
            Some(&ch) if u32::from(ch) <= 0xffff => format!("uni{:04X}", u32::from(ch)),
            Some(&ch) => format!("u{:05X}", u32::from(ch)),
            None => format!("glyph{glyph_id}"),
        }
    }

    fn square_size(&self) -> i16 {
        match self.shape {
            Shape::Square(size) => size,
            Shape::Empty | Shape::Composite(_) => 500,
        }
    }
}

/// Outline format of the built font.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutlineFormat {
    TrueType,
    Cff,
    CidKeyedCff,
}

/// Builder of synthetic OpenType fonts.
#[derive(Debug, Clone)]
pub struct FontBuilder {
    glyphs: Vec<TestGlyph>,
    outlines: OutlineFormat,
    subroutines: bool,
    hinting: bool,
    glyph_names: bool,
    legacy_cmap: bool,
    symbol_cmap: bool,
    extra_tables: BTreeMap<[u8; 4], Vec<u8>>,
    removed_tables: Vec<[u8; 4]>,
}

impl Default for FontBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FontBuilder {
    /// Instructions added to glyphs by [`Self::with_hinting()`]: `PUSHB[0] 1; POP`.
    const GLYPH_INSTRUCTIONS: [u8; 3] = [0xb0, 0x01, 0x21];
    /// Combining marks used by [`Self::latin()`] composites.
    pub const COMBINING_MARKS: [char; 3] = ['\u{301}', '\u{308}', '\u{304}'];

    /// Creates a builder with a single `.notdef` glyph.
    pub fn new() -> Self {
        Self {
            glyphs: vec![TestGlyph::square(400)],
            outlines: OutlineFormat::TrueType,
            subroutines: false,
            hinting: false,
            glyph_names: false,
            legacy_cmap: false,
            symbol_cmap: false,
            extra_tables: BTreeMap::new(),
            removed_tables: vec![],
        }
    }

    /// Creates a Latin font: space, printable ASCII chars, combining acute, diaeresis and macron,
    /// composite glyphs for 'é', 'ü' and 'ǖ' (the latter nesting 'ü'), and an emoji outside BMP.
    pub fn latin() -> Self {
        let mut this = Self::new().glyph(TestGlyph::empty().advance(250).map_to(' '));
        for ch in '!'..='~' {
            let size = 300 + 4 * i16::try_from(u32::from(ch) - 0x20).unwrap_or(0);
            this = this.glyph(TestGlyph::square(size).map_to(ch));
        }
        for mark in Self::COMBINING_MARKS {
            this = this.glyph(TestGlyph::square(100).advance(0).map_to(mark));
        }

        let [acute, diaeresis, macron] = Self::COMBINING_MARKS.map(|mark| this.glyph_id(mark));
        let e_acute = TestGlyph::composite(&[this.glyph_id('e'), acute]).map_to('é');
        this = this.glyph(e_acute);
        let u_diaeresis = TestGlyph::composite(&[this.glyph_id('u'), diaeresis]).map_to('ü');
        this = this.glyph(u_diaeresis);
        let u_diaeresis_macron = TestGlyph::composite(&[this.glyph_id('ü'), macron]).map_to('ǖ');
        this.glyph(u_diaeresis_macron)
            .glyph(TestGlyph::square(800).advance(1_000).map_to('\u{1f600}'))
    }

    /// Adds CJK ideographs: U+4E00..=U+4E63 (including '世'), '界', '你' and '好'.
    #[must_use]
    pub fn with_cjk_glyphs(mut self) -> Self {
        let chars = ('\u{4e00}'..='\u{4e63}').chain(['界', '你', '好']);
        for ch in chars {
            self = self.glyph(TestGlyph::square(900).advance(1_000).map_to(ch));
        }
        self
    }

    /// Adds `count` ideographs starting from U+4E00, mapped to consecutive glyph IDs.
    ///
    /// # Panics
    ///
    /// Panics if the range leaves the BMP.
    #[must_use]
    pub fn with_ideographs(mut self, count: u32) -> Self {
        for code in 0x4e00..0x4e00 + count {
            let ch = char::from_u32(code).filter(|_| code < 0xffff).expect("non-BMP ideograph");
            self = self.glyph(TestGlyph::square(900).advance(1_000).map_to(ch));
        }
        self
    }

    /// Adds a glyph to the font.
    #[must_use]
    pub fn glyph(mut self, glyph: TestGlyph) -> Self {
        self.glyphs.push(glyph);
        self
    }

    /// Returns the number of glyphs in the font.
    pub fn glyph_count(&self) -> usize {
        self.glyphs.len()
    }

    /// Returns the ID of the glyph mapped to the specified char.
    ///
    /// # Panics
    ///
    /// Panics if the char is not mapped.
    pub fn glyph_id(&self, ch: char) -> u16 {
        let idx = self
            .glyphs
            .iter()
            .position(|glyph| glyph.chars.contains(&ch))
            .unwrap_or_else(|| panic!("char {ch:?} is not mapped"));
        u16::try_from(idx).expect("glyph ID overflow")
    }

    /// Uses name-keyed CFF outlines instead of TrueType ones.
    #[must_use]
    pub fn with_cff_outlines(mut self) -> Self {
        self.outlines = OutlineFormat::Cff;
        self
    }

    /// Uses CID-keyed CFF outlines with two Font DICTs.
    #[must_use]
    pub fn with_cid_keyed_cff(mut self) -> Self {
        self.outlines = OutlineFormat::CidKeyedCff;
        self
    }

    /// Moves parts of CFF charstrings into global and local subroutines.
    #[must_use]
    pub fn with_subroutines(mut self) -> Self {
        self.subroutines = true;
        self
    }

    /// Adds hinting: glyph instructions and `cvt `, `fpgm` and `prep` tables.
    /// Only affects TrueType outlines.
    #[must_use]
    pub fn with_hinting(mut self) -> Self {
        self.hinting = true;
        for glyph in &mut self.glyphs {
            if glyph.instructions.is_empty() && !matches!(glyph.shape, Shape::Empty) {
                glyph.instructions = Self::GLYPH_INSTRUCTIONS.to_vec();
            }
        }
        self
    }

    /// Writes glyph names to the `post` table (version 2).
    #[must_use]
    pub fn with_glyph_names(mut self) -> Self {
        self.glyph_names = true;
        self
    }

    /// Adds a Macintosh Roman `cmap` subtable (format 6) covering ASCII.
    #[must_use]
    pub fn with_legacy_cmap(mut self) -> Self {
        self.legacy_cmap = true;
        self
    }

    /// Adds a symbol `cmap` subtable mapping U+F020..=U+F07E to ASCII glyphs.
    #[must_use]
    pub fn with_symbol_cmap(mut self) -> Self {
        self.symbol_cmap = true;
        self
    }

    /// Adds an arbitrary table (or replaces a generated one).
    #[must_use]
    pub fn with_table(mut self, tag: [u8; 4], data: &[u8]) -> Self {
        self.extra_tables.insert(tag, data.to_vec());
        self
    }

    /// Removes a generated table.
    #[must_use]
    pub fn without_table(mut self, tag: [u8; 4]) -> Self {
        self.removed_tables.push(tag);
        self
    }

    fn is_cff(&self) -> bool {
        matches!(
            self.outlines,
            OutlineFormat::Cff | OutlineFormat::CidKeyedCff
        )
    }

    /// Builds the font.
    ///
    /// # Panics
    ///
    /// Panics if the font is inconsistent, e.g. a composite glyph references a missing glyph.
    pub fn build(&self) -> Vec<u8> {
        let mut tables = BTreeMap::new();
        let glyph_count = u16::try_from(self.glyphs.len()).expect("too many glyphs");
        let stats = tables::GlyphStats::new(&self.glyphs, self.hinting && !self.is_cff());

        tables.insert(*b"cmap", tables::cmap(self));
        tables.insert(*b"hhea", tables::hhea(&self.glyphs, &stats));
        tables.insert(*b"hmtx", tables::hmtx(&self.glyphs));
        tables.insert(*b"OS/2", tables::os2(&self.glyphs));
        tables.insert(*b"name", tables::name());
        tables.insert(*b"post", tables::post(&self.glyphs, self.glyph_names));
        tables.insert(*b"gasp", tables::gasp());

        let sfnt_version = if self.is_cff() {
            let cid_keyed = self.outlines == OutlineFormat::CidKeyedCff;
            let cff = cff::cff_table(&self.glyphs, cid_keyed, self.subroutines);
            tables.insert(*b"CFF ", cff);
            tables.insert(*b"maxp", tables::maxp_v05(glyph_count));
            tables.insert(*b"head", tables::head(&stats, None));
            u32::from_be_bytes(*b"OTTO")
        } else {
            let (glyf, loca, loca_format) = tables::glyf_and_loca(&self.glyphs, self.hinting);
            tables.insert(*b"glyf", glyf);
            tables.insert(*b"loca", loca);
            tables.insert(*b"maxp", tables::maxp_v1(glyph_count, &stats, self.hinting));
            tables.insert(*b"head", tables::head(&stats, Some(loca_format)));
            if self.hinting {
                tables.insert(*b"cvt ", vec![0, 50, 0, 100]);
                // PUSHB[0] 0; FDEF; ENDF
                tables.insert(*b"fpgm", vec![0xb0, 0x00, 0x2c, 0x2d]);
                // PUSHB[0] 1; POP
                tables.insert(*b"prep", vec![0xb0, 0x01, 0x21]);
            }
            0x_0001_0000
        };

        for (tag, data) in &self.extra_tables {
            tables.insert(*tag, data.clone());
        }
        for tag in &self.removed_tables {
            tables.remove(tag);
        }
        tables::assemble(sfnt_version, &tables)
    }
}

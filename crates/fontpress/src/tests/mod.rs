use std::{collections::BTreeSet, env, io::Write, process::Command, sync::OnceLock};

use allsorts::{binary::read::ReadScope, font::MatchingPresentation, font_data::FontData};
use fontpress_test_fonts::{FontBuilder, TestGlyph};
use test_casing::{test_casing, Product};

use crate::{
    font::{Glyph, Outline},
    Error, Font, FontSubset, OutputFormat, SubsetOptions, TableTag,
};

#[derive(Debug, Clone, Copy)]
pub(crate) enum TestFont {
    Latin,
    LatinCff,
    CidCff,
    Cjk,
}

impl TestFont {
    pub(crate) fn builder(self) -> FontBuilder {
        match self {
            Self::Latin => FontBuilder::latin(),
            Self::LatinCff => FontBuilder::latin().with_cff_outlines().with_subroutines(),
            Self::CidCff => FontBuilder::latin().with_cid_keyed_cff().with_subroutines(),
            Self::Cjk => FontBuilder::latin().with_cjk_glyphs(),
        }
    }

    pub(crate) fn bytes(self) -> Vec<u8> {
        self.builder().build()
    }
}

pub(crate) const FONTS: [TestFont; 4] = [
    TestFont::Latin,
    TestFont::LatinCff,
    TestFont::CidCff,
    TestFont::Cjk,
];

#[derive(Debug, Clone, Copy)]
pub(crate) enum TestCharSubset {
    Ascii,
    Mixed,
}

impl TestCharSubset {
    pub(crate) fn into_set(self) -> BTreeSet<char> {
        match self {
            Self::Ascii => (' '..='~').collect(),
            Self::Mixed => "Héllo ü ǖ 世界 😀".chars().collect(),
        }
    }
}

pub(crate) const SUBSET_CHARS: [TestCharSubset; 2] = [TestCharSubset::Ascii, TestCharSubset::Mixed];

#[derive(Debug)]
struct OpenTypeSanitizer {
    path: Option<String>,
}

impl Default for OpenTypeSanitizer {
    fn default() -> Self {
        let Ok(path) = env::var("OTS_SANITIZER") else {
            return Self { path: None };
        };
        let output = Command::new(&path)
            .arg("--version")
            .output()
            .unwrap_or_else(|err| {
                panic!("failed getting version for ots-sanitize at {path}: {err}");
            });
        assert!(
            output.status.success(),
            "failed getting version for ots-sanitize at {path}: non-zero exit code"
        );
        let version = String::from_utf8(output.stdout).unwrap_or_else(|err| {
            panic!("failed getting version for ots-sanitize at {path}: {err}");
        });
        println!("ots-sanitize version: {version}");
        Self { path: Some(path) }
    }
}

impl OpenTypeSanitizer {
    fn get() -> &'static Self {
        static SANITIZER: OnceLock<OpenTypeSanitizer> = OnceLock::new();
        SANITIZER.get_or_init(Self::default)
    }

    fn validate(&self, content: &[u8]) {
        let Some(path) = &self.path else {
            println!("OTS_SANITIZER env var is missing; skipping checks");
            return;
        };

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.as_file_mut().write_all(content).unwrap();
        file.as_file_mut().flush().unwrap();
        let file_path = file.into_temp_path();

        let output = Command::new(path)
            .arg(&file_path)
            .output()
            .expect("failed running ots-sanitize");
        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            panic!("ots-sanitize failed:\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}");
        }
    }
}

/// Checks that `raw` is readable by `allsorts` and maps `expected_chars`.
fn assert_valid_font(raw: &[u8], is_opentype: bool, expected_chars: &BTreeSet<char>) {
    if is_opentype {
        let font = Font::new(raw).unwrap();
        for &ch in expected_chars {
            assert_ne!(font.map_char(ch).unwrap(), 0, "{ch:?}");
        }
    }

    let font_file = ReadScope::new(raw).read::<FontData>().unwrap();
    let font_provider = font_file.table_provider(0).unwrap();
    let mut font = allsorts::Font::new(font_provider).unwrap();
    for &ch in expected_chars {
        let (glyph_id, _) = font.lookup_glyph_index(ch, MatchingPresentation::NotRequired, None);
        assert_ne!(glyph_id, 0, "{ch:?}");
    }

    OpenTypeSanitizer::get().validate(raw);
}

fn mapped_chars(font: &Font<'_>, chars: &BTreeSet<char>) -> BTreeSet<char> {
    chars
        .iter()
        .copied()
        .filter(|&ch| font.map_char(ch).unwrap() != 0)
        .collect()
}

/// Returns `(platform, encoding)` pairs of `cmap` encoding records.
fn cmap_encodings(font: &Font<'_>) -> Vec<(u16, u16)> {
    let cmap = font.table(TableTag::CMAP).unwrap();
    let read_u16 = |pos: usize| u16::from_be_bytes([cmap[pos], cmap[pos + 1]]);
    let record_count = usize::from(read_u16(2));
    (0..record_count)
        .map(|i| (read_u16(4 + 8 * i), read_u16(6 + 8 * i)))
        .collect()
}

#[test]
fn reading_font() {
    let font_bytes = TestFont::Latin.bytes();
    let font = Font::new(&font_bytes).unwrap();

    let font_file = ReadScope::new(&font_bytes).read::<FontData>().unwrap();
    let font_provider = font_file.table_provider(0).unwrap();
    let mut reference_font = allsorts::Font::new(font_provider).unwrap();

    for ch in "Hello, world! éüǖ 😀 世".chars() {
        let id = font.map_char(ch).unwrap();
        let (expected_idx, _) =
            reference_font.lookup_glyph_index(ch, MatchingPresentation::NotRequired, None);
        assert_eq!(id, expected_idx, "{ch:?}");
    }
}

#[test_casing(8, Product((FONTS, SUBSET_CHARS)))]
fn subsetting_font(font: TestFont, chars: TestCharSubset) {
    let font_bytes = font.bytes();
    let font = Font::new(&font_bytes).unwrap();
    let chars = chars.into_set();
    let expected_chars = mapped_chars(&font, &chars);
    let subset = FontSubset::new(font, &chars, SubsetOptions::default()).unwrap();

    let opentype = subset.to_opentype().unwrap();
    assert_valid_font(&opentype, true, &expected_chars);
    assert!(
        opentype.len() <= font_bytes.len(),
        "{} > {}",
        opentype.len(),
        font_bytes.len()
    );
    let woff2 = subset.to_woff2().unwrap();
    assert_valid_font(&woff2, false, &expected_chars);
    assert_eq!(subset.to_format(OutputFormat::Woff2).unwrap(), woff2);
}

#[test_casing(4, FONTS)]
fn subsetting_is_deterministic(font: TestFont) {
    let font_bytes = font.bytes();
    let chars = TestCharSubset::Mixed.into_set();
    let subset = || {
        let font = Font::new(&font_bytes).unwrap();
        FontSubset::new(font, &chars, SubsetOptions::default()).unwrap()
    };
    let (first, second) = (subset(), subset());
    assert_eq!(first.to_opentype().unwrap(), second.to_opentype().unwrap());
    assert_eq!(first.to_woff2().unwrap(), second.to_woff2().unwrap());
}

#[test]
fn accented_char_retains_components() {
    let builder = FontBuilder::latin();
    let font_bytes = builder.build();
    let font = Font::new(&font_bytes).unwrap();
    let chars = BTreeSet::from(['é']);
    let subset = FontSubset::new(font, &chars, SubsetOptions::default()).unwrap();
    assert_eq!(subset.glyph_count(), 4);

    let output = subset.to_opentype().unwrap();
    let output = Font::new(&output).unwrap();
    assert_eq!(output.glyph_count(), 4);
    let e_acute = output.map_char('é').unwrap();
    assert_ne!(e_acute, 0);
    // Neither the base letter nor the mark are mapped, but both are retained
    assert_eq!(output.map_char('e').unwrap(), 0);
    assert_eq!(output.map_char('\u{301}').unwrap(), 0);

    let mut components = output.glyph_components(e_acute).unwrap();
    components.sort_unstable();
    assert_eq!(components, [1, 2]);
    for component in components {
        let glyph = output.glyph(component).unwrap();
        assert!(matches!(glyph.inner, Outline::TrueType(Glyph::Simple(_))));
    }
}

#[test]
fn subsetting_cjk_font() {
    let font_bytes = TestFont::Cjk.bytes();
    let font = Font::new(&font_bytes).unwrap();
    let source_glyph_count = font.glyph_count();
    let mut chars: BTreeSet<char> = (' '..='~').collect();
    chars.extend("Hello世界".chars());

    let subset = FontSubset::new(font, &chars, SubsetOptions::default()).unwrap();
    // .notdef + ASCII + 2 ideographs
    assert_eq!(subset.glyph_count(), 98);
    assert!(subset.glyph_count() < usize::from(source_glyph_count) / 2);

    let output = subset.to_opentype().unwrap();
    assert_valid_font(&output, true, &chars);
    let output = Font::new(&output).unwrap();
    for ch in ['你', '好', 'é', '\u{1f600}', '\u{4e00}'] {
        assert_eq!(output.map_char(ch).unwrap(), 0, "{ch:?}");
    }
    // No supplementary-plane chars are retained, so there's no format 12 subtable
    assert_eq!(cmap_encodings(&output), [(0, 3), (3, 1)]);
}

#[test]
fn subsetting_many_scattered_ideographs() {
    const IDEOGRAPH_COUNT: u32 = 18_000;

    let font_bytes = FontBuilder::latin().with_ideographs(IDEOGRAPH_COUNT).build();
    let font = Font::new(&font_bytes).unwrap();
    // Every other ideograph, so that no two requested chars form a contiguous range
    let chars: BTreeSet<char> = (0..IDEOGRAPH_COUNT)
        .step_by(2)
        .filter_map(|i| char::from_u32(0x4e00 + i))
        .collect();
    assert_eq!(chars.len(), 9_000);

    let subset = FontSubset::new(font, &chars, SubsetOptions::default()).unwrap();
    assert_eq!(subset.glyph_count(), 9_001);
    let output = subset.to_opentype().unwrap();
    assert_valid_font(&output, true, &chars);

    let output = Font::new(&output).unwrap();
    assert_eq!(output.map_char('\u{4e01}').unwrap(), 0);
    // A format 4 subtable would need a segment per char and overflow
    assert_eq!(cmap_encodings(&output), [(0, 4), (3, 10)]);
}

#[test]
fn subsetting_with_minimal_char_set() {
    let font_bytes = FontBuilder::latin().build();
    let font = Font::new(&font_bytes).unwrap();
    let chars: BTreeSet<char> = ".,!? \n\t\r".chars().collect();

    let subset = FontSubset::new(font, &chars, SubsetOptions::default()).unwrap();
    assert_eq!(subset.glyph_count(), 6);
    let output = subset.to_opentype().unwrap();
    let expected_chars = BTreeSet::from(['.', ',', '!', '?', ' ']);
    assert_valid_font(&output, true, &expected_chars);

    let output = Font::new(&output).unwrap();
    assert_eq!(output.glyph_count(), 6);
    assert_eq!(output.map_char('\n').unwrap(), 0);
    assert_eq!(output.map_char('a').unwrap(), 0);
}

#[test]
fn subsetting_with_empty_char_set() {
    let font_bytes = TestFont::LatinCff.bytes();
    let font = Font::new(&font_bytes).unwrap();
    let subset = FontSubset::new(font, &BTreeSet::new(), SubsetOptions::default()).unwrap();
    assert_eq!(subset.glyph_count(), 1);

    let output = subset.to_opentype().unwrap();
    let output = Font::new(&output).unwrap();
    assert_eq!(output.glyph_count(), 1);
    assert_eq!(cmap_encodings(&output), [(0, 3), (3, 1)]);
}

#[test]
fn hhea_limits_are_recomputed() {
    let font_bytes = FontBuilder::latin().build();
    let font = Font::new(&font_bytes).unwrap();
    assert_eq!(font.table(TableTag::HHEA).unwrap()[16..18], 800_i16.to_be_bytes());
    let chars = BTreeSet::from(['a', 'b']);
    let output = FontSubset::new(font, &chars, SubsetOptions::default())
        .unwrap()
        .to_opentype()
        .unwrap();
    assert_valid_font(&output, true, &chars);

    let output = Font::new(&output).unwrap();
    let hhea = output.table(TableTag::HHEA).unwrap();
    assert_eq!(hhea[10..12], 500_u16.to_be_bytes()); // advanceWidthMax
    assert_eq!(hhea[12..14], 0_i16.to_be_bytes()); // minLeftSideBearing
    // 'b' is a 564-unit square with the 500-unit advance
    assert_eq!(hhea[14..16], (-64_i16).to_be_bytes()); // minRightSideBearing
    assert_eq!(hhea[16..18], 564_i16.to_be_bytes()); // xMaxExtent
}

fn trim_padding(raw: &[u8]) -> &[u8] {
    let len = raw.iter().rposition(|&byte| byte != 0).map_or(0, |pos| pos + 1);
    &raw[..len]
}

fn assert_outlines_eq(source: &Font<'_>, output: &Font<'_>) {
    assert_eq!(source.glyph_count(), output.glyph_count());
    for glyph_id in 0..source.glyph_count() {
        let expected = source.glyph(glyph_id).unwrap();
        let actual = output.glyph(glyph_id).unwrap();
        assert_eq!(expected.advance, actual.advance, "glyph {glyph_id}");
        assert_eq!(expected.lsb, actual.lsb, "glyph {glyph_id}");

        match (&expected.inner, &actual.inner) {
            (Outline::TrueType(Glyph::Empty), Outline::TrueType(Glyph::Empty)) => {}
            (Outline::TrueType(Glyph::Simple(expected)), Outline::TrueType(Glyph::Simple(actual))) => {
                assert_eq!(trim_padding(expected.raw), trim_padding(actual.raw), "glyph {glyph_id}");
            }
            (
                Outline::TrueType(Glyph::Composite {
                    header: expected_header,
                    components: expected_components,
                    ..
                }),
                Outline::TrueType(Glyph::Composite {
                    header: actual_header,
                    components: actual_components,
                    ..
                }),
            ) => {
                assert_eq!(expected_header, actual_header, "glyph {glyph_id}");
                let expected_ids = expected_components.iter().map(|c| c.glyph_idx);
                let actual_ids = actual_components.iter().map(|c| c.glyph_idx);
                assert!(expected_ids.eq(actual_ids), "glyph {glyph_id}");
            }
            (Outline::Cff(expected), Outline::Cff(actual)) => {
                assert_eq!(expected.bytes, actual.bytes, "glyph {glyph_id}");
            }
            _ => panic!("glyph {glyph_id}: outline kind mismatch: {expected:?} vs {actual:?}"),
        }
    }
}

#[test_casing(3, [TestFont::Latin, TestFont::LatinCff, TestFont::CidCff])]
fn full_coverage_round_trip(font: TestFont) {
    let builder = font.builder();
    let font_bytes = builder.build();
    let source = Font::new(&font_bytes).unwrap();
    let mut chars: BTreeSet<char> = (' '..='~').collect();
    chars.extend(FontBuilder::COMBINING_MARKS);
    chars.extend(['é', 'ü', 'ǖ', '\u{1f600}']);

    let options = SubsetOptions::default().with_desubroutinize(false);
    let subset = FontSubset::new(Font::new(&font_bytes).unwrap(), &chars, options).unwrap();
    assert_eq!(subset.glyph_count(), builder.glyph_count());
    let output = subset.to_opentype().unwrap();
    let output = Font::new(&output).unwrap();
    assert_outlines_eq(&source, &output);

    for &ch in &chars {
        assert_eq!(source.map_char(ch).unwrap(), output.map_char(ch).unwrap(), "{ch:?}");
    }
    assert_eq!(
        cmap_encodings(&output),
        [(0, 3), (0, 4), (3, 1), (3, 10)]
    );
}

const HINTING_TABLES: [TableTag; 3] = [TableTag::CVT, TableTag::FPGM, TableTag::PREP];
/// Offset of `maxSizeOfInstructions` in `maxp` v1.
const MAX_SIZE_OF_INSTRUCTIONS_OFFSET: usize = 26;

#[test]
fn hinting_is_stripped_by_default() {
    let font_bytes = FontBuilder::latin().with_hinting().build();
    let font = Font::new(&font_bytes).unwrap();
    let chars = TestCharSubset::Mixed.into_set();
    let output = FontSubset::new(font, &chars, SubsetOptions::default())
        .unwrap()
        .to_opentype()
        .unwrap();
    assert_valid_font(&output, true, &"Hélo üǖ😀".chars().collect());

    let output = Font::new(&output).unwrap();
    for tag in HINTING_TABLES {
        assert!(output.table(tag).is_none(), "{tag}");
    }
    for glyph_id in 0..output.glyph_count() {
        match output.glyph(glyph_id).unwrap().inner {
            Outline::TrueType(Glyph::Simple(glyph)) => {
                assert!(glyph.instructions().is_empty(), "glyph {glyph_id}");
            }
            Outline::TrueType(Glyph::Composite { instructions, .. }) => {
                assert!(instructions.is_empty(), "glyph {glyph_id}");
            }
            _ => { /* no instructions */ }
        }
    }

    let maxp = output.table(TableTag::MAXP).unwrap();
    let offset = MAX_SIZE_OF_INSTRUCTIONS_OFFSET;
    assert_eq!(maxp[offset..offset + 2], [0, 0]);
    assert_eq!(maxp[14..16], [0, 1]); // maxZones
}

#[test]
fn hinting_is_retained_if_requested() {
    let font_bytes = FontBuilder::latin().with_hinting().build();
    let font = Font::new(&font_bytes).unwrap();
    let source = Font::new(&font_bytes).unwrap();
    let chars = TestCharSubset::Ascii.into_set();
    let options = SubsetOptions::default().with_hinting(true);
    let output = FontSubset::new(font, &chars, options)
        .unwrap()
        .to_opentype()
        .unwrap();

    let output = Font::new(&output).unwrap();
    for tag in HINTING_TABLES {
        assert_eq!(output.table(tag), source.table(tag), "{tag}");
    }
    let glyph_id = output.map_char('A').unwrap();
    let Outline::TrueType(Glyph::Simple(glyph)) = output.glyph(glyph_id).unwrap().inner else {
        panic!("unexpected glyph");
    };
    assert!(!glyph.instructions().is_empty());

    let maxp = output.table(TableTag::MAXP).unwrap();
    let offset = MAX_SIZE_OF_INSTRUCTIONS_OFFSET;
    assert_eq!(maxp[offset..offset + 2], [0, 3]);
}

#[test]
fn glyph_names_are_stripped_by_default() {
    let font_bytes = FontBuilder::latin().with_glyph_names().build();
    let font = Font::new(&font_bytes).unwrap();
    let chars = TestCharSubset::Mixed.into_set();
    let output = FontSubset::new(font, &chars, SubsetOptions::default())
        .unwrap()
        .to_opentype()
        .unwrap();

    let output = Font::new(&output).unwrap();
    let post = output.table(TableTag::POST).unwrap();
    assert_eq!(post.len(), 32);
    assert_eq!(post[..4], [0, 3, 0, 0]);
}

#[test]
fn glyph_names_are_retained_if_requested() {
    let font_bytes = FontBuilder::latin()
        .glyph(TestGlyph::square(500).named("a.alt"))
        .with_glyph_names()
        .build();
    let font = Font::new(&font_bytes).unwrap();
    let chars = TestCharSubset::Mixed.into_set();
    let options = SubsetOptions::default().with_glyph_names(true);
    let subset = FontSubset::new(font, &chars, options).unwrap();
    let glyph_count = subset.glyph_count();
    let output = subset.to_opentype().unwrap();

    let output = Font::new(&output).unwrap();
    let post = output.table(TableTag::POST).unwrap();
    assert_eq!(post[..4], [0, 2, 0, 0]);
    assert_eq!(
        usize::from(u16::from_be_bytes([post[32], post[33]])),
        glyph_count
    );
    let has_name = |name: &[u8]| post.windows(name.len()).any(|window| window == name);
    assert!(has_name(b"uni00E9"));
    assert!(has_name(b"u1F600"));
    // Retained as a component of 'é'
    assert!(has_name(b"uni0301"));
    assert!(!has_name(b"a.alt"), "unmapped glyph is not retained");
}

#[test]
fn missing_post_table_is_not_created() {
    let font_bytes = FontBuilder::latin().without_table(*b"post").build();
    let font = Font::new(&font_bytes).unwrap();
    let chars = TestCharSubset::Ascii.into_set();
    let output = FontSubset::new(font, &chars, SubsetOptions::default())
        .unwrap()
        .to_opentype()
        .unwrap();
    let output = Font::new(&output).unwrap();
    assert!(output.table(TableTag::POST).is_none());
}

#[test]
fn legacy_and_symbol_cmaps_are_stripped_by_default() {
    let font_bytes = FontBuilder::latin()
        .with_legacy_cmap()
        .with_symbol_cmap()
        .build();
    let font = Font::new(&font_bytes).unwrap();
    assert_eq!(cmap_encodings(&font), [(1, 0), (3, 0), (3, 1), (3, 10)]);

    let chars = TestCharSubset::Ascii.into_set();
    let output = FontSubset::new(font, &chars, SubsetOptions::default())
        .unwrap()
        .to_opentype()
        .unwrap();
    let output = Font::new(&output).unwrap();
    assert_eq!(cmap_encodings(&output), [(0, 3), (3, 1)]);
}

#[test]
fn legacy_and_symbol_cmaps_are_retained_if_requested() {
    let font_bytes = FontBuilder::latin()
        .with_legacy_cmap()
        .with_symbol_cmap()
        .build();
    let font = Font::new(&font_bytes).unwrap();
    let chars = BTreeSet::from(['A', 'b']);
    let options = SubsetOptions::default()
        .with_legacy_cmap(true)
        .with_symbol_cmap(true);
    let subset = FontSubset::new(font, &chars, options).unwrap();
    // Legacy and symbol mappings never extend the closure
    assert_eq!(subset.glyph_count(), 3);

    let output = subset.to_opentype().unwrap();
    let output = Font::new(&output).unwrap();
    assert_eq!(cmap_encodings(&output), [(0, 3), (1, 0), (3, 0), (3, 1)]);
    for ch in chars {
        assert_ne!(output.map_char(ch).unwrap(), 0, "{ch:?}");
    }
}

#[test]
fn unrelated_tables_are_dropped() {
    let font_bytes = FontBuilder::latin()
        .with_table(*b"GSUB", &[0, 1, 0, 0, 0, 0, 0, 0, 0, 0])
        .with_table(*b"DSIG", &[0, 0, 0, 1, 0, 0, 0, 0])
        .build();
    let font = Font::new(&font_bytes).unwrap();
    assert!(font.table(TableTag::new(*b"GSUB")).is_some());

    let chars = TestCharSubset::Ascii.into_set();
    let output = FontSubset::new(font, &chars, SubsetOptions::default())
        .unwrap()
        .to_opentype()
        .unwrap();
    let output = Font::new(&output).unwrap();
    let tags: Vec<_> = output.tags().map(|tag| tag.to_string()).collect();
    assert_eq!(
        tags,
        ["OS/2", "cmap", "gasp", "glyf", "head", "hhea", "hmtx", "loca", "maxp", "name", "post"]
    );
}

#[test]
fn font_without_cmap_is_unsupported() {
    let font_bytes = FontBuilder::latin().without_table(*b"cmap").build();
    let err = Font::new(&font_bytes).map_err(Error::from).unwrap_err();
    let Error::Unsupported(err) = &err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(err.table(), Some(TableTag::CMAP));
}

//! End-to-end tests for the `fontpress` CLI.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use clap::Parser;
use fontpress::{Font, TableTag};
use fontpress_cli::{run, Args, RunError};
use fontpress_test_fonts::FontBuilder;
use tempfile::{tempdir, TempDir};
use test_casing::test_casing;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Café</title>
  <style>body::after { content: "ÿ"; }</style>
</head>
<body>
  <img src="logo.png" alt="Logo ✓">
  <p>Héllo, world!</p>
  <script>document.title = "ü";</script>
</body>
</html>
"#;

const APP_JS: &str = r"
export function greet(name) {
  console.info('ǖ');
  return `Hi ${name}`;
}
";

struct Project {
    dir: TempDir,
    font_path: PathBuf,
}

impl Project {
    fn new(font: &FontBuilder) -> Self {
        let dir = tempdir().unwrap();
        let site = dir.path().join("site");
        fs::create_dir_all(site.join("js")).unwrap();
        fs::write(site.join("index.html"), INDEX_HTML).unwrap();
        fs::write(site.join("js").join("app.js"), APP_JS).unwrap();
        fs::write(site.join("js").join("legacy.js"), [0xc3, 0x28, b'\'', b'\'']).unwrap();

        let font_path = dir.path().join("Source.ttf");
        fs::write(&font_path, font.build()).unwrap();
        Self { dir, font_path }
    }

    fn site(&self) -> PathBuf {
        self.dir.path().join("site")
    }

    fn output(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn args(&self, output: &Path, extra: &[&str]) -> Args {
        let mut args = vec![
            "fontpress".into(),
            "-d".into(),
            self.site().into_os_string(),
            "-f".into(),
            self.font_path.clone().into_os_string(),
            "-o".into(),
            output.as_os_str().to_owned(),
        ];
        args.extend(extra.iter().map(Into::into));
        Args::try_parse_from(args).unwrap()
    }
}

#[test_casing(2, ["Output.ttf", "Output.woff2"])]
fn subsetting_font_for_project(output_name: &str) {
    let project = Project::new(&FontBuilder::latin());
    let output_path = project.output(output_name);
    let summary = run(&project.args(&output_path, &[])).unwrap();

    assert_eq!(summary.files_scanned, 2);
    assert_eq!(summary.files_skipped, 1);
    let output_len = fs::metadata(&output_path).unwrap().len();
    assert_eq!(summary.new_size, usize::try_from(output_len).unwrap());
    assert!(summary.new_size < summary.original_size);
    assert!(summary.reduction_percent() > 0.0);

    let output = fs::read(&output_path).unwrap();
    if output_name.ends_with(".woff2") {
        assert_eq!(output[..4], *b"wOF2");
        return;
    }

    let font = Font::new(&output).unwrap();
    assert_eq!(usize::from(font.glyph_count()), summary.retained_glyphs);
    // Markup text, attributes, script literals and default kept chars
    for ch in ['é', 'H', 'A', '7', '~', ' ', 'ǖ'] {
        assert_ne!(font.map_char(ch).unwrap(), 0, "{ch:?}");
    }
    // 'ü' is only used in an inline script; 'ÿ' is not in the font
    assert_eq!(font.map_char('ü').unwrap(), 0);
    assert_eq!(font.map_char('ÿ').unwrap(), 0);
}

#[test]
fn custom_keep_chars_replace_defaults() {
    let project = Project::new(&FontBuilder::latin());
    let output_path = project.output("Output.ttf");
    let summary = run(&project.args(&output_path, &["-k", "Z😀"])).unwrap();

    let output = fs::read(&output_path).unwrap();
    let font = Font::new(&output).unwrap();
    assert_eq!(usize::from(font.glyph_count()), summary.retained_glyphs);
    assert_ne!(font.map_char('Z').unwrap(), 0);
    assert_ne!(font.map_char('\u{1f600}').unwrap(), 0);
    // Not collected and not kept
    assert_eq!(font.map_char('7').unwrap(), 0);
}

#[test]
fn subsetting_cff_font_with_options() {
    let project = Project::new(&FontBuilder::latin().with_cff_outlines().with_glyph_names());
    let output_path = project.output("Output.otf");
    let args = project.args(&output_path, &["--glyph-names", "--no-desubroutinize"]);
    run(&args).unwrap();

    let output = fs::read(&output_path).unwrap();
    let font = Font::new(&output).unwrap();
    assert!(font.table(TableTag::CFF).is_some());
    let post = font.table(TableTag::POST).unwrap();
    assert_eq!(post[..4], [0, 2, 0, 0]);
}

#[test]
fn missing_directory_is_input_error() {
    let project = Project::new(&FontBuilder::latin());
    let output_path = project.output("Output.ttf");
    let mut args = project.args(&output_path, &[]);
    args.directory = project.dir.path().join("missing");

    let err = run(&args).unwrap_err();
    assert!(
        matches!(&err, RunError::Input { path, .. } if *path == args.directory),
        "{err:?}"
    );
    assert!(!output_path.exists());
}

#[test]
fn font_path_as_directory_is_input_error() {
    let project = Project::new(&FontBuilder::latin());
    let output_path = project.output("Output.ttf");
    let mut args = project.args(&output_path, &[]);
    args.font = project.site();

    let err = run(&args).unwrap_err();
    assert!(
        matches!(&err, RunError::Input { path, .. } if *path == args.font),
        "{err:?}"
    );
}

#[test]
fn corrupt_font_does_not_overwrite_output() {
    let project = Project::new(&FontBuilder::latin());
    fs::write(&project.font_path, b"definitely not a font").unwrap();
    let output_path = project.output("Output.ttf");
    fs::write(&output_path, b"previous output").unwrap();

    let err = run(&project.args(&output_path, &[])).unwrap_err();
    assert!(
        matches!(&err, RunError::Font(fontpress::Error::Corrupt(_))),
        "{err:?}"
    );
    assert_eq!(fs::read(&output_path).unwrap(), b"previous output");
}

#[test]
fn binary_reports_success() {
    let project = Project::new(&FontBuilder::latin());
    let output_path = project.output("Output.woff2");
    let output = Command::new(env!("CARGO_BIN_EXE_fontpress"))
        .arg("-d")
        .arg(project.site())
        .arg("-f")
        .arg(&project.font_path)
        .arg("-o")
        .arg(&output_path)
        .env("RUST_LOG", "info")
        .output()
        .unwrap();

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "{stderr}");
    assert!(stderr.contains("[INFO] size reduced by"), "{stderr}");
    assert!(stderr.contains("[WARN]"), "{stderr}");
    assert!(output_path.is_file());
}

#[test]
fn binary_fails_on_font_without_cmap() {
    let project = Project::new(&FontBuilder::latin().without_table(*b"cmap"));
    let output_path = project.output("Output.ttf");
    let output = Command::new(env!("CARGO_BIN_EXE_fontpress"))
        .arg("-d")
        .arg(project.site())
        .arg("-f")
        .arg(&project.font_path)
        .arg("-o")
        .arg(&output_path)
        .env("RUST_LOG", "info")
        .output()
        .unwrap();

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(1), "{stderr}");
    assert!(stderr.contains("[ERROR] unsupported font"), "{stderr}");
    assert!(!output_path.exists());
}

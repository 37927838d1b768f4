//! File naming for organized library placement.
//!
//! Turns a file's identity into a deterministic file name using user-configured
//! [upon] templates. The template syntax follows upon's Mustache-like
//! conventions (`{{ variable }}`, `{{ value|formatter }}`), extended with
//! library-specific formatters and functions:
//!
//! - **`slug`**: lowercase ASCII words joined by `-`; quotes are dropped
//!   rather than turned into separators.
//! - **`truncate(value, n)`**: at most `n` bytes, cut on a character boundary.
//!
//! # Template Variables
//!
//! | Variable   | Type     | Description                                    |
//! |------------|----------|------------------------------------------------|
//! | `hash`     | `String` | Hex content hash of the file                   |
//! | `short`    | `String` | First 12 hex digits of `hash`                  |
//! | `stem`     | `String` | Original file name without extension           |
//! | `category` | `String` | Category folder the file is placed in          |
//! | `ext`      | `String` | Lowercase extension without the dot            |
//!
//! The rendered name is placed inside the category folder and must stay there;
//! it may contain `/` to create sub-folders.
//!
//! # Example
//!
//! ```
//! use meshvault_library::{PathGenerator, Placement};
//!
//! let generator: PathGenerator = "{{ stem|slug }}-{{ short }}".parse().unwrap();
//! let placement = Placement::new("0123456789abcdef", "/downloads/Tiny Benchy.STL");
//! assert_eq!(generator.generate_with_ext(&placement).unwrap(), "tiny-benchy-0123456789ab.stl");
//! ```

use crate::classify::category_folder;
use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use meshvault_storage::validate_path;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::instrument;
use upon::{Engine, Template};

/// Names each file after its content.
pub const DEFAULT_TEMPLATE: &str = "{{ hash }}";

/// Everything a template can refer to for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub hash: String,
    pub stem: String,
    pub category: &'static str,
    /// Lowercase, without the leading dot; empty when the file has none.
    pub ext: String,
}
impl Placement {
    pub fn new(hash: impl Into<String>, original: impl AsRef<Path>) -> Self {
        let original = original.as_ref();
        Self {
            hash: hash.into(),
            stem: original.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default(),
            category: category_folder(original),
            ext: original.extension().map(|e| e.to_string_lossy().to_ascii_lowercase()).unwrap_or_default(),
        }
    }
}

/// A compiled filename template.
///
/// Parsing compiles the template, so a bad template is rejected when the
/// configuration is loaded rather than on the first import.
pub struct PathGenerator {
    engine: Engine<'static>,
    template: Template<'static>,
}
impl FromStr for PathGenerator {
    type Err = Error;

    fn from_str(source: &str) -> std::result::Result<Self, Self::Err> {
        let mut engine = Engine::new();
        engine.add_formatter("slug", filters::slug);
        engine.add_function("truncate", filters::truncate);
        let template = engine.compile(source.to_owned()).or_raise(|| ErrorKind::Template)?;
        Ok(Self { engine, template })
    }
}
impl PathGenerator {
    /// Renders the template, returning the normalized name without extension.
    #[instrument(level = "trace", skip_all, fields(hash = %placement.hash))]
    pub fn generate(&self, placement: &Placement) -> Result<String> {
        let path = self
            .template
            .render(&self.engine, Self::parameters(placement))
            .to_string()
            .or_raise(|| ErrorKind::Template)?;
        Self::normalize(path)
    }

    /// Renders the template and appends the placement's extension.
    ///
    /// ```text
    /// generate(…)          → "3f2a…9c"
    /// generate_with_ext(…) → "3f2a…9c.stl"
    /// ```
    pub fn generate_with_ext(&self, placement: &Placement) -> Result<String> {
        let path = self.generate(placement)?;
        Ok(match placement.ext.is_empty() {
            true => path,
            false => format!("{path}.{}", placement.ext),
        })
    }

    /// Strips whitespace around every segment and rejects names that would
    /// leave the category folder.
    fn normalize(rendered: String) -> Result<String> {
        let joined = rendered.split('/').map(str::trim).filter(|s| !s.is_empty()).collect::<Vec<_>>().join("/");
        let checked = validate_path(&joined).or_raise(|| ErrorKind::Template)?;
        Ok(checked.to_string_lossy().into_owned())
    }

    fn parameters(placement: &Placement) -> upon::Value {
        upon::value! {
            hash: &placement.hash,
            short: placement.hash.get(..12).unwrap_or(&placement.hash),
            stem: &placement.stem,
            category: placement.category,
            ext: &placement.ext,
        }
    }
}

/// `target` for `n == 0`, otherwise `target` with `_{n}` appended to its stem.
pub(crate) fn with_suffix(target: &Path, n: usize) -> PathBuf {
    if n == 0 {
        return target.to_path_buf();
    }
    let stem = target.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = match target.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    };
    target.with_file_name(name)
}

mod filters {
    use rslug::slugify;
    use std::fmt::Write;
    use upon::{Value, fmt};

    fn is_quote(c: char) -> bool {
        matches!(c, '\'' | '"' | '`' | '\u{2018}'..='\u{201F}' | '\u{00AB}' | '\u{00BB}' | '\u{2039}' | '\u{203A}')
    }

    pub(super) fn slug(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
        let Value::String(text) = value else {
            return fmt::default(f, value);
        };
        let unquoted: String = text.chars().filter(|c| !is_quote(*c)).collect();
        write!(f, "{}", slugify!(&unquoted))?;
        Ok(())
    }

    pub(super) fn truncate(text: &str, max_bytes: usize) -> String {
        text[..text.floor_char_boundary(max_bytes)].to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const HASH: &str = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262";

    #[test]
    fn test_placement_from_path() {
        let placement = Placement::new(HASH, "/downloads/Tiny Benchy.STL");
        assert_eq!(placement.stem, "Tiny Benchy");
        assert_eq!(placement.ext, "stl");
        assert_eq!(placement.category, "STL_Files");
    }

    #[test]
    fn test_default_template_is_hash() {
        let placement = Placement::new(HASH, "/downloads/benchy.stl");
        let generator: PathGenerator = DEFAULT_TEMPLATE.parse().unwrap();
        assert_eq!(generator.generate_with_ext(&placement).unwrap(), format!("{HASH}.stl"));
    }

    #[rstest]
    #[case("{{ stem|slug }}", "\"Tiny\" Benchy's Hull.stl", "tiny-benchys-hull.stl")]
    #[case("{{ truncate(stem, 4)|slug }}-{{ short }}", "Benchy.stl", "benc-af1349b9f5f9.stl")]
    #[case("{{ stem|truncate: 4|slug }}", "Benchy.stl", "benc.stl")]
    #[case("{{ category }}/{{ hash }}", "x.obj", "OBJ_Files/af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262.obj")]
    #[case(" sub / {{ stem }} ", "x.3mf", "sub/x.3mf")]
    #[case("{{ stem }}", "README", "README")]
    fn test_generate_with_ext(#[case] template: &str, #[case] original: &str, #[case] expected: &str) {
        let generator: PathGenerator = template.parse().unwrap();
        let placement = Placement::new(HASH, original);
        assert_eq!(generator.generate_with_ext(&placement).unwrap(), expected);
    }

    #[test]
    fn test_rejects_escaping_names() {
        let generator: PathGenerator = "../../{{ stem }}".parse().unwrap();
        let err = generator.generate(&Placement::new(HASH, "evil.stl")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Template));
    }

    #[test]
    fn test_invalid_syntax_fails_fast() {
        assert!("{{ hash".parse::<PathGenerator>().is_err());
    }

    #[rstest]
    #[case("lib/STL_Files/abc.stl", 0, "lib/STL_Files/abc.stl")]
    #[case("lib/STL_Files/abc.stl", 2, "lib/STL_Files/abc_2.stl")]
    #[case("lib/Other_Files/README", 1, "lib/Other_Files/README_1")]
    fn test_with_suffix(#[case] target: &str, #[case] n: usize, #[case] expected: &str) {
        assert_eq!(with_suffix(Path::new(target), n), PathBuf::from(expected));
    }
}

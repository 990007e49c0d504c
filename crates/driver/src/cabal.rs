//! Textual `.cabal` file helpers
//!
//! Full metadata parsing belongs to a collaborator and the plan already
//! carries parsed descriptions; the driver only needs three textual
//! operations on the unpacked file: find it, read its `build-type`
//! field, and (under allow-newer) strip dependency version bounds.

use kiln_errors::{BuildError, Error, Result};
use std::path::{Path, PathBuf};

/// The `Setup.hs` synthesised for Simple build types
pub const DEFAULT_SETUP_HS: &str = "import Distribution.Simple\nmain = defaultMain\n";

/// Locate the `.cabal` file directly under `dir`
///
/// # Errors
///
/// Returns [`BuildError::CabalFileMissing`] when none is found.
pub async fn find_cabal_file(dir: &Path) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::io_with_path(&e, dir))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io_with_path(&e, dir))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "cabal") {
            return Ok(path);
        }
    }
    Err(BuildError::CabalFileMissing {
        dir: dir.display().to_string(),
    }
    .into())
}

/// Whether the file declares `build-type: Simple`
///
/// An absent field reads as Simple, which is both cabal's common case
/// and the safe default for synthesising `Setup.hs`.
#[must_use]
pub fn declares_simple_build(cabal_text: &str) -> bool {
    for line in cabal_text.lines() {
        let trimmed = line.trim();
        let Some((field, value)) = trimmed.split_once(':') else {
            continue;
        };
        if field.trim().eq_ignore_ascii_case("build-type") {
            return value.trim().eq_ignore_ascii_case("simple");
        }
    }
    true
}

fn is_dependency_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

/// Strip the version constraint from one `build-depends` entry
fn relax_entry(entry: &str) -> Option<String> {
    let name: String = entry
        .trim()
        .bytes()
        .take_while(|b| is_dependency_name_byte(*b))
        .map(char::from)
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn starts_new_field_or_block(content: &str) -> bool {
    let lowered = content.to_ascii_lowercase();
    lowered.is_empty()
        || lowered.starts_with("if ")
        || lowered.starts_with("if(")
        || lowered.starts_with("else")
        || content.contains(':')
}

/// Rewrite a `.cabal` file so every `build-depends` entry accepts any
/// version
///
/// This is a line-oriented best effort: it relaxes the field line and
/// its indented continuations, and stops at the next field, conditional
/// or blank line. Packages with exotic layouts still build; they just
/// keep their bounds.
#[must_use]
pub fn relax_version_bounds(cabal_text: &str) -> String {
    let mut out = Vec::with_capacity(cabal_text.lines().count());
    let mut in_depends = false;

    for line in cabal_text.lines() {
        let indent_len = line.len() - line.trim_start().len();
        let (indent, content) = line.split_at(indent_len);
        let trimmed = content.trim_end();
        // Entries continue onto the next line iff this one ends with a
        // comma; keep that structure intact.
        let separator = if trimmed.ends_with(',') { "," } else { "" };

        if in_depends {
            if indent.is_empty() || starts_new_field_or_block(trimmed) {
                in_depends = false;
            } else {
                let relaxed: Vec<String> =
                    trimmed.split(',').filter_map(relax_entry).collect();
                out.push(format!("{indent}{}{separator}", relaxed.join(", ")));
                continue;
            }
        }

        if let Some((field, rest)) = trimmed.split_once(':') {
            if field.trim().eq_ignore_ascii_case("build-depends") {
                in_depends = true;
                let relaxed: Vec<String> = rest.split(',').filter_map(relax_entry).collect();
                out.push(format!(
                    "{indent}{}: {}{separator}",
                    field.trim_end(),
                    relaxed.join(", ")
                ));
                continue;
            }
        }
        out.push(line.to_string());
    }

    let mut rendered = out.join("\n");
    if cabal_text.ends_with('\n') {
        rendered.push('\n');
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_type_detection() {
        assert!(declares_simple_build("name: foo\nbuild-type: Simple\n"));
        assert!(declares_simple_build("name: foo\nBuild-Type:   simple\n"));
        assert!(!declares_simple_build("name: foo\nbuild-type: Custom\n"));
        // Absent field defaults to Simple.
        assert!(declares_simple_build("name: foo\n"));
    }

    #[test]
    fn relaxing_strips_bounds_on_the_field_line() {
        let input = "library\n  build-depends: base >= 4 && < 5, text ==2.0.*\n";
        let output = relax_version_bounds(input);
        assert!(output.contains("build-depends: base, text\n"));
    }

    #[test]
    fn relaxing_handles_continuation_lines() {
        let input = concat!(
            "library\n",
            "  build-depends: base >= 4,\n",
            "                 bytestring < 0.12,\n",
            "                 containers\n",
            "  ghc-options: -Wall\n",
        );
        let output = relax_version_bounds(input);
        assert!(output.contains("build-depends: base,\n"));
        assert!(output.contains("bytestring,\n"));
        assert!(output.contains("containers\n"));
        assert!(output.contains("ghc-options: -Wall"));
    }

    #[test]
    fn relaxing_stops_at_conditionals() {
        let input = concat!(
            "library\n",
            "  build-depends: base\n",
            "  if os(windows)\n",
            "    build-depends: Win32 >= 2\n",
        );
        let output = relax_version_bounds(input);
        assert!(output.contains("if os(windows)"));
        assert!(output.contains("build-depends: Win32\n"));
    }

    #[test]
    fn unrelated_fields_pass_through() {
        let input = "name: demo\nversion: 1.0\n";
        assert_eq!(relax_version_bounds(input), input);
    }

    #[tokio::test]
    async fn cabal_file_discovery() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "hi").unwrap();
        std::fs::write(dir.path().join("demo.cabal"), "name: demo\n").unwrap();
        let found = find_cabal_file(dir.path()).await.unwrap();
        assert_eq!(found.file_name().unwrap(), "demo.cabal");

        let empty = tempfile::tempdir().unwrap();
        assert!(find_cabal_file(empty.path()).await.is_err());
    }
}

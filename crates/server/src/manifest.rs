//! Level manifests: one `<table> <string>` pair per line, `#` starts a
//! comment. Strings may contain spaces; everything after the table name is
//! taken verbatim.

use std::fs;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub table: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let mut entries = Vec::new();

        for (number, raw) in text.lines().enumerate() {
            let line = match raw.find('#') {
                Some(comment) => &raw[..comment],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }

            let Some((table, value)) = line.split_once(char::is_whitespace) else {
                return Err(ManifestError::Syntax {
                    line: number + 1,
                    message: format!("expected '<table> <string>', found '{}'", line),
                });
            };

            entries.push(ManifestEntry {
                table: table.to_string(),
                value: value.trim().to_string(),
            });
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entries_and_comments() {
        let manifest = Manifest::parse(
            "# precache list\n\
             downloadables materials/x.vmt\n\
             \n\
             modelprecache   models/y.mdl   # trailing comment\n\
             soundprecache sound/ambient/wind loop.wav\n",
        )
        .unwrap();

        assert_eq!(manifest.len(), 3);
        assert_eq!(
            manifest.entries()[1],
            ManifestEntry {
                table: "modelprecache".into(),
                value: "models/y.mdl".into(),
            }
        );
        assert_eq!(manifest.entries()[2].value, "sound/ambient/wind loop.wav");
    }

    #[test]
    fn test_missing_value_is_an_error() {
        let err = Manifest::parse("downloadables a\nmodelprecache\n").unwrap_err();
        assert!(matches!(err, ManifestError::Syntax { line: 2, .. }));
    }

    #[test]
    fn test_empty_manifest() {
        assert!(Manifest::parse("# nothing here\n\n").unwrap().is_empty());
    }
}

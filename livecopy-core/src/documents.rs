// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};

use livecopy_types::DocumentPrinting;

use crate::error::DocumentError;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> DocumentError + '_ {
    move |source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn matches(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(ext)))
}

fn walk(dir: &Path, settings: &DocumentPrinting, found: &mut Vec<PathBuf>) -> Result<(), DocumentError> {
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let entry = entry.map_err(io_error(dir))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(io_error(&path))?;
        if file_type.is_dir() {
            if settings.recursive {
                walk(&path, settings, found)?;
            }
        } else if file_type.is_file() && matches(&path, &settings.extensions) {
            found.push(path);
        }
    }
    Ok(())
}

/// Printable documents below `exchange_root`/`settings.directory`, sorted.
pub fn find_documents(
    exchange_root: &Path,
    settings: &DocumentPrinting,
) -> Result<Vec<PathBuf>, DocumentError> {
    let directory = exchange_root.join(&settings.directory);
    if !directory.is_dir() {
        return Err(DocumentError::MissingDirectory(directory));
    }
    let mut found = Vec::new();
    walk(&directory, settings, &mut found)?;
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn filters_by_extension_and_depth() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("Homework.PDF"));
        touch(&root.path().join("essay.odt"));
        touch(&root.path().join("photo.jpg"));
        touch(&root.path().join("class/notes.docx"));

        let mut settings = DocumentPrinting::default();
        let flat = find_documents(root.path(), &settings).unwrap();
        assert_eq!(flat, vec![root.path().join("Homework.PDF"), root.path().join("essay.odt")]);

        settings.recursive = true;
        assert_eq!(find_documents(root.path(), &settings).unwrap().len(), 3);
    }

    #[test]
    fn missing_directory_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let settings = DocumentPrinting {
            directory: PathBuf::from("print"),
            ..Default::default()
        };
        assert!(matches!(
            find_documents(root.path(), &settings),
            Err(DocumentError::MissingDirectory(_))
        ));
    }
}

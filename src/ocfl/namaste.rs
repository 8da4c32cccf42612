//! NAMASTE "type + version" declarations. A declaration is a file named `0=<dvalue>` whose
//! entire contents are `<dvalue>\n`. The storage root declares `ocfl_<M.N>` and each object
//! root declares `ocfl_object_<M.N>`.

use std::io::Cursor;
use std::sync::Arc;

use crate::ocfl::consts::{NAMASTE_PREFIX, OBJECT_NAMASTE_BASE, ROOT_NAMASTE_BASE};
use crate::ocfl::error::{OcflError, Result};
use crate::ocfl::spec::SpecVersion;
use crate::ocfl::vfs::{join, DirEntry, Vfs};

/// A concrete declaration: its filename and the dvalue the file must contain
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Namaste {
    pub filename: &'static str,
    pub dvalue: &'static str,
}

/// The level a declaration applies to
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DeclarationLevel {
    StorageRoot,
    Object,
}

/// A declaration parsed from a directory entry's filename
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Declaration {
    pub level: DeclarationLevel,
    pub spec: SpecVersion,
    pub filename: String,
}

impl Namaste {
    /// The exact bytes the declaration file must contain
    pub fn content(&self) -> String {
        format!("{}\n", self.dvalue)
    }
}

/// Parses a filename into a `Declaration`, or `None` if it is not a declaration this library
/// recognizes. Filenames starting with `0=` that do not parse are reported by the validator
/// separately; here they are simply not declarations.
pub fn parse_declaration(filename: &str) -> Option<Declaration> {
    let dvalue = filename.strip_prefix(NAMASTE_PREFIX)?;

    let (level, version) = if let Some(version) = dvalue.strip_prefix(OBJECT_NAMASTE_BASE) {
        (DeclarationLevel::Object, version)
    } else if let Some(version) = dvalue.strip_prefix(ROOT_NAMASTE_BASE) {
        (DeclarationLevel::StorageRoot, version)
    } else {
        return None;
    };

    let spec = SpecVersion::try_from_num(version).ok()?;

    Some(Declaration {
        level,
        spec,
        filename: filename.to_string(),
    })
}

/// Finds the single declaration of the given level among a directory's entries. It is an
/// error for a directory to contain zero declarations or more than one.
pub fn find_declaration(entries: &[DirEntry], level: DeclarationLevel) -> Result<Declaration> {
    let mut found: Option<Declaration> = None;

    for entry in entries {
        if entry.is_dir {
            continue;
        }
        if let Some(declaration) = parse_declaration(&entry.name) {
            if declaration.level != level {
                continue;
            }
            if found.is_some() {
                return Err(OcflError::Validation {
                    code: "E003".to_string(),
                    message: "Multiple conformance declarations found".to_string(),
                });
            }
            found = Some(declaration);
        }
    }

    found.ok_or_else(|| OcflError::Validation {
        code: "E003".to_string(),
        message: "Conformance declaration does not exist".to_string(),
    })
}

/// Writes the declaration file into `dir`
pub fn write(fs: &Arc<dyn Vfs>, dir: &str, namaste: Namaste) -> Result<()> {
    let content = namaste.content();
    fs.write(
        &join(dir, namaste.filename),
        &mut Cursor::new(content.into_bytes()),
    )?;
    Ok(())
}

/// Reads the declaration file in `dir` and verifies its contents are exactly `<dvalue>\n`
pub fn validate(fs: &Arc<dyn Vfs>, dir: &str, namaste: Namaste) -> Result<()> {
    let mut bytes = Vec::new();
    fs.read(&join(dir, namaste.filename), &mut bytes)?;

    if bytes != namaste.content().as_bytes() {
        return Err(OcflError::Validation {
            code: "E007".to_string(),
            message: format!(
                "Conformance declaration '{}' must contain '{}\\n'",
                namaste.filename, namaste.dvalue
            ),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocfl::vfs::{DirEntry, MemFs, Vfs};
    use std::sync::Arc;

    fn file(name: &str) -> DirEntry {
        DirEntry {
            name: name.to_string(),
            is_dir: false,
        }
    }

    #[test]
    fn parse_known_declarations() {
        let decl = parse_declaration("0=ocfl_object_1.1").unwrap();
        assert_eq!(DeclarationLevel::Object, decl.level);
        assert_eq!(SpecVersion::Ocfl1_1, decl.spec);

        let decl = parse_declaration("0=ocfl_1.0").unwrap();
        assert_eq!(DeclarationLevel::StorageRoot, decl.level);
        assert_eq!(SpecVersion::Ocfl1_0, decl.spec);

        assert_eq!(None, parse_declaration("0=ocfl_2.0"));
        assert_eq!(None, parse_declaration("inventory.json"));
        assert_eq!(None, parse_declaration("0=bagit_1.0"));
    }

    #[test]
    fn find_single_declaration() {
        let entries = vec![
            file("inventory.json"),
            file("0=ocfl_object_1.1"),
            file("inventory.json.sha512"),
        ];
        let decl = find_declaration(&entries, DeclarationLevel::Object).unwrap();
        assert_eq!("0=ocfl_object_1.1", decl.filename);
    }

    #[test]
    fn reject_zero_or_multiple_declarations() {
        assert!(find_declaration(&[file("inventory.json")], DeclarationLevel::Object).is_err());

        let entries = vec![file("0=ocfl_object_1.0"), file("0=ocfl_object_1.1")];
        assert!(find_declaration(&entries, DeclarationLevel::Object).is_err());
    }

    #[test]
    fn write_then_validate_round_trips() {
        let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
        let namaste = SpecVersion::Ocfl1_1.object_namaste();

        write(&fs, "obj", namaste).unwrap();

        let mut bytes = Vec::new();
        fs.read("obj/0=ocfl_object_1.1", &mut bytes).unwrap();
        assert_eq!(b"ocfl_object_1.1\n".to_vec(), bytes);

        validate(&fs, "obj", namaste).unwrap();
    }

    #[test]
    fn validate_rejects_bad_contents() {
        let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
        let namaste = SpecVersion::Ocfl1_1.object_namaste();

        fs.write(
            "obj/0=ocfl_object_1.1",
            &mut std::io::Cursor::new(b"ocfl_object_1.0\n".to_vec()),
        )
        .unwrap();

        assert!(validate(&fs, "obj", namaste).is_err());
    }
}

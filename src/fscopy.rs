//! Filtered copies between a scraper repository and a staging tree.
//!
//! The build pipeline splits a repository in two: dependency manifests go
//! into the build-time layer, everything else into the run-time layer. Both
//! halves are produced by [`copy_filtered`] with complementary predicates, so
//! together they cover every top-level entry exactly once.

use std::fs;
use std::io;
use std::path::Path;

/// Copies every top-level entry of `source` whose name satisfies `predicate`
/// into `dest`, recursing into directories and recreating symlinks.
pub fn copy_filtered(
    source: &Path,
    dest: &Path,
    predicate: impl Fn(&str) -> bool,
) -> io::Result<()> {
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let name = entry.file_name();
        if predicate(&name.to_string_lossy()) {
            copy_entry(&entry.path(), &dest.join(&name))?;
        }
    }
    Ok(())
}

/// Copies everything under `source` into `dest`.
pub fn copy_dir_contents(source: &Path, dest: &Path) -> io::Result<()> {
    copy_filtered(source, dest, |_| true)
}

fn copy_entry(src: &Path, dst: &Path) -> io::Result<()> {
    let file_type = fs::symlink_metadata(src)?.file_type();
    if file_type.is_symlink() {
        #[cfg(unix)]
        {
            let target = fs::read_link(src)?;
            std::os::unix::fs::symlink(target, dst)?;
        }
        #[cfg(not(unix))]
        {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("cannot recreate symlink {} on this platform", src.display()),
            ));
        }
    } else if file_type.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_entry(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        fs::copy(src, dst)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::is_config_file;
    use std::collections::BTreeSet;

    #[test]
    fn copies_a_file_in_the_root() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::write(source.path().join("foo.txt"), "Hello").unwrap();

        copy_dir_contents(source.path(), dest.path()).unwrap();
        assert_eq!(fs::read_to_string(dest.path().join("foo.txt")).unwrap(), "Hello");
    }

    #[test]
    fn copies_a_directory_and_its_contents() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::create_dir(source.path().join("foo")).unwrap();
        fs::write(source.path().join("foo/foo.txt"), "Hello").unwrap();

        copy_dir_contents(source.path(), dest.path()).unwrap();
        assert_eq!(
            fs::read_to_string(dest.path().join("foo/foo.txt")).unwrap(),
            "Hello"
        );
    }

    #[test]
    fn copies_dotfiles() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::write(source.path().join(".foo.txt"), "Hello").unwrap();

        copy_dir_contents(source.path(), dest.path()).unwrap();
        assert_eq!(
            fs::read_to_string(dest.path().join(".foo.txt")).unwrap(),
            "Hello"
        );
    }

    #[cfg(unix)]
    #[test]
    fn recreates_symlinks() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::write(source.path().join("real"), "x").unwrap();
        std::os::unix::fs::symlink("real", source.path().join("alias")).unwrap();

        copy_dir_contents(source.path(), dest.path()).unwrap();
        assert_eq!(
            fs::read_link(dest.path().join("alias")).unwrap(),
            Path::new("real")
        );
    }

    #[test]
    fn complementary_predicates_partition_the_source() {
        let source = tempfile::tempdir().unwrap();
        fs::write(source.path().join("Gemfile"), "gems").unwrap();
        fs::write(source.path().join("Procfile"), "scraper: ruby scraper.rb").unwrap();
        fs::write(source.path().join("scraper.rb"), "code").unwrap();
        fs::create_dir(source.path().join("lib")).unwrap();
        fs::write(source.path().join("lib/util.rb"), "code").unwrap();

        let config_dest = tempfile::tempdir().unwrap();
        let app_dest = tempfile::tempdir().unwrap();
        copy_filtered(source.path(), config_dest.path(), is_config_file).unwrap();
        copy_filtered(source.path(), app_dest.path(), |name| !is_config_file(name)).unwrap();

        let names = |dir: &Path| -> BTreeSet<String> {
            fs::read_dir(dir)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        };
        let config_names = names(config_dest.path());
        let app_names = names(app_dest.path());

        assert_eq!(
            config_names,
            BTreeSet::from(["Gemfile".to_string(), "Procfile".to_string()])
        );
        assert_eq!(
            app_names,
            BTreeSet::from(["scraper.rb".to_string(), "lib".to_string()])
        );
        assert!(config_names.is_disjoint(&app_names));
        assert_eq!(config_names.len() + app_names.len(), 4);
    }
}

//! Archive naming and writing
//!
//! `zip` archives are produced by the external `zip` utility from an explicit
//! file list. `tar` archives are written in-process with fixed metadata
//! (mtime 0, uid/gid 0, mode 0644 or 0755) so identical inputs give identical
//! bytes.

use chrono::{DateTime, TimeZone};
use std::fmt::Display;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tar::{Builder, Header};
use walkdir::WalkDir;

use super::exclude::ExcludeRules;
use super::{ArchiveFormat, PackageError};
use crate::tools::{CommandRunner, Invocation};

/// `<prefix>-<tag>-<YYYYMMDD-HHMM>.<ext>`
pub fn archive_name<Tz>(prefix: &str, tag: &str, format: ArchiveFormat, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!(
        "{}-{}-{}.{}",
        prefix,
        tag,
        now.format("%Y%m%d-%H%M"),
        format.extension()
    )
}

/// Regular files and symlinks under `root` not matched by `exclude`,
/// relative to `root` and sorted
pub fn collect_files(root: &Path, exclude: &ExcludeRules) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter()
        .filter_entry(|e| {
            let rel = e.path().strip_prefix(root).unwrap_or(e.path());
            rel.as_os_str().is_empty() || !exclude.is_excluded(rel)
        });

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_dir() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            files.push(rel.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

/// Drive `zip` from inside `root` with an explicit file list
pub fn write_zip(
    runner: &dyn CommandRunner,
    root: &Path,
    files: &[PathBuf],
    dest: &Path,
) -> Result<(), PackageError> {
    if dest.exists() {
        fs::remove_file(dest).map_err(|source| PackageError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
    }

    let inv = Invocation::new("zip")
        .args(["-q", "-9", "-X", "-y"])
        .arg(dest.to_string_lossy())
        .args(files.iter().map(|f| f.to_string_lossy().to_string()))
        .current_dir(root);

    let output = runner.run(&inv)?;
    if !output.success() {
        return Err(PackageError::ArchiveFailed {
            status: output.describe_status(),
            stderr: output.stderr.trim().to_string(),
        });
    }
    if !dest.is_file() {
        return Err(PackageError::ArchiveFailed {
            status: output.describe_status(),
            stderr: format!("{} was not created", dest.display()),
        });
    }
    Ok(())
}

/// Write a deterministic tar of `files` (relative to `root`) to `dest`
pub fn write_tar(root: &Path, files: &[PathBuf], dest: &Path) -> io::Result<()> {
    let mut builder = Builder::new(File::create(dest)?);

    for rel in files {
        let full = root.join(rel);
        let meta = fs::symlink_metadata(&full)?;

        let mut header = Header::new_gnu();
        header.set_path(rel)?;
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        if meta.file_type().is_symlink() {
            header.set_size(0);
            header.set_mode(0o777);
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_link_name(fs::read_link(&full)?)?;
            header.set_cksum();
            builder.append(&header, io::empty())?;
        } else {
            let contents = fs::read(&full)?;
            header.set_size(contents.len() as u64);
            header.set_mode(if is_executable(&full) { 0o755 } else { 0o644 });
            header.set_cksum();
            builder.append(&header, contents.as_slice())?;
        }
    }

    builder.into_inner()?;
    Ok(())
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = fs::metadata(path) {
            return metadata.permissions().mode() & 0o111 != 0;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{CommandOutput, MockRunner};
    use chrono::{Duration, Utc};

    #[test]
    fn test_names_one_minute_apart_differ_only_in_timestamp() {
        let t1 = Utc.with_ymd_and_hms(2025, 3, 9, 14, 5, 0).unwrap();
        let t2 = t1 + Duration::minutes(1);

        let a = archive_name("kforge", "KSU-SUSFS", ArchiveFormat::Zip, &t1);
        let b = archive_name("kforge", "KSU-SUSFS", ArchiveFormat::Zip, &t2);

        assert_eq!(a, "kforge-KSU-SUSFS-20250309-1405.zip");
        assert_eq!(b, "kforge-KSU-SUSFS-20250309-1406.zip");
        let common = "kforge-KSU-SUSFS-20250309-140".len();
        assert_eq!(a[..common], b[..common]);
        assert_eq!(a[common + 1..], b[common + 1..]);
    }

    #[test]
    fn test_tar_extension() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            archive_name("k", "stock", ArchiveFormat::Tar, &t),
            "k-stock-20250101-0000.tar"
        );
    }

    fn framework() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref").unwrap();
        fs::create_dir_all(root.join("tools")).unwrap();
        fs::write(root.join("tools/ak3-core.sh"), "core").unwrap();
        fs::write(root.join("anykernel.sh"), "props").unwrap();
        fs::write(root.join("README.md"), "docs").unwrap();
        fs::write(root.join("LICENSE"), "gpl").unwrap();
        fs::write(root.join("Image.gz-dtb"), "kernel").unwrap();
        dir
    }

    #[test]
    fn test_collect_files_applies_excludes() {
        let dir = framework();
        let files = collect_files(dir.path(), &ExcludeRules::new().unwrap()).unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("Image.gz-dtb"),
                PathBuf::from("anykernel.sh"),
                PathBuf::from("tools/ak3-core.sh"),
            ]
        );
    }

    #[test]
    fn test_zip_invocation() {
        let dir = framework();
        let files = collect_files(dir.path(), &ExcludeRules::new().unwrap()).unwrap();
        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("out.zip");
        let runner = MockRunner::new();
        runner.on_program("zip", |inv| {
            fs::write(&inv.args[4], "PK").unwrap();
            CommandOutput::ok()
        });

        write_zip(&runner, dir.path(), &files, &dest).unwrap();

        let call = &runner.calls_to("zip")[0];
        assert_eq!(call.cwd.as_deref(), Some(dir.path()));
        assert!(call.has_arg("anykernel.sh"));
        assert!(!call.has_arg("README.md"));
    }

    #[test]
    fn test_zip_failure() {
        let dir = framework();
        let runner = MockRunner::new();
        runner.on_program("zip", |_| CommandOutput::failed(15, "zip error: could not create output file"));

        let err = write_zip(&runner, dir.path(), &[], &dir.path().join("x.zip")).unwrap_err();
        assert!(matches!(err, PackageError::ArchiveFailed { .. }));
    }

    #[test]
    fn test_zip_without_output_is_a_failure() {
        let dir = framework();
        let out = tempfile::tempdir().unwrap();
        let runner = MockRunner::new();

        let err = write_zip(&runner, dir.path(), &[], &out.path().join("x.zip")).unwrap_err();
        assert!(matches!(err, PackageError::ArchiveFailed { ref stderr, .. } if stderr.contains("not created")));
    }

    #[test]
    fn test_tar_is_deterministic() {
        let dir = framework();
        let out = tempfile::tempdir().unwrap();
        let files = collect_files(dir.path(), &ExcludeRules::new().unwrap()).unwrap();

        write_tar(dir.path(), &files, &out.path().join("a.tar")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(dir.path().join("anykernel.sh"), "props").unwrap();
        write_tar(dir.path(), &files, &out.path().join("b.tar")).unwrap();

        let a = fs::read(out.path().join("a.tar")).unwrap();
        let b = fs::read(out.path().join("b.tar")).unwrap();
        assert_eq!(a, b);

        let mut archive = tar::Archive::new(a.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["Image.gz-dtb", "anykernel.sh", "tools/ak3-core.sh"]);
    }
}

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use indicatif::ProgressStyle;
use log::warn;

use crate::error::{Error, Result};

/// 已经写入临时文件、尚未替换目标文件的写入
#[must_use]
pub struct StagedFile {
    tmp: PathBuf,
    path: PathBuf,
}

impl StagedFile {
    /// 写入同目录下的临时文件并落盘，失败时删除临时文件
    pub fn write<F>(path: &Path, write: F) -> Result<Self>
    where
        F: FnOnce(&mut File) -> io::Result<()>,
    {
        let tmp = tmp_path(path);
        let result = File::create(&tmp).and_then(|mut file| {
            write(&mut file)?;
            // 确保数据落盘后再替换
            file.sync_all()
        });
        match result {
            Ok(()) => Ok(Self { tmp, path: path.to_path_buf() }),
            Err(source) => {
                let _ = fs::remove_file(&tmp);
                Err(Error::Write { path: path.to_path_buf(), source })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 用临时文件替换目标文件
    pub fn commit(self) -> Result<()> {
        fs::rename(&self.tmp, &self.path).map_err(|source| {
            let _ = fs::remove_file(&self.tmp);
            Error::Write { path: self.path.clone(), source }
        })
    }

    pub fn discard(self) {
        let _ = fs::remove_file(&self.tmp);
    }
}

/// 先写入同目录下的临时文件，成功后再重命名为目标文件
///
/// 写入失败时删除临时文件，目标文件保持原样。
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    StagedFile::write(path, write)?.commit()
}

/// 成对替换两个文件
///
/// 第一个文件的旧版本先移到备份文件，第二个文件替换失败时恢复，
/// 因此失败后磁盘上仍然是两个旧文件。
pub fn commit_pair(first: StagedFile, second: StagedFile) -> Result<()> {
    let backup = backup_path(first.path());
    let had_old = first.path().exists();
    if had_old {
        if let Err(source) = fs::rename(first.path(), &backup) {
            let path = first.path().to_path_buf();
            first.discard();
            second.discard();
            return Err(Error::Write { path, source });
        }
    }

    let first_path = first.path().to_path_buf();
    let restore = || {
        let restored = if had_old {
            fs::rename(&backup, &first_path)
        } else {
            fs::remove_file(&first_path)
        };
        if let Err(e) = restored {
            warn!("恢复 {} 失败: {}", first_path.display(), e);
        }
    };

    if let Err(e) = first.commit() {
        second.discard();
        restore();
        return Err(e);
    }
    if let Err(e) = second.commit() {
        restore();
        return Err(e);
    }
    if had_old {
        let _ = fs::remove_file(&backup);
    }
    Ok(())
}

/// 以 JSON 格式原子写入
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    stage_json(path, value)?.commit()
}

/// 以 JSON 格式写入临时文件
pub fn stage_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<StagedFile> {
    let data = serde_json::to_vec_pretty(value)?;
    StagedFile::write(path, |file| io::Write::write_all(file, &data))
}

fn tmp_path(path: &Path) -> PathBuf {
    with_suffix(path, ".tmp")
}

fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, ".bak")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|s| s.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {per_sec} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// 将字节数格式化为便于阅读的形式
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024. && unit < UNITS.len() - 1 {
        size /= 1024.;
        unit += 1;
    }
    if unit == 0 { format!("{} B", bytes) } else { format!("{:.2} {}", size, UNITS[unit]) }
}

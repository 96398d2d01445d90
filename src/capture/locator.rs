//! 截图定位 - 在目录中查找最新的匹配文件

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use globset::{GlobBuilder, GlobMatcher};
use tracing::debug;

/// 编译文件名通配符（`*`、`?`、`[...]`），整名匹配且不区分大小写
pub fn glob_matcher(pattern: &str) -> Result<GlobMatcher, globset::Error> {
    let glob = GlobBuilder::new(pattern)
        .case_insensitive(true)
        .literal_separator(true)
        .build()?;
    Ok(glob.compile_matcher())
}

/// 截图定位器
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    dir: PathBuf,
    pattern: String,
    matcher: GlobMatcher,
}

impl ArtifactLocator {
    pub fn new(dir: impl Into<PathBuf>, pattern: &str) -> Result<Self, globset::Error> {
        Ok(Self {
            dir: dir.into(),
            pattern: pattern.to_string(),
            matcher: glob_matcher(pattern)?,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// 文件名是否匹配
    pub fn matches(&self, file_name: &str) -> bool {
        self.matcher.is_match(file_name)
    }

    /// 返回修改时间最新的匹配文件
    ///
    /// 枚举过程中被其他周期删除的文件会被跳过。
    pub fn find_latest(&self) -> io::Result<Option<PathBuf>> {
        let mut latest: Option<(SystemTime, PathBuf)> = None;

        for entry in fs::read_dir(&self.dir)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };

            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !self.matches(name) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

            let newer = latest
                .as_ref()
                .map_or(true, |(best, _)| modified > *best);
            if newer {
                latest = Some((modified, entry.path()));
            }
        }

        Ok(latest.map(|(_, path)| path))
    }
}

/// 删除本地截图；文件已不存在视为成功
///
/// 返回 true 表示本次调用实际删除了文件。
pub fn remove_artifact(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use log::{debug, info, warn};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;
use walkdir::WalkDir;

use crate::collection::{Collection, SharedCollection};
use crate::embedding::{Embedder, Embedding, decode_image, open_image};
use crate::error::{Error, Result};

/// 允许的图片扩展名（小写）
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "tif", "tiff"];
/// 单个上传文件的大小上限：10 MiB
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// 用户上传的文件
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), data: data.into() }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AddFailure {
    pub filename: String,
    pub reason: String,
}

/// 批量添加的结果，部分文件失败不影响其他文件
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct AddReport {
    /// 成功添加的数量
    pub added: usize,
    /// 失败的文件及原因
    pub failed: Vec<AddFailure>,
}

impl AddReport {
    fn fail(&mut self, filename: &str, reason: impl ToString) {
        self.failed.push(AddFailure { filename: filename.to_string(), reason: reason.to_string() });
    }
}

/// 数据集统计信息
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DatasetStats {
    pub total_images: usize,
    /// 总字节数
    pub total_size: u64,
    /// 按扩展名统计的数量
    pub format_counts: BTreeMap<String, usize>,
    /// 已索引的图片数量，索引未就绪时为空
    pub indexed: Option<usize>,
    /// 有图片被删除，需要重建索引
    pub needs_rebuild: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ImageInfo {
    pub filename: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// 分页浏览的一页
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ImagePage {
    pub items: Vec<ImageInfo>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

/// 图片目录管理
///
/// 负责维护磁盘上的图片和图片索引的一致性。文件和索引之间的操作不是原子的：
/// 删除图片不会修改索引，索引中的失效记录会保留到下一次重建。
pub struct DatasetManager {
    images_dir: PathBuf,
    embedder: Option<Arc<dyn Embedder>>,
    collection: Arc<SharedCollection>,
    /// 串行化所有修改操作
    lock: Mutex<()>,
}

impl DatasetManager {
    /// 没有嵌入模型时只能浏览和删除，不能添加或重建
    pub fn new(
        images_dir: impl Into<PathBuf>,
        embedder: Option<Arc<dyn Embedder>>,
        collection: Arc<SharedCollection>,
    ) -> Self {
        Self { images_dir: images_dir.into(), embedder, collection, lock: Mutex::new(()) }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn collection(&self) -> &Arc<SharedCollection> {
        &self.collection
    }

    fn embedder(&self) -> Result<&Arc<dyn Embedder>> {
        self.embedder.as_ref().ok_or_else(|| Error::ResourceMissing {
            what: "嵌入模型",
            path: self.images_dir.clone(),
        })
    }

    /// 批量添加图片
    ///
    /// 单个文件的失败记录在返回值中，只有无法创建目录或无法保存索引时才返回错误。
    pub fn add_images(&self, files: &[UploadedFile]) -> Result<AddReport> {
        let embedder = self.embedder()?;
        fs::create_dir_all(&self.images_dir)
            .map_err(|source| Error::Write { path: self.images_dir.clone(), source })?;

        let _guard = self.lock.lock();
        let mut report = AddReport::default();
        let mut written = vec![];

        for file in files {
            match self.store_and_embed(embedder.as_ref(), file) {
                Ok((path, embedding)) => written.push((file.name.as_str(), path, embedding)),
                Err(e) => {
                    debug!("添加 {} 失败: {}", file.name, e);
                    report.fail(&file.name, e);
                }
            }
        }

        if written.is_empty() {
            return Ok(report);
        }

        // 在副本上追加并保存，成功后再替换，保存失败时回滚所有新写入的文件
        let mut updated = match self.collection.snapshot() {
            Some(collection) => collection,
            None => {
                warn!("图片索引未就绪，创建新的索引");
                Collection::new(embedder.dimension())
            }
        };
        let mut added_paths = vec![];
        for (name, path, embedding) in written {
            match updated.push(name, embedding) {
                Ok(_) => {
                    report.added += 1;
                    added_paths.push(path);
                }
                Err(e) => {
                    remove_quietly(&path);
                    report.fail(name, e);
                }
            }
        }

        if report.added > 0 {
            let mut guard = self.collection.write();
            if let Err(e) = self.collection.persist(&updated) {
                added_paths.iter().for_each(|p| remove_quietly(p));
                return Err(e);
            }
            *guard = Some(updated);
        }

        info!("添加图片完成: 成功 {}，失败 {}", report.added, report.failed.len());
        Ok(report)
    }

    /// 校验、写入并计算向量，写入后的任何失败都会删除刚写入的文件
    fn store_and_embed(
        &self,
        embedder: &dyn Embedder,
        file: &UploadedFile,
    ) -> Result<(PathBuf, Embedding)> {
        let image = validate_upload(file)?;

        let path = self.images_dir.join(&file.name);
        if path.exists() {
            return Err(Error::invalid_input("文件已存在"));
        }

        fs::write(&path, &file.data).map_err(|source| Error::Write { path: path.clone(), source })?;

        match embedder.embed_image(&image) {
            Ok(embedding) => Ok((path, embedding)),
            Err(e) => {
                remove_quietly(&path);
                Err(e)
            }
        }
    }

    /// 删除图片文件
    ///
    /// 索引中的记录不会被删除，检索仍可能返回该文件名，直到重建索引。
    pub fn remove_image(&self, filename: &str) -> Result<()> {
        check_filename(filename)?;
        let _guard = self.lock.lock();

        let path = self.images_dir.join(filename);
        if !path.is_file() {
            return Err(Error::NotFound(filename.to_string()));
        }
        fs::remove_file(&path)?;

        let indexed = self
            .collection
            .read()
            .map(|c| c.metadata().labels().any(|label| label == filename))
            .unwrap_or(false);
        if indexed {
            self.collection.set_needs_rebuild(true);
        }

        info!("已删除图片: {}", filename);
        Ok(())
    }

    /// 重新扫描图片目录并重建索引，返回索引中的图片数量
    pub fn rebuild_index(&self) -> Result<usize> {
        self.rebuild_index_with(|_| {})
    }

    /// 重建索引，每处理一张图片调用一次 `progress`
    pub fn rebuild_index_with<F>(&self, progress: F) -> Result<usize>
    where
        F: Fn(&str) + Sync,
    {
        let embedder = self.embedder()?;
        let _guard = self.lock.lock();

        let files = self.list_images()?;
        info!("开始重建索引，共 {} 张图片", files.len());

        // 新索引构建完成前，检索一直使用旧索引
        let records = files
            .par_iter()
            .map(|(name, _)| {
                let result = open_image(self.images_dir.join(name))
                    .and_then(|image| embedder.embed_image(&image));
                progress(name);
                match result {
                    Ok(embedding) => Some((name.clone(), embedding)),
                    Err(e) => {
                        warn!("跳过无法处理的图片 {}: {}", name, e);
                        None
                    }
                }
            })
            .collect::<Vec<_>>();

        let mut collection = Collection::new(embedder.dimension());
        collection.extend(records.into_iter().flatten())?;
        let count = collection.len();

        self.collection.replace(collection)?;
        self.collection.set_needs_rebuild(false);

        info!("索引重建完成: {} 张图片", count);
        Ok(count)
    }

    /// 数据集统计
    pub fn stats(&self) -> Result<DatasetStats> {
        let files = self.list_images()?;
        let mut format_counts = BTreeMap::new();
        let mut total_size = 0;
        for (name, meta) in &files {
            total_size += meta.len();
            if let Some(ext) = extension(name) {
                *format_counts.entry(ext).or_insert(0) += 1;
            }
        }
        Ok(DatasetStats {
            total_images: files.len(),
            total_size,
            format_counts,
            indexed: self.collection.len(),
            needs_rebuild: self.collection.needs_rebuild(),
        })
    }

    /// 分页列出图片，按修改时间从新到旧排序，页码从 1 开始
    pub fn list_page(&self, page: usize, per_page: usize) -> Result<ImagePage> {
        if page == 0 || per_page == 0 {
            return Err(Error::invalid_input("页码和每页数量必须大于 0"));
        }

        let mut files = self
            .list_images()?
            .into_iter()
            .map(|(filename, meta)| {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                ImageInfo { filename, size: meta.len(), modified: DateTime::<Utc>::from(modified) }
            })
            .collect::<Vec<_>>();
        files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.filename.cmp(&b.filename)));

        let total = files.len();
        // 页码过大时溢出，视为越过末尾
        let skip = (page - 1).checked_mul(per_page).unwrap_or(usize::MAX);
        let items = files.into_iter().skip(skip).take(per_page).collect();
        Ok(ImagePage { items, total, page, per_page, total_pages: total.div_ceil(per_page) })
    }

    /// 获取数据集中一张图片的路径
    pub fn image_path(&self, filename: &str) -> Result<PathBuf> {
        check_filename(filename)?;
        let path = self.images_dir.join(filename);
        if !is_allowed(filename) || !path.is_file() {
            return Err(Error::NotFound(filename.to_string()));
        }
        Ok(path)
    }

    /// 检查索引中是否有已经不存在的文件，如果有则标记为需要重建
    pub fn check_consistency(&self) -> bool {
        let Ok(collection) = self.collection.read() else {
            return false;
        };
        let stale =
            collection.metadata().labels().filter(|l| !self.images_dir.join(l).exists()).count();
        drop(collection);

        if stale > 0 {
            warn!("索引中有 {} 张图片已不存在，建议重建索引", stale);
            self.collection.set_needs_rebuild(true);
        }
        stale > 0
    }

    /// 列出图片目录下所有允许的图片，按文件名排序
    fn list_images(&self) -> Result<Vec<(String, fs::Metadata)>> {
        if !self.images_dir.exists() {
            return Ok(vec![]);
        }
        let mut files = vec![];
        for entry in WalkDir::new(&self.images_dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if is_allowed(&name) {
                files.push((name, entry.metadata().map_err(|e| Error::Io(e.into()))?));
            }
        }
        Ok(files)
    }
}

/// 校验上传的文件：大小、扩展名、能否解码
pub fn validate_upload(file: &UploadedFile) -> Result<DynamicImage> {
    check_filename(&file.name)?;
    if file.data.len() > MAX_FILE_SIZE {
        return Err(Error::invalid_input(format!(
            "文件过大，最大支持 {} MB",
            MAX_FILE_SIZE / 1024 / 1024
        )));
    }
    match extension(&file.name) {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => {}
        Some(ext) => return Err(Error::invalid_input(format!("不支持的文件类型: .{ext}"))),
        None => return Err(Error::invalid_input("文件没有扩展名")),
    }
    decode_image(&file.data)
}

/// 文件名只能是单纯的文件名，不能包含路径
fn check_filename(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.contains(['/', '\\', '\0'])
        && name != "."
        && name != ".."
        && Path::new(name).file_name().is_some_and(|n| n == name);
    if valid { Ok(()) } else { Err(Error::invalid_input(format!("无效的文件名: {name:?}"))) }
}

fn extension(name: &str) -> Option<String> {
    Path::new(name).extension().map(|e| e.to_string_lossy().to_lowercase())
}

fn is_allowed(name: &str) -> bool {
    extension(name).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("删除 {} 失败: {}", path.display(), e);
    }
}

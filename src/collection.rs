use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::embedding::Embedding;
use crate::error::{Error, Result};
use crate::index::{FlatIndex, Neighbor};
use crate::metadata::MetadataStore;
use crate::utils::commit_pair;

/// 一组 (向量, 标签) 记录
///
/// 向量索引和元数据只能通过 [`Collection::push`] 一起追加，
/// 保证第 i 个向量的标签一定是第 i 条元数据。
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    index: FlatIndex,
    metadata: MetadataStore,
}

impl Collection {
    pub fn new(dim: usize) -> Self {
        Self { index: FlatIndex::new(dim), metadata: MetadataStore::new() }
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// 追加一条记录，返回它的位置
    pub fn push(&mut self, label: impl Into<String>, embedding: Embedding) -> Result<u64> {
        self.index.add(std::slice::from_ref(&embedding))?;
        Ok(self.metadata.append(label))
    }

    pub fn extend<I, S>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, Embedding)>,
        S: Into<String>,
    {
        for (label, embedding) in records {
            self.push(label, embedding)?;
        }
        Ok(())
    }

    pub fn label(&self, position: u64) -> Result<&str> {
        self.metadata.get(position)
    }

    pub fn search(&self, query: &Embedding, k: usize) -> Result<Vec<Neighbor>> {
        self.index.search(query, k)
    }

    /// 直接由两部分组成，不检查数量是否一致
    #[cfg(test)]
    pub(crate) fn from_parts(index: FlatIndex, metadata: MetadataStore) -> Self {
        Self { index, metadata }
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// 从索引文件和元数据文件加载，两者数量必须一致
    pub fn open(index_path: impl AsRef<Path>, meta_path: impl AsRef<Path>) -> Result<Self> {
        let index = FlatIndex::load(index_path.as_ref())?;
        let metadata = MetadataStore::load(meta_path.as_ref())?;
        if index.len() != metadata.len() {
            return Err(Error::Corrupt {
                path: meta_path.as_ref().to_path_buf(),
                reason: format!("索引有 {} 条向量，元数据有 {} 条记录", index.len(), metadata.len()),
            });
        }
        Ok(Self { index, metadata })
    }

    /// 两个文件都写入临时文件后再一起替换，失败时磁盘上保留原来的一对文件
    pub fn save(&self, index_path: impl AsRef<Path>, meta_path: impl AsRef<Path>) -> Result<()> {
        let index = self.index.stage(index_path.as_ref())?;
        let metadata = match self.metadata.stage(meta_path.as_ref()) {
            Ok(staged) => staged,
            Err(e) => {
                index.discard();
                return Err(e);
            }
        };
        commit_pair(index, metadata)
    }
}

/// 在检索和数据集管理之间共享的集合
///
/// 检索持有读锁，追加和重建后的替换持有写锁。
/// 内部为 `None` 表示索引尚未就绪，检索会返回 [`Error::ResourceMissing`]。
pub struct SharedCollection {
    name: &'static str,
    index_path: PathBuf,
    meta_path: PathBuf,
    inner: RwLock<Option<Collection>>,
    /// 有文件被删除但还没有重建索引
    needs_rebuild: AtomicBool,
}

impl SharedCollection {
    /// 从磁盘加载，文件不存在或已损坏时进入未就绪状态
    pub fn open(name: &'static str, index_path: PathBuf, meta_path: PathBuf) -> Self {
        let inner = match Collection::open(&index_path, &meta_path) {
            Ok(collection) => {
                info!("{}已加载: {} 条记录", name, collection.len());
                Some(collection)
            }
            Err(e) => {
                warn!("{}加载失败，检索功能不可用: {}", name, e);
                None
            }
        };
        Self::with(name, index_path, meta_path, inner)
    }

    /// 使用内存中的集合创建，不读取磁盘
    pub fn with(
        name: &'static str,
        index_path: PathBuf,
        meta_path: PathBuf,
        inner: Option<Collection>,
    ) -> Self {
        Self {
            name,
            index_path,
            meta_path,
            inner: RwLock::new(inner),
            needs_rebuild: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_ready(&self) -> bool {
        self.inner.read().is_some()
    }

    /// 记录数量，未就绪时返回 None
    pub fn len(&self) -> Option<usize> {
        self.inner.read().as_ref().map(Collection::len)
    }

    /// 获取读锁
    pub fn read(&self) -> Result<MappedRwLockReadGuard<'_, Collection>> {
        RwLockReadGuard::try_map(self.inner.read(), Option::as_ref)
            .map_err(|_| Error::ResourceMissing { what: self.name, path: self.index_path.clone() })
    }

    /// 复制当前集合，用于在副本上修改后整体替换
    pub(crate) fn snapshot(&self) -> Option<Collection> {
        self.inner.read().clone()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Option<Collection>> {
        self.inner.write()
    }

    /// 保存新的集合并替换当前集合，替换前不会有读者看到构建中的数据
    pub fn replace(&self, collection: Collection) -> Result<()> {
        collection.save(&self.index_path, &self.meta_path)?;
        *self.inner.write() = Some(collection);
        Ok(())
    }

    /// 将持有写锁时修改过的集合写回磁盘
    pub(crate) fn persist(&self, collection: &Collection) -> Result<()> {
        collection.save(&self.index_path, &self.meta_path)
    }

    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild.load(Ordering::Acquire)
    }

    pub fn set_needs_rebuild(&self, value: bool) {
        self.needs_rebuild.store(value, Ordering::Release);
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn emb(v: &[f32]) -> Embedding {
        Embedding::new(v.to_vec()).unwrap()
    }

    #[test]
    fn test_push_keeps_alignment() {
        let mut c = Collection::new(2);
        assert_eq!(c.push("a.jpg", emb(&[1., 0.])).unwrap(), 0);
        assert_eq!(c.push("b.jpg", emb(&[0., 1.])).unwrap(), 1);
        // 维度错误时两边都不追加
        assert!(c.push("c.jpg", emb(&[1., 1., 1.])).is_err());
        assert_eq!(c.len(), 2);
        assert_eq!(c.index().len(), c.metadata().len());

        for neighbor in c.search(&emb(&[1., 0.]), 10).unwrap() {
            assert!(c.label(neighbor.position).is_ok());
        }
    }

    #[test]
    fn test_open_rejects_mismatched_files() {
        let dir = TempDir::new().unwrap();
        let (index_path, meta_path) = (dir.path().join("i.index"), dir.path().join("m.json"));

        let mut c = Collection::new(2);
        c.extend([("a.jpg", emb(&[1., 0.])), ("b.jpg", emb(&[0., 1.]))]).unwrap();
        c.save(&index_path, &meta_path).unwrap();
        assert_eq!(Collection::open(&index_path, &meta_path).unwrap(), c);

        let mut meta = MetadataStore::new();
        meta.append("a.jpg");
        meta.save(&meta_path).unwrap();
        assert!(matches!(
            Collection::open(&index_path, &meta_path),
            Err(Error::Corrupt { .. })
        ));
    }

    #[test]
    fn test_failed_save_keeps_previous_files() {
        let dir = TempDir::new().unwrap();
        let (index_path, meta_path) = (dir.path().join("i.index"), dir.path().join("m.json"));

        let mut c = Collection::new(2);
        c.push("a.jpg", emb(&[1., 0.])).unwrap();
        c.save(&index_path, &meta_path).unwrap();
        let saved = c.clone();

        // 元数据的临时文件无法创建
        let blocker = dir.path().join("m.json.tmp");
        fs::create_dir(&blocker).unwrap();
        c.push("b.jpg", emb(&[0., 1.])).unwrap();
        assert!(matches!(c.save(&index_path, &meta_path), Err(Error::Write { .. })));
        assert_eq!(Collection::open(&index_path, &meta_path).unwrap(), saved);

        // 元数据无法替换
        fs::remove_dir(&blocker).unwrap();
        fs::remove_file(&meta_path).unwrap();
        fs::create_dir_all(meta_path.join("sub")).unwrap();
        assert!(matches!(c.save(&index_path, &meta_path), Err(Error::Write { .. })));
        assert_eq!(FlatIndex::load(&index_path).unwrap(), *saved.index());
    }

    #[test]
    fn test_shared_collection_not_ready() {
        let dir = TempDir::new().unwrap();
        let shared = SharedCollection::open(
            "图片索引",
            dir.path().join("image.index"),
            dir.path().join("image_meta.json"),
        );
        assert!(!shared.is_ready());
        assert_eq!(shared.len(), None);
        assert!(matches!(shared.read(), Err(Error::ResourceMissing { .. })));

        let mut c = Collection::new(2);
        c.push("a.jpg", emb(&[1., 0.])).unwrap();
        shared.replace(c).unwrap();
        assert_eq!(shared.len(), Some(1));
        assert!(shared.index_path().exists());
        assert!(shared.meta_path().exists());
    }
}

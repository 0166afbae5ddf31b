// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # FileCache 模块
//!
//! 该模块实现了一个带有时效性验证的文件内容缓存系统。
//! 它结合了 LRU（最近最少使用）淘汰算法与磁盘修改时间巡检，
//! 确保在高并发场景下既能提升访问速度，又能保证数据的最终一致性。
//!
//! ## 并发契约
//! - 缓存级互斥锁只保护 LRU 映射本身，持锁窗口极短，绝不跨越内容流送。
//! - 条目级读写锁保护条目内容：多个读者可以同时流送同一条目，
//!   重载只阻塞该条目的读者，不影响其他条目。
//! - 锁序固定为 缓存 → 条目，持有条目锁时绝不获取缓存锁。

use crate::{
    connection::Connection,
    content::FileContents,
    exception::{Exception, ExceptionKind},
    path::ResourcePath,
    server::Server,
};

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use log::{debug, error};
use lru::LruCache;
use tokio::sync::{Mutex, RwLock};

/// 取当前时间的 UNIX 纳秒时间戳。
fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// 取文件元数据中修改时间的 UNIX 纳秒时间戳。
fn mtime_ns(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// 一个缓存条目：内容、装载时间与新鲜度标志。
///
/// 内容由条目级读写锁保护；时间戳与新鲜度为原子量，巡检任务可以在
/// 不打断读者的情况下翻转新鲜度。
pub struct FileEntry {
    contents: RwLock<FileContents>,
    last_refresh: AtomicU64,
    fresh: AtomicBool,
    generated: bool,
}

impl FileEntry {
    /// 基于已加载的内容构造条目，装载时间取当前时刻。
    pub fn new(contents: FileContents, generated: bool) -> Self {
        Self {
            contents: RwLock::new(contents),
            last_refresh: AtomicU64::new(now_ns()),
            fresh: AtomicBool::new(true),
            generated,
        }
    }

    /// 条目是否仍然新鲜
    pub fn is_fresh(&self) -> bool {
        self.fresh.load(Ordering::Acquire)
    }

    /// 标记条目过期（由巡检任务调用）
    pub fn set_unfresh(&self) {
        self.fresh.store(false, Ordering::Release);
    }

    /// 标记条目新鲜（重载完成后调用）
    pub fn set_fresh(&self) {
        self.fresh.store(true, Ordering::Release);
    }

    /// 上次装载时间（UNIX 纳秒）
    pub fn last_refresh(&self) -> u64 {
        self.last_refresh.load(Ordering::Acquire)
    }

    /// 把装载时间刷到当前时刻
    pub fn update_refresh_time(&self) {
        self.last_refresh.store(now_ns(), Ordering::Release);
    }

    /// 是否为生成条目（巡检任务跳过）
    pub fn generated(&self) -> bool {
        self.generated
    }

    #[cfg(test)]
    fn force_refresh_time(&self, ns: u64) {
        self.last_refresh.store(ns, Ordering::Release);
    }
}

/// 基于 LRU 策略的文件内容缓存。
///
/// 以绝对路径为键。当缓存达到容量上限时自动淘汰最久未访问的条目。
pub struct FileCache {
    map: Mutex<LruCache<String, Arc<FileEntry>>>,
}

impl FileCache {
    /// 根据指定的容量构造一个新的 `FileCache` 实例。
    ///
    /// # Panics
    ///
    /// 如果传入的 `capacity` 为 0，该函数会触发 Panic。
    pub fn from_capacity(capacity: usize) -> Self {
        if capacity == 0 {
            panic!("FileCache的容量不能为0。如需自动选择容量，请在调用处处理，而不是传入0");
        }
        Self {
            map: Mutex::new(LruCache::new(NonZeroUsize::new(capacity).unwrap())),
        }
    }

    /// 查询条目并刷新其访问顺序。
    pub async fn lookup(&self, key: &str) -> Option<Arc<FileEntry>> {
        let mut map = self.map.lock().await;
        map.get(key).cloned()
    }

    /// 插入条目。
    ///
    /// 竞争加载同一条目时以先到者为准：键已存在则保留已有条目，
    /// 丢弃本次重复加载的内容，返回生效的那一个。
    pub async fn insert(&self, key: String, entry: FileEntry) -> Arc<FileEntry> {
        let mut map = self.map.lock().await;
        if let Some(existing) = map.get(&key) {
            return existing.clone();
        }
        let entry = Arc::new(entry);
        map.put(key, entry.clone());
        entry
    }

    /// 移除条目。
    pub async fn remove(&self, key: &str) {
        let mut map = self.map.lock().await;
        map.pop(key);
    }

    /// 插入一个启动期生成的虚拟文件条目（`caps.txt` 之类）。
    pub async fn insert_generated(&self, key: String, bytes: Bytes) {
        self.insert(key, FileEntry::new(FileContents::Generated(bytes), true))
            .await;
    }

    /// 当前缓存条目数。
    pub async fn len(&self) -> usize {
        self.map.lock().await.len()
    }

    /// 从缓存取出并流送一个文件，未命中时从磁盘加载后插入。
    pub async fn fetch(
        &self,
        server: &Server,
        conn: &mut Connection,
        path: &ResourcePath,
    ) -> Result<(), Exception> {
        let abs = path.absolute();
        let entry = match self.lookup(&abs).await {
            Some(entry) => {
                debug!("缓存命中: {}", abs);
                entry
            }
            None => {
                debug!("缓存未命中，从磁盘加载: {}", abs);
                let contents = FileContents::load(server, path).await?;
                self.insert(abs, FileEntry::new(contents, false)).await
            }
        };
        self.serve_entry(server, conn, entry, path).await
    }

    /// 在条目读锁下把内容流送给客户端，过期条目先在写锁下重载。
    ///
    /// 重载路径上会复查大小政策：文件长大到超过缓存上限时该条目退出
    /// 缓存，本次请求改为直接流式下发。
    pub async fn serve_entry(
        &self,
        server: &Server,
        conn: &mut Connection,
        entry: Arc<FileEntry>,
        path: &ResourcePath,
    ) -> Result<(), Exception> {
        let guard = entry.contents.read().await;

        let guard = if entry.is_fresh() || entry.generated() {
            guard
        } else {
            // 升级为写锁重载。先放读锁再拿写锁，重载完成后降级回读锁。
            drop(guard);
            let mut wguard = entry.contents.write().await;

            // 双重检查：等待写锁期间可能已有其他任务完成重载
            if !entry.is_fresh() {
                let abs = path.absolute();

                let meta = match tokio::fs::metadata(&abs).await {
                    Ok(meta) => meta,
                    Err(e) => {
                        drop(wguard);
                        self.remove(&abs).await;
                        return Err(Exception::wrap(ExceptionKind::FileOpen, e));
                    }
                };

                if meta.len() > server.config().file_size_max() {
                    drop(wguard);
                    self.remove(&abs).await;
                    debug!("文件已超出缓存上限，退出缓存并直接流送: {}", abs);
                    let mut fd = tokio::fs::File::open(&abs)
                        .await
                        .map_err(|e| Exception::wrap(ExceptionKind::FileOpen, e))?;
                    return conn
                        .write_from(&mut fd, server.config().file_read_buf())
                        .await;
                }

                wguard.clear();
                match FileContents::load(server, path).await {
                    Ok(contents) => {
                        *wguard = contents;
                        entry.update_refresh_time();
                        entry.set_fresh();
                        debug!("条目重载完成: {}", abs);
                    }
                    Err(e) => {
                        drop(wguard);
                        self.remove(&abs).await;
                        return Err(e);
                    }
                }
            }

            wguard.downgrade()
        };

        guard.write_to_client(server, conn).await
    }

    /// 新鲜度巡检任务主循环：按配置间隔睡眠后执行一轮巡检。
    pub async fn monitor(&self, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            self.sweep().await;
        }
    }

    /// 执行一轮新鲜度巡检。
    ///
    /// 对每个非生成条目 stat 其绝对路径：stat 失败的条目直接移除；
    /// 磁盘修改时间晚于装载时间的条目清除新鲜度标志，实际重载推迟到
    /// 下一次请求命中时。
    pub async fn sweep(&self) {
        let mut map = self.map.lock().await;

        let mut missing: Vec<String> = Vec::new();
        for (key, entry) in map.iter() {
            if entry.generated() {
                continue;
            }
            match tokio::fs::metadata(key).await {
                Err(_) => {
                    error!("缓存条目stat失败，将移除: {}", key);
                    missing.push(key.clone());
                }
                Ok(meta) => {
                    if entry.is_fresh() && mtime_ns(&meta) > entry.last_refresh() {
                        debug!("缓存条目已过期: {}", key);
                        entry.set_unfresh();
                    }
                }
            }
        }

        for key in missing {
            map.pop(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with(text: &str) -> FileEntry {
        FileEntry::new(FileContents::Regular(Bytes::from(text.to_string())), false)
    }

    #[test]
    #[should_panic(expected = "FileCache的容量不能为0")]
    fn test_cache_zero_capacity_panics() {
        FileCache::from_capacity(0);
    }

    #[tokio::test]
    async fn test_cache_insert_and_lookup() {
        let cache = FileCache::from_capacity(3);
        cache.insert("/srv/a.txt".to_string(), entry_with("a")).await;
        assert_eq!(cache.len().await, 1);
        assert!(cache.lookup("/srv/a.txt").await.is_some());
        assert!(cache.lookup("/srv/b.txt").await.is_none());
    }

    #[tokio::test]
    async fn test_cache_lru_eviction() {
        let cache = FileCache::from_capacity(2);
        cache.insert("/srv/1".to_string(), entry_with("1")).await;
        cache.insert("/srv/2".to_string(), entry_with("2")).await;

        // 访问 /srv/1 使其变为最近使用
        cache.lookup("/srv/1").await;

        cache.insert("/srv/3".to_string(), entry_with("3")).await;
        assert_eq!(cache.len().await, 2);
        assert!(cache.lookup("/srv/2").await.is_none());
        assert!(cache.lookup("/srv/1").await.is_some());
        assert!(cache.lookup("/srv/3").await.is_some());
    }

    #[tokio::test]
    async fn test_cache_never_exceeds_capacity() {
        let cache = FileCache::from_capacity(5);
        for i in 0..50 {
            cache
                .insert(format!("/srv/file{}", i), entry_with("x"))
                .await;
            assert!(cache.len().await <= 5);
        }
    }

    #[tokio::test]
    async fn test_insert_race_keeps_first_entry() {
        let cache = FileCache::from_capacity(3);
        let first = cache.insert("/srv/a".to_string(), entry_with("first")).await;
        let second = cache.insert("/srv/a".to_string(), entry_with("second")).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_cache_remove() {
        let cache = FileCache::from_capacity(3);
        cache.insert("/srv/a".to_string(), entry_with("a")).await;
        cache.remove("/srv/a").await;
        assert!(cache.lookup("/srv/a").await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_missing_files() {
        let cache = FileCache::from_capacity(3);
        cache
            .insert("/definitely/not/on/disk".to_string(), entry_with("x"))
            .await;
        cache.sweep().await;
        assert!(cache.lookup("/definitely/not/on/disk").await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_skips_generated_entries() {
        let cache = FileCache::from_capacity(3);
        cache
            .insert_generated("/srv/caps.txt".to_string(), Bytes::from("CAPS"))
            .await;
        cache.sweep().await;
        let entry = cache.lookup("/srv/caps.txt").await.unwrap();
        assert!(entry.is_fresh());
    }

    #[tokio::test]
    async fn test_sweep_marks_stale_entries_unfresh() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.txt");
        std::fs::write(&file_path, "contents").unwrap();
        let key = file_path.to_str().unwrap().to_string();

        let cache = FileCache::from_capacity(3);
        let entry = cache.insert(key.clone(), entry_with("contents")).await;

        // 把装载时间拨回远古，磁盘修改时间必然晚于它
        entry.force_refresh_time(1);
        cache.sweep().await;

        let entry = cache.lookup(&key).await.unwrap();
        assert!(!entry.is_fresh());
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_entries_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.txt");
        std::fs::write(&file_path, "contents").unwrap();
        let key = file_path.to_str().unwrap().to_string();

        let cache = FileCache::from_capacity(3);
        let entry = cache.insert(key.clone(), entry_with("contents")).await;

        // 装载时间拨到远未来，巡检不应误判过期
        entry.force_refresh_time(u64::MAX);
        cache.sweep().await;

        assert!(cache.lookup(&key).await.unwrap().is_fresh());
    }
}

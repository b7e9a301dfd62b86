// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 缓存模块
//!
//! - `FileCache`：静态文件内容的 LRU 缓存，以修改时间校验有效性。
//! - `RouteCache`：动态路由匹配结果的 LRU 缓存，以 `(scheme, path)` 为键。
//!   路由表任何变更都会整体清空该缓存。

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use lru::LruCache;

use crate::route::{Route, Values};

#[derive(Clone)]
struct CacheEntry {
    content: Bytes,
    modified_time: SystemTime,
}

pub struct FileCache {
    /// 容量为 0 时禁用缓存
    cache: Option<LruCache<String, CacheEntry>>,
}

impl FileCache {
    // 根据容量构造，0 表示不缓存
    pub fn from_capacity(capacity: usize) -> Self {
        Self {
            cache: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    // 放入
    pub fn push(&mut self, filename: &str, bytes: Bytes, modified_time: SystemTime) {
        if let Some(cache) = self.cache.as_mut() {
            let entry = CacheEntry {
                content: bytes,
                modified_time,
            };
            cache.put(filename.to_string(), entry);
        }
    }

    // 查询有效缓存，修改时间不一致视为失效
    pub fn find(&mut self, filename: &str, current_modified_time: SystemTime) -> Option<Bytes> {
        let entry = self.cache.as_mut()?.get(filename)?;
        if entry.modified_time == current_modified_time {
            Some(entry.content.clone())
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.cap().get())
    }
}

/// 一次动态路由匹配的结果
#[derive(Clone)]
pub struct CachedMatch {
    pub route: Arc<Route>,
    pub vars: Values,
}

pub struct RouteCache {
    cache: Option<LruCache<(String, String), CachedMatch>>,
}

impl RouteCache {
    pub fn from_capacity(capacity: usize) -> Self {
        Self {
            cache: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    pub fn find(&mut self, scheme: &str, path: &str) -> Option<CachedMatch> {
        let cache = self.cache.as_mut()?;
        cache.get(&(scheme.to_string(), path.to_string())).cloned()
    }

    pub fn push(&mut self, scheme: &str, path: &str, matched: CachedMatch) {
        if let Some(cache) = self.cache.as_mut() {
            cache.put((scheme.to_string(), path.to_string()), matched);
        }
    }

    pub fn clear(&mut self) {
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

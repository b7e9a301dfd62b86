// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由表
//!
//! 两级存储：静态路由按路径精确查找，动态路由按注册顺序逐个尝试（先注册者优先）。
//! 动态匹配结果可缓存，路由表的任何变更都会整体清空缓存。
//!
//! 锁顺序固定为“路由表 → 缓存”：写入缓存时始终持有路由表读锁，
//! 因此删除路由与写入过期结果不会交错。

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use log::{debug, info, warn};

use crate::{
    cache::{CachedMatch, RouteCache},
    exception::Exception,
    handler::HandlerFactory,
    route::{normalize_static, Route, Values},
};

#[derive(Default)]
struct RouteTable {
    statics: HashMap<String, Arc<Route>>,
    dynamics: Vec<Arc<Route>>,
}

pub struct Router {
    table: RwLock<RouteTable>,
    cache: Mutex<RouteCache>,
    enable_cache: bool,
    /// 扩展名（含前导 `.`，小写）→ 引用计数
    static_types: RwLock<HashMap<String, usize>>,
    /// 目录名（不含 `/`）→ 引用计数
    static_dirs: RwLock<HashMap<String, usize>>,
    prefix: RwLock<String>,
}

impl Router {
    pub fn new(enable_cache: bool, cache_size: usize) -> Self {
        Self {
            table: RwLock::new(RouteTable::default()),
            cache: Mutex::new(RouteCache::from_capacity(cache_size)),
            enable_cache,
            static_types: RwLock::new(HashMap::new()),
            static_dirs: RwLock::new(HashMap::new()),
            prefix: RwLock::new(String::new()),
        }
    }

    /// 注册路由。静态路由覆盖同路径的旧条目，动态路由追加到列表末尾。
    pub fn add_route(
        &self,
        pattern: &str,
        factory: HandlerFactory,
        schemes: Option<&[&str]>,
    ) -> Result<Arc<Route>, Exception> {
        let route = Arc::new(Route::compile(pattern, factory, schemes)?);
        let mut table = self.write_table();
        if route.is_static() {
            if table
                .statics
                .insert(route.key().to_string(), Arc::clone(&route))
                .is_some()
            {
                warn!("静态路由{}被覆盖", route.pattern());
            }
        } else {
            table.dynamics.push(Arc::clone(&route));
        }
        self.lock_cache().clear();
        info!("已注册路由：{}", route.pattern());
        Ok(route)
    }

    /// 按原始模式删除路由，不存在时什么也不做
    pub fn remove_route(&self, pattern: &str) {
        let pattern = if pattern.starts_with('/') {
            pattern.to_string()
        } else {
            format!("/{}", pattern)
        };
        let mut table = self.write_table();
        if let Some(i) = table.dynamics.iter().position(|r| r.pattern() == pattern) {
            table.dynamics.remove(i);
            info!("已删除动态路由：{}", pattern);
        } else if table.statics.remove(&normalize_static(&pattern)).is_some() {
            info!("已删除静态路由：{}", pattern);
        }
        self.lock_cache().clear();
    }

    /// 为路径（已去除前缀）查找路由。
    ///
    /// 依次尝试静态表、匹配缓存、动态列表；动态匹配成功时写入缓存。
    pub fn resolve(&self, path: &str, scheme: &str) -> Option<(Arc<Route>, Values)> {
        let table = self.read_table();

        if let Some(route) = table.statics.get(&normalize_static(path)) {
            if route.accepts_scheme(scheme) {
                return Some((Arc::clone(route), Values::new()));
            }
        }

        if self.enable_cache {
            if let Some(hit) = self.lock_cache().find(scheme, path) {
                debug!("路由缓存命中：{} {}", scheme, path);
                return Some((hit.route, hit.vars));
            }
        }

        for route in table.dynamics.iter() {
            if !route.accepts_scheme(scheme) {
                continue;
            }
            if let Some(vars) = route.match_path(path) {
                if self.enable_cache {
                    self.lock_cache().push(
                        scheme,
                        path,
                        CachedMatch {
                            route: Arc::clone(route),
                            vars: vars.clone(),
                        },
                    );
                }
                return Some((Arc::clone(route), vars));
            }
        }
        None
    }

    pub fn cached_len(&self) -> usize {
        self.lock_cache().len()
    }

    // --- 静态文件规则 ---

    pub fn add_static_file_type(&self, ext: &str) {
        let ext = normalize_ext(ext);
        *self.write_map(&self.static_types).entry(ext).or_insert(0) += 1;
    }

    /// 引用计数归零时才真正删除
    pub fn remove_static_file_type(&self, ext: &str) {
        release(&mut self.write_map(&self.static_types), &normalize_ext(ext));
    }

    pub fn add_static_file_dir(&self, dir: &str) {
        let dir = dir.trim_matches('/').to_string();
        *self.write_map(&self.static_dirs).entry(dir).or_insert(0) += 1;
    }

    pub fn remove_static_file_dir(&self, dir: &str) {
        release(&mut self.write_map(&self.static_dirs), dir.trim_matches('/'));
    }

    /// 路径是否命中静态文件扩展名或静态目录
    pub fn is_static_file(&self, path: &str) -> bool {
        let last = path.rsplit('/').next().unwrap_or("");
        if let Some(dot) = last.rfind('.') {
            let ext = last[dot..].to_ascii_lowercase();
            if self.read_map(&self.static_types).contains_key(&ext) {
                return true;
            }
        }
        let rest = path.trim_start_matches('/');
        match rest.find('/') {
            Some(i) if i > 0 => self.read_map(&self.static_dirs).contains_key(&rest[..i]),
            _ => false,
        }
    }

    // --- 路径前缀 ---

    /// 规范化为 `/x` 形式；空串或 `/` 表示取消前缀
    pub fn set_prefix(&self, prefix: &str) {
        let trimmed = prefix.trim().trim_end_matches('/');
        let normalized = if trimmed.is_empty() {
            String::new()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        };
        match self.prefix.write() {
            Ok(mut p) => *p = normalized,
            Err(poisoned) => *poisoned.into_inner() = normalized,
        }
    }

    pub fn prefix(&self) -> String {
        match self.prefix.read() {
            Ok(p) => p.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 去掉前缀后的路径；不在前缀之下时返回 `None`
    pub fn strip_prefix(&self, path: &str) -> Option<String> {
        let prefix = self.prefix();
        if prefix.is_empty() {
            return Some(path.to_string());
        }
        let rest = path.strip_prefix(prefix.as_str())?;
        if rest.is_empty() {
            Some("/".to_string())
        } else if rest.starts_with('/') {
            Some(rest.to_string())
        } else {
            None
        }
    }

    // --- 锁辅助：锁被污染时恢复并继续 ---

    fn read_table(&self) -> RwLockReadGuard<'_, RouteTable> {
        match self.table.read() {
            Ok(t) => t,
            Err(poisoned) => {
                warn!("路由表锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, RouteTable> {
        match self.table.write() {
            Ok(t) => t,
            Err(poisoned) => {
                warn!("路由表锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, RouteCache> {
        match self.cache.lock() {
            Ok(c) => c,
            Err(poisoned) => {
                warn!("路由缓存锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    fn read_map<'a>(
        &self,
        map: &'a RwLock<HashMap<String, usize>>,
    ) -> RwLockReadGuard<'a, HashMap<String, usize>> {
        match map.read() {
            Ok(m) => m,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_map<'a>(
        &self,
        map: &'a RwLock<HashMap<String, usize>>,
    ) -> RwLockWriteGuard<'a, HashMap<String, usize>> {
        match map.write() {
            Ok(m) => m,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn normalize_ext(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

fn release(map: &mut HashMap<String, usize>, key: &str) {
    if let Some(count) = map.get_mut(key) {
        *count -= 1;
        if *count == 0 {
            map.remove(key);
        }
    }
}

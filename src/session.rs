// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 会话管理
//!
//! - `SessionStorage`：可替换的会话存储后端接口；
//! - `MemorySessionStorage`：默认的内存存储，读取时刷新过期时间；
//! - `SessionManager`：首次使用时初始化存储，并在当前 tokio 运行时上启动周期清理任务，
//!   关闭或析构时中止该任务；
//! - `Session`：请求内的会话状态，会话 ID 与数据都是惰性获取的。

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, RwLock},
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use tokio::{runtime::Handle, task::JoinHandle};

pub type SessionData = HashMap<String, String>;

/// 会话存储后端。缺失的会话一律视为空会话，而不是错误。
#[cfg_attr(test, mockall::automock)]
pub trait SessionStorage: Send + Sync {
    /// 首次使用前调用一次
    fn init(&self, ttl: Duration);
    fn create_session_id(&self) -> String;
    /// 读取会话数据，并刷新其过期时间
    fn get(&self, id: &str) -> SessionData;
    fn set(&self, id: &str, data: SessionData);
    fn delete(&self, id: &str);
    /// 清除所有已过期的会话
    fn sweep(&self);
}

struct Entry {
    expires: Instant,
    data: SessionData,
}

pub struct MemorySessionStorage {
    ttl: Mutex<Duration>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for MemorySessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self {
            ttl: Mutex::new(Duration::from_secs(900)),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        match self.entries.lock() {
            Ok(e) => e,
            Err(poisoned) => {
                warn!("会话存储锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    fn ttl(&self) -> Duration {
        match self.ttl.lock() {
            Ok(t) => *t,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStorage for MemorySessionStorage {
    fn init(&self, ttl: Duration) {
        match self.ttl.lock() {
            Ok(mut t) => *t = ttl,
            Err(poisoned) => *poisoned.into_inner() = ttl,
        }
    }

    fn create_session_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    fn get(&self, id: &str) -> SessionData {
        let ttl = self.ttl();
        let mut entries = self.entries();
        match entries.get_mut(id) {
            Some(entry) if entry.expires > Instant::now() => {
                entry.expires = Instant::now() + ttl;
                entry.data.clone()
            }
            _ => SessionData::new(),
        }
    }

    fn set(&self, id: &str, data: SessionData) {
        let expires = Instant::now() + self.ttl();
        self.entries()
            .insert(id.to_string(), Entry { expires, data });
    }

    fn delete(&self, id: &str) {
        self.entries().remove(id);
    }

    fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| e.expires > now);
        if entries.len() < before {
            debug!("会话清理：移除{}个过期会话", before - entries.len());
        }
    }
}

/// 已初始化的存储对应的清理任务；不在 tokio 运行时中初始化时没有任务
struct Gc {
    task: Option<JoinHandle<()>>,
}

pub struct SessionManager {
    storage: RwLock<Arc<dyn SessionStorage>>,
    ttl: Duration,
    gc_interval: Duration,
    /// `None` 表示尚未初始化
    gc: Mutex<Option<Gc>>,
}

impl SessionManager {
    pub fn new(ttl: Duration, gc_interval: Duration) -> Self {
        Self {
            storage: RwLock::new(Arc::new(MemorySessionStorage::new())),
            ttl,
            gc_interval,
            gc: Mutex::new(None),
        }
    }

    /// 替换存储后端。旧后端的清理任务会被中止，新后端在下次使用时初始化。
    pub fn register_storage(&self, storage: Arc<dyn SessionStorage>) {
        let mut gc = self.lock_gc();
        if let Some(old) = gc.take() {
            stop_gc(old);
        }
        match self.storage.write() {
            Ok(mut s) => *s = storage,
            Err(poisoned) => *poisoned.into_inner() = storage,
        }
        info!("会话存储后端已替换");
    }

    /// 返回已初始化的存储后端，首次调用时启动清理任务
    fn storage(&self) -> Arc<dyn SessionStorage> {
        let mut gc = self.lock_gc();
        let storage = match self.storage.read() {
            Ok(s) => Arc::clone(&s),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        };
        if gc.is_none() {
            storage.init(self.ttl);
            *gc = Some(spawn_gc(Arc::clone(&storage), self.gc_interval));
            debug!("会话存储已初始化，清理间隔{:?}", self.gc_interval);
        }
        storage
    }

    pub fn is_started(&self) -> bool {
        self.lock_gc().is_some()
    }

    pub fn create_session_id(&self) -> String {
        self.storage().create_session_id()
    }

    pub fn load(&self, id: &str) -> SessionData {
        self.storage().get(id)
    }

    pub fn save(&self, id: &str, data: SessionData) {
        self.storage().set(id, data);
    }

    pub fn destroy(&self, id: &str) {
        self.storage().delete(id);
    }

    /// 中止后台清理任务
    pub fn shutdown(&self) {
        if let Some(gc) = self.lock_gc().take() {
            stop_gc(gc);
        }
    }

    fn lock_gc(&self) -> MutexGuard<'_, Option<Gc>> {
        match self.gc.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_gc(storage: Arc<dyn SessionStorage>, interval: Duration) -> Gc {
    let Ok(runtime) = Handle::try_current() else {
        warn!("当前线程不在 tokio 运行时中，会话不会被周期清理");
        return Gc { task: None };
    };
    let interval = interval.max(Duration::from_millis(10));
    let task = runtime.spawn(async move {
        let mut timer = tokio::time::interval(interval);
        // 第一次 tick 立即返回
        timer.tick().await;
        loop {
            timer.tick().await;
            storage.sweep();
        }
    });
    Gc { task: Some(task) }
}

fn stop_gc(gc: Gc) {
    if let Some(task) = gc.task {
        task.abort();
        debug!("会话清理任务已中止");
    }
}

/// 请求内的会话状态
#[derive(Debug, Default)]
pub struct Session {
    /// 来自已验证的 Cookie，或首次访问时新建
    id: Option<String>,
    /// 首次读取时从存储加载
    data: Option<SessionData>,
}

impl Session {
    pub fn new(id: Option<String>) -> Self {
        Self { id, data: None }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub(crate) fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    pub(crate) fn data_mut(&mut self, manager: &SessionManager, id: &str) -> &mut SessionData {
        self.data.get_or_insert_with(|| manager.load(id))
    }
}

// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 应用
//!
//! `App` 持有一个应用的全部共享状态（配置、路由表、钩子、会话、状态页面、文件缓存、
//! 全局模板变量），并对外提供注册接口。`App` 可以廉价克隆，所有克隆共享同一份状态。

use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use log::{info, warn};

use crate::{
    cache::FileCache,
    config::Config,
    context::Exchange,
    exception::Exception,
    handler::{factory, Handler},
    hook::{Hook, HookRegistry},
    response::StatusPages,
    route::Route,
    router::Router,
    session::{SessionManager, SessionStorage},
};

/// 所有请求共享、启动后基本只读的状态
pub struct Shared {
    pub(crate) config: Arc<Config>,
    pub(crate) router: Router,
    pub(crate) hooks: HookRegistry,
    pub(crate) sessions: SessionManager,
    pub(crate) status_pages: Arc<StatusPages>,
    pub(crate) file_cache: Mutex<FileCache>,
    template_vars: RwLock<HashMap<String, String>>,
}

impl Shared {
    pub(crate) fn template_vars(&self) -> HashMap<String, String> {
        match self.template_vars.read() {
            Ok(v) => v.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[derive(Clone)]
pub struct App {
    pub(crate) shared: Arc<Shared>,
}

impl App {
    /// 按配置构建应用，并应用配置中的路径前缀与静态文件规则
    pub fn new(config: Config) -> Self {
        let router = Router::new(config.enable_route_cache(), config.route_cache_size());
        router.set_prefix(config.prefix_path());
        for ext in config.static_file_types() {
            router.add_static_file_type(ext);
        }
        for dir in config.static_file_dirs() {
            router.add_static_file_dir(dir);
        }
        let sessions = SessionManager::new(
            Duration::from_secs(config.session_ttl()),
            Duration::from_secs(config.session_gc_interval()),
        );
        let file_cache = FileCache::from_capacity(config.file_cache_size());
        if config.cookie_secret().is_empty() {
            warn!("cookie_secret为空，签名Cookie与会话Cookie可被伪造");
        }

        Self {
            shared: Arc::new(Shared {
                config: Arc::new(config),
                router,
                hooks: HookRegistry::new(),
                sessions,
                status_pages: Arc::new(StatusPages::new()),
                file_cache: Mutex::new(file_cache),
                template_vars: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    // --- 路由 ---

    /// 注册路由，`f` 为每个请求创建一个新的处理器实例。
    ///
    /// # 错误处理
    /// 路由模式无法编译时立即返回 `Exception::InvalidRoutePattern`。
    pub fn add_route<H, F>(&self, pattern: &str, f: F) -> Result<Arc<Route>, Exception>
    where
        H: Handler + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.shared.router.add_route(pattern, factory(f), None)
    }

    /// 注册只接受指定协议（`http`/`https`）的路由
    pub fn add_route_with_schemes<H, F>(
        &self,
        pattern: &str,
        schemes: &[&str],
        f: F,
    ) -> Result<Arc<Route>, Exception>
    where
        H: Handler + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.shared
            .router
            .add_route(pattern, factory(f), Some(schemes))
    }

    pub fn remove_route(&self, pattern: &str) {
        self.shared.router.remove_route(pattern);
    }

    pub fn set_prefix_path(&self, prefix: &str) {
        self.shared.router.set_prefix(prefix);
    }

    // --- 钩子 ---

    pub fn add_hook<F>(&self, hook: Hook, f: F)
    where
        F: Fn(&mut Exchange<'_>) + Send + Sync + 'static,
    {
        self.shared.hooks.add(hook, Arc::new(f));
    }

    /// 以事件名注册钩子，例如 `BeforeMethodGet`
    pub fn add_hook_named<F>(&self, event: &str, f: F) -> Result<(), Exception>
    where
        F: Fn(&mut Exchange<'_>) + Send + Sync + 'static,
    {
        let hook: Hook = event.parse()?;
        self.add_hook(hook, f);
        Ok(())
    }

    pub fn add_http_status_hook<F>(&self, code: u16, f: F)
    where
        F: Fn(&mut Exchange<'_>) + Send + Sync + 'static,
    {
        self.add_hook(Hook::HttpStatus(code), f);
    }

    /// 以钩子的形式为状态码输出页面文件；文件在每次触发时读取
    pub fn set_http_status_page<P: AsRef<Path>>(&self, code: u16, file: P) {
        let file = file.as_ref().to_path_buf();
        self.add_http_status_hook(code, move |ex| match fs::read(&file) {
            Ok(content) => {
                ex.set_header("Content-Type", "text/html; charset=utf-8");
                ex.write_bytes(&content);
            }
            Err(e) => {
                warn!(
                    "[ID{}]无法读取状态页面{}：{}",
                    ex.request().id(),
                    file.display(),
                    e
                );
            }
        });
    }

    /// 在写入器层面为状态码替换页面，优先于处理器输出的内容
    pub fn register_custom_status<P: AsRef<Path>>(&self, code: u16, file: P) {
        self.shared.status_pages.register(code, file.as_ref());
        info!("状态码{}使用自定义页面{}", code, file.as_ref().display());
    }

    // --- 静态文件 ---

    pub fn add_static_file_type(&self, exts: &[&str]) {
        for ext in exts {
            self.shared.router.add_static_file_type(ext);
        }
    }

    pub fn remove_static_file_type(&self, exts: &[&str]) {
        for ext in exts {
            self.shared.router.remove_static_file_type(ext);
        }
    }

    pub fn add_static_file_dir(&self, dirs: &[&str]) {
        for dir in dirs {
            self.shared.router.add_static_file_dir(dir);
        }
    }

    pub fn remove_static_file_dir(&self, dirs: &[&str]) {
        for dir in dirs {
            self.shared.router.remove_static_file_dir(dir);
        }
    }

    // --- 会话与模板 ---

    pub fn register_session_storage(&self, storage: Arc<dyn SessionStorage>) {
        self.shared.sessions.register_storage(storage);
    }

    /// 全局模板变量，复制到每个新建的模板中
    pub fn set_template_var(&self, name: &str, value: &str) {
        match self.shared.template_vars.write() {
            Ok(mut v) => v.insert(name.to_string(), value.to_string()),
            Err(poisoned) => poisoned
                .into_inner()
                .insert(name.to_string(), value.to_string()),
        };
    }

    /// 中止会话清理任务
    pub fn close(&self) {
        self.shared.sessions.shutdown();
    }
}

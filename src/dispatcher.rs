// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求分派
//!
//! 每个请求按固定顺序经过以下阶段，每个阶段及每次钩子调用之后都检查 finished 标志，
//! 一旦为真，后续阶段全部跳过：
//!
//! 1. 接收：检查路径前缀（不符合则 404），命中静态文件规则时直接输出文件；
//! 2. 解析：查找路由，未找到则 404；
//! 3. 实例化：创建处理器、上下文、模板与会话；
//! 4. `init` 与 `AfterInit` 钩子；
//! 5. 方法分派：`BeforeMethod<M>` 钩子 → 处理器方法 → `AfterMethod<M>` 钩子，无法识别的方法 405；
//! 6. 渲染；
//! 7. 输出。
//!
//! 整个生命周期运行在 `catch_unwind` 之内：处理器或钩子 panic 时，
//! 若响应头尚未发出则返回 500，否则直接结束连接。

use std::{
    any::Any,
    fs,
    io::{self, Write},
    panic::{self, AssertUnwindSafe},
    path::{Component, Path},
    sync::Arc,
    time::Instant,
};

use bytes::Bytes;
use log::{debug, error, info, warn};

use crate::{
    app::App,
    context::{Context, Exchange},
    handler::Handler,
    hook::Hook,
    param::{mime_for_extension, HttpRequestMethod},
    request::Request,
    response::{CountingWriter, Framing, GzipPolicy, ResponseWriter},
    route::Values,
    util::{http_date, parse_http_date},
};

impl App {
    /// 处理一个 HTTP 请求，响应写入 `sink`，返回最终状态码
    pub fn dispatch(&self, request: Request, sink: &mut dyn Write) -> u16 {
        let framing = Framing::Http(request.version());
        self.dispatch_framed(request, sink, framing)
    }

    pub fn dispatch_framed(&self, request: Request, sink: &mut dyn Write, framing: Framing) -> u16 {
        let start = Instant::now();
        let id = request.id();
        let method = request.method_name().to_string();
        let path = request.path().to_string();
        let user_agent = request.user_agent().to_string();

        let mut counting = CountingWriter::new(sink);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.lifecycle(request, &mut counting, framing)
        }));
        let status = match result {
            Ok(status) => status,
            Err(cause) => {
                error!("[ID{}]处理请求时发生panic：{}", id, panic_message(&*cause));
                if counting.written() == 0 {
                    let mut response = ResponseWriter::new(
                        id,
                        &mut counting,
                        framing,
                        false,
                        GzipPolicy::disabled(),
                        Arc::clone(&self.shared.status_pages),
                    );
                    response.write_header(500);
                    response.complete();
                } else {
                    warn!("[ID{}]响应头已发出，直接关闭连接", id);
                }
                500
            }
        };

        info!(
            "[ID{}] {} {} {} {}ms {}",
            id,
            method,
            path,
            status,
            start.elapsed().as_millis(),
            user_agent
        );
        status
    }

    fn lifecycle(&self, mut request: Request, sink: &mut dyn Write, framing: Framing) -> u16 {
        let shared = &self.shared;
        let config = &shared.config;
        let id = request.id();
        let method = request.method();

        let gzip = GzipPolicy::new(
            config.enable_gzip() && request.accepts_gzip(),
            config.gzip_min_length(),
            config.gzip_types(),
        );
        let mut response = ResponseWriter::new(
            id,
            sink,
            framing,
            method == Some(HttpRequestMethod::Head),
            gzip,
            Arc::clone(&shared.status_pages),
        );

        // 1. 接收
        let Some(path) = shared.router.strip_prefix(request.path()) else {
            debug!("[ID{}]路径{}不在前缀之下", id, request.path());
            return self.reject(request, response, 404);
        };
        request.set_path(path.clone());

        if matches!(method, Some(HttpRequestMethod::Get | HttpRequestMethod::Head))
            && shared.router.is_static_file(&path)
        {
            self.serve_file(&request, &mut response);
            response.complete();
            return response.status();
        }

        // 2. 解析
        let Some((route, vars)) = shared.router.resolve(&path, request.scheme()) else {
            debug!("[ID{}]没有匹配{}的路由", id, path);
            return self.reject(request, response, 404);
        };
        debug!("[ID{}]匹配路由{}", id, route.pattern());

        // 3. 实例化
        let mut handler = (route.factory())();
        let ctx = Context::new(request, response, vars, Arc::clone(shared));
        let mut ex = Exchange::new(ctx);

        run(handler.as_mut(), &mut ex, method);

        let mut response = ex.into_response();
        response.complete();
        response.status()
    }

    /// 没有处理器时直接以状态码结束，仍然触发 `HttpStatus<code>` 钩子
    fn reject(&self, request: Request, response: ResponseWriter<'_>, code: u16) -> u16 {
        let ctx = Context::new(request, response, Values::new(), Arc::clone(&self.shared));
        let mut ex = Exchange::new(ctx);
        match code {
            404 => ex.not_found(),
            405 => ex.method_not_allowed(),
            _ => {
                ex.write_header(code);
                ex.finish();
            }
        }
        let mut response = ex.into_response();
        response.complete();
        response.status()
    }

    /// 从 `app_root` 输出静态文件，支持 `If-Modified-Since`
    fn serve_file(&self, request: &Request, response: &mut ResponseWriter<'_>) {
        let id = request.id();
        let relative = request.path().trim_start_matches('/');
        if Path::new(relative)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            warn!("[ID{}]请求的路径：{} 包含非法字符，返回400", id, request.path());
            response.write_header(400);
            return;
        }
        let full = Path::new(self.shared.config.app_root()).join(relative);
        let metadata = match fs::metadata(&full) {
            Ok(m) if m.is_file() => m,
            _ => {
                warn!("[ID{}]请求的文件：{} 不存在，返回404", id, full.display());
                response.write_header(404);
                return;
            }
        };
        let modified = metadata.modified().ok();

        if let (Some(modified), Some(since)) = (
            modified,
            request.header("If-Modified-Since").and_then(parse_http_date),
        ) {
            // HTTP 日期只精确到秒
            if parse_http_date(&http_date(modified)).is_some_and(|m| m <= since) {
                response.write_header(304);
                return;
            }
        }

        let ext = full.extension().and_then(|e| e.to_str()).unwrap_or("");
        response.set_header("Content-Type", mime_for_extension(ext));
        response.set_header("Content-Length", &metadata.len().to_string());
        if let Some(modified) = modified {
            response.set_header("Last-Modified", &http_date(modified));
        }
        if request.method() == Some(HttpRequestMethod::Head) {
            response.write(&[]);
            return;
        }

        match self.read_file(&full, modified) {
            Ok(content) => {
                debug!("[ID{}]输出静态文件{}，{}字节", id, full.display(), content.len());
                response.write(&content);
            }
            Err(e) => {
                error!("[ID{}]无法读取文件{}：{}", id, full.display(), e);
                response.remove_header("Content-Length");
                response.write_header(500);
            }
        }
    }

    /// 经由文件缓存读取文件，修改时间变化时重新读取
    fn read_file(&self, path: &Path, modified: Option<std::time::SystemTime>) -> io::Result<Bytes> {
        let key = path.to_string_lossy();
        let mut cache = match self.shared.file_cache.lock() {
            Ok(c) => c,
            Err(poisoned) => {
                warn!("文件缓存锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        };
        if let Some(modified) = modified {
            if let Some(content) = cache.find(&key, modified) {
                return Ok(content);
            }
        }
        let content = Bytes::from(fs::read(path)?);
        if let Some(modified) = modified {
            cache.push(&key, content.clone(), modified);
        }
        Ok(content)
    }
}

/// 执行第 4 至 7 阶段
fn run(handler: &mut dyn Handler, ex: &mut Exchange<'_>, method: Option<HttpRequestMethod>) {
    handler.init(ex);
    if ex.is_finished() {
        return;
    }
    ex.run_hooks(Hook::AfterInit);
    if ex.is_finished() {
        return;
    }

    let Some(method) = method else {
        debug!("[ID{}]不支持的请求方法{}", ex.request().id(), ex.request().method_name());
        ex.method_not_allowed();
        return;
    };
    ex.run_hooks(Hook::BeforeMethod(method));
    if ex.is_finished() {
        return;
    }
    call_method(handler, method, ex);
    if ex.is_finished() {
        return;
    }
    ex.run_hooks(Hook::AfterMethod(method));
    if ex.is_finished() {
        return;
    }

    handler.render(ex);
    if ex.is_finished() {
        return;
    }
    handler.output(ex);
}

fn call_method(handler: &mut dyn Handler, method: HttpRequestMethod, ex: &mut Exchange<'_>) {
    match method {
        HttpRequestMethod::Get => handler.get(ex),
        HttpRequestMethod::Post => handler.post(ex),
        HttpRequestMethod::Head => handler.head(ex),
        HttpRequestMethod::Delete => handler.delete(ex),
        HttpRequestMethod::Put => handler.put(ex),
        HttpRequestMethod::Patch => handler.patch(ex),
        HttpRequestMethod::Options => handler.options(ex),
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

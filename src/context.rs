// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求上下文
//!
//! - `Context`：一个请求独占的请求/响应对象，惰性解析查询参数、表单参数与上传文件，
//!   提供 Cookie 读写；
//! - `Exchange`：处理器与钩子共享的请求级组合（上下文 + 模板 + 会话），
//!   承载输出、跳转、状态码等会触发钩子的操作。
//!
//! 二者都只在单个请求内存在，从不跨请求共享。

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
    time::SystemTime,
};

use log::debug;

use crate::{
    app::Shared,
    cookie::{self, Cookie},
    form::{Form, UploadFile},
    hook::Hook,
    param::mime_for_extension,
    request::Request,
    response::ResponseWriter,
    route::Values,
    session::Session,
    template::Template,
    util::sniff_content_type,
};

pub struct Context<'a> {
    request: Request,
    response: ResponseWriter<'a>,
    path_vars: Values,
    query_vars: Option<Values>,
    form: Option<Form>,
    shared: Arc<Shared>,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        request: Request,
        response: ResponseWriter<'a>,
        path_vars: Values,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            request,
            response,
            path_vars,
            query_vars: None,
            form: None,
            shared,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &ResponseWriter<'a> {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut ResponseWriter<'a> {
        &mut self.response
    }

    pub(crate) fn into_response(self) -> ResponseWriter<'a> {
        self.response
    }

    pub fn is_finished(&self) -> bool {
        self.response.is_finished()
    }

    // --- 参数 ---

    pub fn path_var(&self, name: &str) -> &str {
        self.path_vars.get(name)
    }

    pub fn path_vars(&self, name: &str) -> &[String] {
        self.path_vars.get_all(name)
    }

    fn query(&mut self) -> &Values {
        let request = &self.request;
        self.query_vars
            .get_or_insert_with(|| Values::parse_urlencoded(request.query_string().as_bytes()))
    }

    pub fn query_var(&mut self, name: &str) -> String {
        self.query().get(name).to_string()
    }

    pub fn query_vars(&mut self, name: &str) -> Vec<String> {
        self.query().get_all(name).to_vec()
    }

    fn form(&mut self) -> &Form {
        let request = &self.request;
        self.form.get_or_insert_with(|| {
            Form::parse(request.id(), request.content_type(), request.body())
        })
    }

    pub fn form_var(&mut self, name: &str) -> String {
        self.form().values().get(name).to_string()
    }

    pub fn form_vars(&mut self, name: &str) -> Vec<String> {
        self.form().values().get_all(name).to_vec()
    }

    /// 该字段的第一个上传文件
    pub fn upload_file(&mut self, name: &str) -> Option<UploadFile> {
        self.form().file(name).cloned()
    }

    pub fn upload_files(&mut self, name: &str) -> Vec<UploadFile> {
        self.form().files(name).to_vec()
    }

    /// 请求的 `Content-Type`，未提供时为空串
    pub fn content_type(&self) -> &str {
        self.request.content_type().unwrap_or("")
    }

    // --- 响应头 ---

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.response.set_header(name, value);
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.response.add_header(name, value);
    }

    /// 按扩展名设置 `Content-Type`，例如 `json`
    pub fn set_content_type(&mut self, ext: &str) {
        self.response
            .set_header("Content-Type", mime_for_extension(ext));
    }

    // --- Cookie ---

    pub fn cookie(&self, name: &str) -> String {
        cookie::find_cookie(self.request.header("Cookie"), name).unwrap_or_default()
    }

    pub fn set_cookie(&mut self, name: &str, value: &str, max_age: i64) {
        self.set_cookie_with_args(name, value, max_age, "", "", false, false);
    }

    /// 路径为空且设置了路径前缀时，Cookie 路径取该前缀
    #[allow(clippy::too_many_arguments)]
    pub fn set_cookie_with_args(
        &mut self,
        name: &str,
        value: &str,
        max_age: i64,
        path: &str,
        domain: &str,
        secure: bool,
        http_only: bool,
    ) {
        let path = if path.is_empty() {
            self.shared.router.prefix()
        } else {
            path.to_string()
        };
        let c = Cookie::new(name, value)
            .max_age(max_age)
            .path(&path)
            .domain(domain)
            .secure(secure)
            .http_only(http_only);
        self.response.add_header("Set-Cookie", &c.to_header_value());
    }

    /// 读取签名 Cookie，校验失败或已过期时返回空串
    pub fn secure_cookie(&self, name: &str) -> String {
        let Some(raw) = cookie::find_cookie(self.request.header("Cookie"), name) else {
            return String::new();
        };
        cookie::verify_value(
            self.shared.config.cookie_secret(),
            name,
            &raw,
            self.request.user_agent(),
            SystemTime::now(),
        )
        .unwrap_or_default()
    }

    pub fn set_secure_cookie(&mut self, name: &str, value: &str, max_age: i64) {
        self.set_secure_cookie_with_args(name, value, max_age, "", "", false, true);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_secure_cookie_with_args(
        &mut self,
        name: &str,
        value: &str,
        max_age: i64,
        path: &str,
        domain: &str,
        secure: bool,
        http_only: bool,
    ) {
        let signed = cookie::sign_value(
            self.shared.config.cookie_secret(),
            name,
            value,
            max_age,
            self.request.user_agent(),
            SystemTime::now(),
        );
        self.set_cookie_with_args(name, &signed, max_age, path, domain, secure, http_only);
    }
}

/// 处理器方法与钩子收到的请求级组合
pub struct Exchange<'a> {
    ctx: Context<'a>,
    tpl: Template,
    session: Session,
}

impl<'a> Deref for Exchange<'a> {
    type Target = Context<'a>;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

impl DerefMut for Exchange<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ctx
    }
}

impl<'a> Exchange<'a> {
    /// 以全局模板变量初始化模板，并从签名 Cookie 中恢复会话 ID
    pub(crate) fn new(ctx: Context<'a>) -> Self {
        let tpl = Template::new(&ctx.shared.template_vars());
        let sid = ctx.secure_cookie(ctx.shared.config.session_name());
        let session = Session::new(if sid.is_empty() { None } else { Some(sid) });
        Self { ctx, tpl, session }
    }

    pub fn ctx(&self) -> &Context<'a> {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut Context<'a> {
        &mut self.ctx
    }

    pub fn tpl(&self) -> &Template {
        &self.tpl
    }

    pub fn tpl_mut(&mut self) -> &mut Template {
        &mut self.tpl
    }

    pub(crate) fn into_response(self) -> ResponseWriter<'a> {
        self.ctx.into_response()
    }

    fn call_hooks(&mut self, hook: Hook) {
        let shared = Arc::clone(&self.ctx.shared);
        shared.hooks.call(hook, self);
    }

    /// 钩子入口，供分派器在生命周期各阶段调用
    pub(crate) fn run_hooks(&mut self, hook: Hook) {
        self.call_hooks(hook);
    }

    // --- 输出 ---

    pub fn write_string(&mut self, content: &str) {
        self.write_bytes(content.as_bytes());
    }

    /// 一次性写出完整响应体：执行 `BeforeOutput`/`AfterOutput` 钩子，写出后关闭。
    pub fn write_bytes(&mut self, content: &[u8]) {
        if self.ctx.response.is_closed() {
            return;
        }
        self.call_hooks(Hook::BeforeOutput);
        if self.is_finished() {
            return;
        }
        if self.ctx.response.header("Content-Type").is_none() {
            self.ctx
                .response
                .set_header("Content-Type", sniff_content_type(content));
        }
        self.ctx
            .response
            .set_header("Content-Length", &content.len().to_string());
        self.ctx.response.write(content);

        self.call_hooks(Hook::AfterOutput);
        if self.is_finished() {
            return;
        }
        self.ctx.response.close();
    }

    /// 设置状态码，并执行 `HttpStatus<code>` 钩子
    pub fn write_header(&mut self, code: u16) {
        if self.ctx.response.is_closed() {
            return;
        }
        self.ctx.response.write_header(code);
        self.call_hooks(Hook::HttpStatus(code));
    }

    pub fn abort(&mut self, status: u16, content: &str) {
        self.write_header(status);
        self.write_string(content);
        self.finish();
    }

    /// 以 `/` 开头的地址会加上路径前缀
    pub fn redirect(&mut self, status: u16, url: &str) {
        if url.is_empty() {
            return;
        }
        let location = if url.starts_with('/') {
            format!("{}{}", self.ctx.shared.router.prefix(), url)
        } else {
            url.to_string()
        };
        debug!("[ID{}]重定向到{}", self.ctx.request.id(), location);
        self.ctx.response.set_header("Location", &location);
        self.write_header(status);
        self.finish();
    }

    pub fn redirect_url(&mut self, url: &str) {
        self.redirect(302, url);
    }

    pub fn not_modified(&mut self) {
        self.write_header(304);
        self.finish();
    }

    pub fn not_found(&mut self) {
        self.write_header(404);
        self.finish();
    }

    pub fn method_not_allowed(&mut self) {
        self.write_header(405);
        self.finish();
    }

    /// 标记结束并关闭写入器，后续阶段与写入全部跳过
    pub fn finish(&mut self) {
        self.ctx.response.mark_finished();
        self.ctx.response.close();
    }

    // --- 渲染 ---

    /// 配置了模板时执行替换，前后分别执行 `BeforeRender`/`AfterRender` 钩子
    pub fn render(&mut self) {
        if !self.tpl.has_template() {
            return;
        }
        self.call_hooks(Hook::BeforeRender);
        if self.is_finished() {
            return;
        }
        self.tpl.execute();
        self.call_hooks(Hook::AfterRender);
    }

    /// 渲染结果非空时写出
    pub fn output(&mut self) {
        if self.tpl.result().is_empty() {
            return;
        }
        let content = self.tpl.result().to_vec();
        self.write_bytes(&content);
    }

    // --- 会话 ---

    pub fn session(&mut self) -> SessionHandle<'_, 'a> {
        SessionHandle { ex: self }
    }
}

/// 惰性会话访问：首次使用时才分配会话 ID（并写入签名 Cookie）与加载数据
pub struct SessionHandle<'e, 'a> {
    ex: &'e mut Exchange<'a>,
}

impl SessionHandle<'_, '_> {
    fn ensure_id(&mut self) -> String {
        if let Some(id) = self.ex.session.id() {
            return id.to_string();
        }
        let shared = Arc::clone(&self.ex.ctx.shared);
        let id = shared.sessions.create_session_id();
        self.ex
            .ctx
            .set_secure_cookie(shared.config.session_name(), &id, 0);
        self.ex.session.set_id(id.clone());
        debug!("[ID{}]新建会话", self.ex.ctx.request.id());
        id
    }

    pub fn id(&mut self) -> String {
        self.ensure_id()
    }

    /// 不存在的键返回空串
    pub fn get(&mut self, key: &str) -> String {
        let id = self.ensure_id();
        let shared = Arc::clone(&self.ex.ctx.shared);
        self.ex
            .session
            .data_mut(&shared.sessions, &id)
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// 写入后立即保存到存储后端
    pub fn set(&mut self, key: &str, value: &str) {
        let id = self.ensure_id();
        let shared = Arc::clone(&self.ex.ctx.shared);
        let data = self.ex.session.data_mut(&shared.sessions, &id);
        data.insert(key.to_string(), value.to_string());
        shared.sessions.save(&id, data.clone());
    }

    pub fn delete(&mut self, key: &str) {
        let id = self.ensure_id();
        let shared = Arc::clone(&self.ex.ctx.shared);
        let data = self.ex.session.data_mut(&shared.sessions, &id);
        data.remove(key);
        shared.sessions.save(&id, data.clone());
    }

    /// 删除整个会话
    pub fn destroy(&mut self) {
        if let Some(id) = self.ex.session.id() {
            self.ex.ctx.shared.sessions.destroy(id);
        }
    }
}

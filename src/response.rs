// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 响应写入器
//!
//! `ResponseWriter` 包装底层输出流，负责：
//! - 维护 `closed`（不再接受任何字节）与 `finished`（生命周期短路）两个标志；
//! - 在首次写出时提交响应头，并在此刻一次性决定是否启用 gzip；
//! - 为非成功状态码替换自定义错误页面。
//!
//! 状态码在响应头提交之前一直处于待定状态。响应头提交后再调用 `write_header`
//! 已无法生效（HTTP 协议的队头限制），只记录警告。

use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::SystemTime,
};

use flate2::{write::GzEncoder, Compression};
use log::{debug, warn};

use crate::{
    param::{reason_phrase, HttpVersion, SERVER_NAME},
    util::{http_date, sniff_content_type, HtmlBuilder},
};

/// 响应头的序列化方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Framing {
    /// `HTTP/1.x <code> <reason>` 状态行
    Http(HttpVersion),
    /// CGI/FastCGI 的 `Status: <code> <reason>` 头
    Cgi,
}

/// gzip 启用条件
#[derive(Debug, Clone)]
pub struct GzipPolicy {
    /// 配置开启、客户端接受、且不是 HEAD 请求
    enabled: bool,
    min_length: usize,
    types: Vec<String>,
}

impl GzipPolicy {
    pub fn new(enabled: bool, min_length: usize, types: &[String]) -> Self {
        Self {
            enabled,
            min_length,
            types: types.to_vec(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, 0, &[])
    }

    fn applies(&self, content_type: &str, length: usize) -> bool {
        self.enabled
            && length >= self.min_length
            && self.types.iter().any(|t| content_type.contains(t.as_str()))
    }
}

/// 状态码 → 自定义页面文件
#[derive(Default)]
pub struct StatusPages {
    pages: RwLock<HashMap<u16, PathBuf>>,
}

impl StatusPages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, code: u16, file: &Path) {
        match self.pages.write() {
            Ok(mut p) => p.insert(code, file.to_path_buf()),
            Err(poisoned) => poisoned.into_inner().insert(code, file.to_path_buf()),
        };
    }

    pub fn get(&self, code: u16) -> Option<PathBuf> {
        match self.pages.read() {
            Ok(p) => p.get(&code).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&code).cloned(),
        }
    }
}

/// 记录实际写入字节数的输出流包装，分派器据此判断响应头是否已经发出
pub struct CountingWriter<'a> {
    inner: &'a mut dyn Write,
    written: usize,
}

impl<'a> CountingWriter<'a> {
    pub fn new(inner: &'a mut dyn Write) -> Self {
        Self { inner, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

enum Output<'a> {
    Plain(&'a mut dyn Write),
    Gzip(GzEncoder<&'a mut dyn Write>),
}

impl Output<'_> {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Output::Plain(w) => w.write_all(data),
            Output::Gzip(g) => g.write_all(data),
        }
    }
}

pub struct ResponseWriter<'a> {
    id: u128,
    /// 写入出错后置为 `None`
    sink: Option<Output<'a>>,
    status: u16,
    headers: Vec<(String, String)>,
    head_written: bool,
    closed: bool,
    finished: bool,
    /// HEAD 请求只发送响应头
    head_only: bool,
    framing: Framing,
    gzip: GzipPolicy,
    gzip_active: bool,
    pages: Arc<StatusPages>,
    body_bytes: usize,
}

impl<'a> ResponseWriter<'a> {
    pub fn new(
        id: u128,
        sink: &'a mut dyn Write,
        framing: Framing,
        head_only: bool,
        gzip: GzipPolicy,
        pages: Arc<StatusPages>,
    ) -> Self {
        Self {
            id,
            sink: Some(Output::Plain(sink)),
            status: 200,
            headers: Vec::new(),
            head_written: false,
            closed: false,
            finished: false,
            head_only,
            framing,
            gzip,
            gzip_active: false,
            pages,
            body_bytes: 0,
        }
    }

    /// 写出响应体。已关闭时静默丢弃。
    pub fn write(&mut self, data: &[u8]) {
        if self.closed {
            return;
        }
        self.emit(data);
    }

    /// 设置状态码。
    ///
    /// 已关闭时不做任何事；响应头已提交时记录警告并忽略。
    /// 若该状态码登记了自定义页面，则立即写出页面内容并关闭。
    pub fn write_header(&mut self, code: u16) {
        if self.closed {
            return;
        }
        if self.head_written {
            warn!(
                "[ID{}]响应头已发送，无法把状态码从{}改为{}",
                self.id, self.status, code
            );
            return;
        }
        self.status = code;
        if (200..300).contains(&code) {
            return;
        }
        let Some(file) = self.pages.get(code) else {
            return;
        };
        match fs::read(&file) {
            Ok(content) => {
                debug!("[ID{}]使用自定义状态页面{}", self.id, file.display());
                self.remove_header("Content-Encoding");
                if self.header("Content-Type").is_none() {
                    self.set_header("Content-Type", "text/html; charset=utf-8");
                }
                self.set_header("Content-Length", &content.len().to_string());
                self.emit(&content);
                self.close();
            }
            Err(e) => {
                warn!("[ID{}]无法读取状态页面{}：{}", self.id, file.display(), e);
            }
        }
    }

    /// 关闭写入器，此后的写入全部丢弃。幂等。
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// 标记生命周期结束，后续阶段不再执行
    pub fn mark_finished(&mut self) {
        self.finished = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 关闭隐含 finished
    pub fn is_finished(&self) -> bool {
        self.finished || self.closed
    }

    /// 请求结束时调用：补发响应头（必要时附带默认错误页面），结束 gzip 流并刷新。
    pub fn complete(&mut self) {
        if !self.head_written && self.sink.is_some() {
            if self.status >= 400 && self.header("Content-Length").is_none() {
                let page = HtmlBuilder::from_status_code(self.status, None).build();
                self.set_header("Content-Type", "text/html; charset=utf-8");
                self.set_header("Content-Length", &page.len().to_string());
                self.emit(page.as_bytes());
            } else {
                self.commit(None);
            }
        }
        let result = match self.sink.take() {
            Some(Output::Gzip(g)) => g.finish().and_then(|w| w.flush()),
            Some(Output::Plain(w)) => w.flush(),
            None => Ok(()),
        };
        if let Err(e) = result {
            warn!("[ID{}]结束响应时出错：{}", self.id, e);
        }
        self.closed = true;
    }

    fn emit(&mut self, data: &[u8]) {
        if !self.head_written {
            self.commit(Some(data));
        }
        if self.head_only || data.is_empty() {
            return;
        }
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        match sink.write_all(data) {
            Ok(()) => self.body_bytes += data.len(),
            Err(e) => self.fail(e),
        }
    }

    /// 提交响应头。`first` 为首个响应体分块，请求结束时仍无响应体则为 `None`。
    fn commit(&mut self, first: Option<&[u8]>) {
        self.head_written = true;
        let bodyless = self.status < 200 || self.status == 204 || self.status == 304;

        if let Some(chunk) = first {
            if self.header("Content-Type").is_none() && !chunk.is_empty() && !bodyless {
                self.set_header("Content-Type", sniff_content_type(chunk));
            }
        }

        let declared = self
            .header("Content-Length")
            .and_then(|v| v.trim().parse::<usize>().ok());
        let length = declared.or(first.map(|c| c.len())).unwrap_or(0);
        let content_type = self.header("Content-Type").unwrap_or("").to_string();
        let use_gzip = first.is_some()
            && !self.head_only
            && !bodyless
            && self.header("Content-Encoding").is_none()
            && self.gzip.applies(&content_type, length);

        if use_gzip {
            self.remove_header("Content-Length");
            self.set_header("Content-Encoding", "gzip");
            self.add_header("Vary", "Accept-Encoding");
        } else if first.is_none() && !bodyless && declared.is_none() {
            self.set_header("Content-Length", "0");
        }
        if bodyless {
            self.remove_header("Content-Length");
        }

        let mut head = match self.framing {
            Framing::Http(version) => format!(
                "{} {} {}\r\n",
                version,
                self.status,
                reason_phrase(self.status)
            ),
            Framing::Cgi => format!("Status: {} {}\r\n", self.status, reason_phrase(self.status)),
        };
        head.push_str(&format!("Date: {}\r\n", http_date(SystemTime::now())));
        head.push_str(&format!("Server: {}\r\n", SERVER_NAME));
        if let Framing::Http(_) = self.framing {
            head.push_str("Connection: close\r\n");
        }
        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str("\r\n");

        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        if let Err(e) = sink.write_all(head.as_bytes()) {
            self.fail(e);
            return;
        }
        if use_gzip {
            if let Some(Output::Plain(w)) = self.sink.take() {
                self.sink = Some(Output::Gzip(GzEncoder::new(w, Compression::default())));
                self.gzip_active = true;
                debug!("[ID{}]启用gzip压缩", self.id);
            }
        }
    }

    /// 写入失败（多为客户端断开）：停止一切后续写出
    fn fail(&mut self, e: io::Error) {
        warn!("[ID{}]写出响应失败，连接已关闭：{}", self.id, e);
        self.sink = None;
        self.closed = true;
        self.finished = true;
    }
}

// --- 响应头与状态访问 ---

impl ResponseWriter<'_> {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 替换同名响应头
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.remove_header(name);
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// 追加响应头（可重复，例如 `Set-Cookie`）
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn head_written(&self) -> bool {
        self.head_written
    }

    pub fn gzip_active(&self) -> bool {
        self.gzip_active
    }

    /// 已写出的（压缩前）响应体字节数
    pub fn body_bytes(&self) -> usize {
        self.body_bytes
    }
}

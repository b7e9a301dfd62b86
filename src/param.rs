// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! - 常见 HTTP 状态码及其原因短语（Reason Phrase）。
//! - 静态文件使用的 MIME 类型映射表。
//! - HTTP 方法、版本的强类型枚举。

use lazy_static::lazy_static;
use std::{collections::HashMap, fmt, str::FromStr};

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "gantry";

/// HTTP 协议规定的换行符
pub const CRLF: &str = "\r\n";

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        map.insert(100, "Continue");
        map.insert(101, "Switching Protocols");

        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(202, "Accepted");
        map.insert(204, "No Content");
        map.insert(206, "Partial Content");

        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(303, "See Other");
        map.insert(304, "Not Modified");
        map.insert(307, "Temporary Redirect");
        map.insert(308, "Permanent Redirect");

        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(406, "Not Acceptable");
        map.insert(408, "Request Timeout");
        map.insert(409, "Conflict");
        map.insert(410, "Gone");
        map.insert(411, "Length Required");
        map.insert(413, "Content Too Large");
        map.insert(414, "URI Too Long");
        map.insert(415, "Unsupported Media Type");
        map.insert(422, "Unprocessable Content");
        map.insert(429, "Too Many Requests");

        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(502, "Bad Gateway");
        map.insert(503, "Service Unavailable");
        map.insert(504, "Gateway Timeout");
        map.insert(505, "HTTP Version Not Supported");
        map
    };
}

lazy_static! {
    /// 文件后缀名到 MIME 类型的映射表，用于静态文件的 `Content-Type`。
    pub static ref MIME_TYPES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("css", "text/css; charset=utf-8");
        map.insert("csv", "text/csv; charset=utf-8");
        map.insert("gif", "image/gif");
        map.insert("gz", "application/gzip");
        map.insert("htm", "text/html; charset=utf-8");
        map.insert("html", "text/html; charset=utf-8");
        map.insert("ico", "image/x-icon");
        map.insert("jpeg", "image/jpeg");
        map.insert("jpg", "image/jpeg");
        map.insert("js", "text/javascript; charset=utf-8");
        map.insert("json", "application/json");
        map.insert("map", "application/json");
        map.insert("md", "text/markdown; charset=utf-8");
        map.insert("mjs", "text/javascript; charset=utf-8");
        map.insert("mp3", "audio/mpeg");
        map.insert("mp4", "video/mp4");
        map.insert("otf", "font/otf");
        map.insert("pdf", "application/pdf");
        map.insert("png", "image/png");
        map.insert("svg", "image/svg+xml");
        map.insert("ttf", "font/ttf");
        map.insert("txt", "text/plain; charset=utf-8");
        map.insert("wasm", "application/wasm");
        map.insert("webm", "video/webm");
        map.insert("webp", "image/webp");
        map.insert("woff", "font/woff");
        map.insert("woff2", "font/woff2");
        map.insert("xml", "text/xml; charset=utf-8");
        map.insert("zip", "application/zip");
        map
    };
}

/// 查询状态码的原因短语，未登记的状态码返回空串。
pub fn reason_phrase(code: u16) -> &'static str {
    STATUS_CODES.get(&code).copied().unwrap_or("")
}

/// 按扩展名（不含 `.`）查询 MIME 类型，未知类型回退为二进制流。
pub fn mime_for_extension(ext: &str) -> &'static str {
    MIME_TYPES
        .get(ext.trim_start_matches('.').to_ascii_lowercase().as_str())
        .copied()
        .unwrap_or("application/octet-stream")
}

/// 支持的 HTTP 协议版本
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpVersion {
    V1_0,
    V1_1,
}

/// 框架可以分派到处理器方法的 HTTP 请求方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpRequestMethod {
    Get,
    Post,
    Head,
    Delete,
    Put,
    Patch,
    Options,
}

impl HttpRequestMethod {
    pub const ALL: [HttpRequestMethod; 7] = [
        HttpRequestMethod::Get,
        HttpRequestMethod::Post,
        HttpRequestMethod::Head,
        HttpRequestMethod::Delete,
        HttpRequestMethod::Put,
        HttpRequestMethod::Patch,
        HttpRequestMethod::Options,
    ];

    /// 钩子事件名中使用的首字母大写形式，例如 `BeforeMethodGet` 中的 `Get`。
    pub fn title(&self) -> &'static str {
        match *self {
            HttpRequestMethod::Get => "Get",
            HttpRequestMethod::Post => "Post",
            HttpRequestMethod::Head => "Head",
            HttpRequestMethod::Delete => "Delete",
            HttpRequestMethod::Put => "Put",
            HttpRequestMethod::Patch => "Patch",
            HttpRequestMethod::Options => "Options",
        }
    }
}

impl FromStr for HttpRequestMethod {
    type Err = ();

    /// 方法名大小写不敏感
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpRequestMethod::Get),
            "POST" => Ok(HttpRequestMethod::Post),
            "HEAD" => Ok(HttpRequestMethod::Head),
            "DELETE" => Ok(HttpRequestMethod::Delete),
            "PUT" => Ok(HttpRequestMethod::Put),
            "PATCH" => Ok(HttpRequestMethod::Patch),
            "OPTIONS" => Ok(HttpRequestMethod::Options),
            _ => Err(()),
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::V1_0 => write!(f, "HTTP/1.0"),
            HttpVersion::V1_1 => write!(f, "HTTP/1.1"),
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    /// 将枚举格式化为 HTTP 标准大写方法名
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.title().to_ascii_uppercase())
    }
}

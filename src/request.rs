// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 负责把从连接中读取的原始字节解析为强类型的 `Request`：
//! 1. 请求行（方法、请求目标、版本）的解析，请求目标拆分为解码后的路径与查询串。
//! 2. 请求头的保存与大小写不敏感查询。
//! 3. 按 `Content-Length` 读取请求体，并受配置上限约束。
//!
//! 请求方法以原始字符串保存：无法识别的方法并不是解析错误，
//! 而是由分派器在生命周期中以 `405` 响应。

use crate::{exception::Exception, param::*};
use log::{debug, error};
use std::io::{BufRead, Read};

/// 一个完整的 HTTP 请求。
#[derive(Debug, Clone)]
pub struct Request {
    /// 全局请求 ID，用于日志追踪
    id: u128,
    /// 大写的原始方法名
    method: String,
    /// 原始请求目标（含查询串）
    target: String,
    /// 解码后的路径，不含查询串
    path: String,
    /// 原始查询串，不含 `?`
    query: String,
    version: HttpVersion,
    /// 按出现顺序保存的请求头
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    /// `http` 或 `https`，由监听层填写
    scheme: String,
}

impl Request {
    /// 从一段完整的原始报文（请求头 + 可选请求体）构建 `Request`。
    ///
    /// # 错误处理
    /// 请求头不是 UTF-8、请求行不完整或版本不受支持时返回相应的 `Exception`。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let (head, body) = match find_head_end(buffer) {
            Some((head_end, body_start)) => (&buffer[..head_end], &buffer[body_start..]),
            None => (buffer, &buffer[buffer.len()..]),
        };
        let head = match std::str::from_utf8(head) {
            Ok(s) => s,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };
        let mut request = Self::parse_head(head, id)?;
        let body = match request.content_length() {
            Some(len) if len < body.len() => &body[..len],
            _ => body,
        };
        request.body = body.to_vec();
        Ok(request)
    }

    /// 从阻塞式读取器中读取一个请求。
    ///
    /// 请求头逐行读取直到空行，总长度不得超过 `max_head`（单次读取同样受此限制，
    /// 没有换行的超长请求头不会被整段缓存）；
    /// 请求体按 `Content-Length` 精确读取，超过 `max_body` 时返回 `PayloadTooLarge`。
    pub fn read_from<R: BufRead>(
        reader: &mut R,
        id: u128,
        max_head: usize,
        max_body: usize,
    ) -> Result<Self, Exception> {
        let mut head = Vec::with_capacity(1024);
        loop {
            let start = head.len();
            let limit = (max_head - start + 1) as u64;
            let n = reader.by_ref().take(limit).read_until(b'\n', &mut head)?;
            if n == 0 {
                if head.is_empty() {
                    return Err(Exception::Io("connection closed before request".to_string()));
                }
                return Err(Exception::MalformedRequest);
            }
            if head.len() > max_head {
                error!("[ID{}]请求头超过{}字节上限", id, max_head);
                return Err(Exception::PayloadTooLarge);
            }
            let line = &head[start..];
            // 允许请求行之前出现空行（RFC 9112 2.2）
            if line == b"\r\n" || line == b"\n" {
                if start == 0 {
                    head.clear();
                    continue;
                }
                break;
            }
        }
        let head = match String::from_utf8(head) {
            Ok(s) => s,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };
        let mut request = Self::parse_head(&head, id)?;

        if let Some(len) = request.content_length() {
            if len > max_body {
                error!("[ID{}]请求体长度{}超过{}字节上限", id, len, max_body);
                return Err(Exception::PayloadTooLarge);
            }
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body)?;
            request.body = body;
        }
        debug!("[ID{}]HTTP请求接收完毕，请求体{}字节", id, request.body.len());
        Ok(request)
    }

    /// 由已拆解的各部分构建请求，供 FastCGI 等非 HTTP 报文来源使用。
    pub fn from_parts(
        id: u128,
        method: &str,
        target: &str,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    ) -> Result<Self, Exception> {
        let (path, query) = split_target(target)?;
        Ok(Self {
            id,
            method: method.to_ascii_uppercase(),
            target: target.to_string(),
            path,
            query,
            version: HttpVersion::V1_1,
            headers,
            body,
            scheme: "http".to_string(),
        })
    }

    fn parse_head(head: &str, id: u128) -> Result<Self, Exception> {
        let mut lines = head.lines();

        // 解析请求行 (e.g., "GET /index.html HTTP/1.1")
        let request_line = lines.next().unwrap_or("");
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, request_line);
            return Err(Exception::MalformedRequest);
        }

        let method = parts[0].to_ascii_uppercase();
        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_alphabetic()) {
            error!("[ID{}]非法的HTTP请求方法：{}", id, parts[0]);
            return Err(Exception::MalformedRequest);
        }

        let version = match parts[2].to_ascii_uppercase().as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            "HTTP/1.0" => HttpVersion::V1_0,
            other => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, other);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        let target = parts[1].to_string();
        let (path, query) = split_target(&target)?;

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            match line.split_once(':') {
                Some((name, value)) if !name.trim().is_empty() => {
                    headers.push((name.trim().to_string(), value.trim().to_string()));
                }
                _ => {
                    error!("[ID{}]无法解析的请求头：{}", id, line);
                    return Err(Exception::MalformedRequest);
                }
            }
        }

        Ok(Self {
            id,
            method,
            target,
            path,
            query,
            version,
            headers,
            body: Vec::new(),
            scheme: "http".to_string(),
        })
    }
}

/// 返回请求头结束位置与请求体起始位置
fn find_head_end(buffer: &[u8]) -> Option<(usize, usize)> {
    if let Some(i) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((i, i + 4));
    }
    buffer
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|i| (i, i + 2))
}

/// 把请求目标拆分为解码后的路径与原始查询串。
///
/// 绝对形式（`http://host/path`）会先去掉协议与主机部分。
fn split_target(target: &str) -> Result<(String, String), Exception> {
    let mut rest = target;
    if let Some(idx) = rest.find("://") {
        let after = &rest[idx + 3..];
        rest = match after.find('/') {
            Some(slash) => &after[slash..],
            None => "/",
        };
    }
    let (raw_path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, q),
        None => (rest, ""),
    };
    if raw_path != "*" && !raw_path.starts_with('/') {
        return Err(Exception::MalformedRequest);
    }
    let path = match urlencoding::decode(raw_path) {
        Ok(p) => p.into_owned(),
        Err(_) => return Err(Exception::InvalidPath),
    };
    Ok((path, query.to_string()))
}

// --- Getter 访问器实现 ---

impl Request {
    pub fn id(&self) -> u128 {
        self.id
    }

    /// 可分派的请求方法；无法识别的方法返回 `None`
    pub fn method(&self) -> Option<HttpRequestMethod> {
        self.method.parse().ok()
    }

    /// 大写的原始方法名
    pub fn method_name(&self) -> &str {
        &self.method
    }

    /// 解码后的请求路径（不含查询串）
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn set_path(&mut self, path: String) {
        self.path = path;
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn query_string(&self) -> &str {
        &self.query
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// 按名称（大小写不敏感）查询第一个同名请求头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn user_agent(&self) -> &str {
        self.header("User-Agent").unwrap_or("")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse::<usize>().ok())
    }

    /// 客户端是否接受 gzip 编码（`q=0` 视为拒绝）
    pub fn accepts_gzip(&self) -> bool {
        let Some(value) = self.header("Accept-Encoding") else {
            return false;
        };
        value.split(',').any(|item| {
            let mut parts = item.split(';');
            let coding = parts.next().unwrap_or("").trim();
            if !coding.eq_ignore_ascii_case("gzip") && coding != "*" {
                return false;
            }
            !parts.any(|p| {
                let p = p.trim();
                p == "q=0" || p == "q=0.0" || p == "q=0.00" || p == "q=0.000"
            })
        })
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn set_scheme(&mut self, scheme: &str) {
        self.scheme = scheme.to_string();
    }
}

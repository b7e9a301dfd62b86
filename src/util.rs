// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::param::reason_phrase;

/// 生成默认错误页面的简单 HTML 构造器
pub struct HtmlBuilder {
    title: String,
    css: String,
    body: String,
}

impl HtmlBuilder {
    /// 以状态码与可选说明生成页面，未登记的状态码使用通用说明
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let title = format!("{}", code);
        let css = r"
            body {
                width: 35em;
                margin: 0 auto;
                font-family: Tahoma, Verdana, Arial, sans-serif;
            }
            "
        .to_string();
        let description = match note {
            Some(n) => n,
            None => match reason_phrase(code) {
                "" => "Unknown Status",
                d => d,
            },
        };
        let body = format!(
            r"
            <h1>{}</h1>
            <p>{}</p>
            ",
            code,
            escape_html(description)
        );
        Self { title, css, body }
    }

    pub fn build(&self) -> String {
        format!(
            r##"<!DOCTYPE html>
<html>
    <head>
        <meta charset="utf-8">
        <title>{}</title>
        <style>{}</style>
    </head>
    <body>
    {}
    </body>
</html>"##,
            self.title, self.css, self.body
        )
    }
}

/// HTML 转义：`& < > " '`
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// 根据内容的前若干字节推断 `Content-Type`
pub fn sniff_content_type(data: &[u8]) -> &'static str {
    let head = &data[..data.len().min(512)];
    let start = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(head.len());
    let trimmed = &head[start..];

    const HTML_SIGNATURES: [&[u8]; 9] = [
        b"<!doctype html",
        b"<html",
        b"<head",
        b"<body",
        b"<script",
        b"<title",
        b"<div",
        b"<p",
        b"<!--",
    ];
    for sig in HTML_SIGNATURES {
        if trimmed.len() >= sig.len() && trimmed[..sig.len()].eq_ignore_ascii_case(sig) {
            return "text/html; charset=utf-8";
        }
    }
    if trimmed.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }

    let magic: [(&[u8], &'static str); 7] = [
        (&b"%PDF-"[..], "application/pdf"),
        (&b"\x89PNG\r\n\x1a\n"[..], "image/png"),
        (&b"GIF87a"[..], "image/gif"),
        (&b"GIF89a"[..], "image/gif"),
        (&b"\xFF\xD8\xFF"[..], "image/jpeg"),
        (&b"\x1F\x8B\x08"[..], "application/x-gzip"),
        (&b"PK\x03\x04"[..], "application/zip"),
    ];
    for (sig, mime) in magic {
        if head.starts_with(sig) {
            return mime;
        }
    }

    let binary = head
        .iter()
        .any(|&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0C | 0x1B));
    if binary {
        "application/octet-stream"
    } else {
        "text/plain; charset=utf-8"
    }
}

/// 格式化为 HTTP 日期，例如 `Sun, 06 Nov 1994 08:49:37 GMT`
pub fn http_date(time: SystemTime) -> String {
    let time: DateTime<Utc> = time.into();
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// 解析 HTTP 日期，失败返回 `None`
pub fn parse_http_date(s: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc2822(s.trim())
        .ok()
        .map(|t| SystemTime::from(t.with_timezone(&Utc)))
}

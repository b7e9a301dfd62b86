// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # FastCGI 响应者
//!
//! 每个连接处理一个请求：读取 `BEGIN_REQUEST`、`PARAMS` 与 `STDIN` 记录，
//! 把 CGI 变量还原为 `Request` 后分派，响应以 `STDOUT` 记录发回，最后发送 `END_REQUEST`。
//! 不支持多路复用。

use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use bytes::{BufMut, BytesMut};
use log::{debug, warn};

use crate::{
    app::App,
    exception::Exception,
    request::Request,
    response::{Framing, GzipPolicy, ResponseWriter},
};

const VERSION_1: u8 = 1;

const BEGIN_REQUEST: u8 = 1;
const ABORT_REQUEST: u8 = 2;
const END_REQUEST: u8 = 3;
const PARAMS: u8 = 4;
const STDIN: u8 = 5;
const STDOUT: u8 = 6;
const DATA: u8 = 8;
const GET_VALUES: u8 = 9;
const GET_VALUES_RESULT: u8 = 10;
const UNKNOWN_TYPE: u8 = 11;

const ROLE_RESPONDER: u16 = 1;

const REQUEST_COMPLETE: u8 = 0;
const CANT_MPX_CONN: u8 = 1;
const UNKNOWN_ROLE: u8 = 3;

/// 单条记录内容的最大长度
pub const MAX_CONTENT: usize = 65535;

#[derive(Debug, PartialEq)]
pub struct Record {
    pub kind: u8,
    pub request_id: u16,
    pub content: Vec<u8>,
}

/// 读取一条记录，连接在记录边界上关闭时返回 `None`
pub fn read_record<R: Read>(reader: &mut R) -> io::Result<Option<Record>> {
    let mut header = [0u8; 8];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    if header[0] != VERSION_1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported FastCGI version {}", header[0]),
        ));
    }
    let request_id = u16::from_be_bytes([header[2], header[3]]);
    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    let padding = header[6] as usize;

    let mut content = vec![0u8; length + padding];
    reader.read_exact(&mut content)?;
    content.truncate(length);
    Ok(Some(Record {
        kind: header[1],
        request_id,
        content,
    }))
}

/// 写入一条记录，内容按 8 字节对齐补齐
pub fn write_record<W: Write>(
    writer: &mut W,
    kind: u8,
    request_id: u16,
    content: &[u8],
) -> io::Result<()> {
    debug_assert!(content.len() <= MAX_CONTENT);
    let padding = (8 - content.len() % 8) % 8;
    let mut buf = BytesMut::with_capacity(8 + content.len() + padding);
    buf.put_u8(VERSION_1);
    buf.put_u8(kind);
    buf.put_u16(request_id);
    buf.put_u16(content.len() as u16);
    buf.put_u8(padding as u8);
    buf.put_u8(0);
    buf.put_slice(content);
    buf.put_bytes(0, padding);
    writer.write_all(&buf)
}

fn end_request<W: Write>(writer: &mut W, request_id: u16, protocol_status: u8) -> io::Result<()> {
    let mut body = BytesMut::with_capacity(8);
    body.put_u32(0);
    body.put_u8(protocol_status);
    body.put_bytes(0, 3);
    write_record(writer, END_REQUEST, request_id, &body)
}

/// 解析名值对：长度小于 128 时占 1 字节，否则占 4 字节且最高位为 1
pub fn parse_params(mut data: &[u8]) -> Result<Vec<(String, String)>, Exception> {
    fn read_len(data: &mut &[u8]) -> Result<usize, Exception> {
        match data.first() {
            Some(&b) if b & 0x80 == 0 => {
                *data = &data[1..];
                Ok(b as usize)
            }
            Some(_) if data.len() >= 4 => {
                let len = u32::from_be_bytes([data[0] & 0x7f, data[1], data[2], data[3]]);
                *data = &data[4..];
                Ok(len as usize)
            }
            _ => Err(Exception::MalformedRequest),
        }
    }

    let mut params = Vec::new();
    while !data.is_empty() {
        let name_len = read_len(&mut data)?;
        let value_len = read_len(&mut data)?;
        if data.len() < name_len + value_len {
            return Err(Exception::MalformedRequest);
        }
        let name = String::from_utf8_lossy(&data[..name_len]).into_owned();
        let value = String::from_utf8_lossy(&data[name_len..name_len + value_len]).into_owned();
        data = &data[name_len + value_len..];
        params.push((name, value));
    }
    Ok(params)
}

/// 编码名值对，`parse_params` 的逆操作
pub fn encode_params(params: &[(&str, &str)]) -> Vec<u8> {
    fn put_len(buf: &mut BytesMut, len: usize) {
        if len < 128 {
            buf.put_u8(len as u8);
        } else {
            buf.put_u32(len as u32 | 0x8000_0000);
        }
    }

    let mut buf = BytesMut::new();
    for (name, value) in params {
        put_len(&mut buf, name.len());
        put_len(&mut buf, value.len());
        buf.put_slice(name.as_bytes());
        buf.put_slice(value.as_bytes());
    }
    buf.to_vec()
}

/// 由 CGI 变量还原请求
pub fn request_from_params(
    id: u128,
    params: &[(String, String)],
    body: Vec<u8>,
) -> Result<Request, Exception> {
    let param = |name: &str| {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };

    let method = param("REQUEST_METHOD").unwrap_or("GET");
    let target = match param("REQUEST_URI") {
        Some(uri) if !uri.is_empty() => uri.to_string(),
        _ => {
            let mut uri = format!(
                "{}{}",
                param("SCRIPT_NAME").unwrap_or(""),
                param("PATH_INFO").unwrap_or("")
            );
            if uri.is_empty() {
                uri.push('/');
            }
            match param("QUERY_STRING") {
                Some(q) if !q.is_empty() => format!("{}?{}", uri, q),
                _ => uri,
            }
        }
    };

    let mut headers = Vec::new();
    for (name, value) in params {
        let header = match name.as_str() {
            "CONTENT_TYPE" => "Content-Type".to_string(),
            "CONTENT_LENGTH" => "Content-Length".to_string(),
            other => match other.strip_prefix("HTTP_") {
                Some(rest) => header_name(rest),
                None => continue,
            },
        };
        if !value.is_empty() {
            headers.push((header, value.clone()));
        }
    }

    let mut request = Request::from_parts(id, method, &target, headers, body)?;
    if matches!(param("HTTPS"), Some(v) if v.eq_ignore_ascii_case("on")) {
        request.set_scheme("https");
    }
    Ok(request)
}

/// `USER_AGENT` → `User-Agent`
fn header_name(cgi: &str) -> String {
    cgi.split('_')
        .map(|part| {
            let lower = part.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// 把写入的数据切分为 `STDOUT` 记录
pub struct FcgiStdout<'a, W: Write> {
    inner: &'a mut W,
    request_id: u16,
}

impl<'a, W: Write> FcgiStdout<'a, W> {
    pub fn new(inner: &'a mut W, request_id: u16) -> Self {
        Self { inner, request_id }
    }
}

impl<W: Write> Write for FcgiStdout<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for chunk in buf.chunks(MAX_CONTENT) {
            write_record(&mut *self.inner, STDOUT, self.request_id, chunk)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// 在一个连接上处理一个 FastCGI 请求
pub fn serve_connection<S: Read + Write>(app: &App, stream: &mut S, id: u128) -> io::Result<()> {
    let max_body = app.config().max_body_size();
    let mut request_id: Option<u16> = None;
    let mut params = Vec::new();
    let mut params_done = false;
    let mut body = Vec::new();

    while let Some(record) = read_record(stream)? {
        match record.kind {
            GET_VALUES => {
                let reply = encode_params(&[("FCGI_MPXS_CONNS", "0"), ("FCGI_MAX_REQS", "1")]);
                write_record(stream, GET_VALUES_RESULT, 0, &reply)?;
            }
            BEGIN_REQUEST => {
                if request_id.is_some() {
                    end_request(stream, record.request_id, CANT_MPX_CONN)?;
                    continue;
                }
                let role = match record.content.get(..2) {
                    Some(r) => u16::from_be_bytes([r[0], r[1]]),
                    None => 0,
                };
                if role != ROLE_RESPONDER {
                    warn!("[ID{}]不支持的FastCGI角色{}", id, role);
                    end_request(stream, record.request_id, UNKNOWN_ROLE)?;
                    continue;
                }
                request_id = Some(record.request_id);
            }
            ABORT_REQUEST if request_id == Some(record.request_id) => {
                debug!("[ID{}]FastCGI请求被中止", id);
                end_request(stream, record.request_id, REQUEST_COMPLETE)?;
                return stream.flush();
            }
            PARAMS if request_id == Some(record.request_id) => {
                if record.content.is_empty() {
                    params_done = true;
                } else {
                    params.extend_from_slice(&record.content);
                }
            }
            STDIN if request_id == Some(record.request_id) => {
                if !record.content.is_empty() {
                    if body.len() + record.content.len() > max_body {
                        warn!("[ID{}]请求体超过{}字节上限", id, max_body);
                        return respond_error(app, stream, id, record.request_id, 413);
                    }
                    body.extend_from_slice(&record.content);
                    continue;
                }
                if !params_done {
                    warn!("[ID{}]FastCGI参数不完整", id);
                }
                return respond(app, stream, id, record.request_id, &params, body);
            }
            DATA => {}
            ABORT_REQUEST | PARAMS | STDIN => {
                debug!("[ID{}]忽略不属于当前请求的记录", id);
            }
            other => {
                let mut reply = [0u8; 8];
                reply[0] = other;
                write_record(stream, UNKNOWN_TYPE, 0, &reply)?;
            }
        }
    }
    debug!("[ID{}]FastCGI连接在请求完成前关闭", id);
    Ok(())
}

fn respond<S: Write>(
    app: &App,
    stream: &mut S,
    id: u128,
    request_id: u16,
    params: &[u8],
    body: Vec<u8>,
) -> io::Result<()> {
    let request = parse_params(params).and_then(|p| request_from_params(id, &p, body));
    match request {
        Ok(request) => {
            {
                let mut stdout = FcgiStdout::new(&mut *stream, request_id);
                app.dispatch_framed(request, &mut stdout, Framing::Cgi);
            }
            finish(stream, request_id)
        }
        Err(e) => {
            warn!("[ID{}]无法还原FastCGI请求：{}", id, e);
            respond_error(app, stream, id, request_id, e.status_code().unwrap_or(400))
        }
    }
}

fn respond_error<S: Write>(
    app: &App,
    stream: &mut S,
    id: u128,
    request_id: u16,
    code: u16,
) -> io::Result<()> {
    {
        let mut stdout = FcgiStdout::new(&mut *stream, request_id);
        let mut response = ResponseWriter::new(
            id,
            &mut stdout,
            Framing::Cgi,
            false,
            GzipPolicy::disabled(),
            Arc::clone(&app.shared.status_pages),
        );
        response.write_header(code);
        response.complete();
    }
    finish(stream, request_id)
}

fn finish<S: Write>(stream: &mut S, request_id: u16) -> io::Result<()> {
    write_record(stream, STDOUT, request_id, &[])?;
    end_request(stream, request_id, REQUEST_COMPLETE)?;
    stream.flush()
}

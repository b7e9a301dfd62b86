// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 框架在注册期、启动期以及请求处理期可能产生的各类异常。
//!
//! ## 设计意图
//! - **注册期/启动期异常**（路由模式非法、配置无法读取、证书加载失败、端口绑定失败）
//!   会立即返回给调用者，由进程入口决定以非零状态退出。
//! - **请求期异常**（报文解析失败、路径非法等）在单个请求内部就地转换为对应的
//!   HTTP 状态码，绝不跨请求传播。

use std::{fmt, io};

/// 框架处理过程中发生的异常类型。
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    /// 客户端发送的请求头无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 请求行或请求头格式不符合 HTTP/1.x 规范。
    MalformedRequest,
    /// 客户端使用了服务器不支持的 HTTP 协议版本（仅支持 HTTP/1.0 与 HTTP/1.1）。
    UnsupportedHttpVersion,
    /// 请求头或请求体超过了配置允许的上限。对应 `413`。
    PayloadTooLarge,
    /// 请求路径包含越权片段（如 `..`）。对应 `400 Bad Request`。
    InvalidPath,
    /// 路由模式无法编译。携带出错的模式与原因。
    InvalidRoutePattern(String),
    /// 无法识别的钩子事件名。
    UnknownHookEvent(String),
    /// 配置文件无法读取或解析。
    ConfigLoad(String),
    /// 未知的运行模式。
    UnsupportedRunMode(String),
    /// TLS 证书或私钥无法加载。
    TlsConfig(String),
    /// 监听地址绑定失败。
    Bind(String),
    /// 传输层 I/O 错误。
    Io(String),
}

use Exception::*;

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            MalformedRequest => write!(f, "Malformed HTTP request"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            PayloadTooLarge => write!(f, "Request payload too large (413)"),
            InvalidPath => write!(f, "Invalid path (400)"),
            InvalidRoutePattern(detail) => write!(f, "Invalid route pattern: {}", detail),
            UnknownHookEvent(name) => write!(f, "Unknown hook event: {}", name),
            ConfigLoad(detail) => write!(f, "Couldn't load configuration: {}", detail),
            UnsupportedRunMode(mode) => write!(f, "Unsupported run mode: {}", mode),
            TlsConfig(detail) => write!(f, "Couldn't load TLS certificate: {}", detail),
            Bind(detail) => write!(f, "Couldn't bind listener: {}", detail),
            Io(detail) => write!(f, "I/O error: {}", detail),
        }
    }
}

impl std::error::Error for Exception {}

impl From<io::Error> for Exception {
    fn from(e: io::Error) -> Self {
        Io(e.to_string())
    }
}

impl Exception {
    /// 请求期异常对应的 HTTP 状态码；注册期与启动期异常没有对应状态码。
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RequestIsNotUtf8 | MalformedRequest | UnsupportedHttpVersion | InvalidPath => {
                Some(400)
            }
            PayloadTooLarge => Some(413),
            _ => None,
        }
    }
}

// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # gantry
//!
//! 一个小型 Web 框架：路由模式编译与匹配、带缓存的路由表、固定顺序的请求生命周期、
//! 钩子、表单与文件上传、签名 Cookie、会话、模板，以及支持 gzip 与自定义状态页的响应写入器。
//! 在其之上提供 HTTP、HTTPS 与 FastCGI 三种监听方式。

pub mod app;
pub mod cache;
pub mod config;
pub mod context;
pub mod cookie;
mod dispatcher;
pub mod exception;
pub mod fcgi;
pub mod form;
pub mod handler;
pub mod hook;
pub mod param;
pub mod request;
pub mod response;
pub mod route;
pub mod router;
pub mod server;
pub mod session;
pub mod template;
pub mod util;

pub use app::App;
pub use config::Config;
pub use context::{Context, Exchange, SessionHandle};
pub use cookie::Cookie;
pub use exception::Exception;
pub use form::UploadFile;
pub use handler::{factory, Handler, HandlerFactory};
pub use hook::Hook;
pub use param::{HttpRequestMethod, HttpVersion};
pub use request::Request;
pub use response::{Framing, ResponseWriter};
pub use route::{Route, Values};
pub use router::Router;
pub use server::{RunMode, Server, ServerHandle};
pub use session::{MemorySessionStorage, SessionData, SessionManager, SessionStorage};
pub use template::Template;
pub use util::HtmlBuilder;

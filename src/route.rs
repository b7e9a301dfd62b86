// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由模式编译
//!
//! 把形如 `/post/{name([a-zA-Z0-9]+)}-{page([0-9]+)}` 的路由模式编译为 `Route`：
//! - 不含参数（或花括号不配对）的模式是**静态路由**，按规范化后的路径精确匹配；
//! - 含参数的模式是**动态路由**，编译为一个首尾锚定的正则表达式，
//!   参数名按从左到右的顺序记录，与捕获组一一对应。

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::{exception::Exception, handler::HandlerFactory};

/// 省略子表达式时的默认参数匹配：一个或多个非 `/` 字符
pub const DEFAULT_PARAM_REGEX: &str = "[^/]+";

lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(r"\{\w+?\(.*?\)\}|\{\w+?\}").unwrap();
}

/// 多值映射，用于路径参数、查询参数与表单参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    inner: HashMap<String, Vec<String>>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析 `application/x-www-form-urlencoded` 格式的串
    pub fn parse_urlencoded(input: &[u8]) -> Self {
        let mut values = Self::new();
        for (k, v) in url::form_urlencoded::parse(input) {
            values.add(&k, &v);
        }
        values
    }

    pub fn add(&mut self, key: &str, value: &str) {
        self.inner
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.inner.insert(key.to_string(), vec![value.to_string()]);
    }

    /// 第一个值，不存在时返回空串
    pub fn get(&self, key: &str) -> &str {
        self.inner
            .get(key)
            .and_then(|v| v.first())
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.inner.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

pub enum Matcher {
    Static,
    Dynamic { regex: Regex, params: Vec<String> },
}

pub struct Route {
    /// 注册时的原始模式（已补全前导 `/`）
    pattern: String,
    /// 静态路由的查找键
    key: String,
    /// 参数片段之外的 `/` 个数，用于快速预过滤；子表达式自身含 `/` 时为 `None`
    slash_count: Option<usize>,
    matcher: Matcher,
    /// 为空表示不限制协议
    schemes: HashSet<String>,
    factory: HandlerFactory,
}

impl Route {
    /// 编译路由模式。
    ///
    /// # 错误处理
    /// 参数片段之外残留花括号、子表达式无法编译、或捕获组数量与参数数量不一致时
    /// 返回 `Exception::InvalidRoutePattern`。
    pub fn compile(
        pattern: &str,
        factory: HandlerFactory,
        schemes: Option<&[&str]>,
    ) -> Result<Self, Exception> {
        let pattern = if pattern.starts_with('/') {
            pattern.to_string()
        } else {
            format!("/{}", pattern)
        };
        let schemes: HashSet<String> = schemes
            .unwrap_or(&[])
            .iter()
            .map(|s| s.to_ascii_lowercase())
            .collect();

        let open = pattern.matches('{').count();
        let close = pattern.matches('}').count();
        if open == 0 || open != close {
            return Ok(Self {
                key: normalize_static(&pattern),
                slash_count: Some(pattern.matches('/').count()),
                pattern,
                matcher: Matcher::Static,
                schemes,
                factory,
            });
        }

        let mut expr = String::from("^");
        let mut params = Vec::new();
        let mut slash_count = 0;
        let mut sub_has_slash = false;
        let mut last = 0;
        for token in TOKEN_RE.find_iter(&pattern) {
            let literal = &pattern[last..token.start()];
            push_literal(&mut expr, literal, &pattern)?;
            slash_count += literal.matches('/').count();

            let inner = &token.as_str()[1..token.as_str().len() - 1];
            let (name, sub) = match inner.find('(') {
                // 保留外层括号作为捕获组
                Some(i) => (&inner[..i], inner[i..].to_string()),
                None => (inner, format!("({})", DEFAULT_PARAM_REGEX)),
            };
            sub_has_slash |= sub.contains('/');
            params.push(name.to_string());
            expr.push_str(&sub);
            last = token.end();
        }
        let tail = &pattern[last..];
        push_literal(&mut expr, tail, &pattern)?;
        slash_count += tail.matches('/').count();
        expr.push('$');

        let regex = Regex::new(&expr)
            .map_err(|e| Exception::InvalidRoutePattern(format!("{}: {}", pattern, e)))?;
        if regex.captures_len() - 1 != params.len() {
            return Err(Exception::InvalidRoutePattern(format!(
                "{}: {} parameters but {} capture groups",
                pattern,
                params.len(),
                regex.captures_len() - 1
            )));
        }
        debug!("路由{}编译为{}，参数{:?}", pattern, expr, params);

        Ok(Self {
            key: pattern.clone(),
            pattern,
            slash_count: (!sub_has_slash).then_some(slash_count),
            matcher: Matcher::Dynamic { regex, params },
            schemes,
            factory,
        })
    }

    /// 对动态路由做完整匹配，返回按顺序配对的参数。静态路由恒返回 `None`。
    pub fn match_path(&self, path: &str) -> Option<Values> {
        let Matcher::Dynamic { regex, params } = &self.matcher else {
            return None;
        };
        if let Some(count) = self.slash_count {
            if path.matches('/').count() != count {
                return None;
            }
        }
        let caps = regex.captures(path)?;
        let mut vars = Values::new();
        for (i, name) in params.iter().enumerate() {
            let value = caps.get(i + 1).map_or("", |m| m.as_str());
            vars.add(name, value);
        }
        Some(vars)
    }

    /// 协议是否满足路由限制
    pub fn accepts_scheme(&self, scheme: &str) -> bool {
        self.schemes.is_empty() || self.schemes.contains(&scheme.to_ascii_lowercase())
    }

    pub fn is_static(&self) -> bool {
        matches!(self.matcher, Matcher::Static)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn params(&self) -> &[String] {
        match &self.matcher {
            Matcher::Static => &[],
            Matcher::Dynamic { params, .. } => params,
        }
    }

    pub fn factory(&self) -> &HandlerFactory {
        &self.factory
    }
}

fn push_literal(expr: &mut String, literal: &str, pattern: &str) -> Result<(), Exception> {
    if literal.contains('{') || literal.contains('}') {
        return Err(Exception::InvalidRoutePattern(format!(
            "{}: malformed parameter near {:?}",
            pattern, literal
        )));
    }
    expr.push_str(&regex::escape(literal));
    Ok(())
}

/// 静态路由键：补全前导 `/`，根路径以外去掉末尾 `/`
pub fn normalize_static(path: &str) -> String {
    let mut key = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    while key.len() > 1 && key.ends_with('/') {
        key.pop();
    }
    key
}

// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 钩子注册表
//!
//! 生命周期事件到回调列表的映射。回调按注册顺序执行，
//! 一旦某个回调把响应标记为 finished，同一事件的后续回调不再执行。

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{Arc, RwLock},
};

use log::{debug, warn};

use crate::{context::Exchange, exception::Exception, param::HttpRequestMethod};

/// 生命周期中的钩子点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    AfterInit,
    BeforeMethod(HttpRequestMethod),
    AfterMethod(HttpRequestMethod),
    BeforeRender,
    AfterRender,
    BeforeOutput,
    AfterOutput,
    HttpStatus(u16),
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::AfterInit => write!(f, "AfterInit"),
            Hook::BeforeMethod(m) => write!(f, "BeforeMethod{}", m.title()),
            Hook::AfterMethod(m) => write!(f, "AfterMethod{}", m.title()),
            Hook::BeforeRender => write!(f, "BeforeRender"),
            Hook::AfterRender => write!(f, "AfterRender"),
            Hook::BeforeOutput => write!(f, "BeforeOutput"),
            Hook::AfterOutput => write!(f, "AfterOutput"),
            Hook::HttpStatus(code) => write!(f, "HttpStatus{}", code),
        }
    }
}

impl FromStr for Hook {
    type Err = Exception;

    /// 解析 `BeforeMethodGet`、`HttpStatus404` 这样的事件名
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || Exception::UnknownHookEvent(s.to_string());
        match s {
            "AfterInit" => return Ok(Hook::AfterInit),
            "BeforeRender" => return Ok(Hook::BeforeRender),
            "AfterRender" => return Ok(Hook::AfterRender),
            "BeforeOutput" => return Ok(Hook::BeforeOutput),
            "AfterOutput" => return Ok(Hook::AfterOutput),
            _ => {}
        }
        if let Some(code) = s.strip_prefix("HttpStatus") {
            return code.parse().map(Hook::HttpStatus).map_err(|_| unknown());
        }
        let method_of = |name: &str| {
            HttpRequestMethod::ALL
                .into_iter()
                .find(|m| m.title() == name)
                .ok_or_else(unknown)
        };
        if let Some(name) = s.strip_prefix("BeforeMethod") {
            return method_of(name).map(Hook::BeforeMethod);
        }
        if let Some(name) = s.strip_prefix("AfterMethod") {
            return method_of(name).map(Hook::AfterMethod);
        }
        Err(unknown())
    }
}

pub type HookFn = Arc<dyn Fn(&mut Exchange<'_>) + Send + Sync>;

#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<Hook, Vec<HookFn>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, hook: Hook, f: HookFn) {
        let mut hooks = match self.hooks.write() {
            Ok(h) => h,
            Err(poisoned) => {
                warn!("钩子表锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        };
        hooks.entry(hook).or_default().push(f);
        debug!("已注册钩子：{}", hook);
    }

    pub fn has(&self, hook: Hook) -> bool {
        self.snapshot(hook).is_some()
    }

    /// 按注册顺序执行回调，响应 finished 后立即停止。
    ///
    /// 回调列表先在锁内复制，执行期间不持锁，回调内部可以继续注册钩子。
    pub fn call(&self, hook: Hook, ex: &mut Exchange<'_>) {
        let Some(callbacks) = self.snapshot(hook) else {
            return;
        };
        for f in callbacks {
            if ex.is_finished() {
                break;
            }
            f(ex);
        }
    }

    fn snapshot(&self, hook: Hook) -> Option<Vec<HookFn>> {
        let hooks = match self.hooks.read() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        hooks.get(&hook).filter(|v| !v.is_empty()).cloned()
    }
}

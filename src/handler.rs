// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 处理器接口
//!
//! 每个请求都会通过路由上登记的工厂函数创建一个全新的处理器实例。
//! 所有方法都有默认实现：未覆盖的 HTTP 方法响应 `405`，
//! `render` 执行模板替换，`output` 把渲染结果写出。

use std::sync::Arc;

use crate::context::Exchange;

pub trait Handler: Send {
    /// 实例创建后、`AfterInit` 钩子之前调用
    fn init(&mut self, _ex: &mut Exchange<'_>) {}

    fn get(&mut self, ex: &mut Exchange<'_>) {
        ex.method_not_allowed();
    }

    fn post(&mut self, ex: &mut Exchange<'_>) {
        ex.method_not_allowed();
    }

    fn head(&mut self, ex: &mut Exchange<'_>) {
        ex.method_not_allowed();
    }

    fn delete(&mut self, ex: &mut Exchange<'_>) {
        ex.method_not_allowed();
    }

    fn put(&mut self, ex: &mut Exchange<'_>) {
        ex.method_not_allowed();
    }

    fn patch(&mut self, ex: &mut Exchange<'_>) {
        ex.method_not_allowed();
    }

    fn options(&mut self, ex: &mut Exchange<'_>) {
        ex.method_not_allowed();
    }

    fn render(&mut self, ex: &mut Exchange<'_>) {
        ex.render();
    }

    fn output(&mut self, ex: &mut Exchange<'_>) {
        ex.output();
    }
}

/// 为每个请求创建处理器实例的工厂
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn Handler> + Send + Sync>;

/// 把一个返回具体处理器类型的闭包包装为 `HandlerFactory`
pub fn factory<H, F>(f: F) -> HandlerFactory
where
    H: Handler + 'static,
    F: Fn() -> H + Send + Sync + 'static,
{
    Arc::new(move || Box::new(f()) as Box<dyn Handler>)
}

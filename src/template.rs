// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 模板
//!
//! 极简的文本替换模板，渲染结果写入一个结果缓冲区：
//! - `{{name}}`：HTML 转义后输出变量；
//! - `{{{name}}}`：原样输出变量；
//! - `{{> name}}`：插入同名子模板（子模板内不再展开子模板）。
//!
//! 未定义的变量与子模板输出为空。

use std::{collections::HashMap, fs, path::Path};

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::{exception::Exception, util::escape_html};

lazy_static! {
    static ref TAG_RE: Regex =
        Regex::new(r"\{\{\{\s*(\w+)\s*\}\}\}|\{\{>\s*(\w+)\s*\}\}|\{\{\s*(\w+)\s*\}\}").unwrap();
}

#[derive(Debug, Clone, Default)]
pub struct Template {
    vars: HashMap<String, String>,
    source: Option<String>,
    partials: HashMap<String, String>,
    result: Option<Vec<u8>>,
}

impl Template {
    /// 以全局模板变量为初始值创建模板
    pub fn new(globals: &HashMap<String, String>) -> Self {
        Self {
            vars: globals.clone(),
            ..Self::default()
        }
    }

    pub fn set_var(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), value.to_string());
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|s| s.as_str())
    }

    pub fn set_template_string(&mut self, source: &str) {
        self.source = Some(source.to_string());
    }

    pub fn set_template_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Exception> {
        self.source = Some(fs::read_to_string(path)?);
        Ok(())
    }

    pub fn set_sub_template_string(&mut self, name: &str, source: &str) {
        self.partials.insert(name.to_string(), source.to_string());
    }

    pub fn set_sub_template_file<P: AsRef<Path>>(
        &mut self,
        name: &str,
        path: P,
    ) -> Result<(), Exception> {
        let source = fs::read_to_string(path)?;
        self.set_sub_template_string(name, &source);
        Ok(())
    }

    pub fn has_template(&self) -> bool {
        self.source.is_some()
    }

    /// 执行替换并写入结果缓冲区。没有模板或已经渲染过时返回 `false`。
    pub fn execute(&mut self) -> bool {
        if self.result.is_some() {
            return false;
        }
        let Some(source) = self.source.as_deref() else {
            return false;
        };
        let rendered = self.substitute(source, true);
        self.result = Some(rendered.into_bytes());
        true
    }

    fn substitute(&self, source: &str, allow_partials: bool) -> String {
        TAG_RE
            .replace_all(source, |caps: &Captures| {
                if let Some(name) = caps.get(1) {
                    self.var(name.as_str()).unwrap_or("").to_string()
                } else if let Some(name) = caps.get(2) {
                    match self.partials.get(name.as_str()) {
                        Some(p) if allow_partials => self.substitute(p, false),
                        _ => String::new(),
                    }
                } else {
                    let name = caps.get(3).map_or("", |m| m.as_str());
                    escape_html(self.var(name).unwrap_or(""))
                }
            })
            .into_owned()
    }

    pub fn result(&self) -> &[u8] {
        self.result.as_deref().unwrap_or(&[])
    }

    pub fn result_string(&self) -> String {
        String::from_utf8_lossy(self.result()).into_owned()
    }

    pub fn set_result(&mut self, content: Vec<u8>) {
        self.result = Some(content);
    }

    pub fn set_result_string(&mut self, content: &str) {
        self.set_result(content.as_bytes().to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escaped_and_raw() {
        let mut tpl = Template::default();
        tpl.set_var("name", "<b>Tom</b>");
        tpl.set_template_string("Hi {{ name }} / {{{name}}} / {{missing}}!");
        assert!(tpl.execute());
        assert_eq!(
            tpl.result_string(),
            "Hi &lt;b&gt;Tom&lt;/b&gt; / <b>Tom</b> / !"
        );
    }

    #[test]
    fn test_globals_and_override() {
        let mut globals = HashMap::new();
        globals.insert("site".to_string(), "gantry".to_string());
        globals.insert("title".to_string(), "home".to_string());

        let mut tpl = Template::new(&globals);
        tpl.set_var("title", "about");
        tpl.set_template_string("{{site}}:{{title}}");
        tpl.execute();
        assert_eq!(tpl.result_string(), "gantry:about");
    }

    #[test]
    fn test_partials() {
        let mut tpl = Template::default();
        tpl.set_var("user", "amy");
        tpl.set_sub_template_string("header", "<h1>{{user}}</h1>{{> header}}");
        tpl.set_template_string("{{> header}}<p>body</p>{{> footer}}");
        tpl.execute();
        assert_eq!(tpl.result_string(), "<h1>amy</h1><p>body</p>");
    }

    #[test]
    fn test_execute_once_and_no_template() {
        let mut tpl = Template::default();
        assert!(!tpl.execute());
        assert!(tpl.result().is_empty());

        tpl.set_template_string("a");
        assert!(tpl.execute());
        assert!(!tpl.execute());

        tpl.set_result_string("replaced");
        assert_eq!(tpl.result(), b"replaced");
    }

    #[test]
    fn test_template_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.tpl");
        fs::write(&path, "x={{x}}").unwrap();

        let mut tpl = Template::default();
        tpl.set_var("x", "1");
        tpl.set_template_file(&path).unwrap();
        tpl.execute();
        assert_eq!(tpl.result_string(), "x=1");

        assert!(tpl.set_template_file(dir.path().join("nope.tpl")).is_err());
    }
}

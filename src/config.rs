// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 配置模块
//!
//! 进程启动时加载一次、此后只读的应用配置。支持三种文件格式：
//! - `*.toml`：TOML 文档；
//! - 首个非空字符为 `{` 的内容：JSON 文档；
//! - 其余：扁平的 `key = value` 行，`#` 开头为注释。

use serde_derive::{Deserialize, Serialize};

use log::{debug, info, warn};
use std::{fs, path::Path};

use crate::exception::Exception;

/// 未指定配置文件时使用的默认路径
pub const DEFAULT_CONFIG_FILE: &str = "app.conf";

/// 以逗号分隔的列表型配置项
const LIST_KEYS: [&str; 3] = ["gzip_types", "static_file_types", "static_file_dirs"];

/// 字符串型配置项，值不做类型推断
const STRING_KEYS: [&str; 9] = [
    "app_root",
    "listen_addr",
    "run_mode",
    "cookie_secret",
    "session_name",
    "prefix_path",
    "ssl_certificate",
    "ssl_certificate_key",
    "log_config",
];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    app_root: String,
    listen_addr: String,
    listen_port: u16,
    run_mode: String,
    worker_threads: usize,
    cookie_secret: String,
    session_name: String,
    session_ttl: u64,
    session_gc_interval: u64,
    enable_gzip: bool,
    gzip_min_length: usize,
    gzip_types: Vec<String>,
    enable_route_cache: bool,
    route_cache_size: usize,
    file_cache_size: usize,
    prefix_path: String,
    static_file_types: Vec<String>,
    static_file_dirs: Vec<String>,
    max_body_size: usize,
    request_timeout: u64,
    ssl_certificate: String,
    ssl_certificate_key: String,
    log_config: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            app_root: ".".to_string(),
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 7878,
            run_mode: "http".to_string(),
            worker_threads: 0,
            cookie_secret: String::new(),
            session_name: "GANTRYSESSID".to_string(),
            session_ttl: 900,
            session_gc_interval: 1,
            enable_gzip: true,
            gzip_min_length: 1024,
            gzip_types: ["text/", "javascript", "json", "xml", "css"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            enable_route_cache: true,
            route_cache_size: 1024,
            file_cache_size: 64,
            prefix_path: String::new(),
            static_file_types: Vec::new(),
            static_file_dirs: Vec::new(),
            max_body_size: 10 * 1024 * 1024,
            request_timeout: 30,
            ssl_certificate: String::new(),
            ssl_certificate_key: String::new(),
            log_config: "config/log4rs.yaml".to_string(),
        }
    }

    /// 从文件加载配置，根据扩展名与内容判断格式。
    pub fn from_file(filename: &str) -> Result<Self, Exception> {
        let content = match fs::read_to_string(filename) {
            Ok(s) => s,
            Err(e) => {
                return Err(Exception::ConfigLoad(format!("{}: {}", filename, e)));
            }
        };
        let config = if filename.ends_with(".toml") {
            Self::from_toml_str(&content)
        } else if content.trim_start().starts_with('{') {
            Self::from_json_str(&content)
        } else {
            Self::from_flat_str(&content)
        };
        config.map_err(|e| match e {
            Exception::ConfigLoad(detail) => {
                Exception::ConfigLoad(format!("{}: {}", filename, detail))
            }
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, Exception> {
        toml::from_str(content).map_err(|e| Exception::ConfigLoad(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> Result<Self, Exception> {
        serde_json::from_str(content).map_err(|e| Exception::ConfigLoad(e.to_string()))
    }

    /// 解析扁平的 `key = value` 配置。
    ///
    /// 字符串型的键原样保留（两端引号会被去掉），列表型的键按逗号切分；
    /// 其余按字面推断：`true`/`false` 为布尔，整数为整型。组装成 TOML 表后再反序列化。
    pub fn from_flat_str(content: &str) -> Result<Self, Exception> {
        let mut table = toml::Table::new();
        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = match line.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => {
                    return Err(Exception::ConfigLoad(format!(
                        "line {}: expected key = value",
                        lineno + 1
                    )));
                }
            };
            table.insert(key.to_string(), flat_value(key, value));
        }
        toml::Value::Table(table)
            .try_into::<Config>()
            .map_err(|e| Exception::ConfigLoad(e.to_string()))
    }

    /// 按命令行参数加载配置。
    ///
    /// 显式指定的文件读取失败是致命错误；默认的 `app.conf` 缺失时回退到默认配置。
    pub fn load(explicit: Option<&str>) -> Result<Self, Exception> {
        match explicit {
            Some(path) => {
                let config = Self::from_file(path)?;
                info!("配置文件{}已载入", path);
                Ok(config)
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                let config = Self::from_file(DEFAULT_CONFIG_FILE)?;
                info!("配置文件{}已载入", DEFAULT_CONFIG_FILE);
                Ok(config)
            }
            None => {
                warn!("未找到配置文件{}，使用默认配置", DEFAULT_CONFIG_FILE);
                Ok(Self::new())
            }
        }
    }

    /// 第一个不以 `-` 开头的命令行参数（跳过程序名）
    pub fn path_from_args<I: IntoIterator<Item = String>>(args: I) -> Option<String> {
        let path = args.into_iter().skip(1).find(|a| !a.starts_with('-'));
        debug!("命令行指定的配置文件：{:?}", path);
        path
    }
}

fn flat_value(key: &str, value: &str) -> toml::Value {
    let unquoted = value.trim_matches('"');
    if LIST_KEYS.contains(&key) {
        return toml::Value::Array(
            unquoted
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| toml::Value::String(s.to_string()))
                .collect(),
        );
    }
    if STRING_KEYS.contains(&key) || value.starts_with('"') {
        return toml::Value::String(unquoted.to_string());
    }
    match value {
        "true" => toml::Value::Boolean(true),
        "false" => toml::Value::Boolean(false),
        _ => match value.parse::<i64>() {
            Ok(n) => toml::Value::Integer(n),
            Err(_) => toml::Value::String(value.to_string()),
        },
    }
}

// --- Getter 访问器实现 ---

impl Config {
    pub fn app_root(&self) -> &str {
        &self.app_root
    }

    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn run_mode(&self) -> &str {
        &self.run_mode
    }

    /// 为 0 时取 CPU 核心数
    pub fn worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get()
        } else {
            self.worker_threads
        }
    }

    pub fn cookie_secret(&self) -> &str {
        &self.cookie_secret
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn session_ttl(&self) -> u64 {
        self.session_ttl
    }

    pub fn session_gc_interval(&self) -> u64 {
        self.session_gc_interval
    }

    pub fn enable_gzip(&self) -> bool {
        self.enable_gzip
    }

    pub fn gzip_min_length(&self) -> usize {
        self.gzip_min_length
    }

    pub fn gzip_types(&self) -> &[String] {
        &self.gzip_types
    }

    pub fn enable_route_cache(&self) -> bool {
        self.enable_route_cache
    }

    pub fn route_cache_size(&self) -> usize {
        self.route_cache_size
    }

    pub fn file_cache_size(&self) -> usize {
        self.file_cache_size
    }

    pub fn prefix_path(&self) -> &str {
        &self.prefix_path
    }

    pub fn static_file_types(&self) -> &[String] {
        &self.static_file_types
    }

    pub fn static_file_dirs(&self) -> &[String] {
        &self.static_file_dirs
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    pub fn request_timeout(&self) -> u64 {
        self.request_timeout
    }

    pub fn ssl_certificate(&self) -> &str {
        &self.ssl_certificate
    }

    pub fn ssl_certificate_key(&self) -> &str {
        &self.ssl_certificate_key
    }

    pub fn log_config(&self) -> &str {
        &self.log_config
    }
}

// --- 构建期修改，仅在启动前使用 ---

impl Config {
    pub fn with_app_root(mut self, root: &str) -> Self {
        self.app_root = root.to_string();
        self
    }

    pub fn with_listen(mut self, addr: &str, port: u16) -> Self {
        self.listen_addr = addr.to_string();
        self.listen_port = port;
        self
    }

    pub fn with_run_mode(mut self, mode: &str) -> Self {
        self.run_mode = mode.to_string();
        self
    }

    pub fn with_cookie_secret(mut self, secret: &str) -> Self {
        self.cookie_secret = secret.to_string();
        self
    }

    pub fn with_gzip(mut self, enable: bool, min_length: usize) -> Self {
        self.enable_gzip = enable;
        self.gzip_min_length = min_length;
        self
    }

    pub fn with_route_cache(mut self, enable: bool) -> Self {
        self.enable_route_cache = enable;
        self
    }

    pub fn with_session_gc_interval(mut self, secs: u64) -> Self {
        self.session_gc_interval = secs;
        self
    }

    pub fn with_tls(mut self, certificate: &str, key: &str) -> Self {
        self.ssl_certificate = certificate.to_string();
        self.ssl_certificate_key = key.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.listen_port(), 7878);
        assert_eq!(config.run_mode(), "http");
        assert_eq!(config.session_name(), "GANTRYSESSID");
        assert_eq!(config.gzip_min_length(), 1024);
        assert!(config.worker_threads() >= 1);
    }

    #[test]
    fn test_flat_format() {
        let content = "# comment\n\nlisten_port = 8080\nenable_gzip=false\nsession_name = \"SID\"\nstatic_file_types = .css, .js\nprefix_path = /app\n";
        let config = Config::from_flat_str(content).unwrap();

        assert_eq!(config.listen_port(), 8080);
        assert!(!config.enable_gzip());
        assert_eq!(config.session_name(), "SID");
        assert_eq!(
            config.static_file_types(),
            &[".css".to_string(), ".js".to_string()]
        );
        assert_eq!(config.prefix_path(), "/app");
        assert_eq!(config.session_ttl(), 900);
    }

    #[test]
    fn test_flat_format_numeric_strings() {
        let content = "cookie_secret = 1234567890\nsession_name = 42\nlisten_addr = ::1\nlisten_port = 81\n";
        let config = Config::from_flat_str(content).unwrap();

        assert_eq!(config.cookie_secret(), "1234567890");
        assert_eq!(config.session_name(), "42");
        assert_eq!(config.listen_addr(), "::1");
        assert_eq!(config.listen_port(), 81);
    }

    #[test]
    fn test_flat_format_bad_line() {
        let result = Config::from_flat_str("listen_port 80\n");
        assert!(matches!(result, Err(Exception::ConfigLoad(_))));
    }

    #[test]
    fn test_flat_format_wrong_type() {
        let result = Config::from_flat_str("listen_port = eighty\n");
        assert!(matches!(result, Err(Exception::ConfigLoad(_))));
    }

    #[test]
    fn test_json_and_toml_files() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("app.json");
        let mut f = fs::File::create(&json_path).unwrap();
        writeln!(f, r#"{{ "listen_port": 9000, "run_mode": "fcgi" }}"#).unwrap();
        let config = Config::from_file(json_path.to_str().unwrap()).unwrap();
        assert_eq!(config.listen_port(), 9000);
        assert_eq!(config.run_mode(), "fcgi");

        let toml_path = dir.path().join("app.toml");
        fs::write(&toml_path, "listen_port = 9001\ngzip_types = [\"text/\"]\n").unwrap();
        let config = Config::from_file(toml_path.to_str().unwrap()).unwrap();
        assert_eq!(config.listen_port(), 9001);
        assert_eq!(config.gzip_types(), &["text/".to_string()]);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = Config::load(Some("/definitely/not/here.conf"));
        assert!(matches!(result, Err(Exception::ConfigLoad(_))));
    }

    #[test]
    fn test_path_from_args() {
        let args = vec!["gantry", "-v", "site.conf", "other"]
            .into_iter()
            .map(String::from);
        assert_eq!(Config::path_from_args(args), Some("site.conf".to_string()));

        let args = vec!["gantry".to_string()];
        assert_eq!(Config::path_from_args(args), None);
    }
}

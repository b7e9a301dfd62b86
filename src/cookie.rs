// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Cookie
//!
//! 普通 Cookie 的解析与 `Set-Cookie` 生成，以及加密签名的安全 Cookie。
//!
//! 安全 Cookie 的值格式为 `payload|timestamp|signature`：
//! - `payload` 为 `base64url(iv + AES-256-CTR(value))`，密钥取 SHA-256(secret)，`iv` 每次随机；
//! - `timestamp` 为过期时刻的 Unix 秒数，`0` 表示会话 Cookie；
//! - `signature` 为 HMAC-SHA1(secret, name + payload + timestamp + User-Agent) 的十六进制。

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aes::cipher::{generic_array::GenericArray, KeyIvInit, StreamCipher};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use log::debug;
use sha1::Sha1;
use sha2::{Digest as _, Sha256};
use uuid::Uuid;

use crate::util::http_date;

type HmacSha1 = Hmac<Sha1>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

const IV_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct Cookie {
    name: String,
    value: String,
    /// 秒；0 表示会话 Cookie，负数表示立即删除
    max_age: i64,
    path: String,
    domain: String,
    secure: bool,
    http_only: bool,
}

impl Cookie {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            max_age: 0,
            path: String::new(),
            domain: String::new(),
            secure: false,
            http_only: false,
        }
    }

    pub fn max_age(mut self, secs: i64) -> Self {
        self.max_age = secs;
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// 生成 `Set-Cookie` 响应头的值
    pub fn to_header_value(&self) -> String {
        let mut s = format!("{}={}", self.name, self.value);
        if !self.path.is_empty() {
            s.push_str(&format!("; Path={}", self.path));
        }
        if !self.domain.is_empty() {
            s.push_str(&format!("; Domain={}", self.domain));
        }
        if self.max_age > 0 {
            let expires = SystemTime::now() + Duration::from_secs(self.max_age as u64);
            s.push_str(&format!("; Expires={}; Max-Age={}", http_date(expires), self.max_age));
        } else if self.max_age < 0 {
            s.push_str(&format!("; Expires={}; Max-Age=0", http_date(UNIX_EPOCH)));
        }
        if self.secure {
            s.push_str("; Secure");
        }
        if self.http_only {
            s.push_str("; HttpOnly");
        }
        s
    }
}

/// 解析 `Cookie` 请求头为 `(name, value)` 列表
pub fn parse_cookie_header(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}

/// 在 `Cookie` 请求头中查找第一个同名 Cookie
pub fn find_cookie(header: Option<&str>, name: &str) -> Option<String> {
    parse_cookie_header(header?)
        .into_iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v)
}

fn unix_now(now: SystemTime) -> u64 {
    now.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

fn mac(secret: &str, name: &str, payload: &str, ts: &str, user_agent: &str) -> Option<HmacSha1> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(name.as_bytes());
    mac.update(payload.as_bytes());
    mac.update(ts.as_bytes());
    mac.update(user_agent.as_bytes());
    Some(mac)
}

fn cipher(secret: &str, iv: &[u8]) -> Aes256Ctr {
    let key = Sha256::digest(secret.as_bytes());
    Aes256Ctr::new(&key, GenericArray::from_slice(iv))
}

/// `iv` 在前，密文在后
fn encrypt(secret: &str, value: &str) -> Vec<u8> {
    let iv = Uuid::new_v4().into_bytes();
    let mut out = Vec::with_capacity(IV_LEN + value.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(value.as_bytes());
    cipher(secret, &iv).apply_keystream(&mut out[IV_LEN..]);
    out
}

fn decrypt(secret: &str, payload: &[u8]) -> Option<String> {
    if payload.len() < IV_LEN {
        return None;
    }
    let (iv, data) = payload.split_at(IV_LEN);
    let mut data = data.to_vec();
    cipher(secret, iv).apply_keystream(&mut data);
    String::from_utf8(data).ok()
}

/// 生成安全 Cookie 的值：先加密，再对密文签名
pub fn sign_value(
    secret: &str,
    name: &str,
    value: &str,
    max_age: i64,
    user_agent: &str,
    now: SystemTime,
) -> String {
    let ts = if max_age > 0 {
        (unix_now(now) + max_age as u64).to_string()
    } else {
        "0".to_string()
    };
    let payload = URL_SAFE_NO_PAD.encode(encrypt(secret, value));
    let sig = mac(secret, name, &payload, &ts, user_agent)
        .map(|m| hex::encode(m.finalize().into_bytes()))
        .unwrap_or_default();
    format!("{}|{}|{}", payload, ts, sig)
}

/// 校验并解密安全 Cookie，返回原始值。格式错误、签名不符或已过期时返回 `None`。
pub fn verify_value(
    secret: &str,
    name: &str,
    raw: &str,
    user_agent: &str,
    now: SystemTime,
) -> Option<String> {
    let mut parts = raw.splitn(3, '|');
    let (payload, ts, sig) = (parts.next()?, parts.next()?, parts.next()?);
    let sig = hex::decode(sig).ok()?;
    if mac(secret, name, payload, ts, user_agent)?
        .verify_slice(&sig)
        .is_err()
    {
        debug!("Cookie {}签名校验失败", name);
        return None;
    }
    let expires: u64 = ts.parse().ok()?;
    if expires > 0 && unix_now(now) > expires {
        debug!("Cookie {}已过期", name);
        return None;
    }
    decrypt(secret, &URL_SAFE_NO_PAD.decode(payload).ok()?)
}

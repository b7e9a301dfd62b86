// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 表单解析
//!
//! 按请求的 `Content-Type` 解析请求体：
//! - `application/x-www-form-urlencoded`：键值对；
//! - `multipart/form-data`：普通字段计入表单参数，带文件名的字段作为上传文件保存。
//!
//! 其余类型的请求体视为空表单。

use std::{
    collections::HashMap,
    fs,
    io::{self, Cursor, Read},
    path::Path,
};

use bytes::Bytes;
use log::{debug, warn};
use multipart::server::Multipart;

use crate::{exception::Exception, route::Values};

/// 未声明类型的上传文件
const DEFAULT_FILE_TYPE: &str = "application/octet-stream";

/// 通过 multipart 表单上传的一个文件
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    field: String,
    filename: String,
    content_type: String,
    data: Bytes,
}

impl UploadFile {
    /// 表单字段名
    pub fn field(&self) -> &str {
        &self.field
    }

    /// 客户端提供的文件名
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 写入到指定路径，父目录不存在时一并创建
    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Exception> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, &self.data)?;
        Ok(())
    }
}

/// 解析后的请求体表单
#[derive(Debug, Default)]
pub struct Form {
    values: Values,
    files: HashMap<String, Vec<UploadFile>>,
}

impl Form {
    /// 解析失败只记录警告，得到空表单
    pub fn parse(id: u128, content_type: Option<&str>, body: &[u8]) -> Self {
        let Some(content_type) = content_type else {
            return Self::default();
        };
        let mut parts = content_type.split(';');
        let mime = parts.next().unwrap_or("").trim();

        if mime.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
            return Self {
                values: Values::parse_urlencoded(body),
                files: HashMap::new(),
            };
        }
        if !mime.eq_ignore_ascii_case("multipart/form-data") {
            return Self::default();
        }
        let Some(boundary) = boundary(parts) else {
            warn!("[ID{}]multipart请求缺少boundary", id);
            return Self::default();
        };
        match parse_multipart(body, &boundary) {
            Ok(form) => {
                debug!(
                    "[ID{}]multipart表单：{}个字段，{}个文件字段",
                    id,
                    form.values.len(),
                    form.files.len()
                );
                form
            }
            Err(e) => {
                warn!("[ID{}]multipart表单解析失败：{}", id, e);
                Self::default()
            }
        }
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    /// 该字段的第一个上传文件
    pub fn file(&self, name: &str) -> Option<&UploadFile> {
        self.files.get(name).and_then(|f| f.first())
    }

    pub fn files(&self, name: &str) -> &[UploadFile] {
        self.files.get(name).map(|f| f.as_slice()).unwrap_or(&[])
    }
}

fn boundary<'a>(mut params: impl Iterator<Item = &'a str>) -> Option<String> {
    params
        .find_map(|p| {
            let (k, v) = p.split_once('=')?;
            k.trim()
                .eq_ignore_ascii_case("boundary")
                .then(|| v.trim().trim_matches('"').to_string())
        })
        .filter(|b| !b.is_empty())
}

fn parse_multipart(body: &[u8], boundary: &str) -> io::Result<Form> {
    let mut form = Form::default();
    let mut multipart = Multipart::with_body(Cursor::new(body), boundary);
    while let Some(mut field) = multipart.read_entry()? {
        let name = field.headers.name.to_string();
        let mut data = Vec::new();
        field.data.read_to_end(&mut data)?;

        match field.headers.filename.clone() {
            Some(filename) => {
                let content_type = field
                    .headers
                    .content_type
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| DEFAULT_FILE_TYPE.to_string());
                form.files.entry(name.clone()).or_default().push(UploadFile {
                    field: name,
                    filename,
                    content_type,
                    data: Bytes::from(data),
                });
            }
            None => form.values.add(&name, &String::from_utf8_lossy(&data)),
        }
    }
    Ok(form)
}

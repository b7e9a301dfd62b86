// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 监听与连接
//!
//! 在 Tokio 运行时上接受连接，每个连接交给阻塞线程池处理一个请求。
//! 支持三种运行模式：
//! - `http`：明文 HTTP/1.x；
//! - `https`：基于 rustls 的 TLS，需要 PEM 格式的证书与私钥；
//! - `fcgi`：FastCGI 响应者。
//!
//! 监听地址既可以是 `host` + 端口，也可以是 `unix:/path/to.sock` 形式的 Unix 域套接字。

use std::{
    fmt,
    fs::File,
    io::{self, BufReader, Read, Write},
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use log::{debug, error, info, warn};
use rustls::{ServerConfig, ServerConnection, StreamOwned};
use tokio::{net::TcpListener, sync::Notify};

use crate::{
    app::App,
    exception::Exception,
    fcgi,
    param::HttpVersion,
    request::Request,
    response::{Framing, GzipPolicy, ResponseWriter},
};

/// 请求头的长度上限
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Http,
    Https,
    Fcgi,
}

impl FromStr for RunMode {
    type Err = Exception;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(RunMode::Http),
            "https" => Ok(RunMode::Https),
            "fcgi" => Ok(RunMode::Fcgi),
            _ => Err(Exception::UnsupportedRunMode(s.to_string())),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunMode::Http => "http",
            RunMode::Https => "https",
            RunMode::Fcgi => "fcgi",
        };
        write!(f, "{}", name)
    }
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener, PathBuf),
}

impl Listener {
    fn cleanup(&self) {
        match self {
            Listener::Tcp(_) => {}
            #[cfg(unix)]
            Listener::Unix(_, path) => {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

/// 阻塞模式下的连接
enum Conn {
    Tcp(std::net::TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Conn {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Conn::Tcp(s) => s.set_read_timeout(timeout),
            #[cfg(unix)]
            Conn::Unix(s) => s.set_read_timeout(timeout),
        }
    }
}

impl Read for Conn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Conn::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Conn::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Conn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Conn::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Conn::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Conn::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Conn::Unix(s) => s.flush(),
        }
    }
}

/// 用于从其他任务停止监听循环
#[derive(Clone)]
pub struct ServerHandle {
    stop: Arc<Notify>,
}

impl ServerHandle {
    /// 停止接受新连接；已经在处理的请求会继续完成。
    /// 在 `serve` 开始之前调用同样有效。
    pub fn stop(&self) {
        self.stop.notify_one();
    }
}

pub struct Server {
    app: App,
    mode: RunMode,
    listener: Listener,
    tls: Option<Arc<ServerConfig>>,
    stop: Arc<Notify>,
}

impl Server {
    /// 按应用配置解析运行模式、加载证书并绑定监听地址。
    ///
    /// # 错误处理
    /// 运行模式未知、证书无法加载或地址无法绑定时返回错误，调用方应视为致命错误。
    pub async fn bind(app: App) -> Result<Self, Exception> {
        let config = app.config();
        let mode: RunMode = config.run_mode().parse()?;
        let tls = match mode {
            RunMode::Https => Some(load_tls_config(
                config.ssl_certificate(),
                config.ssl_certificate_key(),
            )?),
            _ => None,
        };

        let listener = match config.listen_addr().strip_prefix("unix:") {
            Some(path) => bind_unix(path)?,
            None => {
                let addr = join_host_port(config.listen_addr(), config.listen_port());
                let listener = TcpListener::bind(&addr)
                    .await
                    .map_err(|e| Exception::Bind(format!("{}: {}", addr, e)))?;
                Listener::Tcp(listener)
            }
        };

        Ok(Self {
            app,
            mode,
            listener,
            tls,
            stop: Arc::new(Notify::new()),
        })
    }

    /// TCP 监听的实际地址，绑定端口 0 时用于得知分配到的端口
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            Listener::Tcp(l) => l.local_addr().ok(),
            #[cfg(unix)]
            Listener::Unix(..) => None,
        }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    /// 接受连接直到 `ServerHandle::stop` 被调用
    pub async fn serve(self) -> Result<(), Exception> {
        match self.local_addr() {
            Some(addr) => info!("服务端以{}模式在{}上监听", self.mode, addr),
            None => info!("服务端以{}模式在Unix套接字上监听", self.mode),
        }

        let timeout = match self.app.config().request_timeout() {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let mut id: u128 = 0;

        loop {
            let accepted = tokio::select! {
                _ = self.stop.notified() => {
                    info!("监听循环接收到停机指令，正在退出...");
                    break;
                }
                accepted = accept(&self.listener) => accepted,
            };
            let conn = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("接受连接失败：{}", e);
                    continue;
                }
            };
            if let Err(e) = conn.set_read_timeout(timeout) {
                warn!("[ID{}]无法设置读取超时：{}", id, e);
            }
            debug!("[ID{}]连接已建立", id);

            let app = self.app.clone();
            let mode = self.mode;
            let tls = self.tls.clone();
            tokio::task::spawn_blocking(move || handle_connection(&app, conn, id, mode, tls));
            id += 1;
        }

        self.listener.cleanup();
        Ok(())
    }
}

#[cfg(unix)]
fn bind_unix(path: &str) -> Result<Listener, Exception> {
    use std::os::unix::fs::PermissionsExt;

    let path = PathBuf::from(path);
    // 上次运行遗留的套接字文件
    if path.exists() {
        std::fs::remove_file(&path)
            .map_err(|e| Exception::Bind(format!("{}: {}", path.display(), e)))?;
    }
    let listener = tokio::net::UnixListener::bind(&path)
        .map_err(|e| Exception::Bind(format!("{}: {}", path.display(), e)))?;
    if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666)) {
        warn!("无法修改套接字{}的权限：{}", path.display(), e);
    }
    Ok(Listener::Unix(listener, path))
}

#[cfg(not(unix))]
fn bind_unix(path: &str) -> Result<Listener, Exception> {
    Err(Exception::Bind(format!("unix:{} is not supported on this platform", path)))
}

async fn accept(listener: &Listener) -> io::Result<Conn> {
    match listener {
        Listener::Tcp(l) => {
            let (stream, addr) = l.accept().await?;
            debug!("新的连接：{}", addr);
            let stream = stream.into_std()?;
            stream.set_nonblocking(false)?;
            Ok(Conn::Tcp(stream))
        }
        #[cfg(unix)]
        Listener::Unix(l, _) => {
            let (stream, _) = l.accept().await?;
            let stream = stream.into_std()?;
            stream.set_nonblocking(false)?;
            Ok(Conn::Unix(stream))
        }
    }
}

fn handle_connection(
    app: &App,
    conn: Conn,
    id: u128,
    mode: RunMode,
    tls: Option<Arc<ServerConfig>>,
) {
    match (mode, tls) {
        (RunMode::Https, Some(tls)) => {
            let session = match ServerConnection::new(tls) {
                Ok(s) => s,
                Err(e) => {
                    error!("[ID{}]无法创建TLS会话：{}", id, e);
                    return;
                }
            };
            let mut stream = StreamOwned::new(session, conn);
            serve_http(app, &mut stream, id, "https");
            stream.conn.send_close_notify();
            let _ = stream.flush();
        }
        (RunMode::Fcgi, _) => {
            let mut conn = conn;
            if let Err(e) = fcgi::serve_connection(app, &mut conn, id) {
                warn!("[ID{}]FastCGI连接异常结束：{}", id, e);
            }
        }
        _ => {
            let mut conn = conn;
            serve_http(app, &mut conn, id, "http");
        }
    }
    debug!("[ID{}]连接已关闭", id);
}

/// 读取一个 HTTP 请求并分派；每个连接只处理一个请求
fn serve_http<S: Read + Write>(app: &App, stream: &mut S, id: u128, scheme: &str) {
    let max_body = app.config().max_body_size();
    let request = {
        let mut reader = BufReader::new(&mut *stream);
        Request::read_from(&mut reader, id, MAX_HEAD_SIZE, max_body)
    };
    match request {
        Ok(mut request) => {
            request.set_scheme(scheme);
            app.dispatch(request, stream);
        }
        Err(Exception::Io(e)) => {
            debug!("[ID{}]读取请求失败：{}", id, e);
        }
        Err(e) => {
            warn!("[ID{}]解析HTTP请求失败：{}", id, e);
            send_error(app, stream, id, e.status_code().unwrap_or(400));
        }
    }
}

/// 请求无法解析时直接回复错误状态
fn send_error<S: Write>(app: &App, stream: &mut S, id: u128, code: u16) {
    let mut response = ResponseWriter::new(
        id,
        stream,
        Framing::Http(HttpVersion::V1_1),
        false,
        GzipPolicy::disabled(),
        Arc::clone(&app.shared.status_pages),
    );
    response.write_header(code);
    response.complete();
}

/// 从 PEM 文件构建 TLS 配置
pub fn load_tls_config(cert_path: &str, key_path: &str) -> Result<Arc<ServerConfig>, Exception> {
    let open = |path: &str| {
        File::open(path)
            .map(BufReader::new)
            .map_err(|e| Exception::TlsConfig(format!("{}: {}", path, e)))
    };

    let certs = rustls_pemfile::certs(&mut open(cert_path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Exception::TlsConfig(format!("{}: {}", cert_path, e)))?;
    if certs.is_empty() {
        return Err(Exception::TlsConfig(format!("{}: no certificate found", cert_path)));
    }
    let key = rustls_pemfile::private_key(&mut open(key_path)?)
        .map_err(|e| Exception::TlsConfig(format!("{}: {}", key_path, e)))?
        .ok_or_else(|| Exception::TlsConfig(format!("{}: no private key found", key_path)))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Exception::TlsConfig(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Exception::TlsConfig(e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    info!("已加载TLS证书{}", cert_path);
    Ok(Arc::new(config))
}

/// 组合监听地址，IPv6 字面量加方括号
fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

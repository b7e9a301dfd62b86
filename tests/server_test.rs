// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 启动真实监听器，通过套接字发送请求。

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream},
    time::Duration,
};

use gantry::{App, Config, Exception, Exchange, Handler, Server, ServerHandle};
use tokio::task::JoinHandle;

struct Post;

impl Handler for Post {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        let out = format!("Post_Get_{}_{}", ex.path_var("name"), ex.path_var("page"));
        ex.write_string(&out);
    }

    fn post(&mut self, ex: &mut Exchange<'_>) {
        let name = ex.form_var("postname");
        ex.write_string(&format!("Post_Post_{}", name));
    }
}

fn local_config(extra: &str) -> Config {
    Config::from_flat_str(&format!("listen_addr = 127.0.0.1\nlisten_port = 0\n{}", extra)).unwrap()
}

async fn start(config: Config) -> (SocketAddr, ServerHandle, JoinHandle<Result<(), Exception>>) {
    let app = App::new(config);
    app.add_route("/post/{name}-{page([0-9]+)}", || Post).unwrap();
    app.add_route("/post", || Post).unwrap();
    let server = Server::bind(app).await.unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.handle();
    let task = tokio::spawn(server.serve());
    (addr, handle, task)
}

/// 发送原始请求并读到连接关闭
async fn roundtrip(addr: SocketAddr, raw: &'static [u8]) -> String {
    tokio::task::spawn_blocking(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.write_all(raw).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        String::from_utf8_lossy(&out).into_owned()
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_get_over_tcp() {
    let (addr, handle, task) = start(local_config("")).await;

    let resp = roundtrip(
        addr,
        b"GET /post/asdf-1 HTTP/1.1\r\nHost: localhost\r\nUser-Agent: test\r\n\r\n",
    )
    .await;
    assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"), "{}", resp);
    assert!(resp.contains("Connection: close\r\n"));
    assert!(resp.contains("Server: gantry\r\n"));
    assert!(resp.ends_with("\r\n\r\nPost_Get_asdf_1"));

    let resp = roundtrip(
        addr,
        b"POST /post HTTP/1.0\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 13\r\n\r\npostname=fdsa",
    )
    .await;
    assert!(resp.starts_with("HTTP/1.0 200 OK\r\n"), "{}", resp);
    assert!(resp.ends_with("Post_Post_fdsa"));

    handle.stop();
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bad_requests() {
    let (addr, handle, task) = start(local_config("max_body_size = 10\n")).await;

    let resp = roundtrip(addr, b"NONSENSE\r\n\r\n").await;
    assert!(resp.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{}", resp);

    let resp = roundtrip(addr, b"GET / HTTP/2.0\r\n\r\n").await;
    assert!(resp.starts_with("HTTP/1.1 400"), "{}", resp);

    let resp = roundtrip(addr, b"POST /post HTTP/1.1\r\nContent-Length: 100\r\n\r\n").await;
    assert!(resp.starts_with("HTTP/1.1 413"), "{}", resp);

    let resp = roundtrip(addr, b"GET /nowhere HTTP/1.1\r\n\r\n").await;
    assert!(resp.starts_with("HTTP/1.1 404 Not Found\r\n"), "{}", resp);

    handle.stop();
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_bind_errors() {
    let result = Server::bind(App::new(local_config("run_mode = gopher\n"))).await;
    assert!(matches!(result, Err(Exception::UnsupportedRunMode(_))));

    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let config = Config::new().with_listen("127.0.0.1", port);
    let result = Server::bind(App::new(config)).await;
    assert!(matches!(result, Err(Exception::Bind(_))));
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unix_socket() {
    use std::os::unix::net::UnixStream;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gantry.sock");
    // 遗留的套接字文件会被替换
    std::fs::write(&path, "stale").unwrap();

    let config = local_config(&format!("listen_addr = \"unix:{}\"\n", path.display()));
    let app = App::new(config);
    app.add_route("/post/{name}-{page([0-9]+)}", || Post).unwrap();
    let server = Server::bind(app).await.unwrap();
    assert!(server.local_addr().is_none());
    let handle = server.handle();
    let task = tokio::spawn(server.serve());

    let sock = path.clone();
    let resp = tokio::task::spawn_blocking(move || {
        let mut stream = UnixStream::connect(&sock).unwrap();
        stream.write_all(b"GET /post/a-2 HTTP/1.1\r\n\r\n").unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        out
    })
    .await
    .unwrap();
    assert!(resp.ends_with("Post_Get_a_2"), "{}", resp);

    handle.stop();
    assert!(task.await.unwrap().is_ok());
    assert!(!path.exists());
}

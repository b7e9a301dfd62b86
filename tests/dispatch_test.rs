// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 在进程内把请求分派到内存缓冲区，检查完整的请求生命周期。

use std::{
    fs,
    io::Read,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use flate2::read::GzDecoder;
use gantry::{App, Config, Exchange, Handler, Hook, Request};

struct Parsed {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Parsed {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn parse_response(raw: &[u8]) -> Parsed {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response head");
    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    let mut lines = head.split("\r\n");

    // 解析状态行
    let status = lines
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|c| c.parse().ok())
        .unwrap_or(0);

    // 解析头部
    let headers = lines
        .filter_map(|l| l.split_once(": "))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    Parsed {
        status,
        headers,
        body: raw[split + 4..].to_vec(),
    }
}

fn request(method: &str, target: &str, headers: &[(&str, &str)], body: &[u8]) -> Request {
    let headers = headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Request::from_parts(1, method, target, headers, body.to_vec()).unwrap()
}

fn send(app: &App, req: Request) -> Parsed {
    let mut out = Vec::new();
    let status = app.dispatch(req, &mut out);
    let parsed = parse_response(&out);
    assert_eq!(status, parsed.status);
    parsed
}

fn get(app: &App, target: &str) -> Parsed {
    send(app, request("GET", target, &[], b""))
}

/// 从 `Set-Cookie` 中取出 `name=value`
fn cookie_pair(resp: &Parsed, name: &str) -> String {
    resp.headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("Set-Cookie"))
        .map(|(_, v)| v.split(';').next().unwrap_or("").to_string())
        .find(|pair| pair.starts_with(&format!("{}=", name)))
        .unwrap_or_default()
}

// --- 示例处理器 ---

struct Index;

impl Handler for Index {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        let key = ex.path_var("key").to_string();
        if key.is_empty() {
            ex.write_string("Index_Get");
        } else {
            ex.write_string(&format!("Index_Get_{}", key));
        }
    }
}

struct Post;

impl Handler for Post {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        let name = ex.path_var("name").to_string();
        let page = ex.path_var("page").to_string();
        if name.is_empty() {
            ex.write_string("Post_Get");
        } else {
            ex.write_string(&format!("Post_Get_{}_{}", name, page));
        }
    }

    fn post(&mut self, ex: &mut Exchange<'_>) {
        let name = ex.form_var("postname");
        ex.write_string(&format!("Post_Post_{}", name));
    }
}

struct Text(&'static str);

impl Handler for Text {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        ex.write_string(self.0);
    }
}

fn demo_app(config: Config) -> App {
    let app = App::new(config);
    app.add_route("/post", || Post).unwrap();
    app.add_route("/post/{name([a-zA-Z0-9]+)}-{page([0-9]+)}", || Post)
        .unwrap();
    app.add_route("/{key(.*)}", || Index).unwrap();
    app
}

// --- 路由 ---

#[test]
fn test_demo_routes() {
    let app = demo_app(Config::new());
    assert_eq!(get(&app, "/").text(), "Index_Get");
    assert_eq!(get(&app, "/asdf").text(), "Index_Get_asdf");
    assert_eq!(get(&app, "/post").text(), "Post_Get");
    assert_eq!(get(&app, "/post/asdf-1").text(), "Post_Get_asdf_1");

    // 斜杠数量不同的路径不会落入 `/{key(.*)}`
    assert_eq!(get(&app, "/post/asdf").status, 404);

    let resp = send(
        &app,
        request(
            "POST",
            "/post",
            &[("Content-Type", "application/x-www-form-urlencoded")],
            b"postname=fdsa",
        ),
    );
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "Post_Post_fdsa");
}

#[test]
fn test_full_match_required() {
    let app = demo_app(Config::new());
    assert_eq!(get(&app, "/post/asdf-1x").status, 404);
    assert_eq!(get(&app, "/post/as_df-1").status, 404);
}

#[test]
fn test_static_route_beats_dynamic() {
    let app = App::new(Config::new());
    app.add_route("/user/{id}", || Text("dynamic")).unwrap();
    app.add_route("/user/list", || Text("static")).unwrap();
    assert_eq!(get(&app, "/user/list").text(), "static");
    assert_eq!(get(&app, "/user/list/").text(), "static");
    assert_eq!(get(&app, "/user/42").text(), "dynamic");
}

#[test]
fn test_first_dynamic_registration_wins() {
    let app = App::new(Config::new());
    app.add_route("/item/{id}", || Text("first")).unwrap();
    app.add_route("/item/{name}", || Text("second")).unwrap();
    assert_eq!(get(&app, "/item/7").text(), "first");
    // 命中缓存后结果不变
    assert_eq!(get(&app, "/item/7").text(), "first");
}

struct Vars;

impl Handler for Vars {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        let a = ex.query_vars("a");
        let b = ex.query_var("b");
        let out = format!("{}/{} a={:?} b={}", ex.path_var("x"), ex.path_var("y"), a, b);
        ex.write_string(&out);
    }
}

struct Files;

impl Handler for Files {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        let out = format!("file:{}", ex.path_var("path"));
        ex.write_string(&out);
    }
}

#[test]
fn test_parameter_regex_with_slashes() {
    let app = App::new(Config::new());
    app.add_route("/files/{path([a-z]+/[a-z]+)}", || Files)
        .unwrap();
    let resp = get(&app, "/files/a/b");
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "file:a/b");
    assert_eq!(get(&app, "/files/a").status, 404);
}

#[test]
fn test_path_and_query_vars() {
    let app = App::new(Config::new());
    app.add_route("/a/{x}/{y([0-9]+)}", || Vars).unwrap();
    let resp = get(&app, "/a/hello/12?a=1&a=2&b=x%20y");
    assert_eq!(resp.text(), r#"hello/12 a=["1", "2"] b=x y"#);
}

#[test]
fn test_cache_cleared_after_removal() {
    let app = App::new(Config::new());
    app.add_route("/x/{id}", || Text("x")).unwrap();
    assert_eq!(get(&app, "/x/1").status, 200);
    assert_eq!(get(&app, "/x/1").status, 200);

    app.remove_route("/x/{id}");
    assert_eq!(get(&app, "/x/1").status, 404);

    app.add_route("/x/{id}", || Text("again")).unwrap();
    assert_eq!(get(&app, "/x/1").text(), "again");
}

#[test]
fn test_scheme_constrained_route() {
    let app = App::new(Config::new());
    app.add_route_with_schemes("/secure", &["https"], || Text("tls"))
        .unwrap();
    assert_eq!(get(&app, "/secure").status, 404);

    let mut req = request("GET", "/secure", &[], b"");
    req.set_scheme("https");
    assert_eq!(send(&app, req).text(), "tls");
}

// --- 方法分派 ---

#[test]
fn test_unhandled_and_unknown_methods() {
    let app = demo_app(Config::new());
    assert_eq!(send(&app, request("DELETE", "/post", &[], b"")).status, 405);
    assert_eq!(send(&app, request("BREW", "/post", &[], b"")).status, 405);

    let resp = send(&app, request("HEAD", "/post", &[], b""));
    assert_eq!(resp.status, 405);
    assert!(resp.body.is_empty());
}

// --- 钩子与短路 ---

#[test]
fn test_before_method_hook_short_circuits() {
    let app = demo_app(Config::new());
    let after = Arc::new(AtomicUsize::new(0));
    app.add_hook_named("BeforeMethodGet", |ex| ex.abort(403, "denied"))
        .unwrap();
    let counter = Arc::clone(&after);
    app.add_hook(Hook::AfterMethod(gantry::HttpRequestMethod::Get), move |_ex| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let resp = get(&app, "/post");
    assert_eq!(resp.status, 403);
    assert_eq!(resp.text(), "denied");
    assert_eq!(after.load(Ordering::SeqCst), 0);

    // 其他方法不受影响
    let resp = send(
        &app,
        request(
            "POST",
            "/post",
            &[("Content-Type", "application/x-www-form-urlencoded")],
            b"postname=x",
        ),
    );
    assert_eq!(resp.text(), "Post_Post_x");
}

struct Templated;

impl Handler for Templated {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        ex.tpl_mut().set_var("name", "<amy>");
        ex.tpl_mut().set_template_string("<p>{{site}}:{{name}}</p>");
    }
}

#[test]
fn test_lifecycle_hook_order() {
    let app = App::new(Config::new());
    app.set_template_var("site", "gantry");
    app.add_route("/page", || Templated).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    for event in [
        "AfterInit",
        "BeforeMethodGet",
        "AfterMethodGet",
        "BeforeRender",
        "AfterRender",
        "BeforeOutput",
        "AfterOutput",
    ] {
        let seen = Arc::clone(&seen);
        app.add_hook_named(event, move |_ex| seen.lock().unwrap().push(event))
            .unwrap();
    }

    let resp = get(&app, "/page");
    assert_eq!(resp.text(), "<p>gantry:&lt;amy&gt;</p>");
    assert_eq!(resp.header("Content-Type"), Some("text/html; charset=utf-8"));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "AfterInit",
            "BeforeMethodGet",
            "AfterMethodGet",
            "BeforeRender",
            "AfterRender",
            "BeforeOutput",
            "AfterOutput",
        ]
    );
}

struct Twice;

impl Handler for Twice {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        ex.write_string("first");
        ex.write_string("second");
        ex.finish();
        ex.finish();
        ex.response_mut().write(b"third");
    }
}

#[test]
fn test_writes_after_close_are_dropped() {
    let app = App::new(Config::new());
    app.add_route("/twice", || Twice).unwrap();
    let resp = get(&app, "/twice");
    assert_eq!(resp.text(), "first");
    assert_eq!(resp.header("Content-Length"), Some("5"));
}

struct Panics;

impl Handler for Panics {
    fn get(&mut self, _ex: &mut Exchange<'_>) {
        panic!("handler exploded");
    }
}

#[test]
fn test_panic_becomes_500() {
    let app = App::new(Config::new());
    app.add_route("/boom", || Panics).unwrap();
    let resp = get(&app, "/boom");
    assert_eq!(resp.status, 500);
    assert!(resp.text().contains("500"));

    // 之后的请求不受影响
    app.add_route("/ok", || Text("ok")).unwrap();
    assert_eq!(get(&app, "/ok").text(), "ok");
}

// --- 状态码 ---

#[test]
fn test_http_status_hook_and_default_page() {
    let app = App::new(Config::new());
    let resp = get(&app, "/nowhere");
    assert_eq!(resp.status, 404);
    assert!(resp.text().contains("404"));
    assert_eq!(resp.header("Connection"), Some("close"));

    app.add_http_status_hook(404, |ex| ex.write_string("custom 404"));
    let resp = get(&app, "/nowhere");
    assert_eq!(resp.status, 404);
    assert_eq!(resp.text(), "custom 404");
}

#[test]
fn test_custom_status_page_file() {
    let dir = tempfile::tempdir().unwrap();
    let page = dir.path().join("404.html");
    fs::write(&page, "<h1>lost</h1>").unwrap();

    let app = App::new(Config::new());
    app.register_custom_status(404, &page);
    let resp = get(&app, "/nowhere");
    assert_eq!(resp.status, 404);
    assert_eq!(resp.text(), "<h1>lost</h1>");
    assert_eq!(resp.header("Content-Type"), Some("text/html; charset=utf-8"));

    let other = dir.path().join("403.html");
    fs::write(&other, "forbidden page").unwrap();
    app.set_http_status_page(403, &other);
    app.add_route("/deny", || Deny).unwrap();
    let resp = get(&app, "/deny");
    assert_eq!(resp.status, 403);
    assert_eq!(resp.text(), "forbidden page");
}

struct Deny;

impl Handler for Deny {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        ex.write_header(403);
        ex.write_string("handler body");
    }
}

// --- 路径前缀与跳转 ---

struct Login;

impl Handler for Login {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        ex.redirect_url("/login");
    }
}

#[test]
fn test_prefix_and_redirect() {
    let app = demo_app(Config::from_flat_str("prefix_path = /app\n").unwrap());
    app.add_route("/private", || Login).unwrap();

    assert_eq!(get(&app, "/app/post").text(), "Post_Get");
    assert_eq!(get(&app, "/app").text(), "Index_Get");
    assert_eq!(get(&app, "/post").status, 404);
    assert_eq!(get(&app, "/application").status, 404);

    let resp = get(&app, "/app/private");
    assert_eq!(resp.status, 302);
    assert_eq!(resp.header("Location"), Some("/app/login"));
}

// --- 静态文件 ---

#[test]
fn test_static_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("hello.txt"), "hello world").unwrap();
    fs::create_dir(dir.path().join("assets")).unwrap();
    fs::write(dir.path().join("assets").join("app.js"), "let a = 1;").unwrap();

    let config = Config::new().with_app_root(dir.path().to_str().unwrap());
    let app = demo_app(config);
    app.add_static_file_type(&[".txt"]);
    app.add_static_file_dir(&["assets"]);

    let resp = get(&app, "/hello.txt");
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "hello world");
    assert_eq!(resp.header("Content-Type"), Some("text/plain; charset=utf-8"));
    let modified = resp.header("Last-Modified").unwrap().to_string();

    let resp = send(
        &app,
        request("GET", "/hello.txt", &[("If-Modified-Since", modified.as_str())], b""),
    );
    assert_eq!(resp.status, 304);
    assert!(resp.body.is_empty());

    let resp = send(&app, request("HEAD", "/hello.txt", &[], b""));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("Content-Length"), Some("11"));
    assert!(resp.body.is_empty());

    assert_eq!(get(&app, "/assets/app.js").text(), "let a = 1;");
    assert_eq!(get(&app, "/missing.txt").status, 404);
    assert_eq!(get(&app, "/../secret.txt").status, 400);

    // 引用计数归零后回到路由
    app.remove_static_file_type(&[".txt"]);
    assert_eq!(get(&app, "/hello.txt").text(), "Index_Get_hello.txt");
}

// --- gzip ---

struct Filler(usize);

impl Handler for Filler {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        ex.write_string(&"a".repeat(self.0));
    }
}

#[test]
fn test_gzip_threshold() {
    let app = App::new(Config::new().with_gzip(true, 100));
    app.add_route("/small", || Filler(50)).unwrap();
    app.add_route("/large", || Filler(500)).unwrap();
    let gzip = [("Accept-Encoding", "gzip, deflate")];

    let resp = send(&app, request("GET", "/small", &gzip, b""));
    assert_eq!(resp.header("Content-Encoding"), None);
    assert_eq!(resp.body.len(), 50);

    let resp = send(&app, request("GET", "/large", &gzip, b""));
    assert_eq!(resp.header("Content-Encoding"), Some("gzip"));
    assert_eq!(resp.header("Content-Length"), None);
    let mut decoded = String::new();
    GzDecoder::new(&resp.body[..])
        .read_to_string(&mut decoded)
        .unwrap();
    assert_eq!(decoded, "a".repeat(500));

    // 客户端不接受 gzip
    let resp = get(&app, "/large");
    assert_eq!(resp.header("Content-Encoding"), None);
    assert_eq!(resp.body.len(), 500);
}

// --- Cookie 与会话 ---

struct SetUser;

impl Handler for SetUser {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        ex.set_secure_cookie("user", "amy@example.com", 3600);
        ex.set_cookie("theme", "dark", 0);
        ex.write_string("ok");
    }
}

struct ShowUser;

impl Handler for ShowUser {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        let out = format!("{}|{}", ex.secure_cookie("user"), ex.cookie("theme"));
        ex.write_string(&out);
    }
}

struct Upload(std::path::PathBuf);

impl Handler for Upload {
    fn post(&mut self, ex: &mut Exchange<'_>) {
        let title = ex.form_var("title");
        let Some(file) = ex.upload_file("doc") else {
            ex.abort(400, "no file");
            return;
        };
        let target = self.0.join(file.filename());
        if file.save_file(&target).is_err() {
            ex.abort(500, "save failed");
            return;
        }
        let out = format!("{}:{}:{}:{}", title, file.filename(), file.content_type(), file.len());
        ex.write_string(&out);
    }
}

#[test]
fn test_multipart_upload() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = dir.path().join("uploads");
    let app = App::new(Config::new());
    let target = uploads.clone();
    app.add_route("/upload", move || Upload(target.clone()))
        .unwrap();

    let boundary = "XyZgantry";
    let body = format!(
        "--{b}\r\n\
         Content-Disposition: form-data; name=\"title\"\r\n\r\n\
         report\r\n\
         --{b}\r\n\
         Content-Disposition: form-data; name=\"doc\"; filename=\"q3.csv\"\r\n\
         Content-Type: text/csv\r\n\r\n\
         a,b\n1,2\r\n\
         --{b}--\r\n",
        b = boundary
    );
    let content_type = format!("multipart/form-data; boundary={}", boundary);
    let resp = send(
        &app,
        request(
            "POST",
            "/upload",
            &[("Content-Type", content_type.as_str())],
            body.as_bytes(),
        ),
    );
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "report:q3.csv:text/csv:7");
    assert_eq!(fs::read(uploads.join("q3.csv")).unwrap(), b"a,b\n1,2");

    // 非 multipart 请求体中没有上传文件
    let resp = send(
        &app,
        request(
            "POST",
            "/upload",
            &[("Content-Type", "application/x-www-form-urlencoded")],
            b"title=x",
        ),
    );
    assert_eq!(resp.status, 400);
}

#[test]
fn test_signed_cookie_round_trip() {
    let app = App::new(Config::new().with_cookie_secret("s3cret"));
    app.add_route("/set", || SetUser).unwrap();
    app.add_route("/show", || ShowUser).unwrap();

    let ua = ("User-Agent", "test-agent");
    let resp = send(&app, request("GET", "/set", &[ua], b""));
    let user = cookie_pair(&resp, "user");
    assert!(user.starts_with("user="));
    // 客户端看不到明文
    assert!(!user.contains("amy@example.com"));
    assert!(!user.contains("YW15QGV4YW1wbGUuY29t"));
    let header = format!("{}; theme=dark", user);

    let resp = send(&app, request("GET", "/show", &[ua, ("Cookie", header.as_str())], b""));
    assert_eq!(resp.text(), "amy@example.com|dark");

    // 浏览器标识不同
    let resp = send(
        &app,
        request("GET", "/show", &[("User-Agent", "other"), ("Cookie", header.as_str())], b""),
    );
    assert_eq!(resp.text(), "|dark");

    // 篡改签名
    let mut tampered = user.clone();
    let last = tampered.pop().unwrap();
    tampered.push(if last == '0' { '1' } else { '0' });
    let resp = send(&app, request("GET", "/show", &[ua, ("Cookie", tampered.as_str())], b""));
    assert_eq!(resp.text(), "|");
}

struct SessionLogin;

impl Handler for SessionLogin {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        ex.session().set("user", "amy");
        ex.write_string("logged in");
    }
}

struct SessionWhoami;

impl Handler for SessionWhoami {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        let user = ex.session().get("user");
        ex.write_string(&user);
    }
}

struct SessionLogout;

impl Handler for SessionLogout {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        ex.session().destroy();
        ex.write_string("bye");
    }
}

#[test]
fn test_session_across_requests() {
    let app = App::new(Config::new().with_cookie_secret("s3cret"));
    app.add_route("/login", || SessionLogin).unwrap();
    app.add_route("/whoami", || SessionWhoami).unwrap();
    app.add_route("/logout", || SessionLogout).unwrap();

    let resp = get(&app, "/login");
    let sid = cookie_pair(&resp, app.config().session_name());
    assert!(!sid.is_empty());

    let resp = send(&app, request("GET", "/whoami", &[("Cookie", sid.as_str())], b""));
    assert_eq!(resp.text(), "amy");
    // 已有会话时不再下发新的会话 Cookie
    assert!(cookie_pair(&resp, app.config().session_name()).is_empty());

    // 没有 Cookie 时是一个新的空会话
    let resp = get(&app, "/whoami");
    assert!(resp.text().is_empty());

    send(&app, request("GET", "/logout", &[("Cookie", sid.as_str())], b""));
    let resp = send(&app, request("GET", "/whoami", &[("Cookie", sid.as_str())], b""));
    assert!(resp.text().is_empty());
    app.close();
}

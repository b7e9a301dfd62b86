// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 示例服务
//!
//! 加载配置、初始化日志、注册几个示例处理器，然后按配置的运行模式监听：
//!
//! ```text
//! gantry [配置文件]
//! ```
//!
//! 未指定配置文件时读取当前目录下的 `app.conf`，不存在则使用默认配置。
//! 收到 Ctrl-C 后停止接受新连接并退出。

use std::{env, process};

use log::{error, info, warn, LevelFilter};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};
use tokio::runtime::Builder;

use gantry::{App, Config, Exchange, Handler, Server};

/// GET 任意路径，由 `/{key(.*)}` 兜底
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

/// 访问计数，演示签名 Cookie 与会话
struct Visits;

impl Handler for Visits {
    fn get(&mut self, ex: &mut Exchange<'_>) {
        let count = ex.secure_cookie("visits").parse::<u64>().unwrap_or(0) + 1;
        ex.set_secure_cookie("visits", &count.to_string(), 3600);

        let mut session = ex.session();
        let first = session.get("first_visit");
        if first.is_empty() {
            session.set("first_visit", &chrono::Utc::now().to_rfc2822());
        }
        ex.tpl_mut().set_var("count", &count.to_string());
        ex.tpl_mut()
            .set_template_string("<p>{{site}}: visit #{{count}}</p>");
    }
}

fn init_logger(config: &Config) {
    match log4rs::init_file(config.log_config(), Default::default()) {
        Ok(()) => info!("日志配置{}已载入", config.log_config()),
        Err(e) => {
            let stdout = ConsoleAppender::builder()
                .encoder(Box::new(PatternEncoder::new(
                    "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}",
                )))
                .build();
            let fallback = log4rs::config::Config::builder()
                .appender(Appender::builder().build("stdout", Box::new(stdout)))
                .build(Root::builder().appender("stdout").build(LevelFilter::Info));
            match fallback {
                Ok(c) => {
                    if log4rs::init_config(c).is_ok() {
                        warn!("无法载入日志配置{}：{}，改为输出到控制台", config.log_config(), e);
                    }
                }
                Err(e) => eprintln!("无法初始化日志：{}", e),
            }
        }
    }
}

fn register_routes(app: &App) -> Result<(), gantry::Exception> {
    app.add_route("/post", || Post)?;
    app.add_route("/post/{name([a-zA-Z0-9]+)}-{page([0-9]+)}", || Post)?;
    app.add_route("/cookie", || Visits)?;
    app.add_route("/{key(.*)}", || Index)?;
    app.set_template_var("site", "gantry");
    Ok(())
}

fn main() {
    let config = match Config::load(Config::path_from_args(env::args()).as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    init_logger(&config);
    info!("app root: {}", config.app_root());

    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("无法创建异步运行时：{}", e);
            process::exit(1);
        }
    };

    let app = App::new(config);
    if let Err(e) = register_routes(&app) {
        error!("{}", e);
        process::exit(1);
    }

    let result = runtime.block_on(async {
        let server = Server::bind(app.clone()).await?;
        let handle = server.handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.stop();
            }
        });
        server.serve().await
    });
    app.close();

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
    info!("服务端已退出");
}

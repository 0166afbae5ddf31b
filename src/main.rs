mod cache;
mod cgi;
mod config;
mod connection;
mod content;
mod exception;
mod gophermap;
mod param;
mod path;
mod policy;
mod request;
mod server;
mod util;

use config::Config;
use exception::{Exception, ExceptionKind};
use server::Server;

use log::{error, info};
use tokio::net::TcpListener;
use tokio::runtime::Builder;
use tokio::signal::unix::{signal, SignalKind};

use std::net::IpAddr;
use std::sync::Arc;

fn main() {
    // 初始化日志系统
    log4rs::init_file("config/log4rs.yaml", Default::default()).unwrap();

    // 加载配置文件，允许用第一个命令行参数覆盖默认路径
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/gopherd.toml".to_string());
    let config = Config::from_toml(&config_path);
    info!("配置文件已载入: {}", config_path);
    info!("服务根目录: {}", config.root());

    // 切换工作目录到服务根目录，CGI 与相对路径都依赖这一点
    if let Err(e) = std::env::set_current_dir(config.root()) {
        error!("无法切换到服务根目录{}：{}", config.root(), e);
        panic!("无法切换到服务根目录{}：{}", config.root(), e);
    }

    // 设置工作线程数量
    let worker_threads = config.worker_threads();
    let runtime = Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        // 校验监听地址
        let ip: IpAddr = match config.bind_addr().parse() {
            Ok(ip) => ip,
            Err(e) => {
                let e = Exception::wrap(ExceptionKind::InvalidIP, e);
                error!("监听地址非法：{}", e);
                panic!("监听地址非法：{}", e);
            }
        };
        let port = config.port();

        // 构建服务器主体（致命配置错误在这里暴露）
        let server = Server::new(config);
        server.insert_generated_files().await;

        // 执行bind
        let listener = match TcpListener::bind((ip, port)).await {
            Ok(listener) => listener,
            Err(e) => {
                let e = Exception::wrap(ExceptionKind::ListenerBegin, e);
                error!("无法绑定端口：{}，错误：{}", port, e);
                panic!("无法绑定端口：{}，错误：{}", port, e);
            }
        };
        info!("服务端将在{}:{}上监听Gopher请求", ip, port);

        // 启动缓存新鲜度巡检任务
        let monitor_server = Arc::clone(&server);
        let monitor_freq = monitor_server.config().monitor_freq();
        info!("缓存巡检任务已启动，间隔{:?}", monitor_freq);
        tokio::spawn(async move {
            monitor_server.cache().monitor(monitor_freq).await;
        });

        // 启动接受循环
        tokio::spawn(Arc::clone(&server).run(listener));

        // 等待终止信号，简单停机：不等待在途请求
        let mut sigterm = signal(SignalKind::terminate()).unwrap();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("收到SIGINT，服务器退出");
            }
            _ = sigterm.recv() => {
                info!("收到SIGTERM，服务器退出");
            }
        }
        std::process::exit(0);
    });
}

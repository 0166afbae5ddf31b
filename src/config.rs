use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{error, warn};
use std::fs::File;
use std::io::prelude::*;
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    root: String,
    bind_addr: String,
    port: u16,
    fwd_port: u16,
    hostname: String,
    worker_threads: usize,

    read_deadline_secs: u64,
    write_deadline_secs: u64,
    conn_read_buf: usize,
    conn_write_buf: usize,
    conn_read_max: usize,

    file_read_buf: usize,
    file_size_max_mb: f64,
    cache_size: usize,
    monitor_freq_secs: u64,

    restricted_paths: String,
    remap_requests: String,

    cgi_dir: String,
    max_cgi_time_secs: u64,
    safe_path: String,
    http_compat_cgi: bool,
    http_prefix_buf: usize,

    user_dir: String,

    page_width: usize,
    footer_text: String,
    subgophermap_size_max_mb: f64,

    description: String,
    admin: String,
    geolocation: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: "/var/gopher".to_string(),
            bind_addr: "0.0.0.0".to_string(),
            port: 70,
            fwd_port: 0,
            hostname: "localhost".to_string(),
            worker_threads: 0,
            read_deadline_secs: 3,
            write_deadline_secs: 5,
            conn_read_buf: 1024,
            conn_write_buf: 1024,
            conn_read_max: 4096,
            file_read_buf: 1024,
            file_size_max_mb: 1.0,
            cache_size: 100,
            monitor_freq_secs: 1,
            restricted_paths: String::new(),
            remap_requests: String::new(),
            cgi_dir: String::new(),
            max_cgi_time_secs: 3,
            safe_path: "/bin:/usr/bin".to_string(),
            http_compat_cgi: false,
            http_prefix_buf: 1024,
            user_dir: String::new(),
            page_width: 80,
            footer_text: String::new(),
            subgophermap_size_max_mb: 1.0,
            description: String::new(),
            admin: String::new(),
            geolocation: String::new(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml(filename: &str) -> Self {
        // 打开文件
        let mut file = match File::open(filename) {
            Ok(f) => f,
            Err(e) => panic!("无法打开gopherd配置文件{}：{}", filename, e),
        };
        // 读文件到str
        let mut str_val = String::new();
        match file.read_to_string(&mut str_val) {
            Ok(s) => s,
            Err(e) => panic!("读取gopherd配置文件{}失败：{}", filename, e),
        };
        Self::from_toml_str(&str_val)
    }

    /// 尝试从 TOML 字符串构建配置，失败时退回默认值。
    pub fn from_toml_str(raw: &str) -> Self {
        let mut config: Config = match toml::from_str(raw) {
            Ok(t) => t,
            Err(_) => {
                error!("配置内容不是合法的gopherd TOML，回退到内置默认配置");
                Config::new()
            }
        };
        if config.worker_threads == 0 {
            config.worker_threads = num_cpus::get();
        }
        if config.fwd_port == 0 {
            config.fwd_port = config.port;
        }
        if config.cache_size == 0 {
            warn!("cache_size为0，但gopherd不支持禁用文件缓存，已改用最小容量5。");
            config.cache_size = 5;
        }
        config
    }
}

impl Config {
    /// 获取服务根目录
    pub fn root(&self) -> &str {
        &self.root
    }

    /// 获取监听地址
    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    /// 获取监听端口号
    pub fn port(&self) -> u16 {
        self.port
    }

    /// 获取对外展示的端口号（容器端口转发场景下与监听端口不同）
    pub fn fwd_port(&self) -> u16 {
        self.fwd_port
    }

    /// 获取菜单行中展示的主机名
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// 获取工作线程数量
    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// 获取连接读超时
    pub fn read_deadline(&self) -> Duration {
        Duration::from_secs(self.read_deadline_secs)
    }

    /// 获取连接写超时
    pub fn write_deadline(&self) -> Duration {
        Duration::from_secs(self.write_deadline_secs)
    }

    /// 获取连接读缓冲大小
    pub fn conn_read_buf(&self) -> usize {
        self.conn_read_buf
    }

    /// 获取连接写缓冲大小
    pub fn conn_write_buf(&self) -> usize {
        self.conn_write_buf
    }

    /// 获取请求行最大字节数
    pub fn conn_read_max(&self) -> usize {
        self.conn_read_max
    }

    /// 获取文件读缓冲大小
    pub fn file_read_buf(&self) -> usize {
        self.file_read_buf
    }

    /// 获取可进入缓存的文件大小上限（字节）
    pub fn file_size_max(&self) -> u64 {
        (self.file_size_max_mb * 1_048_576.0) as u64
    }

    /// 获取缓存条目数上限
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// 获取缓存新鲜度巡检间隔
    pub fn monitor_freq(&self) -> Duration {
        Duration::from_secs(self.monitor_freq_secs)
    }

    /// 获取受限路径规则表（换行分隔的正则列表）
    pub fn restricted_paths(&self) -> &str {
        &self.restricted_paths
    }

    /// 获取请求重写规则表（换行分隔的 `pattern -> template` 列表）
    pub fn remap_requests(&self) -> &str {
        &self.remap_requests
    }

    /// 获取 CGI 脚本目录（空字符串表示禁用 CGI）
    pub fn cgi_dir(&self) -> &str {
        &self.cgi_dir
    }

    /// 获取 CGI 脚本最长运行时间
    pub fn max_cgi_time(&self) -> Duration {
        Duration::from_secs(self.max_cgi_time_secs)
    }

    /// 获取 CGI 环境使用的安全 PATH
    pub fn safe_path(&self) -> &str {
        &self.safe_path
    }

    /// 是否为 HTTP 兼容的 CGI 脚本剥离头部
    pub fn http_compat_cgi(&self) -> bool {
        self.http_compat_cgi
    }

    /// 获取 HTTP 头剥离缓冲大小
    pub fn http_prefix_buf(&self) -> usize {
        self.http_prefix_buf
    }

    /// 获取用户个人目录子目录名（空字符串表示禁用 `~user` 展开）
    pub fn user_dir(&self) -> &str {
        &self.user_dir
    }

    /// 获取菜单页面宽度
    pub fn page_width(&self) -> usize {
        self.page_width
    }

    /// 获取菜单页脚文本（空字符串表示禁用页脚）
    pub fn footer_text(&self) -> &str {
        &self.footer_text
    }

    /// 获取 `=` 子引用文件大小上限（字节）
    pub fn subgophermap_size_max(&self) -> u64 {
        (self.subgophermap_size_max_mb * 1_048_576.0) as u64
    }

    /// 获取 caps.txt 中的服务器描述
    pub fn description(&self) -> &str {
        &self.description
    }

    /// 获取 caps.txt 中的管理员信息
    pub fn admin(&self) -> &str {
        &self.admin
    }

    /// 获取 caps.txt 中的地理位置信息
    pub fn geolocation(&self) -> &str {
        &self.geolocation
    }
}

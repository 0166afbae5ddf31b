//! # Server 模块
//!
//! 该模块定义了服务器主体 [`Server`]：配置、访问策略、文件缓存与页脚等
//! 共享状态的唯一持有者，以及每条连接的完整处理流程。
//!
//! 单次请求的控制流：读取一行 → `URL:` 跳转捷径 → 解析选择器 →
//! 重写 → 受限检查 → CGI / 文件 / 目录分发 → 流送响应 → 关闭连接。

use crate::{
    cache::FileCache,
    cgi,
    config::Config,
    connection::Connection,
    exception::{Exception, ExceptionKind},
    gophermap,
    param::{ItemType, MENU_END, NULL_HOST, NULL_PORT},
    path::ResourcePath,
    policy::Policy,
    request::Request,
    util,
};

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, info};
use tokio::net::{TcpListener, TcpStream};

/// 服务器主体：所有处理任务共享的状态。
pub struct Server {
    config: Config,
    policy: Policy,
    cache: FileCache,
    footer: Vec<u8>,
    cgi_env: Vec<(String, String)>,
}

impl Server {
    /// 从配置构造服务器。
    ///
    /// # Panics
    ///
    /// 用户目录名包含 `..`、访问策略规则非法等致命配置错误会 panic。
    pub fn new(config: Config) -> Arc<Self> {
        if config.user_dir().contains("..") {
            error!("用户目录名不允许包含向上回溯: {}", config.user_dir());
            panic!("用户目录名不允许包含向上回溯: {}", config.user_dir());
        }

        let policy = Policy::from_config(&config);
        let footer = util::build_footer(config.footer_text(), config.page_width());
        let cache = FileCache::from_capacity(config.cache_size());

        let cgi_env = vec![
            ("PATH".to_string(), config.safe_path().to_string()),
            ("SERVER_NAME".to_string(), config.hostname().to_string()),
            ("SERVER_PORT".to_string(), config.fwd_port().to_string()),
            ("DOCUMENT_ROOT".to_string(), config.root().to_string()),
        ];

        Arc::new(Self {
            config,
            policy,
            cache,
            footer,
            cgi_env,
        })
    }

    /// 获取配置
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 获取访问策略
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// 获取文件缓存
    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    /// 获取渲染好的菜单页脚字节
    pub fn footer(&self) -> &[u8] {
        &self.footer
    }

    /// 获取 CGI 环境变量的进程级前缀
    pub fn cgi_env(&self) -> &[(String, String)] {
        &self.cgi_env
    }

    /// 把启动期生成的虚拟文件（`caps.txt`、`robots.txt`）写入缓存。
    pub async fn insert_generated_files(&self) {
        let caps = util::caps_txt(
            self.config.description(),
            self.config.admin(),
            self.config.geolocation(),
        );
        let caps_key = ResourcePath::new(self.config.root(), "caps.txt").absolute();
        self.cache.insert_generated(caps_key, Bytes::from(caps)).await;

        let robots_key = ResourcePath::new(self.config.root(), "robots.txt").absolute();
        self.cache
            .insert_generated(robots_key, Bytes::from(util::robots_txt()))
            .await;

        info!("已生成 caps.txt 与 robots.txt 缓存条目");
    }

    /// 接受循环：每条连接派生一个处理任务。
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        let mut id: u128 = 0;
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("[ID{}]新的连接：{}", id, addr);
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.serve_client(stream, id).await;
                    });
                    id += 1;
                }
                Err(e) => {
                    error!("{}", Exception::wrap(ExceptionKind::ListenerAccept, e));
                }
            }
        }
    }

    /// 处理一条连接：完整请求流程加错误响应与收尾。
    pub async fn serve_client(self: Arc<Self>, stream: TcpStream, id: u128) {
        let mut conn = Connection::new(stream, &self.config);

        if let Err(e) = self.handle(&mut conn, id).await {
            if let Some(message) = error_response(e.kind()) {
                let _ = conn.write_bytes(&util::build_error_line(message)).await;
            }
            error!("[ID{}]({}) {}", id, conn.ip(), e);
        }

        if let Err(e) = conn.close().await {
            debug!("[ID{}]关闭连接失败: {}", id, e);
        }
    }

    /// 单次请求的主流程。
    async fn handle(&self, conn: &mut Connection, id: u128) -> Result<(), Exception> {
        let line = conn.read_line().await?;
        debug!("[ID{}]({}) 收到选择器: {:?}", id, conn.ip(), line);

        // 'URL:' 前缀：返回 HTML 跳转页即可，无需进入文件分发
        if let Some(url) = line.strip_prefix("URL:") {
            conn.write_bytes(&util::html_redirect(url)).await?;
            info!("[ID{}]({}) Redirecting to: {}", id, conn.ip(), url);
            return Ok(());
        }

        let mut request = Request::parse(self.config.root(), self.config.user_dir(), &line)?;

        if let Some(expanded) = self.policy.remap(&mut request) {
            info!(
                "[ID{}]({}) 重写请求: {} -> {}",
                id,
                conn.ip(),
                request.path().selector(),
                expanded
            );
        }

        if self.policy.is_restricted(request.path()) {
            return Err(Exception::wrap(
                ExceptionKind::RestrictedPath,
                request.path().relative().to_string(),
            ));
        }

        if self.policy.within_cgi_dir(request.path()) {
            cgi::execute(self, conn, &request).await?;
        } else {
            self.respond(conn, &request).await?;
        }

        info!(
            "[ID{}]({}) Served: {}",
            id,
            conn.ip(),
            request.path().absolute()
        );
        Ok(())
    }

    /// 文件系统分发：缓存命中、目录（gophermap 或列表）、普通文件。
    async fn respond(&self, conn: &mut Connection, request: &Request) -> Result<(), Exception> {
        let path = request.path();
        let abs = path.absolute();

        // 生成条目没有磁盘文件，必须先查缓存再 stat
        if let Some(entry) = self.cache.lookup(&abs).await {
            return self.cache.serve_entry(self, conn, entry, path).await;
        }

        let meta = tokio::fs::metadata(&abs)
            .await
            .map_err(|e| Exception::wrap(ExceptionKind::FileOpen, e))?;

        if meta.is_dir() {
            let gophermap_path = path.join("gophermap");
            match tokio::fs::metadata(gophermap_path.absolute()).await {
                Ok(gm_meta) if gm_meta.is_file() => {
                    self.serve_file(conn, &gophermap_path, gm_meta.len()).await
                }
                _ => self.serve_listing(conn, path).await,
            }
        } else if meta.is_file() {
            self.serve_file(conn, path, meta.len()).await
        } else {
            Err(Exception::wrap(ExceptionKind::FileType, abs))
        }
    }

    /// 普通文件分发：超出缓存上限直接流式下发，否则走缓存。
    async fn serve_file(
        &self,
        conn: &mut Connection,
        path: &ResourcePath,
        size: u64,
    ) -> Result<(), Exception> {
        if size > self.config.file_size_max() {
            debug!("文件超出缓存上限，直接流送: {}", path.absolute());
            let mut fd = tokio::fs::File::open(path.absolute())
                .await
                .map_err(|e| Exception::wrap(ExceptionKind::FileOpen, e))?;
            conn.write_from(&mut fd, self.config.file_read_buf()).await
        } else {
            self.cache.fetch(self, conn, path).await
        }
    }

    /// 无 gophermap 目录的回退列表：标题行、空行、排序条目、页脚、结束标记。
    async fn serve_listing(
        &self,
        conn: &mut Connection,
        dir: &ResourcePath,
    ) -> Result<(), Exception> {
        let page_width = self.config.page_width();

        let mut out = Vec::new();
        out.extend_from_slice(&util::build_line(
            ItemType::Info,
            &format!("[ {}{} ]", self.config.hostname(), dir.selector()),
            "TITLE",
            NULL_HOST,
            NULL_PORT,
            page_width,
        ));
        out.extend_from_slice(&util::build_info_line("", page_width));

        let hidden = HashSet::new();
        out.extend_from_slice(&gophermap::list_directory(self, dir, &hidden).await?);

        out.extend_from_slice(&self.footer);
        out.extend_from_slice(MENU_END.as_bytes());

        conn.write_bytes(&out).await
    }
}

/// 把异常种类映射为发给客户端的错误行文本。
///
/// 返回 `None` 的种类不向客户端回写（写失败再写无意义，监听错误与
/// 配置错误不面向用户）。
fn error_response(kind: ExceptionKind) -> Option<&'static str> {
    match kind {
        ExceptionKind::ConnWrite | ExceptionKind::ConnClose => None,
        ExceptionKind::ListenerResolve
        | ExceptionKind::ListenerBegin
        | ExceptionKind::ListenerAccept
        | ExceptionKind::InvalidIP
        | ExceptionKind::InvalidPort => None,
        ExceptionKind::ConnRead => Some("503 Service Unavailable"),
        ExceptionKind::InvalidRequest => Some("400 Bad Request"),
        ExceptionKind::RestrictedPath => Some("403 Forbidden"),
        ExceptionKind::FileOpen | ExceptionKind::FileType => Some("404 Not Found"),
        ExceptionKind::FileStat
        | ExceptionKind::FileRead
        | ExceptionKind::DirectoryRead
        | ExceptionKind::InvalidGophermap
        | ExceptionKind::SubgophermapIsDir
        | ExceptionKind::SubgophermapSize
        | ExceptionKind::CGIStart
        | ExceptionKind::CGIExitCode
        | ExceptionKind::CGIStatus500
        | ExceptionKind::CGIStatusUnknown => Some("500 Internal Server Error"),
        ExceptionKind::CGIStatus400 => Some("400 Bad Request"),
        ExceptionKind::CGIStatus401 => Some("401 Unauthorised"),
        ExceptionKind::CGIStatus403 => Some("403 Forbidden"),
        ExceptionKind::CGIStatus404 => Some("404 Not Found"),
        ExceptionKind::CGIStatus408 => Some("408 Request Time-out"),
        ExceptionKind::CGIStatus410 => Some("410 Gone"),
        ExceptionKind::CGIStatus501 => Some("501 Not Implemented"),
        ExceptionKind::CGIStatus503 => Some("503 Service Unavailable"),
    }
}

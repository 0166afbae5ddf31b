// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # CGI 模块
//!
//! 该模块负责执行 CGI 脚本并把其标准输出转发给客户端。
//!
//! ## 设计意图
//! - **进程组隔离**：脚本在自己的进程组里运行，超时后向整个进程组发
//!   SIGTERM，连带杀掉脚本派生的子进程。
//! - **超时即取消**：脚本输出的转发与等待退出整体套在墙钟超时里，
//!   超时视为执行失败。
//! - **HTTP 兼容**：可选的头部剥离器识别脚本输出开头的 HTTP 头块，
//!   吞掉合法头部并把 `Status:` 行翻译为对应的 Gopher 错误。

use crate::{
    connection::Connection,
    exception::{Exception, ExceptionKind},
    request::Request,
    server::Server,
};

use std::process::Stdio;

use log::{debug, error};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// 向进程组发送 SIGTERM。
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGTERM);
        }
    }
}

/// 执行请求指向的 CGI 脚本，把标准输出转发给客户端。
///
/// 脚本的环境变量为进程级前缀（PATH、SERVER_NAME、SERVER_PORT、
/// DOCUMENT_ROOT）加上请求级变量；工作目录为服务根目录。
pub async fn execute(
    server: &Server,
    conn: &mut Connection,
    request: &Request,
) -> Result<(), Exception> {
    let config = server.config();
    let abs = request.path().absolute();

    let mut cmd = Command::new(&abs);
    cmd.env_clear();
    for (key, value) in server.cgi_env() {
        cmd.env(key, value);
    }
    cmd.env("REMOTE_ADDR", conn.ip());
    cmd.env("QUERY_STRING", request.params());
    cmd.env("SCRIPT_NAME", request.path().relative());
    cmd.env("SCRIPT_FILENAME", &abs);
    cmd.env("SELECTOR", request.path().selector());
    cmd.env("REQUEST_URI", request.path().selector());
    cmd.current_dir(config.root());
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| Exception::wrap(ExceptionKind::CGIStart, e))?;
    let pid = child.id();
    debug!("CGI脚本已启动: {} (pid {:?})", abs, pid);

    let mut strip = if config.http_compat_cgi() {
        Some(HttpStripWriter::new(config.http_prefix_buf()))
    } else {
        None
    };

    let run = async {
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Exception::new(ExceptionKind::CGIStart))?;

        let mut buf = vec![0u8; config.file_read_buf().max(1)];
        loop {
            let count = match stdout.read(&mut buf).await {
                Ok(c) => c,
                Err(e) => return Err(Exception::wrap(ExceptionKind::CGIExitCode, e)),
            };
            if count == 0 {
                break;
            }
            match &mut strip {
                Some(writer) => {
                    let out = writer.push(&buf[..count]);
                    if !out.is_empty() {
                        conn.write_bytes(&out).await?;
                    }
                }
                None => conn.write_bytes(&buf[..count]).await?,
            }
        }

        child
            .wait()
            .await
            .map_err(|e| Exception::wrap(ExceptionKind::CGIExitCode, e))
    };

    let result = tokio::time::timeout(config.max_cgi_time(), run).await;
    let status = match result {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            kill_process_group(pid);
            let _ = child.wait().await;
            return Err(e);
        }
        Err(_) => {
            error!("CGI脚本超时，向进程组发送SIGTERM: {}", abs);
            kill_process_group(pid);
            let _ = child.wait().await;
            return Err(Exception::wrap(
                ExceptionKind::CGIExitCode,
                "max CGI run time exceeded",
            ));
        }
    };

    // 收尾：缓冲里可能还压着没拍板的前缀数据
    if let Some(writer) = &mut strip {
        let (leftover, status_kind) = writer.finish();
        if !leftover.is_empty() {
            conn.write_bytes(&leftover).await?;
        }
        if let Some(kind) = status_kind {
            return Err(Exception::new(kind));
        }
    }

    if !status.success() {
        error!("CGI脚本退出码非零: {} [{:?}]", abs, status.code());
        return Err(Exception::new(ExceptionKind::CGIExitCode));
    }

    Ok(())
}

/// 头块解析结论（内部使用）。
enum HeaderDecision {
    /// 缓冲内容不是 HTTP 头，应当原样转发
    NotHeaders,
    /// 合法头块，吞掉；携带 `Status:` 行翻译出的错误（200 时为 None）
    Headers(Option<ExceptionKind>),
}

/// 剥离器当前所处的模式。
#[derive(Debug, PartialEq, Eq)]
enum StripMode {
    /// 仍在收集前缀数据寻找头块
    Scanning,
    /// 已拍板，此后数据直接放行
    PassThrough,
    /// 非 200 状态，吞掉余下全部输出
    Discard,
}

/// HTTP 头剥离器。
///
/// 在扫描模式下把写入数据累积到固定大小的前缀缓冲里，看到 `\r\n\r\n`
/// 分隔符或缓冲写满时把缓冲按 CRLF 头列表解析：含 `content-type:` 的
/// 视为合法头块吞掉（`status:` 非 200 则终止响应），否则整个缓冲原样
/// 放行。拍板之后进入直通模式。
pub struct HttpStripWriter {
    buf: Vec<u8>,
    capacity: usize,
    mode: StripMode,
    status: Option<ExceptionKind>,
}

impl HttpStripWriter {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::new(),
            capacity: capacity.max(4),
            mode: StripMode::Scanning,
            status: None,
        }
    }

    /// 喂入一段脚本输出，返回应当转发给客户端的字节。
    pub fn push(&mut self, data: &[u8]) -> Vec<u8> {
        match self.mode {
            StripMode::PassThrough => data.to_vec(),
            StripMode::Discard => Vec::new(),
            StripMode::Scanning => {
                self.buf.extend_from_slice(data);

                if let Some(idx) = find_separator(&self.buf) {
                    let decision = parse_header_block(&self.buf[..idx]);
                    return self.settle(decision, idx + 4);
                }

                if self.buf.len() >= self.capacity {
                    let decision = parse_header_block(&self.buf);
                    let body_start = self.buf.len();
                    return self.settle(decision, body_start);
                }

                Vec::new()
            }
        }
    }

    /// 根据头块解析结论切换模式并给出应转发的字节。
    fn settle(&mut self, decision: HeaderDecision, body_start: usize) -> Vec<u8> {
        match decision {
            HeaderDecision::NotHeaders => {
                self.mode = StripMode::PassThrough;
                std::mem::take(&mut self.buf)
            }
            HeaderDecision::Headers(None) => {
                self.mode = StripMode::PassThrough;
                let body = self.buf[body_start..].to_vec();
                self.buf.clear();
                body
            }
            HeaderDecision::Headers(Some(kind)) => {
                self.status = Some(kind);
                self.mode = StripMode::Discard;
                self.buf.clear();
                Vec::new()
            }
        }
    }

    /// 脚本结束后收尾：对仍未拍板的缓冲执行同样的解析或放行逻辑。
    ///
    /// 返回（应转发的字节，`Status:` 行翻译出的错误）。
    pub fn finish(&mut self) -> (Vec<u8>, Option<ExceptionKind>) {
        let mut leftover = Vec::new();
        if self.mode == StripMode::Scanning && !self.buf.is_empty() {
            match parse_header_block(&self.buf) {
                HeaderDecision::NotHeaders => leftover = std::mem::take(&mut self.buf),
                HeaderDecision::Headers(status) => {
                    if let Some(kind) = status {
                        self.status = Some(kind);
                    }
                    self.buf.clear();
                }
            }
            self.mode = StripMode::PassThrough;
        }
        (leftover, self.status)
    }
}

/// 在缓冲中定位 `\r\n\r\n` 分隔符。
fn find_separator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

/// 把一段前缀按 CRLF 分隔的头列表解析。
fn parse_header_block(block: &[u8]) -> HeaderDecision {
    let text = String::from_utf8_lossy(block);

    let mut valid = false;
    let mut status: Option<ExceptionKind> = None;

    for header in text.split("\r\n") {
        let header = header.to_lowercase();

        if let Some(value) = header.strip_prefix("status:") {
            let code = value.trim().split(' ').next().unwrap_or("");
            if code == "200" {
                continue;
            }
            status = Some(match code {
                "400" => ExceptionKind::CGIStatus400,
                "401" => ExceptionKind::CGIStatus401,
                "403" => ExceptionKind::CGIStatus403,
                "404" => ExceptionKind::CGIStatus404,
                "408" => ExceptionKind::CGIStatus408,
                "410" => ExceptionKind::CGIStatus410,
                "500" => ExceptionKind::CGIStatus500,
                "501" => ExceptionKind::CGIStatus501,
                "503" => ExceptionKind::CGIStatus503,
                _ => ExceptionKind::CGIStatusUnknown,
            });
            continue;
        }

        if header.contains("content-type:") {
            valid = true;
        }
    }

    if valid {
        HeaderDecision::Headers(status)
    } else {
        HeaderDecision::NotHeaders
    }
}

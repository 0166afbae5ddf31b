// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了 Gopher 服务器在请求处理生命周期中可能抛出的各类异常情况。
//!
//! ## 设计意图
//! - **错误分类**：涵盖连接层、监听层、文件系统层、gophermap 解析层以及 CGI 子进程层。
//! - **语义映射**：每个种类都对应特定的业务逻辑，便于上层模块将其转化为对应的 Gopher `3` 类型错误行。
//! - **原因携带**：`Exception` 可以附带一个底层原因字符串，原样记录到系统日志。

use std::fmt;

/// 服务器处理请求过程中发生的异常种类。
///
/// 平坦的枚举，作为 `Exception` 的标签。
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExceptionKind {
    /// 从客户端连接读取数据失败（超时或 I/O 错误）。
    ConnRead,
    /// 向客户端连接写入数据失败。
    ConnWrite,
    /// 关闭客户端连接失败。
    ConnClose,
    /// 解析监听地址失败。
    ListenerResolve,
    /// 绑定监听端口失败。
    ListenerBegin,
    /// 接受新连接失败。
    ListenerAccept,
    /// 配置中的 IP 地址非法。
    InvalidIP,
    /// 配置中的端口号非法。
    InvalidPort,
    /// 客户端请求行包含非法字节或无法解码。
    InvalidRequest,
    /// 请求的路径命中了受限路径规则。对应 Gopher 的 403。
    RestrictedPath,
    /// 打开文件失败。在 Gopher 语义中对应 404。
    FileOpen,
    /// 获取文件元数据失败。
    FileStat,
    /// 读取文件内容失败。
    FileRead,
    /// 文件类型不受支持（既非普通文件也非目录）。
    FileType,
    /// 读取目录内容失败。
    DirectoryRead,
    /// gophermap 内容非法（重复标题、自引用、超出嵌套深度等）。
    InvalidGophermap,
    /// `=` 子引用指向了一个目录。
    SubgophermapIsDir,
    /// `=` 子引用文件超出大小上限。
    SubgophermapSize,
    /// CGI 子进程启动失败。
    CGIStart,
    /// CGI 子进程以非零状态退出。
    CGIExitCode,
    /// CGI 输出了 `Status: 400`。
    CGIStatus400,
    /// CGI 输出了 `Status: 401`。
    CGIStatus401,
    /// CGI 输出了 `Status: 403`。
    CGIStatus403,
    /// CGI 输出了 `Status: 404`。
    CGIStatus404,
    /// CGI 输出了 `Status: 408`。
    CGIStatus408,
    /// CGI 输出了 `Status: 410`。
    CGIStatus410,
    /// CGI 输出了 `Status: 500`。
    CGIStatus500,
    /// CGI 输出了 `Status: 501`。
    CGIStatus501,
    /// CGI 输出了 `Status: 503`。
    CGIStatus503,
    /// CGI 输出了无法识别的 `Status:` 值。
    CGIStatusUnknown,
}

use ExceptionKind::*;

impl ExceptionKind {
    /// 返回该种类的人类可读描述文本。
    fn message(self) -> &'static str {
        match self {
            ConnRead => "Conn read error",
            ConnWrite => "Conn write error",
            ConnClose => "Conn close error",
            ListenerResolve => "Listener resolve error",
            ListenerBegin => "Listener begin error",
            ListenerAccept => "Listener accept error",
            InvalidIP => "Invalid IP",
            InvalidPort => "Invalid port",
            InvalidRequest => "Invalid request",
            RestrictedPath => "Restricted path",
            FileOpen => "File open error",
            FileStat => "File stat error",
            FileRead => "File read error",
            FileType => "Unsupported file type",
            DirectoryRead => "Directory read error",
            InvalidGophermap => "Invalid gophermap",
            SubgophermapIsDir => "Subgophermap is dir",
            SubgophermapSize => "Subgophermap size too large",
            CGIStart => "CGI start error",
            CGIExitCode => "CGI non-zero exit code",
            CGIStatus400 => "CGI status: 400",
            CGIStatus401 => "CGI status: 401",
            CGIStatus403 => "CGI status: 403",
            CGIStatus404 => "CGI status: 404",
            CGIStatus408 => "CGI status: 408",
            CGIStatus410 => "CGI status: 410",
            CGIStatus500 => "CGI status: 500",
            CGIStatus501 => "CGI status: 501",
            CGIStatus503 => "CGI status: 503",
            CGIStatusUnknown => "CGI status: unknown",
        }
    }
}

/// 带有可选底层原因的异常值。
///
/// 该结构体通常作为 `Result` 的 `Err` 部分返回，用于指示处理失败的具体原因。
#[derive(Debug, Clone)]
pub struct Exception {
    kind: ExceptionKind,
    cause: Option<String>,
}

impl Exception {
    /// 根据种类构造一个不带原因的异常。
    pub fn new(kind: ExceptionKind) -> Self {
        Self { kind, cause: None }
    }

    /// 根据种类与底层错误构造一个带原因的异常。
    pub fn wrap<E: fmt::Display>(kind: ExceptionKind, cause: E) -> Self {
        Self {
            kind,
            cause: Some(cause.to_string()),
        }
    }

    /// 获取异常种类。
    pub fn kind(&self) -> ExceptionKind {
        self.kind
    }
}

/// 为 `Exception` 实现 `Display` 特性，使其支持字符串格式化输出。
///
/// 工业实践中，这些描述信息常用于系统日志以及发送给客户端的错误行中。
impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{} - {}", self.kind.message(), cause),
            None => write!(f, "{}", self.kind.message()),
        }
    }
}

impl std::error::Error for Exception {}

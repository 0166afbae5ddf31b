// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Gophermap 模块
//!
//! 该模块实现了 gophermap 索引文件的解析与渲染。
//!
//! ## 设计意图
//! - **两阶段模型**：解析阶段把文件逐行翻译为 [`Section`] 序列并缓存，
//!   渲染阶段按序列顺序把各节写给客户端。
//! - **指令集**：行首字符决定指令（标题、注释、隐藏文件、子引用、结束、
//!   目录列表、信息行），其余行原样转发。
//! - **嵌套上限**：嵌套 gophermap 渲染深度超过 [`MAX_GOPHERMAP_DEPTH`]
//!   视为非法 gophermap。

use crate::{
    connection::Connection,
    content,
    exception::{Exception, ExceptionKind},
    param::{item_type_for, ItemType, CRLF, GOPHERMAP_REGEX, MAX_GOPHERMAP_DEPTH, NULL_HOST, NULL_PORT},
    path::ResourcePath,
    request::Request,
    server::Server,
    util::{build_info_line, build_line},
};

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader};

/// gophermap 解析产出的一个可渲染节。
#[derive(Debug, Clone)]
pub enum Section {
    /// 静态文本（已是客户端可直接接收的字节）
    Text(Bytes),
    /// 目录列表，携带解析期收集到的隐藏文件集合
    Directory {
        path: ResourcePath,
        hidden: HashSet<String>,
    },
    /// `=` 引用的普通文件，渲染时原样内联
    IncludedFile(ResourcePath),
    /// `=` 引用的嵌套 gophermap，渲染时递归解析
    Nested(ResourcePath),
    /// `=` 引用的 CGI 脚本，渲染时执行
    Cgi(Request),
}

/// 行指令类型（解析期内部使用）。
#[derive(Debug, PartialEq, Eq)]
enum LineType {
    /// 未标注类型，作为信息行补上 `i` 前缀
    InfoNotStated,
    /// `!` 标题行
    Title,
    /// `#` 注释行
    Comment,
    /// `-` 隐藏文件指令
    HiddenFile,
    /// `=` 子引用指令
    SubGophermap,
    /// `.` 结束
    End,
    /// `*` 结束并追加目录列表
    EndBeginList,
    /// 其余行原样转发
    Verbatim,
}

/// 解析一行的指令类型。
///
/// 单字符行只接受 `.`、`*`、`#`、`i`、`!`；不含制表符的长行只接受
/// `#`、`!`、`i`、`-`、`=`，否则按未标注信息行处理；含制表符的行
/// 视为已经排好版的菜单行。
fn parse_line_type(line: &str) -> LineType {
    if line.is_empty() {
        return LineType::InfoNotStated;
    }

    let first = line.as_bytes()[0];

    if line.len() == 1 {
        return match first {
            b'.' => LineType::End,
            b'*' => LineType::EndBeginList,
            b'#' => LineType::Comment,
            b'i' => LineType::Verbatim,
            b'!' => LineType::Title,
            _ => LineType::Verbatim,
        };
    }

    if !line.contains('\t') {
        // 注意：多字符的 "." 和 "*" 开头行不是结束指令，按未标注信息行处理
        return match first {
            b'#' => LineType::Comment,
            b'!' => LineType::Title,
            b'-' => LineType::HiddenFile,
            b'=' => LineType::SubGophermap,
            b'i' => LineType::Verbatim,
            _ => LineType::InfoNotStated,
        };
    }

    match first {
        b'#' => LineType::Comment,
        b'!' => LineType::Title,
        b'-' => LineType::HiddenFile,
        b'=' => LineType::SubGophermap,
        b'.' => LineType::End,
        b'*' => LineType::EndBeginList,
        _ => LineType::Verbatim,
    }
}

/// 判断一个路径按文件名规则是否为 gophermap
pub fn is_gophermap(path: &ResourcePath) -> bool {
    GOPHERMAP_REGEX.is_match(path.relative())
}

/// 解析一个 gophermap 文件为节序列。
///
/// `=` 子引用在解析期完成解析与合法性检查（目录、大小上限、自引用），
/// 实际内容读取推迟到渲染期。
pub async fn parse(server: &Server, path: &ResourcePath) -> Result<Vec<Section>, Exception> {
    let fd = tokio::fs::File::open(path.absolute())
        .await
        .map_err(|e| Exception::wrap(ExceptionKind::FileOpen, e))?;

    let mut sections: Vec<Section> = Vec::new();
    let page_width = server.config().page_width();

    // 隐藏文件集合预置 gophermap 自身，目录列表里永远不显示它
    let mut hidden: HashSet<String> = HashSet::new();
    hidden.insert(path.relative().to_string());

    let mut title_seen = false;

    let mut lines = BufReader::new(fd).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => return Err(Exception::wrap(ExceptionKind::FileRead, e)),
        };

        match parse_line_type(&line) {
            LineType::InfoNotStated => {
                sections.push(Section::Text(Bytes::from(build_info_line(&line, page_width))));
            }

            LineType::Title => {
                if title_seen {
                    return Err(Exception::wrap(
                        ExceptionKind::InvalidGophermap,
                        "duplicate title line",
                    ));
                }
                title_seen = true;
                sections.push(Section::Text(Bytes::from(build_line(
                    ItemType::Info,
                    &line[1..],
                    "TITLE",
                    NULL_HOST,
                    NULL_PORT,
                    page_width,
                ))));
            }

            LineType::Comment => {}

            LineType::HiddenFile => {
                hidden.insert(path.parent_dir().join_relative(&line[1..]));
            }

            LineType::SubGophermap => {
                sections.push(parse_sub_include(server, path, &line[1..]).await?);
            }

            LineType::End => break,

            LineType::EndBeginList => {
                sections.push(Section::Directory {
                    path: path.parent_dir(),
                    hidden: hidden.clone(),
                });
                break;
            }

            LineType::Verbatim => {
                sections.push(Section::Text(Bytes::from(format!("{}{}", line, CRLF))));
            }
        }
    }

    Ok(sections)
}

/// 解析一条 `=` 子引用行。
async fn parse_sub_include(
    server: &Server,
    path: &ResourcePath,
    rest: &str,
) -> Result<Section, Exception> {
    let request = Request::internal(path, rest);

    if request.path().relative().is_empty() || request.path().relative() == path.relative() {
        return Err(Exception::wrap(
            ExceptionKind::InvalidGophermap,
            format!("sub-include references self or root: {}", rest),
        ));
    }

    let meta = tokio::fs::metadata(request.path().absolute())
        .await
        .map_err(|e| Exception::wrap(ExceptionKind::FileOpen, e))?;

    if meta.is_dir() {
        return Err(Exception::new(ExceptionKind::SubgophermapIsDir));
    }

    // CGI 目录内的引用在大小检查之前处理，脚本本身的大小无关紧要
    if server.policy().within_cgi_dir(request.path()) {
        return Ok(Section::Cgi(request));
    }

    if meta.len() > server.config().subgophermap_size_max() {
        return Err(Exception::new(ExceptionKind::SubgophermapSize));
    }

    if is_gophermap(request.path()) {
        Ok(Section::Nested(request.path().clone()))
    } else {
        Ok(Section::IncludedFile(request.path().clone()))
    }
}

/// 按序渲染节序列并写给客户端。
///
/// 嵌套 gophermap 会递归进入本函数，深度超过上限时返回 InvalidGophermap。
pub fn render<'a>(
    server: &'a Server,
    conn: &'a mut Connection,
    sections: &'a [Section],
    depth: usize,
) -> Pin<Box<dyn Future<Output = Result<(), Exception>> + Send + 'a>> {
    Box::pin(async move {
        for section in sections {
            match section {
                Section::Text(bytes) => {
                    conn.write_bytes(bytes).await?;
                }

                Section::Directory { path, hidden } => {
                    let listing = list_directory(server, path, hidden).await?;
                    conn.write_bytes(&listing).await?;
                }

                Section::IncludedFile(path) => {
                    let contents =
                        content::read_file(&path.absolute(), server.config().file_read_buf())
                            .await?;
                    conn.write_bytes(&contents).await?;
                }

                Section::Nested(path) => {
                    if depth + 1 > MAX_GOPHERMAP_DEPTH {
                        return Err(Exception::wrap(
                            ExceptionKind::InvalidGophermap,
                            format!("nested gophermap depth exceeds {}", MAX_GOPHERMAP_DEPTH),
                        ));
                    }
                    let nested = parse(server, path).await?;
                    render(server, conn, &nested, depth + 1).await?;
                }

                Section::Cgi(request) => {
                    crate::cgi::execute(server, conn, request).await?;
                }
            }
        }
        Ok(())
    })
}

/// 扫描目录并构建菜单行。
///
/// 条目按名字字节序升序排列；隐藏集合、受限路径与 CGI 目录内的条目
/// 一律跳过；普通文件按扩展名推断条目类型，目录固定为类型 `1`。
pub async fn list_directory(
    server: &Server,
    dir: &ResourcePath,
    hidden: &HashSet<String>,
) -> Result<Vec<u8>, Exception> {
    let mut read_dir = tokio::fs::read_dir(dir.absolute())
        .await
        .map_err(|e| Exception::wrap(ExceptionKind::DirectoryRead, e))?;

    let mut entries: Vec<(String, bool, bool)> = Vec::new();
    loop {
        let entry = match read_dir.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => return Err(Exception::wrap(ExceptionKind::DirectoryRead, e)),
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = match entry.file_type().await {
            Ok(t) => t,
            Err(e) => return Err(Exception::wrap(ExceptionKind::DirectoryRead, e)),
        };
        entries.push((name, file_type.is_dir(), file_type.is_file()));
    }

    entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    let config = server.config();
    let page_width = config.page_width();
    let port = config.fwd_port().to_string();

    let mut listing = Vec::new();
    for (name, is_dir, is_file) in entries {
        let file_path = dir.join(&name);

        if hidden.contains(file_path.relative())
            || server.policy().is_restricted(&file_path)
            || server.policy().within_cgi_dir(&file_path)
        {
            continue;
        }

        if is_dir {
            listing.extend_from_slice(&build_line(
                ItemType::Directory,
                &name,
                file_path.selector(),
                config.hostname(),
                &port,
                page_width,
            ));
        } else if is_file {
            listing.extend_from_slice(&build_line(
                item_type_for(&name),
                &name,
                file_path.selector(),
                config.hostname(),
                &port,
                page_width,
            ));
        }
        // 其余类型（符号链接、设备等）不进入列表
    }

    Ok(listing)
}

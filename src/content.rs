// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Content 模块
//!
//! 该模块定义了缓存条目承载的内容种类。
//!
//! ## 设计意图
//! - **封闭枚举**：内容只有普通文件、gophermap、生成文件三种，用 `match`
//!   静态分发，不引入 trait 对象。
//! - **按文件名分发**：加载时由文件名决定按 gophermap 解析还是按字节读入。
//! - **生成文件**：`caps.txt` 之类的虚拟文件在启动时写入缓存，永不重载。

use crate::{
    connection::Connection,
    exception::{Exception, ExceptionKind},
    gophermap::{self, Section},
    param::MENU_END,
    path::ResourcePath,
    server::Server,
};

use bytes::Bytes;
use tokio::io::AsyncReadExt;

/// 按配置的缓冲大小把整个文件读入内存。
pub async fn read_file(abs: &str, buf_size: usize) -> Result<Vec<u8>, Exception> {
    let mut fd = tokio::fs::File::open(abs)
        .await
        .map_err(|e| Exception::wrap(ExceptionKind::FileOpen, e))?;

    let mut contents = Vec::new();
    let mut buf = vec![0u8; buf_size.max(1)];
    loop {
        let count = match fd.read(&mut buf).await {
            Ok(c) => c,
            Err(e) => return Err(Exception::wrap(ExceptionKind::FileRead, e)),
        };
        if count == 0 {
            break;
        }
        contents.extend_from_slice(&buf[..count]);
    }
    Ok(contents)
}

/// 缓存条目承载的内容。
#[derive(Debug, Clone)]
pub enum FileContents {
    /// 普通文件的原始字节
    Regular(Bytes),
    /// gophermap 解析出的节序列
    Gophermap(Vec<Section>),
    /// 启动时生成的虚拟文件字节
    Generated(Bytes),
}

impl FileContents {
    /// 从磁盘加载路径对应的内容，按文件名分发内容种类。
    pub async fn load(server: &Server, path: &ResourcePath) -> Result<Self, Exception> {
        if gophermap::is_gophermap(path) {
            let sections = gophermap::parse(server, path).await?;
            Ok(FileContents::Gophermap(sections))
        } else {
            let bytes = read_file(&path.absolute(), server.config().file_read_buf()).await?;
            Ok(FileContents::Regular(Bytes::from(bytes)))
        }
    }

    /// 释放当前持有的内容（重载前调用）。
    pub fn clear(&mut self) {
        match self {
            FileContents::Regular(bytes) => *bytes = Bytes::new(),
            FileContents::Gophermap(sections) => sections.clear(),
            FileContents::Generated(_) => {}
        }
    }

    /// 把内容写给客户端。
    ///
    /// gophermap 渲染完所有节之后追加页脚与菜单结束标记。
    pub async fn write_to_client(
        &self,
        server: &Server,
        conn: &mut Connection,
    ) -> Result<(), Exception> {
        match self {
            FileContents::Regular(bytes) => conn.write_bytes(bytes).await,
            FileContents::Generated(bytes) => conn.write_bytes(bytes).await,
            FileContents::Gophermap(sections) => {
                gophermap::render(server, conn, sections, 0).await?;
                conn.write_bytes(server.footer()).await?;
                conn.write_bytes(MENU_END.as_bytes()).await
            }
        }
    }
}

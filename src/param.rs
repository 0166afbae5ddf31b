// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Gopher 协议参数与常量模块
//!
//! 该模块定义了 `shaneyale-gopherd` 遵循的 Gopher 协议（RFC 1436 / GopherII）相关常量和数据结构，包括：
//! - 菜单行中使用的条目类型（Item Type）强类型枚举。
//! - 详尽的文件后缀名到条目类型的映射表。
//! - 信息行、选择器长度等协议级常量。

use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

/// 服务器名称标识，用于 `caps.txt` 的 `ServerSoftware` 字段
pub const SERVER_NAME: &str = "shaneyale-gopherd";

/// 服务器版本号
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Gopher 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 菜单结束标记行
pub const MENU_END: &str = ".\r\n";

/// 选择器允许的最大字节数，超出则替换为 [`ERROR_SELECTOR`]
pub const MAX_SELECTOR_LEN: usize = 255;

/// 选择器超长时发送给客户端的替代选择器
pub const ERROR_SELECTOR: &str = "/error_selector_length";

/// 信息行（类型 `i`）使用的占位主机名
pub const NULL_HOST: &str = "null.host";

/// 信息行使用的占位端口
pub const NULL_PORT: &str = "0";

/// gophermap 嵌套渲染的最大深度，超出视为非法 gophermap
pub const MAX_GOPHERMAP_DEPTH: usize = 8;

lazy_static! {
    /// gophermap 文件名判定正则。
    ///
    /// 命中 `gophermap`、`foo/gophermap` 以及 `foo.gophermap` 三种形式。
    pub static ref GOPHERMAP_REGEX: Regex = Regex::new(r"^(|.+/|.+\.)gophermap$").unwrap();
}

/// Gopher 菜单行的条目类型。
///
/// 覆盖 RFC 1436 的标准类型与 GopherII 的扩展类型中本服务器会产生的子集。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    /// 普通文本文件（`0`）
    Text,
    /// 目录 / 菜单（`1`）
    Directory,
    /// 错误信息（`3`）
    Error,
    /// 二进制归档（`5`），zip、tar 之类
    BinArchive,
    /// 二进制文件（`9`），兜底类型
    Binary,
    /// 任意格式图片（`I`）
    Image,
    /// 文档（`d`），PDF、Word 之类
    Doc,
    /// HTML 文档（`h`）
    Html,
    /// 信息行（`i`），不可选中
    Info,
    /// 标记语言文档（`p`）
    Markup,
    /// 音频（`s`）
    Audio,
    /// XML 文档（`x`）
    Xml,
    /// 视频（`;`）
    Video,
}

impl ItemType {
    /// 返回该类型在菜单行中的单字节表示。
    pub fn as_byte(self) -> u8 {
        match self {
            ItemType::Text => b'0',
            ItemType::Directory => b'1',
            ItemType::Error => b'3',
            ItemType::BinArchive => b'5',
            ItemType::Binary => b'9',
            ItemType::Image => b'I',
            ItemType::Doc => b'd',
            ItemType::Html => b'h',
            ItemType::Info => b'i',
            ItemType::Markup => b'p',
            ItemType::Audio => b's',
            ItemType::Xml => b'x',
            ItemType::Video => b';',
        }
    }
}

impl fmt::Display for ItemType {
    /// 将枚举格式化为菜单行使用的类型字符
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}

lazy_static! {
    /// 文件后缀名到 Gopher 条目类型的映射表。
    ///
    /// 后缀名均为小写且不含点号。未收录的后缀返回 [`ItemType::Binary`]。
    pub static ref ITEM_TYPES: HashMap<&'static str, ItemType> = {
        let mut map = HashMap::new();
        // 可执行 / 目标文件
        map.insert("out", ItemType::Binary);
        map.insert("a", ItemType::Binary);
        map.insert("o", ItemType::Binary);
        map.insert("ko", ItemType::Binary);

        // gophermap 本身在菜单中以目录形式出现
        map.insert("gophermap", ItemType::Directory);

        // 归档
        map.insert("lz", ItemType::BinArchive);
        map.insert("gz", ItemType::BinArchive);
        map.insert("bz2", ItemType::BinArchive);
        map.insert("7z", ItemType::BinArchive);
        map.insert("zip", ItemType::BinArchive);
        map.insert("tar", ItemType::BinArchive);
        map.insert("rar", ItemType::BinArchive);

        // 文本源文件
        map.insert("txt", ItemType::Text);
        map.insert("gitignore", ItemType::Text);
        map.insert("json", ItemType::Text);
        map.insert("yaml", ItemType::Text);
        map.insert("toml", ItemType::Text);
        map.insert("s", ItemType::Text);
        map.insert("c", ItemType::Text);
        map.insert("h", ItemType::Text);
        map.insert("py", ItemType::Text);
        map.insert("go", ItemType::Text);
        map.insert("rs", ItemType::Text);
        map.insert("sh", ItemType::Text);
        map.insert("conf", ItemType::Text);
        map.insert("log", ItemType::Text);
        map.insert("profile", ItemType::Text);
        map.insert("bashrc", ItemType::Text);
        map.insert("vimrc", ItemType::Text);
        map.insert("ovpn", ItemType::Text);

        // 标记语言
        map.insert("md", ItemType::Markup);

        // XML
        map.insert("xml", ItemType::Xml);

        // 文档
        map.insert("doc", ItemType::Doc);
        map.insert("docx", ItemType::Doc);
        map.insert("pdf", ItemType::Doc);

        // 图片
        map.insert("jpg", ItemType::Image);
        map.insert("jpeg", ItemType::Image);
        map.insert("png", ItemType::Image);
        map.insert("gif", ItemType::Image);
        map.insert("webp", ItemType::Image);
        map.insert("bmp", ItemType::Image);

        // HTML
        map.insert("html", ItemType::Html);
        map.insert("htm", ItemType::Html);

        // 音频
        map.insert("ogg", ItemType::Audio);
        map.insert("mp3", ItemType::Audio);
        map.insert("wav", ItemType::Audio);
        map.insert("mid", ItemType::Audio);
        map.insert("opus", ItemType::Audio);
        map.insert("m4a", ItemType::Audio);
        map.insert("aac", ItemType::Audio);
        map.insert("flac", ItemType::Audio);

        // 视频
        map.insert("mp4", ItemType::Video);
        map.insert("mkv", ItemType::Video);
        map.insert("webm", ItemType::Video);
        map.insert("avi", ItemType::Video);
        map
    };
}

/// 根据文件名推断 Gopher 条目类型。
///
/// 取最后一个 `.` 之后的部分作为后缀（统一转小写）查表，查不到或没有后缀时
/// 返回兜底的二进制类型。
pub fn item_type_for(name: &str) -> ItemType {
    let lower = name.to_lowercase();
    match lower.rsplit_once('.') {
        Some((_, ext)) => match ITEM_TYPES.get(ext) {
            Some(t) => *t,
            None => ItemType::Binary,
        },
        None => ItemType::Binary,
    }
}

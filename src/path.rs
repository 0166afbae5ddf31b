// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Path 模块
//!
//! 该模块实现了请求路径的安全封装。每个 [`ResourcePath`] 持有服务根目录、
//! 根内相对路径和客户端可见的选择器三元组，保证拼接出的绝对路径永远不会
//! 逃逸出服务根目录。
//!
//! ## 设计意图
//! - **词法净化**：`sanitize` 只做字符串层面的归一化，不访问文件系统。
//! - **幂等性**：对已净化的路径再次净化得到同样的结果。
//! - **逃逸映射**：任何试图向上穿越根目录的路径都被映射回根目录本身。

/// 对原始路径做词法归一化。
///
/// 折叠 `.`、`..` 与重复的分隔符。相对路径开头的 `..` 会被保留，
/// 由调用方决定如何处置；绝对路径中越过根的 `..` 直接丢弃。
fn normalize(raw: &str) -> String {
    let absolute = raw.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for seg in raw.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                match parts.last() {
                    Some(&"..") | None => {
                        // 相对路径允许前导 ".."，绝对路径直接丢弃
                        if !absolute {
                            parts.push("..");
                        }
                    }
                    Some(_) => {
                        parts.pop();
                    }
                }
            }
            seg => parts.push(seg),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// 将原始请求路径净化为根内相对路径。
///
/// 步骤：
/// 1. 词法归一化；
/// 2. 绝对路径剥掉根前缀（若有）及前导 `/`；
/// 3. 以 `..` 开头的相对路径（即向上逃逸）映射为空字符串，也就是服务根目录。
///
/// # 参数
///
/// * `root` - 服务根目录的绝对路径。
/// * `raw` - 客户端提供的原始路径。
pub fn sanitize(root: &str, raw: &str) -> String {
    let norm = normalize(raw);

    if norm.starts_with('/') {
        let stripped = if norm == root {
            ""
        } else if let Some(rest) = norm.strip_prefix(&format!("{}/", root)) {
            rest
        } else {
            &norm
        };
        return stripped.trim_start_matches('/').to_string();
    }

    if norm.starts_with("..") {
        return String::new();
    }

    norm
}

/// 将相对路径格式化为客户端可见的选择器。
///
/// 空路径和 `.` 均表示服务根目录，选择器为 `/`。
pub fn format_selector(rel: &str) -> String {
    if rel.is_empty() || rel == "." {
        return "/".to_string();
    }
    if rel.starts_with('/') {
        rel.to_string()
    } else {
        format!("/{}", rel)
    }
}

/// 校验 `~user` 展开得到的用户根目录。
///
/// 候选目录为 `/home/<user>/<user_dir>`，词法归一化之后必须仍然位于
/// `/home/` 之下并以配置的子目录名结尾，否则视为非法并回退到服务根目录。
pub fn sanitize_user_root(user: &str, user_dir: &str) -> Option<String> {
    let candidate = normalize(&format!("/home/{}/{}", user, user_dir));
    if candidate.starts_with("/home/") && candidate.ends_with(&format!("/{}", user_dir)) {
        Some(candidate)
    } else {
        None
    }
}

/// 安全持有一个文件路径的三元组：根目录、根内相对路径、客户端可见选择器。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    root: String,
    rel: String,
    sel: String,
}

impl ResourcePath {
    /// 从根目录与原始路径构造，相对路径经过净化，选择器由相对路径派生。
    pub fn new(root: &str, raw: &str) -> Self {
        let rel = sanitize(root, raw);
        let sel = format_selector(&rel);
        Self {
            root: root.to_string(),
            rel,
            sel,
        }
    }

    /// 从根目录、原始路径与显式选择器构造（用于 `~user` 展开）。
    pub fn with_selector(root: &str, raw: &str, sel: String) -> Self {
        let rel = sanitize(root, raw);
        Self {
            root: root.to_string(),
            rel,
            sel,
        }
    }

    /// 获取根目录
    pub fn root(&self) -> &str {
        &self.root
    }

    /// 获取根内相对路径
    pub fn relative(&self) -> &str {
        &self.rel
    }

    /// 获取客户端可见选择器
    pub fn selector(&self) -> &str {
        &self.sel
    }

    /// 拼接出绝对路径
    pub fn absolute(&self) -> String {
        if self.rel.is_empty() {
            self.root.clone()
        } else {
            format!("{}/{}", self.root, self.rel)
        }
    }

    /// 把一个名字拼接到当前相对路径之后，返回新的相对路径字符串
    pub fn join_relative(&self, name: &str) -> String {
        if self.rel.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.rel, name)
        }
    }

    /// 在同一根目录下构造一个子路径
    pub fn join(&self, name: &str) -> ResourcePath {
        ResourcePath::new(&self.root, &self.join_relative(name))
    }

    /// 返回当前路径所在目录的路径（`*` 目录列表指令使用）
    pub fn parent_dir(&self) -> ResourcePath {
        match self.rel.rsplit_once('/') {
            Some((dir, _)) => ResourcePath::new(&self.root, dir),
            None => ResourcePath::new(&self.root, ""),
        }
    }

    /// 重写相对路径。客户端可见选择器保持不变。
    pub fn remap(&mut self, raw: &str) {
        self.rel = sanitize(&self.root, raw);
    }
}

use crate::{
    exception::{Exception, ExceptionKind},
    path::{self, ResourcePath},
    util::split_by,
};

use percent_encoding::percent_decode_str;

/// 一次解析完成的客户端请求：目标路径加查询参数。
#[derive(Debug, Clone)]
pub struct Request {
    path: ResourcePath,
    params: String,
}

impl Request {
    /// 从客户端发来的原始选择器行解析请求。
    ///
    /// 解析步骤：
    /// 1. 拒绝包含 ASCII 控制字节（< 0x20 或 0x7F）的请求；
    /// 2. 以第一个 `?` 切分出路径与查询参数，参数原样保留；
    /// 3. 对路径部分做百分号解码；
    /// 4. 启用用户目录支持时展开 `~user` 前缀；
    /// 5. 净化为根内相对路径。
    ///
    /// # 参数
    ///
    /// * `root` - 服务根目录。
    /// * `user_dir` - 用户个人目录子目录名，空字符串表示禁用。
    /// * `received` - 客户端发来的一行原始选择器。
    pub fn parse(root: &str, user_dir: &str, received: &str) -> Result<Self, Exception> {
        for b in received.bytes() {
            if b < 0x20 || b == 0x7f {
                return Err(Exception::new(ExceptionKind::InvalidRequest));
            }
        }

        let (raw_path, params) = split_by(received, "?");

        let decoded = match percent_decode_str(raw_path).decode_utf8() {
            Ok(s) => s.into_owned(),
            Err(e) => return Err(Exception::wrap(ExceptionKind::InvalidRequest, e)),
        };

        let path = if user_dir.is_empty() {
            ResourcePath::new(root, &decoded)
        } else {
            Self::expand_user_dir(root, user_dir, &decoded)
        };

        Ok(Self {
            path,
            params: params.to_string(),
        })
    }

    /// 展开 `~user` 前缀为 `/home/<user>/<user_dir>` 下的路径。
    ///
    /// 展开失败（空用户名或非法用户根目录）时回退到服务根目录。
    fn expand_user_dir(root: &str, user_dir: &str, decoded: &str) -> ResourcePath {
        let user_path = decoded.trim_start_matches('/');
        if !user_path.starts_with('~') {
            return ResourcePath::new(root, decoded);
        }

        let (user_seg, remaining) = split_by(user_path, "/");
        if user_seg.len() <= 1 {
            return ResourcePath::new(root, "");
        }
        let user = &user_seg[1..];

        match path::sanitize_user_root(user, user_dir) {
            Some(user_root) => {
                let rel = path::sanitize(&user_root, remaining);
                let sel = format!("/~{}{}", user, path::format_selector(&rel));
                ResourcePath::with_selector(&user_root, remaining, sel)
            }
            None => ResourcePath::new(root, ""),
        }
    }

    /// 从 gophermap 的 `=` 子引用行构造内部请求。
    ///
    /// 无论引用写的是绝对选择器还是相对选择器，均在当前根目录内解析。
    pub fn internal(base: &ResourcePath, line: &str) -> Self {
        let (raw_path, params) = split_by(line, "?");
        Self {
            path: ResourcePath::new(base.root(), raw_path),
            params: params.to_string(),
        }
    }

    /// 获取请求路径
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// 获取查询参数（CGI 的 `QUERY_STRING`，原样保留）
    pub fn params(&self) -> &str {
        &self.params
    }

    /// 应用一次重写：替换相对路径并合并查询参数。
    ///
    /// 已有参数非空时，新参数以 `&` 分隔拼接在前面。
    pub fn remap(&mut self, raw: &str) {
        let (new_path, new_params) = split_by(raw, "?");

        if !new_params.is_empty() {
            if self.params.is_empty() {
                self.params = new_params.to_string();
            } else {
                self.params = format!("{}&{}", new_params, self.params);
            }
        }

        self.path.remap(new_path);
    }
}

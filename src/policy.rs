//! # Policy 模块
//!
//! 该模块负责把配置中的文本规则表编译为运行期谓词：
//! - **受限路径**：换行分隔的正则列表，命中即拒绝访问。
//! - **请求重写**：换行分隔的 `pattern -> template` 列表，首条命中生效。
//! - **CGI 目录**：由配置目录构造的单条正则，命中目录本身及其下所有路径。
//!
//! 空配置一律退化为恒假谓词。规则编译失败属于致命配置错误，启动阶段直接终止。

use crate::{config::Config, path::ResourcePath, request::Request};

use log::{error, info};
use regex::Regex;

/// 路径重写规则的分隔符
const REMAP_SEPARATOR: &str = " -> ";

/// 一条编译好的重写规则：匹配正则与展开模板。
struct Remap {
    regex: Regex,
    template: String,
}

/// 服务器的访问策略集合。
pub struct Policy {
    restricted: Vec<Regex>,
    remaps: Vec<Remap>,
    cgi_dir: Option<Regex>,
}

impl Policy {
    /// 从配置编译策略集合。
    ///
    /// # Panics
    ///
    /// 正则编译失败、重写规则格式非法或 CGI 目录位于服务根之外时 panic，
    /// 这些都是启动阶段必须暴露的致命配置错误。
    pub fn from_config(config: &Config) -> Self {
        let restricted = compile_restricted(config.restricted_paths());
        if restricted.is_empty() {
            info!("受限路径检查未启用");
        }

        let remaps = compile_remaps(config.remap_requests());
        if remaps.is_empty() {
            info!("请求重写未启用");
        }

        let cgi_dir = if config.cgi_dir().is_empty() {
            info!("CGI支持未启用");
            None
        } else {
            Some(compile_cgi_dir(config.root(), config.cgi_dir()))
        };

        Self {
            restricted,
            remaps,
            cgi_dir,
        }
    }

    /// 判断路径是否命中受限规则
    pub fn is_restricted(&self, path: &ResourcePath) -> bool {
        self.restricted
            .iter()
            .any(|regex| regex.is_match(path.relative()))
    }

    /// 判断路径是否位于 CGI 目录内（含目录本身）
    pub fn within_cgi_dir(&self, path: &ResourcePath) -> bool {
        match &self.cgi_dir {
            Some(regex) => regex.is_match(path.relative()),
            None => false,
        }
    }

    /// 是否启用了 CGI 支持
    pub fn cgi_enabled(&self) -> bool {
        self.cgi_dir.is_some()
    }

    /// 对请求应用首条命中的重写规则。
    ///
    /// 返回重写后的选择器展开结果，未命中任何规则时返回 `None`。
    pub fn remap(&self, request: &mut Request) -> Option<String> {
        let selector = request.path().selector().to_string();
        for remap in &self.remaps {
            if let Some(caps) = remap.regex.captures(&selector) {
                let mut expanded = String::new();
                caps.expand(&remap.template, &mut expanded);
                request.remap(&expanded);
                return Some(expanded);
            }
        }
        None
    }
}

/// 编译受限路径正则表
fn compile_restricted(restrictions: &str) -> Vec<Regex> {
    let mut regexes = Vec::new();
    for expr in restrictions.split('\n') {
        if expr.is_empty() {
            continue;
        }
        let regex = match Regex::new(&format!("(?m){}$", expr)) {
            Ok(r) => r,
            Err(e) => {
                error!("受限路径正则编译失败: {} ({})", expr, e);
                panic!("受限路径正则编译失败: {}", expr);
            }
        };
        info!("已编译受限路径规则: {}", expr);
        regexes.push(regex);
    }
    regexes
}

/// 编译请求重写规则表
fn compile_remaps(remaps: &str) -> Vec<Remap> {
    let mut compiled = Vec::new();
    for expr in remaps.split('\n') {
        if expr.is_empty() {
            continue;
        }
        let (pattern, template) = match expr.split_once(REMAP_SEPARATOR) {
            Some((p, t)) => (p, t),
            None => {
                error!("重写规则格式非法: {}", expr);
                panic!("重写规则格式非法: {}", expr);
            }
        };
        let regex = match Regex::new(&format!("(?m){}$", pattern)) {
            Ok(r) => r,
            Err(e) => {
                error!("重写规则正则编译失败: {} ({})", pattern, e);
                panic!("重写规则正则编译失败: {}", pattern);
            }
        };
        info!("已编译重写规则: {}", expr);
        compiled.push(Remap {
            regex,
            template: template.to_string(),
        });
    }
    compiled
}

/// 编译 CGI 目录正则。
///
/// 绝对路径的 CGI 目录必须位于服务根之内，编译前统一转为根内相对路径。
fn compile_cgi_dir(root: &str, cgi_dir: &str) -> Regex {
    if cgi_dir.starts_with('/') && !cgi_dir.starts_with(root) {
        error!("CGI目录必须位于服务根目录之内: {}", cgi_dir);
        panic!("CGI目录必须位于服务根目录之内: {}", cgi_dir);
    }
    let rel = crate::path::sanitize(root, cgi_dir);
    info!("CGI目录: {}", rel);
    match Regex::new(&format!("(?m)^{}(|/.*)$", rel)) {
        Ok(r) => r,
        Err(e) => {
            error!("CGI目录正则编译失败: {} ({})", rel, e);
            panic!("CGI目录正则编译失败: {}", rel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(raw: &str) -> Config {
        Config::from_toml_str(raw)
    }

    #[test]
    fn test_empty_policy_is_constant_false() {
        let policy = Policy::from_config(&config_with("root = \"/srv\""));
        let path = ResourcePath::new("/srv", "anything/at/all");
        assert!(!policy.is_restricted(&path));
        assert!(!policy.within_cgi_dir(&path));
        assert!(!policy.cgi_enabled());
    }

    #[test]
    fn test_restricted_paths_match_relative() {
        let policy = Policy::from_config(&config_with(
            "root = \"/srv\"\nrestricted_paths = \"secret/.*\\n.*\\\\.bak\"",
        ));
        assert!(policy.is_restricted(&ResourcePath::new("/srv", "secret/key.txt")));
        assert!(policy.is_restricted(&ResourcePath::new("/srv", "docs/old.bak")));
        assert!(!policy.is_restricted(&ResourcePath::new("/srv", "docs/a.txt")));
    }

    #[test]
    fn test_cgi_dir_matches_itself_and_below() {
        let policy =
            Policy::from_config(&config_with("root = \"/srv\"\ncgi_dir = \"/srv/cgi-bin\""));
        assert!(policy.cgi_enabled());
        assert!(policy.within_cgi_dir(&ResourcePath::new("/srv", "cgi-bin")));
        assert!(policy.within_cgi_dir(&ResourcePath::new("/srv", "cgi-bin/script")));
        assert!(policy.within_cgi_dir(&ResourcePath::new("/srv", "cgi-bin/sub/script")));
        assert!(!policy.within_cgi_dir(&ResourcePath::new("/srv", "cgi-bin-other/script")));
        assert!(!policy.within_cgi_dir(&ResourcePath::new("/srv", "docs/cgi-bin/script")));
    }

    #[test]
    fn test_cgi_dir_relative_config() {
        let policy = Policy::from_config(&config_with("root = \"/srv\"\ncgi_dir = \"cgi-bin\""));
        assert!(policy.within_cgi_dir(&ResourcePath::new("/srv", "cgi-bin/script")));
    }

    #[test]
    #[should_panic(expected = "CGI目录必须位于服务根目录之内")]
    fn test_cgi_dir_outside_root_panics() {
        Policy::from_config(&config_with("root = \"/srv\"\ncgi_dir = \"/usr/lib/cgi\""));
    }

    #[test]
    #[should_panic(expected = "受限路径正则编译失败")]
    fn test_malformed_restricted_regex_panics() {
        Policy::from_config(&config_with("root = \"/srv\"\nrestricted_paths = \"([\""));
    }

    #[test]
    #[should_panic(expected = "重写规则格式非法")]
    fn test_malformed_remap_rule_panics() {
        Policy::from_config(&config_with("root = \"/srv\"\nremap_requests = \"no-arrow-here\""));
    }

    #[test]
    fn test_remap_first_match_applies() {
        let policy = Policy::from_config(&config_with(
            "root = \"/srv\"\nremap_requests = \"^/old/(.*)$ -> /new/$1\"",
        ));
        let mut request = Request::parse("/srv", "", "/old/x").unwrap();
        let applied = policy.remap(&mut request);
        assert_eq!(applied.as_deref(), Some("/new/x"));
        assert_eq!(request.path().relative(), "new/x");
    }

    #[test]
    fn test_remap_is_identity_for_non_matching() {
        let policy = Policy::from_config(&config_with(
            "root = \"/srv\"\nremap_requests = \"^/old/(.*)$ -> /new/$1\"",
        ));
        let mut request = Request::parse("/srv", "", "/current/x").unwrap();
        assert!(policy.remap(&mut request).is_none());
        assert_eq!(request.path().relative(), "current/x");
    }

    #[test]
    fn test_remap_with_params_in_template() {
        let policy = Policy::from_config(&config_with(
            "root = \"/srv\"\nremap_requests = \"^/search/(.*)$ -> /cgi-bin/search?q=$1\"",
        ));
        let mut request = Request::parse("/srv", "", "/search/gopher").unwrap();
        policy.remap(&mut request);
        assert_eq!(request.path().relative(), "cgi-bin/search");
        assert_eq!(request.params(), "q=gopher");
    }
}

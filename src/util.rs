use crate::param::{
    ItemType, CRLF, ERROR_SELECTOR, MAX_SELECTOR_LEN, NULL_HOST, NULL_PORT, SERVER_NAME,
    SERVER_VERSION,
};

/// 按分隔符把输入切成两段（永远返回两段，找不到分隔符时第二段为空）。
pub fn split_by<'a>(input: &'a str, delim: &str) -> (&'a str, &'a str) {
    match input.split_once(delim) {
        Some((left, right)) => (left, right),
        None => (input, ""),
    }
}

/// 格式化菜单行的展示文本。
///
/// 超过页面宽度的文本截断为 `page_width - 3` 字节再接省略号，
/// 恰好等于页面宽度的文本原样保留。截断点回退到字符边界以保证 UTF-8 合法。
pub fn format_display(name: &str, page_width: usize) -> String {
    if name.len() <= page_width {
        return name.to_string();
    }
    let mut cut = page_width.saturating_sub(3);
    while cut > 0 && !name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &name[..cut])
}

/// 格式化菜单行的选择器字段。
///
/// 超过 255 字节的选择器替换为固定的错误选择器。
pub fn format_selector_field(selector: &str) -> &str {
    if selector.len() > MAX_SELECTOR_LEN {
        ERROR_SELECTOR
    } else {
        selector
    }
}

/// 构建一条 Gopher 菜单行：`<type><display>\t<selector>\t<host>\t<port>\r\n`。
pub fn build_line(
    t: ItemType,
    display: &str,
    selector: &str,
    host: &str,
    port: &str,
    page_width: usize,
) -> Vec<u8> {
    format!(
        "{}{}\t{}\t{}\t{}{}",
        t,
        format_display(display, page_width),
        format_selector_field(selector),
        host,
        port,
        CRLF
    )
    .into_bytes()
}

/// 构建一条信息行（类型 `i`，占位主机与端口，空选择器）。
pub fn build_info_line(text: &str, page_width: usize) -> Vec<u8> {
    build_line(ItemType::Info, text, "", NULL_HOST, NULL_PORT, page_width)
}

/// 构建一条错误行（类型 `3`）并附上菜单结束标记。
pub fn build_error_line(message: &str) -> Vec<u8> {
    format!(
        "{}{}\t\t{}\t{}{}.{}",
        ItemType::Error,
        message,
        NULL_HOST,
        NULL_PORT,
        CRLF,
        CRLF
    )
    .into_bytes()
}

/// 构建菜单页脚。
///
/// 页脚文本为空时返回空字节串；否则为一条空信息行、一条下划线分隔行，
/// 以及页脚的每一行各占一条信息行。菜单结束标记由调用方统一追加。
pub fn build_footer(text: &str, page_width: usize) -> Vec<u8> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut footer = Vec::new();
    footer.extend_from_slice(&build_info_line("", page_width));
    footer.extend_from_slice(&build_info_line(&"_".repeat(page_width), page_width));
    for line in text.split('\n') {
        footer.extend_from_slice(&build_info_line(line, page_width));
    }
    footer
}

/// 生成 `URL:` 请求的 HTML 跳转页面。
///
/// 部分 Gopher 客户端收到 `h` 类型的外部链接后会原样请求 `URL:<url>`，
/// 此时返回一个自动跳转的 HTML 页面。
pub fn html_redirect(url: &str) -> Vec<u8> {
    format!(
        concat!(
            "<html>\n",
            "<head>\n",
            "<meta http-equiv=\"refresh\" content=\"1;URL={url}\">\n",
            "</head>\n",
            "<body>\n",
            "You are following an external link to a web site.\n",
            "You will be automatically taken to the site shortly.\n",
            "If you do not get sent there, please click <A HREF=\"{url}\">here</A> to go to the web site.\n",
            "<p>\n",
            "The URL linked is <A HREF=\"{url}\">{url}</A>\n",
            "</body>\n",
            "</html>\n"
        ),
        url = url
    )
    .into_bytes()
}

/// 生成自动生成文件共用的头部注释。
fn policy_header(name: &str) -> String {
    format!(
        "# This is an automatically generated{crlf}# server policy file: {name}{crlf}#{crlf}",
        name = name,
        crlf = CRLF
    )
}

/// 生成 `caps.txt` 的内容（GopherII 能力声明）。
pub fn caps_txt(description: &str, admin: &str, geolocation: &str) -> Vec<u8> {
    let mut text = String::new();
    text.push_str("CAPS");
    text.push_str(CRLF);
    text.push_str(CRLF);
    text.push_str(&policy_header("caps.txt"));
    text.push_str(CRLF);
    text.push_str("CapsVersion=1");
    text.push_str(CRLF);
    text.push_str("ExpireCapsAfter=1800");
    text.push_str(CRLF);
    text.push_str(CRLF);
    text.push_str("PathDelimeter=/");
    text.push_str(CRLF);
    text.push_str("PathIdentity=.");
    text.push_str(CRLF);
    text.push_str("PathParent=..");
    text.push_str(CRLF);
    text.push_str("PathParentDouble=FALSE");
    text.push_str(CRLF);
    text.push_str("PathEscapeCharacter=\\");
    text.push_str(CRLF);
    text.push_str("PathKeepPreDelimeter=FALSE");
    text.push_str(CRLF);
    text.push_str(CRLF);
    text.push_str(&format!("ServerSoftware={}{}", SERVER_NAME, CRLF));
    text.push_str(&format!("ServerSoftwareVersion={}{}", SERVER_VERSION, CRLF));
    text.push_str(&format!("ServerDescription={}{}", description, CRLF));
    text.push_str(&format!("ServerGeolocationString={}{}", geolocation, CRLF));
    text.push_str("ServerDefaultEncoding=utf-8");
    text.push_str(CRLF);
    text.push_str(CRLF);
    text.push_str(&format!("ServerAdmin={}{}", admin, CRLF));
    text.into_bytes()
}

/// 生成 `robots.txt` 的内容（禁止抓取）。
pub fn robots_txt() -> Vec<u8> {
    let mut text = policy_header("robots.txt");
    text.push_str(CRLF);
    text.push_str("User-agent: *");
    text.push_str(CRLF);
    text.push_str("Disallow: *");
    text.push_str(CRLF);
    text.push_str(CRLF);
    text.push_str("Crawl-delay: 99999");
    text.push_str(CRLF);
    text.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_by() {
        assert_eq!(split_by("path?query", "?"), ("path", "query"));
        assert_eq!(split_by("no-query", "?"), ("no-query", ""));
        assert_eq!(split_by("a?b?c", "?"), ("a", "b?c"));
    }

    #[test]
    fn test_format_display_at_width_is_untouched() {
        let name = "x".repeat(80);
        assert_eq!(format_display(&name, 80), name);
    }

    #[test]
    fn test_format_display_over_width_is_truncated() {
        let name = "x".repeat(81);
        let formatted = format_display(&name, 80);
        assert_eq!(formatted.len(), 80);
        assert!(formatted.ends_with("..."));
        assert_eq!(&formatted[..77], &name[..77]);
    }

    #[test]
    fn test_format_display_multibyte_boundary() {
        // 截断点落在多字节字符中间时必须回退到字符边界
        let name = "中".repeat(40);
        let formatted = format_display(&name, 80);
        assert!(formatted.len() <= 80);
        assert!(formatted.ends_with("..."));
    }

    #[test]
    fn test_format_selector_field_boundary() {
        let ok = "x".repeat(255);
        assert_eq!(format_selector_field(&ok), ok);
        let long = "x".repeat(256);
        assert_eq!(format_selector_field(&long), "/error_selector_length");
    }

    #[test]
    fn test_build_line_shape() {
        let line = build_line(
            ItemType::Directory,
            "Files",
            "/files",
            "example.org",
            "70",
            80,
        );
        assert_eq!(
            String::from_utf8(line).unwrap(),
            "1Files\t/files\texample.org\t70\r\n"
        );
    }

    #[test]
    fn test_build_info_line_uses_null_host() {
        let line = String::from_utf8(build_info_line("Welcome", 80)).unwrap();
        assert_eq!(line, "iWelcome\t\tnull.host\t0\r\n");
    }

    #[test]
    fn test_build_error_line_terminates_menu() {
        let line = String::from_utf8(build_error_line("404 Not Found")).unwrap();
        assert!(line.starts_with("3404 Not Found\t"));
        assert!(line.ends_with("\r\n.\r\n"));
    }

    #[test]
    fn test_build_footer_empty_is_empty() {
        assert!(build_footer("", 80).is_empty());
    }

    #[test]
    fn test_build_footer_contains_separator_and_lines() {
        let footer = String::from_utf8(build_footer("line one\nline two", 10)).unwrap();
        assert!(footer.contains("__________"));
        assert!(footer.contains("iline one\t"));
        assert!(footer.contains("iline two\t"));
    }

    #[test]
    fn test_html_redirect_embeds_url() {
        let page = String::from_utf8(html_redirect("https://example.org/")).unwrap();
        assert!(page.contains("URL=https://example.org/"));
        assert!(page.contains("<A HREF=\"https://example.org/\">"));
    }

    #[test]
    fn test_caps_txt_fields() {
        let caps = String::from_utf8(caps_txt("test server", "admin@example.org", "earth")).unwrap();
        assert!(caps.starts_with("CAPS\r\n"));
        assert!(caps.contains("ServerSoftware=shaneyale-gopherd\r\n"));
        assert!(caps.contains("ServerDescription=test server\r\n"));
        assert!(caps.contains("ServerAdmin=admin@example.org\r\n"));
    }

    #[test]
    fn test_robots_txt_disallows_all() {
        let robots = String::from_utf8(robots_txt()).unwrap();
        assert!(robots.contains("User-agent: *"));
        assert!(robots.contains("Disallow: *"));
    }
}

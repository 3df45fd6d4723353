use percent_encoding::percent_decode_str;
use unicode_normalization::UnicodeNormalization;

/// 由下载 URL 确定性地推导本地文件名
///
/// 取最后一个 path 段 → percent-decode → NFC 规范化 → 替换路径分隔符。
/// 结果为空（或 `.`/`..`）时回退为 URL 的 xxh3 十六进制。
pub fn file_name_for_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or_default();
    let decoded = percent_decode_str(last).decode_utf8_lossy();

    let name: String = decoded
        .nfc()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    let name = name.trim();

    if name.is_empty() || name == "." || name == ".." {
        return format!("{:016x}", xxhash_rust::xxh3::xxh3_64(url.as_bytes()));
    }
    name.to_string()
}

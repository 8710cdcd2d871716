//! Single-pass HTML link extraction.
//!
//! Built on `lol_html`'s streaming rewriter, which is a genuine single-
//! pass, allocation-bounded HTML tokenizer — exactly the shape the design
//! calls for. `<script>`/`<style>` contents and HTML comments never reach
//! the element handler because `lol_html` only fires handlers on actual
//! element/attribute structure, not on text inside those tags' bodies, so
//! no extra noise-stripping pass is needed.

use url::Url;

use lol_html::{element, HtmlRewriter, Settings};

const MAX_URL_LEN: usize = 2048;
const SKIP_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "bmp", "tiff",
    "zip", "tar", "gz", "rar", "7z", "bz2",
    "mp3", "mp4", "avi", "mov", "wmv", "flac", "wav",
    "pdf", "exe", "dmg", "iso", "woff", "woff2", "ttf", "eot",
];

/// Extracts every `<a href>` target in `html`, resolves it against
/// `base_url`, and drops anything too long or pointing at a skip-listed
/// extension. Malformed hrefs are silently skipped rather than failing
/// the whole page.
pub fn extract_links(html: &str, base_url: &Url) -> Vec<Url> {
    let mut hrefs: Vec<String> = Vec::new();

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![element!("a[href]", |el| {
                if let Some(href) = el.get_attribute("href") {
                    hrefs.push(href);
                }
                Ok(())
            })],
            ..Settings::default()
        },
        |_: &[u8]| {},
    );

    if rewriter.write(html.as_bytes()).is_err() {
        return Vec::new();
    }
    let _ = rewriter.end();

    hrefs
        .into_iter()
        .filter(|href| href.len() <= MAX_URL_LEN)
        .filter_map(|href| base_url.join(&href).ok())
        .filter(|url| !has_skip_extension(url))
        .collect()
}

fn has_skip_extension(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    SKIP_EXTENSIONS.iter().any(|ext| path.ends_with(&format!(".{ext}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://test.example/dir/page.html").unwrap()
    }

    #[test]
    fn extracts_and_resolves_relative_links() {
        let html = r#"<html><body><a href="/absolute">x</a><a href="relative.html">y</a></body></html>"#;
        let links = extract_links(html, &base());
        assert!(links.contains(&Url::parse("https://test.example/absolute").unwrap()));
        assert!(links.contains(&Url::parse("https://test.example/dir/relative.html").unwrap()));
    }

    #[test]
    fn skips_script_and_style_bodies() {
        let html = r#"<script>var a = "<a href=\"/evil\">";</script><a href="/real">ok</a>"#;
        let links = extract_links(html, &base());
        assert!(links.iter().any(|u| u.path() == "/real"));
        assert!(!links.iter().any(|u| u.path() == "/evil"));
    }

    #[test]
    fn rejects_skip_listed_extensions() {
        let html = r#"<a href="/image.png">img</a><a href="/doc.pdf">doc</a><a href="/page">ok</a>"#;
        let links = extract_links(html, &base());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].path(), "/page");
    }

    #[test]
    fn rejects_overlong_urls() {
        let long_path = "a".repeat(3000);
        let html = format!(r#"<a href="/{long_path}">too long</a><a href="/ok">ok</a>"#);
        let links = extract_links(&html, &base());
        assert_eq!(links.len(), 1);
    }
}

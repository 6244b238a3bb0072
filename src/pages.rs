use crate::codec::ProxyContext;
use chrono::Utc;

/// Landing page with a URL entry form.
pub fn homepage() -> String {
    let mut html = String::with_capacity(2048);

    html.push_str(r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Mirrorgate</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; max-width: 800px; margin: 0 auto; padding: 20px; text-align: center; line-height: 1.6; color: #333; background: #f8f9fa; }
        .container { background: white; padding: 30px; border-radius: 8px; box-shadow: 0 4px 6px rgba(0,0,0,0.1); }
        h1 { color: #2c3e50; margin: 20px 0; }
        form { display: flex; margin: 30px 0; }
        input[type="url"] { flex: 1; padding: 12px; font-size: 16px; border: 1px solid #ddd; border-radius: 4px 0 0 4px; }
        button { background: #3498db; color: white; border: none; padding: 12px 20px; font-size: 16px; border-radius: 0 4px 4px 0; cursor: pointer; }
        button:hover { background: #2980b9; }
        .example { color: #7f8c8d; font-size: 14px; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Mirrorgate</h1>
        <p>Enter the address of the page to open through this proxy.</p>
        <form id="proxy-form">
            <input type="url" id="url-input" placeholder="https://example.com" required autofocus>
            <button type="submit">Open</button>
        </form>
        <p class="example">Examples: https://en.wikipedia.org, https://news.ycombinator.com</p>
    </div>
    <script>
        document.getElementById('proxy-form').addEventListener('submit', function (e) {
            e.preventDefault();
            var url = document.getElementById('url-input').value.replace(/\s+/g, '');
            if (url) {
                window.location.href = '/' + url;
            }
        });
    </script>
</body>
</html>"#);

    html
}

/// Diagnostic page shown when the target could not be fetched.
pub fn upstream_error_page(target: &str, error: &str) -> String {
    let target = escape_html(target);
    let mut html = String::with_capacity(2048);

    html.push_str(r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Proxy Error</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; max-width: 800px; margin: 0 auto; padding: 40px 20px; color: #333; background: #f8f9fa; }
        .error-container { background: white; padding: 30px; border-radius: 8px; box-shadow: 0 4px 6px rgba(0,0,0,0.1); }
        h1 { color: #e74c3c; margin-top: 0; }
        .detail { background: #f5f5f5; padding: 12px; border-radius: 4px; word-break: break-all; margin: 12px 0; }
        .time { color: #999; font-size: 0.85em; margin-top: 24px; }
        a.direct { display: inline-block; background: #3498db; color: white; padding: 10px 20px; text-decoration: none; border-radius: 6px; margin-top: 12px; }
    </style>
</head>
<body>
    <div class="error-container">
        <h1>Unable to load the requested page</h1>
        <div class="detail"><strong>URL:</strong> "#);
    html.push_str(&target);
    html.push_str(r#"</div>
        <div class="detail"><strong>Error:</strong> "#);
    html.push_str(&escape_html(error));
    html.push_str(r#"</div>
        <p>The site may be down, blocking proxies, or refusing the connection.</p>
        <a class="direct" href=""#);
    html.push_str(&target);
    html.push_str(r#"" rel="noreferrer noopener">Open the site directly</a>
        <div class="time">Time: "#);
    html.push_str(&Utc::now().to_rfc3339());
    html.push_str(r#"</div>
    </div>
</body>
</html>"#);

    html
}

/// Client-side recovery script appended to rewritten pages.
///
/// Images without `data-original-src` get an `onerror` fallback to their
/// unproxied address, and plain left clicks on `target="_blank"` links open
/// the unproxied URL with `noreferrer noopener`.
pub fn fallback_script(ctx: &ProxyContext) -> String {
    let prefix = serde_json::to_string(ctx.origin().prefix())
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace('<', "\\u003c");

    let mut script = String::with_capacity(1024);
    script.push_str("<script>(function () {\n  var prefix = ");
    script.push_str(&prefix);
    script.push_str(r#";
  function unproxied(url) {
    return url && url.indexOf(prefix) === 0 ? url.slice(prefix.length) : url;
  }
  document.addEventListener('DOMContentLoaded', function () {
    document.querySelectorAll('img').forEach(function (img) {
      if (!img.hasAttribute('data-original-src') && img.src) {
        img.setAttribute('data-original-src', unproxied(img.src));
        img.setAttribute('onerror', "this.onerror=null;if(this.src!==this.dataset.originalSrc){this.src=this.dataset.originalSrc;}");
      }
    });
    document.querySelectorAll('a[target="_blank"]').forEach(function (link) {
      link.addEventListener('click', function (e) {
        if (e.button !== 0 || e.ctrlKey || e.metaKey || e.shiftKey) return;
        e.preventDefault();
        link.setAttribute('rel', 'noreferrer noopener');
        window.open(unproxied(link.href), '_blank', 'noreferrer,noopener');
      });
    });
  });
})();</script>"#);

    script
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

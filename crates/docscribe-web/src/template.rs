use axum::response::Html;
use docscribe_core::Config;

const INDEX_HTML: &str = include_str!("../../../templates/index.html");

/// Render the index page, injecting the server defaults.
pub fn render_index(config: &Config) -> Html<String> {
    let html = INDEX_HTML
        .replace("{{ default_model }}", &html_attr(&config.model))
        .replace("{{ default_format }}", config.default_format.extension())
        .replace("{{ default_task }}", config.default_task.as_str())
        .replace(
            "{{ api_key_configured }}",
            if config.api_key.is_some() { "true" } else { "false" },
        );
    Html(html)
}

fn html_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_defaults() {
        let config = Config {
            model: "local\"model".into(),
            ..Config::default()
        };
        let Html(page) = render_index(&config);
        assert!(page.contains("value=\"local&quot;model\""));
        assert!(!page.contains("{{"));
    }
}

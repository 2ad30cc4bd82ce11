use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::models::common::Config;

const ENV_PREFIX: &str = "INDEXER";

/// Loads `file_name` from the crate root, overlaid by `INDEXER__*` environment variables.
pub fn load_config<P: AsRef<Path>>(file_name: P) -> Result<Config> {
    // Build the path to the config file
    let manifest_dir = env!("CARGO_MANIFEST_DIR").to_string();
    let config_path = Path::new(&manifest_dir).join(file_name);
    info!("Config path: {}", config_path.to_string_lossy());

    let config: Config = config::Config::builder()
        .add_source(config::File::from(config_path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to read config")?
        .try_deserialize()
        .context("failed to parse config")?;

    Ok(config)
}

/// Reduces an HTML error page (as returned by some RPC gateways) to its first line of text.
pub fn strip_html(error: &str) -> String {
    // If the error contains HTML tags, extract just the text content
    if error.contains("<!doctype html>") || error.contains("<html>") {
        // Remove all HTML tags and return the first non-empty line of text
        error
            .lines()
            .map(|line| line.trim())
            .find(|line| {
                !line.starts_with('<')
                    && !line.ends_with('>')
                    && !line.is_empty()
                    && *line != "html"
                    && *line != "body"
            })
            .unwrap_or(error)
            .to_string()
    } else {
        // No HTML, keep the message as is
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html_keeps_plain_errors() {
        assert_eq!(strip_html("execution reverted"), "execution reverted");
    }

    #[test]
    fn test_strip_html_extracts_text() {
        let page = "<!doctype html>\n<html>\n<body>\n<h1>\n502 Bad Gateway\n</h1>\n</body>\n</html>";
        assert_eq!(strip_html(page), "502 Bad Gateway");
    }
}
